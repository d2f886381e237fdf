use ::eyre::{Result, WrapErr};
use tracing::{info, warn};

use crate::actuators::ActionResult;
use crate::bus::{Bus, DynamixelBus};
use crate::commands::{Command, CommandSource};
use crate::config::SessionConfig;
use crate::error::{SequencerError, SetupError};
use crate::sequencer::MotionSequencer;
use crate::transport::Transport;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SessionSummary {
    pub steps_completed: u64,
    pub dispatch_failures: u64,
    pub settle_timeouts: u64,
    /// Actuators whose torque-enable did not go through cleanly.
    pub enable_failures: Vec<u8>,
    /// Actuators whose torque-disable did not go through cleanly.
    pub shutdown_failures: Vec<u8>,
}

/// Opens and configures the port. Any failure here ends the session before a
/// single actuator is addressed.
pub fn open_bus<T: Transport>(
    mut transport: T,
    config: &SessionConfig,
) -> Result<DynamixelBus<T>, SetupError> {
    transport.open()?;
    if let Err(e) = transport.set_rate(config.bit_rate) {
        transport.close();
        return Err(e);
    }
    Ok(DynamixelBus::new(transport, config.protocol))
}

fn failed_ids(results: &[ActionResult]) -> Vec<u8> {
    results
        .iter()
        .filter(|result| !result.is_ok())
        .map(|result| result.actuator_id)
        .collect()
}

pub struct MotionRuntime<B: Bus> {
    sequencer: MotionSequencer<B>,
}

impl<B: Bus> MotionRuntime<B> {
    pub fn new(bus: B, config: &SessionConfig) -> Result<Self> {
        config.validate().wrap_err("Invalid session configuration")?;
        Ok(Self {
            sequencer: MotionSequencer::new(bus, config)?,
        })
    }

    pub fn sequencer(&self) -> &MotionSequencer<B> {
        &self.sequencer
    }

    /// Enables torque, steps once per `Advance` until `Terminate`, then
    /// disables torque and closes the bus. Shutdown runs even when the loop
    /// stops on an error.
    pub fn run(&mut self, commands: &mut dyn CommandSource) -> Result<SessionSummary> {
        info!(
            "Starting motion runtime with {} actuators",
            self.sequencer.actuators().len()
        );
        let mut summary = SessionSummary {
            enable_failures: failed_ids(&self.sequencer.initialize()?),
            ..SessionSummary::default()
        };
        let loop_result = self.control_loop(commands, &mut summary);
        if let Err(e) = &loop_result {
            warn!("Control loop stopped: {:#}", e);
        }

        summary.shutdown_failures = failed_ids(&self.sequencer.shutdown()?);
        summary.steps_completed = self.sequencer.steps_completed();
        summary.dispatch_failures = self.sequencer.dispatcher().failed();
        info!(
            "Motion runtime closed after {} steps",
            summary.steps_completed
        );

        loop_result.map(|()| summary)
    }

    fn control_loop(
        &mut self,
        commands: &mut dyn CommandSource,
        summary: &mut SessionSummary,
    ) -> Result<()> {
        info!("Entering main control loop");
        loop {
            match commands.next_command()? {
                Command::Terminate => {
                    info!("Exiting main control loop");
                    return Ok(());
                }
                Command::Advance => match self.sequencer.run_step() {
                    // Per-actuator faults were already logged while polling.
                    Ok(_) => {}
                    Err(SequencerError::SettleTimeout { polls }) => {
                        summary.settle_timeouts += 1;
                        warn!(
                            "Actuators did not settle after {} polls; waypoint {} will be retried",
                            polls,
                            self.sequencer.waypoint_index()
                        );
                    }
                    Err(e) => return Err(e.into()),
                },
            }
        }
    }
}
