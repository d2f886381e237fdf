use ::clap::Parser;
use ::eyre::{Result, WrapErr};
use ::std::sync::atomic::{AtomicBool, Ordering};
use ::std::sync::Arc;
use ::thread_priority::ThreadPriority;
use tracing::{info, warn};

use servo_sync::bus::Bus;
use servo_sync::config::SessionConfig;
use servo_sync::constants::{
    ControlTable, DeviceModel, DEFAULT_BIT_RATE, DEFAULT_MAX_POSITION, DEFAULT_MIN_POSITION,
    DEFAULT_SETTLE_THRESHOLD,
};
use servo_sync::keyboard::KeyboardCommands;
use servo_sync::protocol::ProtocolVersion;
use servo_sync::runtime::{open_bus, MotionRuntime, SessionSummary};
use servo_sync::sim::SimulatedBus;
use servo_sync::transport::{SerialTransport, DEFAULT_READ_TIMEOUT};
use servo_sync::{initialize_file_and_console_logging, initialize_logging};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Serial device the bus adapter is attached to
    #[arg(long, default_value = "/dev/ttyUSB0")]
    port: String,
    /// Actuator model, selects the control table
    #[arg(long, value_enum, default_value = "mx")]
    model: DeviceModel,
    /// Protocol version override (defaults to the model's)
    #[arg(long, value_enum)]
    protocol: Option<ProtocolVersion>,
    /// Actuator ids on the bus
    #[arg(long, value_delimiter = ',', default_value = "1,2,3,4")]
    ids: Vec<u8>,
    /// First waypoint position
    #[arg(long, default_value_t = DEFAULT_MIN_POSITION)]
    min_position: u32,
    /// Second waypoint position
    #[arg(long, default_value_t = DEFAULT_MAX_POSITION)]
    max_position: u32,
    /// Moving status threshold
    #[arg(long, default_value_t = DEFAULT_SETTLE_THRESHOLD)]
    settle_threshold: u32,
    /// Bus bit rate
    #[arg(long, default_value_t = DEFAULT_BIT_RATE)]
    bit_rate: u32,
    /// Give up on a step after this many polling passes (default: never)
    #[arg(long)]
    max_settle_polls: Option<u32>,
    /// Waypoint index of the first step
    #[arg(long, default_value_t = 0)]
    starting_waypoint: usize,
    /// Run against a simulated bus instead of the serial port
    #[arg(long, default_value = "false")]
    simulate: bool,
    /// File logging
    #[arg(long, default_value = "false")]
    file_logging: bool,
}

impl Args {
    fn session_config(&self) -> SessionConfig {
        SessionConfig {
            port: self.port.clone(),
            model: self.model,
            protocol: self.protocol.unwrap_or(self.model.default_protocol()),
            control_table: ControlTable::for_model(self.model),
            actuator_ids: self.ids.clone(),
            min_position: self.min_position,
            max_position: self.max_position,
            settle_threshold: self.settle_threshold,
            bit_rate: self.bit_rate,
            max_settle_polls: self.max_settle_polls,
            starting_waypoint: self.starting_waypoint,
        }
    }
}

fn run_session<B: Bus>(
    bus: B,
    config: &SessionConfig,
    shutdown: Arc<AtomicBool>,
) -> Result<SessionSummary> {
    let mut runtime = MotionRuntime::new(bus, config)?;
    let mut commands = KeyboardCommands::new(shutdown);
    runtime.run(&mut commands)
}

fn session_thread(
    config: SessionConfig,
    simulate: bool,
    shutdown: Arc<AtomicBool>,
) -> Result<SessionSummary> {
    if let Err(e) = ::thread_priority::set_current_thread_priority(ThreadPriority::Max) {
        warn!("Failed to raise control thread priority: {:?}", e);
    }

    if simulate {
        info!("Running against simulated bus");
        let bus = SimulatedBus::new(
            config.control_table,
            &config.actuator_ids,
            config.min_position,
        )
        .with_protocol(config.protocol);
        return run_session(bus, &config, shutdown);
    }

    let transport = SerialTransport::new(config.port.clone(), DEFAULT_READ_TIMEOUT);
    let bus = open_bus(transport, &config)
        .wrap_err_with(|| format!("Failed to set up bus on {}", config.port))?;
    run_session(bus, &config, shutdown)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let _log_guard = if args.file_logging {
        Some(initialize_file_and_console_logging())
    } else {
        initialize_logging();
        None
    };

    let config = args.session_config();
    let shutdown = Arc::new(AtomicBool::new(false));

    let session_shutdown = shutdown.clone();
    let simulate = args.simulate;
    let mut session =
        tokio::task::spawn_blocking(move || session_thread(config, simulate, session_shutdown));

    // The session only looks at the flag between steps, so a Ctrl+C during a
    // step lets that step settle before torque is released.
    let summary = tokio::select! {
        result = &mut session => result??,
        _ = tokio::signal::ctrl_c() => {
            info!("Ctrl+C received - shutting down after the current step...");
            shutdown.store(true, Ordering::Relaxed);
            session.await??
        }
    };

    info!(
        "Session complete: {} steps, {} dispatch failures, {} settle timeouts",
        summary.steps_completed, summary.dispatch_failures, summary.settle_timeouts
    );
    if !summary.enable_failures.is_empty() {
        warn!(
            "Torque enable failed on actuators {:?}",
            summary.enable_failures
        );
    }
    if !summary.shutdown_failures.is_empty() {
        warn!(
            "Torque may still be enabled on actuators {:?}",
            summary.shutdown_failures
        );
    }
    Ok(())
}
