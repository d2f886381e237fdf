use ::std::fmt;
use tracing::{debug, info};

use crate::actuators::{ActionResult, Actuator, Operation, Status};
use crate::batch::ParameterBatch;
use crate::bus::Bus;
use crate::config::SessionConfig;
use crate::constants::{ControlTable, TORQUE_DISABLE, TORQUE_ENABLE};
use crate::dispatch::{DispatchOutcome, SyncDispatcher};
use crate::error::SequencerError;
use crate::settle::SettleDetector;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Initialized,
    Stepping,
    ShuttingDown,
    Closed,
}

impl SessionState {
    fn name(&self) -> &'static str {
        match self {
            SessionState::Idle => "idle",
            SessionState::Initialized => "initialized",
            SessionState::Stepping => "stepping",
            SessionState::ShuttingDown => "shutting down",
            SessionState::Closed => "closed",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

pub struct StepReport {
    pub step: u64,
    pub waypoint_index: usize,
    pub dispatch: DispatchOutcome,
    pub polls: u32,
    /// Reads from the final pass that failed or carried a device fault.
    pub faults: Vec<ActionResult>,
}

/// Steps every actuator through its waypoints in lock-step.
///
/// Owns the bus for the whole session, so dispatch and polling can never
/// overlap on the wire.
pub struct MotionSequencer<B: Bus> {
    bus: B,
    table: ControlTable,
    actuators: Vec<Actuator>,
    batch: ParameterBatch,
    dispatcher: SyncDispatcher,
    detector: SettleDetector,
    waypoint_index: usize,
    waypoint_count: usize,
    steps_completed: u64,
    state: SessionState,
}

impl<B: Bus> MotionSequencer<B> {
    pub fn new(bus: B, config: &SessionConfig) -> Result<Self, SequencerError> {
        let actuators = config
            .actuator_ids
            .iter()
            .map(|id| Actuator::new(*id, config.waypoints()))
            .collect();
        Self::with_actuators(bus, config, actuators)
    }

    /// Builds a sequencer over explicit actuator records. All of them must carry
    /// the same number of waypoints.
    pub fn with_actuators(
        bus: B,
        config: &SessionConfig,
        actuators: Vec<Actuator>,
    ) -> Result<Self, SequencerError> {
        let expected = actuators.first().map_or(0, |a| a.waypoints.len());
        for actuator in &actuators {
            if actuator.waypoints.len() != expected || expected == 0 {
                return Err(SequencerError::WaypointCountMismatch {
                    id: actuator.id,
                    found: actuator.waypoints.len(),
                    expected: expected.max(1),
                });
            }
        }

        let table = config.control_table;
        Ok(Self {
            bus,
            table,
            actuators,
            batch: ParameterBatch::new(table.goal_position),
            dispatcher: SyncDispatcher::new(),
            detector: SettleDetector::new(
                table.present_position,
                config.settle_threshold,
                config.max_settle_polls,
            ),
            waypoint_index: config.starting_waypoint % expected.max(1),
            waypoint_count: expected,
            steps_completed: 0,
            state: SessionState::Idle,
        })
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn waypoint_index(&self) -> usize {
        self.waypoint_index
    }

    pub fn steps_completed(&self) -> u64 {
        self.steps_completed
    }

    pub fn actuators(&self) -> &[Actuator] {
        &self.actuators
    }

    pub fn bus(&self) -> &B {
        &self.bus
    }

    pub fn bus_mut(&mut self) -> &mut B {
        &mut self.bus
    }

    pub fn dispatcher(&self) -> &SyncDispatcher {
        &self.dispatcher
    }

    fn invalid(&self, operation: &'static str) -> SequencerError {
        SequencerError::InvalidState {
            operation,
            state: self.state.name(),
        }
    }

    fn write_torque(&mut self, value: u32, operation: Operation) -> Vec<ActionResult> {
        let field = self.table.torque_enable;
        let mut results = Vec::with_capacity(self.actuators.len());

        for actuator in self.actuators.iter_mut() {
            let status = match self.bus.write_field(actuator.id, field, value) {
                Ok(error) => Status::from_device_error(error),
                Err(e) => Status::CommFailure(e),
            };
            actuator.last_status = status;

            let result = ActionResult::new(actuator.id, operation, status);
            if result.communicated() {
                actuator.torque_enabled = value == TORQUE_ENABLE;
            }
            result.log();
            results.push(result);
        }
        results
    }

    /// Enables torque on every actuator. One actuator failing does not stop
    /// the others.
    pub fn initialize(&mut self) -> Result<Vec<ActionResult>, SequencerError> {
        if self.state != SessionState::Idle {
            return Err(self.invalid("initialize"));
        }

        let results = self.write_torque(TORQUE_ENABLE, Operation::EnableTorque);
        for result in results.iter().filter(|r| r.is_ok()) {
            info!(
                "[ID:{:03}] Actuator has been successfully connected",
                result.actuator_id
            );
        }

        self.state = SessionState::Initialized;
        Ok(results)
    }

    /// Dispatches the current waypoint to every actuator, waits until all of
    /// them have settled on the same pass, then advances to the next waypoint.
    ///
    /// A failed dispatch is not fatal: polling still runs against the goals of
    /// this step. On `SettleTimeout` the waypoint index is left unchanged so
    /// the next call retries the same step.
    pub fn run_step(&mut self) -> Result<StepReport, SequencerError> {
        if !matches!(
            self.state,
            SessionState::Initialized | SessionState::Stepping
        ) {
            return Err(self.invalid("run a step"));
        }
        self.state = SessionState::Stepping;

        let uuid = uuid::Uuid::new_v4();
        debug!("sequencer::run_step::START uuid={}", uuid);
        let index = self.waypoint_index;

        for actuator in self.actuators.iter_mut() {
            let goal = actuator.waypoints[index];
            if let Err(e) = self.batch.add_entry(actuator.id, goal) {
                self.batch.clear();
                return Err(e.into());
            }
            actuator.goal = Some(goal);
        }

        let dispatch = self.dispatcher.transmit(&mut self.bus, &mut self.batch)?;
        let report = self
            .detector
            .wait_until_settled(&mut self.bus, &mut self.actuators)?;

        self.waypoint_index = (index + 1) % self.waypoint_count;
        self.steps_completed += 1;
        info!(
            "Step {} settled on waypoint {} after {} polls",
            self.steps_completed, index, report.polls
        );
        debug!("sequencer::run_step::END uuid={}", uuid);

        Ok(StepReport {
            step: self.steps_completed,
            waypoint_index: index,
            dispatch,
            polls: report.polls,
            faults: report
                .last_pass
                .results
                .into_iter()
                .filter(|r| !r.is_ok())
                .collect(),
        })
    }

    /// Disables torque on every actuator and closes the bus. Every actuator
    /// gets a disable attempt regardless of earlier failures.
    pub fn shutdown(&mut self) -> Result<Vec<ActionResult>, SequencerError> {
        if self.state == SessionState::Closed {
            return Err(self.invalid("shut down"));
        }
        self.state = SessionState::ShuttingDown;
        info!("Disabling torque on {} actuators", self.actuators.len());

        let results = self.write_torque(TORQUE_DISABLE, Operation::DisableTorque);
        self.bus.close();
        self.state = SessionState::Closed;
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{BatchError, CommError};
    use crate::sim::{SimulatedBus, Transaction};

    fn config(ids: &[u8]) -> SessionConfig {
        SessionConfig {
            actuator_ids: ids.to_vec(),
            ..SessionConfig::default()
        }
    }

    fn sequencer(ids: &[u8]) -> MotionSequencer<SimulatedBus> {
        let config = config(ids);
        let bus = SimulatedBus::new(config.control_table, ids, 0).with_speed(256);
        MotionSequencer::new(bus, &config).unwrap()
    }

    #[test]
    fn state_machine_rejects_out_of_order_calls() {
        let mut sequencer = sequencer(&[1, 2]);
        assert_eq!(sequencer.state(), SessionState::Idle);
        assert_eq!(
            sequencer.run_step().map(|r| r.step),
            Err(SequencerError::InvalidState {
                operation: "run a step",
                state: "idle"
            })
        );

        sequencer.initialize().unwrap();
        assert_eq!(sequencer.state(), SessionState::Initialized);
        assert!(sequencer.initialize().is_err());

        sequencer.run_step().unwrap();
        assert_eq!(sequencer.state(), SessionState::Stepping);

        sequencer.shutdown().unwrap();
        assert_eq!(sequencer.state(), SessionState::Closed);
        assert!(sequencer.run_step().is_err());
        assert!(sequencer.shutdown().is_err());
    }

    #[test]
    fn initialize_continues_past_a_failed_actuator() {
        let mut sequencer = sequencer(&[1, 2, 3]);
        sequencer
            .bus_mut()
            .fail_writes(2, Some(CommError::RxTimeout));

        let results = sequencer.initialize().unwrap();
        let ok: Vec<bool> = results.iter().map(|r| r.is_ok()).collect();
        assert_eq!(ok, vec![true, false, true]);
        assert_eq!(sequencer.bus().torque(3), Some(true));
        assert!(!sequencer.actuators()[1].torque_enabled);
        assert_eq!(sequencer.state(), SessionState::Initialized);
    }

    #[test]
    fn waypoint_index_toggles_after_each_step() {
        let mut sequencer = sequencer(&[1, 2]);
        sequencer.initialize().unwrap();

        let indices: Vec<usize> = (0..5)
            .map(|_| sequencer.run_step().unwrap().waypoint_index)
            .collect();
        assert_eq!(indices, vec![0, 1, 0, 1, 0]);
        assert_eq!(sequencer.waypoint_index(), 1);
        assert_eq!(sequencer.steps_completed(), 5);
    }

    #[test]
    fn mismatched_waypoint_lists_are_rejected() {
        let config = config(&[1, 2]);
        let bus = SimulatedBus::new(config.control_table, &[1, 2], 0);
        let actuators = vec![
            Actuator::new(1, vec![0, 1023]),
            Actuator::new(2, vec![0, 512, 1023]),
        ];
        assert_eq!(
            MotionSequencer::with_actuators(bus, &config, actuators).map(|_| ()),
            Err(SequencerError::WaypointCountMismatch {
                id: 2,
                found: 3,
                expected: 2
            })
        );
    }

    #[test]
    fn duplicate_actuator_records_fail_loudly() {
        let config = config(&[1]);
        let bus = SimulatedBus::new(config.control_table, &[1], 0);
        let actuators = vec![
            Actuator::new(1, vec![0, 1023]),
            Actuator::new(1, vec![0, 1023]),
        ];
        let mut sequencer = MotionSequencer::with_actuators(bus, &config, actuators).unwrap();
        sequencer.initialize().unwrap();

        assert_eq!(
            sequencer.run_step().map(|r| r.step),
            Err(SequencerError::Batch(BatchError::DuplicateEntry { id: 1 }))
        );
        // Nothing reached the wire after the contract violation.
        assert!(sequencer
            .bus()
            .transactions()
            .iter()
            .all(|t| !matches!(t, Transaction::Batch { .. })));
    }
}
