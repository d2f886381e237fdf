use tracing::{debug, trace};

use crate::actuators::{ActionResult, Actuator, Operation, Status};
use crate::bus::Bus;
use crate::constants::FieldSpec;
use crate::error::SequencerError;

/// Results of reading every actuator once.
pub struct PollPass {
    pub results: Vec<ActionResult>,
    /// Every actuator was within threshold on this pass.
    pub settled: bool,
}

pub struct SettleReport {
    pub polls: u32,
    pub last_pass: PollPass,
}

/// `[ID:001] GoalPos:1023  PresPos:1021`, with `-` for a value not known yet.
fn progress_line(actuator: &Actuator) -> String {
    let show = |value: Option<u32>| value.map_or_else(|| "-".to_string(), |v| format!("{:03}", v));
    format!(
        "[ID:{:03}] GoalPos:{}  PresPos:{}",
        actuator.id,
        show(actuator.goal),
        show(actuator.measured)
    )
}

/// Polls present positions until all actuators are within threshold of their
/// goals on the same pass.
#[derive(Clone, Copy, Debug)]
pub struct SettleDetector {
    present_position: FieldSpec,
    threshold: u32,
    max_polls: Option<u32>,
}

impl SettleDetector {
    /// `max_polls` of `None` waits forever.
    pub fn new(present_position: FieldSpec, threshold: u32, max_polls: Option<u32>) -> Self {
        Self {
            present_position,
            threshold,
            max_polls,
        }
    }

    /// An actuator with no goal or no successful reading yet is not settled.
    pub fn is_settled(&self, actuator: &Actuator) -> bool {
        match (actuator.goal, actuator.measured) {
            (Some(goal), Some(measured)) => goal.abs_diff(measured) <= self.threshold,
            _ => false,
        }
    }

    /// Reads each actuator once. A failed read keeps the previous measurement.
    pub fn poll_once<B: Bus>(&self, bus: &mut B, actuators: &mut [Actuator]) -> PollPass {
        let mut results = Vec::with_capacity(actuators.len());

        for actuator in actuators.iter_mut() {
            let status = match bus.read_field(actuator.id, self.present_position) {
                Ok(reading) => {
                    actuator.measured = Some(reading.value);
                    Status::from_device_error(reading.error)
                }
                Err(e) => Status::CommFailure(e),
            };
            actuator.last_status = status;

            let result = ActionResult::new(actuator.id, Operation::ReadPosition, status);
            result.log();
            results.push(result);
        }

        for actuator in actuators.iter() {
            debug!("{}", progress_line(actuator));
        }

        let settled = actuators.iter().all(|actuator| self.is_settled(actuator));
        PollPass { results, settled }
    }

    pub fn wait_until_settled<B: Bus>(
        &self,
        bus: &mut B,
        actuators: &mut [Actuator],
    ) -> Result<SettleReport, SequencerError> {
        let mut polls = 0;
        loop {
            let pass = self.poll_once(bus, actuators);
            polls += 1;
            trace!("Settle poll {} settled={}", polls, pass.settled);

            if pass.settled {
                return Ok(SettleReport {
                    polls,
                    last_pass: pass,
                });
            }
            if self.max_polls.is_some_and(|max| polls >= max) {
                return Err(SequencerError::SettleTimeout { polls });
            }
        }
    }
}
