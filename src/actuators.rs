use ::std::fmt;
use tracing::warn;

use crate::error::CommError;
use crate::protocol::DeviceError;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Operation {
    EnableTorque,
    DisableTorque,
    ReadPosition,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Operation::EnableTorque => "enable torque",
            Operation::DisableTorque => "disable torque",
            Operation::ReadPosition => "read position",
        };
        f.write_str(name)
    }
}

/// Outcome of the last exchange with one actuator.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Status {
    Ok,
    CommFailure(CommError),
    DeviceFault(DeviceError),
}

impl Status {
    pub fn from_device_error(error: DeviceError) -> Self {
        if error.is_empty() {
            Status::Ok
        } else {
            Status::DeviceFault(error)
        }
    }
}

pub struct ActionResult {
    pub actuator_id: u8,
    pub operation: Operation,
    pub status: Status,
}

impl ActionResult {
    pub fn new(actuator_id: u8, operation: Operation, status: Status) -> Self {
        Self {
            actuator_id,
            operation,
            status,
        }
    }

    /// The exchange completed; the device may still have flagged a fault.
    pub fn communicated(&self) -> bool {
        !matches!(self.status, Status::CommFailure(_))
    }

    pub fn is_ok(&self) -> bool {
        self.status == Status::Ok
    }

    pub fn log(&self) {
        match self.status {
            Status::Ok => {}
            Status::CommFailure(e) => warn!(
                "[ID:{:03}] {} failed: {}",
                self.actuator_id, self.operation, e
            ),
            Status::DeviceFault(e) => warn!(
                "[ID:{:03}] {} reported device error: {}",
                self.actuator_id, self.operation, e
            ),
        }
    }
}

/// Host-side record of one actuator for the lifetime of a session.
#[derive(Clone, Debug)]
pub struct Actuator {
    pub id: u8,
    pub torque_enabled: bool,
    pub waypoints: Vec<u32>,
    /// Goal of the step in progress.
    pub goal: Option<u32>,
    /// Last successfully read position.
    pub measured: Option<u32>,
    pub last_status: Status,
}

impl Actuator {
    pub fn new(id: u8, waypoints: Vec<u32>) -> Self {
        Self {
            id,
            torque_enabled: false,
            waypoints,
            goal: None,
            measured: None,
            last_status: Status::Ok,
        }
    }
}
