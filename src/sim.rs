//! An in-memory bus for dry runs and tests.
//!
//! Each simulated actuator walks toward its goal by a fixed number of units
//! every time its present position is read, so motion only progresses as fast
//! as the host polls. Faults can be injected per actuator or per batch.

use ::std::collections::{BTreeMap, HashMap, VecDeque};

use crate::batch::BatchEntry;
use crate::bus::{Bus, Reading};
use crate::constants::{ControlField, ControlTable, FieldSpec};
use crate::error::CommError;
use crate::protocol::{decode_value, DeviceError, ProtocolVersion};

pub const DEFAULT_SIM_SPEED: u32 = 64;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Transaction {
    Write {
        id: u8,
        field: ControlField,
        value: u32,
    },
    Read {
        id: u8,
        field: ControlField,
    },
    Batch {
        field: ControlField,
        ids: Vec<u8>,
    },
}

#[derive(Debug)]
struct SimServo {
    position: u32,
    goal: Option<u32>,
    torque: bool,
    scripted: VecDeque<u32>,
    read_failures: VecDeque<CommError>,
    write_failure: Option<CommError>,
    device_error: u8,
}

impl SimServo {
    fn new(position: u32) -> Self {
        Self {
            position,
            goal: None,
            torque: false,
            scripted: VecDeque::new(),
            read_failures: VecDeque::new(),
            write_failure: None,
            device_error: 0,
        }
    }

    fn step(&mut self, speed: u32) {
        if let Some(position) = self.scripted.pop_front() {
            self.position = position;
            return;
        }
        let Some(goal) = self.goal.filter(|_| self.torque) else {
            return;
        };
        self.position = if self.position < goal {
            self.position.saturating_add(speed).min(goal)
        } else {
            self.position.saturating_sub(speed).max(goal)
        };
    }
}

pub struct SimulatedBus {
    table: ControlTable,
    protocol: ProtocolVersion,
    speed: u32,
    servos: BTreeMap<u8, SimServo>,
    batch_failures: VecDeque<CommError>,
    transactions: Vec<Transaction>,
}

impl SimulatedBus {
    pub fn new(table: ControlTable, ids: &[u8], start_position: u32) -> Self {
        Self {
            table,
            protocol: ProtocolVersion::V1,
            speed: DEFAULT_SIM_SPEED,
            servos: ids
                .iter()
                .map(|id| (*id, SimServo::new(start_position)))
                .collect(),
            batch_failures: VecDeque::new(),
            transactions: vec![],
        }
    }

    pub fn with_protocol(mut self, protocol: ProtocolVersion) -> Self {
        self.protocol = protocol;
        self
    }

    /// Units each actuator moves per position read.
    pub fn with_speed(mut self, speed: u32) -> Self {
        self.speed = speed;
        self
    }

    /// Positions returned by the next reads of `id`, ahead of the motion model.
    pub fn script_positions(&mut self, id: u8, positions: impl IntoIterator<Item = u32>) {
        if let Some(servo) = self.servos.get_mut(&id) {
            servo.scripted.extend(positions);
        }
    }

    pub fn fail_next_batches(&mut self, count: usize, error: CommError) {
        self.batch_failures
            .extend(std::iter::repeat(error).take(count));
    }

    pub fn fail_next_reads(&mut self, id: u8, count: usize, error: CommError) {
        if let Some(servo) = self.servos.get_mut(&id) {
            servo
                .read_failures
                .extend(std::iter::repeat(error).take(count));
        }
    }

    /// Every single-target write to `id` fails until cleared with `None`.
    pub fn fail_writes(&mut self, id: u8, error: Option<CommError>) {
        if let Some(servo) = self.servos.get_mut(&id) {
            servo.write_failure = error;
        }
    }

    pub fn set_device_error(&mut self, id: u8, raw: u8) {
        if let Some(servo) = self.servos.get_mut(&id) {
            servo.device_error = raw;
        }
    }

    pub fn position(&self, id: u8) -> Option<u32> {
        self.servos.get(&id).map(|servo| servo.position)
    }

    pub fn goal(&self, id: u8) -> Option<u32> {
        self.servos.get(&id).and_then(|servo| servo.goal)
    }

    pub fn torque(&self, id: u8) -> Option<bool> {
        self.servos.get(&id).map(|servo| servo.torque)
    }

    pub fn transactions(&self) -> &[Transaction] {
        &self.transactions
    }

    fn resolve(&self, spec: FieldSpec) -> Result<ControlField, CommError> {
        self.table.field_at(spec).ok_or(CommError::NotAvailable)
    }
}

impl Bus for SimulatedBus {
    fn protocol(&self) -> ProtocolVersion {
        self.protocol
    }

    fn write_field(
        &mut self,
        id: u8,
        field: FieldSpec,
        value: u32,
    ) -> Result<DeviceError, CommError> {
        let field = self.resolve(field)?;
        self.transactions
            .push(Transaction::Write { id, field, value });

        let protocol = self.protocol;
        let servo = self.servos.get_mut(&id).ok_or(CommError::RxTimeout)?;
        if let Some(error) = servo.write_failure {
            return Err(error);
        }
        match field {
            ControlField::TorqueEnable => servo.torque = value != 0,
            ControlField::GoalPosition => servo.goal = Some(value),
            // Read-only register.
            ControlField::PresentPosition => {}
        }
        Ok(DeviceError::new(protocol, servo.device_error))
    }

    fn read_field(&mut self, id: u8, field: FieldSpec) -> Result<Reading, CommError> {
        let field = self.resolve(field)?;
        self.transactions.push(Transaction::Read { id, field });

        let (protocol, speed) = (self.protocol, self.speed);
        let servo = self.servos.get_mut(&id).ok_or(CommError::RxTimeout)?;
        if field == ControlField::PresentPosition {
            servo.step(speed);
        }
        if let Some(error) = servo.read_failures.pop_front() {
            return Err(error);
        }

        let value = match field {
            ControlField::TorqueEnable => u32::from(servo.torque),
            ControlField::GoalPosition => servo.goal.unwrap_or(servo.position),
            ControlField::PresentPosition => servo.position,
        };
        Ok(Reading {
            value,
            error: DeviceError::new(protocol, servo.device_error),
        })
    }

    fn write_batch(&mut self, field: FieldSpec, entries: &[BatchEntry]) -> Result<(), CommError> {
        let control_field = self.resolve(field)?;
        self.transactions.push(Transaction::Batch {
            field: control_field,
            ids: entries.iter().map(|entry| entry.id).collect(),
        });

        if let Some(error) = self.batch_failures.pop_front() {
            return Err(error);
        }
        if entries
            .iter()
            .any(|entry| entry.payload.len() != field.width as usize)
        {
            return Err(CommError::TxError);
        }

        for entry in entries {
            // Broadcast frames are not acknowledged; absent ids are silent.
            let Some(servo) = self.servos.get_mut(&entry.id) else {
                continue;
            };
            let value = decode_value(&entry.payload);
            match control_field {
                ControlField::TorqueEnable => servo.torque = value != 0,
                ControlField::GoalPosition => servo.goal = Some(value),
                ControlField::PresentPosition => {}
            }
        }
        Ok(())
    }
}
