use crate::constants::{
    ControlField, ControlTable, DeviceModel, BROADCAST_ID, DEFAULT_ACTUATOR_IDS, DEFAULT_BIT_RATE,
    DEFAULT_MAX_POSITION, DEFAULT_MIN_POSITION, DEFAULT_SETTLE_THRESHOLD,
};
use crate::error::SetupError;
use crate::protocol::ProtocolVersion;

/// Number of waypoints each actuator toggles between.
pub const WAYPOINTS_PER_ACTUATOR: usize = 2;

#[derive(Clone, Debug)]
pub struct SessionConfig {
    pub port: String,
    pub model: DeviceModel,
    pub protocol: ProtocolVersion,
    pub control_table: ControlTable,
    pub actuator_ids: Vec<u8>,
    pub min_position: u32,
    pub max_position: u32,
    /// Largest |goal - present| still counted as arrived, in position units.
    pub settle_threshold: u32,
    pub bit_rate: u32,
    /// Give up on a step after this many polling passes. `None` never gives up.
    pub max_settle_polls: Option<u32>,
    /// Waypoint used by the first step.
    pub starting_waypoint: usize,
}

impl SessionConfig {
    pub fn for_model(model: DeviceModel) -> Self {
        Self {
            port: "/dev/ttyUSB0".to_string(),
            model,
            protocol: model.default_protocol(),
            control_table: ControlTable::for_model(model),
            actuator_ids: DEFAULT_ACTUATOR_IDS.to_vec(),
            min_position: DEFAULT_MIN_POSITION,
            max_position: DEFAULT_MAX_POSITION,
            settle_threshold: DEFAULT_SETTLE_THRESHOLD,
            bit_rate: DEFAULT_BIT_RATE,
            max_settle_polls: None,
            starting_waypoint: 0,
        }
    }

    /// Waypoints shared by every actuator: index 0 is the minimum, 1 the maximum.
    pub fn waypoints(&self) -> Vec<u32> {
        vec![self.min_position, self.max_position]
    }

    pub fn validate(&self) -> Result<(), SetupError> {
        if self.actuator_ids.is_empty() {
            return Err(SetupError::Config("no actuator ids configured".to_string()));
        }
        for (i, id) in self.actuator_ids.iter().enumerate() {
            if *id >= BROADCAST_ID {
                return Err(SetupError::Config(format!(
                    "actuator id {} is not a unicast address",
                    id
                )));
            }
            if self.actuator_ids[..i].contains(id) {
                return Err(SetupError::Config(format!("actuator id {} listed twice", id)));
            }
        }
        for field in ControlField::ALL {
            let spec = self.control_table.field(field);
            if !spec.has_supported_width() {
                return Err(SetupError::Config(format!(
                    "{:?} register is {} bytes wide; expected 1, 2 or 4",
                    field, spec.width
                )));
            }
        }
        if self.min_position > self.max_position {
            return Err(SetupError::Config(format!(
                "min position {} is above max position {}",
                self.min_position, self.max_position
            )));
        }
        if self.max_position > self.control_table.goal_position.max_value() {
            return Err(SetupError::Config(format!(
                "max position {} does not fit in a {}-byte goal position",
                self.max_position, self.control_table.goal_position.width
            )));
        }
        if self.starting_waypoint >= WAYPOINTS_PER_ACTUATOR {
            return Err(SetupError::Config(format!(
                "starting waypoint {} is out of range",
                self.starting_waypoint
            )));
        }
        if self.max_settle_polls == Some(0) {
            return Err(SetupError::Config(
                "max settle polls must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::for_model(DeviceModel::Mx)
    }
}
