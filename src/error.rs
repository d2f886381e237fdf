use thiserror::Error;

/// Communication-level failure of a single bus exchange.
///
/// Mirrors the result classes of the vendor SDK: the exchange either never left
/// the host, never came back, or came back mangled.
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
pub enum CommError {
    #[error("port is in use")]
    PortBusy,
    #[error("failed to transmit instruction packet")]
    TxFail,
    #[error("incorrect instruction packet")]
    TxError,
    #[error("failed to get status packet from device")]
    RxFail,
    #[error("no status packet received before timeout")]
    RxTimeout,
    #[error("incorrect status packet")]
    RxCorrupt,
    #[error("instruction not available for this protocol")]
    NotAvailable,
}

/// Misuse of a parameter batch. These are programming errors, not bus faults.
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
pub enum BatchError {
    #[error("actuator {id} already has an entry in this batch")]
    DuplicateEntry { id: u8 },
    #[error("cannot transmit an empty batch")]
    EmptyBatch,
    #[error("value {value} does not fit in a {width}-byte field")]
    ValueOutOfRange { value: u32, width: u8 },
    #[error("{width}-byte fields are not supported")]
    UnsupportedWidth { width: u8 },
}

/// Failures that abort a session before any actuator is touched.
#[derive(Debug, Error)]
pub enum SetupError {
    #[error("serial: {port} connect fail")]
    Connect {
        port: String,
        #[source]
        source: serialport::Error,
    },
    #[error("serial: bit rate {rate} set fail")]
    BitRate {
        rate: u32,
        #[source]
        source: serialport::Error,
    },
    #[error("serial port is not open")]
    NotOpen,
    #[error("invalid configuration: {0}")]
    Config(String),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SequencerError {
    #[error("cannot {operation} while {state}")]
    InvalidState {
        operation: &'static str,
        state: &'static str,
    },
    #[error("actuators did not settle after {polls} polls")]
    SettleTimeout { polls: u32 },
    #[error("actuator {id} has {found} waypoints, expected {expected}")]
    WaypointCountMismatch { id: u8, found: usize, expected: usize },
    #[error(transparent)]
    Batch(#[from] BatchError),
}
