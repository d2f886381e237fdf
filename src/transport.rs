use ::serialport::{ClearBuffer, DataBits, FlowControl, Parity, SerialPort, StopBits};
use ::std::io::{self, Read, Write};
use ::std::time::Duration;
use tracing::{debug, info};

use crate::error::SetupError;

// Rate the port is opened at before the configured bit rate is applied.
const OPEN_BIT_RATE: u32 = 57_600;

pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_millis(50);

/// Raw byte channel to the half-duplex bus.
///
/// Implementations only move bytes; framing lives in [`crate::protocol`].
pub trait Transport {
    fn open(&mut self) -> Result<(), SetupError>;
    fn set_rate(&mut self, rate: u32) -> Result<(), SetupError>;
    fn close(&mut self);
    fn write_packet(&mut self, packet: &[u8]) -> io::Result<()>;
    fn read_exact(&mut self, buf: &mut [u8]) -> io::Result<()>;
    /// Drops any stale bytes left over from an earlier exchange.
    fn clear_input(&mut self) -> io::Result<()>;
}

pub struct SerialTransport {
    path: String,
    read_timeout: Duration,
    port: Option<Box<dyn SerialPort>>,
}

impl SerialTransport {
    pub fn new(path: impl Into<String>, read_timeout: Duration) -> Self {
        Self {
            path: path.into(),
            read_timeout,
            port: None,
        }
    }

    fn port(&mut self) -> io::Result<&mut Box<dyn SerialPort>> {
        self.port
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "serial port is not open"))
    }
}

impl Transport for SerialTransport {
    fn open(&mut self) -> Result<(), SetupError> {
        let port = ::serialport::new(&self.path, OPEN_BIT_RATE)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .timeout(self.read_timeout)
            .open()
            .map_err(|source| SetupError::Connect {
                port: self.path.clone(),
                source,
            })?;
        info!("Opened serial port {}", self.path);
        self.port = Some(port);
        Ok(())
    }

    fn set_rate(&mut self, rate: u32) -> Result<(), SetupError> {
        let port = self.port.as_mut().ok_or(SetupError::NotOpen)?;
        port.set_baud_rate(rate)
            .map_err(|source| SetupError::BitRate { rate, source })?;
        info!("Serial port {} running at {} baud", self.path, rate);
        Ok(())
    }

    fn close(&mut self) {
        if self.port.take().is_some() {
            info!("Closed serial port {}", self.path);
        }
    }

    fn write_packet(&mut self, packet: &[u8]) -> io::Result<()> {
        let port = self.port()?;
        port.write_all(packet)?;
        port.flush()
    }

    fn read_exact(&mut self, buf: &mut [u8]) -> io::Result<()> {
        self.port()?.read_exact(buf)
    }

    fn clear_input(&mut self) -> io::Result<()> {
        let port = self.port()?;
        if let Err(e) = port.clear(ClearBuffer::Input) {
            debug!("Failed to clear input buffer: {}", e);
            return Err(io::Error::new(io::ErrorKind::Other, e));
        }
        Ok(())
    }
}
