use ::std::io;
use tracing::trace;

use crate::batch::BatchEntry;
use crate::constants::FieldSpec;
use crate::error::CommError;
use crate::protocol::{decode_value, DeviceError, ProtocolVersion, StatusPacket};
use crate::transport::Transport;

/// A value read back from an actuator, with whatever fault flags it reported.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Reading {
    pub value: u32,
    pub error: DeviceError,
}

/// Register-level access to the actuators on one bus.
///
/// Every call is one complete exchange; callers never have two in flight.
pub trait Bus {
    fn protocol(&self) -> ProtocolVersion;

    fn write_field(&mut self, id: u8, field: FieldSpec, value: u32)
        -> Result<DeviceError, CommError>;

    fn read_field(&mut self, id: u8, field: FieldSpec) -> Result<Reading, CommError>;

    /// Writes every entry's payload to `field` in a single broadcast frame.
    fn write_batch(&mut self, field: FieldSpec, entries: &[BatchEntry]) -> Result<(), CommError>;

    fn close(&mut self) {}
}

pub struct DynamixelBus<T: Transport> {
    transport: T,
    protocol: ProtocolVersion,
}

fn rx_error(e: io::Error) -> CommError {
    match e.kind() {
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock | io::ErrorKind::UnexpectedEof => {
            CommError::RxTimeout
        }
        _ => CommError::RxFail,
    }
}

impl<T: Transport> DynamixelBus<T> {
    /// Wraps a transport that has already been opened and configured.
    pub fn new(transport: T, protocol: ProtocolVersion) -> Self {
        Self {
            transport,
            protocol,
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    fn transmit(&mut self, packet: &[u8]) -> Result<(), CommError> {
        self.transport
            .clear_input()
            .map_err(|_| CommError::PortBusy)?;
        trace!("bus tx {:02X?}", packet);
        self.transport
            .write_packet(packet)
            .map_err(|_| CommError::TxFail)
    }

    fn receive_status(&mut self, id: u8) -> Result<StatusPacket, CommError> {
        let header_len = self.protocol.status_header_len();
        let mut frame = vec![0u8; header_len];
        self.transport.read_exact(&mut frame).map_err(rx_error)?;

        let body_len = self.protocol.status_body_len(&frame)?;
        frame.resize(header_len + body_len, 0);
        self.transport
            .read_exact(&mut frame[header_len..])
            .map_err(rx_error)?;
        trace!("bus rx {:02X?}", frame);

        self.protocol.parse_status(id, &frame)
    }
}

impl<T: Transport> Bus for DynamixelBus<T> {
    fn protocol(&self) -> ProtocolVersion {
        self.protocol
    }

    fn write_field(
        &mut self,
        id: u8,
        field: FieldSpec,
        value: u32,
    ) -> Result<DeviceError, CommError> {
        let packet = self.protocol.write_packet(id, field, value)?;
        self.transmit(&packet)?;
        Ok(self.receive_status(id)?.error)
    }

    fn read_field(&mut self, id: u8, field: FieldSpec) -> Result<Reading, CommError> {
        let packet = self.protocol.read_packet(id, field)?;
        self.transmit(&packet)?;
        let status = self.receive_status(id)?;
        if status.params.len() != field.width as usize {
            return Err(CommError::RxCorrupt);
        }
        Ok(Reading {
            value: decode_value(&status.params),
            error: status.error,
        })
    }

    fn write_batch(&mut self, field: FieldSpec, entries: &[BatchEntry]) -> Result<(), CommError> {
        let packet = self.protocol.sync_write_packet(field, entries)?;
        self.transmit(&packet)
    }

    fn close(&mut self) {
        self.transport.close();
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::error::SetupError;
    use crate::protocol::crc16;
    use ::std::collections::VecDeque;

    /// In-memory transport: records what was written, replays queued bytes.
    #[derive(Default)]
    pub(crate) struct ScriptedTransport {
        pub written: Vec<Vec<u8>>,
        pub incoming: VecDeque<u8>,
        pub fail_writes: bool,
        pub closed: bool,
    }

    impl Transport for ScriptedTransport {
        fn open(&mut self) -> Result<(), SetupError> {
            Ok(())
        }

        fn set_rate(&mut self, _rate: u32) -> Result<(), SetupError> {
            Ok(())
        }

        fn close(&mut self) {
            self.closed = true;
        }

        fn write_packet(&mut self, packet: &[u8]) -> io::Result<()> {
            if self.fail_writes {
                return Err(io::Error::new(io::ErrorKind::BrokenPipe, "unplugged"));
            }
            self.written.push(packet.to_vec());
            Ok(())
        }

        fn read_exact(&mut self, buf: &mut [u8]) -> io::Result<()> {
            if self.incoming.len() < buf.len() {
                self.incoming.clear();
                return Err(io::Error::new(io::ErrorKind::TimedOut, "timed out"));
            }
            for b in buf.iter_mut() {
                *b = self.incoming.pop_front().unwrap_or_default();
            }
            Ok(())
        }

        fn clear_input(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn v1_status(id: u8, error: u8, params: &[u8]) -> Vec<u8> {
        let mut frame = vec![0xFF, 0xFF, id, (params.len() + 2) as u8, error];
        frame.extend_from_slice(params);
        let sum = frame[2..].iter().fold(0u8, |s, b| s.wrapping_add(*b));
        frame.push(!sum);
        frame
    }

    #[test]
    fn read_field_decodes_present_position() {
        let mut transport = ScriptedTransport::default();
        transport.incoming.extend(v1_status(2, 0, &[0xFE, 0x03]));
        let mut bus = DynamixelBus::new(transport, ProtocolVersion::V1);

        let reading = bus.read_field(2, FieldSpec::new(36, 2)).unwrap();
        assert_eq!(reading.value, 1022);
        assert!(reading.error.is_empty());
        assert_eq!(
            bus.transport().written[0],
            vec![0xFF, 0xFF, 0x02, 0x04, 0x02, 0x24, 0x02, 0xD1]
        );
    }

    #[test]
    fn v2_read_field_decodes_stuffed_four_byte_position() {
        // Present position FF FF FD 00 comes back with a stuffing byte after FD.
        let mut status = vec![0xFF, 0xFF, 0xFD, 0x00, 0x01, 0x09, 0x00];
        status.extend_from_slice(&[0x55, 0x00, 0xFF, 0xFF, 0xFD, 0xFD, 0x00]);
        let crc = crc16(&status);
        status.extend_from_slice(&crc.to_le_bytes());

        let mut transport = ScriptedTransport::default();
        transport.incoming.extend(status);
        let mut bus = DynamixelBus::new(transport, ProtocolVersion::V2);

        let reading = bus.read_field(1, FieldSpec::new(132, 4)).unwrap();
        assert_eq!(reading.value, 0x00FD_FFFF);
        assert!(reading.error.is_empty());
        assert_eq!(
            &bus.transport().written[0][..12],
            &[0xFF, 0xFF, 0xFD, 0x00, 0x01, 0x07, 0x00, 0x02, 0x84, 0x00, 0x04, 0x00]
        );
        assert!(bus.transport().incoming.is_empty());
    }

    #[test]
    fn v2_read_field_of_x_series_goal_range() {
        let mut status = vec![0xFF, 0xFF, 0xFD, 0x00, 0x03, 0x08, 0x00];
        status.extend_from_slice(&[0x55, 0x00, 0xFF, 0x0F, 0x00, 0x00]);
        let crc = crc16(&status);
        status.extend_from_slice(&crc.to_le_bytes());

        let mut transport = ScriptedTransport::default();
        transport.incoming.extend(status);
        let mut bus = DynamixelBus::new(transport, ProtocolVersion::V2);

        let reading = bus.read_field(3, FieldSpec::new(132, 4)).unwrap();
        assert_eq!(reading.value, 4095);
    }

    #[test]
    fn write_field_surfaces_device_error_without_failing() {
        let mut transport = ScriptedTransport::default();
        transport.incoming.extend(v1_status(1, 0x20, &[]));
        let mut bus = DynamixelBus::new(transport, ProtocolVersion::V1);

        let error = bus.write_field(1, FieldSpec::new(24, 1), 1).unwrap();
        assert_eq!(error.descriptions(), vec!["overload error"]);
    }

    #[test]
    fn missing_status_is_a_timeout() {
        let mut bus = DynamixelBus::new(ScriptedTransport::default(), ProtocolVersion::V1);
        assert_eq!(
            bus.read_field(1, FieldSpec::new(36, 2)),
            Err(CommError::RxTimeout)
        );
    }

    #[test]
    fn short_read_payload_is_corrupt() {
        let mut transport = ScriptedTransport::default();
        transport.incoming.extend(v1_status(1, 0, &[0x10]));
        let mut bus = DynamixelBus::new(transport, ProtocolVersion::V1);
        assert_eq!(
            bus.read_field(1, FieldSpec::new(36, 2)),
            Err(CommError::RxCorrupt)
        );
    }

    #[test]
    fn batch_write_is_a_single_frame_without_status() {
        let mut bus = DynamixelBus::new(ScriptedTransport::default(), ProtocolVersion::V2);
        let entries = vec![
            BatchEntry {
                id: 1,
                payload: vec![0xFF, 0x03, 0x00, 0x00],
            },
            BatchEntry {
                id: 2,
                payload: vec![0xFF, 0x03, 0x00, 0x00],
            },
        ];
        bus.write_batch(FieldSpec::new(116, 4), &entries).unwrap();

        let written = &bus.transport().written;
        assert_eq!(written.len(), 1);
        assert_eq!(&written[0][..8], &[0xFF, 0xFF, 0xFD, 0x00, 0xFE, 0x11, 0x00, 0x83]);
    }

    #[test]
    fn unplugged_port_fails_transmit() {
        let transport = ScriptedTransport {
            fail_writes: true,
            ..Default::default()
        };
        let mut bus = DynamixelBus::new(transport, ProtocolVersion::V1);
        assert_eq!(
            bus.write_field(1, FieldSpec::new(24, 1), 0),
            Err(CommError::TxFail)
        );
        bus.close();
        assert!(bus.transport().closed);
    }
}
