//! Packet framing for the two revisions of the servo bus protocol.
//!
//! Protocol 1.0 frames are `FF FF id len instr params.. checksum` where the
//! checksum is the inverted byte sum from `id` onwards. Protocol 2.0 frames are
//! `FF FF FD 00 id len_l len_h instr params.. crc_l crc_h`, protected by a
//! CRC-16 and byte-stuffed so the header pattern never shows up in the payload.

use ::std::fmt;

use crate::batch::BatchEntry;
use crate::constants::{
    FieldSpec, BROADCAST_ID, INSTRUCTION_READ, INSTRUCTION_STATUS, INSTRUCTION_SYNC_WRITE,
    INSTRUCTION_WRITE,
};
use crate::error::{BatchError, CommError};

const HEADER_V1: [u8; 2] = [0xFF, 0xFF];
const HEADER_V2: [u8; 4] = [0xFF, 0xFF, 0xFD, 0x00];
const STUFFING_PATTERN: [u8; 3] = [0xFF, 0xFF, 0xFD];
const STUFFING_BYTE: u8 = 0xFD;
const CRC16_POLYNOMIAL: u16 = 0x8005;

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum ProtocolVersion {
    V1,
    V2,
}

/// Fault flags an actuator reports alongside an otherwise successful exchange.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DeviceError {
    protocol: ProtocolVersion,
    raw: u8,
}

const V1_ERROR_BITS: [(u8, &str); 7] = [
    (0x01, "input voltage error"),
    (0x02, "angle limit error"),
    (0x04, "overheat error"),
    (0x08, "out of range error"),
    (0x10, "checksum error"),
    (0x20, "overload error"),
    (0x40, "instruction code error"),
];

const V2_ALERT_BIT: u8 = 0x80;

const V2_ERROR_NUMBERS: [(u8, &str); 7] = [
    (1, "failed to process the instruction packet"),
    (2, "undefined instruction or incorrect instruction"),
    (3, "CRC doesn't match"),
    (4, "the data value is out of range"),
    (5, "the data length does not match as expected"),
    (6, "the data value exceeds the limit value"),
    (7, "writing or reading is not available to the target address"),
];

impl DeviceError {
    pub fn new(protocol: ProtocolVersion, raw: u8) -> Self {
        Self { protocol, raw }
    }

    pub fn is_empty(&self) -> bool {
        self.raw == 0
    }

    /// Hardware alert raised by a protocol 2.0 device; details live in its
    /// hardware error status register.
    pub fn is_alert(&self) -> bool {
        self.protocol == ProtocolVersion::V2 && self.raw & V2_ALERT_BIT != 0
    }

    pub fn descriptions(&self) -> Vec<&'static str> {
        match self.protocol {
            ProtocolVersion::V1 => V1_ERROR_BITS
                .iter()
                .filter(|(bit, _)| self.raw & bit != 0)
                .map(|(_, name)| *name)
                .collect(),
            ProtocolVersion::V2 => {
                let mut out = vec![];
                if self.is_alert() {
                    out.push("hardware alert");
                }
                let number = self.raw & !V2_ALERT_BIT;
                if let Some((_, name)) = V2_ERROR_NUMBERS.iter().find(|(n, _)| *n == number) {
                    out.push(*name);
                } else if number != 0 {
                    out.push("unknown error");
                }
                out
            }
        }
    }
}

impl fmt::Display for DeviceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return write!(f, "no error");
        }
        write!(f, "{} (0x{:02X})", self.descriptions().join(", "), self.raw)
    }
}

/// A decoded status packet.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StatusPacket {
    pub id: u8,
    pub error: DeviceError,
    pub params: Vec<u8>,
}

/// Splits `value` into `width` bytes, low byte first.
pub fn encode_value(value: u32, width: u8) -> Result<Vec<u8>, BatchError> {
    let field = FieldSpec::new(0, width);
    if !field.has_supported_width() {
        return Err(BatchError::UnsupportedWidth { width });
    }
    if value > field.max_value() {
        return Err(BatchError::ValueOutOfRange { value, width });
    }
    Ok(value.to_le_bytes()[..width as usize].to_vec())
}

pub fn decode_value(bytes: &[u8]) -> u32 {
    bytes
        .iter()
        .take(4)
        .enumerate()
        .fold(0u32, |acc, (i, b)| acc | (u32::from(*b) << (8 * i)))
}

fn checksum(bytes: &[u8]) -> u8 {
    !bytes.iter().fold(0u8, |sum, b| sum.wrapping_add(*b))
}

pub fn crc16(bytes: &[u8]) -> u16 {
    let mut crc: u16 = 0;
    for &b in bytes {
        crc ^= u16::from(b) << 8;
        for _ in 0..8 {
            crc = if crc & 0x8000 != 0 {
                (crc << 1) ^ CRC16_POLYNOMIAL
            } else {
                crc << 1
            };
        }
    }
    crc
}

fn add_stuffing(region: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(region.len() + region.len() / 3);
    for &b in region {
        out.push(b);
        if out.ends_with(&STUFFING_PATTERN) {
            out.push(STUFFING_BYTE);
        }
    }
    out
}

fn remove_stuffing(region: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(region.len());
    let mut bytes = region.iter().peekable();
    while let Some(&b) = bytes.next() {
        out.push(b);
        if out.ends_with(&STUFFING_PATTERN) && bytes.peek() == Some(&&STUFFING_BYTE) {
            bytes.next();
        }
    }
    out
}

impl ProtocolVersion {
    /// Frames an instruction for `id`.
    pub fn instruction_packet(
        &self,
        id: u8,
        instruction: u8,
        params: &[u8],
    ) -> Result<Vec<u8>, CommError> {
        match self {
            ProtocolVersion::V1 => {
                let length = u8::try_from(params.len() + 2).map_err(|_| CommError::TxError)?;
                let mut packet = Vec::with_capacity(6 + params.len());
                packet.extend_from_slice(&HEADER_V1);
                packet.push(id);
                packet.push(length);
                packet.push(instruction);
                packet.extend_from_slice(params);
                packet.push(checksum(&packet[2..]));
                Ok(packet)
            }
            ProtocolVersion::V2 => {
                let mut region = Vec::with_capacity(1 + params.len());
                region.push(instruction);
                region.extend_from_slice(params);
                let region = add_stuffing(&region);
                let length = u16::try_from(region.len() + 2).map_err(|_| CommError::TxError)?;

                let mut packet = Vec::with_capacity(9 + region.len());
                packet.extend_from_slice(&HEADER_V2);
                packet.push(id);
                packet.extend_from_slice(&length.to_le_bytes());
                packet.extend_from_slice(&region);
                let crc = crc16(&packet);
                packet.extend_from_slice(&crc.to_le_bytes());
                Ok(packet)
            }
        }
    }

    fn address_params(&self, field: FieldSpec) -> Result<Vec<u8>, CommError> {
        match self {
            ProtocolVersion::V1 => {
                let address = u8::try_from(field.address).map_err(|_| CommError::NotAvailable)?;
                Ok(vec![address])
            }
            ProtocolVersion::V2 => Ok(field.address.to_le_bytes().to_vec()),
        }
    }

    fn length_params(&self, width: u8) -> Vec<u8> {
        match self {
            ProtocolVersion::V1 => vec![width],
            ProtocolVersion::V2 => u16::from(width).to_le_bytes().to_vec(),
        }
    }

    pub fn read_packet(&self, id: u8, field: FieldSpec) -> Result<Vec<u8>, CommError> {
        let mut params = self.address_params(field)?;
        params.extend(self.length_params(field.width));
        self.instruction_packet(id, INSTRUCTION_READ, &params)
    }

    pub fn write_packet(&self, id: u8, field: FieldSpec, value: u32) -> Result<Vec<u8>, CommError> {
        let mut params = self.address_params(field)?;
        params.extend(encode_value(value, field.width).map_err(|_| CommError::TxError)?);
        self.instruction_packet(id, INSTRUCTION_WRITE, &params)
    }

    /// One broadcast frame carrying a payload for every entry, in entry order.
    pub fn sync_write_packet(
        &self,
        field: FieldSpec,
        entries: &[BatchEntry],
    ) -> Result<Vec<u8>, CommError> {
        let mut params = self.address_params(field)?;
        params.extend(self.length_params(field.width));
        for entry in entries {
            if entry.payload.len() != field.width as usize {
                return Err(CommError::TxError);
            }
            params.push(entry.id);
            params.extend_from_slice(&entry.payload);
        }
        self.instruction_packet(BROADCAST_ID, INSTRUCTION_SYNC_WRITE, &params)
    }

    /// Bytes to read before the remaining length of a status packet is known.
    pub fn status_header_len(&self) -> usize {
        match self {
            ProtocolVersion::V1 => 4,
            ProtocolVersion::V2 => 7,
        }
    }

    pub fn status_body_len(&self, header: &[u8]) -> Result<usize, CommError> {
        match self {
            ProtocolVersion::V1 if header.len() == 4 && header.starts_with(&HEADER_V1) => {
                match header[3] {
                    0 | 1 => Err(CommError::RxCorrupt),
                    len => Ok(len as usize),
                }
            }
            ProtocolVersion::V2 if header.len() == 7 && header.starts_with(&HEADER_V2) => {
                match u16::from_le_bytes([header[5], header[6]]) {
                    0..=3 => Err(CommError::RxCorrupt),
                    len => Ok(len as usize),
                }
            }
            _ => Err(CommError::RxCorrupt),
        }
    }

    /// Validates a complete status frame and extracts its error and params.
    pub fn parse_status(&self, expected_id: u8, frame: &[u8]) -> Result<StatusPacket, CommError> {
        let header_len = self.status_header_len();
        if frame.len() < header_len {
            return Err(CommError::RxCorrupt);
        }
        let body_len = self.status_body_len(&frame[..header_len])?;
        if frame.len() != header_len + body_len {
            return Err(CommError::RxCorrupt);
        }

        let (id, error, params) = match self {
            ProtocolVersion::V1 => {
                let (payload, sum) = frame.split_at(frame.len() - 1);
                if checksum(&payload[2..]) != sum[0] {
                    return Err(CommError::RxCorrupt);
                }
                (frame[2], frame[4], payload[5..].to_vec())
            }
            ProtocolVersion::V2 => {
                let (payload, crc) = frame.split_at(frame.len() - 2);
                if crc16(payload) != u16::from_le_bytes([crc[0], crc[1]]) {
                    return Err(CommError::RxCorrupt);
                }
                let region = remove_stuffing(&payload[header_len..]);
                if region.len() < 2 || region[0] != INSTRUCTION_STATUS {
                    return Err(CommError::RxCorrupt);
                }
                (frame[4], region[1], region[2..].to_vec())
            }
        };

        if id != expected_id {
            return Err(CommError::RxCorrupt);
        }

        Ok(StatusPacket {
            id,
            error: DeviceError::new(*self, error),
            params,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn v1_read_present_position_frame() {
        let packet = ProtocolVersion::V1
            .read_packet(1, FieldSpec::new(36, 2))
            .unwrap();
        assert_eq!(packet, vec![0xFF, 0xFF, 0x01, 0x04, 0x02, 0x24, 0x02, 0xD2]);
    }

    #[test]
    fn v2_ping_crc_matches_reference() {
        let packet = ProtocolVersion::V2
            .instruction_packet(1, 0x01, &[])
            .unwrap();
        assert_eq!(
            packet,
            vec![0xFF, 0xFF, 0xFD, 0x00, 0x01, 0x03, 0x00, 0x01, 0x19, 0x4E]
        );
    }

    #[test]
    fn v1_sync_write_packs_entries_in_order() {
        let entries = vec![
            BatchEntry {
                id: 1,
                payload: vec![0x10, 0x02],
            },
            BatchEntry {
                id: 2,
                payload: vec![0x20, 0x01],
            },
        ];
        let packet = ProtocolVersion::V1
            .sync_write_packet(FieldSpec::new(30, 2), &entries)
            .unwrap();
        // len = (data_len + 1) * count + 4
        assert_eq!(
            &packet[..9],
            &[0xFF, 0xFF, 0xFE, 0x0A, 0x83, 0x1E, 0x02, 0x01, 0x10]
        );
        assert_eq!(&packet[9..13], &[0x02, 0x02, 0x20, 0x01]);
        assert_eq!(*packet.last().unwrap(), checksum(&packet[2..packet.len() - 1]));
    }

    #[test]
    fn sync_write_rejects_mismatched_payload_width() {
        let entries = vec![BatchEntry {
            id: 1,
            payload: vec![0x00],
        }];
        assert_eq!(
            ProtocolVersion::V1.sync_write_packet(FieldSpec::new(30, 2), &entries),
            Err(CommError::TxError)
        );
    }

    #[test]
    fn v1_address_beyond_one_byte_is_unavailable() {
        assert_eq!(
            ProtocolVersion::V1.read_packet(1, FieldSpec::new(132, 4)).map(|_| ()),
            Ok(())
        );
        assert_eq!(
            ProtocolVersion::V1.read_packet(1, FieldSpec::new(300, 4)),
            Err(CommError::NotAvailable)
        );
    }

    #[test]
    fn stuffing_escapes_header_pattern() {
        let region = [0x03, 0xFF, 0xFF, 0xFD, 0x07];
        let stuffed = add_stuffing(&region);
        assert_eq!(stuffed, vec![0x03, 0xFF, 0xFF, 0xFD, 0xFD, 0x07]);
        assert_eq!(remove_stuffing(&stuffed), region.to_vec());
    }

    #[test]
    fn v1_status_with_device_error_still_parses() {
        let mut frame = vec![0xFF, 0xFF, 0x03, 0x04, 0x24, 0xFF, 0x03];
        frame.push(checksum(&frame[2..]));
        let status = ProtocolVersion::V1.parse_status(3, &frame).unwrap();
        assert_eq!(status.params, vec![0xFF, 0x03]);
        assert_eq!(decode_value(&status.params), 1023);
        assert_eq!(
            status.error.descriptions(),
            vec!["overheat error", "overload error"]
        );
    }

    #[test]
    fn v1_status_rejects_bad_checksum_and_wrong_id() {
        let mut frame = vec![0xFF, 0xFF, 0x03, 0x02, 0x00];
        frame.push(checksum(&frame[2..]));
        assert!(ProtocolVersion::V1.parse_status(3, &frame).is_ok());
        assert_eq!(
            ProtocolVersion::V1.parse_status(4, &frame),
            Err(CommError::RxCorrupt)
        );
        *frame.last_mut().unwrap() ^= 0x01;
        assert_eq!(
            ProtocolVersion::V1.parse_status(3, &frame),
            Err(CommError::RxCorrupt)
        );
    }

    #[test]
    fn v2_status_round_trips_through_crc_and_stuffing() {
        let mut frame = vec![0xFF, 0xFF, 0xFD, 0x00, 0x07];
        let region = add_stuffing(&[INSTRUCTION_STATUS, 0x84, 0xFF, 0xFF, 0xFD, 0x00]);
        frame.extend_from_slice(&((region.len() + 2) as u16).to_le_bytes());
        frame.extend_from_slice(&region);
        let crc = crc16(&frame);
        frame.extend_from_slice(&crc.to_le_bytes());

        let status = ProtocolVersion::V2.parse_status(7, &frame).unwrap();
        assert_eq!(status.params, vec![0xFF, 0xFF, 0xFD, 0x00]);
        assert!(status.error.is_alert());
        assert_eq!(
            status.error.descriptions(),
            vec!["hardware alert", "the data value is out of range"]
        );
    }

    #[test]
    fn values_split_low_byte_first() {
        assert_eq!(encode_value(0x03FF, 2), Ok(vec![0xFF, 0x03]));
        assert_eq!(
            encode_value(0x0102_0304, 4),
            Ok(vec![0x04, 0x03, 0x02, 0x01])
        );
        assert_eq!(decode_value(&[0x04, 0x03, 0x02, 0x01]), 0x0102_0304);
    }

    #[test]
    fn bad_widths_are_errors_not_truncation() {
        assert_eq!(
            encode_value(0x0100_0000, 3),
            Err(BatchError::UnsupportedWidth { width: 3 })
        );
        assert_eq!(
            encode_value(1, 5),
            Err(BatchError::UnsupportedWidth { width: 5 })
        );
        assert_eq!(
            encode_value(0, 0),
            Err(BatchError::UnsupportedWidth { width: 0 })
        );
        assert_eq!(
            encode_value(0x1_0000, 2),
            Err(BatchError::ValueOutOfRange {
                value: 0x1_0000,
                width: 2
            })
        );
        assert_eq!(
            ProtocolVersion::V1.write_packet(1, FieldSpec::new(30, 5), 7),
            Err(CommError::TxError)
        );
    }
}
