// Wire framing for the radio link
//
// Frame format (4 bytes): [Tag, Left, Right, Mode]
// - Left/Right are signed percent power, zero unless Tag = Drive
// - Mode is the drive mode byte, zero unless Tag = SetMode
//
// SetMode also zeroes both motors on the robot until the next Drive.

use std::fmt;

use crate::drive::mapper::{MAX_POWER, MotorCommand};
use crate::messages::DriveMode;

/// Frame length in bytes
pub const FRAME_LEN: usize = 4;

/// Directive tags
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tag {
    Drive = 0x01,
    SetMode = 0x02,
    KeepAlive = 0x03,
    Stop = 0xFF,
}

impl Tag {
    fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x01 => Some(Tag::Drive),
            0x02 => Some(Tag::SetMode),
            0x03 => Some(Tag::KeepAlive),
            0xFF => Some(Tag::Stop),
            _ => None,
        }
    }
}

/// Outbound intent for the robot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlDirective {
    Drive(MotorCommand),
    SetMode(DriveMode),
    Stop,
}

impl ControlDirective {
    pub fn is_stop(&self) -> bool {
        matches!(self, ControlDirective::Stop)
    }
}

/// A value fell outside the range its frame field can carry
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{field} power {value} outside [-{max}, {max}]", max = MAX_POWER)]
pub struct EncodingError {
    pub field: &'static str,
    pub value: i8,
}

/// Malformed inbound frame
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("Frame must be {expected} bytes, got {actual}")]
    Length { expected: usize, actual: usize },

    #[error("Unknown directive tag 0x{0:02X}")]
    UnknownTag(u8),

    #[error("Unknown drive mode 0x{0:02X}")]
    UnknownMode(u8),

    #[error(transparent)]
    OutOfRange(#[from] EncodingError),
}

/// What a receiver reads back out of a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Frame {
    Directive(ControlDirective),
    KeepAlive,
}

/// The only thing ever handed to the radio
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct WireMessage([u8; FRAME_LEN]);

impl WireMessage {
    /// Encode a directive into its frame
    pub fn encode(directive: &ControlDirective) -> Result<Self, EncodingError> {
        let bytes = match *directive {
            ControlDirective::Drive(cmd) => {
                let left = check_power("left", cmd.left)?;
                let right = check_power("right", cmd.right)?;
                [Tag::Drive as u8, left as u8, right as u8, 0]
            }
            ControlDirective::SetMode(mode) => [Tag::SetMode as u8, 0, 0, mode.wire_value()],
            ControlDirective::Stop => [Tag::Stop as u8, 0, 0, 0],
        };
        Ok(Self(bytes))
    }

    /// Link heartbeat frame
    pub fn keep_alive() -> Self {
        Self([Tag::KeepAlive as u8, 0, 0, 0])
    }

    /// Parse a received frame
    pub fn decode(bytes: &[u8]) -> Result<Frame, DecodeError> {
        let bytes: [u8; FRAME_LEN] = bytes.try_into().map_err(|_| DecodeError::Length {
            expected: FRAME_LEN,
            actual: bytes.len(),
        })?;

        let tag = Tag::from_byte(bytes[0]).ok_or(DecodeError::UnknownTag(bytes[0]))?;
        let frame = match tag {
            Tag::Drive => {
                let left = check_power("left", bytes[1] as i8)?;
                let right = check_power("right", bytes[2] as i8)?;
                Frame::Directive(ControlDirective::Drive(MotorCommand::new(left, right)))
            }
            Tag::SetMode => {
                let mode =
                    DriveMode::from_wire(bytes[3]).ok_or(DecodeError::UnknownMode(bytes[3]))?;
                Frame::Directive(ControlDirective::SetMode(mode))
            }
            Tag::KeepAlive => Frame::KeepAlive,
            Tag::Stop => Frame::Directive(ControlDirective::Stop),
        };
        Ok(frame)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn tag(&self) -> u8 {
        self.0[0]
    }

    pub fn is_stop(&self) -> bool {
        self.0[0] == Tag::Stop as u8
    }
}

impl fmt::Debug for WireMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "WireMessage({:02X?})", self.0)
    }
}

fn check_power(field: &'static str, value: i8) -> Result<i8, EncodingError> {
    if (-MAX_POWER..=MAX_POWER).contains(&value) {
        Ok(value)
    } else {
        Err(EncodingError { field, value })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_drive_frame_layout() {
        let msg = WireMessage::encode(&ControlDirective::Drive(MotorCommand::new(50, -50))).unwrap();
        assert_eq!(msg.as_bytes(), &[0x01, 50, 0xCE, 0x00]); // -50 as two's complement
    }

    #[test]
    fn test_set_mode_frame_layout() {
        let msg = WireMessage::encode(&ControlDirective::SetMode(DriveMode::IndependentSliders))
            .unwrap();
        assert_eq!(msg.as_bytes(), &[0x02, 0, 0, 0x02]);
    }

    #[test]
    fn test_stop_distinct_from_zero_drive() {
        let stop = WireMessage::encode(&ControlDirective::Stop).unwrap();
        let zero = WireMessage::encode(&ControlDirective::Drive(MotorCommand::zero())).unwrap();
        assert_eq!(stop.as_bytes(), &[0xFF, 0, 0, 0]);
        assert_ne!(stop, zero);
        assert!(stop.is_stop());
        assert!(!zero.is_stop());
    }

    #[test]
    fn test_encoding_is_deterministic() {
        let directive = ControlDirective::Drive(MotorCommand::new(-100, 37));
        assert_eq!(
            WireMessage::encode(&directive).unwrap(),
            WireMessage::encode(&directive).unwrap()
        );
    }

    #[test]
    fn test_out_of_range_power_rejected() {
        let err = WireMessage::encode(&ControlDirective::Drive(MotorCommand::new(0, -128)))
            .unwrap_err();
        assert_eq!(
            err,
            EncodingError {
                field: "right",
                value: -128
            }
        );
    }

    #[test]
    fn test_decode_frames() {
        assert_eq!(
            WireMessage::decode(&[0x01, 0x64, 0x9C, 0]).unwrap(),
            Frame::Directive(ControlDirective::Drive(MotorCommand::new(100, -100)))
        );
        assert_eq!(WireMessage::decode(&[0x03, 0, 0, 0]).unwrap(), Frame::KeepAlive);
        assert_eq!(
            WireMessage::decode(&[0x01, 0x7F, 0, 0]).unwrap_err(),
            DecodeError::OutOfRange(EncodingError {
                field: "left",
                value: 127
            })
        );
        assert_eq!(
            WireMessage::decode(&[0x07, 0, 0, 0]).unwrap_err(),
            DecodeError::UnknownTag(0x07)
        );
        assert_eq!(
            WireMessage::decode(&[0x02, 0, 0, 0x09]).unwrap_err(),
            DecodeError::UnknownMode(0x09)
        );
        assert_eq!(
            WireMessage::decode(&[0xFF, 0, 0]).unwrap_err(),
            DecodeError::Length {
                expected: 4,
                actual: 3
            }
        );
    }
}
