// Message types exchanged with the UI layer

use serde::{Deserialize, Serialize};

use crate::drive::MotorCommand;
use crate::link::{LinkState, PeripheralId};

/// Joystick displacement from center, both axes normalized to [-1, 1]
// active=false means no finger on the stick
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ControlInput {
    pub x: f32,
    pub y: f32,
    pub active: bool,
}

impl ControlInput {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y, active: true }
    }

    /// Finger lifted / stick centered
    pub fn released() -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            active: false,
        }
    }
}

/// Independent motor sliders, each normalized to [-1, 1]
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SliderInput {
    pub left: f32,
    pub right: f32,
}

/// Which input surface is allowed to drive the motors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DriveMode {
    #[default]
    Joystick,
    IndependentSliders,
}

impl DriveMode {
    /// Byte value carried by a SetMode frame
    pub fn wire_value(self) -> u8 {
        match self {
            DriveMode::Joystick => 0x01,
            DriveMode::IndependentSliders => 0x02,
        }
    }

    pub fn from_wire(value: u8) -> Option<Self> {
        match value {
            0x01 => Some(DriveMode::Joystick),
            0x02 => Some(DriveMode::IndependentSliders),
            _ => None,
        }
    }
}

/// Everything the UI layer can tell the runtime
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum OperatorEvent {
    ControlInput(ControlInput),
    SliderInput(SliderInput),
    ModeSelected { mode: DriveMode },
    FailsafePressed,
    ReleaseFailsafe,
    StartScan,
    Connect { id: PeripheralId },
    Disconnect,
    AcknowledgeLoss,
}

/// State report published to the UI layer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Telemetry {
    pub link: LinkState,
    pub command: MotorCommand,
    pub mode: DriveMode,
    pub failsafe_engaged: bool,
    /// Last link failure, if the link is not healthy
    pub fault: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn operator_event_json_shape() {
        let event: OperatorEvent =
            serde_json::from_str(r#"{"event":"control_input","x":0.0,"y":0.5,"active":true}"#)
                .unwrap();
        assert_eq!(event, OperatorEvent::ControlInput(ControlInput::new(0.0, 0.5)));

        let event: OperatorEvent =
            serde_json::from_str(r#"{"event":"mode_selected","mode":"independent_sliders"}"#)
                .unwrap();
        assert_eq!(
            event,
            OperatorEvent::ModeSelected {
                mode: DriveMode::IndependentSliders
            }
        );

        let event: OperatorEvent = serde_json::from_str(r#"{"event":"failsafe_pressed"}"#).unwrap();
        assert_eq!(event, OperatorEvent::FailsafePressed);
    }

    #[test]
    fn drive_mode_wire_values() {
        for mode in [DriveMode::Joystick, DriveMode::IndependentSliders] {
            assert_eq!(DriveMode::from_wire(mode.wire_value()), Some(mode));
        }
        assert_eq!(DriveMode::from_wire(0), None);
    }
}
