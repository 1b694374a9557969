// Tank-drive mapping for a two-motor base
// Converts normalized operator input into signed percentage power per track.

use serde::{Deserialize, Serialize};

use crate::messages::{ControlInput, SliderInput};

/// Power limit per motor, in percent
pub const MAX_POWER: i8 = 100;

/// Signed percentage power for the two tracks (positive = forward)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MotorCommand {
    pub left: i8,
    pub right: i8,
}

impl MotorCommand {
    pub fn new(left: i8, right: i8) -> Self {
        Self { left, right }
    }

    pub fn zero() -> Self {
        Self::default()
    }

    pub fn is_zero(&self) -> bool {
        self.left == 0 && self.right == 0
    }
}

/// Scale a normalized value to percent, clamped to the motor range
fn to_power(value: f32) -> i8 {
    let percent = (value * MAX_POWER as f32).round();
    percent.clamp(-(MAX_POWER as f32), MAX_POWER as f32) as i8
}

/// Map joystick displacement to track powers
///
/// `y` drives both tracks forward/back, `x` adds a differential turn.
/// Each side is clamped on its own, so a full-throttle hard turn saturates
/// the outer track instead of scaling both down.
pub fn map(input: ControlInput) -> MotorCommand {
    if !input.active {
        return MotorCommand::zero();
    }

    MotorCommand {
        left: to_power(input.y + input.x),
        right: to_power(input.y - input.x),
    }
}

/// Map slider positions straight to track powers
pub fn map_sliders(input: SliderInput) -> MotorCommand {
    MotorCommand {
        left: to_power(input.left),
        right: to_power(input.right),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_released_stick_stops() {
        let cmd = map(ControlInput {
            x: 0.8,
            y: -0.3,
            active: false,
        });
        assert_eq!(cmd, MotorCommand::zero());
    }

    #[test]
    fn test_straight_forward() {
        let cmd = map(ControlInput::new(0.0, 0.5));
        assert_eq!(cmd, MotorCommand::new(50, 50));
    }

    #[test]
    fn test_spin_in_place() {
        // Pure x deflection drives the tracks in opposite directions
        let cmd = map(ControlInput::new(0.4, 0.0));
        assert_eq!(cmd, MotorCommand::new(40, -40));
    }

    #[test]
    fn test_full_throttle_hard_turn_saturates() {
        // left = 200 clamped to 100, right = 0 untouched
        let cmd = map(ControlInput::new(1.0, 1.0));
        assert_eq!(cmd, MotorCommand::new(100, 0));

        let cmd = map(ControlInput::new(-1.0, -1.0));
        assert_eq!(cmd, MotorCommand::new(-100, 0));
    }

    #[test]
    fn test_output_always_in_range() {
        let steps: Vec<f32> = (0..=40).map(|i| -1.0 + i as f32 * 0.05).collect();
        for &x in &steps {
            for &y in &steps {
                let cmd = map(ControlInput::new(x, y));
                assert!(
                    (-100..=100).contains(&cmd.left) && (-100..=100).contains(&cmd.right),
                    "out of range for x={}, y={}: {:?}",
                    x,
                    y,
                    cmd
                );
            }
        }
    }

    #[test]
    fn test_rounding() {
        let cmd = map(ControlInput::new(0.0, 0.334));
        assert_eq!(cmd, MotorCommand::new(33, 33));
        let cmd = map(ControlInput::new(0.0, -0.336));
        assert_eq!(cmd, MotorCommand::new(-34, -34));
    }

    #[test]
    fn test_sliders_are_independent() {
        let cmd = map_sliders(SliderInput {
            left: 0.25,
            right: -1.0,
        });
        assert_eq!(cmd, MotorCommand::new(25, -100));
    }
}
