// Drive command pipeline: input mapping, throttling and wire encoding
//
// Provides:
// - Tank-drive mapping (joystick / sliders -> motor power pair)
// - Fixed 4-byte wire frame encoding
// - Rate limiting with coalescing and Stop bypass

pub mod encoder;
pub mod mapper;
pub mod throttle;

pub use encoder::{ControlDirective, DecodeError, EncodingError, WireMessage};
pub use mapper::{MotorCommand, map, map_sliders};
pub use throttle::CommandThrottler;
