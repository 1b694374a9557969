// Timeouts, topics, link configuration
use std::time::Duration;

use serde::{Deserialize, Serialize};

// Control loop frequency (input drain + throttle release)
pub const LOOP_HZ: u64 = 100;

// Minimum spacing between two regular commands on the radio link
pub const THROTTLE_INTERVAL: Duration = Duration::from_millis(50);

// Input watchdog: a non-zero command must be refreshed within this window
pub const INPUT_TIMEOUT: Duration = Duration::from_millis(500);

// Give up scanning after this long without a connection
pub const SCAN_TIMEOUT: Duration = Duration::from_secs(10);

// Idle link heartbeat (10 command slots)
pub const KEEPALIVE_INTERVAL: Duration = Duration::from_millis(500);

// Zenoh topics
pub const TOPIC_UI_EVENT: &str = "tankbot/ui/event"; // operator events from the touch UI
pub const TOPIC_TELEMETRY: &str = "tankbot/state/telemetry"; // link state + last command

// Serial radio bridge defaults
pub const RADIO_PORT: &str = "/dev/ttyUSB0";
pub const RADIO_BAUDRATE: u32 = 9600;

/// Tunables for one control session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    pub throttle_interval: Duration,
    pub input_timeout: Duration,
    pub scan_timeout: Duration,
    /// `None` disables the heartbeat
    pub keepalive_interval: Option<Duration>,
    /// Connect to the first discovered peripheral without waiting for the operator
    pub auto_connect: bool,
    /// Only report peripherals whose id contains this string
    pub peripheral_filter: Option<String>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            throttle_interval: THROTTLE_INTERVAL,
            input_timeout: INPUT_TIMEOUT,
            scan_timeout: SCAN_TIMEOUT,
            keepalive_interval: Some(KEEPALIVE_INTERVAL),
            auto_connect: true,
            peripheral_filter: None,
        }
    }
}
