// Radio link to the robot
//
// Provides:
// - Connection state machine over an external radio collaborator
// - Serial-attached radio bridge (BLE UART / RF modem)
// - Loopback radio for running without hardware

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::drive::WireMessage;

pub mod loopback;
mod manager;
pub mod serial;

pub use loopback::LoopbackRadio;
pub use manager::{LinkConnectionManager, WriteReport};
pub use serial::SerialRadio;

/// Connection state of the radio link
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkState {
    Idle,
    Scanning,
    Connecting,
    Ready,
    Lost,
}

impl LinkState {
    /// Whether the state machine may move from `self` to `to`
    ///
    /// `Idle -> Scanning -> Connecting -> Ready` per attempt, `Lost` from any
    /// non-Idle state, and back to `Idle` only from a non-Idle state.
    pub fn can_transition_to(self, to: LinkState) -> bool {
        use LinkState::*;
        matches!(
            (self, to),
            (Idle, Scanning)
                | (Scanning, Connecting)
                | (Connecting, Ready)
                | (Scanning | Connecting | Ready, Lost)
                | (Scanning | Connecting | Ready | Lost, Idle)
        )
    }
}

/// Identifier of a discovered peripheral, as reported by the radio
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeripheralId(pub String);

impl PeripheralId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeripheralId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Events delivered by the radio collaborator
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    PeripheralDiscovered(PeripheralId),
    Connected,
    ConnectFailed { reason: String },
    Disconnected,
    WriteComplete { ok: bool },
}

/// Error types for the radio link
#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    #[error("Link not ready (state: {state:?})")]
    NotReady { state: LinkState },

    #[error("Connection failed: {reason}")]
    LinkFailed { reason: String },

    #[error("Link lost")]
    LinkLost,

    #[error("Cannot {action} while link is {from:?}")]
    InvalidTransition {
        from: LinkState,
        action: &'static str,
    },

    #[error("Peripheral {0} was not discovered in this scan")]
    UnknownPeripheral(PeripheralId),

    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Outbound side of the radio collaborator
///
/// Calls return once the request is handed off; results come back later as
/// [`LinkEvent`]s on the control loop.
pub trait RadioLink {
    fn start_scan(&mut self) -> Result<(), LinkError>;

    fn connect(&mut self, id: &PeripheralId) -> Result<(), LinkError>;

    fn disconnect(&mut self);

    fn write(&mut self, message: &WireMessage) -> Result<(), LinkError>;
}
