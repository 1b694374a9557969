// Serial-attached radio bridge
//
// Drives a radio modem that exposes the robot's link as a serial port
// (BLE UART dongle, RF serial modem). Each 4-byte frame is written as-is.
// Outcomes are reported back to the control loop as LinkEvents.

use std::io::Write;
use std::path::Path;
use std::time::Duration;

use serialport::SerialPort;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info, warn};

use super::{LinkError, LinkEvent, PeripheralId, RadioLink};
use crate::drive::WireMessage;

/// Write timeout for one frame
pub const DEFAULT_TIMEOUT_MS: u64 = 100;

pub struct SerialRadio {
    preferred_port: String,
    baudrate: u32,
    port: Option<Box<dyn SerialPort>>,
    events: UnboundedSender<LinkEvent>,
}

impl SerialRadio {
    pub fn new(preferred_port: &str, baudrate: u32, events: UnboundedSender<LinkEvent>) -> Self {
        Self {
            preferred_port: preferred_port.to_string(),
            baudrate,
            port: None,
            events,
        }
    }

    fn emit(&self, event: LinkEvent) {
        if self.events.send(event).is_err() {
            debug!("Control loop gone, dropping link event");
        }
    }
}

impl RadioLink for SerialRadio {
    /// Report the preferred port first (pseudo-terminals are not always
    /// enumerated), then every other port the OS knows about
    fn start_scan(&mut self) -> Result<(), LinkError> {
        let mut found = Vec::new();
        if Path::new(&self.preferred_port).exists() {
            found.push(self.preferred_port.clone());
        }
        for info in serialport::available_ports()? {
            if !found.contains(&info.port_name) {
                found.push(info.port_name);
            }
        }

        info!("Scan found {} serial port(s)", found.len());
        for name in found {
            self.emit(LinkEvent::PeripheralDiscovered(PeripheralId::new(name)));
        }
        Ok(())
    }

    fn connect(&mut self, id: &PeripheralId) -> Result<(), LinkError> {
        let opened = serialport::new(id.as_str(), self.baudrate)
            .timeout(Duration::from_millis(DEFAULT_TIMEOUT_MS))
            .open();

        match opened {
            Ok(port) => {
                info!("Opened {} at {} baud", id, self.baudrate);
                self.port = Some(port);
                self.emit(LinkEvent::Connected);
            }
            Err(e) => self.emit(LinkEvent::ConnectFailed {
                reason: e.to_string(),
            }),
        }
        Ok(())
    }

    fn disconnect(&mut self) {
        if self.port.take().is_some() {
            info!("Closed radio port");
        }
    }

    fn write(&mut self, message: &WireMessage) -> Result<(), LinkError> {
        let port = self.port.as_mut().ok_or(LinkError::LinkLost)?;

        let result = port
            .write_all(message.as_bytes())
            .and_then(|_| port.flush());
        match result {
            Ok(()) => self.emit(LinkEvent::WriteComplete { ok: true }),
            Err(e) => {
                warn!("Radio write failed: {}", e);
                self.port = None;
                self.emit(LinkEvent::WriteComplete { ok: false });
                self.emit(LinkEvent::Disconnected);
            }
        }
        Ok(())
    }
}
