// Loopback radio for running without hardware
//
// Pretends to be a single robot in range: discovery and connection succeed
// immediately, and every frame is decoded and applied the way the robot
// firmware would.

use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info, warn};

use super::{LinkError, LinkEvent, PeripheralId, RadioLink};
use crate::drive::encoder::Frame;
use crate::drive::{ControlDirective, MotorCommand, WireMessage};

pub const LOOPBACK_ID: &str = "loopback";

pub struct LoopbackRadio {
    connected: bool,
    motors: MotorCommand,
    frames: Vec<Frame>,
    events: UnboundedSender<LinkEvent>,
}

impl LoopbackRadio {
    pub fn new(events: UnboundedSender<LinkEvent>) -> Self {
        Self {
            connected: false,
            motors: MotorCommand::zero(),
            frames: Vec::new(),
            events,
        }
    }

    /// Power the simulated robot is currently applying
    pub fn motors(&self) -> MotorCommand {
        self.motors
    }

    /// Every frame received so far
    pub fn frames(&self) -> &[Frame] {
        &self.frames
    }

    /// Simulate the robot going out of range
    pub fn drop_link(&mut self) {
        self.connected = false;
        self.emit(LinkEvent::Disconnected);
    }

    fn emit(&self, event: LinkEvent) {
        if self.events.send(event).is_err() {
            debug!("Control loop gone, dropping link event");
        }
    }

    fn apply(&mut self, frame: Frame) {
        match frame {
            Frame::Directive(ControlDirective::Drive(cmd)) => self.motors = cmd,
            Frame::Directive(ControlDirective::Stop) => self.motors = MotorCommand::zero(),
            Frame::Directive(ControlDirective::SetMode(mode)) => {
                info!("Robot mode {:?}", mode);
                self.motors = MotorCommand::zero();
            }
            Frame::KeepAlive => {}
        }
        self.frames.push(frame);
    }
}

impl RadioLink for LoopbackRadio {
    fn start_scan(&mut self) -> Result<(), LinkError> {
        self.emit(LinkEvent::PeripheralDiscovered(PeripheralId::new(LOOPBACK_ID)));
        Ok(())
    }

    fn connect(&mut self, id: &PeripheralId) -> Result<(), LinkError> {
        if id.as_str() != LOOPBACK_ID {
            self.emit(LinkEvent::ConnectFailed {
                reason: format!("no such peripheral {}", id),
            });
            return Ok(());
        }
        self.connected = true;
        self.emit(LinkEvent::Connected);
        Ok(())
    }

    fn disconnect(&mut self) {
        self.connected = false;
    }

    fn write(&mut self, message: &WireMessage) -> Result<(), LinkError> {
        if !self.connected {
            return Err(LinkError::LinkLost);
        }

        match WireMessage::decode(message.as_bytes()) {
            Ok(frame) => {
                debug!("Robot <- {:?}", frame);
                self.apply(frame);
                self.emit(LinkEvent::WriteComplete { ok: true });
            }
            Err(e) => {
                warn!("Robot rejected frame {:?}: {}", message, e);
                self.emit(LinkEvent::WriteComplete { ok: false });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::DriveMode;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn test_scan_connect_write_events() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut radio = LoopbackRadio::new(tx);

        radio.start_scan().unwrap();
        let Some(LinkEvent::PeripheralDiscovered(id)) = rx.recv().await else {
            panic!("expected discovery");
        };
        radio.connect(&id).unwrap();
        assert_eq!(rx.recv().await, Some(LinkEvent::Connected));

        let frame = WireMessage::encode(&ControlDirective::Drive(MotorCommand::new(40, -40)))
            .unwrap();
        radio.write(&frame).unwrap();
        assert_eq!(rx.recv().await, Some(LinkEvent::WriteComplete { ok: true }));
        assert_eq!(radio.motors(), MotorCommand::new(40, -40));

        radio
            .write(&WireMessage::encode(&ControlDirective::Stop).unwrap())
            .unwrap();
        assert_eq!(rx.recv().await, Some(LinkEvent::WriteComplete { ok: true }));
        assert_eq!(radio.motors(), MotorCommand::zero());
        assert_eq!(radio.frames().len(), 2);
    }

    #[tokio::test]
    async fn test_dropped_link_rejects_writes() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut radio = LoopbackRadio::new(tx);
        radio.connect(&PeripheralId::new(LOOPBACK_ID)).unwrap();
        assert_eq!(rx.recv().await, Some(LinkEvent::Connected));

        radio.drop_link();
        assert_eq!(rx.recv().await, Some(LinkEvent::Disconnected));
        assert!(matches!(
            radio.write(&WireMessage::keep_alive()),
            Err(LinkError::LinkLost)
        ));
    }

    #[tokio::test]
    async fn test_mode_change_zeroes_motors() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut radio = LoopbackRadio::new(tx);
        radio.connect(&PeripheralId::new(LOOPBACK_ID)).unwrap();
        assert_eq!(rx.recv().await, Some(LinkEvent::Connected));

        radio
            .write(&WireMessage::encode(&ControlDirective::Drive(MotorCommand::new(80, 80))).unwrap())
            .unwrap();
        radio
            .write(&WireMessage::encode(&ControlDirective::SetMode(DriveMode::IndependentSliders)).unwrap())
            .unwrap();
        assert_eq!(radio.motors(), MotorCommand::zero());
    }
}
