// Connection state machine for the radio link
//
// The manager is the single owner of LinkState. It turns operator actions
// into collaborator calls and collaborator events into state transitions.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use super::{LinkError, LinkEvent, LinkState, PeripheralId, RadioLink};
use crate::config::SessionConfig;
use crate::drive::WireMessage;

/// Outcome of a write, matched against the frame that was sent
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteReport {
    pub message: WireMessage,
    pub ok: bool,
}

pub struct LinkConnectionManager<R: RadioLink> {
    radio: R,
    state: LinkState,
    scan_timeout: Duration,
    auto_connect: bool,
    peripheral_filter: Option<String>,
    keepalive_interval: Option<Duration>,
    scan_started_at: Option<Instant>,
    discovered: Vec<PeripheralId>,
    peripheral: Option<PeripheralId>,
    in_flight: VecDeque<WireMessage>,
    last_write_at: Option<Instant>,
    last_fault: Option<LinkError>,
}

impl<R: RadioLink> LinkConnectionManager<R> {
    pub fn new(radio: R, config: &SessionConfig) -> Self {
        Self {
            radio,
            state: LinkState::Idle,
            scan_timeout: config.scan_timeout,
            auto_connect: config.auto_connect,
            peripheral_filter: config.peripheral_filter.clone(),
            keepalive_interval: config.keepalive_interval,
            scan_started_at: None,
            discovered: Vec::new(),
            peripheral: None,
            in_flight: VecDeque::new(),
            last_write_at: None,
            last_fault: None,
        }
    }

    pub fn state(&self) -> LinkState {
        self.state
    }

    pub fn is_ready(&self) -> bool {
        self.state == LinkState::Ready
    }

    /// Peripherals reported during the current scan
    pub fn discovered(&self) -> &[PeripheralId] {
        &self.discovered
    }

    /// Peripheral being connected to, or connected
    pub fn peripheral(&self) -> Option<&PeripheralId> {
        self.peripheral.as_ref()
    }

    /// Most recent failure reported by the link, cleared on the next scan
    pub fn last_fault(&self) -> Option<&LinkError> {
        self.last_fault.as_ref()
    }

    pub fn radio(&self) -> &R {
        &self.radio
    }

    pub fn radio_mut(&mut self) -> &mut R {
        &mut self.radio
    }

    fn transition(&mut self, to: LinkState) {
        let from = self.state;
        if from == to {
            return;
        }
        debug_assert!(from.can_transition_to(to), "{:?} -> {:?}", from, to);
        info!("Link {:?} -> {:?}", from, to);
        self.state = to;

        if to != LinkState::Ready {
            self.in_flight.clear();
        }
        if to != LinkState::Scanning {
            self.scan_started_at = None;
        }
        if to == LinkState::Idle {
            self.peripheral = None;
        }
    }

    /// Begin discovery (operator action, Idle only)
    pub fn start_scan(&mut self, now: Instant) -> Result<(), LinkError> {
        if self.state != LinkState::Idle {
            return Err(LinkError::InvalidTransition {
                from: self.state,
                action: "start scan",
            });
        }

        self.radio.start_scan()?;
        self.discovered.clear();
        self.last_fault = None;
        self.scan_started_at = Some(now);
        self.transition(LinkState::Scanning);
        Ok(())
    }

    /// Connect to a discovered peripheral (operator action, Scanning only)
    pub fn connect(&mut self, id: PeripheralId) -> Result<(), LinkError> {
        if self.state != LinkState::Scanning {
            return Err(LinkError::InvalidTransition {
                from: self.state,
                action: "connect",
            });
        }
        if !self.discovered.contains(&id) {
            return Err(LinkError::UnknownPeripheral(id));
        }
        self.begin_connect(id);
        Ok(())
    }

    fn begin_connect(&mut self, id: PeripheralId) {
        info!("Connecting to {}", id);
        self.transition(LinkState::Connecting);
        if let Err(e) = self.radio.connect(&id) {
            self.fail_connect(e.to_string());
            return;
        }
        self.peripheral = Some(id);
    }

    fn fail_connect(&mut self, reason: String) {
        warn!("Connection failed: {}", reason);
        self.last_fault = Some(LinkError::LinkFailed { reason });
        self.transition(LinkState::Idle);
    }

    /// Tear the link down (operator action, any state but Idle)
    pub fn disconnect(&mut self) -> Result<(), LinkError> {
        if self.state == LinkState::Idle {
            return Err(LinkError::InvalidTransition {
                from: self.state,
                action: "disconnect",
            });
        }
        self.radio.disconnect();
        self.transition(LinkState::Idle);
        Ok(())
    }

    /// Accept a lost link and return to Idle (operator action, Lost only)
    pub fn acknowledge_loss(&mut self) -> Result<(), LinkError> {
        if self.state != LinkState::Lost {
            return Err(LinkError::InvalidTransition {
                from: self.state,
                action: "acknowledge loss",
            });
        }
        self.transition(LinkState::Idle);
        Ok(())
    }

    /// Apply an event from the radio collaborator
    ///
    /// Returns the matched write when the event is a write completion.
    pub fn handle_event(&mut self, event: LinkEvent, now: Instant) -> Option<WriteReport> {
        match event {
            LinkEvent::PeripheralDiscovered(id) => {
                self.on_discovered(id);
                None
            }
            LinkEvent::Connected => {
                if self.state == LinkState::Connecting {
                    self.last_write_at = Some(now);
                    self.transition(LinkState::Ready);
                } else {
                    warn!("Ignoring connect event while {:?}", self.state);
                }
                None
            }
            LinkEvent::ConnectFailed { reason } => {
                if self.state == LinkState::Connecting {
                    self.fail_connect(reason);
                } else {
                    debug!("Ignoring connect failure while {:?}", self.state);
                }
                None
            }
            LinkEvent::Disconnected => {
                if matches!(
                    self.state,
                    LinkState::Scanning | LinkState::Connecting | LinkState::Ready
                ) {
                    warn!("Link dropped while {:?}", self.state);
                    self.last_fault = Some(LinkError::LinkLost);
                    self.transition(LinkState::Lost);
                } else {
                    debug!("Ignoring disconnect while {:?}", self.state);
                }
                None
            }
            LinkEvent::WriteComplete { ok } => {
                let message = self.in_flight.pop_front()?;
                if !ok {
                    warn!("Write of {:?} failed", message);
                }
                Some(WriteReport { message, ok })
            }
        }
    }

    fn on_discovered(&mut self, id: PeripheralId) {
        if self.state != LinkState::Scanning {
            debug!("Ignoring discovery of {} while {:?}", id, self.state);
            return;
        }
        if let Some(filter) = &self.peripheral_filter {
            if !id.as_str().contains(filter.as_str()) {
                debug!("Skipping {} (filter {:?})", id, filter);
                return;
            }
        }
        if self.discovered.contains(&id) {
            return;
        }

        info!("Discovered {}", id);
        self.discovered.push(id.clone());
        if self.auto_connect {
            self.begin_connect(id);
        }
    }

    /// Timer work: scan timeout and idle heartbeat
    ///
    /// `allow_keepalive` is false while the caller still owes the robot a
    /// Stop; the heartbeat must not mask a missing Stop.
    pub fn poll(&mut self, now: Instant, allow_keepalive: bool) {
        match self.state {
            LinkState::Scanning => {
                if let Some(started) = self.scan_started_at {
                    if now.saturating_duration_since(started) >= self.scan_timeout {
                        info!("Scan timed out after {:?}", self.scan_timeout);
                        self.transition(LinkState::Idle);
                    }
                }
            }
            LinkState::Ready => {
                let Some(interval) = self.keepalive_interval else {
                    return;
                };
                if !allow_keepalive {
                    return;
                }
                let quiet = self
                    .last_write_at
                    .is_none_or(|at| now.saturating_duration_since(at) >= interval);
                if quiet {
                    if let Err(e) = self.send(&WireMessage::keep_alive(), now) {
                        warn!("Keep-alive failed: {}", e);
                    }
                }
            }
            _ => {}
        }
    }

    /// Hand a frame to the radio (Ready only)
    pub fn send(&mut self, message: &WireMessage, now: Instant) -> Result<(), LinkError> {
        if self.state != LinkState::Ready {
            return Err(LinkError::NotReady { state: self.state });
        }
        self.radio.write(message)?;
        self.in_flight.push_back(*message);
        self.last_write_at = Some(now);
        debug!("Sent {:?}", message);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drive::{ControlDirective, MotorCommand};

    #[derive(Default)]
    struct FakeRadio {
        scans: usize,
        connects: Vec<PeripheralId>,
        disconnects: usize,
        writes: Vec<WireMessage>,
        fail_connect: bool,
    }

    impl RadioLink for FakeRadio {
        fn start_scan(&mut self) -> Result<(), LinkError> {
            self.scans += 1;
            Ok(())
        }

        fn connect(&mut self, id: &PeripheralId) -> Result<(), LinkError> {
            if self.fail_connect {
                return Err(LinkError::LinkFailed {
                    reason: "refused".to_string(),
                });
            }
            self.connects.push(id.clone());
            Ok(())
        }

        fn disconnect(&mut self) {
            self.disconnects += 1;
        }

        fn write(&mut self, message: &WireMessage) -> Result<(), LinkError> {
            self.writes.push(*message);
            Ok(())
        }
    }

    fn config() -> SessionConfig {
        SessionConfig {
            keepalive_interval: None,
            ..SessionConfig::default()
        }
    }

    fn ready_manager(now: Instant) -> LinkConnectionManager<FakeRadio> {
        let mut link = LinkConnectionManager::new(FakeRadio::default(), &config());
        link.start_scan(now).unwrap();
        link.handle_event(LinkEvent::PeripheralDiscovered(PeripheralId::new("bot")), now);
        link.handle_event(LinkEvent::Connected, now);
        assert_eq!(link.state(), LinkState::Ready);
        link
    }

    fn drive_frame() -> WireMessage {
        WireMessage::encode(&ControlDirective::Drive(MotorCommand::new(10, 10))).unwrap()
    }

    #[test]
    fn test_happy_path_auto_connect() {
        let now = Instant::now();
        let link = ready_manager(now);
        assert_eq!(link.radio().scans, 1);
        assert_eq!(link.radio().connects, vec![PeripheralId::new("bot")]);
        assert_eq!(link.peripheral(), Some(&PeripheralId::new("bot")));
    }

    #[test]
    fn test_scan_rejected_unless_idle() {
        let now = Instant::now();
        let mut link = ready_manager(now);
        let err = link.start_scan(now).unwrap_err();
        assert!(matches!(
            err,
            LinkError::InvalidTransition {
                from: LinkState::Ready,
                ..
            }
        ));
        assert_eq!(link.radio().scans, 1);
    }

    #[test]
    fn test_connected_event_outside_connecting_ignored() {
        let mut link = LinkConnectionManager::new(FakeRadio::default(), &config());
        link.handle_event(LinkEvent::Connected, Instant::now());
        assert_eq!(link.state(), LinkState::Idle);

        link.start_scan(Instant::now()).unwrap();
        link.handle_event(LinkEvent::Connected, Instant::now());
        assert_eq!(link.state(), LinkState::Scanning);
    }

    #[test]
    fn test_manual_connect_requires_discovery() {
        let now = Instant::now();
        let mut link = LinkConnectionManager::new(
            FakeRadio::default(),
            &SessionConfig {
                auto_connect: false,
                ..config()
            },
        );
        link.start_scan(now).unwrap();
        link.handle_event(LinkEvent::PeripheralDiscovered(PeripheralId::new("a")), now);
        link.handle_event(LinkEvent::PeripheralDiscovered(PeripheralId::new("b")), now);
        link.handle_event(LinkEvent::PeripheralDiscovered(PeripheralId::new("a")), now);
        assert_eq!(link.state(), LinkState::Scanning);
        assert_eq!(link.discovered().len(), 2);

        assert!(matches!(
            link.connect(PeripheralId::new("zz")),
            Err(LinkError::UnknownPeripheral(_))
        ));
        link.connect(PeripheralId::new("b")).unwrap();
        assert_eq!(link.state(), LinkState::Connecting);
        assert_eq!(link.radio().connects, vec![PeripheralId::new("b")]);
    }

    #[test]
    fn test_peripheral_filter() {
        let now = Instant::now();
        let mut link = LinkConnectionManager::new(
            FakeRadio::default(),
            &SessionConfig {
                peripheral_filter: Some("tank".to_string()),
                ..config()
            },
        );
        link.start_scan(now).unwrap();
        link.handle_event(LinkEvent::PeripheralDiscovered(PeripheralId::new("speaker")), now);
        assert_eq!(link.state(), LinkState::Scanning);
        link.handle_event(LinkEvent::PeripheralDiscovered(PeripheralId::new("tankbot-1")), now);
        assert_eq!(link.state(), LinkState::Connecting);
    }

    #[test]
    fn test_scan_timeout_returns_to_idle() {
        let now = Instant::now();
        let mut link = LinkConnectionManager::new(FakeRadio::default(), &config());
        link.start_scan(now).unwrap();
        link.poll(now + Duration::from_secs(1), true);
        assert_eq!(link.state(), LinkState::Scanning);
        link.poll(now + config().scan_timeout, true);
        assert_eq!(link.state(), LinkState::Idle);
    }

    #[test]
    fn test_connect_failure_returns_to_idle() {
        let now = Instant::now();
        let mut link = LinkConnectionManager::new(FakeRadio::default(), &config());
        link.start_scan(now).unwrap();
        link.handle_event(LinkEvent::PeripheralDiscovered(PeripheralId::new("bot")), now);
        link.handle_event(
            LinkEvent::ConnectFailed {
                reason: "timeout".to_string(),
            },
            now,
        );
        assert_eq!(link.state(), LinkState::Idle);
        assert!(matches!(link.last_fault(), Some(LinkError::LinkFailed { .. })));
        assert_eq!(link.peripheral(), None);
    }

    #[test]
    fn test_radio_refusing_connect_fails_attempt() {
        let now = Instant::now();
        let radio = FakeRadio {
            fail_connect: true,
            ..FakeRadio::default()
        };
        let mut link = LinkConnectionManager::new(radio, &config());
        link.start_scan(now).unwrap();
        link.handle_event(LinkEvent::PeripheralDiscovered(PeripheralId::new("bot")), now);
        assert_eq!(link.state(), LinkState::Idle);
    }

    #[test]
    fn test_drop_from_every_active_state() {
        let now = Instant::now();

        let mut scanning = LinkConnectionManager::new(FakeRadio::default(), &config());
        scanning.start_scan(now).unwrap();
        scanning.handle_event(LinkEvent::Disconnected, now);
        assert_eq!(scanning.state(), LinkState::Lost);

        let mut connecting = LinkConnectionManager::new(FakeRadio::default(), &config());
        connecting.start_scan(now).unwrap();
        connecting.handle_event(LinkEvent::PeripheralDiscovered(PeripheralId::new("x")), now);
        connecting.handle_event(LinkEvent::Disconnected, now);
        assert_eq!(connecting.state(), LinkState::Lost);

        let mut ready = ready_manager(now);
        ready.handle_event(LinkEvent::Disconnected, now);
        assert_eq!(ready.state(), LinkState::Lost);
        assert!(matches!(ready.last_fault(), Some(LinkError::LinkLost)));

        let mut idle = LinkConnectionManager::new(FakeRadio::default(), &config());
        idle.handle_event(LinkEvent::Disconnected, now);
        assert_eq!(idle.state(), LinkState::Idle);
    }

    #[test]
    fn test_lost_needs_acknowledge() {
        let now = Instant::now();
        let mut link = ready_manager(now);
        link.handle_event(LinkEvent::Disconnected, now);

        assert!(link.start_scan(now).is_err());
        link.acknowledge_loss().unwrap();
        assert_eq!(link.state(), LinkState::Idle);
        assert!(link.acknowledge_loss().is_err());
        link.start_scan(now).unwrap();
    }

    #[test]
    fn test_send_requires_ready() {
        let now = Instant::now();
        let mut link = LinkConnectionManager::new(FakeRadio::default(), &config());
        assert!(matches!(
            link.send(&drive_frame(), now),
            Err(LinkError::NotReady {
                state: LinkState::Idle
            })
        ));
        assert!(link.radio().writes.is_empty());

        let mut link = ready_manager(now);
        link.send(&drive_frame(), now).unwrap();
        assert_eq!(link.radio().writes, vec![drive_frame()]);
        assert_eq!(link.state(), LinkState::Ready);
    }

    #[test]
    fn test_write_completion_matches_in_order() {
        let now = Instant::now();
        let mut link = ready_manager(now);
        let stop = WireMessage::encode(&ControlDirective::Stop).unwrap();
        link.send(&drive_frame(), now).unwrap();
        link.send(&stop, now).unwrap();

        assert_eq!(
            link.handle_event(LinkEvent::WriteComplete { ok: true }, now),
            Some(WriteReport {
                message: drive_frame(),
                ok: true
            })
        );
        assert_eq!(
            link.handle_event(LinkEvent::WriteComplete { ok: false }, now),
            Some(WriteReport {
                message: stop,
                ok: false
            })
        );
        assert_eq!(link.handle_event(LinkEvent::WriteComplete { ok: true }, now), None);
    }

    #[test]
    fn test_operator_disconnect() {
        let now = Instant::now();
        let mut link = ready_manager(now);
        link.disconnect().unwrap();
        assert_eq!(link.state(), LinkState::Idle);
        assert_eq!(link.radio().disconnects, 1);
        assert!(link.disconnect().is_err());
    }

    #[test]
    fn test_keep_alive_when_quiet() {
        let now = Instant::now();
        let interval = Duration::from_millis(500);
        let mut link = LinkConnectionManager::new(
            FakeRadio::default(),
            &SessionConfig {
                keepalive_interval: Some(interval),
                ..SessionConfig::default()
            },
        );
        link.start_scan(now).unwrap();
        link.handle_event(LinkEvent::PeripheralDiscovered(PeripheralId::new("bot")), now);
        link.handle_event(LinkEvent::Connected, now);

        link.poll(now + Duration::from_millis(100), true);
        assert!(link.radio().writes.is_empty());

        link.send(&drive_frame(), now + Duration::from_millis(400)).unwrap();
        link.poll(now + Duration::from_millis(600), true);
        assert_eq!(link.radio().writes.len(), 1);

        link.poll(now + Duration::from_millis(900), true);
        assert_eq!(link.radio().writes.last(), Some(&WireMessage::keep_alive()));
    }

    #[test]
    fn test_keep_alive_held_back_on_request() {
        let now = Instant::now();
        let interval = Duration::from_millis(500);
        let mut link = LinkConnectionManager::new(
            FakeRadio::default(),
            &SessionConfig {
                keepalive_interval: Some(interval),
                ..SessionConfig::default()
            },
        );
        link.start_scan(now).unwrap();
        link.handle_event(LinkEvent::PeripheralDiscovered(PeripheralId::new("bot")), now);
        link.handle_event(LinkEvent::Connected, now);

        link.poll(now + Duration::from_millis(800), false);
        assert!(link.radio().writes.is_empty());

        link.poll(now + Duration::from_millis(810), true);
        assert_eq!(link.radio().writes, vec![WireMessage::keep_alive()]);
    }
}
