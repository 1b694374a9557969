// Control session: wires input mapping, throttling, encoding, the link and
// the failsafe together.
//
// Every entry point runs on the single control loop, so no two directive
// computations or state transitions ever interleave. Safety actions (Stop)
// always happen before telemetry for the same event is reported.

use std::time::Instant;

use tracing::{debug, error, info, warn};

use crate::config::SessionConfig;
use crate::drive::{self, CommandThrottler, ControlDirective, MotorCommand, WireMessage};
use crate::error::Result;
use crate::failsafe::{FailsafeLatch, FailsafeMonitor, FailsafeReason};
use crate::link::{LinkConnectionManager, LinkError, LinkEvent, LinkState, PeripheralId, RadioLink};
use crate::messages::{ControlInput, DriveMode, OperatorEvent, SliderInput, Telemetry};

/// Receives state reports for the UI layer
pub trait TelemetrySink {
    fn on_telemetry(&mut self, telemetry: &Telemetry);
}

impl TelemetrySink for Vec<Telemetry> {
    fn on_telemetry(&mut self, telemetry: &Telemetry) {
        self.push(telemetry.clone());
    }
}

pub struct ControlSession<R: RadioLink, T: TelemetrySink> {
    mode: DriveMode,
    link: LinkConnectionManager<R>,
    throttler: CommandThrottler,
    monitor: FailsafeMonitor,
    last_command: MotorCommand,
    // Stop that has not reached the radio yet
    stop_outstanding: bool,
    // SetMode owns the throttle slot; new-surface input waits behind it
    mode_frame_pending: bool,
    held_input: Option<MotorCommand>,
    telemetry: T,
    last_reported: Option<Telemetry>,
}

impl<R: RadioLink, T: TelemetrySink> ControlSession<R, T> {
    pub fn new(radio: R, telemetry: T, config: &SessionConfig) -> Self {
        Self {
            mode: DriveMode::default(),
            link: LinkConnectionManager::new(radio, config),
            throttler: CommandThrottler::new(config.throttle_interval),
            monitor: FailsafeMonitor::new(config.input_timeout),
            last_command: MotorCommand::zero(),
            stop_outstanding: false,
            mode_frame_pending: false,
            held_input: None,
            telemetry,
            last_reported: None,
        }
    }

    pub fn link_state(&self) -> LinkState {
        self.link.state()
    }

    /// Last power handed to the link (zero once a Stop has been decided)
    pub fn last_command(&self) -> MotorCommand {
        self.last_command
    }

    pub fn mode(&self) -> DriveMode {
        self.mode
    }

    pub fn latch(&self) -> FailsafeLatch {
        self.monitor.latch()
    }

    pub fn link(&self) -> &LinkConnectionManager<R> {
        &self.link
    }

    pub fn link_mut(&mut self) -> &mut LinkConnectionManager<R> {
        &mut self.link
    }

    pub fn telemetry_sink(&self) -> &T {
        &self.telemetry
    }

    pub fn telemetry_sink_mut(&mut self) -> &mut T {
        &mut self.telemetry
    }

    pub fn snapshot(&self) -> Telemetry {
        Telemetry {
            link: self.link.state(),
            command: self.last_command,
            mode: self.mode,
            failsafe_engaged: self.monitor.is_engaged(),
            fault: self.link.last_fault().map(|e| e.to_string()),
        }
    }

    /// Dispatch one operator event from the UI bridge
    pub fn handle_operator(&mut self, event: OperatorEvent, now: Instant) -> Result<()> {
        match event {
            OperatorEvent::ControlInput(input) => self.on_control_input(input, now),
            OperatorEvent::SliderInput(input) => self.on_slider_input(input, now),
            OperatorEvent::ModeSelected { mode } => self.on_mode_selected(mode, now),
            OperatorEvent::FailsafePressed => self.on_failsafe_pressed(now),
            OperatorEvent::ReleaseFailsafe => self.release_failsafe(now),
            OperatorEvent::StartScan => self.start_scan(now),
            OperatorEvent::Connect { id } => self.connect(id, now),
            OperatorEvent::Disconnect => self.disconnect(now),
            OperatorEvent::AcknowledgeLoss => self.acknowledge_loss(now),
        }
    }

    /// Joystick update; authoritative only in Joystick mode
    pub fn on_control_input(&mut self, input: ControlInput, now: Instant) -> Result<()> {
        if self.mode != DriveMode::Joystick {
            debug!("Ignoring joystick input in {:?} mode", self.mode);
            return Ok(());
        }
        self.apply_input(drive::map(input), now);
        self.report();
        Ok(())
    }

    /// Slider update; authoritative only in IndependentSliders mode
    pub fn on_slider_input(&mut self, input: SliderInput, now: Instant) -> Result<()> {
        if self.mode != DriveMode::IndependentSliders {
            debug!("Ignoring slider input in {:?} mode", self.mode);
            return Ok(());
        }
        self.apply_input(drive::map_sliders(input), now);
        self.report();
        Ok(())
    }

    fn apply_input(&mut self, command: MotorCommand, now: Instant) {
        self.monitor.record_input(now, !command.is_zero());
        if self.monitor.is_engaged() {
            debug!("Failsafe engaged, suppressing {:?}", command);
            return;
        }
        if self.mode_frame_pending {
            self.held_input = Some(command);
            return;
        }
        self.throttler.submit(ControlDirective::Drive(command), now);
    }

    pub fn on_mode_selected(&mut self, mode: DriveMode, now: Instant) -> Result<()> {
        if mode == self.mode {
            return Ok(());
        }
        info!("Drive mode {:?} -> {:?}", self.mode, mode);
        self.mode = mode;
        // A switch is a motion reset: the previous surface's Drive must not
        // keep running, and its release will never arrive
        self.throttler.cancel();
        self.held_input = None;
        self.last_command = MotorCommand::zero();
        self.monitor.disarm_watchdog();
        if self.monitor.is_engaged() {
            // The robot already holds a Stop
            self.mode_frame_pending = false;
        } else {
            // SetMode zeroes both motors on the robot. The slot holds one
            // directive and newest wins, so input from the new surface is
            // held until SetMode has gone out.
            self.throttler.submit(ControlDirective::SetMode(mode), now);
            self.mode_frame_pending = true;
        }
        self.report();
        Ok(())
    }

    /// All-stop button
    pub fn on_failsafe_pressed(&mut self, now: Instant) -> Result<()> {
        self.monitor.engage(FailsafeReason::Operator);
        let result = self.force_stop(now);
        self.report();
        result
    }

    pub fn release_failsafe(&mut self, now: Instant) -> Result<()> {
        let result = self.monitor.release(self.link.state(), now);
        if let Err(e) = &result {
            warn!("Failsafe release rejected: {}", e);
        }
        self.report();
        Ok(result?)
    }

    pub fn start_scan(&mut self, now: Instant) -> Result<()> {
        let before = self.link.state();
        let result = self.link.start_scan(now);
        self.after_link_change(before, false, now)?;
        self.report();
        Ok(result?)
    }

    pub fn connect(&mut self, id: PeripheralId, now: Instant) -> Result<()> {
        let before = self.link.state();
        let result = self.link.connect(id);
        self.after_link_change(before, false, now)?;
        self.report();
        Ok(result?)
    }

    /// Operator disconnect; the robot is told to stop while it can still hear us
    pub fn disconnect(&mut self, now: Instant) -> Result<()> {
        let before = self.link.state();
        let stopped = before == LinkState::Ready && self.stop_while_ready(now)?;
        let result = self.link.disconnect();
        self.after_link_change(before, stopped, now)?;
        self.report();
        Ok(result?)
    }

    pub fn acknowledge_loss(&mut self, now: Instant) -> Result<()> {
        let before = self.link.state();
        let result = self.link.acknowledge_loss();
        self.after_link_change(before, false, now)?;
        self.report();
        Ok(result?)
    }

    /// Event from the radio collaborator
    pub fn on_link_event(&mut self, event: LinkEvent, now: Instant) -> Result<()> {
        let before = self.link.state();
        let is_completion = matches!(event, LinkEvent::WriteComplete { .. });
        // Last Stop attempt while the radio may still accept a frame
        let stopped = event == LinkEvent::Disconnected
            && before == LinkState::Ready
            && self.stop_while_ready(now)?;
        let report = self.link.handle_event(event, now);
        self.after_link_change(before, stopped, now)?;

        if let Some(report) = report {
            if report.message.is_stop() && !report.ok {
                warn!("Stop was not delivered, will retry");
                self.stop_outstanding = true;
            }
        }
        if is_completion && self.stop_outstanding {
            self.retry_stop(now)?;
        }

        self.report();
        Ok(())
    }

    /// Timer tick: link timers, input watchdog, throttled release
    pub fn tick(&mut self, now: Instant) -> Result<()> {
        let before = self.link.state();
        self.link.poll(now, !self.stop_outstanding);
        self.after_link_change(before, false, now)?;

        if self.monitor.check_input(now) {
            self.force_stop(now)?;
        }

        if let Some(directive) = self.throttler.tick(now) {
            self.dispatch(directive, now)?;
            if matches!(directive, ControlDirective::SetMode(_)) {
                self.release_held_input(now);
            }
        }

        self.report();
        Ok(())
    }

    fn release_held_input(&mut self, now: Instant) {
        self.mode_frame_pending = false;
        if let Some(command) = self.held_input.take() {
            if !self.monitor.is_engaged() {
                self.throttler.submit(ControlDirective::Drive(command), now);
            }
        }
    }

    /// `stop_sent`: a Stop already reached the radio while handling this event
    fn after_link_change(&mut self, before: LinkState, stop_sent: bool, now: Instant) -> Result<()> {
        let after = self.link.state();
        if before == after {
            return Ok(());
        }

        self.monitor.on_link_state(after);
        match after {
            LinkState::Lost | LinkState::Idle if stop_sent => Ok(()),
            // Stop was already decided on the way into Lost
            LinkState::Idle if before == LinkState::Lost => Ok(()),
            LinkState::Lost | LinkState::Idle => self.force_stop(now),
            LinkState::Ready if self.stop_outstanding => self.retry_stop(now),
            _ => Ok(()),
        }
    }

    /// Decide on Stop: drop anything pending and send Stop ahead of everything
    fn force_stop(&mut self, now: Instant) -> Result<()> {
        self.last_command = MotorCommand::zero();
        self.mode_frame_pending = false;
        self.held_input = None;
        match self.throttler.submit(ControlDirective::Stop, now) {
            Some(directive) => self.dispatch(directive, now),
            None => Ok(()),
        }
    }

    /// Stop on a link that is about to go away; true if the radio took it
    fn stop_while_ready(&mut self, now: Instant) -> Result<bool> {
        self.force_stop(now)?;
        Ok(!self.stop_outstanding)
    }

    fn retry_stop(&mut self, now: Instant) -> Result<()> {
        debug!("Retrying outstanding Stop");
        self.dispatch(ControlDirective::Stop, now)
    }

    fn dispatch(&mut self, directive: ControlDirective, now: Instant) -> Result<()> {
        if self.monitor.is_engaged() && !directive.is_stop() {
            debug!("Failsafe engaged, dropping {:?}", directive);
            return Ok(());
        }

        let message = WireMessage::encode(&directive).inspect_err(|e| {
            error!("Refusing to encode {:?}: {}", directive, e);
        })?;

        match self.link.send(&message, now) {
            Ok(()) => {
                match directive {
                    ControlDirective::Drive(command) => self.last_command = command,
                    ControlDirective::Stop => self.stop_outstanding = false,
                    ControlDirective::SetMode(_) => self.last_command = MotorCommand::zero(),
                }
                Ok(())
            }
            Err(e) => {
                if directive.is_stop() {
                    if !self.stop_outstanding {
                        warn!("Stop not sent ({}), holding until link returns", e);
                    }
                    self.stop_outstanding = true;
                } else if matches!(e, LinkError::NotReady { .. }) {
                    debug!("Dropping {:?}: {}", directive, e);
                } else {
                    warn!("Dropping {:?}: {}", directive, e);
                }
                Ok(())
            }
        }
    }

    fn report(&mut self) {
        let telemetry = self.snapshot();
        if self.last_reported.as_ref() == Some(&telemetry) {
            return;
        }
        self.telemetry.on_telemetry(&telemetry);
        self.last_reported = Some(telemetry);
    }
}
