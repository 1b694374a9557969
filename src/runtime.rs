// Serialized control loop
// Note: radio events (channel), operator events (zenoh) and timer ticks are all
// handled on this one task, so nothing in the session ever runs concurrently
// with itself.

use std::time::{Duration, Instant};
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tokio::time::interval;
use tracing::{error, info, warn};

// local imports
use crate::config::{LOOP_HZ, SessionConfig, TOPIC_TELEMETRY, TOPIC_UI_EVENT};
use crate::link::{LinkEvent, LinkState, LoopbackRadio, RadioLink, SerialRadio};
use crate::messages::{OperatorEvent, Telemetry};
use crate::session::{ControlSession, TelemetrySink};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// How the runtime reaches the robot
#[derive(Debug, Clone)]
pub struct RuntimeOptions {
    pub session: SessionConfig,
    pub radio_port: String,
    pub radio_baudrate: u32,
    /// Use the loopback radio instead of hardware
    pub simulate: bool,
    /// Start discovery without waiting for the operator
    pub scan_on_start: bool,
}

pub async fn run(options: RuntimeOptions) -> Result<(), BoxError> {
    info!("Opening Zenoh session...");
    let zsession = zenoh::open(zenoh::Config::default()).await?;

    let (link_tx, link_rx) = mpsc::unbounded_channel();

    if options.simulate {
        info!("Using loopback radio (simulation)");
        let session = ControlSession::new(LoopbackRadio::new(link_tx), Vec::new(), &options.session);
        control_loop(session, link_rx, &zsession, options.scan_on_start).await
    } else {
        info!(
            "Using serial radio on {} @ {} baud",
            options.radio_port, options.radio_baudrate
        );
        let radio = SerialRadio::new(&options.radio_port, options.radio_baudrate, link_tx);
        let session = ControlSession::new(radio, Vec::new(), &options.session);
        control_loop(session, link_rx, &zsession, options.scan_on_start).await
    }
}

async fn control_loop<R: RadioLink>(
    mut session: ControlSession<R, Vec<Telemetry>>,
    mut link_events: UnboundedReceiver<LinkEvent>,
    zsession: &zenoh::Session,
    scan_on_start: bool,
) -> Result<(), BoxError> {
    info!("Setting up publishers and subscribers...");
    let subscriber = zsession.declare_subscriber(TOPIC_UI_EVENT).await?;
    let pub_telemetry = zsession.declare_publisher(TOPIC_TELEMETRY).await?;

    let mut tick = interval(Duration::from_millis(1000 / LOOP_HZ));
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    info!("Control loop started: {}Hz", LOOP_HZ);
    info!("Subscribed to: {}", TOPIC_UI_EVENT);
    info!("Publishing to: {}", TOPIC_TELEMETRY);

    if scan_on_start {
        if let Err(e) = session.start_scan(Instant::now()) {
            warn!("Initial scan failed: {}", e);
        }
    }

    loop {
        tokio::select! {
            _ = tick.tick() => {}
            _ = &mut shutdown => break,
        }
        let now = Instant::now();

        // 1. Radio events first, so a lost link is acted on before new input
        while let Ok(event) = link_events.try_recv() {
            if let Err(e) = session.on_link_event(event, now) {
                error!("Link event handling failed: {}", e);
            }
        }

        // 2. Drain all pending operator events (non-blocking)
        while let Ok(Some(sample)) = subscriber.try_recv() {
            let payload = sample.payload().to_bytes();
            match serde_json::from_slice::<OperatorEvent>(&payload) {
                Ok(event) => {
                    if let Err(e) = session.handle_operator(event, now) {
                        warn!("Operator event rejected: {}", e);
                    }
                }
                Err(e) => {
                    warn!("Failed to parse operator event: {}", e);
                }
            }
        }

        // 3. Timers: link, watchdog, throttle release
        if let Err(e) = session.tick(now) {
            error!("Control tick failed: {}", e);
        }

        // 4. Publish telemetry (failures never leave the loop)
        publish_telemetry(&pub_telemetry, session.telemetry_sink_mut()).await;
    }

    shutdown_session(&mut session, Instant::now());
    publish_telemetry(&pub_telemetry, session.telemetry_sink_mut()).await;
    Ok(())
}

async fn publish_telemetry(publisher: &zenoh::pubsub::Publisher<'_>, reports: &mut Vec<Telemetry>) {
    for report in reports.drain(..) {
        let json = match serde_json::to_string(&report) {
            Ok(json) => json,
            Err(e) => {
                warn!("Failed to encode telemetry: {}", e);
                continue;
            }
        };
        if let Err(e) = publisher.put(json).await {
            warn!("Failed to publish telemetry: {}", e);
        }
    }
}

/// Leave the robot stopped and the radio released
fn shutdown_session<R: RadioLink, T: TelemetrySink>(session: &mut ControlSession<R, T>, now: Instant) {
    info!("Shutting down, stopping robot");
    if let Err(e) = session.on_failsafe_pressed(now) {
        warn!("Final stop failed: {}", e);
    }
    if session.link_state() != LinkState::Idle {
        if let Err(e) = session.disconnect(now) {
            warn!("Disconnect failed: {}", e);
        }
    }
}
