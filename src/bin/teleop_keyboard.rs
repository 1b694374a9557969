// Keyboard stand-in for the touch UI
// WASD joystick, U/J + I/K sliders, M mode, SPACE failsafe, G release,
// C scan, X disconnect, L acknowledge loss, R/F speed, Q quit
use crossterm::{
    event::{self, Event, KeyCode, KeyEvent, KeyEventKind},
    terminal::{disable_raw_mode, enable_raw_mode},
};
use std::time::{Duration, Instant};
use tracing::{info, warn};

use tankbot_teleop::config::{TOPIC_TELEMETRY, TOPIC_UI_EVENT};
use tankbot_teleop::messages::{ControlInput, DriveMode, OperatorEvent, SliderInput, Telemetry};

const SPEEDS: [f32; 3] = [0.3, 0.6, 1.0]; // stick deflection
const SLIDER_STEP: f32 = 0.1;
const INPUT_TIMEOUT_MS: u64 = 100; // Release the stick after this much time with no key

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    tracing_subscriber::fmt().with_env_filter("info").init();

    info!("Opening Zenoh session...");
    let session = zenoh::open(zenoh::Config::default()).await?;
    let publisher = session.declare_publisher(TOPIC_UI_EVENT).await?;
    let telemetry = session.declare_subscriber(TOPIC_TELEMETRY).await?;

    info!("Controls: WASD=stick, U/J I/K=sliders, M=mode, SPACE=failsafe, G=release");
    info!("          C=scan, X=disconnect, L=ack loss, R/F=speed, Q=quit");

    enable_raw_mode()?;
    let result = run_teleop(&publisher, &telemetry).await;
    disable_raw_mode()?;

    result
}

async fn publish(
    publisher: &zenoh::pubsub::Publisher<'_>,
    event: &OperatorEvent,
) -> Result<(), BoxError> {
    publisher.put(serde_json::to_string(event)?).await?;
    Ok(())
}

async fn run_teleop(
    publisher: &zenoh::pubsub::Publisher<'_>,
    telemetry: &zenoh::pubsub::Subscriber<zenoh::handlers::FifoChannelHandler<zenoh::sample::Sample>>,
) -> Result<(), BoxError> {
    let mut speed_idx: usize = 0;
    let mut mode = DriveMode::Joystick;

    // Persistent input state
    let mut x = 0.0f32;
    let mut y = 0.0f32;
    let mut sliders = SliderInput {
        left: 0.0,
        right: 0.0,
    };
    let mut last_movement_input = Instant::now();
    let mut last_report: Option<Telemetry> = None;

    loop {
        // Poll for key with 20ms timeout (50Hz effective rate)
        if event::poll(Duration::from_millis(20))? {
            if let Event::Key(KeyEvent { code, kind, .. }) = event::read()? {
                let pressed = kind == KeyEventKind::Press || kind == KeyEventKind::Repeat;
                let speed = SPEEDS[speed_idx];

                let command = match code {
                    // Stick - update deflection and refresh timestamp
                    KeyCode::Char('w') if pressed => {
                        y = speed;
                        last_movement_input = Instant::now();
                        None
                    }
                    KeyCode::Char('s') if pressed => {
                        y = -speed;
                        last_movement_input = Instant::now();
                        None
                    }
                    KeyCode::Char('a') if pressed => {
                        x = -speed;
                        last_movement_input = Instant::now();
                        None
                    }
                    KeyCode::Char('d') if pressed => {
                        x = speed;
                        last_movement_input = Instant::now();
                        None
                    }

                    // Sliders hold their position
                    KeyCode::Char('u') if pressed => {
                        sliders.left = (sliders.left + SLIDER_STEP).min(1.0);
                        None
                    }
                    KeyCode::Char('j') if pressed => {
                        sliders.left = (sliders.left - SLIDER_STEP).max(-1.0);
                        None
                    }
                    KeyCode::Char('i') if pressed => {
                        sliders.right = (sliders.right + SLIDER_STEP).min(1.0);
                        None
                    }
                    KeyCode::Char('k') if pressed => {
                        sliders.right = (sliders.right - SLIDER_STEP).max(-1.0);
                        None
                    }

                    KeyCode::Char('m') if pressed => {
                        mode = match mode {
                            DriveMode::Joystick => DriveMode::IndependentSliders,
                            DriveMode::IndependentSliders => DriveMode::Joystick,
                        };
                        sliders = SliderInput {
                            left: 0.0,
                            right: 0.0,
                        };
                        info!("Mode: {:?}", mode);
                        Some(OperatorEvent::ModeSelected { mode })
                    }
                    KeyCode::Char(' ') if pressed => Some(OperatorEvent::FailsafePressed),
                    KeyCode::Char('g') if pressed => Some(OperatorEvent::ReleaseFailsafe),
                    KeyCode::Char('c') if pressed => Some(OperatorEvent::StartScan),
                    KeyCode::Char('x') if pressed => Some(OperatorEvent::Disconnect),
                    KeyCode::Char('l') if pressed => Some(OperatorEvent::AcknowledgeLoss),

                    // Speed control
                    KeyCode::Char('r') if pressed => {
                        speed_idx = (speed_idx + 1).min(2);
                        print_speed(speed_idx);
                        None
                    }
                    KeyCode::Char('f') if pressed => {
                        speed_idx = speed_idx.saturating_sub(1);
                        print_speed(speed_idx);
                        None
                    }

                    // Quit
                    KeyCode::Char('q') | KeyCode::Esc if pressed => break,

                    _ => None,
                };

                if let Some(command) = command {
                    publish(publisher, &command).await?;
                }
            }
        }

        // Release the stick if no movement input for INPUT_TIMEOUT_MS
        if last_movement_input.elapsed() > Duration::from_millis(INPUT_TIMEOUT_MS) {
            x = 0.0;
            y = 0.0;
        }

        // Always publish the authoritative surface at ~50Hz to keep the watchdog fed
        let input = match mode {
            DriveMode::Joystick if x == 0.0 && y == 0.0 => {
                OperatorEvent::ControlInput(ControlInput::released())
            }
            DriveMode::Joystick => OperatorEvent::ControlInput(ControlInput::new(x, y)),
            DriveMode::IndependentSliders => OperatorEvent::SliderInput(sliders),
        };
        publish(publisher, &input).await?;

        // Show link changes
        while let Ok(Some(sample)) = telemetry.try_recv() {
            let payload = sample.payload().to_bytes();
            match serde_json::from_slice::<Telemetry>(&payload) {
                Ok(report) => {
                    let link_changed = last_report
                        .as_ref()
                        .is_none_or(|prev| prev.link != report.link || prev.failsafe_engaged != report.failsafe_engaged);
                    if link_changed {
                        info!(
                            "Link: {:?}, failsafe: {}, fault: {:?}",
                            report.link, report.failsafe_engaged, report.fault
                        );
                    }
                    last_report = Some(report);
                }
                Err(e) => warn!("Bad telemetry: {}", e),
            }
        }
    }

    Ok(())
}

fn print_speed(idx: usize) {
    let label = ["LOW", "MED", "HIGH"][idx];
    info!("Speed: {}", label);
}
