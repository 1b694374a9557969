use std::time::Duration;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use tankbot_teleop::config::{
    INPUT_TIMEOUT, KEEPALIVE_INTERVAL, RADIO_BAUDRATE, RADIO_PORT, SCAN_TIMEOUT, SessionConfig,
    THROTTLE_INTERVAL,
};
use tankbot_teleop::runtime::{self, RuntimeOptions};

/// Tank-drive teleoperation runtime: UI events in over zenoh, motor frames out over the radio
#[derive(Parser, Debug)]
#[command(version)]
struct Cli {
    /// Serial port of the radio bridge
    #[arg(long, default_value = RADIO_PORT)]
    port: String,

    #[arg(long, default_value_t = RADIO_BAUDRATE)]
    baud: u32,

    /// Run against a simulated robot instead of the radio
    #[arg(long)]
    simulate: bool,

    /// Minimum spacing between motor commands
    #[arg(long, default_value_t = THROTTLE_INTERVAL.as_millis() as u64)]
    throttle_ms: u64,

    /// Stop the robot if motion input is not refreshed within this window
    #[arg(long, default_value_t = INPUT_TIMEOUT.as_millis() as u64)]
    input_timeout_ms: u64,

    #[arg(long, default_value_t = SCAN_TIMEOUT.as_millis() as u64)]
    scan_timeout_ms: u64,

    /// Link heartbeat period, 0 disables
    #[arg(long, default_value_t = KEEPALIVE_INTERVAL.as_millis() as u64)]
    keepalive_ms: u64,

    /// Wait for the operator to pick a peripheral
    #[arg(long)]
    no_auto_connect: bool,

    /// Only consider peripherals whose id contains this text
    #[arg(long)]
    filter: Option<String>,

    /// Start scanning immediately
    #[arg(long)]
    scan_on_start: bool,
}

impl Cli {
    fn into_options(self) -> RuntimeOptions {
        let keepalive_interval =
            (self.keepalive_ms > 0).then(|| Duration::from_millis(self.keepalive_ms));

        RuntimeOptions {
            session: SessionConfig {
                throttle_interval: Duration::from_millis(self.throttle_ms),
                input_timeout: Duration::from_millis(self.input_timeout_ms),
                scan_timeout: Duration::from_millis(self.scan_timeout_ms),
                keepalive_interval,
                auto_connect: !self.no_auto_connect,
                peripheral_filter: self.filter,
            },
            radio_port: self.port,
            radio_baudrate: self.baud,
            simulate: self.simulate,
            scan_on_start: self.scan_on_start,
        }
    }
}

#[tokio::main]
async fn main() {
    // Setup logging (set RUST_LOG=info or debug)
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let options = Cli::parse().into_options();
    if let Err(e) = runtime::run(options).await {
        eprintln!("Runtime error: {}", e);
        std::process::exit(1);
    }
}
