use clap::Parser;
use client::network::TransportConfig;
use client::session::{Bot, Session, SessionOptions};
use log::info;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server WebSocket URL to connect to
    #[arg(short = 's', long, default_value = "ws://127.0.0.1:8080")]
    server: String,

    /// Display name announced after every connect
    #[arg(short = 'n', long)]
    name: Option<String>,

    /// Simulate network latency in milliseconds
    #[arg(short = 'l', long, default_value = "0")]
    fake_ping: u64,

    /// Frame loop rate in Hz
    #[arg(long, default_value = "60")]
    tick_rate: u32,

    /// Seconds to run before exiting (0 runs forever)
    #[arg(long, default_value = "0")]
    duration: u64,

    /// Disable client-side prediction
    #[arg(long)]
    no_prediction: bool,

    /// Disable server reconciliation
    #[arg(long)]
    no_reconciliation: bool,

    /// Disable remote interpolation
    #[arg(long)]
    no_interpolation: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();

    info!("Starting client...");
    info!("Connecting to: {}", args.server);
    if args.fake_ping > 0 {
        info!("Simulating {}ms latency", args.fake_ping);
    }

    let config = TransportConfig {
        url: args.server,
        fake_ping: Duration::from_millis(args.fake_ping),
        ..Default::default()
    };
    let options = SessionOptions {
        name: args.name,
        prediction_enabled: !args.no_prediction,
        reconciliation_enabled: !args.no_reconciliation,
        interpolation_enabled: !args.no_interpolation,
    };
    info!(
        "Prediction: {}, Reconciliation: {}, Interpolation: {}",
        options.prediction_enabled, options.reconciliation_enabled, options.interpolation_enabled
    );

    let mut session = Session::new(config, options, tokio::runtime::Handle::current());
    let mut bot = Bot::new();
    let duration = (args.duration > 0).then(|| Duration::from_secs(args.duration));

    tokio::select! {
        _ = session.run(&mut bot, args.tick_rate, duration) => {}
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    Ok(())
}
