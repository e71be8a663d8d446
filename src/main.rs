use std::env;
use std::error::Error;
use std::fs::File;
use std::sync::Arc;
use std::time::Duration;

use booking_eng::clock::SystemClock;
use booking_eng::cli::App;
use booking_eng::config::Config;
use booking_eng::csv::{read_assets, write_bookings};
use booking_eng::gateway::PaymobClient;
use booking_eng::signature::SignatureVerifier;
use booking_eng::sweeper::Sweeper;
use booking_eng::{BookingService, Ledger, WebhookProcessor};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{mpsc, watch};
use tokio_stream::wrappers::ReceiverStream;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::filter::LevelFilter;

const USAGE: &str = "usage: booking-eng <assets.csv> [config.toml] [report.csv]";
const CONFIG_ENV: &str = "BOOKING_ENG_CONFIG";

/// `RUST_LOG`-style directives, falling back to `warn` when none are given.
fn log_filter(directives: &str) -> EnvFilter {
    EnvFilter::builder()
        .with_default_directive(LevelFilter::WARN.into())
        .parse_lossy(directives)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(log_filter(
            &env::var(EnvFilter::DEFAULT_ENV).unwrap_or_default(),
        ))
        .with_writer(std::io::stderr)
        .init();

    let mut args = env::args().skip(1);
    let assets_path = args.next().ok_or(USAGE)?;
    let config_path = args
        .next()
        .or_else(|| env::var(CONFIG_ENV).ok())
        .ok_or(USAGE)?;
    let report_path = args.next();

    let config = Config::load(&config_path)?;

    let ledger = Arc::new(
        Ledger::new(Arc::new(SystemClock))
            .with_reservation_period(chrono::Duration::days(config.booking.reservation_days)),
    );

    let mut imported = 0usize;
    for result in read_assets(&assets_path)? {
        match result {
            Ok(asset) => {
                ledger.insert_asset(asset)?;
                imported += 1;
            }
            Err(e) => {
                warn!("{e}");
            }
        }
    }
    info!(imported, path = %assets_path, "assets loaded");

    let gateway = Arc::new(PaymobClient::new(config.gateway.clone())?);
    let verifier = SignatureVerifier::new(&config.gateway.hmac_secret).map_err(|e| e.to_string())?;
    let app = App::new(
        BookingService::new(ledger.clone(), gateway),
        WebhookProcessor::new(ledger.clone(), verifier),
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let sweeper = Sweeper::new(
        ledger.clone(),
        Duration::from_secs(config.sweeper.interval_secs),
    );
    let sweeper = tokio::spawn(sweeper.run(shutdown_rx));

    let (line_sender, line_receiver) = mpsc::channel(16);
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    if line_sender.send(line).await.is_err() {
                        break;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    warn!("failed to read request: {e}");
                    break;
                }
            }
        }
    });

    app.run(ReceiverStream::new(line_receiver), std::io::stdout().lock())
        .await?;

    // the receiver may already be gone if the sweeper exited on its own
    let _ = shutdown_tx.send(true);
    sweeper.await?;

    if let Some(path) = report_path {
        write_bookings(File::create(&path)?, &ledger.bookings()?)?;
        info!(path, "bookings report written");
    }

    Ok(())
}
