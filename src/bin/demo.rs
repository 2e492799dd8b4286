//! Demo driver: walks through the ticker configurations, printing ticks for
//! a bounded window each.

use std::time::Duration;
use tracing::info;
use varitick::{Result, Ticker};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let ticker = Ticker::builder().spawn()?;
    run_example(ticker, "normal ticker at 1s", Duration::from_secs(3)).await;

    let ticker = Ticker::builder().with_immediate_start(true).spawn()?;
    run_example(ticker, "immediate start at 1s", Duration::from_secs(5)).await;

    let ticker = Ticker::builder()
        .with_immediate_start(true)
        .with_frequency(Duration::from_millis(100))
        .spawn()?;
    run_example(ticker, "immediate start at 100ms", Duration::from_secs(5)).await;

    let ticker = Ticker::builder()
        .with_immediate_start(true)
        .with_frequency(Duration::from_millis(100))
        .with_exponential_backoff(2)
        .spawn()?;
    run_example(ticker, "exponential backoff from 100ms", Duration::from_secs(3)).await;

    let ticker = Ticker::builder()
        .with_immediate_start(true)
        .with_frequency(Duration::from_millis(100))
        .with_exponential_backoff_capped(2, 3)
        .spawn()?;
    run_example(
        ticker,
        "exponential backoff from 100ms, capped after 3 ticks",
        Duration::from_secs(3),
    )
    .await;

    let ticker = Ticker::builder()
        .with_immediate_start(true)
        .with_frequency(Duration::from_secs(5))
        .with_ramp_capped(2, 10)
        .spawn()?;
    run_example(ticker, "ramp down from 5s", Duration::from_secs(10)).await;

    let ticker = Ticker::builder()
        .with_frequency(Duration::from_millis(500))
        .with_deviation(0.5)
        .spawn()?;
    run_example(ticker, "500ms stretched by 50% each tick", Duration::from_secs(5)).await;

    let ticker = Ticker::builder()
        .with_frequency(Duration::from_millis(500))
        .with_alternate_duration(Duration::from_millis(100), 0.5)
        .spawn()?;
    run_example(
        ticker,
        "500ms, or 100ms with probability 0.5",
        Duration::from_secs(5),
    )
    .await;

    let ticker = Ticker::builder()
        .with_random_tick_in(Duration::from_millis(500))
        .spawn()?;
    run_example(ticker, "uniform random tick in 500ms", Duration::from_secs(5)).await;

    let ticker = Ticker::builder().with_cron("*/3 * * * * * *").spawn()?;
    run_example(ticker, "cron tick every 3 seconds", Duration::from_secs(10)).await;

    Ok(())
}

async fn run_example(mut ticker: Ticker, label: &str, window: Duration) {
    info!("{label}");
    let deadline = tokio::time::Instant::now() + window;
    loop {
        tokio::select! {
            () = tokio::time::sleep_until(deadline) => break,
            tick = ticker.recv() => match tick {
                Some(at) => info!("tick at {at}"),
                None => break,
            },
        }
    }
    ticker.stop();
    info!(ticks = ticker.tick_count(), "window done");
}
