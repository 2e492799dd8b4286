//! varitick: a configurable variable-rate ticker.
//!
//! A [`Ticker`] emits timestamped tick events from a background task at a
//! schedule that can change after every tick: fixed interval, exponential
//! backoff (optionally capped), ramp-down, deterministic deviation,
//! probability-weighted alternation, uniform-random jitter, or a cron
//! expression.
//!
//! # Architecture
//!
//! Three pieces, connected by async channels:
//! - **[`TickerBuilder`]**: named configuration mutators applied strictly in
//!   call order, validated once when the builder is finalized
//! - **[`NextDelay`]**: the pure next-delay policy consulted after each tick
//! - **[`Ticker`]**: the caller-side handle; one background tokio task per
//!   ticker drives the loop and delivers ticks over a single-slot channel
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//! use varitick::Ticker;
//!
//! # async fn demo() -> varitick::Result<()> {
//! let mut ticker = Ticker::builder()
//!     .with_frequency(Duration::from_millis(100))
//!     .with_exponential_backoff(2)
//!     .spawn()?;
//!
//! while let Some(at) = ticker.recv().await {
//!     println!("tick at {at}");
//! }
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod policy;
pub mod ticker;

pub use error::{Result, TickerError};
pub use policy::NextDelay;
pub use ticker::{Ticker, TickerBuilder};
