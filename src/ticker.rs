//! Ticker state machine and background loop.
//!
//! A [`Ticker`] delivers timestamped ticks over a single-slot channel from
//! exactly one background tokio task. After every tick the installed
//! [`NextDelay`] policy recomputes the delay to arm next; with no policy the
//! ticker fires at its configured frequency forever.
//!
//! # Lifecycle
//!
//! `Unstarted → Running → Stopped` (terminal). [`TickerBuilder::build`]
//! returns an unstarted ticker; [`Ticker::start`] spawns the loop;
//! [`TickerBuilder::spawn`] does both in one call. [`Ticker::stop`] cancels
//! the loop and is idempotent. Starting a ticker that is already running (or
//! already stopped) is a logged no-op, as is resetting one whose loop has
//! exited.
//!
//! # Back-pressure
//!
//! The tick channel holds at most one undelivered tick; a consumer that does
//! not drain promptly blocks the loop and thereby delays the next schedule
//! recomputation. That is deliberate hand-off semantics, not an error. A
//! stop request also unblocks a delivery that is pending on a slow consumer.

use crate::error::{Result, TickerError};
use crate::policy::NextDelay;
use chrono::{DateTime, Utc};
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Frequency used when no [`TickerBuilder::with_frequency`] call is made.
const DEFAULT_FREQUENCY: Duration = Duration::from_secs(1);

/// Policy configuration as captured by the builder.
///
/// Mirrors [`NextDelay`] but keeps the cron expression unparsed so that all
/// validation happens in [`TickerBuilder::build`].
#[derive(Debug, Clone)]
enum PolicySpec {
    Exponential { factor: u32 },
    ExponentialCapped { factor: u32, max_ticks: u64 },
    RampCapped { factor: u32, max_ticks: u64 },
    Deviation { fraction: f64 },
    Alternate { duration: Duration, probability: f64 },
    UniformRandom { max: Duration },
    Cron { expr: String },
}

/// Builder for [`Ticker`].
///
/// Mutators apply strictly in call order: a later call overwrites whatever an
/// earlier one set, so installing a second policy replaces the first and a
/// frequency set after a policy still takes effect as the base frequency.
/// All validation happens in [`build`](Self::build).
#[derive(Debug, Clone)]
pub struct TickerBuilder {
    frequency: Duration,
    immediate_start: bool,
    policy: Option<PolicySpec>,
}

impl Default for TickerBuilder {
    fn default() -> Self {
        Self {
            frequency: DEFAULT_FREQUENCY,
            immediate_start: false,
            policy: None,
        }
    }
}

impl TickerBuilder {
    /// Creates a builder with the defaults: 1 s frequency, no immediate
    /// start, no policy.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the base frequency. Zero is rejected by [`build`](Self::build).
    #[must_use]
    pub fn with_frequency(mut self, frequency: Duration) -> Self {
        self.frequency = frequency;
        self
    }

    /// Delivers the first tick at ≈0, before the first interval elapses.
    ///
    /// Ignored (forced off) when a cron policy is installed, since the first
    /// fire time is itself computed from the expression.
    #[must_use]
    pub fn with_immediate_start(mut self, immediate: bool) -> Self {
        self.immediate_start = immediate;
        self
    }

    /// Multiplies the delay by `factor` after every tick, without bound.
    #[must_use]
    pub fn with_exponential_backoff(mut self, factor: u32) -> Self {
        self.policy = Some(PolicySpec::Exponential { factor });
        self
    }

    /// Multiplies the delay by `factor` until `max_ticks` ticks have been
    /// delivered, then resets to the base frequency (not the last value).
    #[must_use]
    pub fn with_exponential_backoff_capped(mut self, factor: u32, max_ticks: u64) -> Self {
        self.policy = Some(PolicySpec::ExponentialCapped { factor, max_ticks });
        self
    }

    /// Divides the delay by `factor` until `max_ticks` ticks have been
    /// delivered, then resets to the base frequency.
    #[must_use]
    pub fn with_ramp_capped(mut self, factor: u32, max_ticks: u64) -> Self {
        self.policy = Some(PolicySpec::RampCapped { factor, max_ticks });
        self
    }

    /// Stretches every interval by `fraction` of itself (`0.5` = +50%).
    #[must_use]
    pub fn with_deviation(mut self, fraction: f64) -> Self {
        self.policy = Some(PolicySpec::Deviation { fraction });
        self
    }

    /// Keeps the current delay with the given probability, otherwise
    /// switches to `duration` for the next interval.
    #[must_use]
    pub fn with_alternate_duration(mut self, duration: Duration, probability: f64) -> Self {
        self.policy = Some(PolicySpec::Alternate {
            duration,
            probability,
        });
        self
    }

    /// Draws every interval uniformly from `(0, max]`.
    #[must_use]
    pub fn with_random_tick_in(mut self, max: Duration) -> Self {
        self.policy = Some(PolicySpec::UniformRandom { max });
        self
    }

    /// Fires on the given cron schedule. The expression is parsed in
    /// [`build`](Self::build); a malformed expression fails construction.
    #[must_use]
    pub fn with_cron(mut self, expr: impl Into<String>) -> Self {
        self.policy = Some(PolicySpec::Cron { expr: expr.into() });
        self
    }

    /// Validates the configuration and returns an unstarted [`Ticker`].
    ///
    /// # Errors
    ///
    /// [`TickerError::Config`] for a zero frequency, zero factor, zero
    /// alternate/random duration, non-finite or negative deviation fraction,
    /// or probability outside `[0, 1]`; [`TickerError::Cron`] for a
    /// malformed cron expression. Nothing is ever silently clamped.
    pub fn build(self) -> Result<Ticker> {
        if self.frequency.is_zero() {
            return Err(TickerError::Config(
                "non-positive frequency for ticker".to_owned(),
            ));
        }

        let policy = match self.policy {
            None => None,
            Some(spec) => Some(validate_policy(spec)?),
        };

        // The first cron fire time comes from the expression, so an
        // immediate tick would be off-schedule.
        let immediate_start =
            self.immediate_start && !policy.as_ref().is_some_and(NextDelay::is_calendar);

        let (tick_tx, tick_rx) = mpsc::channel(1);
        let (reset_tx, reset_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let tick_count = Arc::new(AtomicU64::new(0));

        let runner = Runner {
            ticks: tick_tx,
            reset_rx,
            cancel: cancel.clone(),
            tick_count: Arc::clone(&tick_count),
            current_delay: self.frequency,
            base: self.frequency,
            immediate_start,
            policy,
        };

        Ok(Ticker {
            ticks: tick_rx,
            reset_tx,
            cancel,
            tick_count,
            runner: Some(runner),
        })
    }

    /// Builds and starts in one call, returning a running [`Ticker`].
    ///
    /// # Errors
    ///
    /// Same as [`build`](Self::build).
    pub fn spawn(self) -> Result<Ticker> {
        let mut ticker = self.build()?;
        ticker.start();
        Ok(ticker)
    }
}

/// A repeating timer whose interval can be recomputed after every tick.
///
/// Ticks are UTC timestamps delivered through [`recv`](Self::recv). The
/// loop runs on its own tokio task; `Ticker` is the caller-side handle for
/// consuming ticks and for the [`start`](Self::start)/[`stop`](Self::stop)/
/// [`reset`](Self::reset) lifecycle operations.
///
/// Dropping the handle cancels the loop, so an unstoppable background task
/// cannot be leaked.
#[derive(Debug)]
pub struct Ticker {
    ticks: mpsc::Receiver<DateTime<Utc>>,
    reset_tx: mpsc::UnboundedSender<Duration>,
    cancel: CancellationToken,
    tick_count: Arc<AtomicU64>,
    runner: Option<Runner>,
}

impl Ticker {
    /// Returns a [`TickerBuilder`] with the default configuration.
    #[must_use]
    pub fn builder() -> TickerBuilder {
        TickerBuilder::new()
    }

    /// Spawns the background loop.
    ///
    /// Exactly one loop drives a given ticker; calling `start` on a ticker
    /// that is already running or stopped is a logged no-op.
    pub fn start(&mut self) {
        if self.cancel.is_cancelled() {
            warn!("start called on a ticker that is already stopped");
            return;
        }
        match self.runner.take() {
            Some(runner) => {
                tokio::spawn(runner.run());
            }
            None => warn!("start called on a ticker that is already running"),
        }
    }

    /// Signals the loop to exit and disarms the timer. Idempotent.
    ///
    /// After `stop` returns, no further ticks are produced; a delivery that
    /// was already blocked on a slow consumer is abandoned, not flushed. The
    /// tick channel is never closed explicitly — it ends only when the loop
    /// drops its sender, so a concurrent [`recv`](Self::recv) observes a
    /// clean end-of-stream rather than a spurious tick.
    pub fn stop(&self) {
        if self.cancel.is_cancelled() {
            debug!("stop called on a ticker that is already stopped");
        }
        self.cancel.cancel();
    }

    /// Re-arms the timer to fire `delay` from now, without waiting out the
    /// remainder of the current interval and without touching the tick
    /// count. `delay` also becomes the current delay that a policy sees on
    /// the next recomputation.
    ///
    /// Resetting a stopped ticker is a logged no-op.
    ///
    /// # Errors
    ///
    /// [`TickerError::Config`] if `delay` is zero.
    pub fn reset(&self, delay: Duration) -> Result<()> {
        if delay.is_zero() {
            return Err(TickerError::Config(
                "non-positive delay for ticker reset".to_owned(),
            ));
        }
        if self.reset_tx.send(delay).is_err() {
            warn!("reset called on a ticker whose loop has exited");
        }
        Ok(())
    }

    /// Number of ticks delivered so far. Incremented exactly once per
    /// delivered tick and never reset.
    #[must_use]
    pub fn tick_count(&self) -> u64 {
        self.tick_count.load(Ordering::Relaxed)
    }

    /// Receives the next tick timestamp.
    ///
    /// Returns `None` once the loop has exited (after [`stop`](Self::stop))
    /// and all in-flight ticks have been drained.
    pub async fn recv(&mut self) -> Option<DateTime<Utc>> {
        self.ticks.recv().await
    }

    /// Non-blocking variant of [`recv`](Self::recv).
    pub fn try_recv(&mut self) -> Option<DateTime<Utc>> {
        self.ticks.try_recv().ok()
    }
}

impl Drop for Ticker {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Validates a captured policy configuration and produces the runtime policy.
fn validate_policy(spec: PolicySpec) -> Result<NextDelay> {
    match spec {
        PolicySpec::Exponential { factor } => {
            validate_factor(factor, "exponential backoff")?;
            Ok(NextDelay::Exponential { factor })
        }
        PolicySpec::ExponentialCapped { factor, max_ticks } => {
            validate_factor(factor, "capped exponential backoff")?;
            Ok(NextDelay::ExponentialCapped { factor, max_ticks })
        }
        PolicySpec::RampCapped { factor, max_ticks } => {
            validate_factor(factor, "capped ramp")?;
            Ok(NextDelay::RampCapped { factor, max_ticks })
        }
        PolicySpec::Deviation { fraction } => {
            if !fraction.is_finite() || fraction < 0.0 {
                return Err(TickerError::Config(format!(
                    "deviation fraction must be finite and non-negative, got {fraction}"
                )));
            }
            Ok(NextDelay::Deviation { fraction })
        }
        PolicySpec::Alternate {
            duration,
            probability,
        } => {
            if duration.is_zero() {
                return Err(TickerError::Config(
                    "non-positive alternate duration".to_owned(),
                ));
            }
            if !(0.0..=1.0).contains(&probability) {
                return Err(TickerError::Config(format!(
                    "probability must be within [0, 1], got {probability}"
                )));
            }
            Ok(NextDelay::Alternate {
                duration,
                probability,
            })
        }
        PolicySpec::UniformRandom { max } => {
            if max.is_zero() {
                return Err(TickerError::Config(
                    "non-positive bound for random tick".to_owned(),
                ));
            }
            Ok(NextDelay::UniformRandom { max })
        }
        PolicySpec::Cron { expr } => {
            let schedule = cron::Schedule::from_str(&expr)?;
            Ok(NextDelay::Cron { schedule })
        }
    }
}

fn validate_factor(factor: u32, what: &str) -> Result<()> {
    if factor == 0 {
        return Err(TickerError::Config(format!("zero factor for {what}")));
    }
    Ok(())
}

/// Loop-side state. The runner is the single writer of `current_delay` and
/// the tick counter; the caller side only signals it through the
/// cancellation token and the reset channel.
#[derive(Debug)]
struct Runner {
    ticks: mpsc::Sender<DateTime<Utc>>,
    reset_rx: mpsc::UnboundedReceiver<Duration>,
    cancel: CancellationToken,
    tick_count: Arc<AtomicU64>,
    current_delay: Duration,
    base: Duration,
    immediate_start: bool,
    policy: Option<NextDelay>,
}

impl Runner {
    async fn run(mut self) {
        info!(
            frequency_ms = self.current_delay.as_millis() as u64,
            immediate_start = self.immediate_start,
            policy = self.policy.as_ref().map_or("none", NextDelay::name),
            "ticker started"
        );

        // A calendar policy derives the first delay from the expression.
        if let Some(policy) = &self.policy {
            if policy.is_calendar() {
                self.current_delay = policy.compute(self.current_delay, self.base, 0, Utc::now());
                if self.current_delay.is_zero() {
                    error!("cron schedule has no future fire time, stopping");
                    return;
                }
            }
        }

        if self.immediate_start && !self.deliver().await {
            return;
        }

        let sleep = tokio::time::sleep(self.current_delay);
        tokio::pin!(sleep);

        loop {
            // Cancellation is checked first so a stop that raced a timer
            // fire never produces one more tick.
            tokio::select! {
                biased;
                () = self.cancel.cancelled() => {
                    info!(
                        ticks = self.tick_count.load(Ordering::Relaxed),
                        "ticker stopped"
                    );
                    return;
                }
                Some(new_delay) = self.reset_rx.recv() => {
                    debug!(delay_ms = new_delay.as_millis() as u64, "ticker reset");
                    self.current_delay = new_delay;
                    sleep.as_mut().reset(tokio::time::Instant::now() + new_delay);
                }
                () = &mut sleep => {
                    if !self.deliver().await {
                        return;
                    }
                    if let Some(policy) = &self.policy {
                        let count = self.tick_count.load(Ordering::Relaxed);
                        let next =
                            policy.compute(self.current_delay, self.base, count, Utc::now());
                        if next.is_zero() {
                            error!(
                                tick = count,
                                policy = policy.name(),
                                "policy produced an un-armable zero delay, stopping"
                            );
                            return;
                        }
                        self.current_delay = next;
                    }
                    sleep.as_mut().reset(tokio::time::Instant::now() + self.current_delay);
                }
            }
        }
    }

    /// Delivers one tick and bumps the counter.
    ///
    /// Returns `false` when the loop should exit: the consumer dropped the
    /// receiver, or a stop arrived while the send was blocked on the
    /// single-slot channel. Cancellation takes precedence, so a blocked
    /// delivery is abandoned even when the consumer drains the slot at the
    /// same moment.
    async fn deliver(&mut self) -> bool {
        tokio::select! {
            biased;
            () = self.cancel.cancelled() => {
                debug!("stop requested while a tick delivery was pending");
                false
            }
            sent = self.ticks.send(Utc::now()) => {
                if sent.is_err() {
                    debug!("tick channel closed by consumer, stopping");
                    return false;
                }
                self.tick_count.fetch_add(1, Ordering::Relaxed);
                true
            }
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;

    #[test]
    fn builder_defaults() {
        let builder = TickerBuilder::new();
        assert_eq!(builder.frequency, DEFAULT_FREQUENCY);
        assert!(!builder.immediate_start);
        assert!(builder.policy.is_none());
    }

    #[test]
    fn zero_frequency_is_rejected() {
        let err = Ticker::builder()
            .with_frequency(Duration::ZERO)
            .build()
            .expect_err("zero frequency must fail");
        assert!(matches!(err, TickerError::Config(_)));
    }

    #[test]
    fn zero_backoff_factor_is_rejected() {
        let err = Ticker::builder()
            .with_exponential_backoff(0)
            .build()
            .expect_err("zero factor must fail");
        assert!(matches!(err, TickerError::Config(_)));
    }

    #[test]
    fn zero_ramp_factor_is_rejected() {
        let err = Ticker::builder()
            .with_ramp_capped(0, 5)
            .build()
            .expect_err("zero factor must fail");
        assert!(matches!(err, TickerError::Config(_)));
    }

    #[test]
    fn negative_deviation_fraction_is_rejected() {
        let err = Ticker::builder()
            .with_deviation(-0.5)
            .build()
            .expect_err("negative fraction must fail");
        assert!(matches!(err, TickerError::Config(_)));
    }

    #[test]
    fn out_of_range_probability_is_rejected() {
        let err = Ticker::builder()
            .with_alternate_duration(Duration::from_millis(50), 1.5)
            .build()
            .expect_err("probability above 1 must fail");
        assert!(matches!(err, TickerError::Config(_)));
    }

    #[test]
    fn zero_alternate_duration_is_rejected() {
        let err = Ticker::builder()
            .with_alternate_duration(Duration::ZERO, 0.5)
            .build()
            .expect_err("zero alternate duration must fail");
        assert!(matches!(err, TickerError::Config(_)));
    }

    #[test]
    fn zero_random_bound_is_rejected() {
        let err = Ticker::builder()
            .with_random_tick_in(Duration::ZERO)
            .build()
            .expect_err("zero bound must fail");
        assert!(matches!(err, TickerError::Config(_)));
    }

    #[test]
    fn malformed_cron_expression_is_rejected() {
        let err = Ticker::builder()
            .with_cron("not a cron expression")
            .build()
            .expect_err("malformed cron must fail");
        assert!(matches!(err, TickerError::Cron(_)));
    }

    #[test]
    fn later_policy_replaces_earlier_one() {
        let builder = Ticker::builder()
            .with_exponential_backoff(2)
            .with_deviation(0.5);
        assert!(matches!(
            builder.policy,
            Some(PolicySpec::Deviation { fraction }) if fraction == 0.5
        ));
    }

    #[test]
    fn frequency_after_policy_still_applies() {
        let builder = Ticker::builder()
            .with_exponential_backoff(2)
            .with_frequency(Duration::from_millis(250));
        assert_eq!(builder.frequency, Duration::from_millis(250));
        assert!(builder.policy.is_some());
    }

    #[tokio::test]
    async fn zero_reset_delay_is_rejected() {
        let ticker = Ticker::builder().build().expect("build");
        let err = ticker
            .reset(Duration::ZERO)
            .expect_err("zero reset delay must fail");
        assert!(matches!(err, TickerError::Config(_)));
    }

    #[tokio::test]
    async fn cron_policy_forces_immediate_start_off() {
        let ticker = Ticker::builder()
            .with_cron("0 0 * * * *")
            .with_immediate_start(true)
            .build()
            .expect("build");
        let runner = ticker.runner.as_ref().expect("unstarted runner");
        assert!(!runner.immediate_start);
    }

    #[test]
    fn start_after_stop_does_not_spawn() {
        let mut ticker = Ticker::builder().build().expect("build");
        ticker.stop();
        ticker.start();
        // The runner must not have been consumed by a doomed spawn.
        assert!(ticker.runner.is_some());
    }

    #[tokio::test]
    async fn start_twice_is_a_noop() {
        let mut ticker = Ticker::builder()
            .with_frequency(Duration::from_secs(60))
            .build()
            .expect("build");
        ticker.start();
        ticker.start();
        ticker.stop();
    }

    #[tokio::test]
    async fn stop_is_idempotent() {
        let mut ticker = Ticker::builder().spawn().expect("spawn");
        ticker.stop();
        ticker.stop();
        assert!(ticker.recv().await.is_none());
    }
}
