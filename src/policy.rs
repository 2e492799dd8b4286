//! Next-delay policies.
//!
//! A [`NextDelay`] is the strategy the ticker loop consults after every tick
//! to decide how long to wait before the next one. Each variant is a pure
//! function of the delay that was armed for the tick that just fired, the
//! originally configured base frequency, and the number of ticks delivered
//! so far — policies never touch ticker state themselves; the loop applies
//! the result.
//!
//! | Variant | Next delay |
//! |---------|-----------|
//! | [`Exponential`](NextDelay::Exponential) | `current * factor`, unbounded |
//! | [`ExponentialCapped`](NextDelay::ExponentialCapped) | `current * factor` until `max_ticks`, then back to base |
//! | [`RampCapped`](NextDelay::RampCapped) | `current / factor` until `max_ticks`, then back to base |
//! | [`Deviation`](NextDelay::Deviation) | `current + current * fraction`, deterministic |
//! | [`Alternate`](NextDelay::Alternate) | `current` with probability `p`, else the alternate duration |
//! | [`UniformRandom`](NextDelay::UniformRandom) | fresh uniform draw in `(0, max]` |
//! | [`Cron`](NextDelay::Cron) | delay until the schedule's next fire time |

use chrono::{DateTime, Utc};
use rand::Rng;
use std::time::Duration;

/// Strategy for computing the delay before the following tick.
///
/// Installed through the [`TickerBuilder`](crate::TickerBuilder) mutators; at
/// most one policy is active per ticker, and installing a second one replaces
/// the first. With no policy the ticker fires at its base frequency forever.
#[derive(Debug, Clone)]
pub enum NextDelay {
    /// Multiply the current delay by `factor` after every tick. Grows without
    /// bound.
    Exponential {
        /// Integer multiplier applied to the current delay.
        factor: u32,
    },

    /// Multiply the current delay by `factor` while `tick_count <= max_ticks`,
    /// then reset to the originally configured base frequency.
    ///
    /// The reset goes back to the *base* frequency, not the last multiplied
    /// value. That asymmetry is deliberate and load-bearing: after the cap
    /// the ticker returns to its original rate.
    ExponentialCapped {
        /// Integer multiplier applied to the current delay.
        factor: u32,
        /// Tick count (inclusive) up to which the backoff keeps growing.
        max_ticks: u64,
    },

    /// Divide the current delay by `factor` (truncating integer division)
    /// while `tick_count <= max_ticks`, then reset to the base frequency.
    RampCapped {
        /// Integer divisor applied to the current delay.
        factor: u32,
        /// Tick count (inclusive) up to which the ramp keeps shrinking.
        max_ticks: u64,
    },

    /// `current + current * fraction`. Deterministic, not random; a fraction
    /// of `0.5` stretches every interval by 50%.
    Deviation {
        /// Non-negative finite fraction of the current delay to add.
        fraction: f64,
    },

    /// Keep the current delay with probability `probability`, otherwise
    /// switch to `duration`. One uniform draw in `[0, 1)` per tick.
    Alternate {
        /// The alternate delay chosen when the draw misses.
        duration: Duration,
        /// Probability of keeping the current delay.
        probability: f64,
    },

    /// A fresh uniform draw in `(0, max]` every tick, with no memory of the
    /// prior delay.
    UniformRandom {
        /// Upper bound of the draw.
        max: Duration,
    },

    /// Delay until the cron schedule's next fire time, recomputed fresh each
    /// tick so calendar irregularities (DST transitions, month lengths) are
    /// accounted for.
    Cron {
        /// Parsed cron schedule.
        schedule: cron::Schedule,
    },
}

impl NextDelay {
    /// Computes the delay to arm for the next tick.
    ///
    /// `current` is the delay that was armed for the tick that just fired,
    /// `base` the originally configured frequency, and `tick_count` the
    /// number of ticks delivered so far, including the one that just fired.
    /// `now` is only consulted by the calendar-driven [`Cron`](Self::Cron)
    /// variant.
    ///
    /// A return value of [`Duration::ZERO`] means the policy cannot produce
    /// an armable delay (ramp truncation underflow, or a cron schedule with
    /// no future fire time); the loop treats that as fatal and stops rather
    /// than clamping.
    #[must_use]
    pub fn compute(
        &self,
        current: Duration,
        base: Duration,
        tick_count: u64,
        now: DateTime<Utc>,
    ) -> Duration {
        match self {
            Self::Exponential { factor } => current.saturating_mul(*factor),
            Self::ExponentialCapped { factor, max_ticks } => {
                if tick_count > *max_ticks {
                    base
                } else {
                    current.saturating_mul(*factor)
                }
            }
            Self::RampCapped { factor, max_ticks } => {
                if tick_count > *max_ticks {
                    base
                } else {
                    current / *factor
                }
            }
            Self::Deviation { fraction } => current + current.mul_f64(*fraction),
            Self::Alternate {
                duration,
                probability,
            } => {
                if rand::thread_rng().r#gen::<f64>() < *probability {
                    current
                } else {
                    *duration
                }
            }
            Self::UniformRandom { max } => {
                let bound = u64::try_from(max.as_nanos()).unwrap_or(u64::MAX);
                Duration::from_nanos(rand::thread_rng().gen_range(1..=bound))
            }
            Self::Cron { schedule } => next_cron_delay(schedule, now),
        }
    }

    /// Whether the first armed delay comes from the schedule itself rather
    /// than the configured base frequency.
    pub(crate) fn is_calendar(&self) -> bool {
        matches!(self, Self::Cron { .. })
    }

    /// Short policy name for log fields.
    pub(crate) fn name(&self) -> &'static str {
        match self {
            Self::Exponential { .. } => "exponential",
            Self::ExponentialCapped { .. } => "exponential_capped",
            Self::RampCapped { .. } => "ramp_capped",
            Self::Deviation { .. } => "deviation",
            Self::Alternate { .. } => "alternate",
            Self::UniformRandom { .. } => "uniform_random",
            Self::Cron { .. } => "cron",
        }
    }
}

/// Delay from `now` until the schedule's next fire time.
///
/// Returns [`Duration::ZERO`] when the schedule has no future fire time.
fn next_cron_delay(schedule: &cron::Schedule, now: DateTime<Utc>) -> Duration {
    schedule
        .after(&now)
        .next()
        .and_then(|next| (next - now).to_std().ok())
        .unwrap_or(Duration::ZERO)
}
