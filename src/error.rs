//! Error types for the varitick crate.

/// Top-level error type for ticker configuration and control.
///
/// Configuration errors surface synchronously when the builder is finalized
/// or when [`Ticker::reset`](crate::Ticker::reset) is called, never deferred
/// to the first tick.
#[derive(Debug, thiserror::Error)]
pub enum TickerError {
    /// Invalid configuration value (zero duration, zero factor, probability
    /// outside `[0, 1]`, ...).
    #[error("config error: {0}")]
    Config(String),

    /// Malformed cron expression.
    #[error("cron error: {0}")]
    Cron(#[from] cron::error::Error),
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, TickerError>;

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;

    #[test]
    fn config_error_display() {
        let err = TickerError::Config("non-positive frequency".to_owned());
        assert_eq!(err.to_string(), "config error: non-positive frequency");
    }

    #[test]
    fn cron_error_wraps_parse_failure() {
        use std::str::FromStr;

        let parse_err = cron::Schedule::from_str("not a cron expression")
            .expect_err("malformed expression must not parse");
        let err = TickerError::from(parse_err);
        assert!(matches!(err, TickerError::Cron(_)));
        assert!(err.to_string().starts_with("cron error:"));
    }
}
