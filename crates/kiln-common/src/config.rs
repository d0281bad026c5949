//! Controller runtime configuration
//!
//! Every flag can also be set through a `KILN_*` environment variable, so the
//! same binary is configured by args locally and by env in a Deployment.

use std::time::Duration;

use clap::{Parser, ValueEnum};

use crate::queue::RateLimit;
use crate::{Error, Result};

/// Log line encoding
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    /// One JSON object per line
    #[default]
    Json,
    /// Human-readable lines
    Text,
}

/// Settings shared by every reconciler's runtime
#[derive(Parser, Debug, Clone)]
#[command(name = "kiln-controller", version, about, long_about = None)]
pub struct ControllerConfig {
    /// Concurrent reconcile workers per kind
    #[arg(long, env = "KILN_WORKERS", default_value = "2")]
    pub workers: usize,

    /// Seconds between full re-enqueues of every cached object.
    /// Dependency relations expire after three periods.
    #[arg(long, env = "KILN_RESYNC_PERIOD_SECS", default_value = "36000")]
    pub resync_period_secs: u64,

    /// Server-side timeout for each watch request
    #[arg(long, env = "KILN_WATCH_TIMEOUT_SECS", default_value = "25")]
    pub watch_timeout_secs: u32,

    /// Delay before the first retry of a failed key
    #[arg(long, env = "KILN_BACKOFF_BASE_MS", default_value = "5")]
    pub backoff_base_ms: u64,

    /// Cap on the retry delay of a failed key
    #[arg(long, env = "KILN_BACKOFF_MAX_SECS", default_value = "1000")]
    pub backoff_max_secs: u64,

    /// Log line encoding
    #[arg(long, env = "KILN_LOG_FORMAT", value_enum, default_value_t = LogFormat::Json)]
    pub log_format: LogFormat,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            workers: 2,
            resync_period_secs: 36000,
            watch_timeout_secs: 25,
            backoff_base_ms: 5,
            backoff_max_secs: 1000,
            log_format: LogFormat::Json,
        }
    }
}

impl ControllerConfig {
    /// Reject settings the runtime cannot operate with
    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(Error::validation("workers must be at least 1"));
        }
        if self.resync_period_secs == 0 {
            return Err(Error::validation("resync period must be at least 1s"));
        }
        if Duration::from_millis(self.backoff_base_ms) > self.backoff_max() {
            return Err(Error::validation(format!(
                "backoff base {}ms exceeds cap {}s",
                self.backoff_base_ms, self.backoff_max_secs
            )));
        }
        Ok(())
    }

    /// Interval between full re-enqueues
    pub fn resync_period(&self) -> Duration {
        Duration::from_secs(self.resync_period_secs)
    }

    /// How long a dependency relation lives without being refreshed
    pub fn tracker_lease(&self) -> Duration {
        self.resync_period().saturating_mul(3)
    }

    /// Cap on a key's retry delay
    pub fn backoff_max(&self) -> Duration {
        Duration::from_secs(self.backoff_max_secs)
    }

    /// Work-queue backoff derived from these settings
    pub fn rate_limit(&self) -> RateLimit {
        RateLimit {
            base: Duration::from_millis(self.backoff_base_ms),
            max: self.backoff_max(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_parsed_defaults() {
        let parsed = ControllerConfig::parse_from(["kiln-controller"]);
        let default = ControllerConfig::default();
        assert_eq!(parsed.workers, default.workers);
        assert_eq!(parsed.resync_period_secs, default.resync_period_secs);
        assert_eq!(parsed.watch_timeout_secs, default.watch_timeout_secs);
        assert_eq!(parsed.backoff_base_ms, default.backoff_base_ms);
        assert_eq!(parsed.backoff_max_secs, default.backoff_max_secs);
        assert_eq!(parsed.log_format, LogFormat::Json);
        assert!(parsed.validate().is_ok());
    }

    #[test]
    fn flags_override_defaults() {
        let parsed = ControllerConfig::parse_from([
            "kiln-controller",
            "--workers",
            "8",
            "--resync-period-secs",
            "60",
            "--log-format",
            "text",
        ]);
        assert_eq!(parsed.workers, 8);
        assert_eq!(parsed.tracker_lease(), Duration::from_secs(180));
        assert_eq!(parsed.log_format, LogFormat::Text);
    }

    #[test]
    fn zero_workers_rejected() {
        let config = ControllerConfig {
            workers: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn base_above_cap_rejected() {
        let config = ControllerConfig {
            backoff_base_ms: 5_000,
            backoff_max_secs: 1,
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("exceeds cap"));
    }

    #[test]
    fn rate_limit_uses_configured_bounds() {
        let limit = ControllerConfig::default().rate_limit();
        assert_eq!(limit.base, Duration::from_millis(5));
        assert_eq!(limit.max, Duration::from_secs(1000));
    }
}
