//! Gateway tuning knobs.
//!
//! Every field has a default, so an empty document deserializes into a usable configuration.
//! Durations are expressed in seconds when (de)serialized.

// self
use crate::{_prelude::*, error::ConfigError, obs::DEFAULT_METRICS_RETENTION};

/// Timing and retention settings shared by the watcher, request path, and session registry.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
	/// Interval between watcher scans.
	#[serde(with = "seconds")]
	pub watch_interval: Duration,
	/// Watcher refreshes credentials expiring within this window.
	#[serde(with = "seconds")]
	pub lookahead: Duration,
	/// Request path refreshes credentials expiring within this window.
	#[serde(with = "seconds")]
	pub request_window: Duration,
	/// Sessions idle for this long are destroyed.
	#[serde(with = "seconds")]
	pub idle_timeout: Duration,
	/// Refresh records retained per tenant.
	pub metrics_retention: usize,
	/// Watcher retry policy for retryable refresh failures.
	pub backoff: BackoffConfig,
}
impl GatewayConfig {
	/// Sets the watcher scan interval.
	pub fn with_watch_interval(mut self, interval: Duration) -> Self {
		self.watch_interval = interval;

		self
	}

	/// Sets the watcher look-ahead window.
	pub fn with_lookahead(mut self, lookahead: Duration) -> Self {
		self.lookahead = lookahead;

		self
	}

	/// Sets the request-path refresh window.
	pub fn with_request_window(mut self, window: Duration) -> Self {
		self.request_window = window;

		self
	}

	/// Sets the session idle timeout.
	pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
		self.idle_timeout = timeout;

		self
	}

	/// Sets the per-tenant metrics retention.
	pub fn with_metrics_retention(mut self, retention: usize) -> Self {
		self.metrics_retention = retention;

		self
	}

	/// Replaces the watcher backoff policy.
	pub fn with_backoff(mut self, backoff: BackoffConfig) -> Self {
		self.backoff = backoff;

		self
	}

	/// Rejects settings that would stall the watcher or disable expiry handling.
	pub fn validate(&self) -> Result<(), ConfigError> {
		ensure_positive("watch_interval", self.watch_interval)?;
		ensure_positive("idle_timeout", self.idle_timeout)?;

		if self.lookahead.is_negative() {
			return Err(ConfigError::InvalidSetting { field: "lookahead", reason: "must not be negative" });
		}
		if self.request_window.is_negative() {
			return Err(ConfigError::InvalidSetting {
				field: "request_window",
				reason: "must not be negative",
			});
		}
		if self.metrics_retention == 0 {
			return Err(ConfigError::InvalidSetting {
				field: "metrics_retention",
				reason: "must be at least one",
			});
		}

		self.backoff.validate()
	}
}
impl Default for GatewayConfig {
	fn default() -> Self {
		Self {
			watch_interval: Duration::seconds(60),
			lookahead: Duration::minutes(5),
			request_window: Duration::seconds(60),
			idle_timeout: Duration::minutes(30),
			metrics_retention: DEFAULT_METRICS_RETENTION,
			backoff: BackoffConfig::default(),
		}
	}
}

/// Bounded exponential backoff applied by the watcher after retryable failures.
///
/// The delay after the `n`th consecutive failure is `base * 2^(n - 1)`, capped at `max`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffConfig {
	/// Delay after the first failure.
	#[serde(with = "seconds")]
	pub base: Duration,
	/// Upper bound for any single delay.
	#[serde(with = "seconds")]
	pub max: Duration,
	/// Consecutive failures after which the watcher stops proactive retries.
	pub max_attempts: u32,
}
impl BackoffConfig {
	/// Un-jittered delay after `attempts` consecutive failures.
	pub fn delay_for(&self, attempts: u32) -> Duration {
		let exponent = attempts.saturating_sub(1).min(30);
		let factor = 1_i32 << exponent;

		self.base.checked_mul(factor).map_or(self.max, |delay| delay.min(self.max))
	}

	fn validate(&self) -> Result<(), ConfigError> {
		ensure_positive("backoff.base", self.base)?;

		if self.max < self.base {
			return Err(ConfigError::InvalidSetting {
				field: "backoff.max",
				reason: "must not be shorter than backoff.base",
			});
		}
		if self.max_attempts == 0 {
			return Err(ConfigError::InvalidSetting {
				field: "backoff.max_attempts",
				reason: "must be at least one",
			});
		}

		Ok(())
	}
}
impl Default for BackoffConfig {
	fn default() -> Self {
		Self { base: Duration::seconds(30), max: Duration::minutes(15), max_attempts: 5 }
	}
}

fn ensure_positive(field: &'static str, value: Duration) -> Result<(), ConfigError> {
	if value.is_positive() {
		Ok(())
	} else {
		Err(ConfigError::InvalidSetting { field, reason: "must be positive" })
	}
}

mod seconds {
	// crates.io
	use serde::{Deserializer, Serializer};
	// self
	use crate::_prelude::*;

	pub fn serialize<S>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error>
	where
		S: Serializer,
	{
		serializer.serialize_i64(value.whole_seconds())
	}

	pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
	where
		D: Deserializer<'de>,
	{
		i64::deserialize(deserializer).map(Duration::seconds)
	}
}
