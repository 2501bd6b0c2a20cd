//! Refresh statistics plus optional observability hooks.
//!
//! # Feature Flags
//!
//! - Enable `tracing` to emit spans named `oauth2_gateway.refresh` with `tenant` and `method`
//!   fields, plus structured events for watcher and session outcomes.
//! - Enable `metrics` to publish `oauth2_gateway_refresh_total{method,outcome}`,
//!   `oauth2_gateway_refresh_duration_seconds{method}`, and `oauth2_gateway_sessions_active`.
//!
//! [`MetricsCollector`] is always available; it keeps the per-tenant refresh history used by
//! [`MetricsCollector::stats_for`] regardless of the feature set.

mod collector;
mod metrics;
mod tracing;

pub use collector::*;
pub use metrics::*;
pub use tracing::*;

pub(crate) use tracing::event;

// self
use crate::{_prelude::*, session::SessionStats};

/// Entry point that triggered a refresh.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefreshMethod {
	/// Proactive refresh issued by the background watcher.
	Watcher,
	/// On-demand refresh issued by the request path.
	Request,
	/// Refresh requested explicitly by an operator or caller.
	Manual,
}
impl RefreshMethod {
	/// Returns a stable label suitable for span or metric fields.
	pub const fn as_str(self) -> &'static str {
		match self {
			RefreshMethod::Watcher => "watcher",
			RefreshMethod::Request => "request",
			RefreshMethod::Manual => "manual",
		}
	}
}
impl Display for RefreshMethod {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// Serializable view combining refresh and session statistics for dashboards.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct StatsSnapshot {
	/// Refresh statistics, either for one tenant or across all tenants.
	pub refresh: RefreshStats,
	/// Live session statistics.
	pub sessions: SessionStats,
	/// Capture instant.
	#[serde(with = "time::serde::rfc3339")]
	pub captured_at: OffsetDateTime,
}
impl StatsSnapshot {
	/// Combines the two statistic sources into a timestamped snapshot.
	pub fn new(refresh: RefreshStats, sessions: SessionStats) -> Self {
		Self { refresh, sessions, captured_at: OffsetDateTime::now_utc() }
	}
}
