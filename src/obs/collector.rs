//! Bounded per-tenant refresh history and the statistics derived from it.

// self
use crate::{_prelude::*, auth::TenantId, error::RefreshErrorKind, obs::RefreshMethod};

/// Default number of refresh records retained per tenant.
pub const DEFAULT_METRICS_RETENTION: usize = 100;

/// One finished refresh attempt.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshMetric {
	/// Tenant whose credential was refreshed.
	pub tenant: TenantId,
	/// Entry point that triggered the refresh.
	pub method: RefreshMethod,
	/// Whether a fresh credential was obtained.
	pub success: bool,
	/// Failure class, when the refresh failed.
	pub error_type: Option<RefreshErrorKind>,
	/// Wall time spent in the refresh, in milliseconds.
	pub duration_ms: u64,
	/// Completion instant.
	#[serde(with = "time::serde::rfc3339")]
	pub timestamp: OffsetDateTime,
}
impl RefreshMetric {
	/// Builds a success record stamped with the current time.
	pub fn success(tenant: TenantId, method: RefreshMethod, elapsed: std::time::Duration) -> Self {
		Self::new(tenant, method, None, elapsed)
	}

	/// Builds a failure record stamped with the current time.
	pub fn failure(
		tenant: TenantId,
		method: RefreshMethod,
		kind: RefreshErrorKind,
		elapsed: std::time::Duration,
	) -> Self {
		Self::new(tenant, method, Some(kind), elapsed)
	}

	fn new(
		tenant: TenantId,
		method: RefreshMethod,
		error_type: Option<RefreshErrorKind>,
		elapsed: std::time::Duration,
	) -> Self {
		Self {
			tenant,
			method,
			success: error_type.is_none(),
			error_type,
			duration_ms: u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
			timestamp: OffsetDateTime::now_utc(),
		}
	}
}

/// Aggregate view over retained refresh records.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct RefreshStats {
	/// Number of retained records.
	pub total: u64,
	/// Successful refreshes.
	pub successes: u64,
	/// Failed refreshes.
	pub failures: u64,
	/// `100 * successes / total`, or `0` when nothing was recorded.
	pub success_rate: f64,
	/// Mean refresh duration in milliseconds, or `0` when nothing was recorded.
	pub average_duration_ms: f64,
	/// Record count per triggering method.
	pub by_method: BTreeMap<RefreshMethod, u64>,
	/// Failure count per error class.
	pub by_error: BTreeMap<RefreshErrorKind, u64>,
}

/// Bounded per-tenant refresh history.
///
/// Each tenant keeps its most recent `retention` records; older ones are evicted first.
/// Recording never fails.
#[derive(Debug)]
pub struct MetricsCollector {
	retention: usize,
	history: Mutex<HashMap<TenantId, VecDeque<RefreshMetric>>>,
}
impl MetricsCollector {
	/// Creates a collector retaining up to `retention` records per tenant (minimum one).
	pub fn new(retention: usize) -> Self {
		Self { retention: retention.max(1), history: Default::default() }
	}

	/// Per-tenant retention limit.
	pub fn retention(&self) -> usize {
		self.retention
	}

	/// Appends `metric` and trims the tenant's history to the retention limit.
	pub fn record(&self, metric: RefreshMetric) {
		let mut history = self.history.lock();
		let records = history.entry(metric.tenant.clone()).or_default();

		records.push_back(metric);

		while records.len() > self.retention {
			records.pop_front();
		}
	}

	/// Drops every record for `tenant`.
	pub fn forget(&self, tenant: &TenantId) {
		self.history.lock().remove(tenant);
	}

	/// Retained records for `tenant`, oldest first.
	pub fn recent(&self, tenant: &TenantId) -> Vec<RefreshMetric> {
		self.history
			.lock()
			.get(tenant)
			.map(|records| records.iter().cloned().collect())
			.unwrap_or_default()
	}

	/// Aggregates one tenant's records, or every tenant's when `tenant` is `None`.
	pub fn stats_for(&self, tenant: Option<&TenantId>) -> RefreshStats {
		let history = self.history.lock();

		match tenant {
			Some(tenant) => summarize(history.get(tenant).into_iter().flatten()),
			None => summarize(history.values().flatten()),
		}
	}
}
impl Default for MetricsCollector {
	fn default() -> Self {
		Self::new(DEFAULT_METRICS_RETENTION)
	}
}

fn summarize<'a>(records: impl Iterator<Item = &'a RefreshMetric>) -> RefreshStats {
	let mut stats = RefreshStats::default();
	let mut total_duration = 0_u128;

	for metric in records {
		stats.total += 1;
		total_duration += u128::from(metric.duration_ms);
		*stats.by_method.entry(metric.method).or_default() += 1;

		match metric.error_type {
			Some(kind) => {
				stats.failures += 1;
				*stats.by_error.entry(kind).or_default() += 1;
			},
			None => stats.successes += 1,
		}
	}

	if stats.total > 0 {
		stats.success_rate = stats.successes as f64 * 100.0 / stats.total as f64;
		stats.average_duration_ms = total_duration as f64 / stats.total as f64;
	}

	stats
}

#[cfg(test)]
mod tests {
	// std
	use std::time::Duration as StdDuration;
	// self
	use super::*;

	fn tenant(value: &str) -> TenantId {
		TenantId::new(value).expect("Tenant fixture should be valid.")
	}

	#[test]
	fn success_rate_matches_recorded_outcomes() {
		let collector = MetricsCollector::default();
		let acme = tenant("acme");

		for _ in 0..3 {
			collector.record(RefreshMetric::success(
				acme.clone(),
				RefreshMethod::Watcher,
				StdDuration::from_millis(10),
			));
		}

		collector.record(RefreshMetric::failure(
			acme.clone(),
			RefreshMethod::Request,
			RefreshErrorKind::TransientService,
			StdDuration::from_millis(30),
		));

		let stats = collector.stats_for(Some(&acme));

		assert_eq!(stats.total, 4);
		assert_eq!(stats.successes, 3);
		assert_eq!(stats.failures, 1);
		assert!((stats.success_rate - 75.0).abs() < f64::EPSILON);
		assert!((stats.average_duration_ms - 15.0).abs() < f64::EPSILON);
		assert_eq!(stats.by_method.get(&RefreshMethod::Watcher), Some(&3));
		assert_eq!(stats.by_error.get(&RefreshErrorKind::TransientService), Some(&1));
	}

	#[test]
	fn retention_evicts_oldest_per_tenant() {
		let collector = MetricsCollector::new(2);
		let acme = tenant("acme");

		collector.record(RefreshMetric::failure(
			acme.clone(),
			RefreshMethod::Manual,
			RefreshErrorKind::Config,
			StdDuration::ZERO,
		));
		collector.record(RefreshMetric::success(acme.clone(), RefreshMethod::Watcher, StdDuration::ZERO));
		collector.record(RefreshMetric::success(acme.clone(), RefreshMethod::Request, StdDuration::ZERO));

		let recent = collector.recent(&acme);

		assert_eq!(recent.len(), 2);
		assert!(recent.iter().all(|metric| metric.success));
		assert_eq!(recent[0].method, RefreshMethod::Watcher);
	}

	#[test]
	fn global_stats_span_tenants_and_empty_is_zeroed() {
		let collector = MetricsCollector::default();

		assert_eq!(collector.stats_for(None), RefreshStats::default());

		collector.record(RefreshMetric::success(tenant("a"), RefreshMethod::Watcher, StdDuration::ZERO));
		collector.record(RefreshMetric::failure(
			tenant("b"),
			RefreshMethod::Watcher,
			RefreshErrorKind::ReauthRequired,
			StdDuration::ZERO,
		));

		let stats = collector.stats_for(None);

		assert_eq!(stats.total, 2);
		assert!((stats.success_rate - 50.0).abs() < f64::EPSILON);
		assert_eq!(collector.stats_for(Some(&tenant("missing"))).total, 0);
	}

	#[test]
	fn stats_serialize_with_label_keys() {
		let collector = MetricsCollector::default();

		collector.record(RefreshMetric::failure(
			tenant("acme"),
			RefreshMethod::Request,
			RefreshErrorKind::Unknown,
			StdDuration::ZERO,
		));

		let json = serde_json::to_value(collector.stats_for(None))
			.expect("Refresh stats should serialize.");

		assert_eq!(json["by_method"]["request"], 1);
		assert_eq!(json["by_error"]["unknown"], 1);
	}
}
