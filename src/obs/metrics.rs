// self
use crate::{error::RefreshErrorKind, obs::RefreshMethod};

/// Records a finished refresh via the global metrics recorder (when enabled).
///
/// The `outcome` label is `success` or the failure class label.
pub fn record_refresh(
	method: RefreshMethod,
	error: Option<RefreshErrorKind>,
	elapsed: std::time::Duration,
) {
	#[cfg(feature = "metrics")]
	{
		let outcome = error.map_or("success", RefreshErrorKind::as_str);

		metrics::counter!(
			"oauth2_gateway_refresh_total",
			"method" => method.as_str(),
			"outcome" => outcome
		)
		.increment(1);
		metrics::histogram!("oauth2_gateway_refresh_duration_seconds", "method" => method.as_str())
			.record(elapsed.as_secs_f64());
	}

	#[cfg(not(feature = "metrics"))]
	{
		let _ = (method, error, elapsed);
	}
}

/// Publishes the number of live sessions (when enabled).
pub fn record_sessions_active(count: usize) {
	#[cfg(feature = "metrics")]
	{
		metrics::gauge!("oauth2_gateway_sessions_active").set(count as f64);
	}

	#[cfg(not(feature = "metrics"))]
	{
		let _ = count;
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn recorders_are_callable_without_an_installed_exporter() {
		record_refresh(RefreshMethod::Watcher, None, std::time::Duration::from_millis(12));
		record_refresh(
			RefreshMethod::Request,
			Some(RefreshErrorKind::TransientService),
			std::time::Duration::ZERO,
		);
		record_sessions_active(3);
	}
}
