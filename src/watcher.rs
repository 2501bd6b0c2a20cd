//! Background watcher that refreshes credentials before they expire.
//!
//! Every `watch_interval` the watcher scans the store and routes each credential inside the
//! look-ahead window through the [`SingleFlightRefresher`], so proactive refreshes and request
//! path refreshes never race each other. Tenants are processed in isolation: one tenant's
//! failure never aborts the scan.
//!
//! Retryable failures (transient or configuration) put the tenant into bounded exponential
//! backoff. After `max_attempts` consecutive failures the watcher stops proactive retries for
//! that credential until it changes (a request-path refresh, a new ingestion, or a logout).

// crates.io
use rand::Rng;
use tokio::{task::JoinHandle, time::MissedTickBehavior};
use tokio_util::sync::CancellationToken;
// self
use crate::{
	_prelude::*,
	auth::{CredentialEntry, TenantId},
	config::{BackoffConfig, GatewayConfig},
	error::RefreshError,
	obs,
	refresh::{RefreshMethod, RefreshResult, SingleFlightRefresher},
	store::CredentialStore,
};

/// Counters describing one watcher scan.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct TickReport {
	/// Tenants inspected.
	pub scanned: usize,
	/// Credentials refreshed successfully.
	pub refreshed: usize,
	/// Credentials cleared because the provider demands re-authentication.
	pub reauth_required: usize,
	/// Retryable failures left for a later scan.
	pub retry_later: usize,
	/// Tenants skipped because they are still backing off.
	pub skipped_backoff: usize,
	/// Tenants whose credential could not be read from the store.
	pub store_errors: usize,
}

#[derive(Clone, Debug)]
struct RetryState {
	attempts: u32,
	next_attempt_at: OffsetDateTime,
	// Expiry of the credential that failed; any change means a new credential.
	expires_at: OffsetDateTime,
}

/// Proactive refresher driven by a fixed interval.
pub struct CredentialWatcher {
	store: Arc<dyn CredentialStore>,
	single_flight: Arc<SingleFlightRefresher>,
	interval: Duration,
	lookahead: Duration,
	backoff: BackoffConfig,
	retries: Mutex<HashMap<TenantId, RetryState>>,
}
impl CredentialWatcher {
	/// Creates a watcher using the interval, look-ahead, and backoff from `config`.
	pub fn new(
		store: Arc<dyn CredentialStore>,
		single_flight: Arc<SingleFlightRefresher>,
		config: &GatewayConfig,
	) -> Self {
		Self {
			store,
			single_flight,
			interval: config.watch_interval,
			lookahead: config.lookahead,
			backoff: config.backoff.clone(),
			retries: Default::default(),
		}
	}

	/// Runs one scan against the current clock.
	pub async fn tick(&self) -> TickReport {
		self.tick_at(OffsetDateTime::now_utc()).await
	}

	/// Runs one scan treating `now` as the current instant.
	pub async fn tick_at(&self, now: OffsetDateTime) -> TickReport {
		let mut report = TickReport::default();
		let tenants = match self.store.tenants().await {
			Ok(tenants) => tenants,
			Err(err) => {
				obs::event!(warn, error = %err, "Watcher could not list tenants.");

				report.store_errors += 1;

				return report;
			},
		};

		for tenant in tenants {
			report.scanned += 1;

			self.process(&tenant, now, &mut report).await;
		}

		obs::event!(
			debug,
			scanned = report.scanned,
			refreshed = report.refreshed,
			reauth_required = report.reauth_required,
			retry_later = report.retry_later,
			skipped_backoff = report.skipped_backoff,
			"Watcher scan finished."
		);

		report
	}

	/// Forgets any backoff state for `tenant`.
	pub fn reset(&self, tenant: &TenantId) {
		self.retries.lock().remove(tenant);
	}

	/// Consecutive retryable failures recorded for `tenant`.
	pub fn attempts(&self, tenant: &TenantId) -> u32 {
		self.retries.lock().get(tenant).map_or(0, |state| state.attempts)
	}

	/// Starts the periodic scan on the current tokio runtime.
	///
	/// The first scan runs immediately.
	pub fn spawn(self: Arc<Self>) -> WatcherHandle {
		let cancel = CancellationToken::new();
		let token = cancel.clone();
		let period = self.interval.unsigned_abs();
		let task = tokio::spawn(async move {
			let mut ticker = tokio::time::interval(period);

			ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

			loop {
				tokio::select! {
					_ = token.cancelled() => {
						obs::event!(debug, "Watcher loop cancelled.");

						break;
					}
					_ = ticker.tick() => {
						self.tick().await;
					}
				}
			}
		});

		WatcherHandle { cancel, task }
	}

	async fn process(&self, tenant: &TenantId, now: OffsetDateTime, report: &mut TickReport) {
		let entry = match self.store.fetch(tenant).await {
			Ok(Some(entry)) => entry,
			Ok(None) => return,
			Err(err) => {
				obs::event!(warn, tenant = tenant.as_str(), error = %err, "Watcher could not load credential.");

				report.store_errors += 1;

				return;
			},
		};

		if !entry.is_expiring_soon(self.lookahead, now) {
			return;
		}
		if self.backing_off(&entry, now) {
			report.skipped_backoff += 1;

			return;
		}

		match self.single_flight.refresh_once(tenant, RefreshMethod::Watcher).await {
			RefreshResult::Refreshed(_) => {
				self.reset(tenant);

				report.refreshed += 1;
			},
			RefreshResult::Failed(err) if err.clears_credential() => {
				self.reset(tenant);

				obs::event!(
					warn,
					tenant = tenant.as_str(),
					class = err.kind().as_str(),
					"Credential cleared; tenant must re-authenticate."
				);

				report.reauth_required += 1;
			},
			RefreshResult::Failed(err) => {
				self.schedule_retry(&entry, &err, now);

				report.retry_later += 1;
			},
		}
	}

	fn backing_off(&self, entry: &CredentialEntry, now: OffsetDateTime) -> bool {
		let mut retries = self.retries.lock();
		let Some(state) = retries.get(&entry.tenant) else {
			return false;
		};

		if state.expires_at != entry.expires_at {
			retries.remove(&entry.tenant);

			return false;
		}

		state.attempts >= self.backoff.max_attempts || now < state.next_attempt_at
	}

	fn schedule_retry(&self, entry: &CredentialEntry, err: &RefreshError, now: OffsetDateTime) {
		let mut retries = self.retries.lock();
		let state = retries.entry(entry.tenant.clone()).or_insert(RetryState {
			attempts: 0,
			next_attempt_at: now,
			expires_at: entry.expires_at,
		});

		if state.expires_at != entry.expires_at {
			state.attempts = 0;
			state.expires_at = entry.expires_at;
		}

		state.attempts += 1;

		let delay = jitter(self.backoff.delay_for(state.attempts))
			.max(err.retry_after().unwrap_or(Duration::ZERO));

		state.next_attempt_at = now + delay;

		if state.attempts >= self.backoff.max_attempts {
			obs::event!(
				warn,
				tenant = entry.tenant.as_str(),
				attempts = state.attempts,
				"Watcher stopped retrying the credential; the request path can still refresh it."
			);
		} else {
			obs::event!(
				info,
				tenant = entry.tenant.as_str(),
				attempts = state.attempts,
				class = err.kind().as_str(),
				retry_in_secs = delay.whole_seconds(),
				"Refresh failed; retrying later."
			);
		}
	}
}
impl Debug for CredentialWatcher {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("CredentialWatcher")
			.field("interval", &self.interval)
			.field("lookahead", &self.lookahead)
			.field("backoff", &self.backoff)
			.field("backing_off", &self.retries.lock().len())
			.finish()
	}
}

/// Handle to a spawned watcher task.
#[derive(Debug)]
pub struct WatcherHandle {
	cancel: CancellationToken,
	task: JoinHandle<()>,
}
impl WatcherHandle {
	/// Returns `true` once the task has exited.
	pub fn is_finished(&self) -> bool {
		self.task.is_finished()
	}

	/// Token that stops the watcher when cancelled.
	pub fn cancellation_token(&self) -> CancellationToken {
		self.cancel.clone()
	}

	/// Cancels the watcher and waits for the in-progress scan, if any, to finish.
	pub async fn shutdown(self) {
		self.cancel.cancel();

		if let Err(err) = self.task.await {
			obs::event!(warn, error = %err, "Watcher task ended abnormally.");
		}
	}
}

// ±10%.
fn jitter(delay: Duration) -> Duration {
	let factor: f64 = rand::rng().random_range(0.9..1.1);

	delay * factor
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn jitter_stays_within_ten_percent() {
		let base = Duration::seconds(100);

		for _ in 0..64 {
			let delay = jitter(base);

			assert!(delay >= Duration::seconds(89) && delay <= Duration::seconds(111));
		}
	}
}
