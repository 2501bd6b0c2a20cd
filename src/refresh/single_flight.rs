//! Per-tenant single-flight refresh coordination.
//!
//! Concurrent callers for one tenant share a single in-flight marker. The first caller
//! (the leader) performs the upstream exchange, applies the outcome to the store, records a
//! [`RefreshMetric`], and clears the marker before publishing the result, so every waiter
//! observes the committed store state when it wakes. If the leader's future is dropped
//! mid-flight, its marker is released and the entry's status restored; a waiter already
//! queued on the flight takes over.

// self
use crate::{
	_prelude::*,
	auth::{CredentialEntry, CredentialStatus, TenantId},
	error::RefreshError,
	obs::{self, MetricsCollector, RefreshMethod, RefreshMetric, RefreshSpan},
	refresh::{RefreshResult, TokenRefresher},
	store::{CommitOutcome, CredentialStore},
};

type Flight = Arc<AsyncOnceCell<RefreshResult>>;

/// Deduplicates refreshes so each tenant has at most one upstream exchange in flight.
pub struct SingleFlightRefresher {
	store: Arc<dyn CredentialStore>,
	refresher: Arc<dyn TokenRefresher>,
	metrics: Arc<MetricsCollector>,
	flights: Mutex<HashMap<TenantId, Flight>>,
}
impl SingleFlightRefresher {
	/// Creates a coordinator over the given store, refresher, and metrics sink.
	pub fn new(
		store: Arc<dyn CredentialStore>,
		refresher: Arc<dyn TokenRefresher>,
		metrics: Arc<MetricsCollector>,
	) -> Self {
		Self { store, refresher, metrics, flights: Default::default() }
	}

	/// Returns `true` while a refresh for `tenant` is outstanding.
	pub fn is_in_flight(&self, tenant: &TenantId) -> bool {
		self.flights.lock().contains_key(tenant)
	}

	/// Number of tenants with an outstanding refresh.
	pub fn in_flight(&self) -> usize {
		self.flights.lock().len()
	}

	/// Refreshes `tenant`, joining the in-flight refresh when one exists.
	///
	/// Every concurrent caller receives an equal [`RefreshResult`]. A tenant without a stored
	/// credential yields [`RefreshError::ReauthRequired`] without contacting the provider.
	pub async fn refresh_once(&self, tenant: &TenantId, method: RefreshMethod) -> RefreshResult {
		let flight = self.flights.lock().entry(tenant.clone()).or_default().clone();

		flight.get_or_init(|| self.lead(tenant, method, &flight)).await.clone()
	}

	async fn lead(&self, tenant: &TenantId, method: RefreshMethod, flight: &Flight) -> RefreshResult {
		// A waiter taking over from a dropped leader republishes the marker.
		self.flights.lock().entry(tenant.clone()).or_insert_with(|| flight.clone());

		let mut lease = FlightLease { owner: self, tenant, flight, settled: false };
		let result = RefreshSpan::new(tenant, method).instrument(self.run(tenant, method)).await;

		lease.settled = true;

		result
	}

	async fn run(&self, tenant: &TenantId, method: RefreshMethod) -> RefreshResult {
		let current = match self.store.fetch(tenant).await {
			Ok(Some(entry)) => entry,
			Ok(None) =>
				return RefreshResult::Failed(RefreshError::reauth(
					"No credential is stored for the tenant",
				)),
			Err(err) =>
				return RefreshResult::Failed(RefreshError::transient(format!(
					"Credential store is unavailable: {err}"
				))),
		};

		if let Err(err) = self.store.mark_status(tenant, CredentialStatus::Refreshing).await {
			obs::event!(warn, tenant = tenant.as_str(), error = %err, "Failed to mark credential as refreshing.");
		}

		let started = tokio::time::Instant::now();
		let outcome = self.refresher.refresh(&current).await;
		let result = self.apply(tenant, &current, outcome).await;
		let elapsed = started.elapsed();
		let metric = match &result {
			RefreshResult::Refreshed(entry) => {
				obs::event!(
					info,
					tenant = tenant.as_str(),
					method = method.as_str(),
					token = %entry.access_token.fingerprint(),
					"Credential refreshed."
				);

				RefreshMetric::success(tenant.clone(), method, elapsed)
			},
			RefreshResult::Failed(err) => {
				obs::event!(
					warn,
					tenant = tenant.as_str(),
					method = method.as_str(),
					class = err.kind().as_str(),
					error = %err,
					"Credential refresh failed."
				);

				RefreshMetric::failure(tenant.clone(), method, err.kind(), elapsed)
			},
		};

		obs::record_refresh(method, metric.error_type, elapsed);
		self.metrics.record(metric);

		result
	}

	// Store writes happen here so the committed state is visible before waiters resume.
	async fn apply(
		&self,
		tenant: &TenantId,
		current: &CredentialEntry,
		outcome: RefreshResult,
	) -> RefreshResult {
		match outcome {
			RefreshResult::Refreshed(replacement) => {
				match self
					.store
					.commit_refresh(tenant, current.refresh_secret(), replacement.clone())
					.await
				{
					Ok(CommitOutcome::Updated) => RefreshResult::Refreshed(replacement),
					Ok(CommitOutcome::Superseded(newer)) => RefreshResult::Refreshed(newer),
					Ok(CommitOutcome::Missing) => RefreshResult::Failed(RefreshError::reauth(
						"Credential was removed while the refresh was in flight",
					)),
					Err(err) => {
						self.mark_failed(tenant).await;

						RefreshResult::Failed(RefreshError::transient(format!(
							"Refreshed credential could not be stored: {err}"
						)))
					},
				}
			},
			RefreshResult::Failed(err) if err.clears_credential() => {
				self.discard(tenant, current).await;

				RefreshResult::Failed(err)
			},
			RefreshResult::Failed(err) => {
				self.mark_failed(tenant).await;

				RefreshResult::Failed(err)
			},
		}
	}

	// Only drops the credential the refresh started from; a newer ingestion survives.
	async fn discard(&self, tenant: &TenantId, current: &CredentialEntry) {
		if let Err(err) = self.store.invalidate_if(tenant, current.refresh_secret()).await {
			obs::event!(warn, tenant = tenant.as_str(), error = %err, "Failed to invalidate credential.");
		}
	}

	async fn mark_failed(&self, tenant: &TenantId) {
		self.reset_status(tenant, CredentialStatus::Failed).await;
	}

	async fn reset_status(&self, tenant: &TenantId, status: CredentialStatus) {
		if let Err(err) = self.store.mark_status(tenant, status).await {
			obs::event!(
				warn,
				tenant = tenant.as_str(),
				status = status.as_str(),
				error = %err,
				"Failed to update credential status."
			);
		}
	}

	fn release(&self, tenant: &TenantId, flight: &Flight) {
		let mut flights = self.flights.lock();

		if flights.get(tenant).is_some_and(|current| Arc::ptr_eq(current, flight)) {
			flights.remove(tenant);
		}
	}
}
impl Debug for SingleFlightRefresher {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("SingleFlightRefresher").field("in_flight", &self.in_flight()).finish()
	}
}

// Releases the marker when the leader finishes or is dropped mid-flight.
struct FlightLease<'a> {
	owner: &'a SingleFlightRefresher,
	tenant: &'a TenantId,
	flight: &'a Flight,
	settled: bool,
}
impl Drop for FlightLease<'_> {
	fn drop(&mut self) {
		self.owner.release(self.tenant, self.flight);

		if self.settled {
			return;
		}

		obs::event!(warn, tenant = self.tenant.as_str(), "Refresh leader was dropped mid-flight.");

		// Without a runtime the status stays stale until the next refresh rewrites it.
		if tokio::runtime::Handle::try_current().is_ok() {
			let store = self.owner.store.clone();
			let tenant = self.tenant.clone();

			tokio::spawn(async move {
				if let Err(err) = store.mark_status(&tenant, CredentialStatus::Active).await {
					obs::event!(
						warn,
						tenant = tenant.as_str(),
						error = %err,
						"Failed to restore credential status after a dropped refresh."
					);
				}
			});
		}
	}
}
