// std
use std::sync::{
	Arc,
	atomic::{AtomicUsize, Ordering},
};
// crates.io
use parking_lot::Mutex;
use time::{Duration, OffsetDateTime};
// self
use oauth2_gateway::{
	auth::{CredentialEntry, ProviderId, TenantId},
	config::{BackoffConfig, GatewayConfig},
	error::RefreshError,
	obs::MetricsCollector,
	refresh::{RefreshFuture, RefreshMethod, RefreshResult, SingleFlightRefresher, TokenRefresher},
	store::{CredentialStore, MemoryStore},
	watcher::{CredentialWatcher, TickReport},
};

#[derive(Default)]
struct ScriptedRefresher {
	calls: AtomicUsize,
	failures: Mutex<Vec<(TenantId, RefreshError)>>,
}
impl ScriptedRefresher {
	fn fail(&self, tenant: &TenantId, err: RefreshError) {
		self.failures.lock().push((tenant.clone(), err));
	}

	fn heal(&self) {
		self.failures.lock().clear();
	}

	fn calls(&self) -> usize {
		self.calls.load(Ordering::SeqCst)
	}
}
impl TokenRefresher for ScriptedRefresher {
	fn refresh<'a>(&'a self, entry: &'a CredentialEntry) -> RefreshFuture<'a> {
		Box::pin(async move {
			let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
			let failure = self
				.failures
				.lock()
				.iter()
				.find(|(tenant, _)| tenant == &entry.tenant)
				.map(|(_, err)| err.clone());

			if let Some(err) = failure {
				return RefreshResult::Failed(err);
			}

			CredentialEntry::builder(entry.tenant.clone(), entry.provider.clone())
				.access_token(format!("access-{call}"))
				.refresh_token(format!("refresh-{call}"))
				.expires_in(Duration::hours(1))
				.build()
				.map_err(|err| RefreshError::unknown(err.to_string()))
				.into()
		})
	}
}

struct Harness {
	store: Arc<MemoryStore>,
	refresher: Arc<ScriptedRefresher>,
	metrics: Arc<MetricsCollector>,
	watcher: Arc<CredentialWatcher>,
}
impl Harness {
	fn new(config: GatewayConfig) -> Self {
		let store = Arc::new(MemoryStore::default());
		let refresher = Arc::new(ScriptedRefresher::default());
		let metrics = Arc::new(MetricsCollector::default());
		let single_flight =
			Arc::new(SingleFlightRefresher::new(store.clone(), refresher.clone(), metrics.clone()));
		let watcher = Arc::new(CredentialWatcher::new(store.clone(), single_flight, &config));

		Self { store, refresher, metrics, watcher }
	}

	async fn seed(&self, tenant: &TenantId, expires_in: Duration) {
		let entry = CredentialEntry::builder(
			tenant.clone(),
			ProviderId::new("notion").expect("Provider fixture should be valid."),
		)
		.access_token("access-0")
		.refresh_token("refresh-0")
		.expires_in(expires_in)
		.build()
		.expect("Entry fixture should build.");

		self.store.save(entry).await.expect("Seeding the store should succeed.");
	}

	async fn access_token(&self, tenant: &TenantId) -> Option<String> {
		self.store
			.fetch(tenant)
			.await
			.expect("Fetching from the store should succeed.")
			.map(|entry| entry.access_token.expose().to_owned())
	}
}

fn tenant(value: &str) -> TenantId {
	TenantId::new(value).expect("Tenant fixture should be valid.")
}

#[tokio::test]
async fn refreshes_credentials_inside_the_lookahead() {
	let harness = Harness::new(GatewayConfig::default().with_lookahead(Duration::seconds(60)));
	let acme = tenant("acme");
	let globex = tenant("globex");

	harness.seed(&acme, Duration::seconds(30)).await;
	harness.seed(&globex, Duration::hours(2)).await;

	let report = harness.watcher.tick().await;

	assert_eq!(report, TickReport { scanned: 2, refreshed: 1, ..Default::default() });
	assert_eq!(harness.refresher.calls(), 1);
	assert_eq!(harness.access_token(&acme).await.as_deref(), Some("access-1"));
	assert_eq!(harness.access_token(&globex).await.as_deref(), Some("access-0"));

	let recent = harness.metrics.recent(&acme);

	assert_eq!(recent.len(), 1);
	assert_eq!(recent[0].method, RefreshMethod::Watcher);
	assert!(recent[0].success);

	let second = harness.watcher.tick().await;

	assert_eq!(second.refreshed, 0);
	assert_eq!(harness.refresher.calls(), 1);
}

#[tokio::test]
async fn one_failing_tenant_does_not_block_the_others() {
	let harness = Harness::new(GatewayConfig::default());
	let acme = tenant("acme");
	let globex = tenant("globex");
	let initech = tenant("initech");

	for tenant in [&acme, &globex, &initech] {
		harness.seed(tenant, Duration::seconds(10)).await;
	}

	harness.refresher.fail(&acme, RefreshError::reauth("invalid_grant"));
	harness.refresher.fail(&globex, RefreshError::transient("server_error"));

	let report = harness.watcher.tick().await;

	assert_eq!(report.scanned, 3);
	assert_eq!(report.refreshed, 1);
	assert_eq!(report.reauth_required, 1);
	assert_eq!(report.retry_later, 1);
	assert_eq!(harness.access_token(&acme).await, None);
	assert_eq!(harness.access_token(&globex).await.as_deref(), Some("access-0"));
	assert_eq!(harness.access_token(&initech).await.as_deref(), Some("access-3"));
	assert_eq!(harness.watcher.attempts(&globex), 1);
}

#[tokio::test]
async fn retryable_failures_back_off_and_give_up() {
	let backoff =
		BackoffConfig { base: Duration::seconds(30), max: Duration::minutes(2), max_attempts: 3 };
	let harness = Harness::new(GatewayConfig::default().with_backoff(backoff));
	let acme = tenant("acme");
	let start = OffsetDateTime::now_utc();

	harness.seed(&acme, Duration::seconds(10)).await;
	harness.refresher.fail(&acme, RefreshError::config("invalid_request"));

	assert_eq!(harness.watcher.tick_at(start).await.retry_later, 1);
	assert_eq!(harness.watcher.tick_at(start + Duration::seconds(10)).await.skipped_backoff, 1);
	assert_eq!(harness.refresher.calls(), 1);

	// First delay is 30s ±10%.
	assert_eq!(harness.watcher.tick_at(start + Duration::seconds(40)).await.retry_later, 1);
	assert_eq!(harness.watcher.attempts(&acme), 2);

	// Second delay is 60s ±10%.
	assert_eq!(harness.watcher.tick_at(start + Duration::seconds(110)).await.retry_later, 1);
	assert_eq!(harness.watcher.attempts(&acme), 3);

	// Attempts exhausted.
	assert_eq!(harness.watcher.tick_at(start + Duration::hours(1)).await.skipped_backoff, 1);
	assert_eq!(harness.refresher.calls(), 3);
	assert_eq!(harness.access_token(&acme).await.as_deref(), Some("access-0"));
}

#[tokio::test]
async fn new_credentials_reset_the_backoff() {
	let harness = Harness::new(GatewayConfig::default());
	let acme = tenant("acme");
	let start = OffsetDateTime::now_utc();

	harness.seed(&acme, Duration::seconds(10)).await;
	harness.refresher.fail(&acme, RefreshError::transient("temporarily_unavailable"));

	assert_eq!(harness.watcher.tick_at(start).await.retry_later, 1);

	harness.refresher.heal();
	harness.seed(&acme, Duration::seconds(20)).await;

	let report = harness.watcher.tick_at(start + Duration::seconds(1)).await;

	assert_eq!(report.refreshed, 1);
	assert_eq!(harness.watcher.attempts(&acme), 0);
}

#[tokio::test]
async fn retry_after_extends_the_backoff() {
	let harness = Harness::new(GatewayConfig::default());
	let acme = tenant("acme");
	let start = OffsetDateTime::now_utc();

	harness.seed(&acme, Duration::seconds(10)).await;
	harness.refresher.fail(
		&acme,
		RefreshError::TransientService {
			message: "slow_down".into(),
			status: Some(429),
			retry_after: Some(Duration::minutes(10)),
		},
	);

	harness.watcher.tick_at(start).await;

	assert_eq!(harness.watcher.tick_at(start + Duration::minutes(5)).await.skipped_backoff, 1);
	assert_eq!(harness.watcher.tick_at(start + Duration::minutes(11)).await.retry_later, 1);
}

#[tokio::test(start_paused = true)]
async fn spawned_watcher_runs_until_shutdown() {
	let harness = Harness::new(GatewayConfig::default().with_watch_interval(Duration::seconds(60)));
	let acme = tenant("acme");

	harness.seed(&acme, Duration::seconds(30)).await;

	let handle = harness.watcher.clone().spawn();

	tokio::time::sleep(std::time::Duration::from_secs(1)).await;

	assert_eq!(harness.refresher.calls(), 1);
	assert!(!handle.is_finished());

	handle.shutdown().await;

	assert_eq!(harness.access_token(&acme).await.as_deref(), Some("access-1"));
}
