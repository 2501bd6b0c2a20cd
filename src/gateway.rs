//! Gateway facade: credential ingestion, the request-path token lookup, logout, and stats.
//!
//! [`Gateway`] wires the store, the refresher, the single-flight coordinator, the watcher, and
//! the metrics collector together. It is cheap to clone; every clone shares the same state.

// self
use crate::{
	_prelude::*,
	auth::{CredentialEntry, ProviderId, ScopeSet, TenantId, TokenSecret},
	config::GatewayConfig,
	error::{RefreshError, ValidationError},
	obs::{self, MetricsCollector, RefreshStats, StatsSnapshot},
	refresh::{RefreshMethod, RefreshResult, SingleFlightRefresher, TokenRefresher},
	session::{SessionFactory, SessionRegistry},
	store::CredentialStore,
	watcher::{CredentialWatcher, WatcherHandle},
};

/// Credential produced by an out-of-band OAuth exchange (signup/login flows).
#[derive(Clone, Serialize, Deserialize)]
pub struct CredentialGrant {
	/// Tenant the credential belongs to.
	pub tenant: TenantId,
	/// Provider that issued the credential.
	pub provider: ProviderId,
	/// Access token.
	pub access_token: String,
	/// Refresh token, when issued.
	#[serde(default)]
	pub refresh_token: Option<String>,
	/// Absolute expiry instant.
	#[serde(default, with = "time::serde::rfc3339::option")]
	pub expires_at: Option<OffsetDateTime>,
	/// Relative expiry in seconds, used when `expires_at` is absent.
	#[serde(default)]
	pub expires_in: Option<i64>,
	/// Granted scopes, comma or space separated.
	#[serde(default)]
	pub scope: Option<String>,
}
impl CredentialGrant {
	/// Creates a grant with an absolute expiry and no refresh token or scope.
	pub fn new(
		tenant: TenantId,
		provider: ProviderId,
		access_token: impl Into<String>,
		expires_at: OffsetDateTime,
	) -> Self {
		Self {
			tenant,
			provider,
			access_token: access_token.into(),
			refresh_token: None,
			expires_at: Some(expires_at),
			expires_in: None,
			scope: None,
		}
	}

	/// Attaches a refresh token.
	pub fn with_refresh_token(mut self, token: impl Into<String>) -> Self {
		self.refresh_token = Some(token.into());

		self
	}

	/// Attaches the granted scopes.
	pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
		self.scope = Some(scope.into());

		self
	}

	fn into_entry(self, now: OffsetDateTime) -> Result<CredentialEntry, ValidationError> {
		let scope = match self.scope.as_deref() {
			Some(raw) if !raw.trim().is_empty() => ScopeSet::parse_lenient(raw)?,
			_ => ScopeSet::default(),
		};
		let mut builder = CredentialEntry::builder(self.tenant, self.provider)
			.scope(scope)
			.access_token(self.access_token)
			.maybe_refresh_token(self.refresh_token.map(TokenSecret::new))
			.issued_at(now);

		if let Some(instant) = self.expires_at {
			builder = builder.expires_at(instant);
		}
		if let Some(seconds) = self.expires_in {
			builder = builder.expires_in(Duration::seconds(seconds));
		}

		Ok(builder.build()?)
	}
}
impl Debug for CredentialGrant {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("CredentialGrant")
			.field("tenant", &self.tenant)
			.field("provider", &self.provider)
			.field("access_token", &"<redacted>")
			.field("refresh_token", &self.refresh_token.as_ref().map(|_| "<redacted>"))
			.field("expires_at", &self.expires_at)
			.field("expires_in", &self.expires_in)
			.field("scope", &self.scope)
			.finish()
	}
}

/// Outcome of [`teardown`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Teardown {
	/// Whether a credential was stored for the tenant.
	pub credential_removed: bool,
	/// Sessions destroyed.
	pub sessions_closed: usize,
}

struct GatewayInner {
	store: Arc<dyn CredentialStore>,
	refresher: Arc<dyn TokenRefresher>,
	single_flight: Arc<SingleFlightRefresher>,
	watcher: Arc<CredentialWatcher>,
	metrics: Arc<MetricsCollector>,
	config: GatewayConfig,
}

/// Multi-tenant credential gateway.
#[derive(Clone)]
pub struct Gateway {
	inner: Arc<GatewayInner>,
}
impl Gateway {
	/// Validates `config` and wires a gateway around `store` and `refresher`.
	pub fn new(
		store: Arc<dyn CredentialStore>,
		refresher: Arc<dyn TokenRefresher>,
		config: GatewayConfig,
	) -> Result<Self> {
		config.validate()?;

		let metrics = Arc::new(MetricsCollector::new(config.metrics_retention));
		let single_flight =
			Arc::new(SingleFlightRefresher::new(store.clone(), refresher.clone(), metrics.clone()));
		let watcher =
			Arc::new(CredentialWatcher::new(store.clone(), single_flight.clone(), &config));

		Ok(Self {
			inner: Arc::new(GatewayInner {
				store,
				refresher,
				single_flight,
				watcher,
				metrics,
				config,
			}),
		})
	}

	/// Active configuration.
	pub fn config(&self) -> &GatewayConfig {
		&self.inner.config
	}

	/// Credential store.
	pub fn store(&self) -> &Arc<dyn CredentialStore> {
		&self.inner.store
	}

	/// Single-flight coordinator shared by the watcher and the request path.
	pub fn single_flight(&self) -> &Arc<SingleFlightRefresher> {
		&self.inner.single_flight
	}

	/// Background watcher (not running until [`Gateway::spawn_watcher`]).
	pub fn watcher(&self) -> &Arc<CredentialWatcher> {
		&self.inner.watcher
	}

	/// Refresh history.
	pub fn metrics(&self) -> &Arc<MetricsCollector> {
		&self.inner.metrics
	}

	/// Starts the watcher on the current tokio runtime.
	pub fn spawn_watcher(&self) -> WatcherHandle {
		self.inner.watcher.clone().spawn()
	}

	/// Validates and stores a freshly issued credential, replacing any previous one.
	pub async fn ingest(&self, grant: CredentialGrant) -> Result<CredentialEntry> {
		if !self.inner.refresher.supports_provider(&grant.provider) {
			return Err(ValidationError::UnknownProvider { provider: grant.provider.to_string() }.into());
		}

		let now = OffsetDateTime::now_utc();
		let entry = grant.into_entry(now)?;

		if entry.is_expired_at(now) && !entry.can_refresh() {
			return Err(ValidationError::AlreadyExpired { tenant: entry.tenant }.into());
		}

		self.inner.store.save(entry.clone()).await?;
		self.inner.watcher.reset(&entry.tenant);

		obs::event!(
			info,
			tenant = entry.tenant.as_str(),
			provider = entry.provider.as_str(),
			token = %entry.access_token.fingerprint(),
			"Credential ingested."
		);

		Ok(entry)
	}

	/// Decodes a JSON [`CredentialGrant`] and ingests it.
	///
	/// Decoding failures report the JSON path of the offending field.
	pub async fn ingest_json(&self, payload: &[u8]) -> Result<CredentialEntry> {
		let mut deserializer = serde_json::Deserializer::from_slice(payload);
		let grant: CredentialGrant = serde_path_to_error::deserialize(&mut deserializer).map_err(
			|err| ValidationError::Payload { path: err.path().to_string(), message: err.inner().to_string() },
		)?;

		self.ingest(grant).await
	}

	/// Returns a usable access token for `tenant`, refreshing it when needed.
	///
	/// Tokens outside the request window are returned as is. Otherwise the call joins or
	/// starts a single-flight refresh; while a refresh is already running, or after a
	/// retryable failure, the current token is served as long as it has not expired.
	/// [`Error::ReauthRequired`] means the tenant must sign in again.
	pub async fn get_valid_token(&self, tenant: &TenantId) -> Result<TokenSecret> {
		let now = OffsetDateTime::now_utc();
		let entry = self.inner.store.fetch(tenant).await?.ok_or_else(|| Error::ReauthRequired {
			tenant: tenant.clone(),
			reason: "No credential is stored for the tenant".into(),
		})?;

		if !entry.is_expiring_soon(self.inner.config.request_window, now) {
			return Ok(entry.access_token);
		}
		if self.inner.single_flight.is_in_flight(tenant) && !entry.is_expired_at(now) {
			return Ok(entry.access_token);
		}

		let result = self.inner.single_flight.refresh_once(tenant, RefreshMethod::Request).await;

		self.settle(tenant, entry, result)
	}

	/// Forces a refresh for `tenant` regardless of its expiry.
	pub async fn refresh_now(&self, tenant: &TenantId) -> Result<CredentialEntry> {
		let result = self.inner.single_flight.refresh_once(tenant, RefreshMethod::Manual).await;

		match result {
			RefreshResult::Refreshed(entry) => {
				self.inner.watcher.reset(tenant);

				Ok(entry)
			},
			RefreshResult::Failed(err) => Err(self.failure(tenant, err)),
		}
	}

	/// Drops the tenant's credential, watcher state, and refresh history. Returns `true` if a
	/// credential was stored.
	///
	/// Pair with [`SessionRegistry::remove_tenant`], or call [`teardown`].
	pub async fn logout(&self, tenant: &TenantId) -> Result<bool> {
		let removed = self.inner.store.invalidate(tenant).await?;

		self.inner.watcher.reset(tenant);
		self.inner.metrics.forget(tenant);

		obs::event!(info, tenant = tenant.as_str(), removed = removed.is_some(), "Tenant logged out.");

		Ok(removed.is_some())
	}

	/// Non-caching token handle for session handlers.
	pub fn token_source(&self, tenant: &TenantId) -> TokenSource {
		TokenSource { gateway: self.clone(), tenant: tenant.clone() }
	}

	/// Refresh statistics for one tenant, or all tenants when `tenant` is `None`.
	pub fn refresh_stats(&self, tenant: Option<&TenantId>) -> RefreshStats {
		self.inner.metrics.stats_for(tenant)
	}

	/// Combined refresh and session statistics.
	pub fn snapshot<F>(&self, registry: &SessionRegistry<F>, tenant: Option<&TenantId>) -> StatsSnapshot
	where
		F: SessionFactory,
	{
		StatsSnapshot::new(self.refresh_stats(tenant), registry.stats())
	}

	fn settle(
		&self,
		tenant: &TenantId,
		previous: CredentialEntry,
		result: RefreshResult,
	) -> Result<TokenSecret> {
		match result {
			RefreshResult::Refreshed(entry) => Ok(entry.access_token),
			RefreshResult::Failed(err) if err.clears_credential() => Err(self.failure(tenant, err)),
			RefreshResult::Failed(err) if !previous.is_expired() => {
				obs::event!(
					info,
					tenant = tenant.as_str(),
					class = err.kind().as_str(),
					"Refresh failed; serving the unexpired token."
				);

				Ok(previous.access_token)
			},
			RefreshResult::Failed(err) => Err(self.failure(tenant, err)),
		}
	}

	fn failure(&self, tenant: &TenantId, err: RefreshError) -> Error {
		if err.clears_credential() {
			self.inner.watcher.reset(tenant);

			Error::ReauthRequired { tenant: tenant.clone(), reason: err.reason().to_owned() }
		} else {
			Error::Refresh { tenant: tenant.clone(), source: err }
		}
	}
}
impl Debug for Gateway {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("Gateway")
			.field("config", &self.inner.config)
			.field("single_flight", &self.inner.single_flight)
			.field("watcher", &self.inner.watcher)
			.finish()
	}
}

/// Per-tenant token handle given to session handlers.
///
/// Every call goes through [`Gateway::get_valid_token`]; nothing is cached, so a handler
/// always sees the latest refreshed or revoked state.
#[derive(Clone)]
pub struct TokenSource {
	gateway: Gateway,
	tenant: TenantId,
}
impl TokenSource {
	/// Tenant the handle serves.
	pub fn tenant(&self) -> &TenantId {
		&self.tenant
	}

	/// Current valid access token.
	pub async fn valid_token(&self) -> Result<TokenSecret> {
		self.gateway.get_valid_token(&self.tenant).await
	}
}
impl Debug for TokenSource {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("TokenSource").field("tenant", &self.tenant).finish()
	}
}

/// Logs the tenant out and destroys all of its sessions.
pub async fn teardown<F>(
	gateway: &Gateway,
	registry: &SessionRegistry<F>,
	tenant: &TenantId,
) -> Result<Teardown>
where
	F: SessionFactory,
{
	let credential_removed = gateway.logout(tenant).await?;
	let sessions_closed = registry.remove_tenant(tenant).await;

	Ok(Teardown { credential_removed, sessions_closed })
}
