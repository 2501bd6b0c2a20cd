//! Per-tenant credential entry, its status flag, and the builder used by ingestion and
//! refresh.

// self
use crate::{
	_prelude::*,
	auth::{ProviderId, ScopeSet, TenantId, token::secret::TokenSecret},
};

/// Refresh state of a cached credential.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialStatus {
	/// Credential is usable and no refresh is running.
	#[default]
	Active,
	/// A single-flight refresh for the tenant is outstanding.
	Refreshing,
	/// The last refresh failed with a retryable classification; the token is still served
	/// until it expires.
	Failed,
}
impl CredentialStatus {
	/// Returns a stable label suitable for span or metric fields.
	pub const fn as_str(self) -> &'static str {
		match self {
			Self::Active => "active",
			Self::Refreshing => "refreshing",
			Self::Failed => "failed",
		}
	}
}

/// Errors produced by [`CredentialEntryBuilder`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ThisError)]
pub enum CredentialEntryBuilderError {
	/// Issued when no access token value was provided.
	#[error("Access token is required.")]
	MissingAccessToken,
	/// Issued when the access token is blank.
	#[error("Access token cannot be blank.")]
	BlankAccessToken,
	/// Issued when a refresh token was supplied but is blank.
	#[error("Refresh token cannot be blank when present.")]
	BlankRefreshToken,
	/// Issued when no expiry (absolute or relative) was configured.
	#[error("Expiry must be supplied via expires_at or expires_in.")]
	MissingExpiry,
	/// Issued when the relative expiry lands outside the representable date range.
	#[error("Expiry is out of the supported date range.")]
	ExpiryOutOfRange,
}

/// Cached OAuth credential for a single tenant.
///
/// Owned by the credential store; callers receive clones and mutate the cache only through
/// store operations.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialEntry {
	/// Tenant that owns the credential.
	pub tenant: TenantId,
	/// Provider that issued the credential and serves its refresh grant.
	pub provider: ProviderId,
	/// Scopes granted to the access token.
	pub scope: ScopeSet,
	/// Access token secret; callers must avoid logging it.
	pub access_token: TokenSecret,
	/// Refresh token secret, if the provider issued one.
	pub refresh_token: Option<TokenSecret>,
	/// Absolute expiry instant of the access token.
	pub expires_at: OffsetDateTime,
	/// Refresh state flag.
	pub status: CredentialStatus,
	/// Last instant the store accepted a fresh token for the tenant.
	pub last_refreshed_at: OffsetDateTime,
}
impl CredentialEntry {
	/// Returns a builder for the provided tenant/provider pair.
	pub fn builder(tenant: TenantId, provider: ProviderId) -> CredentialEntryBuilder {
		CredentialEntryBuilder::new(tenant, provider)
	}

	/// Returns `true` once `instant` reaches the expiry.
	pub fn is_expired_at(&self, instant: OffsetDateTime) -> bool {
		instant >= self.expires_at
	}

	/// Returns `true` if the credential is expired relative to the current clock.
	pub fn is_expired(&self) -> bool {
		self.is_expired_at(OffsetDateTime::now_utc())
	}

	/// Time left before expiry (negative once expired).
	pub fn remaining_at(&self, instant: OffsetDateTime) -> Duration {
		self.expires_at - instant
	}

	/// Returns `true` when `expires_at - now <= lookahead`.
	pub fn is_expiring_soon(&self, lookahead: Duration, now: OffsetDateTime) -> bool {
		self.remaining_at(now) <= lookahead
	}

	/// Returns `true` if a refresh secret is available.
	pub fn can_refresh(&self) -> bool {
		self.refresh_token.as_ref().is_some_and(|secret| !secret.is_blank())
	}

	/// Exposes the refresh secret for compare-and-swap checks.
	pub fn refresh_secret(&self) -> Option<&str> {
		self.refresh_token.as_ref().map(TokenSecret::expose)
	}
}
impl Debug for CredentialEntry {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("CredentialEntry")
			.field("tenant", &self.tenant)
			.field("provider", &self.provider)
			.field("scope", &self.scope)
			.field("access_token", &"<redacted>")
			.field("refresh_token", &self.refresh_token.as_ref().map(|_| "<redacted>"))
			.field("expires_at", &self.expires_at)
			.field("status", &self.status)
			.field("last_refreshed_at", &self.last_refreshed_at)
			.finish()
	}
}

/// Builder for [`CredentialEntry`].
#[derive(Clone, Debug)]
pub struct CredentialEntryBuilder {
	tenant: TenantId,
	provider: ProviderId,
	scope: ScopeSet,
	access_token: Option<TokenSecret>,
	refresh_token: Option<TokenSecret>,
	issued_at: Option<OffsetDateTime>,
	expires_at: Option<OffsetDateTime>,
	expires_in: Option<Duration>,
}
impl CredentialEntryBuilder {
	fn new(tenant: TenantId, provider: ProviderId) -> Self {
		Self {
			tenant,
			provider,
			scope: ScopeSet::default(),
			access_token: None,
			refresh_token: None,
			issued_at: None,
			expires_at: None,
			expires_in: None,
		}
	}

	/// Sets the granted scopes.
	pub fn scope(mut self, scope: ScopeSet) -> Self {
		self.scope = scope;

		self
	}

	/// Sets the instant `expires_in` is measured from (defaults to now).
	pub fn issued_at(mut self, instant: OffsetDateTime) -> Self {
		self.issued_at = Some(instant);

		self
	}

	/// Sets an absolute expiry instant.
	pub fn expires_at(mut self, instant: OffsetDateTime) -> Self {
		self.expires_at = Some(instant);

		self
	}

	/// Sets a relative expiry duration from the issued instant.
	pub fn expires_in(mut self, duration: Duration) -> Self {
		self.expires_in = Some(duration);

		self
	}

	/// Provides the access token value.
	pub fn access_token(mut self, token: impl Into<String>) -> Self {
		self.access_token = Some(TokenSecret::new(token));

		self
	}

	/// Provides the refresh token value.
	pub fn refresh_token(mut self, token: impl Into<String>) -> Self {
		self.refresh_token = Some(TokenSecret::new(token));

		self
	}

	/// Provides an optional refresh token value.
	pub fn maybe_refresh_token(mut self, token: Option<TokenSecret>) -> Self {
		self.refresh_token = token;

		self
	}

	/// Consumes the builder and produces an [`CredentialStatus::Active`] entry.
	pub fn build(self) -> Result<CredentialEntry, CredentialEntryBuilderError> {
		let access_token =
			self.access_token.ok_or(CredentialEntryBuilderError::MissingAccessToken)?;

		if access_token.is_blank() {
			return Err(CredentialEntryBuilderError::BlankAccessToken);
		}
		if self.refresh_token.as_ref().is_some_and(TokenSecret::is_blank) {
			return Err(CredentialEntryBuilderError::BlankRefreshToken);
		}

		let issued_at = self.issued_at.unwrap_or_else(OffsetDateTime::now_utc);
		let expires_at = match (self.expires_at, self.expires_in) {
			(Some(instant), _) => instant,
			(None, Some(delta)) =>
				issued_at.checked_add(delta).ok_or(CredentialEntryBuilderError::ExpiryOutOfRange)?,
			(None, None) => return Err(CredentialEntryBuilderError::MissingExpiry),
		};

		Ok(CredentialEntry {
			tenant: self.tenant,
			provider: self.provider,
			scope: self.scope,
			access_token,
			refresh_token: self.refresh_token,
			expires_at,
			status: CredentialStatus::Active,
			last_refreshed_at: issued_at,
		})
	}
}
