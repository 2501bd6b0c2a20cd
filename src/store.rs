//! Credential cache contract and the built-in in-memory implementation.
//!
//! The store maps each tenant to at most one [`CredentialEntry`]. Refresh results land via
//! [`CredentialStore::commit_refresh`], a compare-and-swap on the refresh secret the refresh
//! started from, so a refresh that finishes after a logout or a newer ingestion can never
//! resurrect or clobber state. [`CredentialStore::invalidate_if`] applies the same check to
//! revocations.

pub mod memory;

pub use memory::MemoryStore;

// self
use crate::{
	_prelude::*,
	auth::{CredentialEntry, CredentialStatus, TenantId},
};

/// Boxed future returned by [`CredentialStore`] operations.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StoreError>> + 'a + Send>>;

/// Storage backend contract for per-tenant credentials.
pub trait CredentialStore
where
	Self: Send + Sync,
{
	/// Fetches the entry for `tenant`. Absence is not an error.
	fn fetch<'a>(&'a self, tenant: &'a TenantId) -> StoreFuture<'a, Option<CredentialEntry>>;

	/// Upserts `entry`, replacing any existing entry and stamping `last_refreshed_at`.
	fn save(&self, entry: CredentialEntry) -> StoreFuture<'_, ()>;

	/// Removes the tenant's entry entirely, returning it if present.
	fn invalidate<'a>(&'a self, tenant: &'a TenantId) -> StoreFuture<'a, Option<CredentialEntry>>;

	/// Removes the tenant's entry only if its refresh secret still equals `expected_refresh`.
	///
	/// Returns the removed entry. A newer entry is kept and leaves the `Refreshing` state.
	fn invalidate_if<'a>(
		&'a self,
		tenant: &'a TenantId,
		expected_refresh: Option<&'a str>,
	) -> StoreFuture<'a, Option<CredentialEntry>>;

	/// Lists every tenant that currently has an entry.
	fn tenants(&self) -> StoreFuture<'_, Vec<TenantId>>;

	/// Flips the status flag of an existing entry; returns `false` when the tenant is absent.
	fn mark_status<'a>(
		&'a self,
		tenant: &'a TenantId,
		status: CredentialStatus,
	) -> StoreFuture<'a, bool>;

	/// Atomically installs a refreshed entry if the stored refresh secret still matches.
	fn commit_refresh<'a>(
		&'a self,
		tenant: &'a TenantId,
		expected_refresh: Option<&'a str>,
		replacement: CredentialEntry,
	) -> StoreFuture<'a, CommitOutcome>;
}

/// Result of a refresh commit.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommitOutcome {
	/// The refresh secret matched and the replacement was installed.
	Updated,
	/// A newer credential won (fresh ingestion, or the replacement would move `expires_at`
	/// backwards); the stored entry is returned and kept.
	Superseded(CredentialEntry),
	/// The tenant was invalidated while the refresh was running; nothing was written.
	Missing,
}

/// Error type produced by [`CredentialStore`] implementations.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ThisError)]
pub enum StoreError {
	/// Serialization failures surfaced by the backend.
	#[error("Serialization error: {message}.")]
	Serialization {
		/// Human-readable error payload.
		message: String,
	},
	/// Backend-level failure for the storage engine.
	#[error("Backend failure: {message}.")]
	Backend {
		/// Human-readable error payload.
		message: String,
	},
}

/// Pure predicate: `entry.expires_at - now <= lookahead`.
pub fn is_expiring_soon(entry: &CredentialEntry, lookahead: Duration, now: OffsetDateTime) -> bool {
	entry.is_expiring_soon(lookahead, now)
}
