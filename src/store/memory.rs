//! Thread-safe in-memory [`CredentialStore`] implementation.

// self
use crate::{
	_prelude::*,
	auth::{CredentialEntry, CredentialStatus, TenantId},
	store::{CommitOutcome, CredentialStore, StoreError, StoreFuture},
};

type StoreMap = Arc<RwLock<HashMap<TenantId, CredentialEntry>>>;

/// Process-local credential cache keyed by tenant.
#[derive(Clone, Debug, Default)]
pub struct MemoryStore(StoreMap);
impl MemoryStore {
	/// Number of cached credentials.
	pub fn len(&self) -> usize {
		self.0.read().len()
	}

	/// Returns `true` when no credentials are cached.
	pub fn is_empty(&self) -> bool {
		self.0.read().is_empty()
	}

	fn save_now(map: StoreMap, mut entry: CredentialEntry) -> Result<(), StoreError> {
		entry.last_refreshed_at = OffsetDateTime::now_utc();
		entry.status = CredentialStatus::Active;

		map.write().insert(entry.tenant.clone(), entry);

		Ok(())
	}

	fn mark_now(map: StoreMap, tenant: &TenantId, status: CredentialStatus) -> bool {
		match map.write().get_mut(tenant) {
			Some(entry) => {
				entry.status = status;

				true
			},
			None => false,
		}
	}

	fn invalidate_now(
		map: StoreMap,
		tenant: &TenantId,
		expected_refresh: Option<&str>,
	) -> Option<CredentialEntry> {
		let mut guard = map.write();
		let existing = guard.get_mut(tenant)?;

		if existing.refresh_secret() != expected_refresh {
			if existing.status == CredentialStatus::Refreshing {
				existing.status = CredentialStatus::Active;
			}

			return None;
		}

		guard.remove(tenant)
	}

	fn commit_now(
		map: StoreMap,
		tenant: &TenantId,
		expected_refresh: Option<&str>,
		mut replacement: CredentialEntry,
	) -> CommitOutcome {
		let mut guard = map.write();
		let Some(existing) = guard.get_mut(tenant) else {
			return CommitOutcome::Missing;
		};

		if existing.refresh_secret() != expected_refresh
			|| replacement.expires_at < existing.expires_at
		{
			if existing.status == CredentialStatus::Refreshing {
				existing.status = CredentialStatus::Active;
			}

			return CommitOutcome::Superseded(existing.clone());
		}

		replacement.status = CredentialStatus::Active;
		replacement.last_refreshed_at = OffsetDateTime::now_utc();
		*existing = replacement;

		CommitOutcome::Updated
	}
}
impl CredentialStore for MemoryStore {
	fn fetch<'a>(&'a self, tenant: &'a TenantId) -> StoreFuture<'a, Option<CredentialEntry>> {
		let map = self.0.clone();

		Box::pin(async move { Ok(map.read().get(tenant).cloned()) })
	}

	fn save(&self, entry: CredentialEntry) -> StoreFuture<'_, ()> {
		let map = self.0.clone();

		Box::pin(async move { Self::save_now(map, entry) })
	}

	fn invalidate<'a>(&'a self, tenant: &'a TenantId) -> StoreFuture<'a, Option<CredentialEntry>> {
		let map = self.0.clone();

		Box::pin(async move { Ok(map.write().remove(tenant)) })
	}

	fn invalidate_if<'a>(
		&'a self,
		tenant: &'a TenantId,
		expected_refresh: Option<&'a str>,
	) -> StoreFuture<'a, Option<CredentialEntry>> {
		let map = self.0.clone();

		Box::pin(async move { Ok(Self::invalidate_now(map, tenant, expected_refresh)) })
	}

	fn tenants(&self) -> StoreFuture<'_, Vec<TenantId>> {
		let map = self.0.clone();

		Box::pin(async move {
			let mut tenants = map.read().keys().cloned().collect::<Vec<_>>();

			tenants.sort();

			Ok(tenants)
		})
	}

	fn mark_status<'a>(
		&'a self,
		tenant: &'a TenantId,
		status: CredentialStatus,
	) -> StoreFuture<'a, bool> {
		let map = self.0.clone();

		Box::pin(async move { Ok(Self::mark_now(map, tenant, status)) })
	}

	fn commit_refresh<'a>(
		&'a self,
		tenant: &'a TenantId,
		expected_refresh: Option<&'a str>,
		replacement: CredentialEntry,
	) -> StoreFuture<'a, CommitOutcome> {
		let map = self.0.clone();

		Box::pin(async move { Ok(Self::commit_now(map, tenant, expected_refresh, replacement)) })
	}
}
