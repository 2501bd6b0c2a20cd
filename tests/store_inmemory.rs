// crates.io
use time::{Duration, OffsetDateTime, macros};
// self
use oauth2_gateway::{
	auth::{CredentialEntry, CredentialStatus, ProviderId, ScopeSet, TenantId},
	store::{CommitOutcome, CredentialStore, MemoryStore},
};

fn tenant(value: &str) -> TenantId {
	TenantId::new(value).expect("Failed to build tenant identifier for memory store tests.")
}

fn build_entry(
	tenant: &TenantId,
	access: &str,
	refresh: Option<&str>,
	expires_at: OffsetDateTime,
) -> CredentialEntry {
	let provider = ProviderId::new("notion").expect("Failed to build provider identifier.");
	let scope = ScopeSet::new(["read", "write"]).expect("Failed to build scope set for tests.");
	let mut builder = CredentialEntry::builder(tenant.clone(), provider)
		.scope(scope)
		.access_token(access)
		.issued_at(macros::datetime!(2025-11-10 12:00 UTC))
		.expires_at(expires_at);

	if let Some(value) = refresh {
		builder = builder.refresh_token(value);
	}

	builder.build().expect("Credential entry fixture should build successfully.")
}

fn noon_plus(hours: i64) -> OffsetDateTime {
	macros::datetime!(2025-11-10 12:00 UTC) + Duration::hours(hours)
}

#[tokio::test]
async fn save_fetch_and_replace() {
	let store = MemoryStore::default();
	let acme = tenant("acme");

	store
		.save(build_entry(&acme, "access-1", Some("refresh-1"), noon_plus(1)))
		.await
		.expect("Saving entry fixture into memory store should succeed.");
	store
		.save(build_entry(&acme, "access-2", Some("refresh-2"), noon_plus(2)))
		.await
		.expect("Replacing the entry should succeed.");

	let fetched = store
		.fetch(&acme)
		.await
		.expect("Fetching entry from memory store should succeed.")
		.expect("Stored entry should remain present.");

	assert_eq!(store.len(), 1);
	assert_eq!(fetched.access_token.expose(), "access-2");
	assert_eq!(fetched.refresh_secret(), Some("refresh-2"));
	assert_eq!(fetched.status, CredentialStatus::Active);
	assert!(fetched.last_refreshed_at > macros::datetime!(2025-11-10 12:00 UTC));
	assert!(
		store.fetch(&tenant("globex")).await.expect("Fetching a stranger should succeed.").is_none()
	);
}

#[tokio::test]
async fn invalidate_and_list_tenants() {
	let store = MemoryStore::default();

	for name in ["globex", "acme", "initech"] {
		store
			.save(build_entry(&tenant(name), "access", None, noon_plus(1)))
			.await
			.expect("Saving entry fixture should succeed.");
	}

	let removed = store
		.invalidate(&tenant("globex"))
		.await
		.expect("Invalidation should succeed.")
		.expect("Invalidation should return the removed entry.");

	assert_eq!(removed.tenant, tenant("globex"));
	assert!(
		store.invalidate(&tenant("globex")).await.expect("Second invalidation should succeed.").is_none()
	);
	assert_eq!(
		store.tenants().await.expect("Listing tenants should succeed."),
		vec![tenant("acme"), tenant("initech")]
	);
}

#[tokio::test]
async fn mark_status_requires_an_entry() {
	let store = MemoryStore::default();
	let acme = tenant("acme");

	assert!(
		!store
			.mark_status(&acme, CredentialStatus::Refreshing)
			.await
			.expect("Marking an absent tenant should not error.")
	);

	store
		.save(build_entry(&acme, "access", Some("refresh"), noon_plus(1)))
		.await
		.expect("Saving entry fixture should succeed.");

	assert!(
		store
			.mark_status(&acme, CredentialStatus::Refreshing)
			.await
			.expect("Marking a stored tenant should succeed.")
	);

	let fetched = store
		.fetch(&acme)
		.await
		.expect("Fetching entry should succeed.")
		.expect("Entry should remain present.");

	assert_eq!(fetched.status, CredentialStatus::Refreshing);
}

#[tokio::test]
async fn commit_refresh_checks_the_refresh_secret() {
	let store = MemoryStore::default();
	let acme = tenant("acme");

	store
		.save(build_entry(&acme, "access-old", Some("refresh-old"), noon_plus(1)))
		.await
		.expect("Saving initial entry should succeed.");
	store
		.mark_status(&acme, CredentialStatus::Refreshing)
		.await
		.expect("Marking the entry should succeed.");

	let replacement = build_entry(&acme, "access-new", Some("refresh-new"), noon_plus(2));
	let outcome = store
		.commit_refresh(&acme, Some("refresh-old"), replacement.clone())
		.await
		.expect("Commit should succeed when refresh secrets match.");

	assert_eq!(outcome, CommitOutcome::Updated);

	let fetched = store
		.fetch(&acme)
		.await
		.expect("Fetching updated entry should succeed.")
		.expect("Updated entry should remain present.");

	assert_eq!(fetched.refresh_secret(), Some("refresh-new"));
	assert_eq!(fetched.status, CredentialStatus::Active);

	let stale = store
		.commit_refresh(&acme, Some("refresh-old"), replacement)
		.await
		.expect("Commit should report a stale refresh secret.");

	assert!(matches!(stale, CommitOutcome::Superseded(entry) if entry.access_token.expose() == "access-new"));
}

#[tokio::test]
async fn commit_refresh_never_moves_expiry_backwards() {
	let store = MemoryStore::default();
	let acme = tenant("acme");

	store
		.save(build_entry(&acme, "access-fresh", Some("refresh"), noon_plus(5)))
		.await
		.expect("Saving entry should succeed.");

	let outcome = store
		.commit_refresh(&acme, Some("refresh"), build_entry(&acme, "access-older", None, noon_plus(1)))
		.await
		.expect("Commit should complete.");

	assert!(matches!(outcome, CommitOutcome::Superseded(_)));
}

#[tokio::test]
async fn commit_after_invalidate_does_not_resurrect() {
	let store = MemoryStore::default();
	let acme = tenant("acme");

	store
		.save(build_entry(&acme, "access", Some("refresh"), noon_plus(1)))
		.await
		.expect("Saving entry should succeed.");
	store.invalidate(&acme).await.expect("Invalidation should succeed.");

	let outcome = store
		.commit_refresh(&acme, Some("refresh"), build_entry(&acme, "access-new", None, noon_plus(2)))
		.await
		.expect("Commit should complete.");

	assert_eq!(outcome, CommitOutcome::Missing);
	assert!(store.is_empty());
}

#[tokio::test]
async fn invalidate_if_spares_a_newer_credential() {
	let store = MemoryStore::default();
	let acme = tenant("acme");

	store
		.save(build_entry(&acme, "access-old", Some("refresh-old"), noon_plus(1)))
		.await
		.expect("Saving initial entry should succeed.");
	store
		.mark_status(&acme, CredentialStatus::Refreshing)
		.await
		.expect("Marking the entry should succeed.");
	store
		.save(build_entry(&acme, "access-fresh", Some("refresh-fresh"), noon_plus(2)))
		.await
		.expect("Saving the fresh ingestion should succeed.");
	store
		.mark_status(&acme, CredentialStatus::Refreshing)
		.await
		.expect("Marking the fresh entry should succeed.");

	let removed = store
		.invalidate_if(&acme, Some("refresh-old"))
		.await
		.expect("Conditional invalidation should complete.");

	assert!(removed.is_none());

	let kept = store
		.fetch(&acme)
		.await
		.expect("Fetching the kept entry should succeed.")
		.expect("Fresh entry should survive a stale revocation.");

	assert_eq!(kept.access_token.expose(), "access-fresh");
	assert_eq!(kept.status, CredentialStatus::Active);

	let removed = store
		.invalidate_if(&acme, Some("refresh-fresh"))
		.await
		.expect("Conditional invalidation should complete.")
		.expect("Matching entry should be removed.");

	assert_eq!(removed.access_token.expose(), "access-fresh");
	assert!(store.is_empty());
	assert!(
		store
			.invalidate_if(&acme, Some("refresh-fresh"))
			.await
			.expect("Invalidating an absent tenant should not error.")
			.is_none()
	);
}

#[tokio::test]
async fn concurrent_commits_allow_single_winner() {
	let store = MemoryStore::default();
	let acme = tenant("acme");

	store
		.save(build_entry(&acme, "access-base", Some("refresh-base"), noon_plus(1)))
		.await
		.expect("Saving base entry into memory store should succeed.");

	let tasks = ["a", "b"].map(|label| {
		let store = store.clone();
		let acme = acme.clone();

		tokio::spawn(async move {
			let replacement = build_entry(
				&acme,
				&format!("access-{label}"),
				Some(&format!("refresh-{label}")),
				noon_plus(2),
			);

			store
				.commit_refresh(&acme, Some("refresh-base"), replacement)
				.await
				.expect("Commit task should complete successfully.")
		})
	});
	let mut successes = 0;

	for task in tasks {
		if task.await.expect("Commit task should not panic.") == CommitOutcome::Updated {
			successes += 1;
		}
	}

	assert_eq!(successes, 1, "only one commit should succeed");

	let final_entry = store
		.fetch(&acme)
		.await
		.expect("Fetching final entry should succeed.")
		.expect("Final entry should remain present.");

	assert!(matches!(final_entry.refresh_secret(), Some("refresh-a") | Some("refresh-b")));
}
