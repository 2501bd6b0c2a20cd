//! Multi-tenant OAuth 2.0 gateway core: per-tenant credential caching, single-flight token
//! refresh with strict error classification, a proactive expiry watcher, and an idle-aware
//! session registry for long-lived protocol handlers.

#![deny(clippy::all, missing_docs, unused_crate_dependencies)]

pub mod auth;
pub mod config;
pub mod error;
pub mod gateway;
pub mod http;
pub mod oauth;
pub mod obs;
pub mod provider;
pub mod refresh;
pub mod session;
pub mod store;
pub mod watcher;
#[cfg(all(any(test, feature = "test"), feature = "reqwest"))]
pub mod _preludet {
	//! Convenience re-exports and helpers for integration tests; enabled via `cfg(test)` or the
	//! `test` crate feature.

	pub use crate::_prelude::*;

	// self
	use crate::{
		auth::{ProviderId, TenantId},
		config::GatewayConfig,
		gateway::Gateway,
		http::ReqwestHttpClient,
		oauth::ReqwestTransportErrorMapper,
		provider::{ClientAuthMethod, DefaultProviderStrategy, ProviderDescriptor},
		refresh::{OAuthTokenRefresher, TokenRefresher},
		store::{CredentialStore, MemoryStore},
	};

	/// Refresher type alias used by reqwest-backed integration tests.
	pub type ReqwestTestRefresher = OAuthTokenRefresher<ReqwestHttpClient, ReqwestTransportErrorMapper>;

	/// Builds a reqwest HTTP client that accepts the self-signed certificates produced by
	/// `httpmock` during tests.
	pub fn test_reqwest_http_client() -> ReqwestHttpClient {
		let client = ReqwestClient::builder()
			.danger_accept_invalid_certs(true)
			.danger_accept_invalid_hostnames(true)
			.build()
			.expect("Failed to build insecure Reqwest client for tests.");

		ReqwestHttpClient::with_client(client)
	}

	/// Builds a provider descriptor whose token endpoint points at `token_url`.
	pub fn test_descriptor(provider: &str, token_url: &str) -> ProviderDescriptor {
		let provider_id =
			ProviderId::new(provider).expect("Provider identifier fixture should be valid.");

		ProviderDescriptor::builder(provider_id)
			.token_endpoint(Url::parse(token_url).expect("Token endpoint fixture should parse."))
			.preferred_client_auth_method(ClientAuthMethod::ClientSecretPost)
			.build()
			.expect("Provider descriptor fixture should build successfully.")
	}

	/// Constructs a reqwest-backed refresher with a single registered provider.
	pub fn build_reqwest_test_refresher(
		descriptor: ProviderDescriptor,
		client_id: &str,
		client_secret: &str,
	) -> ReqwestTestRefresher {
		OAuthTokenRefresher::with_http_client(
			test_reqwest_http_client(),
			Arc::new(ReqwestTransportErrorMapper),
			Arc::new(DefaultProviderStrategy),
		)
		.with_provider(descriptor, client_id, Some(client_secret))
		.expect("Test provider registration should succeed.")
	}

	/// Constructs a [`Gateway`] backed by an in-memory store and the reqwest refresher used
	/// across integration tests.
	pub fn build_reqwest_test_gateway(
		descriptor: ProviderDescriptor,
		client_id: &str,
		client_secret: &str,
		config: GatewayConfig,
	) -> (Gateway, Arc<MemoryStore>) {
		let store_backend = Arc::new(MemoryStore::default());
		let store: Arc<dyn CredentialStore> = store_backend.clone();
		let refresher: Arc<dyn TokenRefresher> =
			Arc::new(build_reqwest_test_refresher(descriptor, client_id, client_secret));
		let gateway = Gateway::new(store, refresher, config)
			.expect("Test gateway configuration should be valid.");

		(gateway, store_backend)
	}

	/// Parses a tenant identifier fixture.
	pub fn tenant(value: &str) -> TenantId {
		TenantId::new(value).expect("Tenant identifier fixture should be valid.")
	}
}

mod _prelude {
	pub use std::{
		collections::{BTreeMap, HashMap, VecDeque},
		error::Error as StdError,
		fmt::{Debug, Display, Formatter, Result as FmtResult},
		future::Future,
		pin::Pin,
		str::FromStr,
		sync::{Arc, Weak},
	};

	pub use async_lock::OnceCell as AsyncOnceCell;
	pub use parking_lot::{Mutex, RwLock};
	#[cfg(feature = "reqwest")]
	pub use reqwest::{Client as ReqwestClient, Error as ReqwestError};
	pub use serde::{Deserialize, Serialize};
	pub use thiserror::Error as ThisError;
	pub use time::{Duration, OffsetDateTime};
	pub use url::Url;

	pub use crate::error::{Error, Result};
}

#[cfg(feature = "reqwest")] pub use reqwest;
pub use url;
#[cfg(all(test, feature = "reqwest"))] use {color_eyre as _, httpmock as _};
