//! Token refresh contract, the `oauth2`-backed refresher, and the single-flight coordinator.
//!
//! [`TokenRefresher`] performs exactly one upstream exchange per call and reports a closed
//! [`RefreshResult`]. It never touches the credential store; applying results is the job of
//! [`SingleFlightRefresher`], which also guarantees at most one exchange per tenant at a time.

pub mod single_flight;

pub use single_flight::*;

pub use crate::obs::RefreshMethod;

// self
use crate::{
	_prelude::*,
	auth::{CredentialEntry, ProviderId},
	error::{ConfigError, RefreshError},
	http::TokenHttpClient,
	oauth::{RefreshFacade, TransportErrorMapper},
	provider::{ProviderDescriptor, ProviderStrategy},
};
#[cfg(feature = "reqwest")]
use crate::{http::ReqwestHttpClient, oauth::ReqwestTransportErrorMapper};

/// Boxed future returned by [`TokenRefresher::refresh`].
pub type RefreshFuture<'a> = Pin<Box<dyn Future<Output = RefreshResult> + 'a + Send>>;

#[cfg(feature = "reqwest")]
/// Refresher specialized for the crate's default reqwest transport stack.
pub type ReqwestTokenRefresher = OAuthTokenRefresher<ReqwestHttpClient, ReqwestTransportErrorMapper>;

/// Outcome of a single refresh exchange.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RefreshResult {
	/// The provider issued a fresh credential.
	Refreshed(CredentialEntry),
	/// The exchange failed with a classified error.
	Failed(RefreshError),
}
impl RefreshResult {
	/// Returns `true` for [`RefreshResult::Refreshed`].
	pub fn is_refreshed(&self) -> bool {
		matches!(self, Self::Refreshed(_))
	}

	/// Refreshed entry, if any.
	pub fn entry(&self) -> Option<&CredentialEntry> {
		match self {
			Self::Refreshed(entry) => Some(entry),
			Self::Failed(_) => None,
		}
	}

	/// Classified failure, if any.
	pub fn error(&self) -> Option<&RefreshError> {
		match self {
			Self::Refreshed(_) => None,
			Self::Failed(err) => Some(err),
		}
	}

	/// Converts into a standard [`Result`].
	pub fn into_result(self) -> Result<CredentialEntry, RefreshError> {
		match self {
			Self::Refreshed(entry) => Ok(entry),
			Self::Failed(err) => Err(err),
		}
	}
}
impl From<Result<CredentialEntry, RefreshError>> for RefreshResult {
	fn from(result: Result<CredentialEntry, RefreshError>) -> Self {
		match result {
			Ok(entry) => Self::Refreshed(entry),
			Err(err) => Self::Failed(err),
		}
	}
}

/// Performs one refresh exchange for a credential.
///
/// Implementations must be side-effect free with respect to the credential store.
pub trait TokenRefresher
where
	Self: Send + Sync,
{
	/// Exchanges `entry`'s refresh token for a replacement credential.
	fn refresh<'a>(&'a self, entry: &'a CredentialEntry) -> RefreshFuture<'a>;

	/// Returns `true` when credentials issued by `provider` can be refreshed.
	fn supports_provider(&self, provider: &ProviderId) -> bool {
		let _ = provider;

		true
	}
}

/// [`TokenRefresher`] backed by the `oauth2` crate, serving any number of providers.
///
/// Each registered provider gets a preconfigured refresh client; entries are routed by
/// [`CredentialEntry::provider`].
pub struct OAuthTokenRefresher<C, M>
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	http_client: Arc<C>,
	transport_mapper: Arc<M>,
	strategy: Arc<dyn ProviderStrategy>,
	providers: HashMap<ProviderId, RefreshFacade<C, M>>,
}
impl<C, M> OAuthTokenRefresher<C, M>
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	/// Creates a refresher that reuses the caller-provided transport + mapper pair.
	pub fn with_http_client(
		http_client: impl Into<Arc<C>>,
		mapper: impl Into<Arc<M>>,
		strategy: Arc<dyn ProviderStrategy>,
	) -> Self {
		Self {
			http_client: http_client.into(),
			transport_mapper: mapper.into(),
			strategy,
			providers: HashMap::new(),
		}
	}

	/// Registers a provider and the gateway's client registration with it.
	///
	/// `client_secret` is ignored for [`ClientAuthMethod::PublicClient`] descriptors.
	///
	/// [`ClientAuthMethod::PublicClient`]: crate::provider::ClientAuthMethod::PublicClient
	pub fn with_provider(
		mut self,
		descriptor: ProviderDescriptor,
		client_id: impl AsRef<str>,
		client_secret: Option<&str>,
	) -> Result<Self> {
		if self.providers.contains_key(&descriptor.id) {
			return Err(ConfigError::DuplicateProvider { provider: descriptor.id.to_string() }.into());
		}

		let facade = <RefreshFacade<C, M>>::from_descriptor(
			&descriptor,
			client_id.as_ref(),
			client_secret,
			self.http_client.clone(),
			self.transport_mapper.clone(),
		)?;

		self.providers.insert(descriptor.id, facade);

		Ok(self)
	}

	/// Identifiers of every registered provider.
	pub fn providers(&self) -> impl Iterator<Item = &ProviderId> {
		self.providers.keys()
	}
}
#[cfg(feature = "reqwest")]
impl OAuthTokenRefresher<ReqwestHttpClient, ReqwestTransportErrorMapper> {
	/// Creates a refresher with its own reqwest transport.
	pub fn new(strategy: Arc<dyn ProviderStrategy>) -> Self {
		Self::with_http_client(
			ReqwestHttpClient::default(),
			Arc::new(ReqwestTransportErrorMapper),
			strategy,
		)
	}
}
impl<C, M> Debug for OAuthTokenRefresher<C, M>
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		let mut providers = self.providers.keys().map(ProviderId::as_str).collect::<Vec<_>>();

		providers.sort_unstable();

		f.debug_struct("OAuthTokenRefresher").field("providers", &providers).finish()
	}
}
impl<C, M> TokenRefresher for OAuthTokenRefresher<C, M>
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	fn refresh<'a>(&'a self, entry: &'a CredentialEntry) -> RefreshFuture<'a> {
		Box::pin(async move {
			let Some(facade) = self.providers.get(&entry.provider) else {
				return RefreshResult::Failed(RefreshError::config(format!(
					"Provider {} is not registered with the refresher",
					entry.provider
				)));
			};

			facade.refresh(self.strategy.as_ref(), entry).await.into()
		})
	}

	fn supports_provider(&self, provider: &ProviderId) -> bool {
		self.providers.contains_key(provider)
	}
}

#[cfg(all(test, feature = "reqwest"))]
mod tests {
	// self
	use super::*;
	use crate::{
		_preludet::{tenant, test_descriptor},
		error::RefreshErrorKind,
		provider::DefaultProviderStrategy,
	};

	fn refresher() -> ReqwestTokenRefresher {
		OAuthTokenRefresher::new(Arc::new(DefaultProviderStrategy))
			.with_provider(test_descriptor("notion", "https://example.com/token"), "id", Some("secret"))
			.expect("Provider registration should succeed.")
	}

	#[test]
	fn duplicate_providers_are_rejected() {
		let err = refresher()
			.with_provider(test_descriptor("notion", "https://example.com/other"), "id", None)
			.expect_err("Duplicate registration should fail.");

		assert!(matches!(err, Error::Config(ConfigError::DuplicateProvider { .. })));
	}

	#[tokio::test]
	async fn unregistered_provider_is_a_config_failure() {
		let refresher = refresher();
		let stranger = ProviderId::new("figma").expect("Provider fixture should be valid.");
		let entry = CredentialEntry::builder(tenant("acme"), stranger.clone())
			.access_token("access")
			.refresh_token("refresh")
			.expires_in(Duration::minutes(1))
			.build()
			.expect("Entry fixture should build.");

		assert!(!refresher.supports_provider(&stranger));

		let result = refresher.refresh(&entry).await;

		assert_eq!(result.error().map(RefreshError::kind), Some(RefreshErrorKind::Config));
	}

	#[tokio::test]
	async fn entry_without_refresh_token_requires_reauth() {
		let refresher = refresher();
		let entry = CredentialEntry::builder(
			tenant("acme"),
			ProviderId::new("notion").expect("Provider fixture should be valid."),
		)
		.access_token("access")
		.expires_in(Duration::minutes(1))
		.build()
		.expect("Entry fixture should build.");
		let result = refresher.refresh(&entry).await;

		assert_eq!(result.error().map(RefreshError::kind), Some(RefreshErrorKind::ReauthRequired));
	}
}
