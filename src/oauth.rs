//! Refresh-grant facade over the `oauth2` crate.
//!
//! [`RefreshFacade`] owns one preconfigured `oauth2` client per provider and turns each
//! `grant_type=refresh_token` exchange into either a replacement [`CredentialEntry`] or a
//! classified [`RefreshError`].

pub use oauth2;

// crates.io
use oauth2::{
	AuthType, ClientId, ClientSecret, EndpointNotSet, EndpointSet, HttpClientError, RefreshToken,
	RequestTokenError, TokenResponse, TokenUrl,
	basic::{BasicClient, BasicErrorResponse, BasicRequestTokenError, BasicTokenResponse},
};
// self
use crate::{
	_prelude::*,
	auth::{CredentialEntry, CredentialEntryBuilderError, ScopeSet, TokenSecret},
	error::{ConfigError, RefreshError, RefreshErrorKind},
	http::{ResponseMetadata, ResponseMetadataSlot, TokenHttpClient},
	provider::{ClientAuthMethod, ProviderDescriptor, ProviderErrorContext, ProviderStrategy},
};

type RefreshOnlyClient =
	BasicClient<EndpointNotSet, EndpointNotSet, EndpointNotSet, EndpointNotSet, EndpointSet>;
type FacadeFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, RefreshError>> + 'a + Send>>;

/// Maps HTTP transport failures into classified [`RefreshError`] values.
pub trait TransportErrorMapper<E>
where
	Self: 'static + Send + Sync,
	E: 'static + Send + Sync + StdError,
{
	/// Converts an [`HttpClientError`] emitted by the transport into a refresh failure.
	fn map_transport_error(
		&self,
		strategy: &dyn ProviderStrategy,
		metadata: Option<&ResponseMetadata>,
		error: HttpClientError<E>,
	) -> RefreshError;
}

/// Default mapper for reqwest-backed transports.
///
/// Timeouts and connection failures are network signals; request-building failures are local
/// configuration problems.
#[cfg(feature = "reqwest")]
#[derive(Clone, Debug, Default)]
pub struct ReqwestTransportErrorMapper;
#[cfg(feature = "reqwest")]
impl TransportErrorMapper<ReqwestError> for ReqwestTransportErrorMapper {
	fn map_transport_error(
		&self,
		strategy: &dyn ProviderStrategy,
		meta: Option<&ResponseMetadata>,
		err: HttpClientError<ReqwestError>,
	) -> RefreshError {
		match err {
			HttpClientError::Reqwest(inner) if inner.is_builder() => RefreshError::config(format!(
				"HTTP request to the token endpoint could not be built: {inner}"
			)),
			HttpClientError::Reqwest(inner) if inner.is_timeout() =>
				map_network_error(strategy, meta, "Request timed out while calling the token endpoint"),
			HttpClientError::Reqwest(inner) => map_network_error(
				strategy,
				meta,
				format!("Transport failure while calling the token endpoint: {inner}"),
			),
			HttpClientError::Http(inner) => RefreshError::config(format!(
				"HTTP request to the token endpoint is malformed: {inner}"
			)),
			HttpClientError::Io(inner) => map_network_error(
				strategy,
				meta,
				format!("I/O failure while calling the token endpoint: {inner}"),
			),
			HttpClientError::Other(message) => map_network_error(
				strategy,
				meta,
				format!("HTTP client error occurred while calling the token endpoint: {message}"),
			),
			_ => map_network_error(
				strategy,
				meta,
				"HTTP client error occurred while calling the token endpoint",
			),
		}
	}
}

/// Refresh-only `oauth2` client bound to one provider descriptor and client registration.
pub(crate) struct RefreshFacade<C, M>
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	oauth_client: RefreshOnlyClient,
	http_client: Arc<C>,
	error_mapper: Arc<M>,
}
impl<C, M> RefreshFacade<C, M>
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	pub(crate) fn from_descriptor(
		descriptor: &ProviderDescriptor,
		client_id: &str,
		client_secret: Option<&str>,
		http_client: impl Into<Arc<C>>,
		error_mapper: impl Into<Arc<M>>,
	) -> Result<Self, ConfigError> {
		let token_url = TokenUrl::new(descriptor.token_endpoint.to_string())
			.map_err(|source| ConfigError::InvalidDescriptor { source })?;
		let mut oauth_client =
			BasicClient::new(ClientId::new(client_id.to_owned())).set_token_uri(token_url);

		match descriptor.preferred_client_auth_method {
			ClientAuthMethod::ClientSecretBasic => {
				if let Some(secret) = client_secret {
					oauth_client = oauth_client.set_client_secret(ClientSecret::new(secret.to_owned()));
				}
			},
			ClientAuthMethod::ClientSecretPost => {
				if let Some(secret) = client_secret {
					oauth_client = oauth_client.set_client_secret(ClientSecret::new(secret.to_owned()));
				}

				oauth_client = oauth_client.set_auth_type(AuthType::RequestBody);
			},
			ClientAuthMethod::PublicClient => {
				oauth_client = oauth_client.set_auth_type(AuthType::RequestBody);
			},
		}

		Ok(Self {
			oauth_client,
			http_client: http_client.into(),
			error_mapper: error_mapper.into(),
		})
	}

	/// Performs one refresh exchange for `entry` and builds the replacement entry.
	pub(crate) fn refresh<'a>(
		&'a self,
		strategy: &'a dyn ProviderStrategy,
		entry: &'a CredentialEntry,
	) -> FacadeFuture<'a, CredentialEntry> {
		let meta = ResponseMetadataSlot::default();

		Box::pin(async move {
			let refresh_secret = entry
				.refresh_secret()
				.filter(|secret| !secret.trim().is_empty())
				.ok_or_else(|| RefreshError::reauth("Credential has no refresh token to exchange"))?;
			let refresh_token = RefreshToken::new(refresh_secret.to_owned());
			let instrumented = self.http_client.with_metadata(meta.clone());
			let response = self
				.oauth_client
				.exchange_refresh_token(&refresh_token)
				.request_async(&instrumented)
				.await
				.map_err(|err| {
					map_request_error(strategy, meta.take(), err, self.error_mapper.as_ref())
				})?;

			map_refresh_response(entry, response, OffsetDateTime::now_utc())
		})
	}
}

fn map_refresh_response(
	current: &CredentialEntry,
	response: BasicTokenResponse,
	issued_at: OffsetDateTime,
) -> Result<CredentialEntry, RefreshError> {
	let expires_in = response
		.expires_in()
		.ok_or_else(|| RefreshError::config("Token endpoint response omitted expires_in"))?
		.as_secs();
	let expires_in = i64::try_from(expires_in)
		.map_err(|_| RefreshError::config("Token endpoint returned an out-of-range expires_in"))?;

	if expires_in <= 0 {
		return Err(RefreshError::config("Token endpoint returned a non-positive expires_in"));
	}

	let scope = match response.scopes() {
		Some(scopes) if !scopes.is_empty() => ScopeSet::new(scopes.iter().map(|scope| scope.as_ref()))
			.map_err(|err| RefreshError::unknown(format!("Token endpoint returned invalid scopes: {err}")))?,
		_ => current.scope.clone(),
	};
	let refresh_token = response
		.refresh_token()
		.map(|token| TokenSecret::new(token.secret().to_owned()))
		.or_else(|| current.refresh_token.clone());

	CredentialEntry::builder(current.tenant.clone(), current.provider.clone())
		.scope(scope)
		.access_token(response.access_token().secret().to_owned())
		.maybe_refresh_token(refresh_token)
		.issued_at(issued_at)
		.expires_in(Duration::seconds(expires_in))
		.build()
		.map_err(|err| match err {
			CredentialEntryBuilderError::ExpiryOutOfRange =>
				RefreshError::config("Token endpoint returned an out-of-range expires_in"),
			err => RefreshError::unknown(format!("Token endpoint returned an unusable token: {err}")),
		})
}

fn map_request_error<E, M>(
	strategy: &dyn ProviderStrategy,
	meta: Option<ResponseMetadata>,
	err: BasicRequestTokenError<HttpClientError<E>>,
	mapper: &M,
) -> RefreshError
where
	E: 'static + Send + Sync + StdError,
	M: ?Sized + TransportErrorMapper<E>,
{
	let meta_ref = meta.as_ref();

	match err {
		RequestTokenError::ServerResponse(response) =>
			map_server_response_error(strategy, response, meta_ref),
		RequestTokenError::Request(error) => mapper.map_transport_error(strategy, meta_ref, error),
		RequestTokenError::Parse(error, body) => {
			let ctx = status_context(meta_ref)
				.with_body_preview(String::from_utf8_lossy(&body).into_owned());

			classified(
				strategy.classify_refresh_error(&ctx),
				format!("Token endpoint returned an unparseable response: {error}"),
				meta_ref,
			)
		},
		RequestTokenError::Other(message) => classified(
			strategy.classify_refresh_error(&status_context(meta_ref)),
			format!("Token endpoint returned an unexpected response: {message}"),
			meta_ref,
		),
	}
}

fn map_server_response_error(
	strategy: &dyn ProviderStrategy,
	response: BasicErrorResponse,
	meta: Option<&ResponseMetadata>,
) -> RefreshError {
	let code = response.error().as_ref().to_owned();
	let mut ctx = status_context(meta).with_oauth_error(code.clone());

	if let Some(description) = response.error_description() {
		ctx = ctx.with_error_description(description.clone());
	}

	let message = match response.error_description() {
		Some(description) => format!("{code}: {description}"),
		None => code,
	};

	classified(strategy.classify_refresh_error(&ctx), message, meta)
}

#[cfg_attr(not(feature = "reqwest"), allow(dead_code))]
fn map_network_error(
	strategy: &dyn ProviderStrategy,
	meta: Option<&ResponseMetadata>,
	message: impl Into<String>,
) -> RefreshError {
	let mut ctx = ProviderErrorContext::network_failure();

	ctx.http_status = meta.and_then(|value| value.status);

	classified(strategy.classify_refresh_error(&ctx), message.into(), meta)
}

fn status_context(meta: Option<&ResponseMetadata>) -> ProviderErrorContext {
	match meta.and_then(|value| value.status) {
		Some(status) => ProviderErrorContext::new().with_http_status(status),
		None => ProviderErrorContext::new(),
	}
}

fn classified(
	kind: RefreshErrorKind,
	message: String,
	meta: Option<&ResponseMetadata>,
) -> RefreshError {
	match kind {
		RefreshErrorKind::ReauthRequired => RefreshError::reauth(message),
		RefreshErrorKind::Config => RefreshError::config(message),
		RefreshErrorKind::TransientService => RefreshError::TransientService {
			message,
			status: meta.and_then(|value| value.status),
			retry_after: meta.and_then(|value| value.retry_after),
		},
		RefreshErrorKind::Unknown => RefreshError::unknown(message),
	}
}
