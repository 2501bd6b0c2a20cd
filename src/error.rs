//! Gateway-level error types shared across the store, refresher, watcher, and sessions.

// self
use crate::{
	_prelude::*,
	auth::{CredentialEntryBuilderError, IdentifierError, ScopeValidationError, SessionId, TenantId},
};

/// Gateway-wide result type alias returning [`Error`] by default.
pub type Result<T, E = Error> = std::result::Result<T, E>;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Canonical gateway error exposed by public APIs.
#[derive(Debug, ThisError)]
pub enum Error {
	/// The tenant's credential is gone or was rejected; the end user must re-authenticate.
	#[error("Tenant {tenant} must re-authenticate: {reason}.")]
	ReauthRequired {
		/// Tenant whose credential is unusable.
		tenant: TenantId,
		/// Classified reason string.
		reason: String,
	},
	/// A retryable refresh failure left the tenant without a usable token for now.
	#[error("Refreshing the credential for tenant {tenant} failed.")]
	Refresh {
		/// Tenant whose refresh failed.
		tenant: TenantId,
		/// Classified refresh failure.
		#[source]
		source: RefreshError,
	},
	/// Malformed ingestion input.
	#[error(transparent)]
	Validation(#[from] ValidationError),
	/// Registry miss for a tenant/transport session pair.
	#[error("No live session exists for tenant {tenant} and session {session}.")]
	SessionNotFound {
		/// Tenant component of the session key.
		tenant: TenantId,
		/// Transport session component of the session key.
		session: SessionId,
	},
	/// Session handler construction or transport failure.
	#[error(transparent)]
	Session(#[from] crate::session::SessionError),
	/// Storage-layer failure.
	#[error("{0}")]
	Storage(
		#[from]
		#[source]
		crate::store::StoreError,
	),
	/// Local configuration problem.
	#[error(transparent)]
	Config(#[from] ConfigError),
}
impl Error {
	/// Returns `true` for the condition adapters surface as "please re-authenticate".
	pub fn is_reauth_required(&self) -> bool {
		matches!(self, Self::ReauthRequired { .. })
	}
}

/// Classified outcome of a failed refresh exchange.
///
/// The enum is closed so every upstream signal lands in exactly one class; see
/// [`RefreshErrorKind`] for the action attached to each class.
#[derive(Clone, Debug, PartialEq, Eq, ThisError)]
pub enum RefreshError {
	/// The grant or client was rejected; the credential must be cleared.
	#[error("Authorization server rejected the refresh grant: {reason}.")]
	ReauthRequired {
		/// Provider- or gateway-supplied reason string.
		reason: String,
	},
	/// The refresh request is malformed or unsupported; an operator must intervene.
	#[error("Refresh request is misconfigured: {reason}.")]
	Config {
		/// Provider- or gateway-supplied reason string.
		reason: String,
	},
	/// The authorization server or network failed temporarily; retry later.
	#[error("Authorization server is temporarily unavailable: {message}.")]
	TransientService {
		/// Provider- or gateway-supplied message summarizing the failure.
		message: String,
		/// HTTP status code, when available.
		status: Option<u16>,
		/// Retry-After hint from upstream, if supplied.
		retry_after: Option<Duration>,
	},
	/// The upstream response could not be classified.
	#[error("Refresh failed with an unrecognized response: {reason}.")]
	Unknown {
		/// Provider- or gateway-supplied reason string.
		reason: String,
	},
}
impl RefreshError {
	/// Builds a [`RefreshError::ReauthRequired`].
	pub fn reauth(reason: impl Into<String>) -> Self {
		Self::ReauthRequired { reason: reason.into() }
	}

	/// Builds a [`RefreshError::Config`].
	pub fn config(reason: impl Into<String>) -> Self {
		Self::Config { reason: reason.into() }
	}

	/// Builds a [`RefreshError::TransientService`] without status metadata.
	pub fn transient(message: impl Into<String>) -> Self {
		Self::TransientService { message: message.into(), status: None, retry_after: None }
	}

	/// Builds a [`RefreshError::Unknown`].
	pub fn unknown(reason: impl Into<String>) -> Self {
		Self::Unknown { reason: reason.into() }
	}

	/// Returns the payload-free classification.
	pub fn kind(&self) -> RefreshErrorKind {
		match self {
			Self::ReauthRequired { .. } => RefreshErrorKind::ReauthRequired,
			Self::Config { .. } => RefreshErrorKind::Config,
			Self::TransientService { .. } => RefreshErrorKind::TransientService,
			Self::Unknown { .. } => RefreshErrorKind::Unknown,
		}
	}

	/// Returns `true` when the credential must be removed from the store.
	pub fn clears_credential(&self) -> bool {
		self.kind().clears_credential()
	}

	/// Upstream Retry-After hint, if any.
	pub fn retry_after(&self) -> Option<Duration> {
		match self {
			Self::TransientService { retry_after, .. } => *retry_after,
			_ => None,
		}
	}

	/// Human-readable reason without the class prefix.
	pub fn reason(&self) -> &str {
		match self {
			Self::ReauthRequired { reason } | Self::Config { reason } | Self::Unknown { reason } =>
				reason,
			Self::TransientService { message, .. } => message,
		}
	}
}

/// Payload-free refresh failure classes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefreshErrorKind {
	/// Clear the credential and require re-authentication.
	ReauthRequired,
	/// Keep the credential, surface to the operator, do not retry eagerly.
	Config,
	/// Keep the credential and retry later.
	TransientService,
	/// Unclassified; handled like [`RefreshErrorKind::ReauthRequired`].
	Unknown,
}
impl RefreshErrorKind {
	/// Returns a stable label suitable for span or metric fields.
	pub const fn as_str(self) -> &'static str {
		match self {
			Self::ReauthRequired => "reauth_required",
			Self::Config => "config_error",
			Self::TransientService => "transient_service_error",
			Self::Unknown => "unknown_error",
		}
	}

	/// Returns `true` when the credential must be removed from the store.
	pub const fn clears_credential(self) -> bool {
		matches!(self, Self::ReauthRequired | Self::Unknown)
	}
}
impl Display for RefreshErrorKind {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// Malformed credential ingestion input.
#[derive(Clone, Debug, PartialEq, Eq, ThisError)]
pub enum ValidationError {
	/// Tenant or provider identifier is invalid.
	#[error(transparent)]
	Identifier(#[from] IdentifierError),
	/// Scope list is invalid.
	#[error(transparent)]
	Scope(#[from] ScopeValidationError),
	/// Token fields are missing or blank.
	#[error(transparent)]
	Credential(#[from] CredentialEntryBuilderError),
	/// Token is already expired and cannot be refreshed.
	#[error("Credential for tenant {tenant} is already expired and has no refresh token.")]
	AlreadyExpired {
		/// Tenant named by the ingestion payload.
		tenant: TenantId,
	},
	/// No registered provider can refresh the credential.
	#[error("Provider {provider} is not registered with the refresher.")]
	UnknownProvider {
		/// Provider named by the ingestion payload.
		provider: String,
	},
	/// JSON payload could not be decoded.
	#[error("Ingestion payload is invalid at `{path}`: {message}.")]
	Payload {
		/// JSON path of the offending field.
		path: String,
		/// Decoder message.
		message: String,
	},
}

/// Configuration and setup failures raised by the gateway.
#[derive(Debug, ThisError)]
pub enum ConfigError {
	/// HTTP client could not be constructed.
	#[error("HTTP client could not be constructed.")]
	HttpClientBuild {
		/// Underlying transport builder failure.
		#[source]
		source: BoxError,
	},
	/// Provider descriptor contains an invalid URL.
	#[error("Descriptor contains an invalid URL.")]
	InvalidDescriptor {
		/// Underlying parsing failure.
		#[source]
		source: oauth2::url::ParseError,
	},
	/// Provider descriptor failed validation.
	#[error(transparent)]
	Descriptor(#[from] crate::provider::ProviderDescriptorError),
	/// A provider was registered twice.
	#[error("Provider {provider} is already registered.")]
	DuplicateProvider {
		/// Provider identifier string.
		provider: String,
	},
	/// A gateway setting is out of range.
	#[error("Setting `{field}` is invalid: {reason}.")]
	InvalidSetting {
		/// Setting name.
		field: &'static str,
		/// Why the value was rejected.
		reason: &'static str,
	},
}
impl ConfigError {
	/// Wraps a transport's builder failure inside [`ConfigError`].
	pub fn http_client_build(src: impl 'static + Send + Sync + std::error::Error) -> Self {
		Self::HttpClientBuild { source: Box::new(src) }
	}
}
#[cfg(feature = "reqwest")]
impl From<ReqwestError> for ConfigError {
	fn from(e: ReqwestError) -> Self {
		Self::http_client_build(e)
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn refresh_kinds_decide_credential_clearing() {
		assert!(RefreshError::reauth("invalid_grant").clears_credential());
		assert!(RefreshError::unknown("weird").clears_credential());
		assert!(!RefreshError::config("invalid_request").clears_credential());
		assert!(!RefreshError::transient("server_error").clears_credential());
	}

	#[test]
	fn refresh_kind_labels_are_stable() {
		assert_eq!(RefreshErrorKind::ReauthRequired.as_str(), "reauth_required");
		assert_eq!(RefreshErrorKind::Config.as_str(), "config_error");
		assert_eq!(RefreshErrorKind::TransientService.as_str(), "transient_service_error");
		assert_eq!(RefreshErrorKind::Unknown.as_str(), "unknown_error");
	}

	#[test]
	fn refresh_error_exposes_source_through_gateway_error() {
		let tenant = TenantId::new("acme").expect("Tenant fixture should be valid.");
		let err = Error::Refresh {
			tenant,
			source: RefreshError::TransientService {
				message: "server_error".into(),
				status: Some(503),
				retry_after: Some(Duration::seconds(10)),
			},
		};
		let source = StdError::source(&err).expect("Refresh error should expose its source.");

		assert!(source.to_string().contains("server_error"));
		assert!(!err.is_reauth_required());
	}
}
