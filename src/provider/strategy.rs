//! Provider strategy hooks that classify refresh failures.
//!
//! Implementations map token endpoint failures into [`RefreshErrorKind`] without tying the
//! refresher to any particular HTTP client.

// self
use crate::{_prelude::*, error::RefreshErrorKind};

/// Strategy hook that lets providers override refresh error classification.
///
/// Implementors are required to be `Send + Sync`, and the hook only sees crate-owned data
/// so downstream crates never depend on reqwest-specific structures.
pub trait ProviderStrategy: Send + Sync {
	/// Maps a failed refresh exchange into the gateway taxonomy.
	fn classify_refresh_error(&self, ctx: &ProviderErrorContext) -> RefreshErrorKind;
}

/// Context passed to provider strategies when classifying refresh errors.
///
/// The struct keeps only primitive data (status codes, OAuth fields, body preview) so
/// strategies stay decoupled from the transport.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ProviderErrorContext {
	/// HTTP status code returned by the provider, when available.
	pub http_status: Option<u16>,
	/// Provider-supplied OAuth `error` field.
	pub oauth_error: Option<String>,
	/// Provider-supplied OAuth `error_description` field.
	pub error_description: Option<String>,
	/// Preview of the response body for non-JSON payloads.
	pub body_preview: Option<String>,
	/// Indicates whether the failure originated from the network/transport layer.
	pub network_error: bool,
}
impl ProviderErrorContext {
	const BODY_PREVIEW_LIMIT: usize = 256;

	/// Creates an empty context.
	pub fn new() -> Self {
		Self::default()
	}

	/// Convenience constructor for transport-level/network failures (timeouts included).
	pub fn network_failure() -> Self {
		Self { network_error: true, ..Self::default() }
	}

	/// Adds an HTTP status code (e.g., 400, 401, 503).
	pub fn with_http_status(mut self, status: u16) -> Self {
		self.http_status = Some(status);

		self
	}

	/// Adds the OAuth error code string returned by the provider.
	pub fn with_oauth_error(mut self, error: impl Into<String>) -> Self {
		self.oauth_error = Some(error.into());

		self
	}

	/// Adds the OAuth `error_description` field.
	pub fn with_error_description(mut self, description: impl Into<String>) -> Self {
		self.error_description = Some(description.into());

		self
	}

	/// Adds a body preview for providers that return non-JSON payloads.
	pub fn with_body_preview(mut self, body: impl Into<String>) -> Self {
		self.body_preview = Some(truncate_preview(body.into()));

		self
	}
}

/// Default strategy implementing the RFC 6749 refresh classification.
///
/// | Signal | Class |
/// |---|---|
/// | `invalid_grant`, `invalid_client`, `unauthorized_client` | `ReauthRequired` |
/// | `invalid_request`, `unsupported_grant_type` | `Config` |
/// | `temporarily_unavailable`, `server_error`, network failure, 5xx/429 without a body code | `TransientService` |
/// | anything else | `Unknown` |
///
/// Structured OAuth fields win over body hints, which win over the HTTP status.
#[derive(Debug, Default)]
pub struct DefaultProviderStrategy;
impl Display for DefaultProviderStrategy {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str("default-provider-strategy")
	}
}
impl ProviderStrategy for DefaultProviderStrategy {
	fn classify_refresh_error(&self, ctx: &ProviderErrorContext) -> RefreshErrorKind {
		if ctx.network_error {
			return RefreshErrorKind::TransientService;
		}
		if let Some(code) = ctx.oauth_error.as_deref() {
			return match_error_code(code).unwrap_or(RefreshErrorKind::Unknown);
		}
		if let Some(kind) = classify_body(ctx.body_preview.as_deref()) {
			return kind;
		}

		classify_status(ctx.http_status)
	}
}

fn truncate_preview(body: String) -> String {
	if body.chars().count() <= ProviderErrorContext::BODY_PREVIEW_LIMIT {
		return body;
	}

	let mut buf = body.chars().take(ProviderErrorContext::BODY_PREVIEW_LIMIT).collect::<String>();

	buf.push('…');

	buf
}

fn match_error_code(value: &str) -> Option<RefreshErrorKind> {
	const REAUTH: [&str; 3] = ["invalid_grant", "invalid_client", "unauthorized_client"];
	const CONFIG: [&str; 2] = ["invalid_request", "unsupported_grant_type"];
	const TRANSIENT: [&str; 2] = ["temporarily_unavailable", "server_error"];

	let value = value.trim();
	let matches = |codes: &[&str]| codes.iter().any(|code| value.eq_ignore_ascii_case(code));

	if matches(&REAUTH) {
		Some(RefreshErrorKind::ReauthRequired)
	} else if matches(&CONFIG) {
		Some(RefreshErrorKind::Config)
	} else if matches(&TRANSIENT) {
		Some(RefreshErrorKind::TransientService)
	} else {
		None
	}
}

// Form-encoded or plain-text error bodies (`error=invalid_grant&...`).
fn classify_body(body: Option<&str>) -> Option<RefreshErrorKind> {
	let lowered = body?.to_ascii_lowercase();

	lowered
		.split(|ch: char| !(ch.is_ascii_alphanumeric() || ch == '_'))
		.filter(|token| !token.is_empty())
		.find_map(match_error_code)
}

fn classify_status(status: Option<u16>) -> RefreshErrorKind {
	match status {
		Some(429) => RefreshErrorKind::TransientService,
		Some(code) if code >= 500 => RefreshErrorKind::TransientService,
		_ => RefreshErrorKind::Unknown,
	}
}
