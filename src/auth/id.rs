//! Strongly typed identifiers enforced across the gateway domain.
//!
//! Identifiers end up in metric labels, span fields, and map keys, so they are restricted to
//! a label-safe alphabet: ASCII alphanumerics plus `-`, `_`, `.`, and `:`.

// std
use std::{borrow::Borrow, ops::Deref};
// self
use crate::_prelude::*;

macro_rules! def_id {
	($name:ident, $doc:literal, $kind:literal) => {
		#[doc = $doc]
		#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
		#[serde(try_from = "String", into = "String")]
		pub struct $name(String);
		impl $name {
			/// Creates a new identifier after validation.
			pub fn new(value: impl AsRef<str>) -> Result<Self, IdentifierError> {
				let view = value.as_ref();

				validate_view($kind, view)?;

				Ok(Self(view.to_owned()))
			}

			/// Returns the identifier as a string slice.
			pub fn as_str(&self) -> &str {
				&self.0
			}
		}
		impl Deref for $name {
			type Target = str;

			fn deref(&self) -> &Self::Target {
				&self.0
			}
		}
		impl AsRef<str> for $name {
			fn as_ref(&self) -> &str {
				&self.0
			}
		}
		impl From<$name> for String {
			fn from(value: $name) -> Self {
				value.0
			}
		}
		impl TryFrom<String> for $name {
			type Error = IdentifierError;

			fn try_from(value: String) -> Result<Self, Self::Error> {
				validate_view($kind, &value)?;

				Ok(Self(value))
			}
		}
		impl Borrow<str> for $name {
			fn borrow(&self) -> &str {
				&self.0
			}
		}
		impl Debug for $name {
			fn fmt(&self, f: &mut Formatter) -> FmtResult {
				write!(f, concat!($kind, "({})"), self.0)
			}
		}
		impl Display for $name {
			fn fmt(&self, f: &mut Formatter) -> FmtResult {
				f.write_str(&self.0)
			}
		}
		impl FromStr for $name {
			type Err = IdentifierError;

			fn from_str(s: &str) -> Result<Self, Self::Err> {
				Self::new(s)
			}
		}
	};
}

const IDENTIFIER_MAX_LEN: usize = 128;

/// Error returned when identifier validation fails.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, ThisError)]
pub enum IdentifierError {
	/// The identifier was empty.
	#[error("{kind} identifier cannot be empty.")]
	Empty {
		/// Kind of identifier (tenant, provider, session).
		kind: &'static str,
	},
	/// The identifier contains a character outside the label-safe alphabet.
	#[error("{kind} identifier contains the disallowed character {found:?}.")]
	InvalidCharacter {
		/// Kind of identifier (tenant, provider, session).
		kind: &'static str,
		/// First offending character.
		found: char,
	},
	/// The identifier exceeded the allowed length.
	#[error("{kind} identifier exceeds {max} characters.")]
	TooLong {
		/// Kind of identifier (tenant, provider, session).
		kind: &'static str,
		/// Maximum permitted length.
		max: usize,
	},
}

def_id! { TenantId, "Unique identifier for a gateway tenant (instance).", "Tenant" }
def_id! { ProviderId, "Identifier for a registered OAuth provider.", "Provider" }
def_id! { SessionId, "Transport-level session identifier assigned by the protocol layer.", "Session" }

fn validate_view(kind: &'static str, view: &str) -> Result<(), IdentifierError> {
	if view.is_empty() {
		return Err(IdentifierError::Empty { kind });
	}
	if let Some(found) = view.chars().find(|ch| !is_label_safe(*ch)) {
		return Err(IdentifierError::InvalidCharacter { kind, found });
	}
	if view.len() > IDENTIFIER_MAX_LEN {
		return Err(IdentifierError::TooLong { kind, max: IDENTIFIER_MAX_LEN });
	}

	Ok(())
}

fn is_label_safe(ch: char) -> bool {
	ch.is_ascii_alphanumeric() || matches!(ch, '-' | '_' | '.' | ':')
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn identifiers_reject_padding_and_symbols() {
		assert!(TenantId::new(" acme").is_err(), "Leading whitespace must be rejected.");
		assert!(TenantId::new("acme ").is_err(), "Trailing whitespace must be rejected.");

		let tenant = TenantId::new("acme-prod").expect("Tenant fixture should be valid.");

		assert_eq!(tenant.as_str(), "acme-prod");
		assert!(SessionId::new("").is_err());
		assert!(ProviderId::new("notion/v1").is_err());
		assert_eq!(
			TenantId::new("acme{x}"),
			Err(IdentifierError::InvalidCharacter { kind: "Tenant", found: '{' })
		);
	}

	#[test]
	fn debug_output_names_the_identifier_kind() {
		let session = SessionId::new("mcp:7f3a").expect("Session fixture should be valid.");

		assert_eq!(format!("{session:?}"), "Session(mcp:7f3a)");
		assert_eq!(session.to_string(), "mcp:7f3a");
	}

	#[test]
	fn serde_round_trip_enforces_validation() {
		let tenant: TenantId =
			serde_json::from_str("\"tenant-42\"").expect("Tenant should deserialize successfully.");

		assert_eq!(tenant.as_ref(), "tenant-42");
		assert!(serde_json::from_str::<TenantId>("\"with space\"").is_err());
		assert!(serde_json::from_str::<TenantId>("\"\"").is_err());
	}

	#[test]
	fn unicode_and_length_limits() {
		assert!(TenantId::new("tenant\u{00A0}id").is_err());
		assert!(TenantId::new("t\u{00E9}nant").is_err());

		let exact = "a".repeat(IDENTIFIER_MAX_LEN);

		TenantId::new(&exact).expect("Exact length should succeed.");

		let too_long = "a".repeat(IDENTIFIER_MAX_LEN + 1);

		assert!(TenantId::new(&too_long).is_err());
	}

	#[test]
	fn borrow_supports_fast_lookup() {
		let map: HashMap<TenantId, u8> = HashMap::from_iter([(
			TenantId::new("acme").expect("Tenant used for lookup should be valid."),
			7_u8,
		)]);

		assert_eq!(map.get("acme"), Some(&7));
	}
}
