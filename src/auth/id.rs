//! Strongly typed identifiers enforced across the guard domain.

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

/// Defines a random, UUID-backed identifier minted by the guard itself.
macro_rules! def_uuid {
	($name:ident, $doc:literal, $kind:literal) => {
		#[doc = $doc]
		#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
		#[serde(transparent)]
		pub struct $name(uuid::Uuid);
		impl $name {
			/// Mints a fresh random identifier.
			pub fn random() -> Self {
				Self(uuid::Uuid::new_v4())
			}

			/// Returns the underlying UUID.
			pub fn as_uuid(&self) -> &uuid::Uuid {
				&self.0
			}
		}
		impl From<uuid::Uuid> for $name {
			fn from(value: uuid::Uuid) -> Self {
				Self(value)
			}
		}
		impl Debug for $name {
			fn fmt(&self, f: &mut Formatter) -> FmtResult {
				write!(f, concat!($kind, "({})"), self.0)
			}
		}
		impl Display for $name {
			fn fmt(&self, f: &mut Formatter) -> FmtResult {
				Display::fmt(&self.0, f)
			}
		}
	};
}
pub(crate) use def_uuid;

const IDENTIFIER_MAX_LEN: usize = 128;

/// Error returned when identifier validation fails.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, ThisError)]
pub enum IdentifierError {
	/// The identifier was empty or whitespace.
	#[error("{kind} identifier cannot be empty.")]
	Empty {
		/// Kind of identifier (user, client IP).
		kind: &'static str,
	},
	/// The identifier contains whitespace characters.
	#[error("{kind} identifier contains whitespace.")]
	ContainsWhitespace {
		/// Kind of identifier (user, client IP).
		kind: &'static str,
	},
	/// The identifier exceeded the allowed character count.
	#[error("{kind} identifier exceeds {max} characters.")]
	TooLong {
		/// Kind of identifier (user, client IP).
		kind: &'static str,
		/// Maximum permitted character count.
		max: usize,
	},
}

def_id! { UserId, "Identifier of the user that owns a session.", "User" }
def_id! {
	ClientIp,
	"Raw client address used as the abuse-tracking key; not parsed as IPv4/IPv6.",
	"ClientIp"
}

def_uuid! { TokenId, "Opaque identifier of a stored refresh token.", "Token" }
def_uuid! { RequestId, "Opaque identifier of a request-log entry.", "Request" }

fn validate_view(kind: &'static str, view: &str) -> Result<(), IdentifierError> {
	if view.is_empty() {
		return Err(IdentifierError::Empty { kind });
	}
	if view.chars().any(char::is_whitespace) {
		return Err(IdentifierError::ContainsWhitespace { kind });
	}
	if view.len() > IDENTIFIER_MAX_LEN {
		return Err(IdentifierError::TooLong { kind, max: IDENTIFIER_MAX_LEN });
	}

	Ok(())
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn identifiers_reject_whitespace_and_empty_values() {
		assert!(UserId::new(" user-1").is_err(), "Leading whitespace must be rejected.");
		assert!(UserId::new("user-1 ").is_err(), "Trailing whitespace must be rejected.");
		assert!(ClientIp::new("").is_err());

		let ip = ClientIp::new("10.0.0.5").expect("Client IP fixture should be valid.");

		assert_eq!(ip.as_ref(), "10.0.0.5");
	}

	#[test]
	fn client_ip_is_not_parsed_as_an_address() {
		ClientIp::new("fe80::1%eth0").expect("Scoped IPv6 literal should be accepted verbatim.");
		ClientIp::new("unknown-proxy").expect("Non-address keys should be accepted verbatim.");
	}

	#[test]
	fn serde_round_trip_enforces_validation() {
		let user: UserId =
			serde_json::from_str("\"user-42\"").expect("User should deserialize successfully.");

		assert_eq!(user.as_ref(), "user-42");
		assert!(serde_json::from_str::<UserId>("\"with space\"").is_err());

		let too_long = format!("\"{}\"", "a".repeat(IDENTIFIER_MAX_LEN + 1));

		assert!(serde_json::from_str::<ClientIp>(&too_long).is_err());
	}

	#[test]
	fn borrow_supports_fast_lookup() {
		let map: HashMap<ClientIp, u8> = HashMap::from_iter([(
			ClientIp::new("192.0.2.1").expect("Client IP used for lookup should be valid."),
			7_u8,
		)]);

		assert_eq!(map.get("192.0.2.1"), Some(&7));
	}

	#[test]
	fn random_ids_are_distinct() {
		let a = TokenId::random();
		let b = TokenId::random();

		assert_ne!(a, b);
		assert!(format!("{a:?}").starts_with("Token("));
	}
}
