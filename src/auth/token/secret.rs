//! Secure token secret wrapper that redacts sensitive material, plus the digest stored in its
//! place.

// crates.io
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use rand::Rng;
use sha2::{Digest, Sha256};
// self
use crate::_prelude::*;

const SECRET_BYTES: usize = 32;

/// Redacted token secret wrapper keeping sensitive material out of logs.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenSecret(String);
impl TokenSecret {
	/// Wraps a new secret string.
	pub fn new(value: impl Into<String>) -> Self {
		Self(value.into())
	}

	/// Generates a fresh secret from 256 bits of OS-seeded randomness, base64url encoded.
	pub fn generate() -> Self {
		let mut bytes = [0_u8; SECRET_BYTES];

		rand::rng().fill(&mut bytes[..]);

		Self(URL_SAFE_NO_PAD.encode(bytes))
	}

	/// Returns the inner token value. Callers must avoid logging this string.
	pub fn expose(&self) -> &str {
		&self.0
	}

	/// Computes the digest under which the secret is persisted.
	pub fn digest(&self) -> TokenDigest {
		TokenDigest::of(&self.0)
	}
}
impl AsRef<str> for TokenSecret {
	fn as_ref(&self) -> &str {
		self.expose()
	}
}
impl Debug for TokenSecret {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_tuple("TokenSecret").field(&"<redacted>").finish()
	}
}
impl Display for TokenSecret {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str("<redacted>")
	}
}

/// SHA-256 digest (base64url, no padding) of a refresh-token secret.
///
/// Repositories index tokens by digest; the plaintext secret never reaches a store.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TokenDigest(String);
impl TokenDigest {
	/// Hashes a presented secret string.
	pub fn of(secret: &str) -> Self {
		let mut hasher = Sha256::new();

		hasher.update(secret.as_bytes());

		Self(URL_SAFE_NO_PAD.encode(hasher.finalize()))
	}

	/// Returns the encoded digest.
	pub fn as_str(&self) -> &str {
		&self.0
	}
}
impl Debug for TokenDigest {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		// Eight characters are enough to correlate log lines.
		write!(f, "TokenDigest({}..)", &self.0[..self.0.len().min(8)])
	}
}
