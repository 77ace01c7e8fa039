//! Refresh-token records, lifecycle helpers, and builders.

// self
use crate::{
	_prelude::*,
	auth::{
		TokenId, UserId,
		token::{family::SessionFamily, secret::TokenDigest},
	},
};

/// Current lifecycle status for a refresh token.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TokenStatus {
	/// Token may be presented for validation or rotation.
	Active,
	/// Token reached its expiry instant.
	Expired,
	/// Token was revoked explicitly or by rotation.
	Revoked,
}

/// Errors produced by [`RefreshTokenBuilder`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ThisError)]
pub enum RefreshTokenBuilderError {
	/// Issued when no token digest was provided.
	#[error("Token digest is required.")]
	MissingDigest,
	/// Issued when no expiry (absolute or relative) was configured.
	#[error("Expiry must be supplied via expires_at or expires_in.")]
	MissingExpiry,
	/// Issued when the expiry does not fall after the issue instant.
	#[error("Expiry must be later than the issued-at instant.")]
	ExpiryNotAfterIssue,
	/// Issued when the relative expiry lands outside the representable date range.
	#[error("Expiry is outside the supported date range.")]
	ExpiryOutOfRange,
}

/// Persisted refresh-token row.
///
/// A record is only ever mutated to set `revoked_at`; everything else is fixed at issue time.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshToken {
	/// Opaque unique identifier.
	pub id: TokenId,
	/// Digest of the secret handed to the client.
	pub digest: TokenDigest,
	/// Owning user.
	pub user_id: UserId,
	/// Rotation chain this token belongs to.
	pub family: SessionFamily,
	/// Issued-at instant.
	pub issued_at: OffsetDateTime,
	/// Expiry instant; the token is invalid from this instant onward.
	pub expires_at: OffsetDateTime,
	/// Revocation instant if the token has been revoked.
	pub revoked_at: Option<OffsetDateTime>,
}
impl RefreshToken {
	/// Returns a builder for the provided owner.
	pub fn builder(user_id: UserId) -> RefreshTokenBuilder {
		RefreshTokenBuilder::new(user_id)
	}

	/// Computes the lifecycle status at a given instant.
	pub fn status_at(&self, instant: OffsetDateTime) -> TokenStatus {
		if self.revoked_at.is_some() {
			return TokenStatus::Revoked;
		}
		if instant >= self.expires_at {
			return TokenStatus::Expired;
		}

		TokenStatus::Active
	}

	/// Returns `true` when the token is neither revoked nor expired at `instant`.
	pub fn is_valid_at(&self, instant: OffsetDateTime) -> bool {
		matches!(self.status_at(instant), TokenStatus::Active)
	}

	/// Returns `true` if the token has expired at the provided instant.
	pub fn is_expired_at(&self, instant: OffsetDateTime) -> bool {
		instant >= self.expires_at
	}

	/// Returns `true` if the token has been revoked.
	pub fn is_revoked(&self) -> bool {
		self.revoked_at.is_some()
	}

	/// Marks the token as revoked unless it already is.
	///
	/// Returns `true` when this call changed the record.
	pub fn revoke(&mut self, instant: OffsetDateTime) -> bool {
		if self.revoked_at.is_some() {
			return false;
		}

		self.revoked_at = Some(instant);

		true
	}
}

/// Builder for [`RefreshToken`].
#[derive(Clone, Debug)]
pub struct RefreshTokenBuilder {
	user_id: UserId,
	id: Option<TokenId>,
	digest: Option<TokenDigest>,
	family: Option<SessionFamily>,
	issued_at: Option<OffsetDateTime>,
	expires_at: Option<OffsetDateTime>,
	expires_in: Option<Duration>,
}
impl RefreshTokenBuilder {
	fn new(user_id: UserId) -> Self {
		Self {
			user_id,
			id: None,
			digest: None,
			family: None,
			issued_at: None,
			expires_at: None,
			expires_in: None,
		}
	}

	/// Overrides the generated identifier.
	pub fn id(mut self, id: TokenId) -> Self {
		self.id = Some(id);

		self
	}

	/// Sets the digest of the secret handed to the client.
	pub fn digest(mut self, digest: TokenDigest) -> Self {
		self.digest = Some(digest);

		self
	}

	/// Places the token in an existing rotation chain.
	pub fn family(mut self, family: SessionFamily) -> Self {
		self.family = Some(family);

		self
	}

	/// Sets the issued-at instant.
	pub fn issued_at(mut self, instant: OffsetDateTime) -> Self {
		self.issued_at = Some(instant);

		self
	}

	/// Sets an absolute expiry instant.
	pub fn expires_at(mut self, instant: OffsetDateTime) -> Self {
		self.expires_at = Some(instant);

		self
	}

	/// Sets a relative expiry duration from the issued instant.
	pub fn expires_in(mut self, duration: Duration) -> Self {
		self.expires_in = Some(duration);

		self
	}

	/// Consumes the builder and produces a [`RefreshToken`].
	///
	/// Missing identifiers are minted at random and a missing issue instant defaults to the
	/// current UTC clock.
	pub fn build(self) -> Result<RefreshToken, RefreshTokenBuilderError> {
		let digest = self.digest.ok_or(RefreshTokenBuilderError::MissingDigest)?;
		let issued_at = self.issued_at.unwrap_or_else(OffsetDateTime::now_utc);
		let expires_at = match (self.expires_at, self.expires_in) {
			(Some(instant), _) => instant,
			(None, Some(delta)) =>
				issued_at.checked_add(delta).ok_or(RefreshTokenBuilderError::ExpiryOutOfRange)?,
			(None, None) => return Err(RefreshTokenBuilderError::MissingExpiry),
		};

		if expires_at <= issued_at {
			return Err(RefreshTokenBuilderError::ExpiryNotAfterIssue);
		}

		Ok(RefreshToken {
			id: self.id.unwrap_or_else(TokenId::random),
			digest,
			user_id: self.user_id,
			family: self.family.unwrap_or_else(SessionFamily::random),
			issued_at,
			expires_at,
			revoked_at: None,
		})
	}
}
