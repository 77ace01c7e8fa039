//! Refresh-token lifecycle over a [`TokenRepository`].

// self
use crate::{
	_prelude::*,
	auth::{RefreshToken, SessionFamily, TokenId, TokenSecret, TokenStatus, UserId},
	config::GuardConfig,
	session::RotationMetrics,
	store::{self, InsertOutcome, RevokeCondition, RevokeOutcome, RevokeScope, TokenRepository},
};

const MAX_GENERATION_ATTEMPTS: u32 = 4;

/// Freshly minted token: the only place the plaintext secret is ever available.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IssuedToken {
	/// Secret to hand to the client.
	pub secret: TokenSecret,
	/// Stored record describing the token.
	pub record: RefreshToken,
}

/// Why a presented token was not accepted.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvalidCause {
	/// No record matches the presented secret.
	NotFound,
	/// The record was revoked.
	Revoked,
	/// The record reached its expiry.
	Expired,
}
impl InvalidCause {
	/// Returns a stable label for internal logs.
	pub const fn as_str(self) -> &'static str {
		match self {
			InvalidCause::NotFound => "not_found",
			InvalidCause::Revoked => "revoked",
			InvalidCause::Expired => "expired",
		}
	}
}
impl Display for InvalidCause {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// Result of [`TokenStore::validate`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Validation {
	/// The token is active.
	Valid {
		/// Owning user.
		user_id: UserId,
		/// Identifier of the matching record.
		token_id: TokenId,
		/// Rotation chain of the matching record.
		family: SessionFamily,
	},
	/// The token cannot be used.
	Invalid(InvalidCause),
}
impl Validation {
	/// Returns the owning user when valid.
	pub fn user_id(&self) -> Option<&UserId> {
		match self {
			Self::Valid { user_id, .. } => Some(user_id),
			Self::Invalid(_) => None,
		}
	}
}

/// Result of [`TokenStore::rotate`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Rotation {
	/// The presented token was revoked by this call and replaced.
	Rotated(IssuedToken),
	/// The presented token was not active, or another rotation won the race.
	Rejected(InvalidCause),
}

/// Issues, validates, rotates, and revokes refresh tokens.
///
/// Rotation relies on [`TokenRepository::revoke`] performing its conditional update atomically,
/// so among concurrent rotations of one secret exactly one observes [`RevokeOutcome::Revoked`].
pub struct TokenStore {
	repository: Arc<dyn TokenRepository>,
	ttl: Duration,
	store_timeout: Option<Duration>,
	revoke_family_on_reuse: bool,
	metrics: RotationMetrics,
}
impl TokenStore {
	/// Creates a token store over `repository`.
	pub fn new(repository: Arc<dyn TokenRepository>, config: &GuardConfig) -> Self {
		Self {
			repository,
			ttl: config.token_ttl,
			store_timeout: config.store_timeout,
			revoke_family_on_reuse: config.revoke_family_on_reuse,
			metrics: RotationMetrics::default(),
		}
	}

	/// Rotation counters collected since construction.
	pub fn rotation_metrics(&self) -> &RotationMetrics {
		&self.metrics
	}

	/// Issues a token for `user_id` in a new rotation chain.
	pub async fn issue(&self, user_id: &UserId, now: OffsetDateTime) -> Result<IssuedToken> {
		self.mint(user_id, SessionFamily::random(), now).await
	}

	/// Checks whether `secret` names an active token at `now`.
	pub async fn validate(&self, secret: &TokenSecret, now: OffsetDateTime) -> Result<Validation> {
		let digest = secret.digest();
		let record = store::bounded(
			"tokens.fetch_by_digest",
			self.store_timeout,
			self.repository.fetch_by_digest(&digest),
		)
		.await?;
		let Some(record) = record else {
			return Ok(Validation::Invalid(InvalidCause::NotFound));
		};

		Ok(match record.status_at(now) {
			TokenStatus::Active => Validation::Valid {
				user_id: record.user_id,
				token_id: record.id,
				family: record.family,
			},
			TokenStatus::Revoked => Validation::Invalid(InvalidCause::Revoked),
			TokenStatus::Expired => Validation::Invalid(InvalidCause::Expired),
		})
	}

	/// Revokes `secret` if it is active at `now` and issues its successor in the same chain.
	///
	/// Presenting a token that was already revoked is treated as reuse: it is logged and, when
	/// configured, the whole chain is revoked.
	pub async fn rotate(&self, secret: &TokenSecret, now: OffsetDateTime) -> Result<Rotation> {
		self.metrics.record_attempt();

		let digest = secret.digest();
		let outcome = store::bounded(
			"tokens.revoke",
			self.store_timeout,
			self.repository.revoke(&digest, RevokeCondition::Active, now),
		)
		.await?;
		let cause = match outcome {
			RevokeOutcome::Revoked(previous) => {
				let issued = self.mint(&previous.user_id, previous.family, now).await?;

				self.metrics.record_rotated();
				tracing::debug!(
					user_id = %previous.user_id,
					family = ?previous.family,
					previous = ?previous.id,
					next = ?issued.record.id,
					"Refresh token rotated."
				);

				return Ok(Rotation::Rotated(issued));
			},
			RevokeOutcome::AlreadyRevoked(record) => {
				self.metrics.record_reuse();
				tracing::warn!(
					user_id = %record.user_id,
					family = ?record.family,
					token_id = ?record.id,
					"Revoked refresh token presented again."
				);

				if self.revoke_family_on_reuse {
					self.revoke_family(record.family, now).await?;
				}

				InvalidCause::Revoked
			},
			RevokeOutcome::Expired(_) => InvalidCause::Expired,
			RevokeOutcome::Missing => InvalidCause::NotFound,
		};

		self.metrics.record_rejected();

		Ok(Rotation::Rejected(cause))
	}

	/// Revokes `secret`; returns `true` only for the call that changed the record.
	pub async fn revoke(&self, secret: &TokenSecret, now: OffsetDateTime) -> Result<bool> {
		let digest = secret.digest();
		let outcome = store::bounded(
			"tokens.revoke",
			self.store_timeout,
			self.repository.revoke(&digest, RevokeCondition::Unrevoked, now),
		)
		.await?;

		Ok(matches!(outcome, RevokeOutcome::Revoked(_)))
	}

	/// Revokes every token owned by `user_id`, returning how many changed state.
	pub async fn revoke_all_for_user(&self, user_id: &UserId, now: OffsetDateTime) -> Result<u64> {
		let revoked = self.revoke_scope(RevokeScope::User(user_id.clone()), now).await?;

		tracing::info!(user_id = %user_id, revoked, "User sessions revoked.");

		Ok(revoked)
	}

	/// Revokes every token in `family`, returning how many changed state.
	pub async fn revoke_family(&self, family: SessionFamily, now: OffsetDateTime) -> Result<u64> {
		let revoked = self.revoke_scope(RevokeScope::Family(family), now).await?;

		tracing::info!(family = ?family, revoked, "Session family revoked.");

		Ok(revoked)
	}

	/// Deletes records that expired before `before`.
	pub async fn purge_expired(&self, before: OffsetDateTime) -> Result<u64> {
		store::bounded(
			"tokens.purge_expired",
			self.store_timeout,
			self.repository.purge_expired(before),
		)
		.await
	}

	async fn revoke_scope(&self, scope: RevokeScope, now: OffsetDateTime) -> Result<u64> {
		store::bounded(
			"tokens.revoke_where",
			self.store_timeout,
			self.repository.revoke_where(&scope, now),
		)
		.await
	}

	async fn mint(
		&self,
		user_id: &UserId,
		family: SessionFamily,
		now: OffsetDateTime,
	) -> Result<IssuedToken> {
		for attempt in 1..=MAX_GENERATION_ATTEMPTS {
			let secret = TokenSecret::generate();
			let record = RefreshToken::builder(user_id.clone())
				.digest(secret.digest())
				.family(family)
				.issued_at(now)
				.expires_in(self.ttl)
				.build()?;
			let outcome = store::bounded(
				"tokens.insert",
				self.store_timeout,
				self.repository.insert(record.clone()),
			)
			.await?;

			match outcome {
				InsertOutcome::Inserted => return Ok(IssuedToken { secret, record }),
				InsertOutcome::DuplicateDigest => {
					tracing::warn!(attempt, "Refresh token digest collided; regenerating.");
				},
			}
		}

		Err(Error::TokenGeneration { attempts: MAX_GENERATION_ATTEMPTS })
	}
}
impl Debug for TokenStore {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("TokenStore")
			.field("ttl", &self.ttl)
			.field("revoke_family_on_reuse", &self.revoke_family_on_reuse)
			.field("metrics", &self.metrics)
			.finish()
	}
}

#[cfg(test)]
mod tests {
	// crates.io
	use time::macros;
	// self
	use super::*;
	use crate::{
		auth::{RefreshTokenBuilderError, TokenDigest},
		store::{MemoryStore, StoreError, StoreFuture},
	};

	/// Repository that reports every insert as a digest collision.
	struct CollidingRepository;
	impl TokenRepository for CollidingRepository {
		fn insert(&self, _: RefreshToken) -> StoreFuture<'_, InsertOutcome> {
			Box::pin(async { Ok(InsertOutcome::DuplicateDigest) })
		}

		fn fetch_by_digest<'a>(
			&'a self,
			_: &'a TokenDigest,
		) -> StoreFuture<'a, Option<RefreshToken>> {
			Box::pin(async { Ok(None) })
		}

		fn revoke<'a>(
			&'a self,
			_: &'a TokenDigest,
			_: RevokeCondition,
			_: OffsetDateTime,
		) -> StoreFuture<'a, RevokeOutcome> {
			Box::pin(async { Ok(RevokeOutcome::Missing) })
		}

		fn revoke_where<'a>(
			&'a self,
			_: &'a RevokeScope,
			_: OffsetDateTime,
		) -> StoreFuture<'a, u64> {
			Box::pin(async { Err(StoreError::Backend { message: "unsupported".into() }) })
		}

		fn purge_expired(&self, _: OffsetDateTime) -> StoreFuture<'_, u64> {
			Box::pin(async { Ok(0) })
		}
	}

	fn user(value: &str) -> UserId {
		UserId::new(value).expect("User fixture should be valid.")
	}

	fn store(config: &GuardConfig) -> (Arc<MemoryStore>, TokenStore) {
		let backend = Arc::new(MemoryStore::default());

		(backend.clone(), TokenStore::new(backend, config))
	}

	#[tokio::test]
	async fn issue_validate_revoke_round_trip() {
		let (backend, tokens) = store(&GuardConfig::default());
		let now = macros::datetime!(2025-01-01 00:00 UTC);
		let issued = tokens.issue(&user("alice"), now).await.expect("Issue should succeed.");

		assert_eq!(backend.token_count(), 1);
		assert_eq!(issued.record.expires_at, now + Duration::days(30));
		assert_eq!(issued.record.digest, issued.secret.digest());
		assert_eq!(
			tokens.validate(&issued.secret, now).await.expect("Validate should succeed."),
			Validation::Valid {
				user_id: user("alice"),
				token_id: issued.record.id,
				family: issued.record.family,
			}
		);
		assert!(tokens.revoke(&issued.secret, now).await.expect("Revoke should succeed."));
		assert!(!tokens.revoke(&issued.secret, now).await.expect("Revoke should be idempotent."));
		assert_eq!(
			tokens.validate(&issued.secret, now).await.expect("Validate should succeed."),
			Validation::Invalid(InvalidCause::Revoked)
		);
		assert_eq!(
			tokens
				.validate(&TokenSecret::new("never-issued"), now)
				.await
				.expect("Validate should succeed."),
			Validation::Invalid(InvalidCause::NotFound)
		);
	}

	#[tokio::test]
	async fn rotation_keeps_family_and_flags_reuse() {
		let config = GuardConfig::builder()
			.revoke_family_on_reuse(true)
			.build()
			.expect("Reuse configuration should be valid.");
		let (_, tokens) = store(&config);
		let now = macros::datetime!(2025-01-01 00:00 UTC);
		let first = tokens.issue(&user("bob"), now).await.expect("Issue should succeed.");
		let Rotation::Rotated(second) =
			tokens.rotate(&first.secret, now).await.expect("Rotate should succeed.")
		else {
			panic!("An active token should rotate.");
		};

		assert_eq!(second.record.family, first.record.family);
		assert_ne!(second.secret, first.secret);
		assert!(tokens.validate(&second.secret, now).await.is_ok_and(|v| v.user_id().is_some()));
		assert_eq!(
			tokens.rotate(&first.secret, now).await.expect("Rotate should succeed."),
			Rotation::Rejected(InvalidCause::Revoked)
		);
		// Reuse revoked the successor along with the rest of the chain.
		assert_eq!(
			tokens.validate(&second.secret, now).await.expect("Validate should succeed."),
			Validation::Invalid(InvalidCause::Revoked)
		);
		assert_eq!(tokens.rotation_metrics().attempts(), 2);
		assert_eq!(tokens.rotation_metrics().rotated(), 1);
		assert_eq!(tokens.rotation_metrics().reuse_detected(), 1);
	}

	#[tokio::test]
	async fn unrepresentable_expiry_is_an_error() {
		let config = GuardConfig { token_ttl: Duration::MAX, ..GuardConfig::default() };
		let (backend, tokens) = store(&config);
		let err = tokens
			.issue(&user("alice"), macros::datetime!(2025-01-01 00:00 UTC))
			.await
			.expect_err("An expiry past the date range should fail.");

		assert!(matches!(err, Error::TokenBuild(RefreshTokenBuilderError::ExpiryOutOfRange)));
		assert_eq!(backend.token_count(), 0);
	}

	#[tokio::test]
	async fn expired_tokens_do_not_rotate() {
		let config = GuardConfig::builder()
			.token_ttl(Duration::minutes(5))
			.build()
			.expect("Short TTL configuration should be valid.");
		let (_, tokens) = store(&config);
		let now = macros::datetime!(2025-01-01 00:00 UTC);
		let issued = tokens.issue(&user("carol"), now).await.expect("Issue should succeed.");

		assert_eq!(
			tokens
				.rotate(&issued.secret, now + Duration::minutes(5))
				.await
				.expect("Rotate should succeed."),
			Rotation::Rejected(InvalidCause::Expired)
		);
		assert_eq!(
			tokens
				.rotate(&TokenSecret::new("unknown"), now)
				.await
				.expect("Rotate should succeed."),
			Rotation::Rejected(InvalidCause::NotFound)
		);
		assert_eq!(tokens.rotation_metrics().rejected(), 2);
	}

	#[tokio::test]
	async fn revoke_all_counts_only_changed_records() {
		let (_, tokens) = store(&GuardConfig::default());
		let now = macros::datetime!(2025-01-01 00:00 UTC);
		let dave = user("dave");
		let first = tokens.issue(&dave, now).await.expect("Issue should succeed.");

		tokens.issue(&dave, now).await.expect("Issue should succeed.");
		tokens.issue(&user("erin"), now).await.expect("Issue should succeed.");
		tokens.revoke(&first.secret, now).await.expect("Revoke should succeed.");

		assert_eq!(tokens.revoke_all_for_user(&dave, now).await.expect("Bulk revoke."), 1);
		assert_eq!(tokens.revoke_all_for_user(&dave, now).await.expect("Bulk revoke."), 0);
	}

	#[tokio::test]
	async fn exhausted_collisions_surface_an_error() {
		let tokens = TokenStore::new(Arc::new(CollidingRepository), &GuardConfig::default());
		let err = tokens
			.issue(&user("frank"), macros::datetime!(2025-01-01 00:00 UTC))
			.await
			.expect_err("Colliding inserts should exhaust retries.");

		assert!(matches!(err, Error::TokenGeneration { attempts: MAX_GENERATION_ATTEMPTS }));
	}
}
