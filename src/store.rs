//! Storage contracts and built-in store implementations for tokens and abuse-tracking rows.
//!
//! Each persisted entity gets a minimal repository: point lookup by unique key, a conditional or
//! incrementing upsert, and a range delete for retention. Implementations must perform the
//! conditional operations atomically per key; the guard never emulates them with
//! read-then-write sequences.

pub mod file;
pub mod memory;

pub use file::FileStore;
pub use memory::MemoryStore;

// self
use crate::{
	_prelude::*,
	abuse::{RateLimitBlock, RateLimitRequest, RateLimitViolation},
	auth::{ClientIp, RefreshToken, SessionFamily, TokenDigest, UserId},
};

/// Boxed future returned by every repository method.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StoreError>> + 'a + Send>>;

/// Persistence contract for refresh tokens.
pub trait TokenRepository
where
	Self: Send + Sync,
{
	/// Inserts a new record unless its digest is already taken.
	fn insert(&self, record: RefreshToken) -> StoreFuture<'_, InsertOutcome>;

	/// Fetches the record stored under `digest`, if present.
	fn fetch_by_digest<'a>(
		&'a self,
		digest: &'a TokenDigest,
	) -> StoreFuture<'a, Option<RefreshToken>>;

	/// Atomically revokes the record under `digest` when `condition` holds at `instant`.
	fn revoke<'a>(
		&'a self,
		digest: &'a TokenDigest,
		condition: RevokeCondition,
		instant: OffsetDateTime,
	) -> StoreFuture<'a, RevokeOutcome>;

	/// Revokes every unrevoked record matching `scope`, returning how many changed.
	fn revoke_where<'a>(
		&'a self,
		scope: &'a RevokeScope,
		instant: OffsetDateTime,
	) -> StoreFuture<'a, u64>;

	/// Deletes records that expired before `before`, returning how many were removed.
	fn purge_expired(&self, before: OffsetDateTime) -> StoreFuture<'_, u64>;
}

/// Persistence contract for the append-only request log.
pub trait RequestLogRepository
where
	Self: Send + Sync,
{
	/// Appends one observed request.
	fn append(&self, request: RateLimitRequest) -> StoreFuture<'_, ()>;

	/// Counts requests from `ip` observed at or after `since`.
	fn count_since<'a>(&'a self, ip: &'a ClientIp, since: OffsetDateTime) -> StoreFuture<'a, u64>;

	/// Deletes entries observed before `instant`, returning how many were removed.
	fn prune_before(&self, instant: OffsetDateTime) -> StoreFuture<'_, u64>;
}

/// Persistence contract for per-IP violation counters.
pub trait ViolationRepository
where
	Self: Send + Sync,
{
	/// Fetches the counter for `ip`, if present.
	fn fetch<'a>(&'a self, ip: &'a ClientIp) -> StoreFuture<'a, Option<RateLimitViolation>>;

	/// Atomically increments the counter for `ip`, creating it at `1`.
	///
	/// When `reset_before` is set and the stored `last_violation_at` is not later than it, the
	/// count restarts at `1` within the same atomic step.
	fn increment<'a>(
		&'a self,
		ip: &'a ClientIp,
		now: OffsetDateTime,
		reset_before: Option<OffsetDateTime>,
	) -> StoreFuture<'a, RateLimitViolation>;

	/// Removes the counter for `ip`, returning whether one existed.
	fn remove<'a>(&'a self, ip: &'a ClientIp) -> StoreFuture<'a, bool>;

	/// Deletes counters whose `last_violation_at` is not later than `before`.
	fn purge_decayed(&self, before: OffsetDateTime) -> StoreFuture<'_, u64>;
}

/// Persistence contract for per-IP blocks.
pub trait BlockRepository
where
	Self: Send + Sync,
{
	/// Fetches the block row for `ip`, if present.
	fn fetch<'a>(&'a self, ip: &'a ClientIp) -> StoreFuture<'a, Option<RateLimitBlock>>;

	/// Upserts the block for `ip`, keeping whichever of the stored and proposed `block_until` is
	/// later, and returns the stored row.
	fn extend<'a>(
		&'a self,
		ip: &'a ClientIp,
		until: OffsetDateTime,
	) -> StoreFuture<'a, RateLimitBlock>;

	/// Removes the block row for `ip`, returning whether one existed.
	fn remove<'a>(&'a self, ip: &'a ClientIp) -> StoreFuture<'a, bool>;

	/// Deletes rows whose block lapsed at or before `now`, returning how many were removed.
	fn purge_lapsed(&self, now: OffsetDateTime) -> StoreFuture<'_, u64>;
}

/// Result of a unique-digest insert.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum InsertOutcome {
	/// The record was stored.
	Inserted,
	/// Another record already owns the digest; nothing was written.
	DuplicateDigest,
}

/// Precondition checked by [`TokenRepository::revoke`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RevokeCondition {
	/// Revoke only if unrevoked and unexpired at the revocation instant (rotation).
	Active,
	/// Revoke if unrevoked, regardless of expiry (explicit sign-out).
	Unrevoked,
}

/// Result of a conditional revocation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RevokeOutcome {
	/// This call revoked the record; the updated row is returned.
	Revoked(RefreshToken),
	/// The record was already revoked; it is returned unchanged.
	AlreadyRevoked(RefreshToken),
	/// The record had expired and the condition required an active token.
	Expired(RefreshToken),
	/// No record matched the digest.
	Missing,
}
impl RevokeOutcome {
	pub(crate) fn evaluate(
		record: &mut RefreshToken,
		condition: RevokeCondition,
		instant: OffsetDateTime,
	) -> Self {
		if record.is_revoked() {
			return Self::AlreadyRevoked(record.clone());
		}
		if matches!(condition, RevokeCondition::Active) && record.is_expired_at(instant) {
			return Self::Expired(record.clone());
		}

		record.revoke(instant);

		Self::Revoked(record.clone())
	}
}

/// Selects the records affected by [`TokenRepository::revoke_where`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RevokeScope {
	/// Every token owned by a user.
	User(UserId),
	/// Every token in one rotation chain.
	Family(SessionFamily),
}
impl RevokeScope {
	/// Returns `true` if `record` falls within the scope.
	pub fn matches(&self, record: &RefreshToken) -> bool {
		match self {
			Self::User(user_id) => &record.user_id == user_id,
			Self::Family(family) => &record.family == family,
		}
	}
}

/// Error type produced by repository implementations.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ThisError)]
pub enum StoreError {
	/// The backing store could not be reached.
	#[error("Store unavailable: {message}.")]
	Unavailable {
		/// Human-readable error payload.
		message: String,
	},
	/// Serialization failures surfaced by the backend.
	#[error("Serialization error: {message}.")]
	Serialization {
		/// Human-readable error payload.
		message: String,
	},
	/// Backend-level failure for the storage engine.
	#[error("Backend failure: {message}.")]
	Backend {
		/// Human-readable error payload.
		message: String,
	},
}

/// Awaits a repository future, bounding it by `timeout` when one is configured.
pub(crate) async fn bounded<T, F>(
	operation: &'static str,
	timeout: Option<Duration>,
	fut: F,
) -> Result<T>
where
	F: Future<Output = Result<T, StoreError>>,
{
	match timeout {
		Some(limit) => match tokio::time::timeout(limit.unsigned_abs(), fut).await {
			Ok(result) => result.map_err(Error::from),
			Err(_) => Err(Error::StoreTimeout { operation, timeout: limit }),
		},
		None => fut.await.map_err(Error::from),
	}
}

#[cfg(test)]
mod tests {
	// std
	use std::error::Error as StdError;
	// crates.io
	use time::macros;
	// self
	use super::*;

	fn record(user: &str) -> RefreshToken {
		RefreshToken::builder(UserId::new(user).expect("User fixture should be valid."))
			.digest(TokenDigest::of(user))
			.issued_at(macros::datetime!(2025-01-01 00:00 UTC))
			.expires_in(Duration::hours(1))
			.build()
			.expect("Refresh token fixture should build.")
	}

	#[test]
	fn store_error_converts_into_guard_error_with_source() {
		let store_error = StoreError::Backend { message: "database unreachable".into() };
		let guard_error: Error = store_error.clone().into();

		assert!(matches!(guard_error, Error::Storage(_)));
		assert!(guard_error.to_string().contains("database unreachable"));
		assert!(!guard_error.is_store_unavailable());

		let source = StdError::source(&guard_error)
			.expect("Guard error should expose the original store error as its source.");

		assert_eq!(source.to_string(), store_error.to_string());

		let unavailable: Error = StoreError::Unavailable { message: "down".into() }.into();

		assert!(unavailable.is_store_unavailable());
	}

	#[test]
	fn revoke_outcome_respects_conditions() {
		let mut expired = record("user-expired");
		let late = macros::datetime!(2025-01-01 02:00 UTC);

		assert!(matches!(
			RevokeOutcome::evaluate(&mut expired, RevokeCondition::Active, late),
			RevokeOutcome::Expired(_)
		));
		assert!(expired.revoked_at.is_none());
		assert!(matches!(
			RevokeOutcome::evaluate(&mut expired, RevokeCondition::Unrevoked, late),
			RevokeOutcome::Revoked(_)
		));

		let outcome = RevokeOutcome::evaluate(&mut expired, RevokeCondition::Unrevoked, late);

		assert!(matches!(
			outcome,
			RevokeOutcome::AlreadyRevoked(ref row) if row.revoked_at == Some(late)
		));
	}

	#[test]
	fn revoke_scope_matches_user_and_family() {
		let token = record("user-1");

		assert!(RevokeScope::User(token.user_id.clone()).matches(&token));
		assert!(RevokeScope::Family(token.family).matches(&token));
		assert!(!RevokeScope::Family(SessionFamily::random()).matches(&token));
	}

	#[tokio::test]
	async fn bounded_maps_elapsed_deadlines_to_timeouts() {
		let slow = async {
			tokio::time::sleep(std::time::Duration::from_millis(200)).await;

			Ok::<_, StoreError>(())
		};
		let err = bounded("slow", Some(Duration::milliseconds(10)), slow)
			.await
			.expect_err("Slow store calls should time out.");

		assert!(matches!(err, Error::StoreTimeout { operation: "slow", .. }));
		assert!(err.is_store_unavailable());

		let value = bounded("fast", None, async { Ok::<_, StoreError>(7) })
			.await
			.expect("Unbounded store calls should resolve.");

		assert_eq!(value, 7);
	}
}
