//! Sharded in-memory repositories for single-node deployments and tests.

// std
use std::collections::VecDeque;
// crates.io
use dashmap::{DashMap, mapref::entry::Entry};
// self
use crate::{
	_prelude::*,
	abuse::{RateLimitBlock, RateLimitRequest, RateLimitViolation},
	auth::{ClientIp, RefreshToken, TokenDigest},
	store::{
		BlockRepository, InsertOutcome, RequestLogRepository, RevokeCondition, RevokeOutcome,
		RevokeScope, StoreFuture, TokenRepository, ViolationRepository,
	},
};

#[derive(Debug, Default)]
struct Tables {
	tokens: DashMap<TokenDigest, RefreshToken>,
	requests: DashMap<ClientIp, VecDeque<RateLimitRequest>>,
	violations: DashMap<ClientIp, RateLimitViolation>,
	blocks: DashMap<ClientIp, RateLimitBlock>,
}

/// Thread-safe storage backend that keeps every table in-process.
///
/// Each table is a [`DashMap`], so conditional updates lock only the shard that owns the key and
/// unrelated IPs or tokens never contend.
#[derive(Clone, Debug, Default)]
pub struct MemoryStore(Arc<Tables>);
impl MemoryStore {
	/// Number of stored token records (revoked ones included).
	pub fn token_count(&self) -> usize {
		self.0.tokens.len()
	}

	/// Number of request-log entries across all addresses.
	pub fn request_log_len(&self) -> usize {
		self.0.requests.iter().map(|entry| entry.value().len()).sum()
	}

	fn insert_now(&self, record: RefreshToken) -> InsertOutcome {
		match self.0.tokens.entry(record.digest.clone()) {
			Entry::Occupied(_) => InsertOutcome::DuplicateDigest,
			Entry::Vacant(slot) => {
				slot.insert(record);

				InsertOutcome::Inserted
			},
		}
	}

	fn revoke_now(
		&self,
		digest: &TokenDigest,
		condition: RevokeCondition,
		instant: OffsetDateTime,
	) -> RevokeOutcome {
		match self.0.tokens.get_mut(digest) {
			Some(mut record) => RevokeOutcome::evaluate(&mut record, condition, instant),
			None => RevokeOutcome::Missing,
		}
	}

	fn revoke_where_now(&self, scope: &RevokeScope, instant: OffsetDateTime) -> u64 {
		let mut changed = 0;

		for mut entry in self.0.tokens.iter_mut() {
			if scope.matches(entry.value()) && entry.value_mut().revoke(instant) {
				changed += 1;
			}
		}

		changed
	}

	fn purge_expired_now(&self, before: OffsetDateTime) -> u64 {
		let before_len = self.0.tokens.len();

		self.0.tokens.retain(|_, record| record.expires_at >= before);

		before_len.saturating_sub(self.0.tokens.len()) as u64
	}

	fn prune_requests_now(&self, instant: OffsetDateTime) -> u64 {
		let mut removed = 0;

		for mut entry in self.0.requests.iter_mut() {
			let log = entry.value_mut();
			let len = log.len();

			log.retain(|request| request.timestamp >= instant);

			removed += (len - log.len()) as u64;
		}

		self.0.requests.retain(|_, log| !log.is_empty());

		removed
	}

	fn increment_now(
		&self,
		ip: &ClientIp,
		now: OffsetDateTime,
		reset_before: Option<OffsetDateTime>,
	) -> RateLimitViolation {
		let mut row = self.0.violations.entry(ip.clone()).or_insert_with(|| RateLimitViolation {
			ip: ip.clone(),
			violations: 0,
			last_violation_at: now,
		});
		let decayed = reset_before.is_some_and(|cutoff| row.last_violation_at <= cutoff);

		row.violations = if decayed { 1 } else { row.violations.saturating_add(1) };
		row.last_violation_at = now;

		row.clone()
	}

	fn purge_decayed_now(&self, before: OffsetDateTime) -> u64 {
		let before_len = self.0.violations.len();

		self.0.violations.retain(|_, row| row.last_violation_at > before);

		before_len.saturating_sub(self.0.violations.len()) as u64
	}

	fn extend_now(&self, ip: &ClientIp, until: OffsetDateTime) -> RateLimitBlock {
		let mut row = self
			.0
			.blocks
			.entry(ip.clone())
			.or_insert_with(|| RateLimitBlock { ip: ip.clone(), block_until: until });

		if row.block_until < until {
			row.block_until = until;
		}

		row.clone()
	}

	fn purge_lapsed_now(&self, now: OffsetDateTime) -> u64 {
		let before_len = self.0.blocks.len();

		self.0.blocks.retain(|_, block| block.is_active_at(now));

		before_len.saturating_sub(self.0.blocks.len()) as u64
	}
}
impl TokenRepository for MemoryStore {
	fn insert(&self, record: RefreshToken) -> StoreFuture<'_, InsertOutcome> {
		let outcome = self.insert_now(record);

		Box::pin(async move { Ok(outcome) })
	}

	fn fetch_by_digest<'a>(
		&'a self,
		digest: &'a TokenDigest,
	) -> StoreFuture<'a, Option<RefreshToken>> {
		Box::pin(async move { Ok(self.0.tokens.get(digest).map(|record| record.clone())) })
	}

	fn revoke<'a>(
		&'a self,
		digest: &'a TokenDigest,
		condition: RevokeCondition,
		instant: OffsetDateTime,
	) -> StoreFuture<'a, RevokeOutcome> {
		Box::pin(async move { Ok(self.revoke_now(digest, condition, instant)) })
	}

	fn revoke_where<'a>(
		&'a self,
		scope: &'a RevokeScope,
		instant: OffsetDateTime,
	) -> StoreFuture<'a, u64> {
		Box::pin(async move { Ok(self.revoke_where_now(scope, instant)) })
	}

	fn purge_expired(&self, before: OffsetDateTime) -> StoreFuture<'_, u64> {
		Box::pin(async move { Ok(self.purge_expired_now(before)) })
	}
}
impl RequestLogRepository for MemoryStore {
	fn append(&self, request: RateLimitRequest) -> StoreFuture<'_, ()> {
		Box::pin(async move {
			self.0.requests.entry(request.ip.clone()).or_default().push_back(request);

			Ok(())
		})
	}

	fn count_since<'a>(&'a self, ip: &'a ClientIp, since: OffsetDateTime) -> StoreFuture<'a, u64> {
		Box::pin(async move {
			let count = self.0.requests.get(ip).map_or(0, |log| {
				log.iter().filter(|request| request.timestamp >= since).count() as u64
			});

			Ok(count)
		})
	}

	fn prune_before(&self, instant: OffsetDateTime) -> StoreFuture<'_, u64> {
		Box::pin(async move { Ok(self.prune_requests_now(instant)) })
	}
}
impl ViolationRepository for MemoryStore {
	fn fetch<'a>(&'a self, ip: &'a ClientIp) -> StoreFuture<'a, Option<RateLimitViolation>> {
		Box::pin(async move { Ok(self.0.violations.get(ip).map(|row| row.clone())) })
	}

	fn increment<'a>(
		&'a self,
		ip: &'a ClientIp,
		now: OffsetDateTime,
		reset_before: Option<OffsetDateTime>,
	) -> StoreFuture<'a, RateLimitViolation> {
		Box::pin(async move { Ok(self.increment_now(ip, now, reset_before)) })
	}

	fn remove<'a>(&'a self, ip: &'a ClientIp) -> StoreFuture<'a, bool> {
		Box::pin(async move { Ok(self.0.violations.remove(ip).is_some()) })
	}

	fn purge_decayed(&self, before: OffsetDateTime) -> StoreFuture<'_, u64> {
		Box::pin(async move { Ok(self.purge_decayed_now(before)) })
	}
}
impl BlockRepository for MemoryStore {
	fn fetch<'a>(&'a self, ip: &'a ClientIp) -> StoreFuture<'a, Option<RateLimitBlock>> {
		Box::pin(async move { Ok(self.0.blocks.get(ip).map(|row| row.clone())) })
	}

	fn extend<'a>(
		&'a self,
		ip: &'a ClientIp,
		until: OffsetDateTime,
	) -> StoreFuture<'a, RateLimitBlock> {
		Box::pin(async move { Ok(self.extend_now(ip, until)) })
	}

	fn remove<'a>(&'a self, ip: &'a ClientIp) -> StoreFuture<'a, bool> {
		Box::pin(async move { Ok(self.0.blocks.remove(ip).is_some()) })
	}

	fn purge_lapsed(&self, now: OffsetDateTime) -> StoreFuture<'_, u64> {
		Box::pin(async move { Ok(self.purge_lapsed_now(now)) })
	}
}
