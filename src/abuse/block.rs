//! Block state machine, escalation curve, and the enforcer that owns block rows.

// self
use crate::{
	_prelude::*,
	abuse::RateLimitBlock,
	auth::ClientIp,
	config::{self, GuardConfig, secs},
	error::ConfigError,
	store::{self, BlockRepository},
};

/// Block state of one address at one instant.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BlockState {
	/// No block is in force.
	Clear,
	/// Requests are rejected until the given instant.
	Blocked {
		/// Instant the block lapses.
		until: OffsetDateTime,
	},
}
impl BlockState {
	/// Derives the state from the stored row; lapsed rows count as clear.
	pub fn at(block: Option<&RateLimitBlock>, now: OffsetDateTime) -> Self {
		match block {
			Some(block) if block.is_active_at(now) => Self::Blocked { until: block.block_until },
			_ => Self::Clear,
		}
	}

	/// Returns `true` for [`BlockState::Blocked`].
	pub fn is_blocked(&self) -> bool {
		matches!(self, Self::Blocked { .. })
	}

	/// Time left until the block lapses; zero when clear.
	pub fn remaining(&self, now: OffsetDateTime) -> Duration {
		match self {
			Self::Blocked { until } => (*until - now).max(Duration::ZERO),
			Self::Clear => Duration::ZERO,
		}
	}
}

/// Exponential escalation curve mapping a violation count to a block duration.
///
/// `duration(v)` is `None` below `threshold` and `min(base * factor^(v - threshold), max)`
/// otherwise, which never decreases as `v` grows.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EscalationPolicy {
	/// Violation count at which the first block is applied.
	pub threshold: u32,
	/// Duration of the first block.
	#[serde(with = "secs")]
	pub base: Duration,
	/// Multiplier applied for every violation past the threshold.
	pub factor: u32,
	/// Upper bound on any single block.
	#[serde(with = "secs")]
	pub max: Duration,
}
impl EscalationPolicy {
	/// Computes the block duration for `violations`, if any.
	pub fn duration(&self, violations: u32) -> Option<Duration> {
		if violations < self.threshold {
			return None;
		}
		if self.factor <= 1 {
			return Some(self.base.min(self.max));
		}

		let factor = i32::try_from(self.factor).unwrap_or(i32::MAX);
		let mut duration = self.base;

		for _ in self.threshold..violations {
			match duration.checked_mul(factor) {
				Some(next) if next < self.max => duration = next,
				_ => return Some(self.max),
			}
		}

		Some(duration.min(self.max))
	}

	pub(crate) fn validate(&self) -> Result<(), ConfigError> {
		if self.threshold == 0 {
			return Err(ConfigError::NonPositive { field: "escalation.threshold" });
		}
		if !self.base.is_positive() {
			return Err(ConfigError::NonPositive { field: "escalation.base" });
		}
		if self.factor == 0 {
			return Err(ConfigError::ShrinkingEscalation { factor: self.factor });
		}
		if self.max < self.base {
			return Err(ConfigError::InvertedEscalationBounds { base: self.base, max: self.max });
		}

		config::ensure_bounded("escalation.base", self.base)?;
		config::ensure_bounded("escalation.max", self.max)?;

		Ok(())
	}
}
impl Default for EscalationPolicy {
	fn default() -> Self {
		Self { threshold: 50, base: Duration::minutes(1), factor: 2, max: Duration::hours(24) }
	}
}

/// Owns [`RateLimitBlock`] rows and applies the escalation curve.
pub struct BlockEnforcer {
	repository: Arc<dyn BlockRepository>,
	policy: EscalationPolicy,
	store_timeout: Option<Duration>,
}
impl BlockEnforcer {
	/// Creates an enforcer over `repository`.
	pub fn new(repository: Arc<dyn BlockRepository>, config: &GuardConfig) -> Self {
		Self { repository, policy: config.escalation, store_timeout: config.store_timeout }
	}

	/// Escalation curve in use.
	pub fn policy(&self) -> &EscalationPolicy {
		&self.policy
	}

	/// Reads the block state of `ip` at `now`.
	pub async fn state(&self, ip: &ClientIp, now: OffsetDateTime) -> Result<BlockState> {
		let row =
			store::bounded("blocks.fetch", self.store_timeout, self.repository.fetch(ip)).await?;

		Ok(BlockState::at(row.as_ref(), now))
	}

	/// Returns `true` while `ip` is blocked.
	pub async fn is_blocked(&self, ip: &ClientIp, now: OffsetDateTime) -> Result<bool> {
		Ok(self.state(ip, now).await?.is_blocked())
	}

	/// Applies the escalation curve for `violations`.
	///
	/// Returns the stored block once it has been written, or `None` when the count is still below
	/// the threshold. An active block is never shortened.
	pub async fn escalate(
		&self,
		ip: &ClientIp,
		violations: u32,
		now: OffsetDateTime,
	) -> Result<Option<RateLimitBlock>> {
		let Some(duration) = self.policy.duration(violations) else {
			return Ok(None);
		};
		let block = store::bounded(
			"blocks.extend",
			self.store_timeout,
			self.repository.extend(ip, now.saturating_add(duration)),
		)
		.await?;

		tracing::info!(
			ip = %ip,
			violations,
			block_seconds = duration.whole_seconds(),
			block_until = %block.block_until,
			"Address blocked."
		);

		Ok(Some(block))
	}

	/// Removes any block on `ip`; returns whether one existed.
	pub async fn lift(&self, ip: &ClientIp) -> Result<bool> {
		let removed =
			store::bounded("blocks.remove", self.store_timeout, self.repository.remove(ip)).await?;

		if removed {
			tracing::info!(ip = %ip, "Block lifted.");
		}

		Ok(removed)
	}

	/// Deletes block rows that lapsed at or before `now`.
	pub async fn purge_lapsed(&self, now: OffsetDateTime) -> Result<u64> {
		store::bounded(
			"blocks.purge_lapsed",
			self.store_timeout,
			self.repository.purge_lapsed(now),
		)
		.await
	}
}
impl Debug for BlockEnforcer {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("BlockEnforcer").field("policy", &self.policy).finish()
	}
}

#[cfg(test)]
mod tests {
	// crates.io
	use time::macros;
	// self
	use super::*;
	use crate::store::MemoryStore;

	fn ip() -> ClientIp {
		ClientIp::new("203.0.113.7").expect("Client IP fixture should be valid.")
	}

	#[test]
	fn state_is_a_pure_function_of_block_until() {
		let until = macros::datetime!(2025-01-01 00:10 UTC);
		let block = RateLimitBlock { ip: ip(), block_until: until };

		assert_eq!(BlockState::at(None, until), BlockState::Clear);
		assert_eq!(
			BlockState::at(Some(&block), until - Duration::nanoseconds(1)),
			BlockState::Blocked { until }
		);
		assert_eq!(BlockState::at(Some(&block), until), BlockState::Clear);
		assert_eq!(
			BlockState::Blocked { until }.remaining(until - Duration::seconds(30)),
			Duration::seconds(30)
		);
		assert_eq!(BlockState::Clear.remaining(until), Duration::ZERO);
	}

	#[test]
	fn escalation_is_non_decreasing_and_capped() {
		let policy = EscalationPolicy {
			threshold: 3,
			base: Duration::seconds(60),
			factor: 2,
			max: Duration::minutes(10),
		};

		assert_eq!(policy.duration(2), None);
		assert_eq!(policy.duration(3), Some(Duration::seconds(60)));
		assert_eq!(policy.duration(4), Some(Duration::seconds(120)));
		assert_eq!(policy.duration(6), Some(Duration::seconds(480)));
		assert_eq!(policy.duration(7), Some(Duration::minutes(10)));
		assert_eq!(policy.duration(u32::MAX), Some(Duration::minutes(10)));

		let mut previous = Duration::ZERO;

		for violations in 3..40 {
			let current = policy.duration(violations).expect("Past threshold should block.");

			assert!(current >= previous);

			previous = current;
		}

		let flat = EscalationPolicy { factor: 1, ..policy };

		assert_eq!(flat.duration(1_000), Some(Duration::seconds(60)));
	}

	#[test]
	fn escalation_validation_rejects_inverted_bounds() {
		let policy = EscalationPolicy { max: Duration::seconds(1), ..EscalationPolicy::default() };

		assert!(matches!(policy.validate(), Err(ConfigError::InvertedEscalationBounds { .. })));
		assert!(matches!(
			EscalationPolicy { factor: 0, ..EscalationPolicy::default() }.validate(),
			Err(ConfigError::ShrinkingEscalation { factor: 0 })
		));
	}

	#[tokio::test]
	async fn escalate_writes_block_and_never_shortens_it() {
		let config = GuardConfig::builder()
			.escalation(EscalationPolicy {
				threshold: 2,
				base: Duration::minutes(10),
				factor: 2,
				max: Duration::hours(1),
			})
			.build()
			.expect("Escalation configuration should be valid.");
		let enforcer = BlockEnforcer::new(Arc::new(MemoryStore::default()), &config);
		let now = macros::datetime!(2025-01-01 00:00 UTC);

		assert!(enforcer.escalate(&ip(), 1, now).await.expect("Escalation lookup.").is_none());
		assert!(!enforcer.is_blocked(&ip(), now).await.expect("Block lookup."));

		let first = enforcer
			.escalate(&ip(), 3, now)
			.await
			.expect("Escalation should succeed.")
			.expect("Count past threshold should block.");

		assert_eq!(first.block_until, now + Duration::minutes(20));

		// A lower count later must not shorten the active block.
		let second = enforcer
			.escalate(&ip(), 2, now + Duration::minutes(1))
			.await
			.expect("Escalation should succeed.")
			.expect("Count at threshold should block.");

		assert_eq!(second.block_until, first.block_until);
		assert!(
			enforcer
				.is_blocked(&ip(), first.block_until - Duration::seconds(1))
				.await
				.expect("Block lookup.")
		);
		assert!(!enforcer.is_blocked(&ip(), first.block_until).await.expect("Block lookup."));
		assert_eq!(
			enforcer.purge_lapsed(first.block_until - Duration::seconds(1)).await.ok(),
			Some(0)
		);
		assert!(enforcer.lift(&ip()).await.expect("Lift should succeed."));
		assert!(!enforcer.is_blocked(&ip(), now).await.expect("Block lookup."));
	}

	#[tokio::test]
	async fn oversized_blocks_saturate_at_the_date_range() {
		let huge = Duration::seconds(i64::MAX);
		let config = GuardConfig {
			escalation: EscalationPolicy { threshold: 1, base: huge, factor: 2, max: huge },
			..GuardConfig::default()
		};
		let enforcer = BlockEnforcer::new(Arc::new(MemoryStore::default()), &config);
		let now = macros::datetime!(2025-01-01 00:00 UTC);
		let block = enforcer
			.escalate(&ip(), 2, now)
			.await
			.expect("Escalation should succeed.")
			.expect("Count past threshold should block.");

		assert!(block.block_until > now + Duration::days(3650));
		assert!(
			enforcer.is_blocked(&ip(), now + Duration::days(3650)).await.expect("Block lookup.")
		);
	}
}
