//! Per-address violation counts feeding block escalation.

// self
use crate::{
	_prelude::*,
	abuse::RateLimitViolation,
	auth::ClientIp,
	config::GuardConfig,
	store::{self, ViolationRepository},
};

/// Owns the [`RateLimitViolation`] rows.
///
/// Counts only grow within an escalation cycle. When a decay period is configured, the first
/// violation after a quiet period of at least that length restarts the count at `1`; the reset
/// happens inside the repository's atomic increment.
pub struct ViolationLedger {
	repository: Arc<dyn ViolationRepository>,
	decay: Option<Duration>,
	store_timeout: Option<Duration>,
}
impl ViolationLedger {
	/// Creates a ledger over `repository`.
	pub fn new(repository: Arc<dyn ViolationRepository>, config: &GuardConfig) -> Self {
		Self { repository, decay: config.violation_decay, store_timeout: config.store_timeout }
	}

	/// Registers one violation for `ip` and returns the updated count.
	pub async fn register_violation(&self, ip: &ClientIp, now: OffsetDateTime) -> Result<u32> {
		let reset_before = self.decay.map(|decay| now - decay);
		let row = store::bounded(
			"violations.increment",
			self.store_timeout,
			self.repository.increment(ip, now, reset_before),
		)
		.await?;

		tracing::debug!(ip = %ip, violations = row.violations, "Violation registered.");

		Ok(row.violations)
	}

	/// Returns the stored counter for `ip`, if any.
	pub async fn violations(&self, ip: &ClientIp) -> Result<Option<RateLimitViolation>> {
		store::bounded("violations.fetch", self.store_timeout, self.repository.fetch(ip)).await
	}

	/// Clears the counter for `ip`; returns whether one existed.
	pub async fn pardon(&self, ip: &ClientIp) -> Result<bool> {
		let removed =
			store::bounded("violations.remove", self.store_timeout, self.repository.remove(ip))
				.await?;

		if removed {
			tracing::info!(ip = %ip, "Violations pardoned.");
		}

		Ok(removed)
	}

	/// Deletes counters that have been quiet for the whole decay period as of `now`.
	///
	/// Such a counter would restart at `1` anyway. Without a decay period nothing is removed.
	pub async fn purge_decayed(&self, now: OffsetDateTime) -> Result<u64> {
		let Some(decay) = self.decay else {
			return Ok(0);
		};

		store::bounded(
			"violations.purge_decayed",
			self.store_timeout,
			self.repository.purge_decayed(now - decay),
		)
		.await
	}
}
impl Debug for ViolationLedger {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("ViolationLedger").field("decay", &self.decay).finish()
	}
}
