//! Single admission decision composed from the counter, ledger, and enforcer.

// self
use crate::{
	_prelude::*,
	abuse::{BlockEnforcer, BlockState, RateCounter, ViolationLedger},
	auth::ClientIp,
	clock::Clock,
	config::{FailurePolicy, GuardConfig},
	obs::{self, OpKind, OpSpan},
	store::{BlockRepository, RequestLogRepository, ViolationRepository},
};

const UNAVAILABLE_RETRY: Duration = Duration::seconds(1);

/// Why a request was refused.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DenyReason {
	/// The address is serving an active block.
	Blocked,
	/// The request pushed the address over the per-window threshold.
	RateLimited,
	/// The store was unreachable and the deployment fails closed.
	Unavailable,
}
impl DenyReason {
	/// Returns a stable label suitable for logs, metrics, or response bodies.
	pub const fn as_str(self) -> &'static str {
		match self {
			DenyReason::Blocked => "blocked",
			DenyReason::RateLimited => "rate_limited",
			DenyReason::Unavailable => "unavailable",
		}
	}
}
impl Display for DenyReason {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// Refusal details handed to the transport layer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Denial {
	/// Why the request was refused.
	pub reason: DenyReason,
	/// How long the client should wait before retrying.
	pub retry_after: Duration,
}
impl Denial {
	/// Retry hint rounded up to whole seconds, as used by `Retry-After` headers.
	pub fn retry_after_seconds(&self) -> u64 {
		let secs = self.retry_after.whole_seconds().max(0) as u64;

		if self.retry_after.subsec_nanoseconds() > 0 { secs + 1 } else { secs }
	}
}

/// Result of [`AbuseControl::admit`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Admission {
	/// The request may proceed.
	Allow {
		/// Requests seen from the address in the current window, this one included.
		rate: u64,
	},
	/// The request must be refused.
	Deny(Denial),
}
impl Admission {
	fn deny(reason: DenyReason, retry_after: Duration) -> Self {
		Self::Deny(Denial { reason, retry_after: retry_after.max(Duration::ZERO) })
	}

	/// Returns `true` for [`Admission::Allow`].
	pub fn is_allowed(&self) -> bool {
		matches!(self, Self::Allow { .. })
	}

	/// Returns the denial, if any.
	pub fn denial(&self) -> Option<&Denial> {
		match self {
			Self::Deny(denial) => Some(denial),
			Self::Allow { .. } => None,
		}
	}

	/// Stable label for logs and metrics.
	pub fn label(&self) -> &'static str {
		match self {
			Self::Allow { .. } => "allow",
			Self::Deny(denial) => denial.reason.as_str(),
		}
	}
}

enum Fallback {
	Proceed,
	Deny,
}

/// Admission facade consulted before any authenticated action.
pub struct AbuseControl {
	counter: RateCounter,
	ledger: ViolationLedger,
	enforcer: BlockEnforcer,
	clock: Arc<dyn Clock>,
	rate_threshold: u64,
	block_lookup_failure: FailurePolicy,
	rate_counting_failure: FailurePolicy,
}
impl AbuseControl {
	/// Creates a facade over separate repositories.
	pub fn new(
		log: Arc<dyn RequestLogRepository>,
		violations: Arc<dyn ViolationRepository>,
		blocks: Arc<dyn BlockRepository>,
		clock: Arc<dyn Clock>,
		config: &GuardConfig,
	) -> Self {
		Self {
			counter: RateCounter::new(log, config),
			ledger: ViolationLedger::new(violations, config),
			enforcer: BlockEnforcer::new(blocks, config),
			clock,
			rate_threshold: config.rate_threshold,
			block_lookup_failure: config.block_lookup_failure,
			rate_counting_failure: config.rate_counting_failure,
		}
	}

	/// Creates a facade over one store that implements every abuse repository.
	pub fn with_store<S>(store: Arc<S>, clock: Arc<dyn Clock>, config: &GuardConfig) -> Self
	where
		S: 'static + RequestLogRepository + ViolationRepository + BlockRepository,
	{
		Self::new(store.clone(), store.clone(), store, clock, config)
	}

	/// Request counter component.
	pub fn counter(&self) -> &RateCounter {
		&self.counter
	}

	/// Violation ledger component.
	pub fn ledger(&self) -> &ViolationLedger {
		&self.ledger
	}

	/// Block enforcer component.
	pub fn enforcer(&self) -> &BlockEnforcer {
		&self.enforcer
	}

	/// Decides whether a request from `ip` may proceed, using the injected clock.
	pub async fn admit(&self, ip: &ClientIp) -> Result<Admission> {
		self.admit_at(ip, self.clock.now()).await
	}

	/// Decides whether a request from `ip` may proceed at `now`.
	///
	/// Blocked addresses are refused without being counted. A request that crosses the threshold
	/// is refused on the spot and, if it escalates, its block is stored before this returns.
	pub async fn admit_at(&self, ip: &ClientIp, now: OffsetDateTime) -> Result<Admission> {
		let span = OpSpan::new(OpKind::Admit);
		let result = span.instrument(self.decide(ip, now)).await;

		match &result {
			Ok(admission) => obs::record_admission(admission.label()),
			Err(_) => obs::record_admission("error"),
		}

		result
	}

	async fn decide(&self, ip: &ClientIp, now: OffsetDateTime) -> Result<Admission> {
		match self.enforcer.state(ip, now).await {
			Ok(BlockState::Blocked { until }) => {
				tracing::debug!(ip = %ip, block_until = %until, "Blocked address refused.");

				return Ok(Admission::deny(DenyReason::Blocked, until - now));
			},
			Ok(BlockState::Clear) => {},
			Err(e) => match self.fallback(self.block_lookup_failure, e, ip, "block lookup")? {
				Fallback::Proceed => {},
				Fallback::Deny =>
					return Ok(Admission::deny(DenyReason::Unavailable, UNAVAILABLE_RETRY)),
			},
		}

		let rate = match self.counter.record(ip, now).await {
			Ok(rate) => rate,
			Err(e) => match self.fallback(self.rate_counting_failure, e, ip, "request count")? {
				Fallback::Proceed => return Ok(Admission::Allow { rate: 0 }),
				Fallback::Deny =>
					return Ok(Admission::deny(DenyReason::Unavailable, UNAVAILABLE_RETRY)),
			},
		};

		if rate <= self.rate_threshold {
			tracing::debug!(ip = %ip, rate, "Request admitted.");

			return Ok(Admission::Allow { rate });
		}

		let block = match self.ledger.register_violation(ip, now).await {
			Ok(violations) => match self.enforcer.escalate(ip, violations, now).await {
				Ok(block) => block,
				Err(e) => {
					self.fallback(self.rate_counting_failure, e, ip, "block write")?;

					None
				},
			},
			Err(e) => {
				self.fallback(self.rate_counting_failure, e, ip, "violation write")?;

				None
			},
		};
		let retry_after = match &block {
			Some(block) => block.block_until - now,
			None => self.counter.window(),
		};

		tracing::info!(
			ip = %ip,
			rate,
			threshold = self.rate_threshold,
			blocked = block.is_some(),
			"Rate limit exceeded."
		);

		Ok(Admission::deny(DenyReason::RateLimited, retry_after))
	}

	fn fallback(
		&self,
		policy: FailurePolicy,
		error: Error,
		ip: &ClientIp,
		concern: &'static str,
	) -> Result<Fallback> {
		match policy {
			FailurePolicy::FailOpen => {
				tracing::warn!(ip = %ip, error = %error, concern, "Store failure; failing open.");

				Ok(Fallback::Proceed)
			},
			FailurePolicy::FailClosed => {
				tracing::warn!(
					ip = %ip,
					error = %error,
					concern,
					"Store failure; failing closed."
				);

				Ok(Fallback::Deny)
			},
			FailurePolicy::Propagate => Err(error),
		}
	}
}
impl Debug for AbuseControl {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("AbuseControl")
			.field("rate_threshold", &self.rate_threshold)
			.field("counter", &self.counter)
			.field("ledger", &self.ledger)
			.field("enforcer", &self.enforcer)
			.finish()
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn retry_after_rounds_up_to_whole_seconds() {
		let denial =
			Denial { reason: DenyReason::Blocked, retry_after: Duration::milliseconds(59_001) };

		assert_eq!(denial.retry_after_seconds(), 60);
		assert_eq!(
			Denial { reason: DenyReason::RateLimited, retry_after: Duration::seconds(60) }
				.retry_after_seconds(),
			60
		);
		assert_eq!(
			Admission::deny(DenyReason::Blocked, Duration::seconds(-5))
				.denial()
				.map(Denial::retry_after_seconds),
			Some(0)
		);
	}

	#[test]
	fn labels_are_stable() {
		assert_eq!(Admission::Allow { rate: 1 }.label(), "allow");
		assert_eq!(
			Admission::deny(DenyReason::RateLimited, Duration::ZERO).label(),
			"rate_limited"
		);
		assert_eq!(DenyReason::Unavailable.to_string(), "unavailable");
	}
}
