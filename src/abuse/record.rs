//! Persisted rows of the per-IP abuse-tracking aggregate.
//!
//! The three rows share the raw [`ClientIp`] key but follow separate lifecycles: an ephemeral
//! request log, a cumulative violation counter, and an active penalty.

// self
use crate::{
	_prelude::*,
	auth::{ClientIp, RequestId},
};

/// One observed inbound request; append-only.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitRequest {
	/// Opaque unique identifier.
	pub id: RequestId,
	/// Client address the request came from.
	pub ip: ClientIp,
	/// Observation instant.
	pub timestamp: OffsetDateTime,
}
impl RateLimitRequest {
	/// Creates a log entry with a fresh identifier.
	pub fn new(ip: ClientIp, timestamp: OffsetDateTime) -> Self {
		Self { id: RequestId::random(), ip, timestamp }
	}
}

/// Cumulative violation count for one client address.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitViolation {
	/// Client address (unique).
	pub ip: ClientIp,
	/// Number of violations in the current escalation cycle.
	pub violations: u32,
	/// Instant of the most recent violation; drives the decay policy.
	pub last_violation_at: OffsetDateTime,
}

/// Active or lapsed penalty for one client address.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitBlock {
	/// Client address (unique).
	pub ip: ClientIp,
	/// The block is active while `now < block_until`.
	pub block_until: OffsetDateTime,
}
impl RateLimitBlock {
	/// Returns `true` while the block is in force.
	pub fn is_active_at(&self, now: OffsetDateTime) -> bool {
		now < self.block_until
	}
}
