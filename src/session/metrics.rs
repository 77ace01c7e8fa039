// std
use std::sync::atomic::{AtomicU64, Ordering};

/// Thread-safe counters for rotation attempts.
#[derive(Debug, Default)]
pub struct RotationMetrics {
	attempts: AtomicU64,
	rotated: AtomicU64,
	rejected: AtomicU64,
	reuse: AtomicU64,
}
impl RotationMetrics {
	/// Returns the total number of rotation attempts.
	pub fn attempts(&self) -> u64 {
		self.attempts.load(Ordering::Relaxed)
	}

	/// Returns the number of rotations that produced a new token.
	pub fn rotated(&self) -> u64 {
		self.rotated.load(Ordering::Relaxed)
	}

	/// Returns the number of rotations rejected for an invalid token.
	pub fn rejected(&self) -> u64 {
		self.rejected.load(Ordering::Relaxed)
	}

	/// Returns how many rejected rotations presented an already-revoked token.
	pub fn reuse_detected(&self) -> u64 {
		self.reuse.load(Ordering::Relaxed)
	}

	pub(crate) fn record_attempt(&self) {
		self.attempts.fetch_add(1, Ordering::Relaxed);
	}

	pub(crate) fn record_rotated(&self) {
		self.rotated.fetch_add(1, Ordering::Relaxed);
	}

	pub(crate) fn record_rejected(&self) {
		self.rejected.fetch_add(1, Ordering::Relaxed);
	}

	pub(crate) fn record_reuse(&self) {
		self.reuse.fetch_add(1, Ordering::Relaxed);
	}
}
