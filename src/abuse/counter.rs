//! Sliding-window request counter keyed by client address.

// crates.io
use dashmap::DashMap;
// self
use crate::{
	_prelude::*,
	abuse::RateLimitRequest,
	auth::ClientIp,
	config::{FailurePolicy, GuardConfig},
	store::{self, RequestLogRepository},
};

/// Fixed ring of time buckets covering one window plus the bucket currently filling.
///
/// A request stays counted until its whole bucket has left the window, so the reported rate may
/// include requests up to one bucket span older than the window but never misses one inside it.
#[derive(Clone, Debug)]
struct SlidingWindow {
	slots: Vec<(i64, u64)>,
	newest: i64,
}
impl SlidingWindow {
	fn new(buckets: u32) -> Self {
		Self { slots: vec![(i64::MIN, 0); buckets as usize + 1], newest: i64::MIN }
	}

	fn hit(&mut self, slot: i64) -> u64 {
		let idx = slot.rem_euclid(self.slots.len() as i64) as usize;
		let bucket = &mut self.slots[idx];

		if bucket.0 != slot {
			*bucket = (slot, 0);
		}

		bucket.1 += 1;
		self.newest = self.newest.max(slot);

		self.total(slot)
	}

	fn total(&self, slot: i64) -> u64 {
		let oldest = slot.saturating_sub(self.slots.len() as i64 - 1);

		self.slots
			.iter()
			.filter(|(bucket_slot, _)| (oldest..=slot).contains(bucket_slot))
			.map(|(_, count)| count)
			.sum()
	}

	fn is_idle(&self, slot: i64) -> bool {
		self.newest < slot.saturating_sub(self.slots.len() as i64 - 1)
	}
}

/// Records inbound requests and reports the per-address rate over the trailing window.
///
/// The in-memory ring is the read path; the request log is the audit trail. Each address owns one
/// map entry and is updated under that entry's shard lock, so concurrent requests from one
/// address can never both observe a pre-increment count.
pub struct RateCounter {
	windows: DashMap<ClientIp, SlidingWindow>,
	log: Arc<dyn RequestLogRepository>,
	buckets: u32,
	bucket_nanos: i128,
	window: Duration,
	store_timeout: Option<Duration>,
	failure: FailurePolicy,
}
impl RateCounter {
	/// Creates a counter that appends every observation to `log`.
	pub fn new(log: Arc<dyn RequestLogRepository>, config: &GuardConfig) -> Self {
		Self {
			windows: DashMap::new(),
			log,
			buckets: config.window_buckets,
			bucket_nanos: config.bucket_span().whole_nanoseconds().max(1),
			window: config.rate_window,
			store_timeout: config.store_timeout,
			failure: config.rate_counting_failure,
		}
	}

	/// Length of the trailing window.
	pub fn window(&self) -> Duration {
		self.window
	}

	/// Records one request from `ip` at `now` and returns the rate including it.
	///
	/// A failed log append is logged and ignored under [`FailurePolicy::FailOpen`]; any other
	/// policy returns the error so the caller can apply it.
	pub async fn record(&self, ip: &ClientIp, now: OffsetDateTime) -> Result<u64> {
		let slot = self.slot_of(now);
		let rate = self
			.windows
			.entry(ip.clone())
			.or_insert_with(|| SlidingWindow::new(self.buckets))
			.hit(slot);

		tracing::trace!(ip = %ip, rate, "Request recorded.");

		let appended = store::bounded(
			"request_log.append",
			self.store_timeout,
			self.log.append(RateLimitRequest::new(ip.clone(), now)),
		)
		.await;

		match appended {
			Ok(()) => Ok(rate),
			Err(e) if matches!(self.failure, FailurePolicy::FailOpen) => {
				tracing::warn!(
					ip = %ip,
					error = %e,
					"Request log append failed; counting in memory only."
				);

				Ok(rate)
			},
			Err(e) => Err(e),
		}
	}

	/// Returns the current rate for `ip` without recording a request.
	pub fn rate(&self, ip: &ClientIp, now: OffsetDateTime) -> u64 {
		let slot = self.slot_of(now);

		self.windows.get(ip).map_or(0, |window| window.total(slot))
	}

	/// Drops counters that saw no request within the window, returning how many were removed.
	pub fn forget_idle(&self, now: OffsetDateTime) -> usize {
		let slot = self.slot_of(now);
		let before = self.windows.len();

		self.windows.retain(|_, window| !window.is_idle(slot));

		before.saturating_sub(self.windows.len())
	}

	/// Deletes request-log entries observed before `before`, returning how many were removed.
	pub async fn prune_log(&self, before: OffsetDateTime) -> Result<u64> {
		store::bounded(
			"request_log.prune_before",
			self.store_timeout,
			self.log.prune_before(before),
		)
		.await
	}

	/// Counts logged requests from `ip` since `since`, as recorded by the audit trail.
	pub async fn logged_since(&self, ip: &ClientIp, since: OffsetDateTime) -> Result<u64> {
		store::bounded(
			"request_log.count_since",
			self.store_timeout,
			self.log.count_since(ip, since),
		)
		.await
	}

	/// Number of addresses currently tracked in memory.
	pub fn tracked(&self) -> usize {
		self.windows.len()
	}

	fn slot_of(&self, now: OffsetDateTime) -> i64 {
		let slot = now.unix_timestamp_nanos().div_euclid(self.bucket_nanos);

		i64::try_from(slot).unwrap_or(i64::MAX)
	}
}
impl Debug for RateCounter {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("RateCounter")
			.field("tracked", &self.windows.len())
			.field("window", &self.window)
			.field("buckets", &self.buckets)
			.finish()
	}
}
