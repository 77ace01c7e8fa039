//! Retention sweeps for the request log, stale violations, lapsed blocks, and expired tokens.

// self
use crate::{
	_prelude::*,
	clock::Clock,
	config::GuardConfig,
	obs::{OpKind, OpSpan},
	session::SessionManager,
};

/// Rows and counters removed by one sweep.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepReport {
	/// Request-log entries older than the rate window.
	pub requests_pruned: u64,
	/// Violation counters quiet for the whole decay period.
	pub violations_purged: u64,
	/// Block rows whose `block_until` had passed.
	pub blocks_purged: u64,
	/// Token records past expiry plus the retention period.
	pub tokens_purged: u64,
	/// In-memory rate counters with no request inside the window.
	pub counters_forgotten: usize,
}

/// Periodic cleanup driver; at most one sweep runs at a time.
pub struct Sweeper {
	manager: Arc<SessionManager>,
	clock: Arc<dyn Clock>,
	retention: Duration,
	window: Duration,
	gate: AsyncMutex<()>,
}
impl Sweeper {
	/// Creates a sweeper over the stores behind `manager`.
	pub fn new(manager: Arc<SessionManager>, clock: Arc<dyn Clock>, config: &GuardConfig) -> Self {
		Self {
			manager,
			clock,
			retention: config.token_retention,
			window: config.rate_window,
			gate: AsyncMutex::new(()),
		}
	}

	/// Sweeps using the injected clock.
	pub async fn sweep_now(&self) -> Result<Option<SweepReport>> {
		self.sweep(self.clock.now()).await
	}

	/// Sweeps as of `now`.
	///
	/// Returns `None` without touching any store when another sweep is already running.
	pub async fn sweep(&self, now: OffsetDateTime) -> Result<Option<SweepReport>> {
		let Some(_gate) = self.gate.try_lock() else {
			tracing::debug!("Sweep already in progress; skipping.");

			return Ok(None);
		};
		let span = OpSpan::new(OpKind::Sweep);
		let report = span.instrument(self.run(now)).await?;

		tracing::info!(
			requests_pruned = report.requests_pruned,
			violations_purged = report.violations_purged,
			blocks_purged = report.blocks_purged,
			tokens_purged = report.tokens_purged,
			counters_forgotten = report.counters_forgotten,
			"Sweep finished."
		);

		Ok(Some(report))
	}

	async fn run(&self, now: OffsetDateTime) -> Result<SweepReport> {
		let abuse = self.manager.abuse();

		Ok(SweepReport {
			requests_pruned: abuse.counter().prune_log(now - self.window).await?,
			violations_purged: abuse.ledger().purge_decayed(now).await?,
			blocks_purged: abuse.enforcer().purge_lapsed(now).await?,
			tokens_purged: self.manager.tokens().purge_expired(now - self.retention).await?,
			counters_forgotten: abuse.counter().forget_idle(now),
		})
	}
}
impl Debug for Sweeper {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("Sweeper")
			.field("retention", &self.retention)
			.field("window", &self.window)
			.finish()
	}
}
