// self
use crate::obs::{OpKind, OpOutcome};

/// Records an admission decision via the global metrics recorder (when enabled).
pub fn record_admission(decision: &'static str) {
	#[cfg(feature = "metrics")]
	{
		metrics::counter!("session_guard_admission_total", "decision" => decision).increment(1);
	}

	#[cfg(not(feature = "metrics"))]
	{
		let _ = decision;
	}
}

/// Records a session operation outcome via the global metrics recorder (when enabled).
pub fn record_session(kind: OpKind, outcome: OpOutcome) {
	#[cfg(feature = "metrics")]
	{
		metrics::counter!(
			"session_guard_session_total",
			"op" => kind.as_str(),
			"outcome" => outcome.as_str()
		)
		.increment(1);
	}

	#[cfg(not(feature = "metrics"))]
	{
		let _ = (kind, outcome);
	}
}
