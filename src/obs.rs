//! Observability helpers for guard operations.
//!
//! - Every facade operation runs inside a `session_guard.op` span carrying the `op` field.
//! - Enable the `metrics` feature to increment `session_guard_admission_total` (labeled by
//!   `decision`) and `session_guard_session_total` (labeled by `op` + `outcome`).

mod meter;
mod span;

pub use meter::*;
pub use span::*;

// self
use crate::_prelude::*;

/// Guard operations observed by spans and metrics.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum OpKind {
	/// Abuse-control admission check.
	Admit,
	/// New session issuance.
	IssueSession,
	/// Refresh-token validation.
	ValidateSession,
	/// Refresh-token rotation behind an admission check.
	RefreshSession,
	/// Single-session revocation.
	RevokeSession,
	/// Bulk revocation for a user.
	RevokeAllSessions,
	/// Retention sweep.
	Sweep,
}
impl OpKind {
	/// Returns a stable label suitable for span or metric fields.
	pub const fn as_str(self) -> &'static str {
		match self {
			OpKind::Admit => "admit",
			OpKind::IssueSession => "issue_session",
			OpKind::ValidateSession => "validate_session",
			OpKind::RefreshSession => "refresh_session",
			OpKind::RevokeSession => "revoke_session",
			OpKind::RevokeAllSessions => "revoke_all_sessions",
			OpKind::Sweep => "sweep",
		}
	}
}
impl Display for OpKind {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// Outcome labels recorded for session operations.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum OpOutcome {
	/// The operation produced its positive result.
	Success,
	/// The operation completed with an ordinary "not ok" result.
	Denied,
	/// An infrastructure error was propagated to the caller.
	Failure,
}
impl OpOutcome {
	/// Returns a stable label suitable for span or metric fields.
	pub const fn as_str(self) -> &'static str {
		match self {
			OpOutcome::Success => "success",
			OpOutcome::Denied => "denied",
			OpOutcome::Failure => "failure",
		}
	}
}
impl Display for OpOutcome {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}
