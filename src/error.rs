//! Guard-level error types shared across sessions, abuse control, and stores.
//!
//! Expected "not allowed" outcomes (invalid tokens, rate limits, blocks) are ordinary values and
//! never appear here; only infrastructure and configuration failures do.

// self
use crate::{_prelude::*, auth::UserId};

/// Guard-wide result type alias returning [`Error`] by default.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Canonical guard error exposed by public APIs.
#[derive(Debug, ThisError)]
pub enum Error {
	/// Storage-layer failure.
	#[error("{0}")]
	Storage(
		#[from]
		#[source]
		crate::store::StoreError,
	),
	/// A repository call did not finish within the configured deadline.
	#[error("Store operation `{operation}` timed out after {timeout}.")]
	StoreTimeout {
		/// Repository operation label.
		operation: &'static str,
		/// Deadline that elapsed.
		timeout: Duration,
	},
	/// Local configuration problem.
	#[error(transparent)]
	Config(#[from] ConfigError),
	/// Identifier failed validation.
	#[error(transparent)]
	Identifier(#[from] crate::auth::IdentifierError),

	/// The user directory does not know the requested user.
	#[error("User `{user_id}` is not known to the user directory.")]
	UnknownUser {
		/// Identifier that failed the lookup.
		user_id: UserId,
	},
	/// Refresh-token record builder validation failed.
	#[error("Unable to build refresh-token record.")]
	TokenBuild(#[from] crate::auth::RefreshTokenBuilderError),
	/// Every generated token collided with an existing digest.
	#[error("Unable to generate a unique refresh token after {attempts} attempts.")]
	TokenGeneration {
		/// Number of generation attempts made.
		attempts: u32,
	},
}
impl Error {
	/// Returns `true` when the failure means the backing store could not be reached in time.
	///
	/// Failure policies treat these errors as "store unavailable".
	pub fn is_store_unavailable(&self) -> bool {
		matches!(
			self,
			Self::Storage(crate::store::StoreError::Unavailable { .. }) | Self::StoreTimeout { .. }
		)
	}
}

/// Configuration and validation failures raised while building a guard.
#[derive(Debug, ThisError)]
pub enum ConfigError {
	/// JSON configuration payload could not be parsed.
	#[error("Configuration is malformed at `{path}`.")]
	Parse {
		/// JSON path of the offending value.
		path: String,
		/// Structured parsing failure.
		#[source]
		source: serde_json::Error,
	},
	/// A numeric setting must be greater than zero.
	#[error("The `{field}` setting must be greater than zero.")]
	NonPositive {
		/// Setting name.
		field: &'static str,
	},
	/// Escalation factor must not shrink block durations.
	#[error("The escalation factor must be at least 1, got {factor}.")]
	ShrinkingEscalation {
		/// Offending factor.
		factor: u32,
	},
	/// A duration setting exceeds the supported upper bound.
	#[error("The `{field}` setting must not exceed {max}.")]
	TooLong {
		/// Setting name.
		field: &'static str,
		/// Largest accepted value.
		max: Duration,
	},
	/// The window is split into more buckets than supported.
	#[error("The `window_buckets` setting must not exceed {max}, got {buckets}.")]
	TooManyBuckets {
		/// Configured bucket count.
		buckets: u32,
		/// Largest accepted bucket count.
		max: u32,
	},
	/// Maximum block duration is shorter than the base block duration.
	#[error("The maximum block duration ({max}) is shorter than the base duration ({base}).")]
	InvertedEscalationBounds {
		/// Base block duration.
		base: Duration,
		/// Maximum block duration.
		max: Duration,
	},
}
impl From<serde_path_to_error::Error<serde_json::Error>> for ConfigError {
	fn from(e: serde_path_to_error::Error<serde_json::Error>) -> Self {
		let path = e.path().to_string();

		Self::Parse { path, source: e.into_inner() }
	}
}
