//! Guard configuration: token lifetimes, rate-limit windows, escalation, and failure policies.
//!
//! Configurations are assembled with [`GuardConfig::builder`] or parsed from JSON with
//! [`GuardConfig::from_json_str`]. Durations are expressed as whole seconds in JSON.

// self
use crate::{_prelude::*, abuse::EscalationPolicy, error::ConfigError};

/// Upper bound on every duration setting.
pub const MAX_DURATION: Duration = Duration::days(3650);
/// Upper bound on `window_buckets`; each tracked address holds one slot per bucket.
pub const MAX_WINDOW_BUCKETS: u32 = 3600;

/// Behaviour when the backing store cannot be reached for a given concern.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
	/// Treat the request as if the store had nothing to report (allow it through).
	FailOpen,
	/// Deny the request with an `Unavailable` reason.
	FailClosed,
	/// Return the error to the caller.
	Propagate,
}

/// Complete runtime configuration shared by every guard component.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GuardConfig {
	/// Lifetime of newly issued refresh tokens.
	#[serde(with = "secs")]
	pub token_ttl: Duration,
	/// How long expired tokens are retained before the sweeper deletes them.
	#[serde(with = "secs")]
	pub token_retention: Duration,
	/// Length `W` of the sliding rate-limit window.
	#[serde(with = "secs")]
	pub rate_window: Duration,
	/// Number of circular buckets the window is divided into.
	pub window_buckets: u32,
	/// Requests allowed per window; the request that exceeds it is a violation.
	pub rate_threshold: u64,
	/// Block escalation curve.
	pub escalation: EscalationPolicy,
	/// Quiet period after which a violation count restarts; `None` keeps counts forever.
	#[serde(with = "opt_secs")]
	pub violation_decay: Option<Duration>,
	/// Deadline applied to every repository call; `None` disables it.
	#[serde(with = "opt_secs")]
	pub store_timeout: Option<Duration>,
	/// Policy applied when block lookups fail.
	pub block_lookup_failure: FailurePolicy,
	/// Policy applied when request logging or violation writes fail.
	pub rate_counting_failure: FailurePolicy,
	/// Revokes the whole rotation chain when an already-revoked token is presented again.
	pub revoke_family_on_reuse: bool,
}
impl GuardConfig {
	/// Creates a builder seeded with the defaults.
	pub fn builder() -> GuardConfigBuilder {
		GuardConfigBuilder::default()
	}

	/// Parses and validates a JSON configuration; omitted fields take their defaults.
	pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
		let mut de = serde_json::Deserializer::from_str(json);
		let config: Self = serde_path_to_error::deserialize(&mut de)?;

		config.validate()?;

		Ok(config)
	}

	/// Width of one circular bucket.
	pub fn bucket_span(&self) -> Duration {
		self.rate_window / self.window_buckets.max(1)
	}

	/// Checks cross-field invariants.
	pub fn validate(&self) -> Result<(), ConfigError> {
		ensure_positive("token_ttl", self.token_ttl)?;
		ensure_positive("rate_window", self.rate_window)?;
		ensure_bounded("token_ttl", self.token_ttl)?;
		ensure_bounded("token_retention", self.token_retention)?;
		ensure_bounded("rate_window", self.rate_window)?;

		if self.token_retention.is_negative() {
			return Err(ConfigError::NonPositive { field: "token_retention" });
		}
		if self.window_buckets == 0 || !self.bucket_span().is_positive() {
			return Err(ConfigError::NonPositive { field: "window_buckets" });
		}
		if self.window_buckets > MAX_WINDOW_BUCKETS {
			return Err(ConfigError::TooManyBuckets {
				buckets: self.window_buckets,
				max: MAX_WINDOW_BUCKETS,
			});
		}
		if self.rate_threshold == 0 {
			return Err(ConfigError::NonPositive { field: "rate_threshold" });
		}
		if let Some(decay) = self.violation_decay {
			ensure_positive("violation_decay", decay)?;
			ensure_bounded("violation_decay", decay)?;
		}
		if let Some(timeout) = self.store_timeout {
			ensure_positive("store_timeout", timeout)?;
			ensure_bounded("store_timeout", timeout)?;
		}

		self.escalation.validate()
	}
}
impl Default for GuardConfig {
	fn default() -> Self {
		Self {
			token_ttl: Duration::days(30),
			token_retention: Duration::days(7),
			rate_window: Duration::seconds(60),
			window_buckets: 60,
			rate_threshold: 100,
			escalation: EscalationPolicy::default(),
			violation_decay: Some(Duration::hours(24)),
			store_timeout: Some(Duration::seconds(2)),
			block_lookup_failure: FailurePolicy::FailClosed,
			rate_counting_failure: FailurePolicy::FailOpen,
			revoke_family_on_reuse: false,
		}
	}
}

/// Builder for [`GuardConfig`] values.
#[derive(Clone, Debug, Default)]
pub struct GuardConfigBuilder {
	config: GuardConfig,
}
impl GuardConfigBuilder {
	/// Sets the refresh-token lifetime.
	pub fn token_ttl(mut self, ttl: Duration) -> Self {
		self.config.token_ttl = ttl;

		self
	}

	/// Sets how long expired tokens are kept before sweeping.
	pub fn token_retention(mut self, retention: Duration) -> Self {
		self.config.token_retention = retention;

		self
	}

	/// Sets the sliding window length and its bucket count.
	pub fn rate_window(mut self, window: Duration, buckets: u32) -> Self {
		self.config.rate_window = window;
		self.config.window_buckets = buckets;

		self
	}

	/// Sets the per-window request threshold.
	pub fn rate_threshold(mut self, threshold: u64) -> Self {
		self.config.rate_threshold = threshold;

		self
	}

	/// Overrides the escalation curve.
	pub fn escalation(mut self, escalation: EscalationPolicy) -> Self {
		self.config.escalation = escalation;

		self
	}

	/// Sets (or disables) the violation decay period.
	pub fn violation_decay(mut self, decay: Option<Duration>) -> Self {
		self.config.violation_decay = decay;

		self
	}

	/// Sets (or disables) the per-call store deadline.
	pub fn store_timeout(mut self, timeout: Option<Duration>) -> Self {
		self.config.store_timeout = timeout;

		self
	}

	/// Sets the policy for failed block lookups.
	pub fn block_lookup_failure(mut self, policy: FailurePolicy) -> Self {
		self.config.block_lookup_failure = policy;

		self
	}

	/// Sets the policy for failed request logging and violation writes.
	pub fn rate_counting_failure(mut self, policy: FailurePolicy) -> Self {
		self.config.rate_counting_failure = policy;

		self
	}

	/// Enables or disables family-wide revocation on token reuse.
	pub fn revoke_family_on_reuse(mut self, enabled: bool) -> Self {
		self.config.revoke_family_on_reuse = enabled;

		self
	}

	/// Consumes the builder and validates the resulting configuration.
	pub fn build(self) -> Result<GuardConfig, ConfigError> {
		self.config.validate()?;

		Ok(self.config)
	}
}

fn ensure_positive(field: &'static str, value: Duration) -> Result<(), ConfigError> {
	if value.is_positive() { Ok(()) } else { Err(ConfigError::NonPositive { field }) }
}

pub(crate) fn ensure_bounded(field: &'static str, value: Duration) -> Result<(), ConfigError> {
	if value <= MAX_DURATION {
		Ok(())
	} else {
		Err(ConfigError::TooLong { field, max: MAX_DURATION })
	}
}

pub(crate) mod secs {
	// crates.io
	use serde::{Deserializer, Serializer};
	// self
	use crate::_prelude::*;

	pub fn serialize<S>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error>
	where
		S: Serializer,
	{
		serializer.serialize_i64(value.whole_seconds())
	}

	pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
	where
		D: Deserializer<'de>,
	{
		i64::deserialize(deserializer).map(Duration::seconds)
	}
}

mod opt_secs {
	// crates.io
	use serde::{Deserializer, Serializer};
	// self
	use crate::_prelude::*;

	pub fn serialize<S>(value: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
	where
		S: Serializer,
	{
		match value {
			Some(duration) => serializer.serialize_some(&duration.whole_seconds()),
			None => serializer.serialize_none(),
		}
	}

	pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
	where
		D: Deserializer<'de>,
	{
		Option::<i64>::deserialize(deserializer).map(|value| value.map(Duration::seconds))
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn defaults_validate() {
		let config = GuardConfig::default();

		config.validate().expect("Default configuration should be valid.");

		assert_eq!(config.bucket_span(), Duration::seconds(1));
		assert_eq!(config.rate_threshold, 100);
		assert_eq!(config.block_lookup_failure, FailurePolicy::FailClosed);
		assert_eq!(config.rate_counting_failure, FailurePolicy::FailOpen);
	}

	#[test]
	fn json_overrides_merge_with_defaults() {
		let config = GuardConfig::from_json_str(
			r#"{
				"rate_window": 10,
				"window_buckets": 5,
				"violation_decay": null,
				"block_lookup_failure": "propagate",
				"escalation": { "threshold": 3, "base": 30 }
			}"#,
		)
		.expect("Partial JSON configuration should parse.");

		assert_eq!(config.rate_window, Duration::seconds(10));
		assert_eq!(config.bucket_span(), Duration::seconds(2));
		assert_eq!(config.violation_decay, None);
		assert_eq!(config.block_lookup_failure, FailurePolicy::Propagate);
		assert_eq!(config.escalation.threshold, 3);
		assert_eq!(config.escalation.base, Duration::seconds(30));
		assert_eq!(config.escalation.max, EscalationPolicy::default().max);
		assert_eq!(config.token_ttl, Duration::days(30));
	}

	#[test]
	fn json_errors_report_the_offending_path() {
		let err = GuardConfig::from_json_str(r#"{ "escalation": { "factor": "double" } }"#)
			.expect_err("Non-numeric factors should be rejected.");

		assert!(matches!(err, ConfigError::Parse { ref path, .. } if path == "escalation.factor"));
	}

	#[test]
	fn builder_rejects_degenerate_values() {
		assert!(matches!(
			GuardConfig::builder().rate_threshold(0).build(),
			Err(ConfigError::NonPositive { field: "rate_threshold" })
		));
		assert!(matches!(
			GuardConfig::builder().rate_window(Duration::seconds(60), 0).build(),
			Err(ConfigError::NonPositive { field: "window_buckets" })
		));
		assert!(matches!(
			GuardConfig::builder().token_ttl(Duration::ZERO).build(),
			Err(ConfigError::NonPositive { field: "token_ttl" })
		));
		assert!(matches!(
			GuardConfig::builder().store_timeout(Some(Duration::seconds(-1))).build(),
			Err(ConfigError::NonPositive { field: "store_timeout" })
		));
	}

	#[test]
	fn durations_past_the_date_range_are_rejected() {
		assert!(matches!(
			GuardConfig::from_json_str(r#"{ "token_ttl": 9223372036854775807 }"#),
			Err(ConfigError::TooLong { field: "token_ttl", .. })
		));
		assert!(matches!(
			GuardConfig::from_json_str(
				r#"{
					"escalation": {
						"threshold": 1,
						"base": 9223372036854775807,
						"max": 9223372036854775807
					}
				}"#,
			),
			Err(ConfigError::TooLong { field: "escalation.base", .. })
		));
		assert!(matches!(
			GuardConfig::builder()
				.escalation(EscalationPolicy {
					max: MAX_DURATION * 2,
					..EscalationPolicy::default()
				})
				.build(),
			Err(ConfigError::TooLong { field: "escalation.max", .. })
		));
		assert!(matches!(
			GuardConfig::builder().violation_decay(Some(MAX_DURATION + Duration::DAY)).build(),
			Err(ConfigError::TooLong { field: "violation_decay", .. })
		));
		assert!(GuardConfig::builder().token_ttl(MAX_DURATION).build().is_ok());
	}

	#[test]
	fn bucket_counts_are_capped() {
		assert!(matches!(
			GuardConfig::builder().rate_window(Duration::days(365), 1_000_000_000).build(),
			Err(ConfigError::TooManyBuckets { buckets: 1_000_000_000, max: MAX_WINDOW_BUCKETS })
		));
		assert!(
			GuardConfig::builder()
				.rate_window(Duration::hours(1), MAX_WINDOW_BUCKETS)
				.build()
				.is_ok()
		);
	}
}
