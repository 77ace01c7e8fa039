//! Session surface exposed to the transport layer.

// self
use crate::{
	_prelude::*,
	abuse::{AbuseControl, Admission, Denial},
	auth::{ClientIp, TokenSecret, UserId},
	clock::Clock,
	config::GuardConfig,
	obs::{self, OpKind, OpOutcome, OpSpan},
	session::{IssuedToken, Rotation, TokenStore, UserDirectory, Validation},
	store::{self, BlockRepository, RequestLogRepository, TokenRepository, ViolationRepository},
};

/// Why a refresh was refused.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionDenial {
	/// Abuse control refused the client before the token store was consulted.
	Abuse(Denial),
	/// The presented token was unknown, revoked, or expired.
	InvalidToken,
}

/// Result of [`SessionManager::refresh_session`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RefreshOutcome {
	/// The old token was rotated into `token`.
	Refreshed {
		/// Successor token; its secret goes back to the client.
		token: IssuedToken,
		/// Owner of the session.
		user_id: UserId,
	},
	/// The refresh was refused.
	Denied(SessionDenial),
}
impl RefreshOutcome {
	/// Returns `true` for [`RefreshOutcome::Refreshed`].
	pub fn is_refreshed(&self) -> bool {
		matches!(self, Self::Refreshed { .. })
	}
}

/// Session facade combining the token store, the user directory, and abuse control.
pub struct SessionManager {
	tokens: TokenStore,
	abuse: Arc<AbuseControl>,
	directory: Arc<dyn UserDirectory>,
	store_timeout: Option<Duration>,
}
impl SessionManager {
	/// Creates a manager from its parts.
	pub fn new(
		tokens: TokenStore,
		abuse: Arc<AbuseControl>,
		directory: Arc<dyn UserDirectory>,
		config: &GuardConfig,
	) -> Self {
		Self { tokens, abuse, directory, store_timeout: config.store_timeout }
	}

	/// Creates a manager whose tokens and abuse rows all live in `store`.
	pub fn with_store<S>(
		store: Arc<S>,
		directory: Arc<dyn UserDirectory>,
		clock: Arc<dyn Clock>,
		config: &GuardConfig,
	) -> Self
	where
		S: 'static
			+ TokenRepository
			+ RequestLogRepository
			+ ViolationRepository
			+ BlockRepository,
	{
		let tokens = TokenStore::new(store.clone(), config);
		let abuse = Arc::new(AbuseControl::with_store(store, clock, config));

		Self::new(tokens, abuse, directory, config)
	}

	/// Token lifecycle component.
	pub fn tokens(&self) -> &TokenStore {
		&self.tokens
	}

	/// Abuse-control component.
	pub fn abuse(&self) -> &Arc<AbuseControl> {
		&self.abuse
	}

	/// Issues a session for a user known to the directory.
	pub async fn issue_session(
		&self,
		user_id: &UserId,
		now: OffsetDateTime,
	) -> Result<IssuedToken> {
		const KIND: OpKind = OpKind::IssueSession;

		let span = OpSpan::new(KIND);
		let result: Result<IssuedToken> = span
			.instrument(async move {
				let known = store::bounded(
					"directory.contains",
					self.store_timeout,
					self.directory.contains(user_id),
				)
				.await?;

				if !known {
					return Err(Error::UnknownUser { user_id: user_id.clone() });
				}

				let issued = self.tokens.issue(user_id, now).await?;

				tracing::info!(
					user_id = %user_id,
					family = ?issued.record.family,
					"Session issued."
				);

				Ok(issued)
			})
			.await;

		obs::record_session(KIND, outcome_of(&result, |_| true));

		result
	}

	/// Admits `ip`, then rotates `old` into a successor token.
	///
	/// An abuse denial is returned without touching the token store. Unknown, revoked, and expired
	/// tokens all produce [`SessionDenial::InvalidToken`].
	pub async fn refresh_session(
		&self,
		old: &TokenSecret,
		ip: &ClientIp,
		now: OffsetDateTime,
	) -> Result<RefreshOutcome> {
		const KIND: OpKind = OpKind::RefreshSession;

		let span = OpSpan::new(KIND);
		let result: Result<RefreshOutcome> = span
			.instrument(async move {
				if let Admission::Deny(denial) = self.abuse.admit_at(ip, now).await? {
					return Ok(RefreshOutcome::Denied(SessionDenial::Abuse(denial)));
				}

				match self.tokens.rotate(old, now).await? {
					Rotation::Rotated(token) => {
						let user_id = token.record.user_id.clone();

						Ok(RefreshOutcome::Refreshed { token, user_id })
					},
					Rotation::Rejected(cause) => {
						tracing::debug!(ip = %ip, cause = %cause, "Refresh rejected.");

						Ok(RefreshOutcome::Denied(SessionDenial::InvalidToken))
					},
				}
			})
			.await;

		obs::record_session(KIND, outcome_of(&result, RefreshOutcome::is_refreshed));

		result
	}

	/// Returns the owning user when `secret` is active at `now`.
	pub async fn validate_session(
		&self,
		secret: &TokenSecret,
		now: OffsetDateTime,
	) -> Result<Option<UserId>> {
		const KIND: OpKind = OpKind::ValidateSession;

		let span = OpSpan::new(KIND);
		let result: Result<Option<UserId>> = span
			.instrument(async move {
				Ok(match self.tokens.validate(secret, now).await? {
					Validation::Valid { user_id, .. } => Some(user_id),
					Validation::Invalid(cause) => {
						tracing::debug!(cause = %cause, "Session validation failed.");

						None
					},
				})
			})
			.await;

		obs::record_session(KIND, outcome_of(&result, Option::is_some));

		result
	}

	/// Revokes one session; returns `true` only for the call that revoked it.
	pub async fn revoke_session(&self, secret: &TokenSecret, now: OffsetDateTime) -> Result<bool> {
		const KIND: OpKind = OpKind::RevokeSession;

		let span = OpSpan::new(KIND);
		let result = span.instrument(self.tokens.revoke(secret, now)).await;

		obs::record_session(KIND, outcome_of(&result, |revoked| *revoked));

		result
	}

	/// Revokes every session of `user_id`, returning how many changed state.
	pub async fn revoke_all_sessions(&self, user_id: &UserId, now: OffsetDateTime) -> Result<u64> {
		const KIND: OpKind = OpKind::RevokeAllSessions;

		let span = OpSpan::new(KIND);
		let result = span.instrument(self.tokens.revoke_all_for_user(user_id, now)).await;

		obs::record_session(KIND, outcome_of(&result, |_| true));

		result
	}
}
impl Debug for SessionManager {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("SessionManager")
			.field("tokens", &self.tokens)
			.field("abuse", &self.abuse)
			.finish()
	}
}

fn outcome_of<T, F>(result: &Result<T>, success: F) -> OpOutcome
where
	F: FnOnce(&T) -> bool,
{
	match result {
		Ok(value) =>
			if success(value) {
				OpOutcome::Success
			} else {
				OpOutcome::Denied
			},
		Err(_) => OpOutcome::Failure,
	}
}
