mod common;

// std
use std::sync::Arc;
// crates.io
use color_eyre::Result;
use time::Duration;
// self
use common::{harness, ip, start, user};
use session_guard::{
	config::GuardConfig,
	session::{InvalidCause, RefreshOutcome, Rotation, SessionDenial},
};

const CONTENDERS: usize = 32;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_rotations_produce_exactly_one_successor() -> Result<()> {
	let h = harness(GuardConfig::default());
	let issued = h.manager.issue_session(&user("alice"), start()).await?;
	let secret = Arc::new(issued.secret.clone());
	let tasks: Vec<_> = (0..CONTENDERS)
		.map(|_| {
			let manager = h.manager.clone();
			let secret = secret.clone();

			tokio::spawn(async move { manager.tokens().rotate(&secret, start()).await })
		})
		.collect();
	let mut winners = Vec::new();
	let mut losers = 0;

	for task in tasks {
		match task.await?? {
			Rotation::Rotated(next) => winners.push(next),
			Rotation::Rejected(cause) => {
				assert_eq!(cause, InvalidCause::Revoked);

				losers += 1;
			},
		}
	}

	assert_eq!(winners.len(), 1);
	assert_eq!(losers, CONTENDERS - 1);

	let next = &winners[0];

	assert_ne!(next.secret, issued.secret);
	assert_eq!(next.record.family, issued.record.family);
	assert_eq!(h.manager.validate_session(&next.secret, start()).await?, Some(user("alice")));
	assert_eq!(h.manager.validate_session(&issued.secret, start()).await?, None);
	assert_eq!(h.store.token_count(), 2);
	assert_eq!(h.manager.tokens().rotation_metrics().rotated(), 1);

	Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_refreshes_from_one_client_rotate_once() -> Result<()> {
	let h = harness(GuardConfig::default());
	let issued = h.manager.issue_session(&user("bob"), start()).await?;
	let secret = Arc::new(issued.secret);
	let tasks: Vec<_> = (0..CONTENDERS)
		.map(|_| {
			let manager = h.manager.clone();
			let secret = secret.clone();

			tokio::spawn(async move {
				manager.refresh_session(&secret, &ip("192.0.2.10"), start()).await
			})
		})
		.collect();
	let mut refreshed = 0;

	for task in tasks {
		match task.await?? {
			RefreshOutcome::Refreshed { user_id, .. } => {
				assert_eq!(user_id, user("bob"));

				refreshed += 1;
			},
			RefreshOutcome::Denied(denial) => assert_eq!(denial, SessionDenial::InvalidToken),
		}
	}

	assert_eq!(refreshed, 1);

	Ok(())
}

#[tokio::test]
async fn reuse_of_a_rotated_token_can_revoke_the_chain() -> Result<()> {
	let config = GuardConfig::builder().revoke_family_on_reuse(true).build()?;
	let h = harness(config);
	let client = ip("192.0.2.11");
	let first = h.manager.issue_session(&user("carol"), start()).await?;
	let RefreshOutcome::Refreshed { token: second, .. } =
		h.manager.refresh_session(&first.secret, &client, start()).await?
	else {
		panic!("An active session should refresh.");
	};
	let later = start() + Duration::minutes(1);

	assert_eq!(
		h.manager.refresh_session(&first.secret, &client, later).await?,
		RefreshOutcome::Denied(SessionDenial::InvalidToken)
	);
	assert_eq!(h.manager.validate_session(&second.secret, later).await?, None);
	assert_eq!(h.manager.tokens().rotation_metrics().reuse_detected(), 1);

	Ok(())
}

#[tokio::test]
async fn rotated_tokens_keep_the_configured_lifetime() -> Result<()> {
	let config = GuardConfig::builder().token_ttl(Duration::minutes(15)).build()?;
	let h = harness(config);
	let first = h.manager.issue_session(&user("alice"), start()).await?;
	let at = start() + Duration::minutes(10);
	let Rotation::Rotated(second) = h.manager.tokens().rotate(&first.secret, at).await? else {
		panic!("An active token should rotate.");
	};

	assert_eq!(second.record.issued_at, at);
	assert_eq!(second.record.expires_at, at + Duration::minutes(15));
	assert_eq!(
		h.manager.tokens().rotate(&second.secret, at + Duration::minutes(15)).await?,
		Rotation::Rejected(InvalidCause::Expired)
	);

	Ok(())
}
