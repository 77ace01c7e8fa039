#![allow(dead_code)]

// std
use std::sync::Arc;
// crates.io
use time::{OffsetDateTime, macros};
// self
use session_guard::{
	auth::{ClientIp, UserId},
	clock::ManualClock,
	config::GuardConfig,
	session::{MemoryUserDirectory, SessionManager},
	store::MemoryStore,
};

/// Fully wired guard over an in-memory store and a manual clock.
pub struct Harness {
	pub store: Arc<MemoryStore>,
	pub clock: Arc<ManualClock>,
	pub directory: Arc<MemoryUserDirectory>,
	pub manager: Arc<SessionManager>,
	pub config: GuardConfig,
}

pub fn start() -> OffsetDateTime {
	macros::datetime!(2025-06-01 12:00 UTC)
}

pub fn user(value: &str) -> UserId {
	UserId::new(value).expect("User fixture should be valid.")
}

pub fn ip(value: &str) -> ClientIp {
	ClientIp::new(value).expect("Client IP fixture should be valid.")
}

pub fn harness(config: GuardConfig) -> Harness {
	let store = Arc::new(MemoryStore::default());
	let clock = Arc::new(ManualClock::new(start()));
	let directory = Arc::new(
		["alice", "bob", "carol"].into_iter().map(user).collect::<MemoryUserDirectory>(),
	);
	let manager = Arc::new(SessionManager::with_store(
		store.clone(),
		directory.clone(),
		clock.clone(),
		&config,
	));

	Harness { store, clock, directory, manager, config }
}
