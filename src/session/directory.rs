//! User lookups consulted before a session is issued.

// self
use crate::{
	_prelude::*,
	auth::UserId,
	store::{StoreError, StoreFuture},
};

/// Answers whether a user exists and may hold sessions.
pub trait UserDirectory
where
	Self: Send + Sync,
{
	/// Returns `true` when `user_id` is known.
	fn contains<'a>(&'a self, user_id: &'a UserId) -> StoreFuture<'a, bool>;
}

/// In-process directory backed by a set of identifiers.
#[derive(Clone, Debug, Default)]
pub struct MemoryUserDirectory {
	users: Arc<RwLock<HashSet<UserId>>>,
}
impl MemoryUserDirectory {
	/// Registers `user_id`; returns `false` if it was already present.
	pub fn insert(&self, user_id: UserId) -> bool {
		self.users.write().insert(user_id)
	}

	/// Removes `user_id`; returns whether it was present.
	pub fn remove(&self, user_id: &UserId) -> bool {
		self.users.write().remove(user_id)
	}

	/// Number of known users.
	pub fn len(&self) -> usize {
		self.users.read().len()
	}

	/// Returns `true` when no user is registered.
	pub fn is_empty(&self) -> bool {
		self.users.read().is_empty()
	}
}
impl FromIterator<UserId> for MemoryUserDirectory {
	fn from_iter<I>(iter: I) -> Self
	where
		I: IntoIterator<Item = UserId>,
	{
		Self { users: Arc::new(RwLock::new(iter.into_iter().collect())) }
	}
}
impl UserDirectory for MemoryUserDirectory {
	fn contains<'a>(&'a self, user_id: &'a UserId) -> StoreFuture<'a, bool> {
		Box::pin(async move { Ok::<_, StoreError>(self.users.read().contains(user_id)) })
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[tokio::test]
	async fn membership_tracks_inserts_and_removals() {
		let alice = UserId::new("alice").expect("User fixture should be valid.");
		let directory: MemoryUserDirectory = [alice.clone()].into_iter().collect();

		assert!(directory.contains(&alice).await.expect("Lookup should succeed."));
		assert!(!directory.insert(alice.clone()));
		assert!(directory.remove(&alice));
		assert!(directory.is_empty());
		assert!(!directory.contains(&alice).await.expect("Lookup should succeed."));
	}
}
