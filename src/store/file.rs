//! Simple file-backed repositories for lightweight single-process deployments.

// std
use std::{
	fs::{self, File},
	io::Write,
	path::{Path, PathBuf},
};
// self
use crate::{
	_prelude::*,
	abuse::{RateLimitBlock, RateLimitRequest, RateLimitViolation},
	auth::{ClientIp, RefreshToken, TokenDigest},
	store::{
		BlockRepository, InsertOutcome, RequestLogRepository, RevokeCondition, RevokeOutcome,
		RevokeScope, StoreError, StoreFuture, TokenRepository, ViolationRepository,
	},
};

#[derive(Clone, Debug, Default)]
struct Tables {
	tokens: HashMap<TokenDigest, RefreshToken>,
	requests: Vec<RateLimitRequest>,
	violations: HashMap<ClientIp, RateLimitViolation>,
	blocks: HashMap<ClientIp, RateLimitBlock>,
}

#[derive(Default, Serialize, Deserialize)]
struct Snapshot {
	tokens: Vec<RefreshToken>,
	requests: Vec<RateLimitRequest>,
	violations: Vec<RateLimitViolation>,
	blocks: Vec<RateLimitBlock>,
}
impl From<Snapshot> for Tables {
	fn from(snapshot: Snapshot) -> Self {
		Self {
			tokens: snapshot
				.tokens
				.into_iter()
				.map(|record| (record.digest.clone(), record))
				.collect(),
			requests: snapshot.requests,
			violations: snapshot.violations.into_iter().map(|row| (row.ip.clone(), row)).collect(),
			blocks: snapshot.blocks.into_iter().map(|row| (row.ip.clone(), row)).collect(),
		}
	}
}

/// Persists every table to a JSON file after each mutation.
///
/// All tables share one write lock, so conditional updates are trivially atomic; throughput is
/// bounded by the disk, which suits bots and single-node tools rather than busy gateways.
#[derive(Clone, Debug)]
pub struct FileStore {
	path: PathBuf,
	inner: Arc<RwLock<Tables>>,
}
impl FileStore {
	/// Opens (or creates) a store at the provided path, eagerly loading existing data.
	pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
		let path = path.into();

		Self::ensure_parent_exists(&path)?;

		let tables = Self::load_snapshot(&path)?.into();

		Ok(Self { path, inner: Arc::new(RwLock::new(tables)) })
	}

	fn load_snapshot(path: &Path) -> Result<Snapshot, StoreError> {
		if !path.exists() {
			return Ok(Snapshot::default());
		}

		let metadata = path.metadata().map_err(|e| StoreError::Backend {
			message: format!("Failed to inspect {}: {e}", path.display()),
		})?;

		if metadata.len() == 0 {
			return Ok(Snapshot::default());
		}

		let bytes = fs::read(path).map_err(|e| StoreError::Backend {
			message: format!("Failed to read {}: {e}", path.display()),
		})?;

		serde_json::from_slice(&bytes).map_err(|e| StoreError::Serialization {
			message: format!("Failed to parse {}: {e}", path.display()),
		})
	}

	fn ensure_parent_exists(path: &Path) -> Result<(), StoreError> {
		if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
			fs::create_dir_all(parent).map_err(|e| StoreError::Backend {
				message: format!("Failed to create store directory {}: {e}", parent.display()),
			})?;
		}
		Ok(())
	}

	fn persist_locked(&self, tables: &Tables) -> Result<(), StoreError> {
		Self::ensure_parent_exists(&self.path)?;

		let snapshot = Snapshot {
			tokens: tables.tokens.values().cloned().collect(),
			requests: tables.requests.clone(),
			violations: tables.violations.values().cloned().collect(),
			blocks: tables.blocks.values().cloned().collect(),
		};
		let serialized =
			serde_json::to_vec_pretty(&snapshot).map_err(|e| StoreError::Serialization {
				message: format!("Failed to serialize store snapshot: {e}"),
			})?;
		let mut tmp_path = self.path.clone();

		tmp_path.set_extension("tmp");

		{
			let mut file = File::create(&tmp_path).map_err(|e| StoreError::Backend {
				message: format!("Failed to create {}: {e}", tmp_path.display()),
			})?;

			file.write_all(&serialized).map_err(|e| StoreError::Backend {
				message: format!("Failed to write {}: {e}", tmp_path.display()),
			})?;
			file.sync_all().map_err(|e| StoreError::Backend {
				message: format!("Failed to sync {}: {e}", tmp_path.display()),
			})?;
		}

		fs::rename(&tmp_path, &self.path).map_err(|e| StoreError::Backend {
			message: format!("Failed to replace {}: {e}", self.path.display()),
		})
	}

	/// Applies `mutate` to a staged copy under the write lock.
	///
	/// The copy replaces the live tables only after it has been persisted, so a failed write
	/// leaves both memory and disk at the previous state.
	fn mutate<T>(&self, mutate: impl FnOnce(&mut Tables) -> (T, bool)) -> Result<T, StoreError> {
		let mut guard = self.inner.write();
		let mut staged = guard.clone();
		let (value, changed) = mutate(&mut staged);

		if changed {
			self.persist_locked(&staged)?;

			*guard = staged;
		}

		Ok(value)
	}
}
impl TokenRepository for FileStore {
	fn insert(&self, record: RefreshToken) -> StoreFuture<'_, InsertOutcome> {
		Box::pin(async move {
			self.mutate(|tables| {
				if tables.tokens.contains_key(&record.digest) {
					return (InsertOutcome::DuplicateDigest, false);
				}

				tables.tokens.insert(record.digest.clone(), record);

				(InsertOutcome::Inserted, true)
			})
		})
	}

	fn fetch_by_digest<'a>(
		&'a self,
		digest: &'a TokenDigest,
	) -> StoreFuture<'a, Option<RefreshToken>> {
		Box::pin(async move { Ok(self.inner.read().tokens.get(digest).cloned()) })
	}

	fn revoke<'a>(
		&'a self,
		digest: &'a TokenDigest,
		condition: RevokeCondition,
		instant: OffsetDateTime,
	) -> StoreFuture<'a, RevokeOutcome> {
		Box::pin(async move {
			self.mutate(|tables| match tables.tokens.get_mut(digest) {
				Some(record) => {
					let outcome = RevokeOutcome::evaluate(record, condition, instant);
					let changed = matches!(outcome, RevokeOutcome::Revoked(_));

					(outcome, changed)
				},
				None => (RevokeOutcome::Missing, false),
			})
		})
	}

	fn revoke_where<'a>(
		&'a self,
		scope: &'a RevokeScope,
		instant: OffsetDateTime,
	) -> StoreFuture<'a, u64> {
		Box::pin(async move {
			self.mutate(|tables| {
				let changed = tables
					.tokens
					.values_mut()
					.filter(|record| scope.matches(record))
					.map(|record| record.revoke(instant))
					.filter(|changed| *changed)
					.count() as u64;

				(changed, changed > 0)
			})
		})
	}

	fn purge_expired(&self, before: OffsetDateTime) -> StoreFuture<'_, u64> {
		Box::pin(async move {
			self.mutate(|tables| {
				let len = tables.tokens.len();

				tables.tokens.retain(|_, record| record.expires_at >= before);

				let removed = (len - tables.tokens.len()) as u64;

				(removed, removed > 0)
			})
		})
	}
}
impl RequestLogRepository for FileStore {
	fn append(&self, request: RateLimitRequest) -> StoreFuture<'_, ()> {
		Box::pin(async move {
			self.mutate(|tables| {
				tables.requests.push(request);

				((), true)
			})
		})
	}

	fn count_since<'a>(&'a self, ip: &'a ClientIp, since: OffsetDateTime) -> StoreFuture<'a, u64> {
		Box::pin(async move {
			let count = self
				.inner
				.read()
				.requests
				.iter()
				.filter(|request| &request.ip == ip && request.timestamp >= since)
				.count() as u64;

			Ok(count)
		})
	}

	fn prune_before(&self, instant: OffsetDateTime) -> StoreFuture<'_, u64> {
		Box::pin(async move {
			self.mutate(|tables| {
				let len = tables.requests.len();

				tables.requests.retain(|request| request.timestamp >= instant);

				let removed = (len - tables.requests.len()) as u64;

				(removed, removed > 0)
			})
		})
	}
}
impl ViolationRepository for FileStore {
	fn fetch<'a>(&'a self, ip: &'a ClientIp) -> StoreFuture<'a, Option<RateLimitViolation>> {
		Box::pin(async move { Ok(self.inner.read().violations.get(ip).cloned()) })
	}

	fn increment<'a>(
		&'a self,
		ip: &'a ClientIp,
		now: OffsetDateTime,
		reset_before: Option<OffsetDateTime>,
	) -> StoreFuture<'a, RateLimitViolation> {
		Box::pin(async move {
			self.mutate(|tables| {
				let row = tables.violations.entry(ip.clone()).or_insert_with(|| {
					RateLimitViolation { ip: ip.clone(), violations: 0, last_violation_at: now }
				});
				let decayed = reset_before.is_some_and(|cutoff| row.last_violation_at <= cutoff);

				row.violations = if decayed { 1 } else { row.violations.saturating_add(1) };
				row.last_violation_at = now;

				(row.clone(), true)
			})
		})
	}

	fn remove<'a>(&'a self, ip: &'a ClientIp) -> StoreFuture<'a, bool> {
		Box::pin(async move {
			self.mutate(|tables| {
				let removed = tables.violations.remove(ip).is_some();

				(removed, removed)
			})
		})
	}

	fn purge_decayed(&self, before: OffsetDateTime) -> StoreFuture<'_, u64> {
		Box::pin(async move {
			self.mutate(|tables| {
				let len = tables.violations.len();

				tables.violations.retain(|_, row| row.last_violation_at > before);

				let removed = (len - tables.violations.len()) as u64;

				(removed, removed > 0)
			})
		})
	}
}
impl BlockRepository for FileStore {
	fn fetch<'a>(&'a self, ip: &'a ClientIp) -> StoreFuture<'a, Option<RateLimitBlock>> {
		Box::pin(async move { Ok(self.inner.read().blocks.get(ip).cloned()) })
	}

	fn extend<'a>(
		&'a self,
		ip: &'a ClientIp,
		until: OffsetDateTime,
	) -> StoreFuture<'a, RateLimitBlock> {
		Box::pin(async move {
			self.mutate(|tables| {
				let row = tables
					.blocks
					.entry(ip.clone())
					.or_insert_with(|| RateLimitBlock { ip: ip.clone(), block_until: until });
				let changed = row.block_until <= until;

				if row.block_until < until {
					row.block_until = until;
				}

				(row.clone(), changed)
			})
		})
	}

	fn remove<'a>(&'a self, ip: &'a ClientIp) -> StoreFuture<'a, bool> {
		Box::pin(async move {
			self.mutate(|tables| {
				let removed = tables.blocks.remove(ip).is_some();

				(removed, removed)
			})
		})
	}

	fn purge_lapsed(&self, now: OffsetDateTime) -> StoreFuture<'_, u64> {
		Box::pin(async move {
			self.mutate(|tables| {
				let len = tables.blocks.len();

				tables.blocks.retain(|_, block| block.is_active_at(now));

				let removed = (len - tables.blocks.len()) as u64;

				(removed, removed > 0)
			})
		})
	}
}
