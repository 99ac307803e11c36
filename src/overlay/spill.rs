//! The spill store contract (§4.2) and its two implementations: [`SledSpillStore`] for
//! production, [`MemorySpillStore`] as a test double.

// std
use std::{
	collections::HashMap,
	path::PathBuf,
	sync::{Arc, RwLock},
};
// self
use crate::{Error, Result};

/// The bucket name the overlay writes evicted objects under (§6 "Spill-file layout").
pub const OBJECTS_BUCKET: &str = "objects";

/// A read-only view into the spill store, held open for the lifetime of one (possibly
/// coalesced) request per §4.2 "Read-transaction coalescing".
pub trait ReadTransaction: Send + Sync + std::fmt::Debug {
	/// Look up `key` (a UID) in the given bucket.
	fn get(&self, bucket: &'static str, key: &str) -> Result<Option<Vec<u8>>>;
}

/// A single-file embedded key-value store, abstracted behind the
/// `Begin/Update/View/Close` + `Bucket.Get/Put` contract described in §4.2.
pub trait SpillStore: Send + Sync {
	/// Open one read-write transaction, create `bucket` if absent, and write every
	/// `(key, value)` pair. Callers sort `items` by key first for B+ tree write locality.
	fn write_batch(&self, bucket: &'static str, items: Vec<(String, Vec<u8>)>) -> Result<()>;

	/// Open a read-only transaction against `bucket`.
	fn begin_read(&self, bucket: &'static str) -> Result<Arc<dyn ReadTransaction>>;

	/// Close the store and remove its backing file, per §5 "partial data is not preserved".
	fn close_and_remove(&self) -> Result<()>;
}

/// Spill store backed by `sled`, the closest embedded B+-tree-like keyed store available.
pub struct SledSpillStore {
	db: sled::Db,
	path: PathBuf,
}
impl SledSpillStore {
	/// Open (or create) a spill file at `path`. Fsync and the freelist sync are disabled for
	/// throughput, matching §4.2's "durability is not required because the file is deleted on
	/// shutdown".
	pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
		let path = path.into();
		let db = sled::Config::new().path(&path).flush_every_ms(None).open()?;

		Ok(Self { db, path })
	}
}
impl SpillStore for SledSpillStore {
	fn write_batch(&self, bucket: &'static str, items: Vec<(String, Vec<u8>)>) -> Result<()> {
		let tree = self.db.open_tree(bucket)?;

		tree.transaction(|tx| {
			for (key, value) in &items {
				tx.insert(key.as_bytes(), value.as_slice())?;
			}

			Ok(())
		})
		.map_err(|err: sled::transaction::TransactionError<sled::Error>| {
			Error::SpillTransaction(err.to_string())
		})?;

		Ok(())
	}

	fn begin_read(&self, bucket: &'static str) -> Result<Arc<dyn ReadTransaction>> {
		let tree = self.db.open_tree(bucket)?;

		Ok(Arc::new(SledReadTransaction { tree }))
	}

	fn close_and_remove(&self) -> Result<()> {
		self.db.flush()?;

		if let Err(err) = std::fs::remove_dir_all(&self.path) {
			if err.kind() != std::io::ErrorKind::NotFound {
				return Err(err.into());
			}
		}

		Ok(())
	}
}

#[derive(Debug)]
struct SledReadTransaction {
	tree: sled::Tree,
}
impl ReadTransaction for SledReadTransaction {
	fn get(&self, _bucket: &'static str, key: &str) -> Result<Option<Vec<u8>>> {
		Ok(self.tree.get(key.as_bytes())?.map(|ivec| ivec.to_vec()))
	}
}

/// In-memory spill store for tests: behaves like [`SledSpillStore`] without touching disk.
#[derive(Default)]
pub struct MemorySpillStore {
	buckets: RwLock<HashMap<&'static str, HashMap<String, Vec<u8>>>>,
	closed: std::sync::atomic::AtomicBool,
}
impl MemorySpillStore {
	/// Construct an empty store.
	pub fn new() -> Arc<Self> {
		Arc::new(Self::default())
	}

	/// Whether [`SpillStore::close_and_remove`] has run, for test assertions.
	pub fn is_closed(&self) -> bool {
		self.closed.load(std::sync::atomic::Ordering::SeqCst)
	}
}
impl SpillStore for MemorySpillStore {
	fn write_batch(&self, bucket: &'static str, items: Vec<(String, Vec<u8>)>) -> Result<()> {
		let mut buckets = self.buckets.write().expect("spill store mutex poisoned");
		let bucket_map = buckets.entry(bucket).or_default();

		for (key, value) in items {
			bucket_map.insert(key, value);
		}

		Ok(())
	}

	fn begin_read(&self, bucket: &'static str) -> Result<Arc<dyn ReadTransaction>> {
		let buckets = self.buckets.read().expect("spill store mutex poisoned");
		let snapshot = buckets.get(bucket).cloned().ok_or(Error::MissingBucket(bucket))?;

		Ok(Arc::new(MemoryReadTransaction { snapshot }))
	}

	fn close_and_remove(&self) -> Result<()> {
		self.buckets.write().expect("spill store mutex poisoned").clear();
		self.closed.store(true, std::sync::atomic::Ordering::SeqCst);

		Ok(())
	}
}

#[derive(Debug)]
struct MemoryReadTransaction {
	snapshot: HashMap<String, Vec<u8>>,
}
impl ReadTransaction for MemoryReadTransaction {
	fn get(&self, _bucket: &'static str, key: &str) -> Result<Option<Vec<u8>>> {
		Ok(self.snapshot.get(key).cloned())
	}
}
