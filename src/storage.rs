//! Key/value storage backends
//!
//! The ledger talks to a `KeyValueStore`. `OptimizedStorage` persists to
//! RocksDB; `MemoryStorage` keeps everything in a `BTreeMap` for tests and
//! throwaway deployments. Both apply a `StorageBatch` atomically.

use crate::{
    config::{CompressionType, StorageBackend, StorageConfig},
    errors::{LedgerResult, StorageError},
};
use rocksdb::{Direction, IteratorMode, Options, WriteBatch, DB};
use std::{
    collections::BTreeMap,
    path::Path,
    sync::{Arc, RwLock},
};
use tracing::info;

/// A single mutation inside a batch
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WriteOp {
    Put { key: Vec<u8>, value: Vec<u8> },
    Delete { key: Vec<u8> },
}

/// Ordered set of mutations applied all-or-nothing
#[derive(Clone, Debug, Default)]
pub struct StorageBatch {
    ops: Vec<WriteOp>,
}

impl StorageBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&mut self, key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) -> &mut Self {
        self.ops.push(WriteOp::Put {
            key: key.into(),
            value: value.into(),
        });
        self
    }

    pub fn delete(&mut self, key: impl Into<Vec<u8>>) -> &mut Self {
        self.ops.push(WriteOp::Delete { key: key.into() });
        self
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn ops(&self) -> &[WriteOp] {
        &self.ops
    }
}

/// Storage interface used by the ledger
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &[u8]) -> LedgerResult<Option<Vec<u8>>>;

    /// Apply every op in the batch atomically
    fn write(&self, batch: StorageBatch) -> LedgerResult<()>;

    /// All rows whose key starts with `prefix`, in key order
    fn scan_prefix(&self, prefix: &[u8]) -> LedgerResult<Vec<(Vec<u8>, Vec<u8>)>>;
}

/// RocksDB-backed storage
#[derive(Clone)]
pub struct OptimizedStorage {
    db: Arc<DB>,
}

impl OptimizedStorage {
    pub fn new_with_config(config: &StorageConfig) -> LedgerResult<Self> {
        let path = Path::new(&config.data_directory);

        if config.clear_on_start && path.exists() {
            info!(path = %config.data_directory, "Clearing ledger database on start");
            DB::destroy(&Options::default(), path)
                .map_err(|e| StorageError::DatabaseOpenFailed(e.to_string()))?;
        }

        Self::open(path, config)
    }

    fn open(path: &Path, config: &StorageConfig) -> LedgerResult<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.set_write_buffer_size(config.write_buffer_size_mb * 1024 * 1024);
        opts.set_max_write_buffer_number(config.max_write_buffer_number as i32);
        opts.set_compression_type(match config.compression_type {
            CompressionType::None => rocksdb::DBCompressionType::None,
            CompressionType::Snappy => rocksdb::DBCompressionType::Snappy,
            CompressionType::Lz4 => rocksdb::DBCompressionType::Lz4,
            CompressionType::Zstd => rocksdb::DBCompressionType::Zstd,
        });

        let db = DB::open(&opts, path)
            .map_err(|e| StorageError::DatabaseOpenFailed(format!("{}: {}", path.display(), e)))?;

        Ok(Self { db: Arc::new(db) })
    }
}

impl KeyValueStore for OptimizedStorage {
    fn get(&self, key: &[u8]) -> LedgerResult<Option<Vec<u8>>> {
        self.db
            .get(key)
            .map_err(|e| StorageError::ReadFailed(e.to_string()).into())
    }

    fn write(&self, batch: StorageBatch) -> LedgerResult<()> {
        let mut rocks_batch = WriteBatch::default();
        for op in batch.ops {
            match op {
                WriteOp::Put { key, value } => rocks_batch.put(key, value),
                WriteOp::Delete { key } => rocks_batch.delete(key),
            }
        }
        self.db
            .write(rocks_batch)
            .map_err(|e| StorageError::WriteFailed(e.to_string()).into())
    }

    fn scan_prefix(&self, prefix: &[u8]) -> LedgerResult<Vec<(Vec<u8>, Vec<u8>)>> {
        let mut rows = Vec::new();
        for item in self.db.iterator(IteratorMode::From(prefix, Direction::Forward)) {
            let (key, value) = item.map_err(|e| StorageError::ReadFailed(e.to_string()))?;
            if !key.starts_with(prefix) {
                break;
            }
            rows.push((key.to_vec(), value.to_vec()));
        }
        Ok(rows)
    }
}

/// In-memory storage
#[derive(Clone, Default)]
pub struct MemoryStorage {
    rows: Arc<RwLock<BTreeMap<Vec<u8>, Vec<u8>>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStorage {
    fn get(&self, key: &[u8]) -> LedgerResult<Option<Vec<u8>>> {
        let rows = self
            .rows
            .read()
            .map_err(|_| StorageError::Unavailable("memory store lock poisoned".to_string()))?;
        Ok(rows.get(key).cloned())
    }

    fn write(&self, batch: StorageBatch) -> LedgerResult<()> {
        let mut rows = self
            .rows
            .write()
            .map_err(|_| StorageError::Unavailable("memory store lock poisoned".to_string()))?;
        for op in batch.ops {
            match op {
                WriteOp::Put { key, value } => {
                    rows.insert(key, value);
                }
                WriteOp::Delete { key } => {
                    rows.remove(&key);
                }
            }
        }
        Ok(())
    }

    fn scan_prefix(&self, prefix: &[u8]) -> LedgerResult<Vec<(Vec<u8>, Vec<u8>)>> {
        let rows = self
            .rows
            .read()
            .map_err(|_| StorageError::Unavailable("memory store lock poisoned".to_string()))?;
        Ok(rows
            .range(prefix.to_vec()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect())
    }
}

/// Open the backend selected by the configuration
pub fn open_storage(config: &StorageConfig) -> LedgerResult<Arc<dyn KeyValueStore>> {
    match config.backend {
        StorageBackend::RocksDb => {
            info!(path = %config.data_directory, "Opening RocksDB ledger storage");
            Ok(Arc::new(OptimizedStorage::new_with_config(config)?))
        }
        StorageBackend::Memory => {
            info!("Using in-memory ledger storage");
            Ok(Arc::new(MemoryStorage::new()))
        }
    }
}
