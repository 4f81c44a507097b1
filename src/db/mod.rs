//! Core database implementation.
//!
//! This module defines the main `DB` type: a thread-safe handle over an
//! ordered key-value store with TTL expiry, a geohash-keyed spatial index,
//! and a trajectory store, all living in one keyspace.

use crate::error::{GeostoreError, Result};
use crate::persistence::LogFile;
use crate::types::{Config, DbStats, Record, RecordKind, SetOptions};
use bytes::Bytes;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::SystemTime;

mod internal;
mod spatial;
mod trajectory;

/// An embedded spatio-temporal database handle.
///
/// `DB` is cheap to clone; clones share the same underlying store. Reads
/// take a shared lock and run concurrently, writes take the exclusive
/// side.
///
/// # Examples
///
/// ## Basic usage
/// ```rust
/// use geostore::{DB, SetOptions};
/// use std::time::Duration;
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let db = DB::memory()?;
///
/// db.insert("user:123", b"Ada", None)?;
/// assert_eq!(db.get("user:123")?.unwrap().as_ref(), b"Ada");
///
/// // Expiring entry
/// let opts = SetOptions::with_ttl(Duration::from_secs(300));
/// db.insert("session:abc", b"token", Some(opts))?;
/// # Ok(())
/// # }
/// ```
///
/// ## Spatial usage
/// ```rust
/// use geostore::{DB, Point};
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let db = DB::memory()?;
///
/// let nyc = Point::new(40.7128, -74.0060)?;
/// db.insert_point("cities", &nyc, b"New York", None)?;
///
/// let nearby = db.find_nearby("cities", &nyc, 1_000.0, 10)?;
/// assert_eq!(nearby.len(), 1);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct DB {
    shared: Arc<DbShared>,
}

struct DbShared {
    state: RwLock<DBInner>,
    /// Monotonic uid source for geo keys. The only mutable field outside
    /// the lock.
    next_uid: AtomicU64,
}

pub(crate) struct DBInner {
    /// Main ordered record map. Composite geo and trajectory keys live
    /// alongside user scalar keys; the kind tag tells them apart.
    pub(crate) records: BTreeMap<Bytes, Record>,
    /// Records bucketed by expiration time, for sweep reaping.
    pub(crate) expirations: BTreeMap<SystemTime, Vec<Bytes>>,
    /// Append-only log for durable handles.
    pub(crate) log: Option<LogFile>,
    /// Whether the handle has been closed.
    pub(crate) closed: bool,
    /// The three per-handle counters.
    pub(crate) stats: DbStats,
    /// Configuration snapshot taken at open time.
    pub(crate) config: Config,
}

impl DB {
    /// Create an in-memory database with the default configuration.
    pub fn memory() -> Result<Self> {
        Self::memory_with_config(Config::default())
    }

    /// Create an in-memory database with a custom configuration.
    pub fn memory_with_config(config: Config) -> Result<Self> {
        config.validate()?;
        Ok(Self::from_inner(DBInner::new_with_config(config)))
    }

    /// Open a durable database at `path`, creating it if absent.
    ///
    /// Opening replays the append-only log at `path` to restore all
    /// records, so scalar, geo, and trajectory data survive restarts.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use geostore::DB;
    ///
    /// # fn main() -> Result<(), Box<dyn std::error::Error>> {
    /// let path = std::env::temp_dir().join("geostore_doc_open.db");
    /// # let _ = std::fs::remove_file(&path);
    /// let db = DB::open(&path)?;
    /// db.insert("key", b"value", None)?;
    /// db.close()?;
    /// # std::fs::remove_file(path)?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::open_with_config(path, Config::default())
    }

    /// Open a durable database with a custom configuration.
    pub fn open_with_config<P: AsRef<Path>>(path: P, config: Config) -> Result<Self> {
        config.validate()?;
        let mut inner = DBInner::new_with_config(config);
        let mut log = LogFile::open(path)?;
        inner.load_from_log(&mut log)?;
        inner.log = Some(log);
        Ok(Self::from_inner(inner))
    }

    fn from_inner(inner: DBInner) -> Self {
        // Resume the uid sequence above every replayed geo entry so fresh
        // inserts never clobber restored ones.
        let next_uid = inner
            .records
            .iter()
            .filter(|(_, record)| record.kind == RecordKind::Geo)
            .map(|(key, _)| spatial::parse_uid(key).wrapping_add(1))
            .max()
            .unwrap_or(0);

        Self {
            shared: Arc::new(DbShared {
                state: RwLock::new(inner),
                next_uid: AtomicU64::new(next_uid),
            }),
        }
    }

    /// Insert a key-value pair, returning the displaced live value.
    ///
    /// `opts` can attach a TTL or an absolute expiration; a zero TTL is
    /// rejected. Overwrites are atomic.
    pub fn insert(
        &self,
        key: impl AsRef<[u8]>,
        value: impl AsRef<[u8]>,
        opts: Option<SetOptions>,
    ) -> Result<Option<Bytes>> {
        let key_bytes = Bytes::copy_from_slice(key.as_ref());
        let record = Record::from_options(
            Bytes::copy_from_slice(value.as_ref()),
            RecordKind::Scalar,
            opts.as_ref(),
        )?;

        let mut inner = self.write_checked()?;
        inner.log_set(&key_bytes, &record.value, record.kind, record.expires_at)?;
        let old = inner.insert_record(key_bytes, record);
        inner.stats.record_operation();

        match old {
            Some(old) if old.is_expired() => {
                inner.stats.record_expired(1);
                Ok(None)
            }
            Some(old) => Ok(Some(old.value)),
            None => Ok(None),
        }
    }

    /// Get a value by key.
    ///
    /// A record found expired is reaped on the spot and reported absent.
    /// `get` never counts as an operation.
    pub fn get(&self, key: impl AsRef<[u8]>) -> Result<Option<Bytes>> {
        let key_bytes = Bytes::copy_from_slice(key.as_ref());

        {
            let inner = self.read_checked()?;
            match inner.get_record(&key_bytes) {
                Some(record) if !record.is_expired() => {
                    return Ok(Some(record.value.clone()));
                }
                Some(_) => {} // expired: fall through to reap
                None => return Ok(None),
            }
        }

        // Upgrade to the exclusive side for the reap step. The state may
        // have changed between the guards, so re-check.
        let mut inner = self.write_checked()?;
        match inner.get_record(&key_bytes) {
            Some(record) if !record.is_expired() => Ok(Some(record.value.clone())),
            Some(_) => {
                inner.reap_expired(&key_bytes);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    /// Delete a key, returning its live value if there was one.
    pub fn delete(&self, key: impl AsRef<[u8]>) -> Result<Option<Bytes>> {
        let key_bytes = Bytes::copy_from_slice(key.as_ref());

        let mut inner = self.write_checked()?;
        let deleted = if inner.get_record(&key_bytes).is_some() {
            inner.log_delete(&key_bytes)?;
            inner.remove_record(&key_bytes)
        } else {
            None
        };
        inner.stats.record_operation();

        match deleted {
            Some(record) if record.is_expired() => {
                inner.stats.record_expired(1);
                Ok(None)
            }
            Some(record) => Ok(Some(record.value)),
            None => Ok(None),
        }
    }

    /// Lazily scan live entries whose keys start with `prefix`, in
    /// ascending key order.
    ///
    /// The returned cursor is single-pass and non-restartable: each step
    /// looks up the next key under the shared lock, so a long scan never
    /// pins the database. Expired entries the cursor steps over are
    /// reaped on the way.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use geostore::DB;
    ///
    /// # fn main() -> Result<(), Box<dyn std::error::Error>> {
    /// let db = DB::memory()?;
    /// db.insert("fruit:apple", b"red", None)?;
    /// db.insert("fruit:pear", b"green", None)?;
    ///
    /// for entry in db.scan_prefix("fruit:")? {
    ///     let (key, value) = entry?;
    ///     println!("{key:?} = {value:?}");
    /// }
    /// # Ok(())
    /// # }
    /// ```
    pub fn scan_prefix(&self, prefix: impl AsRef<[u8]>) -> Result<PrefixScan> {
        // Surface DatabaseClosed at call time, not on the first step.
        self.read_checked()?;
        Ok(PrefixScan {
            db: self.clone(),
            prefix: Bytes::copy_from_slice(prefix.as_ref()),
            cursor: None,
            done: false,
        })
    }

    /// Remove every expired record right now and return how many went.
    pub fn cleanup_expired(&self) -> Result<usize> {
        let mut inner = self.write_checked()?;
        Ok(inner.sweep_expired())
    }

    /// Current counter values.
    pub fn stats(&self) -> Result<DbStats> {
        let inner = self.read_checked()?;
        Ok(inner.stats.clone())
    }

    /// Flush pending durable state. A no-op for in-memory handles;
    /// idempotent.
    pub fn sync(&self) -> Result<()> {
        let mut inner = self.write_checked()?;
        if let Some(log) = inner.log.as_mut() {
            log.sync()?;
        }
        Ok(())
    }

    /// Close the handle: flush durable state, release memory and file
    /// resources. Idempotent; any later operation fails with
    /// `DatabaseClosed`.
    pub fn close(&self) -> Result<()> {
        let mut inner = self.write()?;
        if inner.closed {
            return Ok(());
        }

        if let Some(log) = inner.log.as_mut() {
            log.sync()?;
        }
        inner.log = None;
        inner.records = BTreeMap::new();
        inner.expirations = BTreeMap::new();
        inner.closed = true;
        Ok(())
    }

    /// Allocate the next geo-key uid. Atomic; does not take the lock.
    pub(crate) fn next_uid(&self) -> u64 {
        self.shared.next_uid.fetch_add(1, Ordering::Relaxed)
    }

    pub(crate) fn read(&self) -> Result<RwLockReadGuard<'_, DBInner>> {
        self.shared.state.read().map_err(|_| {
            log::error!("database lock poisoned: a writer panicked while holding it");
            GeostoreError::LockPoisoned
        })
    }

    pub(crate) fn write(&self) -> Result<RwLockWriteGuard<'_, DBInner>> {
        self.shared.state.write().map_err(|_| {
            log::error!("database lock poisoned: a writer panicked while holding it");
            GeostoreError::LockPoisoned
        })
    }

    /// Acquire a read lock and verify the database is open.
    pub(crate) fn read_checked(&self) -> Result<RwLockReadGuard<'_, DBInner>> {
        let guard = self.read()?;
        if guard.closed {
            return Err(GeostoreError::DatabaseClosed);
        }
        Ok(guard)
    }

    /// Acquire a write lock and verify the database is open.
    pub(crate) fn write_checked(&self) -> Result<RwLockWriteGuard<'_, DBInner>> {
        let guard = self.write()?;
        if guard.closed {
            return Err(GeostoreError::DatabaseClosed);
        }
        Ok(guard)
    }
}

/// Lazy cursor over one key-prefix range. Created by [`DB::scan_prefix`].
///
/// Every step re-acquires the shared lock and asks the tree for the
/// successor of the last key seen, so the cursor observes writes that land
/// ahead of it and never revisits keys behind it.
pub struct PrefixScan {
    db: DB,
    prefix: Bytes,
    cursor: Option<Bytes>,
    done: bool,
}

impl Iterator for PrefixScan {
    type Item = Result<(Bytes, Bytes)>;

    fn next(&mut self) -> Option<Self::Item> {
        use std::ops::Bound;

        while !self.done {
            let inner = match self.db.read_checked() {
                Ok(guard) => guard,
                Err(e) => {
                    self.done = true;
                    return Some(Err(e));
                }
            };

            let mut range = match self.cursor.take() {
                Some(last) => inner
                    .records
                    .range((Bound::Excluded(last), Bound::Unbounded)),
                None => inner.records.range(self.prefix.clone()..),
            };

            let Some((key, record)) = range.next() else {
                self.done = true;
                return None;
            };
            if !key.starts_with(&self.prefix) {
                self.done = true;
                return None;
            }

            let key = key.clone();
            if !record.is_expired() {
                let value = record.value.clone();
                drop(inner);
                self.cursor = Some(key.clone());
                return Some(Ok((key, value)));
            }
            drop(inner);

            // Reap the expired entry the cursor just stepped over.
            // Reaping never raises; a failure here only delays cleanup.
            if let Ok(mut inner) = self.db.write_checked()
                && inner.get_record(&key).is_some_and(|r| r.is_expired())
            {
                inner.reap_expired(&key);
            }
            self.cursor = Some(key);
        }
        None
    }
}

/// Best-effort flush when the last clone of a durable handle goes away.
/// Explicit `close()` remains the way to observe flush errors.
impl Drop for DB {
    fn drop(&mut self) {
        if Arc::strong_count(&self.shared) != 1 {
            return;
        }
        if let Ok(mut inner) = self.shared.state.write()
            && !inner.closed
            && let Some(log) = inner.log.as_mut()
            && let Err(e) = log.sync()
        {
            log::warn!("failed to sync log on drop: {e}");
        }
    }
}
