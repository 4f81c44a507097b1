//! Internal database state and record bookkeeping.

use super::DBInner;
use crate::error::Result;
use crate::persistence::{LogCommand, LogFile};
use crate::types::{Config, DbStats, Record, RecordKind};
use bytes::Bytes;
use std::collections::BTreeMap;
use std::time::SystemTime;

impl DBInner {
    pub(crate) fn new_with_config(config: Config) -> Self {
        Self {
            records: BTreeMap::new(),
            expirations: BTreeMap::new(),
            log: None,
            closed: false,
            stats: DbStats::default(),
            config,
        }
    }

    /// Insert a record, maintaining the expiration index and key count.
    /// Returns the displaced record, if any.
    pub(crate) fn insert_record(&mut self, key: Bytes, record: Record) -> Option<Record> {
        let expires_at = record.expires_at;
        let old = self.records.insert(key.clone(), record);
        if let Some(ref old) = old {
            self.remove_expiration_entry(&key, old);
        }
        self.add_expiration(&key, expires_at);
        self.stats.key_count = self.records.len();
        old
    }

    /// Remove a record, maintaining the expiration index and key count.
    pub(crate) fn remove_record(&mut self, key: &Bytes) -> Option<Record> {
        let record = self.records.remove(key)?;
        self.remove_expiration_entry(key, &record);
        self.stats.key_count = self.records.len();
        Some(record)
    }

    pub(crate) fn get_record(&self, key: &Bytes) -> Option<&Record> {
        self.records.get(key)
    }

    fn add_expiration(&mut self, key: &Bytes, expires_at: Option<SystemTime>) {
        if let Some(exp) = expires_at {
            self.expirations.entry(exp).or_default().push(key.clone());
        }
    }

    fn remove_expiration_entry(&mut self, key: &Bytes, record: &Record) {
        if let Some(exp) = record.expires_at
            && let Some(keys) = self.expirations.get_mut(&exp)
        {
            keys.retain(|k| k != key);
            if keys.is_empty() {
                self.expirations.remove(&exp);
            }
        }
    }

    /// Reap one record found expired on a read path.
    ///
    /// Never raises: a failed log append only delays replay-side cleanup,
    /// the record itself is gone either way.
    pub(crate) fn reap_expired(&mut self, key: &Bytes) {
        if self.remove_record(key).is_some() {
            self.stats.record_expired(1);
            self.log_delete_best_effort(key);
        }
    }

    /// Sweep every record whose expiry is at or before now.
    pub(crate) fn sweep_expired(&mut self) -> usize {
        let now = SystemTime::now();
        let due: Vec<SystemTime> = self.expirations.range(..=now).map(|(&ts, _)| ts).collect();

        let mut removed = 0;
        for ts in due {
            if let Some(keys) = self.expirations.remove(&ts) {
                for key in keys {
                    if self.records.remove(&key).is_some() {
                        self.log_delete_best_effort(&key);
                        removed += 1;
                    }
                }
            }
        }

        self.stats.key_count = self.records.len();
        self.stats.record_expired(removed as u64);
        removed
    }

    /// Append a SET to the log, honoring `sync_on_write`.
    ///
    /// Called before the in-memory mutation so a failed append leaves the
    /// store untouched.
    pub(crate) fn log_set(
        &mut self,
        key: &[u8],
        value: &[u8],
        kind: RecordKind,
        expires_at: Option<SystemTime>,
    ) -> Result<()> {
        let sync_on_write = self.config.sync_on_write;
        if let Some(log) = self.log.as_mut() {
            log.append_set(key, value, kind, expires_at)?;
            if sync_on_write {
                log.sync()?;
            }
        }
        Ok(())
    }

    /// Append a DELETE to the log, honoring `sync_on_write`.
    pub(crate) fn log_delete(&mut self, key: &[u8]) -> Result<()> {
        let sync_on_write = self.config.sync_on_write;
        if let Some(log) = self.log.as_mut() {
            log.append_delete(key)?;
            if sync_on_write {
                log.sync()?;
            }
        }
        Ok(())
    }

    fn log_delete_best_effort(&mut self, key: &Bytes) {
        if let Some(log) = self.log.as_mut()
            && let Err(e) = log.append_delete(key)
        {
            log::warn!("failed to log reap of expired key: {e}");
        }
    }

    /// Rebuild in-memory state from the append-only log (startup replay).
    ///
    /// Replays SET and DELETE commands in order, restoring records and the
    /// expiration index. Counters start fresh: they are per-handle, not
    /// persisted.
    pub(crate) fn load_from_log(&mut self, log: &mut LogFile) -> Result<()> {
        for command in log.replay()? {
            match command {
                LogCommand::Set {
                    key,
                    value,
                    kind,
                    expires_at,
                } => {
                    let record = Record {
                        value,
                        kind,
                        expires_at,
                    };
                    let old = self.records.insert(key.clone(), record);
                    if let Some(ref old) = old {
                        self.remove_expiration_entry(&key, old);
                    }
                    self.add_expiration(&key, expires_at);
                }
                LogCommand::Delete { key } => {
                    if let Some(record) = self.records.remove(&key) {
                        self.remove_expiration_entry(&key, &record);
                    }
                }
            }
        }

        self.stats.key_count = self.records.len();
        Ok(())
    }
}
