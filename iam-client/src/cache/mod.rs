//! # Local Log Store
//!
//! Durable SQLite mirror of the contract's access events and of the device
//! records pulled from the ledger.
//!
//! - `logs` rows are deduplicated by transaction hash; re-inserting a known
//!   hash is a normal outcome, never an error
//! - every operation runs in its own transaction under one connection lock,
//!   so writes are serialized and readers see whole committed states
//! - there is no eviction or TTL; rows go away only through the clear calls

use chrono::Utc;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

use shared::{
    config::CacheConfig,
    constants::DEFAULT_BUSY_TIMEOUT_MS,
    error::{IamError, IamResult},
    types::{AccessLogEntry, CacheStats, Device, NewAccessLog},
};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS devices (
    address      TEXT PRIMARY KEY,
    name         TEXT NOT NULL,
    role         TEXT NOT NULL,
    metadata     TEXT NOT NULL DEFAULT '',
    registeredAt INTEGER NOT NULL,
    updatedAt    INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS logs (
    id        INTEGER PRIMARY KEY AUTOINCREMENT,
    device    TEXT NOT NULL,
    success   INTEGER NOT NULL,
    reason    TEXT NOT NULL,
    timestamp INTEGER NOT NULL,
    txHash    TEXT NOT NULL UNIQUE,
    createdAt INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_logs_device ON logs(device);
CREATE INDEX IF NOT EXISTS idx_logs_timestamp ON logs(timestamp DESC);
"#;

const LOG_COLUMNS: &str = "id, device, success, reason, timestamp, txHash, createdAt";
const DEVICE_COLUMNS: &str = "address, name, role, metadata, registeredAt, updatedAt";

/// Result of [`LogStore::insert_log_if_absent`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    /// A new row was written with this surrogate id
    Inserted { id: i64 },
    /// A row with the same transaction hash already exists
    AlreadyPresent,
}

impl InsertOutcome {
    pub fn is_inserted(&self) -> bool {
        matches!(self, InsertOutcome::Inserted { .. })
    }
}

/// SQLite-backed cache of devices and access logs
pub struct LogStore {
    conn: Mutex<Connection>,

    /// Database file, `None` for in-memory stores
    path: Option<PathBuf>,
}

impl std::fmt::Debug for LogStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogStore").field("path", &self.path).finish()
    }
}

impl LogStore {
    /// Open (or create) the cache database described by `config`
    pub fn open(config: &CacheConfig) -> IamResult<Self> {
        let path = config.db_path.as_path();
        info!(path = ?path, "Opening local log store");

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;
        let journal_mode: String =
            conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
        debug!(journal_mode = %journal_mode, "Journal mode set");

        Self::init(conn, config.busy_timeout_ms, Some(path.to_path_buf()))
    }

    /// Open a private in-memory store
    pub fn open_in_memory() -> IamResult<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init(conn, DEFAULT_BUSY_TIMEOUT_MS, None)
    }

    fn init(conn: Connection, busy_timeout_ms: u64, path: Option<PathBuf>) -> IamResult<Self> {
        conn.busy_timeout(Duration::from_millis(busy_timeout_ms))?;

        let mut conn = conn;
        let tx = conn.transaction()?;
        tx.execute_batch(SCHEMA)?;
        tx.commit()?;

        debug!("Log store schema initialized");
        Ok(Self {
            conn: Mutex::new(conn),
            path,
        })
    }

    /// Database file backing this store, if any
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    // =========================================================================
    // DEVICES
    // =========================================================================

    /// Insert or overwrite the cached row for `device.address`
    ///
    /// `registeredAt` keeps the value from the first write; every other
    /// column is replaced and `updatedAt` is stamped with the current time.
    pub fn upsert_device(&self, device: &Device) -> IamResult<()> {
        let now = Utc::now().timestamp();
        let registered_at = if device.registered_at > 0 {
            device.registered_at
        } else {
            now
        };

        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO devices (address, name, role, metadata, registeredAt, updatedAt)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(address) DO UPDATE SET
                 name = excluded.name,
                 role = excluded.role,
                 metadata = excluded.metadata,
                 updatedAt = excluded.updatedAt",
            params![
                device.address,
                device.name,
                device.role,
                device.metadata,
                registered_at,
                now
            ],
        )?;
        tx.commit()?;

        debug!(address = %device.address, name = %device.name, "Device cached");
        Ok(())
    }

    /// Look up one cached device; `None` when not cached
    pub fn get_device(&self, address: &str) -> IamResult<Option<Device>> {
        let conn = self.conn.lock();
        let device = conn
            .query_row(
                &format!("SELECT {DEVICE_COLUMNS} FROM devices WHERE address = ?1"),
                params![address],
                row_to_device,
            )
            .optional()?;
        Ok(device)
    }

    /// Every cached device, ordered by name
    pub fn fetch_devices(&self) -> IamResult<Vec<Device>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {DEVICE_COLUMNS} FROM devices ORDER BY name, address"
        ))?;
        let devices = stmt
            .query_map([], row_to_device)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(devices)
    }

    // =========================================================================
    // ACCESS LOGS
    // =========================================================================

    /// Insert an access log unless its transaction hash is already stored
    pub fn insert_log_if_absent(&self, entry: &NewAccessLog) -> IamResult<InsertOutcome> {
        let now = Utc::now().timestamp();

        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let changed = tx.execute(
            "INSERT INTO logs (device, success, reason, timestamp, txHash, createdAt)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(txHash) DO NOTHING",
            params![
                entry.device,
                entry.success,
                entry.reason,
                entry.timestamp,
                entry.tx_hash,
                now
            ],
        )?;
        let outcome = if changed == 0 {
            InsertOutcome::AlreadyPresent
        } else {
            InsertOutcome::Inserted {
                id: tx.last_insert_rowid(),
            }
        };
        tx.commit()?;

        match outcome {
            InsertOutcome::Inserted { id } => {
                debug!(id, tx_hash = %entry.tx_hash, "Log cached")
            }
            InsertOutcome::AlreadyPresent => {
                debug!(tx_hash = %entry.tx_hash, "Log already cached")
            }
        }
        Ok(outcome)
    }

    /// Up to `limit` logs, newest event first
    ///
    /// Ties on `timestamp` are broken by insertion order, newest first.
    /// A non-positive `limit` yields an empty list.
    pub fn fetch_recent_logs(&self, limit: i64) -> IamResult<Vec<AccessLogEntry>> {
        if limit <= 0 {
            return Ok(Vec::new());
        }

        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {LOG_COLUMNS} FROM logs ORDER BY timestamp DESC, id DESC LIMIT ?1"
        ))?;
        let logs = stmt
            .query_map(params![limit], row_to_log)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(logs)
    }

    /// Up to `limit` logs for one device, newest event first
    pub fn fetch_logs_for_device(&self, address: &str, limit: i64) -> IamResult<Vec<AccessLogEntry>> {
        if limit <= 0 {
            return Ok(Vec::new());
        }

        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {LOG_COLUMNS} FROM logs WHERE device = ?1
             ORDER BY timestamp DESC, id DESC LIMIT ?2"
        ))?;
        let logs = stmt
            .query_map(params![address, limit], row_to_log)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(logs)
    }

    // =========================================================================
    // MAINTENANCE
    // =========================================================================

    /// Current row counts, read inside one transaction
    pub fn stats(&self) -> IamResult<CacheStats> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let total_devices: i64 = tx.query_row("SELECT COUNT(*) FROM devices", [], |r| r.get(0))?;
        let total_logs: i64 = tx.query_row("SELECT COUNT(*) FROM logs", [], |r| r.get(0))?;
        tx.commit()?;

        Ok(CacheStats {
            total_devices: total_devices as u64,
            total_logs: total_logs as u64,
        })
    }

    /// Delete every cached log and device in one transaction
    ///
    /// Returns the removed row counts. On failure nothing is deleted.
    pub fn clear_all(&self) -> IamResult<CacheStats> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let total_logs = tx.execute("DELETE FROM logs", [])? as u64;
        let total_devices = tx.execute("DELETE FROM devices", [])? as u64;
        tx.commit()?;

        info!(total_logs, total_devices, "Cache cleared");
        Ok(CacheStats {
            total_devices,
            total_logs,
        })
    }

    /// Release the database handle
    pub fn close(self) -> IamResult<()> {
        let path = self.path.clone();
        self.conn.into_inner().close().map_err(|(_, err)| {
            warn!(path = ?path, error = %err, "Failed to close log store");
            IamError::from(err)
        })?;
        debug!(path = ?path, "Log store closed");
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn with_connection<R>(&self, f: impl FnOnce(&Connection) -> R) -> R {
        f(&self.conn.lock())
    }
}

fn row_to_log(row: &Row<'_>) -> rusqlite::Result<AccessLogEntry> {
    Ok(AccessLogEntry {
        id: row.get(0)?,
        device: row.get(1)?,
        success: row.get(2)?,
        reason: row.get(3)?,
        timestamp: row.get(4)?,
        tx_hash: row.get(5)?,
        created_at: row.get(6)?,
    })
}

fn row_to_device(row: &Row<'_>) -> rusqlite::Result<Device> {
    Ok(Device {
        address: row.get(0)?,
        name: row.get(1)?,
        role: row.get(2)?,
        metadata: row.get(3)?,
        registered_at: row.get(4)?,
        updated_at: row.get(5)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tempfile::tempdir;

    fn log(tx_hash: &str, device: &str, timestamp: i64, reason: &str) -> NewAccessLog {
        NewAccessLog {
            device: device.into(),
            success: true,
            reason: reason.into(),
            timestamp,
            tx_hash: tx_hash.into(),
        }
    }

    fn device(address: &str, name: &str, registered_at: i64) -> Device {
        Device {
            address: address.into(),
            name: name.into(),
            role: "sensor".into(),
            metadata: String::new(),
            registered_at,
            updated_at: 0,
        }
    }

    #[test]
    fn test_duplicate_tx_hash_first_write_wins() {
        let store = LogStore::open_in_memory().unwrap();

        let first = store.insert_log_if_absent(&log("tx1", "0xA", 10, "door open")).unwrap();
        let second = store.insert_log_if_absent(&log("tx1", "0xA", 10, "tampered")).unwrap();

        assert!(first.is_inserted());
        assert_eq!(second, InsertOutcome::AlreadyPresent);

        let logs = store.fetch_recent_logs(10).unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].reason, "door open");
    }

    #[test]
    fn test_recent_logs_ordered_by_timestamp() {
        let store = LogStore::open_in_memory().unwrap();
        for (hash, ts) in [("tx-a", 100), ("tx-b", 300), ("tx-c", 200)] {
            store.insert_log_if_absent(&log(hash, "0xA", ts, "r")).unwrap();
        }

        let timestamps: Vec<i64> = store
            .fetch_recent_logs(3)
            .unwrap()
            .iter()
            .map(|l| l.timestamp)
            .collect();
        assert_eq!(timestamps, vec![300, 200, 100]);
    }

    #[test]
    fn test_timestamp_ties_break_by_insertion_order() {
        let store = LogStore::open_in_memory().unwrap();
        store.insert_log_if_absent(&log("early", "0xA", 50, "r")).unwrap();
        store.insert_log_if_absent(&log("late", "0xA", 50, "r")).unwrap();

        let logs = store.fetch_recent_logs(2).unwrap();
        assert_eq!(logs[0].tx_hash, "late");
        assert_eq!(logs[1].tx_hash, "early");
        assert!(logs[0].id > logs[1].id);
    }

    #[test]
    fn test_non_positive_limit_returns_empty() {
        let store = LogStore::open_in_memory().unwrap();
        store.insert_log_if_absent(&log("tx1", "0xA", 10, "r")).unwrap();

        assert!(store.fetch_recent_logs(0).unwrap().is_empty());
        assert!(store.fetch_recent_logs(-1).unwrap().is_empty());
        assert!(store.fetch_logs_for_device("0xA", 0).unwrap().is_empty());
        assert!(store.fetch_logs_for_device("0xA", -5).unwrap().is_empty());
    }

    #[test]
    fn test_fetch_logs_for_device_filters() {
        let store = LogStore::open_in_memory().unwrap();
        store.insert_log_if_absent(&log("tx1", "0xA", 10, "r")).unwrap();
        store.insert_log_if_absent(&log("tx2", "0xB", 20, "r")).unwrap();

        let logs = store.fetch_logs_for_device("0xA", 10).unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].tx_hash, "tx1");
        assert_eq!(logs[0].device, "0xA");
    }

    #[test]
    fn test_device_upsert_overwrites() {
        let store = LogStore::open_in_memory().unwrap();
        store.upsert_device(&device("0xA", "X", 100)).unwrap();
        store.upsert_device(&device("0xA", "Y", 200)).unwrap();

        let cached = store.get_device("0xA").unwrap().unwrap();
        assert_eq!(cached.name, "Y");
        assert_eq!(cached.registered_at, 100);
        assert!(cached.updated_at >= cached.registered_at);
        assert_eq!(store.stats().unwrap().total_devices, 1);
    }

    #[test]
    fn test_get_device_not_found() {
        let store = LogStore::open_in_memory().unwrap();
        assert!(store.get_device("0xnope").unwrap().is_none());
    }

    #[test]
    fn test_failed_upsert_leaves_row_unchanged() {
        let store = LogStore::open_in_memory().unwrap();
        store.upsert_device(&device("0xA", "X", 100)).unwrap();

        store.with_connection(|conn| {
            conn.execute_batch(
                "CREATE TRIGGER reject_update BEFORE UPDATE ON devices
                 BEGIN SELECT RAISE(ABORT, 'simulated storage fault'); END;",
            )
            .unwrap();
        });

        let err = store.upsert_device(&device("0xA", "Y", 100)).unwrap_err();
        assert_eq!(err.category(), "storage");
        assert_eq!(store.get_device("0xA").unwrap().unwrap().name, "X");
    }

    #[test]
    fn test_stats_and_clear() {
        let store = LogStore::open_in_memory().unwrap();
        store.upsert_device(&device("0xA", "X", 1)).unwrap();
        store.insert_log_if_absent(&log("tx1", "0xA", 10, "r")).unwrap();
        store.insert_log_if_absent(&log("tx2", "0xA", 11, "r")).unwrap();

        assert_eq!(
            store.stats().unwrap(),
            CacheStats {
                total_devices: 1,
                total_logs: 2
            }
        );

        assert_eq!(
            store.clear_all().unwrap(),
            CacheStats {
                total_devices: 1,
                total_logs: 2
            }
        );
        assert_eq!(store.stats().unwrap(), CacheStats::default());
    }

    #[test]
    fn test_clear_all_is_atomic() {
        let store = LogStore::open_in_memory().unwrap();
        store.upsert_device(&device("0xA", "X", 1)).unwrap();
        store.insert_log_if_absent(&log("tx1", "0xA", 10, "r")).unwrap();

        store.with_connection(|conn| {
            conn.execute_batch(
                "CREATE TRIGGER keep_devices BEFORE DELETE ON devices
                 BEGIN SELECT RAISE(ABORT, 'simulated storage fault'); END;",
            )
            .unwrap();
        });

        let err = store.clear_all().unwrap_err();
        assert_eq!(err.category(), "storage");
        assert_eq!(
            store.stats().unwrap(),
            CacheStats {
                total_devices: 1,
                total_logs: 1
            }
        );

        store.with_connection(|conn| conn.execute_batch("DROP TRIGGER keep_devices").unwrap());
        assert_eq!(
            store.clear_all().unwrap(),
            CacheStats {
                total_devices: 1,
                total_logs: 1
            }
        );
        assert_eq!(store.stats().unwrap(), CacheStats::default());
    }

    #[test]
    fn test_fetch_devices_ordered_by_name() {
        let store = LogStore::open_in_memory().unwrap();
        assert!(store.fetch_devices().unwrap().is_empty());

        store.upsert_device(&device("0xC", "valve", 1)).unwrap();
        store.upsert_device(&device("0xA", "thermo", 1)).unwrap();
        store.upsert_device(&device("0xB", "gateway", 1)).unwrap();

        let names: Vec<String> = store
            .fetch_devices()
            .unwrap()
            .into_iter()
            .map(|d| d.name)
            .collect();
        assert_eq!(names, vec!["gateway", "thermo", "valve"]);
    }

    #[test]
    fn test_ids_not_reused_after_clear() {
        let store = LogStore::open_in_memory().unwrap();
        let InsertOutcome::Inserted { id: first } =
            store.insert_log_if_absent(&log("tx1", "0xA", 10, "r")).unwrap()
        else {
            panic!("expected insert");
        };
        store.clear_all().unwrap();
        let InsertOutcome::Inserted { id: second } =
            store.insert_log_if_absent(&log("tx1", "0xA", 10, "r")).unwrap()
        else {
            panic!("expected insert");
        };
        assert!(second > first);
    }

    #[test]
    fn test_persistence_across_instances() {
        let dir = tempdir().unwrap();
        let config = CacheConfig {
            db_path: dir.path().join("nested").join("cache.db"),
            ..CacheConfig::default()
        };

        {
            let store = LogStore::open(&config).unwrap();
            store.upsert_device(&device("0xA", "X", 5)).unwrap();
            store.insert_log_if_absent(&log("tx1", "0xA", 10, "r")).unwrap();
            store.close().unwrap();
        }

        {
            let store = LogStore::open(&config).unwrap();
            assert_eq!(store.path(), Some(config.db_path.as_path()));
            assert_eq!(store.stats().unwrap().total_logs, 1);
            assert_eq!(store.get_device("0xA").unwrap().unwrap().name, "X");
        }
    }

    #[test]
    fn test_concurrent_readers_see_committed_counts() {
        let store = Arc::new(LogStore::open_in_memory().unwrap());

        let writer = {
            let store = Arc::clone(&store);
            std::thread::spawn(move || {
                for i in 0..200 {
                    let entry = log(&format!("tx{i}"), "0xA", i, "r");
                    store.insert_log_if_absent(&entry).unwrap();
                }
            })
        };

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || {
                    let mut last = 0;
                    for _ in 0..100 {
                        let total = store.stats().unwrap().total_logs;
                        assert!(total >= last);
                        last = total;
                        let recent = store.fetch_recent_logs(5).unwrap();
                        assert!(recent.len() <= 5);
                    }
                })
            })
            .collect();

        writer.join().unwrap();
        for reader in readers {
            reader.join().unwrap();
        }
        assert_eq!(store.stats().unwrap().total_logs, 200);
    }
}
