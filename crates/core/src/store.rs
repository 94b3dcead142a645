//! Versioned State Store - durable history for the authenticated map
//!
//! Every committed version of the reputation map stays provable for the life
//! of the store. Each version is persisted as:
//! - a version row: version_id, root digest, change-log watermark, key count
//! - the diff against the previous version: one (key, value) row per key that
//!   changed in that version
//!
//! # Guarantees
//!
//! - Atomic commit: a version row and its diff are written in one SQLite
//!   transaction, so a crash leaves either the old or the new version readable
//! - Strict ordering: version ids increase by exactly 1 from the genesis
//!   version 0 (empty map)
//! - Reconstruction: any version is rebuilt from the diffs and checked against
//!   its stored root; a mismatch is corruption and halts all reads and writes
//! - Snapshot isolation: readers hold an `Arc<Snapshot>` of an immutable
//!   version; a commit only swaps the head pointer under a short write lock

use crate::config::StoreConfig;
use crate::proof::ReputationProof;
use crate::trie::{AuthenticatedMap, TrieError};
use crate::types::{
    Digest, Key, ReputationValue, SequenceNumber, VersionId, VersionSelector,
};
use rusqlite::{params, Connection, OpenFlags, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tracing::{debug, error, info, warn};

/// Errors that can occur in store operations
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    DatabaseError(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Version not found: {0}")]
    VersionNotFound(VersionId),

    #[error("Key {key} not found at version {version}")]
    KeyNotFound { key: Key, version: VersionId },

    #[error("Store corrupted: {0}")]
    CorruptionDetected(String),

    #[error("Staged version is based on {base} but head is {head}")]
    StaleBase { base: VersionId, head: VersionId },

    #[error("Store lock poisoned")]
    LockPoisoned,
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Store health status
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StoreHealth {
    Ok,
    Corrupted {
        /// Version whose persisted state failed verification, if known
        version: Option<VersionId>,
        reason: String,
    },
}

impl StoreHealth {
    pub fn is_ok(&self) -> bool {
        matches!(self, StoreHealth::Ok)
    }
}

/// Persisted metadata of one committed version
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionRecord {
    pub version: VersionId,
    pub root: Digest,
    /// Last change-log sequence folded into this version
    pub watermark: Option<SequenceNumber>,
    pub key_count: u64,
    /// Unix milliseconds
    pub committed_at: u64,
}

/// Observability counters for the store
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct StoreMetrics {
    pub versions_committed_total: u64,
    pub reconstructions_total: u64,
    pub snapshot_cache_hits_total: u64,
    pub startup_checks_total: u64,
    pub corruption_detections_total: u64,
}

#[derive(Debug, Default)]
struct Counters {
    versions_committed: AtomicU64,
    reconstructions: AtomicU64,
    cache_hits: AtomicU64,
    startup_checks: AtomicU64,
    corruption_detections: AtomicU64,
}

/// An immutable committed version
#[derive(Debug, Clone)]
pub struct Snapshot {
    record: VersionRecord,
    map: AuthenticatedMap,
}

impl Snapshot {
    pub fn version(&self) -> VersionId {
        self.record.version
    }

    pub fn root(&self) -> Digest {
        self.record.root
    }

    pub fn watermark(&self) -> Option<SequenceNumber> {
        self.record.watermark
    }

    pub fn key_count(&self) -> u64 {
        self.record.key_count
    }

    pub fn record(&self) -> &VersionRecord {
        &self.record
    }

    pub fn map(&self) -> &AuthenticatedMap {
        &self.map
    }

    pub fn get(&self, key: &Key) -> Option<ReputationValue> {
        self.map.get(key)
    }

    pub fn prove(&self, key: &Key) -> Result<ReputationProof> {
        self.map.prove(key).map_err(|e| match e {
            TrieError::KeyNotFound(key) => StoreError::KeyNotFound {
                key,
                version: self.record.version,
            },
        })
    }
}

/// Copy-on-write working set for the next version.
///
/// Built from the head snapshot by [`VersionedStore::stage`]; nothing is
/// visible to readers until [`VersionedStore::commit`] succeeds, and dropping
/// it discards the work.
#[derive(Debug, Clone)]
pub struct StagedVersion {
    base: Arc<Snapshot>,
    map: AuthenticatedMap,
    changes: BTreeMap<Key, ReputationValue>,
    watermark: Option<SequenceNumber>,
}

impl StagedVersion {
    pub fn base_version(&self) -> VersionId {
        self.base.version()
    }

    pub fn get(&self, key: &Key) -> Option<ReputationValue> {
        self.map.get(key)
    }

    pub fn put(&mut self, key: Key, value: ReputationValue) -> Digest {
        self.changes.insert(key, value);
        self.map.put(key, value)
    }

    /// Keys in the working set, including keys staged but not yet committed.
    pub fn key_count(&self) -> u64 {
        self.map.len()
    }

    pub fn watermark(&self) -> Option<SequenceNumber> {
        self.watermark
    }

    pub fn set_watermark(&mut self, sequence: SequenceNumber) {
        self.watermark = Some(sequence);
    }

    pub fn root(&self) -> Digest {
        self.map.root_digest()
    }

    pub fn changed_keys(&self) -> usize {
        self.changes.len()
    }

    /// True if committing would record nothing new.
    pub fn is_unchanged(&self) -> bool {
        self.changes.is_empty() && self.watermark == self.base.watermark()
    }
}

/// Versioned, persistent store of the reputation map
pub struct VersionedStore {
    conn: Mutex<Connection>,
    path: PathBuf,
    head: RwLock<Arc<Snapshot>>,
    cache: Mutex<BTreeMap<VersionId, Arc<Snapshot>>>,
    cache_size: usize,
    health: RwLock<StoreHealth>,
    counters: Counters,
}

impl VersionedStore {
    /// Create or open a store at the specified path
    ///
    /// Runs the startup continuity check; a store that fails it is not
    /// returned.
    pub fn open(path: impl AsRef<Path>, config: &StoreConfig) -> Result<Self> {
        let path = path.as_ref();

        info!(path = %path.display(), "Opening versioned state store");

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;

        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;

        Self::init_schema(&conn)?;
        Self::ensure_genesis(&conn)?;

        let counters = Counters::default();
        let head = match Self::startup_continuity_check(&conn, &counters) {
            Ok(head) => head,
            Err(e) => {
                counters.corruption_detections.fetch_add(1, Ordering::Relaxed);
                error!(path = %path.display(), error = %e, "Store failed continuity check");
                return Err(e);
            }
        };

        info!(
            version = head.version(),
            root = %head.root(),
            key_count = head.key_count(),
            "Versioned state store ready"
        );

        Ok(Self {
            conn: Mutex::new(conn),
            path: path.to_path_buf(),
            head: RwLock::new(Arc::new(head)),
            cache: Mutex::new(BTreeMap::new()),
            cache_size: config.snapshot_cache_size.max(1),
            health: RwLock::new(StoreHealth::Ok),
            counters,
        })
    }

    fn init_schema(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS versions (
                version_id INTEGER PRIMARY KEY,
                root BLOB NOT NULL,
                watermark INTEGER,
                key_count INTEGER NOT NULL,
                committed_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS version_entries (
                version_id INTEGER NOT NULL REFERENCES versions(version_id),
                key BLOB NOT NULL,
                value BLOB NOT NULL,
                PRIMARY KEY (version_id, key)
            );

            CREATE INDEX IF NOT EXISTS idx_versions_root ON versions(root);
            CREATE INDEX IF NOT EXISTS idx_entries_key ON version_entries(key, version_id);
            "#,
        )?;

        Ok(())
    }

    fn ensure_genesis(conn: &Connection) -> Result<()> {
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM versions", [], |row| row.get(0))?;
        if count == 0 {
            conn.execute(
                "INSERT INTO versions (version_id, root, watermark, key_count, committed_at)
                 VALUES (0, ?1, NULL, 0, ?2)",
                params![Digest::EMPTY.as_bytes().to_vec(), current_timestamp_ms() as i64],
            )?;
            info!("Initialised store with genesis version 0");
        }
        Ok(())
    }

    /// Verify the persisted history and rebuild the head version
    ///
    /// Verifies:
    /// - version ids run 0, 1, 2, ... with no gaps
    /// - genesis is the empty map
    /// - watermarks never move backwards
    /// - each version's key count matches the keys first written up to it
    /// - rebuilding the head from diffs reproduces its stored root
    fn startup_continuity_check(conn: &Connection, counters: &Counters) -> Result<Snapshot> {
        counters.startup_checks.fetch_add(1, Ordering::Relaxed);

        let records = Self::load_records(conn)?;
        let first_seen = Self::load_first_appearances(conn)?;

        let genesis = records
            .first()
            .ok_or_else(|| StoreError::CorruptionDetected("missing genesis version".to_string()))?;
        if genesis.version != 0 || genesis.root != Digest::EMPTY || genesis.key_count != 0 {
            return Err(StoreError::CorruptionDetected(format!(
                "genesis version malformed: version={} root={} key_count={}",
                genesis.version, genesis.root, genesis.key_count
            )));
        }

        let mut introduced = 0u64;
        let mut firsts = first_seen.iter().peekable();
        let mut prev_watermark = None;
        for (expected, record) in records.iter().enumerate() {
            if record.version != expected as VersionId {
                return Err(StoreError::CorruptionDetected(format!(
                    "version gap: expected {}, found {}",
                    expected, record.version
                )));
            }
            if record.watermark < prev_watermark {
                return Err(StoreError::CorruptionDetected(format!(
                    "watermark moved backwards at version {}",
                    record.version
                )));
            }
            prev_watermark = record.watermark;

            while firsts.next_if(|v| **v <= record.version).is_some() {
                introduced += 1;
            }
            if introduced != record.key_count {
                return Err(StoreError::CorruptionDetected(format!(
                    "version {} records {} keys but history introduces {}",
                    record.version, record.key_count, introduced
                )));
            }
        }

        let head = records
            .last()
            .cloned()
            .ok_or_else(|| StoreError::CorruptionDetected("empty version table".to_string()))?;
        let map = Self::rebuild(conn, &head)?;

        info!(
            versions = records.len(),
            head = head.version,
            "Store continuity check passed"
        );

        Ok(Snapshot { record: head, map })
    }

    fn load_records(conn: &Connection) -> Result<Vec<VersionRecord>> {
        let mut stmt = conn.prepare(
            r#"
            SELECT version_id, root, watermark, key_count, committed_at
            FROM versions
            ORDER BY version_id ASC
            "#,
        )?;

        let rows = stmt
            .query_map([], Self::raw_record)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        rows.into_iter().map(Self::decode_record).collect()
    }

    fn load_first_appearances(conn: &Connection) -> Result<Vec<VersionId>> {
        let mut stmt = conn.prepare(
            "SELECT MIN(version_id) AS first FROM version_entries GROUP BY key ORDER BY first ASC",
        )?;
        let firsts = stmt
            .query_map([], |row| row.get::<_, i64>(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(firsts.into_iter().map(|v| v as VersionId).collect())
    }

    fn load_record(conn: &Connection, version: VersionId) -> Result<VersionRecord> {
        let raw = conn
            .query_row(
                r#"
                SELECT version_id, root, watermark, key_count, committed_at
                FROM versions
                WHERE version_id = ?1
                "#,
                [version as i64],
                Self::raw_record,
            )
            .optional()?
            .ok_or(StoreError::VersionNotFound(version))?;
        Self::decode_record(raw)
    }

    #[allow(clippy::type_complexity)]
    fn raw_record(
        row: &rusqlite::Row<'_>,
    ) -> rusqlite::Result<(i64, Vec<u8>, Option<i64>, i64, i64)> {
        Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?))
    }

    fn decode_record(raw: (i64, Vec<u8>, Option<i64>, i64, i64)) -> Result<VersionRecord> {
        let (version, root, watermark, key_count, committed_at) = raw;
        let root = Digest::from_slice(&root).map_err(|e| {
            StoreError::CorruptionDetected(format!("version {} root unreadable: {}", version, e))
        })?;
        Ok(VersionRecord {
            version: version as VersionId,
            root,
            watermark: watermark.map(|w| w as SequenceNumber),
            key_count: key_count as u64,
            committed_at: committed_at as u64,
        })
    }

    /// Rebuild the map as of `record` from the persisted diffs and check it.
    fn rebuild(conn: &Connection, record: &VersionRecord) -> Result<AuthenticatedMap> {
        let mut stmt = conn.prepare(
            r#"
            SELECT e.key, e.value
            FROM version_entries e
            WHERE e.version_id = (
                SELECT MAX(version_id) FROM version_entries
                WHERE key = e.key AND version_id <= ?1
            )
            "#,
        )?;

        let rows = stmt
            .query_map([record.version as i64], |row| {
                Ok((row.get::<_, Vec<u8>>(0)?, row.get::<_, Vec<u8>>(1)?))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let mut indices = HashSet::with_capacity(rows.len());
        let mut map = AuthenticatedMap::new();
        for (raw_key, raw_value) in rows {
            let key = Key::from_slice(&raw_key).map_err(|e| {
                StoreError::CorruptionDetected(format!("unreadable key: {}", e))
            })?;
            let value = ReputationValue::from_bytes(&raw_value).map_err(|e| {
                StoreError::CorruptionDetected(format!("unreadable value for {}: {}", key, e))
            })?;
            if value.index >= record.key_count || !indices.insert(value.index) {
                return Err(StoreError::CorruptionDetected(format!(
                    "insertion index {} of {} invalid at version {}",
                    value.index, key, record.version
                )));
            }
            map.put(key, value);
        }

        if map.len() != record.key_count {
            return Err(StoreError::CorruptionDetected(format!(
                "version {} expects {} keys, rebuilt {}",
                record.version,
                record.key_count,
                map.len()
            )));
        }

        if map.root_digest() != record.root {
            return Err(StoreError::CorruptionDetected(format!(
                "version {} root mismatch: stored {}, rebuilt {}",
                record.version,
                record.root,
                map.root_digest()
            )));
        }

        Ok(map)
    }

    fn ensure_healthy(&self) -> Result<()> {
        let health = self.health.read().map_err(|_| StoreError::LockPoisoned)?;
        match &*health {
            StoreHealth::Ok => Ok(()),
            StoreHealth::Corrupted { reason, .. } => {
                Err(StoreError::CorruptionDetected(reason.clone()))
            }
        }
    }

    fn mark_corrupted(&self, version: Option<VersionId>, reason: &str) {
        self.counters
            .corruption_detections
            .fetch_add(1, Ordering::Relaxed);
        error!(
            path = %self.path.display(),
            version = ?version,
            reason = %reason,
            "Store corruption detected; halting reads and writes"
        );
        if let Ok(mut health) = self.health.write() {
            *health = StoreHealth::Corrupted {
                version,
                reason: reason.to_string(),
            };
        }
    }

    /// Route a failed verification into the health state.
    fn check<T>(&self, version: Option<VersionId>, result: Result<T>) -> Result<T> {
        if let Err(StoreError::CorruptionDetected(reason)) = &result {
            self.mark_corrupted(version, reason);
        }
        result
    }

    fn head(&self) -> Result<Arc<Snapshot>> {
        let head = self.head.read().map_err(|_| StoreError::LockPoisoned)?;
        Ok(head.clone())
    }

    fn cache_insert(&self, snapshot: Arc<Snapshot>) -> Result<()> {
        let mut cache = self.cache.lock().map_err(|_| StoreError::LockPoisoned)?;
        cache.insert(snapshot.version(), snapshot);
        while cache.len() > self.cache_size {
            // Oldest versions are the least likely to be asked for again.
            cache.pop_first();
        }
        Ok(())
    }

    /// The head version
    pub fn latest(&self) -> Result<Arc<Snapshot>> {
        self.ensure_healthy()?;
        self.head()
    }

    /// Resolve a selector to an immutable snapshot, rebuilding it if needed
    pub fn snapshot(&self, selector: VersionSelector) -> Result<Arc<Snapshot>> {
        self.ensure_healthy()?;
        let head = self.head()?;

        let version = match selector {
            VersionSelector::Latest => return Ok(head),
            VersionSelector::At(v) if v == head.version() => return Ok(head),
            VersionSelector::At(v) if v > head.version() => {
                return Err(StoreError::VersionNotFound(v))
            }
            VersionSelector::At(v) => v,
        };

        {
            let cache = self.cache.lock().map_err(|_| StoreError::LockPoisoned)?;
            if let Some(snapshot) = cache.get(&version) {
                self.counters.cache_hits.fetch_add(1, Ordering::Relaxed);
                return Ok(snapshot.clone());
            }
        }

        let map = self.reconstruct(version)?;
        let record = self.version_record(version)?;
        let snapshot = Arc::new(Snapshot { record, map });
        self.cache_insert(snapshot.clone())?;
        Ok(snapshot)
    }

    /// Rebuild the exact trie as of `version` from persisted history
    pub fn reconstruct(&self, version: VersionId) -> Result<AuthenticatedMap> {
        self.ensure_healthy()?;
        let conn = self.conn.lock().map_err(|_| StoreError::LockPoisoned)?;
        let record = Self::load_record(&conn, version)?;
        let map = self.check(Some(version), Self::rebuild(&conn, &record))?;
        self.counters.reconstructions.fetch_add(1, Ordering::Relaxed);
        debug!(version, key_count = map.len(), "Reconstructed historical version");
        Ok(map)
    }

    /// Proof of `key` in the selected version
    pub fn prove(&self, selector: VersionSelector, key: &Key) -> Result<ReputationProof> {
        self.snapshot(selector)?.prove(key)
    }

    /// Root digest of a committed version
    pub fn root_at(&self, version: VersionId) -> Result<Digest> {
        Ok(self.version_record(version)?.root)
    }

    /// Metadata of a committed version
    pub fn version_record(&self, version: VersionId) -> Result<VersionRecord> {
        self.ensure_healthy()?;
        let head = self.head()?;
        if head.version() == version {
            return Ok(head.record().clone());
        }
        let conn = self.conn.lock().map_err(|_| StoreError::LockPoisoned)?;
        self.check(Some(version), Self::load_record(&conn, version))
    }

    /// Highest version whose root is `root`
    ///
    /// Versions that share a root hold identical contents, so any of them
    /// serves the same proofs.
    pub fn version_for_root(&self, root: &Digest) -> Result<Option<VersionId>> {
        self.ensure_healthy()?;
        let head = self.head()?;
        if head.root() == *root {
            return Ok(Some(head.version()));
        }
        let conn = self.conn.lock().map_err(|_| StoreError::LockPoisoned)?;
        let version: Option<i64> = conn.query_row(
            "SELECT MAX(version_id) FROM versions WHERE root = ?1",
            [root.as_bytes().to_vec()],
            |row| row.get(0),
        )?;
        Ok(version.map(|v| v as VersionId))
    }

    /// Start a working set on top of the head version
    pub fn stage(&self) -> Result<StagedVersion> {
        self.ensure_healthy()?;
        let base = self.head()?;
        Ok(StagedVersion {
            map: base.map().clone(),
            watermark: base.watermark(),
            changes: BTreeMap::new(),
            base,
        })
    }

    /// Durably commit a staged working set as the next version
    ///
    /// The version row and its diff are written in one transaction; the head
    /// pointer moves only after the transaction commits.
    pub fn commit(&self, staged: StagedVersion) -> Result<VersionId> {
        self.ensure_healthy()?;

        let previous = self.head()?;
        if staged.base.version() != previous.version() {
            warn!(
                base = staged.base.version(),
                head = previous.version(),
                "Rejecting commit of stale staged version"
            );
            return Err(StoreError::StaleBase {
                base: staged.base.version(),
                head: previous.version(),
            });
        }

        let record = VersionRecord {
            version: previous.version() + 1,
            root: staged.map.root_digest(),
            watermark: staged.watermark,
            key_count: staged.map.len(),
            committed_at: current_timestamp_ms(),
        };

        {
            let mut conn = self.conn.lock().map_err(|_| StoreError::LockPoisoned)?;
            let tx = conn.transaction()?;

            tx.execute(
                r#"
                INSERT INTO versions (version_id, root, watermark, key_count, committed_at)
                VALUES (?1, ?2, ?3, ?4, ?5)
                "#,
                params![
                    record.version as i64,
                    record.root.as_bytes().to_vec(),
                    record.watermark.map(|w| w as i64),
                    record.key_count as i64,
                    record.committed_at as i64,
                ],
            )?;

            {
                let mut insert = tx.prepare(
                    "INSERT INTO version_entries (version_id, key, value) VALUES (?1, ?2, ?3)",
                )?;
                for (key, value) in &staged.changes {
                    insert.execute(params![
                        record.version as i64,
                        key.as_bytes().to_vec(),
                        value.to_bytes().to_vec(),
                    ])?;
                }
            }

            tx.commit()?;
        }

        let version = record.version;
        let snapshot = Arc::new(Snapshot {
            record,
            map: staged.map,
        });

        {
            let mut head = self.head.write().map_err(|_| StoreError::LockPoisoned)?;
            *head = snapshot.clone();
        }
        self.cache_insert(previous)?;

        self.counters
            .versions_committed
            .fetch_add(1, Ordering::Relaxed);

        info!(
            version,
            root = %snapshot.root(),
            key_count = snapshot.key_count(),
            changed_keys = staged.changes.len(),
            watermark = ?snapshot.watermark(),
            "Committed new version"
        );

        Ok(version)
    }

    pub fn health(&self) -> StoreHealth {
        self.health
            .read()
            .map(|h| h.clone())
            .unwrap_or_else(|_| StoreHealth::Corrupted {
                version: None,
                reason: "health lock poisoned".to_string(),
            })
    }

    pub fn metrics(&self) -> StoreMetrics {
        StoreMetrics {
            versions_committed_total: self.counters.versions_committed.load(Ordering::Relaxed),
            reconstructions_total: self.counters.reconstructions.load(Ordering::Relaxed),
            snapshot_cache_hits_total: self.counters.cache_hits.load(Ordering::Relaxed),
            startup_checks_total: self.counters.startup_checks.load(Ordering::Relaxed),
            corruption_detections_total: self
                .counters
                .corruption_detections
                .load(Ordering::Relaxed),
        }
    }

    pub fn db_path(&self) -> &Path {
        &self.path
    }

    /// Drop cached historical snapshots so the next read rebuilds from disk.
    pub fn clear_snapshot_cache(&self) {
        if let Ok(mut cache) = self.cache.lock() {
            cache.clear();
        }
    }

    /// Execute raw SQL for testing purposes only
    ///
    /// **WARNING**: bypasses every integrity check. Only for tests that
    /// simulate corruption.
    #[doc(hidden)]
    pub fn __test_execute_raw_sql(
        &self,
        sql: &str,
        params: &[&dyn rusqlite::ToSql],
    ) -> Result<usize> {
        let conn = self.conn.lock().map_err(|_| StoreError::LockPoisoned)?;
        Ok(conn.execute(sql, params)?)
    }
}

fn current_timestamp_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
