use std::path::{Path, PathBuf};

use rusqlite::{Connection, OptionalExtension, Row, params};

use rapport_core::{BehaviorPhase, DriftRecord, Timestamp};

use crate::error::{Result, StoreError};
use crate::schema;

/// Summary counts for the `stats` command.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct StoreStats {
    pub agents: usize,
    pub records: u64,
    pub db_size_bytes: u64,
}

pub struct Store {
    conn: Connection,
    path: Option<PathBuf>,
}

impl Store {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        schema::initialize(&conn)?;
        Ok(Self {
            conn,
            path: Some(path.to_path_buf()),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        schema::initialize(&conn)?;
        Ok(Self { conn, path: None })
    }

    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    // --- Metadata ---

    pub fn get_metadata(&self, key: &str) -> Result<Option<String>> {
        let value = self
            .conn
            .query_row("SELECT value FROM metadata WHERE key = ?1", [key], |row| {
                row.get(0)
            })
            .optional()?;
        Ok(value)
    }

    pub fn set_metadata(&self, key: &str, value: &str) -> Result<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO metadata (key, value) VALUES (?1, ?2)",
            params![key, value],
        )?;
        Ok(())
    }

    // --- Drift records ---

    pub fn append_drift(&self, record: &DriftRecord) -> Result<()> {
        let ts = millis_to_sql(record.timestamp)?;
        let snapshot = serde_json::to_string(&record.snapshot)?;
        self.conn.execute(
            "INSERT INTO drift_records
                 (agent_id, timestamp_ms, drift_rate, stability, phase, snapshot_json)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                record.agent_id,
                ts,
                record.drift_rate,
                record.stability,
                record.phase.as_str(),
                snapshot,
            ],
        )?;
        Ok(())
    }

    /// Records for `agent_id`, oldest first. With `limit`, only the newest
    /// `limit` records are returned (still oldest first).
    pub fn drift_history(&self, agent_id: &str, limit: Option<usize>) -> Result<Vec<DriftRecord>> {
        let limit = limit.map_or(-1, |n| i64::try_from(n).unwrap_or(i64::MAX));
        let mut stmt = self.conn.prepare(
            "SELECT agent_id, timestamp_ms, drift_rate, stability, phase, snapshot_json
             FROM (
                 SELECT * FROM drift_records
                 WHERE agent_id = ?1
                 ORDER BY timestamp_ms DESC, id DESC
                 LIMIT ?2
             )
             ORDER BY timestamp_ms ASC, id ASC",
        )?;
        let rows: Vec<RawRecord> = stmt
            .query_map(params![agent_id, limit], RawRecord::from_row)?
            .collect::<std::result::Result<_, _>>()?;
        rows.into_iter().map(RawRecord::into_record).collect()
    }

    /// Distinct agent ids with at least one record, sorted.
    pub fn agents(&self) -> Result<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT DISTINCT agent_id FROM drift_records ORDER BY agent_id")?;
        let agents = stmt
            .query_map([], |row| row.get(0))?
            .collect::<std::result::Result<_, _>>()?;
        Ok(agents)
    }

    pub fn record_count(&self) -> Result<u64> {
        let n: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM drift_records", [], |row| row.get(0))?;
        Ok(n.max(0) as u64)
    }

    /// Keep only the newest `keep` records for `agent_id`. Returns the number deleted.
    pub fn prune_agent(&self, agent_id: &str, keep: usize) -> Result<usize> {
        let keep = i64::try_from(keep).unwrap_or(i64::MAX);
        let deleted = self.conn.execute(
            "DELETE FROM drift_records
             WHERE agent_id = ?1
               AND id NOT IN (
                   SELECT id FROM drift_records
                   WHERE agent_id = ?1
                   ORDER BY timestamp_ms DESC, id DESC
                   LIMIT ?2
               )",
            params![agent_id, keep],
        )?;
        if deleted > 0 {
            tracing::info!(agent = agent_id, deleted, "pruned drift history");
        }
        Ok(deleted)
    }

    /// Size of the database in bytes (page_count × page_size).
    pub fn db_size(&self) -> u64 {
        let pages: i64 = self
            .conn
            .query_row("PRAGMA page_count", [], |row| row.get(0))
            .unwrap_or(0);
        let page_size: i64 = self
            .conn
            .query_row("PRAGMA page_size", [], |row| row.get(0))
            .unwrap_or(0);
        (pages.max(0) as u64) * (page_size.max(0) as u64)
    }

    pub fn stats(&self) -> Result<StoreStats> {
        Ok(StoreStats {
            agents: self.agents()?.len(),
            records: self.record_count()?,
            db_size_bytes: self.db_size(),
        })
    }
}

struct RawRecord {
    agent_id: String,
    timestamp_ms: i64,
    drift_rate: f64,
    stability: f64,
    phase: String,
    snapshot_json: String,
}

impl RawRecord {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            agent_id: row.get(0)?,
            timestamp_ms: row.get(1)?,
            drift_rate: row.get(2)?,
            stability: row.get(3)?,
            phase: row.get(4)?,
            snapshot_json: row.get(5)?,
        })
    }

    fn into_record(self) -> Result<DriftRecord> {
        let timestamp = u64::try_from(self.timestamp_ms).map_err(|_| {
            StoreError::InvalidData(format!("negative timestamp {}", self.timestamp_ms))
        })?;
        let phase: BehaviorPhase = self.phase.parse().map_err(StoreError::InvalidData)?;
        let snapshot: Vec<f64> = serde_json::from_str(&self.snapshot_json)?;
        Ok(DriftRecord {
            agent_id: self.agent_id,
            timestamp: Timestamp(timestamp),
            drift_rate: self.drift_rate,
            stability: self.stability,
            phase,
            snapshot,
        })
    }
}

fn millis_to_sql(ts: Timestamp) -> Result<i64> {
    i64::try_from(ts.as_millis())
        .map_err(|_| StoreError::InvalidData(format!("timestamp {} out of range", ts.as_millis())))
}
