//! SQLite-backed identity registry and attendance ledger.
//!
//! Identities are returned in enrollment order (`seq`), which the registry's
//! tie-break depends on. Re-enrolling an id updates the row in place and
//! keeps its `seq`.

use crate::codec::{self, CodecError};
use chrono::{NaiveDate, Utc};
use rollcall_core::{
    AttendanceReport, AttendanceStatus, Embedding, Identity, IdentityRegistry, RegistryError,
};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use thiserror::Error;

const DATE_FORMAT: &str = "%Y-%m-%d";

const SCHEMA_SQL: &str = "
CREATE TABLE IF NOT EXISTS identities (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    identity_id TEXT NOT NULL UNIQUE,
    name TEXT NOT NULL,
    dimension INTEGER NOT NULL,
    embedding BLOB NOT NULL,
    model_version TEXT,
    enrolled_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS attendance (
    class_id TEXT NOT NULL,
    identity_id TEXT NOT NULL,
    date TEXT NOT NULL,
    duration_seconds REAL NOT NULL,
    status TEXT NOT NULL,
    PRIMARY KEY (class_id, identity_id, date)
);
";

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error("corrupt embedding for identity {identity_id}: {reason}")]
    CorruptEmbedding { identity_id: String, reason: String },
    #[error("corrupt attendance row for {identity_id}: {reason}")]
    CorruptRecord { identity_id: String, reason: String },
}

/// A persisted attendance verdict.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredAttendance {
    pub class_id: String,
    pub identity_id: String,
    /// Display name, if the identity is still enrolled.
    pub name: Option<String>,
    pub date: NaiveDate,
    pub duration_seconds: f64,
    pub status: AttendanceStatus,
}

/// Persistence handle. The connection closes when the store is dropped.
pub struct AttendanceStore {
    conn: Connection,
}

impl AttendanceStore {
    /// Open or create a database file with full schema.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA busy_timeout = 5000;",
        )?;
        tracing::debug!(path = %path.display(), "opened attendance store");
        Self::with_schema(conn)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::with_schema(Connection::open_in_memory()?)
    }

    fn with_schema(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(SCHEMA_SQL)?;
        Ok(Self { conn })
    }

    // ── Identities ───────────────────────────────────────────────────

    /// Insert or replace an identity. Last write wins for name and embedding;
    /// enrollment position and `enrolled_at` keep their first values.
    pub fn enroll_identity(
        &self,
        identity_id: &str,
        name: &str,
        embedding: &Embedding,
    ) -> Result<(), StoreError> {
        if embedding.values.is_empty() || !embedding.is_finite() {
            return Err(RegistryError::InvalidEmbedding {
                identity_id: identity_id.to_string(),
                reason: "embedding must be non-empty and finite",
            }
            .into());
        }
        self.conn.execute(
            "INSERT INTO identities
                 (identity_id, name, dimension, embedding, model_version, enrolled_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(identity_id) DO UPDATE SET
                 name = excluded.name,
                 dimension = excluded.dimension,
                 embedding = excluded.embedding,
                 model_version = excluded.model_version",
            params![
                identity_id,
                name,
                embedding.dimension() as i64,
                codec::encode(embedding),
                embedding.model_version,
                Utc::now().to_rfc3339(),
            ],
        )?;
        tracing::info!(
            identity = identity_id,
            dimension = embedding.dimension(),
            "identity enrolled"
        );
        Ok(())
    }

    /// All identities in enrollment order.
    pub fn load_all_identities(&self) -> Result<Vec<Identity>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT identity_id, name, dimension, embedding, model_version
             FROM identities ORDER BY seq",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, i64>(2)?,
                row.get::<_, Vec<u8>>(3)?,
                row.get::<_, Option<String>>(4)?,
            ))
        })?;

        let mut identities = Vec::new();
        for row in rows {
            let (identity_id, name, dimension, blob, model_version) = row?;
            let values = codec::decode(&blob).map_err(|e: CodecError| StoreError::CorruptEmbedding {
                identity_id: identity_id.clone(),
                reason: e.to_string(),
            })?;
            if values.len() as i64 != dimension {
                return Err(StoreError::CorruptEmbedding {
                    identity_id,
                    reason: format!("column says {dimension} values, blob holds {}", values.len()),
                });
            }
            identities.push(Identity {
                identity_id,
                display_name: name,
                embedding: Embedding {
                    values,
                    model_version,
                },
            });
        }
        Ok(identities)
    }

    /// Load every identity into a registry of the given width. An identity of
    /// another width fails the load with its id in the error.
    pub fn load_registry(&self, dimension: usize) -> Result<IdentityRegistry, StoreError> {
        let identities = self.load_all_identities()?;
        tracing::debug!(count = identities.len(), dimension, "loading registry");
        Ok(IdentityRegistry::from_identities(dimension, identities)?)
    }

    pub fn get_identity_name(&self, identity_id: &str) -> Result<Option<String>, StoreError> {
        Ok(self
            .conn
            .query_row(
                "SELECT name FROM identities WHERE identity_id = ?1",
                params![identity_id],
                |row| row.get(0),
            )
            .optional()?)
    }

    /// Returns whether a row was removed. Attendance history is kept.
    pub fn remove_identity(&self, identity_id: &str) -> Result<bool, StoreError> {
        let removed = self
            .conn
            .execute("DELETE FROM identities WHERE identity_id = ?1", params![identity_id])?;
        Ok(removed > 0)
    }

    pub fn identity_count(&self) -> Result<usize, StoreError> {
        let n: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM identities", [], |row| row.get(0))?;
        Ok(n as usize)
    }

    // ── Attendance ───────────────────────────────────────────────────

    /// Idempotent upsert keyed by (class_id, identity_id, date).
    pub fn save_attendance_record(
        &self,
        class_id: &str,
        identity_id: &str,
        date: NaiveDate,
        duration_seconds: f64,
        status: AttendanceStatus,
    ) -> Result<(), StoreError> {
        upsert_attendance(&self.conn, class_id, identity_id, date, duration_seconds, status)
    }

    /// Persist every record of a completed report in one transaction.
    pub fn save_report(
        &mut self,
        report: &AttendanceReport,
        date: NaiveDate,
    ) -> Result<usize, StoreError> {
        let tx = self.conn.transaction()?;
        for record in &report.records {
            upsert_attendance(
                &tx,
                &record.class_id,
                &record.identity_id,
                date,
                record.estimated_duration_seconds,
                record.status,
            )?;
        }
        tx.commit()?;
        tracing::info!(
            class = %report.class_id,
            %date,
            records = report.records.len(),
            "attendance saved"
        );
        Ok(report.records.len())
    }

    /// Records for one class on one date, in identity enrollment order
    /// (identities since removed come last).
    pub fn attendance_for(
        &self,
        class_id: &str,
        date: NaiveDate,
    ) -> Result<Vec<StoredAttendance>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT a.class_id, a.identity_id, i.name, a.date, a.duration_seconds, a.status
             FROM attendance a LEFT JOIN identities i ON i.identity_id = a.identity_id
             WHERE a.class_id = ?1 AND a.date = ?2
             ORDER BY i.seq IS NULL, i.seq, a.identity_id",
        )?;
        let day = date.format(DATE_FORMAT).to_string();
        let rows = stmt.query_map(params![class_id, day], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, Option<String>>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, f64>(4)?,
                row.get::<_, String>(5)?,
            ))
        })?;

        let mut out = Vec::new();
        for row in rows {
            let (class_id, identity_id, name, date, duration_seconds, status) = row?;
            let date = NaiveDate::parse_from_str(&date, DATE_FORMAT).map_err(|e| {
                StoreError::CorruptRecord {
                    identity_id: identity_id.clone(),
                    reason: format!("date {date:?}: {e}"),
                }
            })?;
            let status = AttendanceStatus::parse(&status).ok_or_else(|| StoreError::CorruptRecord {
                identity_id: identity_id.clone(),
                reason: format!("status {status:?}"),
            })?;
            out.push(StoredAttendance {
                class_id,
                identity_id,
                name,
                date,
                duration_seconds,
                status,
            });
        }
        Ok(out)
    }
}

fn upsert_attendance(
    conn: &Connection,
    class_id: &str,
    identity_id: &str,
    date: NaiveDate,
    duration_seconds: f64,
    status: AttendanceStatus,
) -> Result<(), StoreError> {
    conn.execute(
        "INSERT INTO attendance (class_id, identity_id, date, duration_seconds, status)
         VALUES (?1, ?2, ?3, ?4, ?5)
         ON CONFLICT(class_id, identity_id, date) DO UPDATE SET
             duration_seconds = excluded.duration_seconds,
             status = excluded.status",
        params![
            class_id,
            identity_id,
            date.format(DATE_FORMAT).to_string(),
            duration_seconds,
            status.as_str(),
        ],
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rollcall_core::AttendanceRecord;
    use std::path::PathBuf;

    fn temp_db_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("rollcall_test");
        std::fs::create_dir_all(&dir).unwrap();
        dir.join(format!("test_{}_{name}.sqlite", std::process::id()))
    }

    fn emb(values: &[f32]) -> Embedding {
        Embedding::new(values.to_vec())
    }

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, 14).unwrap()
    }

    fn enrolled_at(store: &AttendanceStore, id: &str) -> String {
        store
            .conn
            .query_row(
                "SELECT enrolled_at FROM identities WHERE identity_id = ?1",
                params![id],
                |row| row.get(0),
            )
            .unwrap()
    }

    #[test]
    fn test_reenroll_keeps_enrolled_at() {
        let store = AttendanceStore::open_in_memory().unwrap();
        store.enroll_identity("s1", "Ada", &emb(&[1.0, 0.0])).unwrap();
        // Back-date the first enrollment so a rewrite would be visible.
        store
            .conn
            .execute(
                "UPDATE identities SET enrolled_at = '2020-01-01T00:00:00+00:00'",
                [],
            )
            .unwrap();

        store.enroll_identity("s1", "Ada L.", &emb(&[0.0, 1.0])).unwrap();
        assert_eq!(enrolled_at(&store, "s1"), "2020-01-01T00:00:00+00:00");
        assert_eq!(store.get_identity_name("s1").unwrap().as_deref(), Some("Ada L."));
    }

    #[test]
    fn test_enroll_and_load_in_order() {
        let store = AttendanceStore::open_in_memory().unwrap();
        store.enroll_identity("s2", "Bo", &emb(&[0.0, 1.0])).unwrap();
        store.enroll_identity("s1", "Ada", &emb(&[1.0, 0.0])).unwrap();

        let ids: Vec<_> = store
            .load_all_identities()
            .unwrap()
            .into_iter()
            .map(|i| i.identity_id)
            .collect();
        assert_eq!(ids, ["s2", "s1"]);
        assert_eq!(store.identity_count().unwrap(), 2);
    }

    #[test]
    fn test_reenroll_replaces_and_keeps_position() {
        let store = AttendanceStore::open_in_memory().unwrap();
        store.enroll_identity("s1", "Ada", &emb(&[1.0, 0.0])).unwrap();
        store.enroll_identity("s2", "Bo", &emb(&[0.0, 1.0])).unwrap();
        store.enroll_identity("s1", "Ada L.", &emb(&[0.6, 0.8])).unwrap();

        let all = store.load_all_identities().unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].identity_id, "s1");
        assert_eq!(all[0].display_name, "Ada L.");
        assert_eq!(all[0].embedding.values, vec![0.6, 0.8]);
    }

    #[test]
    fn test_enroll_rejects_non_finite() {
        let store = AttendanceStore::open_in_memory().unwrap();
        let err = store.enroll_identity("s1", "Ada", &emb(&[f32::NAN])).unwrap_err();
        assert!(matches!(err, StoreError::Registry(RegistryError::InvalidEmbedding { .. })));
        assert_eq!(store.identity_count().unwrap(), 0);
    }

    #[test]
    fn test_model_version_persisted() {
        let store = AttendanceStore::open_in_memory().unwrap();
        let mut e = emb(&[1.0, 0.0]);
        e.model_version = Some("w600k_r50".into());
        store.enroll_identity("s1", "Ada", &e).unwrap();
        let loaded = store.load_all_identities().unwrap();
        assert_eq!(loaded[0].embedding, e);
    }

    #[test]
    fn test_load_registry_dimension_mismatch_names_identity() {
        let store = AttendanceStore::open_in_memory().unwrap();
        store.enroll_identity("s1", "Ada", &emb(&[1.0, 0.0])).unwrap();
        store.enroll_identity("s2", "Bo", &emb(&[1.0, 0.0, 0.0])).unwrap();
        let err = store.load_registry(2).unwrap_err();
        assert!(matches!(
            err,
            StoreError::Registry(RegistryError::DimensionMismatch {
                identity_id: Some(ref id),
                ..
            }) if id == "s2"
        ));
    }

    #[test]
    fn test_corrupt_blob_detected() {
        let store = AttendanceStore::open_in_memory().unwrap();
        store.enroll_identity("s1", "Ada", &emb(&[1.0, 0.0])).unwrap();
        store
            .conn
            .execute(
                "UPDATE identities SET embedding = x'0300000000000000' WHERE identity_id = 's1'",
                [],
            )
            .unwrap();
        let err = store.load_all_identities().unwrap_err();
        assert!(matches!(
            err,
            StoreError::CorruptEmbedding { ref identity_id, .. } if identity_id == "s1"
        ));
    }

    #[test]
    fn test_dimension_column_cross_checked() {
        let store = AttendanceStore::open_in_memory().unwrap();
        store.enroll_identity("s1", "Ada", &emb(&[1.0, 0.0])).unwrap();
        store
            .conn
            .execute("UPDATE identities SET dimension = 3", [])
            .unwrap();
        assert!(matches!(
            store.load_all_identities(),
            Err(StoreError::CorruptEmbedding { .. })
        ));
    }

    #[test]
    fn test_remove_identity() {
        let store = AttendanceStore::open_in_memory().unwrap();
        store.enroll_identity("s1", "Ada", &emb(&[1.0, 0.0])).unwrap();
        assert!(store.remove_identity("s1").unwrap());
        assert!(!store.remove_identity("s1").unwrap());
        assert_eq!(store.get_identity_name("s1").unwrap(), None);
    }

    #[test]
    fn test_attendance_upsert_is_idempotent() {
        let store = AttendanceStore::open_in_memory().unwrap();
        store.enroll_identity("s1", "Ada", &emb(&[1.0, 0.0])).unwrap();
        store
            .save_attendance_record("cs101", "s1", day(), 12.0, AttendanceStatus::Absent)
            .unwrap();
        store
            .save_attendance_record("cs101", "s1", day(), 40.0, AttendanceStatus::Present)
            .unwrap();

        let rows = store.attendance_for("cs101", day()).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].name.as_deref(), Some("Ada"));
        assert_eq!(rows[0].duration_seconds, 40.0);
        assert_eq!(rows[0].status, AttendanceStatus::Present);
        assert_eq!(rows[0].date, day());

        let other_day = day().succ_opt().unwrap();
        assert!(store.attendance_for("cs101", other_day).unwrap().is_empty());
    }

    #[test]
    fn test_save_report() {
        let mut store = AttendanceStore::open_in_memory().unwrap();
        store.enroll_identity("s1", "Ada", &emb(&[1.0, 0.0])).unwrap();
        store.enroll_identity("s2", "Bo", &emb(&[0.0, 1.0])).unwrap();

        let rec = |id: &str, name: &str, secs: f64, status| AttendanceRecord {
            class_id: "cs101".into(),
            identity_id: id.into(),
            display_name: name.into(),
            match_count: 0,
            estimated_duration_seconds: secs,
            status,
        };
        let report = AttendanceReport {
            class_id: "cs101".into(),
            frame_count: 100,
            fps: 10.0,
            step: 2,
            step_seconds: 0.2,
            frames_sampled: 50,
            frames_processed: 50,
            frames_skipped: 0,
            required_count: 40,
            records: vec![
                rec("s1", "Ada", 8.0, AttendanceStatus::Present),
                rec("s2", "Bo", 0.0, AttendanceStatus::Absent),
            ],
        };

        assert_eq!(store.save_report(&report, day()).unwrap(), 2);
        let rows = store.attendance_for("cs101", day()).unwrap();
        let ids: Vec<_> = rows.iter().map(|r| r.identity_id.as_str()).collect();
        assert_eq!(ids, ["s1", "s2"]);
        assert_eq!(rows[1].status, AttendanceStatus::Absent);
    }

    #[test]
    fn test_removed_identity_history_kept() {
        let store = AttendanceStore::open_in_memory().unwrap();
        store.enroll_identity("s1", "Ada", &emb(&[1.0, 0.0])).unwrap();
        store
            .save_attendance_record("cs101", "s1", day(), 8.0, AttendanceStatus::Present)
            .unwrap();
        store.remove_identity("s1").unwrap();
        let rows = store.attendance_for("cs101", day()).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].name, None);
    }

    #[test]
    fn test_file_store_persists_across_open() {
        let path = temp_db_path("persist");
        let _ = std::fs::remove_file(&path);
        {
            let store = AttendanceStore::open(&path).unwrap();
            store.enroll_identity("s1", "Ada", &emb(&[1.0, 0.0])).unwrap();
        }
        let store = AttendanceStore::open(&path).unwrap();
        let reg = store.load_registry(2).unwrap();
        assert_eq!(reg.get("s1").unwrap().display_name, "Ada");
        drop(store);
        std::fs::remove_file(&path).ok();
    }
}
