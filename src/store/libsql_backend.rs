//! libSQL backend — async `Store` implementation over a local database
//! file (or in-memory for tests).

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::{Connection, Database as LibSqlDatabase, params};
use tracing::{debug, info};

use crate::error::DatabaseError;
use crate::pipeline::types::ApplicationType;
use crate::stage::Stage;
use crate::store::traits::{ApplicationRecord, RunSummary, SkipEntry, Store};

/// libSQL store backend.
///
/// Holds a single connection reused for all operations.
/// `libsql::Connection` is `Send + Sync` and safe for concurrent async use.
pub struct LibSqlStore {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlStore {
    /// Open (or create) a local database file and initialize the schema.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Connection(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path).build().await.map_err(|e| {
            DatabaseError::Connection(format!("Failed to open libSQL database: {e}"))
        })?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Connection(format!("Failed to create connection: {e}")))?;

        let store = Self {
            db: Arc::new(db),
            conn,
        };
        store.init_schema().await?;
        info!(path = %path.display(), "Database opened");
        Ok(store)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Connection(format!("Failed to create in-memory database: {e}"))
            })?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Connection(format!("Failed to create connection: {e}")))?;

        let store = Self {
            db: Arc::new(db),
            conn,
        };
        store.init_schema().await?;
        Ok(store)
    }

    fn conn(&self) -> &Connection {
        &self.conn
    }

    async fn init_schema(&self) -> Result<(), DatabaseError> {
        self.conn()
            .execute_batch(SCHEMA)
            .await
            .map_err(|e| DatabaseError::Query(format!("init_schema: {e}")))?;
        debug!("Schema initialized");
        Ok(())
    }
}

const SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS applications (
        id TEXT PRIMARY KEY,
        company_key TEXT NOT NULL,
        role_key TEXT NOT NULL,
        display_company TEXT NOT NULL,
        display_role TEXT NOT NULL,
        stage TEXT NOT NULL,
        app_type TEXT NOT NULL,
        date_first_applied TEXT NOT NULL,
        last_updated TEXT NOT NULL,
        notes TEXT NOT NULL DEFAULT '',
        created_at TEXT NOT NULL,
        UNIQUE(company_key, role_key)
    );
    CREATE INDEX IF NOT EXISTS idx_applications_keys
        ON applications(company_key, role_key);
    CREATE INDEX IF NOT EXISTS idx_applications_last_updated
        ON applications(last_updated);

    CREATE TABLE IF NOT EXISTS application_events (
        message_id TEXT PRIMARY KEY,
        application_id TEXT NOT NULL REFERENCES applications(id),
        received_at TEXT NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_events_application
        ON application_events(application_id);

    CREATE TABLE IF NOT EXISTS skips (
        message_id TEXT PRIMARY KEY,
        reason TEXT NOT NULL,
        detail TEXT,
        permanent INTEGER NOT NULL DEFAULT 0,
        created_at TEXT NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_skips_permanent ON skips(permanent);

    CREATE TABLE IF NOT EXISTS classifier_usage (
        date_utc TEXT PRIMARY KEY,
        call_count INTEGER NOT NULL DEFAULT 0
    );

    CREATE TABLE IF NOT EXISTS runs (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        started_at TEXT NOT NULL,
        scanned INTEGER NOT NULL,
        new_records INTEGER NOT NULL,
        updated_records INTEGER NOT NULL,
        skipped INTEGER NOT NULL,
        skip_reasons TEXT NOT NULL DEFAULT '{}'
    );
"#;

// ── Helper functions ────────────────────────────────────────────────

/// Parse an RFC 3339 or SQLite datetime string into DateTime<Utc>.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return dt.with_timezone(&Utc);
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return ndt.and_utc();
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return ndt.and_utc();
    }
    DateTime::<Utc>::MIN_UTC
}

/// Parse a stage string from the DB, tolerating unknown values.
fn str_to_stage(s: &str) -> Stage {
    s.parse().unwrap_or(Stage::Applied)
}

/// Convert `Option<&str>` to libsql Value.
fn opt_text(s: Option<&str>) -> libsql::Value {
    match s {
        Some(s) => libsql::Value::Text(s.to_string()),
        None => libsql::Value::Null,
    }
}

/// Map a libsql Row to an ApplicationRecord (event ids attached later).
///
/// Column order matches APPLICATION_COLUMNS.
fn row_to_application(row: &libsql::Row) -> Result<ApplicationRecord, libsql::Error> {
    let stage_str: String = row.get(5)?;
    let type_str: String = row.get(6)?;
    let first_str: String = row.get(7)?;
    let updated_str: String = row.get(8)?;

    Ok(ApplicationRecord {
        id: row.get(0)?,
        company_key: row.get(1)?,
        role_key: row.get(2)?,
        display_company: row.get(3)?,
        display_role: row.get(4)?,
        stage: str_to_stage(&stage_str),
        application_type: ApplicationType::from_label(&type_str),
        date_first_applied: parse_datetime(&first_str),
        last_updated: parse_datetime(&updated_str),
        notes: row.get(9)?,
        event_ids: Vec::new(),
    })
}

fn row_to_run(row: &libsql::Row) -> Result<RunSummary, libsql::Error> {
    let started_str: String = row.get(0)?;
    let reasons_str: String = row.get(5)?;
    Ok(RunSummary {
        started_at: parse_datetime(&started_str),
        scanned: row.get::<i64>(1)? as u64,
        new_records: row.get::<i64>(2)? as u64,
        updated_records: row.get::<i64>(3)? as u64,
        skipped: row.get::<i64>(4)? as u64,
        skip_reasons: serde_json::from_str(&reasons_str).unwrap_or_default(),
    })
}

async fn collect_ids(
    conn: &Connection,
    sql: &str,
    context: &str,
) -> Result<HashSet<String>, DatabaseError> {
    let mut rows = conn
        .query(sql, ())
        .await
        .map_err(|e| DatabaseError::Query(format!("{context}: {e}")))?;
    let mut ids = HashSet::new();
    while let Some(row) = rows
        .next()
        .await
        .map_err(|e| DatabaseError::Query(format!("{context}: {e}")))?
    {
        let id: String = row
            .get(0)
            .map_err(|e| DatabaseError::Query(format!("{context} row parse: {e}")))?;
        ids.insert(id);
    }
    Ok(ids)
}

// ── Trait implementation ────────────────────────────────────────────

const APPLICATION_COLUMNS: &str = "id, company_key, role_key, display_company, display_role, stage, app_type, date_first_applied, last_updated, notes";

#[async_trait]
impl Store for LibSqlStore {
    async fn insert_application(&self, record: &ApplicationRecord) -> Result<(), DatabaseError> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO applications (id, company_key, role_key, display_company, display_role, stage, app_type, date_first_applied, last_updated, notes, created_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                record.id.clone(),
                record.company_key.clone(),
                record.role_key.clone(),
                record.display_company.clone(),
                record.display_role.clone(),
                record.stage.label(),
                record.application_type.label(),
                record.date_first_applied.to_rfc3339(),
                record.last_updated.to_rfc3339(),
                record.notes.clone(),
                Utc::now().to_rfc3339(),
            ],
        )
        .await
        .map_err(|e| DatabaseError::Query(format!("insert_application: {e}")))?;

        for message_id in &record.event_ids {
            self.append_event(&record.id, message_id, record.date_first_applied)
                .await?;
        }

        debug!(
            record_id = %record.id,
            company = %record.display_company,
            role = %record.display_role,
            "Application inserted"
        );
        Ok(())
    }

    async fn update_application(
        &self,
        id: &str,
        stage: Stage,
        notes: &str,
        last_updated: DateTime<Utc>,
    ) -> Result<(), DatabaseError> {
        let conn = self.conn();
        let affected = conn
            .execute(
                "UPDATE applications SET stage = ?1, notes = ?2, last_updated = ?3 WHERE id = ?4",
                params![stage.label(), notes, last_updated.to_rfc3339(), id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("update_application: {e}")))?;

        if affected == 0 {
            return Err(DatabaseError::NotFound {
                entity: "application".into(),
                id: id.to_string(),
            });
        }
        debug!(record_id = %id, stage = %stage, "Application updated");
        Ok(())
    }

    async fn all_applications(&self) -> Result<Vec<ApplicationRecord>, DatabaseError> {
        let conn = self.conn();
        let mut rows = conn
            .query(
                &format!(
                    "SELECT {APPLICATION_COLUMNS} FROM applications ORDER BY last_updated DESC"
                ),
                (),
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("all_applications: {e}")))?;

        let mut records = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("all_applications: {e}")))?
        {
            let record = row_to_application(&row)
                .map_err(|e| DatabaseError::Query(format!("all_applications row parse: {e}")))?;
            records.push(record);
        }

        // Attach contributing event ids in one pass.
        let mut by_app: HashMap<String, Vec<String>> = HashMap::new();
        let mut rows = conn
            .query(
                "SELECT application_id, message_id FROM application_events ORDER BY received_at ASC",
                (),
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("all_applications events: {e}")))?;
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("all_applications events: {e}")))?
        {
            let app_id: String = row
                .get(0)
                .map_err(|e| DatabaseError::Query(format!("event row parse: {e}")))?;
            let message_id: String = row
                .get(1)
                .map_err(|e| DatabaseError::Query(format!("event row parse: {e}")))?;
            by_app.entry(app_id).or_default().push(message_id);
        }
        for record in &mut records {
            if let Some(ids) = by_app.remove(&record.id) {
                record.event_ids = ids;
            }
        }

        Ok(records)
    }

    async fn get_application(&self, id: &str) -> Result<Option<ApplicationRecord>, DatabaseError> {
        let conn = self.conn();
        let mut rows = conn
            .query(
                &format!("SELECT {APPLICATION_COLUMNS} FROM applications WHERE id = ?1"),
                params![id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_application: {e}")))?;

        let row = match rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("get_application: {e}")))?
        {
            Some(row) => row,
            None => return Ok(None),
        };
        let mut record = row_to_application(&row)
            .map_err(|e| DatabaseError::Query(format!("get_application row parse: {e}")))?;

        let mut rows = conn
            .query(
                "SELECT message_id FROM application_events WHERE application_id = ?1 ORDER BY received_at ASC",
                params![id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_application events: {e}")))?;
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("get_application events: {e}")))?
        {
            let message_id: String = row
                .get(0)
                .map_err(|e| DatabaseError::Query(format!("event row parse: {e}")))?;
            record.event_ids.push(message_id);
        }

        Ok(Some(record))
    }

    async fn append_event(
        &self,
        application_id: &str,
        message_id: &str,
        received_at: DateTime<Utc>,
    ) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "INSERT OR IGNORE INTO application_events (message_id, application_id, received_at) VALUES (?1, ?2, ?3)",
                params![message_id, application_id, received_at.to_rfc3339()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("append_event: {e}")))?;
        Ok(())
    }

    async fn merged_event_ids(&self) -> Result<HashSet<String>, DatabaseError> {
        collect_ids(
            self.conn(),
            "SELECT message_id FROM application_events",
            "merged_event_ids",
        )
        .await
    }

    async fn record_skip(&self, entry: &SkipEntry) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "INSERT INTO skips (message_id, reason, detail, permanent, created_at) VALUES (?1, ?2, ?3, ?4, ?5) ON CONFLICT(message_id) DO UPDATE SET reason = excluded.reason, detail = excluded.detail, permanent = excluded.permanent, created_at = excluded.created_at",
                params![
                    entry.message_id.clone(),
                    entry.reason.clone(),
                    opt_text(entry.detail.as_deref()),
                    entry.permanent as i64,
                    entry.created_at.to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("record_skip: {e}")))?;
        debug!(
            message_id = %entry.message_id,
            reason = %entry.reason,
            permanent = entry.permanent,
            "Skip recorded"
        );
        Ok(())
    }

    async fn permanent_skip_ids(&self) -> Result<HashSet<String>, DatabaseError> {
        collect_ids(
            self.conn(),
            "SELECT message_id FROM skips WHERE permanent = 1",
            "permanent_skip_ids",
        )
        .await
    }

    async fn retry_skip_ids(&self) -> Result<HashSet<String>, DatabaseError> {
        collect_ids(
            self.conn(),
            "SELECT message_id FROM skips WHERE permanent = 0",
            "retry_skip_ids",
        )
        .await
    }

    async fn classifier_calls_today(&self) -> Result<u32, DatabaseError> {
        let today = Utc::now().format("%Y-%m-%d").to_string();
        let mut rows = self
            .conn()
            .query(
                "SELECT call_count FROM classifier_usage WHERE date_utc = ?1",
                params![today],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("classifier_calls_today: {e}")))?;

        match rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("classifier_calls_today: {e}")))?
        {
            Some(row) => {
                let count: i64 = row.get(0).map_err(|e| {
                    DatabaseError::Query(format!("classifier_calls_today row parse: {e}"))
                })?;
                Ok(count as u32)
            }
            None => Ok(0),
        }
    }

    async fn increment_classifier_calls(&self) -> Result<u32, DatabaseError> {
        let today = Utc::now().format("%Y-%m-%d").to_string();
        self.conn()
            .execute(
                "INSERT INTO classifier_usage (date_utc, call_count) VALUES (?1, 1) ON CONFLICT(date_utc) DO UPDATE SET call_count = call_count + 1",
                params![today],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("increment_classifier_calls: {e}")))?;
        self.classifier_calls_today().await
    }

    async fn append_run(&self, summary: &RunSummary) -> Result<(), DatabaseError> {
        let reasons = serde_json::to_string(&summary.skip_reasons)
            .map_err(|e| DatabaseError::Serialization(e.to_string()))?;
        self.conn()
            .execute(
                "INSERT INTO runs (started_at, scanned, new_records, updated_records, skipped, skip_reasons) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    summary.started_at.to_rfc3339(),
                    summary.scanned as i64,
                    summary.new_records as i64,
                    summary.updated_records as i64,
                    summary.skipped as i64,
                    reasons,
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("append_run: {e}")))?;
        Ok(())
    }

    async fn recent_runs(&self, limit: usize) -> Result<Vec<RunSummary>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT started_at, scanned, new_records, updated_records, skipped, skip_reasons FROM runs ORDER BY id DESC LIMIT ?1",
                params![limit as i64],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("recent_runs: {e}")))?;

        let mut runs = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("recent_runs: {e}")))?
        {
            let run = row_to_run(&row)
                .map_err(|e| DatabaseError::Query(format!("recent_runs row parse: {e}")))?;
            runs.push(run);
        }
        Ok(runs)
    }
}
