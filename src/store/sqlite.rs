// src/store/sqlite.rs
//! Embedded SQLite warehouse with versioned migrations.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use once_cell::sync::OnceCell;
use regex::Regex;
use rusqlite::types::{ToSql, ToSqlOutput, Value as SqlValue, ValueRef};
use rusqlite::{params_from_iter, Connection};
use serde_json::Value;
use tracing::{debug, info};

use super::{LoadBatch, Table, Warehouse};
use crate::error::SyncError;
use crate::model::{ContactId, Record, Scalar};
use crate::transform::Frame;

/// Current schema version. Increment when adding new migrations.
const SCHEMA_VERSION: i32 = 1;

/// V1: the three relations with the columns every query depends on. Payload
/// columns are added on first load.
const V1_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS contacts (
    contact_id INTEGER,
    agent_id TEXT,
    interaction_type TEXT,
    transcript_downloaded INTEGER NOT NULL DEFAULT 0,
    load_file TEXT
);

CREATE INDEX IF NOT EXISTS idx_contacts_contact_id ON contacts(contact_id);
CREATE INDEX IF NOT EXISTS idx_contacts_load_file ON contacts(load_file);

CREATE TABLE IF NOT EXISTS transcripts (
    contact_id INTEGER,
    dt TEXT
);

CREATE INDEX IF NOT EXISTS idx_transcripts_contact_id ON transcripts(contact_id, dt);

CREATE TABLE IF NOT EXISTS enhanced_transcripts (
    contact_id INTEGER PRIMARY KEY NOT NULL
);
"#;

#[derive(Clone)]
pub struct SqliteWarehouse {
    conn: Arc<Mutex<Connection>>,
    path: Option<PathBuf>,
}

impl std::fmt::Debug for SqliteWarehouse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteWarehouse").field("path", &self.path).finish()
    }
}

impl SqliteWarehouse {
    /// Opens (creating parent directories) and migrates the database at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating database directory {}", parent.display()))?;
        }
        let mut conn = Connection::open(&path)
            .with_context(|| format!("opening database {}", path.display()))?;
        conn.busy_timeout(Duration::from_secs(10))
            .context("setting busy timeout")?;
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get::<_, String>(0))
            .context("enabling WAL")?;
        run_migrations(&mut conn)?;
        info!(target: "sync", db = %path.display(), "warehouse ready");
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path: Some(path),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        let mut conn = Connection::open_in_memory().context("opening in-memory database")?;
        run_migrations(&mut conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path: None,
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("warehouse connection mutex poisoned"))
    }

    /// Column names of `table`, in declaration order.
    pub fn columns(&self, table: Table) -> Result<Vec<String>> {
        let conn = self.lock()?;
        table_columns(&conn, table.as_str())
    }

    /// Ad-hoc read used by tests and operators: every row of `table` as a record.
    pub fn rows(&self, table: Table, order_by: &str) -> Result<Frame> {
        let order_by = ident(order_by)?;
        let conn = self.lock()?;
        let sql = format!("SELECT * FROM {} ORDER BY \"{order_by}\"", table.as_str());
        query_frame(&conn, &sql, rusqlite::params![])
    }
}

/// Runs database migrations using PRAGMA user_version.
fn run_migrations(conn: &mut Connection) -> Result<()> {
    let current: i32 = conn
        .pragma_query_value(None, "user_version", |row| row.get(0))
        .context("reading schema version")?;
    if current >= SCHEMA_VERSION {
        return Ok(());
    }
    let tx = conn.transaction().context("starting migration")?;
    if current < 1 {
        tx.execute_batch(V1_SCHEMA).context("V1 migration failed")?;
    }
    tx.pragma_update(None, "user_version", SCHEMA_VERSION)
        .context("updating schema version")?;
    tx.commit().context("committing migration")?;
    debug!(target: "sync", from = current, to = SCHEMA_VERSION, "migrated warehouse schema");
    Ok(())
}

fn ident_re() -> &'static Regex {
    static RE: OnceCell<Regex> = OnceCell::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("identifier regex"))
}

/// Column names come from transformed payload keys, so they are checked
/// before being spliced into SQL.
fn ident(name: &str) -> Result<&str, SyncError> {
    if ident_re().is_match(name) {
        Ok(name)
    } else {
        Err(SyncError::InvalidIdentifier {
            name: name.to_string(),
        })
    }
}

fn table_columns(conn: &Connection, table: &str) -> Result<Vec<String>> {
    let mut stmt = conn
        .prepare(&format!("PRAGMA table_info({table})"))
        .context("reading table info")?;
    let cols = stmt
        .query_map([], |row| row.get::<_, String>(1))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(cols)
}

fn sql_type(cells: impl Iterator<Item = Scalar>) -> &'static str {
    for c in cells {
        match c {
            Scalar::Absent => continue,
            Scalar::Bool(_) | Scalar::Int(_) => return "INTEGER",
            Scalar::Float(_) => return "REAL",
            Scalar::Text(_) => return "TEXT",
        }
    }
    ""
}

fn query_frame<P: rusqlite::Params>(conn: &Connection, sql: &str, params: P) -> Result<Frame> {
    let mut stmt = conn.prepare(sql).with_context(|| format!("preparing `{sql}`"))?;
    let names: Vec<String> = stmt.column_names().iter().map(|s| s.to_string()).collect();
    let mut rows = stmt.query(params)?;
    let mut out = Frame::new();
    while let Some(row) = rows.next()? {
        let mut rec = Record::new();
        for (i, name) in names.iter().enumerate() {
            rec.insert(name.clone(), json_of(row.get_ref(i)?));
        }
        out.push(rec);
    }
    Ok(out)
}

fn json_of(v: ValueRef<'_>) -> Value {
    match v {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::from(i),
        ValueRef::Real(f) => serde_json::Number::from_f64(f)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        ValueRef::Text(t) | ValueRef::Blob(t) => Value::String(String::from_utf8_lossy(t).into_owned()),
    }
}

impl ToSql for Scalar {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            Scalar::Absent => ToSqlOutput::Owned(SqlValue::Null),
            Scalar::Bool(b) => ToSqlOutput::Owned(SqlValue::Integer(i64::from(*b))),
            Scalar::Int(i) => ToSqlOutput::Owned(SqlValue::Integer(*i)),
            Scalar::Float(f) => ToSqlOutput::Owned(SqlValue::Real(*f)),
            Scalar::Text(s) => ToSqlOutput::Borrowed(ValueRef::Text(s.as_bytes())),
        })
    }
}

impl Warehouse for SqliteWarehouse {
    fn loaded_contact_files(&self) -> Result<BTreeSet<String>> {
        let conn = self.lock()?;
        let mut stmt =
            conn.prepare("SELECT DISTINCT load_file FROM contacts WHERE load_file IS NOT NULL")?;
        let files = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<BTreeSet<_>>>()?;
        Ok(files)
    }

    fn loaded_transcript_contacts(&self) -> Result<BTreeSet<ContactId>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare("SELECT DISTINCT contact_id FROM transcripts WHERE contact_id IS NOT NULL")?;
        let ids = stmt
            .query_map([], |row| row.get::<_, ContactId>(0))?
            .collect::<rusqlite::Result<BTreeSet<_>>>()?;
        Ok(ids)
    }

    fn contacts_missing_transcripts(&self) -> Result<Vec<ContactId>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT DISTINCT contact_id FROM contacts
             WHERE transcript_downloaded = 0 AND agent_id IS NOT NULL AND contact_id IS NOT NULL
             ORDER BY contact_id",
        )?;
        let ids = stmt
            .query_map([], |row| row.get::<_, ContactId>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(ids)
    }

    fn mark_transcripts_downloaded(&self, contact_ids: &[ContactId]) -> Result<usize> {
        if contact_ids.is_empty() {
            return Ok(0);
        }
        let placeholders = vec!["?"; contact_ids.len()].join(",");
        let sql = format!(
            "UPDATE contacts SET transcript_downloaded = 1 WHERE contact_id IN ({placeholders})"
        );
        let conn = self.lock()?;
        let n = conn
            .execute(&sql, params_from_iter(contact_ids.iter()))
            .context("marking transcripts downloaded")?;
        Ok(n)
    }

    fn unenhanced_contacts(&self) -> Result<Vec<ContactId>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT DISTINCT contact_id FROM transcripts
             WHERE contact_id IS NOT NULL
               AND contact_id NOT IN (SELECT contact_id FROM enhanced_transcripts)
             ORDER BY contact_id",
        )?;
        let ids = stmt
            .query_map([], |row| row.get::<_, ContactId>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(ids)
    }

    fn transcript_frame(&self, contact_id: ContactId) -> Result<Frame> {
        let conn = self.lock()?;
        query_frame(
            &conn,
            "SELECT * FROM transcripts WHERE contact_id = ?1 ORDER BY contact_id, dt ASC",
            [contact_id],
        )
        .with_context(|| format!("loading transcript rows for contact {contact_id}"))
    }

    fn load(&self, batch: &LoadBatch) -> Result<usize> {
        if batch.is_empty() {
            return Ok(0);
        }
        let table = batch.table.as_str();
        let columns = batch
            .columns
            .iter()
            .map(|c| ident(c))
            .collect::<Result<Vec<_>, _>>()?;

        let mut conn = self.lock()?;
        let tx = conn.transaction().context("starting load transaction")?;

        let existing = table_columns(&tx, table)?;
        for (i, col) in columns.iter().enumerate() {
            if existing.iter().any(|e| e.eq_ignore_ascii_case(col)) {
                continue;
            }
            let ty = sql_type(batch.rows.iter().map(|r| r[i].clone()));
            tx.execute_batch(&format!("ALTER TABLE {table} ADD COLUMN \"{col}\" {ty}"))
                .with_context(|| format!("adding column {table}.{col}"))?;
            debug!(target: "sync", table, column = *col, ty, "added column");
        }

        let quoted: Vec<String> = columns.iter().map(|c| format!("\"{c}\"")).collect();
        let placeholders: Vec<String> = (1..=columns.len()).map(|i| format!("?{i}")).collect();
        let sql = format!(
            "INSERT INTO {table} ({}) VALUES ({})",
            quoted.join(", "),
            placeholders.join(", ")
        );
        {
            let mut stmt = tx.prepare(&sql).with_context(|| format!("preparing insert into {table}"))?;
            for row in &batch.rows {
                stmt.execute(params_from_iter(row.iter()))
                    .with_context(|| format!("inserting into {table}"))?;
            }
        }
        tx.commit().context("committing load")?;
        Ok(batch.rows.len())
    }
}
