//! SQLite snapshot backend
//!
//! Tables:
//! - `store_meta` - key/value pairs (`width`, `saved_at`)
//! - `patients` - one row per MRN with demographics
//! - `observations` - one row per filled slot, keyed by (mrn, slot)
//!
//! Every save rewrites all three tables inside one transaction, so a reader
//! never sees a half-written store.

use super::store::{PatientRow, Slot, StoreSnapshot};
use crate::hl7::Sex;
use crate::persistence::{PersistenceError, SnapshotBackend};
use async_trait::async_trait;
use chrono::NaiveDateTime;
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::BTreeMap;
use std::sync::{Mutex, PoisonError};

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS store_meta (
    key TEXT PRIMARY KEY,
    value INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS patients (
    mrn TEXT PRIMARY KEY,
    age INTEGER,
    sex TEXT
);

CREATE TABLE IF NOT EXISTS observations (
    mrn TEXT NOT NULL,
    slot INTEGER NOT NULL,
    taken_at TEXT NOT NULL,
    value REAL NOT NULL,
    PRIMARY KEY (mrn, slot)
);
"#;

pub struct SqliteSnapshotBackend {
    conn: Mutex<Connection>,
}

impl SqliteSnapshotBackend {
    /// Open (or create) the database at `db_path` and ensure the schema exists
    pub fn open(db_path: &str) -> Result<Self, PersistenceError> {
        let conn = Connection::open(db_path)?;
        Self::with_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self, PersistenceError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, PersistenceError> {
        let mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        log::debug!("SQLite journal mode: {}", mode);
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn write(conn: &mut Connection, snapshot: &StoreSnapshot) -> Result<(), PersistenceError> {
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM observations", [])?;
        tx.execute("DELETE FROM patients", [])?;
        tx.execute("DELETE FROM store_meta", [])?;

        tx.execute(
            "INSERT INTO store_meta (key, value) VALUES ('width', ?1), ('saved_at', ?2)",
            params![snapshot.width as i64, snapshot.saved_at],
        )?;

        {
            let mut insert_patient =
                tx.prepare("INSERT INTO patients (mrn, age, sex) VALUES (?1, ?2, ?3)")?;
            let mut insert_slot = tx.prepare(
                "INSERT INTO observations (mrn, slot, taken_at, value) VALUES (?1, ?2, ?3, ?4)",
            )?;

            for row in &snapshot.patients {
                insert_patient.execute(params![
                    row.mrn,
                    row.age,
                    row.sex.map(|s| s.as_str())
                ])?;

                for (index, slot) in row.slots.iter().enumerate() {
                    if let Some(slot) = slot {
                        insert_slot.execute(params![
                            row.mrn,
                            index as i64,
                            slot.time.format(TIME_FORMAT).to_string(),
                            slot.value
                        ])?;
                    }
                }
            }
        }

        tx.commit()?;
        Ok(())
    }

    fn read(conn: &Connection) -> Result<Option<StoreSnapshot>, PersistenceError> {
        let meta = |key: &str| -> Result<Option<i64>, rusqlite::Error> {
            conn.query_row(
                "SELECT value FROM store_meta WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()
        };

        let Some(width) = meta("width")? else {
            return Ok(None);
        };
        let saved_at = meta("saved_at")?.unwrap_or(0);
        let width = usize::try_from(width)
            .map_err(|_| PersistenceError::Corrupt(format!("negative width {}", width)))?;

        let mut rows: BTreeMap<String, PatientRow> = BTreeMap::new();

        let mut stmt = conn.prepare("SELECT mrn, age, sex FROM patients")?;
        let patients = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, Option<u32>>(1)?,
                row.get::<_, Option<String>>(2)?,
            ))
        })?;
        for patient in patients {
            let (mrn, age, sex) = patient?;
            let sex = match sex {
                Some(code) => Some(Sex::from_code(&code).ok_or_else(|| {
                    PersistenceError::Corrupt(format!("unknown sex code '{}' for {}", code, mrn))
                })?),
                None => None,
            };
            rows.insert(
                mrn.clone(),
                PatientRow {
                    mrn,
                    age,
                    sex,
                    slots: vec![None; width],
                },
            );
        }

        let mut stmt = conn.prepare("SELECT mrn, slot, taken_at, value FROM observations")?;
        let observations = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, f64>(3)?,
            ))
        })?;
        for observation in observations {
            let (mrn, index, taken_at, value) = observation?;
            let time = NaiveDateTime::parse_from_str(&taken_at, TIME_FORMAT).map_err(|e| {
                PersistenceError::Corrupt(format!("bad timestamp '{}': {}", taken_at, e))
            })?;
            let index = usize::try_from(index)
                .map_err(|_| PersistenceError::Corrupt(format!("negative slot {}", index)))?;

            let row = rows.get_mut(&mrn).ok_or_else(|| {
                PersistenceError::Corrupt(format!("observation for unknown MRN {}", mrn))
            })?;
            if index >= row.slots.len() {
                row.slots.resize(index + 1, None);
            }
            row.slots[index] = Some(Slot { time, value });
        }

        Ok(Some(StoreSnapshot {
            width,
            saved_at,
            patients: rows.into_values().collect(),
        }))
    }
}

#[async_trait]
impl SnapshotBackend for SqliteSnapshotBackend {
    async fn save(&self, snapshot: &StoreSnapshot) -> Result<(), PersistenceError> {
        let mut conn = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        Self::write(&mut conn, snapshot)?;
        log::debug!("Saved {} patients to SQLite", snapshot.patients.len());
        Ok(())
    }

    async fn load(&self) -> Result<Option<StoreSnapshot>, PersistenceError> {
        let conn = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        Self::read(&conn)
    }

    fn backend_type(&self) -> &'static str {
        "sqlite"
    }
}
