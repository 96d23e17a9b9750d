use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{Connection, ErrorCode, OptionalExtension};
use serde::Serialize;
use tracing::{debug, warn};

use crate::airlines::AirlineRef;
use crate::error::StoreError;
use crate::settings::StorageSettings;

static LEASE_SEQ: AtomicU64 = AtomicU64::new(0);

/// One seat-map image tied to one airline/aircraft pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SeatmapRecord {
    pub airline_code: String,
    pub airline_name_cn: String,
    pub airline_name_en: String,
    pub aircraft_model: String,
    pub image_filename: String,
    pub source_url: String,
    pub downloaded_at: DateTime<Utc>,
    pub file_size_bytes: u64,
}

/// `(airline_code, aircraft_model, image_filename)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct NaturalKey {
    pub airline_code: String,
    pub aircraft_model: String,
    pub image_filename: String,
}

impl SeatmapRecord {
    pub fn key(&self) -> NaturalKey {
        NaturalKey {
            airline_code: self.airline_code.clone(),
            aircraft_model: self.aircraft_model.clone(),
            image_filename: self.image_filename.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UpsertOutcome {
    Inserted,
    Updated,
    Unchanged,
}

/// One line of the append-only event log.
#[derive(Serialize)]
struct UpsertEvent<'a> {
    action: UpsertOutcome,
    airline_code: &'a str,
    aircraft_model: &'a str,
    image_filename: &'a str,
    downloaded_at: String,
    file_size_bytes: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    pub total: usize,
    pub per_airline: Vec<(String, usize)>,
    pub undersized: usize,
}

struct Inner {
    conn: Connection,
    events: File,
}

/// Record table plus event log. All writes go through one lock, so upserts
/// for a key are serialized.
pub struct Store {
    inner: Mutex<Inner>,
}

const COLUMNS: &str = "airline_code, airline_name_cn, airline_name_en, aircraft_model,
    image_filename, source_url, downloaded_at, file_size_bytes";

impl Store {
    pub fn open(db_path: &Path, event_log: &Path) -> Result<Self, StoreError> {
        for path in [db_path, event_log] {
            if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
                fs::create_dir_all(dir)?;
            }
        }

        let conn = Connection::open(db_path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA busy_timeout=5000;")?;
        init_schema(&conn)?;

        let events = OpenOptions::new().create(true).append(true).open(event_log)?;

        Ok(Self {
            inner: Mutex::new(Inner { conn, events }),
        })
    }

    pub fn from_settings(settings: &StorageSettings) -> Result<Self, StoreError> {
        Self::open(&settings.database_path(), &settings.event_log_path())
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>, StoreError> {
        self.inner
            .lock()
            .map_err(|_| StoreError::io("store lock poisoned"))
    }

    /// Insert or update by natural key. Identical data is a no-op: neither
    /// the table nor the event log is touched. The row change and its log
    /// line land together or not at all.
    pub fn upsert(&self, record: &SeatmapRecord) -> Result<UpsertOutcome, StoreError> {
        let mut guard = self.lock()?;
        let Inner { conn, events } = &mut *guard;

        let tx = conn.transaction()?;
        let existing = tx
            .query_row(
                &format!(
                    "SELECT {COLUMNS} FROM seatmaps
                     WHERE airline_code = ?1 AND aircraft_model = ?2 AND image_filename = ?3"
                ),
                rusqlite::params![
                    record.airline_code,
                    record.aircraft_model,
                    record.image_filename
                ],
                row_to_record,
            )
            .optional()?;

        let downloaded_at = format_ts(&record.downloaded_at);
        let outcome = match existing {
            Some(ref current) if current == record => return Ok(UpsertOutcome::Unchanged),
            Some(_) => {
                tx.execute(
                    "UPDATE seatmaps SET airline_name_cn = ?4, airline_name_en = ?5,
                         source_url = ?6, downloaded_at = ?7, file_size_bytes = ?8
                     WHERE airline_code = ?1 AND aircraft_model = ?2 AND image_filename = ?3",
                    rusqlite::params![
                        record.airline_code,
                        record.aircraft_model,
                        record.image_filename,
                        record.airline_name_cn,
                        record.airline_name_en,
                        record.source_url,
                        downloaded_at,
                        record.file_size_bytes as i64,
                    ],
                )?;
                UpsertOutcome::Updated
            }
            None => {
                tx.execute(
                    &format!(
                        "INSERT INTO seatmaps ({COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)"
                    ),
                    rusqlite::params![
                        record.airline_code,
                        record.airline_name_cn,
                        record.airline_name_en,
                        record.aircraft_model,
                        record.image_filename,
                        record.source_url,
                        downloaded_at,
                        record.file_size_bytes as i64,
                    ],
                )?;
                UpsertOutcome::Inserted
            }
        };

        let event = UpsertEvent {
            action: outcome,
            airline_code: &record.airline_code,
            aircraft_model: &record.aircraft_model,
            image_filename: &record.image_filename,
            downloaded_at,
            file_size_bytes: record.file_size_bytes,
        };
        let mut line = serde_json::to_string(&event)?;
        line.push('\n');

        // log first; dropping `tx` on error rolls the row back
        let log_len = events.metadata()?.len();
        if let Err(e) = events.write_all(line.as_bytes()).and_then(|_| events.flush()) {
            trim_log(events, log_len);
            return Err(e.into());
        }
        if let Err(e) = tx.commit() {
            trim_log(events, log_len);
            return Err(e.into());
        }

        debug!(
            airline = %record.airline_code,
            model = %record.aircraft_model,
            file = %record.image_filename,
            ?outcome,
            "upsert"
        );
        Ok(outcome)
    }

    pub fn find(&self, key: &NaturalKey) -> Result<Option<SeatmapRecord>, StoreError> {
        let guard = self.lock()?;
        let record = guard
            .conn
            .query_row(
                &format!(
                    "SELECT {COLUMNS} FROM seatmaps
                     WHERE airline_code = ?1 AND aircraft_model = ?2 AND image_filename = ?3"
                ),
                rusqlite::params![key.airline_code, key.aircraft_model, key.image_filename],
                row_to_record,
            )
            .optional()?;
        Ok(record)
    }

    /// Every record for one airline/aircraft pair.
    pub fn get(&self, airline_code: &str, aircraft_model: &str) -> Result<Vec<SeatmapRecord>, StoreError> {
        self.query(
            &format!(
                "SELECT {COLUMNS} FROM seatmaps
                 WHERE airline_code = ?1 AND aircraft_model = ?2
                 ORDER BY image_filename"
            ),
            &[&airline_code, &aircraft_model],
        )
    }

    pub fn list_records(&self, airline_code: &str) -> Result<Vec<SeatmapRecord>, StoreError> {
        self.query(
            &format!(
                "SELECT {COLUMNS} FROM seatmaps
                 WHERE airline_code = ?1
                 ORDER BY aircraft_model, image_filename"
            ),
            &[&airline_code],
        )
    }

    /// Airlines with at least one stored record, sorted by code.
    pub fn list_airlines(&self) -> Result<Vec<AirlineRef>, StoreError> {
        let guard = self.lock()?;
        let mut stmt = guard.conn.prepare(
            "SELECT airline_code, MAX(airline_name_cn), MAX(airline_name_en)
             FROM seatmaps GROUP BY airline_code ORDER BY airline_code",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok(AirlineRef {
                    iata_code: row.get(0)?,
                    chinese_name: row.get(1)?,
                    english_name: row.get(2)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn stats(&self, min_bytes: u64) -> Result<StoreStats, StoreError> {
        let guard = self.lock()?;
        let mut stmt = guard.conn.prepare(
            "SELECT airline_code, COUNT(*) FROM seatmaps GROUP BY airline_code ORDER BY airline_code",
        )?;
        let per_airline = stmt
            .query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? as usize))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        let undersized: i64 = guard.conn.query_row(
            "SELECT COUNT(*) FROM seatmaps WHERE file_size_bytes < ?1",
            [min_bytes as i64],
            |row| row.get(0),
        )?;

        Ok(StoreStats {
            total: per_airline.iter().map(|(_, n)| n).sum(),
            per_airline,
            undersized: undersized as usize,
        })
    }

    /// Take the single-writer lease for `airline_code`. A live lease held by
    /// another run is a `WriteConflict`; leases older than `ttl` are reclaimed.
    pub fn claim_airline(self: &Arc<Self>, airline_code: &str, ttl: Duration) -> Result<AirlineLease, StoreError> {
        let holder = format!(
            "{}-{}",
            std::process::id(),
            LEASE_SEQ.fetch_add(1, Ordering::Relaxed)
        );
        let now = Utc::now().timestamp();
        let cutoff = now - ttl.as_secs() as i64;

        let guard = self.lock()?;
        let reclaimed = guard.conn.execute(
            "DELETE FROM airline_leases WHERE airline_code = ?1 AND claimed_at < ?2",
            rusqlite::params![airline_code, cutoff],
        )?;
        if reclaimed > 0 {
            warn!(airline = airline_code, "reclaimed abandoned lease");
        }

        match guard.conn.execute(
            "INSERT INTO airline_leases (airline_code, holder, claimed_at) VALUES (?1, ?2, ?3)",
            rusqlite::params![airline_code, holder, now],
        ) {
            Ok(_) => {}
            Err(rusqlite::Error::SqliteFailure(e, _)) if e.code == ErrorCode::ConstraintViolation => {
                return Err(StoreError::WriteConflict(format!(
                    "airline {airline_code} is already being written by another run"
                )));
            }
            Err(e) => return Err(e.into()),
        }
        drop(guard);

        Ok(AirlineLease {
            store: Arc::clone(self),
            airline_code: airline_code.to_string(),
            holder,
        })
    }

    fn release(&self, airline_code: &str, holder: &str) -> Result<(), StoreError> {
        let guard = self.lock()?;
        guard.conn.execute(
            "DELETE FROM airline_leases WHERE airline_code = ?1 AND holder = ?2",
            rusqlite::params![airline_code, holder],
        )?;
        Ok(())
    }

    fn query(&self, sql: &str, params: &[&dyn rusqlite::ToSql]) -> Result<Vec<SeatmapRecord>, StoreError> {
        let guard = self.lock()?;
        let mut stmt = guard.conn.prepare(sql)?;
        let rows = stmt
            .query_map(params, row_to_record)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}

/// Held while a run writes one airline; released on drop.
pub struct AirlineLease {
    store: Arc<Store>,
    airline_code: String,
    holder: String,
}

impl AirlineLease {
    pub fn airline_code(&self) -> &str {
        &self.airline_code
    }
}

impl Drop for AirlineLease {
    fn drop(&mut self) {
        if let Err(e) = self.store.release(&self.airline_code, &self.holder) {
            warn!(airline = %self.airline_code, "failed to release lease: {}", e);
        }
    }
}

/// Cut a half-written or orphaned event line back off the log.
fn trim_log(events: &File, len: u64) {
    if let Err(e) = events.set_len(len) {
        warn!("could not trim event log to {} bytes: {}", len, e);
    }
}

fn init_schema(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS seatmaps (
            id               INTEGER PRIMARY KEY,
            airline_code     TEXT NOT NULL,
            airline_name_cn  TEXT NOT NULL,
            airline_name_en  TEXT NOT NULL,
            aircraft_model   TEXT NOT NULL,
            image_filename   TEXT NOT NULL,
            source_url       TEXT NOT NULL,
            downloaded_at    TEXT NOT NULL,
            file_size_bytes  INTEGER NOT NULL,
            UNIQUE(airline_code, aircraft_model, image_filename)
        );
        CREATE INDEX IF NOT EXISTS idx_seatmaps_airline_model ON seatmaps(airline_code, aircraft_model);

        CREATE TABLE IF NOT EXISTS airline_leases (
            airline_code  TEXT PRIMARY KEY,
            holder        TEXT NOT NULL,
            claimed_at    INTEGER NOT NULL
        );
        ",
    )?;
    Ok(())
}

fn format_ts(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn row_to_record(row: &rusqlite::Row) -> rusqlite::Result<SeatmapRecord> {
    let raw_ts: String = row.get(6)?;
    let downloaded_at = DateTime::parse_from_rfc3339(&raw_ts)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(6, rusqlite::types::Type::Text, Box::new(e))
        })?;
    Ok(SeatmapRecord {
        airline_code: row.get(0)?,
        airline_name_cn: row.get(1)?,
        airline_name_en: row.get(2)?,
        aircraft_model: row.get(3)?,
        image_filename: row.get(4)?,
        source_url: row.get(5)?,
        downloaded_at,
        file_size_bytes: row.get::<_, i64>(7)? as u64,
    })
}
