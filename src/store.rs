use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use rusqlite::{params, Connection};
use thiserror::Error;

use crate::records::{DeliveryConfirmation, DeliveryStatus, RecordKind, Refueling, StopEvent};

/// Errors from the durable queue store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("encode error: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("store lock poisoned")]
    LockPoisoned,
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// A stop queue row: store-assigned id plus the staged event.
#[derive(Clone, Debug, PartialEq)]
pub struct StopRow {
    pub id: i64,
    pub event: StopEvent,
}

const BUSY_RETRY_DELAY: Duration = Duration::from_millis(200);

/// Durable offline queue: one table per record kind, each row carrying
/// `sent` and `in_flight` flags. The companion app writes delivery and
/// refueling rows into the same file, so writes can hit transient lock
/// contention even though this process serializes its own access.
pub struct OfflineStore {
    conn: Mutex<Connection>,
}

impl OfflineStore {
    /// Opens (creating if needed) the queue database at `path` and resets
    /// any rows a previous process left marked in-flight, making them
    /// drain-eligible again.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)?;
        Self::init_db(&conn)?;
        Self::recover_stale_in_flight(&conn)?;

        Ok(OfflineStore {
            conn: Mutex::new(conn),
        })
    }

    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init_db(&conn)?;
        Ok(OfflineStore {
            conn: Mutex::new(conn),
        })
    }

    fn init_db(conn: &Connection) -> Result<()> {
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS stop_queue (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                truck_id INTEGER NOT NULL,
                latitude REAL NOT NULL,
                longitude REAL NOT NULL,
                started_at_ms INTEGER NOT NULL,
                ended_at_ms INTEGER NOT NULL,
                sent INTEGER NOT NULL DEFAULT 0,
                in_flight INTEGER NOT NULL DEFAULT 0
            );
            CREATE TABLE IF NOT EXISTS delivery_queue (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                delivery_id INTEGER NOT NULL,
                latitude REAL NOT NULL,
                longitude REAL NOT NULL,
                note TEXT NOT NULL DEFAULT '',
                status TEXT NOT NULL DEFAULT 'pending',
                photos TEXT NOT NULL DEFAULT '[]',
                sent INTEGER NOT NULL DEFAULT 0,
                in_flight INTEGER NOT NULL DEFAULT 0
            );
            CREATE TABLE IF NOT EXISTS refuel_queue (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                truck_id INTEGER NOT NULL,
                department TEXT NOT NULL DEFAULT '',
                driver TEXT NOT NULL DEFAULT '',
                fuel TEXT NOT NULL DEFAULT '',
                liters REAL NOT NULL DEFAULT 0,
                price_per_liter REAL NOT NULL DEFAULT 0,
                total_value REAL NOT NULL DEFAULT 0,
                odometer REAL NOT NULL DEFAULT 0,
                station TEXT NOT NULL DEFAULT '',
                recorded_at TEXT NOT NULL DEFAULT '',
                latitude REAL NOT NULL DEFAULT 0,
                longitude REAL NOT NULL DEFAULT 0,
                note TEXT NOT NULL DEFAULT '',
                plate_photo TEXT,
                pump_photo TEXT,
                odometer_photo TEXT,
                gauge_photo TEXT,
                receipt_photo TEXT,
                coupon_photo TEXT,
                sent INTEGER NOT NULL DEFAULT 0,
                in_flight INTEGER NOT NULL DEFAULT 0
            );",
        )?;
        Ok(())
    }

    /// A crash mid-send leaves rows at `in_flight = 1`; they are resumable
    /// garbage, not lost records. Reset them so the next drain retries.
    fn recover_stale_in_flight(conn: &Connection) -> Result<()> {
        let mut recovered = 0;
        for table in ["stop_queue", "delivery_queue", "refuel_queue"] {
            recovered += conn.execute(
                &format!("UPDATE {} SET in_flight = 0 WHERE in_flight = 1", table),
                [],
            )?;
        }
        if recovered > 0 {
            log::info!("recovered {} stale in-flight queue rows", recovered);
        }
        Ok(())
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StoreError::LockPoisoned)
    }

    pub fn insert_stop(&self, event: &StopEvent) -> Result<i64> {
        let conn = self.conn()?;
        with_busy_retry(|| {
            conn.execute(
                "INSERT INTO stop_queue (truck_id, latitude, longitude, started_at_ms, ended_at_ms)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    event.truck_id,
                    event.latitude,
                    event.longitude,
                    event.started_at_ms,
                    event.ended_at_ms,
                ],
            )
        })?;
        Ok(conn.last_insert_rowid())
    }

    pub fn insert_delivery(&self, delivery: &DeliveryConfirmation) -> Result<i64> {
        let photos = serde_json::to_string(&delivery.photos)?;
        let conn = self.conn()?;
        with_busy_retry(|| {
            conn.execute(
                "INSERT INTO delivery_queue (delivery_id, latitude, longitude, note, status, photos)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    delivery.delivery_id,
                    delivery.latitude,
                    delivery.longitude,
                    delivery.note,
                    delivery.status.as_str(),
                    photos,
                ],
            )
        })?;
        Ok(conn.last_insert_rowid())
    }

    pub fn insert_refueling(&self, refuel: &Refueling) -> Result<i64> {
        let conn = self.conn()?;
        with_busy_retry(|| {
            conn.execute(
                "INSERT INTO refuel_queue (
                    truck_id, department, driver, fuel, liters, price_per_liter,
                    total_value, odometer, station, recorded_at, latitude, longitude,
                    note, plate_photo, pump_photo, odometer_photo, gauge_photo,
                    receipt_photo, coupon_photo
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13,
                           ?14, ?15, ?16, ?17, ?18, ?19)",
                params![
                    refuel.truck_id,
                    refuel.department,
                    refuel.driver,
                    refuel.fuel,
                    refuel.liters,
                    refuel.price_per_liter,
                    refuel.total_value,
                    refuel.odometer,
                    refuel.station,
                    refuel.recorded_at,
                    refuel.latitude,
                    refuel.longitude,
                    refuel.note,
                    refuel.plate_photo,
                    refuel.pump_photo,
                    refuel.odometer_photo,
                    refuel.gauge_photo,
                    refuel.receipt_photo,
                    refuel.coupon_photo,
                ],
            )
        })?;
        Ok(conn.last_insert_rowid())
    }

    /// Stop rows eligible for a drain pass, in insertion order.
    pub fn pending_stops(&self) -> Result<Vec<StopRow>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, truck_id, latitude, longitude, started_at_ms, ended_at_ms
             FROM stop_queue WHERE sent = 0 AND in_flight = 0 ORDER BY id",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok(StopRow {
                    id: row.get(0)?,
                    event: StopEvent {
                        truck_id: row.get(1)?,
                        latitude: row.get(2)?,
                        longitude: row.get(3)?,
                        started_at_ms: row.get(4)?,
                        ended_at_ms: row.get(5)?,
                    },
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Delivery rows eligible for a drain pass: unsent, not in-flight, and
    /// finalized (completed or partial) — open deliveries never sync.
    pub fn pending_deliveries(&self) -> Result<Vec<DeliveryConfirmation>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, delivery_id, latitude, longitude, note, status, photos
             FROM delivery_queue
             WHERE sent = 0 AND in_flight = 0 AND status IN ('completed', 'partial')
             ORDER BY id",
        )?;
        let rows = stmt
            .query_map([], |row| {
                let status: String = row.get(5)?;
                let photos_json: String = row.get(6)?;
                // An unparseable photo list costs the photos, not the record.
                let photos = serde_json::from_str(&photos_json).unwrap_or_else(|e| {
                    log::warn!("unparseable photo list in delivery row: {}", e);
                    Vec::new()
                });
                Ok(DeliveryConfirmation {
                    id: row.get(0)?,
                    delivery_id: row.get(1)?,
                    latitude: row.get(2)?,
                    longitude: row.get(3)?,
                    note: row.get(4)?,
                    status: DeliveryStatus::parse(&status),
                    photos,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Refueling rows eligible for a drain pass, in insertion order.
    pub fn pending_refuelings(&self) -> Result<Vec<Refueling>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, truck_id, department, driver, fuel, liters, price_per_liter,
                    total_value, odometer, station, recorded_at, latitude, longitude,
                    note, plate_photo, pump_photo, odometer_photo, gauge_photo,
                    receipt_photo, coupon_photo
             FROM refuel_queue WHERE sent = 0 AND in_flight = 0 ORDER BY id",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok(Refueling {
                    id: row.get(0)?,
                    truck_id: row.get(1)?,
                    department: row.get(2)?,
                    driver: row.get(3)?,
                    fuel: row.get(4)?,
                    liters: row.get(5)?,
                    price_per_liter: row.get(6)?,
                    total_value: row.get(7)?,
                    odometer: row.get(8)?,
                    station: row.get(9)?,
                    recorded_at: row.get(10)?,
                    latitude: row.get(11)?,
                    longitude: row.get(12)?,
                    note: row.get(13)?,
                    plate_photo: row.get(14)?,
                    pump_photo: row.get(15)?,
                    odometer_photo: row.get(16)?,
                    gauge_photo: row.get(17)?,
                    receipt_photo: row.get(18)?,
                    coupon_photo: row.get(19)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Marks or unmarks a row as undergoing a send attempt. Set before any
    /// network call so a crash mid-send never silently loses the row.
    pub fn set_in_flight(&self, kind: RecordKind, id: i64, in_flight: bool) -> Result<()> {
        let conn = self.conn()?;
        with_busy_retry(|| {
            conn.execute(
                &format!("UPDATE {} SET in_flight = ?1 WHERE id = ?2", table(kind)),
                params![in_flight as i64, id],
            )
        })?;
        Ok(())
    }

    /// Removes a row whose send was confirmed by the remote.
    pub fn delete(&self, kind: RecordKind, id: i64) -> Result<()> {
        let conn = self.conn()?;
        with_busy_retry(|| {
            conn.execute(
                &format!("DELETE FROM {} WHERE id = ?1", table(kind)),
                params![id],
            )
        })?;
        Ok(())
    }
}

fn table(kind: RecordKind) -> &'static str {
    match kind {
        RecordKind::Stop => "stop_queue",
        RecordKind::Delivery => "delivery_queue",
        RecordKind::Refueling => "refuel_queue",
    }
}

fn is_busy(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _)
            if e.code == rusqlite::ErrorCode::DatabaseBusy
                || e.code == rusqlite::ErrorCode::DatabaseLocked
    )
}

/// One bounded retry after a short backoff for lock contention; a second
/// failure surfaces to the caller as a hard local error for that write.
fn with_busy_retry<T>(mut op: impl FnMut() -> rusqlite::Result<T>) -> rusqlite::Result<T> {
    match op() {
        Err(e) if is_busy(&e) => {
            std::thread::sleep(BUSY_RETRY_DELAY);
            op()
        }
        other => other,
    }
}
