use crate::fingerprint::NO_STABLE_IES;
use anyhow::{Context, Result};
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use std::path::Path;

/// Timestamp layout shared by every table: UTC with second resolution.
pub const TIMESTAMP_FMT: &str = "%Y-%m-%d %H:%M:%S";

const SCHEMA: &str = r#"
-- Devices: every transmitter MAC ever sighted (trusted and untrusted)
CREATE TABLE IF NOT EXISTS devices (
    mac TEXT PRIMARY KEY,
    name TEXT,
    is_trusted INTEGER DEFAULT 0,
    first_seen TEXT NOT NULL,
    last_seen TEXT NOT NULL
);

-- Sightings: one row per accepted probe request, never mutated
CREATE TABLE IF NOT EXISTS sightings (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    timestamp TEXT NOT NULL,
    mac TEXT NOT NULL,
    rssi TEXT,
    dbm INTEGER,
    ssid TEXT,
    oui TEXT,
    FOREIGN KEY (mac) REFERENCES devices(mac)
);

-- Device identities: user-labeled logical devices (absorb fingerprint drift)
CREATE TABLE IF NOT EXISTS device_identities (
    identity_id TEXT PRIMARY KEY,
    alias TEXT,
    alias_set_at TEXT,
    ssid_signature TEXT,
    first_seen TEXT NOT NULL,
    last_seen TEXT NOT NULL,
    total_sightings INTEGER DEFAULT 0
);

-- Device fingerprints: stable IE hashes, the durable handle under
-- MAC randomization
CREATE TABLE IF NOT EXISTS device_fingerprints (
    fingerprint_id TEXT PRIMARY KEY,
    identity_id TEXT,
    ie_data TEXT,
    first_seen TEXT NOT NULL,
    last_seen TEXT NOT NULL,
    sighting_count INTEGER DEFAULT 0,
    FOREIGN KEY (identity_id) REFERENCES device_identities(identity_id)
);

CREATE INDEX IF NOT EXISTS idx_sightings_timestamp ON sightings(timestamp);
CREATE INDEX IF NOT EXISTS idx_sightings_mac ON sightings(mac);
CREATE INDEX IF NOT EXISTS idx_devices_trusted ON devices(is_trusted);
CREATE INDEX IF NOT EXISTS idx_fingerprints_identity ON device_fingerprints(identity_id);
"#;

pub struct Database {
    conn: Connection,
}

#[derive(Debug, Clone)]
pub struct Device {
    pub mac: String,
    pub name: Option<String>,
    pub is_trusted: bool,
    pub first_seen: String,
    pub last_seen: String,
}

#[derive(Debug, Clone)]
pub struct Sighting {
    pub id: i64,
    pub timestamp: String,
    pub mac: String,
    pub rssi: Option<String>,
    pub dbm: Option<i64>,
    pub ssid: Option<String>,
    pub oui: Option<String>,
    pub ie_fingerprint: Option<String>,
    pub identity_id: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Fingerprint {
    pub fingerprint_id: String,
    pub identity_id: Option<String>,
    pub ie_data: Option<String>,
    pub first_seen: String,
    pub last_seen: String,
    pub sighting_count: i64,
    pub notification_enabled: bool,
}

#[derive(Debug, Clone)]
pub struct Identity {
    pub identity_id: String,
    pub alias: Option<String>,
    pub alias_set_at: Option<String>,
    pub ssid_signature: Option<String>,
    pub first_seen: String,
    pub last_seen: String,
    pub total_sightings: i64,
}

/// What the ingest path hands to `log_sighting` for one accepted probe.
#[derive(Debug, Clone)]
pub struct SightingRecord {
    pub mac: String,
    pub dbm: i32,
    pub ssid: String,
    pub oui: String,
    pub ie_fingerprint: Option<String>,
    pub ie_data: Option<String>,
}

fn now_string() -> String {
    Utc::now().format(TIMESTAMP_FMT).to_string()
}

impl Database {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create database directory: {:?}", parent))?;
            }
        }
        let conn = Connection::open(path.as_ref())
            .with_context(|| format!("Failed to open database: {:?}", path.as_ref()))?;
        Self::attach(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::attach(Connection::open_in_memory()?)
    }

    fn attach(conn: Connection) -> Result<Self> {
        conn.execute_batch("PRAGMA foreign_keys = ON")?;
        let db = Database { conn };
        db.initialize()?;
        Ok(db)
    }

    /// Idempotent schema bootstrap plus forward migrations for stores
    /// created before fingerprinting and notification gating existed.
    fn initialize(&self) -> Result<()> {
        self.conn.execute_batch(SCHEMA)?;

        if !self.column_exists("sightings", "ie_fingerprint")? {
            self.conn
                .execute("ALTER TABLE sightings ADD COLUMN ie_fingerprint TEXT", [])?;
        }
        if !self.column_exists("sightings", "identity_id")? {
            self.conn.execute(
                "ALTER TABLE sightings ADD COLUMN identity_id TEXT \
                 REFERENCES device_identities(identity_id)",
                [],
            )?;
        }
        if !self.column_exists("device_fingerprints", "notification_enabled")? {
            self.conn.execute(
                "ALTER TABLE device_fingerprints ADD COLUMN notification_enabled INTEGER DEFAULT 1",
                [],
            )?;
        }

        self.conn.execute_batch(
            "CREATE INDEX IF NOT EXISTS idx_sightings_fingerprint ON sightings(ie_fingerprint);
             CREATE INDEX IF NOT EXISTS idx_sightings_identity ON sightings(identity_id);",
        )?;

        Ok(())
    }

    fn column_exists(&self, table: &str, column: &str) -> Result<bool> {
        let mut stmt = self
            .conn
            .prepare(&format!("PRAGMA table_info({})", table))?;
        let mut rows = stmt.query([])?;
        while let Some(row) = rows.next()? {
            let name: String = row.get(1)?;
            if name == column {
                return Ok(true);
            }
        }
        Ok(false)
    }

    // ── Devices ─────────────────────────────────────────────────────────

    /// Insert-or-update the device row. `first_seen` is fixed at insert;
    /// only `last_seen` moves afterwards.
    pub fn update_device_last_seen(&self, mac: &str) -> Result<()> {
        upsert_device(&self.conn, mac, &now_string())?;
        Ok(())
    }

    pub fn add_device(&self, mac: &str, name: Option<&str>, is_trusted: bool) -> Result<()> {
        let now = now_string();
        self.conn.execute(
            "INSERT INTO devices (mac, name, is_trusted, first_seen, last_seen)
             VALUES (?1, ?2, ?3, ?4, ?4)
             ON CONFLICT(mac) DO UPDATE SET
                 name = COALESCE(?2, name),
                 is_trusted = ?3,
                 last_seen = ?4",
            params![mac, name, is_trusted as i64, now],
        )?;
        Ok(())
    }

    pub fn update_device(
        &self,
        mac: &str,
        name: Option<&str>,
        is_trusted: Option<bool>,
    ) -> Result<()> {
        if name.is_none() && is_trusted.is_none() {
            return Ok(());
        }
        self.conn.execute(
            "UPDATE devices SET
                 name = COALESCE(?2, name),
                 is_trusted = COALESCE(?3, is_trusted)
             WHERE mac = ?1",
            params![mac, name, is_trusted.map(|t| t as i64)],
        )?;
        Ok(())
    }

    pub fn get_device(&self, mac: &str) -> Result<Option<Device>> {
        let device = self
            .conn
            .query_row(
                "SELECT mac, name, is_trusted, first_seen, last_seen FROM devices WHERE mac = ?",
                params![mac],
                map_device,
            )
            .optional()?;
        Ok(device)
    }

    pub fn get_all_devices(&self, is_trusted: Option<bool>) -> Result<Vec<Device>> {
        let (sql, filter) = match is_trusted {
            None => (
                "SELECT mac, name, is_trusted, first_seen, last_seen FROM devices
                 ORDER BY last_seen DESC",
                None,
            ),
            Some(t) => (
                "SELECT mac, name, is_trusted, first_seen, last_seen FROM devices
                 WHERE is_trusted = ? ORDER BY last_seen DESC",
                Some(t as i64),
            ),
        };

        let mut stmt = self.conn.prepare(sql)?;
        let devices = match filter {
            None => stmt
                .query_map([], map_device)?
                .collect::<Result<Vec<_>, _>>()?,
            Some(t) => stmt
                .query_map(params![t], map_device)?
                .collect::<Result<Vec<_>, _>>()?,
        };
        Ok(devices)
    }

    /// MACs the OUI resolver seeds as trusted-device entries at startup.
    pub fn get_trusted_devices(&self) -> Result<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT mac FROM devices WHERE is_trusted = 1")?;
        let macs = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(macs)
    }

    // ── Fingerprints ────────────────────────────────────────────────────

    /// Insert with count 1, or bump `last_seen` and `sighting_count`. The
    /// sentinel is skipped; callers needing pre-update state must have read
    /// it already.
    pub fn upsert_fingerprint(&self, fingerprint_id: &str, ie_data: Option<&str>) -> Result<()> {
        if fingerprint_id == NO_STABLE_IES {
            return Ok(());
        }
        upsert_fingerprint_row(&self.conn, fingerprint_id, ie_data, &now_string())
    }

    pub fn get_fingerprint(&self, fingerprint_id: &str) -> Result<Option<Fingerprint>> {
        fetch_fingerprint(&self.conn, fingerprint_id)
    }

    pub fn list_fingerprints(&self, limit: u32, offset: u32) -> Result<(Vec<Fingerprint>, i64)> {
        let total: i64 =
            self.conn
                .query_row("SELECT COUNT(*) FROM device_fingerprints", [], |row| {
                    row.get(0)
                })?;

        let mut stmt = self.conn.prepare(
            "SELECT fingerprint_id, identity_id, ie_data, first_seen, last_seen,
                    sighting_count, notification_enabled
             FROM device_fingerprints
             ORDER BY sighting_count DESC
             LIMIT ? OFFSET ?",
        )?;
        let fingerprints = stmt
            .query_map(params![limit, offset], map_fingerprint)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok((fingerprints, total))
    }

    /// Distinct SSIDs a fingerprint has probed for, broadcast probes
    /// excluded. Consumed by the read surface as the identity's
    /// `ssid_signature`.
    pub fn fingerprint_ssid_signature(&self, fingerprint_id: &str) -> Result<Vec<String>> {
        let mut stmt = self.conn.prepare(
            "SELECT DISTINCT ssid FROM sightings
             WHERE ie_fingerprint = ? AND ssid != 'Undirected Probe'
             ORDER BY ssid",
        )?;
        let ssids = stmt
            .query_map(params![fingerprint_id], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(ssids)
    }

    /// Silence a fingerprint (bot/CLI "stop notifying me about this one").
    pub fn disable_fingerprint_notifications(&self, fingerprint_id: &str) -> Result<()> {
        self.conn.execute(
            "UPDATE device_fingerprints SET notification_enabled = 0 WHERE fingerprint_id = ?",
            params![fingerprint_id],
        )?;
        Ok(())
    }

    /// Label a fingerprint: update its identity's alias, or create an
    /// identity sharing the fingerprint's id and link it. Returns the
    /// identity id. Repeated calls with the same alias are idempotent.
    pub fn set_fingerprint_alias(&mut self, fingerprint_id: &str, alias: &str) -> Result<String> {
        let now = now_string();
        let tx = self.conn.transaction()?;

        let existing: Option<Option<String>> = tx
            .query_row(
                "SELECT identity_id FROM device_fingerprints WHERE fingerprint_id = ?",
                params![fingerprint_id],
                |row| row.get(0),
            )
            .optional()?;

        let identity_id = match existing.flatten() {
            Some(identity_id) => {
                tx.execute(
                    "UPDATE device_identities SET alias = ?, alias_set_at = ? WHERE identity_id = ?",
                    params![alias, now, identity_id],
                )?;
                identity_id
            }
            None => {
                tx.execute(
                    "INSERT INTO device_identities
                         (identity_id, alias, alias_set_at, first_seen, last_seen, total_sightings)
                     VALUES (?1, ?2, ?3, ?3, ?3, 0)",
                    params![fingerprint_id, alias, now],
                )?;
                tx.execute(
                    "UPDATE device_fingerprints SET identity_id = ?1 WHERE fingerprint_id = ?1",
                    params![fingerprint_id],
                )?;
                fingerprint_id.to_string()
            }
        };

        tx.commit()?;
        Ok(identity_id)
    }

    // ── Sightings ───────────────────────────────────────────────────────

    /// Persist one accepted probe. Runs as a single transaction:
    ///
    /// 1. device upsert,
    /// 2. read the current fingerprint row, then upsert it — in that order,
    ///    because the arrival gate needs the pre-update `last_seen` and
    ///    `sighting_count`,
    /// 3. insert the sighting row.
    ///
    /// Returns the pre-update fingerprint snapshot (None the first time a
    /// fingerprint is seen).
    pub fn log_sighting(&mut self, record: &SightingRecord) -> Result<Option<Fingerprint>> {
        let now = now_string();
        let tx = self.conn.transaction()?;

        upsert_device(&tx, &record.mac, &now)?;

        let fingerprint_id = record
            .ie_fingerprint
            .as_deref()
            .filter(|fp| *fp != NO_STABLE_IES);

        let mut old_fingerprint = None;
        if let Some(fp) = fingerprint_id {
            old_fingerprint = fetch_fingerprint(&tx, fp)?;
            upsert_fingerprint_row(&tx, fp, record.ie_data.as_deref(), &now)?;
        }

        tx.execute(
            "INSERT INTO sightings (timestamp, mac, rssi, dbm, ssid, oui, ie_fingerprint)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
            params![
                now,
                record.mac,
                format!("{} dBm", record.dbm),
                record.dbm,
                record.ssid,
                record.oui,
                fingerprint_id,
            ],
        )?;

        tx.commit()?;
        Ok(old_fingerprint)
    }

    pub fn get_sightings(
        &self,
        mac: Option<&str>,
        limit: u32,
        offset: u32,
        ascending: bool,
    ) -> Result<(Vec<Sighting>, i64)> {
        let order = if ascending { "ASC" } else { "DESC" };
        let (total, sightings) = match mac {
            Some(mac) => {
                let total: i64 = self.conn.query_row(
                    "SELECT COUNT(*) FROM sightings WHERE mac = ?",
                    params![mac],
                    |row| row.get(0),
                )?;
                let mut stmt = self.conn.prepare(&format!(
                    "SELECT id, timestamp, mac, rssi, dbm, ssid, oui, ie_fingerprint, identity_id
                     FROM sightings WHERE mac = ?
                     ORDER BY timestamp {} LIMIT ? OFFSET ?",
                    order
                ))?;
                let rows = stmt
                    .query_map(params![mac, limit, offset], map_sighting)?
                    .collect::<Result<Vec<_>, _>>()?;
                (total, rows)
            }
            None => {
                let total: i64 =
                    self.conn
                        .query_row("SELECT COUNT(*) FROM sightings", [], |row| row.get(0))?;
                let mut stmt = self.conn.prepare(&format!(
                    "SELECT id, timestamp, mac, rssi, dbm, ssid, oui, ie_fingerprint, identity_id
                     FROM sightings
                     ORDER BY timestamp {} LIMIT ? OFFSET ?",
                    order
                ))?;
                let rows = stmt
                    .query_map(params![limit, offset], map_sighting)?
                    .collect::<Result<Vec<_>, _>>()?;
                (total, rows)
            }
        };
        Ok((sightings, total))
    }

    pub fn get_recent_sightings(&self, limit: u32) -> Result<Vec<Sighting>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, timestamp, mac, rssi, dbm, ssid, oui, ie_fingerprint, identity_id
             FROM sightings ORDER BY timestamp DESC LIMIT ?",
        )?;
        let sightings = stmt
            .query_map(params![limit], map_sighting)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(sightings)
    }

    // ── Identities ──────────────────────────────────────────────────────

    /// Create a logical device and link the listed fingerprints to it.
    /// Errors if the identity already exists.
    pub fn create_identity(
        &mut self,
        identity_id: &str,
        alias: Option<&str>,
        fingerprint_ids: &[String],
    ) -> Result<Identity> {
        let now = now_string();
        let tx = self.conn.transaction()?;

        tx.execute(
            "INSERT INTO device_identities
                 (identity_id, alias, alias_set_at, first_seen, last_seen, total_sightings)
             VALUES (?1, ?2, ?3, ?4, ?4, 0)",
            params![identity_id, alias, alias.map(|_| now.as_str()), now],
        )?;

        for fingerprint_id in fingerprint_ids {
            tx.execute(
                "UPDATE device_fingerprints SET identity_id = ? WHERE fingerprint_id = ?",
                params![identity_id, fingerprint_id],
            )?;
        }

        let identity = tx.query_row(
            "SELECT identity_id, alias, alias_set_at, ssid_signature,
                    first_seen, last_seen, total_sightings
             FROM device_identities WHERE identity_id = ?",
            params![identity_id],
            map_identity,
        )?;

        tx.commit()?;
        Ok(identity)
    }

    /// Rename an identity. None when no such identity exists.
    pub fn update_alias(&self, identity_id: &str, alias: &str) -> Result<Option<Identity>> {
        let changed = self.conn.execute(
            "UPDATE device_identities SET alias = ?, alias_set_at = ? WHERE identity_id = ?",
            params![alias, now_string(), identity_id],
        )?;
        if changed == 0 {
            return Ok(None);
        }
        self.get_identity(identity_id)
    }

    pub fn get_identity(&self, identity_id: &str) -> Result<Option<Identity>> {
        let identity = self
            .conn
            .query_row(
                "SELECT identity_id, alias, alias_set_at, ssid_signature,
                        first_seen, last_seen, total_sightings
                 FROM device_identities WHERE identity_id = ?",
                params![identity_id],
                map_identity,
            )
            .optional()?;
        Ok(identity)
    }

    pub fn get_all_identities(&self) -> Result<Vec<Identity>> {
        let mut stmt = self.conn.prepare(
            "SELECT identity_id, alias, alias_set_at, ssid_signature,
                    first_seen, last_seen, total_sightings
             FROM device_identities ORDER BY last_seen DESC",
        )?;
        let identities = stmt
            .query_map([], map_identity)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(identities)
    }

    /// Point a fingerprint at an identity. Any previous link is overwritten
    /// without history.
    pub fn link_fingerprint(&self, fingerprint_id: &str, identity_id: &str) -> Result<()> {
        self.conn.execute(
            "UPDATE device_fingerprints SET identity_id = ? WHERE fingerprint_id = ?",
            params![identity_id, fingerprint_id],
        )?;
        Ok(())
    }

    // ── Stats ───────────────────────────────────────────────────────────

    pub fn count_devices(&self) -> Result<i64> {
        Ok(self
            .conn
            .query_row("SELECT COUNT(*) FROM devices", [], |row| row.get(0))?)
    }

    pub fn count_sightings(&self) -> Result<i64> {
        Ok(self
            .conn
            .query_row("SELECT COUNT(*) FROM sightings", [], |row| row.get(0))?)
    }

    pub fn count_fingerprints(&self) -> Result<i64> {
        Ok(self
            .conn
            .query_row("SELECT COUNT(*) FROM device_fingerprints", [], |row| {
                row.get(0)
            })?)
    }

    pub fn count_identities(&self) -> Result<i64> {
        Ok(self
            .conn
            .query_row("SELECT COUNT(*) FROM device_identities", [], |row| {
                row.get(0)
            })?)
    }

    /// Sightings carrying the given fingerprint; pairs with
    /// `Fingerprint::sighting_count` in the consistency tests.
    #[cfg(test)]
    pub(crate) fn count_sightings_for_fingerprint(&self, fingerprint_id: &str) -> Result<i64> {
        Ok(self.conn.query_row(
            "SELECT COUNT(*) FROM sightings WHERE ie_fingerprint = ?",
            params![fingerprint_id],
            |row| row.get(0),
        )?)
    }

    #[cfg(test)]
    pub(crate) fn set_fingerprint_last_seen(&self, fingerprint_id: &str, ts: &str) -> Result<()> {
        self.conn.execute(
            "UPDATE device_fingerprints SET last_seen = ? WHERE fingerprint_id = ?",
            params![ts, fingerprint_id],
        )?;
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn set_fingerprint_count(&self, fingerprint_id: &str, count: i64) -> Result<()> {
        self.conn.execute(
            "UPDATE device_fingerprints SET sighting_count = ? WHERE fingerprint_id = ?",
            params![count, fingerprint_id],
        )?;
        Ok(())
    }
}

fn upsert_device(conn: &Connection, mac: &str, now: &str) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO devices (mac, first_seen, last_seen, is_trusted)
         VALUES (?1, ?2, ?2, 0)
         ON CONFLICT(mac) DO UPDATE SET last_seen = ?2",
        params![mac, now],
    )?;
    Ok(())
}

fn upsert_fingerprint_row(
    conn: &Connection,
    fingerprint_id: &str,
    ie_data: Option<&str>,
    now: &str,
) -> Result<()> {
    conn.execute(
        "INSERT INTO device_fingerprints
             (fingerprint_id, ie_data, first_seen, last_seen, sighting_count)
         VALUES (?1, ?2, ?3, ?3, 1)
         ON CONFLICT(fingerprint_id) DO UPDATE SET
             last_seen = ?3,
             sighting_count = sighting_count + 1",
        params![fingerprint_id, ie_data, now],
    )?;
    Ok(())
}

fn fetch_fingerprint(conn: &Connection, fingerprint_id: &str) -> Result<Option<Fingerprint>> {
    let fingerprint = conn
        .query_row(
            "SELECT fingerprint_id, identity_id, ie_data, first_seen, last_seen,
                    sighting_count, notification_enabled
             FROM device_fingerprints WHERE fingerprint_id = ?",
            params![fingerprint_id],
            map_fingerprint,
        )
        .optional()?;
    Ok(fingerprint)
}

fn map_device(row: &rusqlite::Row<'_>) -> rusqlite::Result<Device> {
    Ok(Device {
        mac: row.get(0)?,
        name: row.get(1)?,
        is_trusted: row.get::<_, i64>(2)? != 0,
        first_seen: row.get(3)?,
        last_seen: row.get(4)?,
    })
}

fn map_sighting(row: &rusqlite::Row<'_>) -> rusqlite::Result<Sighting> {
    Ok(Sighting {
        id: row.get(0)?,
        timestamp: row.get(1)?,
        mac: row.get(2)?,
        rssi: row.get(3)?,
        dbm: row.get(4)?,
        ssid: row.get(5)?,
        oui: row.get(6)?,
        ie_fingerprint: row.get(7)?,
        identity_id: row.get(8)?,
    })
}

fn map_fingerprint(row: &rusqlite::Row<'_>) -> rusqlite::Result<Fingerprint> {
    Ok(Fingerprint {
        fingerprint_id: row.get(0)?,
        identity_id: row.get(1)?,
        ie_data: row.get(2)?,
        first_seen: row.get(3)?,
        last_seen: row.get(4)?,
        sighting_count: row.get(5)?,
        notification_enabled: row.get::<_, Option<i64>>(6)?.unwrap_or(1) != 0,
    })
}

fn map_identity(row: &rusqlite::Row<'_>) -> rusqlite::Result<Identity> {
    Ok(Identity {
        identity_id: row.get(0)?,
        alias: row.get(1)?,
        alias_set_at: row.get(2)?,
        ssid_signature: row.get(3)?,
        first_seen: row.get(4)?,
        last_seen: row.get(5)?,
        total_sightings: row.get(6)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(mac: &str, fingerprint: Option<&str>) -> SightingRecord {
        SightingRecord {
            mac: mac.to_string(),
            dbm: -60,
            ssid: "Undirected Probe".to_string(),
            oui: "Unknown OUI".to_string(),
            ie_fingerprint: fingerprint.map(|f| f.to_string()),
            ie_data: fingerprint.map(|_| "[]".to_string()),
        }
    }

    #[test]
    fn log_sighting_returns_old_snapshot() {
        let mut db = Database::open_in_memory().unwrap();
        let rec = record("aa:bb:cc:11:22:33", Some("abcdef0123456789"));

        // First sighting: no prior row.
        assert!(db.log_sighting(&rec).unwrap().is_none());

        // Second: snapshot from before the upsert.
        let old = db.log_sighting(&rec).unwrap().unwrap();
        assert_eq!(old.sighting_count, 1);
        assert!(old.notification_enabled);

        let old = db.log_sighting(&rec).unwrap().unwrap();
        assert_eq!(old.sighting_count, 2);

        let current = db.get_fingerprint("abcdef0123456789").unwrap().unwrap();
        assert_eq!(current.sighting_count, 3);
    }

    #[test]
    fn sighting_count_matches_sighting_rows() {
        let mut db = Database::open_in_memory().unwrap();
        let fp = "abcdef0123456789";

        for _ in 0..4 {
            db.log_sighting(&record("aa:bb:cc:11:22:33", Some(fp))).unwrap();
        }
        // Sentinel-free sightings don't count against the fingerprint.
        db.log_sighting(&record("aa:bb:cc:11:22:33", None)).unwrap();

        let row = db.get_fingerprint(fp).unwrap().unwrap();
        assert_eq!(row.sighting_count, 4);
        assert_eq!(db.count_sightings_for_fingerprint(fp).unwrap(), 4);
        assert_eq!(db.count_sightings().unwrap(), 5);
    }

    #[test]
    fn fingerprintless_sighting_stores_null() {
        let mut db = Database::open_in_memory().unwrap();
        db.log_sighting(&record("aa:bb:cc:11:22:33", None)).unwrap();

        let (sightings, total) = db.get_sightings(None, 10, 0, false).unwrap();
        assert_eq!(total, 1);
        assert!(sightings[0].ie_fingerprint.is_none());
        assert_eq!(db.count_fingerprints().unwrap(), 0);
    }

    #[test]
    fn sentinel_fingerprint_is_never_persisted() {
        let db = Database::open_in_memory().unwrap();
        db.upsert_fingerprint(NO_STABLE_IES, None).unwrap();
        assert_eq!(db.count_fingerprints().unwrap(), 0);
    }

    #[test]
    fn standalone_upserts() {
        let db = Database::open_in_memory().unwrap();

        db.update_device_last_seen("aa:bb:cc:11:22:33").unwrap();
        db.update_device_last_seen("aa:bb:cc:11:22:33").unwrap();
        assert_eq!(db.count_devices().unwrap(), 1);

        db.upsert_fingerprint("abcdef0123456789", Some("[]")).unwrap();
        db.upsert_fingerprint("abcdef0123456789", Some("[]")).unwrap();
        let row = db.get_fingerprint("abcdef0123456789").unwrap().unwrap();
        assert_eq!(row.sighting_count, 2);
        assert_eq!(row.ie_data.as_deref(), Some("[]"));
        assert!(db.get_fingerprint("ffffffffffffffff").unwrap().is_none());
    }

    #[test]
    fn device_first_seen_is_immutable() {
        let mut db = Database::open_in_memory().unwrap();
        let mac = "aa:bb:cc:11:22:33";

        db.log_sighting(&record(mac, None)).unwrap();
        let first = db.get_device(mac).unwrap().unwrap();

        db.log_sighting(&record(mac, None)).unwrap();
        let second = db.get_device(mac).unwrap().unwrap();

        assert_eq!(first.first_seen, second.first_seen);
        assert!(second.last_seen >= first.last_seen);
        assert!(!second.is_trusted);

        // Device span brackets every sighting timestamp.
        let (sightings, _) = db.get_sightings(Some(mac), 10, 0, true).unwrap();
        assert!(sightings
            .iter()
            .all(|s| second.first_seen <= s.timestamp && s.timestamp <= second.last_seen));
    }

    #[test]
    fn rssi_mirrors_dbm() {
        let mut db = Database::open_in_memory().unwrap();
        db.log_sighting(&record("aa:bb:cc:11:22:33", None)).unwrap();
        let (sightings, _) = db.get_sightings(None, 1, 0, false).unwrap();
        assert_eq!(sightings[0].dbm, Some(-60));
        assert_eq!(sightings[0].rssi.as_deref(), Some("-60 dBm"));
    }

    #[test]
    fn migrates_legacy_store_in_place() {
        // A store from before fingerprinting: no ie_fingerprint/identity_id
        // on sightings, no notification_enabled on fingerprints.
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE devices (
                 mac TEXT PRIMARY KEY, name TEXT, is_trusted INTEGER DEFAULT 0,
                 first_seen TEXT NOT NULL, last_seen TEXT NOT NULL);
             CREATE TABLE sightings (
                 id INTEGER PRIMARY KEY AUTOINCREMENT, timestamp TEXT NOT NULL,
                 mac TEXT NOT NULL, rssi TEXT, dbm INTEGER, ssid TEXT, oui TEXT);
             INSERT INTO devices VALUES ('aa:bb:cc:11:22:33', NULL, 0,
                 '2024-01-01 00:00:00', '2024-01-01 00:00:00');
             INSERT INTO sightings (timestamp, mac, rssi, dbm, ssid, oui)
                 VALUES ('2024-01-01 00:00:00', 'aa:bb:cc:11:22:33',
                         '-60 dBm', -60, 'Undirected Probe', 'Unknown OUI');",
        )
        .unwrap();

        let mut db = Database::attach(conn).unwrap();

        // Old rows survive with NULL in the new columns.
        let (sightings, total) = db.get_sightings(None, 10, 0, false).unwrap();
        assert_eq!(total, 1);
        assert!(sightings[0].ie_fingerprint.is_none());

        // New writes use the migrated columns.
        db.log_sighting(&record("aa:bb:cc:11:22:33", Some("abcdef0123456789")))
            .unwrap();
        let row = db.get_fingerprint("abcdef0123456789").unwrap().unwrap();
        assert!(row.notification_enabled);
    }

    #[test]
    fn initialize_is_idempotent() {
        let db = Database::open_in_memory().unwrap();
        db.initialize().unwrap();
        db.initialize().unwrap();
        assert_eq!(db.count_devices().unwrap(), 0);
    }

    #[test]
    fn trusted_device_listing() {
        let db = Database::open_in_memory().unwrap();
        db.add_device("aa:bb:cc:11:22:33", Some("My Phone"), true).unwrap();
        db.add_device("de:ad:be:ef:00:01", None, false).unwrap();

        assert_eq!(
            db.get_trusted_devices().unwrap(),
            vec!["aa:bb:cc:11:22:33".to_string()]
        );

        let trusted = db.get_all_devices(Some(true)).unwrap();
        assert_eq!(trusted.len(), 1);
        assert_eq!(trusted[0].name.as_deref(), Some("My Phone"));

        // COALESCE keeps the name when re-adding without one.
        db.add_device("aa:bb:cc:11:22:33", None, true).unwrap();
        let device = db.get_device("aa:bb:cc:11:22:33").unwrap().unwrap();
        assert_eq!(device.name.as_deref(), Some("My Phone"));
    }

    #[test]
    fn update_device_fields() {
        let db = Database::open_in_memory().unwrap();
        db.add_device("aa:bb:cc:11:22:33", None, false).unwrap();

        db.update_device("aa:bb:cc:11:22:33", Some("Tablet"), Some(true))
            .unwrap();
        let device = db.get_device("aa:bb:cc:11:22:33").unwrap().unwrap();
        assert_eq!(device.name.as_deref(), Some("Tablet"));
        assert!(device.is_trusted);

        // No-op update leaves the row alone.
        db.update_device("aa:bb:cc:11:22:33", None, None).unwrap();
        let device = db.get_device("aa:bb:cc:11:22:33").unwrap().unwrap();
        assert_eq!(device.name.as_deref(), Some("Tablet"));
    }

    #[test]
    fn alias_creates_identity_named_after_fingerprint() {
        let mut db = Database::open_in_memory().unwrap();
        let fp = "abcdef0123456789";
        db.log_sighting(&record("aa:bb:cc:11:22:33", Some(fp))).unwrap();

        let identity_id = db.set_fingerprint_alias(fp, "Kitchen Tablet").unwrap();
        assert_eq!(identity_id, fp);

        let identity = db.get_identity(fp).unwrap().unwrap();
        assert_eq!(identity.alias.as_deref(), Some("Kitchen Tablet"));
        assert!(identity.alias_set_at.is_some());

        let row = db.get_fingerprint(fp).unwrap().unwrap();
        assert_eq!(row.identity_id.as_deref(), Some(fp));

        // Second call updates the alias in place.
        let again = db.set_fingerprint_alias(fp, "Kitchen Tablet").unwrap();
        assert_eq!(again, fp);
        assert_eq!(db.count_identities().unwrap(), 1);

        let renamed = db.set_fingerprint_alias(fp, "Guest Tablet").unwrap();
        assert_eq!(renamed, fp);
        let identity = db.get_identity(fp).unwrap().unwrap();
        assert_eq!(identity.alias.as_deref(), Some("Guest Tablet"));
    }

    #[test]
    fn silencing_survives_upserts() {
        let mut db = Database::open_in_memory().unwrap();
        let fp = "abcdef0123456789";
        db.log_sighting(&record("aa:bb:cc:11:22:33", Some(fp))).unwrap();

        db.disable_fingerprint_notifications(fp).unwrap();
        db.log_sighting(&record("aa:bb:cc:11:22:33", Some(fp))).unwrap();

        let row = db.get_fingerprint(fp).unwrap().unwrap();
        assert!(!row.notification_enabled);
        assert_eq!(row.sighting_count, 2);
    }

    #[test]
    fn identity_lifecycle() {
        let mut db = Database::open_in_memory().unwrap();
        let fp = "abcdef0123456789";
        db.log_sighting(&record("aa:bb:cc:11:22:33", Some(fp))).unwrap();

        let identity = db
            .create_identity("phone-1", Some("My Phone"), &[fp.to_string()])
            .unwrap();
        assert_eq!(identity.identity_id, "phone-1");
        assert_eq!(identity.alias.as_deref(), Some("My Phone"));

        let row = db.get_fingerprint(fp).unwrap().unwrap();
        assert_eq!(row.identity_id.as_deref(), Some("phone-1"));

        // Duplicate ids are rejected.
        assert!(db.create_identity("phone-1", None, &[]).is_err());

        // Zero-linked identities are fine (pre-labeling).
        db.create_identity("laptop-1", None, &[]).unwrap();
        assert_eq!(db.get_all_identities().unwrap().len(), 2);

        // Relinking overwrites silently.
        db.link_fingerprint(fp, "laptop-1").unwrap();
        let row = db.get_fingerprint(fp).unwrap().unwrap();
        assert_eq!(row.identity_id.as_deref(), Some("laptop-1"));

        let renamed = db.update_alias("laptop-1", "Work Laptop").unwrap().unwrap();
        assert_eq!(renamed.alias.as_deref(), Some("Work Laptop"));
        assert!(db.update_alias("missing", "x").unwrap().is_none());
    }

    #[test]
    fn sighting_pagination() {
        let mut db = Database::open_in_memory().unwrap();
        for _ in 0..5 {
            db.log_sighting(&record("aa:bb:cc:11:22:33", None)).unwrap();
        }
        db.log_sighting(&record("de:ad:be:ef:00:01", None)).unwrap();

        let (page, total) = db.get_sightings(None, 4, 0, false).unwrap();
        assert_eq!(total, 6);
        assert_eq!(page.len(), 4);

        let (page, total) = db.get_sightings(None, 4, 4, false).unwrap();
        assert_eq!(total, 6);
        assert_eq!(page.len(), 2);

        let (page, total) = db.get_sightings(Some("de:ad:be:ef:00:01"), 10, 0, true).unwrap();
        assert_eq!(total, 1);
        assert_eq!(page[0].mac, "de:ad:be:ef:00:01");

        assert_eq!(db.get_recent_sightings(3).unwrap().len(), 3);
    }

    #[test]
    fn ssid_signature_skips_broadcast_probes() {
        let mut db = Database::open_in_memory().unwrap();
        let fp = "abcdef0123456789";

        let mut rec = record("aa:bb:cc:11:22:33", Some(fp));
        rec.ssid = "HomeNet".to_string();
        db.log_sighting(&rec).unwrap();
        rec.ssid = "CoffeeShop".to_string();
        db.log_sighting(&rec).unwrap();
        rec.ssid = "Undirected Probe".to_string();
        db.log_sighting(&rec).unwrap();
        rec.ssid = "HomeNet".to_string();
        db.log_sighting(&rec).unwrap();

        assert_eq!(
            db.fingerprint_ssid_signature(fp).unwrap(),
            vec!["CoffeeShop".to_string(), "HomeNet".to_string()]
        );
    }

    #[test]
    fn fingerprint_listing_orders_by_count() {
        let mut db = Database::open_in_memory().unwrap();
        let busy = "aaaaaaaaaaaaaaaa";
        let quiet = "bbbbbbbbbbbbbbbb";

        for _ in 0..3 {
            db.log_sighting(&record("aa:bb:cc:11:22:33", Some(busy))).unwrap();
        }
        db.log_sighting(&record("de:ad:be:ef:00:01", Some(quiet))).unwrap();

        let (rows, total) = db.list_fingerprints(10, 0).unwrap();
        assert_eq!(total, 2);
        assert_eq!(rows[0].fingerprint_id, busy);
        assert_eq!(rows[0].sighting_count, 3);
        assert_eq!(rows[1].fingerprint_id, quiet);
    }
}
