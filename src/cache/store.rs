//! Persistent tile store: a sqlite database holding a `tiles` table keyed by
//! the 64-bit tile key and a `preferences` table of string metadata.
//!
//! The layout is bit-compatible with legacy tile databases: `map.minZoom`,
//! `map.maxZoom` and `map.tileSideLength` plus optional coverage and
//! attribution keys.

use crate::core::geo::LatLngBounds;
use crate::core::projection::TileKey;
use crate::source::Attribution;
use crate::{Result, TileError};
use log::{debug, info, warn};
use rusqlite::{Connection, OpenFlags, OptionalExtension};
use std::path::Path;
use std::str::FromStr;
use std::sync::Mutex;

/// SQL run when opening a writable store.
///
/// Sets up WAL and a busy timeout, and raises the default cache size above
/// sqlite's conservative default.
const INITIAL_SQL: &str = r#"
PRAGMA busy_timeout = 1000;
PRAGMA cache_size = -10000;
PRAGMA journal_mode = WAL;
"#;

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS tiles (
    tile_key INTEGER PRIMARY KEY,
    image BLOB NOT NULL
);
CREATE TABLE IF NOT EXISTS preferences (
    name TEXT PRIMARY KEY,
    value TEXT
);
"#;

/// Preference key names shared with the legacy store format
pub mod pref {
    pub const MIN_ZOOM: &str = "map.minZoom";
    pub const MAX_ZOOM: &str = "map.maxZoom";
    pub const TILE_SIDE_LENGTH: &str = "map.tileSideLength";
    pub const COVERAGE_TOP_LEFT_LAT: &str = "map.coverage.topLeft.latitude";
    pub const COVERAGE_TOP_LEFT_LNG: &str = "map.coverage.topLeft.longitude";
    pub const COVERAGE_BOTTOM_RIGHT_LAT: &str = "map.coverage.bottomRight.latitude";
    pub const COVERAGE_BOTTOM_RIGHT_LNG: &str = "map.coverage.bottomRight.longitude";
    pub const SHORT_NAME: &str = "map.shortName";
    pub const SHORT_ATTRIBUTION: &str = "map.shortAttribution";
    pub const LONG_DESCRIPTION: &str = "map.longDescription";
    pub const LONG_ATTRIBUTION: &str = "map.longAttribution";
}

/// Typed view of a store's `preferences` table, populated by one validated
/// parse pass at open time. Missing or malformed keys become `None`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StoreMetadata {
    pub min_zoom: Option<u8>,
    pub max_zoom: Option<u8>,
    pub tile_side: Option<u32>,
    pub coverage: Option<LatLngBounds>,
    pub attribution: Attribution,
}

/// A persistent key/value tile store over a single serialized sqlite
/// connection. All reads and writes are mutually exclusive under one
/// connection-wide lock.
#[derive(Debug)]
pub struct TileStore {
    conn: Mutex<Connection>,
    writable: bool,
}

impl TileStore {
    /// Opens an existing store read-only. Fails with `StoreUnavailable` if
    /// the file does not exist or is not a sqlite database.
    pub fn open_read_only<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!("opening tile store (read-only) at {}", path.display());
        let conn = Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY)
            .map_err(|e| TileError::StoreUnavailable(format!("{}: {}", path.display(), e)))?;
        Ok(Self {
            conn: Mutex::new(conn),
            writable: false,
        })
    }

    /// Opens (creating if needed) a writable store, e.g. a remote source's
    /// offline tile cache.
    pub fn open_writable<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!("opening tile store (writable) at {}", path.display());
        let conn = Connection::open(path)
            .map_err(|e| TileError::StoreUnavailable(format!("{}: {}", path.display(), e)))?;
        Self::with_connection(conn)
    }

    /// Builds a writable store over an in-memory database. Used in tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| TileError::StoreUnavailable(e.to_string()))?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(INITIAL_SQL)?;
        conn.execute_batch(SCHEMA_SQL)?;
        Ok(Self {
            conn: Mutex::new(conn),
            writable: true,
        })
    }

    pub fn is_writable(&self) -> bool {
        self.writable
    }

    /// Reads one tile blob. `Ok(None)` means the store has no data for the
    /// key.
    pub fn read_tile(&self, key: TileKey) -> Result<Option<Vec<u8>>> {
        let conn = self.lock()?;
        let blob = conn
            .query_row(
                "SELECT image FROM tiles WHERE tile_key = ?1",
                [key as i64],
                |row| row.get::<_, Vec<u8>>(0),
            )
            .optional()?;
        Ok(blob)
    }

    /// Inserts or replaces one tile blob
    pub fn write_tile(&self, key: TileKey, bytes: &[u8]) -> Result<()> {
        if !self.writable {
            return Err(TileError::StoreUnavailable("store is read-only".into()));
        }
        let conn = self.lock()?;
        conn.execute(
            "INSERT OR REPLACE INTO tiles (tile_key, image) VALUES (?1, ?2)",
            rusqlite::params![key as i64, bytes],
        )?;
        debug!("stored tile key {} ({} bytes)", key, bytes.len());
        Ok(())
    }

    /// Removes one tile blob, e.g. after the cached bytes failed to decode
    pub fn delete_tile(&self, key: TileKey) -> Result<()> {
        if !self.writable {
            return Err(TileError::StoreUnavailable("store is read-only".into()));
        }
        let conn = self.lock()?;
        conn.execute("DELETE FROM tiles WHERE tile_key = ?1", [key as i64])?;
        Ok(())
    }

    pub fn tile_count(&self) -> Result<u64> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM tiles", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    /// Reads one preference value; absent keys yield `Ok(None)`
    pub fn preference(&self, name: &str) -> Result<Option<String>> {
        let conn = self.lock()?;
        let value = conn
            .query_row(
                "SELECT value FROM preferences WHERE name = ?1",
                [name],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        Ok(value)
    }

    pub fn set_preference(&self, name: &str, value: &str) -> Result<()> {
        if !self.writable {
            return Err(TileError::StoreUnavailable("store is read-only".into()));
        }
        let conn = self.lock()?;
        conn.execute(
            "INSERT OR REPLACE INTO preferences (name, value) VALUES (?1, ?2)",
            [name, value],
        )?;
        Ok(())
    }

    /// Parses the full `preferences` table into a typed metadata structure.
    /// Malformed values are logged and dropped rather than surfaced.
    pub fn metadata(&self) -> Result<StoreMetadata> {
        let min_zoom = self.parsed_preference::<u8>(pref::MIN_ZOOM)?;
        let max_zoom = self.parsed_preference::<u8>(pref::MAX_ZOOM)?;
        let tile_side = self.parsed_preference::<u32>(pref::TILE_SIDE_LENGTH)?;

        let tl_lat = self.parsed_preference::<f64>(pref::COVERAGE_TOP_LEFT_LAT)?;
        let tl_lng = self.parsed_preference::<f64>(pref::COVERAGE_TOP_LEFT_LNG)?;
        let br_lat = self.parsed_preference::<f64>(pref::COVERAGE_BOTTOM_RIGHT_LAT)?;
        let br_lng = self.parsed_preference::<f64>(pref::COVERAGE_BOTTOM_RIGHT_LNG)?;
        let coverage = match (tl_lat, tl_lng, br_lat, br_lng) {
            (Some(north), Some(west), Some(south), Some(east)) => {
                Some(LatLngBounds::from_coords(south, west, north, east))
            }
            _ => None,
        };

        let attribution = Attribution {
            short_name: self.preference(pref::SHORT_NAME)?,
            short_attribution: self.preference(pref::SHORT_ATTRIBUTION)?,
            long_description: self.preference(pref::LONG_DESCRIPTION)?,
            long_attribution: self.preference(pref::LONG_ATTRIBUTION)?,
        };

        Ok(StoreMetadata {
            min_zoom,
            max_zoom,
            tile_side,
            coverage,
            attribution,
        })
    }

    fn parsed_preference<T: FromStr>(&self, name: &str) -> Result<Option<T>> {
        match self.preference(name)? {
            Some(raw) => match raw.parse::<T>() {
                Ok(value) => Ok(Some(value)),
                Err(_) => {
                    warn!("malformed preference {}: {:?}", name, raw);
                    Ok(None)
                }
            },
            None => Ok(None),
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| TileError::StoreUnavailable("store lock poisoned".into()))
    }
}
