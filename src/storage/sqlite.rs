use crate::config::PHOTO_SLOTS;
use crate::error::StoreError;
use crate::models::{AssetRef, Candidate, TIMESTAMP_FORMAT};
use crate::storage::{is_valid_table_name, PersistenceSink, TableStats};
use chrono::NaiveDateTime;
use rusqlite::{params_from_iter, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info, warn};

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        info!("🗄 Opened listing store at {}", path.display());
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Ok(Self {
            conn: Mutex::new(Connection::open_in_memory()?),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }

    /// Add photo slot columns missing from tables created by older versions.
    fn add_missing_photo_columns(conn: &Connection, table: &str) -> Result<(), StoreError> {
        let mut stmt = conn.prepare(&format!("PRAGMA table_info({table})"))?;
        let columns: Vec<String> = stmt
            .query_map([], |row| row.get::<_, String>(1))?
            .collect::<Result<_, _>>()?;

        for slot in 1..=PHOTO_SLOTS {
            let column = format!("Photo{slot}");
            if !columns.iter().any(|c| c.eq_ignore_ascii_case(&column)) {
                conn.execute(&format!("ALTER TABLE {table} ADD COLUMN {column} TEXT"), [])?;
                debug!("Added column {} to {}", column, table);
            }
        }
        Ok(())
    }
}

fn checked(table: &str) -> Result<&str, StoreError> {
    if is_valid_table_name(table) {
        Ok(table)
    } else {
        Err(StoreError::InvalidTable(table.to_string()))
    }
}

fn photo_columns() -> String {
    (1..=PHOTO_SLOTS)
        .map(|slot| format!("Photo{slot}"))
        .collect::<Vec<_>>()
        .join(", ")
}

fn row_to_candidate(row: &Row<'_>) -> rusqlite::Result<Candidate> {
    let mut photo_assets = Vec::new();
    for slot in 1..=PHOTO_SLOTS {
        let path: Option<String> = row.get(format!("Photo{slot}").as_str())?;
        if let Some(path) = path.filter(|p| !p.is_empty()) {
            photo_assets.push(AssetRef::from_stored_path(&path));
        }
    }

    let created_at: Option<String> = row.get("CreatedAt")?;
    let published_at = created_at
        .as_deref()
        .and_then(|s| NaiveDateTime::parse_from_str(s, TIMESTAMP_FORMAT).ok())
        .unwrap_or_default();

    Ok(Candidate {
        id: row.get::<_, i64>("ID")? as u64,
        description: row.get::<_, Option<String>>("Description")?.unwrap_or_default(),
        address: row.get::<_, Option<String>>("Address")?.unwrap_or_default(),
        price: row.get::<_, Option<i64>>("Price")?.unwrap_or_default(),
        phone: row.get("Phone")?,
        floor: row.get::<_, Option<i64>>("Floor")?.unwrap_or_default(),
        floors_count: row.get::<_, Option<i64>>("FloorsCount")?.unwrap_or_default(),
        rooms: row.get::<_, Option<i64>>("Rooms")?.unwrap_or_default(),
        area: row.get::<_, Option<f64>>("Area")?.unwrap_or_default(),
        published_at,
        photo_assets,
        posted: row.get::<_, Option<bool>>("Posted")?.unwrap_or(false),
    })
}

impl PersistenceSink for SqliteStore {
    fn ensure_table(&self, table: &str) -> Result<(), StoreError> {
        let table = checked(table)?;
        let conn = self.conn()?;
        let slots = (1..=PHOTO_SLOTS)
            .map(|slot| format!("Photo{slot} TEXT"))
            .collect::<Vec<_>>()
            .join(", ");
        conn.execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS {table} (
                ID INTEGER PRIMARY KEY NOT NULL,
                Description TEXT, Address TEXT, Price INT, Phone TEXT,
                Floor INT, FloorsCount INT, Rooms INT, Area REAL,
                {slots},
                Posted BOOLEAN DEFAULT 0,
                CreatedAt TEXT
            )"
        ))?;
        Self::add_missing_photo_columns(&conn, table)?;
        Ok(())
    }

    fn exists(&self, table: &str, id: u64) -> Result<bool, StoreError> {
        let table = checked(table)?;
        let conn = self.conn()?;
        let found = conn
            .query_row(
                &format!("SELECT 1 FROM {table} WHERE ID = ?1"),
                [id as i64],
                |_| Ok(()),
            )
            .optional()?;
        Ok(found.is_some())
    }

    fn insert_if_absent(&self, table: &str, candidate: &Candidate) -> Result<bool, StoreError> {
        let table = checked(table)?;
        let conn = self.conn()?;

        let mut values: Vec<rusqlite::types::Value> = vec![
            (candidate.id as i64).into(),
            candidate.description.clone().into(),
            candidate.address.clone().into(),
            candidate.price.into(),
            candidate.phone.clone().into(),
            candidate.floor.into(),
            candidate.floors_count.into(),
            candidate.rooms.into(),
            candidate.area.into(),
        ];
        let paths: Vec<String> = candidate
            .photo_paths()
            .map(|p| p.to_string_lossy().into_owned())
            .collect();
        for slot in 0..PHOTO_SLOTS {
            values.push(paths.get(slot).cloned().into());
        }
        values.push(candidate.posted.into());
        values.push(
            candidate
                .published_at
                .format(TIMESTAMP_FORMAT)
                .to_string()
                .into(),
        );

        let placeholders = (1..=values.len())
            .map(|i| format!("?{i}"))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "INSERT OR IGNORE INTO {table}
             (ID, Description, Address, Price, Phone, Floor, FloorsCount, Rooms, Area,
              {}, Posted, CreatedAt)
             VALUES ({placeholders})",
            photo_columns()
        );

        let affected = conn.execute(&sql, params_from_iter(values))?;
        if affected == 0 {
            debug!("Listing {} already stored in {}", candidate.id, table);
        }
        Ok(affected > 0)
    }

    fn mark_posted(&self, table: &str, id: u64) -> Result<bool, StoreError> {
        let table = checked(table)?;
        let conn = self.conn()?;
        let affected = conn.execute(
            &format!("UPDATE {table} SET Posted = 1 WHERE ID = ?1"),
            [id as i64],
        )?;
        if affected == 0 {
            warn!("⚠️ Listing {} not found in {}", id, table);
        }
        Ok(affected > 0)
    }

    fn unposted_since(
        &self,
        table: &str,
        since: NaiveDateTime,
        limit: usize,
    ) -> Result<Vec<Candidate>, StoreError> {
        let table = checked(table)?;
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT * FROM {table}
             WHERE Posted = 0 AND CreatedAt >= ?1
             ORDER BY CreatedAt DESC LIMIT ?2"
        ))?;
        let rows = stmt.query_map(
            rusqlite::params![since.format(TIMESTAMP_FORMAT).to_string(), limit as i64],
            row_to_candidate,
        )?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    fn clear_table(&self, table: &str) -> Result<usize, StoreError> {
        let table = checked(table)?;
        let conn = self.conn()?;
        let removed = conn.execute(&format!("DELETE FROM {table}"), [])?;
        info!("🧹 Cleared {} rows from {}", removed, table);
        Ok(removed)
    }

    fn table_stats(&self, table: &str) -> Result<TableStats, StoreError> {
        let table = checked(table)?;
        let conn = self.conn()?;
        let (total, posted): (i64, i64) = conn.query_row(
            &format!("SELECT COUNT(*), COALESCE(SUM(Posted = 1), 0) FROM {table}"),
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        Ok(TableStats {
            total: total as usize,
            posted: posted as usize,
            unposted: (total - posted) as usize,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use std::path::PathBuf;

    const TABLE: &str = "Apartments_Test";

    fn at(h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 6, 1)
            .unwrap()
            .and_hms_opt(h, m, 0)
            .unwrap()
    }

    fn candidate(id: u64, published_at: NaiveDateTime) -> Candidate {
        Candidate {
            id,
            description: format!("listing {id}"),
            address: "вул. Городоцька, буд. 1".to_string(),
            price: 15000,
            floor: 2,
            floors_count: 5,
            rooms: 2,
            area: 48.5,
            phone: Some("(093) 000 00 00".to_string()),
            published_at,
            photo_assets: vec![AssetRef::from_stored_path(&format!("photos/{id}_fx_1.jpg"))],
            posted: false,
        }
    }

    fn store() -> SqliteStore {
        let store = SqliteStore::open_in_memory().unwrap();
        store.ensure_table(TABLE).unwrap();
        store
    }

    #[test]
    fn test_insert_if_absent_is_idempotent() {
        let store = store();
        assert!(store.insert_if_absent(TABLE, &candidate(1, at(9, 0))).unwrap());

        let mut changed = candidate(1, at(10, 0));
        changed.price = 1;
        assert!(!store.insert_if_absent(TABLE, &changed).unwrap());

        let rows = store.unposted_since(TABLE, at(0, 0), 10).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].price, 15000);
        assert_eq!(rows[0].published_at, at(9, 0));
        assert_eq!(rows[0], candidate(1, at(9, 0)));
    }

    #[test]
    fn test_exists_and_mark_posted() {
        let store = store();
        assert!(!store.exists(TABLE, 5).unwrap());
        store.insert_if_absent(TABLE, &candidate(5, at(9, 0))).unwrap();
        assert!(store.exists(TABLE, 5).unwrap());

        assert!(store.mark_posted(TABLE, 5).unwrap());
        assert!(!store.mark_posted(TABLE, 6).unwrap());
        assert!(store.unposted_since(TABLE, at(0, 0), 10).unwrap().is_empty());
    }

    #[test]
    fn test_unposted_since_filters_orders_and_limits() {
        let store = store();
        store.insert_if_absent(TABLE, &candidate(1, at(8, 0))).unwrap();
        store.insert_if_absent(TABLE, &candidate(2, at(11, 30))).unwrap();
        store.insert_if_absent(TABLE, &candidate(3, at(11, 45))).unwrap();
        store.insert_if_absent(TABLE, &candidate(4, at(11, 10))).unwrap();

        let recent = store.unposted_since(TABLE, at(11, 0), 2).unwrap();
        let ids: Vec<u64> = recent.iter().map(|c| c.id).collect();
        assert_eq!(ids, vec![3, 2]);

        let all = store.unposted_since(TABLE, at(0, 0), 10).unwrap();
        assert_eq!(all.len(), 4);
        assert_eq!(all[3].id, 1);
    }

    #[test]
    fn test_photo_slots_round_trip_in_order() {
        let store = store();
        let mut c = candidate(9, at(9, 0));
        c.photo_assets = (1..=3)
            .map(|i| AssetRef::from_stored_path(&format!("photos/9_lg_{i}.jpg")))
            .collect();
        store.insert_if_absent(TABLE, &c).unwrap();

        let loaded = &store.unposted_since(TABLE, at(0, 0), 1).unwrap()[0];
        let paths: Vec<&PathBuf> = loaded.photo_paths().collect();
        assert_eq!(paths.len(), 3);
        assert_eq!(paths[2], &PathBuf::from("photos/9_lg_3.jpg"));
    }

    #[test]
    fn test_clear_and_stats() {
        let store = store();
        for id in 1..=3 {
            store.insert_if_absent(TABLE, &candidate(id, at(9, 0))).unwrap();
        }
        store.mark_posted(TABLE, 2).unwrap();

        assert_eq!(
            store.table_stats(TABLE).unwrap(),
            TableStats {
                total: 3,
                posted: 1,
                unposted: 2
            }
        );
        assert_eq!(store.clear_table(TABLE).unwrap(), 3);
        assert_eq!(store.table_stats(TABLE).unwrap(), TableStats::default());
    }

    #[test]
    fn test_rejects_unsafe_table_name() {
        let store = store();
        assert!(matches!(
            store.exists("x; DROP TABLE y", 1),
            Err(StoreError::InvalidTable(_))
        ));
    }

    #[test]
    fn test_file_store_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("listings.db");
        {
            let store = SqliteStore::open(&path).unwrap();
            store.ensure_table(TABLE).unwrap();
            store.insert_if_absent(TABLE, &candidate(11, at(9, 0))).unwrap();
        }
        let store = SqliteStore::open(&path).unwrap();
        store.ensure_table(TABLE).unwrap();
        assert!(store.exists(TABLE, 11).unwrap());
    }
}
