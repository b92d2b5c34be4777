use crate::models::{ColumnMapping, MappingError};
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use serde_json::Value;
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid column mapping: {0}")]
    Mapping(#[from] MappingError),
    #[error("profile {0} not found")]
    ProfileNotFound(i64),
    #[error("history entry {0} not found")]
    HistoryNotFound(i64),
    #[error("database lock poisoned")]
    Lock,
}

/// A named sheet target plus the column mapping used for it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Profile {
    pub id: i64,
    pub name: String,
    pub workbook_path: String,
    pub sheet_name: String,
    pub column_mapping: ColumnMapping,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HistoryStatus {
    Extracted,
    Saved,
    Failed,
}

impl HistoryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            HistoryStatus::Extracted => "extracted",
            HistoryStatus::Saved => "saved",
            HistoryStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "extracted" => Some(HistoryStatus::Extracted),
            "saved" => Some(HistoryStatus::Saved),
            "failed" => Some(HistoryStatus::Failed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistoryRecord {
    pub id: i64,
    pub created_at: String,
    pub extracted_data: Value,
    pub status: HistoryStatus,
    pub profile_id: Option<i64>,
    pub row_number: Option<u32>,
    pub error_message: Option<String>,
}

pub struct Db {
    conn: Mutex<Connection>,
}

impl Db {
    pub fn new(db_path: PathBuf) -> Result<Self, DbError> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(&db_path)?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self, DbError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, DbError> {
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS schema_version (
                version INTEGER PRIMARY KEY,
                applied_at TEXT DEFAULT CURRENT_TIMESTAMP
            );
            INSERT INTO schema_version (version) SELECT 1 WHERE NOT EXISTS (SELECT 1 FROM schema_version LIMIT 1);
            CREATE TABLE IF NOT EXISTS profiles (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL,
                workbook_path TEXT NOT NULL,
                sheet_name TEXT NOT NULL,
                column_mapping TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS history (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                created_at TEXT NOT NULL,
                extracted_data TEXT NOT NULL,
                status TEXT NOT NULL,
                profile_id INTEGER,
                row_number INTEGER,
                error_message TEXT,
                FOREIGN KEY (profile_id) REFERENCES profiles(id) ON DELETE SET NULL
            );
            CREATE INDEX IF NOT EXISTS idx_history_status ON history(status);
            ",
        )?;
        Ok(Db {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, DbError> {
        self.conn.lock().map_err(|_| DbError::Lock)
    }

    /// Insert (id = None) or replace a profile. The mapping must validate.
    pub fn save_profile(
        &self,
        id: Option<i64>,
        name: &str,
        workbook_path: &str,
        sheet_name: &str,
        column_mapping: &ColumnMapping,
    ) -> Result<i64, DbError> {
        column_mapping.validate()?;
        let mapping_json = serde_json::to_string(column_mapping)?;
        let now = chrono::Utc::now().to_rfc3339();
        let conn = self.conn()?;
        match id {
            Some(id) => {
                let changed = conn.execute(
                    "UPDATE profiles SET name = ?1, workbook_path = ?2, sheet_name = ?3, column_mapping = ?4, updated_at = ?5 WHERE id = ?6",
                    params![name, workbook_path, sheet_name, mapping_json, now, id],
                )?;
                if changed == 0 {
                    return Err(DbError::ProfileNotFound(id));
                }
                Ok(id)
            }
            None => {
                conn.execute(
                    "INSERT INTO profiles (name, workbook_path, sheet_name, column_mapping, updated_at) VALUES (?1, ?2, ?3, ?4, ?5)",
                    params![name, workbook_path, sheet_name, mapping_json, now],
                )?;
                Ok(conn.last_insert_rowid())
            }
        }
    }

    pub fn get_profile(&self, id: i64) -> Result<Profile, DbError> {
        let conn = self.conn()?;
        let row: Option<(i64, String, String, String, String)> = conn
            .query_row(
                "SELECT id, name, workbook_path, sheet_name, column_mapping FROM profiles WHERE id = ?1",
                params![id],
                |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?, r.get(4)?)),
            )
            .optional()?;
        let row = row.ok_or(DbError::ProfileNotFound(id))?;
        profile_from_row(row)
    }

    pub fn get_profiles(&self) -> Result<Vec<Profile>, DbError> {
        let conn = self.conn()?;
        let mut stmt =
            conn.prepare("SELECT id, name, workbook_path, sheet_name, column_mapping FROM profiles ORDER BY name, id")?;
        let rows = stmt
            .query_map([], |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?, r.get(4)?)))?
            .collect::<Result<Vec<(i64, String, String, String, String)>, _>>()?;
        rows.into_iter().map(profile_from_row).collect()
    }

    pub fn delete_profile(&self, id: i64) -> Result<(), DbError> {
        let conn = self.conn()?;
        let changed = conn.execute("DELETE FROM profiles WHERE id = ?1", params![id])?;
        if changed == 0 {
            return Err(DbError::ProfileNotFound(id));
        }
        Ok(())
    }

    pub fn add_history_record(
        &self,
        extracted_data: &Value,
        status: HistoryStatus,
        profile_id: Option<i64>,
        row_number: Option<u32>,
        error_message: Option<&str>,
    ) -> Result<i64, DbError> {
        let created_at = chrono::Utc::now().to_rfc3339();
        let data_str = serde_json::to_string(extracted_data)?;
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO history (created_at, extracted_data, status, profile_id, row_number, error_message) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![created_at, data_str, status.as_str(), profile_id, row_number, error_message],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Newest first, optionally filtered by status.
    pub fn get_history(&self, status: Option<HistoryStatus>) -> Result<Vec<HistoryRecord>, DbError> {
        let conn = self.conn()?;
        let base = "SELECT id, created_at, extracted_data, status, profile_id, row_number, error_message FROM history";
        let (sql, filter) = match status {
            Some(s) => (format!("{} WHERE status = ?1 ORDER BY id DESC", base), Some(s.as_str())),
            None => (format!("{} ORDER BY id DESC", base), None),
        };
        let mut stmt = conn.prepare(&sql)?;
        let rows = match filter {
            Some(f) => stmt.query_map(params![f], history_row)?.collect::<Result<Vec<_>, _>>()?,
            None => stmt.query_map([], history_row)?.collect::<Result<Vec<_>, _>>()?,
        };
        rows.into_iter().map(history_from_row).collect()
    }

    pub fn get_history_record(&self, id: i64) -> Result<HistoryRecord, DbError> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                "SELECT id, created_at, extracted_data, status, profile_id, row_number, error_message FROM history WHERE id = ?1",
                params![id],
                history_row,
            )
            .optional()?;
        history_from_row(row.ok_or(DbError::HistoryNotFound(id))?)
    }

    pub fn update_history_status(
        &self,
        id: i64,
        status: HistoryStatus,
        profile_id: Option<i64>,
        row_number: Option<u32>,
        error_message: Option<&str>,
    ) -> Result<(), DbError> {
        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE history SET status = ?1, profile_id = ?2, row_number = ?3, error_message = ?4 WHERE id = ?5",
            params![status.as_str(), profile_id, row_number, error_message, id],
        )?;
        if changed == 0 {
            return Err(DbError::HistoryNotFound(id));
        }
        Ok(())
    }
}

type HistoryRow = (i64, String, String, String, Option<i64>, Option<u32>, Option<String>);

fn history_row(r: &rusqlite::Row<'_>) -> rusqlite::Result<HistoryRow> {
    Ok((
        r.get(0)?,
        r.get(1)?,
        r.get(2)?,
        r.get(3)?,
        r.get(4)?,
        r.get(5)?,
        r.get(6)?,
    ))
}

fn history_from_row(row: HistoryRow) -> Result<HistoryRecord, DbError> {
    let (id, created_at, data, status, profile_id, row_number, error_message) = row;
    Ok(HistoryRecord {
        id,
        created_at,
        extracted_data: serde_json::from_str(&data)?,
        status: HistoryStatus::parse(&status).unwrap_or(HistoryStatus::Failed),
        profile_id,
        row_number,
        error_message,
    })
}

fn profile_from_row(row: (i64, String, String, String, String)) -> Result<Profile, DbError> {
    let (id, name, workbook_path, sheet_name, mapping_json) = row;
    Ok(Profile {
        id,
        name,
        workbook_path,
        sheet_name,
        column_mapping: serde_json::from_str(&mapping_json)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn profile_crud() {
        let db = Db::open_in_memory().unwrap();
        let mapping = ColumnMapping::new("A", "C", "F");
        let id = db.save_profile(None, "Groceries", "/tmp/g.xlsx", "Receipts", &mapping).unwrap();

        let profile = db.get_profile(id).unwrap();
        assert_eq!(profile.name, "Groceries");
        assert_eq!(profile.column_mapping, mapping);

        let updated = ColumnMapping::new("B", "B", "D");
        db.save_profile(Some(id), "Groceries", "/tmp/g.xlsx", "2024", &updated).unwrap();
        let profile = db.get_profile(id).unwrap();
        assert_eq!(profile.sheet_name, "2024");
        assert_eq!(profile.column_mapping, updated);
        assert_eq!(db.get_profiles().unwrap().len(), 1);

        db.delete_profile(id).unwrap();
        assert!(matches!(db.get_profile(id), Err(DbError::ProfileNotFound(_))));
        assert!(matches!(db.delete_profile(id), Err(DbError::ProfileNotFound(_))));
    }

    #[test]
    fn invalid_mapping_is_not_saved() {
        let db = Db::open_in_memory().unwrap();
        let err = db
            .save_profile(None, "Bad", "/tmp/b.xlsx", "Sheet1", &ColumnMapping::new("A", "AAA", "C"))
            .unwrap_err();
        assert!(matches!(err, DbError::Mapping(_)));
        assert!(db.get_profiles().unwrap().is_empty());
    }

    #[test]
    fn update_missing_profile() {
        let db = Db::open_in_memory().unwrap();
        let err = db
            .save_profile(Some(42), "X", "/tmp/x.xlsx", "S", &ColumnMapping::default())
            .unwrap_err();
        assert!(matches!(err, DbError::ProfileNotFound(42)));
    }

    #[test]
    fn history_records() {
        let db = Db::open_in_memory().unwrap();
        let first = db
            .add_history_record(&json!({"items": "Coffee"}), HistoryStatus::Extracted, None, None, None)
            .unwrap();
        db.add_history_record(&json!({"items": "Tea"}), HistoryStatus::Failed, None, None, Some("GS-500"))
            .unwrap();

        db.update_history_status(first, HistoryStatus::Saved, None, Some(4), None).unwrap();

        let all = db.get_history(None).unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[1].id, first);
        assert_eq!(all[1].status, HistoryStatus::Saved);
        assert_eq!(all[1].row_number, Some(4));
        assert_eq!(all[1].extracted_data["items"], "Coffee");

        let failed = db.get_history(Some(HistoryStatus::Failed)).unwrap();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].error_message.as_deref(), Some("GS-500"));

        assert_eq!(db.get_history_record(first).unwrap().status, HistoryStatus::Saved);
    }

    #[test]
    fn unknown_history_entry() {
        let db = Db::open_in_memory().unwrap();
        assert!(matches!(db.get_history_record(999), Err(DbError::HistoryNotFound(999))));
        let err = db
            .update_history_status(999, HistoryStatus::Saved, None, Some(2), None)
            .unwrap_err();
        assert!(matches!(err, DbError::HistoryNotFound(999)));
        assert!(db.get_history(None).unwrap().is_empty());
    }

    #[test]
    fn reopening_file_keeps_data() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("receipts.db");
        {
            let db = Db::new(path.clone()).unwrap();
            db.save_profile(None, "P", "/tmp/p.xlsx", "S", &ColumnMapping::default()).unwrap();
        }
        let db = Db::new(path).unwrap();
        assert_eq!(db.get_profiles().unwrap().len(), 1);
    }
}
