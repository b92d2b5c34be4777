//! Operations exposed to the CLI (and any other front end): scanning OCR text,
//! validating column settings and saving confirmed receipts to a sheet.

use serde::Serialize;
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::{error, info};

use crate::columns::validate_column;
use crate::db::{Db, DbError, HistoryStatus, Profile};
use crate::excel::{append_with_retry, RetryPolicy, SheetSink, SinkError};
use crate::models::{ColumnMapping, MappingError, MappingField};
use crate::ocr;
use crate::services::row_builder::build_mapped_row;
use crate::types::{ConfirmedReceipt, ReceiptError, ReceiptExtraction};

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    InvalidData(#[from] ReceiptError),
    #[error(transparent)]
    Mapping(#[from] MappingError),
    #[error("Error {}: Unable to save data", .0.code())]
    Sink(#[from] SinkError),
    #[error(transparent)]
    Db(#[from] DbError),
    #[error("{0}")]
    Cli(String),
}

impl AppError {
    pub fn code(&self) -> String {
        match self {
            AppError::InvalidData(e) => e.code().to_string(),
            AppError::Mapping(_) => "COLUMN_MAPPINGS_REQUIRED".to_string(),
            AppError::Sink(e) => e.code(),
            AppError::Db(DbError::ProfileNotFound(_)) => "PROFILE_NOT_FOUND".to_string(),
            AppError::Db(DbError::HistoryNotFound(_)) => "HISTORY_NOT_FOUND".to_string(),
            AppError::Db(DbError::Mapping(_)) => "COLUMN_MAPPINGS_REQUIRED".to_string(),
            AppError::Db(_) => "DB_ERROR".to_string(),
            AppError::Cli(_) => "CLI_ERROR".to_string(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ValidationResult {
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct MappingCheck {
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<MappingField>,
    /// Shared columns; allowed, values get merged.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub duplicates: BTreeMap<String, Vec<MappingField>>,
}

#[derive(Debug, Serialize)]
pub struct ScanResult {
    pub history_id: i64,
    #[serde(flatten)]
    pub extraction: ReceiptExtraction,
}

#[derive(Debug, Serialize)]
pub struct SaveOutcome {
    pub history_id: i64,
    pub row_number: u32,
    pub cells: Vec<String>,
}

/// Check one column reference, e.g. from a settings form.
pub fn validate_column_command(reference: &str) -> ValidationResult {
    match validate_column(reference) {
        Ok(()) => ValidationResult {
            valid: true,
            error: None,
        },
        Err(e) => ValidationResult {
            valid: false,
            error: Some(e.code().to_string()),
        },
    }
}

pub fn check_mapping(mapping: &ColumnMapping) -> MappingCheck {
    let result = mapping.validate();
    MappingCheck {
        valid: result.is_ok(),
        error: result.as_ref().err().map(|e| e.to_string()),
        field: result.as_ref().err().and_then(MappingError::field),
        duplicates: mapping.duplicate_columns(),
    }
}

/// Interpret OCR text and keep the result in history for later review.
pub fn scan_text(db: &Db, text: &str) -> Result<ScanResult, AppError> {
    let extraction = ocr::parse_receipt_text(text);
    let data = serde_json::to_value(&extraction).map_err(DbError::from)?;
    let status = if extraction.is_empty() {
        HistoryStatus::Failed
    } else {
        HistoryStatus::Extracted
    };
    let error_message = extraction.is_empty().then_some("nothing could be extracted");
    let history_id = db.add_history_record(&data, status, None, None, error_message)?;
    Ok(ScanResult {
        history_id,
        extraction,
    })
}

/// Fetch a profile whose column mapping is usable for saving.
pub fn load_profile(db: &Db, profile_id: i64) -> Result<Profile, AppError> {
    let profile = db.get_profile(profile_id)?;
    profile.column_mapping.validate()?;
    Ok(profile)
}

/// Validate, map and append one confirmed receipt, then record the outcome.
///
/// `history_id` links the save to an earlier scan and must exist; without one
/// a new history entry is created.
pub fn save_receipt(
    db: &Db,
    profile: &Profile,
    receipt: &ConfirmedReceipt,
    history_id: Option<i64>,
    sink: &mut dyn SheetSink,
    retry: &RetryPolicy,
) -> Result<SaveOutcome, AppError> {
    receipt.validate()?;
    if let Some(id) = history_id {
        db.get_history_record(id)?;
    }
    let row = build_mapped_row(receipt, &profile.column_mapping)?;
    let data = serde_json::to_value(receipt).map_err(DbError::from)?;

    match append_with_retry(sink, row.cells(), retry) {
        Ok(row_number) => {
            let history_id = record(db, history_id, &data, HistoryStatus::Saved, profile.id, Some(row_number), None)?;
            info!(profile = profile.id, row_number, "receipt saved");
            Ok(SaveOutcome {
                history_id,
                row_number,
                cells: row.into_cells(),
            })
        }
        Err(e) => {
            error!(profile = profile.id, error = %e, "could not append receipt row");
            let code = e.code();
            record(db, history_id, &data, HistoryStatus::Failed, profile.id, None, Some(&code))?;
            Err(AppError::Sink(e))
        }
    }
}

fn record(
    db: &Db,
    history_id: Option<i64>,
    data: &serde_json::Value,
    status: HistoryStatus,
    profile_id: i64,
    row_number: Option<u32>,
    error_message: Option<&str>,
) -> Result<i64, DbError> {
    match history_id {
        Some(id) => {
            db.update_history_status(id, status, Some(profile_id), row_number, error_message)?;
            Ok(id)
        }
        None => db.add_history_record(data, status, Some(profile_id), row_number, error_message),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use rust_decimal::Decimal;
    use std::str::FromStr;
    use std::time::Duration;

    #[derive(Default)]
    struct RecordingSink {
        rows: Vec<Vec<String>>,
        fail_with: Option<u16>,
    }

    impl SheetSink for RecordingSink {
        fn append_row(&mut self, cells: &[String]) -> Result<u32, SinkError> {
            if let Some(status) = self.fail_with {
                return Err(SinkError::Backend {
                    status,
                    message: "boom".to_string(),
                });
            }
            self.rows.push(cells.to_vec());
            Ok(self.rows.len() as u32 + 1)
        }
    }

    fn no_wait() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            initial_delay: Duration::ZERO,
        }
    }

    fn receipt() -> ConfirmedReceipt {
        ConfirmedReceipt {
            transaction_date: NaiveDate::from_ymd_opt(2024, 1, 15).unwrap(),
            items: "Coffee; Bagel".to_string(),
            total_amount: Decimal::from_str("15.50").unwrap(),
        }
    }

    fn profile(db: &Db, mapping: ColumnMapping) -> Profile {
        let id = db.save_profile(None, "Test", "/tmp/t.xlsx", "Receipts", &mapping).unwrap();
        db.get_profile(id).unwrap()
    }

    #[test]
    fn column_command() {
        let ok = validate_column_command("ZZ");
        assert!(ok.valid);
        assert!(ok.error.is_none());
        let bad = validate_column_command("AAA");
        assert!(!bad.valid);
        assert_eq!(bad.error.as_deref(), Some("COLUMN_OUT_OF_RANGE"));
    }

    #[test]
    fn mapping_check_reports_duplicates() {
        let check = check_mapping(&ColumnMapping::new("A", "B", "A"));
        assert!(check.valid);
        assert_eq!(check.duplicates["A"], vec![MappingField::Date, MappingField::Price]);

        let check = check_mapping(&ColumnMapping::new("A", "b", "C"));
        assert!(!check.valid);
        assert_eq!(check.field, Some(MappingField::Description));
        assert_eq!(check.error.as_deref(), Some("description_column: INVALID_COLUMN_FORMAT"));
    }

    #[test]
    fn scan_records_history() {
        let db = Db::open_in_memory().unwrap();
        let result = scan_text(&db, "2024-01-15\nLatte 4.75\nTotal 4.75").unwrap();
        assert!(result.extraction.total_amount.is_found());
        let history = db.get_history(None).unwrap();
        assert_eq!(history[0].id, result.history_id);
        assert_eq!(history[0].status, HistoryStatus::Extracted);

        let empty = scan_text(&db, "").unwrap();
        assert_eq!(db.get_history(Some(HistoryStatus::Failed)).unwrap()[0].id, empty.history_id);
    }

    #[test]
    fn save_appends_mapped_row() {
        let db = Db::open_in_memory().unwrap();
        let profile = profile(&db, ColumnMapping::new("A", "B", "A"));
        let scan = scan_text(&db, "2024-01-15\nCoffee 3.50\nTotal 15.50").unwrap();
        let mut sink = RecordingSink::default();

        let outcome = save_receipt(&db, &profile, &receipt(), Some(scan.history_id), &mut sink, &no_wait()).unwrap();

        assert_eq!(outcome.cells, ["2024-01-15 | 15.5", "Coffee; Bagel"]);
        assert_eq!(sink.rows, vec![outcome.cells.clone()]);
        assert_eq!(outcome.history_id, scan.history_id);
        let saved = db.get_history(Some(HistoryStatus::Saved)).unwrap();
        assert_eq!(saved.len(), 1);
        assert_eq!(saved[0].row_number, Some(outcome.row_number));
        assert_eq!(saved[0].profile_id, Some(profile.id));
    }

    #[test]
    fn missing_profile_has_code() {
        let db = Db::open_in_memory().unwrap();
        let err = load_profile(&db, 42).unwrap_err();
        assert_eq!(err.code(), "PROFILE_NOT_FOUND");

        let id = profile(&db, ColumnMapping::new("A", "B", "C")).id;
        assert_eq!(load_profile(&db, id).unwrap().sheet_name, "Receipts");
    }

    #[test]
    fn unknown_history_id_is_rejected_before_append() {
        let db = Db::open_in_memory().unwrap();
        let profile = profile(&db, ColumnMapping::default());
        let mut sink = RecordingSink::default();

        let err = save_receipt(&db, &profile, &receipt(), Some(999), &mut sink, &no_wait()).unwrap_err();
        assert_eq!(err.code(), "HISTORY_NOT_FOUND");
        assert!(sink.rows.is_empty());
        assert!(db.get_history(None).unwrap().is_empty());
    }

    #[test]
    fn invalid_receipt_is_not_sent() {
        let db = Db::open_in_memory().unwrap();
        let profile = profile(&db, ColumnMapping::default());
        let mut bad = receipt();
        bad.items = " ".to_string();
        let mut sink = RecordingSink::default();

        let err = save_receipt(&db, &profile, &bad, None, &mut sink, &no_wait()).unwrap_err();
        assert_eq!(err.code(), "INVALID_DATA");
        assert!(sink.rows.is_empty());
    }

    #[test]
    fn sink_failure_is_recorded() {
        let db = Db::open_in_memory().unwrap();
        let profile = profile(&db, ColumnMapping::default());
        let mut sink = RecordingSink {
            fail_with: Some(403),
            ..Default::default()
        };

        let err = save_receipt(&db, &profile, &receipt(), None, &mut sink, &no_wait()).unwrap_err();
        assert_eq!(err.code(), "GS-403");
        assert_eq!(err.to_string(), "Error GS-403: Unable to save data");
        let failed = db.get_history(Some(HistoryStatus::Failed)).unwrap();
        assert_eq!(failed[0].error_message.as_deref(), Some("GS-403"));
    }
}
