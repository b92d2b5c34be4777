//! Turns OCR text from a receipt into a confirmed transaction and appends it
//! to a spreadsheet row laid out by a user-chosen column mapping.

pub mod columns;
pub mod commands;
pub mod config;
pub mod db;
pub mod excel;
pub mod models;
pub mod ocr;
pub mod services;
pub mod types;

pub use columns::{column_to_index, index_to_column, validate_column, ColumnError, ColumnRef};
pub use commands::AppError;
pub use models::{ColumnMapping, MappingError, MappingField};
pub use ocr::parse_receipt_text;
pub use services::row_builder::{build_mapped_row, MappedRow};
pub use types::{ConfirmedReceipt, Extracted, ReceiptExtraction, ReceiptOverrides};
