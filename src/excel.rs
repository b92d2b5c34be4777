use calamine::{open_workbook_auto, DataType, Reader};
use edit_xlsx::Write;
use rust_xlsxwriter::{Workbook, XlsxError};
use std::path::PathBuf;
use std::thread;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

use crate::columns::ColumnRef;

#[derive(Debug, Error)]
pub enum SinkError {
    /// The backend asked us to slow down; worth retrying.
    #[error("rate limit exceeded")]
    RateLimited,
    #[error("sheet backend returned {status}: {message}")]
    Backend { status: u16, message: String },
    #[error("{0}")]
    Workbook(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl SinkError {
    /// `GS-<status>` style code shown to the user.
    pub fn code(&self) -> String {
        match self {
            SinkError::RateLimited => "GS-429".to_string(),
            SinkError::Backend { status, .. } => format!("GS-{}", status),
            SinkError::Workbook(_) | SinkError::Io(_) => "GS-500".to_string(),
        }
    }

    fn is_retryable(&self) -> bool {
        matches!(self, SinkError::RateLimited)
    }
}

impl From<XlsxError> for SinkError {
    fn from(e: XlsxError) -> Self {
        SinkError::Workbook(e.to_string())
    }
}

impl From<calamine::Error> for SinkError {
    fn from(e: calamine::Error) -> Self {
        SinkError::Workbook(format!("Could not open Excel file: {}", e))
    }
}

/// Anything that can take one row of cells and append it to a sheet.
pub trait SheetSink {
    /// Append `cells` (column A first) and return the 1-based row number written.
    fn append_row(&mut self, cells: &[String]) -> Result<u32, SinkError>;
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_attempts: 3,
            initial_delay: Duration::from_secs(1),
        }
    }
}

/// Append with exponential backoff on rate limiting. Other errors return immediately.
pub fn append_with_retry<S: SheetSink + ?Sized>(
    sink: &mut S,
    cells: &[String],
    policy: &RetryPolicy,
) -> Result<u32, SinkError> {
    let mut delay = policy.initial_delay;
    let mut attempt = 1;
    loop {
        match sink.append_row(cells) {
            Ok(row) => return Ok(row),
            Err(e) if e.is_retryable() && attempt < policy.max_attempts => {
                warn!(attempt, delay_ms = delay.as_millis() as u64, "rate limit hit, retrying");
                thread::sleep(delay);
                delay *= 2;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Drop control chars (except tab, newline, CR) and characters that break sheet XML.
fn sanitize_cell(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        let u = c as u32;
        if c == '\t' || c == '\n' || c == '\r' {
            out.push(c);
        } else if u < 0x20 || u == 0x7F || u == 0xFFFE || u == 0xFFFF {
            // skip
        } else {
            out.push(c);
        }
    }
    out
}

/// Appends rows to one sheet of a local `.xlsx` workbook.
///
/// An existing workbook is edited in place with edit_xlsx, so cells already
/// in the sheet keep their types, formulas and styles. Only the new row is
/// written. A missing file is created with the sheet; a missing sheet in an
/// existing file is an error.
pub struct XlsxSink {
    path: PathBuf,
    sheet_name: String,
}

impl XlsxSink {
    pub fn new(path: impl Into<PathBuf>, sheet_name: &str) -> Self {
        XlsxSink {
            path: path.into(),
            sheet_name: sheet_name.to_string(),
        }
    }

    fn sheet_not_found(&self) -> SinkError {
        SinkError::Workbook(format!("Sheet '{}' not found.", self.sheet_name))
    }

    /// 1-based number of the last row holding any value; 0 for an empty sheet.
    fn last_data_row(&self) -> Result<u32, SinkError> {
        let mut workbook = open_workbook_auto(&self.path)?;
        if !workbook.sheet_names().iter().any(|name| *name == self.sheet_name) {
            return Err(self.sheet_not_found());
        }
        let range = workbook.worksheet_range(&self.sheet_name)?;
        let Some((first_row, _)) = range.start() else {
            return Ok(0);
        };
        let last = range
            .rows()
            .enumerate()
            .filter(|(_, row)| row.iter().any(|c| !c.is_empty()))
            .map(|(i, _)| first_row + i as u32 + 1)
            .last();
        Ok(last.unwrap_or(0))
    }

    fn create(&self, cells: &[String]) -> Result<(), SinkError> {
        let mut workbook = Workbook::new();
        let worksheet = workbook.add_worksheet();
        worksheet.set_name(&self.sheet_name)?;
        for (c, value) in cells.iter().enumerate() {
            if value.is_empty() {
                continue;
            }
            worksheet.write_string(0, c as u16, sanitize_cell(value))?;
        }
        let temp_path = self.temp_path();
        workbook.save(&temp_path).map_err(|e| save_error(e.to_string()))?;
        std::fs::rename(&temp_path, &self.path)?;
        Ok(())
    }

    fn append_in_place(&self, row_number: u32, cells: &[String]) -> Result<(), SinkError> {
        let mut workbook = edit_xlsx::Workbook::from_path(&self.path).map_err(|e| {
            let msg = e.to_string();
            if msg.contains("Could not open") || msg.contains("permission") || msg.contains("Permission") {
                SinkError::Workbook("Please close the file in Excel first.".to_string())
            } else {
                SinkError::Workbook(format!("Could not open Excel file: {}", msg))
            }
        })?;
        let worksheet = workbook
            .get_worksheet_mut_by_name(&self.sheet_name)
            .map_err(|_| self.sheet_not_found())?;

        for (i, value) in cells.iter().enumerate() {
            if value.is_empty() {
                continue;
            }
            let column = ColumnRef::from_index(i as u16).map_err(|e| SinkError::Workbook(e.to_string()))?;
            let cell_ref = format!("{}{}", column, row_number);
            worksheet
                .write_string(&cell_ref, sanitize_cell(value))
                .map_err(|e| SinkError::Workbook(e.to_string()))?;
        }

        let temp_path = self.temp_path();
        workbook.save_as(&temp_path).map_err(|e| save_error(e.to_string()))?;
        std::fs::rename(&temp_path, &self.path)?;
        Ok(())
    }

    fn temp_path(&self) -> PathBuf {
        self.path.with_extension("tmp.xlsx")
    }
}

fn save_error(msg: String) -> SinkError {
    if msg.contains("Permission denied") || msg.contains("being used") {
        SinkError::Workbook("Please close the file in Excel first.".to_string())
    } else {
        SinkError::Workbook(format!("Cannot write to file: {}", msg))
    }
}

impl SheetSink for XlsxSink {
    fn append_row(&mut self, cells: &[String]) -> Result<u32, SinkError> {
        let row_number = if self.path.exists() {
            let row_number = self.last_data_row()? + 1;
            self.append_in_place(row_number, cells)?;
            row_number
        } else {
            self.create(cells)?;
            1
        };
        info!(path = %self.path.display(), sheet = %self.sheet_name, row_number, "row appended");
        Ok(row_number)
    }
}
