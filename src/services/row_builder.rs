//! Places confirmed receipt values into a sparse row following a [`ColumnMapping`].

use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::BTreeMap;

use crate::models::{ColumnMapping, MappingError, MappingField};
use crate::types::ConfirmedReceipt;

/// Joins values of fields that share one column.
pub const MERGE_SEPARATOR: &str = " | ";

/// Cell values aligned to sheet columns, starting at column A.
/// Positions no field maps to hold `""`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct MappedRow(Vec<String>);

impl MappedRow {
    pub fn cells(&self) -> &[String] {
        &self.0
    }

    pub fn into_cells(self) -> Vec<String> {
        self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Render each field the way it is written to the sheet: date `YYYY-MM-DD`,
/// items verbatim, amount as a plain decimal.
fn render(receipt: &ConfirmedReceipt, field: MappingField) -> String {
    match field {
        MappingField::Date => receipt.transaction_date.format("%Y-%m-%d").to_string(),
        MappingField::Description => receipt.items.clone(),
        MappingField::Price => render_amount(&receipt.total_amount),
    }
}

/// Shortest decimal form with at least one fractional digit: 15.50 → "15.5", 15 → "15.0".
pub fn render_amount(amount: &Decimal) -> String {
    let s = amount.normalize().to_string();
    if s.contains('.') {
        s
    } else {
        format!("{}.0", s)
    }
}

/// Build the row for one receipt.
///
/// The row is `max(index) + 1` cells long. When several fields map to the
/// same column their values are joined with `" | "` in field order
/// (date, description, price), whichever fields collide.
pub fn build_mapped_row(receipt: &ConfirmedReceipt, mapping: &ColumnMapping) -> Result<MappedRow, MappingError> {
    let columns = mapping.columns()?;
    let width = columns.iter().map(|(_, c)| c.index() as usize).max().unwrap_or(0) + 1;

    let mut by_column: BTreeMap<usize, Vec<String>> = BTreeMap::new();
    for (field, column) in columns {
        by_column.entry(column.index() as usize).or_default().push(render(receipt, field));
    }

    let mut row = vec![String::new(); width];
    for (index, values) in by_column {
        row[index] = values.join(MERGE_SEPARATOR);
    }
    Ok(MappedRow(row))
}
