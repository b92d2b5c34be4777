//! Spreadsheet column letters <-> zero-based column index (A→0, Z→25, AA→26, ZZ→701).

use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Highest addressable column (ZZ).
pub const MAX_COLUMN_INDEX: u16 = 701;

const LETTERS: u16 = 26;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
pub enum ColumnError {
    #[error("column reference must be 1-2 uppercase letters (A-ZZ)")]
    InvalidFormat,
    #[error("column reference is beyond ZZ")]
    OutOfRange,
}

impl ColumnError {
    /// Stable code for API consumers.
    pub fn code(&self) -> &'static str {
        match self {
            ColumnError::InvalidFormat => "INVALID_COLUMN_FORMAT",
            ColumnError::OutOfRange => "COLUMN_OUT_OF_RANGE",
        }
    }
}

/// Check a single column reference without converting it.
///
/// Three or more uppercase letters are well-formed but too large, so they
/// report `OutOfRange` rather than `InvalidFormat`.
pub fn validate_column(reference: &str) -> Result<(), ColumnError> {
    let all_upper = !reference.is_empty() && reference.bytes().all(|b| b.is_ascii_uppercase());
    if !all_upper {
        return Err(ColumnError::InvalidFormat);
    }
    if reference.len() > 2 {
        return Err(ColumnError::OutOfRange);
    }
    if encode(reference.as_bytes()) > MAX_COLUMN_INDEX {
        return Err(ColumnError::OutOfRange);
    }
    Ok(())
}

/// Column letter(s) to zero-based index. Validates first.
pub fn column_to_index(reference: &str) -> Result<u16, ColumnError> {
    validate_column(reference)?;
    Ok(encode(reference.as_bytes()))
}

/// Zero-based index to column letter(s) (0→A, 25→Z, 26→AA, 701→ZZ).
pub fn index_to_column(index: u16) -> Result<String, ColumnError> {
    if index > MAX_COLUMN_INDEX {
        return Err(ColumnError::OutOfRange);
    }
    let mut s = String::with_capacity(2);
    if index >= LETTERS {
        s.push(letter(index / LETTERS - 1));
    }
    s.push(letter(index % LETTERS));
    Ok(s)
}

// Caller guarantees 1-2 uppercase ASCII letters.
fn encode(bytes: &[u8]) -> u16 {
    match bytes {
        [c] => letter_value(*c),
        [c1, c2] => (letter_value(*c1) + 1) * LETTERS + letter_value(*c2),
        _ => u16::MAX,
    }
}

fn letter_value(b: u8) -> u16 {
    (b - b'A') as u16
}

fn letter(value: u16) -> char {
    (b'A' + value as u8) as char
}

/// A validated column reference. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ColumnRef(String);

impl ColumnRef {
    pub fn from_index(index: u16) -> Result<Self, ColumnError> {
        index_to_column(index).map(ColumnRef)
    }

    pub fn index(&self) -> u16 {
        encode(self.0.as_bytes())
    }
}

impl FromStr for ColumnRef {
    type Err = ColumnError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        validate_column(s)?;
        Ok(ColumnRef(s.to_string()))
    }
}

impl fmt::Display for ColumnRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
