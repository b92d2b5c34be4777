use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use thiserror::Error;

use crate::columns::{validate_column, ColumnError, ColumnRef};

/// Receipt fields that can be placed in a sheet column, in declaration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MappingField {
    Date,
    Description,
    Price,
}

impl MappingField {
    pub const ALL: [MappingField; 3] = [MappingField::Date, MappingField::Description, MappingField::Price];

    pub fn as_str(&self) -> &'static str {
        match self {
            MappingField::Date => "date",
            MappingField::Description => "description",
            MappingField::Price => "price",
        }
    }

    fn column_key(&self) -> &'static str {
        match self {
            MappingField::Date => "date_column",
            MappingField::Description => "description_column",
            MappingField::Price => "price_column",
        }
    }
}

impl fmt::Display for MappingField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MappingError {
    #[error("{} is required", .0.column_key())]
    Missing(MappingField),
    #[error("{}: {}", .field.column_key(), .source.code())]
    Column {
        field: MappingField,
        #[source]
        source: ColumnError,
    },
    #[error("missing key '{0}' in column mapping")]
    MissingKey(&'static str),
}

impl MappingError {
    pub fn field(&self) -> Option<MappingField> {
        match self {
            MappingError::Missing(field) | MappingError::Column { field, .. } => Some(*field),
            MappingError::MissingKey(_) => None,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            MappingError::Column { source, .. } => source.code(),
            MappingError::Missing(_) | MappingError::MissingKey(_) => "MISSING_COLUMN",
        }
    }
}

/// Which sheet column each receipt field goes to.
///
/// References are kept as entered so an invalid configuration can still be
/// loaded and reported; call [`ColumnMapping::validate`] before using it.
/// Serialized as `{"date": "A", "description": "B", "price": "C"}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ColumnMapping {
    #[serde(rename = "date")]
    pub date_column: String,
    #[serde(rename = "description")]
    pub description_column: String,
    #[serde(rename = "price")]
    pub price_column: String,
}

impl ColumnMapping {
    pub fn new(date: &str, description: &str, price: &str) -> Self {
        ColumnMapping {
            date_column: date.to_string(),
            description_column: description.to_string(),
            price_column: price.to_string(),
        }
    }

    pub fn column(&self, field: MappingField) -> &str {
        match field {
            MappingField::Date => &self.date_column,
            MappingField::Description => &self.description_column,
            MappingField::Price => &self.price_column,
        }
    }

    /// All blank checks first, then the codec check, each in field order.
    /// Returns the first failure.
    pub fn validate(&self) -> Result<(), MappingError> {
        for field in MappingField::ALL {
            if self.column(field).trim().is_empty() {
                return Err(MappingError::Missing(field));
            }
        }
        for field in MappingField::ALL {
            validate_column(self.column(field)).map_err(|source| MappingError::Column { field, source })?;
        }
        Ok(())
    }

    /// Parsed column of each field, in field order (date, description, price).
    pub fn columns(&self) -> Result<[(MappingField, ColumnRef); 3], MappingError> {
        self.validate()?;
        let parse = |field: MappingField| {
            self.column(field)
                .parse::<ColumnRef>()
                .map(|column| (field, column))
                .map_err(|source| MappingError::Column { field, source })
        };
        Ok([
            parse(MappingField::Date)?,
            parse(MappingField::Description)?,
            parse(MappingField::Price)?,
        ])
    }

    pub fn has_duplicates(&self) -> bool {
        !self.duplicate_columns().is_empty()
    }

    /// Columns used by more than one field, e.g. `{"A": [Date, Price]}`.
    /// Sharing a column is allowed; the row builder merges the values.
    pub fn duplicate_columns(&self) -> BTreeMap<String, Vec<MappingField>> {
        let mut by_column: BTreeMap<String, Vec<MappingField>> = BTreeMap::new();
        for field in MappingField::ALL {
            by_column.entry(self.column(field).to_string()).or_default().push(field);
        }
        by_column.retain(|_, fields| fields.len() > 1);
        by_column
    }

    pub fn to_dict(&self) -> BTreeMap<&'static str, String> {
        MappingField::ALL
            .into_iter()
            .map(|field| (field.as_str(), self.column(field).to_string()))
            .collect()
    }

    pub fn from_dict(data: &HashMap<String, String>) -> Result<Self, MappingError> {
        let get = |field: MappingField| {
            data.get(field.as_str())
                .cloned()
                .ok_or(MappingError::MissingKey(field.as_str()))
        };
        Ok(ColumnMapping {
            date_column: get(MappingField::Date)?,
            description_column: get(MappingField::Description)?,
            price_column: get(MappingField::Price)?,
        })
    }
}

impl Default for ColumnMapping {
    fn default() -> Self {
        ColumnMapping::new("A", "B", "C")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_mapping() {
        assert_eq!(ColumnMapping::new("A", "B", "ZZ").validate(), Ok(()));
    }

    #[test]
    fn blank_checked_before_format() {
        // price is blank, date is malformed: blank wins because it is checked first.
        let err = ColumnMapping::new("a1", "B", "  ").validate().unwrap_err();
        assert_eq!(err, MappingError::Missing(MappingField::Price));
        assert_eq!(err.to_string(), "price_column is required");
    }

    #[test]
    fn first_codec_failure_in_field_order() {
        let err = ColumnMapping::new("A", "AAA", "1").validate().unwrap_err();
        assert_eq!(
            err,
            MappingError::Column {
                field: MappingField::Description,
                source: ColumnError::OutOfRange
            }
        );
        assert_eq!(err.field(), Some(MappingField::Description));
        assert_eq!(err.code(), "COLUMN_OUT_OF_RANGE");
        assert_eq!(err.to_string(), "description_column: COLUMN_OUT_OF_RANGE");
    }

    #[test]
    fn columns_in_field_order() {
        let columns = ColumnMapping::new("C", "AA", "A").columns().unwrap();
        let indices: Vec<(MappingField, u16)> = columns.iter().map(|(f, c)| (*f, c.index())).collect();
        assert_eq!(
            indices,
            [(MappingField::Date, 2), (MappingField::Description, 26), (MappingField::Price, 0)]
        );
        assert_eq!(columns[1].1.to_string(), "AA");
    }

    #[test]
    fn duplicates_are_reported_not_rejected() {
        let mapping = ColumnMapping::new("A", "B", "A");
        assert_eq!(mapping.validate(), Ok(()));
        assert!(mapping.has_duplicates());
        let dups = mapping.duplicate_columns();
        assert_eq!(dups.len(), 1);
        assert_eq!(dups["A"], vec![MappingField::Date, MappingField::Price]);

        let all_same = ColumnMapping::new("D", "D", "D").duplicate_columns();
        assert_eq!(all_same["D"], MappingField::ALL.to_vec());

        assert!(!ColumnMapping::default().has_duplicates());
    }

    #[test]
    fn dict_round_trip() {
        let mapping = ColumnMapping::new("AB", "b", "");
        let dict: HashMap<String, String> = mapping
            .to_dict()
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect();
        assert_eq!(ColumnMapping::from_dict(&dict).unwrap(), mapping);
    }

    #[test]
    fn from_dict_missing_key() {
        let mut dict = HashMap::new();
        dict.insert("date".to_string(), "A".to_string());
        dict.insert("price".to_string(), "C".to_string());
        assert_eq!(
            ColumnMapping::from_dict(&dict),
            Err(MappingError::MissingKey("description"))
        );
    }

    #[test]
    fn json_shape() {
        let mapping = ColumnMapping::new("A", "C", "F");
        let json = serde_json::to_string(&mapping).unwrap();
        assert_eq!(json, r#"{"date":"A","description":"C","price":"F"}"#);
        let back: ColumnMapping = serde_json::from_str(&json).unwrap();
        assert_eq!(back, mapping);
    }
}
