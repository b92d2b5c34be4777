use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::ser::SerializeStruct;
use serde::{Deserialize, Serialize, Serializer};
use thiserror::Error;

/// Max length (characters) of the joined items string.
pub const MAX_ITEMS_LENGTH: usize = 500;

/// One field pulled out of OCR text. `confidence` names the strategy that
/// produced the value; it is not a probability.
#[derive(Debug, Clone, PartialEq)]
pub enum Extracted<T> {
    Found { value: T, confidence: f64 },
    NotFound,
}

impl<T> Extracted<T> {
    pub fn found(value: T, confidence: f64) -> Self {
        Extracted::Found { value, confidence }
    }

    pub fn value(&self) -> Option<&T> {
        match self {
            Extracted::Found { value, .. } => Some(value),
            Extracted::NotFound => None,
        }
    }

    pub fn into_value(self) -> Option<T> {
        match self {
            Extracted::Found { value, .. } => Some(value),
            Extracted::NotFound => None,
        }
    }

    pub fn confidence(&self) -> f64 {
        match self {
            Extracted::Found { confidence, .. } => *confidence,
            Extracted::NotFound => 0.0,
        }
    }

    pub fn is_found(&self) -> bool {
        matches!(self, Extracted::Found { .. })
    }
}

impl<T> Default for Extracted<T> {
    fn default() -> Self {
        Extracted::NotFound
    }
}

/// Serialized as `{ "value": <T | null>, "confidence": <f64> }` for the review UI.
impl<T: Serialize> Serialize for Extracted<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("Extracted", 2)?;
        state.serialize_field("value", &self.value())?;
        state.serialize_field("confidence", &self.confidence())?;
        state.end()
    }
}

/// The three fields read from one receipt.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct ReceiptExtraction {
    pub transaction_date: Extracted<NaiveDate>,
    pub items: Extracted<String>,
    pub total_amount: Extracted<Decimal>,
}

impl ReceiptExtraction {
    /// True when nothing at all could be read.
    pub fn is_empty(&self) -> bool {
        !self.transaction_date.is_found() && !self.items.is_found() && !self.total_amount.is_found()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReceiptError {
    #[error("{0} is required")]
    MissingField(&'static str),
    #[error("items cannot be empty")]
    EmptyItems,
    #[error("total amount must be non-negative")]
    NegativeAmount,
}

impl ReceiptError {
    pub fn code(&self) -> &'static str {
        match self {
            ReceiptError::MissingField(_) => "MISSING_REQUIRED_FIELDS",
            ReceiptError::EmptyItems | ReceiptError::NegativeAmount => "INVALID_DATA",
        }
    }
}

/// User corrections applied on top of an extraction during review.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ReceiptOverrides {
    pub transaction_date: Option<NaiveDate>,
    pub items: Option<String>,
    pub total_amount: Option<Decimal>,
}

/// Values confirmed by the user, ready to be mapped into a row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfirmedReceipt {
    pub transaction_date: NaiveDate,
    pub items: String,
    pub total_amount: Decimal,
}

impl ConfirmedReceipt {
    /// Overrides win over extracted values; every field must end up present.
    pub fn from_extraction(
        extraction: ReceiptExtraction,
        overrides: ReceiptOverrides,
    ) -> Result<Self, ReceiptError> {
        let transaction_date = overrides
            .transaction_date
            .or_else(|| extraction.transaction_date.into_value())
            .ok_or(ReceiptError::MissingField("transaction_date"))?;
        let items = overrides
            .items
            .or_else(|| extraction.items.into_value())
            .ok_or(ReceiptError::MissingField("items"))?;
        let total_amount = overrides
            .total_amount
            .or_else(|| extraction.total_amount.into_value())
            .ok_or(ReceiptError::MissingField("total_amount"))?;
        let receipt = ConfirmedReceipt {
            transaction_date,
            items,
            total_amount,
        };
        receipt.validate()?;
        Ok(receipt)
    }

    pub fn validate(&self) -> Result<(), ReceiptError> {
        if self.items.trim().is_empty() {
            return Err(ReceiptError::EmptyItems);
        }
        if self.total_amount.is_sign_negative() && !self.total_amount.is_zero() {
            return Err(ReceiptError::NegativeAmount);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn full_extraction() -> ReceiptExtraction {
        ReceiptExtraction {
            transaction_date: Extracted::found(date(2024, 1, 15), 0.9),
            items: Extracted::found("Coffee; Bagel".to_string(), 0.85),
            total_amount: Extracted::found(Decimal::from_str("15.50").unwrap(), 0.95),
        }
    }

    #[test]
    fn not_found_has_zero_confidence() {
        let field: Extracted<String> = Extracted::NotFound;
        assert_eq!(field.confidence(), 0.0);
        assert!(field.value().is_none());
    }

    #[test]
    fn extraction_serializes_for_review() {
        let json = serde_json::to_value(full_extraction()).unwrap();
        assert_eq!(json["transaction_date"]["value"], "2024-01-15");
        assert_eq!(json["transaction_date"]["confidence"], 0.9);
        assert_eq!(json["items"]["value"], "Coffee; Bagel");
        assert_eq!(json["total_amount"]["value"], 15.5);

        let empty = ReceiptExtraction {
            transaction_date: Extracted::NotFound,
            items: Extracted::NotFound,
            total_amount: Extracted::NotFound,
        };
        assert!(empty.is_empty());
        let json = serde_json::to_value(empty).unwrap();
        assert!(json["items"]["value"].is_null());
        assert_eq!(json["items"]["confidence"], 0.0);
    }

    #[test]
    fn overrides_take_precedence() {
        let overrides = ReceiptOverrides {
            items: Some("Tea".to_string()),
            ..Default::default()
        };
        let confirmed = ConfirmedReceipt::from_extraction(full_extraction(), overrides).unwrap();
        assert_eq!(confirmed.items, "Tea");
        assert_eq!(confirmed.transaction_date, date(2024, 1, 15));
    }

    #[test]
    fn missing_field_without_override_is_rejected() {
        let mut extraction = full_extraction();
        extraction.total_amount = Extracted::NotFound;
        let err = ConfirmedReceipt::from_extraction(extraction, ReceiptOverrides::default()).unwrap_err();
        assert_eq!(err, ReceiptError::MissingField("total_amount"));
        assert_eq!(err.code(), "MISSING_REQUIRED_FIELDS");
    }

    #[test]
    fn confirmed_row_validation() {
        let mut receipt = ConfirmedReceipt {
            transaction_date: date(2024, 1, 15),
            items: "  ".to_string(),
            total_amount: Decimal::ZERO,
        };
        assert_eq!(receipt.validate(), Err(ReceiptError::EmptyItems));
        receipt.items = "Coffee".to_string();
        assert_eq!(receipt.validate(), Ok(()));
        receipt.total_amount = Decimal::from_str("-1.00").unwrap();
        assert_eq!(receipt.validate(), Err(ReceiptError::NegativeAmount));
    }
}
