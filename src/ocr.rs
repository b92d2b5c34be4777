//! Reads transaction date, line items and total amount out of raw OCR text.
//!
//! Every extractor is independent and total: it either finds a value and tags it with the
//! confidence of the strategy that fired, or returns `Extracted::NotFound`. Nothing here
//! touches the clock or any I/O, so the same text always yields the same result.

use chrono::NaiveDate;
use regex::Regex;
use rust_decimal::Decimal;
use std::borrow::Cow;
use std::str::FromStr;
use std::sync::OnceLock;
use tracing::{debug, info, warn};

use crate::types::{Extracted, ReceiptExtraction, MAX_ITEMS_LENGTH};

/// A structured date pattern matched and parsed.
pub const DATE_PATTERN_CONFIDENCE: f64 = 0.9;
/// Only the loose fallback scan found a date.
pub const DATE_FUZZY_CONFIDENCE: f64 = 0.7;
pub const ITEMS_CONFIDENCE: f64 = 0.85;
/// Amount found on or next to a "total" line.
pub const AMOUNT_NEAR_TOTAL_CONFIDENCE: f64 = 0.95;
/// Largest amount anywhere in the text.
pub const AMOUNT_GLOBAL_CONFIDENCE: f64 = 0.75;

/// Lines containing any of these are summary lines, not items.
const EXCLUSION_KEYWORDS: &[&str] = &["subtotal", "tax", "total", "amount", "due", "balance", "change"];

/// Longer item lines (spaces and dots removed) are taken for phone numbers or SKUs.
const MAX_ITEM_LINE_CHARS: usize = 15;
/// More digits than this is not a receipt amount.
const MAX_AMOUNT_DIGITS: usize = 10;

const ITEM_SEPARATOR: &str = "; ";

fn cached(cell: &'static OnceLock<Regex>, pattern: &str) -> &'static Regex {
    cell.get_or_init(|| Regex::new(pattern).expect("static regex must compile"))
}

macro_rules! static_regex {
    ($name:ident, $pattern:expr) => {
        fn $name() -> &'static Regex {
            static CELL: OnceLock<Regex> = OnceLock::new();
            cached(&CELL, $pattern)
        }
    };
}

static_regex!(re_date_iso, r"(?i)\d{4}-\d{2}-\d{2}");
static_regex!(re_date_us, r"(?i)\d{2}/\d{2}/\d{4}");
static_regex!(re_date_eu, r"(?i)\d{2}-\d{2}-\d{4}");
static_regex!(re_date_day_month, r"(?i)(\d{1,2})\s+([A-Za-z]{3,9})\s+(\d{4})");
static_regex!(re_date_month_day, r"(?i)([A-Za-z]{3})\s+(\d{1,2}),?\s+(\d{4})");

static_regex!(re_fuzzy_year_first, r"\b(\d{4})[./-](\d{1,2})[./-](\d{1,2})\b");
static_regex!(re_fuzzy_year_last, r"\b(\d{1,2})[./-](\d{1,2})[./-](\d{4}|\d{2})\b");
static_regex!(
    re_fuzzy_day_month,
    r"(?i)\b(\d{1,2})(?:st|nd|rd|th)?[\s.,/-]*([a-z]{3,9})\.?[\s.,/-]*(\d{4})\b"
);
static_regex!(
    re_fuzzy_month_day,
    r"(?i)\b([a-z]{3,9})\.?[\s.,/-]*(\d{1,2})(?:st|nd|rd|th)?[\s.,/-]*(\d{4})\b"
);

static_regex!(re_quantity, r"x\d+");
static_regex!(re_item_amount, r"(?:Rp|USD|\$|€|£)?\s*\d{1,3}(?:[.,]\d{3})*(?:[.,]\d{2,3})?");
static_regex!(re_pure_number, r"^\d+$");

static_regex!(re_money_grouped, r"(?:Rp|USD|\$|€|£)?\s*(\d{1,3}(?:[.,]\d{3})*(?:[.,]\d{2,3})?)");
static_regex!(re_money_plain, r"\$?\s*(\d+[,.]?\d*\.?\d{2})");

/// How a structured date match is turned into a calendar date.
#[derive(Clone, Copy)]
enum DateFormat {
    Strftime(&'static str),
    DayMonthName,
    MonthNameDay,
}

/// Structured date patterns in priority order.
fn date_patterns() -> [(&'static Regex, DateFormat); 5] {
    [
        (re_date_iso(), DateFormat::Strftime("%Y-%m-%d")),
        (re_date_us(), DateFormat::Strftime("%m/%d/%Y")),
        (re_date_eu(), DateFormat::Strftime("%d-%m-%Y")),
        (re_date_day_month(), DateFormat::DayMonthName),
        (re_date_month_day(), DateFormat::MonthNameDay),
    ]
}

/// Run all three extractors over the same text.
pub fn parse_receipt_text(ocr_text: &str) -> ReceiptExtraction {
    let text = normalize_newlines(ocr_text);
    ReceiptExtraction {
        transaction_date: extract_date(&text),
        items: extract_items(&text),
        total_amount: extract_total_amount(&text),
    }
}

/// `\r\n` and bare `\r` both become `\n` so line neighbours stay adjacent.
fn normalize_newlines(text: &str) -> Cow<'_, str> {
    if text.contains('\r') {
        Cow::Owned(text.replace("\r\n", "\n").replace('\r', "\n"))
    } else {
        Cow::Borrowed(text)
    }
}

/// Structured patterns in priority order at 0.9, then the loose scan at 0.7.
pub fn extract_date(ocr_text: &str) -> Extracted<NaiveDate> {
    for (pattern, format) in date_patterns() {
        let parsed = pattern
            .captures_iter(ocr_text)
            .find_map(|caps| parse_date_match(&caps, format));
        if let Some(date) = parsed {
            info!(%date, confidence = DATE_PATTERN_CONFIDENCE, "date extracted");
            return Extracted::found(date, DATE_PATTERN_CONFIDENCE);
        }
    }

    if let Some(date) = fuzzy_date(ocr_text) {
        info!(%date, confidence = DATE_FUZZY_CONFIDENCE, "date extracted via fuzzy scan");
        return Extracted::found(date, DATE_FUZZY_CONFIDENCE);
    }

    warn!("no date found in OCR text");
    Extracted::NotFound
}

fn parse_date_match(caps: &regex::Captures<'_>, format: DateFormat) -> Option<NaiveDate> {
    match format {
        DateFormat::Strftime(fmt) => NaiveDate::parse_from_str(caps.get(0)?.as_str(), fmt).ok(),
        DateFormat::DayMonthName => {
            let day = caps.get(1)?.as_str().parse().ok()?;
            let month = month_from_name(caps.get(2)?.as_str())?;
            let year = caps.get(3)?.as_str().parse().ok()?;
            NaiveDate::from_ymd_opt(year, month, day)
        }
        DateFormat::MonthNameDay => {
            let month = month_from_name(caps.get(1)?.as_str())?;
            let day = caps.get(2)?.as_str().parse().ok()?;
            let year = caps.get(3)?.as_str().parse().ok()?;
            NaiveDate::from_ymd_opt(year, month, day)
        }
    }
}

/// Looser scan used when no structured pattern parsed: other separators, single-digit
/// parts, two-digit years and ordinal suffixes. Missing parts are never filled in.
fn fuzzy_date(text: &str) -> Option<NaiveDate> {
    let year_first = re_fuzzy_year_first().captures_iter(text).find_map(|c| {
        let year = c.get(1)?.as_str().parse().ok()?;
        let month = c.get(2)?.as_str().parse().ok()?;
        let day = c.get(3)?.as_str().parse().ok()?;
        NaiveDate::from_ymd_opt(year, month, day)
    });
    if year_first.is_some() {
        return year_first;
    }

    // Month first unless that cannot be a date, then day first.
    let year_last = re_fuzzy_year_last().captures_iter(text).find_map(|c| {
        let a: u32 = c.get(1)?.as_str().parse().ok()?;
        let b: u32 = c.get(2)?.as_str().parse().ok()?;
        let year = expand_year(c.get(3)?.as_str())?;
        NaiveDate::from_ymd_opt(year, a, b).or_else(|| NaiveDate::from_ymd_opt(year, b, a))
    });
    if year_last.is_some() {
        return year_last;
    }

    let day_month = re_fuzzy_day_month().captures_iter(text).find_map(|c| {
        let day = c.get(1)?.as_str().parse().ok()?;
        let month = month_from_name(c.get(2)?.as_str())?;
        let year = c.get(3)?.as_str().parse().ok()?;
        NaiveDate::from_ymd_opt(year, month, day)
    });
    if day_month.is_some() {
        return day_month;
    }

    re_fuzzy_month_day().captures_iter(text).find_map(|c| {
        let month = month_from_name(c.get(1)?.as_str())?;
        let day = c.get(2)?.as_str().parse().ok()?;
        let year = c.get(3)?.as_str().parse().ok()?;
        NaiveDate::from_ymd_opt(year, month, day)
    })
}

/// Two-digit years pivot at 69 (69..=99 → 19xx, 00..=68 → 20xx), same as `%y`.
fn expand_year(raw: &str) -> Option<i32> {
    let y: i32 = raw.parse().ok()?;
    match raw.len() {
        2 if y >= 69 => Some(1900 + y),
        2 => Some(2000 + y),
        _ => Some(y),
    }
}

fn month_from_name(name: &str) -> Option<u32> {
    const MONTHS: [&str; 12] = [
        "january", "february", "march", "april", "may", "june", "july", "august", "september",
        "october", "november", "december",
    ];
    let lower = name.to_ascii_lowercase();
    if lower == "sept" {
        return Some(9);
    }
    MONTHS
        .iter()
        .position(|full| lower == *full || (lower.len() == 3 && full.starts_with(lower.as_str())))
        .map(|i| i as u32 + 1)
}

/// Lines that look like purchased items, joined with `"; "` and capped at 500 chars.
pub fn extract_items(ocr_text: &str) -> Extracted<String> {
    let items: Vec<String> = ocr_text
        .lines()
        .filter_map(|line| {
            let trimmed = line.trim();
            if trimmed.is_empty() {
                return None;
            }
            let lower = trimmed.to_lowercase();
            if EXCLUSION_KEYWORDS.iter().any(|kw| lower.contains(kw)) {
                return None;
            }
            if !re_quantity().is_match(&lower) && !re_item_amount().is_match(trimmed) {
                return None;
            }
            let cleaned = trimmed.split_whitespace().collect::<Vec<_>>().join(" ");
            if re_pure_number().is_match(&cleaned) || stripped_len(&cleaned) > MAX_ITEM_LINE_CHARS {
                debug!(line = %cleaned, "skipping number-like item line");
                return None;
            }
            Some(cleaned)
        })
        .collect();

    if items.is_empty() {
        warn!("no items found in OCR text");
        return Extracted::NotFound;
    }

    let joined = items.join(ITEM_SEPARATOR);
    let joined = if joined.chars().count() > MAX_ITEMS_LENGTH {
        joined.chars().take(MAX_ITEMS_LENGTH).collect()
    } else {
        joined
    };
    info!(count = items.len(), confidence = ITEMS_CONFIDENCE, "items extracted");
    Extracted::found(joined, ITEMS_CONFIDENCE)
}

fn stripped_len(line: &str) -> usize {
    line.chars().filter(|c| *c != ' ' && *c != '.').count()
}

/// Largest amount on or next to a "total" line (0.95), else the largest amount anywhere (0.75).
pub fn extract_total_amount(ocr_text: &str) -> Extracted<Decimal> {
    let lines: Vec<&str> = ocr_text.lines().collect();

    let near_total = lines
        .iter()
        .enumerate()
        .filter(|(_, line)| {
            let lower = line.to_lowercase();
            lower.contains("total") && !lower.contains("subtotal")
        })
        .flat_map(|(i, _)| {
            let end = (i + 2).min(lines.len());
            lines[i.saturating_sub(1)..end].iter().copied()
        })
        .flat_map(money_candidates)
        .max();

    if let Some(amount) = near_total {
        info!(%amount, confidence = AMOUNT_NEAR_TOTAL_CONFIDENCE, "total amount extracted near 'total'");
        return Extracted::found(amount, AMOUNT_NEAR_TOTAL_CONFIDENCE);
    }

    if let Some(amount) = money_candidates(ocr_text).max() {
        info!(%amount, confidence = AMOUNT_GLOBAL_CONFIDENCE, "total amount extracted as largest amount");
        return Extracted::found(amount, AMOUNT_GLOBAL_CONFIDENCE);
    }

    warn!("no amounts found in OCR text");
    Extracted::NotFound
}

/// All money-shaped values in `text`, both the grouped international form and the
/// plain `1234.56` form.
fn money_candidates(text: &str) -> impl Iterator<Item = Decimal> + '_ {
    [re_money_grouped(), re_money_plain()]
        .into_iter()
        .flat_map(move |re| re.captures_iter(text))
        .filter_map(|caps| parse_money(caps.get(1)?.as_str()))
}

/// Resolve decimal vs thousands separators and parse.
///
/// - both `.` and `,`: the rightmost one is the decimal separator
/// - only `.`: a 3-digit final group means thousands (`300.150` → 300150)
/// - only `,`: a 2-digit final group means decimal (`12,50` → 12.50), else thousands
///
/// `1.234` is read as 1234; there is no way to tell from the text alone.
pub fn parse_money(raw: &str) -> Option<Decimal> {
    let raw: String = raw.chars().filter(|c| !c.is_whitespace()).collect();
    let last_dot = raw.rfind('.');
    let last_comma = raw.rfind(',');
    let normalized = match (last_dot, last_comma) {
        (Some(dot), Some(comma)) if dot > comma => raw.replace(',', ""),
        (Some(_), Some(_)) => raw.replace('.', "").replace(',', "."),
        (Some(dot), None) if raw.len() - dot - 1 == 3 => raw.replace('.', ""),
        (None, Some(comma)) if raw.len() - comma - 1 == 2 => raw.replace(',', "."),
        (None, Some(_)) => raw.replace(',', ""),
        _ => raw,
    };

    let digits = normalized.chars().filter(|c| c.is_ascii_digit()).count();
    if digits > MAX_AMOUNT_DIGITS {
        debug!(candidate = %normalized, "skipping phone-number-like amount");
        return None;
    }
    Decimal::from_str(&normalized).ok()
}
