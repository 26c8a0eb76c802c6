//! Row validation: [`RawRow`] → typed [`InvoiceRow`], or a counted drop.
//!
//! A bad *value* never costs a row: an unreadable price or date becomes
//! `None`. A row is dropped only when it carries no product or no price at
//! all. Drops are a normal outcome, counted and logged at debug level.

use crate::config::RowRules;
use crate::record::{RawRow, RawValue};
use crate::table::InvoiceRow;
use chrono::NaiveDate;
use once_cell::sync::Lazy;
use regex::Regex;
use rust_decimal::Decimal;
use std::str::FromStr;
use tracing::debug;

/// Why a row was left out of the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// Product missing, empty or whitespace-only.
    EmptyProduct,
    /// Product is one of [`RowRules::placeholders`].
    PlaceholderProduct,
    /// Neither unit price nor total price is a usable number.
    NoPrice,
}

/// Rows that survived validation, plus how many did not.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Validated {
    pub rows: Vec<InvoiceRow>,
    pub dropped: usize,
}

/// Validate and type every row, preserving order.
pub fn validate(rows: &[RawRow], rules: &RowRules, source_document: &str) -> Validated {
    let mut out = Validated::default();
    for (i, raw) in rows.iter().enumerate() {
        match check_row(raw, rules, source_document) {
            Ok(row) => out.rows.push(row),
            Err(reason) => {
                debug!("{}: dropping row {} ({:?})", source_document, i + 1, reason);
                out.dropped += 1;
            }
        }
    }
    out
}

/// Validate a single row.
pub fn check_row(
    raw: &RawRow,
    rules: &RowRules,
    source_document: &str,
) -> Result<InvoiceRow, DropReason> {
    let product = coerce_text(&raw.product).ok_or(DropReason::EmptyProduct)?;
    if rules.is_placeholder(&product) {
        return Err(DropReason::PlaceholderProduct);
    }

    let unit_price = coerce_decimal(&raw.unit_price);
    let total_price = coerce_decimal(&raw.total_price);
    if unit_price.is_none() && total_price.is_none() {
        return Err(DropReason::NoPrice);
    }

    Ok(InvoiceRow {
        date: coerce_date(&raw.date, &rules.date_formats),
        product,
        quantity: coerce_decimal(&raw.quantity),
        unit_price,
        marked_up_price: None,
        total_price,
        source_document: source_document.to_string(),
    })
}

/// Trimmed, non-empty text. Numeric product codes are kept as text.
fn coerce_text(value: &RawValue) -> Option<String> {
    let s = match value {
        RawValue::Text(s) => s.trim().to_string(),
        RawValue::Number(n) => n.to_string(),
        RawValue::Null | RawValue::Bool(_) => return None,
    };
    (!s.is_empty()).then_some(s)
}

// ── Numbers ──────────────────────────────────────────────────────────────

static RE_PLAIN: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d+(\.\d+)?$").unwrap());
/// `12,5`: a lone comma followed by one or two digits is a decimal comma.
static RE_DECIMAL_COMMA: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d+,\d{1,2}$").unwrap());
/// `1,234` / `1,234.50`
static RE_COMMA_GROUPED: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\d{1,3}(,\d{3})+(\.\d+)?$").unwrap());
/// `1.234,50` / `1.234.567`
static RE_DOT_GROUPED: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\d{1,3}(\.\d{3})+,\d+$|^\d{1,3}(\.\d{3}){2,}$").unwrap());

/// Coerce to a non-negative decimal; anything else is `None`.
///
/// Text may carry a currency symbol or code before or after the amount
/// (`£7.50`, `7.50 GBP`, `Rs. 5`) and thousands grouping in either
/// convention (`1,234.50`, `1.234,50`). Separators that fit neither
/// convention give `None`, as do accounting negatives (`(5.00)`) and
/// negative numbers.
pub fn coerce_decimal(value: &RawValue) -> Option<Decimal> {
    let parsed = match value {
        RawValue::Number(n) => parse_decimal(&n.to_string()),
        RawValue::Text(s) => parse_money(s),
        RawValue::Null | RawValue::Bool(_) => None,
    }?;
    (!parsed.is_sign_negative()).then_some(parsed)
}

fn parse_money(s: &str) -> Option<Decimal> {
    let s = s.trim();
    if s.starts_with('(') && s.ends_with(')') {
        return None;
    }
    let core = amount_core(s)?;
    let normalised = if RE_PLAIN.is_match(&core) {
        core
    } else if RE_DECIMAL_COMMA.is_match(&core) {
        core.replace(',', ".")
    } else if RE_COMMA_GROUPED.is_match(&core) {
        core.replace(',', "")
    } else if RE_DOT_GROUPED.is_match(&core) {
        core.replace('.', "").replace(',', ".")
    } else {
        return None;
    };
    parse_decimal(&normalised)
}

/// The amount between the first and last digit, with the currency text
/// around it removed. `None` for a negative sign or for anything other than
/// digits and separators inside the amount.
fn amount_core(s: &str) -> Option<String> {
    let first = s.find(|c: char| c.is_ascii_digit())?;
    let last = s.rfind(|c: char| c.is_ascii_digit())?;
    let prefix = &s[..first];
    if prefix.trim_end().ends_with('-') {
        return None;
    }
    let mut core = s[first..=last].to_string();
    if !core.chars().all(|c| c.is_ascii_digit() || c == '.' || c == ',') {
        return None;
    }
    // `.50`, but not the dot of an abbreviation such as `Rs.5`.
    if let Some(before_dot) = prefix.strip_suffix('.') {
        if !before_dot.ends_with(|c: char| c.is_alphabetic()) {
            core.insert_str(0, "0.");
        }
    }
    Some(core)
}

fn parse_decimal(s: &str) -> Option<Decimal> {
    if s.is_empty() {
        return None;
    }
    Decimal::from_str(s)
        .or_else(|_| Decimal::from_scientific(s))
        .ok()
}

// ── Dates ────────────────────────────────────────────────────────────────

/// Try each accepted pattern in order; a timestamp's time part is ignored.
pub fn coerce_date(value: &RawValue, formats: &[String]) -> Option<NaiveDate> {
    let RawValue::Text(s) = value else {
        return None;
    };
    let s = s.trim();
    let date_part = s.split('T').next().unwrap_or(s);
    [s, date_part].into_iter().find_map(|candidate| {
        formats
            .iter()
            .find_map(|fmt| NaiveDate::parse_from_str(candidate, fmt).ok())
    })
}
