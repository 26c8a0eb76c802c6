//! Response parsing: model text → [`FieldRecord`].
//!
//! Models wrap their JSON in prose, markdown fences or trailing remarks no
//! matter what the prompt says. Rather than stripping known wrappers, the
//! parser tries a JSON parse at every `{` / `[` from left to right and keeps
//! the first value that parses to completion. Whatever follows that value is
//! ignored.
//!
//! Two shapes are accepted:
//!
//! ```text
//! {"product": ["A", "B"], "unit_price": [10]}          field → array (as-is)
//! [{"product": "A", "unit_price": 10}, {"product": "B"}]   rows (transposed)
//! ```

use crate::error::ResponseError;
use crate::record::{Field, FieldRecord, RawValue};
use serde_json::{Map, Value};
use tracing::{debug, warn};

/// Longest slice of the raw text quoted in a `MalformedResponse`.
const EXCERPT_CHARS: usize = 80;

/// Parse raw model text into a field record.
///
/// # Errors
/// * [`ResponseError::MalformedResponse`] — no complete JSON object or array.
/// * [`ResponseError::UnexpectedSchema`] — JSON of the wrong shape, or with
///   none of the recognised field names.
pub fn parse(raw_text: &str) -> Result<FieldRecord, ResponseError> {
    let value = locate_json(raw_text).ok_or_else(|| ResponseError::MalformedResponse {
        excerpt: raw_text.trim().chars().take(EXCERPT_CHARS).collect(),
    })?;
    to_field_record(value)
}

/// Find the first JSON object or array embedded in `text`.
pub fn locate_json(text: &str) -> Option<Value> {
    text.char_indices()
        .filter(|&(_, c)| c == '{' || c == '[')
        .find_map(|(pos, _)| {
            // Objects and arrays are self-delimiting, so the stream accepts
            // them even when prose follows the closing bracket.
            serde_json::Deserializer::from_str(&text[pos..])
                .into_iter::<Value>()
                .next()
                .and_then(Result::ok)
        })
}

fn to_field_record(value: Value) -> Result<FieldRecord, ResponseError> {
    match value {
        Value::Object(map) => from_columns(map),
        Value::Array(items) => from_rows(items),
        other => Err(ResponseError::UnexpectedSchema {
            detail: format!("top-level JSON is {}, not an object or array", kind(&other)),
        }),
    }
}

/// `{"product": [...], "unit_price": [...]}` — already columnar.
///
/// A scalar where an array is expected (typically one invoice date for the
/// whole document) is repeated for every row. When several keys name the
/// same field, the canonical key wins (`total_price` over `Total`).
fn from_columns(map: Map<String, Value>) -> Result<FieldRecord, ResponseError> {
    let mut record = FieldRecord::new();
    let mut scalars: Vec<(Field, RawValue)> = Vec::new();

    for (field, key, value) in canonical_first(map) {
        if record.contains(field) || scalars.iter().any(|(f, _)| *f == field) {
            warn!("Key '{}' duplicates field '{}'; ignoring it", key, field);
            continue;
        }
        match value {
            Value::Array(items) => {
                record.insert(field, items.into_iter().map(RawValue::from).collect())
            }
            scalar => scalars.push((field, RawValue::from(scalar))),
        }
    }

    if record.is_empty() && scalars.is_empty() {
        return Err(no_recognised_fields());
    }

    let rows = record.max_len().max(1);
    for (field, value) in scalars {
        record.insert(field, vec![value; rows]);
    }
    Ok(record)
}

/// `[{"product": "A", ...}, ...]` — one object per row, transposed.
///
/// A row missing a key gets `Null` at that position, so every field keeps
/// positional correspondence with the others.
fn from_rows(items: Vec<Value>) -> Result<FieldRecord, ResponseError> {
    let rows: Vec<Map<String, Value>> = items
        .into_iter()
        .filter_map(|item| match item {
            Value::Object(map) => Some(map),
            other => {
                debug!("Skipping non-object row element ({})", kind(&other));
                None
            }
        })
        .collect();

    let mut present: Vec<Field> = rows
        .iter()
        .flat_map(|row| row.keys().filter_map(|k| Field::from_key(k)))
        .collect();
    present.sort_unstable();
    present.dedup();

    if present.is_empty() {
        return Err(no_recognised_fields());
    }

    let mut record = FieldRecord::new();
    for field in &present {
        record.insert(*field, Vec::with_capacity(rows.len()));
    }
    for row in rows {
        let mut cells: Vec<(Field, RawValue)> = Vec::new();
        for (field, _, value) in canonical_first(row) {
            if !cells.iter().any(|(f, _)| *f == field) {
                cells.push((field, RawValue::from(value)));
            }
        }
        for field in &present {
            let value = cells
                .iter()
                .position(|(f, _)| f == field)
                .map(|i| cells.swap_remove(i).1)
                .unwrap_or_default();
            record.push(*field, value);
        }
    }
    Ok(record)
}

/// Recognised entries of `map`, canonical spellings before synonyms.
///
/// `serde_json::Map` iterates keys alphabetically, not in the order the
/// model wrote them, so among synonyms of one field the alphabetically
/// first key is kept.
fn canonical_first(map: Map<String, Value>) -> Vec<(Field, String, Value)> {
    let mut entries: Vec<(Field, String, Value)> = map
        .into_iter()
        .filter_map(|(key, value)| match Field::from_key(&key) {
            Some(field) => Some((field, key, value)),
            None => {
                debug!("Ignoring unrecognised key '{}'", key);
                None
            }
        })
        .collect();
    entries.sort_by_key(|(field, key, _)| !key.trim().eq_ignore_ascii_case(field.key()));
    entries
}

fn no_recognised_fields() -> ResponseError {
    let expected: Vec<&str> = Field::ALL.iter().map(|f| f.key()).collect();
    ResponseError::UnexpectedSchema {
        detail: format!("none of the fields {} present", expected.join(", ")),
    }
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn text(s: &str) -> RawValue {
        RawValue::Text(s.into())
    }

    #[test]
    fn fenced_json_with_prose() {
        let raw = "Here is the data:\n```json\n{\"product\":[\"A\",\"B\"],\"unit_price\":[10]}\n```";
        let rec = parse(raw).unwrap();
        assert_eq!(rec.get(Field::Product).unwrap(), &[text("A"), text("B")]);
        assert_eq!(rec.get(Field::UnitPrice).unwrap().len(), 1);
        assert!(!rec.contains(Field::Quantity));
    }

    #[test]
    fn trailing_text_is_ignored() {
        let raw = "{\"Product\": [\"X\"], \"Total\": [5]}\nLet me know if you need more!";
        let rec = parse(raw).unwrap();
        assert_eq!(rec.get(Field::Product).unwrap(), &[text("X")]);
        assert!(rec.contains(Field::TotalPrice));
    }

    #[test]
    fn skips_braces_that_do_not_parse() {
        let raw = "Items {see below}: {\"product\": [\"Bolt\"], \"total_price\": [20.0]}";
        let rec = parse(raw).unwrap();
        assert_eq!(rec.get(Field::Product).unwrap(), &[text("Bolt")]);
    }

    #[test]
    fn truncated_json_is_malformed() {
        let raw = "```json\n{\"product\": [\"A\", \"B\"";
        assert!(matches!(
            parse(raw),
            Err(ResponseError::MalformedResponse { .. })
        ));
    }

    #[test]
    fn no_json_at_all_is_malformed() {
        let err = parse("Sorry, I cannot read this invoice.").unwrap_err();
        match err {
            ResponseError::MalformedResponse { excerpt } => {
                assert!(excerpt.starts_with("Sorry"))
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn array_of_rows_is_transposed_with_null_gaps() {
        let raw = r#"[{"product": "A", "quantity": 2, "unit_price": 1.5},
                      {"product": "B", "unit_price": 3}]"#;
        let rec = parse(raw).unwrap();
        assert_eq!(rec.get(Field::Product).unwrap(), &[text("A"), text("B")]);
        let qty = rec.get(Field::Quantity).unwrap();
        assert_eq!(qty.len(), 2);
        assert!(qty[1].is_null());
        assert!(rec.is_rectangular());
    }

    #[test]
    fn scalar_field_is_broadcast() {
        let raw = r#"{"date": "2023-06-24", "product": ["A", "B", "C"]}"#;
        let rec = parse(raw).unwrap();
        assert_eq!(rec.get(Field::Date).unwrap().to_vec(), vec![text("2023-06-24"); 3]);
    }

    #[test]
    fn scalar_top_level_is_unexpected_schema() {
        assert!(matches!(
            to_field_record(json!(42)),
            Err(ResponseError::UnexpectedSchema { .. })
        ));
    }

    #[test]
    fn unrecognised_keys_only_is_unexpected_schema() {
        let raw = r#"{"vendor": "ACME", "lines": [1, 2]}"#;
        assert!(matches!(
            parse(raw),
            Err(ResponseError::UnexpectedSchema { .. })
        ));
    }

    #[test]
    fn first_parsable_structure_wins() {
        // An array of numbers parses first and carries no field names.
        let raw = "see [1]: {\"product\": [\"A\"], \"total\": [1]}";
        assert!(matches!(
            parse(raw),
            Err(ResponseError::UnexpectedSchema { .. })
        ));
    }

    #[test]
    fn canonical_key_beats_synonym() {
        // "Total" sorts before "total_price" but must not win.
        let raw = r#"{"Total": [1], "product": ["A"], "total_price": [2]}"#;
        let rec = parse(raw).unwrap();
        assert_eq!(
            rec.get(Field::TotalPrice).unwrap(),
            &[RawValue::Number(2.into())]
        );

        let raw = r#"[{"Total": 1, "product": "A", "total_price": 2}]"#;
        let rec = parse(raw).unwrap();
        assert_eq!(
            rec.get(Field::TotalPrice).unwrap(),
            &[RawValue::Number(2.into())]
        );
    }
}
