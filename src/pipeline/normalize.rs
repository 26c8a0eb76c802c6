//! Field normalisation: ragged [`FieldRecord`] → rectangular [`RawRow`]s.
//!
//! Models extract each field as an independent array and sometimes leave a
//! trailing value out (a missing quantity on the last line) instead of writing
//! `null`. The row count is therefore the *longest* field; shorter fields are
//! padded with `Null`. Element `i` of every field is assumed to describe line
//! item `i`.
//!
//! Positional correspondence is a heuristic. If a model ever skips a value in
//! the *middle* of one array, everything after it shifts by one row and no
//! check here can notice.

use crate::record::{Field, FieldRecord, RawRow, RawValue};
use tracing::{debug, warn};

/// Rebuild rows from a field record.
///
/// Produces exactly `max_len` rows (capped by `max_rows` when given); never
/// fails. Judging whether a row is usable is left to
/// [`crate::pipeline::validate`].
pub fn normalize(record: &FieldRecord, max_rows: Option<usize>) -> Vec<RawRow> {
    let longest = record.max_len();
    let n = match max_rows {
        Some(cap) if longest > cap => {
            warn!(
                "Response has {} rows, more than the cap of {}; truncating",
                longest, cap
            );
            cap
        }
        _ => longest,
    };

    if !record.is_rectangular() {
        debug!("Ragged field record; padding every field to {} rows", n);
    }

    let mut rows = vec![RawRow::default(); n];
    for field in record.fields() {
        let values = record.get(field).unwrap_or_default();
        for (row, value) in rows.iter_mut().zip(fit(field, values, n)) {
            row.set(field, value);
        }
    }
    rows
}

/// Pad `values` with `Null` or truncate it to exactly `n` entries.
fn fit(field: Field, values: &[RawValue], n: usize) -> Vec<RawValue> {
    if values.len() > n {
        warn!(
            "Field '{}' has {} values for {} rows; dropping the excess",
            field,
            values.len(),
            n
        );
    }
    values
        .iter()
        .take(n)
        .cloned()
        .chain(std::iter::repeat(RawValue::Null))
        .take(n)
        .collect()
}
