//! Semi-structured extraction record: field name → raw value sequence.
//!
//! A [`FieldRecord`] is what the model *said*, before any row is rebuilt. It
//! may be ragged (fields of different lengths); reconciling that is the job of
//! [`crate::pipeline::normalize`], not of the parser.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

/// The five line-item fields the pipeline recognises.
///
/// Declaration order is the column order of the output table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Field {
    Date,
    Product,
    Quantity,
    UnitPrice,
    TotalPrice,
}

impl Field {
    pub const ALL: [Field; 5] = [
        Field::Date,
        Field::Product,
        Field::Quantity,
        Field::UnitPrice,
        Field::TotalPrice,
    ];

    /// Canonical key as requested from the model.
    pub fn key(self) -> &'static str {
        match self {
            Field::Date => "date",
            Field::Product => "product",
            Field::Quantity => "quantity",
            Field::UnitPrice => "unit_price",
            Field::TotalPrice => "total_price",
        }
    }

    /// Map a JSON key to a field.
    ///
    /// Matching is case-insensitive and treats spaces, dots and hyphens as
    /// underscores, so the legacy spellings `Qty`, `U.Price` and `Total`
    /// resolve alongside the canonical snake_case keys.
    pub fn from_key(key: &str) -> Option<Field> {
        let folded: String = key
            .trim()
            .chars()
            .map(|c| match c {
                ' ' | '.' | '-' => '_',
                c => c.to_ascii_lowercase(),
            })
            .collect();

        match folded.as_str() {
            "date" | "invoice_date" | "dates" => Some(Field::Date),
            "product" | "products" | "product_name" | "description" | "item" => {
                Some(Field::Product)
            }
            "quantity" | "qty" | "quantities" => Some(Field::Quantity),
            "unit_price" | "u_price" | "unitprice" | "price" | "unit_cost" => {
                Some(Field::UnitPrice)
            }
            "total_price" | "total" | "totals" | "amount" | "line_total" => {
                Some(Field::TotalPrice)
            }
            _ => None,
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// One value exactly as the model emitted it.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub enum RawValue {
    #[default]
    Null,
    Text(String),
    Number(serde_json::Number),
    Bool(bool),
}

impl RawValue {
    pub fn is_null(&self) -> bool {
        matches!(self, RawValue::Null)
    }
}

impl From<Value> for RawValue {
    /// Nested arrays and objects carry no usable scalar and become `Null`.
    fn from(value: Value) -> Self {
        match value {
            Value::Null | Value::Array(_) | Value::Object(_) => RawValue::Null,
            Value::String(s) => RawValue::Text(s),
            Value::Number(n) => RawValue::Number(n),
            Value::Bool(b) => RawValue::Bool(b),
        }
    }
}

/// Mapping from recognised field to its ordered raw values. May be ragged.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FieldRecord {
    fields: BTreeMap<Field, Vec<RawValue>>,
}

impl FieldRecord {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, field: Field, values: Vec<RawValue>) {
        self.fields.insert(field, values);
    }

    /// Append one value, creating the field's sequence on first use.
    pub fn push(&mut self, field: Field, value: RawValue) {
        self.fields.entry(field).or_default().push(value);
    }

    pub fn get(&self, field: Field) -> Option<&[RawValue]> {
        self.fields.get(&field).map(Vec::as_slice)
    }

    pub fn contains(&self, field: Field) -> bool {
        self.fields.contains_key(&field)
    }

    /// Fields present in the record, in column order.
    pub fn fields(&self) -> impl Iterator<Item = Field> + '_ {
        self.fields.keys().copied()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Longest sequence length across all present fields (0 when empty).
    pub fn max_len(&self) -> usize {
        self.fields.values().map(Vec::len).max().unwrap_or(0)
    }

    /// True when every present field has the same length.
    pub fn is_rectangular(&self) -> bool {
        let mut lens = self.fields.values().map(Vec::len);
        match lens.next() {
            Some(first) => lens.all(|l| l == first),
            None => true,
        }
    }
}

/// One reconstructed but not yet validated line item.
///
/// Position `i` of every field sequence lands in row `i`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RawRow {
    pub date: RawValue,
    pub product: RawValue,
    pub quantity: RawValue,
    pub unit_price: RawValue,
    pub total_price: RawValue,
}

impl RawRow {
    pub fn set(&mut self, field: Field, value: RawValue) {
        match field {
            Field::Date => self.date = value,
            Field::Product => self.product = value,
            Field::Quantity => self.quantity = value,
            Field::UnitPrice => self.unit_price = value,
            Field::TotalPrice => self.total_price = value,
        }
    }

    pub fn get(&self, field: Field) -> &RawValue {
        match field {
            Field::Date => &self.date,
            Field::Product => &self.product,
            Field::Quantity => &self.quantity,
            Field::UnitPrice => &self.unit_price,
            Field::TotalPrice => &self.total_price,
        }
    }
}
