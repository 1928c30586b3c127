//! # Generic Row Codec
//!
//! Converts typed records to and from a [`Row`] (`pb::AbstractObject`), the keyed form used
//! for backend objects that have no dedicated message in the schema.
//!
//! The conversion is driven by the record's `serde` implementation: the record is first
//! serialized to a `serde_json::Value`, then every field is encoded with the
//! [DynamicValue codec](crate::value). Decoding walks the same path backwards.
//!
//! `null` fields are dropped when building a row, so an unset optional field simply does not
//! appear in it, and comes back as `None`.
use crate::pb;
use crate::value::{ConversionError, FromDynamic, IntoDynamic, InvariantViolation};
use serde::{Serialize, de::DeserializeOwned};
use serde_json::{Map, Value};
use std::collections::HashMap;

/// A record in its generic keyed form: field name to dynamic value.
pub type Row = pb::AbstractObject;

/// Capability of being flattened into a [`Row`].
pub trait ToRow {
    fn to_row(&self) -> Result<Row, InvariantViolation>;
}

/// Capability of being rebuilt from a [`Row`].
pub trait FromRow: Sized {
    fn from_row(row: &Row) -> Result<Self, ConversionError>;
}

impl<T: Serialize + ?Sized> ToRow for T {
    fn to_row(&self) -> Result<Row, InvariantViolation> {
        to_row(self)
    }
}

impl<T: DeserializeOwned> FromRow for T {
    fn from_row(row: &Row) -> Result<Self, ConversionError> {
        from_row(row)
    }
}

/// Flattens `value` into a [`Row`].
///
/// `value` must serialize to a keyed structure (a struct or a map).
pub fn to_row<T: Serialize + ?Sized>(value: &T) -> Result<Row, InvariantViolation> {
    match serde_json::to_value(value).map_err(InvariantViolation::Serialize)? {
        Value::Object(map) => from_json_map(map),
        other => Err(InvariantViolation::NotAnObject(json_kind(&other))),
    }
}

/// Flattens every record of `values`, preserving their order.
pub fn to_rows<T: Serialize>(values: &[T]) -> Result<Vec<Row>, InvariantViolation> {
    values.iter().map(to_row).collect()
}

/// Rebuilds a `T` from `row`.
pub fn from_row<T: DeserializeOwned>(row: &Row) -> Result<T, ConversionError> {
    let map = into_json_map(row.clone())?;
    serde_json::from_value(Value::Object(map)).map_err(ConversionError::Materialize)
}

/// Rebuilds a `T` from a row that may be absent.
///
/// An absent or empty row yields `T::default()`.
pub fn from_optional_row<T>(row: Option<&Row>) -> Result<T, ConversionError>
where
    T: DeserializeOwned + Default,
{
    match row {
        Some(row) if !row.fields.is_empty() => from_row(row),
        _ => Ok(T::default()),
    }
}

/// Rebuilds every row of `rows`.
///
/// The first failure is reported with its index and a copy of the offending row.
pub fn from_rows<T: DeserializeOwned>(rows: &[Row]) -> Result<Vec<T>, ConversionError> {
    rows.iter()
        .enumerate()
        .map(|(index, row)| {
            from_row(row).map_err(|source| ConversionError::AtRow {
                index,
                row: row.clone(),
                source: Box::new(source),
            })
        })
        .collect()
}

pub(crate) fn from_json_map(map: Map<String, Value>) -> Result<Row, InvariantViolation> {
    let (row, omitted) = from_json_map_partial(map);
    match omitted.into_iter().next() {
        Some((field, source)) => Err(InvariantViolation::InField {
            field,
            source: Box::new(source),
        }),
        None => Ok(row),
    }
}

/// Like [`from_json_map`], but keeps going past unrepresentable fields. They are left out of
/// the row and returned next to it.
pub(crate) fn from_json_map_partial(
    map: Map<String, Value>,
) -> (Row, Vec<(String, InvariantViolation)>) {
    let mut fields = HashMap::with_capacity(map.len());
    let mut omitted = Vec::new();
    for (field, value) in map {
        if value.is_null() {
            continue;
        }
        match value.into_dynamic() {
            Ok(value) => {
                fields.insert(field, value);
            }
            Err(source) => omitted.push((field, source)),
        }
    }
    (Row { fields }, omitted)
}

pub(crate) fn into_json_map(row: Row) -> Result<Map<String, Value>, ConversionError> {
    let mut map = Map::new();
    for (field, value) in row.fields {
        match Value::from_dynamic(value) {
            Ok(value) => {
                map.insert(field, value);
            }
            Err(source) => {
                return Err(ConversionError::InField {
                    field,
                    source: Box::new(source),
                });
            }
        }
    }
    Ok(map)
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a bool",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
