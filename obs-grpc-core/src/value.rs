//! # DynamicValue Codec
//!
//! Conversion between native Rust values and [`pb::Any`], the closed tagged union that the
//! proxy uses for fields whose shape is not fixed by the schema.
//!
//! ## Encoding rules
//!
//! | Native value                                   | Variant   |
//! |------------------------------------------------|-----------|
//! | `String`, `&str`, `Vec<u8>`, `&[u8]`           | `string`  |
//! | every signed and unsigned integer width        | `integer` |
//! | `f32`, `f64`                                   | `float`   |
//! | `bool`                                         | `bool`    |
//! | [`Row`], JSON objects, [`Object<T>`] records   | `object`  |
//!
//! Text and bytes share the `string` variant, so decoding always hands back bytes and a
//! `String` target additionally requires valid UTF-8.
//!
//! Types outside this table do not implement [`IntoDynamic`], so the compiler rejects them.
//! What is left to check at runtime (JSON `null`s and arrays, unsigned integers above
//! `i64::MAX`) is reported as an [`InvariantViolation`] instead of being truncated.
use crate::pb::{self, any::Union};
use crate::row::{self, Row};
use serde::{Serialize, de::DeserializeOwned};
use serde_json::Value;

/// A native value reached the codec although it has no dynamic representation.
///
/// The set of values fed to the codec is fixed by the per-operation handlers, so this is a
/// programming error. It fails the in-flight call and nothing else.
#[derive(Debug, thiserror::Error)]
pub enum InvariantViolation {
    #[error("{0} has no dynamic value representation")]
    Unrepresentable(&'static str),
    #[error("integer {0} does not fit into a signed 64-bit dynamic value")]
    IntegerOverflow(String),
    #[error("a row can only be built from a keyed structure, got {0}")]
    NotAnObject(&'static str),
    #[error("unable to serialize the record: '{0}'")]
    Serialize(#[source] serde_json::Error),
    #[error("field '{field}': {source}")]
    InField {
        field: String,
        source: Box<InvariantViolation>,
    },
}

/// A dynamic value could not be materialized as the requested native type.
#[derive(Debug, thiserror::Error)]
pub enum ConversionError {
    #[error("dynamic value has no variant set")]
    EmptyValue,
    #[error("expected a dynamic value of kind '{expected}', found '{found}'")]
    KindMismatch {
        expected: &'static str,
        found: &'static str,
    },
    #[error("integer {value} does not fit into {target}")]
    OutOfRange { value: i64, target: &'static str },
    #[error("byte string is not valid UTF-8: '{0}'")]
    InvalidUtf8(#[from] std::string::FromUtf8Error),
    #[error("float {0} has no JSON representation")]
    NonFiniteFloat(f64),
    #[error("unable to materialize the record: '{0}'")]
    Materialize(#[source] serde_json::Error),
    #[error("field '{field}': {source}")]
    InField {
        field: String,
        source: Box<ConversionError>,
    },
    #[error("row #{index} could not be converted: {source} (row: {row:?})")]
    AtRow {
        index: usize,
        row: Row,
        source: Box<ConversionError>,
    },
}

/// Encodes a native value as a [`pb::Any`].
pub trait IntoDynamic {
    fn into_dynamic(self) -> Result<pb::Any, InvariantViolation>;
}

/// Decodes a [`pb::Any`] back into a native value.
pub trait FromDynamic: Sized {
    fn from_dynamic(value: pb::Any) -> Result<Self, ConversionError>;
}

/// Encodes `value` with its [`IntoDynamic`] implementation.
pub fn encode<T: IntoDynamic>(value: T) -> Result<pb::Any, InvariantViolation> {
    value.into_dynamic()
}

/// Decodes `value` with the [`FromDynamic`] implementation of `T`.
pub fn decode<T: FromDynamic>(value: pb::Any) -> Result<T, ConversionError> {
    T::from_dynamic(value)
}

/// Decodes an optional value, handing back `T::default()` when the payload is absent.
pub fn decode_optional<T>(value: Option<pb::Any>) -> Result<T, ConversionError>
where
    T: FromDynamic + Default,
{
    match value {
        Some(value) if value.union.is_some() => T::from_dynamic(value),
        _ => Ok(T::default()),
    }
}

/// The name of the variant held by `union`, as used in error messages.
pub fn kind(union: &Union) -> &'static str {
    match union {
        Union::Integer(_) => "integer",
        Union::Float(_) => "float",
        Union::String(_) => "string",
        Union::Bool(_) => "bool",
        Union::Object(_) => "object",
    }
}

fn wrap(union: Union) -> pb::Any {
    pb::Any { union: Some(union) }
}

fn take(value: pb::Any) -> Result<Union, ConversionError> {
    value.union.ok_or(ConversionError::EmptyValue)
}

fn mismatch(expected: &'static str, union: &Union) -> ConversionError {
    ConversionError::KindMismatch {
        expected,
        found: kind(union),
    }
}

fn integer(value: pb::Any) -> Result<i64, ConversionError> {
    match take(value)? {
        Union::Integer(v) => Ok(v),
        other => Err(mismatch("integer", &other)),
    }
}

macro_rules! integer_codec {
    ($($ty:ty),* $(,)?) => {$(
        impl IntoDynamic for $ty {
            fn into_dynamic(self) -> Result<pb::Any, InvariantViolation> {
                let v = i64::try_from(self)
                    .map_err(|_| InvariantViolation::IntegerOverflow(self.to_string()))?;
                Ok(wrap(Union::Integer(v)))
            }
        }

        impl FromDynamic for $ty {
            fn from_dynamic(value: pb::Any) -> Result<Self, ConversionError> {
                let v = integer(value)?;
                <$ty>::try_from(v).map_err(|_| ConversionError::OutOfRange {
                    value: v,
                    target: stringify!($ty),
                })
            }
        }
    )*};
}

integer_codec!(i8, i16, i32, i64, isize, u8, u16, u32, u64, usize);

impl IntoDynamic for f64 {
    fn into_dynamic(self) -> Result<pb::Any, InvariantViolation> {
        Ok(wrap(Union::Float(self)))
    }
}

impl FromDynamic for f64 {
    fn from_dynamic(value: pb::Any) -> Result<Self, ConversionError> {
        match take(value)? {
            Union::Float(v) => Ok(v),
            other => Err(mismatch("float", &other)),
        }
    }
}

impl IntoDynamic for f32 {
    fn into_dynamic(self) -> Result<pb::Any, InvariantViolation> {
        f64::from(self).into_dynamic()
    }
}

impl FromDynamic for f32 {
    fn from_dynamic(value: pb::Any) -> Result<Self, ConversionError> {
        f64::from_dynamic(value).map(|v| v as f32)
    }
}

impl IntoDynamic for bool {
    fn into_dynamic(self) -> Result<pb::Any, InvariantViolation> {
        Ok(wrap(Union::Bool(self)))
    }
}

impl FromDynamic for bool {
    fn from_dynamic(value: pb::Any) -> Result<Self, ConversionError> {
        match take(value)? {
            Union::Bool(v) => Ok(v),
            other => Err(mismatch("bool", &other)),
        }
    }
}

impl IntoDynamic for Vec<u8> {
    fn into_dynamic(self) -> Result<pb::Any, InvariantViolation> {
        Ok(wrap(Union::String(self)))
    }
}

impl IntoDynamic for &[u8] {
    fn into_dynamic(self) -> Result<pb::Any, InvariantViolation> {
        self.to_vec().into_dynamic()
    }
}

impl FromDynamic for Vec<u8> {
    fn from_dynamic(value: pb::Any) -> Result<Self, ConversionError> {
        match take(value)? {
            Union::String(v) => Ok(v),
            other => Err(mismatch("string", &other)),
        }
    }
}

impl IntoDynamic for String {
    fn into_dynamic(self) -> Result<pb::Any, InvariantViolation> {
        self.into_bytes().into_dynamic()
    }
}

impl IntoDynamic for &str {
    fn into_dynamic(self) -> Result<pb::Any, InvariantViolation> {
        self.as_bytes().into_dynamic()
    }
}

impl FromDynamic for String {
    fn from_dynamic(value: pb::Any) -> Result<Self, ConversionError> {
        let bytes = Vec::<u8>::from_dynamic(value)?;
        Ok(String::from_utf8(bytes)?)
    }
}

impl IntoDynamic for Row {
    fn into_dynamic(self) -> Result<pb::Any, InvariantViolation> {
        Ok(wrap(Union::Object(self)))
    }
}

impl FromDynamic for Row {
    fn from_dynamic(value: pb::Any) -> Result<Self, ConversionError> {
        match take(value)? {
            Union::Object(row) => Ok(row),
            other => Err(mismatch("object", &other)),
        }
    }
}

impl IntoDynamic for Value {
    fn into_dynamic(self) -> Result<pb::Any, InvariantViolation> {
        let union = match self {
            Value::Bool(v) => Union::Bool(v),
            Value::String(v) => Union::String(v.into_bytes()),
            Value::Number(n) => number(&n)?,
            Value::Object(map) => Union::Object(row::from_json_map(map)?),
            Value::Null => return Err(InvariantViolation::Unrepresentable("null")),
            Value::Array(_) => return Err(InvariantViolation::Unrepresentable("an array")),
        };
        Ok(wrap(union))
    }
}

fn number(n: &serde_json::Number) -> Result<Union, InvariantViolation> {
    if let Some(v) = n.as_i64() {
        return Ok(Union::Integer(v));
    }
    // Integers that are not i64 can only be unsigned values above i64::MAX.
    if n.is_u64() {
        return Err(InvariantViolation::IntegerOverflow(n.to_string()));
    }
    n.as_f64()
        .map(Union::Float)
        .ok_or(InvariantViolation::Unrepresentable("a non-numeric number"))
}

/// Decoding into JSON accepts every variant; it is the inverse used by the row codec.
impl FromDynamic for Value {
    fn from_dynamic(value: pb::Any) -> Result<Self, ConversionError> {
        match take(value)? {
            Union::Integer(v) => Ok(Value::from(v)),
            Union::Float(v) => serde_json::Number::from_f64(v)
                .map(Value::Number)
                .ok_or(ConversionError::NonFiniteFloat(v)),
            Union::String(v) => Ok(Value::String(String::from_utf8(v)?)),
            Union::Bool(v) => Ok(Value::Bool(v)),
            Union::Object(row) => Ok(Value::Object(row::into_json_map(row)?)),
        }
    }
}

impl IntoDynamic for serde_json::Map<String, Value> {
    fn into_dynamic(self) -> Result<pb::Any, InvariantViolation> {
        Ok(wrap(Union::Object(row::from_json_map(self)?)))
    }
}

impl FromDynamic for serde_json::Map<String, Value> {
    fn from_dynamic(value: pb::Any) -> Result<Self, ConversionError> {
        row::into_json_map(Row::from_dynamic(value)?)
    }
}

/// Marks a record that travels as the `object` variant.
///
/// Any `serde` type can be wrapped; the conversion goes through the row codec.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Object<T>(pub T);

impl<T: Serialize> IntoDynamic for Object<T> {
    fn into_dynamic(self) -> Result<pb::Any, InvariantViolation> {
        Ok(wrap(Union::Object(row::to_row(&self.0)?)))
    }
}

/// An object without fields decodes like `{}`, so records with required fields fail with
/// [`ConversionError::Materialize`]. Use [`Object::from_dynamic_or_default`] to get
/// `T::default()` instead.
impl<T: DeserializeOwned> FromDynamic for Object<T> {
    fn from_dynamic(value: pb::Any) -> Result<Self, ConversionError> {
        let row = Row::from_dynamic(value)?;
        row::from_row(&row).map(Object)
    }
}

impl<T: DeserializeOwned + Default> Object<T> {
    /// Decodes a record, yielding `T::default()` for an empty object or an unset value.
    pub fn from_dynamic_or_default(value: pb::Any) -> Result<Self, ConversionError> {
        if value.union.is_none() {
            return Ok(Object(T::default()));
        }
        let row = Row::from_dynamic(value)?;
        row::from_optional_row(Some(&row)).map(Object)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    fn round_trip<T>(value: T) -> T
    where
        T: IntoDynamic + FromDynamic,
    {
        decode(encode(value).unwrap()).unwrap()
    }

    #[test]
    fn test_scalar_round_trips() {
        assert_eq!(round_trip(-7i8), -7);
        assert_eq!(round_trip(i16::MIN), i16::MIN);
        assert_eq!(round_trip(1_000_000i32), 1_000_000);
        assert_eq!(round_trip(i64::MAX), i64::MAX);
        assert_eq!(round_trip(255u8), 255);
        assert_eq!(round_trip(u32::MAX), u32::MAX);
        assert_eq!(round_trip(i64::MAX as u64), i64::MAX as u64);
        assert_eq!(round_trip(1.5f32), 1.5);
        assert_eq!(round_trip(-0.25f64), -0.25);
        assert!(round_trip(true));
        assert_eq!(round_trip(b"\x00\xff".to_vec()), b"\x00\xff".to_vec());
        assert_eq!(round_trip("scene".to_string()), "scene");
    }

    #[test]
    fn test_text_and_bytes_share_the_string_variant() {
        let from_text = encode("Scene 1").unwrap();
        let from_bytes = encode(b"Scene 1".as_slice()).unwrap();
        assert_eq!(from_text, from_bytes);

        let bytes: Vec<u8> = decode(from_text).unwrap();
        assert_eq!(bytes, b"Scene 1");
    }

    #[test]
    fn test_integers_are_widened() {
        let value = encode(42u16).unwrap();
        assert_eq!(value.union, Some(Union::Integer(42)));

        let value = encode(-3i8).unwrap();
        assert_eq!(value.union, Some(Union::Integer(-3)));
    }

    #[test]
    fn test_unsigned_overflow_is_an_invariant_violation() {
        let err = encode(u64::MAX).unwrap_err();
        assert!(matches!(err, InvariantViolation::IntegerOverflow(ref v) if v == "18446744073709551615"));

        let err = encode(json!(u64::MAX)).unwrap_err();
        assert!(matches!(err, InvariantViolation::IntegerOverflow(_)));
    }

    #[test]
    fn test_narrowing_out_of_range_fails() {
        let value = encode(300i64).unwrap();
        let err = decode::<u8>(value).unwrap_err();
        assert!(matches!(
            err,
            ConversionError::OutOfRange {
                value: 300,
                target: "u8"
            }
        ));

        let err = decode::<u32>(encode(-1i32).unwrap()).unwrap_err();
        assert!(matches!(err, ConversionError::OutOfRange { value: -1, .. }));
    }

    #[test]
    fn test_kind_mismatch() {
        let err = decode::<bool>(encode(1i64).unwrap()).unwrap_err();
        assert!(matches!(
            err,
            ConversionError::KindMismatch {
                expected: "bool",
                found: "integer"
            }
        ));
    }

    #[test]
    fn test_empty_value_is_rejected() {
        let err = decode::<i64>(pb::Any { union: None }).unwrap_err();
        assert!(matches!(err, ConversionError::EmptyValue));
    }

    #[test]
    fn test_invalid_utf8_cannot_become_text() {
        let value = encode(vec![0xff, 0xfe]).unwrap();
        let err = decode::<String>(value).unwrap_err();
        assert!(matches!(err, ConversionError::InvalidUtf8(_)));
    }

    #[test]
    fn test_json_values() {
        assert_eq!(
            encode(json!(12)).unwrap().union,
            Some(Union::Integer(12))
        );
        assert_eq!(
            encode(json!(0.5)).unwrap().union,
            Some(Union::Float(0.5))
        );
        assert_eq!(
            encode(json!("text")).unwrap().union,
            Some(Union::String(b"text".to_vec()))
        );

        let nested = json!({ "a": { "b": true } });
        assert_eq!(round_trip(nested.clone()), nested);
    }

    #[test]
    fn test_json_null_and_arrays_are_unrepresentable() {
        let err = encode(Value::Null).unwrap_err();
        assert!(matches!(err, InvariantViolation::Unrepresentable("null")));

        let err = encode(json!([1, 2])).unwrap_err();
        assert!(matches!(err, InvariantViolation::Unrepresentable("an array")));
    }

    #[test]
    fn test_non_finite_float_has_no_json_form() {
        let value = encode(f64::NAN).unwrap();
        let err = decode::<Value>(value).unwrap_err();
        assert!(matches!(err, ConversionError::NonFiniteFloat(_)));
    }

    #[test]
    fn test_absent_payload_yields_default() {
        let value: Value = decode_optional(None).unwrap();
        assert_eq!(value, Value::Null);

        let count: i64 = decode_optional(Some(pb::Any { union: None })).unwrap();
        assert_eq!(count, 0);

        let muted: bool = decode_optional(Some(encode(true).unwrap())).unwrap();
        assert!(muted);
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Transform {
        position_x: f64,
        rotation: f64,
        locked: bool,
    }

    #[test]
    fn test_records_travel_as_objects() {
        let transform = Transform {
            position_x: 10.5,
            rotation: 90.0,
            locked: false,
        };

        let value = encode(Object(transform.clone())).unwrap();
        assert!(matches!(value.union, Some(Union::Object(_))));

        let Object(decoded) = decode::<Object<Transform>>(value).unwrap();
        assert_eq!(decoded, transform);
    }

    #[test]
    fn test_empty_object_decodes_to_default_on_request() {
        #[derive(Debug, Default, PartialEq, Deserialize)]
        struct Volume {
            input_volume_db: f64,
        }

        let empty = pb::Any {
            union: Some(Union::Object(Row::default())),
        };
        let err = decode::<Object<Volume>>(empty.clone()).unwrap_err();
        assert!(matches!(err, ConversionError::Materialize(_)));

        let Object(volume) = Object::<Volume>::from_dynamic_or_default(empty).unwrap();
        assert_eq!(volume, Volume::default());

        let Object(volume) =
            Object::<Volume>::from_dynamic_or_default(pb::Any { union: None }).unwrap();
        assert_eq!(volume, Volume::default());
    }
}
