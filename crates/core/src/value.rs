//! Dynamic value model.
//!
//! `Value` is the canonical data type for every engine payload, filter
//! operand, and profiler record. It has exactly eight variants and no
//! implicit coercions: `Int(1)` is never equal to `Float(1.0)`, and
//! `String("abc")` is never equal to `Bytes([97, 98, 99])`.
//!
//! ## Wire encoding
//!
//! Values serialize to natural JSON. Two shapes need a wrapper because JSON
//! cannot express them directly:
//!
//! - `Bytes` encodes as `{"$bytes": "<base64>"}`
//! - non-finite floats encode as `{"$f64": "NaN" | "Inf" | "-Inf"}`
//!
//! Numbers deserialize to `Int` when they fit in `i64`, otherwise `Float`.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::de::{self, MapAccess, SeqAccess, Visitor};
use serde::ser::{SerializeMap, SerializeSeq};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

/// String-keyed map of values, the shape of documents, rows, node and edge
/// attributes, and time-series points.
pub type Object = BTreeMap<String, Value>;

/// Canonical Polystore value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// JSON null / absence of value.
    Null,

    /// Boolean true or false.
    Bool(bool),

    /// 64-bit signed integer.
    Int(i64),

    /// 64-bit IEEE-754 floating point.
    Float(f64),

    /// UTF-8 encoded string.
    String(String),

    /// Arbitrary binary data, distinct from `String`.
    Bytes(Vec<u8>),

    /// Ordered sequence of values.
    Array(Vec<Value>),

    /// String-keyed map of values.
    Object(Object),
}

impl Value {
    /// Returns the type name as a string (for error messages and the
    /// profiler's type distribution).
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::String(_) => "string",
            Value::Bytes(_) => "bytes",
            Value::Array(_) => "array",
            Value::Object(_) => "object",
        }
    }

    /// Check if this value is null.
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Check if this value is an `Int` or a `Float`.
    pub fn is_numeric(&self) -> bool {
        matches!(self, Value::Int(_) | Value::Float(_))
    }

    /// Try to get as bool.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Try to get as i64.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Numeric widening: `Int` and `Float` both read as f64.
    ///
    /// Used by aggregation and profiling, never by filter comparison.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// Try to get as string slice.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Try to get as bytes slice.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(b) => Some(b),
            _ => None,
        }
    }

    /// Try to get as array slice.
    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(a) => Some(a),
            _ => None,
        }
    }

    /// Try to get as object reference.
    pub fn as_object(&self) -> Option<&Object> {
        match self {
            Value::Object(o) => Some(o),
            _ => None,
        }
    }

    /// Try to get as mutable object reference.
    pub fn as_object_mut(&mut self) -> Option<&mut Object> {
        match self {
            Value::Object(o) => Some(o),
            _ => None,
        }
    }

    /// Consume into an object, or report the actual type.
    pub fn into_object(self) -> std::result::Result<Object, &'static str> {
        match self {
            Value::Object(o) => Ok(o),
            other => Err(other.type_name()),
        }
    }

    /// Ordering within a variant.
    ///
    /// Returns `None` whenever the variants differ, and for `Null`,
    /// `Array`, and `Object` operands which carry no natural order. Filter
    /// evaluation maps `None` to a non-match, never to an error.
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
            (Value::Int(a), Value::Int(b)) => Some(a.cmp(b)),
            (Value::Float(a), Value::Float(b)) => a.partial_cmp(b),
            (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
            (Value::Bytes(a), Value::Bytes(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }

    /// Canonical string form used as the key of secondary-index maps.
    ///
    /// Two values share an index key iff their wire encodings are equal;
    /// `Object` keys are sorted, so the encoding is deterministic.
    pub fn index_key(&self) -> String {
        // Encoding cannot fail: map keys are strings and non-finite floats
        // use the $f64 wrapper.
        serde_json::to_string(self).expect("value JSON encoding is infallible")
    }

    /// Length of the JSON encoding, used for size caps and profiling.
    pub fn json_size(&self) -> usize {
        self.index_key().len()
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<Vec<u8>> for Value {
    fn from(b: Vec<u8>) -> Self {
        Value::Bytes(b)
    }
}

impl From<Object> for Value {
    fn from(o: Object) -> Self {
        Value::Object(o)
    }
}

// ============================================================================
// Wire encoding
// ============================================================================

const BYTES_WRAPPER: &str = "$bytes";
const FLOAT_WRAPPER: &str = "$f64";

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            Value::Null => serializer.serialize_unit(),
            Value::Bool(b) => serializer.serialize_bool(*b),
            Value::Int(i) => serializer.serialize_i64(*i),
            Value::Float(f) if f.is_finite() => serializer.serialize_f64(*f),
            Value::Float(f) => {
                let tag = if f.is_nan() {
                    "NaN"
                } else if *f == f64::INFINITY {
                    "Inf"
                } else {
                    "-Inf"
                };
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry(FLOAT_WRAPPER, tag)?;
                map.end()
            }
            Value::String(s) => serializer.serialize_str(s),
            Value::Bytes(b) => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry(BYTES_WRAPPER, &BASE64.encode(b))?;
                map.end()
            }
            Value::Array(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            Value::Object(fields) => {
                let mut map = serializer.serialize_map(Some(fields.len()))?;
                for (k, v) in fields {
                    map.serialize_entry(k, v)?;
                }
                map.end()
            }
        }
    }
}

struct ValueVisitor;

impl<'de> Visitor<'de> for ValueVisitor {
    type Value = Value;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("any Polystore value")
    }

    fn visit_unit<E: de::Error>(self) -> std::result::Result<Value, E> {
        Ok(Value::Null)
    }

    fn visit_none<E: de::Error>(self) -> std::result::Result<Value, E> {
        Ok(Value::Null)
    }

    fn visit_some<D: Deserializer<'de>>(
        self,
        deserializer: D,
    ) -> std::result::Result<Value, D::Error> {
        deserializer.deserialize_any(ValueVisitor)
    }

    fn visit_bool<E: de::Error>(self, b: bool) -> std::result::Result<Value, E> {
        Ok(Value::Bool(b))
    }

    fn visit_i64<E: de::Error>(self, i: i64) -> std::result::Result<Value, E> {
        Ok(Value::Int(i))
    }

    fn visit_u64<E: de::Error>(self, u: u64) -> std::result::Result<Value, E> {
        if u <= i64::MAX as u64 {
            Ok(Value::Int(u as i64))
        } else {
            Ok(Value::Float(u as f64))
        }
    }

    fn visit_f64<E: de::Error>(self, f: f64) -> std::result::Result<Value, E> {
        Ok(Value::Float(f))
    }

    fn visit_str<E: de::Error>(self, s: &str) -> std::result::Result<Value, E> {
        Ok(Value::String(s.to_string()))
    }

    fn visit_string<E: de::Error>(self, s: String) -> std::result::Result<Value, E> {
        Ok(Value::String(s))
    }

    fn visit_bytes<E: de::Error>(self, b: &[u8]) -> std::result::Result<Value, E> {
        Ok(Value::Bytes(b.to_vec()))
    }

    fn visit_byte_buf<E: de::Error>(self, b: Vec<u8>) -> std::result::Result<Value, E> {
        Ok(Value::Bytes(b))
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> std::result::Result<Value, A::Error> {
        let mut items = Vec::with_capacity(seq.size_hint().unwrap_or(0));
        while let Some(item) = seq.next_element()? {
            items.push(item);
        }
        Ok(Value::Array(items))
    }

    fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> std::result::Result<Value, A::Error> {
        let mut fields = Object::new();
        while let Some((key, value)) = access.next_entry::<String, Value>()? {
            fields.insert(key, value);
        }

        // Unwrap the $bytes / $f64 wire wrappers.
        if fields.len() == 1 {
            if let Some(Value::String(b64)) = fields.get(BYTES_WRAPPER) {
                let decoded = BASE64
                    .decode(b64)
                    .map_err(|e| de::Error::custom(format!("invalid $bytes payload: {}", e)))?;
                return Ok(Value::Bytes(decoded));
            }
            if let Some(Value::String(tag)) = fields.get(FLOAT_WRAPPER) {
                let f = match tag.as_str() {
                    "NaN" => f64::NAN,
                    "Inf" => f64::INFINITY,
                    "-Inf" => f64::NEG_INFINITY,
                    other => {
                        return Err(de::Error::custom(format!("invalid $f64 tag: {}", other)))
                    }
                };
                return Ok(Value::Float(f));
            }
        }

        Ok(Value::Object(fields))
    }
}

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Value, D::Error> {
        deserializer.deserialize_any(ValueVisitor)
    }
}

/// Build an [`Object`] from `(key, value)` pairs.
///
/// Convenience for tests and callers assembling documents by hand.
pub fn object<I, K>(pairs: I) -> Object
where
    I: IntoIterator<Item = (K, Value)>,
    K: Into<String>,
{
    pairs.into_iter().map(|(k, v)| (k.into(), v)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_names_cover_all_variants() {
        assert_eq!(Value::Null.type_name(), "null");
        assert_eq!(Value::Bool(true).type_name(), "bool");
        assert_eq!(Value::Int(1).type_name(), "int");
        assert_eq!(Value::Float(1.5).type_name(), "float");
        assert_eq!(Value::from("x").type_name(), "string");
        assert_eq!(Value::Bytes(vec![1]).type_name(), "bytes");
        assert_eq!(Value::Array(vec![]).type_name(), "array");
        assert_eq!(Value::Object(Object::new()).type_name(), "object");
    }

    #[test]
    fn no_cross_variant_equality() {
        assert_ne!(Value::Int(1), Value::Float(1.0));
        assert_ne!(Value::from("abc"), Value::Bytes(b"abc".to_vec()));
    }

    #[test]
    fn compare_within_variant_only() {
        assert_eq!(
            Value::Int(2).compare(&Value::Int(3)),
            Some(Ordering::Less)
        );
        assert_eq!(
            Value::from("b").compare(&Value::from("a")),
            Some(Ordering::Greater)
        );
        assert_eq!(Value::Int(2).compare(&Value::Float(3.0)), None);
        assert_eq!(Value::Null.compare(&Value::Null), None);
    }

    #[test]
    fn nan_compares_to_nothing() {
        assert_eq!(
            Value::Float(f64::NAN).compare(&Value::Float(1.0)),
            None
        );
    }

    #[test]
    fn json_round_trip_scalars() {
        for v in [
            Value::Null,
            Value::Bool(false),
            Value::Int(-42),
            Value::Float(2.5),
            Value::from("hello"),
        ] {
            let text = serde_json::to_string(&v).unwrap();
            let back: Value = serde_json::from_str(&text).unwrap();
            assert_eq!(v, back);
        }
    }

    #[test]
    fn bytes_encode_as_base64_wrapper() {
        let v = Value::Bytes(vec![0, 1, 2, 255]);
        let text = serde_json::to_string(&v).unwrap();
        assert!(text.contains("$bytes"));
        let back: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(v, back);
    }

    #[test]
    fn non_finite_floats_round_trip() {
        for f in [f64::INFINITY, f64::NEG_INFINITY] {
            let text = serde_json::to_string(&Value::Float(f)).unwrap();
            let back: Value = serde_json::from_str(&text).unwrap();
            assert_eq!(back, Value::Float(f));
        }
        let text = serde_json::to_string(&Value::Float(f64::NAN)).unwrap();
        let back: Value = serde_json::from_str(&text).unwrap();
        assert!(matches!(back, Value::Float(f) if f.is_nan()));
    }

    #[test]
    fn integral_numbers_deserialize_as_int() {
        let v: Value = serde_json::from_str("7").unwrap();
        assert_eq!(v, Value::Int(7));
        let v: Value = serde_json::from_str("7.5").unwrap();
        assert_eq!(v, Value::Float(7.5));
    }

    #[test]
    fn nested_object_round_trip() {
        let v = Value::Object(object([
            ("name", Value::from("alice")),
            (
                "address",
                Value::Object(object([("city", Value::from("zurich"))])),
            ),
            ("scores", Value::Array(vec![Value::Int(1), Value::Int(2)])),
        ]));
        let text = serde_json::to_string(&v).unwrap();
        let back: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(v, back);
    }

    #[test]
    fn index_key_is_deterministic() {
        let a = Value::Object(object([
            ("b", Value::Int(2)),
            ("a", Value::Int(1)),
        ]));
        let b = Value::Object(object([
            ("a", Value::Int(1)),
            ("b", Value::Int(2)),
        ]));
        assert_eq!(a.index_key(), b.index_key());
        assert_ne!(Value::Int(1).index_key(), Value::Float(1.0).index_key());
    }

    #[test]
    fn messagepack_round_trip() {
        let v = Value::Object(object([
            ("blob", Value::Bytes(vec![9, 8, 7])),
            ("n", Value::Int(3)),
        ]));
        let bytes = rmp_serde::to_vec(&v).unwrap();
        let back: Value = rmp_serde::from_slice(&bytes).unwrap();
        assert_eq!(v, back);
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        fn scalar() -> impl Strategy<Value = Value> {
            prop_oneof![
                Just(Value::Null),
                any::<bool>().prop_map(Value::Bool),
                any::<i64>().prop_map(Value::Int),
                // Finite floats only; NaN can never equal itself.
                (-1e12f64..1e12).prop_map(Value::Float),
                ".{0,24}".prop_map(Value::from),
                proptest::collection::vec(any::<u8>(), 0..32).prop_map(Value::Bytes),
            ]
        }

        fn tree() -> impl Strategy<Value = Value> {
            scalar().prop_recursive(3, 32, 8, |inner| {
                prop_oneof![
                    proptest::collection::vec(inner.clone(), 0..4).prop_map(Value::Array),
                    proptest::collection::btree_map("[a-z]{1,6}", inner, 0..4)
                        .prop_map(Value::Object),
                ]
            })
        }

        proptest! {
            #[test]
            fn json_round_trips_any_tree(v in tree()) {
                let text = serde_json::to_string(&v).unwrap();
                let back: Value = serde_json::from_str(&text).unwrap();
                prop_assert_eq!(&v, &back);
            }

            #[test]
            fn messagepack_round_trips_any_tree(v in tree()) {
                let bytes = rmp_serde::to_vec(&v).unwrap();
                let back: Value = rmp_serde::from_slice(&bytes).unwrap();
                prop_assert_eq!(&v, &back);
            }

            #[test]
            fn index_key_agrees_with_equality(
                // Floats stay out: -0.0 == 0.0 but the two encode apart.
                a in prop_oneof![
                    any::<bool>().prop_map(Value::Bool),
                    any::<i64>().prop_map(Value::Int),
                    ".{0,24}".prop_map(Value::from),
                ],
                b in prop_oneof![
                    any::<bool>().prop_map(Value::Bool),
                    any::<i64>().prop_map(Value::Int),
                    ".{0,24}".prop_map(Value::from),
                ],
            ) {
                prop_assert_eq!(a == b, a.index_key() == b.index_key());
            }
        }
    }
}
