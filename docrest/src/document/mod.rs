// Document value tree - the untyped record shape shared by the validator,
// the query compiler and the storage backends.

use crate::error::{DocrestError, Result};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;

/// A document: string keys to dynamic values.
pub type Map = BTreeMap<String, Value>;

/// Boundary name of the identity field.
pub const ID_FIELD: &str = "id";
/// Storage name of the identity field.
pub const PRIMARY_KEY: &str = "_id";

/// A dynamic value.
///
/// Integers that fit `i64` are held as `Int`, larger unsigned integers as
/// `Uint`. `Bytes` only appears when a caller builds values directly; JSON
/// input never produces it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "serde_json::Value", into = "serde_json::Value")]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Uint(u64),
    Float(f64),
    String(String),
    Bytes(Vec<u8>),
    Array(Vec<Value>),
    Object(Map),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&Map> {
        match self {
            Value::Object(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_object_mut(&mut self) -> Option<&mut Map> {
        match self {
            Value::Object(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&Vec<Value>> {
        match self {
            Value::Array(a) => Some(a),
            _ => None,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Uint(_) => "uint",
            Value::Float(_) => "float",
            Value::String(_) => "string",
            Value::Bytes(_) => "bytes",
            Value::Array(_) => "array",
            Value::Object(_) => "object",
        }
    }

    fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Uint(u) => Some(*u as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    fn as_i128(&self) -> Option<i128> {
        match self {
            Value::Int(i) => Some(*i as i128),
            Value::Uint(u) => Some(*u as i128),
            _ => None,
        }
    }

    /// Equality that treats every numeric variant as a number, so `Int(0)`
    /// equals `Float(0.0)`. Containers compare element-wise.
    pub fn loose_eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Array(a), Value::Array(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.loose_eq(y))
            }
            (Value::Object(a), Value::Object(b)) => {
                a.len() == b.len()
                    && a.iter()
                        .zip(b)
                        .all(|((ka, va), (kb, vb))| ka == kb && va.loose_eq(vb))
            }
            (Value::Bytes(a), Value::String(b)) | (Value::String(b), Value::Bytes(a)) => {
                a.as_slice() == b.as_bytes()
            }
            _ => match (self.as_i128(), other.as_i128()) {
                (Some(a), Some(b)) => a == b,
                _ => match (self.as_f64(), other.as_f64()) {
                    (Some(a), Some(b)) => a == b,
                    _ => self == other,
                },
            },
        }
    }

    fn type_rank(&self) -> u8 {
        match self {
            Value::Null => 0,
            Value::Int(_) | Value::Uint(_) | Value::Float(_) => 1,
            Value::String(_) | Value::Bytes(_) => 2,
            Value::Object(_) => 3,
            Value::Array(_) => 4,
            Value::Bool(_) => 5,
        }
    }

    /// Total order used for sorting: values of different types order by type
    /// (null, numbers, strings, objects, arrays, booleans), numbers compare
    /// numerically whatever their variant.
    pub fn total_cmp(&self, other: &Value) -> Ordering {
        let rank = self.type_rank().cmp(&other.type_rank());
        if rank != Ordering::Equal {
            return rank;
        }
        match (self, other) {
            (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
            (Value::Array(a), Value::Array(b)) => {
                for (x, y) in a.iter().zip(b) {
                    let ord = x.total_cmp(y);
                    if ord != Ordering::Equal {
                        return ord;
                    }
                }
                a.len().cmp(&b.len())
            }
            (Value::Object(a), Value::Object(b)) => {
                for ((ka, va), (kb, vb)) in a.iter().zip(b) {
                    let ord = ka.cmp(kb).then_with(|| va.total_cmp(vb));
                    if ord != Ordering::Equal {
                        return ord;
                    }
                }
                a.len().cmp(&b.len())
            }
            _ => {
                if let (Some(a), Some(b)) = (self.as_i128(), other.as_i128()) {
                    return a.cmp(&b);
                }
                if let (Some(a), Some(b)) = (self.as_f64(), other.as_f64()) {
                    return a.partial_cmp(&b).unwrap_or(Ordering::Equal);
                }
                text_bytes(self).cmp(text_bytes(other))
            }
        }
    }

    /// Ordering between two values of comparable type, `None` otherwise.
    /// Range predicates only match comparable values.
    pub fn partial_compare(&self, other: &Value) -> Option<Ordering> {
        if self.type_rank() != other.type_rank() || self.type_rank() == 0 {
            return None;
        }
        match (self, other) {
            (Value::Float(_), _) | (_, Value::Float(_)) => {
                self.as_f64()?.partial_cmp(&other.as_f64()?)
            }
            _ => Some(self.total_cmp(other)),
        }
    }
}

fn text_bytes(v: &Value) -> &[u8] {
    match v {
        Value::String(s) => s.as_bytes(),
        Value::Bytes(b) => b,
        _ => &[],
    }
}

impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Value::Int(i)
                } else if let Some(u) = n.as_u64() {
                    Value::Uint(u)
                } else {
                    Value::Float(n.as_f64().unwrap_or(f64::NAN))
                }
            }
            serde_json::Value::String(s) => Value::String(s),
            serde_json::Value::Array(arr) => {
                Value::Array(arr.into_iter().map(Value::from).collect())
            }
            serde_json::Value::Object(map) => {
                Value::Object(map.into_iter().map(|(k, v)| (k, Value::from(v))).collect())
            }
        }
    }
}

impl From<Value> for serde_json::Value {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(b),
            Value::Int(i) => serde_json::Value::Number(i.into()),
            Value::Uint(u) => serde_json::Value::Number(u.into()),
            Value::Float(f) => serde_json::Number::from_f64(f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::String(s) => serde_json::Value::String(s),
            Value::Bytes(b) => serde_json::Value::String(String::from_utf8_lossy(&b).into_owned()),
            Value::Array(arr) => {
                serde_json::Value::Array(arr.into_iter().map(serde_json::Value::from).collect())
            }
            Value::Object(map) => serde_json::Value::Object(
                map.into_iter()
                    .map(|(k, v)| (k, serde_json::Value::from(v)))
                    .collect(),
            ),
        }
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

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

/// Parse a request body into a document. The body must be a JSON object.
pub fn parse_document(body: &[u8]) -> Result<Map> {
    let json: serde_json::Value = serde_json::from_slice(body)?;
    match Value::from(json) {
        Value::Object(map) => Ok(map),
        other => Err(DocrestError::BadRequest(format!(
            "invalid body: expected object, got {}",
            other.type_name()
        ))),
    }
}

/// Render a document as JSON.
pub fn to_json(doc: &Map) -> serde_json::Value {
    serde_json::Value::from(Value::Object(doc.clone()))
}

/// Every value reachable at a dotted path. Arrays met on the way are
/// descended element by element, so `comments.user_id` yields the `user_id`
/// of each comment.
pub fn resolve<'a>(doc: &'a Map, path: &str) -> Vec<&'a Value> {
    let segments: Vec<&str> = path.split('.').collect();
    let mut out = Vec::new();
    if let Some((first, rest)) = segments.split_first() {
        if let Some(v) = doc.get(*first) {
            descend(v, rest, &mut out);
        }
    }
    out
}

fn descend<'a>(value: &'a Value, rest: &[&str], out: &mut Vec<&'a Value>) {
    let Some((head, tail)) = rest.split_first() else {
        out.push(value);
        return;
    };
    match value {
        Value::Object(map) => {
            if let Some(v) = map.get(*head) {
                descend(v, tail, out);
            }
        }
        Value::Array(items) => {
            for item in items {
                if let Value::Object(map) = item {
                    if let Some(v) = map.get(*head) {
                        descend(v, tail, out);
                    }
                }
            }
        }
        _ => {}
    }
}

/// The value at a dotted path, following nested objects only.
pub fn get_path<'a>(doc: &'a Map, path: &str) -> Option<&'a Value> {
    let mut segments = path.split('.');
    let mut current = doc.get(segments.next()?)?;
    for seg in segments {
        current = current.as_object()?.get(seg)?;
    }
    Some(current)
}

/// Set the value at a dotted path, creating missing intermediate objects.
///
/// Returns false, leaving `doc` untouched, when an intermediate entry
/// exists but is not an object.
pub fn set_path(doc: &mut Map, path: &str, value: Value) -> bool {
    match path.split_once('.') {
        None => {
            doc.insert(path.to_string(), value);
            true
        }
        Some((head, rest)) => {
            let entry = doc
                .entry(head.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            match entry {
                Value::Object(inner) => set_path(inner, rest, value),
                _ => false,
            }
        }
    }
}

/// Rename the boundary identity field to the storage primary key.
pub fn rename_in(doc: &mut Map) {
    if let Some(v) = doc.remove(ID_FIELD) {
        doc.insert(PRIMARY_KEY.to_string(), v);
    }
}

/// Rename the storage primary key back to the boundary identity field.
pub fn rename_out(doc: &mut Map) {
    if let Some(v) = doc.remove(PRIMARY_KEY) {
        doc.insert(ID_FIELD.to_string(), v);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(v: serde_json::Value) -> Map {
        match Value::from(v) {
            Value::Object(m) => m,
            _ => panic!("not an object"),
        }
    }

    #[test]
    fn test_json_numbers_map_to_variants() {
        assert_eq!(Value::from(json!(3)), Value::Int(3));
        assert_eq!(Value::from(json!(-3)), Value::Int(-3));
        assert_eq!(Value::from(json!(u64::MAX)), Value::Uint(u64::MAX));
        assert_eq!(Value::from(json!(3.5)), Value::Float(3.5));
    }

    #[test]
    fn test_loose_eq_across_numeric_variants() {
        assert!(Value::Int(0).loose_eq(&Value::Float(0.0)));
        assert!(Value::Uint(7).loose_eq(&Value::Int(7)));
        assert!(!Value::Int(1).loose_eq(&Value::String("1".into())));
    }

    #[test]
    fn test_total_cmp_orders_by_type_then_value() {
        let mut values = vec![
            Value::String("b".into()),
            Value::Int(10),
            Value::Null,
            Value::Float(2.5),
            Value::Bool(false),
        ];
        values.sort_by(|a, b| a.total_cmp(b));
        assert_eq!(
            values,
            vec![
                Value::Null,
                Value::Float(2.5),
                Value::Int(10),
                Value::String("b".into()),
                Value::Bool(false),
            ]
        );
    }

    #[test]
    fn test_resolve_descends_arrays() {
        let d = doc(json!({
            "comments": [{ "user_id": "a" }, { "user_id": "b" }, { "score": 1 }]
        }));
        let found: Vec<_> = resolve(&d, "comments.user_id")
            .into_iter()
            .filter_map(|v| v.as_str())
            .collect();
        assert_eq!(found, vec!["a", "b"]);
        assert!(resolve(&d, "missing").is_empty());
    }

    #[test]
    fn test_set_path_creates_intermediate_objects() {
        let mut d = doc(json!({ "extent": {} }));
        assert!(set_path(&mut d, "extent.a", Value::Int(1)));
        assert!(set_path(&mut d, "other.b.c", Value::Bool(true)));
        assert_eq!(get_path(&d, "extent.a"), Some(&Value::Int(1)));
        assert_eq!(get_path(&d, "other.b.c"), Some(&Value::Bool(true)));
    }

    #[test]
    fn test_set_path_keeps_non_object_parents() {
        let original = json!({ "count": 5, "cast": [{ "name": "a" }, { "name": "c" }] });
        let mut d = doc(original.clone());
        assert!(!set_path(&mut d, "count.a", Value::Int(1)));
        assert!(!set_path(&mut d, "cast.name", Value::from("zzz")));
        assert_eq!(d, doc(original));
    }

    #[test]
    fn test_parse_document_requires_object() {
        assert!(parse_document(br#"{"a": 1}"#).is_ok());
        assert!(matches!(
            parse_document(b"[1, 2]"),
            Err(DocrestError::BadRequest(_))
        ));
        assert!(matches!(parse_document(b"{"), Err(DocrestError::Json(_))));
    }

    #[test]
    fn test_rename_round_trip() {
        let mut d = doc(json!({ "id": "x", "name": "n" }));
        rename_in(&mut d);
        assert!(d.contains_key("_id"));
        assert!(!d.contains_key("id"));
        rename_out(&mut d);
        assert_eq!(d.get("id"), Some(&Value::String("x".into())));
    }
}
