// Coercion of untyped values into the canonical form of a field kind.
//
// Every coercer returns `None` when the value cannot represent the kind.
// Numeric kinds accept any numeric input and convert with a truncating
// cast, so `3.9` coerced to Int is `3`. Strings never parse as numbers or
// booleans.

use crate::document::{Map, Value};
use crate::schema::{BaseKind, Kind};

pub fn coerce_bool(value: &Value) -> Option<Value> {
    match value {
        Value::Bool(b) => Some(Value::Bool(*b)),
        _ => None,
    }
}

pub fn coerce_int(value: &Value) -> Option<Value> {
    match value {
        Value::Int(i) => Some(Value::Int(*i)),
        Value::Uint(u) => Some(Value::Int(*u as i64)),
        Value::Float(f) => Some(Value::Int(*f as i64)),
        _ => None,
    }
}

pub fn coerce_uint(value: &Value) -> Option<Value> {
    match value {
        Value::Int(i) => Some(Value::Uint(*i as u64)),
        Value::Uint(u) => Some(Value::Uint(*u)),
        Value::Float(f) => Some(Value::Uint(*f as u64)),
        _ => None,
    }
}

pub fn coerce_float(value: &Value) -> Option<Value> {
    match value {
        Value::Int(i) => Some(Value::Float(*i as f64)),
        Value::Uint(u) => Some(Value::Float(*u as f64)),
        Value::Float(f) => Some(Value::Float(*f)),
        _ => None,
    }
}

pub fn coerce_string(value: &Value) -> Option<Value> {
    match value {
        Value::String(s) => Some(Value::String(s.clone())),
        Value::Bytes(b) => Some(Value::String(String::from_utf8_lossy(b).into_owned())),
        _ => None,
    }
}

/// Objects are accepted as-is; their members are checked by the validator.
pub fn coerce_object(value: &Value) -> Option<Value> {
    match value {
        Value::Object(m) => Some(Value::Object(m.clone())),
        _ => None,
    }
}

pub fn coerce_base(value: &Value, base: BaseKind) -> Option<Value> {
    match base {
        BaseKind::Bool => coerce_bool(value),
        BaseKind::Int => coerce_int(value),
        BaseKind::Uint => coerce_uint(value),
        BaseKind::Float => coerce_float(value),
        BaseKind::String => coerce_string(value),
        BaseKind::Object => coerce_object(value),
    }
}

/// Coerce every element; a single failure fails the whole array.
pub fn coerce_array(value: &Value, base: BaseKind) -> Option<Value> {
    let items = value.as_array()?;
    items
        .iter()
        .map(|v| coerce_base(v, base))
        .collect::<Option<Vec<_>>>()
        .map(Value::Array)
}

/// Check that every value coerces to `base`. The mapping itself is
/// returned unchanged.
pub fn coerce_map(value: &Value, base: BaseKind) -> Option<Value> {
    let map = value.as_object()?;
    if map.values().all(|v| coerce_base(v, base).is_some()) {
        Some(value.clone())
    } else {
        None
    }
}

pub fn coerce(value: &Value, kind: Kind) -> Option<Value> {
    match kind {
        Kind::Base(b) => coerce_base(value, b),
        Kind::Array(b) => coerce_array(value, b),
        Kind::Map(b) => coerce_map(value, b),
        Kind::Invalid => None,
    }
}

/// The zero value of a kind. Numeric zeros are `Int(0)`.
pub fn zero_value(kind: Kind) -> Value {
    match kind {
        Kind::Base(BaseKind::Bool) => Value::Bool(false),
        Kind::Base(BaseKind::Int | BaseKind::Uint | BaseKind::Float) => Value::Int(0),
        Kind::Base(BaseKind::String) => Value::String(String::new()),
        Kind::Base(BaseKind::Object) | Kind::Map(_) => Value::Object(Map::new()),
        Kind::Array(_) => Value::Array(Vec::new()),
        Kind::Invalid => Value::Null,
    }
}

/// Whether `value` is null or the zero value of `kind`.
pub fn is_zero_or_null(value: &Value, kind: Kind) -> bool {
    match (value, kind) {
        (Value::Null, _) => true,
        (Value::Bool(b), Kind::Base(BaseKind::Bool)) => !*b,
        (Value::Int(i), Kind::Base(BaseKind::Int | BaseKind::Uint | BaseKind::Float)) => *i == 0,
        (Value::Uint(u), Kind::Base(BaseKind::Int | BaseKind::Uint | BaseKind::Float)) => *u == 0,
        (Value::Float(f), Kind::Base(BaseKind::Int | BaseKind::Uint | BaseKind::Float)) => {
            *f == 0.0
        }
        (Value::String(s), Kind::Base(BaseKind::String)) => s.is_empty(),
        (Value::Object(m), Kind::Base(BaseKind::Object) | Kind::Map(_)) => m.is_empty(),
        (Value::Array(a), Kind::Array(_)) => a.is_empty(),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn obj(pairs: &[(&str, Value)]) -> Value {
        Value::Object(
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect(),
        )
    }

    #[test]
    fn test_numeric_coercion_truncates() {
        assert_eq!(coerce_int(&Value::Float(3.9)), Some(Value::Int(3)));
        assert_eq!(coerce_int(&Value::Float(-3.9)), Some(Value::Int(-3)));
        assert_eq!(coerce_uint(&Value::Int(7)), Some(Value::Uint(7)));
        assert_eq!(coerce_float(&Value::Int(2)), Some(Value::Float(2.0)));
        assert_eq!(coerce_int(&Value::String("3".into())), None);
    }

    #[test]
    fn test_bool_requires_boolean() {
        assert_eq!(coerce_bool(&Value::Bool(true)), Some(Value::Bool(true)));
        assert_eq!(coerce_bool(&Value::String("true".into())), None);
        assert_eq!(coerce_bool(&Value::Int(1)), None);
    }

    #[test]
    fn test_string_accepts_bytes() {
        assert_eq!(
            coerce_string(&Value::Bytes(b"abc".to_vec())),
            Some(Value::String("abc".into()))
        );
        assert_eq!(coerce_string(&Value::Int(1)), None);
    }

    #[test]
    fn test_array_fails_as_a_whole() {
        let good = Value::Array(vec![Value::Float(1.5), Value::Int(2)]);
        assert_eq!(
            coerce(&good, Kind::Array(BaseKind::Int)),
            Some(Value::Array(vec![Value::Int(1), Value::Int(2)]))
        );
        let bad = Value::Array(vec![Value::Int(1), Value::String("x".into())]);
        assert_eq!(coerce(&bad, Kind::Array(BaseKind::Int)), None);
        assert_eq!(
            coerce(&Value::Array(vec![Value::Bool(true)]), Kind::Array(BaseKind::Bool)),
            Some(Value::Array(vec![Value::Bool(true)]))
        );
        assert_eq!(coerce(&Value::Int(1), Kind::Array(BaseKind::Int)), None);
    }

    #[test]
    fn test_map_is_returned_unmodified() {
        let m = obj(&[("a", Value::Float(1.7)), ("b", Value::Int(2))]);
        assert_eq!(coerce(&m, Kind::Map(BaseKind::Int)), Some(m.clone()));
        let bad = obj(&[("a", Value::String("x".into()))]);
        assert_eq!(coerce(&bad, Kind::Map(BaseKind::Int)), None);
    }

    #[test]
    fn test_zero_values() {
        assert!(is_zero_or_null(&Value::Null, Kind::Base(BaseKind::String)));
        assert!(is_zero_or_null(&Value::Int(0), Kind::Base(BaseKind::Float)));
        assert!(is_zero_or_null(&Value::Float(0.0), Kind::Base(BaseKind::Int)));
        assert!(is_zero_or_null(&Value::String(String::new()), Kind::Base(BaseKind::String)));
        assert!(is_zero_or_null(&Value::Array(vec![]), Kind::Array(BaseKind::Int)));
        assert!(!is_zero_or_null(&Value::Int(1), Kind::Base(BaseKind::Int)));
        assert!(!is_zero_or_null(&Value::Int(0), Kind::Base(BaseKind::String)));
        assert_eq!(zero_value(Kind::Base(BaseKind::Uint)), Value::Int(0));
        assert_eq!(zero_value(Kind::Map(BaseKind::Int)), Value::Object(Map::new()));
    }
}
