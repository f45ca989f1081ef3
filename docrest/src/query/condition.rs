use crate::document::{resolve, Map, Value, ID_FIELD, PRIMARY_KEY};
use serde_json::json;
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// A compiled regular expression, compared by its source pattern.
#[derive(Clone)]
pub struct Pattern(regex::Regex);

impl Pattern {
    /// Case-insensitive pattern matching `text` literally.
    pub fn literal(text: &str) -> Result<Self, regex::Error> {
        regex::Regex::new(&format!("(?i){}", regex::escape(text))).map(Pattern)
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }

    pub fn is_match(&self, text: &str) -> bool {
        self.0.is_match(text)
    }
}

impl PartialEq for Pattern {
    fn eq(&self, other: &Self) -> bool {
        self.as_str() == other.as_str()
    }
}

impl fmt::Debug for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "/{}/", self.as_str())
    }
}

/// One end of a range.
#[derive(Debug, Clone, PartialEq)]
pub struct Bound {
    pub value: Value,
    pub inclusive: bool,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Range {
    pub lower: Option<Bound>,
    pub upper: Option<Bound>,
}

/// A predicate on the values found at one field path.
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    Eq(Value),
    /// Absent, null, or equal to the given zero value.
    NullOrZero(Value),
    Range(Range),
    In(Vec<Value>),
    Nin(Vec<Value>),
    All(Vec<Value>),
    Regex(Pattern),
}

/// Conjunction of field predicates, optionally AND-ed with a disjunction of
/// sub-conditions.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Condition {
    pub fields: BTreeMap<String, Predicate>,
    pub or: Option<Vec<Condition>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Asc,
    Desc,
}

/// Ordered sort keys.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Sort(pub Vec<(String, Direction)>);

/// Set of projected paths. Empty means the whole document.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Projection(pub BTreeSet<String>);

/// Values a predicate is tested against: each value at the path and, for
/// arrays, each of their elements.
fn candidates<'a>(doc: &'a Map, path: &str) -> Vec<&'a Value> {
    let mut out = Vec::new();
    for v in resolve(doc, path) {
        out.push(v);
        if let Value::Array(items) = v {
            out.extend(items.iter());
        }
    }
    out
}

impl Range {
    fn admits(&self, value: &Value) -> bool {
        let above = match &self.lower {
            Some(b) => match value.partial_compare(&b.value) {
                Some(Ordering::Greater) => true,
                Some(Ordering::Equal) => b.inclusive,
                _ => false,
            },
            None => true,
        };
        let below = match &self.upper {
            Some(b) => match value.partial_compare(&b.value) {
                Some(Ordering::Less) => true,
                Some(Ordering::Equal) => b.inclusive,
                _ => false,
            },
            None => true,
        };
        above && below
    }
}

impl Predicate {
    pub fn matches(&self, doc: &Map, path: &str) -> bool {
        let values = candidates(doc, path);
        match self {
            Predicate::Eq(expected) => values.iter().any(|v| v.loose_eq(expected)),
            Predicate::NullOrZero(zero) => {
                values.is_empty() || values.iter().any(|v| v.is_null() || v.loose_eq(zero))
            }
            Predicate::Range(range) => values.iter().any(|v| range.admits(v)),
            Predicate::In(list) => in_list(&values, list),
            Predicate::Nin(list) => !in_list(&values, list),
            Predicate::All(list) => list
                .iter()
                .all(|wanted| values.iter().any(|v| v.loose_eq(wanted))),
            Predicate::Regex(pattern) => values
                .iter()
                .any(|v| v.as_str().map_or(false, |s| pattern.is_match(s))),
        }
    }

    fn to_json(&self) -> serde_json::Value {
        let list = |l: &[Value]| {
            serde_json::Value::Array(l.iter().cloned().map(serde_json::Value::from).collect())
        };
        match self {
            Predicate::Eq(v) => serde_json::Value::from(v.clone()),
            Predicate::NullOrZero(zero) => {
                json!({ "$in": [null, serde_json::Value::from(zero.clone())] })
            }
            Predicate::Range(range) => {
                let mut obj = serde_json::Map::new();
                if let Some(b) = &range.lower {
                    let op = if b.inclusive { "$gte" } else { "$gt" };
                    obj.insert(op.to_string(), b.value.clone().into());
                }
                if let Some(b) = &range.upper {
                    let op = if b.inclusive { "$lte" } else { "$lt" };
                    obj.insert(op.to_string(), b.value.clone().into());
                }
                serde_json::Value::Object(obj)
            }
            Predicate::In(l) => json!({ "$in": list(l) }),
            Predicate::Nin(l) => json!({ "$nin": list(l) }),
            Predicate::All(l) => json!({ "$all": list(l) }),
            Predicate::Regex(p) => json!({ "$regex": p.as_str() }),
        }
    }
}

fn in_list(values: &[&Value], list: &[Value]) -> bool {
    list.iter().any(|wanted| {
        if wanted.is_null() && values.is_empty() {
            return true;
        }
        values.iter().any(|v| v.loose_eq(wanted))
    })
}

impl Condition {
    pub fn new() -> Self {
        Self::default()
    }

    /// Condition matching exactly the document with the given primary key.
    pub fn by_id(id: &str) -> Self {
        let mut cond = Condition::new();
        cond.fields
            .insert(PRIMARY_KEY.to_string(), Predicate::Eq(Value::from(id)));
        cond
    }

    pub fn with(mut self, path: impl Into<String>, predicate: Predicate) -> Self {
        self.fields.insert(path.into(), predicate);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty() && self.or.is_none()
    }

    pub fn constrains(&self, path: &str) -> bool {
        self.fields.contains_key(path)
    }

    /// Evaluate against a stored document.
    pub fn matches(&self, doc: &Map) -> bool {
        let fields_ok = self.fields.iter().all(|(path, p)| p.matches(doc, path));
        let or_ok = match &self.or {
            Some(groups) => groups.iter().any(|g| g.matches(doc)),
            None => true,
        };
        fields_ok && or_ok
    }

    /// Rename the boundary identity field to the storage primary key, in
    /// this condition and every OR branch.
    pub fn rename_id(&mut self) {
        if let Some(p) = self.fields.remove(ID_FIELD) {
            self.fields.insert(PRIMARY_KEY.to_string(), p);
        }
        if let Some(groups) = &mut self.or {
            for g in groups.iter_mut() {
                g.rename_id();
            }
        }
    }

    /// Mongo-style rendering, for logs and tooling.
    pub fn to_json(&self) -> serde_json::Value {
        let mut obj: serde_json::Map<String, serde_json::Value> = self
            .fields
            .iter()
            .map(|(k, p)| (k.clone(), p.to_json()))
            .collect();
        if let Some(groups) = &self.or {
            obj.insert(
                "$or".to_string(),
                serde_json::Value::Array(groups.iter().map(Condition::to_json).collect()),
            );
        }
        serde_json::Value::Object(obj)
    }
}

impl Sort {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Signed field names this sort was compiled from.
    pub fn to_signed(&self) -> Vec<String> {
        self.0
            .iter()
            .map(|(field, dir)| match dir {
                Direction::Asc => format!("+{field}"),
                Direction::Desc => format!("-{field}"),
            })
            .collect()
    }

    pub fn rename_id(&mut self) {
        for (field, _) in self.0.iter_mut() {
            if field == ID_FIELD {
                *field = PRIMARY_KEY.to_string();
            }
        }
    }

    /// Compare two documents by the sort keys. Missing values sort first.
    pub fn compare(&self, a: &Map, b: &Map) -> Ordering {
        for (field, dir) in &self.0 {
            let va = resolve(a, field).first().copied().unwrap_or(&Value::Null);
            let vb = resolve(b, field).first().copied().unwrap_or(&Value::Null);
            let ord = va.total_cmp(vb);
            let ord = match dir {
                Direction::Asc => ord,
                Direction::Desc => ord.reverse(),
            };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    }
}

impl Projection {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn rename_id(&mut self) {
        if self.0.remove(ID_FIELD) {
            self.0.insert(PRIMARY_KEY.to_string());
        }
    }

    /// Copy of `doc` restricted to the projected paths. The primary key is
    /// always kept. An empty projection keeps everything.
    pub fn apply(&self, doc: &Map) -> Map {
        if self.0.is_empty() {
            return doc.clone();
        }
        let mut out = Map::new();
        if let Some(id) = doc.get(PRIMARY_KEY) {
            out.insert(PRIMARY_KEY.to_string(), id.clone());
        }
        for path in &self.0 {
            let segments: Vec<&str> = path.split('.').collect();
            if let Some((head, rest)) = segments.split_first() {
                if let Some(v) = doc.get(*head).and_then(|v| project(v, rest)) {
                    match out.get_mut(*head) {
                        Some(existing) => merge(existing, v),
                        None => {
                            out.insert(head.to_string(), v);
                        }
                    }
                }
            }
        }
        out
    }
}

fn project(value: &Value, rest: &[&str]) -> Option<Value> {
    let Some((head, tail)) = rest.split_first() else {
        return Some(value.clone());
    };
    match value {
        Value::Object(map) => {
            let inner = project(map.get(*head)?, tail)?;
            let mut out = Map::new();
            out.insert(head.to_string(), inner);
            Some(Value::Object(out))
        }
        Value::Array(items) => Some(Value::Array(
            items
                .iter()
                .map(|item| project(item, rest).unwrap_or_else(|| Value::Object(Map::new())))
                .collect(),
        )),
        _ => None,
    }
}

fn merge(into: &mut Value, from: Value) {
    match (into, from) {
        (Value::Object(a), Value::Object(b)) => {
            for (k, v) in b {
                match a.get_mut(&k) {
                    Some(existing) => merge(existing, v),
                    None => {
                        a.insert(k, v);
                    }
                }
            }
        }
        (Value::Array(a), Value::Array(b)) => {
            for (x, y) in a.iter_mut().zip(b) {
                merge(x, y);
            }
        }
        (slot, other) => *slot = other,
    }
}
