use super::condition::{Bound, Condition, Direction, Pattern, Predicate, Projection, Range, Sort};
use crate::coerce::{coerce_base, coerce_map, is_zero_or_null, zero_value};
use crate::document::{Map, Value, ID_FIELD};
use crate::error::{DocrestError, Result};
use crate::schema::{BaseKind, FieldSet, Kind};

fn query_err(msg: String) -> DocrestError {
    DocrestError::Query(msg)
}

/// Compiles query clauses against a resource's field table.
///
/// Each clause adds predicates to a [`Condition`]; a clause naming a field
/// the condition already constrains is rejected.
pub struct QueryCompiler<'a> {
    fields: &'a FieldSet,
}

impl<'a> QueryCompiler<'a> {
    pub fn new(fields: &'a FieldSet) -> Self {
        QueryCompiler { fields }
    }

    /// Kind governing `path`: the field's own kind, or the map's kind for a
    /// sub-key of a map field.
    fn member_kind(&self, clause: &str, path: &str) -> Result<Kind> {
        self.fields
            .member(path)
            .map(|(_, f)| f.kind)
            .ok_or_else(|| query_err(format!("{clause} field {path} unknown")))
    }

    fn check_free(&self, clause: &str, path: &str, cond: &Condition) -> Result<()> {
        if cond.constrains(path) {
            return Err(query_err(format!("{clause} field {path} condition conflict")));
        }
        Ok(())
    }

    /// Equality on each field. Null and the kind's zero value both match
    /// absent, null and zero.
    pub fn filter(&self, filter: &Map, cond: &mut Condition) -> Result<()> {
        for (path, value) in filter {
            self.check_free("filter", path, cond)?;
            let kind = self.member_kind("filter", path)?;
            let is_map_member = self.fields.map_member(path).is_some();
            let kind = match (kind, is_map_member) {
                (Kind::Map(b), true) => Kind::Base(b),
                (k, _) => k,
            };
            if is_zero_or_null(value, kind) {
                cond.fields
                    .insert(path.clone(), Predicate::NullOrZero(zero_value(kind)));
                continue;
            }
            let mismatch = || query_err(format!("filter field {path} type mismatch"));
            let compiled = match kind {
                Kind::Base(b) => coerce_base(value, b).ok_or_else(mismatch)?,
                Kind::Array(_) => match value {
                    Value::Array(_) => value.clone(),
                    _ => return Err(mismatch()),
                },
                Kind::Map(b) => coerce_map(value, b).ok_or_else(mismatch)?,
                Kind::Invalid => return Err(mismatch()),
            };
            cond.fields.insert(path.clone(), Predicate::Eq(compiled));
        }
        Ok(())
    }

    /// `{field: {gt|gte: v, lt|lte: v}}` on scalar fields and map members.
    pub fn range(&self, range: &Map, cond: &mut Condition) -> Result<()> {
        for (path, value) in range {
            self.check_free("range", path, cond)?;
            let ops = value
                .as_object()
                .ok_or_else(|| query_err(format!("range field {path} not map")))?;
            let base = match self.member_kind("range", path)? {
                Kind::Base(b) | Kind::Map(b) if b != BaseKind::Object => b,
                _ => return Err(query_err(format!("range field {path} type not support"))),
            };
            let bound = |v: &Value, inclusive: bool| -> Result<Bound> {
                let value = coerce_base(v, base)
                    .ok_or_else(|| query_err(format!("range field {path} type mismatch")))?;
                Ok(Bound { value, inclusive })
            };
            let mut r = Range::default();
            for (op, v) in ops {
                match op.as_str() {
                    "gt" | "gte" => {
                        if r.lower.is_some() {
                            return Err(query_err(format!("range field {path} gt or gte conflict")));
                        }
                        r.lower = Some(bound(v, op == "gte")?);
                    }
                    "lt" | "lte" => {
                        if r.upper.is_some() {
                            return Err(query_err(format!("range field {path} lt or lte conflict")));
                        }
                        r.upper = Some(bound(v, op == "lte")?);
                    }
                    other => {
                        return Err(query_err(format!(
                            "range field {path} operator {other} unknown"
                        )))
                    }
                }
            }
            if r.lower.is_none() && r.upper.is_none() {
                return Err(query_err(format!("range field {path} invalid")));
            }
            cond.fields.insert(path.clone(), Predicate::Range(r));
        }
        Ok(())
    }

    pub fn in_(&self, clause: &Map, cond: &mut Condition) -> Result<()> {
        self.set_clause("in", clause, cond, Predicate::In)
    }

    pub fn nin(&self, clause: &Map, cond: &mut Condition) -> Result<()> {
        self.set_clause("nin", clause, cond, Predicate::Nin)
    }

    pub fn all(&self, clause: &Map, cond: &mut Condition) -> Result<()> {
        self.set_clause("all", clause, cond, Predicate::All)
    }

    fn set_clause(
        &self,
        name: &str,
        clause: &Map,
        cond: &mut Condition,
        build: fn(Vec<Value>) -> Predicate,
    ) -> Result<()> {
        for (path, value) in clause {
            self.check_free(name, path, cond)?;
            let base = match self.member_kind(name, path)? {
                Kind::Base(b) | Kind::Array(b) | Kind::Map(b) if b != BaseKind::Object => b,
                _ => return Err(query_err(format!("{name} field {path} type not support"))),
            };
            let items = match value {
                Value::Array(items) if !items.is_empty() => items,
                _ => {
                    return Err(query_err(format!(
                        "{name} field {path} should be a non-empty array"
                    )))
                }
            };
            let coerced = items
                .iter()
                .map(|v| {
                    if v.is_null() {
                        Some(Value::Null)
                    } else {
                        coerce_base(v, base)
                    }
                })
                .collect::<Option<Vec<_>>>()
                .ok_or_else(|| query_err(format!("{name} field {path} elem type mismatch")))?;
            cond.fields.insert(path.clone(), build(coerced));
        }
        Ok(())
    }

    /// A list of groups; predicates AND inside a group, groups OR together.
    pub fn or(&self, groups: &[Value], cond: &mut Condition) -> Result<()> {
        if cond.or.is_some() {
            return Err(query_err("or field condition conflict".to_string()));
        }
        let mut compiled = Vec::with_capacity(groups.len());
        for group in groups {
            let clauses = group
                .as_object()
                .ok_or_else(|| query_err("or group not map".to_string()))?;
            let mut sub = Condition::new();
            for (name, value) in clauses {
                let clause = value
                    .as_object()
                    .ok_or_else(|| query_err(format!("or group {name} type not map")))?;
                match name.as_str() {
                    "filter" => self.filter(clause, &mut sub)?,
                    "range" => self.range(clause, &mut sub)?,
                    "in" => self.in_(clause, &mut sub)?,
                    "nin" => self.nin(clause, &mut sub)?,
                    "all" => self.all(clause, &mut sub)?,
                    other => return Err(query_err(format!("or group condition {other} unknown"))),
                }
            }
            compiled.push(sub);
        }
        if !compiled.is_empty() {
            cond.or = Some(compiled);
        }
        Ok(())
    }

    /// Search by full-text ids, regex over `regex_fields`, or both.
    ///
    /// `ids` is the backend's answer, `None` when no backend is configured.
    pub fn search(
        &self,
        text: &str,
        regex_fields: &[String],
        ids: Option<Vec<String>>,
        cond: &mut Condition,
    ) -> Result<()> {
        if ids.is_none() && regex_fields.is_empty() {
            return Err(DocrestError::Search("search not configured".to_string()));
        }
        let mut branches = Vec::with_capacity(regex_fields.len() + 1);
        if !regex_fields.is_empty() {
            let pattern = Pattern::literal(text)
                .map_err(|e| query_err(format!("search text invalid: {e}")))?;
            for field in regex_fields {
                branches.push(Condition::new().with(field.clone(), Predicate::Regex(pattern.clone())));
            }
        }
        match ids {
            None => {
                if cond.or.is_some() {
                    return Err(query_err("or field condition conflict".to_string()));
                }
                cond.or = Some(branches);
            }
            Some(ids) => {
                let id_set = Predicate::In(ids.into_iter().map(Value::String).collect());
                if branches.is_empty() {
                    self.check_free("search", ID_FIELD, cond)?;
                    cond.fields.insert(ID_FIELD.to_string(), id_set);
                } else {
                    branches.push(Condition::new().with(ID_FIELD, id_set));
                    cond.or.get_or_insert_with(Vec::new).extend(branches);
                }
            }
        }
        Ok(())
    }

    /// Signed field names (`+name`, `-year`) to a sort.
    pub fn order(&self, order: &[String]) -> Result<Sort> {
        let mut keys = Vec::with_capacity(order.len());
        for signed in order {
            if signed.chars().count() <= 1 {
                return Err(query_err(format!("order field {signed} invalid")));
            }
            let (dir, field) = if let Some(field) = signed.strip_prefix('+') {
                (Direction::Asc, field)
            } else if let Some(field) = signed.strip_prefix('-') {
                (Direction::Desc, field)
            } else {
                return Err(query_err(format!(
                    "order field {signed} should start with +/-"
                )));
            };
            self.member_kind("order", field)?;
            keys.push((field.to_string(), dir));
        }
        Ok(Sort(keys))
    }

    pub fn select(&self, paths: &[String]) -> Result<Projection> {
        let mut projection = Projection::default();
        for path in paths {
            if path.is_empty() {
                return Err(query_err("select field invalid".to_string()));
            }
            self.member_kind("select", path)?;
            projection.0.insert(path.clone());
        }
        Ok(projection)
    }
}
