use crate::coerce::{coerce, coerce_base};
use crate::document::{Map, Value};
use crate::error::{Reason, ValidationError};
use crate::schema::{BaseKind, FieldSet, Kind};
use std::collections::BTreeMap;

/// Validation mode. Create covers both create and replace.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Create,
    Patch,
}

impl Mode {
    fn allows_dots(&self) -> bool {
        matches!(self, Mode::Patch)
    }
}

impl FieldSet {
    /// Validate a document against this field table.
    ///
    /// Every offending entry is removed from `doc` and reported; accepted
    /// entries are replaced by their coerced form. The document is walked
    /// completely before an error is returned.
    pub fn check_object(&self, doc: &mut Map, mode: Mode) -> Result<(), ValidationError> {
        let mut violations = BTreeMap::new();
        self.check(doc, "", mode, &mut violations);
        if violations.is_empty() {
            Ok(())
        } else {
            Err(ValidationError {
                violations: violations.into_iter().collect(),
            })
        }
    }

    fn check(
        &self,
        obj: &mut Map,
        prefix: &str,
        mode: Mode,
        violations: &mut BTreeMap<String, Reason>,
    ) {
        let keys: Vec<String> = obj.keys().cloned().collect();
        for key in keys {
            let Some(value) = obj.remove(&key) else {
                continue;
            };
            let full = if prefix.is_empty() {
                key.clone()
            } else {
                format!("{prefix}.{key}")
            };
            match self.check_entry(&key, &full, !prefix.is_empty(), value, mode, violations) {
                Ok(coerced) => {
                    obj.insert(key, coerced);
                }
                Err(reason) => {
                    log::debug!("rejected field {full}: {reason}");
                    violations.insert(full, reason);
                }
            }
        }
    }

    fn check_entry(
        &self,
        key: &str,
        full: &str,
        nested: bool,
        value: Value,
        mode: Mode,
        violations: &mut BTreeMap<String, Reason>,
    ) -> Result<Value, Reason> {
        if key.contains('.') {
            if !mode.allows_dots() {
                return Err(Reason::DotNotAllowed);
            }
            if nested {
                return Err(Reason::DotInvalid);
            }
            if let Some(base) = self.map_member(key) {
                return self.check_map_member(key, base, &value);
            }
        }

        let field = self.field(full).ok_or(Reason::Unknown)?;
        if key.contains('.') && !self.object_parents(key) {
            return Err(Reason::DotInvalid);
        }
        if field.read_only {
            return Err(Reason::ReadOnly);
        }
        if mode == Mode::Patch && field.create_only {
            return Err(Reason::CreateOnly);
        }
        let mut coerced = coerce(&value, field.kind).ok_or(Reason::TypeMismatch)?;
        match (field.kind, &mut coerced) {
            (Kind::Base(BaseKind::Object), Value::Object(inner)) => {
                self.check(inner, full, mode, violations);
            }
            (Kind::Array(BaseKind::Object), Value::Array(items)) => {
                for item in items.iter_mut() {
                    if let Value::Object(inner) = item {
                        self.check(inner, full, mode, violations);
                    }
                }
            }
            _ => {}
        }
        Ok(coerced)
    }

    /// Whether every proper prefix of a dotted key is a plain object field.
    fn object_parents(&self, key: &str) -> bool {
        key.match_indices('.').all(|(i, _)| {
            matches!(
                self.field(&key[..i]).map(|f| f.kind),
                Some(Kind::Base(BaseKind::Object))
            )
        })
    }

    /// A dotted patch key addressing one entry of a map field.
    fn check_map_member(&self, key: &str, base: BaseKind, value: &Value) -> Result<Value, Reason> {
        let coerced = coerce_base(value, base).ok_or(Reason::TypeMismatch)?;
        if let Some((_, map_field)) = self.member(key) {
            if map_field.read_only {
                return Err(Reason::ReadOnly);
            }
            if map_field.create_only {
                return Err(Reason::CreateOnly);
            }
        }
        Ok(coerced)
    }
}
