use super::types::{BaseKind, Kind, ResourceConfig, TypeDesc};
use crate::document::{Map, ID_FIELD, PRIMARY_KEY};
use crate::error::{DocrestError, Result};
use std::collections::{HashMap, HashSet};

/// Fields every resource schema must declare.
pub const REQUIRED_FIELDS: [&str; 4] = [ID_FIELD, "btime", "mtime", "seq"];

/// A compiled field: its kind and write policies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Field {
    pub kind: Kind,
    pub create_only: bool,
    pub read_only: bool,
}

/// Flat table from dotted path to [`Field`], built once from a descriptor.
///
/// The root object is registered under the empty path. Members of objects,
/// arrays of objects and maps of objects are registered beneath their
/// parent's path.
#[derive(Debug, Clone, Default)]
pub struct FieldSet {
    fields: HashMap<String, Field>,
    paths: Vec<String>,
    dropped: Vec<String>,
}

/// Map a descriptor to its kind. Optional wrappers are transparent; a
/// container of anything but a base kind is invalid.
pub fn parse_kind(desc: &TypeDesc) -> Kind {
    match desc {
        TypeDesc::Optional(inner) => parse_kind(inner),
        TypeDesc::Seq(elem) => match parse_kind(elem) {
            Kind::Base(b) => Kind::Array(b),
            _ => Kind::Invalid,
        },
        TypeDesc::Map(elem) => match parse_kind(elem) {
            Kind::Base(b) => Kind::Map(b),
            _ => Kind::Invalid,
        },
        TypeDesc::Bool => Kind::Base(BaseKind::Bool),
        TypeDesc::I8 | TypeDesc::I16 | TypeDesc::I32 | TypeDesc::I64 => {
            Kind::Base(BaseKind::Int)
        }
        TypeDesc::U8 | TypeDesc::U16 | TypeDesc::U32 | TypeDesc::U64 => {
            Kind::Base(BaseKind::Uint)
        }
        TypeDesc::F32 | TypeDesc::F64 => Kind::Base(BaseKind::Float),
        TypeDesc::String => Kind::Base(BaseKind::String),
        TypeDesc::Object(_) => Kind::Base(BaseKind::Object),
    }
}

/// Compile a resource's descriptor and policies into its field table.
pub fn compile(resource: &ResourceConfig) -> Result<FieldSet> {
    if !matches!(resource.fields, TypeDesc::Object(_)) {
        return Err(DocrestError::Config(format!(
            "resource {}: fields must describe an object",
            resource.name
        )));
    }
    let mut fs = FieldSet::build(&resource.fields);
    fs.require(&REQUIRED_FIELDS)
        .map_err(|e| DocrestError::Config(format!("resource {}: {e}", resource.name)))?;
    for prefix in resource.create_only.iter().chain(&resource.read_only) {
        if !fs.contains(prefix) {
            return Err(DocrestError::Config(format!(
                "resource {}: policy names unknown field '{prefix}'",
                resource.name
            )));
        }
    }
    fs.set_create_only(&resource.create_only);
    fs.set_read_only(&resource.read_only);
    fs.check_search_fields(&resource.search_fields)?;
    fs.check_regex_search_fields(&resource.regex_search_fields)?;
    Ok(fs)
}

impl FieldSet {
    pub fn build(desc: &TypeDesc) -> Self {
        let mut fs = FieldSet::default();
        let mut prefix = Vec::new();
        fs.walk(desc, &mut prefix);
        fs
    }

    fn walk(&mut self, desc: &TypeDesc, prefix: &mut Vec<String>) {
        let path = prefix.join(".");
        let kind = parse_kind(desc);
        if !path.is_empty() || kind.is_valid() {
            if !kind.is_valid() {
                log::warn!("field '{path}' has an unsupported nested container type; dropped");
                self.dropped.push(path);
                return;
            }
            self.fields.insert(
                path.clone(),
                Field {
                    kind,
                    ..Field::default()
                },
            );
            self.paths.push(path);
        }
        if !kind.holds_objects() {
            return;
        }
        if let Some(members) = desc.object_members() {
            for member in members {
                prefix.push(member.name.clone());
                self.walk(&member.ty, prefix);
                prefix.pop();
            }
        }
    }

    pub fn field(&self, path: &str) -> Option<&Field> {
        self.fields.get(path)
    }

    pub fn contains(&self, path: &str) -> bool {
        self.fields.contains_key(path)
    }

    pub fn kind(&self, path: &str) -> Option<Kind> {
        self.fields.get(path).map(|f| f.kind)
    }

    /// Every registered path in declaration order; the root comes first.
    pub fn paths(&self) -> &[String] {
        &self.paths
    }

    /// Paths left out of the table because their type cannot be expressed.
    pub fn dropped(&self) -> &[String] {
        &self.dropped
    }

    /// If `path` addresses a sub-key of a declared map field, the map's
    /// element kind.
    pub fn map_member(&self, path: &str) -> Option<BaseKind> {
        let (parent, key) = path.rsplit_once('.')?;
        if key.is_empty() {
            return None;
        }
        match self.kind(parent)? {
            Kind::Map(b) => Some(b),
            _ => None,
        }
    }

    /// The field governing `path`: the path itself, or the enclosing map
    /// field when `path` is one of its sub-keys.
    pub fn member(&self, path: &str) -> Option<(&str, &Field)> {
        if let Some((p, f)) = self.fields.get_key_value(path) {
            return Some((p.as_str(), f));
        }
        self.map_member(path)?;
        let (parent, _) = path.rsplit_once('.')?;
        self.fields
            .get_key_value(parent)
            .map(|(p, f)| (p.as_str(), f))
    }

    pub fn is_create_only(&self, path: &str) -> bool {
        self.fields.get(path).map_or(false, |f| f.create_only)
    }

    pub fn is_read_only(&self, path: &str) -> bool {
        self.fields.get(path).map_or(false, |f| f.read_only)
    }

    pub fn set_create_only<S: AsRef<str>>(&mut self, prefixes: &[S]) {
        self.apply_policy(prefixes, |f| f.create_only = true);
    }

    pub fn set_read_only<S: AsRef<str>>(&mut self, prefixes: &[S]) {
        self.apply_policy(prefixes, |f| f.read_only = true);
    }

    fn apply_policy<S: AsRef<str>>(&mut self, prefixes: &[S], set: impl Fn(&mut Field)) {
        let unique: HashSet<&str> = prefixes.iter().map(|p| p.as_ref()).collect();
        for prefix in unique {
            let nested = format!("{prefix}.");
            for (path, field) in self.fields.iter_mut() {
                if path == prefix || path.starts_with(&nested) {
                    set(field);
                }
            }
        }
    }

    /// Fail when any of `names` is not a top-level field.
    pub fn require(&self, names: &[&str]) -> std::result::Result<(), String> {
        let missing: Vec<&str> = names
            .iter()
            .copied()
            .filter(|n| !self.contains(n))
            .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(format!("missing required fields: {}", missing.join(", ")))
        }
    }

    /// Full-text search fields must be strings or arrays of strings.
    pub fn check_search_fields<S: AsRef<str>>(&self, fields: &[S]) -> Result<()> {
        for name in fields {
            let name = name.as_ref();
            match self.kind(name) {
                Some(Kind::Base(BaseKind::String)) | Some(Kind::Array(BaseKind::String)) => {}
                Some(kind) => {
                    return Err(DocrestError::Config(format!(
                        "search field '{name}' must be string or [string], got {kind}"
                    )))
                }
                None => {
                    return Err(DocrestError::Config(format!(
                        "search field '{name}' is not declared"
                    )))
                }
            }
        }
        Ok(())
    }

    /// Regex search fields must be strings.
    pub fn check_regex_search_fields<S: AsRef<str>>(&self, fields: &[S]) -> Result<()> {
        for name in fields {
            let name = name.as_ref();
            match self.kind(name) {
                Some(Kind::Base(BaseKind::String)) => {}
                Some(kind) => {
                    return Err(DocrestError::Config(format!(
                        "regex search field '{name}' must be string, got {kind}"
                    )))
                }
                None => {
                    return Err(DocrestError::Config(format!(
                        "regex search field '{name}' is not declared"
                    )))
                }
            }
        }
        Ok(())
    }

    /// Keep only the declared top-level entries of a stored document. The
    /// primary key is always kept. The result is key-ordered.
    pub fn storage_layout(&self, doc: &Map) -> Map {
        doc.get_key_value(PRIMARY_KEY)
            .into_iter()
            .chain(self.top_level().filter_map(|p| doc.get_key_value(p)))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// Top-level paths, in declaration order.
    pub fn top_level(&self) -> impl Iterator<Item = &str> {
        self.paths
            .iter()
            .map(String::as_str)
            .filter(|p| !p.is_empty() && !p.contains('.'))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::Value;
    use crate::schema::parser::parse_descriptor;
    use crate::schema::types::ObjectBuilder;
    use pretty_assertions::assert_eq;

    fn movie_desc() -> TypeDesc {
        parse_descriptor(
            r#"
id: string
btime: i64
mtime: i64
seq: string
name: string
year: u16
score: f32
tags: [string]
extent:
  $map: i64
comments:
  - user_id: string
    text: string
meta:
  owner: string
  labels:
    $map: string
grid: "[[int]]"
"#,
        )
        .unwrap()
    }

    #[test]
    fn test_build_registers_paths_in_order() {
        let fs = FieldSet::build(&movie_desc());
        assert_eq!(
            fs.paths(),
            &[
                "", "id", "btime", "mtime", "seq", "name", "year", "score", "tags", "extent",
                "comments", "comments.user_id", "comments.text", "meta", "meta.owner",
                "meta.labels",
            ]
        );
        assert_eq!(fs.kind(""), Some(Kind::Base(BaseKind::Object)));
        assert_eq!(fs.kind("year"), Some(Kind::Base(BaseKind::Uint)));
        assert_eq!(fs.kind("score"), Some(Kind::Base(BaseKind::Float)));
        assert_eq!(fs.kind("tags"), Some(Kind::Array(BaseKind::String)));
        assert_eq!(fs.kind("extent"), Some(Kind::Map(BaseKind::Int)));
        assert_eq!(fs.kind("comments"), Some(Kind::Array(BaseKind::Object)));
        assert_eq!(fs.kind("meta.labels"), Some(Kind::Map(BaseKind::String)));
    }

    #[test]
    fn test_nested_container_is_dropped() {
        let fs = FieldSet::build(&movie_desc());
        assert!(!fs.contains("grid"));
        assert_eq!(fs.dropped(), &["grid".to_string()]);
    }

    #[test]
    fn test_parse_kind_covers_containers() {
        assert_eq!(
            parse_kind(&TypeDesc::optional(TypeDesc::seq(TypeDesc::I8))),
            Kind::Array(BaseKind::Int)
        );
        assert_eq!(
            parse_kind(&TypeDesc::map(TypeDesc::map(TypeDesc::Bool))),
            Kind::Invalid
        );
        assert_eq!(
            parse_kind(&TypeDesc::map(TypeDesc::optional(TypeDesc::Bool))),
            Kind::Map(BaseKind::Bool)
        );
    }

    #[test]
    fn test_map_member_lookup() {
        let fs = FieldSet::build(&movie_desc());
        assert_eq!(fs.map_member("extent.a"), Some(BaseKind::Int));
        assert_eq!(fs.map_member("meta.labels.x"), Some(BaseKind::String));
        assert_eq!(fs.map_member("name.a"), None);
        assert_eq!(fs.member("extent.a").map(|(p, _)| p), Some("extent"));
        assert_eq!(fs.member("name").map(|(p, _)| p), Some("name"));
        assert!(fs.member("nope").is_none());
    }

    #[test]
    fn test_policies_use_path_prefixes() {
        let mut fs = FieldSet::build(&movie_desc());
        fs.set_read_only(&["meta", "meta"]);
        fs.set_create_only(&["name"]);
        assert!(fs.is_read_only("meta"));
        assert!(fs.is_read_only("meta.owner"));
        assert!(fs.is_read_only("meta.labels"));
        assert!(!fs.is_read_only("name"));
        assert!(fs.is_create_only("name"));
        assert!(!fs.is_create_only("id"));
    }

    #[test]
    fn test_compile_requires_bookkeeping_fields() {
        let desc = ObjectBuilder::new()
            .field("id", TypeDesc::String)
            .field("btime", TypeDesc::I64)
            .field("seq", TypeDesc::String)
            .build();
        let err = compile(&ResourceConfig::new("t", desc)).unwrap_err();
        match err {
            DocrestError::Config(msg) => assert!(msg.contains("mtime"), "{msg}"),
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_compile_checks_search_fields() {
        let mut config = ResourceConfig::new("movie", movie_desc());
        config.search_fields = vec!["name".into(), "tags".into()];
        config.regex_search_fields = vec!["name".into()];
        assert!(compile(&config).is_ok());

        config.search_fields = vec!["year".into()];
        assert!(compile(&config).is_err());

        config.search_fields = vec![];
        config.regex_search_fields = vec!["tags".into()];
        assert!(compile(&config).is_err());
    }

    #[test]
    fn test_compile_rejects_unknown_policy_field() {
        let mut config = ResourceConfig::new("movie", movie_desc());
        config.read_only = vec!["nope".into()];
        assert!(matches!(compile(&config), Err(DocrestError::Config(_))));
    }

    #[test]
    fn test_storage_layout_drops_undeclared() {
        let fs = FieldSet::build(&movie_desc());
        let mut doc = Map::new();
        doc.insert("_id".into(), Value::from("x"));
        doc.insert("name".into(), Value::from("n"));
        doc.insert("year".into(), Value::Uint(1999));
        doc.insert("bogus".into(), Value::Int(1));
        doc.insert("extent.a".into(), Value::Int(1));
        doc.insert("tags".into(), Value::Array(vec![]));
        let laid_out = fs.storage_layout(&doc);
        assert_eq!(
            laid_out.keys().collect::<Vec<_>>(),
            vec!["_id", "name", "tags", "year"]
        );
    }
}
