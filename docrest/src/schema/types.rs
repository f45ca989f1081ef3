use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;

/// Top-level service definition parsed from a YAML file.
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    /// Database used when a request does not name one. Falls back to
    /// `rest_{resource}` when unset.
    #[serde(default)]
    pub default_db: Option<String>,
    #[serde(default = "default_collection")]
    pub default_collection: String,
    #[serde(default)]
    pub id_generator: IdStrategy,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub resources: Vec<ResourceConfig>,
}

fn default_collection() -> String {
    "cn".to_string()
}

impl Default for ServiceConfig {
    fn default() -> Self {
        ServiceConfig {
            default_db: None,
            default_collection: default_collection(),
            id_generator: IdStrategy::default(),
            search: SearchConfig::default(),
            index: IndexConfig::default(),
            sync: SyncConfig::default(),
            resources: Vec::new(),
        }
    }
}

/// Definition of a single resource
#[derive(Debug, Clone, Deserialize)]
pub struct ResourceConfig {
    pub name: String,
    /// URL path the resource is served under. Defaults to `/{name}`.
    #[serde(default)]
    pub path: Option<String>,
    pub fields: TypeDesc,
    /// Fields writable only by create or replace.
    #[serde(default)]
    pub create_only: Vec<String>,
    /// Fields never writable through this layer.
    #[serde(default)]
    pub read_only: Vec<String>,
    /// Fields concatenated into the full-text search content.
    #[serde(default)]
    pub search_fields: Vec<String>,
    /// String fields matched by regex when the `search` clause is used.
    #[serde(default)]
    pub regex_search_fields: Vec<String>,
    #[serde(default)]
    pub indexes: Vec<IndexDecl>,
}

impl ResourceConfig {
    pub fn new(name: impl Into<String>, fields: TypeDesc) -> Self {
        ResourceConfig {
            name: name.into(),
            path: None,
            fields,
            create_only: Vec::new(),
            read_only: Vec::new(),
            search_fields: Vec::new(),
            regex_search_fields: Vec::new(),
            indexes: Vec::new(),
        }
    }

    pub fn url_path(&self) -> String {
        match &self.path {
            Some(p) => p.clone(),
            None => format!("/{}", self.name),
        }
    }
}

/// A declared secondary index: signed field names (`+name`, `-year`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexDecl {
    pub key: Vec<String>,
    #[serde(default)]
    pub unique: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SearchConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Maximum number of ids taken from the search backend per query.
    #[serde(default = "default_search_limit")]
    pub limit: usize,
}

fn default_search_limit() -> usize {
    2000
}

impl Default for SearchConfig {
    fn default() -> Self {
        SearchConfig {
            enabled: false,
            limit: default_search_limit(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct IndexConfig {
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_ttl_secs() -> u64 {
    600
}

impl Default for IndexConfig {
    fn default() -> Self {
        IndexConfig {
            poll_interval_ms: default_poll_interval_ms(),
            ttl_secs: default_ttl_secs(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SyncConfig {
    #[serde(default = "default_sync_workers")]
    pub workers: usize,
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

fn default_sync_workers() -> usize {
    2
}

fn default_queue_capacity() -> usize {
    1024
}

impl Default for SyncConfig {
    fn default() -> Self {
        SyncConfig {
            workers: default_sync_workers(),
            queue_capacity: default_queue_capacity(),
        }
    }
}

/// Strategy for generating document ids when the client supplies none
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdStrategy {
    #[default]
    Ulid,
    Uuid,
    Nanoid,
}

impl IdStrategy {
    pub fn generate(&self) -> String {
        match self {
            IdStrategy::Ulid => ulid::Ulid::new().to_string().to_lowercase(),
            IdStrategy::Uuid => uuid::Uuid::new_v4().to_string(),
            IdStrategy::Nanoid => nanoid::nanoid!(),
        }
    }
}

/// Structured type descriptor for a resource's documents.
///
/// Every integer width collapses to the 64-bit kind during compilation; the
/// widths are kept so a descriptor can mirror a Rust type exactly.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(try_from = "serde_yaml::Value")]
pub enum TypeDesc {
    Bool,
    I8,
    I16,
    I32,
    I64,
    U8,
    U16,
    U32,
    U64,
    F32,
    F64,
    String,
    Optional(Box<TypeDesc>),
    Seq(Box<TypeDesc>),
    Map(Box<TypeDesc>),
    Object(Vec<Member>),
}

/// A named member of an object descriptor. `name` is the serialization name.
#[derive(Debug, Clone, PartialEq)]
pub struct Member {
    pub name: String,
    pub ty: TypeDesc,
}

impl TypeDesc {
    pub fn optional(inner: TypeDesc) -> Self {
        TypeDesc::Optional(Box::new(inner))
    }

    pub fn seq(elem: TypeDesc) -> Self {
        TypeDesc::Seq(Box::new(elem))
    }

    pub fn map(elem: TypeDesc) -> Self {
        TypeDesc::Map(Box::new(elem))
    }

    /// Members of the object reached through optional, sequence and map
    /// wrappers, if any.
    pub fn object_members(&self) -> Option<&[Member]> {
        match self {
            TypeDesc::Object(members) => Some(members),
            TypeDesc::Optional(inner) | TypeDesc::Seq(inner) | TypeDesc::Map(inner) => {
                inner.object_members()
            }
            _ => None,
        }
    }
}

/// Builder for object descriptors.
///
/// ```
/// use docrest::schema::{ObjectBuilder, TypeDesc};
///
/// let person = ObjectBuilder::new()
///     .field("id", TypeDesc::String)
///     .field("age", TypeDesc::optional(TypeDesc::I64))
///     .field("btime", TypeDesc::I64)
///     .field("mtime", TypeDesc::I64)
///     .field("seq", TypeDesc::String)
///     .build();
/// assert!(person.object_members().is_some());
/// ```
#[derive(Debug, Default)]
pub struct ObjectBuilder {
    members: Vec<Member>,
}

impl ObjectBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn field(mut self, name: impl Into<String>, ty: TypeDesc) -> Self {
        self.members.push(Member {
            name: name.into(),
            ty,
        });
        self
    }

    pub fn build(self) -> TypeDesc {
        TypeDesc::Object(self.members)
    }
}

/// Static registration of a Rust type's descriptor.
///
/// Implemented for the primitive types and standard containers; resource
/// structs implement it by listing their members with [`ObjectBuilder`].
pub trait Describe {
    fn describe() -> TypeDesc;
}

macro_rules! describe_scalar {
    ($($t:ty => $d:ident),* $(,)?) => {
        $(impl Describe for $t {
            fn describe() -> TypeDesc {
                TypeDesc::$d
            }
        })*
    };
}

describe_scalar! {
    bool => Bool,
    i8 => I8, i16 => I16, i32 => I32, i64 => I64, isize => I64,
    u8 => U8, u16 => U16, u32 => U32, u64 => U64, usize => U64,
    f32 => F32, f64 => F64,
    String => String,
}

impl<T: Describe> Describe for Option<T> {
    fn describe() -> TypeDesc {
        TypeDesc::optional(T::describe())
    }
}

impl<T: Describe> Describe for Vec<T> {
    fn describe() -> TypeDesc {
        TypeDesc::seq(T::describe())
    }
}

impl<T: Describe> Describe for HashMap<String, T> {
    fn describe() -> TypeDesc {
        TypeDesc::map(T::describe())
    }
}

impl<T: Describe> Describe for BTreeMap<String, T> {
    fn describe() -> TypeDesc {
        TypeDesc::map(T::describe())
    }
}

/// Base shape of a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BaseKind {
    Bool,
    Int,
    Uint,
    Float,
    String,
    Object,
}

/// A field's kind: a base kind, an array of one, or a string-keyed map of
/// one. Nested modifiers cannot be expressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Kind {
    #[default]
    Invalid,
    Base(BaseKind),
    Array(BaseKind),
    Map(BaseKind),
}

impl Kind {
    pub fn is_valid(&self) -> bool {
        !matches!(self, Kind::Invalid)
    }

    /// Whether values of this kind are objects whose members are
    /// registered as sub-paths.
    pub fn holds_objects(&self) -> bool {
        matches!(
            self,
            Kind::Base(BaseKind::Object)
                | Kind::Array(BaseKind::Object)
                | Kind::Map(BaseKind::Object)
        )
    }
}

impl fmt::Display for BaseKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BaseKind::Bool => "bool",
            BaseKind::Int => "int",
            BaseKind::Uint => "uint",
            BaseKind::Float => "float",
            BaseKind::String => "string",
            BaseKind::Object => "object",
        };
        f.write_str(name)
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Kind::Invalid => f.write_str("invalid"),
            Kind::Base(b) => write!(f, "{b}"),
            Kind::Array(b) => write!(f, "[{b}]"),
            Kind::Map(b) => write!(f, "{{{b}}}"),
        }
    }
}
