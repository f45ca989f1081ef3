use super::types::{Member, ServiceConfig, TypeDesc};
use crate::error::{DocrestError, Result};
use std::path::Path;

/// Key that marks a mapping descriptor as a string-keyed map of its value.
const MAP_KEY: &str = "$map";

/// Parse a service definition file into a ServiceConfig
pub fn parse_config(path: &Path) -> Result<ServiceConfig> {
    let content = std::fs::read_to_string(path)?;
    parse_config_str(&content)
}

/// Parse a service definition YAML string into a ServiceConfig
pub fn parse_config_str(content: &str) -> Result<ServiceConfig> {
    let config: ServiceConfig = serde_yaml::from_str(content)?;
    Ok(config)
}

/// Parse a field descriptor given as YAML.
pub fn parse_descriptor(content: &str) -> Result<TypeDesc> {
    let value: serde_yaml::Value = serde_yaml::from_str(content)?;
    TypeDesc::try_from(value).map_err(DocrestError::Config)
}

impl TryFrom<serde_yaml::Value> for TypeDesc {
    type Error = String;

    fn try_from(value: serde_yaml::Value) -> std::result::Result<Self, Self::Error> {
        match value {
            serde_yaml::Value::String(s) => parse_type_name(&s),
            serde_yaml::Value::Sequence(mut items) => {
                if items.len() != 1 {
                    return Err(format!(
                        "array descriptor must have exactly one element, got {}",
                        items.len()
                    ));
                }
                let elem = TypeDesc::try_from(items.remove(0))?;
                Ok(TypeDesc::seq(elem))
            }
            serde_yaml::Value::Mapping(mapping) => {
                if mapping.len() == 1 {
                    if let Some(elem) = mapping.get(MAP_KEY) {
                        return Ok(TypeDesc::map(TypeDesc::try_from(elem.clone())?));
                    }
                }
                let mut members = Vec::with_capacity(mapping.len());
                for (key, ty) in mapping {
                    let name = match key {
                        serde_yaml::Value::String(s) => s,
                        other => return Err(format!("member name must be a string: {other:?}")),
                    };
                    if name.is_empty() || name.contains('.') {
                        return Err(format!("invalid member name '{name}'"));
                    }
                    let ty = TypeDesc::try_from(ty).map_err(|e| format!("{name}: {e}"))?;
                    members.push(Member { name, ty });
                }
                Ok(TypeDesc::Object(members))
            }
            other => Err(format!("unsupported descriptor: {other:?}")),
        }
    }
}

/// Parse a type expression: a scalar name, `[T]`, `{T}`, each optionally
/// followed by `?`.
pub fn parse_type_name(name: &str) -> std::result::Result<TypeDesc, String> {
    let name = name.trim();
    if let Some(inner) = name.strip_suffix('?') {
        return Ok(TypeDesc::optional(parse_type_name(inner)?));
    }
    if let Some(inner) = name.strip_prefix('[').and_then(|s| s.strip_suffix(']')) {
        return Ok(TypeDesc::seq(parse_type_name(inner)?));
    }
    if let Some(inner) = name.strip_prefix('{').and_then(|s| s.strip_suffix('}')) {
        return Ok(TypeDesc::map(parse_type_name(inner)?));
    }
    let desc = match name {
        "bool" => TypeDesc::Bool,
        "i8" => TypeDesc::I8,
        "i16" => TypeDesc::I16,
        "i32" => TypeDesc::I32,
        "i64" | "int" => TypeDesc::I64,
        "u8" => TypeDesc::U8,
        "u16" => TypeDesc::U16,
        "u32" => TypeDesc::U32,
        "u64" | "uint" => TypeDesc::U64,
        "f32" => TypeDesc::F32,
        "f64" | "float" => TypeDesc::F64,
        "string" => TypeDesc::String,
        other => return Err(format!("unknown type '{other}'")),
    };
    Ok(desc)
}
