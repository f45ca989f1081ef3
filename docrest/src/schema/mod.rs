pub mod fieldset;
pub mod parser;
pub mod types;

pub use fieldset::{compile, parse_kind, Field, FieldSet, REQUIRED_FIELDS};
pub use parser::{parse_config, parse_config_str, parse_descriptor, parse_type_name};
pub use types::*;
