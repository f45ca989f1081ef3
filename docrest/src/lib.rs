pub mod coerce;
pub mod document;
pub mod error;
pub mod handler;
pub mod index;
pub mod query;
pub mod resource;
pub mod schema;
pub mod search;
pub mod seq;
pub mod service;
pub mod store;
pub mod validation;

pub use document::{Map, Value};
pub use error::{DocrestError, Reason, Result, ValidationError};
pub use handler::{Method, PathVars, Response};
pub use query::QueryParams;
pub use resource::{Page, Resource};
pub use schema::{FieldSet, ResourceConfig, ServiceConfig};
pub use search::{MemorySearch, SearchBackend};
pub use service::Service;
pub use store::{DocumentStore, MemoryStore, SqliteStore};
pub use validation::Mode;
