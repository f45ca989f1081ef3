pub mod compile;
pub mod condition;
pub mod params;

pub use compile::QueryCompiler;
pub use condition::{Bound, Condition, Direction, Pattern, Predicate, Projection, Range, Sort};
pub use params::{compile_page_query, compile_select, PageQuery, Pagination, QueryParams};
