use super::compile::QueryCompiler;
use super::condition::{Condition, Projection, Sort};
use crate::document::{Map, Value};
use crate::error::{DocrestError, Result};
use crate::schema::FieldSet;
use std::collections::BTreeMap;

/// Decoded query-string parameters. The first value given for a key wins;
/// empty values read as absent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryParams(BTreeMap<String, String>);

impl QueryParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0
            .get(key)
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.entry(key.into()).or_insert_with(|| value.into());
    }

    /// Whether `key` is set to `true`, in any case.
    pub fn flag(&self, key: &str) -> bool {
        self.get(key).map_or(false, |v| v.eq_ignore_ascii_case("true"))
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for QueryParams {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut params = QueryParams::new();
        for (k, v) in iter {
            params.insert(k, v);
        }
        params
    }
}

/// Page size and number for the list operation. A size of -1 returns every
/// match.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pagination {
    pub size: i64,
    pub page: i64,
}

impl Pagination {
    pub fn from_params(params: &QueryParams) -> Result<Self> {
        let size = params
            .get("size")
            .and_then(|s| s.parse::<i64>().ok())
            .filter(|s| *s > 0 || *s == -1)
            .ok_or_else(|| DocrestError::BadRequest("need size or size invalid".to_string()))?;
        let page = params
            .get("page")
            .and_then(|s| s.parse::<i64>().ok())
            .filter(|p| *p > 0)
            .ok_or_else(|| DocrestError::BadRequest("need page or page invalid".to_string()))?;
        Ok(Pagination { size, page })
    }

    pub fn skip(&self) -> usize {
        if self.size == -1 {
            0
        } else {
            (self.size.saturating_mul(self.page - 1)) as usize
        }
    }

    pub fn limit(&self) -> Option<usize> {
        if self.size == -1 {
            None
        } else {
            Some(self.size as usize)
        }
    }
}

/// A compiled list query in storage naming.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PageQuery {
    pub condition: Condition,
    pub sort: Sort,
    pub projection: Projection,
    /// The search backend returned no ids and no regex fields widen the
    /// search, so nothing can match.
    pub no_match: bool,
}

fn parse_clause(params: &QueryParams, name: &str) -> Result<Option<serde_json::Value>> {
    match params.get(name) {
        Some(raw) => serde_json::from_str(raw)
            .map(Some)
            .map_err(|e| {
                log::warn!("unmarshal {name} error: {e}");
                DocrestError::BadRequest(format!("{name} invalid"))
            }),
        None => Ok(None),
    }
}

fn object_clause(params: &QueryParams, name: &str) -> Result<Option<Map>> {
    match parse_clause(params, name)?.map(Value::from) {
        Some(Value::Object(m)) => Ok(Some(m)),
        Some(_) => Err(DocrestError::BadRequest(format!("{name} invalid"))),
        None => Ok(None),
    }
}

fn string_list_clause(params: &QueryParams, name: &str) -> Result<Option<Vec<String>>> {
    match parse_clause(params, name)? {
        Some(v) => serde_json::from_value(v)
            .map(Some)
            .map_err(|_| DocrestError::BadRequest(format!("{name} invalid"))),
        None => Ok(None),
    }
}

/// Compile the `filter`, `range`, `in`, `nin`, `all`, `or`, `search`,
/// `order` and `select` parameters.
///
/// `search_ids` asks the full-text backend for matching ids; it returns
/// `None` when no backend is configured.
pub fn compile_page_query<F>(
    fields: &FieldSet,
    params: &QueryParams,
    regex_fields: &[String],
    search_ids: F,
) -> Result<PageQuery>
where
    F: FnOnce(&str) -> Result<Option<Vec<String>>>,
{
    let qc = QueryCompiler::new(fields);
    let mut query = PageQuery::default();
    let cond = &mut query.condition;

    if let Some(filter) = object_clause(params, "filter")? {
        qc.filter(&filter, cond)?;
    }
    if let Some(range) = object_clause(params, "range")? {
        qc.range(&range, cond)?;
    }
    if let Some(clause) = object_clause(params, "in")? {
        qc.in_(&clause, cond)?;
    }
    if let Some(clause) = object_clause(params, "nin")? {
        qc.nin(&clause, cond)?;
    }
    if let Some(clause) = object_clause(params, "all")? {
        qc.all(&clause, cond)?;
    }
    if let Some(or) = parse_clause(params, "or")?.map(Value::from) {
        let groups = or
            .as_array()
            .ok_or_else(|| DocrestError::BadRequest("or invalid".to_string()))?;
        qc.or(groups, cond)?;
    }
    if let Some(text) = params.get("search") {
        let ids = search_ids(text)?;
        if regex_fields.is_empty() && ids.as_ref().map_or(false, Vec::is_empty) {
            query.no_match = true;
        }
        qc.search(text, regex_fields, ids, cond)?;
    }
    cond.rename_id();

    if let Some(order) = string_list_clause(params, "order")? {
        query.sort = qc.order(&order)?;
        query.sort.rename_id();
    }
    if let Some(select) = string_list_clause(params, "select")? {
        query.projection = qc.select(&select)?;
        query.projection.rename_id();
    }
    Ok(query)
}

/// Compile just the `select` parameter, as used by single-document reads.
pub fn compile_select(fields: &FieldSet, params: &QueryParams) -> Result<Projection> {
    match string_list_clause(params, "select")? {
        Some(select) => {
            let mut projection = QueryCompiler::new(fields).select(&select)?;
            projection.rename_id();
            Ok(projection)
        }
        None => Ok(Projection::default()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::parse_descriptor;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn fields() -> FieldSet {
        FieldSet::build(
            &parse_descriptor(
                "{id: string, btime: i64, mtime: i64, seq: string, name: string, age: int}",
            )
            .unwrap(),
        )
    }

    fn params(pairs: &[(&str, &str)]) -> QueryParams {
        pairs.iter().map(|(k, v)| (*k, *v)).collect()
    }

    fn no_backend(_: &str) -> Result<Option<Vec<String>>> {
        Ok(None)
    }

    #[test]
    fn test_pagination() {
        let p = Pagination::from_params(&params(&[("size", "10"), ("page", "3")])).unwrap();
        assert_eq!(p.skip(), 20);
        assert_eq!(p.limit(), Some(10));
        let all = Pagination::from_params(&params(&[("size", "-1"), ("page", "7")])).unwrap();
        assert_eq!(all.skip(), 0);
        assert_eq!(all.limit(), None);
        for bad in [
            params(&[("page", "1")]),
            params(&[("size", "0"), ("page", "1")]),
            params(&[("size", "5"), ("page", "0")]),
            params(&[("size", "x"), ("page", "1")]),
        ] {
            assert!(Pagination::from_params(&bad).is_err());
        }
    }

    #[test]
    fn test_compile_page_query_renames_id() {
        let fs = fields();
        let q = compile_page_query(
            &fs,
            &params(&[
                ("filter", r#"{"id": "x"}"#),
                ("range", r#"{"age": {"gt": 1}}"#),
                ("order", r#"["-id", "+name"]"#),
                ("select", r#"["id", "name"]"#),
            ]),
            &[],
            no_backend,
        )
        .unwrap();
        assert_eq!(
            q.condition.to_json(),
            json!({ "_id": "x", "age": { "$gt": 1 } })
        );
        assert_eq!(q.sort.to_signed(), vec!["-_id", "+name"]);
        assert!(q.projection.0.contains("_id"));
        assert!(!q.no_match);
    }

    #[test]
    fn test_malformed_clause_names_the_clause() {
        let fs = fields();
        let err = compile_page_query(&fs, &params(&[("range", "{oops")]), &[], no_backend)
            .unwrap_err();
        assert_eq!(err.to_string(), "range invalid");
        let err = compile_page_query(&fs, &params(&[("order", r#"{"a":1}"#)]), &[], no_backend)
            .unwrap_err();
        assert_eq!(err.to_string(), "order invalid");
    }

    #[test]
    fn test_search_with_empty_backend_answer() {
        let fs = fields();
        let q = compile_page_query(&fs, &params(&[("search", "zzz")]), &[], |_| {
            Ok(Some(Vec::new()))
        })
        .unwrap();
        assert!(q.no_match);
        assert_eq!(q.condition.to_json(), json!({ "_id": { "$in": [] } }));
    }

    #[test]
    fn test_search_without_backend_or_regex_fails() {
        let fs = fields();
        let err = compile_page_query(&fs, &params(&[("search", "x")]), &[], no_backend)
            .unwrap_err();
        assert!(matches!(err, DocrestError::Search(_)));
    }

    #[test]
    fn test_query_params_first_value_wins() {
        let mut p = QueryParams::new();
        p.insert("a", "1");
        p.insert("a", "2");
        p.insert("b", "");
        assert_eq!(p.get("a"), Some("1"));
        assert_eq!(p.get("b"), None);
        assert!(!p.flag("a"));
    }

    #[test]
    fn test_flag_ignores_case() {
        let p: QueryParams = [("x", "TRUE"), ("y", "True"), ("z", "yes")].into_iter().collect();
        assert!(p.flag("x"));
        assert!(p.flag("y"));
        assert!(!p.flag("z"));
        assert!(!p.flag("missing"));
    }
}
