use crate::document::{parse_document, to_json, Map};
use crate::error::{DocrestError, Result};
use crate::query::QueryParams;
use crate::resource::{Page, Resource};
use serde_json::json;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Path variables captured by the transport, e.g. `id`.
pub type PathVars = BTreeMap<String, String>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Post,
    Put,
    Patch,
    Get,
    Delete,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Patch => "PATCH",
            Method::Get => "GET",
            Method::Delete => "DELETE",
        }
    }

    /// Whether requests with this method carry a body.
    pub fn has_body(&self) -> bool {
        matches!(self, Method::Post | Method::Put | Method::Patch)
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Method {
    type Err = DocrestError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "POST" => Ok(Method::Post),
            "PUT" => Ok(Method::Put),
            "PATCH" => Ok(Method::Patch),
            "GET" => Ok(Method::Get),
            "DELETE" => Ok(Method::Delete),
            other => Err(DocrestError::BadRequest(format!("method {other} not allowed"))),
        }
    }
}

/// Outcome of one handled request.
///
/// On the wire the body is `{code, msg, data}` where `code` is 0 for any
/// status below 400 and the status otherwise; `data` is omitted when empty.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub status: u16,
    pub msg: String,
    pub data: Option<serde_json::Value>,
}

impl Response {
    pub fn ok(msg: impl Into<String>, data: serde_json::Value) -> Self {
        Response {
            status: 200,
            msg: msg.into(),
            data: Some(data),
        }
    }

    pub fn from_error(err: &DocrestError) -> Self {
        let data = match err {
            DocrestError::Validation(v) => Some(json!({
                "violations": v
                    .violations
                    .iter()
                    .map(|(path, reason)| json!({ "path": path, "reason": reason.as_str() }))
                    .collect::<Vec<_>>()
            })),
            _ => None,
        };
        Response {
            status: err.status(),
            msg: err.public_message(),
            data,
        }
    }

    pub fn code(&self) -> u16 {
        if self.status < 400 {
            0
        } else {
            self.status
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        let mut body = json!({ "code": self.code(), "msg": self.msg });
        if let (Some(data), Some(obj)) = (&self.data, body.as_object_mut()) {
            obj.insert("data".to_string(), data.clone());
        }
        body
    }
}

fn page_json(page: &Page) -> serde_json::Value {
    json!({
        "total": page.total,
        "hits": page.hits.iter().map(to_json).collect::<Vec<_>>(),
    })
}

fn required_id(vars: &PathVars) -> Result<&str> {
    vars.get("id")
        .map(String::as_str)
        .filter(|id| !id.is_empty())
        .ok_or_else(|| DocrestError::BadRequest("need id".to_string()))
}

fn body_document(body: &[u8]) -> Result<Map> {
    parse_document(body).map_err(|e| {
        log::warn!("unmarshal fail {e} [{}]", String::from_utf8_lossy(body));
        match e {
            DocrestError::Json(_) => DocrestError::BadRequest("invalid body".to_string()),
            other => other,
        }
    })
}

impl Resource {
    /// Serve one request against this resource. `vars` carries `id` for the
    /// item routes; a GET without it lists.
    pub fn handle(
        &self,
        method: Method,
        vars: &PathVars,
        query: &QueryParams,
        body: &[u8],
    ) -> Response {
        match self.dispatch(method, vars, query, body) {
            Ok(rsp) => rsp,
            Err(e) => {
                if e.status() >= 500 {
                    log::error!("{} {method} failed: {e}", self.name());
                } else {
                    log::debug!("{} {method} rejected: {e}", self.name());
                }
                Response::from_error(&e)
            }
        }
    }

    fn dispatch(
        &self,
        method: Method,
        vars: &PathVars,
        query: &QueryParams,
        body: &[u8],
    ) -> Result<Response> {
        match method {
            Method::Post => {
                let out = self.create(query, body_document(body)?)?;
                Ok(Response::ok("post ok", to_json(&out)))
            }
            Method::Put => {
                let id = required_id(vars)?;
                let out = self.replace(id, query, body_document(body)?)?;
                Ok(Response::ok("put ok", to_json(&out)))
            }
            Method::Patch => {
                let id = required_id(vars)?;
                let out = self.update(id, query, body_document(body)?)?;
                Ok(Response::ok("patch ok", to_json(&out)))
            }
            Method::Get => match vars.get("id") {
                Some(id) => {
                    let out = self.get(id, query)?;
                    Ok(Response::ok("get ok", to_json(&out)))
                }
                None => {
                    let page = self.list(query)?;
                    let msg = if page.total == 0 {
                        "no results found"
                    } else {
                        "get page ok"
                    };
                    Ok(Response::ok(msg, page_json(&page)))
                }
            },
            Method::Delete => {
                let id = required_id(vars)?;
                let out = self.delete(id, query)?;
                Ok(Response::ok("delete ok", to_json(&out)))
            }
        }
    }
}
