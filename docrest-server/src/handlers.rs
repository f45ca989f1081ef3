use actix_web::http::StatusCode;
use actix_web::{web, HttpRequest, HttpResponse};
use docrest::{Method, PathVars, QueryParams, Response, Service};

use crate::AppState;

/// Name of the resource a scope serves.
struct ResourceName(String);

/// Register the six routes of every resource.
pub fn configure(cfg: &mut web::ServiceConfig, service: &Service) {
    for resource in service.resources() {
        cfg.service(
            web::scope(resource.path())
                .app_data(web::Data::new(ResourceName(resource.name().to_string())))
                .route("", web::post().to(collection))
                .route("", web::get().to(collection))
                .route("/{id}", web::put().to(item))
                .route("/{id}", web::patch().to(item))
                .route("/{id}", web::get().to(item))
                .route("/{id}", web::delete().to(item)),
        );
    }
}

// ── Helpers ─────────────────────────────────────────────────────────

fn write_response(rsp: &Response, pretty: bool) -> HttpResponse {
    let status = StatusCode::from_u16(rsp.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let body = rsp.to_json();
    let text = if pretty {
        serde_json::to_string_pretty(&body)
    } else {
        serde_json::to_string(&body)
    };
    match text {
        Ok(text) => HttpResponse::build(status)
            .content_type("application/json; charset=utf-8")
            .body(text),
        Err(e) => {
            log::error!("Encoding response failed: {e}");
            HttpResponse::InternalServerError().finish()
        }
    }
}

fn failure(status: u16, msg: String) -> Response {
    Response {
        status,
        msg,
        data: None,
    }
}

// ── Routes ──────────────────────────────────────────────────────────

async fn collection(
    state: web::Data<AppState>,
    name: web::Data<ResourceName>,
    req: HttpRequest,
    body: web::Bytes,
) -> HttpResponse {
    serve(state, name, req, PathVars::new(), body).await
}

async fn item(
    state: web::Data<AppState>,
    name: web::Data<ResourceName>,
    req: HttpRequest,
    path: web::Path<String>,
    body: web::Bytes,
) -> HttpResponse {
    let mut vars = PathVars::new();
    vars.insert("id".to_string(), path.into_inner());
    serve(state, name, req, vars, body).await
}

async fn serve(
    state: web::Data<AppState>,
    name: web::Data<ResourceName>,
    req: HttpRequest,
    vars: PathVars,
    body: web::Bytes,
) -> HttpResponse {
    let query: QueryParams =
        match web::Query::<Vec<(String, String)>>::from_query(req.query_string()) {
            Ok(pairs) => pairs.into_inner().into_iter().collect(),
            Err(e) => {
                let rsp = failure(400, format!("query parser failed: {e}"));
                return write_response(&rsp, false);
            }
        };
    let pretty = query
        .get("pretty")
        .map_or(false, |p| p.eq_ignore_ascii_case("true"));
    let method: Method = match req.method().as_str().parse() {
        Ok(m) => m,
        Err(e) => return write_response(&failure(405, format!("{e}")), pretty),
    };
    let body = if method.has_body() { body } else { web::Bytes::new() };

    let result = web::block(move || {
        match state.service.resource(&name.0) {
            Some(resource) => resource.handle(method, &vars, &query, &body),
            None => failure(404, format!("resource {} not found", name.0)),
        }
    })
    .await;

    match result {
        Ok(rsp) => write_response(&rsp, pretty),
        Err(e) => {
            log::error!("Blocking handler failed: {e}");
            write_response(&failure(500, "internal error".to_string()), pretty)
        }
    }
}
