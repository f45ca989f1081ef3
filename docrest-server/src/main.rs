use actix_web::{web, App, HttpServer};
use docrest::{DocumentStore, MemorySearch, SearchBackend, Service, SqliteStore};
use std::path::Path;
use std::sync::Arc;

mod handlers;

/// Shared application state
pub struct AppState {
    pub service: Service,
}

fn open_store(db: &str) -> docrest::Result<Arc<dyn DocumentStore>> {
    let store = if db == ":memory:" {
        SqliteStore::open_in_memory()?
    } else {
        SqliteStore::open(Path::new(db))?
    };
    Ok(Arc::new(store))
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    env_logger::init();
    log::info!("Starting docrest server");

    let config_path =
        std::env::var("DOCREST_CONFIG").unwrap_or_else(|_| "docrest.yaml".to_string());
    let db = std::env::var("DOCREST_DB").unwrap_or_else(|_| "docrest.db".to_string());
    let host = std::env::var("DOCREST_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
    let port: u16 = std::env::var("DOCREST_PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(8080);

    let to_io = |e: docrest::DocrestError| std::io::Error::new(std::io::ErrorKind::Other, e);

    log::info!("Loading service definition from: {config_path}");
    let config = docrest::schema::parse_config(Path::new(&config_path)).map_err(to_io)?;

    log::info!("Opening store at: {db}");
    let store = open_store(&db).map_err(to_io)?;
    let search: Option<Arc<dyn SearchBackend>> = if config.search.enabled {
        Some(Arc::new(MemorySearch::new()))
    } else {
        None
    };
    let service = Service::from_config(&config, store, search).map_err(to_io)?;
    for resource in service.resources() {
        log::info!("Serving {} at {}", resource.name(), resource.path());
    }

    let state = web::Data::new(AppState { service });
    let server_state = state.clone();

    log::info!("Listening on {host}:{port}");
    let server = HttpServer::new(move || {
        App::new()
            .app_data(server_state.clone())
            .app_data(web::PayloadConfig::new(4 * 1024 * 1024))
            .configure(|cfg| handlers::configure(cfg, &server_state.service))
    })
    .bind((host.as_str(), port))?
    .run();

    let handle = server.handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::info!("Shutting down");
            handle.stop(true).await;
        }
    });

    server.await?;
    state.service.shutdown();
    Ok(())
}
