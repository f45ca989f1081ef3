use clap::{Parser, Subcommand, ValueEnum};
use docrest::query::compile_page_query;
use docrest::schema::{self, ResourceConfig, ServiceConfig};
use docrest::{Mode, PathVars, QueryParams, Service, SqliteStore};
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;

/// docrest CLI: inspect a service definition and read from its store
#[derive(Parser)]
#[command(name = "docrest", version, about)]
struct Cli {
    /// Path to the service definition
    #[arg(long, default_value = "docrest.yaml")]
    config: PathBuf,

    /// Output format
    #[arg(long, default_value = "yaml")]
    format: OutputFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, ValueEnum)]
enum OutputFormat {
    Yaml,
    Json,
}

#[derive(Subcommand)]
enum Command {
    /// Show the compiled field table of a resource
    Fields {
        /// Resource name
        resource: String,
    },

    /// Validate a JSON document against a resource
    Validate {
        /// Resource name
        resource: String,
        /// Validate as a partial update instead of a create
        #[arg(long)]
        patch: bool,
        /// Read the document from a file instead of stdin
        #[arg(long)]
        file: Option<PathBuf>,
    },

    /// Compile list query parameters to the store-native query
    Compile {
        /// Resource name
        resource: String,
        /// Query parameters (e.g. --param 'filter={"year":1999}')
        #[arg(long = "param", value_parser = parse_key_value)]
        params: Vec<(String, String)>,
    },

    /// Get a single document by id
    Get {
        /// Resource name
        resource: String,
        /// Document id
        id: String,
        /// SQLite store path
        #[arg(long, default_value = "docrest.db")]
        db: PathBuf,
        /// Query parameters (e.g. --param 'select=["name"]')
        #[arg(long = "param", value_parser = parse_key_value)]
        params: Vec<(String, String)>,
    },

    /// List documents of a resource
    List {
        /// Resource name
        resource: String,
        /// SQLite store path
        #[arg(long, default_value = "docrest.db")]
        db: PathBuf,
        /// Query parameters (e.g. --param size=10 --param page=1)
        #[arg(long = "param", value_parser = parse_key_value)]
        params: Vec<(String, String)>,
    },
}

fn parse_key_value(s: &str) -> Result<(String, String), String> {
    let pos = s
        .find('=')
        .ok_or_else(|| format!("Invalid key=value pair: no '=' found in '{s}'"))?;
    Ok((s[..pos].to_string(), s[pos + 1..].to_string()))
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        eprintln!("ERROR:{e}");
        process::exit(1);
    }
}

fn find_resource<'a>(
    config: &'a ServiceConfig,
    name: &str,
) -> Result<&'a ResourceConfig, Box<dyn std::error::Error>> {
    config
        .resources
        .iter()
        .find(|r| r.name == name)
        .ok_or_else(|| format!("Unknown resource '{name}'").into())
}

fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let config = schema::parse_config(&cli.config)?;

    match cli.command {
        Command::Fields { resource } => {
            let fields = schema::compile(find_resource(&config, &resource)?)?;
            let table: Vec<_> = fields
                .paths()
                .iter()
                .filter(|p| !p.is_empty())
                .filter_map(|p| fields.field(p).map(|f| (p, f)))
                .map(|(path, f)| {
                    serde_json::json!({
                        "path": path,
                        "kind": f.kind.to_string(),
                        "create_only": f.create_only,
                        "read_only": f.read_only,
                    })
                })
                .collect();
            print_output(
                &serde_json::json!({ "fields": table, "dropped": fields.dropped() }),
                &cli.format,
            )?;
        }

        Command::Validate {
            resource,
            patch,
            file,
        } => {
            let fields = schema::compile(find_resource(&config, &resource)?)?;
            let body = read_body(file.as_deref())?;
            let mut doc = docrest::document::parse_document(&body)?;
            let mode = if patch { Mode::Patch } else { Mode::Create };
            let violations: Vec<_> = match fields.check_object(&mut doc, mode) {
                Ok(()) => Vec::new(),
                Err(e) => e
                    .violations
                    .iter()
                    .map(|(path, reason)| {
                        serde_json::json!({ "path": path, "reason": reason.as_str() })
                    })
                    .collect(),
            };
            print_output(
                &serde_json::json!({
                    "valid": violations.is_empty(),
                    "document": docrest::document::to_json(&doc),
                    "violations": violations,
                }),
                &cli.format,
            )?;
        }

        Command::Compile { resource, params } => {
            let rc = find_resource(&config, &resource)?;
            let fields = schema::compile(rc)?;
            let query: QueryParams = params.into_iter().collect();
            let compiled = compile_page_query(&fields, &query, &rc.regex_search_fields, |_| {
                Ok(None)
            })?;
            print_output(
                &serde_json::json!({
                    "condition": compiled.condition.to_json(),
                    "sort": compiled.sort.to_signed(),
                    "projection": compiled.projection.0,
                }),
                &cli.format,
            )?;
        }

        Command::Get {
            resource,
            id,
            db,
            params,
        } => {
            let service = open_service(config, &db)?;
            let mut vars = PathVars::new();
            vars.insert("id".to_string(), id);
            let rsp = serve(&service, &resource, &vars, params)?;
            print_output(&rsp, &cli.format)?;
        }

        Command::List {
            resource,
            db,
            params,
        } => {
            let service = open_service(config, &db)?;
            let rsp = serve(&service, &resource, &PathVars::new(), params)?;
            print_output(&rsp, &cli.format)?;
        }
    }

    Ok(())
}

/// A service over an on-disk store. Full-text search lives in the server
/// process, so it is turned off here.
fn open_service(mut config: ServiceConfig, db: &Path) -> Result<Service, Box<dyn std::error::Error>> {
    if config.search.enabled {
        log::warn!("full-text search is not available from the CLI; disabled");
        config.search.enabled = false;
    }
    let store = Arc::new(SqliteStore::open(db)?);
    Ok(Service::from_config(&config, store, None)?)
}

fn serve(
    service: &Service,
    resource: &str,
    vars: &PathVars,
    params: Vec<(String, String)>,
) -> Result<serde_json::Value, Box<dyn std::error::Error>> {
    let resource = service
        .resource(resource)
        .ok_or_else(|| format!("Unknown resource '{resource}'"))?;
    let query: QueryParams = params.into_iter().collect();
    let rsp = resource.handle(docrest::Method::Get, vars, &query, b"");
    service.shutdown();
    if rsp.status >= 400 {
        return Err(rsp.msg.into());
    }
    Ok(rsp.data.unwrap_or(serde_json::Value::Null))
}

fn print_output(
    value: &serde_json::Value,
    format: &OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(value)?),
        OutputFormat::Yaml => print!("{}", serde_yaml::to_string(value)?),
    }
    Ok(())
}

fn read_body(file: Option<&Path>) -> Result<Vec<u8>, Box<dyn std::error::Error>> {
    match file {
        Some(path) => std::fs::read(path)
            .map_err(|e| format!("Failed to read '{}': {e}", path.display()).into()),
        None => {
            use std::io::Read;
            let mut body = Vec::new();
            std::io::stdin().read_to_end(&mut body)?;
            Ok(body)
        }
    }
}
