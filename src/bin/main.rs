//! Schemacache CLI - Build and inspect schema caches from metadata files
//!
//! Usage:
//!   schemacache build [<metadata.json>] --databases <snapshot.json>
//!   schemacache inconsistent [<metadata.json>] --databases <snapshot.json>
//!   schemacache run [<metadata.json>] --databases <snapshot.json> --commands <commands.json>
//!
//! The snapshot file maps each source name to its introspected tables and
//! functions. Without a metadata file the document is read from the store
//! configured in schemacache.toml.
//!
//! Examples:
//!   schemacache build metadata.json --databases db.json
//!   schemacache run metadata.json --databases db.json --commands cmds.json --output out.json

use clap::{Parser, Subcommand};
use schemacache::backend::{
    AgentInfo, BackendRegistry, DatabaseMetadata, RemoteIntrospection, SnapshotBackend, StaticAgentProvider,
    StaticRemoteSchemaProvider,
};
use schemacache::cache::BuildContext;
use schemacache::config::{Settings, StoreKind};
use schemacache::metadata::names::SourceName;
use schemacache::metadata::{BackendKind, Metadata};
use schemacache::store::{InMemoryMetadataStore, MetadataStore, SqliteMetadataStore};
use schemacache::{run_command, MetadataCommand, MetadataEngine};
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "schemacache")]
#[command(about = "Schemacache - Build and check GraphQL schema caches from metadata")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Args)]
struct Inputs {
    /// Path to the metadata JSON document (defaults to the configured store)
    metadata: Option<PathBuf>,

    /// Introspection snapshot: source name to database metadata
    #[arg(short, long)]
    databases: Option<PathBuf>,

    /// Remote schema introspections keyed by URL
    #[arg(long)]
    remote_schemas: Option<PathBuf>,

    /// Data connector agents keyed by URI
    #[arg(long)]
    agents: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the schema cache and print a summary
    Build {
        #[command(flatten)]
        inputs: Inputs,
    },

    /// Build the schema cache and print the inconsistent objects
    Inconsistent {
        #[command(flatten)]
        inputs: Inputs,
    },

    /// Apply a JSON list of metadata commands, printing each result
    Run {
        #[command(flatten)]
        inputs: Inputs,

        /// Path to the commands JSON file
        #[arg(short, long)]
        commands: PathBuf,

        /// Write the resulting metadata document here
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let settings = match Settings::load() {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Error loading configuration: {}", e);
            return ExitCode::FAILURE;
        }
    };
    init_logging(&settings);

    let result = match cli.command {
        Commands::Build { inputs } => cmd_build(&settings, inputs).await,
        Commands::Inconsistent { inputs } => cmd_inconsistent(&settings, inputs).await,
        Commands::Run {
            inputs,
            commands,
            output,
        } => cmd_run(&settings, inputs, commands, output).await,
    };

    match result {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn init_logging(settings: &Settings) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&settings.logging.level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, String> {
    let content =
        fs::read_to_string(path).map_err(|e| format!("reading file '{}': {}", path.display(), e))?;
    serde_json::from_str(&content).map_err(|e| format!("parsing '{}': {}", path.display(), e))
}

fn open_store(settings: &Settings, metadata: Option<&Path>) -> Result<Arc<dyn MetadataStore>, String> {
    if let Some(path) = metadata {
        let document: Metadata = read_json(path)?;
        return Ok(Arc::new(InMemoryMetadataStore::with_metadata(document)));
    }
    match settings.metadata.store {
        StoreKind::Memory => Ok(Arc::new(InMemoryMetadataStore::new())),
        StoreKind::Sqlite => {
            let path = settings
                .metadata
                .resolved_sqlite_path()
                .map_err(|e| e.to_string())?;
            let store = SqliteMetadataStore::open(&path).map_err(|e| e.to_string())?;
            Ok(Arc::new(store))
        }
    }
}

/// Every backend family answers from the same snapshot.
fn build_context(settings: &Settings, inputs: &Inputs) -> Result<BuildContext, String> {
    let databases: BTreeMap<SourceName, DatabaseMetadata> = match &inputs.databases {
        Some(path) => read_json(path)?,
        None => BTreeMap::new(),
    };
    let snapshot = |backend: SnapshotBackend| {
        for (source, db) in &databases {
            backend.set_database(source.clone(), db.clone());
        }
        Arc::new(backend)
    };

    let backends = BackendRegistry::new()
        .with_backend(BackendKind::Postgres, snapshot(SnapshotBackend::postgres()))
        .with_backend(BackendKind::Citus, snapshot(SnapshotBackend::citus()))
        .with_backend(BackendKind::Mssql, snapshot(SnapshotBackend::mssql()))
        .with_backend(BackendKind::BigQuery, snapshot(SnapshotBackend::bigquery()))
        .with_data_connector_backend(snapshot(SnapshotBackend::data_connector()));

    let mut remote_schemas = StaticRemoteSchemaProvider::new();
    if let Some(path) = &inputs.remote_schemas {
        let schemas: BTreeMap<String, RemoteIntrospection> = read_json(path)?;
        for (url, schema) in schemas {
            remote_schemas = remote_schemas.with_schema(url, schema);
        }
    }

    let mut agents = StaticAgentProvider::new();
    if let Some(path) = &inputs.agents {
        let infos: BTreeMap<String, AgentInfo> = read_json(path)?;
        for (uri, info) in infos {
            agents = agents.with_agent(uri, info);
        }
    }

    Ok(BuildContext {
        app: settings.app_context(),
        backends,
        remote_schemas: Arc::new(remote_schemas),
        agents: Arc::new(agents),
    })
}

async fn start_engine(settings: &Settings, inputs: &Inputs) -> Result<MetadataEngine, String> {
    let store = open_store(settings, inputs.metadata.as_deref())?;
    let context = build_context(settings, inputs)?;
    MetadataEngine::builder(store, context)
        .initialise()
        .await
        .map_err(|e| e.to_string())
}

fn print_json(value: &impl serde::Serialize) -> Result<(), String> {
    let text = serde_json::to_string_pretty(value).map_err(|e| e.to_string())?;
    println!("{}", text);
    Ok(())
}

async fn cmd_build(settings: &Settings, inputs: Inputs) -> Result<ExitCode, String> {
    let engine = start_engine(settings, &inputs).await?;
    let cache = engine.cache();
    print_json(&cache.summary())?;

    if cache.is_consistent() {
        Ok(ExitCode::SUCCESS)
    } else {
        eprintln!(
            "{} inconsistent object(s); run `schemacache inconsistent` for details",
            cache.inconsistent_objects.len()
        );
        Ok(ExitCode::FAILURE)
    }
}

async fn cmd_inconsistent(settings: &Settings, inputs: Inputs) -> Result<ExitCode, String> {
    let engine = start_engine(settings, &inputs).await?;
    let report = engine.inconsistency_report();
    print_json(&report)?;
    Ok(if report.is_consistent {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

async fn cmd_run(
    settings: &Settings,
    inputs: Inputs,
    commands: PathBuf,
    output: Option<PathBuf>,
) -> Result<ExitCode, String> {
    let commands: Vec<MetadataCommand> = read_json(&commands)?;
    let engine = start_engine(settings, &inputs).await?;

    let mut failed = false;
    for command in commands {
        let name = command.name();
        match run_command(&engine, command).await {
            Ok(value) => {
                println!("{}: {}", name, value);
            }
            Err(e) => {
                failed = true;
                println!("{}: {} ({}, status {})", name, e, e.code.as_str(), e.status());
                if let Some(internal) = &e.internal {
                    println!("  {}", internal);
                }
            }
        }
    }

    if let Some(path) = output {
        let document = serde_json::to_string_pretty(engine.metadata().as_ref()).map_err(|e| e.to_string())?;
        fs::write(&path, document).map_err(|e| format!("writing '{}': {}", path.display(), e))?;
        println!("Metadata written to {}", path.display());
    }

    Ok(if failed { ExitCode::FAILURE } else { ExitCode::SUCCESS })
}
