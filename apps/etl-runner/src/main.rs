//! CLI entry point wiring the Document Extractor (DX) and Directory
//! Extractor (UX) engines together (§6 External Interfaces).
//!
//! The native object-bridge client that reaches the document-database
//! service is explicitly out of scope (§1); `run-dx` therefore brings up
//! everything this crate owns (schema, CAS, plan store) and then reports
//! that no bridge implementation is linked into this build, rather than
//! pretending to extract documents it has no way to reach.

mod config;

use clap::{Parser, Subcommand};
use config::{cas_root, BridgeConfig, DirectoryConfig};
use ingest_directory::{assign_managers, build_tree, parse_manager_source, to_viewer_nodes, AdaptiveDirectoryClient};
use ingest_model::DocumentSink;
use ingest_orchestration::PlanStore;
use ingest_storage::{LocalCasStore, SqliteDocumentSink};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

const GRAPH_SCOPE: &str = "https://graph.microsoft.com/.default";
const GRAPH_API_ROOT: &str = "https://graph.microsoft.com/v1.0";

#[derive(Parser)]
#[command(name = "etl-runner", about = "Document and directory ETL runner")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// SQLite connection string for the normalized sink.
    #[arg(long, env = "ETL_DATABASE_URL", default_value = "sqlite://etl.sqlite3")]
    database_url: String,
}

#[derive(Subcommand)]
enum Command {
    /// Run the Document Extractor engine against configured plans.
    RunDx,
    /// Run the Directory Extractor engine and emit the org hierarchy.
    RunUx {
        /// Directory to write users_flat.json / org_for_viewer.json / org_tree.json into.
        #[arg(long, default_value = ".")]
        out_dir: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    init_tracing();

    let cli = Cli::parse();
    match cli.command {
        Command::RunDx => run_dx(&cli.database_url).await,
        Command::RunUx { out_dir } => run_ux(out_dir).await,
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env("ETL_LOG")
        .or_else(|_| EnvFilter::try_new("info"))
        .expect("default log filter is valid");
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_level(true)
        .init();
}

async fn run_dx(database_url: &str) -> anyhow::Result<()> {
    let sink: Arc<dyn DocumentSink> = Arc::new(SqliteDocumentSink::connect(database_url).await?);
    let cas_root = cas_root();
    let _cas = LocalCasStore::new(&cas_root);
    let bridge_config = BridgeConfig::from_env();
    if bridge_config.lotus_password.is_none() {
        tracing::warn!("LOTUS_PASSWORD is not set; the object bridge will be unable to authenticate once linked");
    }
    tracing::info!(database_url, cas_root = %cas_root.display(), "document extractor storage ready");

    let plan_store = PlanStore::new(sink.clone());
    let plans = plan_store.enabled_plans().await?;
    tracing::info!(plans = plans.len(), "loaded enabled ingestion plans");

    anyhow::bail!(
        "no ObjectBridge implementation is linked into this build; \
         the native document-database client is out of scope for this crate (see spec §1). \
         Link a crate implementing ingest_bridge::ObjectBridge and wire it through \
         ingest_orchestration::PipelineOrchestrator to run an extraction."
    )
}

async fn run_ux(out_dir: PathBuf) -> anyhow::Result<()> {
    let config = DirectoryConfig::from_env()?;

    let client = AdaptiveDirectoryClient::with_page_size(
        config.token_url(),
        config.client_id.clone(),
        config.client_secret.clone(),
        GRAPH_SCOPE,
        GRAPH_API_ROOT,
        config.page_size,
    );

    client.probe().await?;
    let mut users = client.page_users(config.user_filter.as_deref()).await?;
    tracing::info!(count = users.len(), "paged directory users");

    let manager_map = match &config.managers_file {
        Some(path) => {
            tracing::info!(path = %path.display(), "loading manager relationships from file");
            let raw = std::fs::read_to_string(path)?;
            let data: serde_json::Value = serde_json::from_str(&raw)?;
            parse_manager_source(&data)?
        }
        None => {
            tracing::info!("resolving manager relationships from the directory");
            let ids: Vec<String> = users.iter().map(|u| u.id.clone()).collect();
            client.resolve_managers(&ids).await?
        }
    };

    assign_managers(&mut users, &manager_map);
    let tree = build_tree(&users);

    std::fs::create_dir_all(&out_dir)?;
    write_json(&out_dir.join("users_flat.json"), &users)?;
    write_json(&out_dir.join("org_for_viewer.json"), &to_viewer_nodes(&users))?;
    write_json(&out_dir.join("org_tree.json"), &tree)?;

    tracing::info!(
        users = users.len(),
        roots = tree.len(),
        out_dir = %out_dir.display(),
        "directory extractor run finished"
    );
    Ok(())
}

fn write_json<T: serde::Serialize>(path: &std::path::Path, value: &T) -> anyhow::Result<()> {
    let pretty = serde_json::to_string_pretty(value)?;
    std::fs::write(path, pretty)?;
    Ok(())
}
