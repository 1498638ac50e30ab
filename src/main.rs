//! SQL Node Source - runs every configured query and registers the resulting graph.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use sql_node_source::db::PostgresExecutor;
use sql_node_source::fetch::HttpFetcher;
use sql_node_source::file_cache::FileCache;
use sql_node_source::node_id::NodeHelpers;
use sql_node_source::rest_store::RestNodeStore;
use sql_node_source::store::MemoryNodeStore;
use sql_node_source::{source_nodes, SourceConfig};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| "sql_node_source=info".into()))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config_path = std::env::var("SOURCE_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("source.json"));
    let config = SourceConfig::load(&config_path)?;

    let database_url = std::env::var("DATABASE_URL").context("DATABASE_URL not set")?;
    let executor = PostgresExecutor::connect(&database_url).await?;

    let helpers = NodeHelpers::new(&config.type_prefix);
    let fetcher = Arc::new(HttpFetcher::new(
        reqwest::Client::new(),
        FileCache::new(&config.cache_dir),
        helpers,
    ));

    match RestNodeStore::from_env() {
        Some(store) => {
            info!("Registering nodes through NODE_STORE_URL");
            let report = source_nodes(&config, &executor, &store, fetcher).await?;
            info!("Registered {} nodes", report.nodes + report.attachments);
        }
        None => {
            info!("NODE_STORE_URL not set, printing nodes to stdout");
            let store = MemoryNodeStore::new();
            source_nodes(&config, &executor, &store, fetcher).await?;
            println!("{}", serde_json::to_string_pretty(&store.nodes())?);
        }
    }

    Ok(())
}
