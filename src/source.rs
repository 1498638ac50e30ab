//! One sourcing run: validate, query, synthesize, register.
//!
//! Nothing reaches the store until every result set has been synthesized.

use futures::future::try_join_all;
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::SourceConfig;
use crate::db::{self, QueryExecutor};
use crate::error::Result;
use crate::fetch::RemoteFetcher;
use crate::file_cache::FileCache;
use crate::media::MediaResolver;
use crate::node_id::NodeHelpers;
use crate::nodes::{self, Registered};
use crate::store::NodeStore;

/// Totals for a finished run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SourceReport {
    pub result_sets: usize,
    pub nodes: usize,
    pub attachments: usize,
}

/// Run the whole pipeline against `executor`, registering into `store`.
///
/// The executor is closed exactly once before returning, whether the run
/// succeeded or not.
pub async fn source_nodes(
    config: &SourceConfig,
    executor: &dyn QueryExecutor,
    store: &dyn NodeStore,
    fetcher: Arc<dyn RemoteFetcher>,
) -> Result<SourceReport> {
    let outcome = run(config, executor, store, fetcher).await;

    if let Err(e) = executor.close().await {
        warn!("Failed to close database connection: {:#}", e);
    }

    outcome
}

async fn run(
    config: &SourceConfig,
    executor: &dyn QueryExecutor,
    store: &dyn NodeStore,
    fetcher: Arc<dyn RemoteFetcher>,
) -> Result<SourceReport> {
    config.validate()?;

    let helpers = NodeHelpers::new(&config.type_prefix);
    let result_sets = db::query_all(executor, &config.queries).await?;
    info!("Fetched {} result sets", result_sets.len());

    // Every result set reads the full batch; none of them mutate it.
    let synthesized = result_sets
        .iter()
        .map(|set| nodes::create_nodes(set, &result_sets, &helpers))
        .collect::<Result<Vec<_>>>()?;

    let media = MediaResolver::new(helpers.clone(), FileCache::new(&config.cache_dir), fetcher);
    let registered = try_join_all(
        result_sets
            .iter()
            .zip(synthesized)
            .map(|(set, nodes)| nodes::register_result_set(set, nodes, store, &media)),
    )
    .await?;

    let report = registered.iter().fold(
        SourceReport {
            result_sets: result_sets.len(),
            ..SourceReport::default()
        },
        |mut report, Registered { nodes, attachments }| {
            report.nodes += nodes;
            report.attachments += attachments;
            report
        },
    );

    info!(
        "Sourcing complete: {} result sets, {} nodes, {} attachments",
        report.result_sets, report.nodes, report.attachments
    );
    Ok(report)
}
