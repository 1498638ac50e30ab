//! Media attachment: turns image columns into file nodes owned by a row's node.
//!
//! Two variants, chosen per entity:
//! - buffer: `image_fields` hold raw bytes, persisted to the [`FileCache`];
//! - remote: `remote_image_fields` hold URLs, handed to a [`RemoteFetcher`].
//!
//! A failed attachment is logged and dropped. It never fails the owning node.

use anyhow::{anyhow, bail};
use futures::future::join_all;
use serde_json::Value as JsonValue;
use std::sync::Arc;
use tracing::error;

use crate::config::QueryConfig;
use crate::fetch::RemoteFetcher;
use crate::file_cache::{pretty_size, sniff_image, FileCache};
use crate::node_id::NodeHelpers;
use crate::schema::{FileNode, Node, NodeInternal, Row, Value};

pub struct MediaResolver {
    helpers: NodeHelpers,
    cache: FileCache,
    fetcher: Arc<dyn RemoteFetcher>,
}

impl MediaResolver {
    pub fn new(helpers: NodeHelpers, cache: FileCache, fetcher: Arc<dyn RemoteFetcher>) -> Self {
        Self {
            helpers,
            cache,
            fetcher,
        }
    }

    /// Resolve every configured image field of `row` concurrently.
    ///
    /// Returns the successfully built file nodes in field order. For the remote
    /// variant the image link fields are patched into `node` as well.
    pub async fn resolve(&self, node: &mut Node, row: &Row, query: &QueryConfig) -> Vec<FileNode> {
        let parent_id = node.id.clone();

        if !query.image_fields.is_empty() {
            let results = join_all(
                query
                    .image_fields
                    .iter()
                    .map(|field| self.resolve_buffer(&parent_id, field, row.get(field))),
            )
            .await;
            return keep_resolved(&parent_id, &query.image_fields, results);
        }

        if !query.remote_image_fields.is_empty() {
            let results = join_all(
                query
                    .remote_image_fields
                    .iter()
                    .map(|field| self.resolve_remote(&parent_id, field, row.get(field))),
            )
            .await;
            let files = keep_resolved(&parent_id, &query.remote_image_fields, results);

            if query.remote_image_fields.len() == 1 {
                if let Some(first) = files.first() {
                    node.fields.insert(
                        self.helpers.image_link_field(),
                        JsonValue::String(first.id.clone()),
                    );
                }
            }
            let ids: Vec<String> = files.iter().map(|f| f.id.clone()).collect();
            node.fields
                .insert(self.helpers.images_link_field(), JsonValue::from(ids));
            node.update_digest();
            return files;
        }

        Vec::new()
    }

    async fn resolve_buffer(
        &self,
        parent_id: &str,
        field: &str,
        value: Option<&Value>,
    ) -> anyhow::Result<Option<FileNode>> {
        let data = match value {
            None | Some(Value::Null) => return Ok(None),
            Some(Value::Bytes(data)) => data,
            Some(_) => bail!("field does not hold binary data"),
        };

        let image = sniff_image(data).ok_or_else(|| anyhow!("bytes are not a recognizable image"))?;
        let cached = self.cache.store(data, image.extension).await?;
        let name = format!("{}-{}", parent_id, field);

        Ok(Some(FileNode {
            id: self.helpers.file_node_id(&name),
            name,
            parent: parent_id.to_string(),
            children: Vec::new(),
            internal: NodeInternal {
                node_type: self.helpers.image_type_name(),
                content_digest: cached.digest.clone(),
                media_type: Some(image.mime.to_string()),
            },
            extension: image.extension.to_string(),
            size: cached.size,
            pretty_size: pretty_size(cached.size),
            absolute_path: cached.absolute_path(),
            url: None,
        }))
    }

    async fn resolve_remote(
        &self,
        parent_id: &str,
        field: &str,
        value: Option<&Value>,
    ) -> anyhow::Result<Option<FileNode>> {
        let url = match value {
            None | Some(Value::Null) => return Ok(None),
            Some(Value::Text(url)) if url.trim().is_empty() => return Ok(None),
            Some(Value::Text(url)) => url,
            Some(_) => bail!("field `{}` does not hold a URL", field),
        };
        self.fetcher.fetch(url, parent_id).await.map(Some)
    }
}

/// Drop empty and failed attachments, logging the failures.
fn keep_resolved(
    parent_id: &str,
    fields: &[String],
    results: Vec<anyhow::Result<Option<FileNode>>>,
) -> Vec<FileNode> {
    fields
        .iter()
        .zip(results)
        .filter_map(|(field, result)| match result {
            Ok(file) => file,
            Err(e) => {
                error!("Failed to attach `{}` to node {}: {:#}", field, parent_id, e);
                None
            }
        })
        .collect()
}
