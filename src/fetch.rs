//! Remote file fetching for URL-valued image columns.

use anyhow::{bail, Context};
use reqwest::header::CONTENT_TYPE;
use tracing::info;

use crate::file_cache::{pretty_size, sniff_image, FileCache};
use crate::node_id::NodeHelpers;
use crate::schema::{FileNode, NodeInternal};

/// Downloads a URL into a file node owned by `parent_id`.
///
/// Implementations only build the node; registering it is the caller's job.
#[async_trait::async_trait]
pub trait RemoteFetcher: Send + Sync {
    async fn fetch(&self, url: &str, parent_id: &str) -> anyhow::Result<FileNode>;
}

/// `reqwest`-backed fetcher persisting downloads into the [`FileCache`].
pub struct HttpFetcher {
    client: reqwest::Client,
    cache: FileCache,
    helpers: NodeHelpers,
}

impl HttpFetcher {
    pub fn new(client: reqwest::Client, cache: FileCache, helpers: NodeHelpers) -> Self {
        Self {
            client,
            cache,
            helpers,
        }
    }
}

#[async_trait::async_trait]
impl RemoteFetcher for HttpFetcher {
    async fn fetch(&self, url: &str, parent_id: &str) -> anyhow::Result<FileNode> {
        info!("HttpFetcher: downloading {} for {}", url, parent_id);
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .with_context(|| format!("Failed to request {}", url))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            bail!("Failed to download {} ({}): {}", url, status, text);
        }

        let header_mime = resp
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.split(';').next().unwrap_or(v).trim().to_string());
        let data = resp.bytes().await?;

        let (extension, media_type) = match sniff_image(&data) {
            Some(image) => (image.extension.to_string(), image.mime.to_string()),
            None => (
                url_extension(url).unwrap_or_else(|| "bin".to_string()),
                header_mime.unwrap_or_else(|| "application/octet-stream".to_string()),
            ),
        };

        let cached = self.cache.store(&data, &extension).await?;

        Ok(FileNode {
            id: self.helpers.remote_file_node_id(parent_id, url),
            name: url_file_stem(url).unwrap_or_else(|| cached.digest.clone()),
            parent: parent_id.to_string(),
            children: Vec::new(),
            internal: NodeInternal {
                node_type: "File".to_string(),
                content_digest: cached.digest.clone(),
                media_type: Some(media_type),
            },
            extension,
            size: cached.size,
            pretty_size: pretty_size(cached.size),
            absolute_path: cached.absolute_path(),
            url: Some(url.to_string()),
        })
    }
}

/// Last path segment of a URL, without query string or fragment.
fn url_file_name(url: &str) -> Option<&str> {
    let path = url.split(['?', '#']).next()?;
    let path = path.split_once("://").map(|(_, rest)| rest).unwrap_or(path);
    let (_, segment) = path.rsplit_once('/')?;
    (!segment.is_empty()).then_some(segment)
}

fn url_file_stem(url: &str) -> Option<String> {
    let name = url_file_name(url)?;
    let stem = name.rsplit_once('.').map(|(stem, _)| stem).unwrap_or(name);
    (!stem.is_empty()).then(|| stem.to_string())
}

fn url_extension(url: &str) -> Option<String> {
    let (_, ext) = url_file_name(url)?.rsplit_once('.')?;
    (!ext.is_empty()).then(|| ext.to_lowercase())
}
