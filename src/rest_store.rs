//! PostgREST-style HTTP node store.
//!
//! Nodes are upserted into `{base_url}/rest/v1/nodes` keyed by id; explicit
//! ownership links go to `{base_url}/rest/v1/node_links`.

use anyhow::{anyhow, Result};
use reqwest::Client;
use serde_json::json;
use tracing::debug;

use crate::schema::Node;
use crate::store::NodeStore;

#[derive(Clone)]
pub struct RestNodeStore {
    client: Client,
    base_url: String,
    api_key: String,
}

impl RestNodeStore {
    pub fn new(client: Client, base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        }
    }

    /// Build from `NODE_STORE_URL` / `NODE_STORE_KEY`. `None` when either is unset.
    pub fn from_env() -> Option<Self> {
        let base_url = std::env::var("NODE_STORE_URL").ok()?;
        let api_key = std::env::var("NODE_STORE_KEY").ok()?;
        Some(Self::new(Client::new(), base_url, api_key))
    }

    async fn upsert(&self, table: &str, body: serde_json::Value) -> Result<()> {
        let url = format!("{}/rest/v1/{}", self.base_url, table);

        let resp = self
            .client
            .post(&url)
            .header("apikey", &self.api_key)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .header("Prefer", "resolution=merge-duplicates,return=minimal")
            .json(&body)
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(anyhow!("Failed to write {}: {} - {}", table, status, text));
        }

        Ok(())
    }
}

/// Row of the `nodes` table for one node; link fields stay inside `data`.
fn node_row(node: &Node) -> serde_json::Value {
    json!({
        "id": node.id,
        "type": node.internal.node_type,
        "parent_id": node.parent,
        "content_digest": node.internal.content_digest,
        "media_type": node.internal.media_type,
        "data": node.fields,
    })
}

#[async_trait::async_trait]
impl NodeStore for RestNodeStore {
    async fn create_node(&self, node: &Node) -> Result<()> {
        self.upsert("nodes", node_row(node)).await?;
        debug!("Upserted node: {}", node.id);
        Ok(())
    }

    async fn create_parent_child_link(&self, parent_id: &str, child_id: &str) -> Result<()> {
        let body = json!({
            "parent_id": parent_id,
            "child_id": child_id,
        });
        self.upsert("node_links", body).await?;
        debug!("Linked {} -> {}", parent_id, child_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::tests::serve_once;
    use serde_json::Map;

    fn city() -> Node {
        let mut fields = Map::new();
        fields.insert("name".to_string(), json!("Kuala Lumpur"));
        fields.insert("country___NODE".to_string(), json!("sql__Country__MY"));
        Node::new("sql__City__1".to_string(), "SqlCity".to_string(), fields)
    }

    fn store(base_url: &str) -> RestNodeStore {
        let client = Client::builder().no_proxy().build().unwrap();
        RestNodeStore::new(client, format!("{}/", base_url), "secret")
    }

    #[test]
    fn test_node_row_shape() {
        let node = city();
        let row = node_row(&node);

        assert_eq!(row["id"], "sql__City__1");
        assert_eq!(row["type"], "SqlCity");
        assert!(row["parent_id"].is_null());
        assert_eq!(row["content_digest"], node.internal.content_digest.as_str());
        assert_eq!(row["data"]["country___NODE"], "sql__Country__MY");
        assert_eq!(row["data"]["name"], "Kuala Lumpur");
    }

    #[tokio::test]
    async fn test_create_node_accepts_success() {
        let base = serve_once("201 Created", "application/json", Vec::new()).await;
        store(&base).create_node(&city()).await.unwrap();
    }

    #[tokio::test]
    async fn test_error_status_is_reported() {
        let base = serve_once("409 Conflict", "application/json", b"duplicate key".to_vec()).await;

        let err = store(&base)
            .create_parent_child_link("sql__City__1", "file-1")
            .await
            .unwrap_err();

        let message = err.to_string();
        assert!(message.contains("node_links"));
        assert!(message.contains("409"));
        assert!(message.contains("duplicate key"));
    }
}
