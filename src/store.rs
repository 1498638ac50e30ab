//! Node registration.
//!
//! Defines the [`NodeStore`] trait the pipeline registers into, plus an
//! in-memory implementation used by the CLI's dry-run mode and by tests.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::schema::Node;

/// Graph store the synthesized nodes are registered into.
///
/// Implementations are expected to upsert by `id`.
#[async_trait::async_trait]
pub trait NodeStore: Send + Sync {
    async fn create_node(&self, node: &Node) -> anyhow::Result<()>;

    /// Record that `child_id` is structurally owned by `parent_id`.
    async fn create_parent_child_link(&self, parent_id: &str, child_id: &str)
        -> anyhow::Result<()>;
}

#[derive(Debug, Default)]
struct Registry {
    nodes: Vec<Node>,
    /// id → position in `nodes`.
    index: HashMap<String, usize>,
    links: Vec<(String, String)>,
}

/// In-memory node store. Keeps registration order; re-registering an id
/// replaces the node in place.
#[derive(Debug, Clone, Default)]
pub struct MemoryNodeStore {
    inner: Arc<RwLock<Registry>>,
}

impl MemoryNodeStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// All nodes in first-registration order.
    pub fn nodes(&self) -> Vec<Node> {
        self.inner.read().unwrap().nodes.clone()
    }

    pub fn get(&self, id: &str) -> Option<Node> {
        let registry = self.inner.read().unwrap();
        registry.index.get(id).map(|&pos| registry.nodes[pos].clone())
    }

    /// Explicit parent → child links, in registration order.
    pub fn links(&self) -> Vec<(String, String)> {
        self.inner.read().unwrap().links.clone()
    }

    pub fn len(&self) -> usize {
        self.inner.read().unwrap().nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait::async_trait]
impl NodeStore for MemoryNodeStore {
    async fn create_node(&self, node: &Node) -> anyhow::Result<()> {
        let mut registry = self.inner.write().unwrap();
        match registry.index.get(&node.id).copied() {
            Some(pos) => registry.nodes[pos] = node.clone(),
            None => {
                let pos = registry.nodes.len();
                registry.index.insert(node.id.clone(), pos);
                registry.nodes.push(node.clone());
            }
        }
        tracing::debug!("MemoryNodeStore: registered '{}'", node.id);
        Ok(())
    }

    async fn create_parent_child_link(
        &self,
        parent_id: &str,
        child_id: &str,
    ) -> anyhow::Result<()> {
        let mut registry = self.inner.write().unwrap();
        let pos = *registry
            .index
            .get(parent_id)
            .ok_or_else(|| anyhow::anyhow!("parent node {} is not registered", parent_id))?;
        let parent = &mut registry.nodes[pos];
        if !parent.children.iter().any(|c| c == child_id) {
            parent.children.push(child_id.to_string());
        }
        registry
            .links
            .push((parent_id.to_string(), child_id.to_string()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Map;

    fn node(id: &str) -> Node {
        Node::new(id.to_string(), "SqlCity".to_string(), Map::new())
    }

    #[tokio::test]
    async fn test_upsert_keeps_position() {
        let store = MemoryNodeStore::new();
        store.create_node(&node("a")).await.unwrap();
        store.create_node(&node("b")).await.unwrap();

        let mut replacement = node("a");
        replacement.fields.insert("name".to_string(), "x".into());
        store.create_node(&replacement).await.unwrap();

        let ids: Vec<String> = store.nodes().into_iter().map(|n| n.id).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert!(store.get("a").unwrap().field("name").is_some());
    }

    #[tokio::test]
    async fn test_link_requires_registered_parent() {
        let store = MemoryNodeStore::new();
        assert!(store.create_parent_child_link("missing", "child").await.is_err());

        store.create_node(&node("parent")).await.unwrap();
        store.create_parent_child_link("parent", "child").await.unwrap();
        store.create_parent_child_link("parent", "child").await.unwrap();
        assert_eq!(store.get("parent").unwrap().children, vec!["child"]);
    }

    #[tokio::test]
    async fn test_lookup_after_many_registrations() {
        let store = MemoryNodeStore::new();
        for i in 0..500 {
            store.create_node(&node(&format!("n{}", i))).await.unwrap();
        }
        store.create_node(&node("n250")).await.unwrap();
        store.create_parent_child_link("n499", "file").await.unwrap();

        assert_eq!(store.len(), 500);
        assert_eq!(store.nodes()[250].id, "n250");
        assert_eq!(store.get("n499").unwrap().children, vec!["file"]);
        assert!(store.get("n500").is_none());
    }
}
