//! Node identifier and type-name generation.
//!
//! Ids are a pure function of `(type_prefix, entity, natural key)` so that a
//! child can reference its parent before the parent row is processed, and so
//! that re-running against unchanged data produces the same ids.

use uuid::Uuid;

use crate::schema::Value;

/// Suffix marking a field as a reference to other node ids.
pub const NODE_SUFFIX: &str = "___NODE";

/// Keys the node envelope owns; raw columns with these names get prefixed.
pub const RESERVED_KEYS: &[&str] = &["id", "parent", "children", "fields", "internal"];

/// Stateless naming helpers bound to one type prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeHelpers {
    type_prefix: String,
}

impl NodeHelpers {
    pub fn new(type_prefix: impl Into<String>) -> Self {
        Self {
            type_prefix: type_prefix.into(),
        }
    }

    pub fn type_prefix(&self) -> &str {
        &self.type_prefix
    }

    /// `sql` + `country` + `MY` → `sql__Country__MY`.
    pub fn generate_node_id(&self, entity: &str, natural_key: &Value) -> String {
        format!(
            "{}__{}__{}",
            self.type_prefix,
            upper_camel_case(entity),
            natural_key.to_key_string()
        )
    }

    /// `sql` + `city` → `SqlCity`.
    pub fn generate_type_name(&self, entity: &str) -> String {
        format!(
            "{}{}",
            upper_camel_case(&self.type_prefix),
            upper_camel_case(entity)
        )
    }

    /// Deterministic UUID for derived file nodes.
    pub fn file_node_id(&self, seed: &str) -> String {
        let name = format!("{}:{}", self.type_prefix, seed);
        Uuid::new_v5(&Uuid::NAMESPACE_OID, name.as_bytes()).to_string()
    }

    /// File node id for a download owned by `parent_id`. Owners sharing a URL
    /// each get their own file node.
    pub fn remote_file_node_id(&self, parent_id: &str, url: &str) -> String {
        self.file_node_id(&format!("{}-{}", parent_id, url))
    }

    /// Node type of files persisted from image buffers.
    pub fn image_type_name(&self) -> String {
        format!("{}Image", upper_camel_case(&self.type_prefix))
    }

    /// Singular link field for the primary remote image.
    pub fn image_link_field(&self) -> String {
        format!("{}Image{}", self.type_prefix, NODE_SUFFIX)
    }

    /// Plural link field collecting every resolved remote image.
    pub fn images_link_field(&self) -> String {
        format!("{}Images{}", self.type_prefix, NODE_SUFFIX)
    }

    /// Key under which a reserved raw column is kept (`id` → `sql_id`).
    pub fn prefixed_key(&self, key: &str) -> String {
        format!("{}_{}", self.type_prefix, key)
    }
}

fn upper_camel_case(name: &str) -> String {
    name.split(|c: char| !c.is_alphanumeric())
        .filter(|part| !part.is_empty())
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect()
}
