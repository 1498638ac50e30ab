//! Source configuration.
//!
//! One [`SourceConfig`] per run, loaded from a JSON file. Every entity is a
//! [`QueryConfig`]: a statement plus how its rows relate to other entities.

use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use tracing::info;

use crate::error::{Result, SourceError};
use crate::inflect;
use crate::node_id::{NodeHelpers, NODE_SUFFIX};

/// Shape of a child entity's relationship to its parent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Cardinality {
    #[default]
    OneToMany,
    OneToOne,
}

/// Declaration of one entity: where its rows come from and how they link.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryConfig {
    /// Entity type name, unique within a run.
    pub name: String,
    /// SQL statement producing the entity's rows.
    pub statement: String,
    /// Column holding the natural key.
    #[serde(default = "default_id_field")]
    pub id_field_name: String,
    #[serde(default)]
    pub parent_name: Option<String>,
    /// Column holding the parent's natural key.
    #[serde(default)]
    pub foreign_key: Option<String>,
    #[serde(default)]
    pub cardinality: Cardinality,
    /// Columns holding binary image data.
    #[serde(default)]
    pub image_fields: Vec<String>,
    /// Columns holding image URLs.
    #[serde(default)]
    pub remote_image_fields: Vec<String>,
}

fn default_id_field() -> String {
    "id".to_string()
}

impl QueryConfig {
    pub fn new(name: impl Into<String>, statement: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            statement: statement.into(),
            id_field_name: default_id_field(),
            parent_name: None,
            foreign_key: None,
            cardinality: Cardinality::default(),
            image_fields: Vec::new(),
            remote_image_fields: Vec::new(),
        }
    }

    pub fn with_id_field(mut self, field: impl Into<String>) -> Self {
        self.id_field_name = field.into();
        self
    }

    pub fn with_parent(
        mut self,
        parent_name: impl Into<String>,
        foreign_key: impl Into<String>,
        cardinality: Cardinality,
    ) -> Self {
        self.parent_name = Some(parent_name.into());
        self.foreign_key = Some(foreign_key.into());
        self.cardinality = cardinality;
        self
    }

    pub fn with_image_fields(mut self, fields: &[&str]) -> Self {
        self.image_fields = fields.iter().map(|f| f.to_string()).collect();
        self
    }

    pub fn with_remote_image_fields(mut self, fields: &[&str]) -> Self {
        self.remote_image_fields = fields.iter().map(|f| f.to_string()).collect();
        self
    }

    /// Whether this entity is a declared child of `entity`.
    pub fn is_child_of(&self, entity: &str) -> bool {
        self.parent_name.as_deref() == Some(entity)
    }

    /// Name of the link field a parent node gets for this child entity.
    pub fn child_link_field(&self) -> String {
        let base = match self.cardinality {
            Cardinality::OneToMany => inflect::pluralize(&self.name),
            Cardinality::OneToOne => inflect::singularize(&self.name),
        };
        format!("{}{}", base, NODE_SUFFIX)
    }

    /// Name of the link field this entity's nodes get for their parent.
    pub fn parent_link_field(&self) -> Option<String> {
        match (&self.parent_name, &self.foreign_key) {
            (Some(parent), Some(_)) => Some(format!("{}{}", parent, NODE_SUFFIX)),
            _ => None,
        }
    }

    /// Columns consumed as file payloads rather than copied into the node.
    pub fn payload_fields(&self) -> impl Iterator<Item = &str> {
        self.image_fields
            .iter()
            .chain(self.remote_image_fields.iter())
            .map(|f| f.as_str())
    }
}

/// Top-level run configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Namespace for node ids and node type names.
    #[serde(default = "default_type_prefix")]
    pub type_prefix: String,
    /// Root under which `.cache/` holds persisted image buffers.
    #[serde(default = "default_cache_dir")]
    pub cache_dir: PathBuf,
    pub queries: Vec<QueryConfig>,
}

fn default_type_prefix() -> String {
    "sql".to_string()
}

fn default_cache_dir() -> PathBuf {
    PathBuf::from(".")
}

impl SourceConfig {
    pub fn new(queries: Vec<QueryConfig>) -> Self {
        Self {
            type_prefix: default_type_prefix(),
            cache_dir: default_cache_dir(),
            queries,
        }
    }

    /// Load and validate a config file.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config: {:?}", path))?;
        let config: SourceConfig = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config: {:?}", path))?;
        config.validate()?;

        info!(
            "Loaded {} entity queries from {:?}",
            config.queries.len(),
            path
        );
        Ok(config)
    }

    /// Reject inconsistent declarations before any query runs.
    pub fn validate(&self) -> Result<()> {
        if self.type_prefix.is_empty() {
            return Err(SourceError::config("<source>", "type_prefix must not be empty"));
        }

        let helpers = NodeHelpers::new(&self.type_prefix);
        let mut names = HashSet::new();
        let mut type_names: HashMap<String, &str> = HashMap::new();
        for query in &self.queries {
            if query.name.is_empty() {
                return Err(SourceError::config("<unnamed>", "entity name must not be empty"));
            }
            if !names.insert(query.name.as_str()) {
                return Err(SourceError::config(&query.name, "entity name declared twice"));
            }
            let type_name = helpers.generate_type_name(&query.name);
            if let Some(other) = type_names.insert(type_name.clone(), &query.name) {
                return Err(SourceError::config(
                    &query.name,
                    format!("node type `{}` is already produced by `{}`", type_name, other),
                ));
            }
            validate_query(query)?;
        }

        for query in &self.queries {
            validate_links(query, &self.queries)?;
        }

        Ok(())
    }
}

fn validate_query(query: &QueryConfig) -> Result<()> {
    if query.statement.trim().is_empty() {
        return Err(SourceError::config(&query.name, "statement must not be empty"));
    }
    if query.id_field_name.is_empty() {
        return Err(SourceError::config(&query.name, "id_field_name must not be empty"));
    }
    match (&query.parent_name, &query.foreign_key) {
        (Some(_), None) => {
            return Err(SourceError::config(&query.name, "parent_name requires foreign_key"));
        }
        (None, Some(_)) => {
            return Err(SourceError::config(&query.name, "foreign_key requires parent_name"));
        }
        _ => {}
    }
    if !query.image_fields.is_empty() && !query.remote_image_fields.is_empty() {
        return Err(SourceError::config(
            &query.name,
            "image_fields and remote_image_fields cannot be combined",
        ));
    }
    Ok(())
}

/// Link field names computed for one entity must be distinct.
fn validate_links(query: &QueryConfig, all: &[QueryConfig]) -> Result<()> {
    let mut seen: HashSet<String> = query.parent_link_field().into_iter().collect();
    for child in all.iter().filter(|c| c.is_child_of(&query.name)) {
        let field = child.child_link_field();
        if !seen.insert(field.clone()) {
            return Err(SourceError::config(
                &query.name,
                format!("link field `{}` is produced more than once", field),
            ));
        }
    }
    Ok(())
}
