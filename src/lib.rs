//! SQL Node Source - turns flat SQL result sets into a linked node graph.
//!
//! Each configured entity query yields rows; rows become nodes with stable
//! ids, parent/child link fields and optional image attachments, which are
//! then registered into a [`store::NodeStore`].

pub mod config;
pub mod db;
pub mod error;
pub mod fetch;
pub mod file_cache;
pub mod inflect;
pub mod media;
pub mod node_id;
pub mod nodes;
pub mod relationships;
pub mod rest_store;
pub mod schema;
pub mod source;
pub mod store;

pub use config::{Cardinality, QueryConfig, SourceConfig};
pub use error::{Result, SourceError};
pub use schema::{FileNode, Node, ResultSet, Row, Value};
pub use source::{source_nodes, SourceReport};
