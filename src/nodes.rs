//! Node synthesis and registration for one result set.
//!
//! [`create_nodes`] is pure: row fields, then the natural key, then the parent
//! link, then child links, assembled in that order. [`register_result_set`]
//! takes those nodes, adds media attachment and pushes everything into the
//! [`NodeStore`]. Synthesis of the whole batch finishes before any
//! registration starts.

use futures::future::join_all;
use serde_json::{Map, Value as JsonValue};
use tracing::{debug, info};

use crate::error::{Result, SourceError};
use crate::media::MediaResolver;
use crate::node_id::{NodeHelpers, RESERVED_KEYS};
use crate::relationships::{resolve_child_links, resolve_parent_link};
use crate::schema::{Node, ResultSet};
use crate::store::NodeStore;

/// Counts reported back for one registered result set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Registered {
    pub nodes: usize,
    pub attachments: usize,
}

/// Build one node per row of `result_set`, resolving links against `all`.
pub fn create_nodes(
    result_set: &ResultSet,
    all: &[ResultSet],
    helpers: &NodeHelpers,
) -> Result<Vec<Node>> {
    if result_set.rows.is_empty() {
        return Ok(Vec::new());
    }
    check_collisions(result_set, all, helpers)?;

    let query = &result_set.query;
    let node_type = helpers.generate_type_name(&query.name);
    let payload: Vec<&str> = query.payload_fields().collect();

    result_set
        .rows
        .iter()
        .enumerate()
        .map(|(index, row)| {
            let natural_key = match row.get(&query.id_field_name) {
                Some(key) if !key.is_null() => key,
                _ => {
                    return Err(SourceError::MissingIdField {
                        entity: query.name.clone(),
                        field: query.id_field_name.clone(),
                        row: index,
                    })
                }
            };
            let id = helpers.generate_node_id(&query.name, natural_key);

            let mut fields = Map::new();
            for (column, value) in row.columns() {
                if payload.contains(&column) {
                    continue;
                }
                if RESERVED_KEYS.contains(&column) {
                    debug!("{}: keeping reserved column `{}` as `{}`", query.name, column, helpers.prefixed_key(column));
                    fields.insert(helpers.prefixed_key(column), value.to_json());
                } else {
                    fields.insert(column.to_string(), value.to_json());
                }
            }

            fields.insert(helpers.prefixed_key("id"), natural_key.to_json());

            if let Some((field, parent_id)) = resolve_parent_link(row, result_set, all, helpers) {
                fields.insert(field, JsonValue::String(parent_id));
            }

            for (field, link) in
                resolve_child_links(row, &query.name, &query.id_field_name, all, helpers)?
            {
                fields.insert(field, link.to_json());
            }

            Ok(Node::new(id, node_type.clone(), fields))
        })
        .collect()
}

/// Attach media to the already synthesized `nodes` of `result_set` and
/// register them.
///
/// Attachments for all rows are resolved concurrently; registration then
/// happens in row order, each owner before its file nodes and their links.
pub async fn register_result_set(
    result_set: &ResultSet,
    mut nodes: Vec<Node>,
    store: &dyn NodeStore,
    media: &MediaResolver,
) -> Result<Registered> {
    if nodes.is_empty() {
        debug!("{}: no rows, nothing to register", result_set.name());
        return Ok(Registered::default());
    }

    let query = &result_set.query;
    let attachments = join_all(
        nodes
            .iter_mut()
            .zip(result_set.rows.iter())
            .map(|(node, row)| media.resolve(node, row, query)),
    )
    .await;

    let mut registered = Registered::default();
    for (node, files) in nodes.into_iter().zip(attachments) {
        store
            .create_node(&node)
            .await
            .map_err(|source| SourceError::Registration {
                id: node.id.clone(),
                source,
            })?;
        registered.nodes += 1;

        for file in files {
            let file_id = file.id.clone();
            store
                .create_node(&Node::from(file))
                .await
                .map_err(|source| SourceError::Registration {
                    id: file_id.clone(),
                    source,
                })?;
            store
                .create_parent_child_link(&node.id, &file_id)
                .await
                .map_err(|source| SourceError::Registration {
                    id: file_id.clone(),
                    source,
                })?;
            registered.attachments += 1;
        }
    }

    info!(
        "{}: registered {} nodes, {} attachments",
        result_set.name(),
        registered.nodes,
        registered.attachments
    );
    Ok(registered)
}

/// A raw column must not share a name with a computed link field.
fn check_collisions(result_set: &ResultSet, all: &[ResultSet], helpers: &NodeHelpers) -> Result<()> {
    let query = &result_set.query;
    let mut link_fields: Vec<String> = query.parent_link_field().into_iter().collect();
    link_fields.extend(
        all.iter()
            .filter(|c| c.query.is_child_of(&query.name))
            .map(|c| c.query.child_link_field()),
    );
    if !query.remote_image_fields.is_empty() {
        link_fields.push(helpers.image_link_field());
        link_fields.push(helpers.images_link_field());
    }

    let payload: Vec<&str> = query.payload_fields().collect();
    for row in &result_set.rows {
        for (column, _) in row.columns() {
            if payload.contains(&column) {
                continue;
            }
            if link_fields.iter().any(|f| f == column) {
                return Err(SourceError::FieldCollision {
                    entity: query.name.clone(),
                    field: column.to_string(),
                });
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Cardinality, QueryConfig};
    use crate::file_cache::FileCache;
    use crate::media::tests::FakeFetcher;
    use crate::schema::Row;
    use crate::store::MemoryNodeStore;
    use serde_json::json;
    use std::sync::Arc;

    fn rows(values: JsonValue) -> Vec<Row> {
        values
            .as_array()
            .unwrap()
            .iter()
            .map(|v| Row::from_json(v.clone()).unwrap())
            .collect()
    }

    fn country() -> ResultSet {
        ResultSet::new(
            QueryConfig::new("country", "SELECT * FROM country").with_id_field("Code"),
            rows(json!([
                {"Code": "MY", "name": "Malaysia"},
                {"Code": "US", "name": "United States"},
                {"Code": "UK", "name": "United Kingdom"}
            ])),
        )
    }

    fn city() -> ResultSet {
        ResultSet::new(
            QueryConfig::new("city", "SELECT * FROM city")
                .with_id_field("ID")
                .with_parent("country", "countryCode", Cardinality::OneToMany),
            rows(json!([
                {"ID": 1, "name": "Kuala Lumpur", "countryCode": "MY"},
                {"ID": 2, "name": "New York", "countryCode": "US"},
                {"ID": 3, "name": "London", "countryCode": "UK"},
                {"ID": 4, "name": "Chicago", "countryCode": "US"},
                {"ID": 5, "name": "Penang", "countryCode": "MY"}
            ])),
        )
    }

    fn capital() -> ResultSet {
        ResultSet::new(
            QueryConfig::new("countrycapital", "SELECT * FROM countrycapital")
                .with_id_field("ID")
                .with_parent("country", "countryCode", Cardinality::OneToOne),
            rows(json!([
                {"ID": 1, "name": "Kuala Lumpur", "countryCode": "MY"},
                {"ID": 2, "name": "Washington, D.C.", "countryCode": "US"},
                {"ID": 3, "name": "Putrajaya", "countryCode": "MY"}
            ])),
        )
    }

    fn media(root: &std::path::Path) -> MediaResolver {
        let helpers = NodeHelpers::new("sql");
        MediaResolver::new(
            helpers.clone(),
            FileCache::new(root),
            Arc::new(FakeFetcher { helpers }),
        )
    }

    #[test]
    fn test_entity_without_relationships() {
        let helpers = NodeHelpers::new("sql");
        let all = vec![ResultSet::new(
            QueryConfig::new("city", "SELECT * FROM city").with_id_field("ID"),
            rows(json!([{"ID": 1, "name": "Kuala Lumpur"}, {"ID": 2, "name": "New York"}])),
        )];

        let nodes = create_nodes(&all[0], &all, &helpers).unwrap();
        assert_eq!(nodes.len(), 2);
        assert_eq!(nodes[0].id, "sql__City__1");
        assert_eq!(nodes[0].internal.node_type, "SqlCity");
        assert_eq!(nodes[0].parent, None);
        assert!(nodes[0].children.is_empty());
        assert_eq!(nodes[0].field("name"), Some(&json!("Kuala Lumpur")));
        assert_eq!(nodes[0].field("sql_id"), Some(&json!(1)));
        assert!(nodes[0].fields.keys().all(|k| !k.ends_with("___NODE")));
    }

    #[test]
    fn test_parent_entity_one_to_many() {
        let helpers = NodeHelpers::new("sql");
        let all = vec![city(), country()];

        let nodes = create_nodes(&all[1], &all, &helpers).unwrap();
        assert_eq!(nodes.len(), 3);
        assert_eq!(
            nodes[0].field("cities___NODE"),
            Some(&json!(["sql__City__1", "sql__City__5"]))
        );
        assert_eq!(
            nodes[1].field("cities___NODE"),
            Some(&json!(["sql__City__2", "sql__City__4"]))
        );
        assert_eq!(nodes[2].field("cities___NODE"), Some(&json!(["sql__City__3"])));
        assert_eq!(nodes[0].field("country___NODE"), None);
    }

    #[test]
    fn test_child_entity_one_to_many() {
        let helpers = NodeHelpers::new("sql");
        let all = vec![city(), country()];

        let nodes = create_nodes(&all[0], &all, &helpers).unwrap();
        assert_eq!(nodes.len(), 5);
        assert_eq!(
            nodes[0].field("country___NODE"),
            Some(&json!(helpers.generate_node_id("country", &"MY".into())))
        );
        assert_eq!(nodes[0].field("countryCode"), Some(&json!("MY")));
        // Field assembly order: row columns, natural key, parent link.
        let keys: Vec<&str> = nodes[0].fields.keys().map(|k| k.as_str()).collect();
        assert_eq!(keys, vec!["ID", "name", "countryCode", "sql_id", "country___NODE"]);
    }

    #[test]
    fn test_one_to_one_parent_gets_single_link() {
        let helpers = NodeHelpers::new("sql");
        let all = vec![capital(), country()];

        let nodes = create_nodes(&all[1], &all, &helpers).unwrap();
        assert_eq!(
            nodes[0].field("countrycapital___NODE"),
            Some(&json!("sql__Countrycapital__1"))
        );
        assert_eq!(
            nodes[1].field("countrycapital___NODE"),
            Some(&json!("sql__Countrycapital__2"))
        );
        // No capital for UK: field absent, not null or empty.
        assert_eq!(nodes[2].field("countrycapital___NODE"), None);
        assert!(nodes.iter().all(|n| n.field("countrycapitals___NODE").is_none()));
    }

    #[test]
    fn test_one_to_one_child_entity() {
        let helpers = NodeHelpers::new("sql");
        let all = vec![capital(), country()];

        let nodes = create_nodes(&all[0], &all, &helpers).unwrap();
        assert_eq!(nodes[1].field("country___NODE"), Some(&json!("sql__Country__US")));
    }

    #[test]
    fn test_three_level_chain() {
        let helpers = NodeHelpers::new("sql");
        let district = ResultSet::new(
            QueryConfig::new("district", "SELECT * FROM district")
                .with_parent("city", "cityId", Cardinality::OneToMany),
            rows(json!([{"id": 10, "cityId": 5}, {"id": 11, "cityId": 5}])),
        );
        let all = vec![city(), country(), district];

        let cities = create_nodes(&all[0], &all, &helpers).unwrap();
        let penang = cities.iter().find(|n| n.id == "sql__City__5").unwrap();
        assert_eq!(penang.field("country___NODE"), Some(&json!("sql__Country__MY")));
        assert_eq!(
            penang.field("districts___NODE"),
            Some(&json!(["sql__District__10", "sql__District__11"]))
        );
        assert_eq!(cities[0].field("districts___NODE"), Some(&json!([])));
    }

    #[test]
    fn test_reserved_columns_are_prefixed() {
        let helpers = NodeHelpers::new("sql");
        let all = vec![ResultSet::new(
            QueryConfig::new("tag", "SELECT * FROM tag").with_id_field("slug"),
            rows(json!([{"slug": "rust", "id": 7, "parent": "lang"}])),
        )];

        let nodes = create_nodes(&all[0], &all, &helpers).unwrap();
        assert_eq!(nodes[0].id, "sql__Tag__rust");
        assert_eq!(nodes[0].field("sql_parent"), Some(&json!("lang")));
        // The natural key wins over a raw `id` column.
        assert_eq!(nodes[0].field("sql_id"), Some(&json!("rust")));
        assert_eq!(nodes[0].field("id"), None);
    }

    #[test]
    fn test_link_field_collision_is_rejected() {
        let helpers = NodeHelpers::new("sql");
        let mut parent = country();
        parent.rows[0].insert("cities___NODE", "oops");
        let all = vec![city(), parent];

        let err = create_nodes(&all[1], &all, &helpers).unwrap_err();
        assert!(matches!(err, SourceError::FieldCollision { ref field, .. } if field == "cities___NODE"));
    }

    #[test]
    fn test_missing_natural_key() {
        let helpers = NodeHelpers::new("sql");
        let mut set = country();
        set.rows[1] = Row::new().with("name", "Nowhere");
        let all = vec![set];

        let err = create_nodes(&all[0], &all, &helpers).unwrap_err();
        assert!(matches!(err, SourceError::MissingIdField { row: 1, .. }));
    }

    #[test]
    fn test_ids_are_stable_across_runs() {
        let helpers = NodeHelpers::new("sql");
        let first = create_nodes(&city(), &[city(), country()], &helpers).unwrap();
        let second = create_nodes(&city(), &[city(), country()], &helpers).unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_empty_result_set_registers_nothing() {
        let root = tempfile::tempdir().unwrap();
        let helpers = NodeHelpers::new("sql");
        let store = MemoryNodeStore::new();
        let empty = ResultSet::new(QueryConfig::new("city", "SELECT * FROM city"), Vec::new());
        let all = vec![empty];

        let nodes = create_nodes(&all[0], &all, &helpers).unwrap();
        let registered = register_result_set(&all[0], nodes, &store, &media(root.path()))
            .await
            .unwrap();
        assert_eq!(registered, Registered::default());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_registration_follows_row_order() {
        let root = tempfile::tempdir().unwrap();
        let helpers = NodeHelpers::new("sql");
        let store = MemoryNodeStore::new();
        let all = vec![city(), country()];

        let nodes = create_nodes(&all[0], &all, &helpers).unwrap();
        register_result_set(&all[0], nodes, &store, &media(root.path()))
            .await
            .unwrap();
        let ids: Vec<String> = store.nodes().into_iter().map(|n| n.id).collect();
        assert_eq!(
            ids,
            vec!["sql__City__1", "sql__City__2", "sql__City__3", "sql__City__4", "sql__City__5"]
        );
    }

    #[tokio::test]
    async fn test_failed_attachment_still_registers_owner_and_siblings() {
        let root = tempfile::tempdir().unwrap();
        let helpers = NodeHelpers::new("sql");
        let store = MemoryNodeStore::new();
        let set = ResultSet::new(
            QueryConfig::new("city", "SELECT * FROM city")
                .with_id_field("ID")
                .with_remote_image_fields(&["photoUrl", "flagUrl"]),
            rows(json!([
                {"ID": 1, "photoUrl": "https://img.example.com/kl.png", "flagUrl": "https://img.example.com/broken.png"},
                {"ID": 2, "photoUrl": "https://img.example.com/ny.png", "flagUrl": "https://img.example.com/us.png"}
            ])),
        );
        let all = vec![set];

        let nodes = create_nodes(&all[0], &all, &helpers).unwrap();
        let registered = register_result_set(&all[0], nodes, &store, &media(root.path()))
            .await
            .unwrap();
        assert_eq!(registered, Registered { nodes: 2, attachments: 3 });

        let kl = store.get("sql__City__1").unwrap();
        let images = kl.field("sqlImages___NODE").unwrap().as_array().unwrap();
        assert_eq!(images.len(), 1);
        assert_eq!(kl.children, vec![images[0].as_str().unwrap().to_string()]);
        // URL columns are consumed, not copied.
        assert_eq!(kl.field("photoUrl"), None);

        let file = store.get(images[0].as_str().unwrap()).unwrap();
        assert_eq!(file.parent.as_deref(), Some("sql__City__1"));

        let ny = store.get("sql__City__2").unwrap();
        assert_eq!(ny.field("sqlImages___NODE").unwrap().as_array().unwrap().len(), 2);

        // Owner registered before its attachment.
        let order: Vec<String> = store.nodes().into_iter().map(|n| n.id).collect();
        let owner_pos = order.iter().position(|id| id == "sql__City__1").unwrap();
        let file_pos = order.iter().position(|id| id == &file.id).unwrap();
        assert!(owner_pos < file_pos);
    }

    #[tokio::test]
    async fn test_shared_remote_url_gives_each_owner_its_own_file() {
        let root = tempfile::tempdir().unwrap();
        let helpers = NodeHelpers::new("sql");
        let store = MemoryNodeStore::new();
        let set = ResultSet::new(
            QueryConfig::new("city", "SELECT * FROM city")
                .with_id_field("ID")
                .with_remote_image_fields(&["flag"]),
            rows(json!([
                {"ID": 1, "flag": "https://img.example.com/my.png"},
                {"ID": 5, "flag": "https://img.example.com/my.png"}
            ])),
        );
        let all = vec![set];

        let nodes = create_nodes(&all[0], &all, &helpers).unwrap();
        register_result_set(&all[0], nodes, &store, &media(root.path()))
            .await
            .unwrap();

        let kl = store.get("sql__City__1").unwrap();
        let penang = store.get("sql__City__5").unwrap();
        assert_eq!(kl.children.len(), 1);
        assert_eq!(penang.children.len(), 1);
        assert_ne!(kl.children, penang.children);

        let kl_flag = store.get(&kl.children[0]).unwrap();
        let penang_flag = store.get(&penang.children[0]).unwrap();
        assert_eq!(kl_flag.parent.as_deref(), Some("sql__City__1"));
        assert_eq!(penang_flag.parent.as_deref(), Some("sql__City__5"));
        assert_eq!(kl.field("sqlImage___NODE"), Some(&json!(kl_flag.id)));
    }
}
