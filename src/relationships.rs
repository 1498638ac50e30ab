//! Relationship resolution across result sets.
//!
//! Pure functions, no async. A parent finds its children by scanning every
//! result set whose `parent_name` points at it and matching the child's
//! foreign key against the parent's natural key. Deeper hierarchies need no
//! tree walk: each entity only ever looks one level down.

use serde_json::Value as JsonValue;

use crate::config::Cardinality;
use crate::error::{Result, SourceError};
use crate::node_id::NodeHelpers;
use crate::schema::{ResultSet, Row};

/// Value of a computed link field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Link {
    One(String),
    Many(Vec<String>),
}

impl Link {
    pub fn to_json(&self) -> JsonValue {
        match self {
            Link::One(id) => JsonValue::String(id.clone()),
            Link::Many(ids) => JsonValue::from(ids.clone()),
        }
    }
}

/// Child link fields for one parent row, in the order children are declared.
///
/// `OneToMany` children always produce a (possibly empty) list; `OneToOne`
/// children produce the first match, or nothing at all.
pub fn resolve_child_links(
    parent_row: &Row,
    parent_name: &str,
    parent_id_field: &str,
    candidates: &[ResultSet],
    helpers: &NodeHelpers,
) -> Result<Vec<(String, Link)>> {
    let parent_key = parent_row.get(parent_id_field);
    let mut links = Vec::new();

    for child in candidates.iter().filter(|c| c.query.is_child_of(parent_name)) {
        // Validated together with parent_name.
        let Some(foreign_key) = child.query.foreign_key.as_deref() else {
            continue;
        };

        let matched = child
            .rows
            .iter()
            .enumerate()
            .filter(|(_, row)| match (row.get(foreign_key), parent_key) {
                (Some(fk), Some(key)) => fk.matches_key(key),
                _ => false,
            });

        let field = child.query.child_link_field();
        match child.query.cardinality {
            Cardinality::OneToMany => {
                let ids = matched
                    .map(|(index, row)| child_node_id(child, index, row, helpers))
                    .collect::<Result<Vec<_>>>()?;
                links.push((field, Link::Many(ids)));
            }
            Cardinality::OneToOne => {
                if let Some((index, row)) = matched.into_iter().next() {
                    let id = child_node_id(child, index, row, helpers)?;
                    links.push((field, Link::One(id)));
                }
            }
        }
    }

    Ok(links)
}

/// The single parent link field of a child row, if the entity declares one.
///
/// The parent entity must be part of the batch, but the referenced parent
/// row is not looked up; a dangling id is left for the node store to deal
/// with. A NULL foreign key means no parent.
pub fn resolve_parent_link(
    row: &Row,
    result_set: &ResultSet,
    all: &[ResultSet],
    helpers: &NodeHelpers,
) -> Option<(String, String)> {
    let query = &result_set.query;
    let parent_name = query.parent_name.as_deref()?;
    if !all.iter().any(|set| set.name() == parent_name) {
        return None;
    }
    let field = query.parent_link_field()?;
    let value = row.get(query.foreign_key.as_deref()?)?;
    if value.is_null() {
        return None;
    }
    Some((field, helpers.generate_node_id(parent_name, value)))
}

fn child_node_id(
    child: &ResultSet,
    index: usize,
    row: &Row,
    helpers: &NodeHelpers,
) -> Result<String> {
    match row.get(&child.query.id_field_name) {
        Some(key) if !key.is_null() => Ok(helpers.generate_node_id(child.name(), key)),
        _ => Err(SourceError::MissingIdField {
            entity: child.name().to_string(),
            field: child.query.id_field_name.clone(),
            row: index,
        }),
    }
}
