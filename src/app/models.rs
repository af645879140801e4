//! Data models for contributions, components, and projects
//!
//! These types mirror the shapes exchanged with the contributions REST API:
//! a contribution is a `(project, identifier)` record with a nested `data`
//! mapping and optional component lists, a component is a typed payload with
//! a content digest, and a project owns the ordered column schema.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::app::digest::{digest_json, Digest};
use crate::constants::{batching, pagination};

/// Resource kinds exposed by the API, each mapped to its URL path and
/// pagination ceiling
///
/// Replaces name-string dispatch: every call site routes through this enum,
/// so an unknown resource is a compile error rather than a missing attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Resource {
    Contributions,
    Structures,
    Tables,
    Attachments,
    Projects,
}

impl Resource {
    /// URL path segment for this resource
    pub fn path(&self) -> &'static str {
        match self {
            Resource::Contributions => "contributions",
            Resource::Structures => "structures",
            Resource::Tables => "tables",
            Resource::Attachments => "attachments",
            Resource::Projects => "projects",
        }
    }

    /// Server-declared maximum page size for this resource
    pub fn max_per_page(&self) -> usize {
        match self {
            Resource::Contributions | Resource::Projects => pagination::MAX_PER_PAGE,
            Resource::Structures | Resource::Tables | Resource::Attachments => {
                pagination::MAX_COMPONENT_PER_PAGE
            }
        }
    }
}

/// Component types attachable to a contribution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, clap::ValueEnum)]
pub enum ComponentKind {
    /// Crystal or molecular structures
    #[value(name = "structures")]
    Structure,
    /// Tabular data
    #[value(name = "tables")]
    Table,
    /// File attachments
    #[value(name = "attachments")]
    Attachment,
}

impl ComponentKind {
    /// All component kinds in payload-field order
    pub const ALL: [ComponentKind; 3] = [
        ComponentKind::Structure,
        ComponentKind::Table,
        ComponentKind::Attachment,
    ];

    /// The payload field holding this component list
    pub fn field(&self) -> &'static str {
        match self {
            ComponentKind::Structure => "structures",
            ComponentKind::Table => "tables",
            ComponentKind::Attachment => "attachments",
        }
    }

    /// The queryable resource for this component kind
    pub fn resource(&self) -> Resource {
        match self {
            ComponentKind::Structure => Resource::Structures,
            ComponentKind::Table => Resource::Tables,
            ComponentKind::Attachment => Resource::Attachments,
        }
    }
}

impl std::fmt::Display for ComponentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.field())
    }
}

/// A typed component payload with content-addressed identity
///
/// Components are immutable server-side: updating one means deleting and
/// recreating it under a new digest.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ComponentPayload {
    /// Human-readable name, unique within its contribution
    pub name: String,

    /// MIME type for attachments
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mime: Option<String>,

    /// JSON-serializable content
    pub content: Value,

    /// Content digest; computed from `content` when absent
    #[serde(skip_serializing_if = "Option::is_none")]
    pub md5: Option<Digest>,
}

impl ComponentPayload {
    /// The component's content digest, computing it if not yet assigned
    pub fn digest(&self) -> Digest {
        self.md5.unwrap_or_else(|| digest_json(&self.content))
    }

    /// Fill in the digest so the server can skip re-hashing
    pub fn ensure_digest(&mut self) {
        if self.md5.is_none() {
            self.md5 = Some(digest_json(&self.content));
        }
    }

    /// Serialized size in bytes, used against the per-component ceiling
    pub fn serialized_size(&self) -> usize {
        serde_json::to_string(self).map(|s| s.len()).unwrap_or(0)
    }
}

/// One user-submitted data record tied to a material identifier
///
/// `id` is present only for records that already exist server-side; those go
/// through the single-resource update path. A component list left as `None`
/// on update means "leave untouched".
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ContributionPayload {
    /// Server-assigned id (update path when present)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    /// Owning project name; may be filled in later from CLI context
    #[serde(default)]
    pub project: String,

    /// Material/composition identifier, e.g. "mp-1234"
    pub identifier: String,

    /// Nested data mapping: key -> scalar or {value, unit, display}
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub data: Map<String, Value>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub structures: Option<Vec<ComponentPayload>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub tables: Option<Vec<ComponentPayload>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub attachments: Option<Vec<ComponentPayload>>,
}

impl ContributionPayload {
    /// Component list for the given kind
    pub fn components(&self, kind: ComponentKind) -> Option<&Vec<ComponentPayload>> {
        match kind {
            ComponentKind::Structure => self.structures.as_ref(),
            ComponentKind::Table => self.tables.as_ref(),
            ComponentKind::Attachment => self.attachments.as_ref(),
        }
    }

    /// Mutable component list for the given kind
    pub fn components_mut(&mut self, kind: ComponentKind) -> Option<&mut Vec<ComponentPayload>> {
        match kind {
            ComponentKind::Structure => self.structures.as_mut(),
            ComponentKind::Table => self.tables.as_mut(),
            ComponentKind::Attachment => self.attachments.as_mut(),
        }
    }

    /// Total number of components across all kinds
    pub fn component_count(&self) -> usize {
        ComponentKind::ALL
            .iter()
            .filter_map(|kind| self.components(*kind))
            .map(Vec::len)
            .sum()
    }

    /// Whether this record goes through the update path
    pub fn is_update(&self) -> bool {
        self.id.is_some()
    }

    /// Serialized size in bytes, used for payload packing
    pub fn serialized_size(&self) -> usize {
        serde_json::to_string(self).map(|s| s.len()).unwrap_or(0)
    }
}

/// An ordered column of a project's data schema
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
pub struct Column {
    /// Dotted path into the `data` mapping, e.g. "thermo.bandgap"
    pub path: String,

    /// Physical unit, when the column carries one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
}

/// A named dataset of contributions sharing a column schema
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    /// Project name, unique across the API
    pub name: String,

    /// Whether `identifier` must be unique within this project
    #[serde(default = "default_unique_identifiers")]
    pub unique_identifiers: bool,

    /// Ordered schema of data field paths
    #[serde(default)]
    pub columns: Vec<Column>,
}

fn default_unique_identifiers() -> bool {
    true
}

/// One page of a paginated query response
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Page {
    /// Records on this page
    #[serde(default)]
    pub data: Vec<Value>,

    /// Total number of matching records, when the server reports it
    #[serde(default)]
    pub total_count: usize,

    /// Whether more pages follow
    #[serde(default)]
    pub has_more: bool,
}

/// Flatten a `data` mapping into dotted column paths with units
///
/// A leaf is either a scalar (string values like "1 eV" carry their unit
/// after the first space) or a `{value, unit, ...}` mapping. Nested maps
/// recurse up to the configured depth; deeper branches are ignored here
/// because validation rejects them before submission.
pub fn flatten_columns(data: &Map<String, Value>) -> Vec<Column> {
    let mut columns = Vec::new();
    flatten_into(data, String::new(), 0, &mut columns);
    columns
}

fn flatten_into(data: &Map<String, Value>, prefix: String, depth: usize, out: &mut Vec<Column>) {
    if depth >= batching::MAX_NESTING_DEPTH {
        return;
    }

    for (key, value) in data {
        let path = if prefix.is_empty() {
            key.clone()
        } else {
            format!("{}.{}", prefix, key)
        };

        match value {
            Value::Object(map) => {
                if map.contains_key("value") {
                    let unit = map.get("unit").and_then(Value::as_str).map(String::from);
                    out.push(Column { path, unit });
                } else {
                    flatten_into(map, path, depth + 1, out);
                }
            }
            Value::String(s) => {
                let unit = s.split_once(' ').map(|(_, u)| u.to_string());
                out.push(Column { path, unit });
            }
            _ => out.push(Column { path, unit: None }),
        }
    }
}

/// Depth of the deepest branch in a `data` mapping
pub fn data_depth(data: &Map<String, Value>) -> usize {
    data.values()
        .map(|value| match value {
            Value::Object(map) if !map.contains_key("value") => 1 + data_depth(map),
            _ => 1,
        })
        .max()
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn data(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_resource_paths() {
        assert_eq!(Resource::Contributions.path(), "contributions");
        assert_eq!(ComponentKind::Table.resource(), Resource::Tables);
        assert!(Resource::Structures.max_per_page() <= Resource::Contributions.max_per_page());
    }

    #[test]
    fn test_component_digest_fills_once() {
        let mut component = ComponentPayload {
            name: "lattice".into(),
            mime: None,
            content: json!({"a": 1}),
            md5: None,
        };
        let computed = component.digest();
        component.ensure_digest();
        assert_eq!(component.md5, Some(computed));
    }

    #[test]
    fn test_contribution_serde_skips_absent_fields() {
        let contribution = ContributionPayload {
            project: "p".into(),
            identifier: "mp-1".into(),
            data: data(json!({"a": "1 eV"})),
            ..Default::default()
        };
        let serialized = serde_json::to_string(&contribution).unwrap();
        assert!(!serialized.contains("structures"));
        assert!(!serialized.contains("\"id\""));
    }

    #[test]
    fn test_flatten_columns_with_units() {
        let columns = flatten_columns(&data(json!({
            "bandgap": "1.2 eV",
            "thermo": {"entropy": {"value": 3.4, "unit": "J/K"}},
            "formula": "MnO2",
            "count": 7
        })));

        let bandgap = columns.iter().find(|c| c.path == "bandgap").unwrap();
        assert_eq!(bandgap.unit.as_deref(), Some("eV"));

        let entropy = columns.iter().find(|c| c.path == "thermo.entropy").unwrap();
        assert_eq!(entropy.unit.as_deref(), Some("J/K"));

        let formula = columns.iter().find(|c| c.path == "formula").unwrap();
        assert!(formula.unit.is_none());

        let count = columns.iter().find(|c| c.path == "count").unwrap();
        assert!(count.unit.is_none());
    }

    #[test]
    fn test_data_depth() {
        assert_eq!(data_depth(&data(json!({"a": 1}))), 1);
        assert_eq!(data_depth(&data(json!({"a": {"b": {"c": 1}}}))), 3);
        // A {value, unit} leaf does not add depth
        assert_eq!(data_depth(&data(json!({"a": {"value": 1, "unit": "eV"}}))), 1);
    }

    #[test]
    fn test_component_count() {
        let contribution = ContributionPayload {
            project: "p".into(),
            identifier: "mp-1".into(),
            structures: Some(vec![ComponentPayload {
                name: "s".into(),
                mime: None,
                content: json!({}),
                md5: None,
            }]),
            tables: Some(vec![]),
            ..Default::default()
        };
        assert_eq!(contribution.component_count(), 1);
    }
}
