//! Workflow document model and node locator.
//!
//! A workflow is a node graph the execution engine can run. Two JSON shapes
//! exist in the wild:
//!
//! - **API format** (what `POST /prompt` accepts): an object keyed by node
//!   id, each value carrying `class_type`, `inputs`, and optionally
//!   `_meta.title` and `widgets_values`.
//! - **UI format** (what the editor saves and the live-graph endpoint
//!   returns): `{"nodes": [{"id", "type", "title", "widgets_values", ...}]}`.
//!
//! Both normalize into the same `NodeId -> NodeRecord` mapping. Node ids are
//! whatever strings the source used; a document loaded from disk and one
//! fetched live may number logically-identical nodes differently, so nothing
//! here assumes id stability across sources.

use std::collections::BTreeMap;

use serde_json::{Map, Value};

/// Node identifier within a single document. Unique per document only.
pub type NodeId = String;

#[derive(Debug, thiserror::Error)]
pub enum GraphError {
    /// The document root is structurally unusable (not an object, or a UI
    /// format wrapper whose `nodes` is not an array). Individual bad node
    /// entries are skipped with a warning instead.
    #[error("malformed workflow document: {0}")]
    MalformedDocument(String),
}

/// One node of a workflow document.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeRecord {
    /// The node's class, used for type-tag matching (e.g. "NodeBridge_Input").
    pub class_type: String,
    /// User-assigned display title, if any.
    pub title: Option<String>,
    /// Input bindings. A value is either a literal or a link marker (a
    /// two-element array `[node_id, output_index]`). Links are never
    /// rewritten or resolved here.
    pub inputs: Map<String, Value>,
    /// Positional widget values. By convention `widgets_values[0]` of a
    /// bridge-input node encodes its mode.
    pub widgets_values: Vec<Value>,
    /// Fields of the source JSON this model does not interpret, preserved
    /// so a round trip back to API format is lossless.
    extra: Map<String, Value>,
}

impl NodeRecord {
    /// Whether an input value is a link to another node's output rather
    /// than a literal.
    pub fn is_link(value: &Value) -> bool {
        value.is_array()
    }

    /// The raw mode tag of a bridge-input node.
    ///
    /// Read from `widgets_values[0]` when the widget list is non-empty,
    /// otherwise from a literal string `inputs["mode"]`. A non-string first
    /// widget or a linked `mode` input yields `None`. This positional
    /// contract is what existing workflow files depend on; do not loosen it.
    pub fn mode_tag(&self) -> Option<String> {
        if let Some(first) = self.widgets_values.first() {
            return first.as_str().map(str::to_string);
        }
        match self.inputs.get("mode") {
            Some(Value::String(s)) => Some(s.clone()),
            _ => None,
        }
    }
}

/// Normalized workflow document: a mapping from node id to node record.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GraphDocument {
    nodes: BTreeMap<NodeId, NodeRecord>,
}

impl GraphDocument {
    /// Normalize parsed workflow JSON in either API or UI format.
    pub fn from_json(root: &Value) -> Result<Self, GraphError> {
        let obj = root
            .as_object()
            .ok_or_else(|| GraphError::MalformedDocument("root is not an object".to_string()))?;

        if let Some(nodes) = obj.get("nodes") {
            let list = nodes.as_array().ok_or_else(|| {
                GraphError::MalformedDocument("\"nodes\" is not an array".to_string())
            })?;
            Ok(Self::from_ui_nodes(list))
        } else {
            Ok(Self::from_api_map(obj))
        }
    }

    /// API format: `{node_id: {class_type, inputs, _meta, ...}}`.
    fn from_api_map(obj: &Map<String, Value>) -> Self {
        let mut nodes = BTreeMap::new();
        for (node_id, entry) in obj {
            let Some(node) = entry.as_object() else {
                tracing::warn!(node_id = %node_id, "Skipping non-object node entry");
                continue;
            };
            let Some(class_type) = node.get("class_type").and_then(|v| v.as_str()) else {
                tracing::warn!(node_id = %node_id, "Skipping node entry without class_type");
                continue;
            };

            let title = node
                .get("_meta")
                .and_then(|m| m.get("title"))
                .and_then(|t| t.as_str())
                .map(String::from);
            let inputs = node
                .get("inputs")
                .and_then(|v| v.as_object())
                .cloned()
                .unwrap_or_default();
            let widgets_values = node
                .get("widgets_values")
                .and_then(|v| v.as_array())
                .cloned()
                .unwrap_or_default();
            let extra: Map<String, Value> = node
                .iter()
                .filter(|(k, _)| {
                    !matches!(k.as_str(), "class_type" | "inputs" | "_meta" | "widgets_values")
                })
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect();

            nodes.insert(
                node_id.clone(),
                NodeRecord {
                    class_type: class_type.to_string(),
                    title,
                    inputs,
                    widgets_values,
                    extra,
                },
            );
        }
        Self { nodes }
    }

    /// UI format: `{"nodes": [{id, type, title, widgets_values, ...}]}`.
    ///
    /// UI-format `inputs` is a list of slot descriptors rather than a value
    /// map, so inputs start empty here; bridge-input modes still resolve
    /// through `widgets_values[0]`.
    fn from_ui_nodes(list: &[Value]) -> Self {
        let mut nodes = BTreeMap::new();
        for entry in list {
            let Some(node) = entry.as_object() else {
                tracing::warn!("Skipping non-object node entry in UI-format document");
                continue;
            };
            let node_id = match node.get("id") {
                Some(Value::String(s)) => s.clone(),
                Some(Value::Number(n)) => n.to_string(),
                _ => {
                    tracing::warn!("Skipping UI-format node entry without id");
                    continue;
                }
            };
            let Some(class_type) = node.get("type").and_then(|v| v.as_str()) else {
                tracing::warn!(node_id = %node_id, "Skipping UI-format node entry without type");
                continue;
            };

            let title = node.get("title").and_then(|t| t.as_str()).map(String::from);
            let widgets_values = node
                .get("widgets_values")
                .and_then(|v| v.as_array())
                .cloned()
                .unwrap_or_default();

            nodes.insert(
                node_id,
                NodeRecord {
                    class_type: class_type.to_string(),
                    title,
                    inputs: Map::new(),
                    widgets_values,
                    extra: Map::new(),
                },
            );
        }
        Self { nodes }
    }

    pub fn get(&self, id: &str) -> Option<&NodeRecord> {
        self.nodes.get(id)
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&NodeId, &NodeRecord)> {
        self.nodes.iter()
    }

    /// Set a literal input on a node. Returns false if the node is unknown.
    pub fn set_input(&mut self, id: &str, input_name: &str, value: Value) -> bool {
        match self.nodes.get_mut(id) {
            Some(node) => {
                node.inputs.insert(input_name.to_string(), value);
                true
            }
            None => false,
        }
    }

    /// All node ids whose class exactly matches `type_tag`, in id order.
    ///
    /// Callers decide whether "all" or "first" is right: bridge-input and
    /// bridge-output lookups both take all matches.
    pub fn find_by_type(&self, type_tag: &str) -> Vec<NodeId> {
        self.nodes
            .iter()
            .filter(|(_, node)| node.class_type == type_tag)
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// First node id whose title exactly matches `title_tag`.
    ///
    /// Used for conventionally-titled loader nodes (e.g. "Load Reference").
    /// No fuzzy matching; an unmatched tag is `None`, never an error.
    pub fn find_by_title(&self, title_tag: &str) -> Option<NodeId> {
        self.nodes
            .iter()
            .find(|(_, node)| node.title.as_deref() == Some(title_tag))
            .map(|(id, _)| id.clone())
    }

    /// Reassemble API-format JSON suitable for the engine's submission
    /// endpoint. Uninterpreted node fields are emitted unchanged.
    pub fn to_submission_json(&self) -> Value {
        let mut root = Map::new();
        for (node_id, node) in &self.nodes {
            let mut entry = Map::new();
            entry.insert("class_type".to_string(), Value::String(node.class_type.clone()));
            entry.insert("inputs".to_string(), Value::Object(node.inputs.clone()));
            if let Some(title) = &node.title {
                let mut meta = Map::new();
                meta.insert("title".to_string(), Value::String(title.clone()));
                entry.insert("_meta".to_string(), Value::Object(meta));
            }
            if !node.widgets_values.is_empty() {
                entry.insert(
                    "widgets_values".to_string(),
                    Value::Array(node.widgets_values.clone()),
                );
            }
            for (k, v) in &node.extra {
                entry.insert(k.clone(), v.clone());
            }
            root.insert(node_id.clone(), Value::Object(entry));
        }
        Value::Object(root)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn api_doc() -> Value {
        json!({
            "3": {
                "class_type": "NodeBridge_Input",
                "_meta": {"title": "Prompt In"},
                "inputs": {"value": "", "trigger": 0.0},
                "widgets_values": ["Text"]
            },
            "7": {
                "class_type": "KSampler",
                "inputs": {"seed": 42, "model": ["4", 0]}
            },
            "9": {
                "class_type": "NodeBridge_Output",
                "inputs": {"images": ["8", 0]}
            }
        })
    }

    #[test]
    fn loads_api_format() {
        let doc = GraphDocument::from_json(&api_doc()).expect("load");
        assert_eq!(doc.node_count(), 3);
        let node = doc.get("3").expect("node 3");
        assert_eq!(node.class_type, "NodeBridge_Input");
        assert_eq!(node.title.as_deref(), Some("Prompt In"));
        assert_eq!(node.widgets_values, vec![json!("Text")]);
    }

    #[test]
    fn loads_ui_format() {
        let raw = json!({
            "nodes": [
                {"id": 1, "type": "NodeBridge_Input", "title": "In", "widgets_values": ["Int"]},
                {"id": 2, "type": "NodeBridge_Output"}
            ],
            "links": []
        });
        let doc = GraphDocument::from_json(&raw).expect("load");
        assert_eq!(doc.node_count(), 2);
        assert_eq!(doc.get("1").expect("node 1").mode_tag().as_deref(), Some("Int"));
    }

    #[test]
    fn non_object_root_is_malformed() {
        let err = GraphDocument::from_json(&json!([1, 2, 3])).expect_err("must fail");
        assert!(matches!(err, GraphError::MalformedDocument(_)));
    }

    #[test]
    fn bad_node_entries_are_skipped_not_fatal() {
        let raw = json!({
            "1": "not an object",
            "2": {"inputs": {}},
            "3": {"class_type": "KSampler", "inputs": {}}
        });
        let doc = GraphDocument::from_json(&raw).expect("load");
        assert_eq!(doc.node_count(), 1);
        assert!(doc.get("3").is_some());
    }

    #[test]
    fn find_by_type_returns_all_matches_in_id_order() {
        let raw = json!({
            "9": {"class_type": "NodeBridge_Input", "inputs": {}},
            "2": {"class_type": "NodeBridge_Input", "inputs": {}},
            "5": {"class_type": "KSampler", "inputs": {}}
        });
        let doc = GraphDocument::from_json(&raw).expect("load");
        assert_eq!(doc.find_by_type("NodeBridge_Input"), vec!["2", "9"]);
        assert!(doc.find_by_type("NoSuchType").is_empty());
    }

    #[test]
    fn find_by_title_returns_first_match_only() {
        let raw = json!({
            "1": {"class_type": "LoadImage", "_meta": {"title": "Load Reference"}, "inputs": {}},
            "2": {"class_type": "LoadImage", "_meta": {"title": "Load Reference"}, "inputs": {}}
        });
        let doc = GraphDocument::from_json(&raw).expect("load");
        assert_eq!(doc.find_by_title("Load Reference").as_deref(), Some("1"));
        assert!(doc.find_by_title("Missing").is_none());
    }

    #[test]
    fn mode_tag_prefers_first_widget() {
        let doc = GraphDocument::from_json(&api_doc()).expect("load");
        assert_eq!(doc.get("3").expect("node").mode_tag().as_deref(), Some("Text"));
    }

    #[test]
    fn mode_tag_falls_back_to_literal_mode_input() {
        let raw = json!({
            "1": {"class_type": "NodeBridge_Input", "inputs": {"mode": "Float"}}
        });
        let doc = GraphDocument::from_json(&raw).expect("load");
        assert_eq!(doc.get("1").expect("node").mode_tag().as_deref(), Some("Float"));
    }

    #[test]
    fn mode_tag_ignores_linked_mode_input() {
        let raw = json!({
            "1": {"class_type": "NodeBridge_Input", "inputs": {"mode": ["2", 0]}}
        });
        let doc = GraphDocument::from_json(&raw).expect("load");
        assert!(doc.get("1").expect("node").mode_tag().is_none());
    }

    #[test]
    fn non_string_first_widget_yields_no_mode() {
        // A non-empty widget list shadows the inputs fallback even when its
        // first element is not a string.
        let raw = json!({
            "1": {
                "class_type": "NodeBridge_Input",
                "inputs": {"mode": "Text"},
                "widgets_values": [5]
            }
        });
        let doc = GraphDocument::from_json(&raw).expect("load");
        assert!(doc.get("1").expect("node").mode_tag().is_none());
    }

    #[test]
    fn set_input_overwrites_literal() {
        let mut doc = GraphDocument::from_json(&api_doc()).expect("load");
        assert!(doc.set_input("3", "value", json!("a red fox")));
        assert_eq!(
            doc.get("3").expect("node").inputs.get("value"),
            Some(&json!("a red fox"))
        );
        assert!(!doc.set_input("404", "value", json!("x")));
    }

    #[test]
    fn submission_json_round_trips_api_format() {
        let raw = api_doc();
        let doc = GraphDocument::from_json(&raw).expect("load");
        let out = doc.to_submission_json();
        let reloaded = GraphDocument::from_json(&out).expect("reload");
        assert_eq!(doc, reloaded);
        // Link markers survive untouched.
        assert_eq!(
            out.pointer("/7/inputs/model").cloned(),
            Some(json!(["4", 0]))
        );
    }
}
