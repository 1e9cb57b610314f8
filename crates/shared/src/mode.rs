//! Bridge-input modes and the mode-to-staging-key table.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Operating mode of a bridge-input node: which category of staged value it
/// consumes. Closed set; an unrecognized tag means the node is skipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BridgeMode {
    Image,
    Reference,
    Text,
    Float,
    Int,
}

impl BridgeMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Image => "Image",
            Self::Reference => "Reference",
            Self::Text => "Text",
            Self::Float => "Float",
            Self::Int => "Int",
        }
    }

    pub fn all() -> &'static [BridgeMode] {
        &[
            Self::Image,
            Self::Reference,
            Self::Text,
            Self::Float,
            Self::Int,
        ]
    }

    /// The neutral value injected when no data is staged for this mode.
    /// Absent data degrades to this, it never aborts a run.
    pub fn empty_value(&self) -> Value {
        match self {
            Self::Image | Self::Reference | Self::Text => json!(""),
            Self::Float => json!(0.0),
            Self::Int => json!(0),
        }
    }
}

impl std::str::FromStr for BridgeMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Image" => Ok(Self::Image),
            "Reference" => Ok(Self::Reference),
            "Text" => Ok(Self::Text),
            "Float" => Ok(Self::Float),
            "Int" => Ok(Self::Int),
            other => Err(format!("unknown bridge mode: {other}")),
        }
    }
}

/// Where a mode's staged value lands on a bridge-input node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModeBinding {
    /// Staging-store key this mode consumes.
    pub staging_key: String,
    /// Destination input name on the node.
    pub input_name: String,
}

impl ModeBinding {
    pub fn new(staging_key: impl Into<String>, input_name: impl Into<String>) -> Self {
        Self {
            staging_key: staging_key.into(),
            input_name: input_name.into(),
        }
    }
}

/// Configuration table associating each bridge mode with exactly one staging
/// key and destination input. Total over [`BridgeMode::all`] in the default
/// table; a missing entry makes the injector skip that node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModeMap {
    bindings: HashMap<BridgeMode, ModeBinding>,
}

impl ModeMap {
    pub fn new(bindings: HashMap<BridgeMode, ModeBinding>) -> Self {
        Self { bindings }
    }

    pub fn binding(&self, mode: BridgeMode) -> Option<&ModeBinding> {
        self.bindings.get(&mode)
    }

    /// Resolve a raw mode tag (as read off a node) to its mode and binding.
    pub fn resolve(&self, tag: &str) -> Option<(BridgeMode, &ModeBinding)> {
        let mode: BridgeMode = tag.parse().ok()?;
        self.binding(mode).map(|b| (mode, b))
    }
}

impl Default for ModeMap {
    /// The staging keys the stock front end uses. Every mode's value lands
    /// in the node's `value` input, matching the NodeBridge custom node.
    fn default() -> Self {
        let bindings = [
            (BridgeMode::Image, ModeBinding::new("current_line_draft", "value")),
            (BridgeMode::Reference, ModeBinding::new("current_reference", "value")),
            (BridgeMode::Text, ModeBinding::new("current_prompt", "value")),
            (BridgeMode::Float, ModeBinding::new("current_strength", "value")),
            (BridgeMode::Int, ModeBinding::new("current_count", "value")),
        ]
        .into_iter()
        .collect();
        Self { bindings }
    }
}
