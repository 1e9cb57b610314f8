//! NodeBridge Shared - Types shared between the bridge engine and its clients
//!
//! This crate contains the pieces of the bridge that are pure data and pure
//! functions:
//! - The workflow document model (`graph`): a normalized view over ComfyUI
//!   workflow JSON in either API or UI format
//! - Bridge-node modes and the mode-to-staging-key table (`mode`)
//! - WebSocket push message types delivered to the browser (`messages`)
//! - Identifier newtypes (`ids`)
//!
//! # Design Principles
//!
//! 1. **Minimal dependencies** - Only serde, serde_json, uuid, thiserror, tracing
//! 2. **No I/O** - Loading documents from disk or the engine lives in the
//!    engine crate; this crate only normalizes already-parsed JSON

pub mod graph;
pub mod ids;
pub mod messages;
pub mod mode;

pub use graph::{GraphDocument, GraphError, NodeId, NodeRecord};
pub use ids::{ClientId, ExecutionId};
pub use messages::{ClientMessage, RenderedImage, ServerMessage};
pub use mode::{BridgeMode, ModeBinding, ModeMap};

/// Node type tag marking an injection point for staged client data.
pub const BRIDGE_INPUT_TYPE: &str = "NodeBridge_Input";

/// Node type tag marking an extraction point for generated artifacts.
pub const BRIDGE_OUTPUT_TYPE: &str = "NodeBridge_Output";
