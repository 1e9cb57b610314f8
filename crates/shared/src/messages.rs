//! WebSocket message types for the browser push channel.
//!
//! The bridge sends `ServerMessage` frames to the browser; the browser sends
//! `ClientMessage` frames back. Results and errors for an in-flight
//! execution are only ever delivered here, never by a pending HTTP response.
//!
//! ## Versioning Policy
//!
//! - New variants can be added at the end (forward compatible)
//! - Removing or renaming variants is a breaking change

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::ExecutionId;

/// One generated image, packaged for delivery over the push channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderedImage {
    /// Canonical filename in the engine's output store.
    pub filename: String,
    /// Base64-encoded image bytes.
    pub data_base64: String,
}

/// Messages from the bridge to a connected browser client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Sent once on connect; the client echoes this id in trigger requests.
    Connected { client_id: Uuid },
    /// Best-effort engine status relay (queue depth). Never affects the
    /// lifecycle of a pending execution.
    StatusUpdate {
        #[serde(skip_serializing_if = "Option::is_none")]
        queue_remaining: Option<u64>,
    },
    /// Best-effort per-node progress relay.
    ProgressUpdate {
        #[serde(skip_serializing_if = "Option::is_none")]
        execution_id: Option<ExecutionId>,
        value: u64,
        max: u64,
    },
    /// Terminal: the designated output node completed and its artifacts
    /// were fetched.
    RenderResult {
        execution_id: ExecutionId,
        images: Vec<RenderedImage>,
    },
    /// Terminal: the engine reported an error, or the output node completed
    /// without producing artifacts.
    RenderError {
        execution_id: ExecutionId,
        message: String,
    },
}

/// Messages from a browser client to the bridge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Keepalive ping.
    Heartbeat,
}
