//! NodeBridge Engine - All server-side code.
//!
//! The engine exposes a small HTTP surface for the browser front end
//! (staging, workflow listing, triggering) and a WebSocket push channel, and
//! talks to a ComfyUI instance over its HTTP API and event-stream WebSocket.

pub mod api;
pub mod config;
pub mod correlation;
pub mod infrastructure;
pub mod state;
pub mod stores;
pub mod use_cases;
