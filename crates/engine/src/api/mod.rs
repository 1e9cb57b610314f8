//! HTTP and WebSocket surface exposed to the browser front end.

pub mod connections;
pub mod http;
pub mod websocket;

pub use connections::ConnectionManager;
