//! Infrastructure: the ComfyUI boundary.

pub mod comfyui;
pub mod events;
pub mod ports;

pub use comfyui::{ComfyUIClient, ComfyUIError, SubmitAccepted};
pub use events::{ArtifactRef, EngineEvent};
pub use ports::{ArtifactFetchPort, ImageUploadPort};
