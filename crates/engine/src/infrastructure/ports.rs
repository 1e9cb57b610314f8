//! Outbound ports for the ComfyUI boundary.
//!
//! The injector and the correlator only need two narrow capabilities from
//! the engine; expressing them as traits keeps both testable without a live
//! ComfyUI instance.

use std::path::Path;

use async_trait::async_trait;

use super::comfyui::ComfyUIError;

/// Transfer a locally staged image into the engine's input store.
#[async_trait]
pub trait ImageUploadPort: Send + Sync {
    /// Upload the file at `path`, returning the canonical filename the
    /// engine stored it under.
    async fn upload_image(
        &self,
        path: &Path,
        original_filename: &str,
    ) -> Result<String, ComfyUIError>;
}

/// Fetch a produced artifact from the engine's output store.
#[async_trait]
pub trait ArtifactFetchPort: Send + Sync {
    async fn fetch_image(
        &self,
        filename: &str,
        subfolder: &str,
        folder_type: &str,
    ) -> Result<Vec<u8>, ComfyUIError>;
}
