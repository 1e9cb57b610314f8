//! Shared application state threaded through every handler.

use std::sync::Arc;

use anyhow::{Context, Result};

use nodebridge_shared::{ClientId, ModeMap};

use crate::api::ConnectionManager;
use crate::config::AppConfig;
use crate::correlation::Correlator;
use crate::infrastructure::comfyui::ComfyUIClient;
use crate::infrastructure::ports::ArtifactFetchPort;
use crate::stores::StagingStore;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub comfyui: Arc<ComfyUIClient>,
    pub staging: Arc<StagingStore>,
    pub connections: Arc<ConnectionManager>,
    pub correlator: Arc<Correlator>,
    pub mode_map: Arc<ModeMap>,
    /// The one engine client id this bridge submits under. All executions
    /// share a single event stream keyed by it.
    pub engine_client_id: ClientId,
}

impl AppState {
    pub fn new(config: AppConfig) -> Result<Self> {
        let comfyui = Arc::new(ComfyUIClient::new(
            &config.comfyui_base_url,
            config.comfyui.clone(),
        ));
        let engine_client_id = ClientId::new();
        let stream_url = comfyui
            .event_stream_url(engine_client_id)
            .context("COMFYUI_URL is not a usable base url")?;

        let staging = Arc::new(
            StagingStore::new(config.staging_dir.clone())
                .context("failed to create staging directory")?,
        );
        let connections = Arc::new(ConnectionManager::new());
        let artifacts: Arc<dyn ArtifactFetchPort> = comfyui.clone();
        let correlator = Arc::new(Correlator::new(connections.clone(), artifacts, stream_url));

        Ok(Self {
            config: Arc::new(config),
            comfyui,
            staging,
            connections,
            correlator,
            mode_map: Arc::new(ModeMap::default()),
            engine_client_id,
        })
    }
}
