//! Application configuration

use std::env;
use std::path::PathBuf;

use anyhow::{Context, Result};

/// Application configuration loaded from environment
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Bind host for the bridge server
    pub server_host: String,
    /// Bind port for the bridge server
    pub server_port: u16,

    /// ComfyUI server URL
    pub comfyui_base_url: String,

    /// Directory scanned for workflow JSON files. `None` when unset or not a
    /// directory; workflow listing and triggering then fail per request
    /// instead of at startup.
    pub workflow_dir: Option<PathBuf>,

    /// Scratch directory for staged image uploads
    pub staging_dir: PathBuf,

    /// CORS allowed origins (comma-separated, or "*" for any)
    pub cors_allowed_origins: Vec<String>,

    /// ComfyUI request timeouts
    pub comfyui: ComfyUIConfig,
}

/// Timeouts for the ComfyUI HTTP boundary. Engine unreachability must never
/// hang a handler indefinitely.
#[derive(Debug, Clone)]
pub struct ComfyUIConfig {
    /// Workflow submission timeout (seconds)
    pub submit_timeout_seconds: u64,
    /// Image upload timeout (seconds)
    pub upload_timeout_seconds: u64,
    /// Artifact fetch timeout (seconds)
    pub image_timeout_seconds: u64,
    /// Health probe timeout (seconds)
    pub health_timeout_seconds: u64,
}

impl Default for ComfyUIConfig {
    fn default() -> Self {
        Self {
            submit_timeout_seconds: 60,
            upload_timeout_seconds: 60,
            image_timeout_seconds: 30,
            health_timeout_seconds: 5,
        }
    }
}

impl AppConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let workflow_dir = match env::var("COMFYUI_WORKFLOW_DIR") {
            Ok(raw) if !raw.trim().is_empty() => {
                let path = PathBuf::from(raw.trim());
                if path.is_dir() {
                    Some(path)
                } else {
                    tracing::error!(
                        path = %path.display(),
                        "COMFYUI_WORKFLOW_DIR is not a directory, workflow listing disabled"
                    );
                    None
                }
            }
            _ => {
                tracing::error!("COMFYUI_WORKFLOW_DIR is not set, workflow listing disabled");
                None
            }
        };

        Ok(Self {
            server_host: env::var("SERVER_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            server_port: env::var("SERVER_PORT")
                .or_else(|_| env::var("PORT"))
                .unwrap_or_else(|_| "5000".to_string())
                .parse()
                .context("SERVER_PORT must be a valid port number")?,

            comfyui_base_url: env::var("COMFYUI_URL")
                .or_else(|_| env::var("COMFYUI_BASE_URL"))
                .unwrap_or_else(|_| "http://127.0.0.1:8188".to_string()),

            workflow_dir,

            staging_dir: env::var("STAGING_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| env::temp_dir().join("nodebridge-staging")),

            cors_allowed_origins: env::var("CORS_ALLOWED_ORIGINS")
                .unwrap_or_default()
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),

            comfyui: ComfyUIConfig {
                submit_timeout_seconds: env_u64("COMFYUI_SUBMIT_TIMEOUT_SECONDS", 60),
                upload_timeout_seconds: env_u64("COMFYUI_UPLOAD_TIMEOUT_SECONDS", 60),
                image_timeout_seconds: env_u64("COMFYUI_IMAGE_TIMEOUT_SECONDS", 30),
                health_timeout_seconds: env_u64("COMFYUI_HEALTH_TIMEOUT_SECONDS", 5),
            },
        })
    }
}

fn env_u64(name: &str, default: u64) -> u64 {
    env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
