//! The trigger orchestration: load a workflow, inject staged data, submit
//! it, and register the resulting execution for correlation.

use std::path::{Path, PathBuf};

use serde_json::Value;

use nodebridge_shared::{ClientId, ExecutionId, GraphError, NodeId};

use crate::infrastructure::comfyui::ComfyUIError;
use crate::state::AppState;

use super::inject;

/// Where the workflow document comes from.
#[derive(Debug, Clone)]
pub enum WorkflowSource {
    /// A named file from the configured workflow directory.
    File(String),
    /// Whatever graph is currently loaded in the engine's editor.
    Live,
}

#[derive(Debug, thiserror::Error)]
pub enum TriggerError {
    #[error("no workflow directory is configured")]
    WorkflowDirUnset,
    /// Workflow names are plain filenames; anything that could escape the
    /// directory is rejected outright.
    #[error("invalid workflow name: '{0}'")]
    InvalidWorkflowName(String),
    #[error("workflow '{0}' not found")]
    WorkflowNotFound(String),
    #[error("client {0} is not connected")]
    ClientNotConnected(ClientId),
    #[error("workflow file is not a valid document: {0}")]
    Malformed(#[from] GraphError),
    #[error("failed to read workflow file: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Engine(#[from] ComfyUIError),
}

/// An accepted trigger: the execution is registered and events for it will
/// be relayed to the requesting client.
#[derive(Debug, Clone)]
pub struct TriggerOutcome {
    pub execution_id: ExecutionId,
    pub output_node_ids: Vec<NodeId>,
    /// Per-node validation warnings the engine reported alongside
    /// acceptance, passed through unmodified.
    pub node_errors: Value,
}

/// Run the full trigger flow for one client request.
///
/// The requesting client must already hold a push connection; accepting a
/// trigger for a client with no way to receive its result would orphan the
/// execution immediately.
pub async fn trigger_workflow(
    state: &AppState,
    source: WorkflowSource,
    client_id: ClientId,
) -> Result<TriggerOutcome, TriggerError> {
    if !state.connections.is_connected(client_id).await {
        return Err(TriggerError::ClientNotConnected(client_id));
    }

    let raw = match &source {
        WorkflowSource::File(name) => {
            let dir = state
                .config
                .workflow_dir
                .as_deref()
                .ok_or(TriggerError::WorkflowDirUnset)?;
            load_workflow_file(dir, name).await?
        }
        WorkflowSource::Live => state.comfyui.fetch_current_graph().await?,
    };

    let mut doc = nodebridge_shared::GraphDocument::from_json(&raw)?;
    let injection = inject(&mut doc, &state.staging, &state.mode_map, &*state.comfyui).await;

    // The event stream must be consuming before the engine accepts the
    // submission; execution starts at queue time and a fast run's frames
    // would otherwise land before anyone is reading.
    state.correlator.ensure_listening().await?;

    let accepted = state
        .comfyui
        .submit(doc.to_submission_json(), state.engine_client_id)
        .await?;

    state.correlator.register(
        accepted.execution_id.clone(),
        client_id,
        injection.output_node_ids.iter().cloned().collect(),
    );

    tracing::info!(
        execution_id = %accepted.execution_id,
        client_id = %client_id,
        source = ?source,
        "Workflow triggered"
    );

    Ok(TriggerOutcome {
        execution_id: accepted.execution_id,
        output_node_ids: injection.output_node_ids,
        node_errors: accepted.node_errors,
    })
}

pub(crate) async fn load_workflow_file(dir: &Path, name: &str) -> Result<Value, TriggerError> {
    let path = resolve_workflow_path(dir, name)?;
    if !path.is_file() {
        return Err(TriggerError::WorkflowNotFound(name.to_string()));
    }
    let text = tokio::fs::read_to_string(&path).await?;
    let raw = serde_json::from_str(&text)
        .map_err(|e| GraphError::MalformedDocument(format!("{}: {e}", path.display())))?;
    Ok(raw)
}

/// Map a client-supplied workflow name to a path inside `dir`. Accepts the
/// name with or without its `.json` extension.
fn resolve_workflow_path(dir: &Path, name: &str) -> Result<PathBuf, TriggerError> {
    if name.trim().is_empty() || name.contains("..") || name.contains('/') || name.contains('\\') {
        return Err(TriggerError::InvalidWorkflowName(name.to_string()));
    }
    let filename = if name.to_ascii_lowercase().ends_with(".json") {
        name.to_string()
    } else {
        format!("{name}.json")
    };
    Ok(dir.join(filename))
}
