//! Browser-facing HTTP routes: staging, workflow listing, triggering, and
//! health.

use std::collections::BTreeMap;

use axum::extract::{Multipart, Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use nodebridge_shared::{
    ClientId, ExecutionId, GraphDocument, NodeId, BRIDGE_INPUT_TYPE, BRIDGE_OUTPUT_TYPE,
};

use crate::infrastructure::comfyui::ComfyUIError;
use crate::state::AppState;
use crate::stores::{StagedType, StagingError};
use crate::use_cases::trigger::{
    load_workflow_file, trigger_workflow, TriggerError, WorkflowSource,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/stage", post(stage_data))
        .route("/api/stage/clear", post(clear_staged))
        .route("/api/workflows", get(list_workflows))
        .route("/api/workflows/{name}/nodes", get(workflow_nodes))
        .route("/api/trigger", post(trigger))
        .route("/api/health", get(health))
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    success: bool,
    message: String,
    #[serde(skip_serializing_if = "Value::is_null")]
    node_errors: Value,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn error(status: StatusCode, message: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            success: false,
            message: message.into(),
            node_errors: Value::Null,
        }),
    )
}

#[derive(Debug, Serialize)]
struct StageResponse {
    success: bool,
    key: String,
    value: Value,
}

/// `POST /api/stage` - stage one value under a key. Multipart form with
/// fields `key`, `type`, and either `value` (scalars) or `image_file`
/// (Image).
async fn stage_data(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<StageResponse>, ApiError> {
    let mut key: Option<String> = None;
    let mut declared_type: Option<String> = None;
    let mut value: Option<String> = None;
    let mut file: Option<(String, Vec<u8>)> = None;

    let unreadable =
        |e| error(StatusCode::BAD_REQUEST, format!("unreadable multipart body: {e}"));
    while let Some(field) = multipart.next_field().await.map_err(unreadable)? {
        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some("key") => key = Some(field.text().await.map_err(unreadable)?),
            Some("type") => declared_type = Some(field.text().await.map_err(unreadable)?),
            Some("value") => value = Some(field.text().await.map_err(unreadable)?),
            Some("image_file") => {
                let filename = field.file_name().unwrap_or("upload.png").to_string();
                let bytes = field.bytes().await.map_err(unreadable)?;
                file = Some((filename, bytes.to_vec()));
            }
            _ => {}
        }
    }

    let key = key
        .filter(|k| !k.trim().is_empty())
        .ok_or_else(|| error(StatusCode::BAD_REQUEST, "missing form field 'key'"))?;
    let declared_type = declared_type
        .ok_or_else(|| error(StatusCode::BAD_REQUEST, "missing form field 'type'"))?;
    let staged_type: StagedType = declared_type
        .parse()
        .map_err(|e: String| error(StatusCode::BAD_REQUEST, e))?;

    let stored = match staged_type {
        StagedType::Image => {
            let (filename, bytes) = file.ok_or_else(|| {
                error(
                    StatusCode::BAD_REQUEST,
                    "Image staging requires an 'image_file' upload",
                )
            })?;
            let image_ref = state
                .staging
                .stage_image(&key, &filename, &bytes)
                .map_err(staging_error)?;
            Value::String(image_ref.original_filename)
        }
        scalar => {
            let raw = value
                .ok_or_else(|| error(StatusCode::BAD_REQUEST, "missing form field 'value'"))?;
            state
                .staging
                .stage_value(&key, scalar, &raw)
                .map_err(staging_error)?
                .to_json()
        }
    };

    Ok(Json(StageResponse {
        success: true,
        key,
        value: stored,
    }))
}

fn staging_error(e: StagingError) -> ApiError {
    match e {
        StagingError::InvalidValue { .. } => error(StatusCode::BAD_REQUEST, e.to_string()),
        StagingError::Io(_) => error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

#[derive(Debug, Deserialize)]
struct ClearRequest {
    key: String,
}

#[derive(Debug, Serialize)]
struct ClearResponse {
    success: bool,
    cleared: bool,
}

/// `POST /api/stage/clear` - drop one staged key. Clearing an absent key is
/// not an error.
async fn clear_staged(
    State(state): State<AppState>,
    Json(request): Json<ClearRequest>,
) -> Json<ClearResponse> {
    let cleared = state.staging.clear(&request.key);
    Json(ClearResponse {
        success: true,
        cleared,
    })
}

#[derive(Debug, Serialize)]
struct WorkflowListing {
    /// Filename to display-name (stem) map.
    workflows: BTreeMap<String, String>,
}

/// `GET /api/workflows` - the `.json` files in the configured workflow
/// directory.
async fn list_workflows(
    State(state): State<AppState>,
) -> Result<Json<WorkflowListing>, ApiError> {
    let Some(dir) = &state.config.workflow_dir else {
        return Err(error(
            StatusCode::INTERNAL_SERVER_ERROR,
            "no workflow directory is configured",
        ));
    };

    let server_error =
        |e| error(StatusCode::INTERNAL_SERVER_ERROR, format!("workflow directory unreadable: {e}"));
    let mut workflows = BTreeMap::new();
    let mut entries = tokio::fs::read_dir(dir).await.map_err(server_error)?;
    while let Some(entry) = entries.next_entry().await.map_err(server_error)? {
        let filename = entry.file_name();
        let Some(filename) = filename.to_str() else {
            continue;
        };
        let lowered = filename.to_ascii_lowercase();
        if let Some(stem_len) = lowered.strip_suffix(".json").map(str::len) {
            workflows.insert(filename.to_string(), filename[..stem_len].to_string());
        }
    }

    Ok(Json(WorkflowListing { workflows }))
}

#[derive(Debug, Serialize)]
struct BridgeNodeSummary {
    id: NodeId,
    #[serde(skip_serializing_if = "Option::is_none")]
    title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    mode: Option<String>,
}

#[derive(Debug, Serialize)]
struct WorkflowNodesResponse {
    workflow: String,
    inputs: Vec<BridgeNodeSummary>,
    outputs: Vec<BridgeNodeSummary>,
}

/// `GET /api/workflows/{name}/nodes` - the bridge attachment points of one
/// workflow, so a front end can see what it may stage before triggering.
async fn workflow_nodes(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<WorkflowNodesResponse>, ApiError> {
    let Some(dir) = &state.config.workflow_dir else {
        return Err(trigger_error(TriggerError::WorkflowDirUnset));
    };
    let raw = load_workflow_file(dir, &name).await.map_err(trigger_error)?;
    let doc = GraphDocument::from_json(&raw)
        .map_err(|e| error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;

    let summarize = |id: NodeId, with_mode: bool| {
        let node = doc.get(&id);
        BridgeNodeSummary {
            title: node.and_then(|n| n.title.clone()),
            mode: if with_mode {
                node.and_then(|n| n.mode_tag())
            } else {
                None
            },
            id,
        }
    };

    Ok(Json(WorkflowNodesResponse {
        workflow: name,
        inputs: doc
            .find_by_type(BRIDGE_INPUT_TYPE)
            .into_iter()
            .map(|id| summarize(id, true))
            .collect(),
        outputs: doc
            .find_by_type(BRIDGE_OUTPUT_TYPE)
            .into_iter()
            .map(|id| summarize(id, false))
            .collect(),
    }))
}

#[derive(Debug, Deserialize)]
struct TriggerRequest {
    /// The id handed to the client in its `connected` message.
    client_id: Uuid,
    /// Workflow filename to run; omitted means "whatever graph is loaded in
    /// the engine's editor right now".
    #[serde(default)]
    workflow: Option<String>,
}

#[derive(Debug, Serialize)]
struct TriggerResponse {
    success: bool,
    execution_id: ExecutionId,
    output_node_ids: Vec<NodeId>,
    #[serde(skip_serializing_if = "Value::is_null")]
    node_errors: Value,
}

/// `POST /api/trigger` - inject staged data into a workflow and submit it.
async fn trigger(
    State(state): State<AppState>,
    Json(request): Json<TriggerRequest>,
) -> Result<Json<TriggerResponse>, ApiError> {
    let source = match request.workflow {
        Some(name) => WorkflowSource::File(name),
        None => WorkflowSource::Live,
    };
    let outcome = trigger_workflow(&state, source, ClientId::from_uuid(request.client_id))
        .await
        .map_err(trigger_error)?;

    Ok(Json(TriggerResponse {
        success: true,
        execution_id: outcome.execution_id,
        output_node_ids: outcome.output_node_ids,
        node_errors: outcome.node_errors,
    }))
}

fn trigger_error(e: TriggerError) -> ApiError {
    let status = match &e {
        TriggerError::InvalidWorkflowName(_) | TriggerError::ClientNotConnected(_) => {
            StatusCode::BAD_REQUEST
        }
        TriggerError::WorkflowNotFound(_) => StatusCode::NOT_FOUND,
        TriggerError::WorkflowDirUnset | TriggerError::Malformed(_) | TriggerError::Io(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
        TriggerError::Engine(engine) => match engine {
            ComfyUIError::Rejected { node_errors, .. } => {
                return (
                    StatusCode::BAD_GATEWAY,
                    Json(ErrorResponse {
                        success: false,
                        message: e.to_string(),
                        node_errors: node_errors.clone(),
                    }),
                );
            }
            ComfyUIError::Unreachable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ComfyUIError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            ComfyUIError::InvalidResponse(_) => StatusCode::INTERNAL_SERVER_ERROR,
        },
    };
    error(status, e.to_string())
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    bridge: &'static str,
    engine_reachable: bool,
    pending_executions: usize,
}

/// `GET /api/health` - liveness of the bridge plus a probe of the engine.
async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        bridge: "ok",
        engine_reachable: state.comfyui.health_check().await,
        pending_executions: state.correlator.pending_count(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use serde_json::json;
    use std::path::PathBuf;
    use tower::ServiceExt;

    use crate::config::{AppConfig, ComfyUIConfig};

    fn test_state(workflow_dir: Option<PathBuf>) -> (tempfile::TempDir, AppState) {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = AppConfig {
            server_host: "127.0.0.1".to_string(),
            server_port: 0,
            // Port 1 is never listening; engine calls fail fast.
            comfyui_base_url: "http://127.0.0.1:1".to_string(),
            workflow_dir,
            staging_dir: dir.path().join("staging"),
            cors_allowed_origins: vec![],
            comfyui: ComfyUIConfig::default(),
        };
        let state = AppState::new(config).expect("state");
        (dir, state)
    }

    fn app(state: AppState) -> Router {
        router().with_state(state)
    }

    async fn body_json(response: axum::response::Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body");
        serde_json::from_slice(&bytes).expect("json body")
    }

    const BOUNDARY: &str = "test-boundary";

    fn multipart_request(uri: &str, fields: &[(&str, &str)]) -> Request<Body> {
        let mut body = String::new();
        for (name, value) in fields {
            body.push_str(&format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n"
            ));
        }
        body.push_str(&format!("--{BOUNDARY}--\r\n"));
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(
                "content-type",
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(Body::from(body))
            .expect("request")
    }

    fn json_request(uri: &str, payload: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(payload.to_string()))
            .expect("request")
    }

    #[tokio::test]
    async fn stage_stores_a_text_value() {
        let (_dir, state) = test_state(None);
        let response = app(state.clone())
            .oneshot(multipart_request(
                "/api/stage",
                &[
                    ("key", "current_prompt"),
                    ("type", "Text"),
                    ("value", "a red fox"),
                ],
            ))
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["success"], json!(true));
        assert_eq!(body["key"], json!("current_prompt"));
        assert_eq!(body["value"], json!("a red fox"));
        assert!(state.staging.get("current_prompt").is_some());
    }

    #[tokio::test]
    async fn stage_rejects_uncoercible_numeric_value() {
        let (_dir, state) = test_state(None);
        let response = app(state.clone())
            .oneshot(multipart_request(
                "/api/stage",
                &[("key", "current_count"), ("type", "Int"), ("value", "three")],
            ))
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(response).await;
        assert_eq!(body["success"], json!(false));
        assert!(state.staging.get("current_count").is_none());
    }

    #[tokio::test]
    async fn stage_rejects_unsupported_type_tag() {
        let (_dir, state) = test_state(None);
        let response = app(state)
            .oneshot(multipart_request(
                "/api/stage",
                &[("key", "k"), ("type", "Video"), ("value", "x")],
            ))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn clear_reports_whether_a_key_existed() {
        let (_dir, state) = test_state(None);
        state
            .staging
            .stage_value("current_prompt", StagedType::Text, "x")
            .expect("stage");

        let response = app(state.clone())
            .oneshot(json_request(
                "/api/stage/clear",
                json!({"key": "current_prompt"}),
            ))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["cleared"], json!(true));

        let response = app(state)
            .oneshot(json_request(
                "/api/stage/clear",
                json!({"key": "current_prompt"}),
            ))
            .await
            .expect("response");
        assert_eq!(body_json(response).await["cleared"], json!(false));
    }

    #[tokio::test]
    async fn workflows_are_listed_by_filename_with_display_stems() {
        let workflow_dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(workflow_dir.path().join("line_art.json"), "{}").expect("write");
        std::fs::write(workflow_dir.path().join("Sketch.JSON"), "{}").expect("write");
        std::fs::write(workflow_dir.path().join("notes.txt"), "").expect("write");

        let (_dir, state) = test_state(Some(workflow_dir.path().to_path_buf()));
        let response = app(state)
            .oneshot(
                Request::builder()
                    .uri("/api/workflows")
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(
            body["workflows"],
            json!({"line_art.json": "line_art", "Sketch.JSON": "Sketch"})
        );
    }

    #[tokio::test]
    async fn listing_without_a_workflow_directory_is_a_server_error() {
        let (_dir, state) = test_state(None);
        let response = app(state)
            .oneshot(
                Request::builder()
                    .uri("/api/workflows")
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn workflow_nodes_summarizes_bridge_attachment_points() {
        let workflow_dir = tempfile::tempdir().expect("tempdir");
        let doc = json!({
            "1": {
                "class_type": "NodeBridge_Input",
                "_meta": {"title": "Prompt In"},
                "inputs": {"value": ""},
                "widgets_values": ["Text"]
            },
            "5": {"class_type": "KSampler", "inputs": {}},
            "9": {"class_type": "NodeBridge_Output", "inputs": {}}
        });
        std::fs::write(
            workflow_dir.path().join("demo.json"),
            doc.to_string(),
        )
        .expect("write");

        let (_dir, state) = test_state(Some(workflow_dir.path().to_path_buf()));
        let response = app(state)
            .oneshot(
                Request::builder()
                    .uri("/api/workflows/demo/nodes")
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(
            body["inputs"],
            json!([{"id": "1", "title": "Prompt In", "mode": "Text"}])
        );
        assert_eq!(body["outputs"], json!([{"id": "9"}]));
    }

    #[tokio::test]
    async fn unknown_workflow_is_not_found() {
        let workflow_dir = tempfile::tempdir().expect("tempdir");
        let (_dir, state) = test_state(Some(workflow_dir.path().to_path_buf()));
        let response = app(state)
            .oneshot(
                Request::builder()
                    .uri("/api/workflows/absent/nodes")
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn trigger_for_an_unconnected_client_is_rejected() {
        let (_dir, state) = test_state(None);
        let response = app(state)
            .oneshot(json_request(
                "/api/trigger",
                json!({"client_id": Uuid::new_v4(), "workflow": "demo"}),
            ))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn trigger_with_a_path_escaping_name_is_rejected() {
        let workflow_dir = tempfile::tempdir().expect("tempdir");
        let (_dir, state) = test_state(Some(workflow_dir.path().to_path_buf()));

        // Connect a client so the request gets past the connection check.
        let client_id = ClientId::new();
        let (tx, _rx) = tokio::sync::mpsc::channel(4);
        state.connections.register(client_id, tx).await;

        let response = app(state)
            .oneshot(json_request(
                "/api/trigger",
                json!({"client_id": client_id.as_uuid(), "workflow": "../../etc/passwd"}),
            ))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn trigger_reports_the_engine_unreachable() {
        let workflow_dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(
            workflow_dir.path().join("demo.json"),
            json!({"1": {"class_type": "KSampler", "inputs": {}}}).to_string(),
        )
        .expect("write");
        let (_dir, state) = test_state(Some(workflow_dir.path().to_path_buf()));

        let client_id = ClientId::new();
        let (tx, _rx) = tokio::sync::mpsc::channel(4);
        state.connections.register(client_id, tx).await;

        let response = app(state)
            .oneshot(json_request(
                "/api/trigger",
                json!({"client_id": client_id.as_uuid(), "workflow": "demo"}),
            ))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
