//! Typed view over the ComfyUI event-stream frames.
//!
//! The engine pushes JSON frames of the shape `{"type": ..., "data": ...}`
//! over its WebSocket. Frames for different executions interleave freely on
//! one connection; demultiplexing happens purely on the embedded
//! `prompt_id`. Unknown frame types are preserved as [`EngineEvent::Other`]
//! so the correlator can ignore them without failing the stream.

use serde_json::Value;

use nodebridge_shared::{ExecutionId, NodeId};

/// Reference to one produced artifact in the engine's output store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactRef {
    pub filename: String,
    pub subfolder: String,
    pub folder_type: String,
}

/// One event frame from the engine's push channel.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    /// Queue status snapshot. Carries no execution id.
    Status { queue_remaining: Option<u64> },
    /// A node started executing. `node` is `None` when the engine signals
    /// overall completion of an execution this way.
    Executing {
        execution_id: Option<ExecutionId>,
        node: Option<NodeId>,
    },
    /// A node finished and reported its outputs.
    Executed {
        execution_id: ExecutionId,
        node: NodeId,
        artifacts: Vec<ArtifactRef>,
    },
    /// Per-node progress tick.
    Progress {
        execution_id: Option<ExecutionId>,
        value: u64,
        max: u64,
    },
    /// The engine failed the execution.
    ExecutionError {
        execution_id: ExecutionId,
        message: String,
    },
    /// Frame type this bridge does not interpret.
    Other { kind: String },
}

/// Parse one text frame. Returns `None` for frames that are not JSON or
/// lack the `{type, data}` envelope (the engine also sends binary preview
/// frames, which never reach this function).
pub fn parse_event(text: &str) -> Option<EngineEvent> {
    let frame: Value = serde_json::from_str(text).ok()?;
    let kind = frame.get("type")?.as_str()?.to_string();
    let data = frame.get("data").cloned().unwrap_or(Value::Null);

    let execution_id = |data: &Value| {
        data.get("prompt_id")
            .and_then(|v| v.as_str())
            .map(ExecutionId::new)
    };

    let event = match kind.as_str() {
        "status" => EngineEvent::Status {
            queue_remaining: data
                .pointer("/status/exec_info/queue_remaining")
                .and_then(|v| v.as_u64()),
        },
        "executing" => EngineEvent::Executing {
            execution_id: execution_id(&data),
            node: data
                .get("node")
                .and_then(|v| v.as_str())
                .map(str::to_string),
        },
        "executed" => {
            let id = execution_id(&data)?;
            let node = data.get("node")?.as_str()?.to_string();
            let artifacts = data
                .pointer("/output/images")
                .and_then(|v| v.as_array())
                .map(|images| {
                    images
                        .iter()
                        .filter_map(|img| {
                            Some(ArtifactRef {
                                filename: img.get("filename")?.as_str()?.to_string(),
                                subfolder: img
                                    .get("subfolder")
                                    .and_then(|v| v.as_str())
                                    .unwrap_or_default()
                                    .to_string(),
                                folder_type: img
                                    .get("type")
                                    .and_then(|v| v.as_str())
                                    .unwrap_or("output")
                                    .to_string(),
                            })
                        })
                        .collect()
                })
                .unwrap_or_default();
            EngineEvent::Executed {
                execution_id: id,
                node,
                artifacts,
            }
        }
        "progress" => EngineEvent::Progress {
            execution_id: execution_id(&data),
            value: data.get("value").and_then(|v| v.as_u64()).unwrap_or(0),
            max: data.get("max").and_then(|v| v.as_u64()).unwrap_or(0),
        },
        "execution_error" => {
            let id = execution_id(&data)?;
            let message = data
                .get("exception_message")
                .and_then(|v| v.as_str())
                .unwrap_or("execution failed")
                .to_string();
            EngineEvent::ExecutionError {
                execution_id: id,
                message,
            }
        }
        _ => EngineEvent::Other { kind },
    };
    Some(event)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_status_frame() {
        let text = r#"{"type":"status","data":{"status":{"exec_info":{"queue_remaining":2}}}}"#;
        assert_eq!(
            parse_event(text),
            Some(EngineEvent::Status {
                queue_remaining: Some(2)
            })
        );
    }

    #[test]
    fn parses_executed_frame_with_artifacts() {
        let text = r#"{
            "type": "executed",
            "data": {
                "node": "9",
                "prompt_id": "p-1",
                "output": {"images": [{"filename": "out_0001.png", "subfolder": "", "type": "output"}]}
            }
        }"#;
        let event = parse_event(text).expect("event");
        match event {
            EngineEvent::Executed {
                execution_id,
                node,
                artifacts,
            } => {
                assert_eq!(execution_id.as_str(), "p-1");
                assert_eq!(node, "9");
                assert_eq!(artifacts.len(), 1);
                assert_eq!(artifacts[0].filename, "out_0001.png");
                assert_eq!(artifacts[0].folder_type, "output");
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn executed_frame_without_images_has_no_artifacts() {
        let text = r#"{"type":"executed","data":{"node":"9","prompt_id":"p-1","output":{}}}"#;
        let event = parse_event(text).expect("event");
        assert!(matches!(
            event,
            EngineEvent::Executed { artifacts, .. } if artifacts.is_empty()
        ));
    }

    #[test]
    fn parses_execution_error_frame() {
        let text = r#"{"type":"execution_error","data":{"prompt_id":"p-2","exception_message":"out of VRAM"}}"#;
        assert_eq!(
            parse_event(text),
            Some(EngineEvent::ExecutionError {
                execution_id: ExecutionId::new("p-2"),
                message: "out of VRAM".to_string()
            })
        );
    }

    #[test]
    fn unknown_frame_types_are_preserved_not_dropped() {
        let text = r#"{"type":"crystools.monitor","data":{}}"#;
        assert_eq!(
            parse_event(text),
            Some(EngineEvent::Other {
                kind: "crystools.monitor".to_string()
            })
        );
    }

    #[test]
    fn junk_is_none() {
        assert!(parse_event("not json").is_none());
        assert!(parse_event(r#"{"no_type":true}"#).is_none());
    }
}
