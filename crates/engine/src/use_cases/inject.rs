//! The injector: merge staged client data into a workflow document.
//!
//! Per-node failures (undeterminable mode, unmapped mode, a failed upload)
//! degrade that node's contribution and never abort the whole injection;
//! only the caller's inability to load or submit the document is fatal to a
//! trigger request.

use std::time::{SystemTime, UNIX_EPOCH};

use serde_json::json;

use nodebridge_shared::{
    GraphDocument, ModeMap, NodeId, BRIDGE_INPUT_TYPE, BRIDGE_OUTPUT_TYPE,
};

use crate::infrastructure::ports::ImageUploadPort;
use crate::stores::{StagedValue, StagingStore};

/// What an injection pass did to the document.
#[derive(Debug, Clone)]
pub struct InjectionOutcome {
    /// All bridge-output nodes discovered, in id order. Possibly empty;
    /// absence of an output node is a warning, not an error.
    pub output_node_ids: Vec<NodeId>,
    /// How many bridge-input nodes were actually modified.
    pub touched_nodes: usize,
}

/// Inject staged values into every bridge-input node of `doc`.
///
/// Each node's mode (read per the positional contract in
/// [`NodeRecord::mode_tag`][nodebridge_shared::NodeRecord::mode_tag])
/// selects a staging key through `mode_map`. A staged image is uploaded to
/// the engine first and its canonical filename injected; a missing staged
/// entry or failed upload injects the mode's typed empty value instead.
/// Every touched node also gets its `trigger` input refreshed so the engine
/// re-evaluates it even when the value is unchanged.
pub async fn inject(
    doc: &mut GraphDocument,
    staging: &StagingStore,
    mode_map: &ModeMap,
    uploader: &dyn ImageUploadPort,
) -> InjectionOutcome {
    let output_node_ids = doc.find_by_type(BRIDGE_OUTPUT_TYPE);
    if output_node_ids.is_empty() {
        tracing::warn!("No bridge-output node in workflow, result relay will be skipped");
    }

    let input_node_ids = doc.find_by_type(BRIDGE_INPUT_TYPE);
    let mut touched_nodes = 0;

    for node_id in &input_node_ids {
        let Some(node) = doc.get(node_id) else {
            continue;
        };
        let Some(tag) = node.mode_tag() else {
            tracing::warn!(node_id = %node_id, "Could not determine mode, skipping node");
            continue;
        };
        let Some((mode, binding)) = mode_map.resolve(&tag) else {
            tracing::warn!(node_id = %node_id, mode = %tag, "No staging key mapped for mode, skipping node");
            continue;
        };

        let value = match staging.get(&binding.staging_key) {
            None => {
                tracing::warn!(
                    node_id = %node_id,
                    staging_key = %binding.staging_key,
                    "No staged data, injecting empty value"
                );
                mode.empty_value()
            }
            Some(StagedValue::Image(image_ref)) => {
                match uploader
                    .upload_image(&image_ref.storage_path, &image_ref.original_filename)
                    .await
                {
                    Ok(canonical_name) => {
                        tracing::info!(
                            node_id = %node_id,
                            filename = %canonical_name,
                            "Uploaded staged image"
                        );
                        json!(canonical_name)
                    }
                    Err(e) => {
                        tracing::warn!(
                            node_id = %node_id,
                            error = %e,
                            "Image upload failed, injecting empty value"
                        );
                        mode.empty_value()
                    }
                }
            }
            Some(scalar) => scalar.to_json(),
        };

        doc.set_input(node_id, &binding.input_name, value);
        doc.set_input(node_id, "trigger", json!(unix_now()));
        touched_nodes += 1;
    }

    tracing::info!(
        touched = touched_nodes,
        inputs = input_node_ids.len(),
        outputs = output_node_ids.len(),
        "Injection pass finished"
    );

    InjectionOutcome {
        output_node_ids,
        touched_nodes,
    }
}

/// Nonce for the trigger input. Seconds-precision wall clock, like the
/// engine-side node expects.
fn unix_now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}
