//! The correlator: joins engine execution ids to browser clients and turns
//! the engine's event stream into push messages.
//!
//! All submissions are made under one bridge-owned engine client id, so one
//! event-stream connection carries every in-flight execution; frames are
//! demultiplexed purely by the `prompt_id` each one embeds. The stream is
//! connected (and confirmed open) before a submission is made, never after:
//! the engine starts executing at queue time, and a fast execution's frames
//! would be lost in a connect-after-accept window. Once up, the listener
//! stays on the stream until the engine closes it.

use std::collections::HashSet;
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use futures_util::StreamExt;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use url::Url;

use nodebridge_shared::{ClientId, ExecutionId, NodeId, RenderedImage, ServerMessage};

use crate::api::ConnectionManager;
use crate::infrastructure::comfyui::ComfyUIError;
use crate::infrastructure::events::{parse_event, ArtifactRef, EngineEvent};
use crate::infrastructure::ports::ArtifactFetchPort;
use crate::stores::PendingExecutions;

pub struct Correlator {
    pending: PendingExecutions,
    connections: Arc<ConnectionManager>,
    artifacts: Arc<dyn ArtifactFetchPort>,
    stream_url: Url,
    /// Whether a listener task currently owns the event stream. The lock is
    /// held across connect and across loss-time cleanup, so a reconnect can
    /// never interleave with the previous listener's teardown.
    listener_active: Mutex<bool>,
}

type EventStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

impl Correlator {
    pub fn new(
        connections: Arc<ConnectionManager>,
        artifacts: Arc<dyn ArtifactFetchPort>,
        stream_url: Url,
    ) -> Self {
        Self {
            pending: PendingExecutions::new(),
            connections,
            artifacts,
            stream_url,
            listener_active: Mutex::new(false),
        }
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Connect the event stream if no listener currently holds it, waiting
    /// until the connection is established. Callers invoke this BEFORE
    /// submitting a workflow; frames for an execution can start arriving the
    /// moment the engine accepts it.
    pub async fn ensure_listening(self: &Arc<Self>) -> Result<(), ComfyUIError> {
        let mut active = self.listener_active.lock().await;
        if *active {
            return Ok(());
        }
        tracing::info!(url = %self.stream_url, "Connecting to engine event stream");
        let (stream, _) = connect_async(self.stream_url.as_str())
            .await
            .map_err(|e| ComfyUIError::Unreachable(format!("event stream: {e}")))?;
        *active = true;
        drop(active);

        let this = Arc::clone(self);
        tokio::spawn(async move {
            this.run_listener(stream).await;
        });
        Ok(())
    }

    /// Register an accepted submission. Returns false if the execution id
    /// was already registered (the table guarantees at most one entry per
    /// id). The event stream is already up by the time this is called.
    pub fn register(
        &self,
        execution_id: ExecutionId,
        client_id: ClientId,
        output_node_ids: HashSet<NodeId>,
    ) -> bool {
        if !self
            .pending
            .register(execution_id.clone(), client_id, output_node_ids)
        {
            tracing::warn!(execution_id = %execution_id, "Duplicate execution id, ignoring");
            return false;
        }
        tracing::info!(
            execution_id = %execution_id,
            client_id = %client_id,
            "Registered pending execution"
        );
        true
    }

    /// The owning client disconnected: discard its pending state silently.
    /// No relay for those executions is ever attempted again; the engine
    /// keeps rendering into the void.
    pub fn client_disconnected(&self, client_id: ClientId) {
        let removed = self.pending.remove_for_client(client_id);
        if !removed.is_empty() {
            tracing::info!(
                client_id = %client_id,
                abandoned = removed.len(),
                "Client disconnected, abandoned pending executions"
            );
        }
    }

    /// Apply one event-stream frame to the pending table, relaying whatever
    /// it implies to the owning client.
    pub async fn handle_event(&self, event: EngineEvent) {
        match event {
            EngineEvent::Status { queue_remaining } => {
                // Status frames carry no execution id; relay to everyone
                // with work in flight.
                self.connections
                    .broadcast_to(
                        &self.pending.owners(),
                        ServerMessage::StatusUpdate { queue_remaining },
                    )
                    .await;
            }

            EngineEvent::Executing { execution_id, node } => {
                if let Some(id) = execution_id {
                    // `node: None` is the engine's end-of-execution marker;
                    // completion is decided by the output node, not here.
                    if node.is_some() {
                        self.pending.mark_running(&id);
                    }
                }
            }

            EngineEvent::Progress {
                execution_id,
                value,
                max,
            } => match execution_id {
                Some(id) => {
                    if let Some(entry) = self.pending.get(&id) {
                        self.connections
                            .send_to(
                                entry.client_id,
                                ServerMessage::ProgressUpdate {
                                    execution_id: Some(id),
                                    value,
                                    max,
                                },
                            )
                            .await;
                    }
                }
                None => {
                    self.connections
                        .broadcast_to(
                            &self.pending.owners(),
                            ServerMessage::ProgressUpdate {
                                execution_id: None,
                                value,
                                max,
                            },
                        )
                        .await;
                }
            },

            EngineEvent::Executed {
                execution_id,
                node,
                artifacts,
            } => {
                self.handle_node_completed(execution_id, node, artifacts)
                    .await;
            }

            EngineEvent::ExecutionError {
                execution_id,
                message,
            } => {
                if let Some(entry) = self.pending.remove(&execution_id) {
                    tracing::warn!(
                        execution_id = %execution_id,
                        error = %message,
                        "Engine reported execution error"
                    );
                    self.relay(
                        entry.client_id,
                        ServerMessage::RenderError {
                            execution_id,
                            message,
                        },
                    )
                    .await;
                }
            }

            EngineEvent::Other { kind } => {
                tracing::debug!(kind = %kind, "Ignoring unrecognized event frame");
            }
        }
    }

    async fn handle_node_completed(
        &self,
        execution_id: ExecutionId,
        node: NodeId,
        artifacts: Vec<ArtifactRef>,
    ) {
        let Some(entry) = self.pending.get(&execution_id) else {
            return;
        };
        if !entry.output_node_ids.contains(&node) {
            // An intermediate node finished; not our extraction point.
            return;
        }

        // First output completion is terminal: remove before relaying so a
        // later output node (or a duplicate frame) can never relay twice.
        let Some(entry) = self.pending.remove(&execution_id) else {
            return;
        };

        if artifacts.is_empty() {
            tracing::warn!(
                execution_id = %execution_id,
                node = %node,
                "Output node completed without artifacts"
            );
            self.relay(
                entry.client_id,
                ServerMessage::RenderError {
                    execution_id,
                    message: "output node completed without artifacts".to_string(),
                },
            )
            .await;
            return;
        }

        let mut images = Vec::with_capacity(artifacts.len());
        for artifact in &artifacts {
            match self
                .artifacts
                .fetch_image(&artifact.filename, &artifact.subfolder, &artifact.folder_type)
                .await
            {
                Ok(bytes) => images.push(RenderedImage {
                    filename: artifact.filename.clone(),
                    data_base64: BASE64.encode(bytes),
                }),
                Err(e) => {
                    tracing::warn!(
                        execution_id = %execution_id,
                        filename = %artifact.filename,
                        error = %e,
                        "Failed to fetch artifact"
                    );
                    self.relay(
                        entry.client_id,
                        ServerMessage::RenderError {
                            execution_id,
                            message: format!("failed to fetch result image: {e}"),
                        },
                    )
                    .await;
                    return;
                }
            }
        }

        tracing::info!(
            execution_id = %execution_id,
            node = %node,
            images = images.len(),
            "Relaying render result"
        );
        self.relay(
            entry.client_id,
            ServerMessage::RenderResult {
                execution_id,
                images,
            },
        )
        .await;
    }

    /// Deliver a terminal message, waiting for channel capacity: a slow
    /// client must still receive its result. Only a disconnected client (no
    /// one left to notify) drops the relay.
    async fn relay(&self, client_id: ClientId, message: ServerMessage) {
        if !self.connections.deliver_to(client_id, message).await {
            tracing::debug!(client_id = %client_id, "Dropping relay for disconnected client");
        }
    }

    async fn run_listener(self: Arc<Self>, stream: EventStream) {
        tracing::info!("Engine event stream connected");
        let (_write, mut read) = stream.split();
        while let Some(frame) = read.next().await {
            match frame {
                Ok(Message::Text(text)) => {
                    if let Some(event) = parse_event(&text) {
                        self.handle_event(event).await;
                    }
                }
                Ok(Message::Close(_)) => break,
                // Binary frames are live previews; this bridge relays only
                // final artifacts.
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(error = %e, "Engine event stream error");
                    break;
                }
            }
        }

        // Fail in-flight work before releasing the flag: a reconnect must
        // not register new entries while this teardown is still draining.
        let mut active = self.listener_active.lock().await;
        if self.pending.is_empty() {
            tracing::info!("Engine event stream closed");
        } else {
            tracing::warn!("Engine event stream lost with executions in flight");
            self.fail_all_pending("engine event stream disconnected").await;
        }
        *active = false;
    }

    async fn fail_all_pending(&self, reason: &str) {
        for entry in self.pending.drain() {
            self.relay(
                entry.client_id,
                ServerMessage::RenderError {
                    execution_id: entry.execution_id,
                    message: reason.to_string(),
                },
            )
            .await;
        }
    }
}
