//! Connection management for browser WebSocket clients.
//!
//! Tracks connected clients and the outbound channel each one is served by.

use std::collections::{HashMap, HashSet};

use tokio::sync::{mpsc, RwLock};

use nodebridge_shared::{ClientId, ServerMessage};

/// Manages all active browser connections.
#[derive(Default)]
pub struct ConnectionManager {
    connections: RwLock<HashMap<ClientId, mpsc::Sender<ServerMessage>>>,
}

impl ConnectionManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new connection.
    pub async fn register(&self, client_id: ClientId, sender: mpsc::Sender<ServerMessage>) {
        let mut connections = self.connections.write().await;
        connections.insert(client_id, sender);
        tracing::debug!(client_id = %client_id, "Connection registered");
    }

    /// Unregister a connection.
    pub async fn unregister(&self, client_id: ClientId) {
        let mut connections = self.connections.write().await;
        if connections.remove(&client_id).is_some() {
            tracing::debug!(client_id = %client_id, "Connection unregistered");
        }
    }

    /// Whether a client is currently connected.
    pub async fn is_connected(&self, client_id: ClientId) -> bool {
        let connections = self.connections.read().await;
        connections.contains_key(&client_id)
    }

    /// Send a message to one client. Returns false if the client is gone or
    /// its channel is full; the caller treats that as "no one to notify".
    /// Suitable for progress and status frames only, which tolerate loss.
    pub async fn send_to(&self, client_id: ClientId, message: ServerMessage) -> bool {
        let connections = self.connections.read().await;
        match connections.get(&client_id) {
            Some(sender) => match sender.try_send(message) {
                Ok(()) => true,
                Err(e) => {
                    tracing::warn!(client_id = %client_id, error = %e, "Failed to send to client");
                    false
                }
            },
            None => false,
        }
    }

    /// Deliver a message to one client, waiting for channel capacity. A full
    /// channel means the client is slow, not gone; messages that must not be
    /// lost (terminal results and errors) go through here. Returns false
    /// only when the client has disconnected.
    pub async fn deliver_to(&self, client_id: ClientId, message: ServerMessage) -> bool {
        let sender = {
            let connections = self.connections.read().await;
            connections.get(&client_id).cloned()
        };
        match sender {
            Some(sender) => match sender.send(message).await {
                Ok(()) => true,
                // The channel closes when the client's socket task ends.
                Err(_) => false,
            },
            None => false,
        }
    }

    /// Best-effort broadcast to a set of clients.
    pub async fn broadcast_to(&self, clients: &HashSet<ClientId>, message: ServerMessage) {
        let connections = self.connections.read().await;
        for client_id in clients {
            if let Some(sender) = connections.get(client_id) {
                if let Err(e) = sender.try_send(message.clone()) {
                    tracing::warn!(client_id = %client_id, error = %e, "Failed to broadcast");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn send_to_unknown_client_reports_no_one_to_notify() {
        let manager = ConnectionManager::new();
        let delivered = manager
            .send_to(ClientId::new(), ServerMessage::Connected {
                client_id: *ClientId::new().as_uuid(),
            })
            .await;
        assert!(!delivered);
    }

    #[tokio::test]
    async fn deliver_to_waits_for_capacity_instead_of_dropping() {
        let manager = ConnectionManager::new();
        let client_id = ClientId::new();
        let (tx, mut rx) = mpsc::channel(1);
        manager.register(client_id, tx).await;

        // Fill the only slot; a try_send now would drop.
        assert!(
            manager
                .send_to(
                    client_id,
                    ServerMessage::StatusUpdate {
                        queue_remaining: Some(1),
                    },
                )
                .await
        );

        let manager = std::sync::Arc::new(manager);
        let delivery = tokio::spawn({
            let manager = manager.clone();
            async move {
                manager
                    .deliver_to(
                        client_id,
                        ServerMessage::StatusUpdate {
                            queue_remaining: Some(0),
                        },
                    )
                    .await
            }
        });

        // Drain like a slow client; the delivery completes once a slot frees.
        assert!(rx.recv().await.is_some());
        assert!(delivery.await.expect("task"));
        assert_eq!(
            rx.recv().await,
            Some(ServerMessage::StatusUpdate {
                queue_remaining: Some(0),
            })
        );
    }

    #[tokio::test]
    async fn deliver_to_a_disconnected_client_reports_failure() {
        let manager = ConnectionManager::new();
        let client_id = ClientId::new();
        let (tx, rx) = mpsc::channel(1);
        manager.register(client_id, tx).await;
        drop(rx);

        let delivered = manager
            .deliver_to(
                client_id,
                ServerMessage::StatusUpdate {
                    queue_remaining: None,
                },
            )
            .await;
        assert!(!delivered);
    }

    #[tokio::test]
    async fn register_send_unregister_roundtrip() {
        let manager = ConnectionManager::new();
        let client_id = ClientId::new();
        let (tx, mut rx) = mpsc::channel(4);
        manager.register(client_id, tx).await;
        assert!(manager.is_connected(client_id).await);

        let msg = ServerMessage::StatusUpdate {
            queue_remaining: Some(1),
        };
        assert!(manager.send_to(client_id, msg.clone()).await);
        assert_eq!(rx.recv().await, Some(msg));

        manager.unregister(client_id).await;
        assert!(!manager.is_connected(client_id).await);
    }
}
