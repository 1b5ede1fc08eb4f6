// Client connection and orchestration logic.
//
// `run` is the per-client event loop: it connects to the relay, feeds
// pointer events into the gesture interaction, sends committed position
// updates out over the socket, and applies updates received from other
// clients to the local feature store. When the connection goes away a
// `Closed` event is emitted and the loop ends -- there is no reconnection.

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use anyhow::Context;

use crate::drag::{GestureDispatcher, GestureInteraction, PointerPhase};
use crate::protocol::PositionUpdate;
use crate::store::FeatureStore;

/// Events the client loop reports to its embedder.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    /// The relay connection is up.
    Connected,
    /// A remote update was applied to the local store.
    Applied(PositionUpdate),
    /// The relay connection closed; live updates stop until the embedder
    /// reconnects.
    Closed,
}

/// Apply a received update to the local store: translate the entity by the
/// difference to the received coordinate, so the local copy converges on the
/// sender's drop position whatever it was showing before. Returns `false`
/// (and logs) when the entity id is unknown.
pub fn apply_remote<S: FeatureStore>(store: &mut S, update: &PositionUpdate) -> bool {
    let Some(current) = store.coordinate(update.id) else {
        warn!(
            "Received update for unknown entity id {}, discarding",
            update.id
        );
        return false;
    };
    let (dx, dy) = update.coordinate.delta_from(current);
    store.translate(update.id, dx, dy);
    true
}

/// Run the client event loop until the connection or the embedder goes away.
///
/// Listens on three sources with `tokio::select!`:
/// 1. Frames from the relay -- decoded and applied to the store; a frame
///    that fails to decode is logged and discarded without disturbing
///    anything else.
/// 2. Committed updates from the gesture interaction (via `commit_rx`, the
///    receiving end of the channel the interaction was built with).
/// 3. Pointer events from the embedder.
pub async fn run<S: FeatureStore>(
    url: &str,
    store: &mut S,
    interaction: Box<dyn GestureInteraction<S> + Send>,
    mut commit_rx: mpsc::Receiver<PositionUpdate>,
    mut pointer_rx: mpsc::Receiver<PointerPhase>,
    event_tx: mpsc::Sender<ClientEvent>,
) -> anyhow::Result<()> {
    let (ws, _) = tokio_tungstenite::connect_async(url)
        .await
        .with_context(|| format!("failed to connect to {url}"))?;
    info!("Connected to relay at {}", url);
    let _ = event_tx.send(ClientEvent::Connected).await;

    let (mut write, mut read) = ws.split();
    let mut dispatcher = GestureDispatcher::new(interaction);

    // Track whether the commit channel is still open. When it closes we stop
    // polling it so tokio::select! never spins on a drained channel.
    let mut commits_open = true;

    loop {
        tokio::select! {
            frame = read.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => {
                        match PositionUpdate::from_frame(&text) {
                            Ok(update) => {
                                if apply_remote(store, &update) {
                                    debug!(
                                        "Applied remote update for entity {}",
                                        update.id
                                    );
                                    let _ = event_tx.send(ClientEvent::Applied(update)).await;
                                }
                            }
                            Err(e) => {
                                warn!("Discarding malformed frame: {}", e);
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        info!("Connection closed");
                        let _ = event_tx.send(ClientEvent::Closed).await;
                        break;
                    }
                    Some(Ok(_)) => {
                        // Binary, ping and pong frames carry no updates.
                    }
                    Some(Err(e)) => {
                        warn!("WebSocket error: {}", e);
                        let _ = event_tx.send(ClientEvent::Closed).await;
                        break;
                    }
                }
            }

            commit = commit_rx.recv(), if commits_open => {
                match commit {
                    Some(update) => match update.to_frame() {
                        Ok(text) => {
                            if let Err(e) = write.send(Message::Text(text.into())).await {
                                warn!("Failed to send position update: {}", e);
                            }
                        }
                        Err(e) => warn!("Failed to encode position update: {}", e),
                    },
                    None => commits_open = false,
                }
            }

            phase = pointer_rx.recv() => {
                match phase {
                    Some(phase) => dispatcher.handle(store, phase),
                    None => {
                        info!("Pointer channel closed, shutting down client loop");
                        break;
                    }
                }
            }
        }
    }

    let _ = write.close().await;
    Ok(())
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Coordinate;
    use crate::store::MemoryStore;

    #[test]
    fn remote_update_converges_regardless_of_prior_state() {
        let mut store = MemoryStore::new();
        store.insert(0, Coordinate(1.0, 1.0), true, false);

        let update = PositionUpdate {
            id: 0,
            coordinate: Coordinate(3.0, 3.0),
        };
        assert!(apply_remote(&mut store, &update));
        assert_eq!(store.coordinate(0), Some(Coordinate(3.0, 3.0)));

        // Applying the same update again is a no-op.
        assert!(apply_remote(&mut store, &update));
        assert_eq!(store.coordinate(0), Some(Coordinate(3.0, 3.0)));
    }

    #[test]
    fn unknown_entity_is_discarded() {
        let mut store = MemoryStore::new();
        store.insert(0, Coordinate(0.0, 0.0), true, false);

        let update = PositionUpdate {
            id: 42,
            coordinate: Coordinate(9.0, 9.0),
        };
        assert!(!apply_remote(&mut store, &update));
        assert_eq!(store.coordinate(0), Some(Coordinate(0.0, 0.0)));
    }
}
