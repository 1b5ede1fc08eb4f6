// Drag gesture state machine.
//
// Two states, Idle and Dragging, held as `Option<DragSession>`. A pointer
// down over a draggable feature starts a session; moves translate the bound
// entity optimistically; the up decides between commit (over a droppable
// feature: emit one `PositionUpdate` with the drop coordinate, keep the
// local translation) and rollback (translate the entity back to where the
// gesture started, send nothing).
//
// `GestureInteraction` is the hook interface the pointer layer drives;
// `DragInteraction` is the drag-and-drop implementation of it, selected at
// composition time. `GestureDispatcher` enforces the sequence rule: drag
// and up events are only delivered while a down has started a sequence.

use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::protocol::{Coordinate, EntityId, PositionUpdate};
use crate::store::{FeatureStore, Pixel};

/// One pointer sample: where it is on screen and in map units.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PointerEvent {
    pub pixel: Pixel,
    pub coordinate: Coordinate,
}

impl PointerEvent {
    /// An event under an identity projection (pixel equals coordinate), as
    /// `MemoryStore` assumes.
    pub fn at(x: f64, y: f64) -> Self {
        PointerEvent {
            pixel: Pixel(x, y),
            coordinate: Coordinate(x, y),
        }
    }
}

/// A pointer event tagged with its phase, as delivered by the embedder.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PointerPhase {
    Down(PointerEvent),
    Move(PointerEvent),
    Up(PointerEvent),
}

/// Hook interface for pointer gestures.
pub trait GestureInteraction<S: FeatureStore> {
    /// Returns `true` to start a drag sequence.
    fn pointer_down(&mut self, store: &S, event: &PointerEvent) -> bool;

    /// A move while a sequence is active.
    fn pointer_drag(&mut self, store: &mut S, event: &PointerEvent);

    /// End of the sequence. Returns `true` to keep it active.
    fn pointer_up(&mut self, store: &mut S, event: &PointerEvent) -> bool;
}

impl<S: FeatureStore, G: GestureInteraction<S> + ?Sized> GestureInteraction<S> for Box<G> {
    fn pointer_down(&mut self, store: &S, event: &PointerEvent) -> bool {
        (**self).pointer_down(store, event)
    }

    fn pointer_drag(&mut self, store: &mut S, event: &PointerEvent) {
        (**self).pointer_drag(store, event)
    }

    fn pointer_up(&mut self, store: &mut S, event: &PointerEvent) -> bool {
        (**self).pointer_up(store, event)
    }
}

/// The state carried while a drag is in flight.
struct DragSession {
    entity: EntityId,
    /// Pointer coordinate when the gesture started; the rollback target.
    origin: Coordinate,
    /// Most recent pointer coordinate, for incremental deltas.
    last: Coordinate,
}

/// Drag-and-drop gesture over a feature store. Committed updates go out
/// through the channel handed to `new`; the embedder forwards them to the
/// relay connection.
pub struct DragInteraction {
    session: Option<DragSession>,
    commit_tx: mpsc::Sender<PositionUpdate>,
}

impl DragInteraction {
    pub fn new(commit_tx: mpsc::Sender<PositionUpdate>) -> Self {
        DragInteraction {
            session: None,
            commit_tx,
        }
    }

    pub fn is_dragging(&self) -> bool {
        self.session.is_some()
    }
}

impl<S: FeatureStore> GestureInteraction<S> for DragInteraction {
    fn pointer_down(&mut self, store: &S, event: &PointerEvent) -> bool {
        // The pointer layer should never deliver a second down mid-session;
        // if it does, keep the current session.
        if self.session.is_some() {
            return true;
        }

        let Some(feature) = store
            .hit_test(event.pixel)
            .into_iter()
            .find(|f| f.draggable)
        else {
            return false;
        };

        debug!("Drag started on entity {}", feature.id);
        self.session = Some(DragSession {
            entity: feature.id,
            origin: event.coordinate,
            last: event.coordinate,
        });
        true
    }

    fn pointer_drag(&mut self, store: &mut S, event: &PointerEvent) {
        let Some(session) = &mut self.session else {
            return;
        };
        let (dx, dy) = event.coordinate.delta_from(session.last);
        store.translate(session.entity, dx, dy);
        session.last = event.coordinate;
    }

    fn pointer_up(&mut self, store: &mut S, event: &PointerEvent) -> bool {
        let Some(session) = self.session.take() else {
            return false;
        };

        let over_droppable = store
            .hit_test(event.pixel)
            .into_iter()
            .any(|f| f.droppable);

        if over_droppable {
            // The local translation already reflects the new position; just
            // announce it.
            let update = PositionUpdate {
                id: session.entity,
                coordinate: event.coordinate,
            };
            debug!(
                "Drag committed: entity {} at [{}, {}]",
                update.id, update.coordinate.0, update.coordinate.1
            );
            if let Err(e) = self.commit_tx.try_send(update) {
                warn!("Dropping position commit: {}", e);
            }
        } else {
            // Undo every move applied during the session.
            let (dx, dy) = session.origin.delta_from(event.coordinate);
            store.translate(session.entity, dx, dy);
            debug!("Drag rolled back: entity {}", session.entity);
        }
        false
    }
}

/// Routes raw pointer phases to an interaction, honoring sequence starts.
pub struct GestureDispatcher<G> {
    interaction: G,
    dragging: bool,
}

impl<G> GestureDispatcher<G> {
    pub fn new(interaction: G) -> Self {
        GestureDispatcher {
            interaction,
            dragging: false,
        }
    }

    pub fn is_dragging(&self) -> bool {
        self.dragging
    }

    pub fn handle<S: FeatureStore>(&mut self, store: &mut S, phase: PointerPhase)
    where
        G: GestureInteraction<S>,
    {
        match phase {
            PointerPhase::Down(event) => {
                self.dragging = self.interaction.pointer_down(store, &event);
            }
            PointerPhase::Move(event) => {
                if self.dragging {
                    self.interaction.pointer_drag(store, &event);
                }
            }
            PointerPhase::Up(event) => {
                if self.dragging {
                    self.dragging = self.interaction.pointer_up(store, &event);
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
