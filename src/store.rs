// Spatial feature store contract.
//
// The renderer owns the map features; this crate only needs to hit-test
// screen pixels, read an entity's current coordinate, and apply translation
// deltas. `FeatureStore` is that boundary. `MemoryStore` is a renderer-less
// implementation for tests and headless embedders: it uses an identity
// projection (screen pixels equal map units) and hit-tests by radius.

use std::collections::HashMap;

use crate::protocol::{Coordinate, EntityId};

/// A position in screen pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pixel(pub f64, pub f64);

/// A map feature as seen by the gesture layer: its entity id plus the two
/// interaction flags.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Feature {
    pub id: EntityId,
    /// The feature may be picked up and moved.
    pub draggable: bool,
    /// The feature may receive a dropped entity.
    pub droppable: bool,
}

/// The external collaborator owning feature geometry.
pub trait FeatureStore {
    /// All features under the given pixel, nearest first. Callers filter by
    /// the flag they care about.
    fn hit_test(&self, pixel: Pixel) -> Vec<Feature>;

    /// Current coordinate of the entity, or `None` if the id is unknown.
    fn coordinate(&self, id: EntityId) -> Option<Coordinate>;

    /// Apply a translation delta to the entity's geometry. Returns `false`
    /// if the id is unknown.
    fn translate(&mut self, id: EntityId, dx: f64, dy: f64) -> bool;
}

// ---------------------------------------------------------------------------
// MemoryStore
// ---------------------------------------------------------------------------

struct Entry {
    coordinate: Coordinate,
    draggable: bool,
    droppable: bool,
}

/// In-memory feature store with an identity projection.
pub struct MemoryStore {
    features: HashMap<EntityId, Entry>,
    hit_radius: f64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_hit_radius(10.0)
    }

    /// A store whose hit-testing matches features within `radius` pixels.
    pub fn with_hit_radius(radius: f64) -> Self {
        MemoryStore {
            features: HashMap::new(),
            hit_radius: radius,
        }
    }

    pub fn insert(&mut self, id: EntityId, coordinate: Coordinate, draggable: bool, droppable: bool) {
        self.features.insert(
            id,
            Entry {
                coordinate,
                draggable,
                droppable,
            },
        );
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl FeatureStore for MemoryStore {
    fn hit_test(&self, pixel: Pixel) -> Vec<Feature> {
        let mut hits: Vec<(f64, Feature)> = self
            .features
            .iter()
            .filter_map(|(&id, entry)| {
                let dx = entry.coordinate.0 - pixel.0;
                let dy = entry.coordinate.1 - pixel.1;
                let dist = (dx * dx + dy * dy).sqrt();
                (dist <= self.hit_radius).then_some((
                    dist,
                    Feature {
                        id,
                        draggable: entry.draggable,
                        droppable: entry.droppable,
                    },
                ))
            })
            .collect();
        hits.sort_by(|(da, fa), (db, fb)| da.total_cmp(db).then(fa.id.cmp(&fb.id)));
        hits.into_iter().map(|(_, f)| f).collect()
    }

    fn coordinate(&self, id: EntityId) -> Option<Coordinate> {
        self.features.get(&id).map(|e| e.coordinate)
    }

    fn translate(&mut self, id: EntityId, dx: f64, dy: f64) -> bool {
        match self.features.get_mut(&id) {
            Some(entry) => {
                entry.coordinate.0 += dx;
                entry.coordinate.1 += dy;
                true
            }
            None => false,
        }
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
