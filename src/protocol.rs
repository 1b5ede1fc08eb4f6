// Wire protocol for position updates.
//
// A position update travels as a UTF-8 text frame containing JSON:
//
//   {"id": 3, "coordinate": [13.19, 32.88]}
//
// The relay never decodes frames -- it forwards them byte-for-byte. Only the
// originating client (on commit) and the receiving clients (on apply) use
// this module, so a malformed frame is a per-client concern and decoding
// returns a typed error instead of panicking.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Stable identifier of a shared entity. Serialized as a JSON integer.
pub type EntityId = u64;

/// A point in projected map units, serialized as a `[lon, lat]` array.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate(pub f64, pub f64);

impl Coordinate {
    /// Component-wise difference `self - other`, as a translation delta.
    pub fn delta_from(self, other: Coordinate) -> (f64, f64) {
        (self.0 - other.0, self.1 - other.1)
    }
}

/// The committed position of one entity. Built by the dragging client on
/// drop, applied by every other client on receipt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionUpdate {
    pub id: EntityId,
    pub coordinate: Coordinate,
}

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("malformed position update: {0}")]
    Malformed(#[from] serde_json::Error),
}

impl PositionUpdate {
    /// Serialize to the wire text frame.
    pub fn to_frame(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Parse a received text frame.
    pub fn from_frame(frame: &str) -> Result<Self, DecodeError> {
        Ok(serde_json::from_str(frame)?)
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
