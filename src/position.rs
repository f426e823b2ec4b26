//! Positions, component identities and the position resolver seam.
//!
//! Positions may come from untrusted callers. Nothing here panics on NaN,
//! infinities or huge magnitudes: distances are computed in `f64` from the
//! true coordinates, which are clamped to [`WORLD_LIMIT`] only to pick a
//! spatial hash cell.

use std::collections::HashMap;
use std::fmt;

use parking_lot::RwLock;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Largest coordinate magnitude the spatial store distinguishes.
pub const WORLD_LIMIT: f32 = 1.0e9;

/// Identity of a component (release source or binding target).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ComponentId(pub u64);

impl fmt::Display for ComponentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

impl From<u64> for ComponentId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

/// A point in 3-D space.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Position {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Position {
    pub const ORIGIN: Position = Position::new(0.0, 0.0, 0.0);

    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    /// True when every component is finite.
    #[inline]
    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }

    /// Euclidean distance, computed in `f64`.
    ///
    /// Finite for any two finite positions, including `f32::MAX` magnitudes.
    /// Non-finite inputs yield a non-finite distance.
    pub fn distance(&self, other: &Position) -> f64 {
        let dx = self.x as f64 - other.x as f64;
        let dy = self.y as f64 - other.y as f64;
        let dz = self.z as f64 - other.z as f64;
        (dx * dx + dy * dy + dz * dz).sqrt()
    }

    /// Clamp every component to `±WORLD_LIMIT`. Non-finite inputs are not repaired.
    pub fn clamped(&self) -> Position {
        Position {
            x: self.x.clamp(-WORLD_LIMIT, WORLD_LIMIT),
            y: self.y.clamp(-WORLD_LIMIT, WORLD_LIMIT),
            z: self.z.clamp(-WORLD_LIMIT, WORLD_LIMIT),
        }
    }

    /// Move toward `other` by fraction `t` in `[0, 1]`.
    pub fn lerp(&self, other: &Position, t: f32) -> Position {
        let t = t.clamp(0.0, 1.0);
        Position {
            x: self.x + (other.x - self.x) * t,
            y: self.y + (other.y - self.y) * t,
            z: self.z + (other.z - self.z) * t,
        }
    }
}

impl From<(f32, f32, f32)> for Position {
    fn from((x, y, z): (f32, f32, f32)) -> Self {
        Self::new(x, y, z)
    }
}

impl From<[f32; 3]> for Position {
    fn from([x, y, z]: [f32; 3]) -> Self {
        Self::new(x, y, z)
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({:.3}, {:.3}, {:.3})", self.x, self.y, self.z)
    }
}

/// Resolves a component identity to its current position.
///
/// Implemented by the spatial registry that owns component placement.
pub trait PositionResolver: Send + Sync {
    /// Current position of `id`, or `None` when the component is unknown.
    fn position_of(&self, id: ComponentId) -> Option<Position>;
}

/// Function-based resolver for simple cases
pub struct FnResolver<F: Fn(ComponentId) -> Option<Position> + Send + Sync>(pub F);

impl<F: Fn(ComponentId) -> Option<Position> + Send + Sync> PositionResolver for FnResolver<F> {
    fn position_of(&self, id: ComponentId) -> Option<Position> {
        (self.0)(id)
    }
}

/// In-memory position table.
///
/// Useful when the embedding simulation keeps positions itself and just
/// needs to hand them to the modulator.
#[derive(Debug, Default)]
pub struct PositionTable {
    positions: RwLock<HashMap<ComponentId, Position>>,
}

impl PositionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or move a component. Returns the previous position.
    pub fn place(&self, id: ComponentId, position: Position) -> Option<Position> {
        self.positions.write().insert(id, position)
    }

    /// Forget a component. Returns its last position.
    pub fn remove(&self, id: ComponentId) -> Option<Position> {
        self.positions.write().remove(&id)
    }

    pub fn len(&self) -> usize {
        self.positions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.read().is_empty()
    }
}

impl PositionResolver for PositionTable {
    fn position_of(&self, id: ComponentId) -> Option<Position> {
        self.positions.read().get(&id).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_distance_survives_extreme_magnitudes() {
        let a = Position::new(f32::MAX, f32::MAX, f32::MAX);
        let b = Position::new(-f32::MAX, -f32::MAX, -f32::MAX);
        let d = a.distance(&b);
        assert!(d.is_finite());
        assert!(d > f32::MAX as f64);
    }

    #[test]
    fn test_non_finite_positions() {
        let nan = Position::new(f32::NAN, 0.0, 0.0);
        let inf = Position::new(0.0, f32::INFINITY, 0.0);
        assert!(!nan.is_finite());
        assert!(!inf.is_finite());
        assert!(!nan.distance(&Position::ORIGIN).is_finite());
        assert!(Position::ORIGIN.is_finite());
    }

    #[test]
    fn test_clamped_bounds_coordinates() {
        let p = Position::new(f32::MAX, -f32::MAX, 3.0).clamped();
        assert_eq!(p, Position::new(WORLD_LIMIT, -WORLD_LIMIT, 3.0));
    }

    #[test]
    fn test_lerp() {
        let a = Position::ORIGIN;
        let b = Position::new(2.0, 4.0, 6.0);
        assert_eq!(a.lerp(&b, 0.5), Position::new(1.0, 2.0, 3.0));
        assert_eq!(a.lerp(&b, 2.0), b);
    }

    #[test]
    fn test_position_table() {
        let table = PositionTable::new();
        assert!(table.is_empty());
        assert_eq!(table.place(ComponentId(1), Position::ORIGIN), None);
        assert_eq!(table.position_of(ComponentId(1)), Some(Position::ORIGIN));
        assert_eq!(table.position_of(ComponentId(2)), None);
        assert_eq!(table.remove(ComponentId(1)), Some(Position::ORIGIN));
        assert!(table.is_empty());
    }

    #[test]
    fn test_fn_resolver() {
        let resolver = FnResolver(|id: ComponentId| {
            (id.0 < 10).then(|| Position::new(id.0 as f32, 0.0, 0.0))
        });
        assert_eq!(
            resolver.position_of(ComponentId(3)),
            Some(Position::new(3.0, 0.0, 0.0))
        );
        assert_eq!(resolver.position_of(ComponentId(11)), None);
    }
}
