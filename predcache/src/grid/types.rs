//! Grid type definitions

use std::fmt;
use thiserror::Error;

/// Linear index of one tile in a [`TileGrid`](super::TileGrid).
///
/// Indices follow the grid's linearization with axis 0 varying fastest,
/// so they are totally ordered and stable for the lifetime of a grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TileIndex(pub u64);

impl TileIndex {
    /// Returns the raw linear value.
    #[inline]
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TileIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

impl From<u64> for TileIndex {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

/// Axis-aligned box in voxel coordinates.
///
/// `origin` is inclusive, `extent` is the size along each axis. Boxes
/// returned by the grid are already clipped to the volume.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TileBox {
    pub origin: Vec<u64>,
    pub extent: Vec<u64>,
}

impl TileBox {
    /// Create a box from origin and extent.
    pub fn new(origin: Vec<u64>, extent: Vec<u64>) -> Self {
        debug_assert_eq!(origin.len(), extent.len());
        Self { origin, extent }
    }

    /// Number of axes.
    pub fn num_dimensions(&self) -> usize {
        self.origin.len()
    }

    /// Exclusive upper corner.
    pub fn max_exclusive(&self) -> Vec<u64> {
        self.origin
            .iter()
            .zip(&self.extent)
            .map(|(o, e)| o.saturating_add(*e))
            .collect()
    }

    /// Total number of voxels in the box, saturating at `u64::MAX`.
    pub fn voxel_count(&self) -> u64 {
        self.extent
            .iter()
            .fold(1u64, |count, &extent| count.saturating_mul(extent))
    }

    /// Geometric centre of the box (may fall between voxels).
    pub fn center(&self) -> Vec<f64> {
        self.origin
            .iter()
            .zip(&self.extent)
            .map(|(o, e)| *o as f64 + *e as f64 / 2.0)
            .collect()
    }

    /// Whether `coordinate` lies inside the box.
    pub fn contains(&self, coordinate: &[u64]) -> bool {
        coordinate.len() == self.origin.len()
            && coordinate
                .iter()
                .zip(self.origin.iter().zip(&self.extent))
                .all(|(c, (o, e))| *c >= *o && *c < o.saturating_add(*e))
    }

    /// Whether the two boxes share at least one voxel.
    pub fn intersects(&self, other: &TileBox) -> bool {
        self.num_dimensions() == other.num_dimensions()
            && (0..self.num_dimensions()).all(|d| {
                self.origin[d] < other.origin[d].saturating_add(other.extent[d])
                    && other.origin[d] < self.origin[d].saturating_add(self.extent[d])
            })
    }
}

/// Errors raised by grid queries.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GridError {
    /// Coordinate lies outside the volume.
    #[error("Coordinate {coordinate:?} outside volume {dimensions:?}")]
    OutOfBounds {
        coordinate: Vec<u64>,
        dimensions: Vec<u64>,
    },

    /// Tile index beyond the grid's tile count.
    #[error("Tile index {index} out of range (grid has {count} tiles)")]
    IndexOutOfRange { index: TileIndex, count: u64 },

    /// Dimensions and tile shape are unusable.
    #[error("Invalid grid shape: {0}")]
    InvalidShape(String),
}
