//! Collaborator interfaces: raw data access and the trained classifier.

use super::{ClassificationError, Sample};
use crate::grid::TileBox;

/// Block of raw image data covering one tile.
///
/// `data` holds `channels` interleaved values per voxel, voxels laid out
/// with axis 0 varying fastest.
#[derive(Debug, Clone, PartialEq)]
pub struct RawBlock {
    pub bounds: TileBox,
    pub channels: usize,
    pub data: Vec<f32>,
}

impl RawBlock {
    /// Number of voxels in the block.
    pub fn voxel_count(&self) -> usize {
        self.bounds.voxel_count() as usize
    }

    /// Channel values of one voxel by linear offset.
    pub fn voxel(&self, offset: usize) -> &[f32] {
        let start = offset * self.channels;
        &self.data[start..start + self.channels]
    }
}

/// Read-only, random-access provider of raw image data.
pub trait RawDataSource: Send + Sync {
    /// Read the raw block covering `bounds`.
    fn read_block(&self, bounds: &TileBox) -> Result<RawBlock, ClassificationError>;
}

/// A trained classifier snapshot.
///
/// Must be safe to call concurrently on distinct blocks; one snapshot backs
/// exactly one cache generation and is never retrained in place.
pub trait Classifier: Send + Sync {
    /// Predict one label per voxel of `block`.
    fn classify(&self, block: &RawBlock) -> Result<Vec<Sample>, ClassificationError>;

    /// Short human-readable description used in logs.
    fn describe(&self) -> String {
        "classifier".to_string()
    }
}
