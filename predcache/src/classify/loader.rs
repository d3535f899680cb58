//! Tile loader: computes one prediction tile from raw data.

use std::sync::Arc;

use super::{ClassificationError, Classifier, RawDataSource, Sample};
use crate::grid::{TileGrid, TileIndex};

/// Computes a tile's content.
///
/// A pure function of the tile index and the classifier snapshot the loader
/// was built with. May be expensive; callers guarantee at most one
/// computation per key is in flight.
pub trait TileLoader: Send + Sync {
    /// Compute the prediction buffer for `index`.
    fn compute(&self, index: TileIndex) -> Result<Vec<Sample>, ClassificationError>;
}

/// [`TileLoader`] that reads a raw block and runs the classifier over it.
pub struct ClassifyingLoader {
    grid: Arc<TileGrid>,
    source: Arc<dyn RawDataSource>,
    classifier: Arc<dyn Classifier>,
}

impl ClassifyingLoader {
    /// Bind a grid, raw data and one classifier snapshot.
    pub fn new(
        grid: Arc<TileGrid>,
        source: Arc<dyn RawDataSource>,
        classifier: Arc<dyn Classifier>,
    ) -> Self {
        Self {
            grid,
            source,
            classifier,
        }
    }
}

impl TileLoader for ClassifyingLoader {
    fn compute(&self, index: TileIndex) -> Result<Vec<Sample>, ClassificationError> {
        let bounds = self.grid.tile_bounds(index)?;
        let expected = bounds.voxel_count() as usize;
        let block = self.source.read_block(&bounds)?;
        let prediction = self.classifier.classify(&block)?;

        if prediction.len() != expected {
            return Err(ClassificationError::ShapeMismatch {
                index,
                expected,
                actual: prediction.len(),
            });
        }
        Ok(prediction)
    }
}
