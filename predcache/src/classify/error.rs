//! Error types for tile classification.

use crate::grid::TileIndex;
use thiserror::Error;

/// Errors that can occur while computing a prediction tile.
///
/// `Clone` so a single failed computation can be reported to every caller
/// that was coalesced onto it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClassificationError {
    /// Raw data for the tile could not be read.
    #[error("Raw data unavailable: {0}")]
    RawData(String),

    /// The classifier rejected or failed on the block.
    #[error("Classifier failed: {0}")]
    Classifier(String),

    /// The classifier produced a buffer of the wrong size.
    #[error("Prediction for tile {index} has {actual} samples, expected {expected}")]
    ShapeMismatch {
        index: TileIndex,
        expected: usize,
        actual: usize,
    },

    /// The tile is not part of the grid.
    #[error("Invalid tile: {0}")]
    InvalidTile(String),
}

impl From<crate::grid::GridError> for ClassificationError {
    fn from(err: crate::grid::GridError) -> Self {
        ClassificationError::InvalidTile(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::GridError;

    #[test]
    fn test_shape_mismatch_display() {
        let err = ClassificationError::ShapeMismatch {
            index: TileIndex(3),
            expected: 100,
            actual: 99,
        };
        assert_eq!(
            err.to_string(),
            "Prediction for tile #3 has 99 samples, expected 100"
        );
    }

    #[test]
    fn test_from_grid_error() {
        let err: ClassificationError = GridError::IndexOutOfRange {
            index: TileIndex(12),
            count: 9,
        }
        .into();
        assert!(matches!(err, ClassificationError::InvalidTile(_)));
        assert!(err.to_string().contains("#12"));
    }

    #[test]
    fn test_error_trait() {
        fn assert_error<E: std::error::Error + Clone + Send + Sync>() {}
        assert_error::<ClassificationError>();
    }
}
