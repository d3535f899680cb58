//! Controller error types.

use std::io;

use thiserror::Error;

use crate::cache::CacheError;
use crate::grid::GridError;

/// Errors reported by [`PredictionCacheController`](super::PredictionCacheController).
#[derive(Debug, Error)]
pub enum ControllerError {
    /// The controller has been disposed.
    #[error("Prediction cache has been disposed")]
    Disposed,

    /// No classifier has been trained yet.
    #[error("No classifier has been trained yet")]
    NotTrained,

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error(transparent)]
    Grid(#[from] GridError),

    /// Fetch worker threads could not be started.
    #[error("Failed to start fetch workers: {0}")]
    WorkerSpawn(#[source] io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::TileIndex;

    #[test]
    fn test_from_cache_error_is_transparent() {
        let err: ControllerError = CacheError::NotFound(TileIndex(1)).into();
        assert_eq!(err.to_string(), "Tile #1 is not in the disk store");
    }

    #[test]
    fn test_display() {
        assert_eq!(
            ControllerError::NotTrained.to_string(),
            "No classifier has been trained yet"
        );
        let err = ControllerError::WorkerSpawn(io::Error::new(io::ErrorKind::Other, "limit"));
        assert_eq!(err.to_string(), "Failed to start fetch workers: limit");
    }
}
