//! Disk tier abstraction.

use std::path::PathBuf;

use crate::cache::types::CacheError;
use crate::classify::Sample;
use crate::grid::TileIndex;

/// Durable-for-the-session storage of computed tiles.
///
/// Implementations must make `store` atomic per key: a concurrent `load`
/// observes either the previous state or the complete new record.
pub trait TileStore: Send + Sync {
    /// Persist the content of one tile, replacing any previous record.
    fn store(&self, index: TileIndex, samples: &[Sample]) -> Result<(), CacheError>;

    /// Read back a stored tile.
    ///
    /// Returns [`CacheError::NotFound`] when the tile was never stored.
    fn load(&self, index: TileIndex) -> Result<Vec<Sample>, CacheError>;

    /// Check whether a record exists for the tile.
    fn contains(&self, index: TileIndex) -> bool;

    /// Delete all storage. Calling it again is a no-op.
    fn dispose(&self) -> Result<(), CacheError>;

    /// Directory holding the records, if one has been allocated.
    fn location(&self) -> Option<PathBuf> {
        None
    }
}
