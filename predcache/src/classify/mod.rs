//! Classification abstraction layer.
//!
//! The classifier and the raw image are external collaborators. This module
//! defines the interfaces the cache consumes and the [`TileLoader`] that
//! turns a tile index into a prediction buffer.
//!
//! ```text
//! TileIndex ──► TileGrid::tile_bounds ──► RawDataSource::read_block
//!                                                 │
//!                                                 ▼
//!                        Vec<Sample> ◄── Classifier::classify
//! ```

mod error;
mod loader;
mod source;

pub use error::ClassificationError;
pub use loader::{ClassifyingLoader, TileLoader};
pub use source::{Classifier, RawBlock, RawDataSource};

/// One prediction value (class label) per voxel.
pub type Sample = i16;
