//! predcache - Tiled prediction cache for interactive pixel classification
//!
//! Serves a classifier's per-voxel predictions over a large tiled image to a
//! renderer that must never block, while the classifier is retrained in the
//! background. Tiles are computed on demand, bounded in memory, persisted to
//! a per-training-round disk store, and replaced wholesale when a new
//! classifier arrives.
//!
//! ```text
//! renderer ──sample──► VolatileTileView ──miss──► FetchScheduler (workers)
//!                            │                          │
//!                            ▼                          ▼
//!                     MemoryTileCache ◄──get_or_load────┘
//!                       (LRU, single-flight)
//!                            │ miss
//!                            ▼
//!                      DiskTileStore ──miss──► ClassifyingLoader
//! ```
//!
//! Each training round installs a new [`generation::CacheGeneration`]
//! through the [`controller::PredictionCacheController`]:
//!
//! ```ignore
//! use predcache::controller::PredictionCacheController;
//! use predcache::scheduler::Priority;
//!
//! let controller = PredictionCacheController::new(grid, raw_data, config);
//! controller.on_training_succeeded(classifier)?;
//!
//! // Render thread: never blocks
//! let sample = controller.sample(index, Priority::VISIBLE);
//! ```

pub mod cache;
pub mod classify;
pub mod config;
pub mod controller;
pub mod generation;
pub mod grid;
pub mod logging;
pub mod scheduler;
pub mod view;

/// Version of the predcache library and CLI.
///
/// Synchronized across the workspace; defined in `Cargo.toml`.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_is_set() {
        assert!(!VERSION.is_empty());
    }
}
