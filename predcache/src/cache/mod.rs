//! Two-tier tile cache for one classifier generation.
//!
//! Provides a bounded memory tier with LRU eviction in front of a
//! per-generation disk store, with single-flight loading and statistics.

mod disk;
mod flight;
mod memory;
mod stats;
mod r#trait;
mod types;

pub use disk::DiskTileStore;
pub use memory::MemoryTileCache;
pub use r#trait::TileStore;
pub use stats::{CacheStats, CacheStatsSnapshot};
pub use types::{
    CacheConfig, CacheEntry, CacheError, DiskCacheConfig, MemoryCacheConfig, Tile, Validity,
    WritePolicy, DEFAULT_BACKGROUND_LABEL, DEFAULT_MEMORY_CAPACITY, DEFAULT_STORE_PREFIX,
};
