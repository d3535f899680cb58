//! Core types for the tile cache system.

use std::fmt;
use std::io;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use thiserror::Error;

use crate::classify::{ClassificationError, Sample};
use crate::generation::GenerationId;
use crate::grid::{GridError, TileGrid, TileIndex};
use crate::scheduler::SchedulerConfig;

/// Default number of tiles held in memory.
pub const DEFAULT_MEMORY_CAPACITY: usize = 1000;

/// Default name prefix for per-generation store directories.
pub const DEFAULT_STORE_PREFIX: &str = "prediction-cache-";

/// Label reported for voxels outside the volume.
pub const DEFAULT_BACKGROUND_LABEL: Sample = 0;

/// One computed prediction tile.
///
/// The buffer is immutable once produced and shared between the memory
/// tier and every reader that received it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tile {
    index: TileIndex,
    generation: GenerationId,
    buffer: Arc<[Sample]>,
}

impl Tile {
    pub fn new(index: TileIndex, generation: GenerationId, samples: Vec<Sample>) -> Self {
        Self {
            index,
            generation,
            buffer: samples.into(),
        }
    }

    pub fn index(&self) -> TileIndex {
        self.index
    }

    pub fn generation(&self) -> GenerationId {
        self.generation
    }

    pub fn samples(&self) -> &[Sample] {
        &self.buffer
    }

    /// Shared handle to the buffer.
    pub fn buffer(&self) -> Arc<[Sample]> {
        Arc::clone(&self.buffer)
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Size of the tile content in bytes.
    pub fn size_bytes(&self) -> usize {
        self.buffer.len() * std::mem::size_of::<Sample>()
    }
}

/// State of a tile as seen by a non-blocking reader.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Validity {
    /// Content is present and final.
    Valid,
    /// Content is being fetched; ask again later.
    Pending,
    /// Content cannot be produced in this generation.
    Invalid,
}

impl fmt::Display for Validity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Validity::Valid => write!(f, "valid"),
            Validity::Pending => write!(f, "pending"),
            Validity::Invalid => write!(f, "invalid"),
        }
    }
}

/// Result of a non-blocking memory tier lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub index: TileIndex,
    pub tile: Option<Tile>,
    pub validity: Validity,
}

impl CacheEntry {
    pub fn valid(tile: Tile) -> Self {
        Self {
            index: tile.index(),
            tile: Some(tile),
            validity: Validity::Valid,
        }
    }

    pub fn pending(index: TileIndex) -> Self {
        Self {
            index,
            tile: None,
            validity: Validity::Pending,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.validity == Validity::Valid
    }
}

/// When computed tiles reach the disk tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WritePolicy {
    /// Persist right after computation, before the tile becomes visible.
    #[default]
    WriteThrough,
    /// Persist only when the tile is evicted from memory.
    WriteBack,
}

impl fmt::Display for WritePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WritePolicy::WriteThrough => write!(f, "write-through"),
            WritePolicy::WriteBack => write!(f, "write-back"),
        }
    }
}

impl FromStr for WritePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "write-through" | "writethrough" | "through" => Ok(WritePolicy::WriteThrough),
            "write-back" | "writeback" | "back" => Ok(WritePolicy::WriteBack),
            other => Err(format!(
                "unknown write policy '{}', expected write-through or write-back",
                other
            )),
        }
    }
}

/// Configuration for the memory tier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryCacheConfig {
    /// Maximum number of resident tiles.
    pub capacity: usize,
}

impl Default for MemoryCacheConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_MEMORY_CAPACITY,
        }
    }
}

impl MemoryCacheConfig {
    /// Derive a tile capacity from a byte budget.
    ///
    /// Sized for full (unclipped) tiles, so the budget is never exceeded.
    pub fn for_budget(bytes: usize, grid: &TileGrid) -> Self {
        let tile_bytes = grid.max_tile_samples() * std::mem::size_of::<Sample>();
        Self {
            capacity: (bytes / tile_bytes.max(1)).max(1),
        }
    }
}

/// Configuration for the disk tier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiskCacheConfig {
    /// Parent directory under which per-generation directories are created.
    pub directory: PathBuf,
    /// Name prefix of per-generation directories.
    pub prefix: String,
}

impl Default for DiskCacheConfig {
    fn default() -> Self {
        let directory = dirs::cache_dir()
            .map(|dir| dir.join("predcache"))
            .unwrap_or_else(|| std::env::temp_dir().join("predcache"));
        Self {
            directory,
            prefix: DEFAULT_STORE_PREFIX.to_string(),
        }
    }
}

/// Configuration for one cache generation.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheConfig {
    pub memory: MemoryCacheConfig,
    pub disk: DiskCacheConfig,
    pub scheduler: SchedulerConfig,
    pub write_policy: WritePolicy,
    pub background_label: Sample,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            memory: MemoryCacheConfig::default(),
            disk: DiskCacheConfig::default(),
            scheduler: SchedulerConfig::default(),
            write_policy: WritePolicy::default(),
            background_label: DEFAULT_BACKGROUND_LABEL,
        }
    }
}

impl CacheConfig {
    pub fn with_memory_capacity(mut self, capacity: usize) -> Self {
        self.memory.capacity = capacity;
        self
    }

    pub fn with_disk_directory(mut self, directory: impl Into<PathBuf>) -> Self {
        self.disk.directory = directory.into();
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.scheduler.workers = workers;
        self
    }

    pub fn with_write_policy(mut self, policy: WritePolicy) -> Self {
        self.write_policy = policy;
        self
    }

    pub fn with_background_label(mut self, label: Sample) -> Self {
        self.background_label = label;
        self
    }
}

/// Cache operation errors.
///
/// `Clone` so one failed load can be handed to every coalesced caller.
#[derive(Debug, Clone, Error)]
pub enum CacheError {
    #[error("Tile {0} is not in the disk store")]
    NotFound(TileIndex),

    #[error("Disk I/O failed for tile {index}: {source}")]
    Io {
        index: TileIndex,
        #[source]
        source: Arc<io::Error>,
    },

    #[error("Disk store I/O failed: {0}")]
    Storage(#[source] Arc<io::Error>),

    #[error("Classification of tile {index} failed: {source}")]
    Classification {
        index: TileIndex,
        #[source]
        source: ClassificationError,
    },

    #[error("Stored record for tile {index} has {actual} bytes, expected {expected}")]
    CorruptRecord {
        index: TileIndex,
        expected: u64,
        actual: u64,
    },

    #[error("Disk store of generation {0} has been disposed")]
    Disposed(GenerationId),

    #[error("Load of tile {0} was abandoned before completing")]
    Aborted(TileIndex),

    #[error("Invalid tile: {0}")]
    Grid(#[from] GridError),
}

impl CacheError {
    pub(crate) fn io(index: TileIndex, err: io::Error) -> Self {
        CacheError::Io {
            index,
            source: Arc::new(err),
        }
    }

    pub(crate) fn storage(err: io::Error) -> Self {
        CacheError::Storage(Arc::new(err))
    }

    /// True for failures of the disk tier itself.
    pub fn is_io(&self) -> bool {
        matches!(self, CacheError::Io { .. } | CacheError::Storage(_))
    }
}
