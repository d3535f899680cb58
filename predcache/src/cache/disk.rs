//! Per-generation disk store for computed tiles.
//!
//! Each generation owns one temporary directory, created lazily on the first
//! write and removed on dispose. Records are `<index>.tile` files holding the
//! tile's samples as little-endian 16-bit integers with no header; the
//! expected length follows from the grid, so truncated records are detected
//! on read.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::RwLock;
use tempfile::{NamedTempFile, TempDir};
use tracing::{debug, info};

use crate::cache::r#trait::TileStore;
use crate::cache::types::{CacheError, DiskCacheConfig};
use crate::classify::Sample;
use crate::generation::GenerationId;
use crate::grid::{TileGrid, TileIndex};

const SAMPLE_BYTES: u64 = std::mem::size_of::<Sample>() as u64;

enum DirectoryState {
    Unallocated,
    Allocated(TempDir),
    Disposed,
}

/// Disk tier backed by a temporary directory.
///
/// Writes go to a temporary file in the same directory and are renamed into
/// place, so readers never see a partial record.
pub struct DiskTileStore {
    generation: GenerationId,
    grid: Arc<TileGrid>,
    root: PathBuf,
    prefix: String,
    directory: RwLock<DirectoryState>,
    /// Stored records (index → record size in bytes)
    records: DashMap<TileIndex, u64>,
    total_bytes: AtomicU64,
}

impl DiskTileStore {
    /// Create a store for one generation. No directory is created yet.
    pub fn new(generation: GenerationId, grid: Arc<TileGrid>, config: &DiskCacheConfig) -> Self {
        Self {
            generation,
            grid,
            root: config.directory.clone(),
            prefix: config.prefix.clone(),
            directory: RwLock::new(DirectoryState::Unallocated),
            records: DashMap::new(),
            total_bytes: AtomicU64::new(0),
        }
    }

    pub fn generation(&self) -> GenerationId {
        self.generation
    }

    /// Number of stored records.
    pub fn entry_count(&self) -> usize {
        self.records.len()
    }

    /// Total bytes of stored records.
    pub fn size_bytes(&self) -> u64 {
        self.total_bytes.load(Ordering::Relaxed)
    }

    pub fn is_disposed(&self) -> bool {
        matches!(*self.directory.read(), DirectoryState::Disposed)
    }

    /// File name of the record for a tile.
    pub fn record_name(index: TileIndex) -> String {
        format!("{}.tile", index.get())
    }

    fn ensure_allocated(&self) -> Result<(), CacheError> {
        if matches!(*self.directory.read(), DirectoryState::Allocated(_)) {
            return Ok(());
        }

        let mut state = self.directory.write();
        match *state {
            DirectoryState::Allocated(_) => Ok(()),
            DirectoryState::Disposed => Err(CacheError::Disposed(self.generation)),
            DirectoryState::Unallocated => {
                fs::create_dir_all(&self.root).map_err(CacheError::storage)?;
                let dir = tempfile::Builder::new()
                    .prefix(&format!("{}{}-", self.prefix, self.generation.get()))
                    .tempdir_in(&self.root)
                    .map_err(CacheError::storage)?;
                info!(
                    generation = %self.generation,
                    path = %dir.path().display(),
                    "Allocated disk store"
                );
                *state = DirectoryState::Allocated(dir);
                Ok(())
            }
        }
    }

    fn expected_bytes(&self, index: TileIndex) -> Result<u64, CacheError> {
        Ok(self.grid.tile_sample_count(index)? as u64 * SAMPLE_BYTES)
    }

    fn write_record(dir: &Path, index: TileIndex, bytes: &[u8]) -> io::Result<()> {
        let mut file = NamedTempFile::new_in(dir)?;
        file.write_all(bytes)?;
        file.persist(dir.join(Self::record_name(index)))
            .map_err(|e| e.error)?;
        Ok(())
    }
}

fn encode(samples: &[Sample]) -> Vec<u8> {
    samples.iter().flat_map(|s| s.to_le_bytes()).collect()
}

fn decode(bytes: &[u8]) -> Vec<Sample> {
    bytes
        .chunks_exact(SAMPLE_BYTES as usize)
        .map(|pair| Sample::from_le_bytes([pair[0], pair[1]]))
        .collect()
}

impl TileStore for DiskTileStore {
    fn store(&self, index: TileIndex, samples: &[Sample]) -> Result<(), CacheError> {
        let expected = self.expected_bytes(index)?;
        let actual = samples.len() as u64 * SAMPLE_BYTES;
        if actual != expected {
            return Err(CacheError::CorruptRecord {
                index,
                expected,
                actual,
            });
        }

        self.ensure_allocated()?;

        // Held for the whole write so dispose cannot remove the directory
        // underneath it.
        let state = self.directory.read();
        let dir = match &*state {
            DirectoryState::Allocated(dir) => dir.path(),
            DirectoryState::Disposed => return Err(CacheError::Disposed(self.generation)),
            DirectoryState::Unallocated => return Err(CacheError::NotFound(index)),
        };

        Self::write_record(dir, index, &encode(samples)).map_err(|e| CacheError::io(index, e))?;

        if let Some(previous) = self.records.insert(index, actual) {
            self.total_bytes.fetch_sub(previous, Ordering::Relaxed);
        }
        self.total_bytes.fetch_add(actual, Ordering::Relaxed);
        debug!(generation = %self.generation, tile = %index, bytes = actual, "Stored tile");
        Ok(())
    }

    fn load(&self, index: TileIndex) -> Result<Vec<Sample>, CacheError> {
        let expected = self.expected_bytes(index)?;

        let state = self.directory.read();
        let dir = match &*state {
            DirectoryState::Allocated(dir) => dir.path(),
            DirectoryState::Unallocated => return Err(CacheError::NotFound(index)),
            DirectoryState::Disposed => return Err(CacheError::Disposed(self.generation)),
        };
        if !self.records.contains_key(&index) {
            return Err(CacheError::NotFound(index));
        }

        let bytes = match fs::read(dir.join(Self::record_name(index))) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                self.records.remove(&index);
                return Err(CacheError::NotFound(index));
            }
            Err(e) => return Err(CacheError::io(index, e)),
        };

        if bytes.len() as u64 != expected {
            return Err(CacheError::CorruptRecord {
                index,
                expected,
                actual: bytes.len() as u64,
            });
        }
        Ok(decode(&bytes))
    }

    fn contains(&self, index: TileIndex) -> bool {
        self.records.contains_key(&index)
    }

    fn dispose(&self) -> Result<(), CacheError> {
        let mut state = self.directory.write();
        let previous = std::mem::replace(&mut *state, DirectoryState::Disposed);
        self.records.clear();
        self.total_bytes.store(0, Ordering::Relaxed);

        if let DirectoryState::Allocated(dir) = previous {
            let path = dir.path().to_path_buf();
            dir.close().map_err(CacheError::storage)?;
            info!(generation = %self.generation, path = %path.display(), "Disposed disk store");
        }
        Ok(())
    }

    fn location(&self) -> Option<PathBuf> {
        match &*self.directory.read() {
            DirectoryState::Allocated(dir) => Some(dir.path().to_path_buf()),
            _ => None,
        }
    }
}

impl std::fmt::Debug for DiskTileStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiskTileStore")
            .field("generation", &self.generation)
            .field("root", &self.root)
            .field("entries", &self.records.len())
            .field("size_bytes", &self.size_bytes())
            .finish()
    }
}
