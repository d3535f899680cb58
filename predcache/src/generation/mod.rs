//! Cache generations.
//!
//! A generation bundles everything derived from one classifier snapshot:
//! its loader, memory tier, disk store and fetch scheduler. Generations are
//! never mutated across training rounds; a retrained classifier gets a new
//! generation and the old one is retired and disposed as a whole.

use std::fmt;
use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::cache::{CacheConfig, CacheError, CacheStatsSnapshot, MemoryTileCache, Tile, TileStore};
use crate::classify::{Classifier, ClassifyingLoader, RawDataSource, Sample};
use crate::grid::{TileGrid, TileIndex};
use crate::scheduler::{FetchScheduler, SchedulerStatsSnapshot, TileReady};
use crate::view::VolatileTileView;

/// Identifier of a cache generation. Ids increase with every training round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct GenerationId(pub u64);

impl GenerationId {
    pub fn get(self) -> u64 {
        self.0
    }

    pub fn next(self) -> GenerationId {
        GenerationId(self.0 + 1)
    }
}

impl fmt::Display for GenerationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "g{}", self.0)
    }
}

/// Shared, lock-free record of which generation is current.
///
/// Workers read it to drop requests from superseded generations. Zero means
/// no generation is installed.
#[derive(Debug, Clone, Default)]
pub struct CurrentGeneration(Arc<AtomicU64>);

impl CurrentGeneration {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> Option<GenerationId> {
        match self.0.load(Ordering::Acquire) {
            0 => None,
            id => Some(GenerationId(id)),
        }
    }

    pub fn set(&self, id: GenerationId) {
        self.0.store(id.0, Ordering::Release);
    }

    pub fn clear(&self) {
        self.0.store(0, Ordering::Release);
    }
}

/// Everything needed to build one generation.
pub struct GenerationParts {
    pub id: GenerationId,
    pub grid: Arc<TileGrid>,
    pub source: Arc<dyn RawDataSource>,
    pub classifier: Arc<dyn Classifier>,
    pub store: Arc<dyn TileStore>,
    pub current: CurrentGeneration,
    pub ready: broadcast::Sender<TileReady>,
}

/// One classifier snapshot's cache: loader, memory tier, disk tier and
/// scheduler, disposed together.
pub struct CacheGeneration {
    id: GenerationId,
    grid: Arc<TileGrid>,
    classifier: Arc<dyn Classifier>,
    store: Arc<dyn TileStore>,
    cache: Arc<MemoryTileCache>,
    scheduler: FetchScheduler,
    ready: broadcast::Sender<TileReady>,
    background: Sample,
    created_at: Instant,
    retired: AtomicBool,
    disposed: AtomicBool,
}

impl CacheGeneration {
    /// Build a generation. Its workers are not started yet.
    pub fn new(parts: GenerationParts, config: &CacheConfig) -> Self {
        let GenerationParts {
            id,
            grid,
            source,
            classifier,
            store,
            current,
            ready,
        } = parts;

        let loader = Arc::new(ClassifyingLoader::new(
            Arc::clone(&grid),
            source,
            Arc::clone(&classifier),
        ));
        let cache = Arc::new(MemoryTileCache::new(
            id,
            config.memory.capacity,
            config.write_policy,
            Arc::clone(&store),
            loader,
        ));
        let scheduler = FetchScheduler::new(
            id,
            current,
            Arc::clone(&cache),
            &config.scheduler,
            ready.clone(),
        );

        debug!(
            generation = %id,
            capacity = cache.capacity(),
            write_policy = %config.write_policy,
            classifier = %classifier.describe(),
            "Built cache generation"
        );

        Self {
            id,
            grid,
            classifier,
            store,
            cache,
            scheduler,
            ready,
            background: config.background_label,
            created_at: Instant::now(),
            retired: AtomicBool::new(false),
            disposed: AtomicBool::new(false),
        }
    }

    /// Start the fetch workers.
    pub fn start(&self) -> io::Result<()> {
        self.scheduler.start()
    }

    pub fn id(&self) -> GenerationId {
        self.id
    }

    pub fn grid(&self) -> &Arc<TileGrid> {
        &self.grid
    }

    pub fn classifier(&self) -> &Arc<dyn Classifier> {
        &self.classifier
    }

    pub fn cache(&self) -> &MemoryTileCache {
        &self.cache
    }

    pub fn scheduler(&self) -> &FetchScheduler {
        &self.scheduler
    }

    pub fn store(&self) -> &Arc<dyn TileStore> {
        &self.store
    }

    /// Directory of the generation's disk tier, once allocated.
    pub fn store_location(&self) -> Option<PathBuf> {
        self.store.location()
    }

    pub fn background_label(&self) -> Sample {
        self.background
    }

    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    /// Subscribe to tile-ready notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<TileReady> {
        self.ready.subscribe()
    }

    /// Non-blocking view for the renderer.
    pub fn view(self: &Arc<Self>) -> VolatileTileView {
        VolatileTileView::new(Arc::clone(self))
    }

    /// Blocking load through the memory tier. Not for the render thread.
    pub fn get_or_load(&self, index: TileIndex) -> Result<Tile, CacheError> {
        self.cache.get_or_load(index)
    }

    pub fn cache_stats(&self) -> CacheStatsSnapshot {
        self.cache.stats().snapshot()
    }

    pub fn scheduler_stats(&self) -> SchedulerStatsSnapshot {
        self.scheduler.stats()
    }

    /// Stop admitting fetches and drop queued ones. In-flight fetches finish.
    pub fn retire(&self) {
        if !self.retired.swap(true, Ordering::AcqRel) {
            self.scheduler.close();
            info!(generation = %self.id, age_secs = self.age().as_secs(), "Retired cache generation");
        }
    }

    pub fn is_retired(&self) -> bool {
        self.retired.load(Ordering::Acquire)
    }

    /// Release all resources: joins workers, clears memory, deletes disk
    /// storage. Calling it again is a no-op.
    pub fn dispose(&self) -> Result<(), CacheError> {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.retire();
        self.scheduler.shutdown();
        self.cache.clear();
        let result = self.store.dispose();
        info!(generation = %self.id, "Disposed cache generation");
        result
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }
}

impl Drop for CacheGeneration {
    fn drop(&mut self) {
        if let Err(e) = self.dispose() {
            warn!(generation = %self.id, error = %e, "Failed to dispose disk store");
        }
    }
}

impl fmt::Debug for CacheGeneration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheGeneration")
            .field("id", &self.id)
            .field("retired", &self.is_retired())
            .field("disposed", &self.is_disposed())
            .field("cache", &self.cache)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::DiskTileStore;
    use crate::classify::{ClassificationError, RawBlock};
    use crate::grid::TileBox;
    use crate::scheduler::READY_CHANNEL_CAPACITY;
    use tempfile::TempDir;

    struct Zeros;

    impl RawDataSource for Zeros {
        fn read_block(&self, bounds: &TileBox) -> Result<RawBlock, ClassificationError> {
            Ok(RawBlock {
                bounds: bounds.clone(),
                channels: 1,
                data: vec![0.0; bounds.voxel_count() as usize],
            })
        }
    }

    struct Constant(Sample);

    impl Classifier for Constant {
        fn classify(&self, block: &RawBlock) -> Result<Vec<Sample>, ClassificationError> {
            Ok(vec![self.0; block.voxel_count()])
        }
    }

    fn build(root: &TempDir, id: u64) -> Arc<CacheGeneration> {
        let grid = Arc::new(TileGrid::new(vec![8, 8], vec![4, 4]).unwrap());
        let config = CacheConfig::default()
            .with_disk_directory(root.path())
            .with_workers(1);
        let store = Arc::new(DiskTileStore::new(
            GenerationId(id),
            Arc::clone(&grid),
            &config.disk,
        ));
        let current = CurrentGeneration::new();
        current.set(GenerationId(id));
        let (ready, _) = broadcast::channel(READY_CHANNEL_CAPACITY);
        Arc::new(CacheGeneration::new(
            GenerationParts {
                id: GenerationId(id),
                grid,
                source: Arc::new(Zeros),
                classifier: Arc::new(Constant(id as Sample)),
                store,
                current,
                ready,
            },
            &config,
        ))
    }

    #[test]
    fn test_generation_id_display_and_next() {
        assert_eq!(GenerationId(3).to_string(), "g3");
        assert_eq!(GenerationId(3).next(), GenerationId(4));
    }

    #[test]
    fn test_current_generation() {
        let current = CurrentGeneration::new();
        assert_eq!(current.get(), None);
        let shared = current.clone();
        shared.set(GenerationId(5));
        assert_eq!(current.get(), Some(GenerationId(5)));
        current.clear();
        assert_eq!(shared.get(), None);
    }

    #[test]
    fn test_get_or_load_uses_snapshot_classifier() {
        let root = TempDir::new().unwrap();
        let generation = build(&root, 2);
        let tile = generation.get_or_load(TileIndex(1)).unwrap();
        assert_eq!(tile.samples(), &[2; 16]);
        assert_eq!(tile.generation(), GenerationId(2));
        assert_eq!(generation.cache_stats().computations, 1);
    }

    #[test]
    fn test_dispose_removes_storage() {
        let root = TempDir::new().unwrap();
        let generation = build(&root, 1);
        generation.start().unwrap();
        generation.get_or_load(TileIndex(0)).unwrap();
        let location = generation.store_location().unwrap();
        assert!(location.exists());

        generation.dispose().unwrap();
        assert!(!location.exists());
        assert!(generation.is_retired());
        assert!(generation.is_disposed());
        assert!(generation.cache().is_empty());
        generation.dispose().unwrap();
    }

    #[test]
    fn test_drop_disposes() {
        let root = TempDir::new().unwrap();
        let generation = build(&root, 1);
        generation.get_or_load(TileIndex(0)).unwrap();
        let location = generation.store_location().unwrap();
        drop(generation);
        assert!(!location.exists());
    }
}
