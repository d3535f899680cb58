//! Generation lifecycle: install, swap, retire and dispose.
//!
//! The controller owns the pointer to the current [`CacheGeneration`]. Each
//! successful training round builds a new generation and swaps it in under a
//! write lock, so readers observe either the old or the new generation and
//! never a mix. The previous generation is retired at once (no new fetches)
//! and handed to a reaper thread that disposes it after its in-flight
//! fetches drain and the last reader lets go of it.
//!
//! ```text
//!  Uninitialized ──train ok──► Ready(g1) ──train ok──► Ready(g2) ─ ─ ►
//!        │                        │  └─ g1 ──► reaper ──► disposed
//!        └────────dispose─────────┴──────────dispose──────► Disposed
//! ```

mod error;

pub use error::ControllerError;

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::cache::{CacheConfig, DiskCacheConfig, DiskTileStore, Tile, TileStore};
use crate::classify::{Classifier, RawDataSource};
use crate::generation::{CacheGeneration, CurrentGeneration, GenerationId, GenerationParts};
use crate::grid::{TileBox, TileGrid, TileIndex};
use crate::scheduler::{Priority, TileReady, READY_CHANNEL_CAPACITY};
use crate::view::{TileSample, VolatileTileView, VoxelSample};

/// How often a reaper checks whether its generation is still referenced.
const REAPER_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Creates the disk tier of a new generation.
pub type StoreFactory =
    Arc<dyn Fn(GenerationId, Arc<TileGrid>, &DiskCacheConfig) -> Arc<dyn TileStore> + Send + Sync>;

/// Lifecycle state visible to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerStatus {
    /// No classifier trained yet; every sample is invalid.
    Uninitialized,
    /// A generation is installed.
    Ready(GenerationId),
    /// Terminal; all generations disposed.
    Disposed,
}

enum Slot {
    Uninitialized,
    Ready(Arc<CacheGeneration>),
    Disposed,
}

struct Reaper {
    generation: GenerationId,
    handle: JoinHandle<()>,
}

/// Owns the current cache generation and replaces it on retraining.
pub struct PredictionCacheController {
    grid: Arc<TileGrid>,
    source: Arc<dyn RawDataSource>,
    config: CacheConfig,
    store_factory: StoreFactory,
    slot: RwLock<Slot>,
    /// Serialises installs; holds the last issued id.
    install: Mutex<GenerationId>,
    current: CurrentGeneration,
    ready: broadcast::Sender<TileReady>,
    reapers: Mutex<Vec<Reaper>>,
    shutdown: Arc<AtomicBool>,
}

impl PredictionCacheController {
    /// Create a controller with no generation installed.
    pub fn new(grid: TileGrid, source: Arc<dyn RawDataSource>, config: CacheConfig) -> Self {
        let (ready, _) = broadcast::channel(READY_CHANNEL_CAPACITY);
        Self {
            grid: Arc::new(grid),
            source,
            config,
            store_factory: Arc::new(
                |id: GenerationId, grid: Arc<TileGrid>, disk: &DiskCacheConfig| {
                    Arc::new(DiskTileStore::new(id, grid, disk)) as Arc<dyn TileStore>
                },
            ),
            slot: RwLock::new(Slot::Uninitialized),
            install: Mutex::new(GenerationId(0)),
            current: CurrentGeneration::new(),
            ready,
            reapers: Mutex::new(Vec::new()),
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Replace how disk tiers are created.
    pub fn with_store_factory(mut self, factory: StoreFactory) -> Self {
        self.store_factory = factory;
        self
    }

    pub fn grid(&self) -> &Arc<TileGrid> {
        &self.grid
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn status(&self) -> ControllerStatus {
        match &*self.slot.read() {
            Slot::Uninitialized => ControllerStatus::Uninitialized,
            Slot::Ready(generation) => ControllerStatus::Ready(generation.id()),
            Slot::Disposed => ControllerStatus::Disposed,
        }
    }

    /// The installed generation, if any.
    pub fn current(&self) -> Option<Arc<CacheGeneration>> {
        match &*self.slot.read() {
            Slot::Ready(generation) => Some(Arc::clone(generation)),
            _ => None,
        }
    }

    pub fn current_id(&self) -> Option<GenerationId> {
        self.current.get()
    }

    /// Non-blocking view over the installed generation.
    pub fn view(&self) -> Option<VolatileTileView> {
        self.current().map(|generation| generation.view())
    }

    /// Tile-ready notifications from every generation this controller
    /// installs. Events carry their generation id.
    pub fn subscribe(&self) -> broadcast::Receiver<TileReady> {
        self.ready.subscribe()
    }

    /// Install a generation for a freshly trained classifier.
    ///
    /// The new generation becomes visible atomically. The previous one stops
    /// accepting fetches and is disposed in the background once its
    /// in-flight work and readers are gone.
    pub fn on_training_succeeded(
        &self,
        classifier: Arc<dyn Classifier>,
    ) -> Result<GenerationId, ControllerError> {
        let mut last = self.install.lock();
        if self.shutdown.load(Ordering::Acquire) {
            return Err(ControllerError::Disposed);
        }

        let id = last.next();
        let store = (self.store_factory)(id, Arc::clone(&self.grid), &self.config.disk);
        let generation = Arc::new(CacheGeneration::new(
            GenerationParts {
                id,
                grid: Arc::clone(&self.grid),
                source: Arc::clone(&self.source),
                classifier: Arc::clone(&classifier),
                store,
                current: self.current.clone(),
                ready: self.ready.clone(),
            },
            &self.config,
        ));
        generation.start().map_err(ControllerError::WorkerSpawn)?;

        let previous = {
            let mut slot = self.slot.write();
            if matches!(*slot, Slot::Disposed) {
                return Err(ControllerError::Disposed);
            }
            let previous = std::mem::replace(&mut *slot, Slot::Ready(generation));
            self.current.set(id);
            previous
        };
        *last = id;
        // Register the reaper while still holding the install lock, so a
        // concurrent dispose always finds it.
        if let Slot::Ready(old) = previous {
            self.retire(old);
        }
        drop(last);

        info!(generation = %id, classifier = %classifier.describe(), "Installed cache generation");
        Ok(id)
    }

    /// Training did not produce a classifier. The current generation stays.
    pub fn on_training_failed(&self, reason: &dyn fmt::Display) {
        warn!(
            generation = ?self.current.get(),
            reason = %reason,
            "Training failed, keeping current predictions"
        );
    }

    /// Sample one tile without blocking.
    pub fn sample(&self, index: TileIndex, priority: Priority) -> TileSample {
        match self.current() {
            Some(generation) => generation.view().sample(index, priority),
            None => TileSample::invalid(index, None),
        }
    }

    /// Sample all tiles of a region without blocking.
    pub fn sample_region(&self, region: &TileBox) -> Vec<TileSample> {
        match self.current() {
            Some(generation) => generation.view().sample_region(region),
            None => self
                .grid
                .tiles_intersecting(region)
                .into_iter()
                .map(|index| TileSample::invalid(index, None))
                .collect(),
        }
    }

    /// Sample one voxel without blocking.
    pub fn sample_voxel(&self, coordinate: &[u64], priority: Priority) -> VoxelSample {
        match self.current() {
            Some(generation) => generation.view().sample_voxel(coordinate, priority),
            None => VoxelSample {
                value: None,
                validity: crate::cache::Validity::Invalid,
            },
        }
    }

    /// Blocking load from the current generation, for batch consumers.
    /// Never call this from the render thread.
    pub fn get_or_load(&self, index: TileIndex) -> Result<Tile, ControllerError> {
        let generation = match &*self.slot.read() {
            Slot::Ready(generation) => Arc::clone(generation),
            Slot::Uninitialized => return Err(ControllerError::NotTrained),
            Slot::Disposed => return Err(ControllerError::Disposed),
        };
        self.grid.tile_bounds(index)?;
        Ok(generation.get_or_load(index)?)
    }

    /// Number of retired generations not yet disposed.
    pub fn pending_retirements(&self) -> usize {
        self.reapers
            .lock()
            .iter()
            .filter(|reaper| !reaper.handle.is_finished())
            .count()
    }

    /// Block until every retired generation has been disposed.
    pub fn wait_for_retired(&self) {
        let reapers = std::mem::take(&mut *self.reapers.lock());
        for reaper in reapers {
            if reaper.handle.join().is_err() {
                warn!(generation = %reaper.generation, "Generation reaper panicked");
            }
        }
    }

    /// Tear everything down. Waits for in-flight fetches, then disposes every
    /// generation regardless of outstanding views. Idempotent.
    pub fn dispose(&self) {
        self.shutdown.store(true, Ordering::Release);
        let previous = {
            let _install = self.install.lock();
            let mut slot = self.slot.write();
            let previous = std::mem::replace(&mut *slot, Slot::Disposed);
            self.current.clear();
            previous
        };

        match previous {
            Slot::Ready(generation) => self.retire(generation),
            Slot::Uninitialized => {}
            Slot::Disposed => return,
        }
        self.wait_for_retired();
        info!("Prediction cache disposed");
    }

    fn retire(&self, generation: Arc<CacheGeneration>) {
        let id = generation.id();
        generation.retire();

        let shutdown = Arc::clone(&self.shutdown);
        // If the reaper cannot be spawned, the closure (and the generation)
        // is dropped here and disposal happens inline.
        match thread::Builder::new()
            .name(format!("reaper-{}", id))
            .spawn(move || reap(generation, shutdown))
        {
            Ok(handle) => {
                let mut reapers = self.reapers.lock();
                reapers.retain(|reaper| !reaper.handle.is_finished());
                reapers.push(Reaper {
                    generation: id,
                    handle,
                });
            }
            Err(e) => {
                warn!(generation = %id, error = %e, "Could not spawn reaper, disposed inline");
            }
        }
    }
}

/// Dispose a retired generation once its fetches drained and no reader
/// holds it, or right away on shutdown.
fn reap(generation: Arc<CacheGeneration>, shutdown: Arc<AtomicBool>) {
    let id = generation.id();
    generation.scheduler().wait_drained();
    debug!(generation = %id, "Retired generation drained");

    while Arc::strong_count(&generation) > 1 && !shutdown.load(Ordering::Acquire) {
        thread::sleep(REAPER_POLL_INTERVAL);
    }
    if let Err(e) = generation.dispose() {
        warn!(generation = %id, error = %e, "Failed to dispose retired generation");
    }
}

impl Drop for PredictionCacheController {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl fmt::Debug for PredictionCacheController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PredictionCacheController")
            .field("status", &self.status())
            .field("pending_retirements", &self.pending_retirements())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::Validity;
    use crate::classify::{ClassificationError, RawBlock, Sample};
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

    fn controller(root: &TempDir) -> PredictionCacheController {
        let grid = TileGrid::new(vec![20, 20], vec![10, 10]).unwrap();
        let config = CacheConfig::default()
            .with_disk_directory(root.path())
            .with_workers(2);
        PredictionCacheController::new(grid, Arc::new(Zeros), config)
    }

    #[test]
    fn test_uninitialized_samples_invalid() {
        let root = TempDir::new().unwrap();
        let controller = controller(&root);
        assert_eq!(controller.status(), ControllerStatus::Uninitialized);
        assert_eq!(
            controller.sample(TileIndex(0), Priority::VISIBLE),
            TileSample::invalid(TileIndex(0), None)
        );
        assert!(matches!(
            controller.get_or_load(TileIndex(0)),
            Err(ControllerError::NotTrained)
        ));
        assert!(controller.view().is_none());
    }

    #[test]
    fn test_training_installs_generations_in_order() {
        let root = TempDir::new().unwrap();
        let controller = controller(&root);

        let first = controller.on_training_succeeded(Arc::new(Constant(1))).unwrap();
        assert_eq!(first, GenerationId(1));
        assert_eq!(controller.status(), ControllerStatus::Ready(first));

        let second = controller.on_training_succeeded(Arc::new(Constant(2))).unwrap();
        assert_eq!(second, GenerationId(2));
        assert_eq!(controller.current_id(), Some(second));

        let tile = controller.get_or_load(TileIndex(3)).unwrap();
        assert_eq!(tile.generation(), second);
        assert!(tile.samples().iter().all(|&v| v == 2));
    }

    #[test]
    fn test_training_failure_keeps_generation() {
        let root = TempDir::new().unwrap();
        let controller = controller(&root);
        let id = controller.on_training_succeeded(Arc::new(Constant(1))).unwrap();
        controller.on_training_failed(&"not enough labels");
        assert_eq!(controller.status(), ControllerStatus::Ready(id));
    }

    #[test]
    fn test_retired_generation_disposed_after_release() {
        let root = TempDir::new().unwrap();
        let controller = controller(&root);
        controller.on_training_succeeded(Arc::new(Constant(1))).unwrap();

        let old = controller.current().unwrap();
        old.get_or_load(TileIndex(0)).unwrap();
        let location = old.store_location().unwrap();

        controller.on_training_succeeded(Arc::new(Constant(2))).unwrap();
        assert!(old.is_retired());
        thread::sleep(Duration::from_millis(50));
        // Still held here, so not yet disposed
        assert!(location.exists());
        assert_eq!(
            old.view().sample(TileIndex(1), Priority::VISIBLE).validity,
            Validity::Invalid
        );

        drop(old);
        controller.wait_for_retired();
        assert!(!location.exists());
        assert_eq!(controller.pending_retirements(), 0);
    }

    #[test]
    fn test_dispose_racing_install_removes_every_store() {
        for _ in 0..25 {
            let root = TempDir::new().unwrap();
            let controller = Arc::new(controller(&root));
            controller.on_training_succeeded(Arc::new(Constant(1))).unwrap();
            controller.get_or_load(TileIndex(0)).unwrap();
            let first = controller.current().unwrap().store_location().unwrap();

            let installer = {
                let controller = Arc::clone(&controller);
                thread::spawn(move || controller.on_training_succeeded(Arc::new(Constant(2))))
            };
            controller.dispose();
            assert!(!first.exists(), "store of the first generation outlived dispose");

            let installed = installer.join().unwrap();
            assert!(matches!(installed, Ok(_) | Err(ControllerError::Disposed)));
            assert_eq!(controller.pending_retirements(), 0);
        }
    }

    #[test]
    fn test_sample_region_with_huge_extent() {
        let root = TempDir::new().unwrap();
        let controller = controller(&root);
        controller.on_training_succeeded(Arc::new(Constant(1))).unwrap();
        let everything = TileBox::new(vec![0, 0], vec![u64::MAX, u64::MAX]);
        assert_eq!(controller.sample_region(&everything).len(), 4);
    }

    #[test]
    fn test_dispose_is_terminal() {
        let root = TempDir::new().unwrap();
        let controller = controller(&root);
        controller.on_training_succeeded(Arc::new(Constant(1))).unwrap();
        controller.get_or_load(TileIndex(0)).unwrap();
        let location = controller.current().unwrap().store_location().unwrap();

        controller.dispose();
        assert_eq!(controller.status(), ControllerStatus::Disposed);
        assert!(!location.exists());
        assert!(matches!(
            controller.on_training_succeeded(Arc::new(Constant(2))),
            Err(ControllerError::Disposed)
        ));
        assert!(matches!(
            controller.get_or_load(TileIndex(0)),
            Err(ControllerError::Disposed)
        ));
        controller.dispose();
    }

    #[test]
    fn test_get_or_load_rejects_invalid_index() {
        let root = TempDir::new().unwrap();
        let controller = controller(&root);
        controller.on_training_succeeded(Arc::new(Constant(1))).unwrap();
        assert!(matches!(
            controller.get_or_load(TileIndex(4)),
            Err(ControllerError::Grid(_))
        ));
    }
}
