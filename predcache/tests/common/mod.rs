//! Shared fixtures for integration tests: scripted raw data, classifiers
//! and a fault-injecting tile store.

#![allow(dead_code)]

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use predcache::cache::{CacheError, TileStore};
use predcache::classify::{ClassificationError, Classifier, RawBlock, RawDataSource, Sample};
use predcache::grid::{TileBox, TileGrid, TileIndex};

/// 30x30 volume split into a 3x3 grid of 10x10 tiles.
pub fn grid_3x3() -> TileGrid {
    TileGrid::new(vec![30, 30], vec![10, 10]).unwrap()
}

/// Raw data whose single channel is the voxel's linear position in the volume.
pub struct PositionSource {
    pub width: u64,
}

impl RawDataSource for PositionSource {
    fn read_block(&self, bounds: &TileBox) -> Result<RawBlock, ClassificationError> {
        let mut data = Vec::with_capacity(bounds.voxel_count() as usize);
        for y in bounds.origin[1]..bounds.origin[1] + bounds.extent[1] {
            for x in bounds.origin[0]..bounds.origin[0] + bounds.extent[0] {
                data.push((y * self.width + x) as f32);
            }
        }
        Ok(RawBlock {
            bounds: bounds.clone(),
            channels: 1,
            data,
        })
    }
}

/// Labels every voxel `base + position % 7`, recording which tiles it ran on.
pub struct RecordingClassifier {
    pub base: Sample,
    grid: Arc<TileGrid>,
    calls: AtomicUsize,
    order: Mutex<Vec<TileIndex>>,
    delay: Duration,
}

impl RecordingClassifier {
    pub fn new(base: Sample, grid: Arc<TileGrid>) -> Self {
        Self {
            base,
            grid,
            calls: AtomicUsize::new(0),
            order: Mutex::new(Vec::new()),
            delay: Duration::ZERO,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn order(&self) -> Vec<TileIndex> {
        self.order.lock().clone()
    }

    /// Expected content of a tile.
    pub fn expected(&self, source: &PositionSource, index: TileIndex) -> Vec<Sample> {
        let block = source
            .read_block(&self.grid.tile_bounds(index).unwrap())
            .unwrap();
        label(self.base, &block)
    }
}

fn label(base: Sample, block: &RawBlock) -> Vec<Sample> {
    block
        .data
        .iter()
        .map(|v| base + (*v as i64 % 7) as Sample)
        .collect()
}

impl Classifier for RecordingClassifier {
    fn classify(&self, block: &RawBlock) -> Result<Vec<Sample>, ClassificationError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(index) = self.grid.index_of(&block.bounds.origin) {
            self.order.lock().push(index);
        }
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
        Ok(label(self.base, block))
    }

    fn describe(&self) -> String {
        format!("recording(base={})", self.base)
    }
}

/// Classifier that blocks on selected tiles until the gate opens.
pub struct GatedClassifier {
    pub base: Sample,
    grid: Arc<TileGrid>,
    gated: HashSet<TileIndex>,
    open: Mutex<bool>,
    opened: Condvar,
    entered: AtomicUsize,
}

impl GatedClassifier {
    pub fn new(base: Sample, grid: Arc<TileGrid>, gated: impl IntoIterator<Item = TileIndex>) -> Self {
        Self {
            base,
            grid,
            gated: gated.into_iter().collect(),
            open: Mutex::new(false),
            opened: Condvar::new(),
            entered: AtomicUsize::new(0),
        }
    }

    pub fn open(&self) {
        *self.open.lock() = true;
        self.opened.notify_all();
    }

    /// Number of computations currently or previously stuck at the gate.
    pub fn entered(&self) -> usize {
        self.entered.load(Ordering::SeqCst)
    }

    /// Wait until `count` computations reached the gate.
    pub fn wait_entered(&self, count: usize) {
        assert!(
            wait_until(Duration::from_secs(5), || self.entered() >= count),
            "gate was never reached"
        );
    }
}

impl Classifier for GatedClassifier {
    fn classify(&self, block: &RawBlock) -> Result<Vec<Sample>, ClassificationError> {
        let gated = self
            .grid
            .index_of(&block.bounds.origin)
            .map(|index| self.gated.contains(&index))
            .unwrap_or(false);
        if gated {
            self.entered.fetch_add(1, Ordering::SeqCst);
            let mut open = self.open.lock();
            while !*open {
                self.opened.wait(&mut open);
            }
        }
        Ok(label(self.base, block))
    }
}

/// Store wrapper that fails `store` for chosen tiles while armed.
pub struct FaultyStore {
    inner: Arc<dyn TileStore>,
    failing: Mutex<HashSet<TileIndex>>,
    injected: AtomicUsize,
}

impl FaultyStore {
    pub fn new(inner: Arc<dyn TileStore>) -> Self {
        Self {
            inner,
            failing: Mutex::new(HashSet::new()),
            injected: AtomicUsize::new(0),
        }
    }

    pub fn fail_store(&self, index: TileIndex) {
        self.failing.lock().insert(index);
    }

    pub fn heal(&self, index: TileIndex) {
        self.failing.lock().remove(&index);
    }

    pub fn injected(&self) -> usize {
        self.injected.load(Ordering::SeqCst)
    }
}

impl TileStore for FaultyStore {
    fn store(&self, index: TileIndex, samples: &[Sample]) -> Result<(), CacheError> {
        if self.failing.lock().contains(&index) {
            self.injected.fetch_add(1, Ordering::SeqCst);
            return Err(CacheError::Io {
                index,
                source: Arc::new(std::io::Error::new(
                    std::io::ErrorKind::Other,
                    "injected write failure",
                )),
            });
        }
        self.inner.store(index, samples)
    }

    fn load(&self, index: TileIndex) -> Result<Vec<Sample>, CacheError> {
        self.inner.load(index)
    }

    fn contains(&self, index: TileIndex) -> bool {
        self.inner.contains(index)
    }

    fn dispose(&self) -> Result<(), CacheError> {
        self.inner.dispose()
    }

    fn location(&self) -> Option<PathBuf> {
        self.inner.location()
    }
}

/// Store wrapper whose `store` blocks on selected tiles until the gate opens.
pub struct GatedStore {
    inner: Arc<dyn TileStore>,
    gated: HashSet<TileIndex>,
    open: Mutex<bool>,
    opened: Condvar,
    entered: AtomicUsize,
    loads: AtomicUsize,
}

impl GatedStore {
    pub fn new(inner: Arc<dyn TileStore>, gated: impl IntoIterator<Item = TileIndex>) -> Self {
        Self {
            inner,
            gated: gated.into_iter().collect(),
            open: Mutex::new(false),
            opened: Condvar::new(),
            entered: AtomicUsize::new(0),
            loads: AtomicUsize::new(0),
        }
    }

    pub fn open(&self) {
        *self.open.lock() = true;
        self.opened.notify_all();
    }

    /// Wait until `count` writes reached the gate.
    pub fn wait_entered(&self, count: usize) {
        assert!(
            wait_until(Duration::from_secs(5), || {
                self.entered.load(Ordering::SeqCst) >= count
            }),
            "store gate was never reached"
        );
    }

    /// Successful loads from the inner store.
    pub fn loads(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }
}

impl TileStore for GatedStore {
    fn store(&self, index: TileIndex, samples: &[Sample]) -> Result<(), CacheError> {
        if self.gated.contains(&index) {
            self.entered.fetch_add(1, Ordering::SeqCst);
            let mut open = self.open.lock();
            while !*open {
                self.opened.wait(&mut open);
            }
        }
        self.inner.store(index, samples)
    }

    fn load(&self, index: TileIndex) -> Result<Vec<Sample>, CacheError> {
        let samples = self.inner.load(index)?;
        self.loads.fetch_add(1, Ordering::SeqCst);
        Ok(samples)
    }

    fn contains(&self, index: TileIndex) -> bool {
        self.inner.contains(index)
    }

    fn dispose(&self) -> Result<(), CacheError> {
        self.inner.dispose()
    }

    fn location(&self) -> Option<PathBuf> {
        self.inner.location()
    }
}

/// Poll `condition` until it holds or `timeout` passes.
pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    condition()
}
