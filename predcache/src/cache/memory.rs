//! Bounded in-memory tier with single-flight loading.
//!
//! Resident tiles live in an LRU keyed by tile index. A miss consults the
//! disk store and, failing that, computes the tile with the generation's
//! loader. Concurrent misses on the same key are coalesced onto one
//! [`Flight`]; evicted tiles that were never persisted are written back with
//! a flight of their own so a reload waits for the write to land.

use std::collections::HashMap;
use std::sync::Arc;

use lru::LruCache;
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::cache::flight::{Flight, FlightKind};
use crate::cache::r#trait::TileStore;
use crate::cache::stats::CacheStats;
use crate::cache::types::{CacheEntry, CacheError, Tile, WritePolicy};
use crate::classify::TileLoader;
use crate::generation::GenerationId;
use crate::grid::TileIndex;

struct Resident {
    tile: Tile,
    /// Whether the disk store already holds this content.
    persisted: bool,
}

struct CacheState {
    entries: LruCache<TileIndex, Resident>,
    flights: HashMap<TileIndex, Arc<Flight>>,
}

/// Memory tier of one cache generation.
pub struct MemoryTileCache {
    generation: GenerationId,
    capacity: usize,
    write_policy: WritePolicy,
    state: Mutex<CacheState>,
    store: Arc<dyn TileStore>,
    loader: Arc<dyn TileLoader>,
    stats: Arc<CacheStats>,
}

/// Completes an owned flight with `Aborted` if the owner unwinds.
struct FlightGuard<'a> {
    cache: &'a MemoryTileCache,
    index: TileIndex,
    flight: Option<Arc<Flight>>,
}

impl FlightGuard<'_> {
    fn complete(mut self, result: Result<Tile, CacheError>) {
        if let Some(flight) = self.flight.take() {
            flight.complete(result);
        }
    }
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        if let Some(flight) = self.flight.take() {
            self.cache.remove_flight(self.index, &flight);
            flight.complete(Err(CacheError::Aborted(self.index)));
        }
    }
}

impl MemoryTileCache {
    /// Create an empty memory tier. A capacity of zero is treated as one.
    pub fn new(
        generation: GenerationId,
        capacity: usize,
        write_policy: WritePolicy,
        store: Arc<dyn TileStore>,
        loader: Arc<dyn TileLoader>,
    ) -> Self {
        Self {
            generation,
            capacity: capacity.max(1),
            write_policy,
            state: Mutex::new(CacheState {
                entries: LruCache::unbounded(),
                flights: HashMap::new(),
            }),
            store,
            loader,
            stats: Arc::new(CacheStats::new()),
        }
    }

    pub fn generation(&self) -> GenerationId {
        self.generation
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn write_policy(&self) -> WritePolicy {
        self.write_policy
    }

    pub fn stats(&self) -> Arc<CacheStats> {
        Arc::clone(&self.stats)
    }

    /// Number of resident tiles.
    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Resident tile indices, most recently used first.
    pub fn resident_indices(&self) -> Vec<TileIndex> {
        self.state.lock().entries.iter().map(|(k, _)| *k).collect()
    }

    /// Resident tile without touching recency or statistics.
    pub fn peek(&self, index: TileIndex) -> Option<Tile> {
        self.state
            .lock()
            .entries
            .peek(&index)
            .map(|resident| resident.tile.clone())
    }

    /// Non-blocking lookup.
    ///
    /// Returns a valid entry for a resident tile, a pending entry while a
    /// load for it is in flight, and `None` otherwise. Never triggers a load.
    pub fn get(&self, index: TileIndex) -> Option<CacheEntry> {
        let mut state = self.state.lock();
        if let Some(resident) = state.entries.get(&index) {
            self.stats.record_memory_hit();
            return Some(CacheEntry::valid(resident.tile.clone()));
        }
        match state.flights.get(&index) {
            Some(flight) if flight.kind() == FlightKind::Load => Some(CacheEntry::pending(index)),
            _ => None,
        }
    }

    /// Return the tile, loading it if needed.
    ///
    /// Blocks until the tile is available. At most one load per key runs at
    /// a time; concurrent callers share its result, success or failure. A
    /// failed load leaves the key absent so a later call retries it.
    pub fn get_or_load(&self, index: TileIndex) -> Result<Tile, CacheError> {
        loop {
            let flight = {
                let mut state = self.state.lock();
                if let Some(resident) = state.entries.get(&index) {
                    self.stats.record_memory_hit();
                    return Ok(resident.tile.clone());
                }

                let existing = state.flights.get(&index).cloned();
                match existing {
                    Some(flight) => flight,
                    None => {
                        let flight = Arc::new(Flight::new(FlightKind::Load));
                        state.flights.insert(index, Arc::clone(&flight));
                        drop(state);
                        self.stats.record_memory_miss();
                        return self.run_load(index, flight);
                    }
                }
            };

            match flight.kind() {
                FlightKind::Load => {
                    self.stats.record_coalesced();
                    debug!(generation = %self.generation, tile = %index, "Joined in-flight load");
                    return flight.wait();
                }
                FlightKind::WriteBack => {
                    // Reload only after the evicted content reached the store.
                    let _ = flight.wait();
                }
            }
        }
    }

    /// Drop all resident tiles without writing them back.
    pub fn clear(&self) {
        let mut state = self.state.lock();
        let dropped = state.entries.len();
        state.entries.clear();
        debug!(generation = %self.generation, dropped, "Cleared memory tier");
    }

    fn run_load(&self, index: TileIndex, flight: Arc<Flight>) -> Result<Tile, CacheError> {
        let guard = FlightGuard {
            cache: self,
            index,
            flight: Some(flight),
        };

        let loaded = self.load_from_tiers(index);

        let (result, write_backs) = {
            let mut state = self.state.lock();
            state.flights.remove(&index);
            match loaded {
                Ok((tile, persisted)) => {
                    let write_backs = self.insert_resident(&mut state, tile.clone(), persisted);
                    (Ok(tile), write_backs)
                }
                Err(e) => (Err(e), Vec::new()),
            }
        };

        guard.complete(result.clone());
        self.write_back(write_backs);
        result
    }

    /// Disk store first, then the loader. Returns the tile and whether the
    /// store holds it.
    fn load_from_tiers(&self, index: TileIndex) -> Result<(Tile, bool), CacheError> {
        match self.store.load(index) {
            Ok(samples) => {
                self.stats.record_disk_hit();
                return Ok((Tile::new(index, self.generation, samples), true));
            }
            Err(CacheError::NotFound(_)) => self.stats.record_disk_miss(),
            Err(e @ CacheError::CorruptRecord { .. }) => {
                warn!(generation = %self.generation, tile = %index, error = %e, "Recomputing corrupt tile");
                self.stats.record_disk_miss();
            }
            Err(e) => return Err(e),
        }

        let samples = self.loader.compute(index).map_err(|source| {
            self.stats.record_computation_failure();
            CacheError::Classification { index, source }
        })?;
        self.stats.record_computation();

        let persisted = match self.write_policy {
            WritePolicy::WriteThrough => {
                if let Err(e) = self.store.store(index, &samples) {
                    self.stats.record_disk_write_failure();
                    return Err(e);
                }
                self.stats.record_disk_write();
                true
            }
            WritePolicy::WriteBack => false,
        };

        debug!(generation = %self.generation, tile = %index, persisted, "Computed tile");
        Ok((Tile::new(index, self.generation, samples), persisted))
    }

    /// Insert a tile and evict down to capacity. Unpersisted victims get a
    /// write-back flight registered before the lock is released.
    fn insert_resident(
        &self,
        state: &mut CacheState,
        tile: Tile,
        persisted: bool,
    ) -> Vec<(Tile, Arc<Flight>)> {
        state.entries.put(tile.index(), Resident { tile, persisted });

        let mut write_backs = Vec::new();
        while state.entries.len() > self.capacity {
            let Some((victim, resident)) = state.entries.pop_lru() else {
                break;
            };
            self.stats.record_eviction();
            if !resident.persisted {
                let flight = Arc::new(Flight::new(FlightKind::WriteBack));
                state.flights.insert(victim, Arc::clone(&flight));
                write_backs.push((resident.tile, flight));
            }
        }
        write_backs
    }

    fn write_back(&self, write_backs: Vec<(Tile, Arc<Flight>)>) {
        for (tile, flight) in write_backs {
            let index = tile.index();
            match self.store.store(index, tile.samples()) {
                Ok(()) => {
                    self.stats.record_disk_write();
                    self.stats.record_write_back();
                }
                Err(e) => {
                    self.stats.record_disk_write_failure();
                    warn!(generation = %self.generation, tile = %index, error = %e, "Write-back failed");
                }
            }
            self.remove_flight(index, &flight);
            flight.complete(Ok(tile));
        }
    }

    fn remove_flight(&self, index: TileIndex, flight: &Arc<Flight>) {
        let mut state = self.state.lock();
        if state
            .flights
            .get(&index)
            .is_some_and(|current| Arc::ptr_eq(current, flight))
        {
            state.flights.remove(&index);
        }
    }
}

impl std::fmt::Debug for MemoryTileCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryTileCache")
            .field("generation", &self.generation)
            .field("capacity", &self.capacity)
            .field("write_policy", &self.write_policy)
            .field("resident", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::{ClassificationError, Sample};
    use std::collections::HashMap as Map;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;
    use std::time::Duration;

    /// In-memory store that can be told to fail writes.
    #[derive(Default)]
    struct MapStore {
        records: Mutex<Map<TileIndex, Vec<Sample>>>,
        fail_writes: Mutex<bool>,
        writes: AtomicUsize,
    }

    impl TileStore for MapStore {
        fn store(&self, index: TileIndex, samples: &[Sample]) -> Result<(), CacheError> {
            if *self.fail_writes.lock() {
                return Err(CacheError::io(
                    index,
                    std::io::Error::new(std::io::ErrorKind::Other, "injected"),
                ));
            }
            self.writes.fetch_add(1, Ordering::SeqCst);
            self.records.lock().insert(index, samples.to_vec());
            Ok(())
        }

        fn load(&self, index: TileIndex) -> Result<Vec<Sample>, CacheError> {
            self.records
                .lock()
                .get(&index)
                .cloned()
                .ok_or(CacheError::NotFound(index))
        }

        fn contains(&self, index: TileIndex) -> bool {
            self.records.lock().contains_key(&index)
        }

        fn dispose(&self) -> Result<(), CacheError> {
            self.records.lock().clear();
            Ok(())
        }
    }

    /// Loader producing `[index; 4]`, counting calls, optionally slow.
    #[derive(Default)]
    struct CountingLoader {
        calls: AtomicUsize,
        delay: Option<Duration>,
        fail: bool,
    }

    impl TileLoader for CountingLoader {
        fn compute(&self, index: TileIndex) -> Result<Vec<Sample>, ClassificationError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.delay {
                thread::sleep(delay);
            }
            if self.fail {
                return Err(ClassificationError::Classifier("boom".to_string()));
            }
            Ok(vec![index.get() as Sample; 4])
        }
    }

    fn cache_with(
        capacity: usize,
        policy: WritePolicy,
        loader: CountingLoader,
    ) -> (Arc<MemoryTileCache>, Arc<MapStore>, Arc<CountingLoader>) {
        let store = Arc::new(MapStore::default());
        let loader = Arc::new(loader);
        let cache = Arc::new(MemoryTileCache::new(
            GenerationId(1),
            capacity,
            policy,
            store.clone(),
            loader.clone(),
        ));
        (cache, store, loader)
    }

    #[test]
    fn test_get_does_not_load() {
        let (cache, _store, loader) =
            cache_with(4, WritePolicy::WriteThrough, CountingLoader::default());
        assert!(cache.get(TileIndex(0)).is_none());
        assert_eq!(loader.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_get_or_load_computes_and_persists() {
        let (cache, store, loader) =
            cache_with(4, WritePolicy::WriteThrough, CountingLoader::default());

        let tile = cache.get_or_load(TileIndex(2)).unwrap();
        assert_eq!(tile.samples(), &[2, 2, 2, 2]);
        assert_eq!(tile.generation(), GenerationId(1));
        assert!(store.contains(TileIndex(2)));

        let entry = cache.get(TileIndex(2)).unwrap();
        assert!(entry.is_valid());
        assert_eq!(entry.tile.unwrap(), tile);

        cache.get_or_load(TileIndex(2)).unwrap();
        assert_eq!(loader.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_disk_hit_skips_loader() {
        let (cache, store, loader) =
            cache_with(4, WritePolicy::WriteThrough, CountingLoader::default());
        store.store(TileIndex(5), &[9, 9, 9, 9]).unwrap();

        let tile = cache.get_or_load(TileIndex(5)).unwrap();
        assert_eq!(tile.samples(), &[9, 9, 9, 9]);
        assert_eq!(loader.calls.load(Ordering::SeqCst), 0);
        assert_eq!(cache.stats().snapshot().disk_hits, 1);
    }

    #[test]
    fn test_capacity_bound_and_lru_order() {
        let (cache, _store, _loader) =
            cache_with(2, WritePolicy::WriteThrough, CountingLoader::default());
        cache.get_or_load(TileIndex(0)).unwrap();
        cache.get_or_load(TileIndex(1)).unwrap();
        // Touch 0 so 1 becomes least recently used
        cache.get(TileIndex(0));
        cache.get_or_load(TileIndex(2)).unwrap();

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.resident_indices(), vec![TileIndex(2), TileIndex(0)]);
        assert!(cache.peek(TileIndex(1)).is_none());
        assert_eq!(cache.stats().snapshot().memory_evictions, 1);
    }

    #[test]
    fn test_zero_capacity_holds_one() {
        let (cache, _store, _loader) =
            cache_with(0, WritePolicy::WriteThrough, CountingLoader::default());
        assert_eq!(cache.capacity(), 1);
        cache.get_or_load(TileIndex(0)).unwrap();
        cache.get_or_load(TileIndex(1)).unwrap();
        assert_eq!(cache.resident_indices(), vec![TileIndex(1)]);
    }

    #[test]
    fn test_evicted_tile_reloads_from_disk() {
        let (cache, _store, loader) =
            cache_with(1, WritePolicy::WriteThrough, CountingLoader::default());
        let first = cache.get_or_load(TileIndex(0)).unwrap();
        cache.get_or_load(TileIndex(1)).unwrap();
        let again = cache.get_or_load(TileIndex(0)).unwrap();

        assert_eq!(first.samples(), again.samples());
        assert_eq!(loader.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_write_back_persists_on_eviction() {
        let (cache, store, loader) =
            cache_with(1, WritePolicy::WriteBack, CountingLoader::default());
        cache.get_or_load(TileIndex(0)).unwrap();
        assert!(!store.contains(TileIndex(0)));

        cache.get_or_load(TileIndex(1)).unwrap();
        assert!(store.contains(TileIndex(0)));
        assert!(!store.contains(TileIndex(1)));

        cache.get_or_load(TileIndex(0)).unwrap();
        assert_eq!(loader.calls.load(Ordering::SeqCst), 2);
        // Reloaded from disk, so evicting it again writes nothing new
        cache.get_or_load(TileIndex(1)).unwrap();
        assert_eq!(store.writes.load(Ordering::SeqCst), 2);
        assert_eq!(cache.stats().snapshot().write_backs, 2);
    }

    #[test]
    fn test_write_through_failure_leaves_entry_absent() {
        let (cache, store, loader) =
            cache_with(4, WritePolicy::WriteThrough, CountingLoader::default());
        *store.fail_writes.lock() = true;

        let err = cache.get_or_load(TileIndex(2)).unwrap_err();
        assert!(err.is_io());
        assert!(cache.get(TileIndex(2)).is_none());

        *store.fail_writes.lock() = false;
        let tile = cache.get_or_load(TileIndex(2)).unwrap();
        assert_eq!(tile.samples(), &[2, 2, 2, 2]);
        assert!(store.contains(TileIndex(2)));
        assert_eq!(loader.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_loader_failure_is_reported_and_retried() {
        let (cache, _store, _loader) = cache_with(
            4,
            WritePolicy::WriteThrough,
            CountingLoader {
                fail: true,
                ..Default::default()
            },
        );
        assert!(matches!(
            cache.get_or_load(TileIndex(1)),
            Err(CacheError::Classification { index: TileIndex(1), .. })
        ));
        assert!(cache.is_empty());
        assert_eq!(cache.stats().snapshot().computation_failures, 1);
    }

    #[test]
    fn test_concurrent_callers_share_one_load() {
        let (cache, _store, loader) = cache_with(
            4,
            WritePolicy::WriteThrough,
            CountingLoader {
                delay: Some(Duration::from_millis(50)),
                ..Default::default()
            },
        );

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = Arc::clone(&cache);
                thread::spawn(move || cache.get_or_load(TileIndex(3)).unwrap())
            })
            .collect();
        let tiles: Vec<Tile> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        assert_eq!(loader.calls.load(Ordering::SeqCst), 1);
        for tile in &tiles {
            assert!(Arc::ptr_eq(&tile.buffer(), &tiles[0].buffer()));
        }
    }

    #[test]
    fn test_pending_while_loading() {
        let (cache, _store, _loader) = cache_with(
            4,
            WritePolicy::WriteThrough,
            CountingLoader {
                delay: Some(Duration::from_millis(100)),
                ..Default::default()
            },
        );
        let loading = {
            let cache = Arc::clone(&cache);
            thread::spawn(move || cache.get_or_load(TileIndex(0)))
        };
        thread::sleep(Duration::from_millis(30));

        let entry = cache.get(TileIndex(0)).unwrap();
        assert_eq!(entry, CacheEntry::pending(TileIndex(0)));

        loading.join().unwrap().unwrap();
        assert!(cache.get(TileIndex(0)).unwrap().is_valid());
    }

    #[test]
    fn test_clear_drops_residents() {
        let (cache, _store, _loader) =
            cache_with(4, WritePolicy::WriteThrough, CountingLoader::default());
        cache.get_or_load(TileIndex(0)).unwrap();
        cache.clear();
        assert!(cache.is_empty());
    }
}
