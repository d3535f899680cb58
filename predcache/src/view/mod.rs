//! Non-blocking tile access for the render thread.
//!
//! The renderer never waits for tile content. A sample of a missing tile
//! schedules a background fetch and reports the tile as pending; the
//! renderer shows a placeholder and asks again on its next repaint or when
//! a [`TileReady`] notification arrives.

use std::sync::Arc;

use tokio::sync::broadcast;

use crate::cache::{Tile, Validity};
use crate::classify::Sample;
use crate::generation::{CacheGeneration, GenerationId};
use crate::grid::{TileBox, TileIndex};
use crate::scheduler::{Admission, FetchRequest, Priority, TileReady};

/// Priority steps lost per tile of distance from the region centre.
const DISTANCE_PENALTY: f64 = 10.0;

/// Result of sampling one tile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TileSample {
    pub index: TileIndex,
    /// Generation that answered, if any.
    pub generation: Option<GenerationId>,
    pub tile: Option<Tile>,
    pub validity: Validity,
}

impl TileSample {
    pub fn valid(tile: Tile) -> Self {
        Self {
            index: tile.index(),
            generation: Some(tile.generation()),
            tile: Some(tile),
            validity: Validity::Valid,
        }
    }

    pub fn pending(index: TileIndex, generation: GenerationId) -> Self {
        Self {
            index,
            generation: Some(generation),
            tile: None,
            validity: Validity::Pending,
        }
    }

    pub fn invalid(index: TileIndex, generation: Option<GenerationId>) -> Self {
        Self {
            index,
            generation,
            tile: None,
            validity: Validity::Invalid,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.validity == Validity::Valid
    }
}

/// Prediction value at one voxel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VoxelSample {
    /// Label, present only when `validity` is valid.
    pub value: Option<Sample>,
    pub validity: Validity,
}

/// Renderer-facing view over one generation.
///
/// Holding a view keeps its generation alive; the renderer should take a
/// fresh view from the controller after each retraining.
#[derive(Clone)]
pub struct VolatileTileView {
    generation: Arc<CacheGeneration>,
}

impl VolatileTileView {
    pub fn new(generation: Arc<CacheGeneration>) -> Self {
        Self { generation }
    }

    pub fn generation(&self) -> GenerationId {
        self.generation.id()
    }

    /// Sample one tile without blocking.
    ///
    /// Returns valid content when resident. Otherwise schedules a fetch at
    /// `priority` and returns pending. Indices outside the grid and retired
    /// generations yield invalid.
    pub fn sample(&self, index: TileIndex, priority: Priority) -> TileSample {
        let generation = &self.generation;
        let id = generation.id();
        if index.get() >= generation.grid().tile_count() {
            return TileSample::invalid(index, Some(id));
        }

        match generation.cache().get(index) {
            Some(entry) => match entry.tile {
                Some(tile) => TileSample::valid(tile),
                None => TileSample::pending(index, id),
            },
            None => {
                let admission = generation
                    .scheduler()
                    .enqueue(FetchRequest::new(index, id, priority));
                if admission.is_pending() {
                    TileSample::pending(index, id)
                } else {
                    TileSample::invalid(index, Some(id))
                }
            }
        }
    }

    /// Sample every tile intersecting `region`, nearest to its centre first.
    ///
    /// Tiles closer to the region centre are fetched with higher priority.
    pub fn sample_region(&self, region: &TileBox) -> Vec<TileSample> {
        let grid = self.generation.grid();
        let centre = region.center();
        let scale: Vec<f64> = grid.tile_shape().iter().map(|&s| f64::from(s)).collect();

        let mut ranked: Vec<(f64, TileIndex)> = grid
            .tiles_intersecting(region)
            .into_iter()
            .filter_map(|index| {
                let bounds = grid.tile_bounds(index).ok()?;
                let distance = bounds
                    .center()
                    .iter()
                    .zip(&centre)
                    .zip(&scale)
                    .map(|((a, b), s)| ((a - b) / s).powi(2))
                    .sum::<f64>()
                    .sqrt();
                Some((distance, index))
            })
            .collect();
        ranked.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));

        ranked
            .into_iter()
            .map(|(distance, index)| {
                let priority = Priority::VISIBLE.lowered_by((distance * DISTANCE_PENALTY).round() as i32);
                self.sample(index, priority)
            })
            .collect()
    }

    /// Sample the prediction at one voxel without blocking.
    ///
    /// Coordinates outside the volume report the background label.
    pub fn sample_voxel(&self, coordinate: &[u64], priority: Priority) -> VoxelSample {
        let grid = self.generation.grid();
        let Ok((index, offset)) = grid.offset_in_tile(coordinate) else {
            return VoxelSample {
                value: Some(self.generation.background_label()),
                validity: Validity::Valid,
            };
        };

        let sample = self.sample(index, priority);
        VoxelSample {
            value: sample
                .tile
                .as_ref()
                .and_then(|tile| tile.samples().get(offset).copied()),
            validity: sample.validity,
        }
    }

    /// Schedule fetches for tiles without sampling them.
    pub fn prefetch(&self, indices: impl IntoIterator<Item = TileIndex>) -> usize {
        let id = self.generation.id();
        indices
            .into_iter()
            .filter(|&index| self.generation.cache().peek(index).is_none())
            .filter(|&index| {
                self.generation
                    .scheduler()
                    .enqueue(FetchRequest::new(index, id, Priority::PREFETCH))
                    == Admission::Queued
            })
            .count()
    }

    /// Receiver of tile-ready notifications. Poll it with `try_recv`.
    pub fn subscribe(&self) -> broadcast::Receiver<TileReady> {
        self.generation.subscribe()
    }
}

impl std::fmt::Debug for VolatileTileView {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VolatileTileView")
            .field("generation", &self.generation.id())
            .finish()
    }
}
