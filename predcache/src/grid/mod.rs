//! Tile grid over an n-dimensional volume.
//!
//! Partitions a volume into fixed-size, non-overlapping, axis-aligned tiles
//! and maps between linear tile indices and voxel coordinates. Tiles on the
//! upper boundary of an axis are clipped to the volume.

mod types;


pub use types::{GridError, TileBox, TileIndex};

/// Fixed partition of a volume into tiles.
///
/// Pure and immutable; shared between every generation of a controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TileGrid {
    dimensions: Vec<u64>,
    tile_shape: Vec<u32>,
    /// Number of tiles along each axis.
    grid_shape: Vec<u64>,
}

impl TileGrid {
    /// Create a grid.
    ///
    /// # Arguments
    ///
    /// * `dimensions` - Volume extent per axis
    /// * `tile_shape` - Tile size per axis
    ///
    /// # Errors
    ///
    /// `InvalidShape` when the axis counts differ, an axis is empty, or a
    /// tile size is zero.
    pub fn new(dimensions: Vec<u64>, tile_shape: Vec<u32>) -> Result<Self, GridError> {
        if dimensions.is_empty() {
            return Err(GridError::InvalidShape("no dimensions".to_string()));
        }
        if dimensions.len() != tile_shape.len() {
            return Err(GridError::InvalidShape(format!(
                "{} dimensions but {} tile sizes",
                dimensions.len(),
                tile_shape.len()
            )));
        }
        if let Some(axis) = dimensions.iter().position(|&d| d == 0) {
            return Err(GridError::InvalidShape(format!("axis {} is empty", axis)));
        }
        if let Some(axis) = tile_shape.iter().position(|&t| t == 0) {
            return Err(GridError::InvalidShape(format!(
                "tile size on axis {} is zero",
                axis
            )));
        }

        let grid_shape = dimensions
            .iter()
            .zip(&tile_shape)
            .map(|(&d, &t)| d.div_ceil(t as u64))
            .collect();

        Ok(Self {
            dimensions,
            tile_shape,
            grid_shape,
        })
    }

    /// Volume extent per axis.
    pub fn dimensions(&self) -> &[u64] {
        &self.dimensions
    }

    /// Nominal tile size per axis.
    pub fn tile_shape(&self) -> &[u32] {
        &self.tile_shape
    }

    /// Number of tiles along each axis.
    pub fn grid_shape(&self) -> &[u64] {
        &self.grid_shape
    }

    /// Number of axes.
    pub fn num_dimensions(&self) -> usize {
        self.dimensions.len()
    }

    /// Total number of tiles.
    pub fn tile_count(&self) -> u64 {
        self.grid_shape.iter().product()
    }

    /// Sample count of an unclipped tile; the largest any tile can hold.
    pub fn max_tile_samples(&self) -> usize {
        self.tile_shape.iter().map(|&t| t as usize).product()
    }

    /// Iterate every index of the grid in linear order.
    pub fn indices(&self) -> impl Iterator<Item = TileIndex> {
        (0..self.tile_count()).map(TileIndex)
    }

    /// Position of a tile in grid units (tile counts, not voxels).
    pub fn tile_position(&self, index: TileIndex) -> Result<Vec<u64>, GridError> {
        self.check_index(index)?;
        let mut rest = index.0;
        let position = self
            .grid_shape
            .iter()
            .map(|&n| {
                let p = rest % n;
                rest /= n;
                p
            })
            .collect();
        Ok(position)
    }

    /// Voxel box covered by a tile, clipped to the volume.
    pub fn tile_bounds(&self, index: TileIndex) -> Result<TileBox, GridError> {
        let position = self.tile_position(index)?;
        let mut origin = Vec::with_capacity(position.len());
        let mut extent = Vec::with_capacity(position.len());
        for (axis, p) in position.into_iter().enumerate() {
            let size = self.tile_shape[axis] as u64;
            let start = p * size;
            origin.push(start);
            extent.push(size.min(self.dimensions[axis] - start));
        }
        Ok(TileBox::new(origin, extent))
    }

    /// Number of samples held by a tile after boundary clipping.
    pub fn tile_sample_count(&self, index: TileIndex) -> Result<usize, GridError> {
        Ok(self.tile_bounds(index)?.voxel_count() as usize)
    }

    /// Index of the tile containing a voxel.
    ///
    /// # Errors
    ///
    /// `OutOfBounds` if the coordinate lies outside the volume or has the
    /// wrong number of axes.
    pub fn index_of(&self, coordinate: &[u64]) -> Result<TileIndex, GridError> {
        if !self.contains(coordinate) {
            return Err(GridError::OutOfBounds {
                coordinate: coordinate.to_vec(),
                dimensions: self.dimensions.clone(),
            });
        }
        let position: Vec<u64> = coordinate
            .iter()
            .zip(&self.tile_shape)
            .map(|(&c, &t)| c / t as u64)
            .collect();
        Ok(self.linearize(&position))
    }

    /// Offset of a voxel inside its tile's buffer.
    ///
    /// Buffers are laid out with axis 0 varying fastest, matching the tile
    /// linearization.
    pub fn offset_in_tile(&self, coordinate: &[u64]) -> Result<(TileIndex, usize), GridError> {
        let index = self.index_of(coordinate)?;
        let bounds = self.tile_bounds(index)?;
        let mut offset = 0u64;
        let mut stride = 1u64;
        for axis in 0..self.num_dimensions() {
            offset += (coordinate[axis] - bounds.origin[axis]) * stride;
            stride *= bounds.extent[axis];
        }
        Ok((index, offset as usize))
    }

    /// Whether a voxel coordinate lies inside the volume.
    pub fn contains(&self, coordinate: &[u64]) -> bool {
        coordinate.len() == self.dimensions.len()
            && coordinate
                .iter()
                .zip(&self.dimensions)
                .all(|(c, d)| c < d)
    }

    /// All tiles sharing at least one voxel with `region`, in linear order.
    ///
    /// The region is clipped to the volume first; a region entirely outside
    /// yields an empty list.
    pub fn tiles_intersecting(&self, region: &TileBox) -> Vec<TileIndex> {
        if region.num_dimensions() != self.num_dimensions() || region.voxel_count() == 0 {
            return Vec::new();
        }

        let mut first = Vec::with_capacity(self.num_dimensions());
        let mut last = Vec::with_capacity(self.num_dimensions());
        for axis in 0..self.num_dimensions() {
            let lo = region.origin[axis];
            if lo >= self.dimensions[axis] {
                return Vec::new();
            }
            let hi = lo
                .saturating_add(region.extent[axis])
                .min(self.dimensions[axis])
                - 1;
            let size = self.tile_shape[axis] as u64;
            first.push(lo / size);
            last.push(hi / size);
        }

        let mut tiles = Vec::new();
        let mut cursor = first.clone();
        loop {
            tiles.push(self.linearize(&cursor));
            // Odometer increment, axis 0 fastest.
            let mut axis = 0;
            loop {
                if axis == cursor.len() {
                    tiles.sort();
                    return tiles;
                }
                if cursor[axis] < last[axis] {
                    cursor[axis] += 1;
                    break;
                }
                cursor[axis] = first[axis];
                axis += 1;
            }
        }
    }

    fn linearize(&self, position: &[u64]) -> TileIndex {
        let mut index = 0u64;
        let mut stride = 1u64;
        for (p, n) in position.iter().zip(&self.grid_shape) {
            index += p * stride;
            stride *= n;
        }
        TileIndex(index)
    }

    fn check_index(&self, index: TileIndex) -> Result<(), GridError> {
        let count = self.tile_count();
        if index.0 >= count {
            return Err(GridError::IndexOutOfRange { index, count });
        }
        Ok(())
    }
}
