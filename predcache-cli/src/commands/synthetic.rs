//! Synthetic raw data and classifiers used by `predcache simulate`.

use std::time::Duration;

use predcache::classify::{ClassificationError, Classifier, RawBlock, RawDataSource, Sample};
use predcache::grid::TileBox;

/// Two-channel volume: smooth concentric bands plus per-voxel hash noise.
pub struct SyntheticVolume {
    dimensions: Vec<u64>,
}

impl SyntheticVolume {
    pub fn new(dimensions: Vec<u64>) -> Self {
        Self { dimensions }
    }

    fn voxel(&self, position: &[u64]) -> [f32; 2] {
        let mut radius = 0.0f32;
        for (axis, &coordinate) in position.iter().enumerate() {
            let centre = self.dimensions[axis] as f32 / 2.0;
            let d = (coordinate as f32 - centre) / centre.max(1.0);
            radius += d * d;
        }
        let bands = (radius.sqrt() * 12.0).sin() * 0.5 + 0.5;
        [bands, noise(position)]
    }
}

/// Deterministic value in `[0, 1)` derived from the voxel position.
fn noise(position: &[u64]) -> f32 {
    let mut h: u64 = 0x9e37_79b9_7f4a_7c15;
    for &coordinate in position {
        h ^= coordinate.wrapping_add(0x9e37_79b9).wrapping_add(h << 6).wrapping_add(h >> 2);
        h = h.wrapping_mul(0xbf58_476d_1ce4_e5b9);
    }
    (h >> 40) as f32 / (1u64 << 24) as f32
}

impl RawDataSource for SyntheticVolume {
    fn read_block(&self, bounds: &TileBox) -> Result<RawBlock, ClassificationError> {
        let voxels = bounds.voxel_count() as usize;
        let mut data = Vec::with_capacity(voxels * 2);
        let mut position = bounds.origin.clone();
        for _ in 0..voxels {
            data.extend_from_slice(&self.voxel(&position));
            // Axis 0 varies fastest
            for axis in 0..position.len() {
                position[axis] += 1;
                if position[axis] < bounds.origin[axis] + bounds.extent[axis] {
                    break;
                }
                position[axis] = bounds.origin[axis];
            }
        }
        Ok(RawBlock {
            bounds: bounds.clone(),
            channels: 2,
            data,
        })
    }
}

/// Labels voxels by how many thresholds their noisy intensity exceeds.
///
/// Each training round yields a classifier with shifted thresholds, so
/// consecutive generations produce visibly different tiles.
pub struct ThresholdClassifier {
    round: u32,
    thresholds: Vec<f32>,
    noise_weight: f32,
    cost: Duration,
}

impl ThresholdClassifier {
    pub fn for_round(round: u32, labels: u16, cost: Duration) -> Self {
        let labels = labels.max(2);
        let shift = (round as f32 * 0.07).fract() / labels as f32;
        let thresholds = (1..labels)
            .map(|i| i as f32 / labels as f32 + shift)
            .collect();
        Self {
            round,
            thresholds,
            noise_weight: 0.15,
            cost,
        }
    }
}

impl Classifier for ThresholdClassifier {
    fn classify(&self, block: &RawBlock) -> Result<Vec<Sample>, ClassificationError> {
        if block.channels != 2 {
            return Err(ClassificationError::Classifier(format!(
                "expected 2 channels, got {}",
                block.channels
            )));
        }
        if !self.cost.is_zero() {
            std::thread::sleep(self.cost);
        }
        Ok((0..block.voxel_count())
            .map(|offset| {
                let voxel = block.voxel(offset);
                let value = voxel[0] * (1.0 - self.noise_weight) + voxel[1] * self.noise_weight;
                self.thresholds.iter().filter(|t| value >= **t).count() as Sample
            })
            .collect())
    }

    fn describe(&self) -> String {
        format!("threshold(round={}, labels={})", self.round, self.thresholds.len() + 1)
    }
}
