//! `predcache simulate`: a renderer sweeping a synthetic volume while the
//! classifier is retrained between rounds.
//!
//! Each frame samples the tiles under a moving viewport without blocking and
//! reports how many were valid. After every round a new classifier is
//! installed, so the next frames start over with pending tiles while the old
//! generation drains and is disposed in the background.

use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use clap::Args;
use predcache::cache::{Validity, WritePolicy};
use predcache::config::{config_file_path, format_size, ConfigFile};
use predcache::controller::PredictionCacheController;
use predcache::grid::{TileBox, TileGrid};
use predcache::logging::init_logging;
use tracing::info;

use super::synthetic::{SyntheticVolume, ThresholdClassifier};
use crate::error::CliError;

/// Arguments for `predcache simulate`.
#[derive(Debug, Args)]
pub struct SimulateArgs {
    /// Volume dimensions, e.g. 256x256x32
    #[arg(long, default_value = "256x256x32", value_parser = parse_shape::<u64>)]
    volume: Shape<u64>,

    /// Tile shape, e.g. 32x32x8
    #[arg(long, default_value = "32x32x8", value_parser = parse_shape::<u32>)]
    tile: Shape<u32>,

    /// Number of training rounds
    #[arg(long, default_value = "3")]
    rounds: u32,

    /// Frames rendered per round
    #[arg(long, default_value = "120")]
    frames: u32,

    /// Milliseconds between frames
    #[arg(long, default_value = "16")]
    frame_ms: u64,

    /// Simulated classifier cost per tile, in milliseconds
    #[arg(long, default_value = "4")]
    cost_ms: u64,

    /// Number of distinct labels the classifier emits
    #[arg(long, default_value = "4")]
    labels: u16,

    /// Report every Nth round as a failed training instead of installing it
    #[arg(long)]
    fail_every: Option<u32>,

    /// Override the number of fetch workers
    #[arg(long)]
    workers: Option<usize>,

    /// Override the memory tier capacity (tiles)
    #[arg(long)]
    capacity: Option<usize>,

    /// Override the write policy
    #[arg(long)]
    write_policy: Option<WritePolicy>,
}

/// Extents along each axis, parsed from `AxBxC`.
#[derive(Debug, Clone, PartialEq)]
struct Shape<T>(Vec<T>);

/// Per-round frame counts.
#[derive(Debug, Default)]
struct RoundReport {
    valid: u64,
    pending: u64,
    invalid: u64,
    first_complete_frame: Option<u32>,
}

impl RoundReport {
    fn valid_ratio(&self) -> f64 {
        let total = self.valid + self.pending + self.invalid;
        if total == 0 {
            0.0
        } else {
            self.valid as f64 / total as f64
        }
    }
}

/// Run the simulation with configuration from `config_path` or the default
/// location.
pub fn run(args: SimulateArgs, config_path: Option<PathBuf>) -> Result<(), CliError> {
    let config_path = config_path.unwrap_or_else(config_file_path);
    let mut file = ConfigFile::load_from(&config_path)?;
    if let Some(capacity) = args.capacity {
        file.cache.capacity = capacity;
        file.cache.memory_budget = None;
    }
    if let Some(policy) = args.write_policy {
        file.cache.write_policy = policy;
    }
    if let Some(workers) = args.workers {
        file.scheduler.workers = workers.max(1);
    }

    let _logging = init_logging(&file.logging.directory, &file.logging.file)
        .map_err(CliError::LoggingInit)?;

    if args.volume.0.len() != args.tile.0.len() {
        return Err(CliError::Usage(format!(
            "--volume has {} dimensions but --tile has {}",
            args.volume.0.len(),
            args.tile.0.len()
        )));
    }
    let grid = TileGrid::new(args.volume.0.clone(), args.tile.0.clone())?;
    let config = file.cache_config(&grid);

    println!(
        "Volume {:?}, tiles {:?}: {} tiles",
        grid.dimensions(),
        grid.tile_shape(),
        grid.tile_count()
    );
    println!(
        "Memory tier {} tiles ({}), {} workers, {}",
        config.memory.capacity,
        format_size(config.memory.capacity * grid.max_tile_samples() * 2),
        config.scheduler.workers,
        config.write_policy,
    );
    println!("Disk tier under {}", config.disk.directory.display());
    println!();

    let source = Arc::new(SyntheticVolume::new(args.volume.0.clone()));
    let controller = PredictionCacheController::new(grid, source, config);
    let viewport = viewport_extent(&args.volume.0);

    for round in 1..=args.rounds {
        let cost = Duration::from_millis(args.cost_ms);
        if args.fail_every.is_some_and(|n| n > 0 && round % n == 0) {
            controller.on_training_failed(&format!("round {} produced no classifier", round));
            println!("Round {}: training failed, keeping {:?}", round, controller.current_id());
        } else {
            let classifier = ThresholdClassifier::for_round(round, args.labels, cost);
            let id = controller.on_training_succeeded(Arc::new(classifier))?;
            println!("Round {}: installed generation {}", round, id);
        }

        let report = render_round(&controller, &args, &viewport);
        print_round(&controller, &report, args.frames);
    }

    let started = Instant::now();
    controller.dispose();
    info!(elapsed_ms = started.elapsed().as_millis() as u64, "Simulation finished");
    println!("Disposed all generations in {:?}", started.elapsed());
    Ok(())
}

/// Sweep the viewport along axis 0 and back, sampling once per frame.
fn render_round(
    controller: &PredictionCacheController,
    args: &SimulateArgs,
    viewport: &[u64],
) -> RoundReport {
    let mut report = RoundReport::default();
    let volume = &args.volume.0;
    let travel = volume[0].saturating_sub(viewport[0]);
    let frame = Duration::from_millis(args.frame_ms);

    for i in 0..args.frames {
        let phase = i as f64 / args.frames.max(1) as f64;
        let sweep = 1.0 - (2.0 * phase - 1.0).abs();
        let mut origin: Vec<u64> = volume
            .iter()
            .zip(viewport)
            .map(|(size, extent)| (size - extent) / 2)
            .collect();
        origin[0] = (travel as f64 * sweep).round() as u64;

        let samples = controller.sample_region(&TileBox::new(origin, viewport.to_vec()));
        let mut complete = true;
        for sample in &samples {
            match sample.validity {
                Validity::Valid => report.valid += 1,
                Validity::Pending => {
                    report.pending += 1;
                    complete = false;
                }
                Validity::Invalid => {
                    report.invalid += 1;
                    complete = false;
                }
            }
        }
        if complete && report.first_complete_frame.is_none() {
            report.first_complete_frame = Some(i);
        }
        thread::sleep(frame);
    }
    report
}

fn print_round(controller: &PredictionCacheController, report: &RoundReport, frames: u32) {
    println!(
        "  tiles sampled: {} valid, {} pending, {} invalid ({:.1}% valid)",
        report.valid,
        report.pending,
        report.invalid,
        report.valid_ratio() * 100.0
    );
    match report.first_complete_frame {
        Some(frame) => println!("  viewport fully resolved at frame {}/{}", frame, frames),
        None => println!("  viewport never fully resolved"),
    }

    if let Some(generation) = controller.current() {
        let cache = generation.cache_stats();
        let scheduler = generation.scheduler_stats();
        println!(
            "  memory: {} hits, {} misses, {} evictions ({:.1}% hit rate)",
            cache.memory_hits,
            cache.memory_misses,
            cache.memory_evictions,
            cache.memory_hit_rate() * 100.0
        );
        println!(
            "  disk: {} hits, {} writes, {} write failures; {} computed",
            cache.disk_hits, cache.disk_writes, cache.disk_write_failures, cache.computations
        );
        println!(
            "  fetches: {} queued, {} duplicate, {} completed, {} failed",
            scheduler.enqueued, scheduler.duplicates, scheduler.completed, scheduler.failed
        );
    }
    println!("  retirements pending: {}", controller.pending_retirements());
    println!();
}

/// Viewport covering half the volume along each axis, at least one voxel.
fn viewport_extent(volume: &[u64]) -> Vec<u64> {
    volume.iter().map(|size| (size / 2).max(1)).collect()
}

/// Parse `AxBxC` into its components.
fn parse_shape<T: std::str::FromStr>(s: &str) -> Result<Shape<T>, String> {
    let parts: Result<Vec<T>, _> = s
        .split(['x', 'X'])
        .map(|part| part.trim().parse::<T>())
        .collect();
    match parts {
        Ok(parts) if !parts.is_empty() => Ok(Shape(parts)),
        _ => Err(format!("'{}' is not a shape like 256x256x32", s)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_shape() {
        assert_eq!(parse_shape::<u64>("256x128x8").unwrap(), Shape(vec![256, 128, 8]));
        assert_eq!(parse_shape::<u32>("16X16").unwrap(), Shape(vec![16, 16]));
        assert!(parse_shape::<u64>("16x").is_err());
        assert!(parse_shape::<u64>("abc").is_err());
    }

    #[test]
    fn test_viewport_extent() {
        assert_eq!(viewport_extent(&[256, 1, 9]), vec![128, 1, 4]);
    }

    #[test]
    fn test_valid_ratio() {
        let report = RoundReport {
            valid: 3,
            pending: 1,
            ..Default::default()
        };
        assert!((report.valid_ratio() - 0.75).abs() < f64::EPSILON);
        assert_eq!(RoundReport::default().valid_ratio(), 0.0);
    }
}
