//! Settings structs mirroring the sections of `config.ini`.

use std::path::PathBuf;

use crate::cache::{
    CacheConfig, DiskCacheConfig, MemoryCacheConfig, WritePolicy, DEFAULT_BACKGROUND_LABEL,
    DEFAULT_MEMORY_CAPACITY,
};
use crate::classify::Sample;
use crate::grid::TileGrid;
use crate::logging::{default_log_dir, DEFAULT_LOG_FILE};
use crate::scheduler::SchedulerConfig;

/// Top-level configuration file contents.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ConfigFile {
    pub cache: CacheSettings,
    pub disk: DiskCacheConfig,
    pub scheduler: SchedulerConfig,
    pub logging: LoggingSettings,
}

/// `[cache]` section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheSettings {
    /// Resident tile limit, used when no memory budget is given.
    pub capacity: usize,
    /// Byte budget for the memory tier; overrides `capacity` when set.
    pub memory_budget: Option<usize>,
    pub write_policy: WritePolicy,
    pub background_label: Sample,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_MEMORY_CAPACITY,
            memory_budget: None,
            write_policy: WritePolicy::default(),
            background_label: DEFAULT_BACKGROUND_LABEL,
        }
    }
}

/// `[logging]` section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingSettings {
    pub directory: PathBuf,
    pub file: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            directory: default_log_dir(),
            file: DEFAULT_LOG_FILE.to_string(),
        }
    }
}

impl ConfigFile {
    /// Resolve into the configuration of a cache over `grid`.
    pub fn cache_config(&self, grid: &TileGrid) -> CacheConfig {
        let memory = match self.cache.memory_budget {
            Some(bytes) => MemoryCacheConfig::for_budget(bytes, grid),
            None => MemoryCacheConfig {
                capacity: self.cache.capacity,
            },
        };
        CacheConfig {
            memory,
            disk: self.disk.clone(),
            scheduler: self.scheduler.clone(),
            write_policy: self.cache.write_policy,
            background_label: self.cache.background_label,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_cache_defaults() {
        let config = ConfigFile::default();
        let grid = TileGrid::new(vec![100, 100], vec![10, 10]).unwrap();
        let resolved = config.cache_config(&grid);
        let defaults = CacheConfig::default();

        assert_eq!(resolved.memory, defaults.memory);
        assert_eq!(resolved.disk, defaults.disk);
        assert_eq!(resolved.write_policy, defaults.write_policy);
        assert_eq!(resolved.background_label, defaults.background_label);
    }

    #[test]
    fn test_memory_budget_overrides_capacity() {
        let mut config = ConfigFile::default();
        config.cache.capacity = 7;
        config.cache.memory_budget = Some(10 * 200);
        let grid = TileGrid::new(vec![100, 100], vec![10, 10]).unwrap();
        assert_eq!(config.cache_config(&grid).memory.capacity, 10);

        config.cache.memory_budget = None;
        assert_eq!(config.cache_config(&grid).memory.capacity, 7);
    }
}
