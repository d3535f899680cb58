//! INI serialization: `ConfigFile` → commented INI text.

use std::path::Path;

use super::settings::ConfigFile;
use super::size::format_size;

/// Render a `ConfigFile` as the commented INI written to `config.ini`.
pub(super) fn to_config_string(config: &ConfigFile) -> String {
    let memory_budget = config
        .cache
        .memory_budget
        .map(format_size)
        .unwrap_or_default();

    format!(
        r#"[cache]
; Maximum number of prediction tiles kept in memory
capacity = {capacity}
; Memory budget (e.g. 512MB, 2GB); overrides capacity when set
memory_budget = {memory_budget}
; When computed tiles are written to disk:
;   write-through - immediately after computation (default)
;   write-back    - when evicted from memory
write_policy = {write_policy}
; Label reported for voxels outside the image
background_label = {background_label}

[disk]
; Parent directory of the per-training-round tile directories
directory = {disk_directory}
; Name prefix of those directories
prefix = {prefix}

[scheduler]
; Number of background fetch threads
workers = {workers}
; Backoff after a failed fetch, doubled per consecutive failure
retry_base_ms = {retry_base_ms}
retry_max_ms = {retry_max_ms}

[logging]
directory = {log_directory}
file = {log_file}
"#,
        capacity = config.cache.capacity,
        memory_budget = memory_budget,
        write_policy = config.cache.write_policy,
        background_label = config.cache.background_label,
        disk_directory = path_to_string(&config.disk.directory),
        prefix = config.disk.prefix,
        workers = config.scheduler.workers,
        retry_base_ms = config.scheduler.retry.base_delay.as_millis(),
        retry_max_ms = config.scheduler.retry.max_delay.as_millis(),
        log_directory = path_to_string(&config.logging.directory),
        log_file = config.logging.file,
    )
}

fn path_to_string(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_contains_all_sections() {
        let text = to_config_string(&ConfigFile::default());
        for section in ["[cache]", "[disk]", "[scheduler]", "[logging]"] {
            assert!(text.contains(section), "missing {section}");
        }
        assert!(text.contains("write_policy = write-through"));
        assert!(text.contains("memory_budget = \n"));
    }

    #[test]
    fn test_memory_budget_formatted() {
        let mut config = ConfigFile::default();
        config.cache.memory_budget = Some(2 * 1024 * 1024 * 1024);
        assert!(to_config_string(&config).contains("memory_budget = 2GB"));
    }
}
