//! INI parsing: `Ini` → `ConfigFile`.
//!
//! The single place where INI key names are mapped to struct fields.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use ini::{Ini, Properties};

use super::file::ConfigFileError;
use super::settings::ConfigFile;
use super::size::parse_size;
use crate::cache::WritePolicy;
use crate::classify::Sample;

/// Parse an `Ini` into a `ConfigFile`, overlaying values on the defaults.
pub(super) fn parse_ini(ini: &Ini) -> Result<ConfigFile, ConfigFileError> {
    let mut config = ConfigFile::default();

    if let Some(section) = ini.section(Some("cache")) {
        if let Some(v) = number::<usize>(section, "cache", "capacity")? {
            if v == 0 {
                return Err(ConfigFileError::invalid(
                    "cache",
                    "capacity",
                    "0",
                    "must hold at least one tile",
                ));
            }
            config.cache.capacity = v;
        }
        if let Some(v) = non_empty(section, "memory_budget") {
            let bytes = parse_size(v).map_err(|e| {
                ConfigFileError::invalid("cache", "memory_budget", v, e.to_string())
            })?;
            config.cache.memory_budget = Some(bytes);
        }
        if let Some(v) = non_empty(section, "write_policy") {
            config.cache.write_policy = WritePolicy::from_str(v)
                .map_err(|reason| ConfigFileError::invalid("cache", "write_policy", v, reason))?;
        }
        if let Some(v) = number::<Sample>(section, "cache", "background_label")? {
            config.cache.background_label = v;
        }
    }

    if let Some(section) = ini.section(Some("disk")) {
        if let Some(v) = non_empty(section, "directory") {
            config.disk.directory = expand_tilde(v);
        }
        if let Some(v) = section.get("prefix") {
            config.disk.prefix = v.trim().to_string();
        }
    }

    if let Some(section) = ini.section(Some("scheduler")) {
        if let Some(v) = number::<usize>(section, "scheduler", "workers")? {
            config.scheduler.workers = v.max(1);
        }
        if let Some(v) = number::<u64>(section, "scheduler", "retry_base_ms")? {
            config.scheduler.retry.base_delay = Duration::from_millis(v);
        }
        if let Some(v) = number::<u64>(section, "scheduler", "retry_max_ms")? {
            config.scheduler.retry.max_delay = Duration::from_millis(v);
        }
        if config.scheduler.retry.max_delay < config.scheduler.retry.base_delay {
            return Err(ConfigFileError::invalid(
                "scheduler",
                "retry_max_ms",
                &config.scheduler.retry.max_delay.as_millis().to_string(),
                "must not be smaller than retry_base_ms",
            ));
        }
    }

    if let Some(section) = ini.section(Some("logging")) {
        if let Some(v) = non_empty(section, "directory") {
            config.logging.directory = expand_tilde(v);
        }
        if let Some(v) = non_empty(section, "file") {
            config.logging.file = v.to_string();
        }
    }

    Ok(config)
}

fn non_empty<'a>(section: &'a Properties, key: &str) -> Option<&'a str> {
    section.get(key).map(str::trim).filter(|v| !v.is_empty())
}

fn number<T: FromStr>(
    section: &Properties,
    section_name: &str,
    key: &str,
) -> Result<Option<T>, ConfigFileError> {
    non_empty(section, key)
        .map(|v| {
            v.parse::<T>().map_err(|_| {
                ConfigFileError::invalid(section_name, key, v, "expected a whole number")
            })
        })
        .transpose()
}

/// Expand a leading `~` to the home directory.
fn expand_tilde(path: &str) -> PathBuf {
    match (path.strip_prefix("~/"), dirs::home_dir()) {
        (Some(rest), Some(home)) => home.join(rest),
        _ if path == "~" => dirs::home_dir().unwrap_or_else(|| PathBuf::from(path)),
        _ => PathBuf::from(path),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(content: &str) -> Result<ConfigFile, ConfigFileError> {
        ConfigFile::from_ini_str(content)
    }

    #[test]
    fn test_empty_input_gives_defaults() {
        assert_eq!(parse("").unwrap(), ConfigFile::default());
    }

    #[test]
    fn test_cache_section() {
        let config = parse(
            "[cache]\ncapacity = 42\nmemory_budget = 64MB\nwrite_policy = write-back\nbackground_label = -2\n",
        )
        .unwrap();
        assert_eq!(config.cache.capacity, 42);
        assert_eq!(config.cache.memory_budget, Some(64 * 1024 * 1024));
        assert_eq!(config.cache.write_policy, WritePolicy::WriteBack);
        assert_eq!(config.cache.background_label, -2);
    }

    #[test]
    fn test_blank_values_keep_defaults() {
        let config = parse("[cache]\nmemory_budget =\ncapacity = \n").unwrap();
        assert_eq!(config.cache, ConfigFile::default().cache);
    }

    #[test]
    fn test_scheduler_section() {
        let config =
            parse("[scheduler]\nworkers = 6\nretry_base_ms = 10\nretry_max_ms = 80\n").unwrap();
        assert_eq!(config.scheduler.workers, 6);
        assert_eq!(config.scheduler.retry.base_delay, Duration::from_millis(10));
        assert_eq!(config.scheduler.retry.max_delay, Duration::from_millis(80));
    }

    #[test]
    fn test_disk_directory_tilde() {
        let config = parse("[disk]\ndirectory = ~/tiles\nprefix = run-\n").unwrap();
        if let Some(home) = dirs::home_dir() {
            assert_eq!(config.disk.directory, home.join("tiles"));
        }
        assert_eq!(config.disk.prefix, "run-");
    }

    #[test]
    fn test_invalid_values() {
        for (content, key) in [
            ("[cache]\ncapacity = 0\n", "capacity"),
            ("[cache]\nmemory_budget = huge\n", "memory_budget"),
            ("[cache]\nwrite_policy = lazy\n", "write_policy"),
            ("[cache]\nbackground_label = 70000\n", "background_label"),
            ("[scheduler]\nretry_base_ms = 500\nretry_max_ms = 100\n", "retry_max_ms"),
        ] {
            match parse(content) {
                Err(ConfigFileError::InvalidValue { key: k, .. }) => assert_eq!(k, key),
                other => panic!("{content:?}: expected InvalidValue, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_expand_tilde_plain_path() {
        assert_eq!(expand_tilde("/var/tmp"), PathBuf::from("/var/tmp"));
    }
}
