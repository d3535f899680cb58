//! User configuration file (`config.ini`).
//!
//! ```ini
//! [cache]
//! capacity = 1000
//! memory_budget = 512MB
//! write_policy = write-through
//!
//! [scheduler]
//! workers = 8
//! ```
//!
//! Missing files and missing keys fall back to defaults; malformed values are
//! reported as [`ConfigFileError::InvalidValue`].

mod file;
mod parser;
mod settings;
mod size;
mod writer;

pub use file::{config_directory, config_file_path, ConfigFileError};
pub use settings::{CacheSettings, ConfigFile, LoggingSettings};
pub use size::{format_size, parse_size, Size, SizeParseError};
