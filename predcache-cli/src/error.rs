//! CLI error handling with user-friendly messages.
//!
//! Centralizes error handling for the CLI, providing consistent formatting
//! and appropriate exit codes.

use std::fmt;
use std::process;

use predcache::config::ConfigFileError;
use predcache::controller::ControllerError;
use predcache::grid::GridError;

/// CLI-specific errors with user-friendly messages.
#[derive(Debug)]
pub enum CliError {
    /// Failed to initialize logging
    LoggingInit(std::io::Error),
    /// Configuration file could not be read or written
    Config(ConfigFileError),
    /// Volume or tile shape rejected
    Volume(GridError),
    /// The cache controller reported an error
    Cache(ControllerError),
    /// Argument combination not usable
    Usage(String),
}

impl CliError {
    /// Exit the process with an appropriate error message and code.
    pub fn exit(&self) -> ! {
        eprintln!("Error: {}", self);

        match self {
            CliError::Config(ConfigFileError::InvalidValue { .. }) => {
                eprintln!();
                eprintln!("Run 'predcache config show' to see the effective settings,");
                eprintln!("or 'predcache config init --force' to rewrite the defaults.");
            }
            CliError::Volume(_) => {
                eprintln!();
                eprintln!("Shapes are given as WIDTHxHEIGHT[xDEPTH], e.g. 256x256x64.");
            }
            _ => {}
        }

        process::exit(1)
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CliError::LoggingInit(e) => write!(f, "Failed to initialize logging: {}", e),
            CliError::Config(e) => write!(f, "Configuration error: {}", e),
            CliError::Volume(e) => write!(f, "Invalid volume: {}", e),
            CliError::Cache(e) => write!(f, "Cache error: {}", e),
            CliError::Usage(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for CliError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CliError::LoggingInit(e) => Some(e),
            CliError::Config(e) => Some(e),
            CliError::Volume(e) => Some(e),
            CliError::Cache(e) => Some(e),
            CliError::Usage(_) => None,
        }
    }
}

impl From<ConfigFileError> for CliError {
    fn from(e: ConfigFileError) -> Self {
        CliError::Config(e)
    }
}

impl From<GridError> for CliError {
    fn from(e: GridError) -> Self {
        CliError::Volume(e)
    }
}

impl From<ControllerError> for CliError {
    fn from(e: ControllerError) -> Self {
        CliError::Cache(e)
    }
}
