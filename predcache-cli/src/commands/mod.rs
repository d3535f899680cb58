//! CLI command implementations.
//!
//! - [`config`] - Configuration management (show, path, init)
//! - [`simulate`] - Drive a cache through rendering and retraining rounds

pub mod config;
pub mod simulate;
mod synthetic;
