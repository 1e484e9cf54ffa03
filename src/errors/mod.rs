//! Error types shared across the gateway.
//!
//! - `app_error`: errors surfaced to HTTP clients (JSON body + status code)
//! - `config_error`: failures while loading or validating `ServerConfig`

pub mod app_error;
pub mod config_error;

pub use app_error::{AppError, AppResult};
pub use config_error::ConfigError;
