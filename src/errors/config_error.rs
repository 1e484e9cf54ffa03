use thiserror::Error;

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A credential the server cannot start without is absent.
    #[error("Environment variable \"{0}\" is required. Please set it in your .env file.")]
    MissingCredential(&'static str),

    #[error("Invalid value for {name}: {reason}")]
    InvalidValue { name: &'static str, reason: String },

    #[error("Failed to read config file {path}: {reason}")]
    Read { path: String, reason: String },

    #[error("Failed to parse YAML config: {0}")]
    Parse(String),
}
