//! Configuration module for the Visio gateway
//!
//! Server configuration comes from environment variables (optionally seeded from a
//! `.env` file) and an optional YAML file. Priority: YAML > ENV vars > .env values > defaults.
//!
//! # Modules
//! - `yaml`: YAML configuration file loading
//! - `env`: Environment variable loading
//!
//! # Example
//! ```rust,no_run
//! use visio_gateway::config::ServerConfig;
//! use std::path::PathBuf;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // Load from environment variables only
//! let config = ServerConfig::from_env()?;
//!
//! // Load from YAML file with environment variable base
//! let config = ServerConfig::from_file(&PathBuf::from("config.yaml"))?;
//!
//! println!("Server listening on {}", config.address());
//! # Ok(())
//! # }
//! ```

use std::path::PathBuf;

mod env;
mod yaml;

use crate::core::realtime::OPENAI_REALTIME_URL;
use crate::errors::ConfigError;

pub use yaml::YamlConfig;

pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 8081;
pub const DEFAULT_RELAY_PATH: &str = "/";
pub const DEFAULT_REALTIME_MODEL: &str = "gpt-4o-realtime-preview-2024-10-01";
pub const DEFAULT_MISTRAL_BASE_URL: &str = "https://api.mistral.ai";
pub const DEFAULT_GOOGLE_PLACES_BASE_URL: &str = "https://places.googleapis.com";
pub const DEFAULT_BLAND_BASE_URL: &str = "https://us.api.bland.ai";
pub const DEFAULT_IMAGE_LOG_PATH: &str = "./server/imgs.txt";
pub const DEFAULT_DOCTOR_CALL_PREAMBLE: &str = "You are calling a doctor's office to make an appointment on behalf of the patient. \
Let the doctor know who you are calling for. You need to convey to this doctor the following information:\n\n\n";

/// Server configuration
///
/// Contains everything needed to run the gateway:
/// - Listener settings and endpoint paths
/// - Upstream realtime engine credentials and model
/// - Collaborator credentials (vision, places, outbound calling)
/// - Image intake and CORS settings
#[derive(Debug, Clone)]
pub struct ServerConfig {
    // Server settings
    pub host: String,
    pub port: u16,
    /// Only WebSocket path served by the relay; other paths are closed immediately.
    pub relay_path: String,
    /// Optional WebSocket path hosting a server-side `SessionDriver`.
    pub session_path: Option<String>,

    // Upstream realtime engine
    /// Required. Startup fails when empty.
    pub openai_api_key: String,
    pub openai_realtime_url: String,
    pub openai_realtime_model: String,
    /// Session instructions sent on connect. Falls back to the built-in prompt.
    pub session_instructions: Option<String>,

    // Collaborators
    pub mistral_api_key: Option<String>,
    pub mistral_base_url: String,
    pub google_maps_api_key: Option<String>,
    pub google_places_base_url: String,
    pub bland_api_key: Option<String>,
    pub bland_base_url: String,
    pub doctor_phone_number: Option<String>,
    pub doctor_call_preamble: String,

    // Image intake
    pub image_log_path: PathBuf,

    // Security configuration
    /// CORS allowed origins (comma-separated list or "*" for all)
    /// Default: None (same-origin only)
    pub cors_allowed_origins: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            relay_path: DEFAULT_RELAY_PATH.to_string(),
            session_path: None,
            openai_api_key: String::new(),
            openai_realtime_url: OPENAI_REALTIME_URL.to_string(),
            openai_realtime_model: DEFAULT_REALTIME_MODEL.to_string(),
            session_instructions: None,
            mistral_api_key: None,
            mistral_base_url: DEFAULT_MISTRAL_BASE_URL.to_string(),
            google_maps_api_key: None,
            google_places_base_url: DEFAULT_GOOGLE_PLACES_BASE_URL.to_string(),
            bland_api_key: None,
            bland_base_url: DEFAULT_BLAND_BASE_URL.to_string(),
            doctor_phone_number: None,
            doctor_call_preamble: DEFAULT_DOCTOR_CALL_PREAMBLE.to_string(),
            image_log_path: PathBuf::from(DEFAULT_IMAGE_LOG_PATH),
            cors_allowed_origins: None,
        }
    }
}

/// Zeroize secret fields when the configuration is dropped.
impl Drop for ServerConfig {
    fn drop(&mut self) {
        use zeroize::Zeroize;

        self.openai_api_key.zeroize();
        if let Some(ref mut key) = self.mistral_api_key {
            key.zeroize();
        }
        if let Some(ref mut key) = self.google_maps_api_key {
            key.zeroize();
        }
        if let Some(ref mut key) = self.bland_api_key {
            key.zeroize();
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables only.
    ///
    /// # Errors
    /// Returns `ConfigError::MissingCredential` when `OPENAI_API_KEY` is unset,
    /// or `ConfigError::InvalidValue` when a variable cannot be parsed.
    pub fn from_env() -> Result<Self, ConfigError> {
        let config = env::load_from_env()?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a YAML file with environment variable base
    ///
    /// Priority order (highest to lowest):
    /// 1. YAML file values
    /// 2. Environment variables (actual ENV vars override .env values)
    /// 3. .env file values (loaded in `main`)
    /// 4. Default values
    ///
    /// After merging, performs validation on the final configuration.
    pub fn from_file(path: &PathBuf) -> Result<Self, ConfigError> {
        let yaml_config = YamlConfig::from_file(path)?;

        let mut config = env::load_from_env()?;
        config.apply_yaml(yaml_config);
        config.validate()?;

        Ok(config)
    }

    /// Get the server address as "host:port"
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Instructions to send with the session update, falling back to the built-in prompt.
    pub fn instructions(&self) -> &str {
        self.session_instructions
            .as_deref()
            .unwrap_or(crate::core::tools::DEFAULT_INSTRUCTIONS)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.openai_api_key.trim().is_empty() {
            return Err(ConfigError::MissingCredential("OPENAI_API_KEY"));
        }
        if !self.relay_path.starts_with('/') {
            return Err(ConfigError::InvalidValue {
                name: "RELAY_PATH",
                reason: format!("\"{}\" must start with '/'", self.relay_path),
            });
        }
        if let Some(ref session_path) = self.session_path {
            if !session_path.starts_with('/') {
                return Err(ConfigError::InvalidValue {
                    name: "SESSION_PATH",
                    reason: format!("\"{session_path}\" must start with '/'"),
                });
            }
            if *session_path == self.relay_path {
                return Err(ConfigError::InvalidValue {
                    name: "SESSION_PATH",
                    reason: "must differ from RELAY_PATH".to_string(),
                });
            }
        }
        Ok(())
    }

    fn apply_yaml(&mut self, yaml: YamlConfig) {
        if let Some(server) = yaml.server {
            if let Some(host) = server.host {
                self.host = host;
            }
            if let Some(port) = server.port {
                self.port = port;
            }
            if let Some(relay_path) = server.relay_path {
                self.relay_path = relay_path;
            }
            if server.session_path.is_some() {
                self.session_path = server.session_path;
            }
        }

        if let Some(openai) = yaml.openai {
            if let Some(api_key) = openai.api_key {
                self.openai_api_key = api_key;
            }
            if let Some(url) = openai.realtime_url {
                self.openai_realtime_url = url;
            }
            if let Some(model) = openai.model {
                self.openai_realtime_model = model;
            }
            if openai.instructions.is_some() {
                self.session_instructions = openai.instructions;
            }
        }

        if let Some(providers) = yaml.providers {
            if providers.mistral_api_key.is_some() {
                self.mistral_api_key = providers.mistral_api_key;
            }
            if let Some(url) = providers.mistral_base_url {
                self.mistral_base_url = url;
            }
            if providers.google_maps_api_key.is_some() {
                self.google_maps_api_key = providers.google_maps_api_key;
            }
            if let Some(url) = providers.google_places_base_url {
                self.google_places_base_url = url;
            }
            if providers.bland_api_key.is_some() {
                self.bland_api_key = providers.bland_api_key;
            }
            if let Some(url) = providers.bland_base_url {
                self.bland_base_url = url;
            }
        }

        if let Some(doctor) = yaml.doctor {
            if doctor.phone_number.is_some() {
                self.doctor_phone_number = doctor.phone_number;
            }
            if let Some(preamble) = doctor.call_preamble {
                self.doctor_call_preamble = preamble;
            }
        }

        if let Some(uploads) = yaml.uploads
            && let Some(path) = uploads.image_log_path
        {
            self.image_log_path = PathBuf::from(path);
        }

        if let Some(security) = yaml.security
            && security.cors_allowed_origins.is_some()
        {
            self.cors_allowed_origins = security.cors_allowed_origins;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::env;
    use std::fs;
    use tempfile::TempDir;

    // Helper to clean up environment variables
    fn cleanup_env_vars() {
        unsafe {
            env::remove_var("HOST");
            env::remove_var("PORT");
            env::remove_var("RELAY_PATH");
            env::remove_var("SESSION_PATH");
            env::remove_var("OPENAI_API_KEY");
            env::remove_var("OPENAI_REALTIME_URL");
            env::remove_var("OPENAI_REALTIME_MODEL");
            env::remove_var("SESSION_INSTRUCTIONS");
            env::remove_var("MISTRAL_API_KEY");
            env::remove_var("GOOGLE_MAPS_API_KEY");
            env::remove_var("BLAND_API_KEY");
            env::remove_var("BLAND");
            env::remove_var("DOCTOR_PHONE_NUMBER");
            env::remove_var("IMAGE_LOG_PATH");
            env::remove_var("CORS_ALLOWED_ORIGINS");
        }
    }

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 8081);
        assert_eq!(config.relay_path, "/");
        assert!(config.session_path.is_none());
        assert_eq!(config.image_log_path, PathBuf::from("./server/imgs.txt"));
        assert_eq!(config.address(), "0.0.0.0:8081");
    }

    #[test]
    fn test_validate_requires_openai_key() {
        let config = ServerConfig::default();
        match config.validate() {
            Err(ConfigError::MissingCredential(name)) => assert_eq!(name, "OPENAI_API_KEY"),
            other => panic!("Expected MissingCredential, got {:?}", other),
        }
    }

    #[test]
    fn test_validate_rejects_session_path_equal_to_relay() {
        let mut config = ServerConfig::default();
        config.openai_api_key = "sk-test".to_string();
        config.session_path = Some("/".to_string());
        assert!(config.validate().is_err());

        config.session_path = Some("/session".to_string());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_instructions_fallback() {
        let mut config = ServerConfig::default();
        assert!(config.instructions().contains("Tool use: enabled."));

        config.session_instructions = Some("Be brief.".to_string());
        assert_eq!(config.instructions(), "Be brief.");
    }

    #[test]
    #[serial]
    fn test_from_env_missing_key() {
        cleanup_env_vars();

        let result = ServerConfig::from_env();
        assert!(matches!(result, Err(ConfigError::MissingCredential(_))));

        cleanup_env_vars();
    }

    #[test]
    #[serial]
    fn test_from_env_values() {
        cleanup_env_vars();

        unsafe {
            env::set_var("OPENAI_API_KEY", "sk-env");
            env::set_var("PORT", "9100");
            env::set_var("SESSION_PATH", "/session");
            env::set_var("BLAND", "legacy-bland-key");
        }

        let config = ServerConfig::from_env().unwrap();
        assert_eq!(config.openai_api_key, "sk-env");
        assert_eq!(config.port, 9100);
        assert_eq!(config.session_path.as_deref(), Some("/session"));
        assert_eq!(config.bland_api_key.as_deref(), Some("legacy-bland-key"));
        assert_eq!(config.openai_realtime_url, OPENAI_REALTIME_URL);

        cleanup_env_vars();
    }

    #[test]
    #[serial]
    fn test_from_env_invalid_port() {
        cleanup_env_vars();

        unsafe {
            env::set_var("OPENAI_API_KEY", "sk-env");
            env::set_var("PORT", "not-a-port");
        }

        let result = ServerConfig::from_env();
        assert!(matches!(
            result,
            Err(ConfigError::InvalidValue { name: "PORT", .. })
        ));

        cleanup_env_vars();
    }

    #[test]
    #[serial]
    fn test_from_file_yaml_overrides_env() {
        cleanup_env_vars();

        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.yaml");

        fs::write(
            &config_path,
            r#"
server:
  host: "127.0.0.1"
  port: 8080

openai:
  api_key: "sk-yaml"
"#,
        )
        .unwrap();

        unsafe {
            env::set_var("HOST", "10.0.0.1");
            env::set_var("OPENAI_API_KEY", "sk-env");
            env::set_var("MISTRAL_API_KEY", "mistral-env");
        }

        let config = ServerConfig::from_file(&config_path).unwrap();

        // YAML overrides ENV
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.port, 8080);
        assert_eq!(config.openai_api_key, "sk-yaml");
        // ENV value survives when YAML is silent
        assert_eq!(config.mistral_api_key.as_deref(), Some("mistral-env"));

        cleanup_env_vars();
    }

    #[test]
    #[serial]
    fn test_from_file_without_key_fails() {
        cleanup_env_vars();

        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.yaml");
        fs::write(&config_path, "server:\n  port: 9000\n").unwrap();

        let result = ServerConfig::from_file(&config_path);
        assert!(matches!(result, Err(ConfigError::MissingCredential(_))));

        cleanup_env_vars();
    }

    #[test]
    #[serial]
    fn test_from_file_missing_file() {
        cleanup_env_vars();

        let result = ServerConfig::from_file(&PathBuf::from("/nonexistent/config.yaml"));
        assert!(
            result
                .unwrap_err()
                .to_string()
                .contains("Failed to read config file")
        );

        cleanup_env_vars();
    }
}
