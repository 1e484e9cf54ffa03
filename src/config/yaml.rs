use serde::Deserialize;
use std::path::PathBuf;

use crate::errors::ConfigError;

/// Complete YAML configuration structure
///
/// All fields are optional to allow partial configuration. Values present here
/// override the environment.
///
/// # Example YAML structure
/// ```yaml
/// server:
///   host: "0.0.0.0"
///   port: 8081
///   relay_path: "/"
///   session_path: "/session"
///
/// openai:
///   api_key: "sk-..."
///   realtime_url: "wss://api.openai.com/v1/realtime"
///   model: "gpt-4o-realtime-preview-2024-10-01"
///   instructions: "You are a helpful health assistant."
///
/// providers:
///   mistral_api_key: "your-mistral-key"
///   google_maps_api_key: "your-maps-key"
///   bland_api_key: "your-bland-key"
///
/// doctor:
///   phone_number: "+15555550100"
///   call_preamble: "You are calling a doctor's office..."
///
/// uploads:
///   image_log_path: "./server/imgs.txt"
///
/// security:
///   cors_allowed_origins: "*"
/// ```
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct YamlConfig {
    pub server: Option<ServerYaml>,
    pub openai: Option<OpenAIYaml>,
    pub providers: Option<ProvidersYaml>,
    pub doctor: Option<DoctorYaml>,
    pub uploads: Option<UploadsYaml>,
    pub security: Option<SecurityYaml>,
}

/// Server configuration from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct ServerYaml {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub relay_path: Option<String>,
    pub session_path: Option<String>,
}

/// Upstream realtime engine settings from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct OpenAIYaml {
    pub api_key: Option<String>,
    pub realtime_url: Option<String>,
    pub model: Option<String>,
    pub instructions: Option<String>,
}

/// Collaborator credentials and endpoints from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct ProvidersYaml {
    pub mistral_api_key: Option<String>,
    pub mistral_base_url: Option<String>,
    pub google_maps_api_key: Option<String>,
    pub google_places_base_url: Option<String>,
    pub bland_api_key: Option<String>,
    pub bland_base_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct DoctorYaml {
    pub phone_number: Option<String>,
    pub call_preamble: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct UploadsYaml {
    pub image_log_path: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct SecurityYaml {
    pub cors_allowed_origins: Option<String>,
}

impl YamlConfig {
    /// Load YAML configuration from a file
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or the YAML is malformed.
    pub fn from_file(path: &PathBuf) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;

        let config: YamlConfig =
            serde_yaml::from_str(&contents).map_err(|e| ConfigError::Parse(e.to_string()))?;

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_yaml_config_full() {
        let yaml = r#"
server:
  host: "127.0.0.1"
  port: 9000
  relay_path: "/relay"
  session_path: "/session"

openai:
  api_key: "sk-yaml"
  model: "gpt-4o-mini-realtime-preview"

providers:
  mistral_api_key: "mistral-key"
  bland_base_url: "http://localhost:9999"

doctor:
  phone_number: "+15555550100"

uploads:
  image_log_path: "/tmp/imgs.txt"

security:
  cors_allowed_origins: "*"
"#;
        let config: YamlConfig = serde_yaml::from_str(yaml).unwrap();

        let server = config.server.unwrap();
        assert_eq!(server.host.as_deref(), Some("127.0.0.1"));
        assert_eq!(server.port, Some(9000));
        assert_eq!(server.relay_path.as_deref(), Some("/relay"));
        assert_eq!(server.session_path.as_deref(), Some("/session"));

        let openai = config.openai.unwrap();
        assert_eq!(openai.api_key.as_deref(), Some("sk-yaml"));
        assert!(openai.realtime_url.is_none());

        let providers = config.providers.unwrap();
        assert_eq!(providers.mistral_api_key.as_deref(), Some("mistral-key"));
        assert_eq!(
            providers.bland_base_url.as_deref(),
            Some("http://localhost:9999")
        );
        assert!(providers.google_maps_api_key.is_none());

        assert_eq!(
            config.doctor.unwrap().phone_number.as_deref(),
            Some("+15555550100")
        );
        assert_eq!(
            config.uploads.unwrap().image_log_path.as_deref(),
            Some("/tmp/imgs.txt")
        );
        assert_eq!(
            config.security.unwrap().cors_allowed_origins.as_deref(),
            Some("*")
        );
    }

    #[test]
    fn test_yaml_config_empty() {
        let config: YamlConfig = serde_yaml::from_str("{}").unwrap();
        assert!(config.server.is_none());
        assert!(config.openai.is_none());
        assert!(config.providers.is_none());
    }

    #[test]
    fn test_from_file() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.yaml");

        fs::write(
            &config_path,
            r#"
server:
  host: "localhost"
  port: 3000
"#,
        )
        .unwrap();

        let config = YamlConfig::from_file(&config_path).unwrap();
        let server = config.server.unwrap();
        assert_eq!(server.host, Some("localhost".to_string()));
        assert_eq!(server.port, Some(3000));
    }

    #[test]
    fn test_from_file_not_found() {
        let path = PathBuf::from("/nonexistent/config.yaml");
        let result = YamlConfig::from_file(&path);

        assert!(
            result
                .unwrap_err()
                .to_string()
                .contains("Failed to read config file")
        );
    }

    #[test]
    fn test_from_file_invalid_yaml() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("invalid.yaml");
        fs::write(&config_path, "invalid: yaml: content:").unwrap();

        let result = YamlConfig::from_file(&config_path);

        assert!(
            result
                .unwrap_err()
                .to_string()
                .contains("Failed to parse YAML")
        );
    }
}
