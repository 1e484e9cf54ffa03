//! Environment variable loading.

use std::env;
use std::path::PathBuf;

use super::{
    DEFAULT_BLAND_BASE_URL, DEFAULT_DOCTOR_CALL_PREAMBLE, DEFAULT_GOOGLE_PLACES_BASE_URL,
    DEFAULT_HOST, DEFAULT_IMAGE_LOG_PATH, DEFAULT_MISTRAL_BASE_URL, DEFAULT_PORT,
    DEFAULT_REALTIME_MODEL, DEFAULT_RELAY_PATH, ServerConfig,
};
use crate::core::realtime::OPENAI_REALTIME_URL;
use crate::errors::ConfigError;

fn var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn var_or(name: &str, default: &str) -> String {
    var(name).unwrap_or_else(|| default.to_string())
}

/// Build a `ServerConfig` from environment variables, falling back to defaults.
///
/// Does not validate required credentials; callers run validation after
/// any YAML overrides are applied.
pub(super) fn load_from_env() -> Result<ServerConfig, ConfigError> {
    let port = match var("PORT") {
        Some(raw) => raw.trim().parse::<u16>().map_err(|e| ConfigError::InvalidValue {
            name: "PORT",
            reason: e.to_string(),
        })?,
        None => DEFAULT_PORT,
    };

    Ok(ServerConfig {
        host: var_or("HOST", DEFAULT_HOST),
        port,
        relay_path: var_or("RELAY_PATH", DEFAULT_RELAY_PATH),
        session_path: var("SESSION_PATH"),
        openai_api_key: var("OPENAI_API_KEY").unwrap_or_default(),
        openai_realtime_url: var_or("OPENAI_REALTIME_URL", OPENAI_REALTIME_URL),
        openai_realtime_model: var_or("OPENAI_REALTIME_MODEL", DEFAULT_REALTIME_MODEL),
        session_instructions: var("SESSION_INSTRUCTIONS"),
        mistral_api_key: var("MISTRAL_API_KEY"),
        mistral_base_url: var_or("MISTRAL_BASE_URL", DEFAULT_MISTRAL_BASE_URL),
        google_maps_api_key: var("GOOGLE_MAPS_API_KEY"),
        google_places_base_url: var_or("GOOGLE_PLACES_BASE_URL", DEFAULT_GOOGLE_PLACES_BASE_URL),
        bland_api_key: var("BLAND_API_KEY").or_else(|| var("BLAND")),
        bland_base_url: var_or("BLAND_BASE_URL", DEFAULT_BLAND_BASE_URL),
        doctor_phone_number: var("DOCTOR_PHONE_NUMBER"),
        doctor_call_preamble: var_or("DOCTOR_CALL_PREAMBLE", DEFAULT_DOCTOR_CALL_PREAMBLE),
        image_log_path: PathBuf::from(var_or("IMAGE_LOG_PATH", DEFAULT_IMAGE_LOG_PATH)),
        cors_allowed_origins: var("CORS_ALLOWED_ORIGINS"),
    })
}
