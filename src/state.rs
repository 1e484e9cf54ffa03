use std::sync::Arc;

use crate::config::ServerConfig;
use crate::core::collaborators::{
    BlandCaller, GooglePlaces, MistralVision, OutboundCaller, PlacesSearch, VisionAnalyzer,
};
use crate::core::realtime::{FunctionDefinition, RealtimeConfig, UpstreamEndpoint};
use crate::core::tools::ToolServices;

/// Process-wide state shared by every handler.
///
/// Holds only immutable configuration and stateless clients; all mutable
/// state lives inside the per-connection tasks.
pub struct AppState {
    pub config: ServerConfig,
    pub http_client: reqwest::Client,
    pub vision: Arc<dyn VisionAnalyzer>,
    pub places: Arc<dyn PlacesSearch>,
    pub caller: Arc<dyn OutboundCaller>,
}

impl AppState {
    pub fn new(config: ServerConfig) -> Arc<Self> {
        let http_client = reqwest::Client::new();

        let vision = Arc::new(MistralVision::new(
            http_client.clone(),
            config.mistral_base_url.clone(),
            config.mistral_api_key.clone(),
        ));
        let places = Arc::new(GooglePlaces::new(
            http_client.clone(),
            config.google_places_base_url.clone(),
            config.google_maps_api_key.clone(),
        ));
        let caller = Arc::new(BlandCaller::new(
            http_client.clone(),
            config.bland_base_url.clone(),
            config.bland_api_key.clone(),
        ));

        Arc::new(Self {
            config,
            http_client,
            vision,
            places,
            caller,
        })
    }

    /// Upstream endpoint for a fresh relay connection.
    pub fn upstream_endpoint(&self) -> UpstreamEndpoint {
        UpstreamEndpoint {
            url: self.config.openai_realtime_url.clone(),
            model: self.config.openai_realtime_model.clone(),
            api_key: self.config.openai_api_key.clone(),
        }
    }

    /// Realtime client configuration for a driven session.
    pub fn realtime_config(&self, tools: Vec<FunctionDefinition>) -> RealtimeConfig {
        RealtimeConfig {
            api_key: self.config.openai_api_key.clone(),
            url: self.config.openai_realtime_url.clone(),
            model: self.config.openai_realtime_model.clone(),
            instructions: Some(self.config.instructions().to_string()),
            tools,
            ..Default::default()
        }
    }

    pub fn tool_services(&self) -> ToolServices {
        ToolServices {
            vision: self.vision.clone(),
            places: self.places.clone(),
            caller: self.caller.clone(),
            doctor_phone_number: self.config.doctor_phone_number.clone(),
            doctor_call_preamble: self.config.doctor_call_preamble.clone(),
        }
    }
}
