//! Image analysis backed by Mistral's Pixtral chat completions.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::{CollaboratorError, check_status};

/// Vision model used for camera frames.
pub const PIXTRAL_MODEL: &str = "pixtral-12b";

/// Result of analysing one image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VisionAnalysis {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[async_trait]
pub trait VisionAnalyzer: Send + Sync {
    /// Ask `prompt` about the image at `image_url` (usually a data URL).
    async fn analyze(&self, image_url: &str, prompt: &str)
    -> Result<VisionAnalysis, CollaboratorError>;
}

#[derive(Debug, Deserialize)]
struct ChatCompletion {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

pub struct MistralVision {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl MistralVision {
    pub fn new(client: reqwest::Client, base_url: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            api_key,
        }
    }
}

#[async_trait]
impl VisionAnalyzer for MistralVision {
    async fn analyze(
        &self,
        image_url: &str,
        prompt: &str,
    ) -> Result<VisionAnalysis, CollaboratorError> {
        if image_url.is_empty() {
            return Ok(VisionAnalysis {
                success: false,
                response: None,
                error: Some("Image URL is required".to_string()),
            });
        }
        let api_key = self
            .api_key
            .as_deref()
            .ok_or(CollaboratorError::NotConfigured("MISTRAL_API_KEY"))?;

        let body = json!({
            "model": PIXTRAL_MODEL,
            "messages": [{
                "role": "user",
                "content": [
                    {"type": "text", "text": prompt},
                    {"type": "image_url", "image_url": image_url},
                ],
            }],
        });

        let response = self
            .client
            .post(format!("{}/v1/chat/completions", self.base_url))
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .await?;
        let completion: ChatCompletion = check_status(response).await?.json().await?;

        let content = completion
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_else(|| "empty content".to_string());
        tracing::debug!("Vision analysis: {}", content);

        Ok(VisionAnalysis {
            success: true,
            response: Some(content),
            error: None,
        })
    }
}
