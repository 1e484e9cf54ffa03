//! Outbound phone calls through Bland.ai.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::{CollaboratorError, check_status};

/// Longest call the agent may place, in minutes.
const MAX_CALL_MINUTES: u32 = 12;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallOutcome {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CallOutcome {
    fn rejected(error: impl Into<String>) -> Self {
        Self {
            success: false,
            message: None,
            error: Some(error.into()),
        }
    }
}

#[async_trait]
pub trait OutboundCaller: Send + Sync {
    /// Place a call to `phone_number` with `task` as the agent's brief.
    async fn place_call(&self, phone_number: &str, task: &str)
    -> Result<CallOutcome, CollaboratorError>;
}

#[derive(Debug, Default, Deserialize)]
struct BlandResponse {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    call_id: Option<String>,
}

pub struct BlandCaller {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl BlandCaller {
    pub fn new(client: reqwest::Client, base_url: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            api_key,
        }
    }

    fn call_body(phone_number: &str, task: &str) -> serde_json::Value {
        json!({
            "phone_number": phone_number,
            "from": null,
            "task": task,
            "model": "enhanced",
            "language": "en",
            "voice": "nat",
            "voice_settings": {},
            "pathway_id": null,
            "local_dialing": false,
            "max_duration": MAX_CALL_MINUTES,
            "answered_by_enabled": false,
            "wait_for_greeting": false,
            "record": false,
            "amd": false,
            "interruption_threshold": 100,
            "voicemail_message": null,
            "temperature": null,
            "transfer_phone_number": null,
            "transfer_list": {},
            "metadata": {},
            "pronunciation_guide": [],
            "start_time": null,
            "request_data": {},
            "tools": [],
            "dynamic_data": [],
            "analysis_preset": null,
            "analysis_schema": {},
            "webhook": null,
            "calendly": {},
        })
    }
}

#[async_trait]
impl OutboundCaller for BlandCaller {
    async fn place_call(
        &self,
        phone_number: &str,
        task: &str,
    ) -> Result<CallOutcome, CollaboratorError> {
        if phone_number.trim().is_empty() || task.trim().is_empty() {
            return Ok(CallOutcome::rejected("Subject & phone number is required"));
        }
        let api_key = self
            .api_key
            .as_deref()
            .ok_or(CollaboratorError::NotConfigured("BLAND_API_KEY"))?;

        let response = self
            .client
            .post(format!("{}/v1/calls", self.base_url))
            .header("Authorization", api_key)
            .json(&Self::call_body(phone_number, task))
            .send()
            .await?;
        let text = check_status(response).await?.text().await?;
        let body: BlandResponse = serde_json::from_str(&text).unwrap_or_default();

        if body.status.as_deref() == Some("error") {
            return Ok(CallOutcome::rejected(
                body.message.unwrap_or_else(|| "Call was rejected".to_string()),
            ));
        }

        tracing::info!(call_id = ?body.call_id, "Outbound call queued");
        Ok(CallOutcome {
            success: true,
            message: Some(
                body.message
                    .unwrap_or_else(|| "API request successful".to_string()),
            ),
            error: None,
        })
    }
}
