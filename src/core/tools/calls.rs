//! `call_number` and `make_doctor_appointment`.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};

use super::{ToolContext, ToolDefinition, ToolError, ToolHandler, parse_args};
use crate::core::collaborators::{CallOutcome, CollaboratorError, OutboundCaller};

fn outcome_to_json(outcome: CallOutcome) -> Value {
    match outcome.message {
        Some(message) if outcome.success => json!({ "result": message }),
        _ => json!({
            "error": outcome
                .error
                .unwrap_or_else(|| "Unknown error occurred.".to_string())
        }),
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CallNumberArgs {
    subject: String,
    phone_number: String,
}

pub struct CallNumberTool {
    caller: Arc<dyn OutboundCaller>,
}

impl CallNumberTool {
    pub fn new(caller: Arc<dyn OutboundCaller>) -> Self {
        Self { caller }
    }
}

#[async_trait]
impl ToolHandler for CallNumberTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition::new(
            "call_number",
            "Launches a call with a provided number and prompt. Do not use to call doctors.",
            json!({
                "type": "object",
                "properties": {
                    "subject": {
                        "type": "string",
                        "description": "The reason you are making this call. Be very specific."
                    },
                    "phoneNumber": {
                        "type": "string",
                        "description": "The full international phone number you are calling."
                    }
                },
                "required": ["subject", "phoneNumber"]
            }),
        )
    }

    async fn call(&self, args: Value, _ctx: ToolContext) -> Result<Value, ToolError> {
        let CallNumberArgs {
            subject,
            phone_number,
        } = parse_args(args)?;
        let outcome = self.caller.place_call(&phone_number, &subject).await?;
        Ok(outcome_to_json(outcome))
    }
}

#[derive(Deserialize)]
struct AppointmentArgs {
    subject: String,
}

/// Calls the configured doctor's number on the user's behalf.
pub struct DoctorAppointmentTool {
    caller: Arc<dyn OutboundCaller>,
    doctor_phone_number: Option<String>,
    preamble: String,
}

impl DoctorAppointmentTool {
    pub fn new(
        caller: Arc<dyn OutboundCaller>,
        doctor_phone_number: Option<String>,
        preamble: String,
    ) -> Self {
        Self {
            caller,
            doctor_phone_number,
            preamble,
        }
    }
}

#[async_trait]
impl ToolHandler for DoctorAppointmentTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition::new(
            "make_doctor_appointment",
            "Launches a call with a doctor to take an appointment.",
            json!({
                "type": "object",
                "properties": {
                    "subject": {
                        "type": "string",
                        "description": "Why you are calling a doctor. Be very specific. Give as much information as possible. Feel free to include every little detail of the conversation youve had."
                    }
                },
                "required": ["subject"]
            }),
        )
    }

    async fn call(&self, args: Value, _ctx: ToolContext) -> Result<Value, ToolError> {
        let AppointmentArgs { subject } = parse_args(args)?;
        let number = self
            .doctor_phone_number
            .as_deref()
            .filter(|n| !n.is_empty())
            .ok_or(CollaboratorError::NotConfigured("DOCTOR_PHONE_NUMBER"))?;

        let task = format!("{}{}", self.preamble, subject);
        let outcome = self.caller.place_call(number, &task).await?;
        Ok(outcome_to_json(outcome))
    }
}
