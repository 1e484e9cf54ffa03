//! Tools the model can invoke mid-conversation.
//!
//! A [`ToolRegistry`] is built per session before connecting and handed to a
//! [`ToolDispatcher`]. The dispatcher is the failure boundary: unknown
//! names, bad arguments, handler errors and handler panics all come back as
//! a structured `{"error": ...}` outcome so the live session is never torn
//! down by a misbehaving tool.

pub mod calls;
pub mod camera;
pub mod memory;
pub mod places;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use thiserror::Error;

use crate::core::collaborators::{CollaboratorError, OutboundCaller, PlacesSearch, VisionAnalyzer};
use crate::core::realtime::FunctionDefinition;

pub use calls::{CallNumberTool, DoctorAppointmentTool};
pub use camera::{CameraFeed, FrameSlot, LookThroughWebcamTool};
pub use memory::{MemoryStore, SetMemoryTool};
pub use places::{FindPlacesTool, PlacesLog};

/// Instructions sent to the engine when none are configured.
pub const DEFAULT_INSTRUCTIONS: &str = "System settings:
Tool use: enabled.

Instructions:
- You are an artificial intelligence agent responsible for helping the user get checked for their health.
- Please make sure to respond with a helpful voice via audio
- Be kind, helpful, and courteous
- It is okay to ask the user questions
- Use tools and functions you have available liberally
- Be open to exploration and conversation
- Whenever you feel like you need to look at the user do not hesitate to use the webcam tool.
- If the webcam tool returns an error, tell the user you are taking a look and wait for the result.
- Before you make any calls, ask for a bunch of symptoms.
- If the person is feeling unwell suggest setting an appointment.
- If the user wants to call a number for any purpose even unrelated to health you are obligated to do so.

Personality:
- Be upbeat and genuine
- Try speaking quickly as if excited
";

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("Tool \"{0}\" has not been added")]
    UnknownTool(String),

    #[error("Tool \"{0}\" is already registered")]
    Duplicate(String),

    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),

    #[error("{0}")]
    Failed(String),

    #[error("Tool \"{0}\" panicked")]
    Panicked(String),
}

impl From<CollaboratorError> for ToolError {
    fn from(e: CollaboratorError) -> Self {
        ToolError::Failed(e.to_string())
    }
}

/// Name, description and JSON-Schema parameters of a tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

impl ToolDefinition {
    pub fn new(name: &str, description: &str, parameters: Value) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            parameters,
        }
    }
}

impl From<&ToolDefinition> for FunctionDefinition {
    fn from(def: &ToolDefinition) -> Self {
        FunctionDefinition {
            name: def.name.clone(),
            description: def.description.clone(),
            parameters: def.parameters.clone(),
        }
    }
}

/// Which session a call was requested in.
///
/// Handlers that write session state pass `epoch` along so a call that
/// outlives its session cannot touch the next one.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ToolContext {
    pub epoch: u64,
}

#[async_trait]
pub trait ToolHandler: Send + Sync {
    fn definition(&self) -> ToolDefinition;

    /// Run the tool. The returned JSON is sent to the model verbatim.
    async fn call(&self, args: Value, ctx: ToolContext) -> Result<Value, ToolError>;
}

/// Deserialize tool arguments into a typed struct.
pub fn parse_args<T: DeserializeOwned>(args: Value) -> Result<T, ToolError> {
    serde_json::from_value(args).map_err(|e| ToolError::InvalidArguments(e.to_string()))
}

/// Tools available to one session, in registration order.
#[derive(Default)]
pub struct ToolRegistry {
    order: Vec<String>,
    handlers: HashMap<String, Arc<dyn ToolHandler>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, handler: Arc<dyn ToolHandler>) -> Result<(), ToolError> {
        let name = handler.definition().name;
        if self.handlers.contains_key(&name) {
            return Err(ToolError::Duplicate(name));
        }
        self.order.push(name.clone());
        self.handlers.insert(name, handler);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn ToolHandler>> {
        self.handlers.get(name).cloned()
    }

    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.order
            .iter()
            .filter_map(|name| self.handlers.get(name))
            .map(|h| h.definition())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

/// A tool invocation requested by the model.
#[derive(Debug, Clone)]
pub struct ToolCall {
    /// Upstream `call_id`, used to correlate the output
    pub call_id: String,
    pub name: String,
    /// Raw JSON argument string as sent by the engine
    pub arguments: String,
}

/// What a dispatched call produced.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolOutcome {
    Success(Value),
    Failure(String),
}

impl ToolOutcome {
    pub fn is_error(&self) -> bool {
        matches!(self, ToolOutcome::Failure(_))
    }

    pub fn to_json(&self) -> Value {
        match self {
            ToolOutcome::Success(v) => v.clone(),
            ToolOutcome::Failure(e) => json!({ "error": e }),
        }
    }

    /// Serialized form sent back as `function_call_output`.
    pub fn to_output(&self) -> String {
        self.to_json().to_string()
    }
}

impl From<Result<Value, ToolError>> for ToolOutcome {
    fn from(result: Result<Value, ToolError>) -> Self {
        match result {
            Ok(v) => ToolOutcome::Success(v),
            Err(e) => ToolOutcome::Failure(e.to_string()),
        }
    }
}

/// Invokes registered tools, isolating their failures.
#[derive(Clone)]
pub struct ToolDispatcher {
    registry: Arc<ToolRegistry>,
}

impl ToolDispatcher {
    pub fn new(registry: ToolRegistry) -> Self {
        Self {
            registry: Arc::new(registry),
        }
    }

    /// Function definitions advertised to the engine.
    pub fn function_definitions(&self) -> Vec<FunctionDefinition> {
        self.registry
            .definitions()
            .iter()
            .map(FunctionDefinition::from)
            .collect()
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    pub async fn dispatch(&self, call: &ToolCall) -> ToolOutcome {
        self.dispatch_in(call, ToolContext::default()).await
    }

    /// Dispatch on behalf of the session identified by `ctx`.
    pub async fn dispatch_in(&self, call: &ToolCall, ctx: ToolContext) -> ToolOutcome {
        let Some(handler) = self.registry.get(&call.name) else {
            tracing::warn!("Model requested unknown tool: {}", call.name);
            return Err(ToolError::UnknownTool(call.name.clone())).into();
        };

        let args = if call.arguments.trim().is_empty() {
            json!({})
        } else {
            match serde_json::from_str::<Value>(&call.arguments) {
                Ok(v) => v,
                Err(e) => {
                    tracing::warn!("Unparsable arguments for {}: {}", call.name, e);
                    return Err(ToolError::InvalidArguments(e.to_string())).into();
                }
            }
        };

        tracing::info!(tool = %call.name, call_id = %call.call_id, "Dispatching tool call");

        // Run on its own task so a panicking handler is contained.
        let task = tokio::spawn(async move { handler.call(args, ctx).await });
        let outcome: ToolOutcome = match task.await {
            Ok(result) => result.into(),
            Err(e) if e.is_panic() => {
                tracing::error!("Tool {} panicked", call.name);
                Err(ToolError::Panicked(call.name.clone())).into()
            }
            Err(e) => Err(ToolError::Failed(e.to_string())).into(),
        };

        if let ToolOutcome::Failure(ref e) = outcome {
            tracing::warn!(tool = %call.name, "Tool call failed: {}", e);
        }
        outcome
    }
}

/// Services the built-in tools delegate to.
#[derive(Clone)]
pub struct ToolServices {
    pub vision: Arc<dyn VisionAnalyzer>,
    pub places: Arc<dyn PlacesSearch>,
    pub caller: Arc<dyn OutboundCaller>,
    pub doctor_phone_number: Option<String>,
    pub doctor_call_preamble: String,
}

/// Per-session state mutated by the built-in tools.
#[derive(Clone, Default)]
pub struct SessionToolState {
    pub memory: MemoryStore,
    pub frames: Arc<FrameSlot>,
    pub places: PlacesLog,
}

impl SessionToolState {
    /// Forget everything from the previous session and accept writes only
    /// from calls made in `epoch`.
    pub fn reset(&self, epoch: u64) {
        self.memory.reset(epoch);
        self.places.reset(epoch);
        self.frames.clear();
    }
}

/// Registry with every built-in tool bound to one session's state.
pub fn builtin_registry(
    state: &SessionToolState,
    services: &ToolServices,
) -> Result<ToolRegistry, ToolError> {
    let mut registry = ToolRegistry::new();
    registry.register(Arc::new(SetMemoryTool::new(state.memory.clone())))?;
    registry.register(Arc::new(LookThroughWebcamTool::new(
        state.frames.clone(),
        services.vision.clone(),
    )))?;
    registry.register(Arc::new(FindPlacesTool::new(
        services.places.clone(),
        state.places.clone(),
    )))?;
    registry.register(Arc::new(CallNumberTool::new(services.caller.clone())))?;
    registry.register(Arc::new(DoctorAppointmentTool::new(
        services.caller.clone(),
        services.doctor_phone_number.clone(),
        services.doctor_call_preamble.clone(),
    )))?;
    Ok(registry)
}
