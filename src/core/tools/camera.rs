//! `look_through_webcam` and the camera frame register it reads from.
//!
//! The browser pushes frames as fast as it likes into [`CameraFeed`]; a
//! sampler task copies the newest one into the tool's [`FrameSlot`] every
//! [`FRAME_SAMPLE_PERIOD`]. Both are single slots, last write wins.

use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwapOption;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::task::JoinHandle;

use super::{ToolContext, ToolDefinition, ToolError, ToolHandler, parse_args};
use crate::core::collaborators::VisionAnalyzer;

pub const FRAME_SAMPLE_PERIOD: Duration = Duration::from_millis(500);

/// Holds at most one image, usually a `data:` URL.
#[derive(Default)]
pub struct FrameSlot {
    frame: ArcSwapOption<String>,
}

impl FrameSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn store(&self, frame: impl Into<String>) {
        self.frame.store(Some(Arc::new(frame.into())));
    }

    pub fn latest(&self) -> Option<Arc<String>> {
        self.frame.load_full()
    }

    pub fn take(&self) -> Option<Arc<String>> {
        self.frame.swap(None)
    }

    pub fn clear(&self) {
        self.frame.store(None);
    }
}

/// Incoming camera frames plus the periodic sampler feeding the tool slot.
pub struct CameraFeed {
    incoming: Arc<FrameSlot>,
    sampled: Arc<FrameSlot>,
}

impl CameraFeed {
    pub fn new(sampled: Arc<FrameSlot>) -> Self {
        Self {
            incoming: Arc::new(FrameSlot::new()),
            sampled,
        }
    }

    pub fn push(&self, frame: impl Into<String>) {
        self.incoming.store(frame);
    }

    pub fn spawn_sampler(&self) -> JoinHandle<()> {
        self.spawn_sampler_every(FRAME_SAMPLE_PERIOD)
    }

    pub fn spawn_sampler_every(&self, period: Duration) -> JoinHandle<()> {
        let incoming = self.incoming.clone();
        let sampled = self.sampled.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                ticker.tick().await;
                if let Some(frame) = incoming.take() {
                    sampled.frame.store(Some(frame));
                }
            }
        })
    }
}

#[derive(Deserialize)]
struct WebcamArgs {
    prompt: String,
}

pub struct LookThroughWebcamTool {
    frames: Arc<FrameSlot>,
    vision: Arc<dyn VisionAnalyzer>,
}

impl LookThroughWebcamTool {
    pub fn new(frames: Arc<FrameSlot>, vision: Arc<dyn VisionAnalyzer>) -> Self {
        Self { frames, vision }
    }
}

#[async_trait]
impl ToolHandler for LookThroughWebcamTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition::new(
            "look_through_webcam",
            "Allows you to look through the user's webcam. You give a prompt to ask what you want to look for through the user's webcam.",
            json!({
                "type": "object",
                "properties": {
                    "prompt": {
                        "type": "string",
                        "description": "What you want to look for."
                    }
                },
                "required": ["prompt"]
            }),
        )
    }

    async fn call(&self, args: Value, _ctx: ToolContext) -> Result<Value, ToolError> {
        let WebcamArgs { prompt } = parse_args(args)?;
        let frame = self
            .frames
            .latest()
            .ok_or_else(|| ToolError::Failed("No image available for analysis.".to_string()))?;

        let analysis = self.vision.analyze(&frame, &prompt).await?;
        match analysis.response {
            Some(response) if analysis.success => Ok(json!({ "result": response })),
            _ => Ok(json!({
                "error": analysis
                    .error
                    .unwrap_or_else(|| "Unknown error occurred.".to_string())
            })),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::collaborators::{CollaboratorError, VisionAnalysis};
    use parking_lot::Mutex;

    #[derive(Default)]
    struct RecordingVision {
        seen: Mutex<Vec<(String, String)>>,
    }

    #[async_trait]
    impl VisionAnalyzer for RecordingVision {
        async fn analyze(
            &self,
            image_url: &str,
            prompt: &str,
        ) -> Result<VisionAnalysis, CollaboratorError> {
            self.seen
                .lock()
                .push((image_url.to_string(), prompt.to_string()));
            Ok(VisionAnalysis {
                success: true,
                response: Some("A smiling person".to_string()),
                error: None,
            })
        }
    }

    #[tokio::test]
    async fn test_no_frame_fails_immediately() {
        let vision = Arc::new(RecordingVision::default());
        let tool = LookThroughWebcamTool::new(Arc::new(FrameSlot::new()), vision.clone());

        match tool.call(json!({"prompt": "anything"}), ToolContext::default()).await {
            Err(ToolError::Failed(msg)) => assert_eq!(msg, "No image available for analysis."),
            other => panic!("Expected Failed, got {:?}", other),
        }
        assert!(vision.seen.lock().is_empty());
    }

    #[tokio::test]
    async fn test_uses_latest_frame() {
        let slot = Arc::new(FrameSlot::new());
        slot.store("data:image/jpeg;base64,old");
        slot.store("data:image/jpeg;base64,new");
        let vision = Arc::new(RecordingVision::default());
        let tool = LookThroughWebcamTool::new(slot, vision.clone());

        let result = tool
            .call(json!({"prompt": "Is the user smiling?"}), ToolContext::default())
            .await
            .unwrap();
        assert_eq!(result, json!({"result": "A smiling person"}));
        assert_eq!(
            vision.seen.lock()[0],
            (
                "data:image/jpeg;base64,new".to_string(),
                "Is the user smiling?".to_string()
            )
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_sampler_copies_newest_frame() {
        let sampled = Arc::new(FrameSlot::new());
        let feed = CameraFeed::new(sampled.clone());
        let sampler = feed.spawn_sampler();

        feed.push("a");
        feed.push("b");
        tokio::time::sleep(FRAME_SAMPLE_PERIOD + Duration::from_millis(1)).await;
        assert_eq!(sampled.latest().as_deref().map(String::as_str), Some("b"));

        sampler.abort();
    }
}
