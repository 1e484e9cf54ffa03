//! HTTP clients for the external services tools delegate to.
//!
//! Each collaborator is a trait so tools can be exercised against in-process
//! fakes; the production implementations are thin `reqwest` clients with a
//! configurable base URL.

pub mod calling;
pub mod places;
pub mod vision;

use thiserror::Error;

pub use calling::{BlandCaller, CallOutcome, OutboundCaller};
pub use places::{GooglePlaces, Place, PlacesSearch, filter_places};
pub use vision::{MistralVision, VisionAnalysis, VisionAnalyzer};

#[derive(Debug, Error)]
pub enum CollaboratorError {
    #[error("{0} is not configured")]
    NotConfigured(&'static str),

    #[error("Request failed: {0}")]
    Network(String),

    #[error("HTTP Error: {status}")]
    Http { status: u16, body: String },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

impl From<reqwest::Error> for CollaboratorError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            CollaboratorError::InvalidResponse(e.to_string())
        } else {
            CollaboratorError::Network(e.to_string())
        }
    }
}

/// Turn a non-2xx response into [`CollaboratorError::Http`].
pub(crate) async fn check_status(
    response: reqwest::Response,
) -> Result<reqwest::Response, CollaboratorError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    tracing::warn!("Collaborator returned {}: {}", status, body);
    Err(CollaboratorError::Http {
        status: status.as_u16(),
        body,
    })
}
