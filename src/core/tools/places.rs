//! `find_places`: place search with a per-session running list.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::{Value, json};

use super::{ToolContext, ToolDefinition, ToolError, ToolHandler, parse_args};
use crate::core::collaborators::{Place, PlacesSearch};

#[derive(Default)]
struct PlacesInner {
    epoch: u64,
    places: Vec<Place>,
}

/// Every place found during the session, in discovery order.
#[derive(Clone, Default)]
pub struct PlacesLog {
    inner: Arc<Mutex<PlacesInner>>,
}

impl PlacesLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append results of a search made in `epoch`; stale results are
    /// dropped and `false` returned.
    pub fn extend_in(&self, epoch: u64, found: &[Place]) -> bool {
        let mut inner = self.inner.lock();
        if inner.epoch != epoch {
            return false;
        }
        inner.places.extend_from_slice(found);
        true
    }

    pub fn snapshot(&self) -> Vec<Place> {
        self.inner.lock().places.clone()
    }

    pub fn reset(&self, epoch: u64) {
        let mut inner = self.inner.lock();
        inner.places.clear();
        inner.epoch = epoch;
    }
}

#[derive(Deserialize)]
struct FindPlacesArgs {
    query: String,
}

pub struct FindPlacesTool {
    search: Arc<dyn PlacesSearch>,
    log: PlacesLog,
}

impl FindPlacesTool {
    pub fn new(search: Arc<dyn PlacesSearch>, log: PlacesLog) -> Self {
        Self { search, log }
    }
}

#[async_trait]
impl ToolHandler for FindPlacesTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition::new(
            "find_places",
            "Finds places based on the user's query, such as \"Hospitals in Paris\" or \"Restaurants near me.\"",
            json!({
                "type": "object",
                "properties": {
                    "query": {
                        "type": "string",
                        "description": "A text query to search for places, such as 'Hospitals in Paris', 'Restaurants near me', etc."
                    }
                },
                "required": ["query"]
            }),
        )
    }

    async fn call(&self, args: Value, ctx: ToolContext) -> Result<Value, ToolError> {
        let FindPlacesArgs { query } = parse_args(args)?;
        let places = self.search.search(&query).await?;
        if !self.log.extend_in(ctx.epoch, &places) {
            tracing::debug!("Session ended during place search, results not kept");
        }

        if places.is_empty() {
            return Ok(json!({ "error": "No places found." }));
        }
        Ok(json!({ "result": places }))
    }
}
