//! Place search backed by Google Places `places:searchText`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::{CollaboratorError, check_status};

const FIELD_MASK: &str =
    "places.id,places.displayName,places.formattedAddress,places.internationalPhoneNumber";

/// A callable place.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Place {
    pub id: String,
    pub name: String,
    pub address: String,
    pub phone: String,
}

#[async_trait]
pub trait PlacesSearch: Send + Sync {
    /// Search places by free text. Only places with an international phone
    /// number are returned.
    async fn search(&self, query: &str) -> Result<Vec<Place>, CollaboratorError>;
}

#[derive(Debug, Default, Deserialize)]
pub struct SearchTextResponse {
    #[serde(default)]
    pub places: Vec<RawPlace>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawPlace {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub display_name: Option<DisplayName>,
    #[serde(default)]
    pub formatted_address: Option<String>,
    #[serde(default)]
    pub international_phone_number: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DisplayName {
    pub text: String,
}

/// Keep only places that can be called.
pub fn filter_places(raw: Vec<RawPlace>) -> Vec<Place> {
    raw.into_iter()
        .filter_map(|p| {
            let phone = p.international_phone_number.filter(|n| !n.is_empty())?;
            Some(Place {
                id: p.id,
                name: p.display_name.map(|d| d.text).unwrap_or_default(),
                address: p.formatted_address.unwrap_or_default(),
                phone,
            })
        })
        .collect()
}

pub struct GooglePlaces {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl GooglePlaces {
    pub fn new(client: reqwest::Client, base_url: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            api_key,
        }
    }
}

#[async_trait]
impl PlacesSearch for GooglePlaces {
    async fn search(&self, query: &str) -> Result<Vec<Place>, CollaboratorError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or(CollaboratorError::NotConfigured("GOOGLE_MAPS_API_KEY"))?;

        let response = self
            .client
            .post(format!("{}/v1/places:searchText", self.base_url))
            .header("X-Goog-Api-Key", api_key)
            .header("X-Goog-FieldMask", FIELD_MASK)
            .json(&json!({"textQuery": query, "languageCode": "en"}))
            .send()
            .await?;
        let data: SearchTextResponse = check_status(response).await?.json().await?;

        let total = data.places.len();
        let places = filter_places(data.places);
        tracing::debug!(
            "Places search '{}': {} results, {} with phone",
            query,
            total,
            places.len()
        );
        Ok(places)
    }
}
