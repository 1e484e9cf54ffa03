//! Republishes the upstream conversation after every update.
//!
//! The store never derives items itself: on each update it is handed the
//! authoritative snapshot from the realtime client, attaches playable WAV
//! audio to completed items and publishes the result on a watch channel.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::watch;

use crate::core::audio::{SAMPLE_RATE, encode_wav};
use crate::core::realtime::{ConversationItem, ItemStatus};

/// Conversation item as published to observers.
#[derive(Debug, Clone, Serialize)]
pub struct PublishedItem {
    #[serde(flatten)]
    pub item: ConversationItem,
    /// WAV-encoded audio, present once the item is completed
    #[serde(skip)]
    pub wav: Option<Arc<[u8]>>,
    pub has_audio: bool,
}

struct CachedWav {
    samples: usize,
    wav: Arc<[u8]>,
}

pub struct ConversationStore {
    tx: watch::Sender<Vec<PublishedItem>>,
    wav_cache: Mutex<HashMap<String, CachedWav>>,
}

impl Default for ConversationStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ConversationStore {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(Vec::new());
        Self {
            tx,
            wav_cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<Vec<PublishedItem>> {
        self.tx.subscribe()
    }

    /// Current published list.
    pub fn snapshot(&self) -> Vec<PublishedItem> {
        self.tx.borrow().clone()
    }

    /// WAV audio for an item, if it has been decoded.
    pub fn wav(&self, item_id: &str) -> Option<Arc<[u8]>> {
        self.wav_cache.lock().get(item_id).map(|c| c.wav.clone())
    }

    /// Publish a fresh snapshot of the upstream conversation.
    pub fn refresh(&self, items: Vec<ConversationItem>) {
        let published = {
            let mut cache = self.wav_cache.lock();
            cache.retain(|id, _| items.iter().any(|i| &i.id == id));

            items
                .into_iter()
                .map(|item| {
                    let wav = if item.status == ItemStatus::Completed && !item.audio.is_empty() {
                        Self::decode(&mut cache, &item)
                    } else {
                        None
                    };
                    PublishedItem {
                        has_audio: wav.is_some(),
                        wav,
                        item,
                    }
                })
                .collect::<Vec<_>>()
        };

        self.tx.send_replace(published);
    }

    fn decode(cache: &mut HashMap<String, CachedWav>, item: &ConversationItem) -> Option<Arc<[u8]>> {
        // Truncation can shorten audio after completion, so the cache is keyed
        // on sample count as well as id.
        if let Some(cached) = cache.get(&item.id)
            && cached.samples == item.audio.len()
        {
            return Some(cached.wav.clone());
        }

        match encode_wav(&item.audio, SAMPLE_RATE) {
            Ok(bytes) => {
                let wav: Arc<[u8]> = bytes.into();
                cache.insert(
                    item.id.clone(),
                    CachedWav {
                        samples: item.audio.len(),
                        wav: wav.clone(),
                    },
                );
                Some(wav)
            }
            Err(e) => {
                tracing::warn!("Failed to decode audio for item {}: {}", item.id, e);
                None
            }
        }
    }

    /// Clear everything and publish an empty list.
    pub fn reset(&self) {
        self.wav_cache.lock().clear();
        self.tx.send_replace(Vec::new());
    }
}
