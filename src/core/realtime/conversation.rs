//! Authoritative conversation state rebuilt from upstream server events.
//!
//! Every server event that touches the conversation is folded into an ordered
//! list of [`ConversationItem`]s. User speech captured between VAD boundaries
//! and audio committed by an explicit response request are attached to the
//! user item the engine creates for them, even when the item arrives after
//! the audio.

use std::collections::HashMap;

use serde::Serialize;

use super::base::ItemDelta;
use super::openai::messages::{ItemParam, ServerEvent};
use crate::core::audio::{SAMPLE_RATE, pcm16_from_bytes};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemKind {
    Message,
    FunctionCall,
    FunctionCallOutput,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    InProgress,
    Completed,
    Incomplete,
}

impl ItemStatus {
    fn parse(s: &str) -> Self {
        match s {
            "completed" => ItemStatus::Completed,
            "incomplete" => ItemStatus::Incomplete,
            _ => ItemStatus::InProgress,
        }
    }
}

/// Tool invocation carried by a function-call item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ToolCallInfo {
    pub name: String,
    pub call_id: String,
    pub arguments: String,
}

/// One entry of the conversation, in engine order.
#[derive(Debug, Clone, Serialize)]
pub struct ConversationItem {
    pub id: String,
    pub kind: ItemKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<Role>,
    pub status: ItemStatus,
    pub text: String,
    pub transcript: String,
    /// PCM16 audio for the item; served separately as WAV.
    #[serde(skip)]
    pub audio: Vec<i16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool: Option<ToolCallInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    /// Content part types in wire order (text, audio, input_audio, ...)
    pub content_types: Vec<String>,
}

impl ConversationItem {
    fn from_wire(item: &ItemParam) -> Option<Self> {
        let id = item.id.clone()?;
        let kind = match item.item_type.as_str() {
            "message" => ItemKind::Message,
            "function_call" => ItemKind::FunctionCall,
            "function_call_output" => ItemKind::FunctionCallOutput,
            _ => return None,
        };
        let role = item.role.as_deref().and_then(|r| match r {
            "user" => Some(Role::User),
            "assistant" => Some(Role::Assistant),
            "system" => Some(Role::System),
            _ => None,
        });

        let parts = item.content.as_deref().unwrap_or_default();
        let text = parts
            .iter()
            .filter(|p| p.content_type == "text" || p.content_type == "input_text")
            .filter_map(|p| p.text.as_deref())
            .collect::<String>();

        Some(Self {
            id,
            kind,
            role,
            status: ItemStatus::InProgress,
            text,
            transcript: String::new(),
            audio: Vec::new(),
            tool: None,
            output: None,
            content_types: parts.iter().map(|p| p.content_type.clone()).collect(),
        })
    }

    /// Index of the audio content part, if the item has one.
    pub fn audio_content_index(&self) -> Option<usize> {
        self.content_types.iter().position(|t| t == "audio")
    }

    pub fn is_assistant_message(&self) -> bool {
        self.kind == ItemKind::Message && self.role == Some(Role::Assistant)
    }
}

/// Result of folding one server event.
#[derive(Debug, Clone)]
pub struct ConversationChange {
    pub item_id: String,
    pub delta: Option<ItemDelta>,
}

#[derive(Debug, Default)]
struct QueuedSpeech {
    start_ms: u64,
    audio: Option<Vec<i16>>,
}

/// Ordered conversation plus the buffers needed to attach user audio.
#[derive(Debug, Default)]
pub struct RealtimeConversation {
    items: Vec<ConversationItem>,
    /// Speech segments keyed by the item id the engine announced for them
    queued_speech: HashMap<String, QueuedSpeech>,
    /// Transcripts that arrived before their item
    queued_transcripts: HashMap<String, String>,
    /// Audio committed by an explicit response request
    queued_input_audio: Option<Vec<i16>>,
    /// Audio appended since the last explicit commit or finished speech
    /// segment
    input_buffer: Vec<i16>,
    /// Session sample index of `input_buffer[0]`
    input_base: usize,
}

fn ms_to_samples(ms: u64) -> usize {
    (ms.saturating_mul(SAMPLE_RATE as u64) / 1000) as usize
}

impl RealtimeConversation {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop all items and buffers.
    pub fn clear(&mut self) {
        *self = Self::default();
    }

    pub fn items(&self) -> &[ConversationItem] {
        &self.items
    }

    pub fn item(&self, id: &str) -> Option<&ConversationItem> {
        self.items.iter().find(|i| i.id == id)
    }

    fn item_mut(&mut self, id: &str) -> Option<&mut ConversationItem> {
        self.items.iter_mut().find(|i| i.id == id)
    }

    /// Record captured audio sent upstream.
    pub fn append_input(&mut self, samples: &[i16]) {
        self.input_buffer.extend_from_slice(samples);
    }

    /// Move the pending input buffer into the queue for the next user item.
    /// Returns `false` when there was nothing to commit.
    pub fn commit_input(&mut self) -> bool {
        if self.input_buffer.is_empty() {
            return false;
        }
        let audio = std::mem::take(&mut self.input_buffer);
        self.input_base += audio.len();
        self.queued_input_audio = Some(audio);
        true
    }

    /// Samples currently held for segments not yet attached.
    pub fn buffered_input(&self) -> usize {
        self.input_buffer.len()
    }

    /// Fold a server event into the conversation.
    pub fn apply(&mut self, event: &ServerEvent) -> Option<ConversationChange> {
        match event {
            ServerEvent::ConversationItemCreated { item } => self.item_created(item),

            ServerEvent::TranscriptionCompleted {
                item_id,
                transcript,
                ..
            } => {
                // Non-empty placeholder marks the transcript as received
                let transcript = if transcript.is_empty() {
                    " ".to_string()
                } else {
                    transcript.clone()
                };
                match self.item_mut(item_id) {
                    Some(item) => {
                        item.transcript = transcript.clone();
                        Some(ConversationChange {
                            item_id: item_id.clone(),
                            delta: Some(ItemDelta {
                                transcript: Some(transcript),
                                ..Default::default()
                            }),
                        })
                    }
                    None => {
                        self.queued_transcripts.insert(item_id.clone(), transcript);
                        None
                    }
                }
            }

            ServerEvent::SpeechStarted {
                audio_start_ms,
                item_id,
            } => {
                self.queued_speech.insert(
                    item_id.clone(),
                    QueuedSpeech {
                        start_ms: *audio_start_ms,
                        audio: None,
                    },
                );
                None
            }

            ServerEvent::SpeechStopped {
                audio_end_ms,
                item_id,
            } => {
                let buffer_len = self.input_buffer.len();
                let base = self.input_base;
                let speech = self.queued_speech.entry(item_id.clone()).or_default();
                let start = ms_to_samples(speech.start_ms)
                    .saturating_sub(base)
                    .min(buffer_len);
                let end = ms_to_samples(*audio_end_ms)
                    .saturating_sub(base)
                    .clamp(start, buffer_len);
                speech.audio = Some(self.input_buffer[start..end].to_vec());

                // Offsets only move forward, nothing before `end` is needed again
                self.input_buffer.drain(..end);
                self.input_base += end;
                None
            }

            ServerEvent::ConversationItemTruncated {
                item_id,
                audio_end_ms,
                ..
            } => {
                let item = self.warn_missing(item_id, "truncated")?;
                item.transcript.clear();
                let end = ms_to_samples(*audio_end_ms);
                item.audio.truncate(end);
                Some(ConversationChange {
                    item_id: item_id.clone(),
                    delta: None,
                })
            }

            ServerEvent::ConversationItemDeleted { item_id } => {
                let before = self.items.len();
                self.items.retain(|i| &i.id != item_id);
                if self.items.len() == before {
                    tracing::warn!("Delete for unknown conversation item {}", item_id);
                    return None;
                }
                Some(ConversationChange {
                    item_id: item_id.clone(),
                    delta: None,
                })
            }

            ServerEvent::OutputItemDone { item } => {
                let id = item.id.clone()?;
                let status = item.status.as_deref().map(ItemStatus::parse);
                let existing = self.warn_missing(&id, "output_item.done")?;
                if let Some(status) = status {
                    existing.status = status;
                }
                Some(ConversationChange {
                    item_id: id,
                    delta: None,
                })
            }

            ServerEvent::ContentPartAdded { item_id, part } => {
                let item = self.warn_missing(item_id, "content_part.added")?;
                item.content_types.push(part.content_type.clone());
                Some(ConversationChange {
                    item_id: item_id.clone(),
                    delta: None,
                })
            }

            ServerEvent::AudioTranscriptDelta { item_id, delta } => {
                let item = self.warn_missing(item_id, "audio_transcript.delta")?;
                item.transcript.push_str(delta);
                Some(ConversationChange {
                    item_id: item_id.clone(),
                    delta: Some(ItemDelta {
                        transcript: Some(delta.clone()),
                        ..Default::default()
                    }),
                })
            }

            ServerEvent::AudioDelta { item_id, delta } => {
                let samples = match ServerEvent::decode_audio_delta(delta)
                    .map_err(|e| e.to_string())
                    .and_then(|bytes| pcm16_from_bytes(&bytes).map_err(|e| e.to_string()))
                {
                    Ok(samples) => samples,
                    Err(e) => {
                        tracing::error!("Failed to decode audio delta: {}", e);
                        return None;
                    }
                };
                let item = self.warn_missing(item_id, "audio.delta")?;
                item.audio.extend_from_slice(&samples);
                Some(ConversationChange {
                    item_id: item_id.clone(),
                    delta: Some(ItemDelta {
                        audio: Some(samples),
                        ..Default::default()
                    }),
                })
            }

            ServerEvent::TextDelta { item_id, delta } => {
                let item = self.warn_missing(item_id, "text.delta")?;
                item.text.push_str(delta);
                Some(ConversationChange {
                    item_id: item_id.clone(),
                    delta: Some(ItemDelta {
                        text: Some(delta.clone()),
                        ..Default::default()
                    }),
                })
            }

            ServerEvent::FunctionCallArgumentsDelta { item_id, delta, .. } => {
                let item = self.warn_missing(item_id, "function_call_arguments.delta")?;
                if let Some(tool) = item.tool.as_mut() {
                    tool.arguments.push_str(delta);
                }
                Some(ConversationChange {
                    item_id: item_id.clone(),
                    delta: Some(ItemDelta {
                        arguments: Some(delta.clone()),
                        ..Default::default()
                    }),
                })
            }

            _ => None,
        }
    }

    fn warn_missing(&mut self, item_id: &str, event: &str) -> Option<&mut ConversationItem> {
        let found = self.item_mut(item_id);
        if found.is_none() {
            tracing::warn!("{} for unknown conversation item {}", event, item_id);
        }
        found
    }

    fn item_created(&mut self, wire: &ItemParam) -> Option<ConversationChange> {
        let Some(mut item) = ConversationItem::from_wire(wire) else {
            tracing::warn!("Ignoring unsupported conversation item: {}", wire.item_type);
            return None;
        };
        if self.item(&item.id).is_some() {
            return None;
        }

        if let Some(speech) = self.queued_speech.remove(&item.id)
            && let Some(audio) = speech.audio
        {
            item.audio = audio;
        }
        if let Some(transcript) = self.queued_transcripts.remove(&item.id) {
            item.transcript = transcript;
        }

        match item.kind {
            ItemKind::Message => {
                if item.role == Some(Role::User) {
                    item.status = ItemStatus::Completed;
                    if let Some(audio) = self.queued_input_audio.take() {
                        item.audio = audio;
                    }
                } else {
                    item.status = ItemStatus::InProgress;
                }
            }
            ItemKind::FunctionCall => {
                item.tool = Some(ToolCallInfo {
                    name: wire.name.clone().unwrap_or_default(),
                    call_id: wire.call_id.clone().unwrap_or_default(),
                    arguments: String::new(),
                });
                item.status = ItemStatus::InProgress;
            }
            ItemKind::FunctionCallOutput => {
                item.status = ItemStatus::Completed;
                item.output = wire.output.clone();
            }
        }

        let item_id = item.id.clone();
        self.items.push(item);
        Some(ConversationChange {
            item_id,
            delta: None,
        })
    }
}
