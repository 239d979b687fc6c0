//! Per-session conversation history.
//!
//! History is built from what the upstream API reports (`conversation.item.*`,
//! transcripts, function calls) plus relay-local handoff markers. Item ids are
//! unique: recording an item whose id is already present replaces it in place.

use serde::{Deserialize, Serialize};

use crate::core::realtime::{ContentPart, ConversationItem};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl Role {
    fn parse(role: Option<&str>) -> Self {
        match role {
            Some("assistant") => Role::Assistant,
            Some("system") => Role::System,
            _ => Role::User,
        }
    }
}

/// Reference to an image the user sent. Data URLs are summarised rather than
/// stored, so history snapshots stay small.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageReference {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,
    /// Length of the URL payload in bytes
    pub size: usize,
    /// Kept only for non-data URLs
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

impl ImageReference {
    pub fn from_url(url: &str) -> Self {
        match url.strip_prefix("data:") {
            Some(rest) => {
                let media_type = rest
                    .split([';', ','])
                    .next()
                    .filter(|m| !m.is_empty())
                    .map(str::to_string);
                let payload = rest.split_once(',').map(|(_, p)| p.len()).unwrap_or(0);
                Self {
                    media_type,
                    size: payload,
                    url: None,
                }
            }
            None => Self {
                media_type: None,
                size: url.len(),
                url: Some(url.to_string()),
            },
        }
    }
}

/// One content part of a message item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessageContent {
    Text { text: String },
    InputText { text: String },
    Audio { transcript: Option<String> },
    InputAudio { transcript: Option<String> },
    InputImage { image: ImageReference },
}

impl MessageContent {
    fn from_part(part: &ContentPart) -> Option<Self> {
        Some(match part {
            ContentPart::InputText { text } => MessageContent::InputText { text: text.clone() },
            ContentPart::Text { text } => MessageContent::Text { text: text.clone() },
            ContentPart::InputAudio { transcript, .. } => MessageContent::InputAudio {
                transcript: transcript.clone(),
            },
            ContentPart::Audio { transcript, .. } => MessageContent::Audio {
                transcript: transcript.clone(),
            },
            ContentPart::InputImage { image_url, .. } => MessageContent::InputImage {
                image: ImageReference::from_url(image_url),
            },
            ContentPart::Unknown => return None,
        })
    }

    fn transcript_slot(&mut self) -> Option<&mut Option<String>> {
        match self {
            MessageContent::Audio { transcript } | MessageContent::InputAudio { transcript } => {
                Some(transcript)
            }
            _ => None,
        }
    }
}

/// A conversation item as kept in session history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HistoryItem {
    Message {
        item_id: String,
        role: Role,
        content: Vec<MessageContent>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        status: Option<String>,
    },
    ToolCall {
        item_id: String,
        call_id: String,
        name: String,
        arguments: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        output: Option<String>,
    },
    ToolResult {
        item_id: String,
        call_id: String,
        output: String,
    },
    Handoff {
        item_id: String,
        from: String,
        to: String,
    },
}

impl HistoryItem {
    pub fn item_id(&self) -> &str {
        match self {
            HistoryItem::Message { item_id, .. }
            | HistoryItem::ToolCall { item_id, .. }
            | HistoryItem::ToolResult { item_id, .. }
            | HistoryItem::Handoff { item_id, .. } => item_id,
        }
    }

    /// Convert an upstream conversation item. Items without an id, or of a
    /// type the relay does not track, yield `None`.
    pub fn from_conversation_item(item: &ConversationItem) -> Option<Self> {
        let item_id = item.id.clone()?;
        match item.item_type.as_str() {
            "message" => Some(HistoryItem::Message {
                item_id,
                role: Role::parse(item.role.as_deref()),
                content: item
                    .content
                    .iter()
                    .flatten()
                    .filter_map(MessageContent::from_part)
                    .collect(),
                status: item.status.clone(),
            }),
            "function_call" => Some(HistoryItem::ToolCall {
                item_id,
                call_id: item.call_id.clone().unwrap_or_default(),
                name: item.name.clone().unwrap_or_default(),
                arguments: item.arguments.clone().unwrap_or_default(),
                output: None,
            }),
            "function_call_output" => Some(HistoryItem::ToolResult {
                item_id,
                call_id: item.call_id.clone().unwrap_or_default(),
                output: item.output.clone().unwrap_or_default(),
            }),
            _ => None,
        }
    }

    /// Fill gaps in `self` from an earlier version of the same item, so a
    /// later echo without transcripts does not erase known ones.
    fn inherit_from(&mut self, previous: &HistoryItem) {
        match (self, previous) {
            (
                HistoryItem::Message { content, .. },
                HistoryItem::Message {
                    content: old_content,
                    ..
                },
            ) => {
                for (part, old) in content.iter_mut().zip(old_content.iter()) {
                    let mut old = old.clone();
                    if let (Some(slot), Some(old_slot)) =
                        (part.transcript_slot(), old.transcript_slot())
                        && slot.is_none()
                    {
                        *slot = old_slot.take();
                    }
                }
                if content.is_empty() {
                    content.extend(old_content.iter().cloned());
                }
            }
            (
                HistoryItem::ToolCall {
                    output, arguments, ..
                },
                HistoryItem::ToolCall {
                    output: old_output,
                    arguments: old_arguments,
                    ..
                },
            ) => {
                if output.is_none() {
                    *output = old_output.clone();
                }
                if arguments.is_empty() {
                    *arguments = old_arguments.clone();
                }
            }
            _ => {}
        }
    }
}

/// Outcome of [`ConversationHistory::upsert`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upsert {
    Added,
    Replaced,
}

/// Ordered, id-unique conversation history.
#[derive(Debug, Clone, Default)]
pub struct ConversationHistory {
    items: Vec<HistoryItem>,
}

impl ConversationHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn items(&self) -> &[HistoryItem] {
        &self.items
    }

    pub fn snapshot(&self) -> Vec<HistoryItem> {
        self.items.clone()
    }

    pub fn get(&self, item_id: &str) -> Option<&HistoryItem> {
        self.items.iter().find(|i| i.item_id() == item_id)
    }

    fn position(&self, item_id: &str) -> Option<usize> {
        self.items.iter().position(|i| i.item_id() == item_id)
    }

    /// Append `item`, or replace the item with the same id in place.
    pub fn upsert(&mut self, mut item: HistoryItem) -> Upsert {
        match self.position(item.item_id()) {
            Some(idx) => {
                item.inherit_from(&self.items[idx]);
                self.items[idx] = item;
                Upsert::Replaced
            }
            None => {
                self.items.push(item);
                Upsert::Added
            }
        }
    }

    pub fn remove(&mut self, item_id: &str) -> bool {
        match self.position(item_id) {
            Some(idx) => {
                self.items.remove(idx);
                true
            }
            None => false,
        }
    }

    /// Set the transcript of an audio part. When the part does not exist yet
    /// (the item was announced with empty content) an audio part is appended.
    pub fn set_transcript(&mut self, item_id: &str, content_index: usize, transcript: &str) -> bool {
        let Some(HistoryItem::Message { role, content, .. }) =
            self.position(item_id).map(|idx| &mut self.items[idx])
        else {
            return false;
        };

        if let Some(slot) = content
            .get_mut(content_index)
            .and_then(MessageContent::transcript_slot)
        {
            if slot.as_deref() == Some(transcript) {
                return false;
            }
            *slot = Some(transcript.to_string());
            return true;
        }

        let transcript = Some(transcript.to_string());
        content.push(match role {
            Role::User => MessageContent::InputAudio { transcript },
            _ => MessageContent::Audio { transcript },
        });
        true
    }

    /// Set the text of a text part, appending one if needed.
    pub fn set_text(&mut self, item_id: &str, content_index: usize, text: &str) -> bool {
        let Some(HistoryItem::Message { content, .. }) =
            self.position(item_id).map(|idx| &mut self.items[idx])
        else {
            return false;
        };

        match content.get_mut(content_index) {
            Some(MessageContent::Text { text: existing }) => {
                if existing == text {
                    return false;
                }
                *existing = text.to_string();
            }
            _ => content.push(MessageContent::Text {
                text: text.to_string(),
            }),
        }
        true
    }

    /// Attach the output of a function call to its `tool_call` item.
    pub fn set_tool_output(&mut self, call_id: &str, result: &str) -> bool {
        for item in self.items.iter_mut() {
            if let HistoryItem::ToolCall {
                call_id: id,
                output,
                ..
            } = item
                && id == call_id
            {
                *output = Some(result.to_string());
                return true;
            }
        }
        false
    }
}
