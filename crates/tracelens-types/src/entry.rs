use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

// NOTE: Model Design Goals
//
// 1. Tolerance: Transcript formats change between assistant releases; every
//    content kind the model does not recognize survives as `Unknown` with its
//    raw discriminator and payload intact, so no input is silently dropped.
//
// 2. Replayability: `parent_id` chains reconstruct conversation threads from
//    out-of-order or truncated logs; unresolved parents are structural facts
//    (roots), never errors.
//
// 3. Summability: Token counts default to zero when absent, so totals are
//    always a plain sum over entries.

/// Role of a transcript record's author
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
    System,
    /// Conversation title record emitted by log compaction
    Summary,
}

/// Token usage attached to an assistant record.
///
/// All counts default to zero when absent from the log; an absent block and
/// an explicit zero are equivalent for every aggregation this model supports.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
    #[serde(default)]
    pub cache_creation_input_tokens: u64,
    #[serde(default)]
    pub cache_read_input_tokens: u64,
}

impl TokenUsage {
    /// Total tokens across all counters
    pub fn total(&self) -> u64 {
        self.input_tokens
            + self.output_tokens
            + self.cache_creation_input_tokens
            + self.cache_read_input_tokens
    }

    /// Accumulate another usage block into this one
    pub fn merge(&mut self, other: &TokenUsage) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
        self.cache_creation_input_tokens += other.cache_creation_input_tokens;
        self.cache_read_input_tokens += other.cache_read_input_tokens;
    }
}

/// One polymorphic content block within a transcript entry.
///
/// Closed tagged variant over the wire-format `type` discriminator. The
/// `Unknown` arm preserves the raw kind string and full payload so records
/// from newer log formats round-trip through the cache without loss.
#[derive(Debug, Clone, PartialEq)]
pub enum ContentItem {
    /// Plain text block (`text`)
    Text { text: String },
    /// Tool invocation request (`tool_use`)
    ToolInvocation {
        id: String,
        name: String,
        input: Value,
    },
    /// Tool execution result (`tool_result`), output kept opaque
    ToolOutcome {
        invocation_id: String,
        output: Value,
        is_error: bool,
    },
    /// Internal deliberation text (`thinking`)
    Reasoning { text: String },
    /// Image or blob reference (`image`), descriptor kept opaque
    Media { source: Value },
    /// Any unrecognized kind; discriminator and payload preserved verbatim
    Unknown { kind: String, payload: Value },
}

impl ContentItem {
    /// Build a content item from a raw wire value. Never fails: shapes the
    /// model does not recognize become `Unknown`.
    pub fn from_value(value: Value) -> ContentItem {
        let kind = value
            .get("type")
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_string();

        match kind.as_str() {
            "text" => {
                if let Some(text) = value.get("text").and_then(Value::as_str) {
                    return ContentItem::Text {
                        text: text.to_string(),
                    };
                }
            }
            "tool_use" => {
                if let (Some(id), Some(name)) = (
                    value.get("id").and_then(Value::as_str),
                    value.get("name").and_then(Value::as_str),
                ) {
                    return ContentItem::ToolInvocation {
                        id: id.to_string(),
                        name: name.to_string(),
                        input: value.get("input").cloned().unwrap_or(Value::Null),
                    };
                }
            }
            "tool_result" => {
                if let Some(invocation_id) = value.get("tool_use_id").and_then(Value::as_str) {
                    return ContentItem::ToolOutcome {
                        invocation_id: invocation_id.to_string(),
                        output: value.get("content").cloned().unwrap_or(Value::Null),
                        is_error: value
                            .get("is_error")
                            .and_then(Value::as_bool)
                            .unwrap_or(false),
                    };
                }
            }
            "thinking" => {
                if let Some(text) = value.get("thinking").and_then(Value::as_str) {
                    return ContentItem::Reasoning {
                        text: text.to_string(),
                    };
                }
            }
            "image" => {
                if let Some(source) = value.get("source") {
                    return ContentItem::Media {
                        source: source.clone(),
                    };
                }
            }
            _ => {}
        }

        // Known kind with a malformed body also lands here; the payload keeps
        // whatever the log actually contained.
        let kind = if kind.is_empty() {
            "unknown".to_string()
        } else {
            kind
        };
        ContentItem::Unknown {
            kind,
            payload: value,
        }
    }

    /// Wire-format value for this item; inverse of `from_value`
    pub fn to_value(&self) -> Value {
        match self {
            ContentItem::Text { text } => json!({ "type": "text", "text": text }),
            ContentItem::ToolInvocation { id, name, input } => json!({
                "type": "tool_use",
                "id": id,
                "name": name,
                "input": input,
            }),
            ContentItem::ToolOutcome {
                invocation_id,
                output,
                is_error,
            } => json!({
                "type": "tool_result",
                "tool_use_id": invocation_id,
                "content": output,
                "is_error": is_error,
            }),
            ContentItem::Reasoning { text } => json!({ "type": "thinking", "thinking": text }),
            ContentItem::Media { source } => json!({ "type": "image", "source": source }),
            ContentItem::Unknown { payload, .. } => payload.clone(),
        }
    }

    /// Raw kind discriminator for this item
    pub fn kind(&self) -> &str {
        match self {
            ContentItem::Text { .. } => "text",
            ContentItem::ToolInvocation { .. } => "tool_use",
            ContentItem::ToolOutcome { .. } => "tool_result",
            ContentItem::Reasoning { .. } => "thinking",
            ContentItem::Media { .. } => "image",
            ContentItem::Unknown { kind, .. } => kind,
        }
    }
}

impl Serialize for ContentItem {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        self.to_value().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for ContentItem {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let value = Value::deserialize(deserializer)?;
        Ok(ContentItem::from_value(value))
    }
}

/// One transcript record after envelope decoding.
///
/// `id` is unique within a session after assembly; `parent_id` may reference
/// an id that never appears (log rotation, truncated history), in which case
/// the entry is a thread root.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entry {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    pub role: Role,
    /// Summary records carry no timestamp; they sort before timestamped
    /// entries and never drive the session time span.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    pub session_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwd: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<TokenUsage>,
    #[serde(default)]
    pub is_sidechain: bool,
    #[serde(default)]
    pub is_meta: bool,
    /// Subagent or tool execution metadata from the envelope, kept opaque
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_use_result: Option<Value>,
    pub content: Vec<ContentItem>,
}

impl Entry {
    /// Joined text of all `Text` blocks; reasoning and tool payloads are
    /// excluded. Mirrors what a rendering collaborator treats as the
    /// human-visible message body.
    pub fn text_content(&self) -> String {
        let parts: Vec<&str> = self
            .content
            .iter()
            .filter_map(|item| match item {
                ContentItem::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect();
        parts.join("\n")
    }

    /// Usage block, zeroed when absent
    pub fn usage_or_default(&self) -> TokenUsage {
        self.usage.unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_content_kinds() {
        let item = ContentItem::from_value(json!({ "type": "text", "text": "hello" }));
        assert_eq!(
            item,
            ContentItem::Text {
                text: "hello".to_string()
            }
        );

        let item = ContentItem::from_value(json!({
            "type": "tool_use",
            "id": "toolu_01",
            "name": "Bash",
            "input": { "command": "ls" },
        }));
        match item {
            ContentItem::ToolInvocation { id, name, .. } => {
                assert_eq!(id, "toolu_01");
                assert_eq!(name, "Bash");
            }
            other => panic!("unexpected item: {:?}", other),
        }
    }

    #[test]
    fn test_unknown_kind_preserves_discriminator_and_payload() {
        let raw = json!({ "type": "server_tool_use", "id": "x", "extra": [1, 2] });
        let item = ContentItem::from_value(raw.clone());

        match &item {
            ContentItem::Unknown { kind, payload } => {
                assert_eq!(kind, "server_tool_use");
                assert_eq!(payload, &raw);
            }
            other => panic!("unexpected item: {:?}", other),
        }

        // Round trip through serde keeps the raw value byte-for-byte
        let encoded = serde_json::to_value(&item).unwrap();
        assert_eq!(encoded, raw);
        let decoded: ContentItem = serde_json::from_value(encoded).unwrap();
        assert_eq!(decoded, item);
    }

    #[test]
    fn test_malformed_known_kind_degrades_to_unknown() {
        // `text` without a text field is not droppable; it must survive
        let raw = json!({ "type": "text", "citations": [] });
        match ContentItem::from_value(raw.clone()) {
            ContentItem::Unknown { kind, payload } => {
                assert_eq!(kind, "text");
                assert_eq!(payload, raw);
            }
            other => panic!("unexpected item: {:?}", other),
        }
    }

    #[test]
    fn test_text_content_joins_text_blocks_only() {
        let entry = Entry {
            id: "e1".to_string(),
            parent_id: None,
            role: Role::Assistant,
            timestamp: None,
            session_id: "s1".to_string(),
            cwd: None,
            usage: None,
            is_sidechain: false,
            is_meta: false,
            tool_use_result: None,
            content: vec![
                ContentItem::Reasoning {
                    text: "pondering".to_string(),
                },
                ContentItem::Text {
                    text: "first".to_string(),
                },
                ContentItem::Text {
                    text: "second".to_string(),
                },
            ],
        };
        assert_eq!(entry.text_content(), "first\nsecond");
    }

    #[test]
    fn test_usage_merge_and_total() {
        let mut usage = TokenUsage {
            input_tokens: 10,
            output_tokens: 5,
            ..Default::default()
        };
        usage.merge(&TokenUsage {
            input_tokens: 3,
            output_tokens: 0,
            cache_read_input_tokens: 7,
            ..Default::default()
        });
        assert_eq!(usage.input_tokens, 13);
        assert_eq!(usage.output_tokens, 5);
        assert_eq!(usage.cache_read_input_tokens, 7);
        assert_eq!(usage.total(), 25);
    }
}
