//! Message and Conversation domain types.
//!
//! A conversation alternates between user turns (the prompt, or the results
//! of the tools the model asked for) and assistant turns (text, thinking and
//! tool-use requests). It only ever grows.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for a session (one run of the orchestration loop).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub String);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for SessionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// The role of a message sender in a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The prompt or tool results
    User,
    /// The model
    Assistant,
}

/// One segment of a message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        text: String,
    },
    Thinking {
        thinking: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
    ToolResult {
        tool_use_id: String,
        content: String,
        #[serde(default)]
        is_error: bool,
    },
}

impl ContentBlock {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    pub fn tool_result(tool_use_id: impl Into<String>, content: impl Into<String>, is_error: bool) -> Self {
        Self::ToolResult {
            tool_use_id: tool_use_id.into(),
            content: content.into(),
            is_error,
        }
    }
}

/// A tool invocation requested by the model, lifted out of a [`ContentBlock::ToolUse`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolUse {
    pub id: String,
    pub name: String,
    pub input: serde_json::Value,
}

/// A single message in a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Unique message ID
    pub id: String,

    /// Who sent this message
    pub role: Role,

    /// Ordered content segments
    pub content: Vec<ContentBlock>,

    pub timestamp: DateTime<Utc>,
}

impl Message {
    fn with_content(role: Role, content: Vec<ContentBlock>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role,
            content,
            timestamp: Utc::now(),
        }
    }

    /// Create a user message carrying plain text.
    pub fn user(text: impl Into<String>) -> Self {
        Self::with_content(Role::User, vec![ContentBlock::text(text)])
    }

    /// Create an assistant message from assembled content.
    pub fn assistant(content: Vec<ContentBlock>) -> Self {
        Self::with_content(Role::Assistant, content)
    }

    /// Create the user turn that answers a batch of tool invocations.
    pub fn tool_results(results: Vec<ContentBlock>) -> Self {
        Self::with_content(Role::User, results)
    }

    /// Concatenated text segments, ignoring thinking and tool blocks.
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|block| match block {
                ContentBlock::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }

    /// Tool invocations requested in this message, in order.
    pub fn tool_uses(&self) -> Vec<ToolUse> {
        self.content
            .iter()
            .filter_map(|block| match block {
                ContentBlock::ToolUse { id, name, input } => Some(ToolUse {
                    id: id.clone(),
                    name: name.clone(),
                    input: input.clone(),
                }),
                _ => None,
            })
            .collect()
    }

    /// Find the result recorded for a tool invocation, if this message carries it.
    pub fn tool_result(&self, tool_use_id: &str) -> Option<(&str, bool)> {
        self.content.iter().find_map(|block| match block {
            ContentBlock::ToolResult {
                tool_use_id: id,
                content,
                is_error,
            } if id == tool_use_id => Some((content.as_str(), *is_error)),
            _ => None,
        })
    }
}

/// An ordered, append-only sequence of messages.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub id: SessionId,
    messages: Vec<Message>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Conversation {
    pub fn new(id: SessionId) -> Self {
        let now = Utc::now();
        Self {
            id,
            messages: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Append a message.
    pub fn push(&mut self, message: Message) {
        self.updated_at = Utc::now();
        self.messages.push(message);
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Look up the recorded result for a tool invocation anywhere in the conversation.
    pub fn find_tool_result(&self, tool_use_id: &str) -> Option<(&str, bool)> {
        self.messages.iter().find_map(|m| m.tool_result(tool_use_id))
    }
}

impl Default for Conversation {
    fn default() -> Self {
        Self::new(SessionId::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn user_message_has_single_text_block() {
        let msg = Message::user("Hello, agent!");
        assert_eq!(msg.role, Role::User);
        assert_eq!(msg.text(), "Hello, agent!");
        assert!(msg.tool_uses().is_empty());
    }

    #[test]
    fn assistant_text_skips_thinking_and_tools() {
        let msg = Message::assistant(vec![
            ContentBlock::Thinking { thinking: "hmm".into() },
            ContentBlock::text("Let me check. "),
            ContentBlock::ToolUse {
                id: "tu_1".into(),
                name: "Read".into(),
                input: json!({"file_path": "/tmp/a"}),
            },
            ContentBlock::text("Done."),
        ]);
        assert_eq!(msg.text(), "Let me check. Done.");
        let uses = msg.tool_uses();
        assert_eq!(uses.len(), 1);
        assert_eq!(uses[0].name, "Read");
    }

    #[test]
    fn conversation_finds_tool_result() {
        let mut conv = Conversation::default();
        conv.push(Message::user("go"));
        conv.push(Message::tool_results(vec![ContentBlock::tool_result("tu_9", "boom", true)]));
        assert_eq!(conv.len(), 2);
        assert_eq!(conv.find_tool_result("tu_9"), Some(("boom", true)));
        assert!(conv.find_tool_result("missing").is_none());
    }

    #[test]
    fn content_block_uses_type_tag() {
        let json = serde_json::to_value(ContentBlock::tool_result("a", "ok", false)).unwrap();
        assert_eq!(json["type"], "tool_result");
        assert_eq!(json["tool_use_id"], "a");
    }
}
