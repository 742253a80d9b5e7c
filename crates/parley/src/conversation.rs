//! Tool-call history of a conversation.
//!
//! The intermediate messages of a turn (assistant tool calls and the tool answers)
//! are not part of what the client stores. They travel in the `state` of the final
//! assistant message instead, and are expanded again when the client sends the
//! conversation back on the next request.

use serde_json::{json, Value};

use crate::errors::{AgentError, AgentResult};
use crate::models::message::Message;
use crate::models::role::Role;

/// Key of the history inside an assistant message's state
pub const TOOL_CALL_HISTORY_KEY: &str = "tool_call_history";

/// Ordered tool-call history of the turn currently being answered
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConversationState {
    history: Vec<Message>,
}

impl ConversationState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an assistant message that requested tools, followed by the tool answers
    pub fn record(&mut self, assistant: Message, tool_messages: impl IntoIterator<Item = Message>) {
        self.history.push(assistant);
        self.history.extend(tool_messages);
    }

    pub fn messages(&self) -> &[Message] {
        &self.history
    }

    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }

    /// The state object attached to the final assistant message
    pub fn to_value(&self) -> AgentResult<Value> {
        Ok(json!({ TOOL_CALL_HISTORY_KEY: serde_json::to_value(&self.history)? }))
    }

    /// Restore a history from a state object; a state without history is empty
    pub fn from_value(state: &Value) -> AgentResult<Self> {
        match state.get(TOOL_CALL_HISTORY_KEY) {
            None | Some(Value::Null) => Ok(Self::default()),
            Some(history) => {
                let history = serde_json::from_value(history.clone()).map_err(|e| {
                    AgentError::InvalidParameters(format!("Malformed tool call history: {}", e))
                })?;
                Ok(Self { history })
            }
        }
    }
}

/// Rebuild the full message history the model should see.
///
/// Every assistant message that carries a recorded history is preceded by the
/// tool calls that led to it. User attachments are listed in the message text so
/// the model can pass their urls to tools. The current turn's history goes last.
pub fn unpack_messages(messages: &[Message], current: &ConversationState) -> Vec<Message> {
    let mut unpacked = Vec::with_capacity(messages.len() + current.messages().len());

    for message in messages {
        match message.role {
            Role::Assistant => {
                if let Some(state) = message.state() {
                    match ConversationState::from_value(state) {
                        Ok(previous) => unpacked.extend(previous.history),
                        Err(e) => tracing::warn!("ignoring message state: {}", e),
                    }
                }
                unpacked.push(message.clone());
            }
            Role::User if !message.attachments().is_empty() => {
                unpacked.push(with_attachment_listing(message));
            }
            _ => unpacked.push(message.clone()),
        }
    }

    unpacked.extend(current.messages().iter().cloned());
    unpacked
}

fn with_attachment_listing(message: &Message) -> Message {
    let mut text = message.text().to_string();
    text.push_str("\n\n## Attachments\n");
    for attachment in message.attachments() {
        let url = attachment.url.as_deref().unwrap_or_default();
        let title = attachment.title.as_deref().unwrap_or(url);
        match &attachment.mime_type {
            Some(mime_type) => text.push_str(&format!("- {} ({}): {}\n", title, mime_type, url)),
            None => text.push_str(&format!("- {}: {}\n", title, url)),
        }
    }

    let mut message = message.clone();
    message.content = Some(text);
    message
}
