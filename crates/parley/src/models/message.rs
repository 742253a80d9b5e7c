use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::role::Role;
use super::tool::ToolCall;

/// A reference to stored content that is shown to the user alongside a message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attachment {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

impl Attachment {
    pub fn new<U, T, N>(url: U, mime_type: T, title: N) -> Self
    where
        U: Into<String>,
        T: Into<String>,
        N: Into<String>,
    {
        Self {
            url: Some(url.into()),
            mime_type: Some(mime_type.into()),
            title: Some(title.into()),
        }
    }
}

/// Gateway specific message extras: attachments and opaque application state
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CustomContent {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<Attachment>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<Value>,
}

impl CustomContent {
    pub fn is_empty(&self) -> bool {
        self.attachments.is_empty() && self.state.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
/// A message to or from an LLM
pub struct Message {
    pub role: Role,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_content: Option<CustomContent>,
}

impl Message {
    fn with_role(role: Role) -> Self {
        Message {
            role,
            content: None,
            tool_calls: Vec::new(),
            tool_call_id: None,
            name: None,
            custom_content: None,
        }
    }

    /// Create a new system message
    pub fn system() -> Self {
        Self::with_role(Role::System)
    }

    /// Create a new user message
    pub fn user() -> Self {
        Self::with_role(Role::User)
    }

    /// Create a new assistant message
    pub fn assistant() -> Self {
        Self::with_role(Role::Assistant)
    }

    /// Create a tool result message answering the given call
    pub fn tool<I: Into<String>, N: Into<String>>(tool_call_id: I, name: N) -> Self {
        let mut message = Self::with_role(Role::Tool);
        message.tool_call_id = Some(tool_call_id.into());
        message.name = Some(name.into());
        message
    }

    /// Set the text content of the message
    pub fn with_text<S: Into<String>>(mut self, text: S) -> Self {
        self.content = Some(text.into());
        self
    }

    /// Add a tool call to the message
    pub fn with_tool_call(mut self, tool_call: ToolCall) -> Self {
        self.tool_calls.push(tool_call);
        self
    }

    /// Add several tool calls to the message
    pub fn with_tool_calls(mut self, tool_calls: impl IntoIterator<Item = ToolCall>) -> Self {
        self.tool_calls.extend(tool_calls);
        self
    }

    /// Add an attachment to the message
    pub fn with_attachment(mut self, attachment: Attachment) -> Self {
        self.custom_content
            .get_or_insert_with(CustomContent::default)
            .attachments
            .push(attachment);
        self
    }

    /// Set the application state carried by the message
    pub fn with_state(mut self, state: Value) -> Self {
        self.custom_content
            .get_or_insert_with(CustomContent::default)
            .state = Some(state);
        self
    }

    pub fn text(&self) -> &str {
        self.content.as_deref().unwrap_or_default()
    }

    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }

    pub fn attachments(&self) -> &[Attachment] {
        self.custom_content
            .as_ref()
            .map(|c| c.attachments.as_slice())
            .unwrap_or_default()
    }

    pub fn state(&self) -> Option<&Value> {
        self.custom_content.as_ref().and_then(|c| c.state.as_ref())
    }
}
