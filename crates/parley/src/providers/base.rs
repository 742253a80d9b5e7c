use anyhow::Result;
use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

use crate::models::message::Message;
use crate::models::tool::Tool;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: Option<i32>,
    pub output_tokens: Option<i32>,
    pub total_tokens: Option<i32>,
}

impl Usage {
    pub fn new(
        input_tokens: Option<i32>,
        output_tokens: Option<i32>,
        total_tokens: Option<i32>,
    ) -> Self {
        Self {
            input_tokens,
            output_tokens,
            total_tokens,
        }
    }
}

/// One fragment of a tool call as it arrives on the stream. Fragments belonging to
/// the same call share the same `index`; only the first one carries the id.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ToolCallDelta {
    pub index: usize,
    pub id: Option<String>,
    pub name: Option<String>,
    pub arguments: Option<String>,
}

/// An incremental update of the assistant message being generated
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CompletionDelta {
    pub content: Option<String>,
    pub tool_calls: Vec<ToolCallDelta>,
    pub usage: Option<Usage>,
}

impl CompletionDelta {
    pub fn text<S: Into<String>>(text: S) -> Self {
        Self {
            content: Some(text.into()),
            ..Default::default()
        }
    }

    pub fn tool_call(delta: ToolCallDelta) -> Self {
        Self {
            tool_calls: vec![delta],
            ..Default::default()
        }
    }
}

pub type CompletionStream = BoxStream<'static, Result<CompletionDelta>>;

/// Everything needed to ask a deployment for the next assistant message
#[derive(Debug, Clone, Copy)]
pub struct CompletionRequest<'a> {
    /// Deployment (model) name on the gateway
    pub deployment: &'a str,
    /// System prompt, prepended to the history when present
    pub system: Option<&'a str>,
    pub messages: &'a [Message],
    pub tools: &'a [Tool],
    /// Key of the end user on whose behalf the request is made
    pub api_key: &'a str,
}

/// Base trait for chat completion providers
#[async_trait]
pub trait Provider: Send + Sync {
    /// Start generating the next message, returning the stream of deltas
    async fn stream(&self, request: CompletionRequest<'_>) -> Result<CompletionStream>;
}
