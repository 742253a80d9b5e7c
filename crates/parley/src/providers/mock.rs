use anyhow::Result;
use async_trait::async_trait;
use std::sync::{Arc, Mutex};

use crate::models::message::Message;
use crate::providers::base::{
    CompletionDelta, CompletionRequest, CompletionStream, Provider, ToolCallDelta,
};

/// A mock provider that streams pre-configured turns for testing
#[derive(Clone)]
pub struct MockProvider {
    turns: Arc<Mutex<Vec<Vec<CompletionDelta>>>>,
    requests: Arc<Mutex<Vec<Vec<Message>>>>,
}

impl MockProvider {
    /// Create a new mock provider with a sequence of turns, one per completion request
    pub fn new(turns: Vec<Vec<CompletionDelta>>) -> Self {
        Self {
            turns: Arc::new(Mutex::new(turns)),
            requests: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// A turn answering with plain text, streamed word by word
    pub fn text_turn(text: &str) -> Vec<CompletionDelta> {
        text.split_inclusive(' ').map(CompletionDelta::text).collect()
    }

    /// A turn requesting the given tool calls, with arguments split into two fragments
    pub fn tool_turn(calls: &[(&str, &str, &str)]) -> Vec<CompletionDelta> {
        let mut deltas = Vec::new();
        for (index, (id, name, arguments)) in calls.iter().enumerate() {
            let mid = arguments
                .char_indices()
                .nth(arguments.chars().count() / 2)
                .map_or(arguments.len(), |(i, _)| i);
            let (head, tail) = arguments.split_at(mid);
            deltas.push(CompletionDelta::tool_call(ToolCallDelta {
                index,
                id: Some(id.to_string()),
                name: Some(name.to_string()),
                arguments: Some(head.to_string()),
            }));
            deltas.push(CompletionDelta::tool_call(ToolCallDelta {
                index,
                id: None,
                name: None,
                arguments: Some(tail.to_string()),
            }));
        }
        deltas
    }

    /// Message histories received so far, one entry per request
    pub fn requests(&self) -> Vec<Vec<Message>> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl Provider for MockProvider {
    async fn stream(&self, request: CompletionRequest<'_>) -> Result<CompletionStream> {
        self.requests
            .lock()
            .unwrap()
            .push(request.messages.to_vec());

        let mut turns = self.turns.lock().unwrap();
        let deltas = if turns.is_empty() {
            // Return empty response if no more pre-configured turns
            Vec::new()
        } else {
            turns.remove(0)
        };
        Ok(Box::pin(futures::stream::iter(deltas.into_iter().map(Ok))))
    }
}
