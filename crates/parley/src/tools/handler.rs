use async_trait::async_trait;
use serde_json::Value;

use crate::errors::{AgentError, AgentResult};
use crate::models::message::Message;
use crate::models::tool::{Tool, ToolCall};
use crate::stage::{Choice, Stage, StageStatus};

/// Everything a tool gets to see about the call it is answering
pub struct ToolCallParams<'a> {
    pub tool_call: &'a ToolCall,
    /// Stage opened for this call
    pub stage: &'a Stage,
    /// The answer being streamed, for attachments meant for the user
    pub choice: &'a Choice,
    pub api_key: &'a str,
    pub conversation_id: &'a str,
}

/// The tool message answering a call, and how its stage should be closed
#[derive(Debug, Clone, PartialEq)]
pub struct ToolOutcome {
    pub message: Message,
    pub status: StageStatus,
}

/// Core trait for capabilities the model can invoke
#[async_trait]
pub trait ToolHandler: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// JSON schema of the arguments
    fn parameters(&self) -> Value;

    /// Whether the agent should echo arguments and result into the stage.
    /// Tools that report their own progress return false.
    fn show_in_stage(&self) -> bool {
        true
    }

    fn tool(&self) -> Tool {
        Tool::new(self.name(), self.description(), self.parameters())
    }

    /// Run the tool, returning the text handed back to the model
    async fn run(&self, params: &ToolCallParams<'_>) -> AgentResult<String>;

    /// Run the tool and turn the result into a tool message. Errors become the
    /// message text so the model can react to them.
    async fn execute(&self, params: &ToolCallParams<'_>) -> ToolOutcome {
        let message = Message::tool(&params.tool_call.id, params.tool_call.name());
        match self.run(params).await {
            Ok(text) => ToolOutcome {
                message: message.with_text(text),
                status: StageStatus::Completed,
            },
            Err(e) => {
                tracing::warn!(tool = self.name(), "tool call failed: {}", e);
                ToolOutcome {
                    message: message.with_text(format!("Error: {}", e)),
                    status: StageStatus::Failed,
                }
            }
        }
    }
}

/// A required string argument
pub fn string_argument<'a>(arguments: &'a Value, key: &str) -> AgentResult<&'a str> {
    arguments
        .get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| AgentError::InvalidParameters(format!("Missing string argument '{}'", key)))
}
