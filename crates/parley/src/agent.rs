use futures::future::join_all;
use futures::StreamExt;
use serde_json::json;
use std::sync::Arc;

use crate::conversation::{unpack_messages, ConversationState};
use crate::errors::{AgentError, AgentResult};
use crate::models::message::Message;
use crate::models::tool::ToolCall;
use crate::prompt_template::{load_prompt, SYSTEM_PROMPT};
use crate::providers::base::{CompletionRequest, Provider};
use crate::providers::streaming::ToolCallAccumulator;
use crate::stage::{Choice, StageStatus};
use crate::tools::{ToolCallParams, ToolRegistry};

pub const DEFAULT_MAX_ITERATIONS: usize = 10;

#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Chat deployment driving the conversation
    pub deployment: String,
    /// Tera template of the system prompt, rendered with the tool list
    pub system_prompt: String,
    /// Upper bound on model turns for a single reply
    pub max_iterations: usize,
}

impl AgentConfig {
    pub fn new<S: Into<String>>(deployment: S) -> Self {
        Self {
            deployment: deployment.into(),
            system_prompt: SYSTEM_PROMPT.to_string(),
            max_iterations: DEFAULT_MAX_ITERATIONS,
        }
    }

    pub fn with_system_prompt<S: Into<String>>(mut self, template: S) -> Self {
        self.system_prompt = template.into();
        self
    }

    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }
}

/// One request to answer a conversation
#[derive(Debug, Clone, Copy)]
pub struct ChatRequest<'a> {
    /// The conversation as stored by the client
    pub messages: &'a [Message],
    pub api_key: &'a str,
    pub conversation_id: &'a str,
}

/// The final answer of a reply
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    /// Assistant message carrying the tool-call history in its state
    pub message: Message,
    pub state: ConversationState,
    /// Number of model turns it took
    pub iterations: usize,
}

/// Agent integrates a chat deployment with the tools it may call
pub struct Agent {
    provider: Arc<dyn Provider>,
    registry: ToolRegistry,
    system_prompt: String,
    config: AgentConfig,
}

impl Agent {
    pub fn new(
        provider: Arc<dyn Provider>,
        registry: ToolRegistry,
        config: AgentConfig,
    ) -> AgentResult<Self> {
        let context = json!({ "tools": registry.tools() });
        let system_prompt = load_prompt(&config.system_prompt, &context)
            .map_err(|e| AgentError::Internal(format!("Failed to render system prompt: {}", e)))?;

        Ok(Self {
            provider,
            registry,
            system_prompt,
            config,
        })
    }

    pub fn system_prompt(&self) -> &str {
        &self.system_prompt
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    /// Answer the conversation, calling tools until the model produces a message
    /// without tool calls. Text is streamed into the choice as it arrives.
    pub async fn reply(&self, request: ChatRequest<'_>, choice: &Choice) -> AgentResult<Reply> {
        let mut state = ConversationState::new();

        for iteration in 1..=self.config.max_iterations {
            let messages = unpack_messages(request.messages, &state);
            let assistant = self.stream_turn(&messages, request.api_key, choice).await?;

            if !assistant.has_tool_calls() {
                let state_value = state.to_value()?;
                choice.set_state(state_value.clone());
                return Ok(Reply {
                    message: assistant.with_state(state_value),
                    state,
                    iterations: iteration,
                });
            }

            tracing::info!(
                iteration,
                calls = assistant.tool_calls.len(),
                "dispatching tool calls"
            );
            let tool_messages = join_all(
                assistant
                    .tool_calls
                    .iter()
                    .map(|call| self.process_tool_call(call, &request, choice)),
            )
            .await;
            state.record(assistant, tool_messages);
        }

        tracing::error!(
            max_iterations = self.config.max_iterations,
            "no final answer within the iteration limit"
        );
        Err(AgentError::IterationLimit(self.config.max_iterations))
    }

    /// Stream one assistant message from the provider
    async fn stream_turn(
        &self,
        messages: &[Message],
        api_key: &str,
        choice: &Choice,
    ) -> AgentResult<Message> {
        tracing::debug!(messages = ?messages, "requesting completion");
        let tools = self.registry.tools();
        let mut stream = self
            .provider
            .stream(CompletionRequest {
                deployment: &self.config.deployment,
                system: Some(&self.system_prompt),
                messages,
                tools: &tools,
                api_key,
            })
            .await
            .map_err(provider_error)?;

        let mut content = String::new();
        let mut accumulator = ToolCallAccumulator::new();
        while let Some(delta) = stream.next().await {
            let delta = delta.map_err(provider_error)?;
            if let Some(text) = delta.content.filter(|text| !text.is_empty()) {
                choice.append_content(text.as_str());
                content.push_str(&text);
            }
            for call in &delta.tool_calls {
                accumulator.push(call);
            }
            if let Some(usage) = delta.usage {
                tracing::debug!(?usage, "completion usage");
            }
        }

        Ok(Message::assistant()
            .with_text(content)
            .with_tool_calls(accumulator.finish()))
    }

    /// Run a single tool call inside its own stage. Never fails: errors become
    /// the text of the returned tool message.
    async fn process_tool_call(
        &self,
        call: &ToolCall,
        request: &ChatRequest<'_>,
        choice: &Choice,
    ) -> Message {
        let stage = choice.open_stage(call.name());

        let Some(tool) = self.registry.get(call.name()) else {
            let error = AgentError::ToolNotFound(call.name().to_string());
            tracing::warn!("{}", error);
            stage.append_content(format!("## Error: \n\r{}\n\r", error));
            stage.close(StageStatus::Failed);
            return Message::tool(&call.id, call.name()).with_text(format!("Error: {}", error));
        };

        if tool.show_in_stage() {
            let arguments = call
                .parse_arguments()
                .and_then(|value| Ok(serde_json::to_string_pretty(&value)?))
                .unwrap_or_else(|_| call.function.arguments.clone());
            stage.append_content("## Request arguments: \n");
            stage.append_content(format!("```json\n\r{}\n\r```\n\r", arguments));
        }

        let params = ToolCallParams {
            tool_call: call,
            stage: &stage,
            choice,
            api_key: request.api_key,
            conversation_id: request.conversation_id,
        };
        let outcome = tool.execute(&params).await;

        if tool.show_in_stage() {
            stage.append_content("## Response: \n");
            stage.append_content(format!("```text\n\r{}\n\r```\n\r", outcome.message.text()));
        }
        stage.close(outcome.status);
        outcome.message
    }
}

fn provider_error(err: anyhow::Error) -> AgentError {
    AgentError::Provider(err.to_string())
}
