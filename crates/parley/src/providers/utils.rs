use anyhow::{anyhow, Result};
use serde_json::{json, Value};

use super::base::{CompletionDelta, ToolCallDelta, Usage};
use crate::models::message::Message;
use crate::models::role::Role;
use crate::models::tool::Tool;

/// Convert messages to the chat completions wire format.
///
/// Application state never leaves the agent: it is stripped from `custom_content`
/// and the field is dropped entirely when nothing else is left in it.
pub fn messages_to_dial_spec(system: Option<&str>, messages: &[Message]) -> Result<Vec<Value>> {
    let mut spec = Vec::with_capacity(messages.len() + 1);
    if let Some(system) = system {
        spec.push(json!({"role": "system", "content": system}));
    }

    for message in messages {
        let mut message = message.clone();
        if let Some(custom) = message.custom_content.as_mut() {
            custom.state = None;
            if custom.is_empty() {
                message.custom_content = None;
            }
        }
        if message.role == Role::Tool && message.content.is_none() {
            message.content = Some(String::new());
        }
        spec.push(serde_json::to_value(&message)?);
    }

    Ok(spec)
}

/// Convert tool definitions to the chat completions wire format
pub fn tools_to_dial_spec(tools: &[Tool]) -> Result<Vec<Value>> {
    let mut tool_names = std::collections::HashSet::new();
    let mut result = Vec::new();

    for tool in tools {
        if !tool_names.insert(&tool.name) {
            return Err(anyhow!("Duplicate tool name: {}", tool.name));
        }

        result.push(json!({
            "type": "function",
            "function": {
                "name": tool.name,
                "description": tool.description,
                "parameters": tool.parameters,
            }
        }));
    }

    Ok(result)
}

/// Parse one `data:` payload of a streamed completion
pub fn parse_stream_chunk(payload: &str) -> Result<CompletionDelta> {
    let chunk: Value = serde_json::from_str(payload)
        .map_err(|e| anyhow!("Malformed completion chunk: {} ({})", e, payload))?;

    if let Some(error) = chunk.get("error") {
        if let Some(err) = check_context_length_error(error) {
            return Err(err.into());
        }
        return Err(anyhow!("DIAL API error: {}", error));
    }

    let delta = &chunk["choices"][0]["delta"];
    let content = delta
        .get("content")
        .and_then(Value::as_str)
        .filter(|text| !text.is_empty())
        .map(String::from);

    let tool_calls = delta
        .get("tool_calls")
        .and_then(Value::as_array)
        .map(|calls| calls.iter().map(tool_call_delta).collect())
        .unwrap_or_default();

    Ok(CompletionDelta {
        content,
        tool_calls,
        usage: get_usage(&chunk),
    })
}

fn tool_call_delta(call: &Value) -> ToolCallDelta {
    let text = |value: &Value| value.as_str().map(String::from);
    ToolCallDelta {
        index: call.get("index").and_then(Value::as_u64).unwrap_or(0) as usize,
        id: text(&call["id"]),
        name: text(&call["function"]["name"]),
        arguments: text(&call["function"]["arguments"]),
    }
}

pub fn get_usage(data: &Value) -> Option<Usage> {
    let usage = data.get("usage").filter(|u| u.is_object())?;
    let tokens = |key: &str| usage.get(key).and_then(Value::as_i64).map(|v| v as i32);

    let input_tokens = tokens("prompt_tokens");
    let output_tokens = tokens("completion_tokens");
    let total_tokens = tokens("total_tokens").or(match (input_tokens, output_tokens) {
        (Some(input), Some(output)) => Some(input + output),
        _ => None,
    });

    Some(Usage::new(input_tokens, output_tokens, total_tokens))
}

#[derive(Debug, thiserror::Error)]
#[error("Context length exceeded. Message: {0}")]
pub struct ContextLengthExceededError(String);

pub fn check_context_length_error(error: &Value) -> Option<ContextLengthExceededError> {
    let code = error.get("code")?.as_str()?;
    if code == "context_length_exceeded" || code == "string_above_max_length" {
        let message = error
            .get("message")
            .and_then(|m| m.as_str())
            .unwrap_or("Unknown error")
            .to_string();
        Some(ContextLengthExceededError(message))
    } else {
        None
    }
}
