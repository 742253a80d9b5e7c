use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::{AgentError, AgentResult};

/// A tool that can be used by a model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Tool {
    /// The name of the tool
    pub name: String,
    /// A description of what the tool does
    pub description: String,
    /// JSON schema of the parameters the tool accepts
    pub parameters: Value,
}

impl Tool {
    /// Create a new tool with the given name and description
    pub fn new<N, D>(name: N, description: D, parameters: Value) -> Self
    where
        N: Into<String>,
        D: Into<String>,
    {
        Tool {
            name: name.into(),
            description: description.into(),
            parameters,
        }
    }
}

/// The function half of a tool call, exactly as the model produced it
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct FunctionCall {
    pub name: String,
    /// Raw JSON text; only parsed once the whole call has been received
    pub arguments: String,
}

/// A tool call requested by the model
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolCall {
    pub id: String,
    #[serde(rename = "type", default = "function_kind")]
    pub kind: String,
    pub function: FunctionCall,
}

fn function_kind() -> String {
    "function".to_string()
}

impl ToolCall {
    /// Create a new tool call with the given id, function name and raw arguments
    pub fn new<I, N, A>(id: I, name: N, arguments: A) -> Self
    where
        I: Into<String>,
        N: Into<String>,
        A: Into<String>,
    {
        Self {
            id: id.into(),
            kind: function_kind(),
            function: FunctionCall {
                name: name.into(),
                arguments: arguments.into(),
            },
        }
    }

    pub fn name(&self) -> &str {
        &self.function.name
    }

    /// Parse the accumulated argument text. An empty string is treated as `{}`.
    pub fn parse_arguments(&self) -> AgentResult<Value> {
        let raw = self.function.arguments.trim();
        if raw.is_empty() {
            return Ok(Value::Object(Default::default()));
        }
        serde_json::from_str(raw).map_err(|e| {
            AgentError::InvalidParameters(format!(
                "Could not interpret tool use parameters for id {}: {}",
                self.id, e
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_tool_call_wire_shape() {
        let call = ToolCall::new("call_1", "RagTool", r#"{"request":"q"}"#);
        let value = serde_json::to_value(&call).unwrap();
        assert_eq!(
            value,
            json!({
                "id": "call_1",
                "type": "function",
                "function": {"name": "RagTool", "arguments": "{\"request\":\"q\"}"}
            })
        );
    }

    #[test]
    fn test_parse_arguments() {
        let call = ToolCall::new("1", "echo", r#"{"message": "hi"}"#);
        assert_eq!(call.parse_arguments().unwrap(), json!({"message": "hi"}));

        let empty = ToolCall::new("2", "echo", "");
        assert_eq!(empty.parse_arguments().unwrap(), json!({}));
    }

    #[test]
    fn test_parse_arguments_invalid() {
        let call = ToolCall::new("3", "echo", r#"{"message": "#);
        match call.parse_arguments() {
            Err(AgentError::InvalidParameters(msg)) => {
                assert!(msg.starts_with("Could not interpret tool use parameters for id 3"))
            }
            other => panic!("Expected InvalidParameters, got {:?}", other),
        }
    }
}
