use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;

use super::handler::{string_argument, ToolCallParams, ToolHandler};
use crate::errors::{AgentError, AgentResult};
use crate::files::FileStorage;
use crate::mcp::{result_text, McpSession, ResourceData};
use crate::models::message::Attachment;
use rmcp::model::Tool;

pub const DEFAULT_TOOL_NAME: &str = "execute_code";

/// Output lines longer than this are cut before they reach the model
pub const MAX_OUTPUT_LINE_CHARS: usize = 200;

const FILES_INSTRUCTIONS: &str =
    "Generated files have been provided to the user, DON'T include links to them in the response!";

/// A file produced by the interpreter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionFile {
    pub name: String,
    pub mime_type: String,
    pub uri: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// What the interpreter reports back. Fields this crate does not know about are
/// passed through to the model untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    #[serde(default)]
    pub output: Vec<String>,
    #[serde(default)]
    pub files: Vec<ExecutionFile>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ExecutionResult {
    fn truncate_output(&mut self) {
        for line in self.output.iter_mut() {
            if let Some((cut, _)) = line.char_indices().nth(MAX_OUTPUT_LINE_CHARS) {
                line.truncate(cut);
            }
        }
    }
}

/// Runs Python code in a remote interpreter reached over MCP
pub struct CodeInterpreterTool {
    session: Arc<dyn McpSession>,
    storage: Arc<dyn FileStorage>,
    definition: Tool,
}

impl CodeInterpreterTool {
    /// Look up the interpreter's tool on the server; fails if it is not offered
    pub async fn new(
        session: Arc<dyn McpSession>,
        storage: Arc<dyn FileStorage>,
        tool_name: &str,
    ) -> AgentResult<Self> {
        let definition = session
            .list_tools()
            .await?
            .into_iter()
            .find(|tool| tool.name == tool_name)
            .ok_or_else(|| AgentError::ToolNotFound(tool_name.to_string()))?;

        Ok(Self {
            session,
            storage,
            definition,
        })
    }

    async fn deliver_file(
        &self,
        params: &ToolCallParams<'_>,
        files_home: &str,
        file: &ExecutionFile,
    ) -> AgentResult<()> {
        let resource = self.session.read_resource(&file.uri).await?;
        let bytes = decode_resource(resource, &file.mime_type)?;
        let url = format!("files/{}/{}", files_home, file.name);
        self.storage
            .upload(params.api_key, &url, bytes, &file.mime_type)
            .await?;

        let attachment = Attachment::new(url, file.mime_type.as_str(), file.name.as_str());
        params.stage.add_attachment(attachment.clone());
        params.choice.add_attachment(attachment);
        Ok(())
    }
}

fn is_text_mime(mime_type: &str) -> bool {
    mime_type.starts_with("text/") || matches!(mime_type, "application/json" | "application/xml")
}

fn decode_resource(resource: ResourceData, mime_type: &str) -> AgentResult<Vec<u8>> {
    let encoded = match resource {
        ResourceData::Text(text) if is_text_mime(mime_type) => return Ok(text.into_bytes()),
        ResourceData::Text(encoded) | ResourceData::Blob(encoded) => encoded,
    };
    STANDARD
        .decode(encoded.trim())
        .map_err(|e| AgentError::ExecutionError(format!("Could not decode generated file: {}", e)))
}

#[async_trait]
impl ToolHandler for CodeInterpreterTool {
    fn name(&self) -> &str {
        &self.definition.name
    }

    fn description(&self) -> &str {
        self.definition.description.as_deref().unwrap_or_default()
    }

    fn parameters(&self) -> Value {
        Value::Object(self.definition.input_schema.as_ref().clone())
    }

    fn show_in_stage(&self) -> bool {
        false
    }

    async fn run(&self, params: &ToolCallParams<'_>) -> AgentResult<String> {
        let arguments = params.tool_call.parse_arguments()?;
        let code = string_argument(&arguments, "code")?;
        let stage = params.stage;

        stage.append_content("## Request arguments: \n");
        stage.append_content(format!("```python\n\r{}\n\r```\n\r", code));
        match arguments.get("session_id") {
            Some(Value::String(id)) => stage.append_content(format!("**session_id**: {}\n\r", id)),
            Some(Value::Null) | None => stage.append_content("New session will be created\n\r"),
            Some(id) => stage.append_content(format!("**session_id**: {}\n\r", id)),
        }
        stage.append_content("## Response: \n");

        let result = self.session.call_tool(self.name(), arguments.clone()).await?;
        if result.is_error == Some(true) {
            return Err(AgentError::ExecutionError(result_text(&result)));
        }
        let text = result
            .content
            .first()
            .and_then(|content| content.as_text())
            .map(|content| content.text.as_str())
            .ok_or_else(|| {
                AgentError::ExecutionError("The interpreter returned no text content".into())
            })?;
        let mut execution: ExecutionResult = serde_json::from_str(text).map_err(|e| {
            AgentError::ExecutionError(format!("Unexpected interpreter response: {}", e))
        })?;

        if !execution.files.is_empty() {
            let files_home = self.storage.appdata_home(params.api_key).await?;
            for file in &execution.files {
                self.deliver_file(params, &files_home, file).await?;
            }
            execution.instructions = Some(FILES_INSTRUCTIONS.to_string());
        }
        execution.truncate_output();

        let pretty = serde_json::to_string_pretty(&execution)?;
        stage.append_content(format!("```json\n\r{}\n\r```\n\r", pretty));
        Ok(serde_json::to_string(&execution)?)
    }
}
