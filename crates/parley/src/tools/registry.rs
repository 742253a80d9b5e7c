use std::collections::HashMap;
use std::sync::Arc;

use super::handler::ToolHandler;
use crate::errors::{AgentError, AgentResult};
use crate::models::tool::Tool;

/// Tools available to the agent, addressed by name and kept in registration order
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: Vec<Arc<dyn ToolHandler>>,
    by_name: HashMap<String, usize>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tool: Arc<dyn ToolHandler>) -> AgentResult<()> {
        let name = tool.name().to_string();
        if self.by_name.contains_key(&name) {
            return Err(AgentError::InvalidParameters(format!(
                "Duplicate tool name: {}",
                name
            )));
        }
        tracing::info!(tool = %name, "registered tool");
        self.by_name.insert(name, self.tools.len());
        self.tools.push(tool);
        Ok(())
    }

    /// Builder style registration
    pub fn with_tool(mut self, tool: Arc<dyn ToolHandler>) -> AgentResult<Self> {
        self.register(tool)?;
        Ok(self)
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn ToolHandler>> {
        self.by_name.get(name).map(|&i| Arc::clone(&self.tools[i]))
    }

    /// Descriptors of every registered tool, as offered to the model
    pub fn tools(&self) -> Vec<Tool> {
        self.tools.iter().map(|tool| tool.tool()).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}
