use async_trait::async_trait;
use futures::StreamExt;
use indoc::indoc;
use serde_json::{json, Value};
use std::sync::Arc;

use super::handler::{string_argument, ToolCallParams, ToolHandler};
use crate::errors::{AgentError, AgentResult};
use crate::files::FileStorage;
use crate::models::message::Message;
use crate::prompt_template::{load_prompt, RAG_AUGMENTATION_TEMPLATE, RAG_SYSTEM_PROMPT};
use crate::providers::base::{CompletionRequest, Provider};
use crate::rag::cache::{DocumentCache, IndexedDocument};
use crate::rag::embeddings::Embedder;
use crate::rag::extractor::extract_from_storage;
use crate::rag::index::FlatL2Index;
use crate::rag::splitter::RecursiveCharacterTextSplitter;

pub const EXTRACTION_FAILED: &str = "Error: Could not extract content from the provided file.";

const DESCRIPTION: &str = indoc! {"
    Performs semantic search on documents to find and answer questions based on relevant content. \
    Supports: PDF, TXT, CSV, HTML. \
    Use this tool when the user asks about the content of a document, needs specific information \
    from a large file or wants to search it for particular topics or keywords. \
    Don't use it when the user wants to read the entire document sequentially. \
    HOW IT WORKS: splits the document into chunks, finds the most relevant sections using semantic \
    search, then answers based only on those sections."};

/// Settings of the retrieval tool
#[derive(Debug, Clone)]
pub struct RagToolConfig {
    /// Chat deployment that writes the answers
    pub deployment: String,
    /// Number of chunks retrieved per question
    pub top_k: usize,
}

/// Answers questions about a stored document from its most relevant chunks
pub struct RagTool {
    provider: Arc<dyn Provider>,
    embedder: Arc<dyn Embedder>,
    storage: Arc<dyn FileStorage>,
    cache: Arc<DocumentCache>,
    splitter: RecursiveCharacterTextSplitter,
    config: RagToolConfig,
}

impl RagTool {
    pub fn new(
        provider: Arc<dyn Provider>,
        embedder: Arc<dyn Embedder>,
        storage: Arc<dyn FileStorage>,
        cache: Arc<DocumentCache>,
        config: RagToolConfig,
    ) -> Self {
        Self {
            provider,
            embedder,
            storage,
            cache,
            splitter: RecursiveCharacterTextSplitter::default(),
            config,
        }
    }

    pub fn with_splitter(mut self, splitter: RecursiveCharacterTextSplitter) -> Self {
        self.splitter = splitter;
        self
    }

    /// Extract, chunk and embed a document. `None` when it has no text.
    async fn index_document(
        &self,
        api_key: &str,
        file_url: &str,
    ) -> AgentResult<Option<IndexedDocument>> {
        let text = extract_from_storage(self.storage.as_ref(), api_key, file_url).await?;
        let chunks = self.splitter.split_text(&text);
        if chunks.is_empty() {
            return Ok(None);
        }

        let vectors = self.embedder.embed(api_key, &chunks).await?;
        if vectors.len() != chunks.len() {
            return Err(AgentError::Provider(format!(
                "Received {} embeddings for {} chunks",
                vectors.len(),
                chunks.len()
            )));
        }
        tracing::info!(file_url, chunks = chunks.len(), "indexed document");
        Ok(Some(IndexedDocument::new(
            FlatL2Index::from_vectors(vectors)?,
            chunks,
        )))
    }
}

fn augment(request: &str, chunks: &[&str]) -> AgentResult<String> {
    let context = json!({
        "context": chunks.join("\n\n---\n\n"),
        "request": request,
    });
    load_prompt(RAG_AUGMENTATION_TEMPLATE, &context)
        .map_err(|e| AgentError::Internal(format!("Failed to render prompt: {}", e)))
}

#[async_trait]
impl ToolHandler for RagTool {
    fn name(&self) -> &str {
        "RagTool"
    }

    fn description(&self) -> &str {
        DESCRIPTION
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "request": {
                    "type": "string",
                    "description": "The search query or question to search for in the document"
                },
                "file_url": {
                    "type": "string",
                    "description": "File URL"
                }
            },
            "required": ["request", "file_url"]
        })
    }

    fn show_in_stage(&self) -> bool {
        false
    }

    async fn run(&self, params: &ToolCallParams<'_>) -> AgentResult<String> {
        let arguments = params.tool_call.parse_arguments()?;
        let request = string_argument(&arguments, "request")?;
        let file_url = string_argument(&arguments, "file_url")?;
        let stage = params.stage;

        stage.append_content("## Request arguments: \n");
        stage.append_content(format!("**Request**: {}\n\r", request));
        stage.append_content(format!("**File URL**: {}\n\r", file_url));

        let document = match self.cache.get(params.conversation_id, file_url) {
            Some(document) => document,
            None => match self.index_document(params.api_key, file_url).await? {
                Some(document) => self.cache.insert(params.conversation_id, file_url, document),
                None => {
                    stage.append_content("## Error: \n\rFailed to extract content from the file.\n\r");
                    return Ok(EXTRACTION_FAILED.to_string());
                }
            },
        };

        let query = self
            .embedder
            .embed(params.api_key, &[request.to_string()])
            .await?
            .pop()
            .ok_or_else(|| AgentError::Provider("No embedding returned for the query".into()))?;
        let chunks = document.nearest(&query, self.config.top_k)?;
        let prompt = augment(request, &chunks)?;

        stage.append_content("## RAG Request: \n");
        stage.append_content(format!("```text\n\r{}\n\r```\n\r", prompt));
        stage.append_content("## Response: \n");

        let messages = [Message::user().with_text(prompt)];
        let mut stream = self
            .provider
            .stream(CompletionRequest {
                deployment: &self.config.deployment,
                system: Some(RAG_SYSTEM_PROMPT),
                messages: &messages,
                tools: &[],
                api_key: params.api_key,
            })
            .await
            .map_err(|e| AgentError::Provider(e.to_string()))?;

        let mut answer = String::new();
        while let Some(delta) = stream.next().await {
            let delta = delta.map_err(|e| AgentError::Provider(e.to_string()))?;
            if let Some(content) = delta.content {
                stage.append_content(content.as_str());
                answer.push_str(&content);
            }
        }
        Ok(answer)
    }
}
