use anyhow::{anyhow, Result};
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};
use std::time::Duration;

use super::base::{CompletionRequest, CompletionStream, Provider};
use super::configs::DialProviderConfig;
use super::streaming::SseDecoder;
use super::utils::{
    check_context_length_error, messages_to_dial_spec, parse_stream_chunk, tools_to_dial_spec,
};

/// Streams chat completions from a DIAL deployment using the caller's key
pub struct DialProvider {
    client: Client,
    config: DialProviderConfig,
}

impl DialProvider {
    pub fn new(config: DialProviderConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(600)) // 10 minutes timeout
            .build()?;

        Ok(Self { client, config })
    }

    fn payload(request: &CompletionRequest<'_>) -> Result<Value> {
        let messages = messages_to_dial_spec(request.system, request.messages)?;
        let mut payload = json!({
            "messages": messages,
            "stream": true,
        });

        if !request.tools.is_empty() {
            payload["tools"] = json!(tools_to_dial_spec(request.tools)?);
        }

        Ok(payload)
    }
}

#[async_trait]
impl Provider for DialProvider {
    async fn stream(&self, request: CompletionRequest<'_>) -> Result<CompletionStream> {
        let url = self.config.completions_url(request.deployment);
        let payload = Self::payload(&request)?;

        tracing::debug!(
            deployment = request.deployment,
            messages = request.messages.len(),
            tools = request.tools.len(),
            "requesting completion"
        );

        let response = self
            .client
            .post(&url)
            .header("Api-Key", request.api_key)
            .json(&payload)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let error = serde_json::from_str::<Value>(&body)
                .ok()
                .and_then(|v| v.get("error").cloned());
            if let Some(err) = error.as_ref().and_then(check_context_length_error) {
                return Err(err.into());
            }
            return Err(match status {
                StatusCode::TOO_MANY_REQUESTS => anyhow!("Rate limited by DIAL: {}", body),
                status if status.is_server_error() => {
                    anyhow!("Server error: {}\n{}", status, body)
                }
                status => anyhow!("Request failed: {}\n{}", status, body),
            });
        }

        let mut bytes = response.bytes_stream();
        Ok(Box::pin(async_stream::try_stream! {
            let mut decoder = SseDecoder::new();
            let mut finished = false;

            'read: while let Some(chunk) = bytes.next().await {
                for data in decoder.push(&chunk?) {
                    if data == "[DONE]" {
                        finished = true;
                        break 'read;
                    }
                    yield parse_stream_chunk(&data)?;
                }
            }

            if !finished {
                for data in decoder.finish() {
                    if data == "[DONE]" {
                        break;
                    }
                    yield parse_stream_chunk(&data)?;
                }
            }
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::message::Message;
    use crate::models::tool::Tool;
    use crate::providers::base::{CompletionDelta, ToolCallDelta, Usage};
    use futures::TryStreamExt;
    use wiremock::matchers::{body_partial_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn sse(chunks: &[Value]) -> String {
        let mut body: String = chunks
            .iter()
            .map(|chunk| format!("data: {}\n\n", chunk))
            .collect();
        body.push_str("data: [DONE]\n\n");
        body
    }

    async fn setup_mock_server(body: String) -> (MockServer, DialProvider) {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/openai/deployments/gpt-4o/chat/completions"))
            .and(query_param("api-version", "2024-02-01"))
            .and(header("Api-Key", "user-key"))
            .and(body_partial_json(json!({"stream": true})))
            .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
            .mount(&mock_server)
            .await;

        let config = DialProviderConfig::new(mock_server.uri()).with_api_version("2024-02-01");
        let provider = DialProvider::new(config).unwrap();
        (mock_server, provider)
    }

    fn request<'a>(messages: &'a [Message], tools: &'a [Tool]) -> CompletionRequest<'a> {
        CompletionRequest {
            deployment: "gpt-4o",
            system: Some("You are a helpful assistant."),
            messages,
            tools,
            api_key: "user-key",
        }
    }

    #[tokio::test]
    async fn test_stream_text() -> Result<()> {
        let body = sse(&[
            json!({"choices": [{"index": 0, "delta": {"role": "assistant", "content": "Hello"}}]}),
            json!({"choices": [{"index": 0, "delta": {"content": "! How can I help?"}}]}),
            json!({"choices": [{"index": 0, "delta": {}, "finish_reason": "stop"}],
                   "usage": {"prompt_tokens": 12, "completion_tokens": 15, "total_tokens": 27}}),
        ]);
        let (_server, provider) = setup_mock_server(body).await;

        let messages = vec![Message::user().with_text("Hello?")];
        let deltas: Vec<CompletionDelta> = provider
            .stream(request(&messages, &[]))
            .await?
            .try_collect()
            .await?;

        let text: String = deltas.iter().filter_map(|d| d.content.clone()).collect();
        assert_eq!(text, "Hello! How can I help?");
        assert_eq!(
            deltas.last().and_then(|d| d.usage.clone()),
            Some(Usage::new(Some(12), Some(15), Some(27)))
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_stream_tool_call_fragments() -> Result<()> {
        let body = sse(&[
            json!({"choices": [{"index": 0, "delta": {"tool_calls": [
                {"index": 0, "id": "call_1", "type": "function",
                 "function": {"name": "execute_code", "arguments": ""}}]}}]}),
            json!({"choices": [{"index": 0, "delta": {"tool_calls": [
                {"index": 0, "function": {"arguments": "{\"code\":"}}]}}]}),
            json!({"choices": [{"index": 0, "delta": {"tool_calls": [
                {"index": 0, "function": {"arguments": " \"1+1\"}"}}]}}]}),
        ]);
        let (_server, provider) = setup_mock_server(body).await;

        let messages = vec![Message::user().with_text("compute")];
        let tools = vec![Tool::new(
            "execute_code",
            "Runs code",
            json!({"type": "object", "properties": {"code": {"type": "string"}}}),
        )];
        let deltas: Vec<CompletionDelta> = provider
            .stream(request(&messages, &tools))
            .await?
            .try_collect()
            .await?;

        let fragments: Vec<ToolCallDelta> =
            deltas.into_iter().flat_map(|d| d.tool_calls).collect();
        assert_eq!(fragments.len(), 3);
        assert_eq!(fragments[0].id.as_deref(), Some("call_1"));
        let arguments: String = fragments
            .iter()
            .filter_map(|f| f.arguments.clone())
            .collect();
        assert_eq!(arguments, "{\"code\": \"1+1\"}");
        Ok(())
    }

    #[tokio::test]
    async fn test_request_failure() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401).set_body_string("bad key"))
            .mount(&mock_server)
            .await;

        let provider = DialProvider::new(DialProviderConfig::new(mock_server.uri())).unwrap();
        let messages = vec![Message::user().with_text("hi")];
        let result = provider.stream(request(&messages, &[])).await;

        let err = result.err().unwrap().to_string();
        assert!(err.contains("401"));
        assert!(err.contains("bad key"));
    }

    #[tokio::test]
    async fn test_error_in_stream() {
        let body = sse(&[
            json!({"choices": [{"index": 0, "delta": {"content": "partial"}}]}),
            json!({"error": {"message": "upstream failed"}}),
        ]);
        let (_server, provider) = setup_mock_server(body).await;

        let messages = vec![Message::user().with_text("hi")];
        let result: Result<Vec<CompletionDelta>> = provider
            .stream(request(&messages, &[]))
            .await
            .unwrap()
            .try_collect()
            .await;

        assert!(result.unwrap_err().to_string().contains("upstream failed"));
    }
}
