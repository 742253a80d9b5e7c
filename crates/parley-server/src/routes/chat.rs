use crate::chunks::{error_payload, sse_data, ChunkWriter, ResponseAggregate, DONE};
use crate::state::AppState;
use axum::{
    extract::{Path, State},
    http::{self, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use bytes::Bytes;
use futures::Stream;
use parley::agent::ChatRequest;
use parley::models::message::Message;
use parley::stage::{drain, Choice};
use serde::Deserialize;
use std::{
    convert::Infallible,
    pin::Pin,
    task::{Context, Poll},
};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

#[derive(Debug, Deserialize)]
pub struct ChatCompletionRequest {
    pub messages: Vec<Message>,
    #[serde(default)]
    pub stream: bool,
}

/// Streams server-sent events produced by a background task
pub struct SseResponse {
    rx: ReceiverStream<String>,
}

impl SseResponse {
    fn new(rx: ReceiverStream<String>) -> Self {
        Self { rx }
    }
}

impl Stream for SseResponse {
    type Item = Result<Bytes, Infallible>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.rx)
            .poll_next(cx)
            .map(|opt| opt.map(|s| Ok(Bytes::from(s))))
    }
}

impl IntoResponse for SseResponse {
    fn into_response(self) -> Response {
        let body = axum::body::Body::from_stream(self);
        (
            [
                (http::header::CONTENT_TYPE, "text/event-stream"),
                (http::header::CACHE_CONTROL, "no-cache"),
                (http::header::CONNECTION, "keep-alive"),
            ],
            body,
        )
            .into_response()
    }
}

fn error_response(status: StatusCode, message: &str) -> Response {
    (status, Json(error_payload(message))).into_response()
}

/// The end user's key, from `Api-Key` or a bearer token
fn api_key(headers: &HeaderMap) -> Option<String> {
    if let Some(key) = headers.get("api-key").and_then(|v| v.to_str().ok()) {
        return Some(key.to_string());
    }
    headers
        .get(http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(|token| token.trim().to_string())
}

fn conversation_id(headers: &HeaderMap) -> String {
    match headers
        .get("x-conversation-id")
        .and_then(|v| v.to_str().ok())
    {
        Some(id) => id.to_string(),
        None => {
            let id = uuid::Uuid::new_v4().to_string();
            tracing::warn!(
                conversation_id = %id,
                "no conversation id supplied, documents will not be shared between requests"
            );
            id
        }
    }
}

async fn handler(
    State(state): State<AppState>,
    Path(deployment): Path<String>,
    headers: HeaderMap,
    Json(request): Json<ChatCompletionRequest>,
) -> Response {
    let Some(api_key) = api_key(&headers) else {
        return error_response(StatusCode::UNAUTHORIZED, "Missing Api-Key header");
    };
    let conversation_id = conversation_id(&headers);
    tracing::info!(
        deployment = %deployment,
        conversation_id = %conversation_id,
        messages = request.messages.len(),
        stream = request.stream,
        "chat completion request"
    );

    if request.stream {
        stream_reply(state, deployment, request.messages, api_key, conversation_id).into_response()
    } else {
        complete_reply(state, deployment, request.messages, api_key, conversation_id).await
    }
}

fn stream_reply(
    state: AppState,
    deployment: String,
    messages: Vec<Message>,
    api_key: String,
    conversation_id: String,
) -> SseResponse {
    let (tx, rx) = mpsc::channel(100);

    tokio::spawn(async move {
        let mut writer = ChunkWriter::new(deployment);
        let (choice, mut events) = Choice::channel();
        let _ = tx.send(sse_data(&writer.start())).await;

        let request = ChatRequest {
            messages: &messages,
            api_key: &api_key,
            conversation_id: &conversation_id,
        };
        let reply = state.agent.reply(request, &choice);
        tokio::pin!(reply);

        let result = loop {
            tokio::select! {
                result = &mut reply => break result,
                Some(event) = events.recv() => {
                    if tx.send(sse_data(&writer.event(&event))).await.is_err() {
                        tracing::warn!("client disconnected");
                        return;
                    }
                }
            }
        };
        for event in drain(&mut events) {
            let _ = tx.send(sse_data(&writer.event(&event))).await;
        }

        let last = match result {
            Ok(reply) => {
                tracing::info!(iterations = reply.iterations, "reply finished");
                writer.finish()
            }
            Err(e) => {
                tracing::error!("reply failed: {}", e);
                error_payload(&e.to_string())
            }
        };
        let _ = tx.send(sse_data(&last)).await;
        let _ = tx.send(DONE.to_string()).await;
    });

    SseResponse::new(ReceiverStream::new(rx))
}

async fn complete_reply(
    state: AppState,
    deployment: String,
    messages: Vec<Message>,
    api_key: String,
    conversation_id: String,
) -> Response {
    let (choice, mut events) = Choice::channel();
    let request = ChatRequest {
        messages: &messages,
        api_key: &api_key,
        conversation_id: &conversation_id,
    };

    match state.agent.reply(request, &choice).await {
        Ok(reply) => {
            tracing::info!(iterations = reply.iterations, "reply finished");
            let mut aggregate = ResponseAggregate::new();
            for event in drain(&mut events) {
                aggregate.push(event);
            }
            Json(ChunkWriter::new(deployment).response(aggregate)).into_response()
        }
        Err(e) => {
            tracing::error!("reply failed: {}", e);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string())
        }
    }
}

pub fn routes(state: AppState) -> Router {
    Router::new()
        .route(
            "/openai/deployments/:deployment/chat/completions",
            post(handler),
        )
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use async_trait::async_trait;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use parley::agent::{Agent, AgentConfig};
    use parley::providers::base::{
        CompletionDelta, CompletionRequest, CompletionStream, Provider,
    };
    use parley::tools::ToolRegistry;
    use serde_json::{json, Value};
    use std::sync::{Arc, Mutex};
    use tower::ServiceExt;

    /// Answers every request with the next scripted reply, or fails when out of replies
    struct ScriptedProvider {
        replies: Mutex<Vec<&'static str>>,
        keys: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl Provider for ScriptedProvider {
        async fn stream(&self, request: CompletionRequest<'_>) -> Result<CompletionStream> {
            self.keys.lock().unwrap().push(request.api_key.to_string());
            let mut replies = self.replies.lock().unwrap();
            if replies.is_empty() {
                anyhow::bail!("Request failed: 429 Too Many Requests");
            }
            let text = replies.remove(0);
            let deltas: Vec<Result<CompletionDelta>> = text
                .split_inclusive(' ')
                .map(|word| Ok(CompletionDelta::text(word)))
                .collect();
            Ok(Box::pin(futures::stream::iter(deltas)))
        }
    }

    fn app(replies: Vec<&'static str>) -> (Router, Arc<Mutex<Vec<String>>>) {
        let keys = Arc::new(Mutex::new(Vec::new()));
        let provider = ScriptedProvider {
            replies: Mutex::new(replies),
            keys: keys.clone(),
        };
        let agent = Agent::new(
            Arc::new(provider),
            ToolRegistry::new(),
            AgentConfig::new("gpt-4o"),
        )
        .unwrap();
        (crate::routes::configure(AppState::new(agent)), keys)
    }

    fn chat_request(body: Value, api_key: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder()
            .method("POST")
            .uri("/openai/deployments/parley/chat/completions")
            .header("content-type", "application/json")
            .header("x-conversation-id", "conv-1");
        if let Some(key) = api_key {
            builder = builder.header("api-key", key);
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    async fn body_text(response: Response) -> String {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    fn data_payloads(body: &str) -> Vec<&str> {
        body.split("\n\n")
            .filter_map(|event| event.strip_prefix("data: "))
            .collect()
    }

    #[tokio::test]
    async fn test_streamed_reply() {
        let (app, keys) = app(vec!["Hello there."]);
        let response = app
            .oneshot(chat_request(
                json!({"messages": [{"role": "user", "content": "Hi"}], "stream": true}),
                Some("user-key"),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get("content-type").unwrap(),
            "text/event-stream"
        );

        let body = body_text(response).await;
        let payloads = data_payloads(&body);
        assert_eq!(payloads.last(), Some(&"[DONE]"));

        let chunks: Vec<Value> = payloads[..payloads.len() - 1]
            .iter()
            .map(|p| serde_json::from_str(p).unwrap())
            .collect();
        assert_eq!(chunks[0]["choices"][0]["delta"]["role"], "assistant");
        assert_eq!(chunks[0]["model"], "parley");

        let content: String = chunks
            .iter()
            .filter_map(|c| c["choices"][0]["delta"]["content"].as_str())
            .collect();
        assert_eq!(content, "Hello there.");
        assert!(chunks
            .iter()
            .any(|c| c["choices"][0]["delta"]["custom_content"]["state"].is_object()));
        assert_eq!(
            chunks.last().unwrap()["choices"][0]["finish_reason"],
            "stop"
        );
        assert_eq!(keys.lock().unwrap().as_slice(), ["user-key".to_string()]);
    }

    #[tokio::test]
    async fn test_stream_reports_provider_failure() {
        let (app, _) = app(vec![]);
        let response = app
            .oneshot(chat_request(
                json!({"messages": [{"role": "user", "content": "Hi"}], "stream": true}),
                Some("user-key"),
            ))
            .await
            .unwrap();

        let body = body_text(response).await;
        let payloads = data_payloads(&body);
        assert_eq!(payloads.last(), Some(&"[DONE]"));
        let error: Value = serde_json::from_str(payloads[payloads.len() - 2]).unwrap();
        assert!(error["error"]["message"]
            .as_str()
            .unwrap()
            .contains("429 Too Many Requests"));
    }

    #[tokio::test]
    async fn test_non_streamed_reply() {
        let (app, _) = app(vec!["Just one answer."]);
        let response = app
            .oneshot(chat_request(
                json!({"messages": [{"role": "user", "content": "Hi"}]}),
                Some("user-key"),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body: Value = serde_json::from_str(&body_text(response).await).unwrap();
        assert_eq!(body["object"], "chat.completion");
        assert_eq!(body["choices"][0]["message"]["content"], "Just one answer.");
        assert_eq!(
            body["choices"][0]["message"]["custom_content"]["state"],
            json!({"tool_call_history": []})
        );
    }

    #[tokio::test]
    async fn test_bearer_token_is_accepted() {
        let (app, keys) = app(vec!["ok"]);
        let request = Request::builder()
            .method("POST")
            .uri("/openai/deployments/parley/chat/completions")
            .header("content-type", "application/json")
            .header("authorization", "Bearer token-123")
            .body(Body::from(
                json!({"messages": [{"role": "user", "content": "Hi"}]}).to_string(),
            ))
            .unwrap();

        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(keys.lock().unwrap().as_slice(), ["token-123".to_string()]);
    }

    #[tokio::test]
    async fn test_missing_api_key() {
        let (app, keys) = app(vec!["unused"]);
        let response = app
            .oneshot(chat_request(
                json!({"messages": [{"role": "user", "content": "Hi"}]}),
                None,
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert!(keys.lock().unwrap().is_empty());
    }
}
