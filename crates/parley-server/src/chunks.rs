//! Chat completion wire format of the gateway: streamed chunks and the
//! aggregated response, including the `custom_content` extension that carries
//! attachments, stages and state.

use parley::models::message::Attachment;
use parley::stage::{ChoiceEvent, StageStatus};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};

pub const DONE: &str = "data: [DONE]\n\n";

/// Frame a payload as a server-sent event
pub fn sse_data(payload: &Value) -> String {
    format!("data: {}\n\n", payload)
}

pub fn error_payload(message: &str) -> Value {
    json!({
        "error": {
            "message": message,
            "type": "runtime_error",
            "code": "500"
        }
    })
}

fn attachment_value(attachment: &Attachment, index: Option<usize>) -> Value {
    let mut value = json!(attachment);
    if let (Some(index), Value::Object(map)) = (index, &mut value) {
        map.insert("index".to_string(), json!(index));
    }
    value
}

/// Builds the chunks of one streamed completion
pub struct ChunkWriter {
    id: String,
    model: String,
    created: u64,
    attachments: usize,
}

impl ChunkWriter {
    pub fn new<S: Into<String>>(model: S) -> Self {
        let created = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default();
        Self {
            id: format!("chatcmpl-{}", uuid::Uuid::new_v4().simple()),
            model: model.into(),
            created,
            attachments: 0,
        }
    }

    fn envelope(&self, object: &str, choice: Value) -> Value {
        json!({
            "id": self.id,
            "object": object,
            "created": self.created,
            "model": self.model,
            "choices": [choice]
        })
    }

    fn chunk(&self, delta: Value, finish_reason: Option<&str>) -> Value {
        self.envelope(
            "chat.completion.chunk",
            json!({"index": 0, "delta": delta, "finish_reason": finish_reason}),
        )
    }

    /// First chunk, announcing the role
    pub fn start(&self) -> Value {
        self.chunk(json!({"role": "assistant"}), None)
    }

    pub fn finish(&self) -> Value {
        self.chunk(json!({}), Some("stop"))
    }

    pub fn event(&mut self, event: &ChoiceEvent) -> Value {
        let delta = match event {
            ChoiceEvent::Content(text) => json!({"content": text}),
            ChoiceEvent::Attachment(attachment) => {
                let index = self.attachments;
                self.attachments += 1;
                json!({"custom_content": {"attachments": [attachment_value(attachment, Some(index))]}})
            }
            ChoiceEvent::StageOpened { index, name } => {
                stage_delta(json!({"index": index, "name": name, "status": null}))
            }
            ChoiceEvent::StageContent { index, content } => {
                stage_delta(json!({"index": index, "content": content}))
            }
            ChoiceEvent::StageAttachment { index, attachment } => stage_delta(json!({
                "index": index,
                "attachments": [attachment_value(attachment, None)]
            })),
            ChoiceEvent::StageClosed { index, status } => {
                stage_delta(json!({"index": index, "status": status}))
            }
            ChoiceEvent::State(state) => json!({"custom_content": {"state": state}}),
        };
        self.chunk(delta, None)
    }

    /// A complete, non streamed response
    pub fn response(&self, aggregate: ResponseAggregate) -> Value {
        let mut message = Map::new();
        message.insert("role".into(), json!("assistant"));
        message.insert("content".into(), json!(aggregate.content));
        let custom_content = aggregate.custom_content();
        if !custom_content.is_empty() {
            message.insert("custom_content".into(), Value::Object(custom_content));
        }
        self.envelope(
            "chat.completion",
            json!({"index": 0, "message": message, "finish_reason": "stop"}),
        )
    }
}

fn stage_delta(stage: Value) -> Value {
    json!({"custom_content": {"stages": [stage]}})
}

#[derive(Debug, Default)]
struct StageSummary {
    name: String,
    content: String,
    attachments: Vec<Value>,
    status: Option<StageStatus>,
}

/// Folds choice events into a single assistant message
#[derive(Debug, Default)]
pub struct ResponseAggregate {
    content: String,
    attachments: Vec<Value>,
    stages: BTreeMap<usize, StageSummary>,
    state: Option<Value>,
}

impl ResponseAggregate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, event: ChoiceEvent) {
        match event {
            ChoiceEvent::Content(text) => self.content.push_str(&text),
            ChoiceEvent::Attachment(attachment) => {
                let index = self.attachments.len();
                self.attachments.push(attachment_value(&attachment, Some(index)));
            }
            ChoiceEvent::StageOpened { index, name } => {
                self.stages.entry(index).or_default().name = name;
            }
            ChoiceEvent::StageContent { index, content } => {
                self.stages.entry(index).or_default().content.push_str(&content);
            }
            ChoiceEvent::StageAttachment { index, attachment } => {
                self.stages
                    .entry(index)
                    .or_default()
                    .attachments
                    .push(attachment_value(&attachment, None));
            }
            ChoiceEvent::StageClosed { index, status } => {
                self.stages.entry(index).or_default().status = Some(status);
            }
            ChoiceEvent::State(state) => self.state = Some(state),
        }
    }

    fn custom_content(self) -> Map<String, Value> {
        let mut custom_content = Map::new();
        if !self.attachments.is_empty() {
            custom_content.insert("attachments".into(), Value::Array(self.attachments));
        }
        if !self.stages.is_empty() {
            let stages = self
                .stages
                .into_iter()
                .map(|(index, stage)| {
                    json!({
                        "index": index,
                        "name": stage.name,
                        "content": stage.content,
                        "attachments": stage.attachments,
                        "status": stage.status,
                    })
                })
                .collect();
            custom_content.insert("stages".into(), Value::Array(stages));
        }
        if let Some(state) = self.state {
            custom_content.insert("state".into(), state);
        }
        custom_content
    }
}
