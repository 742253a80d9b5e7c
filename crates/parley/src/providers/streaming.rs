//! Helpers for consuming streamed chat completions: server-sent event framing and
//! reassembly of tool calls that arrive split across many chunks.

use std::collections::BTreeMap;

use super::base::ToolCallDelta;
use crate::models::tool::ToolCall;

/// Incremental decoder for `text/event-stream` bodies.
///
/// Bytes are buffered until a full line is available, so multi-byte characters
/// split across network chunks are decoded correctly. Only `data:` fields are
/// returned; comments, `event:` and `id:` fields are ignored.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Push incoming bytes and return the complete `data:` payloads found so far
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(bytes);

        let mut payloads = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            if let Some(payload) = data_payload(&line) {
                payloads.push(payload);
            }
        }
        payloads
    }

    /// Flush whatever is left once the body has ended
    pub fn finish(&mut self) -> Vec<String> {
        let rest = std::mem::take(&mut self.buffer);
        String::from_utf8_lossy(&rest)
            .lines()
            .filter_map(|line| data_payload(line.as_bytes()))
            .collect()
    }
}

fn data_payload(line: &[u8]) -> Option<String> {
    let line = String::from_utf8_lossy(line);
    let line = line.trim_end_matches(['\r', '\n']);
    let payload = line.strip_prefix("data:")?;
    Some(payload.strip_prefix(' ').unwrap_or(payload).to_string())
}

#[derive(Debug, Default)]
struct PartialToolCall {
    id: Option<String>,
    name: String,
    arguments: String,
}

/// Collects tool call fragments keyed by their stream index.
///
/// Argument text is only concatenated here; it is parsed once the stream has
/// ended and the finished calls are handed to the tools.
#[derive(Debug, Default)]
pub struct ToolCallAccumulator {
    calls: BTreeMap<usize, PartialToolCall>,
}

impl ToolCallAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, delta: &ToolCallDelta) {
        let call = self.calls.entry(delta.index).or_default();
        if call.id.is_none() {
            call.id = delta.id.clone().filter(|id| !id.is_empty());
        }
        if call.name.is_empty() {
            if let Some(name) = &delta.name {
                call.name = name.clone();
            }
        }
        if let Some(arguments) = &delta.arguments {
            call.arguments.push_str(arguments);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }

    pub fn len(&self) -> usize {
        self.calls.len()
    }

    /// Flush the accumulated calls in stream index order
    pub fn finish(self) -> Vec<ToolCall> {
        self.calls
            .into_values()
            .map(|call| {
                let id = call
                    .id
                    .unwrap_or_else(|| format!("call_{}", uuid::Uuid::new_v4().simple()));
                ToolCall::new(id, call.name, call.arguments)
            })
            .collect()
    }
}
