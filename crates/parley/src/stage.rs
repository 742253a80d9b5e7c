//! Progress reporting towards the calling UI.
//!
//! A [`Choice`] is the single answer being streamed back to the client. While the
//! agent works it can open [`Stage`]s on the choice, one per tool invocation, and
//! write rich content and attachments into them. Everything here is cosmetic: if
//! nobody is listening the events are dropped.

use serde::Serialize;
use serde_json::Value;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::models::message::Attachment;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StageStatus {
    Completed,
    Failed,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ChoiceEvent {
    Content(String),
    Attachment(Attachment),
    StageOpened { index: usize, name: String },
    StageContent { index: usize, content: String },
    StageAttachment { index: usize, attachment: Attachment },
    StageClosed { index: usize, status: StageStatus },
    State(Value),
}

/// Handle on the answer being streamed to the client
#[derive(Clone)]
pub struct Choice {
    tx: mpsc::UnboundedSender<ChoiceEvent>,
    next_stage: Arc<AtomicUsize>,
}

impl Choice {
    /// Create a choice together with the receiving end of its events
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<ChoiceEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let choice = Self {
            tx,
            next_stage: Arc::new(AtomicUsize::new(0)),
        };
        (choice, rx)
    }

    fn send(&self, event: ChoiceEvent) {
        if self.tx.send(event).is_err() {
            tracing::trace!("choice receiver dropped, discarding event");
        }
    }

    pub fn append_content<S: Into<String>>(&self, content: S) {
        self.send(ChoiceEvent::Content(content.into()));
    }

    pub fn add_attachment(&self, attachment: Attachment) {
        self.send(ChoiceEvent::Attachment(attachment));
    }

    pub fn set_state(&self, state: Value) {
        self.send(ChoiceEvent::State(state));
    }

    /// Open a new stage; stage indexes are unique within the choice
    pub fn open_stage<S: Into<String>>(&self, name: S) -> Stage {
        let index = self.next_stage.fetch_add(1, Ordering::SeqCst);
        self.send(ChoiceEvent::StageOpened {
            index,
            name: name.into(),
        });
        Stage {
            index,
            tx: self.tx.clone(),
        }
    }
}

/// A progress channel for a single tool invocation
pub struct Stage {
    index: usize,
    tx: mpsc::UnboundedSender<ChoiceEvent>,
}

impl Stage {
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn append_content<S: Into<String>>(&self, content: S) {
        let _ = self.tx.send(ChoiceEvent::StageContent {
            index: self.index,
            content: content.into(),
        });
    }

    pub fn add_attachment(&self, attachment: Attachment) {
        let _ = self.tx.send(ChoiceEvent::StageAttachment {
            index: self.index,
            attachment,
        });
    }

    pub fn close(self, status: StageStatus) {
        let _ = self.tx.send(ChoiceEvent::StageClosed {
            index: self.index,
            status,
        });
    }
}

/// Drain every event currently queued on the receiver
pub fn drain(rx: &mut mpsc::UnboundedReceiver<ChoiceEvent>) -> Vec<ChoiceEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_stage_lifecycle() {
        let (choice, mut rx) = Choice::channel();
        let first = choice.open_stage("RagTool");
        let second = choice.open_stage("execute_code");
        first.append_content("## Request arguments: \n");
        second.add_attachment(Attachment::new("files/x.png", "image/png", "x.png"));
        first.close(StageStatus::Completed);
        second.close(StageStatus::Failed);
        choice.append_content("done");
        choice.set_state(json!({"k": 1}));

        let events = drain(&mut rx);
        assert_eq!(events.len(), 8);
        assert_eq!(
            events[0],
            ChoiceEvent::StageOpened {
                index: 0,
                name: "RagTool".into()
            }
        );
        assert_eq!(
            events[1],
            ChoiceEvent::StageOpened {
                index: 1,
                name: "execute_code".into()
            }
        );
        assert!(matches!(events[3], ChoiceEvent::StageAttachment { index: 1, .. }));
        assert_eq!(
            events[5],
            ChoiceEvent::StageClosed {
                index: 1,
                status: StageStatus::Failed
            }
        );
        assert_eq!(events[7], ChoiceEvent::State(json!({"k": 1})));
    }

    #[test]
    fn test_dropped_receiver_is_ignored() {
        let (choice, rx) = Choice::channel();
        drop(rx);
        choice.append_content("nobody is listening");
        choice.open_stage("tool").close(StageStatus::Completed);
    }
}
