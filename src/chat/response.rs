use crate::chat::id::completion_id;
use crate::chat::message::{ROLE_ASSISTANT, nullable_string};
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const OBJECT_CHUNK: &str = "chat.completion.chunk";
pub const OBJECT_COMPLETION: &str = "chat.completion";
pub const FINISH_STOP: &str = "stop";

/// One event of the backend's streaming reply.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct BackendEvent {
    #[serde(default, deserialize_with = "nullable_string")]
    pub text: String,
    #[serde(default, deserialize_with = "nullable_string")]
    pub reasoning: String,
    #[serde(default)]
    pub finish_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<Value>,
}

impl BackendEvent {
    pub fn is_error(&self) -> bool {
        self.error.as_ref().is_some_and(|e| !e.is_null())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Delta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning_content: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChunkChoice {
    pub index: u32,
    pub delta: Delta,
    pub finish_reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OpenAIChunk {
    pub id: String,
    pub object: String,
    pub created: i64,
    pub model: String,
    pub choices: Vec<ChunkChoice>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AssistantMessage {
    pub role: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub reasoning_content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CompletionChoice {
    pub index: u32,
    pub message: AssistantMessage,
    pub finish_reason: Option<String>,
}

/// Always zero; no tokenizer is involved.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Usage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OpenAICompletion {
    pub id: String,
    pub object: String,
    pub created: i64,
    pub model: String,
    pub choices: Vec<CompletionChoice>,
    pub usage: Usage,
}

/// Envelope fields shared by every chunk of one streamed response.
#[derive(Debug, Clone)]
pub struct StreamEnvelope {
    pub id: String,
    pub created: i64,
    pub model: String,
}

impl StreamEnvelope {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            id: completion_id(),
            created: now_ts(),
            model: model.into(),
        }
    }

    pub fn chunk(&self, event: &BackendEvent) -> OpenAIChunk {
        let delta = if event.text.is_empty() && event.reasoning.is_empty() {
            Delta::default()
        } else {
            Delta {
                role: Some(ROLE_ASSISTANT.to_string()),
                content: non_empty(&event.text),
                reasoning_content: non_empty(&event.reasoning),
            }
        };
        OpenAIChunk {
            id: self.id.clone(),
            object: OBJECT_CHUNK.to_string(),
            created: self.created,
            model: self.model.clone(),
            choices: vec![ChunkChoice {
                index: 0,
                delta,
                finish_reason: event.finish_reason.clone(),
            }],
        }
    }
}

/// Translates one backend event into a standalone chunk.
pub fn event_to_chunk(event: &BackendEvent, model: &str) -> OpenAIChunk {
    StreamEnvelope::new(model).chunk(event)
}

/// Running concatenation of backend events for a non-streaming reply.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Aggregate {
    pub text: String,
    pub reasoning: String,
}

impl Aggregate {
    pub fn push(&mut self, event: &BackendEvent) {
        self.text.push_str(&event.text);
        self.reasoning.push_str(&event.reasoning);
    }

    pub fn extend(&mut self, other: Aggregate) {
        self.text.push_str(&other.text);
        self.reasoning.push_str(&other.reasoning);
    }

    /// Builds the completion. The finish reason is always `stop`, whatever the backend sent.
    pub fn into_completion(self, model: &str) -> OpenAICompletion {
        OpenAICompletion {
            id: completion_id(),
            object: OBJECT_COMPLETION.to_string(),
            created: now_ts(),
            model: model.to_string(),
            choices: vec![CompletionChoice {
                index: 0,
                message: AssistantMessage {
                    role: ROLE_ASSISTANT.to_string(),
                    content: self.text,
                    reasoning_content: self.reasoning,
                },
                finish_reason: Some(FINISH_STOP.to_string()),
            }],
            usage: Usage::default(),
        }
    }
}

impl<'a> FromIterator<&'a BackendEvent> for Aggregate {
    fn from_iter<I: IntoIterator<Item = &'a BackendEvent>>(iter: I) -> Self {
        let mut agg = Aggregate::default();
        for event in iter {
            agg.push(event);
        }
        agg
    }
}

pub fn aggregate_events(events: &[BackendEvent], model: &str) -> OpenAICompletion {
    events.iter().collect::<Aggregate>().into_completion(model)
}

fn non_empty(s: &str) -> Option<String> {
    (!s.is_empty()).then(|| s.to_string())
}

fn now_ts() -> i64 {
    chrono::Utc::now().timestamp()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn text(s: &str) -> BackendEvent {
        BackendEvent {
            text: s.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn chunk_carries_text_and_reasoning() {
        let event = BackendEvent {
            text: "Hel".to_string(),
            reasoning: "hmm".to_string(),
            ..Default::default()
        };
        let chunk = event_to_chunk(&event, "gpt-4o");
        assert_eq!(chunk.object, "chat.completion.chunk");
        assert_eq!(chunk.model, "gpt-4o");
        assert!(chunk.id.starts_with("chatcmpl-"));
        let choice = &chunk.choices[0];
        assert_eq!(choice.index, 0);
        assert_eq!(choice.delta.role.as_deref(), Some("assistant"));
        assert_eq!(choice.delta.content.as_deref(), Some("Hel"));
        assert_eq!(choice.delta.reasoning_content.as_deref(), Some("hmm"));
        assert_eq!(choice.finish_reason, None);
    }

    #[test]
    fn empty_event_still_has_a_choice_with_empty_delta() {
        let chunk = event_to_chunk(&BackendEvent::default(), "m");
        assert_eq!(chunk.choices.len(), 1);
        assert_eq!(chunk.choices[0].delta, Delta::default());
        let value = serde_json::to_value(&chunk).expect("serialize");
        assert_eq!(value["choices"][0]["delta"], json!({}));
        assert_eq!(value["choices"][0]["finish_reason"], Value::Null);
    }

    #[test]
    fn finish_reason_is_copied_verbatim() {
        let event = BackendEvent {
            finish_reason: Some("length".to_string()),
            ..Default::default()
        };
        let chunk = event_to_chunk(&event, "m");
        assert_eq!(chunk.choices[0].finish_reason.as_deref(), Some("length"));
    }

    #[test]
    fn envelope_reuses_id_and_created() {
        let envelope = StreamEnvelope::new("m");
        let a = envelope.chunk(&text("a"));
        let b = envelope.chunk(&text("b"));
        assert_eq!(a.id, b.id);
        assert_eq!(a.created, b.created);
    }

    #[test]
    fn aggregation_concatenates_and_forces_stop() {
        let events = vec![
            text("Hel"),
            text("lo"),
            BackendEvent {
                finish_reason: Some("length".to_string()),
                ..Default::default()
            },
        ];
        let completion = aggregate_events(&events, "gpt-4o");
        assert_eq!(completion.object, "chat.completion");
        let choice = &completion.choices[0];
        assert_eq!(choice.message.role, "assistant");
        assert_eq!(choice.message.content, "Hello");
        assert_eq!(choice.finish_reason.as_deref(), Some("stop"));
        assert_eq!(completion.usage, Usage::default());
    }

    #[test]
    fn aggregation_keeps_reasoning_separate() {
        let events = vec![
            BackendEvent {
                reasoning: "think ".to_string(),
                ..Default::default()
            },
            BackendEvent {
                text: "answer".to_string(),
                reasoning: "more".to_string(),
                ..Default::default()
            },
        ];
        let completion = aggregate_events(&events, "m");
        assert_eq!(completion.choices[0].message.content, "answer");
        assert_eq!(completion.choices[0].message.reasoning_content, "think more");
    }

    #[test]
    fn aggregation_is_associative_over_splits() {
        let events = vec![text("a"), text("b"), text("c")];
        let whole: Aggregate = events.iter().collect();
        let mut split: Aggregate = events[..1].iter().collect();
        split.extend(events[1..].iter().collect());
        assert_eq!(whole, split);
    }

    #[test]
    fn error_field_marks_event() {
        let event: BackendEvent =
            serde_json::from_value(json!({"error": {"message": "quota"}})).expect("event");
        assert!(event.is_error());
        let event: BackendEvent =
            serde_json::from_value(json!({"text": "error handling", "error": null}))
                .expect("event");
        assert!(!event.is_error());
    }
}
