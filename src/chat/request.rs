use crate::chat::catalog::{Entitlements, ModelCatalog, ModelResolution};
use crate::chat::message::{BackendMessage, normalize_messages};
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const BACKEND_LOCALE: &str = "en-CN";
pub const SYSTEM_INSTRUCTION_TAG: &str = "markdown";
pub const DEFAULT_TEMPERATURE: f64 = 1.0;

const SYSTEM_SEPARATOR: &str = "\n\n";

/// OpenAI-shaped chat completion request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChatRequest {
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub messages: Vec<Value>,
    #[serde(default)]
    pub stream: bool,
    #[serde(default)]
    pub temperature: Option<f64>,
}

impl ChatRequest {
    /// Temperature sent upstream. Zero cannot be told apart from "unset" and becomes 1.0.
    pub fn effective_temperature(&self) -> f64 {
        match self.temperature {
            Some(t) if t != 0.0 => t,
            _ => DEFAULT_TEMPERATURE,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BackendRequest {
    pub debug: bool,
    pub locale: String,
    pub messages: Vec<BackendMessage>,
    pub provider: String,
    pub model: String,
    pub temperature: f64,
    pub system_instruction: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub additional_system_instructions: Option<String>,
}

/// Result of translating one request, with what was dropped or substituted along the way.
#[derive(Debug, Clone)]
pub struct Translation {
    pub request: BackendRequest,
    pub resolution: ModelResolution,
    pub dropped_messages: usize,
}

pub fn translate_request(
    req: &ChatRequest,
    catalog: &ModelCatalog,
    entitlements: &Entitlements,
) -> Translation {
    let (canonical, dropped_messages) = normalize_messages(&req.messages);

    let mut system_fragments = Vec::new();
    let mut messages = Vec::with_capacity(canonical.len());
    for msg in &canonical {
        if msg.is_system() {
            system_fragments.push(msg.content.as_str());
        } else {
            messages.push(msg.to_backend());
        }
    }

    let resolution = catalog.resolve(&req.model, entitlements);
    let additional_system_instructions =
        (!system_fragments.is_empty()).then(|| system_fragments.join(SYSTEM_SEPARATOR));

    Translation {
        request: BackendRequest {
            debug: false,
            locale: BACKEND_LOCALE.to_string(),
            messages,
            provider: resolution.provider.clone(),
            model: resolution.model.clone(),
            temperature: req.effective_temperature(),
            system_instruction: SYSTEM_INSTRUCTION_TAG.to_string(),
            additional_system_instructions,
        },
        resolution,
        dropped_messages,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn request(body: Value) -> ChatRequest {
        serde_json::from_value(body).expect("chat request")
    }

    fn translate(body: Value) -> Translation {
        translate_request(
            &request(body),
            &ModelCatalog::builtin(),
            &Entitlements::default(),
        )
    }

    #[test]
    fn system_message_moves_to_instructions() {
        let out = translate(json!({
            "model": "gpt-4o",
            "messages": [
                {"role": "system", "content": "Be terse"},
                {"role": "user", "content": "Hi"}
            ]
        }));
        let req = out.request;
        assert_eq!(req.temperature, 1.0);
        assert_eq!(req.additional_system_instructions.as_deref(), Some("Be terse"));
        assert_eq!(req.messages.len(), 1);
        assert_eq!(req.messages[0].author, "user");
        assert_eq!(req.messages[0].content.text, "Hi");
        assert_eq!(req.system_instruction, "markdown");
        assert_eq!(req.locale, "en-CN");
        assert!(!req.debug);
    }

    #[test]
    fn multiple_system_messages_join_in_order() {
        let out = translate(json!({
            "model": "gpt-4o",
            "messages": [
                {"role": "system", "content": "one"},
                {"role": "user", "content": "q"},
                {"role": "system", "content": [{"type": "text", "text": "two"}]},
                {"role": "system", "content": "one"}
            ]
        }));
        assert_eq!(
            out.request.additional_system_instructions.as_deref(),
            Some("one\n\ntwo\n\none")
        );
        assert_eq!(out.request.messages.len(), 1);
    }

    #[test]
    fn no_system_messages_omits_instructions_field() {
        let out = translate(json!({
            "model": "gpt-4o",
            "messages": [{"role": "user", "content": "Hi"}]
        }));
        let value = serde_json::to_value(&out.request).expect("serialize");
        assert!(value.get("additional_system_instructions").is_none());
    }

    #[test]
    fn non_system_order_is_preserved() {
        let out = translate(json!({
            "model": "gpt-4o",
            "messages": [
                {"role": "user", "content": "1"},
                {"role": "assistant", "content": "2"},
                {"role": "system", "content": "s"},
                {"role": "user", "content": [{"type": "text", "text": "3"}]}
            ]
        }));
        let texts: Vec<_> = out
            .request
            .messages
            .iter()
            .map(|m| (m.author.as_str(), m.content.text.as_str()))
            .collect();
        assert_eq!(texts, vec![("user", "1"), ("assistant", "2"), ("user", "3")]);
    }

    #[test]
    fn temperature_zero_and_absent_default_to_one() {
        let zero = request(json!({"model": "m", "messages": [], "temperature": 0}));
        assert_eq!(zero.effective_temperature(), 1.0);
        let absent = request(json!({"model": "m", "messages": []}));
        assert_eq!(absent.effective_temperature(), 1.0);
        let set = request(json!({"model": "m", "messages": [], "temperature": 0.3}));
        assert_eq!(set.effective_temperature(), 0.3);
    }

    #[test]
    fn unknown_model_resolves_to_default() {
        let out = translate(json!({"model": "not-a-real-model", "messages": []}));
        assert_eq!(out.request.model, "gpt-3.5-turbo");
        assert_eq!(out.request.provider, "openai");
        assert!(out.resolution.substituted);
    }

    #[test]
    fn dropped_messages_are_counted() {
        let out = translate(json!({
            "model": "gpt-4o",
            "messages": [{"role": "user", "content": "ok"}, "bogus", null]
        }));
        assert_eq!(out.dropped_messages, 2);
        assert_eq!(out.request.messages.len(), 1);
    }
}
