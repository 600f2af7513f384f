use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

pub const ROLE_SYSTEM: &str = "system";
pub const ROLE_USER: &str = "user";
pub const ROLE_ASSISTANT: &str = "assistant";

const PART_SEPARATOR: &str = "\n\n";

/// Reads a string field where an explicit `null` counts as empty.
pub(crate) fn nullable_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

/// A chat message whose `content` is a single string.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct StringContentMessage {
    #[serde(default, deserialize_with = "nullable_string")]
    pub role: String,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning_content: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ContentPart {
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub part_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
}

/// A chat message whose `content` is an ordered list of parts.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PartedContentMessage {
    #[serde(default, deserialize_with = "nullable_string")]
    pub role: String,
    pub content: Vec<ContentPart>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning_content: Option<String>,
}

/// Inbound message in either of the two shapes clients send.
///
/// Variants are tried in declaration order, so a message only becomes `Parted`
/// when it does not type-check as `Text`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum InboundMessage {
    Text(StringContentMessage),
    Parted(PartedContentMessage),
}

impl InboundMessage {
    pub fn from_value(value: &Value) -> Result<Self, serde_json::Error> {
        InboundMessage::deserialize(value)
    }

    pub fn role(&self) -> &str {
        match self {
            Self::Text(m) => &m.role,
            Self::Parted(m) => &m.role,
        }
    }

    pub fn text_content(&self) -> String {
        match self {
            Self::Text(m) => m.content.clone().unwrap_or_default(),
            Self::Parted(m) => join_present(m.content.iter().map(|p| p.text.as_deref())),
        }
    }

    pub fn reasoning(&self) -> Option<String> {
        match self {
            Self::Text(m) => m.reasoning_content.clone().filter(|s| !s.is_empty()),
            Self::Parted(m) => m
                .reasoning_content
                .clone()
                .filter(|s| !s.is_empty())
                .or_else(|| {
                    let joined = join_present(m.content.iter().map(|p| p.reasoning.as_deref()));
                    (!joined.is_empty()).then_some(joined)
                }),
        }
    }

    pub fn to_canonical(&self) -> CanonicalMessage {
        CanonicalMessage {
            role: self.role().to_string(),
            content: self.text_content(),
            reasoning: self.reasoning(),
        }
    }
}

fn join_present<'a>(items: impl Iterator<Item = Option<&'a str>>) -> String {
    items.flatten().collect::<Vec<_>>().join(PART_SEPARATOR)
}

/// Shape-independent message produced by normalization.
#[derive(Debug, Clone, PartialEq)]
pub struct CanonicalMessage {
    pub role: String,
    pub content: String,
    pub reasoning: Option<String>,
}

impl CanonicalMessage {
    pub fn is_system(&self) -> bool {
        self.role == ROLE_SYSTEM
    }

    pub fn to_backend(&self) -> BackendMessage {
        // The backend has no system author.
        let author = if self.is_system() {
            ROLE_USER
        } else {
            self.role.as_str()
        };
        BackendMessage {
            content: BackendContent {
                text: self.content.clone(),
            },
            author: author.to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct BackendContent {
    pub text: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct BackendMessage {
    pub content: BackendContent,
    pub author: String,
}

/// Normalizes raw inbound messages, keeping array order.
///
/// Messages matching neither shape are dropped and reported through the returned count.
pub fn normalize_messages(raw: &[Value]) -> (Vec<CanonicalMessage>, usize) {
    let mut out = Vec::with_capacity(raw.len());
    let mut dropped = 0;
    for (index, value) in raw.iter().enumerate() {
        match InboundMessage::from_value(value) {
            Ok(msg) => out.push(msg.to_canonical()),
            Err(err) => {
                dropped += 1;
                tracing::warn!(index, error = %err, "dropping unparseable chat message");
            }
        }
    }
    (out, dropped)
}
