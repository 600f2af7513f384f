use std::collections::{BTreeMap, HashSet};

pub const DEFAULT_MODEL: &str = "gpt-3.5-turbo";
pub const PREMIUM_MODEL: &str = "gpt-4";

/// Backend models known at compile time, as `(model, provider)`.
const STATIC_MODELS: &[(&str, &str)] = &[
    ("gpt-3.5-turbo", "openai"),
    ("gpt-4", "openai"),
    ("gpt-4-turbo", "openai"),
    ("gpt-4o", "openai"),
    ("gpt-4o-mini", "openai"),
    ("o1-preview", "openai_o1"),
    ("o1-mini", "openai_o1"),
    ("o3-mini", "openai_o1"),
    ("claude-haiku", "anthropic"),
    ("claude-sonnet", "anthropic"),
    ("claude-opus", "anthropic"),
    ("sonar", "perplexity"),
    ("sonar-pro", "perplexity"),
    ("sonar-reasoning", "perplexity"),
    ("llama-3.3-70b-versatile", "groq"),
    ("llama-3.1-8b-instant", "groq"),
    ("llama3-70b-8192", "groq"),
    ("meta-llama/Meta-Llama-3.1-405B-Instruct-Turbo", "together"),
    ("mixtral-8x7b-32768", "groq"),
    ("open-mistral-nemo", "mistral"),
    ("mistral-large-latest", "mistral"),
    ("mistral-small-latest", "mistral"),
    ("codestral-latest", "mistral"),
    ("deepseek-r1-distill-llama-70b", "groq"),
    ("gemini-1.5-flash", "google"),
    ("gemini-1.5-pro", "google"),
    ("gemini-2.0-flash", "google"),
    ("gemini-2.0-flash-thinking", "google"),
    ("deepseek-ai/DeepSeek-R1", "together"),
    ("grok-2-latest", "xai"),
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelCatalogEntry {
    pub model: String,
    pub provider: String,
}

/// Extra models a caller is licensed for on top of the catalog.
#[derive(Debug, Clone, Default)]
pub struct Entitlements {
    pub licensed_models: Vec<String>,
    pub premium_eligible: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelResolution {
    pub model: String,
    pub provider: String,
    /// The requested model was not eligible and `model` is the default.
    pub substituted: bool,
}

/// Read-only model to provider table, built once before serving.
#[derive(Debug, Clone)]
pub struct ModelCatalog {
    entries: BTreeMap<String, String>,
}

impl ModelCatalog {
    pub fn builtin() -> Self {
        Self::from_entries(STATIC_MODELS.iter().copied())
    }

    /// Catalog holding exactly `entries`; later duplicates win.
    pub fn from_entries<I, M, P>(entries: I) -> Self
    where
        I: IntoIterator<Item = (M, P)>,
        M: Into<String>,
        P: Into<String>,
    {
        Self {
            entries: entries
                .into_iter()
                .map(|(model, provider)| (model.into(), provider.into()))
                .collect(),
        }
    }

    pub fn with_extra<I, M, P>(extra: I) -> Self
    where
        I: IntoIterator<Item = (M, P)>,
        M: Into<String>,
        P: Into<String>,
    {
        let mut catalog = Self::builtin();
        for (model, provider) in extra {
            catalog.entries.insert(model.into(), provider.into());
        }
        catalog
    }

    /// Provider for `model`; empty when the catalog has no entry.
    pub fn provider_of(&self, model: &str) -> &str {
        self.entries.get(model).map(String::as_str).unwrap_or("")
    }

    pub fn entries(&self) -> impl Iterator<Item = ModelCatalogEntry> + '_ {
        self.entries.iter().map(|(model, provider)| ModelCatalogEntry {
            model: model.clone(),
            provider: provider.clone(),
        })
    }

    pub fn resolve(&self, requested: &str, entitlements: &Entitlements) -> ModelResolution {
        let mut eligible: HashSet<&str> = self.entries.keys().map(String::as_str).collect();
        eligible.extend(entitlements.licensed_models.iter().map(String::as_str));
        if entitlements.premium_eligible {
            eligible.insert(PREMIUM_MODEL);
        }

        let (model, substituted) = if eligible.contains(requested) {
            (requested, false)
        } else {
            (DEFAULT_MODEL, true)
        };
        ModelResolution {
            model: model.to_string(),
            provider: self.provider_of(model).to_string(),
            substituted,
        }
    }
}

impl Default for ModelCatalog {
    fn default() -> Self {
        Self::builtin()
    }
}
