use crate::chat::Entitlements;
use std::collections::HashSet;
use std::sync::Arc;

/// What an authenticated caller may use, handed to the translator.
#[derive(Clone, Debug, Default)]
pub struct CallerContext {
    pub entitlements: Entitlements,
}

#[derive(Clone)]
pub struct AuthState {
    api_keys: Arc<HashSet<String>>,
    entitlements: Entitlements,
}

impl AuthState {
    pub fn new(api_keys: impl IntoIterator<Item = String>, entitlements: Entitlements) -> Self {
        Self {
            api_keys: Arc::new(api_keys.into_iter().collect()),
            entitlements,
        }
    }

    /// Authenticate a bearer token against the configured client keys.
    ///
    /// With no keys configured every non-empty token is accepted.
    pub fn authenticate_token(&self, token: &str) -> Option<CallerContext> {
        let token = token.trim();
        if token.is_empty() {
            return None;
        }
        if !self.api_keys.is_empty() && !self.api_keys.contains(token) {
            return None;
        }
        Some(CallerContext {
            entitlements: self.entitlements.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn configured_keys_are_enforced() {
        let auth = AuthState::new(vec!["sk-good".to_string()], Entitlements::default());
        assert!(auth.authenticate_token("sk-good").is_some());
        assert!(auth.authenticate_token("sk-bad").is_none());
        assert!(auth.authenticate_token("").is_none());
    }

    #[test]
    fn open_mode_accepts_any_token_and_carries_entitlements() {
        let entitlements = Entitlements {
            licensed_models: vec!["ray1".to_string()],
            premium_eligible: true,
        };
        let auth = AuthState::new(Vec::new(), entitlements);
        let ctx = auth.authenticate_token("anything").expect("accepted");
        assert!(ctx.entitlements.premium_eligible);
        assert_eq!(ctx.entitlements.licensed_models, vec!["ray1".to_string()]);
    }
}
