use crate::chat::BackendRequest;
use crate::error::AppError;
use axum::http::StatusCode;
use serde_json::Value;

pub const BACKEND_CHAT_PATH: &str = "/api/v1/ai/chat_completions";

#[derive(Debug, Clone)]
pub struct BackendConfig {
    pub base_url: String,
    pub token: String,
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpstreamErrorKind {
    Network,
    Http,
}

#[derive(Debug, Clone)]
pub struct UpstreamCallError {
    pub kind: UpstreamErrorKind,
    pub status: Option<StatusCode>,
    pub code: Option<String>,
    pub message: String,
}

impl UpstreamCallError {
    pub fn new(kind: UpstreamErrorKind, status: Option<StatusCode>, message: String) -> Self {
        Self {
            kind,
            status,
            code: None,
            message,
        }
    }

    pub fn with_code(mut self, code: Option<String>) -> Self {
        self.code = code;
        self
    }
}

impl From<UpstreamCallError> for AppError {
    fn from(err: UpstreamCallError) -> Self {
        match err.kind {
            UpstreamErrorKind::Network => {
                AppError::new(StatusCode::BAD_GATEWAY, "upstream_unreachable", err.message)
                    .with_type("upstream_error")
            }
            UpstreamErrorKind::Http => {
                let status = err.status.unwrap_or(StatusCode::BAD_GATEWAY);
                let code = err.code.unwrap_or_else(|| "upstream_error".to_string());
                AppError::new(status, code, err.message).with_type("upstream_error")
            }
        }
    }
}

/// POSTs a translated request to the backend chat endpoint.
///
/// Non-2xx replies are turned into errors; the body of a successful reply is left unread.
pub async fn call_backend_raw(
    client: &reqwest::Client,
    backend: &BackendConfig,
    body: &BackendRequest,
) -> Result<reqwest::Response, UpstreamCallError> {
    let url = join_url(&backend.base_url, BACKEND_CHAT_PATH);
    let mut req = client
        .post(url)
        .timeout(std::time::Duration::from_millis(backend.timeout_ms))
        .header(reqwest::header::ACCEPT, mime::TEXT_EVENT_STREAM.as_ref())
        .json(body);
    if !backend.token.is_empty() {
        req = req.bearer_auth(&backend.token);
    }
    let resp = req
        .send()
        .await
        .map_err(|err| UpstreamCallError::new(UpstreamErrorKind::Network, None, err.to_string()))?;
    let status = resp.status();
    if !status.is_success() {
        let text = resp.text().await.unwrap_or_default();
        let code = extract_error_code(&text);
        return Err(UpstreamCallError::new(
            UpstreamErrorKind::Http,
            Some(status),
            format!("upstream status {}: {}", status, text),
        )
        .with_code(code));
    }
    Ok(resp)
}

/// Whether the backend answered with a single JSON object instead of an event stream.
pub fn is_json_response(resp: &reqwest::Response) -> bool {
    resp.headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<mime::Mime>().ok())
        .is_some_and(|m| m.essence_str() == mime::APPLICATION_JSON.essence_str())
}

fn join_url(base: &str, path: &str) -> String {
    let base = base.trim_end_matches('/');
    let path = path.trim_start_matches('/');
    if path.is_empty() {
        base.to_string()
    } else {
        format!("{}/{}", base, path)
    }
}

fn extract_error_code(text: &str) -> Option<String> {
    let value: Value = serde_json::from_str(text).ok()?;
    let error = value.get("error")?;
    error
        .get("code")
        .or_else(|| error.get("type"))
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_url_handles_slashes() {
        assert_eq!(
            join_url("http://backend/", BACKEND_CHAT_PATH),
            "http://backend/api/v1/ai/chat_completions"
        );
        assert_eq!(join_url("http://backend", ""), "http://backend");
    }

    #[test]
    fn error_code_is_read_from_envelope() {
        assert_eq!(
            extract_error_code(r#"{"error":{"code":"rate_limited","message":"slow down"}}"#),
            Some("rate_limited".to_string())
        );
        assert_eq!(extract_error_code("not json"), None);
    }

    #[test]
    fn upstream_status_is_kept() {
        let err = UpstreamCallError::new(
            UpstreamErrorKind::Http,
            Some(StatusCode::TOO_MANY_REQUESTS),
            "busy".to_string(),
        );
        let app: AppError = err.into();
        assert_eq!(app.status, StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(app.code, "upstream_error");
    }

    #[test]
    fn network_failure_is_bad_gateway_unreachable() {
        let err = UpstreamCallError::new(
            UpstreamErrorKind::Network,
            None,
            "connection refused".to_string(),
        )
        .with_code(Some("ignored".to_string()));
        let app: AppError = err.into();
        assert_eq!(app.status, StatusCode::BAD_GATEWAY);
        assert_eq!(app.code, "upstream_unreachable");
        assert_eq!(app.error_type, "upstream_error");
    }

    #[tokio::test]
    async fn unreachable_backend_is_a_network_error() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind");
        let addr = listener.local_addr().expect("addr");
        drop(listener);

        let backend = BackendConfig {
            base_url: format!("http://{addr}"),
            token: String::new(),
            timeout_ms: 2_000,
        };
        let body = BackendRequest {
            debug: false,
            locale: "en-CN".to_string(),
            messages: Vec::new(),
            provider: "openai".to_string(),
            model: "gpt-4o".to_string(),
            temperature: 1.0,
            system_instruction: "markdown".to_string(),
            additional_system_instructions: None,
        };
        let err = call_backend_raw(&reqwest::Client::new(), &backend, &body)
            .await
            .expect_err("nothing listens on a released port");
        assert_eq!(err.kind, UpstreamErrorKind::Network);
        assert_eq!(err.status, None);
    }
}
