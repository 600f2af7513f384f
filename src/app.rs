use crate::auth::AuthState;
use crate::chat::{Entitlements, ModelCatalog};
use crate::error::{AppError, AppResult};
use crate::upstream::BackendConfig;
use axum::Router;
use axum::http::{Method, StatusCode};
use axum::routing::{get, post};
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::{Arc, Once, OnceLock};
use tower_http::cors::{Any, CorsLayer};
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;

#[derive(Clone)]
pub struct AppState {
    pub runtime: Arc<RuntimeConfig>,
    pub auth: AuthState,
    pub catalog: Arc<ModelCatalog>,
    pub http: reqwest::Client,
    pub metrics: PrometheusHandle,
}

static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();
static METRICS_ERROR: OnceLock<AppError> = OnceLock::new();
static METRICS_INIT: Once = Once::new();

const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 300_000;

#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub listen: String,
    pub metrics_path: String,
    pub backend_url: String,
    pub backend_token: String,
    pub api_keys: Vec<String>,
    pub licensed_models: Vec<String>,
    pub premium_eligible: bool,
    pub extra_models: Vec<(String, String)>,
    pub request_timeout_ms: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            listen: "0.0.0.0:8080".to_string(),
            metrics_path: "/metrics".to_string(),
            backend_url: String::new(),
            backend_token: String::new(),
            api_keys: Vec::new(),
            licensed_models: Vec::new(),
            premium_eligible: false,
            extra_models: Vec::new(),
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
        }
    }
}

impl RuntimeConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let defaults = Self::default();
        Self {
            listen: var("RAYBRIDGE_LISTEN").unwrap_or(defaults.listen),
            metrics_path: var("RAYBRIDGE_METRICS_PATH").unwrap_or(defaults.metrics_path),
            backend_url: var("RAYBRIDGE_BACKEND_URL").unwrap_or_default(),
            backend_token: var("RAYBRIDGE_BACKEND_TOKEN").unwrap_or_default(),
            api_keys: split_list(var("RAYBRIDGE_API_KEYS").as_deref()),
            licensed_models: split_list(var("RAYBRIDGE_LICENSED_MODELS").as_deref()),
            premium_eligible: var("RAYBRIDGE_PREMIUM")
                .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
                .unwrap_or(false),
            extra_models: parse_model_pairs(var("RAYBRIDGE_EXTRA_MODELS").as_deref()),
            request_timeout_ms: var("RAYBRIDGE_REQUEST_TIMEOUT_MS")
                .and_then(|v| v.trim().parse().ok())
                .unwrap_or(defaults.request_timeout_ms),
        }
    }

    pub fn backend(&self) -> BackendConfig {
        BackendConfig {
            base_url: self.backend_url.clone(),
            token: self.backend_token.clone(),
            timeout_ms: self.request_timeout_ms.max(1),
        }
    }
}

fn split_list(raw: Option<&str>) -> Vec<String> {
    raw.unwrap_or("")
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_model_pairs(raw: Option<&str>) -> Vec<(String, String)> {
    split_list(raw)
        .into_iter()
        .filter_map(|pair| {
            let (model, provider) = pair.split_once('=')?;
            let model = model.trim();
            if model.is_empty() {
                tracing::warn!(entry = %pair, "ignoring extra model without a name");
                return None;
            }
            Some((model.to_string(), provider.trim().to_string()))
        })
        .collect()
}

pub async fn load_state() -> AppResult<AppState> {
    load_state_with_runtime(RuntimeConfig::from_env()).await
}

pub async fn load_state_with_runtime(runtime: RuntimeConfig) -> AppResult<AppState> {
    if runtime.backend_url.trim().is_empty() {
        return Err(AppError::new(
            StatusCode::BAD_REQUEST,
            "backend_url_missing",
            "RAYBRIDGE_BACKEND_URL is not set",
        ));
    }

    let http = reqwest::Client::builder()
        .user_agent("raybridge/0.1")
        .build()
        .map_err(|err| {
            AppError::new(
                StatusCode::BAD_REQUEST,
                "http_client_init_failed",
                err.to_string(),
            )
        })?;

    let metrics = init_metrics()?;

    let catalog = ModelCatalog::with_extra(runtime.extra_models.iter().cloned());
    let auth = AuthState::new(
        runtime.api_keys.iter().cloned(),
        Entitlements {
            licensed_models: runtime.licensed_models.clone(),
            premium_eligible: runtime.premium_eligible,
        },
    );
    if runtime.api_keys.is_empty() {
        tracing::warn!("no client api keys configured; any bearer token is accepted");
    }
    tracing::info!(
        backend = %runtime.backend_url,
        models = catalog.entries().count(),
        "loaded model catalog"
    );

    Ok(AppState {
        runtime: Arc::new(runtime),
        auth,
        catalog: Arc::new(catalog),
        http,
        metrics,
    })
}

fn init_metrics() -> AppResult<PrometheusHandle> {
    METRICS_INIT.call_once(|| {
        match metrics_exporter_prometheus::PrometheusBuilder::new().install_recorder() {
            Ok(handle) => {
                let _ = METRICS_HANDLE.set(handle);
            }
            Err(err) => {
                let _ = METRICS_ERROR.set(AppError::new(
                    StatusCode::BAD_REQUEST,
                    "metrics_init_failed",
                    err.to_string(),
                ));
            }
        }
    });

    if let Some(err) = METRICS_ERROR.get() {
        return Err(err.clone());
    }
    METRICS_HANDLE.get().cloned().ok_or_else(|| {
        AppError::new(
            StatusCode::BAD_REQUEST,
            "metrics_init_failed",
            "metrics recorder not available",
        )
    })
}

pub fn build_app(state: AppState) -> Router {
    let metrics_path = state.runtime.metrics_path.clone();
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any);
    let api_router = Router::<AppState>::new()
        .route("/v1/models", get(crate::handlers::list_models))
        .route(
            "/v1/chat/completions",
            post(crate::handlers::create_chat_completions),
        )
        .layer(cors);
    Router::<AppState>::new()
        .nest("/hf", api_router)
        .route(&metrics_path, get(crate::handlers::metrics))
        .with_state(state)
        .layer(SetRequestIdLayer::new(
            axum::http::header::HeaderName::from_static("x-request-id"),
            MakeRequestUuid,
        ))
        .layer(PropagateRequestIdLayer::new(
            axum::http::header::HeaderName::from_static("x-request-id"),
        ))
        .layer(TraceLayer::new_for_http())
}
