use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::rejection::QueryRejection;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, Method, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use subtle::ConstantTimeEq;
use tracing::{debug, warn};

use crate::config::UserConfig;
use crate::error::{ManagerError, ProviderError, QueueError, WriterError};
use crate::jobs::QueueClient;
use crate::models::AuthUser;
use crate::security::{self, RequestBody};
use crate::writer::Writer;

#[derive(Clone)]
pub struct AppState {
    pub writer: Arc<Writer>,
    pub queue: Option<Arc<QueueClient>>,
    pub users: Arc<Vec<UserConfig>>,
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(health_handler))
        .route("/api/ai/writer", get(writer_handler).post(writer_handler))
        .route("/api/ai/central", get(central_handler).post(central_handler))
        .route("/api/admin/newsletter/jobs", get(jobs_handler).post(jobs_handler))
        .with_state(state)
}

/// Error envelope `{error, details?}`.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    error: String,
    details: Option<Value>,
}

impl ApiError {
    fn new(status: StatusCode, error: impl Into<String>) -> Self {
        Self {
            status,
            error: error.into(),
            details: None,
        }
    }

    fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    fn unauthorized() -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "Unauthorized")
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut body = json!({ "error": self.error });
        if let Some(details) = self.details {
            body["details"] = details;
        }
        let mut response = (self.status, Json(body)).into_response();
        if self.status == StatusCode::UNAUTHORIZED {
            response
                .headers_mut()
                .insert(header::WWW_AUTHENTICATE, header::HeaderValue::from_static("Bearer realm=\"fluxao\""));
        }
        response
    }
}

impl From<WriterError> for ApiError {
    fn from(e: WriterError) -> Self {
        match e {
            WriterError::Rejected(rejection) => {
                let status = if rejection.is_forbidden() {
                    StatusCode::FORBIDDEN
                } else {
                    StatusCode::BAD_REQUEST
                };
                let details = serde_json::to_value(&rejection).unwrap_or(Value::Null);
                ApiError::new(status, rejection.message.clone()).with_details(details)
            }
            WriterError::Manager(ref m) => {
                let status = match m {
                    ManagerError::UnknownProvider(_) => StatusCode::NOT_FOUND,
                    ManagerError::ProviderUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
                };
                ApiError::new(status, e.to_string()).with_details(json!({ "code": e.code() }))
            }
            WriterError::Provider {
                ref provider,
                ref source,
            } => {
                let status = match source {
                    ProviderError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
                    ProviderError::Timeout => StatusCode::GATEWAY_TIMEOUT,
                    ProviderError::AuthFailed | ProviderError::VendorError(_) => StatusCode::BAD_GATEWAY,
                };
                ApiError::new(status, e.to_string()).with_details(json!({
                    "provider": provider,
                    "code": source.code(),
                }))
            }
            WriterError::QuotaExceeded(_) => {
                ApiError::new(StatusCode::TOO_MANY_REQUESTS, e.to_string()).with_details(json!({ "code": e.code() }))
            }
        }
    }
}

impl From<QueueError> for ApiError {
    fn from(e: QueueError) -> Self {
        match e {
            QueueError::InvalidJobId(_) => ApiError::new(StatusCode::BAD_REQUEST, e.to_string()),
            QueueError::NotConfigured => ApiError::new(StatusCode::SERVICE_UNAVAILABLE, e.to_string()),
            QueueError::Status { status, .. } => {
                warn!(error = %e, "queue system rejected request");
                ApiError::new(StatusCode::BAD_GATEWAY, e.to_string()).with_details(json!({ "status": status }))
            }
            QueueError::Http { .. } => {
                warn!(error = %e, "queue system unreachable");
                ApiError::new(StatusCode::BAD_GATEWAY, e.to_string())
            }
        }
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        debug!(error = %rejection.body_text(), "invalid query string");
        ApiError::new(StatusCode::BAD_REQUEST, "invalid query string")
            .with_details(json!({ "message": rejection.body_text() }))
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct ActionQuery {
    action: Option<String>,
    token: Option<String>,
}

async fn health_handler() -> Json<Value> {
    Json(json!({ "status": "ok", "version": env!("CARGO_PKG_VERSION") }))
}

async fn writer_handler(
    State(state): State<AppState>,
    method: Method,
    query: Result<Query<ActionQuery>, QueryRejection>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    let Query(query) = query?;
    let user = require_staff(&state, &query, &headers)?;
    let writer = &state.writer;
    let action = query.action.as_deref().unwrap_or("status");

    let response = match (&method, action) {
        (&Method::GET, "status") => Json(writer.status(&user)?).into_response(),
        (&Method::GET, "templates") => Json(writer.templates(&user)?).into_response(),
        (&Method::POST, "generate-article") => {
            Json(writer.generate_article(parse_body(&body)?, &user).await?).into_response()
        }
        (&Method::POST, "batch-generate") => {
            Json(writer.batch_generate(parse_body(&body)?, &user).await?).into_response()
        }
        (&Method::POST, "optimize-content") => {
            Json(writer.optimize_content(parse_body(&body)?, &user).await?).into_response()
        }
        (&Method::POST, "content-ideas") => {
            Json(writer.content_ideas(parse_body(&body)?, &user).await?).into_response()
        }
        (&Method::POST, "topic-research") => {
            Json(writer.topic_research(parse_body(&body)?, &user).await?).into_response()
        }
        _ => return Err(unknown_action(&method, action)),
    };
    Ok(response)
}

async fn central_handler(
    State(state): State<AppState>,
    method: Method,
    query: Result<Query<ActionQuery>, QueryRejection>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    let Query(query) = query?;
    let user = require_staff(&state, &query, &headers)?;
    let writer = &state.writer;
    let action = query.action.as_deref().unwrap_or("status");

    let response = match (&method, action) {
        (&Method::GET, "status") => Json(writer.status(&user)?).into_response(),
        (&Method::POST, "compare") => {
            let result = writer.compare(parse_body(&body)?, &user).await?;
            if !result.success {
                let details = serde_json::to_value(&result).unwrap_or(Value::Null);
                return Err(ApiError::new(StatusCode::BAD_GATEWAY, "all providers failed").with_details(details));
            }
            Json(result).into_response()
        }
        (&Method::POST, "chat") => Json(writer.chat(parse_body(&body)?, &user).await?).into_response(),
        _ => return Err(unknown_action(&method, action)),
    };
    Ok(response)
}

#[derive(Debug, Deserialize)]
#[serde(tag = "action", rename_all = "kebab-case")]
enum JobAction {
    Retry {
        #[serde(rename = "jobId")]
        job_id: String,
    },
    ResetCircuit,
}

async fn jobs_handler(
    State(state): State<AppState>,
    method: Method,
    query: Result<Query<ActionQuery>, QueryRejection>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    let Query(query) = query?;
    require_staff(&state, &query, &headers)?;
    let queue = state.queue.as_ref().ok_or(QueueError::NotConfigured)?;

    let snapshot = if method == Method::POST {
        match parse_body::<JobAction>(&body)? {
            JobAction::Retry { job_id } => queue.retry_job(&job_id).await?,
            JobAction::ResetCircuit => queue.reset_circuit().await?,
        }
    } else {
        queue.get_metrics().await?
    };
    Ok(Json(snapshot).into_response())
}

/// Authenticate, then refuse non-staff roles before the body is even parsed.
fn require_staff(state: &AppState, query: &ActionQuery, headers: &HeaderMap) -> Result<AuthUser, ApiError> {
    let user = authenticate(&state.users, query, headers).ok_or_else(ApiError::unauthorized)?;
    security::check(RequestBody::Read, &user, state.writer.settings())
        .map_err(WriterError::Rejected)?;
    Ok(user)
}

fn parse_body<T: DeserializeOwned>(body: &Bytes) -> Result<T, ApiError> {
    serde_json::from_slice(body).map_err(|e| {
        debug!(error = %e, "invalid request body");
        ApiError::new(StatusCode::BAD_REQUEST, "invalid request body").with_details(json!({
            "message": e.to_string(),
            "line": e.line(),
            "column": e.column(),
        }))
    })
}

fn unknown_action(method: &Method, action: &str) -> ApiError {
    ApiError::new(StatusCode::BAD_REQUEST, format!("unknown action '{action}' for {method}"))
}

fn authenticate(users: &[UserConfig], query: &ActionQuery, headers: &HeaderMap) -> Option<AuthUser> {
    // Method 1: query param
    if let Some(ref token) = query.token
        && let Some(user) = find_by_token(users, token)
    {
        debug!(user = %user.name, "authenticated via query param");
        return Some(user);
    }

    let auth_str = headers.get(header::AUTHORIZATION)?.to_str().ok()?;

    // Method 2: bearer token
    if let Some(token) = auth_str.strip_prefix("Bearer ")
        && let Some(user) = find_by_token(users, token.trim())
    {
        debug!(user = %user.name, "authenticated via bearer token");
        return Some(user);
    }

    // Method 3: HTTP Basic Auth with the token as password
    if let Some(encoded) = auth_str.strip_prefix("Basic ") {
        use base64::Engine;
        if let Ok(decoded) = base64::engine::general_purpose::STANDARD.decode(encoded.trim())
            && let Ok(credentials) = String::from_utf8(decoded)
            && let Some((name, password)) = credentials.split_once(':')
            && let Some(user) = find_by_token(users, password)
            && user.name == name
        {
            debug!(user = %user.name, "authenticated via HTTP Basic Auth");
            return Some(user);
        }
    }

    None
}

fn find_by_token(users: &[UserConfig], token: &str) -> Option<AuthUser> {
    users
        .iter()
        .find(|u| constant_time_eq(&u.token, token))
        .map(|u| AuthUser {
            name: u.name.clone(),
            role: u.role,
        })
}

/// Constant-time string comparison to prevent timing attacks on token validation.
fn constant_time_eq(a: &str, b: &str) -> bool {
    a.as_bytes().ct_eq(b.as_bytes()).into()
}
