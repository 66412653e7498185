use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use anyhow::Result;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use clap::Parser;
use faqdesk_api::{FaqApi, SyncReport, API_CONTRACT_VERSION};
use faqdesk_core::{ChatMessage, ChatSession};
use faqdesk_source::{rows_for_action, HttpSheetSource, SheetSource, StaticSheetSource};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

const SERVICE_CONTRACT_VERSION: &str = "service.v1";
const OPENAPI_YAML: &str = include_str!("../../../openapi/openapi.yaml");

#[derive(Debug, Clone)]
struct ServiceState {
    api: FaqApi,
    source_url: Option<String>,
    sessions: Arc<Mutex<HashMap<String, ChatSession>>>,
}

#[derive(Debug, Clone, Serialize)]
struct ServiceEnvelope<T>
where
    T: Serialize,
{
    service_contract_version: &'static str,
    api_contract_version: &'static str,
    data: T,
}

#[derive(Debug, Clone, Serialize)]
struct ServiceError {
    #[serde(skip)]
    status: StatusCode,
    service_contract_version: &'static str,
    error: String,
}

#[derive(Debug, Clone, Deserialize)]
struct MigrateRequest {
    dry_run: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct ListQuery {
    q: Option<String>,
    category: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
struct SessionOpened {
    session_id: String,
    greeting: ChatMessage,
}

#[derive(Debug, Clone, Deserialize)]
struct ChatTurnRequest {
    text: String,
}

#[derive(Debug, Clone, Serialize)]
struct ChatTurnResponse {
    message: ChatMessage,
    completed_exchanges: u32,
    show_escalation: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct SyncRequest {
    #[serde(default)]
    source: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct SheetFetchRequest {
    action: String,
}

#[derive(Debug, Clone, Serialize)]
struct HealthResponse {
    status: &'static str,
}

#[derive(Debug, Parser)]
#[command(name = "faqdesk-service")]
#[command(about = "Local HTTP service for FAQDesk")]
struct Args {
    #[arg(long, default_value = "./faqdesk.sqlite3")]
    db: PathBuf,
    #[arg(long, default_value = "127.0.0.1:4020")]
    bind: SocketAddr,
    /// Remote sheet-fetch endpoint; the built-in sample rows are used when
    /// this is absent.
    #[arg(long)]
    source_url: Option<String>,
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status;
        (status, Json(self)).into_response()
    }
}

impl ServiceState {
    fn error(message: impl Into<String>) -> ServiceError {
        ServiceError {
            status: StatusCode::BAD_REQUEST,
            service_contract_version: SERVICE_CONTRACT_VERSION,
            error: message.into(),
        }
    }

    fn not_found(message: impl Into<String>) -> ServiceError {
        ServiceError {
            status: StatusCode::NOT_FOUND,
            service_contract_version: SERVICE_CONTRACT_VERSION,
            error: message.into(),
        }
    }
}

fn envelope<T>(data: T) -> ServiceEnvelope<T>
where
    T: Serialize,
{
    ServiceEnvelope {
        service_contract_version: SERVICE_CONTRACT_VERSION,
        api_contract_version: API_CONTRACT_VERSION,
        data,
    }
}

fn app(state: ServiceState) -> Router {
    Router::new()
        .route("/v1/health", get(health))
        .route("/v1/openapi", get(openapi))
        .route("/v1/db/migrate", post(db_migrate))
        .route("/v1/faqs", get(faqs_list))
        .route("/v1/categories", get(categories_list))
        .route("/v1/chat/sessions", post(chat_open_session))
        .route("/v1/chat/sessions/:session_id/messages", post(chat_post_message))
        .route("/v1/sync", post(sync_run))
        .route("/v1/sync/logs", get(sync_logs))
        .route("/v1/sheet-fetch", post(sheet_fetch))
        .with_state(state)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let state = ServiceState {
        api: FaqApi::new(args.db),
        source_url: args.source_url,
        sessions: Arc::new(Mutex::new(HashMap::new())),
    };
    let listener = tokio::net::TcpListener::bind(args.bind).await?;
    tracing::info!(bind = %args.bind, "faqdesk service listening");
    axum::serve(listener, app(state)).await?;
    Ok(())
}

async fn health() -> Json<ServiceEnvelope<HealthResponse>> {
    Json(envelope(HealthResponse { status: "ok" }))
}

async fn openapi() -> impl IntoResponse {
    (StatusCode::OK, [("content-type", "application/yaml; charset=utf-8")], OPENAPI_YAML)
}

async fn db_migrate(
    State(state): State<ServiceState>,
    Json(request): Json<MigrateRequest>,
) -> Result<Json<ServiceEnvelope<faqdesk_store_sqlite::SchemaStatus>>, ServiceError> {
    let status = if request.dry_run {
        state.api.schema_status().map_err(|err| ServiceState::error(err.to_string()))?
    } else {
        state.api.migrate().map_err(|err| ServiceState::error(err.to_string()))?
    };
    Ok(Json(envelope(status)))
}

async fn faqs_list(
    State(state): State<ServiceState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<ServiceEnvelope<Vec<faqdesk_core::FaqEntry>>>, ServiceError> {
    let entries = state
        .api
        .list_faqs(query.q.as_deref(), query.category.as_deref())
        .map_err(|err| ServiceState::error(err.to_string()))?;
    Ok(Json(envelope(entries)))
}

async fn categories_list(
    State(state): State<ServiceState>,
) -> Result<Json<ServiceEnvelope<Vec<faqdesk_core::CategoryCount>>>, ServiceError> {
    let counts = state.api.categories().map_err(|err| ServiceState::error(err.to_string()))?;
    Ok(Json(envelope(counts)))
}

async fn chat_open_session(
    State(state): State<ServiceState>,
) -> Result<Json<ServiceEnvelope<SessionOpened>>, ServiceError> {
    let session = ChatSession::new(OffsetDateTime::now_utc());
    let greeting = session
        .turns()
        .first()
        .cloned()
        .ok_or_else(|| ServiceState::error("new session has no greeting turn"))?;

    let session_id = ulid::Ulid::new().to_string();
    let mut sessions = state
        .sessions
        .lock()
        .map_err(|_| ServiceState::error("session store lock poisoned"))?;
    sessions.insert(session_id.clone(), session);

    Ok(Json(envelope(SessionOpened { session_id, greeting })))
}

async fn chat_post_message(
    State(state): State<ServiceState>,
    Path(session_id): Path<String>,
    Json(request): Json<ChatTurnRequest>,
) -> Result<Json<ServiceEnvelope<ChatTurnResponse>>, ServiceError> {
    let entries =
        state.api.active_entries().map_err(|err| ServiceState::error(err.to_string()))?;

    let mut sessions = state
        .sessions
        .lock()
        .map_err(|_| ServiceState::error("session store lock poisoned"))?;
    let session = sessions
        .get_mut(&session_id)
        .ok_or_else(|| ServiceState::not_found(format!("unknown session: {session_id}")))?;

    let message = session
        .submit(&request.text, &entries, OffsetDateTime::now_utc())
        .cloned()
        .ok_or_else(|| ServiceState::error("text must not be blank"))?;

    Ok(Json(envelope(ChatTurnResponse {
        message,
        completed_exchanges: session.completed_exchanges(),
        show_escalation: session.show_escalation(),
    })))
}

async fn sync_run(
    State(state): State<ServiceState>,
    Json(request): Json<SyncRequest>,
) -> Result<Json<ServiceEnvelope<SyncReport>>, ServiceError> {
    let source: Box<dyn SheetSource> = match request.source.as_deref() {
        Some("static") => Box::new(StaticSheetSource),
        Some(url) if url.starts_with("http://") || url.starts_with("https://") => {
            Box::new(HttpSheetSource::new(url))
        }
        Some(other) => {
            return Err(ServiceState::error(format!("unknown sync source: {other}")));
        }
        None => match &state.source_url {
            Some(url) => Box::new(HttpSheetSource::new(url.clone())),
            None => Box::new(StaticSheetSource),
        },
    };

    let report =
        state.api.sync(source.as_ref()).map_err(|err| ServiceState::error(err.to_string()))?;
    Ok(Json(envelope(report)))
}

async fn sync_logs(
    State(state): State<ServiceState>,
) -> Result<Json<ServiceEnvelope<Vec<faqdesk_store_sqlite::SyncLog>>>, ServiceError> {
    let logs = state.api.sync_logs().map_err(|err| ServiceState::error(err.to_string()))?;
    Ok(Json(envelope(logs)))
}

/// Emulated external sheet endpoint. Speaks the raw source contract rather
/// than the service envelope: `fetch` returns `{faqs: [...]}`, any other
/// action is a 400 with `{error}`.
async fn sheet_fetch(Json(request): Json<SheetFetchRequest>) -> Response {
    match rows_for_action(&request.action) {
        Ok(rows) => (StatusCode::OK, Json(serde_json::json!({ "faqs": rows }))).into_response(),
        Err(err) => {
            (StatusCode::BAD_REQUEST, Json(serde_json::json!({ "error": err.to_string() })))
                .into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;
    use http::Request;
    use tower::ServiceExt;

    fn unique_temp_db_path() -> PathBuf {
        std::env::temp_dir().join(format!("faqdesk-service-{}.sqlite3", ulid::Ulid::new()))
    }

    fn test_state(db_path: &PathBuf) -> ServiceState {
        ServiceState {
            api: FaqApi::new(db_path.clone()),
            source_url: None,
            sessions: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    async fn response_json(response: Response) -> serde_json::Value {
        let bytes = match to_bytes(response.into_body(), 1024 * 1024).await {
            Ok(bytes) => bytes,
            Err(err) => panic!("failed to read response body: {err}"),
        };
        let body = match String::from_utf8(bytes.to_vec()) {
            Ok(body) => body,
            Err(err) => panic!("response body is not UTF-8: {err}"),
        };
        match serde_json::from_str(&body) {
            Ok(value) => value,
            Err(err) => panic!("response body is not JSON: {err}; body={body}"),
        }
    }

    async fn post_json(router: Router, uri: &str, payload: &serde_json::Value) -> Response {
        match router
            .oneshot(
                Request::builder()
                    .uri(uri)
                    .method("POST")
                    .header("content-type", "application/json")
                    .body(axum::body::Body::from(payload.to_string()))
                    .unwrap_or_else(|err| panic!("failed to build request: {err}")),
            )
            .await
        {
            Ok(response) => response,
            Err(err) => panic!("router request failed: {err}"),
        }
    }

    async fn get_uri(router: Router, uri: &str) -> Response {
        match router
            .oneshot(
                Request::builder()
                    .uri(uri)
                    .method("GET")
                    .body(axum::body::Body::empty())
                    .unwrap_or_else(|err| panic!("failed to build request: {err}")),
            )
            .await
        {
            Ok(response) => response,
            Err(err) => panic!("router request failed: {err}"),
        }
    }

    #[tokio::test]
    async fn health_endpoint_reports_ok() {
        let db_path = unique_temp_db_path();
        let router = app(test_state(&db_path));

        let response = get_uri(router, "/v1/health").await;
        assert_eq!(response.status(), StatusCode::OK);

        let value = response_json(response).await;
        assert_eq!(
            value.get("service_contract_version").and_then(serde_json::Value::as_str),
            Some(SERVICE_CONTRACT_VERSION)
        );
    }

    #[tokio::test]
    async fn openapi_endpoint_returns_versioned_artifact() {
        let db_path = unique_temp_db_path();
        let router = app(test_state(&db_path));

        let response = get_uri(router, "/v1/openapi").await;
        assert_eq!(response.status(), StatusCode::OK);

        let bytes = match to_bytes(response.into_body(), 1024 * 1024).await {
            Ok(bytes) => bytes,
            Err(err) => panic!("failed to read response body: {err}"),
        };
        let body = match String::from_utf8(bytes.to_vec()) {
            Ok(body) => body,
            Err(err) => panic!("response body is not UTF-8: {err}"),
        };
        assert!(body.contains("openapi: 3.1.0"));
        assert!(body.contains("version: service.v1"));
        assert!(body.contains("/v1/chat/sessions"));
        assert!(body.contains("/v1/sync/logs"));
    }

    #[tokio::test]
    async fn sheet_fetch_speaks_raw_source_contract() {
        let db_path = unique_temp_db_path();
        let router = app(test_state(&db_path));

        let ok_response = post_json(
            router.clone(),
            "/v1/sheet-fetch",
            &serde_json::json!({ "action": "fetch" }),
        )
        .await;
        assert_eq!(ok_response.status(), StatusCode::OK);
        let ok_value = response_json(ok_response).await;
        assert_eq!(
            ok_value.get("faqs").and_then(serde_json::Value::as_array).map(Vec::len),
            Some(3)
        );
        assert!(ok_value.get("service_contract_version").is_none());

        let bad_response =
            post_json(router, "/v1/sheet-fetch", &serde_json::json!({ "action": "sync" })).await;
        assert_eq!(bad_response.status(), StatusCode::BAD_REQUEST);
        let bad_value = response_json(bad_response).await;
        assert!(bad_value
            .get("error")
            .and_then(serde_json::Value::as_str)
            .is_some_and(|error| error.contains("invalid action")));
    }

    #[tokio::test]
    async fn sync_then_list_and_categories_round_trip() {
        let db_path = unique_temp_db_path();
        let router = app(test_state(&db_path));

        let sync_response =
            post_json(router.clone(), "/v1/sync", &serde_json::json!({ "source": "static" }))
                .await;
        assert_eq!(sync_response.status(), StatusCode::OK);
        let sync_value = response_json(sync_response).await;
        assert_eq!(
            sync_value
                .get("data")
                .and_then(|data| data.get("synced_count"))
                .and_then(serde_json::Value::as_i64),
            Some(3)
        );

        let list_response = get_uri(router.clone(), "/v1/faqs?q=%E6%89%93%E5%88%BB").await;
        assert_eq!(list_response.status(), StatusCode::OK);
        let list_value = response_json(list_response).await;
        assert_eq!(
            list_value.get("data").and_then(serde_json::Value::as_array).map(Vec::len),
            Some(1)
        );

        let categories_response = get_uri(router.clone(), "/v1/categories").await;
        assert_eq!(categories_response.status(), StatusCode::OK);

        let logs_response = get_uri(router, "/v1/sync/logs").await;
        assert_eq!(logs_response.status(), StatusCode::OK);
        let logs_value = response_json(logs_response).await;
        assert_eq!(
            logs_value.get("data").and_then(serde_json::Value::as_array).map(Vec::len),
            Some(1)
        );

        let _ = std::fs::remove_file(&db_path);
    }

    #[tokio::test]
    async fn chat_session_flow_round_trip() {
        let db_path = unique_temp_db_path();
        let router = app(test_state(&db_path));

        let sync_response =
            post_json(router.clone(), "/v1/sync", &serde_json::json!({ "source": "static" }))
                .await;
        assert_eq!(sync_response.status(), StatusCode::OK);

        let open_response =
            post_json(router.clone(), "/v1/chat/sessions", &serde_json::json!({})).await;
        assert_eq!(open_response.status(), StatusCode::OK);
        let open_value = response_json(open_response).await;
        let session_id = open_value
            .get("data")
            .and_then(|data| data.get("session_id"))
            .and_then(serde_json::Value::as_str)
            .unwrap_or_else(|| panic!("missing data.session_id in response: {open_value}"))
            .to_string();
        assert_eq!(
            open_value
                .get("data")
                .and_then(|data| data.get("greeting"))
                .and_then(|greeting| greeting.get("content"))
                .and_then(serde_json::Value::as_str),
            Some(faqdesk_core::GREETING_TEXT)
        );

        let turn_uri = format!("/v1/chat/sessions/{session_id}/messages");
        let turn_response =
            post_json(router.clone(), &turn_uri, &serde_json::json!({ "text": "有給の申請" }))
                .await;
        assert_eq!(turn_response.status(), StatusCode::OK);
        let turn_value = response_json(turn_response).await;
        let data = turn_value
            .get("data")
            .unwrap_or_else(|| panic!("missing data in response: {turn_value}"));
        assert_eq!(
            data.get("completed_exchanges").and_then(serde_json::Value::as_u64),
            Some(1)
        );
        assert_eq!(data.get("show_escalation").and_then(serde_json::Value::as_bool), Some(true));
        assert!(data
            .get("message")
            .and_then(|message| message.get("content"))
            .and_then(serde_json::Value::as_str)
            .is_some_and(|content| content.contains("有給休暇の申請方法は？")));

        let blank_response =
            post_json(router.clone(), &turn_uri, &serde_json::json!({ "text": "   " })).await;
        assert_eq!(blank_response.status(), StatusCode::BAD_REQUEST);

        let missing_uri = "/v1/chat/sessions/does-not-exist/messages";
        let missing_response =
            post_json(router, missing_uri, &serde_json::json!({ "text": "勤怠" })).await;
        assert_eq!(missing_response.status(), StatusCode::NOT_FOUND);

        let _ = std::fs::remove_file(&db_path);
    }
}
