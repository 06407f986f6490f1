//! REST API handlers.
//!
//! Each handler calls one provider operation and maps its result to a JSON
//! response, or to a raw byte stream for logs, objects and proxies.

use axum::Json;
use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use keel_core::{
    Attributes, BuildCreateOptions, BuildUpdateOptions, ObjectStoreOptions, ProcessListOptions,
    ProcessRunOptions, ReleaseCreateOptions,
};
use keel_provider::ProviderError;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::ApiState;
use crate::stream::{body_reader, pump_body, reader_body};

/// Response wrapper for consistent API format.
#[derive(serde::Serialize)]
struct ApiResponse<T: serde::Serialize> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T: serde::Serialize> ApiResponse<T> {
    fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            error: None,
        })
    }
}

fn error_response(msg: &str, status: StatusCode) -> impl IntoResponse {
    (
        status,
        Json(ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(msg.to_string()),
        }),
    )
}

/// HTTP status for a provider failure.
pub fn error_status(e: &ProviderError) -> StatusCode {
    match e {
        ProviderError::NotFound(_) => StatusCode::NOT_FOUND,
        ProviderError::AlreadyExists(_) => StatusCode::CONFLICT,
        ProviderError::Validation(_) => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn provider_error(e: ProviderError) -> Response {
    let status = error_status(&e);
    if status.is_server_error() {
        warn!(error = %e, "request failed");
    }
    error_response(&e.to_string(), status).into_response()
}

fn respond<T: serde::Serialize>(result: Result<T, ProviderError>) -> Response {
    match result {
        Ok(data) => ApiResponse::ok(data).into_response(),
        Err(e) => provider_error(e),
    }
}

fn created<T: serde::Serialize>(result: Result<T, ProviderError>) -> Response {
    match result {
        Ok(data) => (StatusCode::CREATED, ApiResponse::ok(data)).into_response(),
        Err(e) => provider_error(e),
    }
}

fn streamed(body: Body) -> Response {
    (
        StatusCode::OK,
        [("content-type", "application/octet-stream")],
        body,
    )
        .into_response()
}

// ── System ─────────────────────────────────────────────────────

/// GET /system
pub async fn get_system(State(state): State<ApiState>) -> Response {
    respond(state.provider.system_get().await)
}

// ── Apps ───────────────────────────────────────────────────────

#[derive(Deserialize)]
pub struct AppCreateRequest {
    pub name: String,
}

/// GET /apps
pub async fn list_apps(State(state): State<ApiState>) -> Response {
    respond(state.provider.app_list().await)
}

/// POST /apps
pub async fn create_app(
    State(state): State<ApiState>,
    Json(req): Json<AppCreateRequest>,
) -> Response {
    created(state.provider.app_create(&req.name).await)
}

/// GET /apps/{app}
pub async fn get_app(State(state): State<ApiState>, Path(app): Path<String>) -> Response {
    respond(state.provider.app_get(&app).await)
}

/// DELETE /apps/{app}
pub async fn delete_app(State(state): State<ApiState>, Path(app): Path<String>) -> Response {
    respond(state.provider.app_delete(&app).await.map(|()| "deleted"))
}

// ── Builds ─────────────────────────────────────────────────────

#[derive(Deserialize)]
pub struct BuildCreateRequest {
    pub url: String,
    #[serde(default)]
    pub manifest: String,
}

/// GET /apps/{app}/builds
pub async fn list_builds(State(state): State<ApiState>, Path(app): Path<String>) -> Response {
    respond(state.provider.build_list(&app).await)
}

/// POST /apps/{app}/builds
pub async fn create_build(
    State(state): State<ApiState>,
    Path(app): Path<String>,
    Json(req): Json<BuildCreateRequest>,
) -> Response {
    let opts = BuildCreateOptions {
        manifest: req.manifest,
    };
    created(state.provider.build_create(&app, &req.url, opts).await)
}

/// GET /apps/{app}/builds/{id}
pub async fn get_build(
    State(state): State<ApiState>,
    Path((app, id)): Path<(String, String)>,
) -> Response {
    respond(state.provider.build_get(&app, &id).await)
}

/// PUT /apps/{app}/builds/{id}
pub async fn update_build(
    State(state): State<ApiState>,
    Path((app, id)): Path<(String, String)>,
    Json(opts): Json<BuildUpdateOptions>,
) -> Response {
    respond(state.provider.build_update(&app, &id, opts).await)
}

/// GET /apps/{app}/builds/{id}/logs
pub async fn build_logs(
    State(state): State<ApiState>,
    Path((app, id)): Path<(String, String)>,
) -> Response {
    match state.provider.build_logs(&app, &id).await {
        Ok(logs) => streamed(reader_body(logs)),
        Err(e) => provider_error(e),
    }
}

// ── Releases ───────────────────────────────────────────────────

/// GET /apps/{app}/releases
pub async fn list_releases(State(state): State<ApiState>, Path(app): Path<String>) -> Response {
    respond(state.provider.release_list(&app).await)
}

/// POST /apps/{app}/releases
pub async fn create_release(
    State(state): State<ApiState>,
    Path(app): Path<String>,
    Json(opts): Json<ReleaseCreateOptions>,
) -> Response {
    created(state.provider.release_create(&app, opts).await)
}

/// GET /apps/{app}/releases/{id}
pub async fn get_release(
    State(state): State<ApiState>,
    Path((app, id)): Path<(String, String)>,
) -> Response {
    respond(state.provider.release_get(&app, &id).await)
}

// ── Processes ──────────────────────────────────────────────────

/// GET /apps/{app}/processes
pub async fn list_processes(
    State(state): State<ApiState>,
    Path(app): Path<String>,
    Query(opts): Query<ProcessListOptions>,
) -> Response {
    respond(state.provider.process_list(&app, opts).await)
}

/// POST /apps/{app}/processes
pub async fn run_process(
    State(state): State<ApiState>,
    Path(app): Path<String>,
    Json(opts): Json<ProcessRunOptions>,
) -> Response {
    created(state.provider.process_run(&app, opts).await)
}

/// DELETE /apps/{app}/processes/{pid}
pub async fn stop_process(
    State(state): State<ApiState>,
    Path((app, pid)): Path<(String, String)>,
) -> Response {
    respond(state.provider.process_stop(&app, &pid).await.map(|()| "stopped"))
}

/// POST /apps/{app}/processes/{pid}/files
///
/// The body is a tar archive unpacked at the process's filesystem root.
pub async fn upload_files(
    State(state): State<ApiState>,
    Path((app, pid)): Path<(String, String)>,
    body: Body,
) -> Response {
    let (reader, upload) = body_reader(body);
    let copied = state.provider.files_upload(&app, &pid, Box::new(reader)).await;
    match (copied, upload.await) {
        (Ok(()), Ok(Ok(_))) => ApiResponse::ok("uploaded").into_response(),
        (Ok(()), upload) => {
            let reason = match upload {
                Ok(Err(e)) => e.to_string(),
                Err(e) => e.to_string(),
                Ok(Ok(_)) => String::new(),
            };
            error_response(&format!("upload interrupted: {reason}"), StatusCode::BAD_REQUEST)
                .into_response()
        }
        (Err(e), _) => provider_error(e),
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct FilesDeleteQuery {
    /// Comma-separated paths.
    pub files: String,
}

/// DELETE /apps/{app}/processes/{pid}/files?files=a,b
pub async fn delete_files(
    State(state): State<ApiState>,
    Path((app, pid)): Path<(String, String)>,
    Query(query): Query<FilesDeleteQuery>,
) -> Response {
    let files = query
        .files
        .split(',')
        .filter(|f| !f.is_empty())
        .map(str::to_string)
        .collect();
    respond(state.provider.files_delete(&app, &pid, files).await.map(|()| "deleted"))
}

/// POST /apps/{app}/processes/{pid}/proxy/{port}
///
/// The request body is streamed to the process port; the response streams
/// back whatever the process sends until the bridge closes.
pub async fn proxy(
    State(state): State<ApiState>,
    Path((app, pid, port)): Path<(String, String, u16)>,
    body: Body,
) -> Response {
    let stream = match state.provider.proxy_start(&app, &pid, port).await {
        Ok(stream) => stream,
        Err(e) => return provider_error(e),
    };

    let (reader, mut writer) = tokio::io::split(stream);
    tokio::spawn(async move {
        match pump_body(body, &mut writer).await {
            Ok(bytes) => debug!(%app, %pid, port, bytes, "proxy upload finished"),
            Err(e) => debug!(%app, %pid, port, error = %e, "proxy upload ended"),
        }
    });
    streamed(reader_body(reader))
}

// ── Objects ────────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ObjectListQuery {
    pub prefix: String,
}

/// GET /apps/{app}/objects
pub async fn list_objects(
    State(state): State<ApiState>,
    Path(app): Path<String>,
    Query(query): Query<ObjectListQuery>,
) -> Response {
    respond(state.provider.object_list(&app, &query.prefix).await)
}

/// GET /apps/{app}/objects/{*key}
pub async fn fetch_object(
    State(state): State<ApiState>,
    Path((app, key)): Path<(String, String)>,
) -> Response {
    match state.provider.object_fetch(&app, &key).await {
        Ok(reader) => streamed(reader_body(reader)),
        Err(e) => provider_error(e),
    }
}

/// POST /apps/{app}/objects/{*key}
pub async fn store_object(
    State(state): State<ApiState>,
    Path((app, key)): Path<(String, String)>,
    Query(opts): Query<ObjectStoreOptions>,
    body: Body,
) -> Response {
    let (reader, upload) = body_reader(body);
    let stored = state
        .provider
        .object_store(&app, &key, Box::new(reader), opts)
        .await;

    // A body that failed mid-way looks like a short object to the store.
    match (stored, upload.await) {
        (Ok(info), Ok(Ok(_))) => (StatusCode::CREATED, ApiResponse::ok(info)).into_response(),
        (Ok(_), upload) => {
            let reason = match upload {
                Ok(Err(e)) => e.to_string(),
                Err(e) => e.to_string(),
                Ok(Ok(_)) => String::new(),
            };
            if let Err(e) = state.provider.object_delete(&app, &key).await {
                warn!(%app, %key, error = %e, "failed to remove incomplete object");
            }
            error_response(&format!("upload interrupted: {reason}"), StatusCode::BAD_REQUEST)
                .into_response()
        }
        (Err(e), _) => provider_error(e),
    }
}

/// HEAD /apps/{app}/objects/{*key}
pub async fn object_exists(
    State(state): State<ApiState>,
    Path((app, key)): Path<(String, String)>,
) -> Response {
    match state.provider.object_exists(&app, &key).await {
        Ok(true) => StatusCode::OK.into_response(),
        Ok(false) => StatusCode::NOT_FOUND.into_response(),
        Err(e) => error_status(&e).into_response(),
    }
}

/// DELETE /apps/{app}/objects/{*key}
pub async fn delete_object(
    State(state): State<ApiState>,
    Path((app, key)): Path<(String, String)>,
) -> Response {
    respond(state.provider.object_delete(&app, &key).await.map(|()| "deleted"))
}

// ── Tables ─────────────────────────────────────────────────────

#[derive(serde::Serialize)]
struct RowCreated {
    id: String,
}

/// GET /apps/{app}/tables/{table}
pub async fn list_rows(
    State(state): State<ApiState>,
    Path((app, table)): Path<(String, String)>,
) -> Response {
    respond(state.provider.table_list(&app, &table).await)
}

/// POST /apps/{app}/tables/{table}
pub async fn store_row(
    State(state): State<ApiState>,
    Path((app, table)): Path<(String, String)>,
    Json(attrs): Json<Attributes>,
) -> Response {
    created(
        state
            .provider
            .table_store(&app, &table, attrs)
            .await
            .map(|id| RowCreated { id }),
    )
}

/// GET /apps/{app}/tables/{table}/{id}
pub async fn fetch_row(
    State(state): State<ApiState>,
    Path((app, table, id)): Path<(String, String, String)>,
) -> Response {
    respond(state.provider.table_fetch(&app, &table, &id).await)
}

/// DELETE /apps/{app}/tables/{table}/{id}
pub async fn delete_row(
    State(state): State<ApiState>,
    Path((app, table, id)): Path<(String, String, String)>,
) -> Response {
    respond(state.provider.table_delete(&app, &table, &id).await.map(|()| "deleted"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use keel_container::fake::FakeRuntime;
    use keel_core::KeelConfig;
    use keel_provider::LocalProvider;

    fn test_state() -> (tempfile::TempDir, ApiState) {
        let dir = tempfile::tempdir().unwrap();
        let config = KeelConfig {
            root: dir.path().to_path_buf(),
            router: "none".to_string(),
            ..KeelConfig::default()
        };
        let provider = LocalProvider::in_memory(&config, Arc::new(FakeRuntime::new())).unwrap();
        (dir, ApiState { provider: Arc::new(provider) })
    }

    async fn body_json(resp: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[test]
    fn errors_map_to_statuses() {
        assert_eq!(error_status(&ProviderError::NotFound("x".into())), StatusCode::NOT_FOUND);
        assert_eq!(error_status(&ProviderError::AlreadyExists("x".into())), StatusCode::CONFLICT);
        assert_eq!(error_status(&ProviderError::Validation("x".into())), StatusCode::BAD_REQUEST);
        assert_eq!(
            error_status(&ProviderError::Registration("x".into())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[tokio::test]
    async fn list_apps_empty() {
        let (_dir, state) = test_state();
        let resp = list_apps(State(state)).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let json = body_json(resp).await;
        assert_eq!(json["success"], true);
        assert_eq!(json["data"], serde_json::json!([]));
    }

    #[tokio::test]
    async fn create_then_conflict() {
        let (_dir, state) = test_state();
        let req = || AppCreateRequest {
            name: "web".to_string(),
        };

        let resp = create_app(State(state.clone()), Json(req())).await;
        assert_eq!(resp.status(), StatusCode::CREATED);

        let resp = create_app(State(state), Json(req())).await;
        assert_eq!(resp.status(), StatusCode::CONFLICT);
        let json = body_json(resp).await;
        assert_eq!(json["success"], false);
        assert!(json["error"].as_str().unwrap().contains("web"));
    }

    #[tokio::test]
    async fn build_on_missing_app_is_404() {
        let (_dir, state) = test_state();
        let resp = create_build(
            State(state),
            Path("ghost".to_string()),
            Json(BuildCreateRequest {
                url: "https://example.com/src.tgz".to_string(),
                manifest: String::new(),
            }),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn store_row_returns_id() {
        let (_dir, state) = test_state();
        state.provider.app_create("web").await.unwrap();

        let attrs: Attributes = [("k".to_string(), "v".to_string())].into();
        let resp = store_row(
            State(state),
            Path(("web".to_string(), "users".to_string())),
            Json(attrs),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::CREATED);
        let json = body_json(resp).await;
        assert!(json["data"]["id"].as_str().unwrap().starts_with('T'));
    }
}
