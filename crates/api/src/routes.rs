//! Route handlers: one function per operation in the dispatcher's table.
//! Every handler resolves `path` through the mount table first, then
//! calls straight through to the `Filesystem` trait: the dispatcher owns
//! routing, plugins own behavior.

use std::sync::Arc;

use axum::body::{Body, Bytes};
use axum::extract::{Path as AxumPath, Query, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use agfs_core::{AgfsError, AgfsResult, FileInfo, OpenFlags, Whence, WriteFlags};
use agfs_plugin::filesystem::{Filesystem, HandleFS, Streamer, Toucher};
use agfs_plugin::stream::StreamReader;
use agfs_plugin::handle::HandleId;

use crate::digest::{digest, Algorithm};
use crate::error::ApiError;
use crate::grep::{grep, GrepMatch};
use crate::state::AppState;

const EOF_HEADER: &str = "x-agfs-eof";

#[derive(Debug, Deserialize, ToSchema, IntoParams)]
pub struct PathQuery {
    pub path: String,
}

#[derive(Debug, Deserialize, ToSchema, IntoParams)]
pub struct ReadQuery {
    pub path: String,
    #[serde(default = "default_offset")]
    pub offset: i64,
    #[serde(default = "default_size")]
    pub size: i64,
}

fn default_offset() -> i64 {
    0
}
fn default_size() -> i64 {
    -1
}

#[derive(Debug, Deserialize, ToSchema, IntoParams)]
pub struct WriteQuery {
    pub path: String,
    #[serde(default = "default_write_offset")]
    pub offset: i64,
    #[serde(default)]
    pub flags: u32,
}

fn default_write_offset() -> i64 {
    -1
}

#[derive(Debug, Serialize, ToSchema)]
pub struct WriteResponse {
    pub written: usize,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct MkdirRequest {
    pub path: String,
    #[serde(default = "default_mode")]
    pub mode: u32,
}

fn default_mode() -> u32 {
    agfs_core::info::advisory_mode::DIR
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct RenameRequest {
    pub old: String,
    pub new: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct ChmodRequest {
    pub path: String,
    pub mode: u32,
}

#[derive(Debug, Deserialize, ToSchema, IntoParams)]
pub struct DigestQuery {
    pub path: String,
    pub algorithm: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct DigestResponse {
    pub algorithm: String,
    pub digest: String,
}

#[derive(Debug, Deserialize, ToSchema, IntoParams)]
pub struct GrepQuery {
    pub path: String,
    pub pattern: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct GrepResponse {
    pub matches: Vec<GrepMatch>,
}

async fn resolve(state: &AppState, path: &str) -> AgfsResult<(Arc<dyn agfs_plugin::filesystem::Filesystem>, String)> {
    state.mounts.dispatch(path).await
}

#[utoipa::path(get, path = "/v1/stat", params(PathQuery), responses((status = 200, body = FileInfo)))]
pub async fn stat(State(state): State<AppState>, Query(q): Query<PathQuery>) -> Result<Json<FileInfo>, ApiError> {
    let (backend, rel) = resolve(&state, &q.path).await?;
    Ok(Json(backend.stat(&rel).await?))
}

#[utoipa::path(get, path = "/v1/list", params(PathQuery), responses((status = 200, body = [FileInfo])))]
pub async fn list(State(state): State<AppState>, Query(q): Query<PathQuery>) -> Result<Json<Vec<FileInfo>>, ApiError> {
    let (backend, rel) = resolve(&state, &q.path).await?;
    Ok(Json(backend.read_dir(&rel).await?))
}

#[utoipa::path(get, path = "/v1/read", params(ReadQuery), responses((status = 200)))]
pub async fn read(State(state): State<AppState>, Query(q): Query<ReadQuery>) -> Result<Response, ApiError> {
    let (backend, rel) = resolve(&state, &q.path).await?;
    let result = backend.read(&rel, q.offset, q.size).await?;
    state.traffic.record_read(result.data.len());
    let mut headers = HeaderMap::new();
    headers.insert(EOF_HEADER, HeaderValue::from_static(if result.eof { "true" } else { "false" }));
    Ok((headers, result.data).into_response())
}

#[utoipa::path(post, path = "/v1/write", params(WriteQuery), responses((status = 200, body = WriteResponse)))]
pub async fn write(
    State(state): State<AppState>,
    Query(q): Query<WriteQuery>,
    body: Bytes,
) -> Result<Json<WriteResponse>, ApiError> {
    let (backend, rel) = resolve(&state, &q.path).await?;
    let n = backend.write(&rel, &body, q.offset, WriteFlags::new(q.flags)).await?;
    state.traffic.record_write(n);
    Ok(Json(WriteResponse { written: n }))
}

#[utoipa::path(post, path = "/v1/create", params(PathQuery), responses((status = 201)))]
pub async fn create(State(state): State<AppState>, Query(q): Query<PathQuery>) -> Result<StatusCode, ApiError> {
    let (backend, rel) = resolve(&state, &q.path).await?;
    backend.create(&rel).await?;
    Ok(StatusCode::CREATED)
}

#[utoipa::path(post, path = "/v1/mkdir", request_body = MkdirRequest, responses((status = 201)))]
pub async fn mkdir(State(state): State<AppState>, Json(req): Json<MkdirRequest>) -> Result<StatusCode, ApiError> {
    let (backend, rel) = resolve(&state, &req.path).await?;
    backend.mkdir(&rel, req.mode).await?;
    Ok(StatusCode::CREATED)
}

#[derive(Debug, Deserialize, ToSchema, IntoParams)]
pub struct RemoveQuery {
    pub path: String,
    #[serde(default)]
    pub recursive: bool,
}

#[utoipa::path(delete, path = "/v1/remove", params(RemoveQuery), responses((status = 204)))]
pub async fn remove(State(state): State<AppState>, Query(q): Query<RemoveQuery>) -> Result<StatusCode, ApiError> {
    let (backend, rel) = resolve(&state, &q.path).await?;
    if q.recursive {
        backend.remove_all(&rel).await?;
    } else {
        backend.remove(&rel).await?;
    }
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(post, path = "/v1/rename", request_body = RenameRequest, responses((status = 204)))]
pub async fn rename(State(state): State<AppState>, Json(req): Json<RenameRequest>) -> Result<StatusCode, ApiError> {
    let (old_backend, old_rel) = resolve(&state, &req.old).await?;
    let (new_backend, new_rel) = resolve(&state, &req.new).await?;
    if !Arc::ptr_eq(&old_backend, &new_backend) {
        return Err(AgfsError::not_supported("cross-mount rename is not supported").into());
    }
    old_backend.rename(&old_rel, &new_rel).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(post, path = "/v1/chmod", request_body = ChmodRequest, responses((status = 204)))]
pub async fn chmod(State(state): State<AppState>, Json(req): Json<ChmodRequest>) -> Result<StatusCode, ApiError> {
    let (backend, rel) = resolve(&state, &req.path).await?;
    backend.chmod(&rel, req.mode).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(post, path = "/v1/touch", params(PathQuery), responses((status = 204)))]
pub async fn touch(State(state): State<AppState>, Query(q): Query<PathQuery>) -> Result<StatusCode, ApiError> {
    let (backend, rel) = resolve(&state, &q.path).await?;
    match backend.as_toucher() {
        Some(toucher) => toucher.touch(&rel).await?,
        None => agfs_plugin::filesystem::touch_fallback(backend.as_ref(), &rel).await?,
    }
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(get, path = "/v1/digest", params(DigestQuery), responses((status = 200, body = DigestResponse)))]
pub async fn digest_handler(
    State(state): State<AppState>,
    Query(q): Query<DigestQuery>,
) -> Result<Json<DigestResponse>, ApiError> {
    let (backend, rel) = resolve(&state, &q.path).await?;
    let algorithm = Algorithm::parse(&q.algorithm)?;
    let value = digest(backend.as_ref(), &rel, algorithm).await?;
    Ok(Json(DigestResponse { algorithm: q.algorithm, digest: value }))
}

#[utoipa::path(get, path = "/v1/grep", params(GrepQuery), responses((status = 200, body = GrepResponse)))]
pub async fn grep_handler(
    State(state): State<AppState>,
    Query(q): Query<GrepQuery>,
) -> Result<Json<GrepResponse>, ApiError> {
    let (backend, rel) = resolve(&state, &q.path).await?;
    let matches = grep(backend.as_ref(), &rel, &q.pattern).await?;
    Ok(Json(GrepResponse { matches }))
}

const STREAM_CHUNK_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(30);

#[utoipa::path(get, path = "/v1/stream", params(PathQuery), responses((status = 200)))]
pub async fn stream(State(state): State<AppState>, Query(q): Query<PathQuery>) -> Result<Response, ApiError> {
    let (backend, rel) = resolve(&state, &q.path).await?;
    let mut reader = {
        let streamer = backend.as_streamer().ok_or_else(|| {
            AgfsError::not_supported(format!("{} does not support streaming", backend.backend_name()))
        })?;
        streamer.open_stream(&rel).await?
    };
    let traffic = state.traffic.clone();

    let (tx, rx) = tokio::sync::mpsc::channel::<Result<Bytes, std::io::Error>>(4);
    tokio::spawn(async move {
        loop {
            match reader.read_chunk(STREAM_CHUNK_TIMEOUT).await {
                Ok(Some(chunk)) => {
                    let eof = chunk.eof;
                    if !chunk.data.is_empty() {
                        traffic.record_read(chunk.data.len());
                        if tx.send(Ok(Bytes::from(chunk.data))).await.is_err() {
                            break;
                        }
                    }
                    if eof {
                        break;
                    }
                }
                Ok(None) => continue,
                Err(e) => {
                    let _ = tx.send(Err(std::io::Error::other(e.to_string()))).await;
                    break;
                }
            }
        }
        reader.close().await;
    });

    let body = Body::from_stream(tokio_stream::wrappers::ReceiverStream::new(rx));
    Ok(Response::builder()
        .header("content-type", "application/octet-stream")
        .body(body)
        .map_err(|e| AgfsError::internal(e.to_string()))?)
}

// --- Stateful handles ---

#[derive(Debug, Deserialize, ToSchema)]
pub struct OpenHandleRequest {
    pub path: String,
    pub flags: u32,
    #[serde(default = "default_mode")]
    pub mode: u32,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct OpenHandleResponse {
    pub handle: i64,
}

#[utoipa::path(post, path = "/v1/handles", request_body = OpenHandleRequest, responses((status = 201, body = OpenHandleResponse)))]
pub async fn open_handle(
    State(state): State<AppState>,
    Json(req): Json<OpenHandleRequest>,
) -> Result<Json<OpenHandleResponse>, ApiError> {
    let (backend, rel) = resolve(&state, &req.path).await?;
    let handle_fs = backend
        .as_handle_fs()
        .ok_or_else(|| AgfsError::not_supported(format!("{} does not support handles", backend.backend_name())))?;
    let id = handle_fs.open_handle(&rel, OpenFlags::new(req.flags), req.mode).await?;
    // the handle lives on `backend`; re-dispatching by path on every later
    // call finds the same backend instance via the mount table, so no
    // extra bookkeeping is needed here.
    Ok(Json(OpenHandleResponse { handle: id.0 }))
}

#[derive(Debug, Deserialize, ToSchema, IntoParams)]
pub struct HandleReadQuery {
    pub path: String,
    #[serde(default = "default_size")]
    pub size: i64,
}

#[utoipa::path(get, path = "/v1/handles/{id}/read", params(("id" = i64, Path), HandleReadQuery), responses((status = 200)))]
pub async fn handle_read(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<i64>,
    Query(q): Query<HandleReadQuery>,
) -> Result<Response, ApiError> {
    let (backend, _rel) = resolve(&state, &q.path).await?;
    let handle_fs = backend
        .as_handle_fs()
        .ok_or_else(|| AgfsError::not_supported(format!("{} does not support handles", backend.backend_name())))?;
    let result = handle_fs.handle_read(HandleId(id), q.size).await?;
    state.traffic.record_read(result.data.len());
    let mut headers = HeaderMap::new();
    headers.insert(EOF_HEADER, HeaderValue::from_static(if result.eof { "true" } else { "false" }));
    Ok((headers, result.data).into_response())
}

#[derive(Debug, Deserialize, ToSchema, IntoParams)]
pub struct HandleWriteQuery {
    pub path: String,
}

#[utoipa::path(post, path = "/v1/handles/{id}/write", params(("id" = i64, Path), HandleWriteQuery), responses((status = 200, body = WriteResponse)))]
pub async fn handle_write(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<i64>,
    Query(q): Query<HandleWriteQuery>,
    body: Bytes,
) -> Result<Json<WriteResponse>, ApiError> {
    let (backend, _rel) = resolve(&state, &q.path).await?;
    let handle_fs = backend
        .as_handle_fs()
        .ok_or_else(|| AgfsError::not_supported(format!("{} does not support handles", backend.backend_name())))?;
    let n = handle_fs.handle_write(HandleId(id), &body).await?;
    state.traffic.record_write(n);
    Ok(Json(WriteResponse { written: n }))
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct SeekRequest {
    pub path: String,
    pub offset: i64,
    pub whence: i32,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct SeekResponse {
    pub position: i64,
}

#[utoipa::path(post, path = "/v1/handles/{id}/seek", params(("id" = i64, Path)), request_body = SeekRequest, responses((status = 200, body = SeekResponse)))]
pub async fn handle_seek(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<i64>,
    Json(req): Json<SeekRequest>,
) -> Result<Json<SeekResponse>, ApiError> {
    let (backend, _rel) = resolve(&state, &req.path).await?;
    let handle_fs = backend
        .as_handle_fs()
        .ok_or_else(|| AgfsError::not_supported(format!("{} does not support handles", backend.backend_name())))?;
    let whence = Whence::try_from(req.whence)?;
    let position = handle_fs.handle_seek(HandleId(id), req.offset, whence).await?;
    Ok(Json(SeekResponse { position }))
}

#[utoipa::path(post, path = "/v1/handles/{id}/sync", params(("id" = i64, Path), PathQuery), responses((status = 204)))]
pub async fn handle_sync(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<i64>,
    Query(q): Query<PathQuery>,
) -> Result<StatusCode, ApiError> {
    let (backend, _rel) = resolve(&state, &q.path).await?;
    let handle_fs = backend
        .as_handle_fs()
        .ok_or_else(|| AgfsError::not_supported(format!("{} does not support handles", backend.backend_name())))?;
    handle_fs.handle_sync(HandleId(id)).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(delete, path = "/v1/handles/{id}", params(("id" = i64, Path), PathQuery), responses((status = 204)))]
pub async fn close_handle(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<i64>,
    Query(q): Query<PathQuery>,
) -> Result<StatusCode, ApiError> {
    let (backend, _rel) = resolve(&state, &q.path).await?;
    let handle_fs = backend
        .as_handle_fs()
        .ok_or_else(|| AgfsError::not_supported(format!("{} does not support handles", backend.backend_name())))?;
    handle_fs.close_handle(HandleId(id)).await?;
    Ok(StatusCode::NO_CONTENT)
}

// --- Mounts ---

#[derive(Debug, Deserialize, ToSchema)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MountRequest {
    Memfs { point: String },
    Sqlproj { point: String, db_path: String, #[serde(default = "default_idle_secs")] idle_timeout_secs: u64 },
}

fn default_idle_secs() -> u64 {
    300
}

#[utoipa::path(post, path = "/v1/mounts", request_body = MountRequest, responses((status = 201)))]
pub async fn mount(State(state): State<AppState>, Json(req): Json<MountRequest>) -> Result<StatusCode, ApiError> {
    match req {
        MountRequest::Memfs { point } => {
            let backend = Arc::new(agfs_memfs::MemFsBackend::new());
            state.mounts.mount(&point, "memfs", backend).await?;
        }
        MountRequest::Sqlproj { point, db_path, idle_timeout_secs } => {
            let backend = Arc::new(agfs_sqlproj::SqlProjFs::new(db_path, std::time::Duration::from_secs(idle_timeout_secs)));
            state.mounts.mount(&point, "sqlproj", backend).await?;
        }
    }
    Ok(StatusCode::CREATED)
}

#[utoipa::path(delete, path = "/v1/mounts", params(PathQuery), responses((status = 204)))]
pub async fn unmount(State(state): State<AppState>, Query(q): Query<PathQuery>) -> Result<StatusCode, ApiError> {
    state.mounts.unmount(&q.path).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Serialize, ToSchema)]
pub struct MountInfo {
    pub point: String,
    pub backend: String,
    pub mounted_at: chrono::DateTime<chrono::Utc>,
}

#[utoipa::path(get, path = "/v1/mounts", responses((status = 200, body = [MountInfo])))]
pub async fn list_mounts(State(state): State<AppState>) -> Json<Vec<MountInfo>> {
    let entries = state.mounts.list().await;
    Json(
        entries
            .into_iter()
            .map(|(point, backend, mounted_at)| MountInfo { point, backend, mounted_at })
            .collect(),
    )
}

#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    pub status: &'static str,
    pub uptime_secs: u64,
}

#[utoipa::path(get, path = "/v1/health", responses((status = 200, body = HealthResponse)))]
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok", uptime_secs: state.started_at.elapsed().as_secs() })
}

#[derive(Debug, Serialize, ToSchema)]
pub struct TrafficResponse {
    pub total_bytes_read: u64,
    pub total_bytes_written: u64,
    pub bytes_read_per_sec: u64,
    pub bytes_written_per_sec: u64,
}

#[utoipa::path(get, path = "/v1/traffic", responses((status = 200, body = TrafficResponse)))]
pub async fn traffic(State(state): State<AppState>) -> Json<TrafficResponse> {
    let rates = state.traffic.rates();
    Json(TrafficResponse {
        total_bytes_read: state.traffic.total_bytes_read(),
        total_bytes_written: state.traffic.total_bytes_written(),
        bytes_read_per_sec: rates.bytes_read_per_sec,
        bytes_written_per_sec: rates.bytes_written_per_sec,
    })
}
