//! HTTP/JSON surface for AGFS: one `axum` router wiring every operation in
//! [`routes`] to a shared [`AppState`], plus the generated OpenAPI document.

pub mod digest;
pub mod error;
pub mod grep;
pub mod routes;
pub mod state;

use std::time::Instant;

use axum::routing::{delete, get, post};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;

pub use state::AppState;

#[derive(OpenApi)]
#[openapi(
    paths(
        routes::stat,
        routes::list,
        routes::read,
        routes::write,
        routes::create,
        routes::mkdir,
        routes::remove,
        routes::rename,
        routes::chmod,
        routes::touch,
        routes::digest_handler,
        routes::grep_handler,
        routes::stream,
        routes::open_handle,
        routes::handle_read,
        routes::handle_write,
        routes::handle_seek,
        routes::handle_sync,
        routes::close_handle,
        routes::mount,
        routes::unmount,
        routes::list_mounts,
        routes::health,
        routes::traffic,
    ),
    components(schemas(
        agfs_core::FileInfo,
        agfs_core::Meta,
        routes::WriteResponse,
        routes::MkdirRequest,
        routes::RenameRequest,
        routes::ChmodRequest,
        routes::DigestResponse,
        routes::GrepResponse,
        crate::grep::GrepMatch,
        routes::OpenHandleRequest,
        routes::OpenHandleResponse,
        routes::SeekRequest,
        routes::SeekResponse,
        routes::MountRequest,
        routes::MountInfo,
        routes::HealthResponse,
        routes::TrafficResponse,
        error::ErrorBody,
    )),
    tags((name = "agfs", description = "Virtual file system over HTTP/JSON"))
)]
pub struct ApiDoc;

async fn openapi_spec() -> axum::Json<utoipa::openapi::OpenApi> {
    axum::Json(ApiDoc::openapi())
}

/// Builds a fresh [`AppState`] with an empty mount table.
pub fn new_state() -> AppState {
    AppState {
        mounts: std::sync::Arc::new(agfs_plugin::mount::MountTable::new()),
        traffic: agfs_plugin::traffic::TrafficMonitor::spawn().monitor,
        started_at: Instant::now(),
    }
}

/// Assembles the full router over a caller-supplied [`AppState`], so the
/// daemon can seed mounts before the server starts accepting connections.
pub fn router(state: AppState) -> Router {
    let handles = Router::new()
        .route("/v1/handles", post(routes::open_handle))
        .route("/v1/handles/:id/read", get(routes::handle_read))
        .route("/v1/handles/:id/write", post(routes::handle_write))
        .route("/v1/handles/:id/seek", post(routes::handle_seek))
        .route("/v1/handles/:id/sync", post(routes::handle_sync))
        .route("/v1/handles/:id", delete(routes::close_handle));

    let files = Router::new()
        .route("/v1/stat", get(routes::stat))
        .route("/v1/list", get(routes::list))
        .route("/v1/read", get(routes::read))
        .route("/v1/write", post(routes::write))
        .route("/v1/create", post(routes::create))
        .route("/v1/mkdir", post(routes::mkdir))
        .route("/v1/remove", delete(routes::remove))
        .route("/v1/rename", post(routes::rename))
        .route("/v1/chmod", post(routes::chmod))
        .route("/v1/touch", post(routes::touch))
        .route("/v1/digest", get(routes::digest_handler))
        .route("/v1/grep", get(routes::grep_handler))
        .route("/v1/stream", get(routes::stream));

    let admin = Router::new()
        .route("/v1/mounts", post(routes::mount).get(routes::list_mounts).delete(routes::unmount))
        .route("/v1/health", get(routes::health))
        .route("/v1/traffic", get(routes::traffic))
        .route("/openapi.json", get(openapi_spec));

    let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any);

    Router::new()
        .merge(files)
        .merge(handles)
        .merge(admin)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    #[tokio::test]
    async fn health_endpoint_reports_ok() {
        let app = router(new_state());
        let response = app
            .oneshot(Request::builder().uri("/v1/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn full_file_lifecycle_through_http() {
        let state = new_state();
        state
            .mounts
            .mount("/mem", "memfs", std::sync::Arc::new(agfs_memfs::MemFsBackend::new()))
            .await
            .unwrap();
        let app = router(state);

        let create_res = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/v1/create?path=/mem/greeting.txt")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(create_res.status(), StatusCode::CREATED);

        let write_res = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/v1/write?path=/mem/greeting.txt&offset=0")
                    .body(Body::from("hello AGFS"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(write_res.status(), StatusCode::OK);

        let read_res = app
            .clone()
            .oneshot(Request::builder().uri("/v1/read?path=/mem/greeting.txt").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(read_res.status(), StatusCode::OK);
        let body = axum::body::to_bytes(read_res.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], b"hello AGFS");

        let missing_res = app
            .oneshot(Request::builder().uri("/v1/stat?path=/mem/nope.txt").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(missing_res.status(), StatusCode::NOT_FOUND);
    }
}
