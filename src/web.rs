use crate::{
    app::{App, AppError},
    catalog::{Item, LabelTag},
    labeler::LabelError,
    semantic::{ProviderStatus, RankError},
};
use axum::{
    extract::{DefaultBodyLimit, Path, Query, State},
    http::{header, StatusCode},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::{fmt::Debug, future::Future, sync::Arc, time::Duration};
use tokio::{runtime::Runtime, signal};

#[derive(Clone)]
struct SharedState {
    app: Arc<App>,
}

#[derive(Debug, Serialize)]
struct Envelope<T> {
    message: &'static str,
    data: T,
}

fn message(status: StatusCode, message: &str) -> axum::response::Response {
    (status, Json(json!({ "message": message }))).into_response()
}

pub fn router(app: Arc<App>) -> Router {
    let shared_state = Arc::new(SharedState { app });

    Router::new()
        .route("/", get(list))
        .route("/search", get(search))
        .route("/health", get(health))
        .route("/image", axum::routing::post(upload))
        .route("/image/:name", get(image).delete(delete))
        .route("/image/:name/labels", get(labels))
        .layer(DefaultBodyLimit::max(50 * 1024 * 1024))
        .layer(
            tower_http::trace::TraceLayer::new_for_http()
                .make_span_with(
                    tower_http::trace::DefaultMakeSpan::new().level(tracing::Level::INFO),
                )
                .on_response(
                    tower_http::trace::DefaultOnResponse::new().level(tracing::Level::INFO),
                ),
        )
        .with_state(shared_state)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            log::error!("failed to install Ctrl+C handler: {err}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(err) => {
                log::error!("failed to install signal handler: {err}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    log::warn!("shutting down");
}

async fn start_app(app: Arc<App>, addr: &str) -> anyhow::Result<()> {
    // load the model in the background so the first query doesn't pay for it
    let warm = app.clone();
    let _warm_up = tokio::task::spawn_blocking(move || warm.warm_up());

    let listener = tokio::net::TcpListener::bind(addr).await?;
    log::info!("listening on {addr}");
    axum::serve(listener, router(app))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

/// How long blocking work (a model download in warm-up) may hold up exit
/// after the server has stopped.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Drive `fut` to completion, then tear the runtime down without waiting
/// on blocking tasks for longer than `grace`.
fn run_then_shutdown<F: Future>(runtime: Runtime, fut: F, grace: Duration) -> F::Output {
    let output = runtime.block_on(fut);
    runtime.shutdown_timeout(grace);
    output
}

pub fn start_daemon(app: App, addr: &str) -> anyhow::Result<()> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    run_then_shutdown(runtime, start_app(Arc::new(app), addr), SHUTDOWN_GRACE)
}

#[derive(Debug)]
struct HttpError(AppError);

impl IntoResponse for HttpError {
    fn into_response(self) -> axum::response::Response {
        let status = match &self.0 {
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::AlreadyExists(_) => StatusCode::CONFLICT,
            AppError::NotAnImage
            | AppError::Invalid(_)
            | AppError::Base64(_)
            | AppError::Rank(RankError::InvalidInput(_))
            | AppError::Label(LabelError::NotConfigured(_))
            | AppError::Label(LabelError::Parse(_)) => StatusCode::BAD_REQUEST,
            AppError::Rank(RankError::ModelUnavailable(_)) => {
                log::error!("{self:?}");
                StatusCode::SERVICE_UNAVAILABLE
            }
            AppError::Label(_) => {
                log::error!("{self:?}");
                StatusCode::BAD_GATEWAY
            }
            AppError::Rank(RankError::Similarity(_))
            | AppError::Catalog(_)
            | AppError::IO(_)
            | AppError::Other(_) => {
                log::error!("{self:?}");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        message(status, &self.0.to_string())
    }
}

impl<E> From<E> for HttpError
where
    E: Into<AppError>,
{
    fn from(err: E) -> Self {
        Self(err.into())
    }
}

#[derive(Debug, Deserialize)]
struct SearchParams {
    query: Option<String>,
}

async fn search(
    State(state): State<Arc<SharedState>>,
    Query(params): Query<SearchParams>,
) -> Result<axum::response::Response, HttpError> {
    let Some(query) = params.query.filter(|q| !q.trim().is_empty()) else {
        return Ok(message(StatusCode::BAD_REQUEST, "Missing query"));
    };

    let app = state.app.clone();
    let images = tokio::task::block_in_place(move || app.search(&query))?;

    if images.is_empty() {
        return Ok(message(StatusCode::NOT_FOUND, "No matching image"));
    }

    Ok(Json(Envelope {
        message: "Retrieved",
        data: images,
    })
    .into_response())
}

async fn list(
    State(state): State<Arc<SharedState>>,
) -> Result<axum::response::Response, HttpError> {
    let images = state.app.list()?;

    if images.is_empty() {
        return Ok(message(StatusCode::NOT_FOUND, "No images found"));
    }

    Ok(Json(Envelope {
        message: "Retrieved",
        data: images,
    })
    .into_response())
}

async fn image(
    State(state): State<Arc<SharedState>>,
    Path(name): Path<String>,
) -> Result<axum::response::Response, HttpError> {
    let app = state.app.clone();
    let bytes = tokio::task::block_in_place(move || app.image(&name))?;

    let content_type = infer::get(&bytes)
        .map(|kind| kind.mime_type())
        .unwrap_or("application/octet-stream");

    Ok(([(header::CONTENT_TYPE, content_type)], bytes).into_response())
}

async fn labels(
    State(state): State<Arc<SharedState>>,
    Path(name): Path<String>,
) -> Result<Json<Envelope<Item>>, HttpError> {
    let item = state.app.item(&name)?;
    Ok(Json(Envelope {
        message: "Retrieved",
        data: item,
    }))
}

#[derive(Deserialize)]
pub struct ImageUploadRequest {
    pub image_b64: String,

    /// Skip label detection and store these labels instead
    #[serde(default)]
    pub labels: Option<Vec<LabelTag>>,
}

impl Debug for ImageUploadRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "ImageUploadRequest {{ image_b64: [REDACTED], labels: {:?} }}",
            self.labels
        )
    }
}

async fn upload(
    State(state): State<Arc<SharedState>>,
    Json(payload): Json<ImageUploadRequest>,
) -> Result<axum::response::Response, HttpError> {
    log::debug!("payload: {payload:?}");

    let data = STANDARD.decode(payload.image_b64.as_bytes())?;
    let app = state.app.clone();
    let item = tokio::task::block_in_place(move || app.ingest(&data, payload.labels))?;

    Ok((
        StatusCode::CREATED,
        Json(Envelope {
            message: "Created",
            data: item,
        }),
    )
        .into_response())
}

async fn delete(
    State(state): State<Arc<SharedState>>,
    Path(name): Path<String>,
) -> Result<Json<Envelope<Item>>, HttpError> {
    let app = state.app.clone();
    let item = tokio::task::block_in_place(move || app.delete(&name))?;

    Ok(Json(Envelope {
        message: "Deleted",
        data: item,
    }))
}

async fn health(State(state): State<Arc<SharedState>>) -> Json<Envelope<ProviderStatus>> {
    Json(Envelope {
        message: "ok",
        data: state.app.provider_status(),
    })
}
