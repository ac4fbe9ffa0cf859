#![forbid(unsafe_code)]

//! Axum backend for tubegrab.
//!
//! Two API routes do the work: `/api/search` scrapes YouTube and ranks the
//! results, `/api/download` asks yt-dlp for the available formats and
//! redirects the client to the best direct URL. Everything else is served from
//! the static `www` directory.

use std::{
    net::{IpAddr, SocketAddr},
    path::{Component, Path, PathBuf},
    sync::Arc,
};

use anyhow::{Context, Result};
use axum::{
    Json, Router,
    body::Body,
    extract::{Query, State},
    http::{HeaderValue, Request, StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use clap::Parser;
use mime_guess::MimeGuess;
use serde::Deserialize;
use tokio::{fs::File, signal};
use tokio_util::io::ReaderStream;
use tower_http::trace::TraceLayer;
use tracing::{error, info};
use tubegrab::{
    config::{RuntimeOverrides, RuntimeSettings, resolve_runtime_settings},
    extractor::{FormatSource, YtDlpExtractor, normalize_video_url, resolve_download_url},
    formats::DEFAULT_QUALITY_LABEL,
    logging,
    ranking::{Ranker, RankingMode, ranker_from_settings},
    search::{SearchResult, SearchSource, YoutubeScraper},
};

const DOWNLOAD_FAILED_BODY: &str = "Could not retrieve download link.";

#[derive(Debug, Parser)]
#[command(version, about = "HTTP API for YouTube search and direct media links")]
struct BackendArgs {
    /// Address to listen on (overrides TUBEGRAB_HOST).
    #[arg(long)]
    host: Option<String>,
    /// Port to listen on (overrides TUBEGRAB_PORT).
    #[arg(long)]
    port: Option<u16>,
    /// Directory holding the static frontend (overrides WWW_ROOT).
    #[arg(long)]
    www_root: Option<PathBuf>,
    /// Result ranking: off, popularity or model (overrides TUBEGRAB_RANKING).
    #[arg(long)]
    ranking: Option<RankingMode>,
    /// Dotenv file to read settings from.
    #[arg(long)]
    env_file: Option<PathBuf>,
}

impl BackendArgs {
    fn into_overrides(self) -> RuntimeOverrides {
        RuntimeOverrides {
            host: self.host,
            port: self.port,
            www_root: self.www_root,
            ranking: self.ranking,
            search_limit: None,
            env_path: self.env_file,
        }
    }
}

fn parse_host_arg(value: &str) -> Result<IpAddr> {
    value
        .trim()
        .parse::<IpAddr>()
        .context("expected a valid IPv4 or IPv6 address for --host/TUBEGRAB_HOST")
}

/// Shared state injected into every Axum handler.
///
/// * `search` scrapes the results page (blocking, run via `spawn_blocking`).
/// * `ranker` is the strategy picked from `TUBEGRAB_RANKING` at startup.
/// * `formats` lists the encodings of a video through yt-dlp.
#[derive(Clone)]
struct AppState {
    search: Arc<dyn SearchSource>,
    ranker: Arc<dyn Ranker>,
    formats: Arc<dyn FormatSource>,
    www_root: Arc<PathBuf>,
}

impl AppState {
    fn from_settings(settings: &RuntimeSettings) -> Self {
        Self {
            search: Arc::new(YoutubeScraper::new(
                settings.http_timeout,
                settings.search_limit,
            )),
            ranker: ranker_from_settings(settings),
            formats: Arc::new(
                YtDlpExtractor::new(settings.ytdlp_bin.clone(), settings.ytdlp_cookies.clone())
                    .with_timeout(settings.ytdlp_timeout),
            ),
            www_root: Arc::new(settings.www_root.clone()),
        }
    }
}

#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: message.into(),
        }
    }

    fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({
            "error": self.message,
        });
        (self.status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

#[tokio::main]
async fn main() -> Result<()> {
    logging::init();
    let args = BackendArgs::parse();
    let settings = resolve_runtime_settings(args.into_overrides())?;
    let host = parse_host_arg(&settings.host)?;

    let state = AppState::from_settings(&settings);
    info!(
        ranking = state.ranker.name(),
        ytdlp = %settings.ytdlp_bin.display(),
        www_root = %settings.www_root.display(),
        "backend configured"
    );
    let app = router(state);

    let addr = SocketAddr::new(host, settings.port);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding to {}", addr))?;
    info!("API server listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("running API server")?;

    Ok(())
}

fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/search", get(search))
        .route("/api/download", get(download))
        .fallback(static_fallback)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn shutdown_signal() {
    // Only graceful shutdown depends on this; Ctrl+C still ends the process.
    if let Err(err) = signal::ctrl_c().await {
        error!("Failed to install Ctrl+C handler: {}", err);
    }
}

#[derive(Debug, Default, Deserialize)]
struct SearchParams {
    q: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct DownloadParams {
    url: Option<String>,
    quality: Option<String>,
}

async fn search(
    State(state): State<AppState>,
    Query(params): Query<SearchParams>,
) -> ApiResult<Json<Vec<SearchResult>>> {
    let query = non_blank(params.q)
        .ok_or_else(|| ApiError::bad_request("A search query is required."))?;
    info!(query = %query, "received search query");

    let results = tokio::task::spawn_blocking(move || search_and_rank(&state, &query))
        .await
        .map_err(|err| ApiError::internal(format!("search task failed: {err}")))?;
    Ok(Json(results))
}

/// Scrapes, then ranks. Scraper failures are logged and produce an empty list.
fn search_and_rank(state: &AppState, query: &str) -> Vec<SearchResult> {
    let results = match state.search.search(query) {
        Ok(results) => results,
        Err(err) => {
            let detail = format!("{err:#}");
            error!(query, error = %detail, "search failed");
            Vec::new()
        }
    };
    info!(count = results.len(), "scraper returned results");

    let ranked = state.ranker.rank(results);
    info!(
        count = ranked.len(),
        ranker = state.ranker.name(),
        "returning ranked results"
    );
    ranked
}

async fn download(
    State(state): State<AppState>,
    Query(params): Query<DownloadParams>,
) -> ApiResult<Response> {
    let raw_url =
        non_blank(params.url).ok_or_else(|| ApiError::bad_request("The video URL is required."))?;
    let video_url =
        normalize_video_url(&raw_url).map_err(|err| ApiError::bad_request(err.to_string()))?;
    let quality = non_blank(params.quality).unwrap_or_else(|| DEFAULT_QUALITY_LABEL.to_string());
    info!(url = %video_url, quality = %quality, "download request received");

    let formats = state.formats.clone();
    let task_url = video_url.clone();
    let resolved = tokio::task::spawn_blocking(move || {
        resolve_download_url(formats.as_ref(), &task_url, &quality)
    })
    .await
    .map_err(|err| ApiError::internal(format!("download task failed: {err}")))?;

    let response = match resolved {
        Ok(direct_url) => redirect_to(&direct_url),
        Err(err) => {
            error!(url = %video_url, error = %err, "failed to get download url");
            None
        }
    };
    Ok(response.unwrap_or_else(download_failed))
}

/// `302 Found` pointing at `location`, or `None` if it is not a valid header.
fn redirect_to(location: &str) -> Option<Response> {
    let value = match HeaderValue::from_str(location) {
        Ok(value) => value,
        Err(err) => {
            error!(error = %err, "direct url is not a valid Location header");
            return None;
        }
    };
    let mut response = Response::new(Body::empty());
    *response.status_mut() = StatusCode::FOUND;
    response.headers_mut().insert(header::LOCATION, value);
    Some(response)
}

fn download_failed() -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        DOWNLOAD_FAILED_BODY,
    )
        .into_response()
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

async fn static_fallback(State(state): State<AppState>, req: Request<Body>) -> Response {
    let path = req.uri().path();
    if path == "/api" || path.starts_with("/api/") {
        return ApiError::not_found("endpoint not found").into_response();
    }

    match serve_www_path(&state.www_root, path).await {
        Ok(response) => response,
        Err(err) => err.into_response(),
    }
}

async fn serve_www_path(root: &Path, request_path: &str) -> ApiResult<Response> {
    let target = resolve_www_path(root, request_path)?;
    let metadata = tokio::fs::metadata(&target).await;

    match metadata {
        Ok(meta) if meta.is_dir() => stream_file(&root.join("index.html")).await,
        Ok(_) => stream_file(&target).await,
        Err(_) => {
            if should_fallback_to_index(request_path) {
                stream_file(&root.join("index.html")).await
            } else {
                Err(ApiError::not_found("file not found"))
            }
        }
    }
}

fn resolve_www_path(root: &Path, request_path: &str) -> ApiResult<PathBuf> {
    let trimmed = request_path.trim_start_matches('/');
    if trimmed.is_empty() {
        return Ok(root.join("index.html"));
    }
    let candidate = Path::new(trimmed);
    if candidate
        .components()
        .any(|component| !matches!(component, Component::Normal(_)))
    {
        return Err(ApiError::not_found("file not found"));
    }
    Ok(root.join(candidate))
}

/// Extension-less paths are frontend routes and get `index.html`.
fn should_fallback_to_index(request_path: &str) -> bool {
    let trimmed = request_path.trim_start_matches('/');
    trimmed.is_empty() || Path::new(trimmed).extension().is_none()
}

async fn stream_file(path: &Path) -> ApiResult<Response> {
    let file = File::open(path)
        .await
        .map_err(|_| ApiError::not_found("file not found"))?;
    let metadata = file
        .metadata()
        .await
        .map_err(|_| ApiError::not_found("file not found"))?;

    let mut response = Body::from_stream(ReaderStream::new(file)).into_response();
    let headers = response.headers_mut();
    if let Ok(value) = HeaderValue::from_str(&metadata.len().to_string()) {
        headers.insert(header::CONTENT_LENGTH, value);
    }
    if let Some(mime) = MimeGuess::from_path(path).first()
        && let Ok(value) = HeaderValue::from_str(mime.as_ref())
    {
        headers.insert(header::CONTENT_TYPE, value);
    }
    Ok(response)
}
