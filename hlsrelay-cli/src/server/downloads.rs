//! Download registry routes.
//!
//! Mounted under `/api/downloads`. Every mutation goes through the store
//! actor; adding work also kicks the queue worker.

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    routing::{delete, get, post},
};
use serde::Serialize;
use tracing::{info, warn};

use hlsrelay_engine::{DownloadItem, DownloadStatus};

use crate::server::AppState;
use crate::server::error::{ApiError, ApiResult};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayResponse {
    pub local_uri: String,
}

#[derive(Debug, Serialize)]
pub struct QueueStartResponse {
    /// `false` when a worker was already draining the registry.
    pub started: bool,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_downloads).post(add_download))
        .route("/queue/start", post(start_queue))
        .route("/{movie}", delete(delete_movie))
        .route("/{movie}/{episode}", delete(delete_episode))
        .route("/{movie}/{episode}/play", get(play_episode))
}

async fn list_downloads(State(state): State<AppState>) -> ApiResult<Json<Vec<DownloadItem>>> {
    Ok(Json(state.queue.store().get_all().await?))
}

async fn add_download(
    State(state): State<AppState>,
    Json(mut item): Json<DownloadItem>,
) -> ApiResult<(StatusCode, Json<Vec<DownloadItem>>)> {
    if item.movie_slug.trim().is_empty() {
        return Err(ApiError::bad_request("movieSlug must not be empty"));
    }
    if item.episodes.is_empty() {
        return Err(ApiError::bad_request("at least one episode is required"));
    }
    if let Some(episode) = item.episodes.iter().find(|e| e.slug.trim().is_empty()) {
        return Err(ApiError::bad_request(format!(
            "episode '{}' has an empty slug",
            episode.name
        )));
    }

    // Incoming episodes always start pending.
    for episode in &mut item.episodes {
        episode.status = DownloadStatus::Pending;
        episode.progress = 0;
        episode.local_uri = None;
        episode.error_message = None;
    }

    info!(
        movie = %item.movie_slug,
        episodes = item.episodes.len(),
        "Queueing downloads"
    );
    state.queue.store().add(item).await?;
    state.queue.start();

    Ok((StatusCode::CREATED, Json(state.queue.store().get_all().await?)))
}

async fn delete_movie(
    State(state): State<AppState>,
    Path(movie): Path<String>,
) -> ApiResult<StatusCode> {
    state.queue.store().remove(&movie).await?;
    if let Err(e) = state.queue.engine().purge(&movie).await {
        warn!(movie = %movie, error = %e, "Failed to delete downloaded files");
    }
    Ok(StatusCode::NO_CONTENT)
}

async fn delete_episode(
    State(state): State<AppState>,
    Path((movie, episode)): Path<(String, String)>,
) -> ApiResult<StatusCode> {
    state.queue.store().remove_episode(&movie, &episode).await?;
    if let Err(e) = state.queue.engine().purge_episode(&movie, &episode).await {
        warn!(movie = %movie, episode = %episode, error = %e, "Failed to delete downloaded files");
    }
    Ok(StatusCode::NO_CONTENT)
}

async fn play_episode(
    State(state): State<AppState>,
    Path((movie, episode)): Path<(String, String)>,
) -> ApiResult<Json<PlayResponse>> {
    let local_uri = state
        .queue
        .store()
        .get_local_play_uri(&movie, &episode)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("{movie}/{episode} is not downloaded")))?;
    Ok(Json(PlayResponse { local_uri }))
}

async fn start_queue(State(state): State<AppState>) -> Json<QueueStartResponse> {
    Json(QueueStartResponse {
        started: state.queue.start().is_some(),
    })
}
