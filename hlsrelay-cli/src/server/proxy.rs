//! Live rewriting proxy route.
//!
//! Mounted under `/proxy` by the main router. Playlists come back rewritten
//! so every reference points at this route again; media is streamed through.

use axum::Router;
use axum::body::Body;
use axum::extract::{Query, State};
use axum::http::HeaderValue;
use axum::http::header::CONTENT_TYPE;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use serde::Deserialize;

use hlsrelay_engine::{ProxyBody, ProxyReply};

use crate::server::AppState;

#[derive(Debug, Deserialize)]
pub struct ProxyQuery {
    pub url: Option<String>,
}

pub fn router() -> Router<AppState> {
    Router::new().route("/", get(proxy_get).options(proxy_options))
}

async fn proxy_options() -> Response {
    into_response(ProxyReply::preflight())
}

async fn proxy_get(State(state): State<AppState>, Query(query): Query<ProxyQuery>) -> Response {
    into_response(state.proxy.respond(query.url.as_deref()).await)
}

fn into_response(reply: ProxyReply) -> Response {
    let ProxyReply {
        status,
        content_type,
        mut headers,
        body,
    } = reply;

    if let Ok(value) = HeaderValue::from_str(&content_type) {
        headers.insert(CONTENT_TYPE, value);
    }

    let body = match body {
        ProxyBody::Manifest(text) | ProxyBody::Message(text) => Body::from(text),
        ProxyBody::Stream(upstream) => Body::from_stream(upstream.into_stream()),
    };

    (status, headers, body).into_response()
}
