// Proxy des notices PDF : le navigateur ne peut pas les charger directement (CORS).
use axum::{
    extract::{Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use std::time::Duration;
use tracing::{info, warn};

use crate::app_state::AppState;

pub const PDF_FETCH_TIMEOUT: Duration = Duration::from_secs(30);

// Client partagé du proxy : une notice qui ne répond plus libère la requête au bout de `timeout`.
pub fn client(timeout: Duration) -> Result<reqwest::Client, reqwest::Error> {
    reqwest::Client::builder().timeout(timeout).build()
}

#[derive(Debug, Deserialize)]
pub struct PdfQuery {
    #[serde(default)]
    pub url: Option<String>,
}

pub async fn pdf_handler(
    State(state): State<AppState>,
    Query(query): Query<PdfQuery>,
) -> Response {
    fetch_pdf(&state.http, query.url.as_deref()).await
}

fn is_http_url(url: &str) -> bool {
    url.starts_with("http://") || url.starts_with("https://")
}

pub async fn fetch_pdf(client: &reqwest::Client, url: Option<&str>) -> Response {
    let Some(url) = url.map(str::trim).filter(|u| is_http_url(u)) else {
        return (StatusCode::BAD_REQUEST, "Missing url").into_response();
    };

    let request = client
        .get(url)
        .header(reqwest::header::ACCEPT, "application/pdf,*/*");

    let upstream = match request.send().await {
        Ok(upstream) => upstream,
        Err(e) => {
            warn!("PDF fetch failed for {}: {}", url, e);
            return (StatusCode::BAD_GATEWAY, "Fetch error").into_response();
        }
    };

    let status = upstream.status();
    if !status.is_success() {
        warn!("PDF upstream {} answered {}", url, status);
        let status = StatusCode::from_u16(status.as_u16()).unwrap_or(StatusCode::BAD_GATEWAY);
        return (status, "Upstream error").into_response();
    }

    match upstream.bytes().await {
        Ok(bytes) => {
            info!("PDF proxied: {} ({} bytes)", url, bytes.len());
            (
                [
                    (header::CONTENT_TYPE, "application/pdf"),
                    (header::CACHE_CONTROL, "public, max-age=60"),
                ],
                bytes,
            )
                .into_response()
        }
        Err(e) => {
            warn!("PDF body read failed for {}: {}", url, e);
            (StatusCode::BAD_GATEWAY, "Fetch error").into_response()
        }
    }
}
