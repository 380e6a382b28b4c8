use axum::{
    http::{header, StatusCode, Uri},
    response::{IntoResponse, Response},
};
use rust_embed::RustEmbed;
use std::borrow::Cow;

// Embarque la page et ses fichiers statiques (HTML/CSS/JS)
#[derive(RustEmbed)]
#[folder = "static"]
struct StaticAssets;

const INDEX: &str = "index.html";

fn build_response(content: Cow<'static, [u8]>, path: &str) -> Response {
    let mime = mime_guess::from_path(path).first_or_octet_stream();
    (
        [(header::CONTENT_TYPE, mime.as_ref().to_string())],
        content.into_owned(),
    )
        .into_response()
}

pub async fn serve_embedded(uri: Uri) -> Response {
    let path = uri.path().trim_start_matches('/');

    // La racine sert la page principale
    let path = if path.is_empty() { INDEX } else { path };
    let path = path.strip_prefix("static/").unwrap_or(path);

    if let Some(content) = <StaticAssets as RustEmbed>::get(path) {
        return build_response(content.data, path);
    }

    // 404 si rien n'est trouvé
    (StatusCode::NOT_FOUND, "404 Not Found").into_response()
}
