//! Root banner endpoint.

use axum::http::header;
use axum::response::IntoResponse;

/// Plain-text banner identifying the host and service.
#[utoipa::path(
    get,
    path = "/",
    tag = "root",
    responses(
        (status = 200, description = "Service banner", content_type = "text/plain"),
    )
)]
pub async fn banner() -> impl IntoResponse {
    let host = hostname::get()
        .map(|h| h.to_string_lossy().into_owned())
        .unwrap_or_else(|_| "unknown".to_owned());
    (
        [(header::CONTENT_TYPE, "text/plain")],
        format!("hostname: {host}, telem task service v{}", env!("CARGO_PKG_VERSION")),
    )
}
