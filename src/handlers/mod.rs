//! HTTP handlers. The relay has no REST surface; the only page is the
//! browser client that talks to `/ws`.

use actix_web::{http::header::ContentType, HttpResponse};

const INDEX_HTML: &str = include_str!("../../static/index.html");

/// Serve the embedded single-page client.
pub async fn index() -> HttpResponse {
    HttpResponse::Ok()
        .content_type(ContentType::html())
        .body(INDEX_HTML)
}
