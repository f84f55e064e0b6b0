//! Example web app
//!
//! A single page with a heading and a counter. The page raises
//! `blazorPageLoaded` on `window` once its script has wired the buttons up.

use axum::{
    http::{header, StatusCode},
    response::{Html, IntoResponse},
    routing::get,
    Router,
};
use std::time::Duration;
use url::Url;

/// Delay before the page reports itself loaded, standing in for client
/// runtime start-up.
pub const CLIENT_STARTUP_DELAY: Duration = Duration::from_millis(150);

const INDEX_HTML: &str = include_str!("index.html");

/// Routes served by the app.
pub fn router() -> Router {
    Router::new()
        .route("/", get(index))
        .route("/health", get(health))
}

async fn index() -> impl IntoResponse {
    (
        [(header::CACHE_CONTROL, "no-store")],
        Html(index_html()),
    )
}

async fn health() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

/// The index page, with the start-up delay filled in.
pub fn index_html() -> String {
    INDEX_HTML.replace(
        "{{startup_delay_ms}}",
        &CLIENT_STARTUP_DELAY.as_millis().to_string(),
    )
}

/// Host and port to bind from a `--urls` value.
///
/// The value may list several URLs separated by `;` or `,`; the first one
/// wins. `*` and `+` as host mean every interface.
pub fn bind_target(urls: &str) -> anyhow::Result<(String, u16)> {
    let first = urls
        .split([';', ','])
        .map(str::trim)
        .find(|u| !u.is_empty())
        .ok_or_else(|| anyhow::anyhow!("no URL given"))?;

    let normalized = first.replacen("://*", "://0.0.0.0", 1).replacen("://+", "://0.0.0.0", 1);
    let url = Url::parse(&normalized)?;

    if url.scheme() != "http" {
        anyhow::bail!("only http URLs can be served, got {}", first);
    }

    let host = url
        .host_str()
        .ok_or_else(|| anyhow::anyhow!("URL has no host: {}", first))?
        .trim_start_matches('[')
        .trim_end_matches(']')
        .to_string();
    let port = url
        .port_or_known_default()
        .ok_or_else(|| anyhow::anyhow!("URL has no port: {}", first))?;

    Ok((host, port))
}
