//! Static site serving.
//!
//! A lowest-priority catch-all that hands out the built front-end for every
//! path outside `/api`. Paths that name a file under the site root get that
//! file; anything else gets `index.html` so client-side routing can take
//! over. `/api` paths fall through so an unmatched API call still ends in
//! the dispatcher's 404.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use axum::http::{header, HeaderValue, Method, StatusCode};
use tokio::fs::File;
use tokio_util::io::ReaderStream;

use crate::dispatch::{Dispatcher, Exchange, HandlerResult, Outcome, Reply};
use crate::routing::{RouteSpec, RoutingError};

/// Below every application route.
pub const SITE_PRIORITY: i32 = -999;

const API_PREFIX: &str = "/api";

/// Register the site served from `root`.
pub fn register_static_site(
    dispatcher: &Dispatcher,
    root: impl Into<PathBuf>,
) -> Result<(), RoutingError> {
    let root = Arc::new(root.into());
    tracing::info!(root = %root.display(), "Serving static site");

    dispatcher.register(
        RouteSpec::new("^/")?
            .methods(vec![Method::GET, Method::HEAD])
            .priority(SITE_PRIORITY),
        move |ex: Exchange| {
            let root = Arc::clone(&root);
            async move { serve(&root, &ex.path()).await }
        },
    );
    Ok(())
}

async fn serve(root: &Path, path: &str) -> HandlerResult {
    if path.starts_with(API_PREFIX) {
        return Ok(Outcome::fallthrough_because(
            "request should be handled by the API routes",
        ));
    }

    let index = root.join("index.html");
    if !is_file(&index).await {
        tracing::warn!(root = %root.display(), path, "No site build found");
        return Ok(Outcome::Respond(Reply::failure(
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("No site found at {}\nFailed to serve {}\n", root.display(), path),
        )));
    }

    let requested = resolve(root, path);
    let file = if is_file(&requested).await { requested } else { index };
    send_file(&file).await
}

/// Map a request path under `root`. Only plain segments are kept, so the
/// result never leaves the root.
fn resolve(root: &Path, path: &str) -> PathBuf {
    let mut resolved = root.to_path_buf();
    for segment in path.split('/') {
        if segment.is_empty() || segment == "." || segment == ".." || segment.contains('\\') {
            continue;
        }
        resolved.push(segment);
    }
    if path.ends_with('/') {
        resolved.push("index.html");
    }
    resolved
}

async fn is_file(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .map(|meta| meta.is_file())
        .unwrap_or(false)
}

async fn send_file(path: &Path) -> HandlerResult {
    let file = File::open(path).await?;
    let length = file.metadata().await?.len();

    let reply = Reply::stream(ReaderStream::new(file))
        .with_header(header::CONTENT_TYPE, HeaderValue::from_static(content_type(path)))
        .with_header(header::CONTENT_LENGTH, HeaderValue::from(length));
    Ok(Outcome::Respond(reply))
}

fn content_type(path: &Path) -> &'static str {
    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();

    match extension.as_str() {
        "html" | "htm" => "text/html; charset=utf-8",
        "css" => "text/css; charset=utf-8",
        "js" | "mjs" => "text/javascript; charset=utf-8",
        "json" | "map" => "application/json",
        "webmanifest" => "application/manifest+json",
        "txt" => "text/plain; charset=utf-8",
        "xml" => "application/xml",
        "svg" => "image/svg+xml",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "ico" => "image/x-icon",
        "woff" => "font/woff",
        "woff2" => "font/woff2",
        "ttf" => "font/ttf",
        "wasm" => "application/wasm",
        "pdf" => "application/pdf",
        "mp4" => "video/mp4",
        _ => "application/octet-stream",
    }
}
