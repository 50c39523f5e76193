// HTTP static-file surface over the working copy.
//
// Every path belongs to the repository, so the router has a single fallback
// handler. Each request pins the snapshot current at arrival and answers
// entirely from it.

use std::sync::Arc;
use std::time::{Instant, SystemTime};

use axum::{
    body::Body,
    extract::State,
    http::{
        header::{self, HeaderValue},
        Method, Request, StatusCode, Uri,
    },
    middleware::{self, Next},
    response::{IntoResponse, Response},
    Router,
};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use gitserve_common::path::request_path;
use tracing::{error, info};
use uuid::Uuid;

use super::adapter::{AdapterError, FsAdapter, ServedFile, INDEX_DOCUMENT};
use crate::sync::WorkingCopy;
use crate::vfs::{FileInfo, Snapshot, VirtualFs};

/// Default cap on rendered directory listings.
pub const DEFAULT_MAX_LISTING_ENTRIES: usize = 1000;

const REQUEST_ID_HEADER: &str = "x-request-id";
const COMMIT_HEADER: &str = "x-gitserve-commit";
const ALLOWED_METHODS: &str = "GET, HEAD";

/// Shared state of the file server.
#[derive(Debug, Clone)]
pub struct ServeState {
    working_copy: WorkingCopy,
    index_document: Arc<str>,
    max_listing_entries: usize,
}

impl ServeState {
    pub fn new(working_copy: WorkingCopy) -> Self {
        Self {
            working_copy,
            index_document: Arc::from(INDEX_DOCUMENT),
            max_listing_entries: DEFAULT_MAX_LISTING_ENTRIES,
        }
    }

    pub fn with_index_document(mut self, index_document: impl Into<String>) -> Self {
        self.index_document = Arc::from(index_document.into());
        self
    }

    pub fn with_max_listing_entries(mut self, max_listing_entries: usize) -> Self {
        self.max_listing_entries = max_listing_entries;
        self
    }
}

/// Build the file server router with request logging and panic recovery.
pub fn router(state: ServeState) -> Router {
    apply_middleware(Router::new().fallback(serve_path).with_state(state))
}

fn apply_middleware(router: Router) -> Router {
    router
        .layer(middleware::from_fn(request_context_middleware))
        .layer(middleware::from_fn(panic_handler))
}

// ── Handler ─────────────────────────────────────────────────────────

async fn serve_path(State(state): State<ServeState>, method: Method, uri: Uri) -> Response {
    if method != Method::GET && method != Method::HEAD {
        return method_not_allowed();
    }

    let snapshot = state.working_copy.snapshot();
    let mut response = match urlencoding::decode(uri.path()) {
        Ok(path) => respond(&state, Arc::clone(&snapshot), &uri, &path),
        Err(_) => StatusCode::NOT_FOUND.into_response(),
    };

    if let Some(commit) = snapshot.commit_id().and_then(|id| HeaderValue::from_str(id).ok()) {
        response.headers_mut().insert(COMMIT_HEADER, commit);
    }
    if method == Method::HEAD {
        *response.body_mut() = Body::empty();
    }
    response
}

fn respond(state: &ServeState, snapshot: Arc<Snapshot>, uri: &Uri, path: &str) -> Response {
    let adapter = FsAdapter::new(snapshot).with_index_document(&*state.index_document);

    if path == "/" {
        return match adapter.open(path) {
            Ok(file) => file_response(&file),
            Err(error) => error_response(&error),
        };
    }

    let (lookup, trailing_slash) = match path.strip_suffix('/') {
        Some(stripped) => (stripped, true),
        None => (path, false),
    };
    // Only a literal `/` maps to the index document.
    if request_path(lookup).is_err() {
        return StatusCode::NOT_FOUND.into_response();
    }

    let file = match adapter.open(lookup) {
        Ok(file) => file,
        Err(error) => return error_response(&error),
    };
    let info = match file.stat() {
        Ok(info) => info,
        Err(error) => return error_response(&error),
    };

    match (info.is_dir(), trailing_slash) {
        (true, false) => redirect(uri, &format!("{}/", encode_path(lookup))),
        (false, true) => redirect(uri, &encode_path(lookup)),
        (false, false) => file_response(&file),
        (true, true) => {
            let index = format!("{lookup}/{}", adapter.index_document());
            match adapter.open(&index) {
                Ok(index) if index.stat().is_ok_and(|info| !info.is_dir()) => file_response(&index),
                _ => match file.read_dir(Some(state.max_listing_entries)) {
                    Ok(entries) => listing_response(&entries, info.modified),
                    Err(error) => error_response(&error),
                },
            }
        }
    }
}

fn file_response<F: VirtualFs>(file: &ServedFile<F>) -> Response {
    match file.stat() {
        Ok(info) => content_response(file.contents().clone(), content_type(file.name()), info.modified),
        Err(error) => error_response(&error),
    }
}

fn listing_response(entries: &[FileInfo], modified: SystemTime) -> Response {
    content_response(Bytes::from(render_listing(entries)), "text/html; charset=utf-8", modified)
}

fn content_response(body: Bytes, content_type: &'static str, modified: SystemTime) -> Response {
    let length = body.len();
    let mut response = Response::new(Body::from(body));
    let headers = response.headers_mut();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(content_type));
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(length));
    if let Ok(value) = HeaderValue::from_str(&http_date(modified)) {
        headers.insert(header::LAST_MODIFIED, value);
    }
    response
}

fn redirect(uri: &Uri, location: &str) -> Response {
    let location = match uri.query() {
        Some(query) => format!("{location}?{query}"),
        None => location.to_string(),
    };
    match HeaderValue::from_str(&location) {
        Ok(location) => (StatusCode::MOVED_PERMANENTLY, [(header::LOCATION, location)]).into_response(),
        Err(_) => StatusCode::NOT_FOUND.into_response(),
    }
}

/// Percent-encode each segment of a decoded path, keeping the separators.
fn encode_path(path: &str) -> String {
    path.split('/').map(|segment| urlencoding::encode(segment)).collect::<Vec<_>>().join("/")
}

fn method_not_allowed() -> Response {
    (
        StatusCode::METHOD_NOT_ALLOWED,
        [(header::ALLOW, HeaderValue::from_static(ALLOWED_METHODS))],
    )
        .into_response()
}

fn error_response(error: &AdapterError) -> Response {
    match error {
        AdapterError::NotFound(_) => StatusCode::NOT_FOUND.into_response(),
        AdapterError::Io(io_error) => {
            error!(error = %io_error, "failed to read from working copy");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

// ── Formatting ──────────────────────────────────────────────────────

/// RFC 7231 IMF-fixdate.
fn http_date(time: SystemTime) -> String {
    DateTime::<Utc>::from(time).format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

fn content_type(name: &str) -> &'static str {
    let extension = name.rsplit_once('.').map(|(_, ext)| ext.to_ascii_lowercase());
    match extension.as_deref() {
        Some("html" | "htm") => "text/html; charset=utf-8",
        Some("css") => "text/css; charset=utf-8",
        Some("js" | "mjs") => "text/javascript; charset=utf-8",
        Some("json") => "application/json",
        Some("txt") => "text/plain; charset=utf-8",
        Some("md" | "markdown") => "text/markdown; charset=utf-8",
        Some("xml") => "application/xml",
        Some("svg") => "image/svg+xml",
        Some("png") => "image/png",
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        Some("ico") => "image/x-icon",
        Some("pdf") => "application/pdf",
        Some("wasm") => "application/wasm",
        Some("woff") => "font/woff",
        Some("woff2") => "font/woff2",
        Some("ttf") => "font/ttf",
        Some("mp4") => "video/mp4",
        Some("webm") => "video/webm",
        _ => "application/octet-stream",
    }
}

fn render_listing(entries: &[FileInfo]) -> String {
    let mut html = String::from("<!doctype html>\n<meta name=\"viewport\" content=\"width=device-width\">\n<pre>\n");
    for entry in entries {
        let name = if entry.is_dir() { format!("{}/", entry.name) } else { entry.name.clone() };
        let href = urlencoding::encode(&entry.name);
        let href = if entry.is_dir() { format!("{href}/") } else { href.into_owned() };
        html.push_str(&format!("<a href=\"{}\">{}</a>\n", escape_html(&href), escape_html(&name)));
    }
    html.push_str("</pre>\n");
    html
}

fn escape_html(input: &str) -> String {
    let mut escaped = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&#34;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

// ── Middleware ──────────────────────────────────────────────────────

async fn panic_handler(request: Request<Body>, next: Next) -> Response {
    match tokio::spawn(async move { next.run(request).await }).await {
        Ok(response) => response,
        Err(join_error) => {
            error!(?join_error, "request handling panicked");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

async fn request_context_middleware(request: Request<Body>, next: Next) -> Response {
    let request_id = request
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .filter(|value| !value.is_empty())
        .map(ToOwned::to_owned)
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    let method = request.method().clone();
    let path = request.uri().path().to_owned();
    let started_at = Instant::now();

    let mut response = next.run(request).await;

    if let Ok(request_id_header) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert(REQUEST_ID_HEADER, request_id_header);
    }

    info!(
        request_id = %request_id,
        method = %method,
        path = %path,
        status = response.status().as_u16(),
        latency_ms = started_at.elapsed().as_millis() as u64,
        "request completed"
    );

    response
}

// ── Tests ───────────────────────────────────────────────────────────
