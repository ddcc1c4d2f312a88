use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use tdb_protocol::{ProblemDetails, HEADER_BOOKMARK};

/// RFC7807-style error body.
pub(crate) fn problem(status: StatusCode, code: &str, detail: impl Into<String>) -> Response {
    let title = status.canonical_reason().unwrap_or("Error");
    (
        status,
        Json(ProblemDetails::new(status.as_u16(), title, code, detail)),
    )
        .into_response()
}

pub(crate) fn unauthorized() -> Response {
    problem(StatusCode::UNAUTHORIZED, "unauthorized", "admin token required")
}

pub(crate) fn not_found(what: impl Into<String>) -> Response {
    problem(StatusCode::NOT_FOUND, "not_found", what)
}

pub(crate) fn internal(err: impl std::fmt::Display) -> Response {
    problem(StatusCode::INTERNAL_SERVER_ERROR, "internal", err.to_string())
}

/// Attach `x-bookmark` when one is known.
pub(crate) fn with_bookmark(mut res: Response, bookmark: Option<&str>) -> Response {
    if let Some(value) = bookmark.and_then(|b| HeaderValue::from_str(b).ok()) {
        res.headers_mut().insert(HEADER_BOOKMARK, value);
    }
    res
}
