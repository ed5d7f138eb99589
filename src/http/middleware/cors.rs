//! Cross-origin access.
//!
//! Fixed, permissive policy: any `Origin` is echoed back, and preflight requests are
//! answered here without reaching the gateway handler.

use axum::{
    body::Body,
    http::{
        header::{
            ACCESS_CONTROL_ALLOW_HEADERS, ACCESS_CONTROL_ALLOW_METHODS,
            ACCESS_CONTROL_ALLOW_ORIGIN, ACCESS_CONTROL_REQUEST_METHOD, ORIGIN,
        },
        HeaderValue, Method, Request, StatusCode,
    },
    middleware::Next,
    response::{IntoResponse, Response},
};

/// Headers a cross-origin client may send.
pub const ALLOWED_HEADERS: &str = "Content-Type,Accept";

/// Methods a cross-origin client may use.
pub const ALLOWED_METHODS: &str = "GET,HEAD,POST,PUT,DELETE";

pub async fn allow_cors(req: Request<Body>, next: Next) -> Response {
    let Some(origin) = req.headers().get(ORIGIN).cloned() else {
        return next.run(req).await;
    };

    if req.method() == Method::OPTIONS && req.headers().contains_key(ACCESS_CONTROL_REQUEST_METHOD) {
        tracing::debug!(origin = ?origin, path = %req.uri().path(), "Answering CORS preflight");
        let mut response = StatusCode::OK.into_response();
        let headers = response.headers_mut();
        headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, origin);
        headers.insert(
            ACCESS_CONTROL_ALLOW_HEADERS,
            HeaderValue::from_static(ALLOWED_HEADERS),
        );
        headers.insert(
            ACCESS_CONTROL_ALLOW_METHODS,
            HeaderValue::from_static(ALLOWED_METHODS),
        );
        return response;
    }

    let mut response = next.run(req).await;
    response
        .headers_mut()
        .insert(ACCESS_CONTROL_ALLOW_ORIGIN, origin);
    response
}
