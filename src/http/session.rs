//! HTTP session resolution.
//!
//! The session travels in the `rpc-session` cookie or header. A request that
//! carries neither gets a fresh UUID v4, returned both as `Set-Cookie` and as
//! the `rpc-session` response header. A presented token is never replaced.

use axum::body::Body;
use axum::http::{header, HeaderMap, HeaderValue, Request};
use axum::middleware::Next;
use axum::response::Response;
use uuid::Uuid;

use crate::rpc::SESSION_HEADER;

/// Session attached to every request as an extension.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub id: String,
    /// Minted for this request rather than presented by the client.
    pub minted: bool,
}

/// Cookie first, then header, else a new id.
pub fn resolve(headers: &HeaderMap) -> Session {
    match cookie_session(headers).or_else(|| header_session(headers)) {
        Some(id) => Session { id, minted: false },
        None => Session {
            id: Uuid::new_v4().to_string(),
            minted: true,
        },
    }
}

fn cookie_session(headers: &HeaderMap) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == SESSION_HEADER)
        .map(|(_, value)| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn header_session(headers: &HeaderMap) -> Option<String> {
    headers
        .get(SESSION_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

pub async fn session_middleware(mut req: Request<Body>, next: Next) -> Response {
    let session = resolve(req.headers());
    req.extensions_mut().insert(session.clone());

    let mut response = next.run(req).await;

    let Ok(value) = HeaderValue::from_str(&session.id) else {
        return response;
    };
    if session.minted {
        let cookie = format!("{SESSION_HEADER}={}; Path=/; HttpOnly", session.id);
        if let Ok(cookie) = HeaderValue::from_str(&cookie) {
            response.headers_mut().append(header::SET_COOKIE, cookie);
        }
    }
    response.headers_mut().insert(SESSION_HEADER, value);
    response
}
