//! HTTP long-polling handlers for the WASM signaling server
//!
//! This module implements long-polling based signaling that works over
//! plain HTTP without WebSocket upgrades or long-lived connections.

use crate::error::{ClientRequestError, SignalingError};
use crate::state::ServerState;
use castbox_protocol::{JsonClientEvent, PeerId};
use std::str::FromStr;
use tracing::debug;
use wstd::http::{Body, HeaderValue, Method, Request, Response, StatusCode};

const INFO_PAGE: &str = "Castbox WASI Signaling Relay (Long-Polling)\n\
    \n\
    Endpoints:\n\
    - GET /health - Health check\n\
    - GET /poll?peer_id={id} - Connect, or poll for pending events\n\
    - POST /event - Send an event (X-Peer-Id header required)\n\
    - POST /leave - Disconnect (X-Peer-Id header required)\n\
    - GET /sessions - Current session list\n\
    \n\
    Protocol:\n\
    1. GET /poll to connect and get peer_id + initial events\n\
    2. Poll GET /poll?peer_id={id} for new events\n\
    3. POST /event with X-Peer-Id header to join sessions and relay signals\n\
    \n\
    Response format: {\"peer_id\": \"uuid\", \"events\": [...]}\n\
    Event format: {\"event\": \"join-viewer\", \"data\": {\"sessionId\": \"demo-1\"}}\n";

/// Build a response carrying the CORS header every endpoint sends
fn respond(status: StatusCode, content_type: Option<&'static str>, body: Body) -> Response<Body> {
    let mut response = Response::new(body);
    *response.status_mut() = status;
    let headers = response.headers_mut();
    headers.insert("access-control-allow-origin", HeaderValue::from_static("*"));
    if let Some(content_type) = content_type {
        headers.insert("content-type", HeaderValue::from_static(content_type));
    }
    response
}

fn text(status: StatusCode, body: impl Into<String>) -> Response<Body> {
    respond(status, Some("text/plain"), Body::from(body.into()))
}

fn json(body: serde_json::Value) -> Response<Body> {
    respond(StatusCode::OK, Some("application/json"), Body::from(body.to_string()))
}

/// Get query parameter from URI
fn get_query_param<'a>(query: Option<&'a str>, key: &str) -> Option<&'a str> {
    query?.split('&').find_map(|pair| {
        let mut parts = pair.splitn(2, '=');
        let k = parts.next()?;
        let v = parts.next()?;
        if k == key { Some(v) } else { None }
    })
}

/// The sender's peer ID from the X-Peer-Id header
fn sender_id(request: &Request<Body>) -> Result<PeerId, ClientRequestError> {
    request
        .headers()
        .get("x-peer-id")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| PeerId::from_str(s).ok())
        .ok_or(ClientRequestError::MissingPeerId)
}

/// Parse a POSTed event along with its sender
async fn read_event(request: Request<Body>) -> Result<(PeerId, JsonClientEvent), ClientRequestError> {
    let sender = sender_id(&request)?;
    let mut body = request.into_body();
    let contents = body
        .str_contents()
        .await
        .map_err(|e| ClientRequestError::Body(format!("{e:?}")))?;
    let event = JsonClientEvent::from_str(contents)?;
    Ok((sender, event))
}

/// Connect or poll - returns peer ID and any pending events
fn handle_poll(query: Option<&str>, state: &ServerState) -> Response<Body> {
    let peer_id = get_query_param(query, "peer_id").and_then(|s| PeerId::from_str(s).ok());
    let (peer_id, events) = state.connect_or_poll(peer_id);

    json(serde_json::json!({
        "peer_id": peer_id.to_string(),
        "events": events,
    }))
}

/// Handle an event POST request
async fn handle_event(request: Request<Body>, state: &ServerState) -> Response<Body> {
    let (sender, event) = match read_event(request).await {
        Ok(parsed) => parsed,
        Err(err) => {
            debug!(error = %err, "Bad event request");
            return text(StatusCode::BAD_REQUEST, err.to_string());
        }
    };

    match state.handle_event(sender, event) {
        Ok(()) => text(StatusCode::OK, "OK"),
        Err(SignalingError::UnknownPeer) => text(StatusCode::NOT_FOUND, "Unknown peer"),
        Err(err) => text(StatusCode::INTERNAL_SERVER_ERROR, err.to_string()),
    }
}

/// Handle an explicit disconnect
///
/// Leaving is idempotent: an unknown or already evicted peer still gets `200`.
fn handle_leave(request: &Request<Body>, state: &ServerState) -> Response<Body> {
    match sender_id(request) {
        Ok(peer_id) => {
            if !state.disconnect(peer_id) {
                debug!(peer = %peer_id, "Leave from unknown peer");
            }
            text(StatusCode::OK, "OK")
        }
        Err(err) => text(StatusCode::BAD_REQUEST, err.to_string()),
    }
}

/// List the live sessions
fn handle_sessions(state: &ServerState) -> Response<Body> {
    match serde_json::to_value(state.sessions()) {
        Ok(list) => json(list),
        Err(err) => text(StatusCode::INTERNAL_SERVER_ERROR, err.to_string()),
    }
}

/// Handle CORS preflight
fn handle_cors_preflight() -> Response<Body> {
    let mut response = respond(StatusCode::NO_CONTENT, None, Body::empty());
    let headers = response.headers_mut();
    headers.insert(
        "access-control-allow-methods",
        HeaderValue::from_static("GET, POST, OPTIONS"),
    );
    headers.insert(
        "access-control-allow-headers",
        HeaderValue::from_static("content-type, x-peer-id"),
    );
    headers.insert("access-control-max-age", HeaderValue::from_static("86400"));
    response
}

/// Handle an HTTP request - main router
pub async fn handle_request(
    request: Request<Body>,
    state: &ServerState,
) -> Result<Response<Body>, wstd::http::Error> {
    let method = request.method().clone();
    let uri = request.uri().clone();

    let response = match (method, uri.path()) {
        (Method::OPTIONS, _) => handle_cors_preflight(),
        (Method::GET, "/health") => text(StatusCode::OK, "OK"),
        (Method::GET, "/poll") => handle_poll(uri.query(), state),
        (Method::GET, "/sessions") => handle_sessions(state),
        (Method::GET, "/") => text(StatusCode::OK, INFO_PAGE),
        (Method::POST, "/event") => handle_event(request, state).await,
        (Method::POST, "/leave") => handle_leave(&request, state),
        _ => text(StatusCode::NOT_FOUND, "Not Found"),
    };

    Ok(response)
}
