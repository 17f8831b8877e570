//! WASI HTTP server entry point for the long-polling signaling relay
//!
//! This module provides the main entry point when running as a WASI HTTP component
//! using `wasmtime serve`.

use castbox_server_wasm::{Config, ServerState, handle_request};
use wstd::http::{Body, Request, Response};

fn init_tracing() {
    // The component is instantiated per request, so this runs every time
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "castbox_server_wasm=info".into()),
        )
        .with_writer(std::io::stderr)
        .try_init();
}

/// The main HTTP handler for WASI
///
/// This function is called by the WASI runtime for each incoming HTTP request.
#[wstd::http_server]
async fn main(request: Request<Body>) -> Result<Response<Body>, wstd::http::Error> {
    init_tracing();
    let state = ServerState::new(Config::from_env());
    handle_request(request, &state).await
}
