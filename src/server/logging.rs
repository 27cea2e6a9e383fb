//! Per-request logging middleware.
//!
//! Each request gets a short random id and runs inside a span tagged with that
//! id and the caller's verified user id (`-` when anonymous), so every event a
//! handler logs is attributable. Panics are converted to a 500 and logged.

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Instant;

use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use futures_util::FutureExt;
use tracing::{error, info, info_span, warn, Instrument};

use super::AppState;
use crate::error::AppError;
use crate::storage::Store;

static FALLBACK_SEQ: AtomicU32 = AtomicU32::new(0);

fn new_request_id() -> String {
    let mut bytes = [0u8; 4];
    request_id_from(getrandom::getrandom(&mut bytes).map(|_| bytes))
}

/// Random ids are 8 hex chars. Without the OS RNG, ids become `seq-N` so they
/// stay distinct and the failure is obvious in the logs.
fn request_id_from(random: Result<[u8; 4], getrandom::Error>) -> String {
    match random {
        Ok(bytes) => hex::encode(bytes),
        Err(e) => {
            let n = FALLBACK_SEQ.fetch_add(1, Ordering::Relaxed);
            warn!(target: "request", "request id rng unavailable ({e}); using sequence id");
            format!("seq-{n}")
        }
    }
}

pub async fn log_requests<S: Store>(State(state): State<AppState<S>>, req: Request, next: Next) -> Response {
    let started = Instant::now();
    let req_id = new_request_id();
    let user = state.sessions.verify(req.headers()).map(|id| id.to_string()).unwrap_or_else(|_| "-".to_string());
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    let span = info_span!("request", req = %req_id, user = %user);
    let response = match AssertUnwindSafe(next.run(req)).catch_unwind().instrument(span.clone()).await {
        Ok(resp) => resp,
        Err(panic_payload) => {
            let msg = if let Some(s) = panic_payload.downcast_ref::<&str>() { *s }
                      else if let Some(s) = panic_payload.downcast_ref::<String>() { s.as_str() }
                      else { "panic" };
            span.in_scope(|| error!(target: "panic", method = %method, path = %path, "unhandled_error: {}", msg));
            AppError::internal("internal_panic", "internal server error").into_response()
        }
    };

    let elapsed = started.elapsed();
    span.in_scope(|| {
        info!(
            method = %method,
            path = %path,
            status = response.status().as_u16(),
            dur = %format!("{:.3}s", elapsed.as_secs_f64()),
            "request"
        )
    });
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rng_failure_yields_distinct_sequence_ids() {
        let a = request_id_from(Err(getrandom::Error::UNSUPPORTED));
        let b = request_id_from(Err(getrandom::Error::UNSUPPORTED));
        assert!(a.starts_with("seq-"), "{a}");
        assert!(b.starts_with("seq-"), "{b}");
        assert_ne!(a, b);
        assert_eq!(request_id_from(Ok([0xde, 0xad, 0xbe, 0xef])), "deadbeef");
    }

    #[test]
    fn request_ids_are_short_hex() {
        let id = new_request_id();
        assert_eq!(id.len(), 8);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
