use crate::entry::PeerEntry;
use axum::extract::State;
use axum::http::{Method, StatusCode};
use axum::response::IntoResponse;
use axum::routing::any;
use axum::{Json, Router};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

/// Returns the current snapshot of entries for `/fetch`.
pub type GetAllFn = Arc<dyn Fn() -> Vec<PeerEntry> + Send + Sync>;
/// Admits an incoming entry; returns true if it was newly inserted.
/// `touch` mirrors the orchestrator's `admit(entry, touch)` contract:
/// peer-sourced entries always pass `touch = false`.
pub type AdmitFn = Arc<dyn Fn(PeerEntry, bool) -> bool + Send + Sync>;

const SHUTDOWN_DEADLINE: Duration = Duration::from_secs(5);

#[derive(Clone)]
struct AppState {
    get_all: GetAllFn,
    admit: AdmitFn,
}

async fn fetch_dispatch(
    State(state): State<AppState>,
    method: Method,
) -> axum::response::Response {
    if method != Method::GET {
        return StatusCode::BAD_REQUEST.into_response();
    }
    Json((state.get_all)()).into_response()
}

async fn put_entry(
    State(state): State<AppState>,
    body: Result<Json<PeerEntry>, axum::extract::rejection::JsonRejection>,
) -> StatusCode {
    match body {
        Ok(Json(entry)) => {
            (state.admit)(entry, false);
            StatusCode::OK
        }
        Err(_) => StatusCode::BAD_REQUEST,
    }
}

async fn put_dispatch(
    state: State<AppState>,
    method: Method,
    body: Result<Json<PeerEntry>, axum::extract::rejection::JsonRejection>,
) -> StatusCode {
    if method != Method::PUT {
        return StatusCode::BAD_REQUEST;
    }
    put_entry(state, body).await
}

fn router(get_all: GetAllFn, admit: AdmitFn) -> Router {
    let state = AppState { get_all, admit };
    Router::new()
        .route("/fetch", any(fetch_dispatch))
        .route("/put", any(put_dispatch))
        .with_state(state)
}

/// Runs the sync HTTP server until `shutdown` resolves, then waits up
/// to 5 seconds for in-flight requests to finish before returning.
pub async fn serve(
    addr: SocketAddr,
    get_all: GetAllFn,
    admit: AdmitFn,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    let app = router(get_all, admit);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "sync HTTP server listening");

    let serve_fut = axum::serve(listener, app).with_graceful_shutdown(shutdown);
    match tokio::time::timeout(SHUTDOWN_DEADLINE + Duration::from_secs(5), serve_fut).await {
        Ok(res) => res,
        Err(_) => {
            tracing::warn!("sync HTTP server shutdown deadline exceeded");
            Ok(())
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use chrono::Utc;
    use parking_lot::Mutex;
    use std::sync::Arc as StdArc;

    #[tokio::test]
    async fn put_then_fetch_round_trip() {
        let store: StdArc<Mutex<Vec<PeerEntry>>> = StdArc::new(Mutex::new(Vec::new()));
        let store_admit = StdArc::clone(&store);
        let store_fetch = StdArc::clone(&store);

        let get_all: GetAllFn = StdArc::new(move || store_fetch.lock().clone());
        let admit: AdmitFn = StdArc::new(move |entry, _touch| {
            let mut guard = store_admit.lock();
            if guard.iter().any(|e| e.ip == entry.ip) {
                false
            } else {
                guard.push(entry);
                true
            }
        });

        let app = router(get_all, admit);
        let entry = PeerEntry {
            ip: "1.2.3.4".parse().unwrap(),
            domain: "test.example".to_string(),
            ts: Utc::now(),
        };

        use axum::body::Body;
        use axum::http::Request;
        use tower::util::ServiceExt;

        let put_req = Request::builder()
            .method("PUT")
            .uri("/put")
            .header("content-type", "application/json")
            .body(Body::from(serde_json::to_vec(&entry).unwrap()))
            .unwrap();
        let resp = app.clone().oneshot(put_req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let fetch_req = Request::builder()
            .method("GET")
            .uri("/fetch")
            .body(Body::empty())
            .unwrap();
        let resp = app.oneshot(fetch_req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }
}
