//! Readiness polling against real local HTTP endpoints.

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::Router;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use webapp_e2e::{wait_until_ready, ReadinessResult};

const INTERVAL: Duration = Duration::from_millis(50);

async fn serve(router: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{}/", addr)
}

#[tokio::test]
async fn ready_on_first_success() {
    let url = serve(Router::new().route("/", get(|| async { "ok" }))).await;

    let result = wait_until_ready(&url, 5, INTERVAL).await;

    assert_eq!(result, ReadinessResult { ready: true, attempts: 1 });
}

#[tokio::test]
async fn non_success_status_exhausts_attempts() {
    let url = serve(Router::new().route(
        "/",
        get(|| async { StatusCode::SERVICE_UNAVAILABLE }),
    ))
    .await;

    let result = wait_until_ready(&url, 3, INTERVAL).await;

    assert_eq!(result, ReadinessResult { ready: false, attempts: 3 });
}

#[tokio::test]
async fn connection_refused_is_swallowed() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let url = format!("http://{}/", listener.local_addr().unwrap());
    drop(listener);

    let result = wait_until_ready(&url, 2, INTERVAL).await;

    assert_eq!(result, ReadinessResult { ready: false, attempts: 2 });
}

#[tokio::test]
async fn becomes_ready_once_app_warms_up() {
    async fn warming(State(hits): State<Arc<AtomicU32>>) -> StatusCode {
        if hits.fetch_add(1, Ordering::SeqCst) < 2 {
            StatusCode::SERVICE_UNAVAILABLE
        } else {
            StatusCode::NO_CONTENT
        }
    }

    let hits = Arc::new(AtomicU32::new(0));
    let url = serve(
        Router::new()
            .route("/", get(warming))
            .with_state(Arc::clone(&hits)),
    )
    .await;

    let result = wait_until_ready(&url, 5, INTERVAL).await;

    assert_eq!(result, ReadinessResult { ready: true, attempts: 3 });
    assert_eq!(hits.load(Ordering::SeqCst), 3);
}
