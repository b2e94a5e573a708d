//! Retrieval against a local HTTP server.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use forecast_common::IssuanceTime;
use importer::download::{RetryConfig, Retriever};
use importer::ecmwf::{EcmwfClient, EcmwfRequest};
use importer::ImportError;

#[derive(Clone, Default)]
struct Hits {
    flaky: Arc<AtomicUsize>,
    missing: Arc<AtomicUsize>,
    broken: Arc<AtomicUsize>,
}

/// 503 twice, then 200.
async fn flaky(State(hits): State<Hits>) -> Response {
    let n = hits.flaky.fetch_add(1, Ordering::SeqCst);
    if n < 2 {
        StatusCode::SERVICE_UNAVAILABLE.into_response()
    } else {
        (StatusCode::OK, "grib-bytes").into_response()
    }
}

async fn missing(State(hits): State<Hits>) -> Response {
    hits.missing.fetch_add(1, Ordering::SeqCst);
    StatusCode::NOT_FOUND.into_response()
}

async fn broken(State(hits): State<Hits>) -> Response {
    hits.broken.fetch_add(1, Ordering::SeqCst);
    StatusCode::BAD_GATEWAY.into_response()
}

/// Answers only after a second.
async fn slow() -> &'static str {
    tokio::time::sleep(Duration::from_secs(1)).await;
    "late"
}

const INDEX: &str = concat!(
    r#"{"param": "2t", "levtype": "sfc", "_offset": 0, "_length": 4}"#,
    "\n",
    r#"{"param": "msl", "levtype": "sfc", "_offset": 4, "_length": 3}"#,
    "\n",
    r#"{"param": "10u", "levtype": "sfc", "_offset": 7, "_length": 5}"#,
    "\n",
);

const GRIB: &[u8] = b"TTTTMMMUUUUU";

async fn index() -> &'static str {
    INDEX
}

/// Serves `bytes=a-b` ranges of `GRIB` as 206.
async fn grib(headers: HeaderMap) -> Response {
    let range = headers
        .get("range")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("bytes="))
        .and_then(|v| v.split_once('-'))
        .and_then(|(a, b)| Some((a.parse::<usize>().ok()?, b.parse::<usize>().ok()?)));

    match range {
        Some((start, end)) if end < GRIB.len() => {
            (StatusCode::PARTIAL_CONTENT, GRIB[start..=end].to_vec()).into_response()
        }
        _ => StatusCode::RANGE_NOT_SATISFIABLE.into_response(),
    }
}

async fn serve(hits: Hits) -> SocketAddr {
    let app = Router::new()
        .route("/flaky", get(flaky))
        .route("/missing", get(missing))
        .route("/broken", get(broken))
        .route("/slow", get(slow))
        .route(
            "/20240301/00z/ifs/0p25/oper/20240301000000-6h-oper-fc.index",
            get(index),
        )
        .route(
            "/20240301/00z/ifs/0p25/oper/20240301000000-6h-oper-fc.grib2",
            get(grib),
        )
        .with_state(hits);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

fn retriever() -> Retriever {
    Retriever::new(RetryConfig {
        initial_backoff_ms: 1,
        ..RetryConfig::default()
    })
    .unwrap()
}

#[tokio::test]
async fn test_transient_status_is_retried() {
    let hits = Hits::default();
    let addr = serve(hits.clone()).await;

    let body = retriever()
        .fetch(&format!("http://{addr}/flaky"), &Default::default(), None)
        .await
        .unwrap();

    assert_eq!(&body[..], b"grib-bytes");
    assert_eq!(hits.flaky.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_not_found_is_not_retried() {
    let hits = Hits::default();
    let addr = serve(hits.clone()).await;

    let err = retriever()
        .fetch(&format!("http://{addr}/missing"), &Default::default(), None)
        .await
        .unwrap_err();

    assert!(matches!(err, ImportError::Retrieval { .. }));
    assert!(err.to_string().contains("404"));
    assert_eq!(hits.missing.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_gives_up_after_max_attempts() {
    let hits = Hits::default();
    let addr = serve(hits.clone()).await;

    let err = retriever()
        .fetch(&format!("http://{addr}/broken"), &Default::default(), None)
        .await
        .unwrap_err();

    assert!(err.to_string().contains("after 5 attempt(s)"));
    assert_eq!(hits.broken.load(Ordering::SeqCst), 5);
}

#[tokio::test]
async fn test_per_call_timeout_overrides_client_timeout() {
    let addr = serve(Hits::default()).await;
    let url = format!("http://{addr}/slow");
    let retriever = Retriever::new(RetryConfig {
        max_attempts: 1,
        ..RetryConfig::default()
    })
    .unwrap();

    let started = std::time::Instant::now();
    let err = retriever
        .fetch(&url, &Default::default(), Some(Duration::from_millis(100)))
        .await
        .unwrap_err();
    assert!(matches!(err, ImportError::Retrieval { .. }));
    assert!(started.elapsed() < Duration::from_millis(900));

    let body = retriever
        .fetch(&url, &Default::default(), Some(Duration::from_secs(10)))
        .await
        .unwrap();
    assert_eq!(&body[..], b"late");
}

#[tokio::test]
async fn test_fetch_to_file_writes_body() {
    let hits = Hits::default();
    let addr = serve(hits).await;
    let dir = tempfile::tempdir().unwrap();
    let dest = dir.path().join("out.grib2");

    let written = retriever()
        .fetch_to_file(&format!("http://{addr}/flaky"), &dest)
        .await
        .unwrap();

    assert_eq!(written, 10);
    assert_eq!(std::fs::read(&dest).unwrap(), b"grib-bytes");
}

#[tokio::test]
async fn test_ecmwf_ranges_are_concatenated_in_index_order() {
    let addr = serve(Hits::default()).await;
    let client = EcmwfClient::new(format!("http://{addr}/"));
    let request = EcmwfRequest {
        issuance: IssuanceTime::parse("20240301", "00").unwrap(),
        step: 6,
        params: &["10u", "2t"],
    };

    let body = client.retrieve(&retriever(), &request).await.unwrap();

    // 206 responses count as success
    assert_eq!(&body[..], b"TTTTUUUUU");
}

#[tokio::test]
async fn test_ecmwf_unknown_param_is_retrieval_error() {
    let addr = serve(Hits::default()).await;
    let client = EcmwfClient::new(format!("http://{addr}"));
    let request = EcmwfRequest {
        issuance: IssuanceTime::parse("20240301", "00").unwrap(),
        step: 6,
        params: &["tp"],
    };

    let err = client.retrieve(&retriever(), &request).await.unwrap_err();
    assert!(matches!(err, ImportError::Retrieval { .. }));
}
