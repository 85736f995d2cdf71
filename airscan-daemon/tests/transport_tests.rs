//! HTTP transport tests.
//!
//! Drives the axum application with `tower::ServiceExt::oneshot`, without
//! opening sockets.

use std::sync::Arc;

use airscan_core::config::DeviceConfig;
use airscan_daemon::access_log::AccessLog;
use airscan_daemon::transport;
use airscan_escl::{RegistryOptions, Router, ScannerRegistry, SimulatedBackend, control_channel};
use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use tempfile::TempDir;
use tower::ServiceExt;

const PAGE_BYTES: usize = 150_000;

const SETTINGS: &str = "<?xml version='1.0' encoding='UTF-8'?>\
<scan:ScanSettings xmlns:scan='http://schemas.hp.com/imaging/escl/2011/05/03' \
xmlns:pwg='http://www.pwg.org/schemas/2010/12/sm'>\
<pwg:Version>2.0</pwg:Version>\
<pwg:InputSource>Platen</pwg:InputSource>\
<scan:ColorMode>RGB24</scan:ColorMode>\
<scan:XResolution>300</scan:XResolution><scan:YResolution>300</scan:YResolution>\
<pwg:DocumentFormat>image/jpeg</pwg:DocumentFormat>\
</scan:ScanSettings>";

/// Builds an app over one simulated flatbed. Returns the app and the scanner uri.
fn test_app(access_log: AccessLog) -> (axum::Router, String) {
    let backend = Arc::new(SimulatedBackend::new([DeviceConfig {
        page_bytes: PAGE_BYTES,
        ..DeviceConfig::default()
    }]));
    let registry = Arc::new(ScannerRegistry::enumerate(
        backend,
        None,
        &RegistryOptions {
            local_only: true,
            transfer_chunk_size: 16 * 1024,
        },
    ));
    let uri = registry
        .scanners()
        .next()
        .expect("one scanner")
        .uri()
        .to_owned();
    let (control, _control_rx) = control_channel();
    let router = Arc::new(Router::new(registry, control, "*"));
    (transport::app(router, Arc::new(access_log)), uri)
}

async fn body_bytes(response: axum::response::Response) -> Vec<u8> {
    axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body readable")
        .to_vec()
}

fn get(path: &str) -> Request<Body> {
    Request::builder()
        .method("GET")
        .uri(path)
        .body(Body::empty())
        .unwrap()
}

fn post_settings(uri: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(format!("{uri}/ScanJobs"))
        .header(header::CONTENT_TYPE, "text/xml")
        .body(Body::from(SETTINGS))
        .unwrap()
}

#[tokio::test]
async fn test_server_descriptor_is_served() {
    // Given
    let (app, uri) = test_app(AccessLog::Disabled);

    // When
    let response = app.oneshot(get("/")).await.unwrap();

    // Then
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "text/xml");
    assert_eq!(response.headers()["access-control-allow-origin"], "*");
    let body = String::from_utf8(body_bytes(response).await).unwrap();
    assert!(body.contains("airsane:Server"));
    assert!(body.contains(&uri));
}

#[tokio::test]
async fn test_scan_job_streams_document_then_404() {
    // Given: a created job
    let (app, uri) = test_app(AccessLog::Disabled);
    let created = app.clone().oneshot(post_settings(&uri)).await.unwrap();
    assert_eq!(created.status(), StatusCode::CREATED);
    let location = created.headers()[header::LOCATION]
        .to_str()
        .unwrap()
        .to_owned();
    assert_eq!(
        created.headers()["access-control-expose-headers"],
        "Location"
    );

    // When: the first page is fetched
    let page = app
        .clone()
        .oneshot(get(&format!("{location}/NextDocument")))
        .await
        .unwrap();

    // Then: the whole page arrives as a JPEG stream
    assert_eq!(page.status(), StatusCode::OK);
    assert_eq!(page.headers()[header::CONTENT_TYPE], "image/jpeg");
    assert!(page.headers().get(header::TRANSFER_ENCODING).is_none());
    let bytes = body_bytes(page).await;
    assert_eq!(bytes.len(), PAGE_BYTES);
    assert_eq!(&bytes[..2], &[0xFF, 0xD8]);

    // and the platen job has nothing more to give
    let next = app
        .oneshot(get(&format!("{location}/NextDocument")))
        .await
        .unwrap();
    assert_eq!(next.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_delete_cancels_job_once() {
    let (app, uri) = test_app(AccessLog::Disabled);
    let created = app.clone().oneshot(post_settings(&uri)).await.unwrap();
    let location = created.headers()[header::LOCATION]
        .to_str()
        .unwrap()
        .to_owned();

    let delete = |path: String| {
        Request::builder()
            .method("DELETE")
            .uri(path)
            .body(Body::empty())
            .unwrap()
    };
    let first = app.clone().oneshot(delete(location.clone())).await.unwrap();
    let second = app.oneshot(delete(location)).await.unwrap();

    assert_eq!(first.status(), StatusCode::OK);
    assert_eq!(second.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_preflight_and_method_not_allowed() {
    let (app, uri) = test_app(AccessLog::Disabled);

    let preflight = Request::builder()
        .method("OPTIONS")
        .uri(format!("{uri}/ScanJobs"))
        .body(Body::empty())
        .unwrap();
    let response = app.clone().oneshot(preflight).await.unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    assert_eq!(response.headers()["access-control-allow-methods"], "POST");

    let put = Request::builder()
        .method("PUT")
        .uri(format!("{uri}/ScanJobs"))
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(put).await.unwrap();
    assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    assert_eq!(response.headers()[header::ALLOW], "POST, OPTIONS");
}

#[tokio::test]
async fn test_invalid_settings_are_bad_request() {
    let (app, uri) = test_app(AccessLog::Disabled);
    let request = Request::builder()
        .method("POST")
        .uri(format!("{uri}/ScanJobs"))
        .body(Body::from("<not-settings/>"))
        .unwrap();

    let response = app.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_access_log_records_streamed_bytes() {
    // Given: an access log file
    let dir = TempDir::new().unwrap();
    let log_path = dir.path().join("access.log");
    let (app, uri) = test_app(AccessLog::open(log_path.to_str().unwrap()).unwrap());

    // When: a job is created and its page streamed
    let created = app.clone().oneshot(post_settings(&uri)).await.unwrap();
    let location = created.headers()[header::LOCATION]
        .to_str()
        .unwrap()
        .to_owned();
    let request = Request::builder()
        .method("GET")
        .uri(format!("{location}/NextDocument"))
        .header(header::USER_AGENT, "AirScanScanner/3.0")
        .body(Body::empty())
        .unwrap();
    let page = app.oneshot(request).await.unwrap();
    assert_eq!(body_bytes(page).await.len(), PAGE_BYTES);

    // Then: both requests are logged, the document with its size
    let log = std::fs::read_to_string(&log_path).unwrap();
    let lines: Vec<&str> = log.lines().collect();
    assert_eq!(lines.len(), 2, "log: {log}");
    assert!(lines[0].contains(&format!("\"POST {uri}/ScanJobs\" 201 - ")));
    assert!(lines[1].contains(&format!(
        "\"GET {location}/NextDocument\" 200 {PAGE_BYTES} \"-\" \"AirScanScanner/3.0\""
    )));
}
