//! HTTP transport for the eSCL router.
//!
//! Every request goes through one axum fallback handler that converts it
//! into an [`airscan_escl::Request`] and runs [`Router::handle`] on the
//! blocking pool, since handlers may wait on device I/O. Page documents are
//! produced on the blocking pool too and streamed to the client through a
//! bounded channel, which also provides backpressure towards the scanner.
//!
//! ```text
//! axum ──▶ spawn_blocking(Router::handle) ──▶ Response
//!                                              │ Document
//!            Body::from_stream ◀── mpsc ◀── spawn_blocking(DocumentTransfer::run)
//! ```

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use airscan_escl::router::HEADER_TRANSFER_ENCODING;
use airscan_escl::{
    DocumentSink, DocumentTransfer, EsclError, Method, Request, Response, ResponseBody, Router,
};
use anyhow::Result;
use axum::body::Body;
use axum::extract::{ConnectInfo, State};
use axum::http::{HeaderName, HeaderValue, StatusCode, header};
use bytes::Bytes;
use chrono::Local;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;

use crate::access_log::{AccessEntry, AccessLog};

/// Largest accepted request body. Scan settings documents are small.
const MAX_REQUEST_BODY: usize = 1024 * 1024;

/// Chunks buffered between the scanner and a slow client.
const STREAM_BUFFER_CHUNKS: usize = 8;

#[derive(Clone)]
struct TransportState {
    router: Arc<Router>,
    access_log: Arc<AccessLog>,
}

/// Builds the axum application for one registry generation.
pub fn app(router: Arc<Router>, access_log: Arc<AccessLog>) -> axum::Router {
    axum::Router::new()
        .fallback(handle)
        .with_state(TransportState { router, access_log })
}

/// Serves `app` on `listener` until `cancel` fires, then drains open connections.
pub async fn serve(
    listener: TcpListener,
    app: axum::Router,
    cancel: CancellationToken,
) -> Result<()> {
    let local_addr = listener.local_addr()?;
    tracing::info!(listen_addr = %local_addr, "HTTP server listening");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move { cancel.cancelled().await })
    .await
    .map_err(|e| anyhow::anyhow!("HTTP server failed: {}", e))?;

    tracing::info!(listen_addr = %local_addr, "HTTP server stopped");
    Ok(())
}

async fn handle(
    State(state): State<TransportState>,
    request: axum::extract::Request,
) -> axum::response::Response {
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|info| info.0.ip());
    let (parts, body) = request.into_parts();

    let mut entry = AccessEntry {
        peer,
        time: Local::now(),
        method: parts.method.as_str().to_owned(),
        uri: parts.uri.to_string(),
        status: 0,
        bytes: None,
        referer: header_string(&parts.headers, header::REFERER),
        user_agent: header_string(&parts.headers, header::USER_AGENT),
    };

    let body = match axum::body::to_bytes(body, MAX_REQUEST_BODY).await {
        Ok(body) => body,
        Err(e) => {
            tracing::debug!(error = %e, "failed to read request body");
            entry.status = StatusCode::PAYLOAD_TOO_LARGE.as_u16();
            state.access_log.record(&entry);
            return status_only(StatusCode::PAYLOAD_TOO_LARGE);
        }
    };

    let mut escl_request = Request::new(Method::parse(parts.method.as_str()), parts.uri.path());
    for (name, value) in &parts.headers {
        if let Ok(value) = value.to_str() {
            escl_request = escl_request.with_header(name.as_str(), value);
        }
    }
    let escl_request = escl_request.with_body(body);

    let router = Arc::clone(&state.router);
    let response = match tokio::task::spawn_blocking(move || router.handle(&escl_request)).await {
        Ok(response) => response,
        Err(e) => {
            tracing::error!(error = %e, "request handler panicked or was cancelled");
            entry.status = StatusCode::INTERNAL_SERVER_ERROR.as_u16();
            state.access_log.record(&entry);
            return status_only(StatusCode::INTERNAL_SERVER_ERROR);
        }
    };

    entry.status = response.status;
    into_http(response, entry, Arc::clone(&state.access_log))
}

/// Converts a router response. Document bodies start streaming here.
fn into_http(
    response: Response,
    mut entry: AccessEntry,
    access_log: Arc<AccessLog>,
) -> axum::response::Response {
    let Response {
        status,
        headers,
        body,
    } = response;
    let status = StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

    let body = match body {
        ResponseBody::Empty => {
            access_log.record(&entry);
            Body::empty()
        }
        ResponseBody::Xml(xml) => {
            entry.bytes = Some(xml.len() as u64);
            access_log.record(&entry);
            Body::from(xml)
        }
        ResponseBody::Document(transfer) => stream_document(transfer, entry, access_log),
    };

    let mut http = axum::response::Response::new(body);
    *http.status_mut() = status;
    for (name, value) in headers {
        // hyper frames streamed bodies itself
        if name.eq_ignore_ascii_case(HEADER_TRANSFER_ENCODING) {
            continue;
        }
        match (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(&value),
        ) {
            (Ok(name), Ok(value)) => {
                http.headers_mut().append(name, value);
            }
            _ => tracing::warn!(header = %name, "dropping invalid response header"),
        }
    }
    http
}

/// Runs the page transfer on the blocking pool, feeding a streamed body.
fn stream_document(
    transfer: DocumentTransfer,
    mut entry: AccessEntry,
    access_log: Arc<AccessLog>,
) -> Body {
    let (tx, rx) = mpsc::channel::<Result<Bytes, io::Error>>(STREAM_BUFFER_CHUNKS);

    tokio::task::spawn_blocking(move || {
        let job = transfer.job().uri().to_owned();
        let mut sink = ChannelSink { tx, sent: 0 };
        match transfer.run(&mut sink) {
            Ok(bytes) => {
                tracing::debug!(job = %job, bytes = bytes, "document streamed");
            }
            Err(e) => {
                tracing::warn!(job = %job, error = %e, "document stream aborted");
                // ends the body without a final chunk so the client sees the failure
                let _ = sink.tx.blocking_send(Err(io::Error::other(e.to_string())));
            }
        }
        entry.bytes = Some(sink.sent);
        access_log.record(&entry);
    });

    Body::from_stream(ReceiverStream::new(rx))
}

/// Forwards page chunks to the HTTP body stream.
struct ChannelSink {
    tx: mpsc::Sender<Result<Bytes, io::Error>>,
    sent: u64,
}

impl DocumentSink for ChannelSink {
    fn write_chunk(&mut self, chunk: Bytes) -> Result<(), EsclError> {
        let len = chunk.len() as u64;
        self.tx
            .blocking_send(Ok(chunk))
            .map_err(|_| EsclError::Sink("client disconnected".to_owned()))?;
        self.sent += len;
        Ok(())
    }
}

fn header_string(headers: &axum::http::HeaderMap, name: HeaderName) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned)
}

fn status_only(status: StatusCode) -> axum::response::Response {
    let mut response = axum::response::Response::new(Body::empty());
    *response.status_mut() = status;
    response
}
