//! eSCL 요청 라우터
//!
//! 라우터는 전송 계층과 무관합니다: 추상 [`Request`]를 레지스트리에 대응시켜
//! [`Response`]를 돌려줍니다. 라우팅은 순서가 있는 매처 테이블이며,
//! [`RouteOutcome::Handled`]를 처음 돌려주는 매처가 응답합니다.
//!
//! ```text
//! /                                         GET  서버 기술자
//! /reset                                    POST 재로딩
//! {scanner}[/]                              GET  상태
//! {scanner}/ScannerCapabilities             GET  능력
//! {scanner}/ScannerStatus                   GET  상태
//! {scanner}/ScanJobs                        POST 작업 생성
//! {scanner}/ScanJobs/{id}                   DELETE 작업 취소
//! {scanner}/ScanJobs/{id}/NextDocument      GET  다음 페이지 스트리밍
//! ```
//!
//! 모든 리소스는 `OPTIONS`에 CORS preflight로 응답합니다.
//! 작업 리소스는 작업이 존재할 때만 응답합니다.
//!
//! 핸들러는 장치 I/O에서 블로킹될 수 있으므로 [`Router::handle`]은
//! 블로킹이 허용된 스레드에서 호출해야 합니다.

use std::sync::Arc;

use airscan_core::metrics as m;
use bytes::Bytes;
use tracing::{debug, warn};

use crate::control::ControlHandle;
use crate::error::EsclError;
use crate::job::{DocumentSink, ScanJob};
use crate::registry::ScannerRegistry;
use crate::scanner::Scanner;

pub const HEADER_ALLOW: &str = "Allow";
pub const HEADER_CONTENT_TYPE: &str = "Content-Type";
pub const HEADER_LOCATION: &str = "Location";
pub const HEADER_TRANSFER_ENCODING: &str = "Transfer-Encoding";
pub const HEADER_USER_AGENT: &str = "User-Agent";
pub const HEADER_ACAO: &str = "Access-Control-Allow-Origin";
pub const HEADER_ACAM: &str = "Access-Control-Allow-Methods";
pub const HEADER_ACAH: &str = "Access-Control-Allow-Headers";
pub const HEADER_ACEH: &str = "Access-Control-Expose-Headers";

const TEXT_XML: &str = "text/xml";

/// User-Agent에 이 문자열이 있는 클라이언트는 문서 형식을 자동 선택합니다.
const AIRSCAN_CLIENT_MARKER: &str = "AirScanScanner";

// ─── 요청 / 응답 ────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Delete,
    Options,
    Other(String),
}

impl Method {
    pub fn parse(method: &str) -> Self {
        match method {
            "GET" => Self::Get,
            "POST" => Self::Post,
            "DELETE" => Self::Delete,
            "OPTIONS" => Self::Options,
            other => Self::Other(other.to_owned()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Delete => "DELETE",
            Self::Options => "OPTIONS",
            Self::Other(other) => other,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Request {
    pub method: Method,
    /// 쿼리 문자열을 제외한 경로
    pub path: String,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
}

impl Request {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            headers: Vec::new(),
            body: Bytes::new(),
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// 대소문자를 구분하지 않는 헤더 조회
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// 응답 본문
pub enum ResponseBody {
    Empty,
    Xml(String),
    /// 장치에서 아직 읽어 올 페이지 바이트
    Document(DocumentTransfer),
}

impl std::fmt::Debug for ResponseBody {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Empty => f.write_str("Empty"),
            Self::Xml(xml) => f.debug_tuple("Xml").field(&xml.len()).finish(),
            Self::Document(transfer) => f.debug_tuple("Document").field(&transfer.job.uri()).finish(),
        }
    }
}

#[derive(Debug)]
pub struct Response {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: ResponseBody,
}

impl Response {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: ResponseBody::Empty,
        }
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.push((name.to_owned(), value.into()));
        self
    }

    fn with_xml(self, xml: String) -> Self {
        let mut response = self.with_header(HEADER_CONTENT_TYPE, TEXT_XML);
        response.body = ResponseBody::Xml(xml);
        response
    }

    /// 대소문자를 구분하지 않는 헤더 조회
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// 시작된 페이지 전송. 전송 계층이 받아서 스트리밍합니다.
///
/// [`run`](Self::run)을 호출하지 않고 드롭되면 (본문을 읽기 전에 클라이언트가
/// 떠난 경우) 작업을 중단합니다.
pub struct DocumentTransfer {
    job: Arc<ScanJob>,
    consumed: bool,
}

impl DocumentTransfer {
    fn new(job: Arc<ScanJob>) -> Self {
        Self {
            job,
            consumed: false,
        }
    }

    pub fn job(&self) -> &Arc<ScanJob> {
        &self.job
    }

    /// 페이지를 `sink`로 스트리밍합니다. 페이지가 끝날 때까지 블로킹됩니다.
    pub fn run(mut self, sink: &mut dyn DocumentSink) -> Result<u64, EsclError> {
        self.consumed = true;
        self.job.finish_transfer(sink)
    }
}

impl Drop for DocumentTransfer {
    fn drop(&mut self) {
        if !self.consumed {
            debug!(job = %self.job.uri(), "document transfer dropped before streaming");
            self.job.abort_transfer();
        }
    }
}

// ─── 라우팅 테이블 ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ResourceKind {
    Root,
    Reset,
    ScannerRoot,
    Capabilities,
    Status,
    ScanJobs,
    Job,
    NextDocument,
}

/// 경로가 가리키는 리소스
struct Target<'a> {
    kind: ResourceKind,
    scanner: Option<&'a Arc<Scanner>>,
    job_id: &'a str,
}

impl<'a> Target<'a> {
    fn resolve(registry: &'a ScannerRegistry, path: &'a str) -> Option<Self> {
        let server = |kind| Self {
            kind,
            scanner: None,
            job_id: "",
        };
        match path {
            "/" => return Some(server(ResourceKind::Root)),
            "/reset" => return Some(server(ResourceKind::Reset)),
            _ => {}
        }

        let scanner = registry.find_by_uri_prefix(path)?;
        let rest = &path[scanner.uri().len()..];
        let (kind, job_id) = match rest {
            "" | "/" => (ResourceKind::ScannerRoot, ""),
            "/ScannerCapabilities" => (ResourceKind::Capabilities, ""),
            "/ScannerStatus" => (ResourceKind::Status, ""),
            "/ScanJobs" => (ResourceKind::ScanJobs, ""),
            _ => {
                let job_path = rest.strip_prefix("/ScanJobs/")?;
                match job_path.split_once('/') {
                    None if !job_path.is_empty() => (ResourceKind::Job, job_path),
                    Some((id, "NextDocument")) if !id.is_empty() => {
                        (ResourceKind::NextDocument, id)
                    }
                    _ => return None,
                }
            }
        };
        Some(Self {
            kind,
            scanner: Some(scanner),
            job_id,
        })
    }
}

/// 요청을 라우트 하나에 제시한 결과
pub enum RouteOutcome {
    Handled(Response),
    NotMatched,
}

type Handler = fn(&Router, &Request, &Target<'_>) -> Response;

struct Route {
    kind: ResourceKind,
    method: Method,
    handler: Handler,
}

impl Route {
    fn new(kind: ResourceKind, method: Method, handler: Handler) -> Self {
        Self {
            kind,
            method,
            handler,
        }
    }

    fn offer(&self, router: &Router, request: &Request, target: &Target<'_>) -> RouteOutcome {
        if self.kind == target.kind && self.method == request.method {
            RouteOutcome::Handled((self.handler)(router, request, target))
        } else {
            RouteOutcome::NotMatched
        }
    }
}

fn routes() -> Vec<Route> {
    use ResourceKind::*;
    vec![
        Route::new(Root, Method::Get, Router::server_descriptor),
        Route::new(Reset, Method::Post, Router::reset),
        Route::new(ScannerRoot, Method::Get, Router::scanner_status),
        Route::new(Capabilities, Method::Get, Router::scanner_capabilities),
        Route::new(Status, Method::Get, Router::scanner_status),
        Route::new(ScanJobs, Method::Post, Router::create_job),
        Route::new(Job, Method::Delete, Router::cancel_job),
        Route::new(NextDocument, Method::Get, Router::next_document),
    ]
}

// ─── 라우터 ────────────────────────────────────────────────────────────

/// 레지스트리 한 세대에 대해 요청을 분배합니다.
pub struct Router {
    registry: Arc<ScannerRegistry>,
    control: ControlHandle,
    cross_origin: String,
    routes: Vec<Route>,
}

impl Router {
    pub fn new(
        registry: Arc<ScannerRegistry>,
        control: ControlHandle,
        cross_origin: impl Into<String>,
    ) -> Self {
        Self {
            registry,
            control,
            cross_origin: cross_origin.into(),
            routes: routes(),
        }
    }

    pub fn registry(&self) -> &Arc<ScannerRegistry> {
        &self.registry
    }

    /// 요청 하나를 처리합니다. 장치 I/O에서 블로킹될 수 있습니다.
    pub fn handle(&self, request: &Request) -> Response {
        let response = self.dispatch(request);
        metrics::counter!(m::HTTP_REQUESTS_TOTAL, m::LABEL_STATUS => response.status.to_string())
            .increment(1);
        debug!(
            method = request.method.as_str(),
            path = %request.path,
            status = response.status,
            "request handled"
        );
        response
    }

    fn dispatch(&self, request: &Request) -> Response {
        let Some(target) = Target::resolve(&self.registry, &request.path) else {
            return Response::new(404);
        };

        for route in &self.routes {
            if let RouteOutcome::Handled(response) = route.offer(self, request, &target) {
                return response;
            }
        }

        // 없는 작업에는 preflight도 405도 없음
        if matches!(target.kind, ResourceKind::Job | ResourceKind::NextDocument)
            && self.job_of(&target).is_none()
        {
            return Response::new(404);
        }

        let allowed = self.allowed_methods(target.kind);
        if request.method == Method::Options {
            return self
                .success(204)
                .with_header(HEADER_ACAM, allowed.join(", "));
        }
        let mut allow = allowed;
        allow.push("OPTIONS");
        self.error(&EsclError::MethodNotAllowed {
            method: request.method.as_str().to_owned(),
            path: request.path.clone(),
        })
        .with_header(HEADER_ALLOW, allow.join(", "))
    }

    fn allowed_methods(&self, kind: ResourceKind) -> Vec<&'static str> {
        let mut methods: Vec<&'static str> = Vec::new();
        for route in self.routes.iter().filter(|r| r.kind == kind) {
            let method = match route.method {
                Method::Get => "GET",
                Method::Post => "POST",
                Method::Delete => "DELETE",
                _ => continue,
            };
            if !methods.contains(&method) {
                methods.push(method);
            }
        }
        methods
    }

    /// CORS origin 헤더가 붙은 응답. 설정이 비어 있으면 빈 값을 보냅니다.
    fn success(&self, status: u16) -> Response {
        Response::new(status).with_header(HEADER_ACAO, self.cross_origin.clone())
    }

    fn job_of(&self, target: &Target<'_>) -> Option<Arc<ScanJob>> {
        target
            .scanner
            .and_then(|scanner| self.registry.find_job(scanner, target.job_id))
    }

    fn error(&self, err: &EsclError) -> Response {
        let status = err.status_code();
        if status == 503 {
            self.success(status)
        } else {
            Response::new(status)
        }
    }

    // ─── 핸들러 ───────────────────────────────────────────────────────

    fn server_descriptor(&self, _request: &Request, _target: &Target<'_>) -> Response {
        self.success(200).with_xml(self.registry.server_document())
    }

    fn reset(&self, _request: &Request, _target: &Target<'_>) -> Response {
        metrics::counter!(m::DAEMON_RELOADS_TOTAL, m::LABEL_REASON => "reset").increment(1);
        self.control.request_reload();
        self.success(200)
    }

    fn scanner_status(&self, _request: &Request, target: &Target<'_>) -> Response {
        match target.scanner {
            Some(scanner) => self.success(200).with_xml(scanner.status_document()),
            None => Response::new(404),
        }
    }

    fn scanner_capabilities(&self, _request: &Request, target: &Target<'_>) -> Response {
        let Some(scanner) = target.scanner else {
            return Response::new(404);
        };
        match scanner.capabilities_document() {
            Ok(xml) => self.success(200).with_xml(xml),
            Err(e) => self.error(&e),
        }
    }

    fn create_job(&self, request: &Request, target: &Target<'_>) -> Response {
        let Some(scanner) = target.scanner else {
            return Response::new(404);
        };
        let Ok(xml) = std::str::from_utf8(&request.body) else {
            return self.error(&EsclError::InvalidSettings(
                "settings document is not UTF-8".to_owned(),
            ));
        };
        let autoselect = request
            .header(HEADER_USER_AGENT)
            .is_some_and(|agent| agent.contains(AIRSCAN_CLIENT_MARKER));

        match scanner.create_job_from_settings(xml, autoselect) {
            Ok(job) => self
                .success(201)
                .with_header(HEADER_ACEH, HEADER_LOCATION)
                .with_header(HEADER_ACAH, HEADER_LOCATION)
                .with_header(HEADER_LOCATION, job.uri()),
            Err(e) => self.error(&e),
        }
    }

    fn cancel_job(&self, _request: &Request, target: &Target<'_>) -> Response {
        let Some(scanner) = target.scanner else {
            return Response::new(404);
        };
        if self.job_of(target).is_none() {
            return Response::new(404);
        }
        if scanner.cancel_job(target.job_id) {
            self.success(200)
        } else {
            Response::new(404)
        }
    }

    fn next_document(&self, _request: &Request, target: &Target<'_>) -> Response {
        let Some(job) = self.job_of(target) else {
            return Response::new(404);
        };
        if job.is_finished() {
            return Response::new(404);
        }

        match job.begin_transfer() {
            Ok(()) => {
                let mut response = self
                    .success(200)
                    .with_header(HEADER_CONTENT_TYPE, job.document_format())
                    .with_header(HEADER_TRANSFER_ENCODING, "chunked");
                response.body = ResponseBody::Document(DocumentTransfer::new(job));
                response
            }
            Err(EsclError::DeviceBusy(name)) => {
                debug!(job = %job.uri(), device = %name, "device busy");
                self.error(&EsclError::DeviceBusy(name))
            }
            Err(e @ (EsclError::NoMoreDocuments | EsclError::NotFound(_) | EsclError::Canceled)) => {
                self.error(&e)
            }
            Err(e) => {
                warn!(job = %job.uri(), error = %e, "failed to start transfer");
                job.abort_transfer();
                self.error(&e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::control_channel;
    use crate::registry::RegistryOptions;
    use crate::simulated::SimulatedBackend;
    use airscan_core::config::DeviceConfig;

    fn router() -> Router {
        let backend = Arc::new(SimulatedBackend::new([DeviceConfig::default()]));
        let registry = ScannerRegistry::enumerate(backend, None, &RegistryOptions::default());
        let (control, _rx) = control_channel();
        Router::new(Arc::new(registry), control, "*")
    }

    fn scanner_uri(router: &Router) -> String {
        router.registry().scanners().next().unwrap().uri().to_owned()
    }

    const SETTINGS: &str = "<?xml version='1.0' encoding='UTF-8'?>\
        <scan:ScanSettings xmlns:scan='http://schemas.hp.com/imaging/escl/2011/05/03' \
        xmlns:pwg='http://www.pwg.org/schemas/2010/12/sm'>\
        <pwg:InputSource>Platen</pwg:InputSource>\
        <scan:ColorMode>RGB24</scan:ColorMode>\
        <scan:XResolution>300</scan:XResolution><scan:YResolution>300</scan:YResolution>\
        <pwg:DocumentFormat>image/jpeg</pwg:DocumentFormat>\
        </scan:ScanSettings>";

    #[test]
    fn method_parse_round_trips_known_methods() {
        for name in ["GET", "POST", "DELETE", "OPTIONS"] {
            assert_eq!(Method::parse(name).as_str(), name);
        }
        assert_eq!(Method::parse("PUT"), Method::Other("PUT".to_owned()));
    }

    #[test]
    fn root_returns_server_descriptor_with_cors() {
        let router = router();
        let response = router.handle(&Request::new(Method::Get, "/"));
        assert_eq!(response.status, 200);
        assert_eq!(response.header("content-type"), Some("text/xml"));
        assert_eq!(response.header(HEADER_ACAO), Some("*"));
        assert!(matches!(response.body, ResponseBody::Xml(ref xml) if xml.contains("airsane:Server")));
    }

    #[test]
    fn preflight_lists_resource_methods() {
        let router = router();
        let uri = scanner_uri(&router);

        let root = router.handle(&Request::new(Method::Options, "/"));
        assert_eq!(root.status, 204);
        assert_eq!(root.header(HEADER_ACAM), Some("GET"));

        let jobs = router.handle(&Request::new(Method::Options, format!("{uri}/ScanJobs")));
        assert_eq!(jobs.status, 204);
        assert_eq!(jobs.header(HEADER_ACAM), Some("POST"));
        assert_eq!(jobs.header(HEADER_ACAO), Some("*"));
    }

    #[test]
    fn wrong_method_on_known_path_is_405() {
        let router = router();
        let response = router.handle(&Request::new(Method::Delete, "/"));
        assert_eq!(response.status, 405);
        assert_eq!(response.header(HEADER_ALLOW), Some("GET, OPTIONS"));
    }

    #[test]
    fn unknown_paths_are_404() {
        let router = router();
        let uri = scanner_uri(&router);
        let bogus = format!("{uri}/Bogus");
        let empty_job = format!("{uri}/ScanJobs/");
        for path in ["/nope", "/reset/x", bogus.as_str(), empty_job.as_str()] {
            assert_eq!(router.handle(&Request::new(Method::Get, path)).status, 404, "{path}");
        }
    }

    #[test]
    fn trailing_slash_on_scanner_returns_status() {
        let router = router();
        let uri = scanner_uri(&router);
        let response = router.handle(&Request::new(Method::Get, format!("{uri}/")));
        assert_eq!(response.status, 200);
        assert!(matches!(response.body, ResponseBody::Xml(ref xml) if xml.contains("scan:ScannerStatus")));
    }

    #[test]
    fn disabled_cross_origin_sends_empty_header() {
        // Given: CORS origin 미설정
        let backend = Arc::new(SimulatedBackend::new([DeviceConfig::default()]));
        let registry = ScannerRegistry::enumerate(backend, None, &RegistryOptions::default());
        let (control, _rx) = control_channel();
        let router = Router::new(Arc::new(registry), control, "");

        // When
        let get = router.handle(&Request::new(Method::Get, "/"));
        let preflight = router.handle(&Request::new(Method::Options, "/"));

        // Then: 헤더는 빈 값으로 존재
        assert_eq!(get.status, 200);
        assert_eq!(get.header(HEADER_ACAO), Some(""));
        assert_eq!(preflight.status, 204);
        assert_eq!(preflight.header(HEADER_ACAO), Some(""));
    }

    #[test]
    fn preflight_for_unknown_job_is_404() {
        // Given
        let router = router();
        let uri = scanner_uri(&router);

        // When: 존재하지 않는 작업에 preflight와 잘못된 메서드
        let job = router.handle(&Request::new(Method::Options, format!("{uri}/ScanJobs/missing")));
        let next = router.handle(&Request::new(
            Method::Options,
            format!("{uri}/ScanJobs/missing/NextDocument"),
        ));
        let put = router.handle(&Request::new(
            Method::Other("PUT".to_owned()),
            format!("{uri}/ScanJobs/missing"),
        ));

        // Then
        assert_eq!(job.status, 404);
        assert_eq!(job.header(HEADER_ACAO), None);
        assert_eq!(next.status, 404);
        assert_eq!(put.status, 404);
    }

    #[test]
    fn preflight_for_live_job_lists_methods() {
        // Given: 작업 하나 생성
        let router = router();
        let uri = scanner_uri(&router);
        let scanner = Arc::clone(router.registry().scanners().next().unwrap());
        let job = scanner.create_job_from_settings(SETTINGS, false).unwrap();

        // When
        let response = router.handle(&Request::new(Method::Options, job.uri()));
        let next = router.handle(&Request::new(
            Method::Options,
            format!("{}/NextDocument", job.uri()),
        ));

        // Then
        assert!(job.uri().starts_with(&uri));
        assert_eq!(response.status, 204);
        assert_eq!(response.header(HEADER_ACAM), Some("DELETE"));
        assert_eq!(next.status, 204);
        assert_eq!(next.header(HEADER_ACAM), Some("GET"));
    }

    #[test]
    fn non_utf8_settings_are_rejected() {
        let router = router();
        let uri = scanner_uri(&router);
        let request = Request::new(Method::Post, format!("{uri}/ScanJobs"))
            .with_body(vec![0xff, 0xfe, 0x00]);
        assert_eq!(router.handle(&request).status, 400);
    }
}
