//! 메트릭 상수 및 설명 등록
//!
//! 모든 Prometheus 메트릭의 이름과 설명을 중앙에서 정의합니다.
//! 각 모듈은 이 상수를 사용하여 `metrics::counter!()`, `metrics::gauge!()`,
//! `metrics::histogram!()` 매크로를 호출합니다.
//!
//! # 네이밍 컨벤션
//!
//! - 접두어: `airscan_`
//! - 영역: `scanner_`, `job_`, `http_`, `daemon_`
//! - 접미어: `_total` (counter), `_seconds` (histogram/latency), 없음 (gauge)
//!
//! # 사용 예시
//!
//! ```ignore
//! use airscan_core::metrics;
//! use metrics::counter;
//!
//! counter!(airscan_core::metrics::JOBS_CREATED_TOTAL).increment(1);
//! ```

// ─── 레이블 키 상수 ────────────────────────────────────────────────

/// HTTP 상태 코드 레이블 키
pub const LABEL_STATUS: &str = "status";

/// 작업 종료 결과 레이블 키 (completed, canceled, aborted)
pub const LABEL_RESULT: &str = "result";

/// 재로딩 사유 레이블 키 (reset, hotplug, signal)
pub const LABEL_REASON: &str = "reason";

// ─── 스캐너 ────────────────────────────────────────────────────────

/// 현재 공유 중인 스캐너 수
pub const SCANNERS_AVAILABLE: &str = "airscan_scanners_available";

/// 장치 세션 점유 충돌로 거부된 전송 수
pub const SCANNER_BUSY_REJECTIONS_TOTAL: &str = "airscan_scanner_busy_rejections_total";

// ─── 스캔 작업 ─────────────────────────────────────────────────────

/// 생성된 스캔 작업 수
pub const JOBS_CREATED_TOTAL: &str = "airscan_jobs_created_total";

/// 잘못된 스캔 설정으로 거부된 작업 생성 요청 수
pub const JOBS_REJECTED_TOTAL: &str = "airscan_jobs_rejected_total";

/// 종료 상태에 도달한 작업 수 (result 레이블)
pub const JOBS_FINISHED_TOTAL: &str = "airscan_jobs_finished_total";

/// 정리(purge)된 작업 수
pub const JOBS_PURGED_TOTAL: &str = "airscan_jobs_purged_total";

/// 전송 완료된 페이지 수
pub const PAGES_TRANSFERRED_TOTAL: &str = "airscan_pages_transferred_total";

/// 전송된 문서 바이트 수
pub const DOCUMENT_BYTES_TOTAL: &str = "airscan_document_bytes_total";

/// 페이지 한 장의 스캔+전송 소요 시간
pub const PAGE_TRANSFER_DURATION_SECONDS: &str = "airscan_page_transfer_duration_seconds";

// ─── HTTP ─────────────────────────────────────────────────────────

/// 처리한 HTTP 요청 수 (status 레이블)
pub const HTTP_REQUESTS_TOTAL: &str = "airscan_http_requests_total";

// ─── 데몬 ─────────────────────────────────────────────────────────

/// 데몬 가동 시간
pub const DAEMON_UPTIME_SECONDS: &str = "airscan_daemon_uptime_seconds";

/// 스캐너 집합 재로딩 요청 횟수 (reason 레이블)
pub const DAEMON_RELOADS_TOTAL: &str = "airscan_daemon_reloads_total";

/// 빌드 정보 (항상 1, version 레이블)
pub const DAEMON_BUILD_INFO: &str = "airscan_daemon_build_info";

// ─── 히스토그램 버킷 정의 ────────────────────────────────────────────

/// 페이지 전송 소요 시간 히스토그램 버킷 (초)
///
/// 100ms ~ 300s 범위 (고해상도 컬러 스캔 포함)
pub const PAGE_TRANSFER_DURATION_BUCKETS: [f64; 9] =
    [0.1, 0.5, 1.0, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0];

// ─── 설명 등록 함수 ─────────────────────────────────────────────────

/// 모든 메트릭의 설명(description)을 등록합니다.
///
/// 이 함수는 전역 레코더 설치 후 한 번만 호출해야 합니다.
/// 일반적으로 `airscan-daemon`의 시작 시점에서 호출합니다.
pub fn describe_all() {
    use metrics::{describe_counter, describe_gauge, describe_histogram};

    // Scanner
    describe_gauge!(
        SCANNERS_AVAILABLE,
        "Number of scanners currently shared by the daemon"
    );
    describe_counter!(
        SCANNER_BUSY_REJECTIONS_TOTAL,
        "Transfers rejected because the device session was already held"
    );

    // Jobs
    describe_counter!(JOBS_CREATED_TOTAL, "Total number of scan jobs created");
    describe_counter!(
        JOBS_REJECTED_TOTAL,
        "Scan job requests rejected for invalid settings"
    );
    describe_counter!(
        JOBS_FINISHED_TOTAL,
        "Scan jobs that reached a terminal state, by result"
    );
    describe_counter!(JOBS_PURGED_TOTAL, "Terminal scan jobs removed by purge");
    describe_counter!(
        PAGES_TRANSFERRED_TOTAL,
        "Total number of scanned pages streamed to clients"
    );
    describe_counter!(
        DOCUMENT_BYTES_TOTAL,
        "Total document bytes streamed to clients"
    );
    describe_histogram!(
        PAGE_TRANSFER_DURATION_SECONDS,
        "Time to scan and stream a single page in seconds"
    );

    // HTTP
    describe_counter!(HTTP_REQUESTS_TOTAL, "HTTP requests handled, by status code");

    // Daemon
    describe_gauge!(DAEMON_UPTIME_SECONDS, "airscan daemon uptime in seconds");
    describe_counter!(
        DAEMON_RELOADS_TOTAL,
        "Scanner set reload requests, by trigger reason"
    );
    describe_gauge!(
        DAEMON_BUILD_INFO,
        "Build information (always 1, with version label)"
    );
}
