//! 스캔 작업 상태 머신
//!
//! 작업 하나는 POST된 스캔 설정으로 만들어지고, `NextDocument` 요청마다
//! 페이지 하나를 전송합니다.
//!
//! ```text
//! Pending ──begin──▶ Scanning ──finish──▶ Finished      (평판)
//!                     ▲    │
//!                     │    └──finish──▶ PageReady        (급지대)
//!                     └───────begin────────┘
//!
//! 비종료 상태 ──cancel──▶ Cancelled
//! 비종료 상태 ──abort───▶ Error
//! ```
//!
//! 상태 전이는 작업별 뮤텍스 안에서 원자적으로 일어나며, 장치 세션은 별도
//! 뮤텍스에 보관됩니다. 전송 루프는 읽기 한 번 동안만 세션 뮤텍스를 잡으므로
//! [`ScanJob::cancel`]은 진행 중인 읽기 하나가 끝날 때까지만 기다립니다.

use std::sync::Weak;
use std::time::{Duration, Instant};

use airscan_core::metrics as m;
use bytes::Bytes;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::capabilities::InputSource;
use crate::document::JobInfo;
use crate::error::EsclError;
use crate::scanner::{ScanSession, Scanner};
use crate::settings::JobSettings;

// ─── PWG 작업 상태 사유 ─────────────────────────────────────────────

pub const JOB_QUEUED: &str = "JobQueued";
pub const JOB_SCANNING: &str = "JobScanning";
pub const JOB_SCANNING_AND_TRANSFERRING: &str = "JobScanningAndTransferring";
pub const JOB_COMPLETED_SUCCESSFULLY: &str = "JobCompletedSuccessfully";
pub const JOB_CANCELED_BY_USER: &str = "JobCanceledByUser";
pub const RESOURCES_ARE_NOT_READY: &str = "ResourcesAreNotReady";
pub const ERRORS_DETECTED: &str = "ErrorsDetected";

/// 작업 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    /// 생성됨, 아직 전송 전
    Pending,
    /// 페이지 스캔 및 전송 중
    Scanning,
    /// 급지대 작업에서 다음 페이지 요청을 기다리는 중
    PageReady,
    Finished,
    Cancelled,
    Error,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Finished | Self::Cancelled | Self::Error)
    }

    /// eSCL `JobState` 값
    pub fn escl_name(self) -> &'static str {
        match self {
            Self::Pending => "Pending",
            Self::Scanning | Self::PageReady => "Processing",
            Self::Finished => "Completed",
            Self::Cancelled => "Canceled",
            Self::Error => "Aborted",
        }
    }

    fn metric_result(self) -> &'static str {
        match self {
            Self::Finished => "completed",
            Self::Cancelled => "canceled",
            _ => "aborted",
        }
    }
}

/// 문서 바이트를 받는 출력 대상 (보통 HTTP 응답 본문)
pub trait DocumentSink {
    /// 청크 하나를 씁니다. 실패는 클라이언트 연결이 끊겼음을 뜻합니다.
    fn write_chunk(&mut self, chunk: Bytes) -> Result<(), EsclError>;
}

impl DocumentSink for Vec<u8> {
    fn write_chunk(&mut self, chunk: Bytes) -> Result<(), EsclError> {
        self.extend_from_slice(&chunk);
        Ok(())
    }
}

#[derive(Debug)]
struct JobStatus {
    state: JobState,
    reason: &'static str,
    images_completed: u32,
    finished_at: Option<Instant>,
}

impl JobStatus {
    fn terminate(&mut self, state: JobState, reason: &'static str) {
        self.state = state;
        self.reason = reason;
        self.finished_at = Some(Instant::now());
        metrics::counter!(m::JOBS_FINISHED_TOTAL, m::LABEL_RESULT => state.metric_result())
            .increment(1);
    }
}

/// 스캔 작업
pub struct ScanJob {
    id: String,
    uri: String,
    scanner: Weak<Scanner>,
    settings: JobSettings,
    created: Instant,
    transfer_chunk_size: usize,
    status: Mutex<JobStatus>,
    session: Mutex<Option<ScanSession>>,
}

impl ScanJob {
    pub(crate) fn new(
        id: String,
        scanner_uri: &str,
        scanner: Weak<Scanner>,
        settings: JobSettings,
        transfer_chunk_size: usize,
    ) -> Self {
        Self {
            uri: format!("{scanner_uri}/ScanJobs/{id}"),
            id,
            scanner,
            settings,
            created: Instant::now(),
            transfer_chunk_size: transfer_chunk_size.max(1),
            status: Mutex::new(JobStatus {
                state: JobState::Pending,
                reason: JOB_QUEUED,
                images_completed: 0,
                finished_at: None,
            }),
            session: Mutex::new(None),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// `{scanner uri}/ScanJobs/{id}`
    pub fn uri(&self) -> &str {
        &self.uri
    }

    pub fn settings(&self) -> &JobSettings {
        &self.settings
    }

    /// 전송 문서의 MIME 타입
    pub fn document_format(&self) -> &str {
        &self.settings.document_format
    }

    pub fn state(&self) -> JobState {
        self.status.lock().state
    }

    pub fn state_reason(&self) -> &'static str {
        self.status.lock().reason
    }

    pub fn images_completed(&self) -> u32 {
        self.status.lock().images_completed
    }

    pub fn is_finished(&self) -> bool {
        self.state().is_terminal()
    }

    /// 종료 상태에 도달한 뒤 `max_age` 이상 지났는지
    pub fn is_expired(&self, max_age: Duration) -> bool {
        let status = self.status.lock();
        status.state.is_terminal()
            && status
                .finished_at
                .is_some_and(|finished| finished.elapsed() >= max_age)
    }

    /// 상태 문서용 스냅샷
    pub fn info(&self) -> JobInfo {
        let status = self.status.lock();
        JobInfo {
            uri: self.uri.clone(),
            uuid: self.id.clone(),
            age_secs: self.created.elapsed().as_secs(),
            state: status.state.escl_name(),
            state_reason: status.reason,
            images_to_transfer: 1,
            images_completed: status.images_completed,
        }
    }

    /// 다음 페이지 전송을 시작합니다.
    ///
    /// 장치 세션을 열고 설정을 적용한 뒤 스캔을 시작합니다. 장치가 다른 작업에
    /// 점유되어 있으면 상태를 되돌리고 [`EsclError::DeviceBusy`]를 돌려주므로
    /// 같은 작업을 나중에 다시 요청할 수 있습니다. 그 밖의 실패 뒤에는
    /// 호출자가 [`abort_transfer`](Self::abort_transfer)를 호출해야 합니다.
    pub fn begin_transfer(&self) -> Result<(), EsclError> {
        let (previous, page) = {
            let mut status = self.status.lock();
            match status.state {
                JobState::Pending | JobState::PageReady => {}
                JobState::Scanning => {
                    return Err(EsclError::DeviceBusy(format!(
                        "job {} is already transferring",
                        self.id
                    )));
                }
                state => {
                    return Err(EsclError::NotFound(format!(
                        "job {} is {}",
                        self.id,
                        state.escl_name()
                    )));
                }
            }
            let previous = status.state;
            status.state = JobState::Scanning;
            status.reason = JOB_SCANNING;
            (previous, status.images_completed)
        };

        let scanner = self
            .scanner
            .upgrade()
            .ok_or_else(|| EsclError::Device("scanner is gone".to_owned()))?;

        let mut session = match scanner.open() {
            Ok(session) => session,
            Err(EsclError::DeviceBusy(name)) => {
                let mut status = self.status.lock();
                if status.state == JobState::Scanning {
                    status.state = previous;
                    status.reason = RESOURCES_ARE_NOT_READY;
                }
                return Err(EsclError::DeviceBusy(name));
            }
            Err(e) => return Err(e),
        };

        let parameters = self.settings.scan_parameters(page);
        session.configure(&parameters)?;
        match session.start() {
            Ok(()) => {}
            Err(EsclError::NoMoreDocuments) if page > 0 => {
                drop(session);
                let mut status = self.status.lock();
                if status.state == JobState::Scanning {
                    status.terminate(JobState::Finished, JOB_COMPLETED_SUCCESSFULLY);
                }
                info!(job = %self.id, pages = page, "feeder empty, job finished");
                return Err(EsclError::NoMoreDocuments);
            }
            Err(EsclError::NoMoreDocuments) => {
                return Err(EsclError::Device("no document in feeder".to_owned()));
            }
            Err(e) => return Err(e),
        }

        *self.session.lock() = Some(session);
        // cancel()가 장치를 여는 동안 실행됐을 수 있음
        if self.state() != JobState::Scanning {
            self.session.lock().take();
            return Err(EsclError::Canceled);
        }
        debug!(job = %self.id, page, format = %self.settings.document_format, "transfer started");
        Ok(())
    }

    /// 현재 페이지를 끝까지 읽어 `sink`로 보냅니다. 전송한 바이트 수를 돌려줍니다.
    ///
    /// 블로킹 호출입니다. 읽기마다 취소 여부를 확인하며, 출력 대상 실패나
    /// 장치 I/O 에러는 작업을 `Error` 상태로 만듭니다.
    pub fn finish_transfer(&self, sink: &mut dyn DocumentSink) -> Result<u64, EsclError> {
        let started = Instant::now();
        let mut buf = vec![0u8; self.transfer_chunk_size];
        let mut total = 0u64;

        loop {
            if self.state() != JobState::Scanning {
                return Err(EsclError::Canceled);
            }
            let read = {
                let mut guard = self.session.lock();
                let Some(session) = guard.as_mut() else {
                    return Err(EsclError::Canceled);
                };
                session.read(&mut buf)
            };
            let n = match read {
                Ok(n) => n,
                Err(e) => {
                    warn!(job = %self.id, error = %e, "device read failed");
                    self.abort_transfer();
                    return Err(e);
                }
            };
            if n == 0 {
                break;
            }
            total += n as u64;
            if let Err(e) = sink.write_chunk(Bytes::copy_from_slice(&buf[..n])) {
                warn!(job = %self.id, error = %e, "client went away during transfer");
                self.abort_transfer();
                return Err(e);
            }
        }

        self.session.lock().take();
        {
            let mut status = self.status.lock();
            if status.state != JobState::Scanning {
                return Err(EsclError::Canceled);
            }
            status.images_completed += 1;
            match self.settings.source {
                InputSource::Platen => {
                    status.terminate(JobState::Finished, JOB_COMPLETED_SUCCESSFULLY);
                }
                InputSource::Feeder => {
                    status.state = JobState::PageReady;
                    status.reason = JOB_SCANNING_AND_TRANSFERRING;
                }
            }
        }

        metrics::counter!(m::PAGES_TRANSFERRED_TOTAL).increment(1);
        metrics::counter!(m::DOCUMENT_BYTES_TOTAL).increment(total);
        metrics::histogram!(m::PAGE_TRANSFER_DURATION_SECONDS)
            .record(started.elapsed().as_secs_f64());
        debug!(job = %self.id, bytes = total, "page transferred");
        Ok(total)
    }

    /// 전송을 중단하고 작업을 `Error`로 만듭니다. 장치 세션을 해제합니다.
    pub fn abort_transfer(&self) {
        {
            let mut status = self.status.lock();
            if !status.state.is_terminal() {
                status.terminate(JobState::Error, ERRORS_DETECTED);
            }
        }
        self.session.lock().take();
    }

    /// 작업을 취소합니다. 이미 종료된 작업이면 `false`.
    pub fn cancel(&self) -> bool {
        {
            let mut status = self.status.lock();
            if status.state.is_terminal() {
                return false;
            }
            status.terminate(JobState::Cancelled, JOB_CANCELED_BY_USER);
        }
        self.session.lock().take();
        debug!(job = %self.id, "job canceled");
        true
    }
}

impl std::fmt::Debug for ScanJob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScanJob")
            .field("id", &self.id)
            .field("uri", &self.uri)
            .field("status", &*self.status.lock())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escl_names_cover_every_state() {
        assert_eq!(JobState::Pending.escl_name(), "Pending");
        assert_eq!(JobState::Scanning.escl_name(), "Processing");
        assert_eq!(JobState::PageReady.escl_name(), "Processing");
        assert_eq!(JobState::Finished.escl_name(), "Completed");
        assert_eq!(JobState::Cancelled.escl_name(), "Canceled");
        assert_eq!(JobState::Error.escl_name(), "Aborted");
    }

    #[test]
    fn only_end_states_are_terminal() {
        assert!(!JobState::Pending.is_terminal());
        assert!(!JobState::Scanning.is_terminal());
        assert!(!JobState::PageReady.is_terminal());
        assert!(JobState::Finished.is_terminal());
        assert!(JobState::Cancelled.is_terminal());
        assert!(JobState::Error.is_terminal());
    }

    #[test]
    fn vec_sink_collects_chunks() {
        let mut sink: Vec<u8> = Vec::new();
        sink.write_chunk(Bytes::from_static(b"ab")).unwrap();
        sink.write_chunk(Bytes::from_static(b"cd")).unwrap();
        assert_eq!(sink, b"abcd");
    }
}
