//! 스캐너 리소스 어댑터
//!
//! [`Scanner`]는 백엔드가 보고한 장치 하나를 감쌉니다: 식별자(uuid, uri),
//! 발견 시점에 한 번 계산한 능력, 배타적 장치 세션,
//! 그리고 이 스캐너에서 만든 스캔 작업 모음.
//!
//! 잠금 순서: `jobs` 다음에 작업 내부 잠금. 작업은 스캐너의 작업 맵 잠금을
//! 잡지 않습니다.

use std::collections::BTreeMap;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use airscan_core::metrics as m;
use parking_lot::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::capabilities::Capabilities;
use crate::device::{DeviceBackend, DeviceDescriptor, DeviceSession};
use crate::document;
use crate::error::EsclError;
use crate::job::ScanJob;
use crate::settings::{JobSettings, ScanSettings};

/// 이름 기반 스캐너 uuid 네임스페이스
const SCANNER_UUID_NAMESPACE: Uuid = Uuid::from_u128(0x5c1a_7e0e_4d3b_4f8a_9a52_0e1f_a1c3_b7d2);

/// 장치의 고정 uuid: 같은 제조사/모델과 드라이버 이름은 재로딩과
/// 재시작에 관계없이 항상 같은 uuid가 됩니다.
pub fn scanner_uuid(make_and_model: &str, device_name: &str) -> Uuid {
    let key = format!("{make_and_model}\n{device_name}");
    Uuid::new_v5(&SCANNER_UUID_NAMESPACE, key.as_bytes())
}

/// 드롭 시 배타 플래그 해제
struct SessionGuard(Arc<AtomicBool>);

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// 배타적 장치 세션. 드롭하면 장치를 닫고 다음
/// [`Scanner::open`]을 위해 스캐너를 풀어 줍니다.
pub struct ScanSession {
    // 선언 순서: 가드 해제 전에 장치가 닫힘
    device: Box<dyn DeviceSession>,
    _guard: SessionGuard,
}

impl Deref for ScanSession {
    type Target = dyn DeviceSession;

    fn deref(&self) -> &Self::Target {
        self.device.as_ref()
    }
}

impl DerefMut for ScanSession {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.device.as_mut()
    }
}

/// 공유 스캐너 하나
pub struct Scanner {
    descriptor: DeviceDescriptor,
    make_and_model: String,
    uuid: Uuid,
    uri: String,
    capabilities: Option<Capabilities>,
    error: Option<String>,
    backend: Arc<dyn DeviceBackend>,
    session_held: Arc<AtomicBool>,
    jobs: Mutex<BTreeMap<String, Arc<ScanJob>>>,
    transfer_chunk_size: usize,
}

impl Scanner {
    /// 장치를 한 번 열어 능력을 계산합니다.
    ///
    /// 열거나 계산할 수 없는 장치도 에러를 담은 채로 돌려주며,
    /// 능력 조회와 작업 요청에 503으로 응답합니다.
    pub fn discover(
        backend: Arc<dyn DeviceBackend>,
        descriptor: DeviceDescriptor,
        transfer_chunk_size: usize,
    ) -> Arc<Self> {
        let make_and_model = descriptor.make_and_model();
        let uuid = scanner_uuid(&make_and_model, &descriptor.name);
        let mut scanner = Self {
            uri: format!("/{uuid}"),
            make_and_model,
            uuid,
            descriptor,
            capabilities: None,
            error: None,
            backend,
            session_held: Arc::new(AtomicBool::new(false)),
            jobs: Mutex::new(BTreeMap::new()),
            transfer_chunk_size,
        };

        let probed = scanner
            .open()
            .and_then(|mut session| Capabilities::probe(&mut *session));
        match probed {
            Ok(caps) => {
                info!(
                    device = %scanner.descriptor.name,
                    uri = %scanner.uri,
                    platen = caps.has_platen(),
                    adf = caps.has_adf(),
                    duplex = caps.has_duplex_adf(),
                    "scanner discovered"
                );
                scanner.capabilities = Some(caps);
            }
            Err(e) => {
                warn!(device = %scanner.descriptor.name, error = %e, "scanner initialization failed");
                scanner.error = Some(e.to_string());
            }
        }
        Arc::new(scanner)
    }

    pub fn descriptor(&self) -> &DeviceDescriptor {
        &self.descriptor
    }

    pub fn device_name(&self) -> &str {
        &self.descriptor.name
    }

    pub fn make_and_model(&self) -> &str {
        &self.make_and_model
    }

    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    /// `/` 뒤에 uuid
    pub fn uri(&self) -> &str {
        &self.uri
    }

    /// 발견 실패 시 초기화 에러
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// 계산된 능력. 초기화에 실패했으면 [`EsclError::Device`]
    pub fn capabilities(&self) -> Result<&Capabilities, EsclError> {
        self.capabilities.as_ref().ok_or_else(|| {
            EsclError::Device(
                self.error
                    .clone()
                    .unwrap_or_else(|| "scanner not initialized".to_owned()),
            )
        })
    }

    /// 배타적 장치 세션을 획득합니다.
    pub fn open(&self) -> Result<ScanSession, EsclError> {
        if self
            .session_held
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            metrics::counter!(m::SCANNER_BUSY_REJECTIONS_TOTAL).increment(1);
            return Err(EsclError::DeviceBusy(self.descriptor.name.clone()));
        }
        let guard = SessionGuard(Arc::clone(&self.session_held));
        let device = self.backend.open(&self.descriptor.name)?;
        Ok(ScanSession {
            device,
            _guard: guard,
        })
    }

    pub fn is_open(&self) -> bool {
        self.session_held.load(Ordering::Acquire)
    }

    /// 세션이 열려 있으면 `Processing`, 아니면 `Idle`
    pub fn status(&self) -> &'static str {
        if self.is_open() { "Processing" } else { "Idle" }
    }

    /// 설정 문서를 파싱/검증하고 새 `Pending` 작업을 등록합니다.
    /// 에러 시에는 아무것도 등록하지 않습니다.
    pub fn create_job_from_settings(
        self: &Arc<Self>,
        xml: &str,
        autoselect_format: bool,
    ) -> Result<Arc<ScanJob>, EsclError> {
        let caps = self.capabilities()?;
        let settings = ScanSettings::parse(xml)
            .and_then(|settings| JobSettings::resolve(&settings, caps, autoselect_format));
        let settings = match settings {
            Ok(settings) => settings,
            Err(e) => {
                metrics::counter!(m::JOBS_REJECTED_TOTAL).increment(1);
                debug!(scanner = %self.uri, error = %e, "scan settings rejected");
                return Err(e);
            }
        };

        let mut jobs = self.jobs.lock();
        let id = loop {
            let candidate = Uuid::new_v4().to_string();
            if !jobs.contains_key(&candidate) {
                break candidate;
            }
        };
        let job = Arc::new(ScanJob::new(
            id.clone(),
            &self.uri,
            Arc::downgrade(self),
            settings,
            self.transfer_chunk_size,
        ));
        jobs.insert(id, Arc::clone(&job));
        drop(jobs);

        metrics::counter!(m::JOBS_CREATED_TOTAL).increment(1);
        info!(
            job = %job.uri(),
            format = %job.document_format(),
            resolution = job.settings().resolution,
            mode = %job.settings().color_mode(),
            "scan job created"
        );
        Ok(job)
    }

    pub fn job(&self, id: &str) -> Option<Arc<ScanJob>> {
        self.jobs.lock().get(id).cloned()
    }

    pub fn jobs(&self) -> Vec<Arc<ScanJob>> {
        self.jobs.lock().values().cloned().collect()
    }

    /// 작업을 취소합니다. 없거나 이미 끝났으면 `false`
    pub fn cancel_job(&self, id: &str) -> bool {
        let jobs = self.jobs.lock();
        jobs.get(id).is_some_and(|job| job.cancel())
    }

    /// 끝난 지 `max_age` 이상 지난 작업을 제거합니다.
    pub fn purge_jobs(&self, max_age: Duration) -> usize {
        let mut jobs = self.jobs.lock();
        let before = jobs.len();
        jobs.retain(|_, job| !job.is_expired(max_age));
        let purged = before - jobs.len();
        if purged > 0 {
            metrics::counter!(m::JOBS_PURGED_TOTAL).increment(purged as u64);
            debug!(scanner = %self.uri, purged, "purged finished jobs");
        }
        purged
    }

    /// 모든 작업을 취소하고 버립니다.
    pub fn cancel_all(&self) {
        let jobs = std::mem::take(&mut *self.jobs.lock());
        for job in jobs.values() {
            job.cancel();
        }
    }

    pub fn status_document(&self) -> String {
        let jobs = self.jobs.lock();
        let infos: Vec<_> = jobs.values().map(|job| job.info()).collect();
        drop(jobs);
        document::scanner_status(self.status(), &infos)
    }

    pub fn capabilities_document(&self) -> Result<String, EsclError> {
        let caps = self.capabilities()?;
        Ok(document::scanner_capabilities(
            &self.make_and_model,
            &self.uuid.to_string(),
            caps,
        ))
    }
}

impl std::fmt::Debug for Scanner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scanner")
            .field("name", &self.descriptor.name)
            .field("uri", &self.uri)
            .field("error", &self.error)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulated::SimulatedBackend;
    use airscan_core::config::DeviceConfig;

    fn scanner(config: DeviceConfig) -> Arc<Scanner> {
        let backend = Arc::new(SimulatedBackend::new([config]));
        let descriptor = backend.list_devices(false).unwrap().remove(0);
        Scanner::discover(backend, descriptor, 4096)
    }

    #[test]
    fn uuid_is_stable_for_the_same_device() {
        let a = scanner_uuid("Virtual Flatbed", "sim:flatbed");
        let b = scanner_uuid("Virtual Flatbed", "sim:flatbed");
        let c = scanner_uuid("Virtual Flatbed", "sim:other");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn uri_is_slash_uuid() {
        let scanner = scanner(DeviceConfig::default());
        assert_eq!(scanner.uri(), format!("/{}", scanner.uuid()));
        assert_eq!(scanner.make_and_model(), "Virtual Flatbed Scanner");
    }

    #[test]
    fn second_open_is_busy_until_first_session_drops() {
        let scanner = scanner(DeviceConfig::default());
        let first = scanner.open().unwrap();
        assert_eq!(scanner.status(), "Processing");
        assert!(matches!(scanner.open(), Err(EsclError::DeviceBusy(_))));

        drop(first);
        assert_eq!(scanner.status(), "Idle");
        assert!(scanner.open().is_ok());
    }

    #[test]
    fn failed_device_is_listed_with_error() {
        let scanner = scanner(DeviceConfig {
            fail_open: true,
            ..DeviceConfig::default()
        });
        assert!(scanner.error().is_some());
        assert!(!scanner.is_open());
        assert!(matches!(
            scanner.capabilities_document(),
            Err(EsclError::Device(_))
        ));
    }

    #[test]
    fn failed_open_releases_exclusivity() {
        let scanner = scanner(DeviceConfig {
            fail_open: true,
            ..DeviceConfig::default()
        });
        assert!(matches!(scanner.open(), Err(EsclError::Device(_))));
        assert!(!scanner.is_open());
    }

    #[test]
    fn invalid_settings_create_no_job() {
        let scanner = scanner(DeviceConfig::default());
        let err = scanner
            .create_job_from_settings("<scan:ScanSettings/>", false)
            .unwrap_err();
        assert_eq!(err.status_code(), 400);
        assert!(scanner.jobs().is_empty());
    }
}
