//! 스캐너 레지스트리
//!
//! 백엔드가 보고한 장치로 [`Scanner`] 집합을 만들고, 건강한 스캐너마다
//! mDNS 서비스를 광고합니다. 토폴로지가 바뀌면 레지스트리를 통째로
//! [`shutdown`](ScannerRegistry::shutdown)하고 새로 [`enumerate`](ScannerRegistry::enumerate)합니다.
//!
//! ```text
//! DeviceBackend ──list_devices──▶ Scanner::discover ──▶ ScannerRegistry
//!                                                         │
//!                                       ServicePublisher ◀┘ publish(ServiceDescription)
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use airscan_core::metrics as m;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::capabilities::Capabilities;
use crate::device::DeviceBackend;
use crate::document::{self, ServerDevice};
use crate::error::EsclError;
use crate::job::ScanJob;
use crate::scanner::Scanner;

/// eSCL DNS-SD 서비스 타입
pub const SERVICE_TYPE: &str = "_uscan._tcp.";

// ─── 서비스 광고 ───────────────────────────────────────────────────

/// 광고할 서비스 하나
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceDescription {
    pub service_type: String,
    pub instance_name: String,
    /// TXT 레코드 (순서 유지)
    pub txt: Vec<(String, String)>,
}

impl ServiceDescription {
    /// 스캐너 능력으로 eSCL TXT 레코드를 만듭니다. 빈 목록은 생략합니다.
    pub fn for_scanner(scanner: &Scanner, caps: &Capabilities) -> Self {
        let mut txt = vec![
            ("txtvers".to_owned(), "1".to_owned()),
            ("vers".to_owned(), "2.0".to_owned()),
        ];
        push_list(
            &mut txt,
            "pdl",
            caps.document_formats.iter().map(String::as_str).collect(),
        );
        txt.push(("ty".to_owned(), scanner.make_and_model().to_owned()));
        txt.push(("uuid".to_owned(), scanner.uuid().to_string()));
        txt.push((
            "rs".to_owned(),
            scanner.uri().trim_start_matches('/').to_owned(),
        ));
        push_list(
            &mut txt,
            "cs",
            caps.color_spaces.iter().map(|cs| cs.as_str()).collect(),
        );
        let mut sources = Vec::new();
        if caps.has_platen() {
            sources.push("platen");
        }
        if caps.has_adf() {
            sources.push("adf");
        }
        push_list(&mut txt, "is", sources);
        txt.push((
            "duplex".to_owned(),
            if caps.has_duplex_adf() { "T" } else { "F" }.to_owned(),
        ));

        Self {
            service_type: SERVICE_TYPE.to_owned(),
            instance_name: scanner.make_and_model().to_owned(),
            txt,
        }
    }
}

fn push_list(txt: &mut Vec<(String, String)>, key: &str, values: Vec<&str>) {
    if !values.is_empty() {
        txt.push((key.to_owned(), values.join(",")));
    }
}

/// 광고 핸들. 철회하면 서비스가 네트워크에서 사라집니다.
pub trait Announcement: Send {
    /// 실제로 광고된 서비스 인스턴스 이름
    fn name(&self) -> &str;

    fn withdraw(&mut self);
}

/// mDNS/DNS-SD 광고자
pub trait ServicePublisher: Send + Sync {
    fn publish(&self, service: &ServiceDescription) -> Result<Box<dyn Announcement>, EsclError>;
}

// ─── 레지스트리 ────────────────────────────────────────────────────

/// 열거 옵션
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegistryOptions {
    /// 네트워크 스캐너 제외
    pub local_only: bool,
    /// 전송 청크 크기 (바이트)
    pub transfer_chunk_size: usize,
}

impl Default for RegistryOptions {
    fn default() -> Self {
        Self {
            local_only: true,
            transfer_chunk_size: 64 * 1024,
        }
    }
}

struct RegistryEntry {
    scanner: Arc<Scanner>,
    announcement: Mutex<Option<Box<dyn Announcement>>>,
}

/// 공유 중인 스캐너 집합 (uri 기준)
#[derive(Default)]
pub struct ScannerRegistry {
    entries: BTreeMap<String, RegistryEntry>,
}

impl ScannerRegistry {
    /// 장치를 열거하고 스캐너를 만듭니다.
    ///
    /// 열거 실패는 빈 레지스트리로, 광고 실패는 광고 없는 스캐너로 이어집니다.
    pub fn enumerate(
        backend: Arc<dyn DeviceBackend>,
        publisher: Option<&dyn ServicePublisher>,
        options: &RegistryOptions,
    ) -> Self {
        let descriptors = match backend.list_devices(options.local_only) {
            Ok(descriptors) => descriptors,
            Err(e) => {
                warn!(error = %e, "device enumeration failed");
                Vec::new()
            }
        };

        let mut entries: BTreeMap<String, RegistryEntry> = BTreeMap::new();
        for descriptor in descriptors {
            let scanner = Scanner::discover(
                Arc::clone(&backend),
                descriptor,
                options.transfer_chunk_size,
            );
            if entries.contains_key(scanner.uri()) {
                warn!(
                    device = %scanner.device_name(),
                    uri = %scanner.uri(),
                    "duplicate scanner uri, skipping device"
                );
                continue;
            }

            let mut announcement = None;
            if let (Some(publisher), Ok(caps)) = (publisher, scanner.capabilities()) {
                let service = ServiceDescription::for_scanner(&scanner, caps);
                match publisher.publish(&service) {
                    Ok(handle) => {
                        info!(name = %handle.name(), uri = %scanner.uri(), "scanner announced");
                        announcement = Some(handle);
                    }
                    Err(e) => {
                        warn!(device = %scanner.device_name(), error = %e, "announcement failed");
                    }
                }
            }

            entries.insert(
                scanner.uri().to_owned(),
                RegistryEntry {
                    scanner,
                    announcement: Mutex::new(announcement),
                },
            );
        }

        metrics::gauge!(m::SCANNERS_AVAILABLE).set(entries.len() as f64);
        info!(count = entries.len(), "scanner registry built");
        Self { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn scanners(&self) -> impl Iterator<Item = &Arc<Scanner>> {
        self.entries.values().map(|entry| &entry.scanner)
    }

    /// 경로가 스캐너 uri로 시작하는 스캐너 (세그먼트 경계에서만 일치)
    pub fn find_by_uri_prefix(&self, path: &str) -> Option<&Arc<Scanner>> {
        self.entries.values().map(|e| &e.scanner).find(|scanner| {
            path.strip_prefix(scanner.uri())
                .is_some_and(|rest| rest.is_empty() || rest.starts_with('/'))
        })
    }

    pub fn find_job(&self, scanner: &Scanner, job_id: &str) -> Option<Arc<ScanJob>> {
        self.entries
            .get(scanner.uri())
            .and_then(|entry| entry.scanner.job(job_id))
    }

    /// 모든 스캐너에서 오래된 종료 작업을 정리합니다.
    pub fn purge_all(&self, max_age: Duration) -> usize {
        self.scanners()
            .map(|scanner| scanner.purge_jobs(max_age))
            .sum()
    }

    /// 광고를 철회하고 모든 작업을 취소합니다.
    pub fn shutdown(&self) {
        for entry in self.entries.values() {
            if let Some(mut announcement) = entry.announcement.lock().take() {
                debug!(name = %announcement.name(), "withdrawing announcement");
                announcement.withdraw();
            }
            entry.scanner.cancel_all();
        }
        metrics::gauge!(m::SCANNERS_AVAILABLE).set(0.0);
        info!(count = self.entries.len(), "scanner registry shut down");
    }

    /// `airsane:Server` 기술자
    pub fn server_document(&self) -> String {
        let devices: Vec<ServerDevice> = self
            .entries
            .values()
            .map(|entry| ServerDevice {
                make_and_model: entry.scanner.make_and_model().to_owned(),
                uuid: entry.scanner.uuid().to_string(),
                uri: entry.scanner.uri().to_owned(),
                name: entry
                    .announcement
                    .lock()
                    .as_ref()
                    .map(|a| a.name().to_owned()),
            })
            .collect();
        document::server_descriptor(&devices)
    }
}
