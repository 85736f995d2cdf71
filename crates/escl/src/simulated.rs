//! 가상 장치 백엔드
//!
//! `[[devices]]` 항목으로 정의한 가상 스캐너를 제공합니다. 각 페이지는
//! 형식 시그니처 뒤에 작은 링 버퍼를 순환하는 바이트가 이어지므로
//! 전송 결과가 결정적입니다. 실행 중에 장치를 연결/해제하여
//! 핫플러그 처리를 시험할 수 있습니다.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use airscan_core::config::DeviceConfig;
use parking_lot::RwLock;
use tracing::debug;

use crate::capabilities::{MIME_JPEG, MIME_PDF, MIME_PNG};
use crate::device::{
    AreaUnit, DeviceBackend, DeviceDescriptor, DeviceOptions, DeviceSession, OptionRange,
    ScanParameters, SourceGeometry,
};
use crate::error::EsclError;

const RING_SIZE: usize = 256;

const PDF_SIGNATURE: &[u8] = b"%PDF-1.4\n";
const JPEG_SIGNATURE: &[u8] = &[0xFF, 0xD8, 0xFF, 0xE0];
const PNG_SIGNATURE: &[u8] = &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];

/// `format` 가상 페이지의 선두 바이트
pub fn page_signature(format: &str) -> &'static [u8] {
    match format {
        MIME_PDF => PDF_SIGNATURE,
        MIME_JPEG => JPEG_SIGNATURE,
        MIME_PNG => PNG_SIGNATURE,
        _ => &[],
    }
}

struct SimulatedDevice {
    config: DeviceConfig,
    sessions_opened: AtomicU64,
}

/// 변경 가능한 가상 장치 집합 위의 [`DeviceBackend`]
pub struct SimulatedBackend {
    devices: RwLock<Vec<Arc<SimulatedDevice>>>,
}

impl SimulatedBackend {
    pub fn new(configs: impl IntoIterator<Item = DeviceConfig>) -> Self {
        let backend = Self {
            devices: RwLock::new(Vec::new()),
        };
        for config in configs {
            backend.attach(config);
        }
        backend
    }

    /// 장치를 추가합니다. 같은 이름의 장치는 교체됩니다.
    pub fn attach(&self, config: DeviceConfig) {
        let mut devices = self.devices.write();
        devices.retain(|d| d.config.name != config.name);
        debug!(device = %config.name, "simulated device attached");
        devices.push(Arc::new(SimulatedDevice {
            config,
            sessions_opened: AtomicU64::new(0),
        }));
    }

    /// 장치를 제거합니다. 연결된 적 없는 장치면 `false`
    pub fn detach(&self, name: &str) -> bool {
        let mut devices = self.devices.write();
        let before = devices.len();
        devices.retain(|d| d.config.name != name);
        let removed = devices.len() != before;
        if removed {
            debug!(device = name, "simulated device detached");
        }
        removed
    }

    /// `name`에서 지금까지 열린 세션 수
    pub fn sessions_opened(&self, name: &str) -> u64 {
        self.find(name)
            .map(|d| d.sessions_opened.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    fn find(&self, name: &str) -> Option<Arc<SimulatedDevice>> {
        self.devices
            .read()
            .iter()
            .find(|d| d.config.name == name)
            .cloned()
    }
}

impl DeviceBackend for SimulatedBackend {
    fn list_devices(&self, local_only: bool) -> Result<Vec<DeviceDescriptor>, EsclError> {
        Ok(self
            .devices
            .read()
            .iter()
            .filter(|d| !(local_only && d.config.network))
            .map(|d| DeviceDescriptor {
                name: d.config.name.clone(),
                vendor: d.config.vendor.clone(),
                model: d.config.model.clone(),
                is_network: d.config.network,
            })
            .collect())
    }

    fn open(&self, name: &str) -> Result<Box<dyn DeviceSession>, EsclError> {
        let device = self
            .find(name)
            .ok_or_else(|| EsclError::Device(format!("no such device: {name}")))?;
        if device.config.fail_open {
            return Err(EsclError::Device(format!("failed to open device {name}")));
        }
        device.sessions_opened.fetch_add(1, Ordering::Relaxed);
        Ok(Box::new(SimulatedSession {
            device,
            selected_source: String::new(),
            parameters: None,
            page: None,
        }))
    }
}

struct SimulatedSession {
    device: Arc<SimulatedDevice>,
    selected_source: String,
    parameters: Option<ScanParameters>,
    page: Option<PageRing>,
}

impl SimulatedSession {
    fn is_feeder(source: &str) -> bool {
        !source.is_empty() && source != "Flatbed"
    }
}

impl DeviceSession for SimulatedSession {
    fn options(&mut self) -> Result<DeviceOptions, EsclError> {
        let config = &self.device.config;
        Ok(DeviceOptions {
            resolution: Some(OptionRange::new(
                f64::from(config.resolution_min),
                f64::from(config.resolution_max),
                f64::from(config.resolution_step),
            )),
            resolution_list: config.resolutions.iter().map(|r| f64::from(*r)).collect(),
            current_resolution: f64::from(config.resolution_min),
            modes: config.modes.clone(),
            sources: config.sources.clone(),
        })
    }

    fn select_source(&mut self, source: &str) -> Result<(), EsclError> {
        if !self.device.config.sources.iter().any(|s| s == source) {
            return Err(EsclError::Device(format!("unknown source '{source}'")));
        }
        self.selected_source = source.to_owned();
        Ok(())
    }

    fn geometry(&mut self) -> Result<Option<SourceGeometry>, EsclError> {
        let config = &self.device.config;
        let x = OptionRange::new(0.0, config.area_width_mm, 0.0);
        let y = OptionRange::new(0.0, config.area_height_mm, 0.0);
        Ok(Some(SourceGeometry {
            tl_x: x,
            tl_y: y,
            br_x: x,
            br_y: y,
            unit: AreaUnit::Millimeter,
            max_bit_depth: Some(config.bit_depth),
        }))
    }

    fn configure(&mut self, parameters: &ScanParameters) -> Result<(), EsclError> {
        let config = &self.device.config;
        if !parameters.source.is_empty() && !config.sources.iter().any(|s| *s == parameters.source)
        {
            return Err(EsclError::Device(format!(
                "unknown source '{}'",
                parameters.source
            )));
        }
        if !config.modes.is_empty() && !config.modes.iter().any(|m| m == parameters.mode.as_str())
        {
            return Err(EsclError::Device(format!(
                "unsupported mode '{}'",
                parameters.mode.as_str()
            )));
        }
        self.parameters = Some(parameters.clone());
        Ok(())
    }

    fn start(&mut self) -> Result<(), EsclError> {
        let parameters = self
            .parameters
            .as_ref()
            .ok_or_else(|| EsclError::Device("session not configured".to_owned()))?;
        let config = &self.device.config;
        if Self::is_feeder(&parameters.source) && parameters.page >= config.feeder_pages {
            return Err(EsclError::NoMoreDocuments);
        }
        let seed = (parameters.page as u8)
            .wrapping_mul(17)
            .wrapping_add(parameters.resolution as u8);
        self.page = Some(PageRing::new(
            page_signature(&parameters.document_format),
            seed,
            config.page_bytes,
        ));
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, EsclError> {
        let config = &self.device.config;
        let page = self
            .page
            .as_mut()
            .ok_or_else(|| EsclError::Device("scan not started".to_owned()))?;
        if config.read_delay_ms > 0 {
            std::thread::sleep(Duration::from_millis(config.read_delay_ms));
        }
        if let Some(limit) = config.fail_after_bytes
            && page.produced >= limit
        {
            return Err(EsclError::Device(format!(
                "I/O error after {} bytes",
                page.produced
            )));
        }
        let mut n = page.fill(buf);
        if let Some(limit) = config.fail_after_bytes {
            n = n.min(limit.saturating_sub(page.produced - n));
        }
        Ok(n)
    }
}

/// 가상 페이지: 시그니처 뒤에 고정 링에서 순환하는 바이트
struct PageRing {
    ring: [u8; RING_SIZE],
    signature: &'static [u8],
    cursor: usize,
    produced: usize,
    len: usize,
}

impl PageRing {
    fn new(signature: &'static [u8], seed: u8, len: usize) -> Self {
        let mut ring = [0u8; RING_SIZE];
        for (i, byte) in ring.iter_mut().enumerate() {
            *byte = (i as u8).wrapping_mul(31).wrapping_add(seed);
        }
        Self {
            ring,
            signature,
            cursor: 0,
            produced: 0,
            len: len.max(signature.len()),
        }
    }

    fn fill(&mut self, buf: &mut [u8]) -> usize {
        let want = buf.len().min(self.len - self.produced);
        for slot in buf.iter_mut().take(want) {
            *slot = match self.signature.get(self.produced) {
                Some(b) => *b,
                None => {
                    let b = self.ring[self.cursor];
                    self.cursor = (self.cursor + 1) % RING_SIZE;
                    b
                }
            };
            self.produced += 1;
        }
        want
    }
}
