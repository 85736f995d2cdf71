//! 설정 관리: airscan.toml 파싱 및 런타임 설정
//!
//! [`AirscanConfig`]는 데몬과 프로토콜 엔진이 사용하는 모든 설정을 담는 최상위 구조체입니다.
//!
//! # 설정 로딩 우선순위
//! 1. CLI 인자 (최고 우선)
//! 2. 환경변수 (`AIRSCAN_SERVER_LISTEN_PORT=8090` 형식)
//! 3. 설정 파일 (`airscan.toml`)
//! 4. 기본값 (`Default` 구현)
//!
//! # 사용 예시
//! ```no_run
//! # async fn example() -> Result<(), airscan_core::error::AirscanError> {
//! use airscan_core::config::AirscanConfig;
//!
//! // 파일에서 로드 + 환경변수 오버라이드
//! let config = AirscanConfig::load("airscan.toml").await?;
//!
//! // TOML 문자열에서 직접 파싱
//! let config = AirscanConfig::parse("[server]\nlisten_port = 8091")?;
//! # Ok(())
//! # }
//! ```

use std::collections::HashSet;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{AirscanError, ConfigError};

/// airscan 통합 설정
///
/// `airscan.toml` 파일의 최상위 구조를 나타냅니다.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AirscanConfig {
    /// 일반 설정
    #[serde(default)]
    pub general: GeneralConfig,
    /// HTTP 서버 및 스캐너 공유 설정
    #[serde(default)]
    pub server: ServerConfig,
    /// Prometheus 메트릭 설정
    #[serde(default)]
    pub metrics: MetricsConfig,
    /// 시뮬레이션 장치 목록 (`[[devices]]`)
    #[serde(default)]
    pub devices: Vec<DeviceConfig>,
}

impl AirscanConfig {
    /// TOML 파일에서 설정을 로드하고 환경변수 오버라이드를 적용합니다.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, AirscanError> {
        let mut config = Self::from_file(path).await?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// TOML 파일에서 설정을 로드합니다 (환경변수 오버라이드 없음).
    pub async fn from_file(path: impl AsRef<Path>) -> Result<Self, AirscanError> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                AirscanError::Config(ConfigError::FileNotFound {
                    path: path.display().to_string(),
                })
            } else {
                AirscanError::Io(e)
            }
        })?;
        let config = Self::parse(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// TOML 문자열에서 설정을 파싱합니다.
    pub fn parse(toml_str: &str) -> Result<Self, AirscanError> {
        toml::from_str(toml_str).map_err(|e| {
            AirscanError::Config(ConfigError::ParseFailed {
                reason: e.to_string(),
            })
        })
    }

    /// 환경변수로 설정값을 오버라이드합니다.
    ///
    /// 환경변수 네이밍 규칙: `AIRSCAN_{SECTION}_{FIELD}`
    /// 예: `AIRSCAN_SERVER_CROSS_ORIGIN=*`
    ///
    /// `[[devices]]` 배열은 환경변수로 오버라이드하지 않습니다.
    pub fn apply_env_overrides(&mut self) {
        // General
        override_string(&mut self.general.log_level, "AIRSCAN_GENERAL_LOG_LEVEL");
        override_string(&mut self.general.log_format, "AIRSCAN_GENERAL_LOG_FORMAT");
        override_string(&mut self.general.pid_file, "AIRSCAN_GENERAL_PID_FILE");

        // Server
        override_string(&mut self.server.listen_addr, "AIRSCAN_SERVER_LISTEN_ADDR");
        override_u16(&mut self.server.listen_port, "AIRSCAN_SERVER_LISTEN_PORT");
        override_string(&mut self.server.interface, "AIRSCAN_SERVER_INTERFACE");
        override_string(&mut self.server.access_log, "AIRSCAN_SERVER_ACCESS_LOG");
        override_string(&mut self.server.cross_origin, "AIRSCAN_SERVER_CROSS_ORIGIN");
        override_bool(&mut self.server.hotplug, "AIRSCAN_SERVER_HOTPLUG");
        override_u64(
            &mut self.server.hotplug_poll_interval_secs,
            "AIRSCAN_SERVER_HOTPLUG_POLL_INTERVAL_SECS",
        );
        override_bool(&mut self.server.mdns_announce, "AIRSCAN_SERVER_MDNS_ANNOUNCE");
        override_bool(
            &mut self.server.local_scanners_only,
            "AIRSCAN_SERVER_LOCAL_SCANNERS_ONLY",
        );
        override_u64(
            &mut self.server.job_max_age_secs,
            "AIRSCAN_SERVER_JOB_MAX_AGE_SECS",
        );
        override_u64(
            &mut self.server.purge_interval_secs,
            "AIRSCAN_SERVER_PURGE_INTERVAL_SECS",
        );
        override_usize(
            &mut self.server.transfer_chunk_size,
            "AIRSCAN_SERVER_TRANSFER_CHUNK_SIZE",
        );

        // Metrics
        override_bool(&mut self.metrics.enabled, "AIRSCAN_METRICS_ENABLED");
        override_string(&mut self.metrics.listen_addr, "AIRSCAN_METRICS_LISTEN_ADDR");
        override_u16(&mut self.metrics.port, "AIRSCAN_METRICS_PORT");
        override_string(&mut self.metrics.endpoint, "AIRSCAN_METRICS_ENDPOINT");
    }

    /// 설정값의 유효성을 검증합니다.
    pub fn validate(&self) -> Result<(), AirscanError> {
        // log_level 검증
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.general.log_level.as_str()) {
            return Err(invalid(
                "general.log_level",
                format!("must be one of: {}", valid_levels.join(", ")),
            ));
        }

        // log_format 검증
        let valid_formats = ["json", "pretty"];
        if !valid_formats.contains(&self.general.log_format.as_str()) {
            return Err(invalid(
                "general.log_format",
                format!("must be one of: {}", valid_formats.join(", ")),
            ));
        }

        if self.server.listen_port == 0 {
            return Err(invalid("server.listen_port", "must be greater than 0"));
        }
        if self.server.listen_addr.parse::<std::net::IpAddr>().is_err() {
            return Err(invalid(
                "server.listen_addr",
                format!("'{}' is not an IP address", self.server.listen_addr),
            ));
        }
        if self.server.hotplug && self.server.hotplug_poll_interval_secs == 0 {
            return Err(invalid(
                "server.hotplug_poll_interval_secs",
                "must be greater than 0 when hotplug is enabled",
            ));
        }
        if self.server.purge_interval_secs == 0 {
            return Err(invalid(
                "server.purge_interval_secs",
                "must be greater than 0",
            ));
        }
        if self.server.transfer_chunk_size == 0 {
            return Err(invalid(
                "server.transfer_chunk_size",
                "must be greater than 0",
            ));
        }

        if self.metrics.enabled && self.metrics.port == 0 {
            return Err(invalid("metrics.port", "must be greater than 0"));
        }

        let mut names = HashSet::new();
        for (index, device) in self.devices.iter().enumerate() {
            device.validate(index)?;
            if !names.insert(device.name.as_str()) {
                return Err(invalid(
                    &format!("devices[{index}].name"),
                    format!("duplicate device name '{}'", device.name),
                ));
            }
        }

        Ok(())
    }
}

/// 일반 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// 로그 레벨 (trace, debug, info, warn, error)
    pub log_level: String,
    /// 로그 형식 (json, pretty)
    pub log_format: String,
    /// PID 파일 경로 (빈 문자열이면 생성하지 않음)
    pub pid_file: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_owned(),
            log_format: "json".to_owned(),
            pid_file: String::new(),
        }
    }
}

/// HTTP 서버 및 스캐너 공유 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// HTTP 수신 주소
    pub listen_addr: String,
    /// HTTP 수신 포트
    pub listen_port: u16,
    /// mDNS 광고를 제한할 네트워크 인터페이스 (빈 문자열이면 전체)
    pub interface: String,
    /// 접근 로그 대상 ("" 비활성, "-" 표준출력, 그 외 파일 경로)
    pub access_log: String,
    /// `Access-Control-Allow-Origin` 응답 헤더 값
    pub cross_origin: String,
    /// 장치 연결/해제 감지 시 재로딩 여부
    pub hotplug: bool,
    /// 핫플러그 폴링 주기 (초)
    pub hotplug_poll_interval_secs: u64,
    /// mDNS/DNS-SD 광고 여부
    pub mdns_announce: bool,
    /// 로컬 장치만 공유 (네트워크 스캐너 제외)
    pub local_scanners_only: bool,
    /// 종료된 작업 보존 시간 (초)
    pub job_max_age_secs: u64,
    /// 작업 정리 주기 (초)
    pub purge_interval_secs: u64,
    /// 문서 전송 청크 크기 (바이트)
    pub transfer_chunk_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0".to_owned(),
            listen_port: 8090,
            interface: String::new(),
            access_log: String::new(),
            cross_origin: String::new(),
            hotplug: true,
            hotplug_poll_interval_secs: 5,
            mdns_announce: true,
            local_scanners_only: true,
            job_max_age_secs: 300,
            purge_interval_secs: 30,
            transfer_chunk_size: 64 * 1024, // 64KB
        }
    }
}

/// Prometheus 메트릭 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// 활성화 여부
    pub enabled: bool,
    /// 메트릭 수신 주소
    pub listen_addr: String,
    /// 메트릭 수신 포트
    pub port: u16,
    /// 스크레이프 경로
    pub endpoint: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            listen_addr: "127.0.0.1".to_owned(),
            port: 9102,
            endpoint: "/metrics".to_owned(),
        }
    }
}

/// 시뮬레이션 스캐너 장치 정의
///
/// 드라이버 계층 대신 합성 페이지 데이터를 돌려주는 가상 장치를 기술합니다.
/// 필드 이름은 드라이버 옵션(해상도, 모드, 소스, 스캔 영역)을 따릅니다.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// 드라이버 장치 이름 (UUID 생성에 사용)
    pub name: String,
    /// 제조사
    pub vendor: String,
    /// 모델명
    pub model: String,
    /// 네트워크 장치 여부 (`local_scanners_only`일 때 제외)
    pub network: bool,
    /// 최소 해상도 (dpi)
    pub resolution_min: u32,
    /// 최대 해상도 (dpi)
    pub resolution_max: u32,
    /// 해상도 간격 (dpi)
    pub resolution_step: u32,
    /// 이산 해상도 목록 (비어 있으면 범위에서 계산)
    pub resolutions: Vec<u32>,
    /// 드라이버 스캔 모드 (Gray, Color)
    pub modes: Vec<String>,
    /// 드라이버 스캔 소스 (Flatbed, ADF, ADF Duplex ...)
    pub sources: Vec<String>,
    /// 최대 비트 깊이 (8 또는 16)
    pub bit_depth: u32,
    /// 스캔 영역 너비 (mm)
    pub area_width_mm: f64,
    /// 스캔 영역 높이 (mm)
    pub area_height_mm: f64,
    /// 급지대 1회 적재 매수
    pub feeder_pages: u32,
    /// 페이지당 합성 데이터 크기 (바이트)
    pub page_bytes: usize,
    /// 읽기 1회당 지연 (밀리초)
    pub read_delay_ms: u64,
    /// 장치 열기 실패 주입
    pub fail_open: bool,
    /// 지정 바이트 이후 읽기 실패 주입
    pub fail_after_bytes: Option<usize>,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            name: "sim:flatbed".to_owned(),
            vendor: "Virtual".to_owned(),
            model: "Flatbed Scanner".to_owned(),
            network: false,
            resolution_min: 75,
            resolution_max: 1200,
            resolution_step: 1,
            resolutions: Vec::new(),
            modes: vec!["Gray".to_owned(), "Color".to_owned()],
            sources: vec!["Flatbed".to_owned()],
            bit_depth: 8,
            area_width_mm: 215.9,
            area_height_mm: 297.0,
            feeder_pages: 3,
            page_bytes: 256 * 1024, // 256KB
            read_delay_ms: 0,
            fail_open: false,
            fail_after_bytes: None,
        }
    }
}

impl DeviceConfig {
    fn validate(&self, index: usize) -> Result<(), AirscanError> {
        let field = |name: &str| format!("devices[{index}].{name}");

        if self.name.is_empty() {
            return Err(invalid(&field("name"), "must not be empty"));
        }
        if self.resolution_min == 0 || self.resolution_min > self.resolution_max {
            return Err(invalid(
                &field("resolution_min"),
                format!(
                    "must be in 1..={} (resolution_max)",
                    self.resolution_max
                ),
            ));
        }
        if self.resolution_step == 0 {
            return Err(invalid(&field("resolution_step"), "must be greater than 0"));
        }
        if self.bit_depth != 8 && self.bit_depth != 16 {
            return Err(invalid(&field("bit_depth"), "must be 8 or 16"));
        }
        if self.area_width_mm <= 0.0 || self.area_height_mm <= 0.0 {
            return Err(invalid(&field("area_width_mm"), "scan area must be positive"));
        }
        if self.page_bytes == 0 {
            return Err(invalid(&field("page_bytes"), "must be greater than 0"));
        }
        Ok(())
    }
}

fn invalid(field: &str, reason: impl Into<String>) -> AirscanError {
    ConfigError::InvalidValue {
        field: field.to_owned(),
        reason: reason.into(),
    }
    .into()
}

// --- 환경변수 오버라이드 헬퍼 ---

fn override_string(target: &mut String, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        *target = val;
    }
}

fn override_bool(target: &mut bool, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        match val.parse::<bool>() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(
                env_key,
                value = val.as_str(),
                "failed to parse bool from env var, ignoring"
            ),
        }
    }
}

fn override_usize(target: &mut usize, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        match val.parse::<usize>() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(
                env_key,
                value = val.as_str(),
                "failed to parse usize from env var, ignoring"
            ),
        }
    }
}

fn override_u16(target: &mut u16, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        match val.parse::<u16>() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(
                env_key,
                value = val.as_str(),
                "failed to parse u16 from env var, ignoring"
            ),
        }
    }
}

fn override_u64(target: &mut u64, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        match val.parse::<u64>() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(
                env_key,
                value = val.as_str(),
                "failed to parse u64 from env var, ignoring"
            ),
        }
    }
}
