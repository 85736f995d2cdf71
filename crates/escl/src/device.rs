//! 장치 드라이버 추상화
//!
//! 엔진은 스캐너 하드웨어와 직접 통신하지 않습니다. 드라이버 계층에서
//! 필요한 모든 것은 두 trait로 표현됩니다:
//!
//! - [`DeviceBackend`]: 장치 열거, 드라이버 세션 열기
//! - [`DeviceSession`]: 열린 장치 하나의 옵션 조회, 스캔 파라미터 설정,
//!   인코딩된 페이지 바이트 읽기
//!
//! ```text
//! ┌─────────┐   open()   ┌───────────────┐
//! │ Scanner │──────────▶│ DeviceBackend │ (trait)
//! └────┬────┘            └───────┬───────┘
//!      │ ScanSession (RAII)      │
//!      ▼                         ▼
//! ┌───────────────┐      ┌──────────────────┐
//! │ DeviceSession │◀─────│ SimulatedBackend │
//! └───────────────┘      └──────────────────┘
//! ```
//!
//! 배타성은 한 단계 위의 [`Scanner::open`](crate::scanner::Scanner::open)이 보장하므로
//! 백엔드는 장치당 세션이 최대 하나라고 가정해도 됩니다.

use crate::error::EsclError;

/// 드라이버 열거가 보고한 장치
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceDescriptor {
    /// 드라이버 수준 장치 이름 (연결되어 있는 동안 고정)
    pub name: String,
    pub vendor: String,
    pub model: String,
    /// 로컬 장치만 공유할 때 네트워크 스캐너는 제외
    pub is_network: bool,
}

impl DeviceDescriptor {
    /// 클라이언트에 광고되는 `vendor model`
    pub fn make_and_model(&self) -> String {
        format!("{} {}", self.vendor, self.model)
    }
}

/// 숫자 옵션 제약 (드라이버 범위)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OptionRange {
    pub min: f64,
    pub max: f64,
    /// 양자화 간격, 0이면 연속
    pub quant: f64,
}

impl OptionRange {
    pub fn new(min: f64, max: f64, quant: f64) -> Self {
        Self { min, max, quant }
    }
}

/// 소스의 스캔 영역 옵션 단위
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AreaUnit {
    Millimeter,
    Pixel,
}

/// 현재 선택된 소스의 스캔 영역 제약
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SourceGeometry {
    pub tl_x: OptionRange,
    pub tl_y: OptionRange,
    pub br_x: OptionRange,
    pub br_y: OptionRange,
    pub unit: AreaUnit,
    /// 최대 비트 깊이 (드라이버가 비트 깊이 옵션을 제공할 때)
    pub max_bit_depth: Option<u32>,
}

/// 발견 시점에 읽는 장치 전체 옵션
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DeviceOptions {
    /// 해상도 제약. 드라이버에 해상도 옵션이 없으면 `None`
    pub resolution: Option<OptionRange>,
    /// 드라이버가 목록으로 제약할 때의 해상도 목록
    pub resolution_list: Vec<f64>,
    /// 현재 해상도 (픽셀 단위 영역 변환용)
    pub current_resolution: f64,
    /// 허용 스캔 모드 (`Gray`, `Color`, ...)
    pub modes: Vec<String>,
    /// 허용 스캔 소스 (`Flatbed`, `ADF Duplex`, ...)
    pub sources: Vec<String>,
}

/// 드라이버 기준 색 모드
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverMode {
    Gray,
    Color,
}

impl DriverMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Gray => "Gray",
            Self::Color => "Color",
        }
    }
}

/// 드라이버 단위 스캔 영역 (반올림 완료)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScanArea {
    pub left: f64,
    pub top: f64,
    pub right: f64,
    pub bottom: f64,
}

/// 세션이 페이지 하나를 읽기 시작하는 데 필요한 값
#[derive(Debug, Clone, PartialEq)]
pub struct ScanParameters {
    /// 드라이버 소스 이름, 비어 있으면 드라이버 기본값
    pub source: String,
    pub mode: DriverMode,
    pub bit_depth: u32,
    pub resolution: u32,
    pub area: ScanArea,
    pub preview: bool,
    /// 드라이버가 페이지를 인코딩할 MIME 타입
    pub document_format: String,
    /// 작업 내 0부터 시작하는 페이지 번호
    pub page: u32,
}

/// 드라이버 진입점
pub trait DeviceBackend: Send + Sync {
    /// 연결된 장치 목록. `local_only`이면 네트워크 스캐너 제외
    fn list_devices(&self, local_only: bool) -> Result<Vec<DeviceDescriptor>, EsclError>;

    /// 이름으로 지정한 장치의 드라이버 세션을 엽니다.
    fn open(&self, name: &str) -> Result<Box<dyn DeviceSession>, EsclError>;
}

/// 열린 드라이버 세션 하나
///
/// 읽기는 블로킹이며, 현재 페이지가 끝나면 `read`가 `Ok(0)`을 돌려줍니다.
pub trait DeviceSession: Send {
    fn options(&mut self) -> Result<DeviceOptions, EsclError>;

    /// [`geometry`](Self::geometry)가 보고할 소스를 선택합니다.
    fn select_source(&mut self, source: &str) -> Result<(), EsclError>;

    /// 선택된 소스의 영역 제약. 드라이버에 없으면 `None`
    fn geometry(&mut self) -> Result<Option<SourceGeometry>, EsclError>;

    fn configure(&mut self, parameters: &ScanParameters) -> Result<(), EsclError>;

    /// 페이지 읽기를 시작합니다. 용지가 없는 급지대는
    /// [`EsclError::NoMoreDocuments`]를 보고합니다.
    fn start(&mut self) -> Result<(), EsclError>;

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, EsclError>;
}
