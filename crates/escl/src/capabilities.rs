//! 스캐너 능력: 발견 시점에 드라이버 옵션에서 한 번 계산되는 읽기 전용 정보
//!
//! 드라이버 옵션을 eSCL 용어로 옮깁니다:
//! - 스캔 모드 `Gray`/`Color` → 색 공간 `grayscale`/`color`, 색 모드 `Grayscale8`/`RGB24`
//! - 소스 이름 → 평판(Platen) / 급지대(ADF, 단면 또는 양면)
//! - 스캔 영역 → 300dpi 기준 픽셀
//! - 연속 해상도 범위 → 이산 해상도 목록 (일부 클라이언트는 이산 목록만 이해함)

use crate::device::{AreaUnit, DeviceSession, DriverMode, SourceGeometry};
use crate::error::EsclError;

pub const MIME_PDF: &str = "application/pdf";
pub const MIME_JPEG: &str = "image/jpeg";
pub const MIME_PNG: &str = "image/png";

/// 모든 스캐너가 제공하는 문서 형식
pub const DOCUMENT_FORMATS: [&str; 3] = [MIME_PDF, MIME_JPEG, MIME_PNG];

/// 모든 스캐너가 제공하는 스캔 의도
pub const SUPPORTED_INTENTS: [&str; 3] = ["Preview", "TextAndGraphic", "Photo"];

/// eSCL 길이 단위: 1/300 인치
pub const ESCL_UNITS_PER_INCH: f64 = 300.0;

const MM_PER_INCH: f64 = 25.4;

/// eSCL 색 공간
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColorSpace {
    Grayscale,
    Color,
}

impl ColorSpace {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Grayscale => "grayscale",
            Self::Color => "color",
        }
    }

    /// 비트 깊이(채널당)에 대응하는 eSCL 색 모드 이름
    pub fn color_mode(self, bit_depth: u32) -> String {
        match self {
            Self::Grayscale => format!("Grayscale{bit_depth}"),
            Self::Color => format!("RGB{}", 3 * bit_depth),
        }
    }

    pub fn driver_mode(self) -> DriverMode {
        match self {
            Self::Grayscale => DriverMode::Gray,
            Self::Color => DriverMode::Color,
        }
    }
}

/// eSCL 입력 소스
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputSource {
    Platen,
    Feeder,
}

impl InputSource {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Platen => "Platen",
            Self::Feeder => "Feeder",
        }
    }
}

/// 입력 소스 하나의 스캔 영역 능력 (300dpi 기준 픽셀)
#[derive(Debug, Clone, PartialEq)]
pub struct InputCaps {
    /// 드라이버 소스 이름 (빈 문자열이면 드라이버 기본값)
    pub source_name: String,
    pub min_width: u32,
    pub max_width: u32,
    pub min_height: u32,
    pub max_height: u32,
    pub max_physical_width: u32,
    pub max_physical_height: u32,
    pub max_bits: u32,
    /// 드라이버가 스캔 영역에 쓰는 단위
    pub area_unit: AreaUnit,
}

impl InputCaps {
    /// 드라이버 스캔 영역 제약을 300dpi 픽셀로 변환합니다.
    pub fn from_geometry(
        source_name: &str,
        geometry: &SourceGeometry,
        current_resolution: f64,
    ) -> Result<Self, EsclError> {
        let factor = match geometry.unit {
            AreaUnit::Millimeter => ESCL_UNITS_PER_INCH / MM_PER_INCH,
            AreaUnit::Pixel if current_resolution > 0.0 => {
                ESCL_UNITS_PER_INCH / current_resolution
            }
            AreaUnit::Pixel => {
                return Err(EsclError::Device(
                    "pixel scan area without current resolution".to_owned(),
                ));
            }
        };
        let px = |value: f64| round_half_up(value * factor);

        Ok(Self {
            source_name: source_name.to_owned(),
            min_width: px((geometry.br_x.min - geometry.tl_x.max).max(0.0)),
            max_width: px(geometry.br_x.max - geometry.tl_x.min),
            min_height: px((geometry.br_y.min - geometry.tl_y.max).max(0.0)),
            max_height: px(geometry.br_y.max - geometry.tl_y.min),
            max_physical_width: px(geometry.br_x.max),
            max_physical_height: px(geometry.br_y.max),
            max_bits: geometry.max_bit_depth.unwrap_or(8),
            area_unit: geometry.unit,
        })
    }
}

/// 스캐너 능력 집합
#[derive(Debug, Clone, PartialEq)]
pub struct Capabilities {
    pub document_formats: Vec<String>,
    pub intents: Vec<String>,
    pub color_spaces: Vec<ColorSpace>,
    pub color_modes: Vec<String>,
    pub min_resolution: u32,
    pub max_resolution: u32,
    pub resolution_step: u32,
    pub discrete_resolutions: Vec<u32>,
    pub max_bits: u32,
    pub platen: Option<InputCaps>,
    pub adf: Option<InputCaps>,
    pub duplex: bool,
    pub max_width: u32,
    pub max_height: u32,
}

impl Capabilities {
    /// 열린 드라이버 세션에서 능력을 조사합니다.
    ///
    /// 해상도 옵션이나 스캔 영역 옵션이 없으면 에러를 돌려주며,
    /// 호출자는 이 에러를 스캐너의 초기화 에러로 기록합니다.
    pub fn probe(session: &mut dyn DeviceSession) -> Result<Self, EsclError> {
        let options = session.options()?;

        let resolution = options
            .resolution
            .ok_or_else(|| EsclError::Device("missing resolution option".to_owned()))?;
        let min_resolution = resolution.min.max(1.0) as u32;
        let max_resolution = resolution.max as u32;
        let resolution_step = (resolution.quant as u32).max(1);

        let mut discrete_resolutions: Vec<u32> = options
            .resolution_list
            .iter()
            .map(|r| round_half_up(*r))
            .collect();
        if discrete_resolutions.is_empty() {
            discrete_resolutions =
                discretize_resolutions(min_resolution, max_resolution, resolution_step);
        }

        let mut modes = options.modes.clone();
        if modes.is_empty() {
            modes = vec![
                DriverMode::Gray.as_str().to_owned(),
                DriverMode::Color.as_str().to_owned(),
            ];
        }
        let mut color_spaces = Vec::new();
        if modes.iter().any(|m| m == DriverMode::Gray.as_str()) {
            color_spaces.push(ColorSpace::Grayscale);
        }
        if modes.iter().any(|m| m == DriverMode::Color.as_str()) {
            color_spaces.push(ColorSpace::Color);
        }

        let adf_duplex = find_adf_duplex(&options.sources);
        let adf_name = adf_duplex.or_else(|| find_adf_simplex(&options.sources));
        let flatbed_name = match (find_flatbed(&options.sources), adf_name) {
            (Some(name), _) => Some(name),
            // 소스 옵션이 없으면 드라이버 기본 소스를 평판으로 간주
            (None, None) => Some(""),
            (None, Some(_)) => None,
        };

        let mut platen = None;
        if let Some(name) = flatbed_name {
            platen = Some(probe_source(session, name, options.current_resolution)?);
        }
        let mut adf = None;
        if let Some(name) = adf_name {
            adf = Some(probe_source(session, name, options.current_resolution)?);
        }

        let max_bits = [&platen, &adf]
            .into_iter()
            .flatten()
            .map(|caps| caps.max_bits)
            .fold(8, u32::max);
        let max_width = [&platen, &adf]
            .into_iter()
            .flatten()
            .map(|caps| caps.max_width)
            .fold(0, u32::max);
        let max_height = [&platen, &adf]
            .into_iter()
            .flatten()
            .map(|caps| caps.max_height)
            .fold(0, u32::max);

        let mut color_modes: Vec<String> = color_spaces.iter().map(|cs| cs.color_mode(8)).collect();
        if max_bits >= 16 {
            color_modes.extend(color_spaces.iter().map(|cs| cs.color_mode(16)));
        }

        Ok(Self {
            document_formats: DOCUMENT_FORMATS.iter().map(|f| (*f).to_owned()).collect(),
            intents: SUPPORTED_INTENTS.iter().map(|i| (*i).to_owned()).collect(),
            color_spaces,
            color_modes,
            min_resolution,
            max_resolution,
            resolution_step,
            discrete_resolutions,
            max_bits,
            platen,
            adf,
            duplex: adf_duplex.is_some(),
            max_width,
            max_height,
        })
    }

    pub fn has_platen(&self) -> bool {
        self.platen.is_some()
    }

    pub fn has_adf(&self) -> bool {
        self.adf.is_some()
    }

    pub fn has_duplex_adf(&self) -> bool {
        self.adf.is_some() && self.duplex
    }

    /// eSCL 입력 소스에 대응하는 능력
    pub fn input(&self, source: InputSource) -> Option<&InputCaps> {
        match source {
            InputSource::Platen => self.platen.as_ref(),
            InputSource::Feeder => self.adf.as_ref(),
        }
    }

    /// 요청이 소스를 지정하지 않았을 때 사용할 소스
    pub fn default_source(&self) -> InputSource {
        if self.has_platen() {
            InputSource::Platen
        } else {
            InputSource::Feeder
        }
    }

    pub fn supports_format(&self, format: &str) -> bool {
        self.document_formats.iter().any(|f| f == format)
    }
}

fn probe_source(
    session: &mut dyn DeviceSession,
    name: &str,
    current_resolution: f64,
) -> Result<InputCaps, EsclError> {
    if !name.is_empty() {
        session.select_source(name)?;
    }
    let geometry = session
        .geometry()?
        .ok_or_else(|| EsclError::Device("missing scan area parameter(s)".to_owned()))?;
    InputCaps::from_geometry(name, &geometry, current_resolution)
}

fn find_flatbed(sources: &[String]) -> Option<&str> {
    sources.iter().find(|s| *s == "Flatbed").map(String::as_str)
}

fn find_adf_simplex(sources: &[String]) -> Option<&str> {
    ["Automatic Document Feeder", "ADF Simplex", "ADF Front", "ADF"]
        .into_iter()
        .find_map(|candidate| sources.iter().find(|s| *s == candidate))
        .map(String::as_str)
}

fn find_adf_duplex(sources: &[String]) -> Option<&str> {
    sources.iter().find(|s| *s == "ADF Duplex").map(String::as_str)
}

fn round_half_up(value: f64) -> u32 {
    (value + 0.5).floor().max(0.0) as u32
}

fn round_down_to_step(value: u32, min: u32, step: u32) -> u32 {
    if value < min {
        return min;
    }
    min + (value - min) / step * step
}

/// 연속 해상도 범위를 이산 목록으로 변환합니다.
///
/// 최소값, 75dpi부터 두 배씩 늘린 값(간격 격자로 내림), 최대값(격자로 내림) 순이며
/// 결과는 엄격하게 증가합니다.
pub fn discretize_resolutions(min: u32, max: u32, step: u32) -> Vec<u32> {
    let step = step.max(1);
    let mut resolutions = vec![min];
    let mut r = 75u32;
    loop {
        let snapped = round_down_to_step(r, min, step);
        if snapped > max {
            break;
        }
        if resolutions.last().is_some_and(|last| snapped > *last) {
            resolutions.push(snapped);
        }
        match r.checked_mul(2) {
            Some(next) => r = next,
            None => break,
        }
    }
    let top = round_down_to_step(max, min, step);
    if resolutions.last().is_some_and(|last| top > *last) {
        resolutions.push(top);
    }
    resolutions
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::OptionRange;

    #[test]
    fn discretize_doubles_from_75() {
        assert_eq!(
            discretize_resolutions(75, 1200, 1),
            vec![75, 150, 300, 600, 1200]
        );
    }

    #[test]
    fn discretize_snaps_to_step_grid() {
        // 50 + floor((75-50)/20)*20 = 70, 150 → 150, 300 → 290, 600 → 590
        assert_eq!(
            discretize_resolutions(50, 600, 20),
            vec![50, 70, 150, 290, 590]
        );
    }

    #[test]
    fn discretize_includes_max_once() {
        assert_eq!(discretize_resolutions(100, 400, 1), vec![100, 150, 300, 400]);
        assert_eq!(discretize_resolutions(75, 75, 1), vec![75]);
    }

    #[test]
    fn color_modes_follow_bit_depth() {
        assert_eq!(ColorSpace::Grayscale.color_mode(8), "Grayscale8");
        assert_eq!(ColorSpace::Grayscale.color_mode(16), "Grayscale16");
        assert_eq!(ColorSpace::Color.color_mode(8), "RGB24");
        assert_eq!(ColorSpace::Color.color_mode(16), "RGB48");
    }

    #[test]
    fn adf_names_are_searched_in_preference_order() {
        let sources = vec!["ADF".to_owned(), "ADF Front".to_owned()];
        assert_eq!(find_adf_simplex(&sources), Some("ADF Front"));
        assert_eq!(find_adf_duplex(&sources), None);
    }

    #[test]
    fn millimeter_geometry_converts_to_300dpi_pixels() {
        let geometry = SourceGeometry {
            tl_x: OptionRange::new(0.0, 215.9, 0.0),
            tl_y: OptionRange::new(0.0, 297.0, 0.0),
            br_x: OptionRange::new(0.0, 215.9, 0.0),
            br_y: OptionRange::new(0.0, 297.0, 0.0),
            unit: AreaUnit::Millimeter,
            max_bit_depth: Some(16),
        };
        let caps = InputCaps::from_geometry("Flatbed", &geometry, 300.0).unwrap();
        assert_eq!(caps.max_width, 2550);
        assert_eq!(caps.max_height, 3508);
        assert_eq!(caps.max_physical_width, 2550);
        assert_eq!(caps.min_width, 0);
        assert_eq!(caps.max_bits, 16);
    }

    #[test]
    fn pixel_geometry_uses_current_resolution() {
        let geometry = SourceGeometry {
            tl_x: OptionRange::new(0.0, 1275.0, 1.0),
            tl_y: OptionRange::new(0.0, 1650.0, 1.0),
            br_x: OptionRange::new(0.0, 1275.0, 1.0),
            br_y: OptionRange::new(0.0, 1650.0, 1.0),
            unit: AreaUnit::Pixel,
            max_bit_depth: None,
        };
        let caps = InputCaps::from_geometry("", &geometry, 150.0).unwrap();
        assert_eq!(caps.max_width, 2550);
        assert_eq!(caps.max_height, 3300);
        assert_eq!(caps.max_bits, 8);

        assert!(InputCaps::from_geometry("", &geometry, 0.0).is_err());
    }
}
