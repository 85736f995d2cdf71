//! 스캔 설정 문서
//!
//! 클라이언트는 `{scanner}/ScanJobs`에 `scan:ScanSettings` 문서를 POST합니다.
//! [`ScanSettings::parse`]가 엔진이 이해하는 필드를 추출하고
//! [`JobSettings::resolve`]가 스캐너 [`Capabilities`]와 대조해
//! 작업이 사용할 불변 설정을 만듭니다.

use std::collections::HashMap;

use quick_xml::Reader;
use quick_xml::events::Event;

use crate::capabilities::{
    Capabilities, ColorSpace, ESCL_UNITS_PER_INCH, InputSource, MIME_JPEG, MIME_PNG,
};
use crate::device::{AreaUnit, ScanArea, ScanParameters};
use crate::error::EsclError;

const THREE_HUNDREDTHS_OF_INCHES: &str = "ThreeHundredthsOfInches";
const MM_PER_INCH: f64 = 25.4;

/// 스캔 영역 (1/300 인치)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScanRegion {
    pub x_offset: f64,
    pub y_offset: f64,
    pub width: f64,
    pub height: f64,
}

/// 클라이언트가 보낸 `scan:ScanSettings` 요청의 필드
#[derive(Debug, Clone, PartialEq)]
pub struct ScanSettings {
    pub resolution: u32,
    pub color_space: ColorSpace,
    /// 채널당 비트 수
    pub bit_depth: u32,
    pub input_source: Option<InputSource>,
    pub region: Option<ScanRegion>,
    pub intent: Option<String>,
    pub document_format: Option<String>,
}

impl ScanSettings {
    /// 설정 문서를 파싱합니다. 요소 접두어는 무시하며,
    /// 같은 요소가 여러 번 나오면 처음 것을 씁니다.
    pub fn parse(xml: &str) -> Result<Self, EsclError> {
        let fields = collect_leaf_text(xml)?;
        let get = |name: &str| fields.get(name).map(String::as_str);

        let x_res = parse_number(get("XResolution"), "XResolution")?;
        let y_res = parse_number(get("YResolution"), "YResolution")?;
        if x_res != y_res {
            return Err(EsclError::InvalidSettings(format!(
                "XResolution ({x_res}) differs from YResolution ({y_res})"
            )));
        }
        if x_res <= 0.0 {
            return Err(EsclError::InvalidSettings(
                "resolution must be positive".to_owned(),
            ));
        }

        let (color_space, bit_depth) = parse_color_mode(get("ColorMode").unwrap_or_default())?;

        let input_source = match get("InputSource") {
            None => None,
            Some("Platen") => Some(InputSource::Platen),
            Some("Feeder") => Some(InputSource::Feeder),
            Some(other) => {
                return Err(EsclError::InvalidSettings(format!(
                    "unsupported input source '{other}'"
                )));
            }
        };

        let region_fields = ["XOffset", "YOffset", "Width", "Height"];
        let region = if region_fields.iter().any(|f| fields.contains_key(*f)) {
            let units = get("ContentRegionUnits").unwrap_or_default();
            if units.rsplit(':').next() != Some(THREE_HUNDREDTHS_OF_INCHES) {
                return Err(EsclError::InvalidSettings(format!(
                    "unsupported content region units '{units}'"
                )));
            }
            let region = ScanRegion {
                x_offset: parse_number(get("XOffset"), "XOffset")?,
                y_offset: parse_number(get("YOffset"), "YOffset")?,
                width: parse_number(get("Width"), "Width")?,
                height: parse_number(get("Height"), "Height")?,
            };
            if region.width <= 0.0 || region.height <= 0.0 {
                return Err(EsclError::InvalidSettings(
                    "scan region must have a positive size".to_owned(),
                ));
            }
            Some(region)
        } else {
            None
        };

        let document_format = get("DocumentFormat")
            .or_else(|| get("DocumentFormatExt"))
            .map(str::to_owned);

        Ok(Self {
            resolution: (x_res + 0.5).floor() as u32,
            color_space,
            bit_depth,
            input_source,
            region,
            intent: get("Intent").map(str::to_owned),
            document_format,
        })
    }
}

fn collect_leaf_text(xml: &str) -> Result<HashMap<String, String>, EsclError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut fields = HashMap::new();
    let mut current: Option<String> = None;
    let mut saw_root = false;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                let name = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
                if !saw_root {
                    if name != "ScanSettings" {
                        return Err(EsclError::InvalidSettings(format!(
                            "expected ScanSettings document, found <{name}>"
                        )));
                    }
                    saw_root = true;
                }
                current = Some(name);
            }
            Ok(Event::Text(t)) => {
                if let Some(name) = &current {
                    let text = t.unescape().map_err(|e| {
                        EsclError::InvalidSettings(format!("invalid text in <{name}>: {e}"))
                    })?;
                    fields
                        .entry(name.clone())
                        .or_insert_with(|| text.into_owned());
                }
            }
            Ok(Event::End(_)) => current = None,
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(EsclError::InvalidSettings(format!(
                    "malformed XML at byte {}: {e}",
                    reader.buffer_position()
                )));
            }
            _ => {}
        }
    }

    if !saw_root {
        return Err(EsclError::InvalidSettings(
            "empty settings document".to_owned(),
        ));
    }
    Ok(fields)
}

fn parse_number(value: Option<&str>, field: &str) -> Result<f64, EsclError> {
    let value = value.ok_or_else(|| EsclError::InvalidSettings(format!("missing {field}")))?;
    value
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .ok_or_else(|| EsclError::InvalidSettings(format!("{field} is not a number: '{value}'")))
}

/// `RGB24` → (Color, 8), `Grayscale16` → (Grayscale, 16)
fn parse_color_mode(mode: &str) -> Result<(ColorSpace, u32), EsclError> {
    let split = mode.find(|c: char| c.is_ascii_digit()).unwrap_or(mode.len());
    let (name, bits) = mode.split_at(split);
    let bits: u32 = bits
        .parse()
        .map_err(|_| EsclError::InvalidSettings(format!("unsupported color mode '{mode}'")))?;
    match name {
        "RGB" if bits % 3 == 0 => Ok((ColorSpace::Color, bits / 3)),
        "Grayscale" => Ok((ColorSpace::Grayscale, bits)),
        _ => Err(EsclError::InvalidSettings(format!(
            "unsupported color mode '{mode}'"
        ))),
    }
}

/// 스캐너 능력으로 검증된, 작업이 사용하는 설정
#[derive(Debug, Clone, PartialEq)]
pub struct JobSettings {
    pub source: InputSource,
    pub source_name: String,
    pub area_unit: AreaUnit,
    pub color_space: ColorSpace,
    pub bit_depth: u32,
    pub resolution: u32,
    /// 영역 (1/300 인치)
    pub region: ScanRegion,
    pub intent: Option<String>,
    pub document_format: String,
}

impl JobSettings {
    /// 클라이언트 설정을 `caps`와 대조해 검증합니다.
    ///
    /// `autoselect_format`이면 75 dpi 초과, 채널당 8비트 초과인 JPEG 요청을
    /// PNG로 바꿔 제공합니다.
    pub fn resolve(
        settings: &ScanSettings,
        caps: &Capabilities,
        autoselect_format: bool,
    ) -> Result<Self, EsclError> {
        if settings.resolution < caps.min_resolution || settings.resolution > caps.max_resolution {
            return Err(EsclError::InvalidSettings(format!(
                "resolution {} outside {}..={}",
                settings.resolution, caps.min_resolution, caps.max_resolution
            )));
        }

        if !caps.color_spaces.contains(&settings.color_space) {
            return Err(EsclError::InvalidSettings(format!(
                "color space '{}' not supported",
                settings.color_space.as_str()
            )));
        }
        let mode = settings.color_space.color_mode(settings.bit_depth);
        if !caps.color_modes.contains(&mode) {
            return Err(EsclError::InvalidSettings(format!(
                "color mode '{mode}' not supported"
            )));
        }

        let source = settings
            .input_source
            .unwrap_or_else(|| caps.default_source());
        let input = caps.input(source).ok_or_else(|| {
            EsclError::InvalidSettings(format!("input source '{}' not available", source.as_str()))
        })?;

        let mut document_format = match &settings.document_format {
            Some(format) => format.clone(),
            None => caps
                .document_formats
                .first()
                .cloned()
                .ok_or_else(|| EsclError::InvalidSettings("no document format".to_owned()))?,
        };
        if !caps.supports_format(&document_format) {
            return Err(EsclError::InvalidSettings(format!(
                "document format '{document_format}' not supported"
            )));
        }
        if autoselect_format
            && document_format == MIME_JPEG
            && settings.resolution > 75
            && settings.bit_depth > 8
        {
            document_format = MIME_PNG.to_owned();
        }

        let region = settings.region.unwrap_or(ScanRegion {
            x_offset: 0.0,
            y_offset: 0.0,
            width: f64::from(input.max_width),
            height: f64::from(input.max_height),
        });

        Ok(Self {
            source,
            source_name: input.source_name.clone(),
            area_unit: input.area_unit,
            color_space: settings.color_space,
            bit_depth: settings.bit_depth,
            resolution: settings.resolution,
            region,
            intent: settings.intent.clone(),
            document_format,
        })
    }

    pub fn color_mode(&self) -> String {
        self.color_space.color_mode(self.bit_depth)
    }

    /// 작업의 `page`번째 페이지용 드라이버 파라미터
    pub fn scan_parameters(&self, page: u32) -> ScanParameters {
        // 1/300 인치 → 드라이버 단위
        let factor = match self.area_unit {
            AreaUnit::Pixel => f64::from(self.resolution) / ESCL_UNITS_PER_INCH,
            AreaUnit::Millimeter => MM_PER_INCH / ESCL_UNITS_PER_INCH,
        };
        let round = |v: f64| (v * factor + 0.5).floor();
        let region = &self.region;

        ScanParameters {
            source: self.source_name.clone(),
            mode: self.color_space.driver_mode(),
            bit_depth: self.bit_depth,
            resolution: self.resolution,
            area: ScanArea {
                left: round(region.x_offset),
                top: round(region.y_offset),
                right: round(region.x_offset + region.width),
                bottom: round(region.y_offset + region.height),
            },
            preview: self.intent.as_deref() == Some("Preview"),
            document_format: self.document_format.clone(),
            page,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities::{DOCUMENT_FORMATS, InputCaps, MIME_PDF, SUPPORTED_INTENTS};

    fn settings_xml(body: &str) -> String {
        format!(
            "<?xml version='1.0' encoding='UTF-8'?>\
             <scan:ScanSettings xmlns:scan='http://schemas.hp.com/imaging/escl/2011/05/03' \
             xmlns:pwg='http://www.pwg.org/schemas/2010/12/sm'>{body}</scan:ScanSettings>"
        )
    }

    const REGION: &str = "<pwg:ScanRegions><pwg:ScanRegion>\
        <pwg:XOffset>0</pwg:XOffset><pwg:YOffset>0</pwg:YOffset>\
        <pwg:Width>2550</pwg:Width><pwg:Height>3300</pwg:Height>\
        <pwg:ContentRegionUnits>escl:ThreeHundredthsOfInches</pwg:ContentRegionUnits>\
        </pwg:ScanRegion></pwg:ScanRegions>";

    fn caps(max_bits: u32) -> Capabilities {
        let input = InputCaps {
            source_name: "Flatbed".to_owned(),
            min_width: 0,
            max_width: 2550,
            min_height: 0,
            max_height: 3508,
            max_physical_width: 2550,
            max_physical_height: 3508,
            max_bits,
            area_unit: AreaUnit::Millimeter,
        };
        let spaces = vec![ColorSpace::Grayscale, ColorSpace::Color];
        let mut modes: Vec<String> = spaces.iter().map(|s| s.color_mode(8)).collect();
        if max_bits == 16 {
            modes.extend(spaces.iter().map(|s| s.color_mode(16)));
        }
        Capabilities {
            document_formats: DOCUMENT_FORMATS.iter().map(|s| (*s).to_owned()).collect(),
            intents: SUPPORTED_INTENTS.iter().map(|s| (*s).to_owned()).collect(),
            color_spaces: spaces,
            color_modes: modes,
            min_resolution: 75,
            max_resolution: 1200,
            resolution_step: 1,
            discrete_resolutions: vec![75, 150, 300, 600, 1200],
            max_bits,
            platen: Some(input),
            adf: None,
            duplex: false,
            max_width: 2550,
            max_height: 3508,
        }
    }

    #[test]
    fn parses_typical_settings() {
        let xml = settings_xml(&format!(
            "<pwg:Version>2.0</pwg:Version>{REGION}\
             <pwg:InputSource>Platen</pwg:InputSource>\
             <scan:ColorMode>RGB24</scan:ColorMode>\
             <scan:XResolution>300</scan:XResolution><scan:YResolution>300</scan:YResolution>\
             <pwg:DocumentFormat>image/jpeg</pwg:DocumentFormat>\
             <scan:Intent>Photo</scan:Intent>"
        ));
        let settings = ScanSettings::parse(&xml).unwrap();
        assert_eq!(settings.resolution, 300);
        assert_eq!(settings.color_space, ColorSpace::Color);
        assert_eq!(settings.bit_depth, 8);
        assert_eq!(settings.input_source, Some(InputSource::Platen));
        assert_eq!(settings.document_format.as_deref(), Some("image/jpeg"));
        assert_eq!(settings.intent.as_deref(), Some("Photo"));
        assert_eq!(settings.region.unwrap().width, 2550.0);
    }

    #[test]
    fn rejects_mismatched_resolutions() {
        let xml = settings_xml(
            "<scan:ColorMode>Grayscale8</scan:ColorMode>\
             <scan:XResolution>300</scan:XResolution><scan:YResolution>600</scan:YResolution>",
        );
        let err = ScanSettings::parse(&xml).unwrap_err();
        assert!(matches!(err, EsclError::InvalidSettings(_)));
    }

    #[test]
    fn rejects_unknown_region_units() {
        let xml = settings_xml(&format!(
            "{}<scan:ColorMode>Grayscale8</scan:ColorMode>\
             <scan:XResolution>300</scan:XResolution><scan:YResolution>300</scan:YResolution>",
            REGION.replace("escl:ThreeHundredthsOfInches", "escl:Millimeters")
        ));
        let err = ScanSettings::parse(&xml).unwrap_err();
        assert!(err.to_string().contains("escl:Millimeters"));
    }

    #[test]
    fn rejects_malformed_xml_and_wrong_root() {
        assert!(ScanSettings::parse("<scan:ScanSettings><scan:XResolution>").is_err());
        assert!(ScanSettings::parse("").is_err());
        assert!(ScanSettings::parse("<ScannerStatus></ScannerStatus>").is_err());
    }

    #[test]
    fn rejects_unknown_color_mode() {
        let xml = settings_xml(
            "<scan:ColorMode>BlackAndWhite1</scan:ColorMode>\
             <scan:XResolution>300</scan:XResolution><scan:YResolution>300</scan:YResolution>",
        );
        assert!(ScanSettings::parse(&xml).is_err());
    }

    #[test]
    fn resolve_rejects_out_of_range_resolution() {
        let xml = settings_xml(
            "<scan:ColorMode>Grayscale8</scan:ColorMode>\
             <scan:XResolution>2400</scan:XResolution><scan:YResolution>2400</scan:YResolution>",
        );
        let settings = ScanSettings::parse(&xml).unwrap();
        let err = JobSettings::resolve(&settings, &caps(8), false).unwrap_err();
        assert!(err.to_string().contains("resolution 2400"));
    }

    #[test]
    fn resolve_rejects_missing_feeder() {
        let xml = settings_xml(
            "<pwg:InputSource>Feeder</pwg:InputSource><scan:ColorMode>Grayscale8</scan:ColorMode>\
             <scan:XResolution>300</scan:XResolution><scan:YResolution>300</scan:YResolution>",
        );
        let settings = ScanSettings::parse(&xml).unwrap();
        assert!(JobSettings::resolve(&settings, &caps(8), false).is_err());
    }

    #[test]
    fn resolve_rejects_16_bit_on_8_bit_device() {
        let xml = settings_xml(
            "<scan:ColorMode>RGB48</scan:ColorMode>\
             <scan:XResolution>300</scan:XResolution><scan:YResolution>300</scan:YResolution>",
        );
        let settings = ScanSettings::parse(&xml).unwrap();
        assert!(JobSettings::resolve(&settings, &caps(8), false).is_err());
        assert!(JobSettings::resolve(&settings, &caps(16), false).is_ok());
    }

    #[test]
    fn autoselect_switches_deep_jpeg_to_png() {
        let xml = settings_xml(
            "<scan:ColorMode>RGB48</scan:ColorMode>\
             <scan:XResolution>300</scan:XResolution><scan:YResolution>300</scan:YResolution>\
             <pwg:DocumentFormat>image/jpeg</pwg:DocumentFormat>",
        );
        let settings = ScanSettings::parse(&xml).unwrap();

        let plain = JobSettings::resolve(&settings, &caps(16), false).unwrap();
        assert_eq!(plain.document_format, MIME_JPEG);

        let auto = JobSettings::resolve(&settings, &caps(16), true).unwrap();
        assert_eq!(auto.document_format, MIME_PNG);
    }

    #[test]
    fn defaults_fill_missing_source_format_and_region() {
        let xml = settings_xml(
            "<scan:ColorMode>Grayscale8</scan:ColorMode>\
             <scan:XResolution>150</scan:XResolution><scan:YResolution>150</scan:YResolution>",
        );
        let settings = ScanSettings::parse(&xml).unwrap();
        let job = JobSettings::resolve(&settings, &caps(8), false).unwrap();
        assert_eq!(job.source, InputSource::Platen);
        assert_eq!(job.document_format, MIME_PDF);
        assert_eq!(job.region.width, 2550.0);
        assert_eq!(job.region.height, 3508.0);
    }

    #[test]
    fn scan_parameters_convert_region_to_millimeters() {
        let xml = settings_xml(&format!(
            "{REGION}<scan:ColorMode>Grayscale8</scan:ColorMode>\
             <scan:XResolution>300</scan:XResolution><scan:YResolution>300</scan:YResolution>\
             <scan:Intent>Preview</scan:Intent>"
        ));
        let settings = ScanSettings::parse(&xml).unwrap();
        let job = JobSettings::resolve(&settings, &caps(8), false).unwrap();
        let params = job.scan_parameters(0);
        // 2550/300 in = 8.5 in = 215.9 mm → 216
        assert_eq!(params.area.right, 216.0);
        assert_eq!(params.area.bottom, 279.0);
        assert!(params.preview);
        assert_eq!(params.source, "Flatbed");
    }
}
