//! eSCL 문서 렌더링
//!
//! 서버 기술자, 스캐너 능력, 스캐너 상태 문서를 [`XmlDocument`]로 작성합니다.
//! 렌더러는 잠금을 잡지 않는 순수 함수이며, 호출자가 필요한 값을
//! 스냅샷([`JobInfo`], [`ServerDevice`])으로 넘깁니다.

use crate::capabilities::{Capabilities, InputCaps};
use crate::xml::{NS_AIRSANE, NS_PWG, NS_SCAN, XmlDocument};

const ESCL_VERSION: &str = "2.0";

// ─── 스냅샷 타입 ───────────────────────────────────────────────────

/// 상태 문서에 들어가는 작업 하나의 스냅샷
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobInfo {
    pub uri: String,
    pub uuid: String,
    /// 생성 후 경과 시간(초)
    pub age_secs: u64,
    /// eSCL 작업 상태 (`Pending`, `Processing`, `Completed`, `Canceled`, `Aborted`)
    pub state: &'static str,
    /// PWG 작업 상태 사유
    pub state_reason: &'static str,
    pub images_to_transfer: u32,
    pub images_completed: u32,
}

/// 서버 기술자에 들어가는 스캐너 하나의 스냅샷
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerDevice {
    pub make_and_model: String,
    pub uuid: String,
    pub uri: String,
    /// mDNS 서비스 이름 (광고되지 않았으면 `None`)
    pub name: Option<String>,
}

// ─── 렌더러 ────────────────────────────────────────────────────────

/// `scan:ScannerStatus` 문서
pub fn scanner_status(state: &str, jobs: &[JobInfo]) -> String {
    let mut doc = XmlDocument::new();
    doc.open_with(
        "scan:ScannerStatus",
        &[("xmlns:pwg", NS_PWG), ("xmlns:scan", NS_SCAN)],
    )
    .element("pwg:Version", ESCL_VERSION)
    .element("pwg:State", state)
    .open("pwg:StateReasons")
    .element("pwg:StateReason", "None")
    .close("pwg:StateReasons")
    .open("scan:Jobs");
    for job in jobs {
        write_job_info(&mut doc, job);
    }
    doc.close("scan:Jobs").close("scan:ScannerStatus");
    doc.finish()
}

fn write_job_info(doc: &mut XmlDocument, job: &JobInfo) {
    doc.open("scan:JobInfo")
        .element("pwg:JobUri", &job.uri)
        .element("pwg:JobUuid", &job.uuid)
        .element("scan:Age", job.age_secs)
        .element("pwg:JobState", job.state)
        .element("pwg:ImagesToTransfer", job.images_to_transfer)
        .element("pwg:ImagesCompleted", job.images_completed)
        .open("pwg:JobStateReasons")
        .element("pwg:JobStateReason", job.state_reason)
        .close("pwg:JobStateReasons")
        .close("scan:JobInfo");
}

/// `scan:ScannerCapabilities` 문서
///
/// 설정 프로파일 이름은 소스마다 0부터 1씩 증가합니다.
pub fn scanner_capabilities(make_and_model: &str, uuid: &str, caps: &Capabilities) -> String {
    let mut doc = XmlDocument::new();
    doc.open_with(
        "scan:ScannerCapabilities",
        &[("xmlns:pwg", NS_PWG), ("xmlns:scan", NS_SCAN)],
    )
    .element("pwg:Version", ESCL_VERSION)
    .element("pwg:MakeAndModel", make_and_model)
    .element("scan:UUID", uuid);

    let mut profile = 0u32;
    if let Some(platen) = &caps.platen {
        doc.open("scan:Platen").open("scan:PlatenInputCaps");
        write_input_caps(&mut doc, caps, platen, &mut profile);
        doc.close("scan:PlatenInputCaps").close("scan:Platen");
    }
    if let Some(adf) = &caps.adf {
        let tag = if caps.duplex {
            "scan:AdfDuplexInputCaps"
        } else {
            "scan:AdfSimplexInputCaps"
        };
        doc.open("scan:Adf").open(tag);
        write_input_caps(&mut doc, caps, adf, &mut profile);
        doc.close(tag).close("scan:Adf");
    }
    doc.close("scan:ScannerCapabilities");
    doc.finish()
}

fn write_input_caps(doc: &mut XmlDocument, caps: &Capabilities, input: &InputCaps, profile: &mut u32) {
    doc.element("scan:MinWidth", input.min_width)
        .element("scan:MinHeight", input.min_height)
        .element("scan:MaxWidth", input.max_width)
        .element("scan:MaxHeight", input.max_height)
        .element("scan:MaxPhysicalWidth", input.max_physical_width)
        .element("scan:MaxPhysicalHeight", input.max_physical_height)
        .element("scan:MaxScanRegions", 1)
        .open("scan:SettingProfiles");
    write_setting_profile(doc, caps, input.max_bits, *profile);
    *profile += 1;
    doc.close("scan:SettingProfiles").open("scan:SupportedIntents");
    for intent in &caps.intents {
        doc.element("scan:SupportedIntent", intent);
    }
    doc.close("scan:SupportedIntents");
}

fn write_setting_profile(doc: &mut XmlDocument, caps: &Capabilities, max_bits: u32, profile: u32) {
    let name = profile.to_string();
    doc.open_with("scan:SettingProfile", &[("name", name.as_str())])
        .open("scan:ColorModes");
    for color_space in &caps.color_spaces {
        for bits in (8..=max_bits).step_by(8) {
            doc.element("scan:ColorMode", color_space.color_mode(bits));
        }
    }
    doc.close("scan:ColorModes").open("scan:ColorSpaces");
    for color_space in &caps.color_spaces {
        doc.element("scan:ColorSpace", color_space.as_str());
    }
    doc.close("scan:ColorSpaces").open("scan:SupportedResolutions");
    if caps.discrete_resolutions.is_empty() {
        doc.empty("scan:ResolutionRange");
        for axis in ["scan:XResolutionRange", "scan:YResolutionRange"] {
            doc.open(axis)
                .element("scan:Min", caps.min_resolution)
                .element("scan:Max", caps.max_resolution)
                .element("scan:Step", caps.resolution_step)
                .close(axis);
        }
    } else {
        doc.open("scan:DiscreteResolutions");
        for resolution in &caps.discrete_resolutions {
            doc.open("scan:DiscreteResolution")
                .element("scan:XResolution", resolution)
                .element("scan:YResolution", resolution)
                .close("scan:DiscreteResolution");
        }
        doc.close("scan:DiscreteResolutions");
    }
    doc.close("scan:SupportedResolutions").open("scan:DocumentFormats");
    for format in &caps.document_formats {
        doc.element("pwg:DocumentFormat", format);
    }
    doc.close("scan:DocumentFormats").close("scan:SettingProfile");
}

/// `airsane:Server` 기술자 문서
pub fn server_descriptor(devices: &[ServerDevice]) -> String {
    let mut doc = XmlDocument::new();
    doc.open_with(
        "airsane:Server",
        &[
            ("xmlns:airsane", NS_AIRSANE),
            ("xmlns:pwg", NS_PWG),
            ("xmlns:scan", NS_SCAN),
        ],
    )
    .open("airsane:Version")
    .element("airsane:Package", env!("CARGO_PKG_NAME"))
    .element("airsane:Revision", env!("CARGO_PKG_VERSION"))
    .close("airsane:Version")
    .open("airsane:Devices");
    for device in devices {
        doc.open("airsane:Device")
            .element("pwg:Version", ESCL_VERSION)
            .element("pwg:MakeAndModel", &device.make_and_model)
            .element("scan:UUID", &device.uuid)
            .element("airsane:Uri", &device.uri);
        if let Some(name) = &device.name {
            doc.element("airsane:Name", name);
        }
        doc.close("airsane:Device");
    }
    doc.close("airsane:Devices").close("airsane:Server");
    doc.finish()
}
