#![doc = include_str!("../README.md")]
//!
//! # 모듈 구성
//!
//! - [`device`]: 드라이버 추상화 (`DeviceBackend`, `DeviceSession` trait)
//! - [`simulated`]: 설정으로 정의하는 가상 장치 백엔드
//! - [`capabilities`]: 드라이버 옵션에서 계산한 스캐너 능력
//! - [`settings`]: `ScanSettings` 요청 파싱과 능력 대비 검증
//! - [`scanner`]: 스캐너 어댑터 (배타적 장치 세션, 작업 모음)
//! - [`job`]: 스캔 작업 상태 머신과 문서 스트리밍
//! - [`registry`]: 스캐너 집합, mDNS 광고 trait
//! - [`router`]: eSCL HTTP 요청 라우터
//! - [`control`]: 재로딩/종료 제어 채널
//! - [`document`], [`xml`]: eSCL XML 문서 렌더링
//! - [`error`]: 도메인 에러 타입
//!
//! # 아키텍처
//!
//! ```text
//! Request -> Router -> ScannerRegistry -> Scanner -> ScanJob -> DeviceSession
//!              |                                        |
//!          XML documents                         DocumentSink (chunked body)
//! ```

pub mod capabilities;
pub mod control;
pub mod device;
pub mod document;
pub mod error;
pub mod job;
pub mod registry;
pub mod router;
pub mod scanner;
pub mod settings;
pub mod simulated;
pub mod xml;

// --- 주요 타입 re-export ---

// 에러
pub use error::EsclError;

// 장치
pub use device::{DeviceBackend, DeviceDescriptor, DeviceSession};
pub use simulated::SimulatedBackend;

// 스캐너와 작업
pub use capabilities::Capabilities;
pub use job::{DocumentSink, JobState, ScanJob};
pub use scanner::{ScanSession, Scanner};
pub use settings::{JobSettings, ScanSettings};

// 레지스트리
pub use registry::{
    Announcement, RegistryOptions, ScannerRegistry, ServiceDescription, ServicePublisher,
};

// 라우터와 제어
pub use control::{ControlHandle, ControlReceiver, TerminationReason, control_channel};
pub use router::{DocumentTransfer, Method, Request, Response, ResponseBody, Router};
