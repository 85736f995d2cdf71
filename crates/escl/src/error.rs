//! eSCL 엔진 에러 타입
//!
//! [`EsclError`]는 스캐너 어댑터, 작업 상태 머신, 라우터에서 발생하는 모든 에러를 표현합니다.
//! 각 변형은 [`EsclError::status_code`]로 HTTP 상태 코드에 대응되며,
//! `From<EsclError> for AirscanError` 변환이 구현되어 있어
//! 상위 레이어에서 `?` 연산자로 자연스럽게 전파할 수 있습니다.

use airscan_core::error::{AirscanError, DeviceError, JobError};

/// eSCL 엔진 도메인 에러
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EsclError {
    /// 장치 세션이 이미 점유됨
    #[error("device busy: {0}")]
    DeviceBusy(String),

    /// 드라이버 수준 실패
    #[error("device error: {0}")]
    Device(String),

    /// 요청한 스캔 설정을 지원하지 않음
    #[error("invalid scan settings: {0}")]
    InvalidSettings(String),

    /// 스캐너/작업/경로를 찾을 수 없음
    #[error("not found: {0}")]
    NotFound(String),

    /// 알려진 경로에 허용되지 않은 메서드
    #[error("method {method} not allowed for {path}")]
    MethodNotAllowed {
        /// 요청 메서드
        method: String,
        /// 요청 경로
        path: String,
    },

    /// 급지대에 더 이상 문서가 없음
    #[error("no more documents")]
    NoMoreDocuments,

    /// 문서 출력 대상(클라이언트 연결) 실패
    #[error("document sink closed: {0}")]
    Sink(String),

    /// 작업이 취소되어 전송이 중단됨
    #[error("job canceled")]
    Canceled,

    /// 서비스 광고 실패
    #[error("announcement failed: {0}")]
    Announce(String),
}

impl EsclError {
    /// 클라이언트에 돌려줄 HTTP 상태 코드
    pub fn status_code(&self) -> u16 {
        match self {
            Self::DeviceBusy(_) | Self::Device(_) | Self::Sink(_) | Self::Announce(_) => 503,
            Self::InvalidSettings(_) => 400,
            Self::NotFound(_) | Self::NoMoreDocuments | Self::Canceled => 404,
            Self::MethodNotAllowed { .. } => 405,
        }
    }
}

impl From<EsclError> for AirscanError {
    fn from(err: EsclError) -> Self {
        match &err {
            EsclError::DeviceBusy(name) => AirscanError::Device(DeviceError::Busy(name.clone())),
            EsclError::Device(msg) => AirscanError::Device(DeviceError::Driver(msg.clone())),
            EsclError::InvalidSettings(msg) => {
                AirscanError::Job(JobError::InvalidSettings(msg.clone()))
            }
            EsclError::Announce(msg) => AirscanError::Device(DeviceError::Announce(msg.clone())),
            EsclError::NotFound(what) => AirscanError::Job(JobError::NotFound(what.clone())),
            EsclError::MethodNotAllowed { .. } => {
                AirscanError::Job(JobError::NotFound(err.to_string()))
            }
            EsclError::NoMoreDocuments | EsclError::Sink(_) | EsclError::Canceled => {
                AirscanError::Job(JobError::Transfer(err.to_string()))
            }
        }
    }
}
