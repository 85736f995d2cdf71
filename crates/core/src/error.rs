//! 에러 타입: 도메인별 에러 정의

/// airscan 최상위 에러 타입
#[derive(Debug, thiserror::Error)]
pub enum AirscanError {
    /// 설정 관련 에러
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    /// 스캐너 장치 에러
    #[error("device error: {0}")]
    Device(#[from] DeviceError),

    /// 스캔 작업 에러
    #[error("job error: {0}")]
    Job(#[from] JobError),

    /// I/O 에러
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// 설정 관련 에러
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// 설정 파일을 찾을 수 없음
    #[error("config file not found: {path}")]
    FileNotFound { path: String },

    /// 설정 파싱 실패
    #[error("failed to parse config: {reason}")]
    ParseFailed { reason: String },

    /// 유효하지 않은 설정 값
    #[error("invalid config value for '{field}': {reason}")]
    InvalidValue { field: String, reason: String },
}

/// 스캐너 장치 에러
#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    /// 장치 세션이 이미 점유됨
    #[error("device busy: {0}")]
    Busy(String),

    /// 드라이버 수준 실패
    #[error("driver failure: {0}")]
    Driver(String),

    /// 장치 목록 조회 실패
    #[error("enumeration failed: {0}")]
    Enumeration(String),

    /// mDNS 서비스 광고 실패
    #[error("announcement failed: {0}")]
    Announce(String),
}

/// 스캔 작업 에러
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    /// 스캔 설정이 장치 능력과 맞지 않음
    #[error("invalid scan settings: {0}")]
    InvalidSettings(String),

    /// 스캐너/작업/경로를 찾을 수 없음
    #[error("not found: {0}")]
    NotFound(String),

    /// 문서 전송 실패
    #[error("transfer failed: {0}")]
    Transfer(String),
}
