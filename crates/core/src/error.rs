//! 에러 타입 -- 도메인별 에러 정의

/// portkeeper 최상위 에러 타입
#[derive(Debug, thiserror::Error)]
pub enum PortkeeperError {
    /// 설정 관련 에러
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    /// 파이프라인 생명주기 에러
    #[error("pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    /// 컨테이너 런타임 에러
    #[error("runtime error: {0}")]
    Runtime(#[from] RuntimeError),

    /// 방화벽 명령 에러
    #[error("firewall error: {0}")]
    Firewall(#[from] FirewallError),

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

/// 파이프라인 생명주기 에러
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// 이미 실행 중
    #[error("pipeline already running")]
    AlreadyRunning,

    /// 실행 중이 아님
    #[error("pipeline not running")]
    NotRunning,

    /// 초기화 실패
    #[error("pipeline init failed: {0}")]
    InitFailed(String),

    /// 채널 통신 실패
    #[error("channel error: {0}")]
    Channel(String),
}

/// 컨테이너 런타임 에러
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    /// 런타임 API 호출 실패
    #[error("runtime api error: {0}")]
    Api(String),

    /// 런타임 연결 실패
    #[error("runtime connection error: {0}")]
    Connection(String),

    /// 컨테이너를 찾을 수 없음
    #[error("container not found: {0}")]
    NotFound(String),
}

/// 방화벽 명령 에러
#[derive(Debug, thiserror::Error)]
pub enum FirewallError {
    /// 명령 실행 실패
    #[error("command failed: {0}")]
    Command(String),

    /// 체인 생성/초기화 실패
    #[error("chain setup failed for '{chain}': {reason}")]
    ChainSetup { chain: String, reason: String },

    /// 규칙 제거 실패
    #[error("rule removal failed in '{chain}': {reason}")]
    Removal { chain: String, reason: String },
}
