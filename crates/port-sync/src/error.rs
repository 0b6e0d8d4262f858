//! 동기화 엔진 에러 타입
//!
//! [`SyncError`]는 런타임 조회, 방화벽 명령 실행, 체인 설정 등
//! 동기화 엔진 내부에서 발생하는 모든 에러를 표현합니다.
//! `From<SyncError> for PortkeeperError` 변환이 구현되어 있어
//! 상위 레이어에서 `?` 연산자로 전파할 수 있습니다.

use portkeeper_core::error::{FirewallError, PipelineError, PortkeeperError, RuntimeError};

/// 동기화 엔진 도메인 에러
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// Docker API 호출 실패
    #[error("docker api error: {0}")]
    DockerApi(String),

    /// Docker 소켓 연결 실패
    #[error("docker connection error: {0}")]
    DockerConnection(String),

    /// 컨테이너를 찾을 수 없음
    #[error("container not found: {0}")]
    ContainerNotFound(String),

    /// 외부 명령 프로세스 생성 실패
    #[error("failed to spawn '{program}': {reason}")]
    CommandSpawn {
        /// 실행 파일 경로
        program: String,
        /// 실패 사유
        reason: String,
    },

    /// 외부 명령이 0이 아닌 상태로 종료
    #[error("command '{command}' exited with {}: {output}", .code.map_or_else(|| "signal".to_owned(), |c| format!("status {c}")))]
    CommandFailed {
        /// 실행된 명령줄
        command: String,
        /// 종료 코드 (시그널 종료 시 None)
        code: Option<i32>,
        /// 명령 출력 (stdout + stderr)
        output: String,
    },

    /// 체인 생성 및 flush 모두 실패
    #[error("can't create chain {chain}: {reason}")]
    ChainSetup {
        /// 체인 이름
        chain: String,
        /// 실패 사유
        reason: String,
    },

    /// 체인 규칙 목록 조회 실패
    #[error("can't list rules of chain {chain}: {reason}")]
    ListChain {
        /// 체인 이름
        chain: String,
        /// 실패 사유
        reason: String,
    },

    /// 규칙 삭제 실패
    #[error("can't delete rule {line} from chain {chain}: {reason}")]
    DeleteRule {
        /// 체인 이름
        chain: String,
        /// 규칙 줄 번호
        line: u32,
        /// 실패 사유
        reason: String,
    },

    /// 설정 에러
    #[error("config error: {field}: {reason}")]
    Config {
        /// 설정 필드명
        field: String,
        /// 에러 사유
        reason: String,
    },

    /// 채널 통신 에러
    #[error("channel error: {0}")]
    Channel(String),
}

impl From<SyncError> for PortkeeperError {
    fn from(err: SyncError) -> Self {
        match err {
            SyncError::DockerApi(msg) => PortkeeperError::Runtime(RuntimeError::Api(msg)),
            SyncError::DockerConnection(msg) => {
                PortkeeperError::Runtime(RuntimeError::Connection(msg))
            }
            SyncError::ContainerNotFound(id) => PortkeeperError::Runtime(RuntimeError::NotFound(id)),
            SyncError::ChainSetup { chain, reason } => {
                PortkeeperError::Firewall(FirewallError::ChainSetup { chain, reason })
            }
            SyncError::ListChain { ref chain, .. } | SyncError::DeleteRule { ref chain, .. } => {
                PortkeeperError::Firewall(FirewallError::Removal {
                    chain: chain.clone(),
                    reason: err.to_string(),
                })
            }
            SyncError::CommandSpawn { .. } | SyncError::CommandFailed { .. } => {
                PortkeeperError::Firewall(FirewallError::Command(err.to_string()))
            }
            SyncError::Config { .. } => {
                PortkeeperError::Pipeline(PipelineError::InitFailed(err.to_string()))
            }
            SyncError::Channel(msg) => PortkeeperError::Pipeline(PipelineError::Channel(msg)),
        }
    }
}
