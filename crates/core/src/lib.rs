//! portkeeper 공통 크레이트
//!
//! 컨테이너/포워딩 규칙 도메인 타입, 설정, 에러 계층, 서비스 생명주기 trait,
//! 메트릭 상수를 제공합니다. 동기화 엔진(`portkeeper-sync`)과 데몬이
//! 모두 이 크레이트에 의존합니다.

pub mod config;
pub mod error;
pub mod metrics;
pub mod pipeline;
pub mod types;

// --- 주요 타입 re-export ---

// 에러
pub use error::{ConfigError, FirewallError, PipelineError, PortkeeperError, RuntimeError};

// 설정
pub use config::{EnvOverrideWarning, PortkeeperConfig};

// 파이프라인 trait
pub use pipeline::{HealthStatus, Pipeline};

// 도메인 타입
pub use types::{Container, ForwardingRule, PortBinding, Protocol};
