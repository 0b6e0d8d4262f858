//! 파이프라인 trait -- 서비스 생명주기 정의

use std::fmt;
use std::future::Future;

use serde::Serialize;

use crate::error::PortkeeperError;

/// 서비스 헬스 상태
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum HealthStatus {
    /// 정상
    Healthy,
    /// 동작하지만 일부 기능 저하
    Degraded(String),
    /// 비정상
    Unhealthy(String),
}

impl HealthStatus {
    /// 정상 여부
    pub fn is_healthy(&self) -> bool {
        matches!(self, Self::Healthy)
    }

    /// 비정상 여부
    pub fn is_unhealthy(&self) -> bool {
        matches!(self, Self::Unhealthy(_))
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Healthy => write!(f, "healthy"),
            Self::Degraded(reason) => write!(f, "degraded: {reason}"),
            Self::Unhealthy(reason) => write!(f, "unhealthy: {reason}"),
        }
    }
}

/// 데몬이 관리하는 장기 실행 서비스의 생명주기
///
/// `start`는 백그라운드 태스크를 스폰하고 반환하며,
/// `stop`은 해당 태스크를 정리합니다.
pub trait Pipeline: Send {
    /// 서비스를 시작합니다.
    fn start(&mut self) -> impl Future<Output = Result<(), PortkeeperError>> + Send;

    /// 서비스를 정지합니다.
    fn stop(&mut self) -> impl Future<Output = Result<(), PortkeeperError>> + Send;

    /// 현재 헬스 상태를 반환합니다.
    fn health_check(&self) -> impl Future<Output = HealthStatus> + Send;
}
