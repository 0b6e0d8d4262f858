//! 런타임 이벤트 -- 컨테이너 생명주기 알림
//!
//! [`RuntimeEvent`]는 런타임 이벤트 스트림에서 받은 알림 하나를 나타냅니다.
//! 레지스트리의 [`dispatch`](crate::registry::ContainerRegistry::dispatch)가
//! 이 레코드 하나만 소비합니다.

use std::fmt;

use serde::{Deserialize, Serialize};

/// 이벤트 상태
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventStatus {
    /// 컨테이너 시작
    Start,
    /// 컨테이너 종료 (프로세스 종료)
    Die,
    /// 컨테이너 정지
    Stop,
    /// 처리하지 않는 상태
    Other(String),
}

impl EventStatus {
    /// 런타임이 보고한 상태 문자열을 변환합니다.
    pub fn parse(status: &str) -> Self {
        match status {
            "start" => Self::Start,
            "die" => Self::Die,
            "stop" => Self::Stop,
            other => Self::Other(other.to_owned()),
        }
    }

    /// 메트릭 레이블용 고정 이름
    pub fn label(&self) -> &str {
        match self {
            Self::Start => "start",
            Self::Die => "die",
            Self::Stop => "stop",
            Self::Other(_) => "other",
        }
    }
}

impl fmt::Display for EventStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Other(status) => f.write_str(status),
            known => f.write_str(known.label()),
        }
    }
}

/// 컨테이너 생명주기 이벤트
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeEvent {
    /// 대상 컨테이너 ID
    pub container_id: String,
    /// 이벤트 상태
    pub status: EventStatus,
}

impl RuntimeEvent {
    /// 새 이벤트를 생성합니다.
    pub fn new(container_id: impl Into<String>, status: EventStatus) -> Self {
        Self {
            container_id: container_id.into(),
            status,
        }
    }

    /// 시작 이벤트
    pub fn start(container_id: impl Into<String>) -> Self {
        Self::new(container_id, EventStatus::Start)
    }

    /// 종료 이벤트
    pub fn die(container_id: impl Into<String>) -> Self {
        Self::new(container_id, EventStatus::Die)
    }
}

impl fmt::Display for RuntimeEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {}",
            self.status,
            portkeeper_core::types::short_id(&self.container_id)
        )
    }
}
