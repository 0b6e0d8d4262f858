//! 동기화 엔진 설정
//!
//! [`SyncConfig`]는 core의 [`PortkeeperConfig`]에서 Docker/방화벽/규칙
//! 섹션과 이벤트 루프 설정을 가져옵니다.
//!
//! # 사용 예시
//! ```ignore
//! use portkeeper_core::config::PortkeeperConfig;
//! use portkeeper_sync::config::SyncConfig;
//!
//! let core_config = PortkeeperConfig::default();
//! let config = SyncConfig::from_core(&core_config);
//! ```

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use portkeeper_core::config::{
    MAX_EVENT_CHANNEL_CAPACITY, MAX_RECONNECT_ATTEMPTS, MAX_RECONNECT_BACKOFF_BASE_MS,
    PortkeeperConfig,
};
use portkeeper_core::types::ForwardingRule;

use crate::error::SyncError;

/// 동기화 엔진 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Docker 소켓 URL
    pub docker_socket: String,
    /// iptables 실행 파일 경로
    pub iptables_path: String,
    /// Docker 브리지 인터페이스 (DNAT에서 제외)
    pub docker_interface: String,
    /// 읽기 전용(dry-run) 모드
    pub read_only: bool,
    /// 컨테이너 이름 → 포워딩 규칙
    pub rules: BTreeMap<String, Vec<ForwardingRule>>,

    // --- 이벤트 루프 설정 ([docker] 섹션) ---
    /// 이벤트 채널 용량
    pub event_channel_capacity: usize,
    /// 이벤트 스트림 재연결 최대 횟수
    pub reconnect_max_attempts: u32,
    /// 재연결 백오프 기본 간격 (밀리초)
    pub reconnect_backoff_base_ms: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            docker_socket: "unix:///var/run/docker.sock".to_owned(),
            iptables_path: "/sbin/iptables".to_owned(),
            docker_interface: "docker0".to_owned(),
            read_only: false,
            rules: BTreeMap::new(),
            event_channel_capacity: 256,
            reconnect_max_attempts: 5,
            reconnect_backoff_base_ms: 2_000,
        }
    }
}


impl SyncConfig {
    /// core 설정에서 동기화 엔진 설정을 생성합니다.
    pub fn from_core(core: &PortkeeperConfig) -> Self {
        Self {
            docker_socket: core.docker.socket.clone(),
            iptables_path: core.firewall.iptables_path.clone(),
            docker_interface: core.firewall.docker_interface.clone(),
            read_only: core.firewall.read_only,
            rules: core.rules.clone(),
            event_channel_capacity: core.docker.event_channel_capacity,
            reconnect_max_attempts: core.docker.reconnect_max_attempts,
            reconnect_backoff_base_ms: core.docker.reconnect_backoff_base_ms,
        }
    }

    /// 규칙이 참조하는 체인 이름 집합
    pub fn chains(&self) -> BTreeSet<String> {
        self.rules
            .values()
            .flatten()
            .map(|rule| rule.chain.clone())
            .collect()
    }

    /// 설정값의 유효성을 검증합니다.
    pub fn validate(&self) -> Result<(), SyncError> {
        if self.docker_socket.is_empty() {
            return Err(SyncError::Config {
                field: "docker_socket".to_owned(),
                reason: "must not be empty".to_owned(),
            });
        }

        if self.iptables_path.is_empty() {
            return Err(SyncError::Config {
                field: "iptables_path".to_owned(),
                reason: "must not be empty".to_owned(),
            });
        }

        if self.docker_interface.is_empty() {
            return Err(SyncError::Config {
                field: "docker_interface".to_owned(),
                reason: "must not be empty".to_owned(),
            });
        }

        if self.event_channel_capacity == 0
            || self.event_channel_capacity > MAX_EVENT_CHANNEL_CAPACITY
        {
            return Err(SyncError::Config {
                field: "event_channel_capacity".to_owned(),
                reason: format!("must be 1-{MAX_EVENT_CHANNEL_CAPACITY}"),
            });
        }

        if self.reconnect_max_attempts > MAX_RECONNECT_ATTEMPTS {
            return Err(SyncError::Config {
                field: "reconnect_max_attempts".to_owned(),
                reason: format!("must be 0-{MAX_RECONNECT_ATTEMPTS}"),
            });
        }

        if self.reconnect_backoff_base_ms > MAX_RECONNECT_BACKOFF_BASE_MS {
            return Err(SyncError::Config {
                field: "reconnect_backoff_base_ms".to_owned(),
                reason: format!("must be 0-{MAX_RECONNECT_BACKOFF_BASE_MS}"),
            });
        }

        for (name, rules) in &self.rules {
            for (idx, rule) in rules.iter().enumerate() {
                if rule.chain.is_empty() {
                    return Err(SyncError::Config {
                        field: format!("rules.{name}[{idx}].chain"),
                        reason: "must not be empty".to_owned(),
                    });
                }
                if rule.host_port == 0 {
                    return Err(SyncError::Config {
                        field: format!("rules.{name}[{idx}].port"),
                        reason: "must be 1-65535".to_owned(),
                    });
                }
            }
        }

        Ok(())
    }
}

/// 동기화 엔진 설정 빌더
#[derive(Default)]
pub struct SyncConfigBuilder {
    config: SyncConfig,
}

impl SyncConfigBuilder {
    /// 새 빌더를 생성합니다.
    pub fn new() -> Self {
        Self::default()
    }

    /// Docker 소켓 URL을 설정합니다.
    pub fn docker_socket(mut self, socket: impl Into<String>) -> Self {
        self.config.docker_socket = socket.into();
        self
    }

    /// iptables 경로를 설정합니다.
    pub fn iptables_path(mut self, path: impl Into<String>) -> Self {
        self.config.iptables_path = path.into();
        self
    }

    /// Docker 브리지 인터페이스를 설정합니다.
    pub fn docker_interface(mut self, interface: impl Into<String>) -> Self {
        self.config.docker_interface = interface.into();
        self
    }

    /// 읽기 전용 모드를 설정합니다.
    pub fn read_only(mut self, read_only: bool) -> Self {
        self.config.read_only = read_only;
        self
    }

    /// 컨테이너 하나의 규칙을 추가합니다.
    pub fn rule(mut self, container_name: impl Into<String>, rule: ForwardingRule) -> Self {
        self.config
            .rules
            .entry(container_name.into())
            .or_default()
            .push(rule);
        self
    }

    /// 전체 규칙 테이블을 설정합니다.
    pub fn rules(mut self, rules: BTreeMap<String, Vec<ForwardingRule>>) -> Self {
        self.config.rules = rules;
        self
    }

    /// 이벤트 채널 용량을 설정합니다.
    pub fn event_channel_capacity(mut self, capacity: usize) -> Self {
        self.config.event_channel_capacity = capacity;
        self
    }

    /// 재연결 최대 횟수를 설정합니다.
    pub fn reconnect_max_attempts(mut self, attempts: u32) -> Self {
        self.config.reconnect_max_attempts = attempts;
        self
    }

    /// 재연결 백오프 기본 간격(밀리초)을 설정합니다.
    pub fn reconnect_backoff_base_ms(mut self, ms: u64) -> Self {
        self.config.reconnect_backoff_base_ms = ms;
        self
    }

    /// 설정을 검증하고 빌드합니다.
    pub fn build(self) -> Result<SyncConfig, SyncError> {
        self.config.validate()?;
        Ok(self.config)
    }
}
