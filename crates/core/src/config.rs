//! 설정 관리 -- portkeeper.toml 파싱 및 런타임 설정
//!
//! [`PortkeeperConfig`]는 데몬 전체 설정과 선언적 포워딩 규칙 테이블을 담는
//! 최상위 구조체입니다.
//!
//! # 설정 로딩 우선순위
//! 1. CLI 인자 (최고 우선)
//! 2. 환경변수 (`PORTKEEPER_FIREWALL_READ_ONLY=true` 형식, 호환용 `READ_ONLY`/`PORT`)
//! 3. 설정 파일 (`portkeeper.toml`, 또는 `.json` 확장자의 레거시 JSON)
//! 4. 기본값 (`Default` 구현)
//!
//! # 사용 예시
//! ```no_run
//! # async fn example() -> Result<(), portkeeper_core::error::PortkeeperError> {
//! use portkeeper_core::config::PortkeeperConfig;
//!
//! let config = PortkeeperConfig::load("/etc/portkeeper/portkeeper.toml").await?;
//! let config = PortkeeperConfig::parse("[firewall]\nread_only = true")?;
//! # Ok(())
//! # }
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{ConfigError, PortkeeperError};
use crate::types::ForwardingRule;

/// iptables 체인 이름 최대 길이
const MAX_CHAIN_NAME_LEN: usize = 28;

/// 이벤트 루프 설정 상한값
pub const MAX_EVENT_CHANNEL_CAPACITY: usize = 65_536;
pub const MAX_RECONNECT_ATTEMPTS: u32 = 100;
pub const MAX_RECONNECT_BACKOFF_BASE_MS: u64 = 60_000;

/// portkeeper 통합 설정
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PortkeeperConfig {
    /// 일반 설정
    #[serde(default)]
    pub general: GeneralConfig,
    /// 컨테이너 런타임 설정
    #[serde(default)]
    pub docker: DockerConfig,
    /// 방화벽 설정
    #[serde(default)]
    pub firewall: FirewallConfig,
    /// 헬스/메트릭 HTTP 리스너 설정
    #[serde(default)]
    pub health: HealthConfig,
    /// 컨테이너 이름 → 포워딩 규칙 목록
    #[serde(default)]
    pub rules: BTreeMap<String, Vec<ForwardingRule>>,
}

impl PortkeeperConfig {
    /// 설정 파일을 로드하고 환경변수 오버라이드를 적용한 뒤 검증합니다.
    ///
    /// 파싱할 수 없는 환경변수 값은 `warn!`으로 기록하고 무시합니다.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, PortkeeperError> {
        let (config, warnings) = Self::load_unvalidated(path).await?;
        for warning in &warnings {
            warn!(
                env_key = warning.key,
                value = warning.value.as_str(),
                "{warning}"
            );
        }
        config.validate()?;
        Ok(config)
    }

    /// 설정 파일을 로드하고 환경변수 오버라이드까지만 적용합니다.
    ///
    /// 검증은 호출자가 상위 오버라이드(CLI 등)를 적용한 뒤 수행합니다.
    /// 무시된 환경변수는 로깅 초기화 이후 기록할 수 있도록 함께 반환합니다.
    pub async fn load_unvalidated(
        path: impl AsRef<Path>,
    ) -> Result<(Self, Vec<EnvOverrideWarning>), PortkeeperError> {
        let mut config = Self::read(path.as_ref()).await?;
        let warnings = config.apply_env_overrides();
        Ok((config, warnings))
    }

    /// 설정 파일을 로드하고 검증합니다 (환경변수 오버라이드 없음).
    pub async fn from_file(path: impl AsRef<Path>) -> Result<Self, PortkeeperError> {
        let config = Self::read(path.as_ref()).await?;
        config.validate()?;
        Ok(config)
    }

    async fn read(path: &Path) -> Result<Self, PortkeeperError> {
        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                PortkeeperError::Config(ConfigError::FileNotFound {
                    path: path.display().to_string(),
                })
            } else {
                PortkeeperError::Io(e)
            }
        })?;

        let is_json = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
        if is_json {
            Self::parse_json(&content)
        } else {
            Self::parse(&content)
        }
    }

    /// TOML 문자열에서 설정을 파싱합니다.
    pub fn parse(toml_str: &str) -> Result<Self, PortkeeperError> {
        toml::from_str(toml_str).map_err(|e| {
            PortkeeperError::Config(ConfigError::ParseFailed {
                reason: e.to_string(),
            })
        })
    }

    /// 레거시 JSON 형식의 설정을 파싱합니다.
    ///
    /// ```json
    /// { "IptablesPath": "/sbin/iptables", "DockerInterface": "docker0",
    ///   "Rules": { "web": [ { "ip": "", "port": 8080, "Chain": "DOCKER" } ] } }
    /// ```
    ///
    /// JSON에 없는 섹션은 기본값이 적용됩니다.
    pub fn parse_json(json_str: &str) -> Result<Self, PortkeeperError> {
        let legacy: LegacyJsonConfig = serde_json::from_str(json_str).map_err(|e| {
            PortkeeperError::Config(ConfigError::ParseFailed {
                reason: e.to_string(),
            })
        })?;

        let mut config = Self::default();
        if let Some(path) = legacy.iptables_path.filter(|p| !p.is_empty()) {
            config.firewall.iptables_path = path;
        }
        if let Some(iface) = legacy.docker_interface.filter(|i| !i.is_empty()) {
            config.firewall.docker_interface = iface;
        }
        config.rules = legacy.rules;
        Ok(config)
    }

    /// 환경변수로 설정값을 오버라이드합니다.
    ///
    /// 환경변수 네이밍 규칙: `PORTKEEPER_{SECTION}_{FIELD}`.
    /// 호환용으로 `READ_ONLY`(비어 있지 않으면 dry-run)와 `PORT`(리스너 포트)도 읽습니다.
    ///
    /// 파싱에 실패한 값은 적용하지 않고 반환 목록에 담습니다.
    pub fn apply_env_overrides(&mut self) -> Vec<EnvOverrideWarning> {
        let mut warnings = Vec::new();

        // General
        override_string(&mut self.general.log_level, "PORTKEEPER_GENERAL_LOG_LEVEL");
        override_string(&mut self.general.log_format, "PORTKEEPER_GENERAL_LOG_FORMAT");

        // Docker
        override_string(&mut self.docker.socket, "PORTKEEPER_DOCKER_SOCKET");
        override_parsed(
            &mut self.docker.event_channel_capacity,
            "PORTKEEPER_DOCKER_EVENT_CHANNEL_CAPACITY",
            &mut warnings,
        );
        override_parsed(
            &mut self.docker.reconnect_max_attempts,
            "PORTKEEPER_DOCKER_RECONNECT_MAX_ATTEMPTS",
            &mut warnings,
        );
        override_parsed(
            &mut self.docker.reconnect_backoff_base_ms,
            "PORTKEEPER_DOCKER_RECONNECT_BACKOFF_BASE_MS",
            &mut warnings,
        );

        // Firewall
        override_string(
            &mut self.firewall.iptables_path,
            "PORTKEEPER_FIREWALL_IPTABLES_PATH",
        );
        override_string(
            &mut self.firewall.docker_interface,
            "PORTKEEPER_FIREWALL_DOCKER_INTERFACE",
        );
        override_parsed(
            &mut self.firewall.read_only,
            "PORTKEEPER_FIREWALL_READ_ONLY",
            &mut warnings,
        );
        if std::env::var("READ_ONLY").is_ok_and(|v| !v.is_empty()) {
            self.firewall.read_only = true;
        }

        // Health
        override_string(
            &mut self.health.listen_addr,
            "PORTKEEPER_HEALTH_LISTEN_ADDR",
        );
        override_parsed(&mut self.health.port, "PORT", &mut warnings);
        override_parsed(&mut self.health.port, "PORTKEEPER_HEALTH_PORT", &mut warnings);

        warnings
    }

    /// 설정값의 유효성을 검증합니다.
    pub fn validate(&self) -> Result<(), PortkeeperError> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.general.log_level.as_str()) {
            return Err(invalid(
                "general.log_level",
                format!("must be one of: {}", valid_levels.join(", ")),
            ));
        }

        let valid_formats = ["json", "pretty"];
        if !valid_formats.contains(&self.general.log_format.as_str()) {
            return Err(invalid(
                "general.log_format",
                format!("must be one of: {}", valid_formats.join(", ")),
            ));
        }

        if self.docker.socket.is_empty() {
            return Err(invalid("docker.socket", "must not be empty"));
        }

        if self.docker.event_channel_capacity == 0
            || self.docker.event_channel_capacity > MAX_EVENT_CHANNEL_CAPACITY
        {
            return Err(invalid(
                "docker.event_channel_capacity",
                format!("must be 1-{MAX_EVENT_CHANNEL_CAPACITY}"),
            ));
        }

        if self.docker.reconnect_max_attempts > MAX_RECONNECT_ATTEMPTS {
            return Err(invalid(
                "docker.reconnect_max_attempts",
                format!("must be 0-{MAX_RECONNECT_ATTEMPTS}"),
            ));
        }

        if self.docker.reconnect_backoff_base_ms > MAX_RECONNECT_BACKOFF_BASE_MS {
            return Err(invalid(
                "docker.reconnect_backoff_base_ms",
                format!("must be 0-{MAX_RECONNECT_BACKOFF_BASE_MS}"),
            ));
        }

        if self.firewall.iptables_path.is_empty() {
            return Err(invalid("firewall.iptables_path", "must not be empty"));
        }

        if self.firewall.docker_interface.is_empty() {
            return Err(invalid("firewall.docker_interface", "must not be empty"));
        }

        if self.health.port == 0 {
            return Err(invalid("health.port", "must be 1-65535"));
        }

        for (name, rules) in &self.rules {
            if name.is_empty() {
                return Err(invalid("rules", "container name must not be empty"));
            }
            for (idx, rule) in rules.iter().enumerate() {
                if rule.host_port == 0 {
                    return Err(invalid(
                        format!("rules.{name}[{idx}].port"),
                        "must be 1-65535",
                    ));
                }
                validate_chain_name(&rule.chain)
                    .map_err(|reason| invalid(format!("rules.{name}[{idx}].chain"), reason))?;
            }
        }

        Ok(())
    }

    /// 규칙이 참조하는 고유 체인 이름 집합
    pub fn chains(&self) -> BTreeSet<String> {
        self.rules
            .values()
            .flatten()
            .map(|rule| rule.chain.clone())
            .collect()
    }

    /// 선언된 규칙의 총 개수
    pub fn rule_count(&self) -> usize {
        self.rules.values().map(Vec::len).sum()
    }
}

fn validate_chain_name(chain: &str) -> Result<(), String> {
    if chain.is_empty() {
        return Err("must not be empty".to_owned());
    }
    if chain.len() > MAX_CHAIN_NAME_LEN {
        return Err(format!("must be at most {MAX_CHAIN_NAME_LEN} characters"));
    }
    if chain.chars().any(|c| c.is_whitespace() || c == '!') {
        return Err("must not contain whitespace or '!'".to_owned());
    }
    Ok(())
}

fn invalid(field: impl Into<String>, reason: impl Into<String>) -> PortkeeperError {
    ConfigError::InvalidValue {
        field: field.into(),
        reason: reason.into(),
    }
    .into()
}

/// 레거시 JSON 설정 형식
#[derive(Debug, Deserialize)]
struct LegacyJsonConfig {
    #[serde(rename = "IptablesPath", default)]
    iptables_path: Option<String>,
    #[serde(rename = "DockerInterface", default)]
    docker_interface: Option<String>,
    #[serde(rename = "Rules", default)]
    rules: BTreeMap<String, Vec<ForwardingRule>>,
}

/// 일반 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// 로그 레벨 (trace, debug, info, warn, error)
    pub log_level: String,
    /// 로그 형식 (json, pretty)
    pub log_format: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_owned(),
            log_format: "json".to_owned(),
        }
    }
}

/// 컨테이너 런타임 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DockerConfig {
    /// Docker 소켓 URL (`unix://`, `tcp://`, `http://`)
    pub socket: String,
    /// 리스너와 처리기 사이 이벤트 채널 용량
    pub event_channel_capacity: usize,
    /// 이벤트 스트림 재연결 최대 횟수
    pub reconnect_max_attempts: u32,
    /// 재연결 백오프 기본 간격 (밀리초, n번째 시도는 n배)
    pub reconnect_backoff_base_ms: u64,
}

impl Default for DockerConfig {
    fn default() -> Self {
        Self {
            socket: "unix:///var/run/docker.sock".to_owned(),
            event_channel_capacity: 256,
            reconnect_max_attempts: 5,
            reconnect_backoff_base_ms: 2_000,
        }
    }
}

/// 방화벽 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FirewallConfig {
    /// iptables 바이너리 경로
    pub iptables_path: String,
    /// 런타임 브리지 인터페이스 (이 인터페이스에서 들어오는 트래픽은 DNAT 제외)
    pub docker_interface: String,
    /// 읽기 전용(dry-run) 모드
    pub read_only: bool,
}

impl Default for FirewallConfig {
    fn default() -> Self {
        Self {
            iptables_path: "/sbin/iptables".to_owned(),
            docker_interface: "docker0".to_owned(),
            read_only: false,
        }
    }
}

/// 헬스/메트릭 HTTP 리스너 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    /// 바인드 주소
    pub listen_addr: String,
    /// 포트
    pub port: u16,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0".to_owned(),
            port: 5152,
        }
    }
}

fn override_string(target: &mut String, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        *target = val;
    }
}

fn override_parsed<T: FromStr>(
    target: &mut T,
    env_key: &'static str,
    warnings: &mut Vec<EnvOverrideWarning>,
) {
    if let Ok(val) = std::env::var(env_key) {
        match val.parse::<T>() {
            Ok(parsed) => *target = parsed,
            Err(_) => warnings.push(EnvOverrideWarning {
                key: env_key,
                value: val,
                expected: std::any::type_name::<T>(),
            }),
        }
    }
}

/// 파싱할 수 없어 무시된 환경변수
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvOverrideWarning {
    /// 환경변수 이름
    pub key: &'static str,
    /// 원본 값
    pub value: String,
    /// 기대한 타입
    pub expected: &'static str,
}

impl fmt::Display for EnvOverrideWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "failed to parse {} from env var {}, ignoring",
            self.expected, self.key
        )
    }
}
