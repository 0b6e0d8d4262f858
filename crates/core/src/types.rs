//! 도메인 타입 -- 컨테이너, 포트 바인딩, 포워딩 규칙
//!
//! 런타임이 보고하는 컨테이너 상태([`Container`])와 운영자가 선언한
//! 포워딩 규칙([`ForwardingRule`])을 정의합니다. 런타임 문자열 형식에 대한
//! 파싱 규칙은 이 모듈의 함수들([`short_id`], [`container_name_from_runtime`],
//! [`parse_port_key`])에 모여 있습니다.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// 방화벽 규칙 태그에 사용되는 짧은 컨테이너 ID 길이
pub const SHORT_ID_LEN: usize = 12;

/// 호스트 IP가 지정되지 않은 규칙의 목적지 주소
pub const ANY_DESTINATION: &str = "0.0.0.0/0";

/// Returns the first [`SHORT_ID_LEN`] characters of a container ID.
///
/// IDs shorter than that (or with a multi-byte boundary at the cut) are
/// returned whole instead of panicking.
pub fn short_id(id: &str) -> &str {
    id.get(..SHORT_ID_LEN).unwrap_or(id)
}

/// Converts a runtime-reported container name into the logical name.
///
/// The runtime reports names with a single leading `/` (e.g. `/web`).
/// Exactly one leading separator is removed; anything else is kept as-is.
pub fn container_name_from_runtime(raw: &str) -> String {
    raw.strip_prefix('/').unwrap_or(raw).to_owned()
}

/// Splits a port key such as `80/tcp` into the container port and protocol.
///
/// Returns `None` when the key has no `/`, the port part is empty, or the
/// protocol is not one the NAT rules can express.
pub fn parse_port_key(key: &str) -> Option<(&str, Protocol)> {
    let (port, proto) = key.split_once('/')?;
    if port.is_empty() || !port.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    let protocol = Protocol::from_name(proto)?;
    Some((port, protocol))
}

/// 전송 계층 프로토콜
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    /// TCP
    Tcp,
    /// UDP
    Udp,
    /// SCTP
    Sctp,
}

impl Protocol {
    /// 프로토콜 이름(`tcp`, `udp`, `sctp`)을 파싱합니다. 대소문자를 구분하지 않습니다.
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "tcp" => Some(Self::Tcp),
            "udp" => Some(Self::Udp),
            "sctp" => Some(Self::Sctp),
            _ => None,
        }
    }

    /// iptables `-p` / `-m` 인자로 사용되는 이름
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Tcp => "tcp",
            Self::Udp => "udp",
            Self::Sctp => "sctp",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 컨테이너 포트에 게시된 호스트 주소/포트 쌍
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortBinding {
    /// 호스트 IP (빈 문자열이면 모든 주소)
    pub host_ip: String,
    /// 호스트 포트
    pub host_port: u16,
}

impl PortBinding {
    /// 새 포트 바인딩을 생성합니다.
    pub fn new(host_ip: impl Into<String>, host_port: u16) -> Self {
        Self {
            host_ip: host_ip.into(),
            host_port,
        }
    }
}

/// 실행 중인 컨테이너
///
/// 생성 이후 필드는 변경되지 않습니다. 컨테이너 상태가 바뀌면
/// 런타임에서 다시 조회하여 레코드 전체를 교체합니다.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Container {
    /// 컨테이너 ID (전체 길이)
    pub id: String,
    /// 컨테이너 이름 (선행 `/` 제거됨)
    pub name: String,
    /// 내부 네트워크 주소 (네트워크 미연결 시 빈 문자열)
    pub address: String,
    /// `"<port>/<proto>"` → 게시된 호스트 바인딩 목록
    pub ports: HashMap<String, Vec<PortBinding>>,
}

impl Container {
    /// 규칙 태그에 사용되는 짧은 ID
    pub fn short_id(&self) -> &str {
        short_id(&self.id)
    }
}

impl fmt::Display for Container {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({}) address={}",
            self.name,
            self.short_id(),
            if self.address.is_empty() {
                "-"
            } else {
                self.address.as_str()
            },
        )
    }
}

/// 선언적 포워딩 규칙
///
/// "이름이 N인 컨테이너에 대해 호스트 포트 P(선택적으로 호스트 IP I로 제한)를
/// 체인 C를 통해 포워딩한다"는 운영자 의도를 나타냅니다.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForwardingRule {
    /// 목적지 호스트 IP (없거나 비어 있으면 모든 주소)
    #[serde(rename = "ip", default, skip_serializing_if = "Option::is_none")]
    pub host_ip: Option<String>,
    /// 호스트 포트
    #[serde(rename = "port")]
    pub host_port: u16,
    /// 규칙을 추가할 NAT 체인
    #[serde(alias = "Chain")]
    pub chain: String,
}

impl ForwardingRule {
    /// 새 규칙을 생성합니다.
    pub fn new(host_ip: Option<&str>, host_port: u16, chain: impl Into<String>) -> Self {
        Self {
            host_ip: host_ip.map(str::to_owned),
            host_port,
            chain: chain.into(),
        }
    }

    /// iptables `-d` 인자로 사용할 목적지 주소
    pub fn destination(&self) -> &str {
        match self.host_ip.as_deref() {
            Some(ip) if !ip.is_empty() => ip,
            _ => ANY_DESTINATION,
        }
    }
}

impl fmt::Display for ForwardingRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{} via {}",
            self.destination(),
            self.host_port,
            self.chain
        )
    }
}
