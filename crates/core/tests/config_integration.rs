//! portkeeper.toml 통합 설정 테스트
//!
//! - portkeeper.toml.example 파싱 테스트
//! - 파일 로딩 (TOML / 레거시 JSON)
//! - 환경변수 우선순위 테스트
//! - 빈 파일 / 잘못된 형식 에러 테스트

use std::io::Write;

use portkeeper_core::config::PortkeeperConfig;
use portkeeper_core::error::{ConfigError, PortkeeperError};

// =============================================================================
// portkeeper.toml.example 파싱 테스트
// =============================================================================

#[test]
fn example_config_parses_successfully() {
    let content = include_str!("../../../portkeeper.toml.example");
    let config = PortkeeperConfig::parse(content).expect("example config should parse");

    assert_eq!(config.general.log_level, "info");
    assert_eq!(config.general.log_format, "json");
    assert_eq!(config.docker.socket, "unix:///var/run/docker.sock");
    assert_eq!(config.firewall.docker_interface, "docker0");
    assert!(!config.firewall.read_only);
}

#[test]
fn example_config_passes_validation() {
    let content = include_str!("../../../portkeeper.toml.example");
    let config = PortkeeperConfig::parse(content).expect("should parse");
    config
        .validate()
        .expect("example config should pass validation");
}

#[test]
fn example_config_rules_and_chains() {
    let content = include_str!("../../../portkeeper.toml.example");
    let config = PortkeeperConfig::parse(content).expect("should parse");

    assert_eq!(config.rule_count(), 3);
    assert_eq!(config.rules["web"][0].host_port, 8080);
    assert_eq!(config.rules["web"][1].destination(), "203.0.113.10");
    assert_eq!(config.chains().len(), 2);
}

// =============================================================================
// 파일 로딩
// =============================================================================

#[tokio::test]
async fn from_file_reads_toml() {
    let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
    writeln!(file, "[[rules.web]]\nport = 8080\nchain = \"DOCKER\"").unwrap();

    let config = PortkeeperConfig::from_file(file.path()).await.unwrap();
    assert_eq!(config.rules["web"][0].chain, "DOCKER");
}

#[tokio::test]
async fn from_file_reads_legacy_json_by_extension() {
    let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
    write!(
        file,
        r#"{{"IptablesPath": "/usr/sbin/iptables", "Rules": {{"web": [{{"port": 8080, "Chain": "DOCKER"}}]}}}}"#
    )
    .unwrap();

    let config = PortkeeperConfig::from_file(file.path()).await.unwrap();
    assert_eq!(config.firewall.iptables_path, "/usr/sbin/iptables");
    assert_eq!(config.rules["web"][0].host_port, 8080);
}

#[tokio::test]
async fn from_file_missing_returns_not_found() {
    let err = PortkeeperConfig::from_file("/nonexistent/portkeeper.toml")
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        PortkeeperError::Config(ConfigError::FileNotFound { .. })
    ));
}

#[tokio::test]
async fn from_file_rejects_invalid_rules() {
    let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
    writeln!(file, "[[rules.web]]\nport = 8080\nchain = \"\"").unwrap();

    let err = PortkeeperConfig::from_file(file.path()).await.unwrap_err();
    assert!(matches!(
        err,
        PortkeeperError::Config(ConfigError::InvalidValue { .. })
    ));
}

// =============================================================================
// 빈 파일 / 잘못된 형식
// =============================================================================

#[test]
fn empty_string_yields_defaults() {
    let config = PortkeeperConfig::parse("").unwrap();
    config.validate().unwrap();
    assert!(config.rules.is_empty());
}

#[test]
fn invalid_json_returns_parse_error() {
    let err = PortkeeperConfig::parse_json("{ not json").unwrap_err();
    assert!(matches!(
        err,
        PortkeeperError::Config(ConfigError::ParseFailed { .. })
    ));
}

#[test]
fn rule_with_out_of_range_port_fails_to_parse() {
    let result = PortkeeperConfig::parse("[[rules.web]]\nport = 70000\nchain = \"DOCKER\"");
    assert!(result.is_err());
}

// =============================================================================
// 환경변수 우선순위
// =============================================================================

#[test]
#[serial_test::serial]
fn env_read_only_enables_dry_run() {
    let mut config = PortkeeperConfig::default();
    assert!(!config.firewall.read_only);

    // SAFETY: serial 테스트에서만 환경변수를 변경
    unsafe { std::env::set_var("READ_ONLY", "1") };
    config.apply_env_overrides();
    unsafe { std::env::remove_var("READ_ONLY") };

    assert!(config.firewall.read_only);
}

#[test]
#[serial_test::serial]
fn env_empty_read_only_is_ignored() {
    let mut config = PortkeeperConfig::default();

    unsafe { std::env::set_var("READ_ONLY", "") };
    config.apply_env_overrides();
    unsafe { std::env::remove_var("READ_ONLY") };

    assert!(!config.firewall.read_only);
}

#[test]
#[serial_test::serial]
fn env_port_overrides_health_port() {
    let mut config = PortkeeperConfig::default();

    unsafe { std::env::set_var("PORT", "6000") };
    config.apply_env_overrides();
    unsafe { std::env::remove_var("PORT") };

    assert_eq!(config.health.port, 6000);
}

#[test]
#[serial_test::serial]
fn env_prefixed_key_wins_over_legacy_port() {
    let mut config = PortkeeperConfig::default();

    unsafe {
        std::env::set_var("PORT", "6000");
        std::env::set_var("PORTKEEPER_HEALTH_PORT", "7000");
    }
    config.apply_env_overrides();
    unsafe {
        std::env::remove_var("PORT");
        std::env::remove_var("PORTKEEPER_HEALTH_PORT");
    }

    assert_eq!(config.health.port, 7000);
}

#[test]
#[serial_test::serial]
fn env_overrides_iptables_path() {
    let mut config = PortkeeperConfig::default();

    unsafe { std::env::set_var("PORTKEEPER_FIREWALL_IPTABLES_PATH", "/usr/sbin/iptables-legacy") };
    config.apply_env_overrides();
    unsafe { std::env::remove_var("PORTKEEPER_FIREWALL_IPTABLES_PATH") };

    assert_eq!(config.firewall.iptables_path, "/usr/sbin/iptables-legacy");
}

#[test]
#[serial_test::serial]
fn env_malformed_port_is_reported_not_applied() {
    let mut config = PortkeeperConfig::default();

    unsafe { std::env::set_var("PORT", "http") };
    let warnings = config.apply_env_overrides();
    unsafe { std::env::remove_var("PORT") };

    assert_eq!(config.health.port, 5152);
    assert_eq!(warnings.len(), 1);
    assert_eq!(warnings[0].key, "PORT");
    assert_eq!(warnings[0].value, "http");
}

#[test]
#[serial_test::serial]
fn env_overrides_reconnect_settings() {
    let mut config = PortkeeperConfig::default();

    unsafe {
        std::env::set_var("PORTKEEPER_DOCKER_RECONNECT_MAX_ATTEMPTS", "9");
        std::env::set_var("PORTKEEPER_DOCKER_RECONNECT_BACKOFF_BASE_MS", "250");
    }
    let warnings = config.apply_env_overrides();
    unsafe {
        std::env::remove_var("PORTKEEPER_DOCKER_RECONNECT_MAX_ATTEMPTS");
        std::env::remove_var("PORTKEEPER_DOCKER_RECONNECT_BACKOFF_BASE_MS");
    }

    assert!(warnings.is_empty());
    assert_eq!(config.docker.reconnect_max_attempts, 9);
    assert_eq!(config.docker.reconnect_backoff_base_ms, 250);
}

#[tokio::test]
#[serial_test::serial]
async fn load_unvalidated_defers_validation() {
    let file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
    std::fs::write(file.path(), "[general]\nlog_format = \"text\"").unwrap();

    let (config, warnings) = PortkeeperConfig::load_unvalidated(file.path()).await.unwrap();
    assert_eq!(config.general.log_format, "text");
    assert!(warnings.is_empty());
    assert!(config.validate().is_err());
    assert!(PortkeeperConfig::load(file.path()).await.is_err());
}
