//! 메트릭 상수 및 설명 등록
//!
//! 모든 Prometheus 메트릭의 이름과 설명을 중앙에서 정의합니다.
//! 각 모듈은 이 상수를 사용하여 `metrics::counter!()`, `metrics::gauge!()`,
//! `metrics::histogram!()` 매크로를 호출합니다.
//!
//! # 네이밍 컨벤션
//!
//! - 접두어: `portkeeper_`
//! - 모듈명: `registry_`, `firewall_`, `daemon_`
//! - 접미어: `_total` (counter), `_seconds` (histogram), 없음 (gauge)
//!
//! # 사용 예시
//!
//! ```ignore
//! use metrics::counter;
//!
//! counter!(portkeeper_core::metrics::REGISTRY_RESYNCS_TOTAL).increment(1);
//! ```

// ─── 레이블 키 상수 ────────────────────────────────────────────────

/// 체인 레이블 키
pub const LABEL_CHAIN: &str = "chain";

/// 이벤트 상태 레이블 키 (start, die, stop)
pub const LABEL_STATUS: &str = "status";

/// 결과 레이블 키 (success, failure)
pub const LABEL_RESULT: &str = "result";

// ─── Container Registry 메트릭 ──────────────────────────────────────

/// Registry: 추적 중인 컨테이너 수 (gauge)
pub const REGISTRY_TRACKED_CONTAINERS: &str = "portkeeper_registry_tracked_containers";

/// Registry: 처리된 런타임 이벤트 수 (counter, label: status)
pub const REGISTRY_EVENTS_PROCESSED_TOTAL: &str = "portkeeper_registry_events_processed_total";

/// Registry: 전체 재동기화 수 (counter, label: result)
pub const REGISTRY_RESYNCS_TOTAL: &str = "portkeeper_registry_resyncs_total";

/// Registry: 조회 실패로 건너뛴 컨테이너 수 (counter)
pub const REGISTRY_INSPECT_FAILURES_TOTAL: &str = "portkeeper_registry_inspect_failures_total";

// ─── Firewall Synchronizer 메트릭 ───────────────────────────────────

/// Firewall: 추가된 규칙 수 (counter, label: chain)
pub const FIREWALL_RULES_ADDED_TOTAL: &str = "portkeeper_firewall_rules_added_total";

/// Firewall: 규칙 추가 실패 수 (counter, label: chain)
pub const FIREWALL_RULE_ADD_FAILURES_TOTAL: &str = "portkeeper_firewall_rule_add_failures_total";

/// Firewall: 삭제된 규칙 수 (counter, label: chain)
pub const FIREWALL_RULES_REMOVED_TOTAL: &str = "portkeeper_firewall_rules_removed_total";

/// Firewall: 규칙 제거 실패 수 (counter)
pub const FIREWALL_REMOVAL_FAILURES_TOTAL: &str = "portkeeper_firewall_removal_failures_total";

/// Firewall: 체인 재구축 수 (counter, label: result)
pub const FIREWALL_REBUILDS_TOTAL: &str = "portkeeper_firewall_rebuilds_total";

/// Firewall: 외부 명령 실행 시간 (histogram, 초)
pub const FIREWALL_COMMAND_DURATION_SECONDS: &str = "portkeeper_firewall_command_duration_seconds";

// ─── Daemon 메트릭 ──────────────────────────────────────────────────

/// Daemon: 빌드 정보 (gauge, 항상 1, label: version)
pub const DAEMON_BUILD_INFO: &str = "portkeeper_daemon_build_info";

/// Daemon: 읽기 전용 모드 여부 (gauge, 0 또는 1)
pub const DAEMON_READ_ONLY: &str = "portkeeper_daemon_read_only";

// ─── 히스토그램 버킷 정의 ────────────────────────────────────────────

/// 외부 명령 실행 시간 히스토그램 버킷 (초)
///
/// iptables 호출은 보통 수 ms, xtables 락 대기 시 수 초까지 걸립니다.
pub const COMMAND_DURATION_BUCKETS: [f64; 9] =
    [0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 30.0];

// ─── 설명 등록 함수 ─────────────────────────────────────────────────

/// 모든 메트릭의 설명(description)을 등록합니다.
///
/// 이 함수는 전역 레코더 설치 후 한 번만 호출해야 합니다.
/// 일반적으로 `portkeeper-daemon`의 시작 시점에서 호출합니다.
pub fn describe_all() {
    use metrics::{describe_counter, describe_gauge, describe_histogram};

    // Container Registry
    describe_gauge!(
        REGISTRY_TRACKED_CONTAINERS,
        "Number of running containers currently tracked"
    );
    describe_counter!(
        REGISTRY_EVENTS_PROCESSED_TOTAL,
        "Runtime lifecycle events dispatched to the registry"
    );
    describe_counter!(
        REGISTRY_RESYNCS_TOTAL,
        "Full container/firewall resynchronizations"
    );
    describe_counter!(
        REGISTRY_INSPECT_FAILURES_TOTAL,
        "Containers skipped because the inspect query failed"
    );

    // Firewall Synchronizer
    describe_counter!(
        FIREWALL_RULES_ADDED_TOTAL,
        "DNAT rules appended to managed chains"
    );
    describe_counter!(
        FIREWALL_RULE_ADD_FAILURES_TOTAL,
        "DNAT rule append commands that failed"
    );
    describe_counter!(
        FIREWALL_RULES_REMOVED_TOTAL,
        "DNAT rules deleted from managed chains"
    );
    describe_counter!(
        FIREWALL_REMOVAL_FAILURES_TOTAL,
        "Rule removal attempts aborted by a listing or delete failure"
    );
    describe_counter!(FIREWALL_REBUILDS_TOTAL, "Managed chain rebuilds");
    describe_histogram!(
        FIREWALL_COMMAND_DURATION_SECONDS,
        "Firewall command execution latency in seconds"
    );

    // Daemon
    describe_gauge!(
        DAEMON_BUILD_INFO,
        "Build information (always 1, with version label)"
    );
    describe_gauge!(DAEMON_READ_ONLY, "1 when running in read-only (dry-run) mode");
}
