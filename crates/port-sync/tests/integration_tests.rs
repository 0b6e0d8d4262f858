//! 통합 테스트 -- 레지스트리/방화벽 동기화 전체 플로우 검증
//!
//! 컨테이너 시작/종료 이벤트 → 레지스트리 갱신 → iptables 명령 실행
//! 시나리오를 메모리 내 nat 테이블을 흉내내는 실행기로 테스트합니다.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use portkeeper_core::pipeline::Pipeline;
use portkeeper_core::types::{Container, ForwardingRule, PortBinding};
use portkeeper_sync::{
    ContainerRegistry, FirewallSynchronizer, PortSyncBuilder, RuntimeEvent, SyncConfig,
    SyncConfigBuilder,
};

const WEB_ID: &str = "abc123def4567890abc123def4567890";
const API_ID: &str = "0123456789abcdef0123456789abcdef";

mod mock {
    use super::*;
    use portkeeper_sync::{CommandOutput, CommandRunner, DockerClient, SyncError};
    use tokio::sync::{Mutex, mpsc};

    /// 테스트용 Docker 클라이언트
    pub struct TestDockerClient {
        containers: Mutex<Vec<Container>>,
        events: Mutex<Option<mpsc::Receiver<RuntimeEvent>>>,
    }

    impl TestDockerClient {
        pub fn new() -> Self {
            Self {
                containers: Mutex::new(Vec::new()),
                events: Mutex::new(None),
            }
        }

        /// 이벤트 스트림 송신측을 반환합니다.
        pub async fn event_sender(&self) -> mpsc::Sender<RuntimeEvent> {
            let (tx, rx) = mpsc::channel(16);
            *self.events.lock().await = Some(rx);
            tx
        }

        pub async fn run_container(&self, container: Container) {
            self.containers.lock().await.push(container);
        }

        pub async fn kill_container(&self, id: &str) {
            self.containers.lock().await.retain(|c| c.id != id);
        }
    }

    impl DockerClient for TestDockerClient {
        async fn list_running(&self) -> Result<Vec<String>, SyncError> {
            Ok(self
                .containers
                .lock()
                .await
                .iter()
                .map(|c| c.id.clone())
                .collect())
        }

        async fn inspect(&self, id: &str) -> Result<Container, SyncError> {
            self.containers
                .lock()
                .await
                .iter()
                .find(|c| c.id == id)
                .cloned()
                .ok_or_else(|| SyncError::ContainerNotFound(id.to_owned()))
        }

        async fn stream_events(&self, tx: mpsc::Sender<RuntimeEvent>) -> Result<(), SyncError> {
            let rx = self.events.lock().await.take();
            let Some(mut rx) = rx else {
                std::future::pending::<()>().await;
                return Ok(());
            };
            while let Some(event) = rx.recv().await {
                tx.send(event)
                    .await
                    .map_err(|_| SyncError::Channel("receiver dropped".to_owned()))?;
            }
            std::future::pending::<()>().await;
            Ok(())
        }

        async fn ping(&self) -> Result<(), SyncError> {
            Ok(())
        }
    }

    /// 메모리 내 nat 테이블을 흉내내는 iptables 실행기
    #[derive(Default)]
    pub struct FakeIptables {
        chains: std::sync::Mutex<BTreeMap<String, Vec<String>>>,
        log: std::sync::Mutex<Vec<Vec<String>>>,
    }

    impl FakeIptables {
        pub fn new() -> Self {
            Self::default()
        }

        /// 기존 체인과 규칙을 미리 만듭니다.
        pub fn with_chain(self, chain: &str, rules: &[&str]) -> Self {
            self.chains.lock().unwrap().insert(
                chain.to_owned(),
                rules.iter().map(|r| (*r).to_owned()).collect(),
            );
            self
        }

        pub fn rules(&self, chain: &str) -> Vec<String> {
            self.chains
                .lock()
                .unwrap()
                .get(chain)
                .cloned()
                .unwrap_or_default()
        }

        pub fn has_chain(&self, chain: &str) -> bool {
            self.chains.lock().unwrap().contains_key(chain)
        }

        /// 실행된 명령의 연산자 (`-A`, `-L` 등) 목록
        pub fn ops(&self) -> Vec<String> {
            self.log
                .lock()
                .unwrap()
                .iter()
                .map(|args| args.get(2).cloned().unwrap_or_default())
                .collect()
        }

        pub fn commands(&self) -> Vec<Vec<String>> {
            self.log.lock().unwrap().clone()
        }

        pub fn clear_log(&self) {
            self.log.lock().unwrap().clear();
        }

        fn apply(&self, args: &[String]) -> CommandOutput {
            let value_after = |flag: &str| {
                args.iter()
                    .position(|a| a == flag)
                    .and_then(|i| args.get(i + 1))
                    .cloned()
                    .unwrap_or_default()
            };
            let (Some(op), Some(chain)) = (args.get(2), args.get(3)) else {
                return CommandOutput::failed(2, "bad arguments");
            };

            let mut chains = self.chains.lock().unwrap();
            match op.as_str() {
                "-N" if chains.contains_key(chain) => {
                    CommandOutput::failed(1, "iptables: Chain already exists.")
                }
                "-N" => {
                    chains.insert(chain.clone(), Vec::new());
                    CommandOutput::ok("")
                }
                "-F" | "-A" | "-L" | "-D" if !chains.contains_key(chain) => {
                    CommandOutput::failed(1, "iptables: No chain/target/match by that name.")
                }
                "-F" => {
                    chains.insert(chain.clone(), Vec::new());
                    CommandOutput::ok("")
                }
                "-A" => {
                    let proto = value_after("-p");
                    let line = format!(
                        "DNAT       {proto}  --  0.0.0.0/0            {dest}            {proto} dpt:{dport} /* {comment} */ to:{to}",
                        dest = value_after("-d"),
                        dport = value_after("--dport"),
                        comment = value_after("--comment"),
                        to = value_after("--to-destination"),
                    );
                    if let Some(rules) = chains.get_mut(chain) {
                        rules.push(line);
                    }
                    CommandOutput::ok("")
                }
                "-L" => {
                    let mut out = format!(
                        "Chain {chain} (1 references)\nnum  target     prot opt source               destination\n"
                    );
                    for (idx, rule) in chains[chain].iter().enumerate() {
                        out.push_str(&format!("{:<4} {rule}\n", idx + 1));
                    }
                    CommandOutput::ok(out)
                }
                "-D" => {
                    let line: usize = args.get(4).and_then(|n| n.parse().ok()).unwrap_or(0);
                    let Some(rules) = chains.get_mut(chain) else {
                        return CommandOutput::failed(1, "no chain");
                    };
                    if line == 0 || line > rules.len() {
                        return CommandOutput::failed(1, "iptables: Index of deletion too big.");
                    }
                    rules.remove(line - 1);
                    CommandOutput::ok("")
                }
                _ => CommandOutput::failed(2, "unsupported operation"),
            }
        }
    }

    impl CommandRunner for FakeIptables {
        async fn run(&self, _program: &str, args: &[String]) -> Result<CommandOutput, SyncError> {
            self.log.lock().unwrap().push(args.to_vec());
            Ok(self.apply(args))
        }
    }
}

use mock::{FakeIptables, TestDockerClient};

fn container(id: &str, name: &str, address: &str, port_key: &str, host_port: u16) -> Container {
    let mut ports = HashMap::new();
    ports.insert(port_key.to_owned(), vec![PortBinding::new("0.0.0.0", host_port)]);
    Container {
        id: id.to_owned(),
        name: name.to_owned(),
        address: address.to_owned(),
        ports,
    }
}

fn web() -> Container {
    container(WEB_ID, "web", "10.0.0.5", "80/tcp", 8080)
}

fn api() -> Container {
    container(API_ID, "api", "10.0.0.6", "9000/tcp", 9090)
}

fn config(read_only: bool) -> SyncConfig {
    SyncConfigBuilder::new()
        .rule("web", ForwardingRule::new(None, 8080, "DOCKER"))
        .rule("api", ForwardingRule::new(Some("203.0.113.10"), 9090, "DOCKER"))
        .read_only(read_only)
        .reconnect_backoff_base_ms(1)
        .build()
        .unwrap()
}

fn registry(
    docker: &Arc<TestDockerClient>,
    iptables: &Arc<FakeIptables>,
    read_only: bool,
) -> ContainerRegistry<TestDockerClient, FakeIptables> {
    let firewall = FirewallSynchronizer::new(Arc::clone(iptables), &config(read_only));
    ContainerRegistry::new(Arc::clone(docker), firewall)
}

fn args(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| (*s).to_owned()).collect()
}

#[tokio::test]
async fn start_event_inserts_single_dnat_rule() {
    let docker = Arc::new(TestDockerClient::new());
    let iptables = Arc::new(FakeIptables::new().with_chain("DOCKER", &[]));
    let registry = registry(&docker, &iptables, false);

    docker.run_container(web()).await;
    registry.dispatch(&RuntimeEvent::start(WEB_ID)).await.unwrap();

    assert_eq!(
        iptables.commands(),
        vec![args(&[
            "-t",
            "nat",
            "-A",
            "DOCKER",
            "-d",
            "0.0.0.0/0",
            "!",
            "-i",
            "docker0",
            "-p",
            "tcp",
            "-m",
            "tcp",
            "--dport",
            "8080",
            "-j",
            "DNAT",
            "--to-destination",
            "10.0.0.5:80",
            "-m",
            "comment",
            "--comment",
            "Docker web[abc123def456]",
        ])]
    );
    assert_eq!(iptables.rules("DOCKER").len(), 1);
}

#[tokio::test]
async fn die_event_lists_then_deletes_exactly_one_rule() {
    let docker = Arc::new(TestDockerClient::new());
    let iptables = Arc::new(FakeIptables::new().with_chain("DOCKER", &[]));
    let registry = registry(&docker, &iptables, false);

    docker.run_container(web()).await;
    registry.dispatch(&RuntimeEvent::start(WEB_ID)).await.unwrap();
    iptables.clear_log();

    docker.kill_container(WEB_ID).await;
    registry.dispatch(&RuntimeEvent::die(WEB_ID)).await.unwrap();

    assert_eq!(
        iptables.commands(),
        vec![
            args(&["-t", "nat", "-L", "DOCKER", "-n", "--line-numbers"]),
            args(&["-t", "nat", "-D", "DOCKER", "1"]),
        ]
    );
    assert!(iptables.rules("DOCKER").is_empty());
    assert_eq!(registry.container_count().await, 0);
}

#[tokio::test]
async fn removal_keeps_foreign_and_other_container_rules() {
    let docker = Arc::new(TestDockerClient::new());
    let iptables = Arc::new(FakeIptables::new().with_chain(
        "DOCKER",
        &["RETURN     all  --  0.0.0.0/0            0.0.0.0/0"],
    ));
    let registry = registry(&docker, &iptables, false);

    docker.run_container(web()).await;
    docker.run_container(api()).await;
    registry.on_start(API_ID).await.unwrap();
    registry.on_start(WEB_ID).await.unwrap();
    assert_eq!(iptables.rules("DOCKER").len(), 3);

    registry.on_stop(API_ID).await.unwrap();

    let remaining = iptables.rules("DOCKER");
    assert_eq!(remaining.len(), 2);
    assert!(remaining[0].starts_with("RETURN"));
    assert!(remaining[1].contains("[abc123def456]"));
}

#[tokio::test]
async fn read_only_mode_never_mutates() {
    let docker = Arc::new(TestDockerClient::new());
    let iptables = Arc::new(FakeIptables::new().with_chain(
        "DOCKER",
        &["DNAT       tcp  --  0.0.0.0/0   0.0.0.0/0   tcp dpt:8080 /* Docker web[abc123def456] */ to:10.0.0.5:80"],
    ));
    let registry = registry(&docker, &iptables, true);
    assert!(registry.firewall().is_read_only());

    docker.run_container(web()).await;
    registry.resync().await.unwrap();
    registry.on_start(API_ID).await.unwrap();
    registry.on_stop(WEB_ID).await.unwrap();

    assert!(iptables.ops().iter().all(|op| op == "-L"));
    assert_eq!(iptables.ops().len(), 1);
    assert_eq!(iptables.rules("DOCKER").len(), 1);
}

#[tokio::test]
async fn resync_rebuilds_chain_from_runtime() {
    let docker = Arc::new(TestDockerClient::new());
    let iptables = Arc::new(FakeIptables::new().with_chain(
        "DOCKER",
        &["DNAT       tcp  --  0.0.0.0/0   0.0.0.0/0   tcp dpt:7070 /* Docker gone[ffffffffffff] */ to:10.0.0.9:70"],
    ));
    let registry = registry(&docker, &iptables, false);

    docker.run_container(web()).await;
    docker.run_container(api()).await;
    registry.resync().await.unwrap();

    let rules = iptables.rules("DOCKER");
    assert_eq!(rules.len(), 2);
    assert!(rules.iter().all(|r| !r.contains("ffffffffffff")));
    assert!(rules.iter().any(|r| r.contains("203.0.113.10") && r.contains("to:10.0.0.6:9000")));
    assert_eq!(registry.container_count().await, 2);

    docker.kill_container(API_ID).await;
    registry.resync().await.unwrap();
    assert_eq!(iptables.rules("DOCKER").len(), 1);
    assert!(!registry.is_tracked(API_ID).await);
}

#[tokio::test]
async fn rebuild_twice_yields_same_table() {
    let docker = Arc::new(TestDockerClient::new());
    let iptables = Arc::new(FakeIptables::new());
    let registry = registry(&docker, &iptables, false);

    docker.run_container(web()).await;
    docker.run_container(api()).await;
    registry.resync().await.unwrap();
    assert!(iptables.has_chain("DOCKER"));
    let first = iptables.rules("DOCKER");

    registry.resync().await.unwrap();
    assert_eq!(first, iptables.rules("DOCKER"));
}

#[tokio::test]
async fn duplicate_start_does_not_duplicate_rules() {
    let docker = Arc::new(TestDockerClient::new());
    let iptables = Arc::new(FakeIptables::new());
    let registry = registry(&docker, &iptables, false);

    docker.run_container(web()).await;
    registry.resync().await.unwrap();
    registry.on_start(WEB_ID).await.unwrap();
    registry.on_start(WEB_ID).await.unwrap();

    assert_eq!(iptables.rules("DOCKER").len(), 1);
}

#[tokio::test]
async fn start_for_missing_chain_logs_and_keeps_container() {
    let docker = Arc::new(TestDockerClient::new());
    let iptables = Arc::new(FakeIptables::new());
    let registry = registry(&docker, &iptables, false);

    docker.run_container(web()).await;
    // 체인이 없어 -A가 실패해도 추적은 유지됨
    registry.on_start(WEB_ID).await.unwrap();
    assert!(registry.is_tracked(WEB_ID).await);
    assert!(!iptables.has_chain("DOCKER"));
}

#[tokio::test]
async fn stop_with_missing_chain_falls_back_to_resync() {
    let docker = Arc::new(TestDockerClient::new());
    let iptables = Arc::new(FakeIptables::new());
    let registry = registry(&docker, &iptables, false);

    docker.run_container(web()).await;
    registry.on_start(WEB_ID).await.unwrap();

    // -L 실패 → 항목 유지 → resync가 체인을 만들고 규칙을 다시 추가
    registry.on_stop(WEB_ID).await.unwrap();
    assert!(registry.is_tracked(WEB_ID).await);
    assert_eq!(iptables.rules("DOCKER").len(), 1);
}

#[tokio::test]
async fn service_follows_event_stream() {
    let docker = Arc::new(TestDockerClient::new());
    let iptables = Arc::new(FakeIptables::new());
    let events = docker.event_sender().await;

    let mut sync = PortSyncBuilder::new()
        .config(config(false))
        .docker_client(Arc::clone(&docker))
        .command_runner(Arc::clone(&iptables))
        .build()
        .unwrap();
    sync.start().await.unwrap();
    assert!(iptables.has_chain("DOCKER"));
    assert!(iptables.rules("DOCKER").is_empty());

    docker.run_container(web()).await;
    events.send(RuntimeEvent::start(WEB_ID)).await.unwrap();
    assert!(wait_for(|| iptables.rules("DOCKER").len() == 1).await);

    docker.kill_container(WEB_ID).await;
    events.send(RuntimeEvent::die(WEB_ID)).await.unwrap();
    assert!(wait_for(|| iptables.rules("DOCKER").is_empty()).await);

    assert!(sync.health_check().await.is_healthy());
    sync.stop().await.unwrap();
}

#[tokio::test]
async fn operator_resync_through_service_registry() {
    let docker = Arc::new(TestDockerClient::new());
    let iptables = Arc::new(FakeIptables::new());

    let mut sync = PortSyncBuilder::new()
        .config(config(false))
        .docker_client(Arc::clone(&docker))
        .command_runner(Arc::clone(&iptables))
        .build()
        .unwrap();
    sync.start().await.unwrap();

    // 이벤트 없이 실행된 컨테이너는 resync로만 반영됨
    docker.run_container(api()).await;
    sync.registry().resync().await.unwrap();
    assert_eq!(iptables.rules("DOCKER").len(), 1);

    sync.stop().await.unwrap();
}

async fn wait_for<F: Fn() -> bool>(condition: F) -> bool {
    for _ in 0..200 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    false
}
