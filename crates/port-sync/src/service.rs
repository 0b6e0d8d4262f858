//! 포트 동기화 서비스 -- 이벤트 구독/처리/초기 동기화 전체 흐름 관리
//!
//! [`PortSync`]는 core의 [`Pipeline`] trait을 구현하여
//! `portkeeper-daemon`에서 start/stop/health_check 생명주기로 관리됩니다.
//!
//! # 내부 아키텍처
//! ```text
//! Docker events ──listener──mpsc──> processor ──> ContainerRegistry.dispatch()
//!      |                                                  |
//!   reconnect ──> ContainerRegistry.resync()      FirewallSynchronizer
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use portkeeper_core::error::{PipelineError, PortkeeperError};
use portkeeper_core::pipeline::{HealthStatus, Pipeline};

use crate::command::CommandRunner;
use crate::config::SyncConfig;
use crate::docker::DockerClient;
use crate::error::SyncError;
use crate::event::RuntimeEvent;
use crate::firewall::FirewallSynchronizer;
use crate::registry::ContainerRegistry;

/// 정지 시 태스크 종료 대기 시간
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

/// 서비스 실행 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SyncState {
    /// 초기화됨, 아직 시작하지 않음
    Initialized,
    /// 실행 중
    Running,
    /// 정지됨
    Stopped,
}

/// 포트 동기화 서비스
///
/// # 사용 예시
/// ```ignore
/// use portkeeper_sync::{PortSyncBuilder, BollardDockerClient, ProcessRunner};
///
/// let mut sync = PortSyncBuilder::new()
///     .config(config)
///     .docker_client(Arc::new(BollardDockerClient::connect(&socket)?))
///     .command_runner(Arc::new(ProcessRunner::new()))
///     .build()?;
///
/// sync.start().await?;
/// ```
pub struct PortSync<D: DockerClient, R: CommandRunner> {
    config: SyncConfig,
    state: SyncState,
    docker: Arc<D>,
    registry: Arc<ContainerRegistry<D, R>>,
    cancel: CancellationToken,
    tasks: Vec<tokio::task::JoinHandle<()>>,
    events_processed: Arc<AtomicU64>,
    reconnects: Arc<AtomicU64>,
}

impl<D: DockerClient, R: CommandRunner> PortSync<D, R> {
    /// 현재 상태명을 반환합니다.
    pub fn state_name(&self) -> &str {
        match self.state {
            SyncState::Initialized => "initialized",
            SyncState::Running => "running",
            SyncState::Stopped => "stopped",
        }
    }

    /// 공유 레지스트리를 반환합니다.
    ///
    /// 운영자 요청 resync 등 이벤트 루프 밖에서 직접 호출할 때 사용합니다.
    pub fn registry(&self) -> Arc<ContainerRegistry<D, R>> {
        Arc::clone(&self.registry)
    }

    /// 서비스 설정
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// 처리된 이벤트 수
    pub fn events_processed(&self) -> u64 {
        self.events_processed.load(Ordering::Relaxed)
    }

    /// 이벤트 스트림 재연결 횟수
    pub fn reconnects(&self) -> u64 {
        self.reconnects.load(Ordering::Relaxed)
    }

    /// 태스크에 취소를 알리고 종료를 기다립니다.
    ///
    /// 처리 중인 이벤트는 끝까지 실행됩니다. 유예 시간 안에 끝나지 않은
    /// 태스크만 강제 중단합니다.
    async fn shutdown_tasks(&mut self) {
        self.cancel.cancel();
        for mut task in self.tasks.drain(..) {
            match tokio::time::timeout(SHUTDOWN_GRACE, &mut task).await {
                Ok(Err(e)) if e.is_panic() => {
                    error!(error = %e, "sync task panicked");
                }
                Ok(_) => {}
                Err(_) => {
                    warn!(
                        grace_secs = SHUTDOWN_GRACE.as_secs(),
                        "sync task did not stop in time, aborting"
                    );
                    task.abort();
                    let _ = task.await;
                }
            }
        }
    }
}

impl<D: DockerClient, R: CommandRunner> Pipeline for PortSync<D, R> {
    async fn start(&mut self) -> Result<(), PortkeeperError> {
        if self.state == SyncState::Running {
            return Err(PipelineError::AlreadyRunning.into());
        }

        info!(
            read_only = self.config.read_only,
            chains = self.registry.firewall().chains().len(),
            "starting port sync"
        );

        if let Err(e) = self.docker.ping().await {
            warn!(error = %e, "docker daemon not available, event stream will retry");
        }

        // 새 토큰: stop 이후 재시작 가능
        self.cancel = CancellationToken::new();
        let (tx, rx) = mpsc::channel(self.config.event_channel_capacity);

        let listener = EventListener {
            docker: Arc::clone(&self.docker),
            registry: Arc::clone(&self.registry),
            max_attempts: self.config.reconnect_max_attempts,
            backoff_base: Duration::from_millis(self.config.reconnect_backoff_base_ms),
            reconnects: Arc::clone(&self.reconnects),
            cancel: self.cancel.clone(),
        };
        self.tasks.push(tokio::spawn(listener.run(tx)));

        let registry = Arc::clone(&self.registry);
        let events_processed = Arc::clone(&self.events_processed);
        let cancel = self.cancel.clone();
        self.tasks.push(tokio::spawn(async move {
            process_events(registry, rx, events_processed, cancel).await;
        }));

        // 초기 동기화 실패는 시작 실패로 처리
        if let Err(e) = self.registry.resync().await {
            error!(error = %e, "initial resync failed");
            self.shutdown_tasks().await;
            self.state = SyncState::Stopped;
            return Err(e.into());
        }

        self.state = SyncState::Running;
        let containers = self.registry.container_count().await;
        info!(containers, "port sync started");
        Ok(())
    }

    async fn stop(&mut self) -> Result<(), PortkeeperError> {
        if self.state != SyncState::Running {
            return Err(PipelineError::NotRunning.into());
        }

        info!("stopping port sync");
        self.shutdown_tasks().await;
        self.state = SyncState::Stopped;
        info!("port sync stopped");
        Ok(())
    }

    async fn health_check(&self) -> HealthStatus {
        match self.state {
            SyncState::Running => {
                if self.docker.ping().await.is_ok() {
                    HealthStatus::Healthy
                } else {
                    HealthStatus::Degraded("docker daemon not reachable".to_owned())
                }
            }
            SyncState::Initialized => HealthStatus::Unhealthy("not started".to_owned()),
            SyncState::Stopped => HealthStatus::Unhealthy("stopped".to_owned()),
        }
    }
}

/// 이벤트 구독 태스크
///
/// 스트림이 끊기면 선형 백오프 후 재구독하고, 놓친 이벤트를 보정하기 위해
/// 재구독 직전에 전체 resync를 수행합니다.
struct EventListener<D: DockerClient, R: CommandRunner> {
    docker: Arc<D>,
    registry: Arc<ContainerRegistry<D, R>>,
    max_attempts: u32,
    backoff_base: Duration,
    reconnects: Arc<AtomicU64>,
    cancel: CancellationToken,
}

impl<D: DockerClient, R: CommandRunner> EventListener<D, R> {
    async fn run(self, tx: mpsc::Sender<RuntimeEvent>) {
        let mut attempt: u32 = 0;

        loop {
            let result = tokio::select! {
                _ = self.cancel.cancelled() => return,
                result = self.docker.stream_events(tx.clone()) => result,
            };

            match result {
                Ok(()) => {
                    warn!("docker event stream ended");
                    attempt = 0;
                }
                Err(SyncError::Channel(_)) => {
                    info!("event receiver closed, stopping listener");
                    return;
                }
                Err(e) => {
                    warn!(error = %e, attempt, "docker event stream failed");
                }
            }

            attempt += 1;
            if attempt > self.max_attempts {
                error!(
                    attempts = self.max_attempts,
                    "giving up on docker event stream"
                );
                return;
            }

            let backoff = self.backoff_base * attempt;
            debug!(
                backoff_ms = u64::try_from(backoff.as_millis()).unwrap_or(u64::MAX),
                attempt,
                "reconnecting to docker event stream"
            );
            tokio::select! {
                _ = self.cancel.cancelled() => return,
                _ = tokio::time::sleep(backoff) => {}
            }

            self.reconnects.fetch_add(1, Ordering::Relaxed);
            if let Err(e) = self.registry.resync().await {
                error!(error = %e, "resync after reconnect failed");
            }
        }
    }
}

/// 이벤트 처리 루프
///
/// 이벤트는 하나씩 끝까지 처리한 뒤 다음 이벤트를 받습니다.
async fn process_events<D: DockerClient, R: CommandRunner>(
    registry: Arc<ContainerRegistry<D, R>>,
    mut rx: mpsc::Receiver<RuntimeEvent>,
    events_processed: Arc<AtomicU64>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!("event processor cancelled");
                break;
            }
            maybe_event = rx.recv() => {
                let Some(event) = maybe_event else {
                    info!("event channel closed, stopping processor");
                    break;
                };
                debug!(event = %event, "processing runtime event");
                if let Err(e) = registry.dispatch(&event).await {
                    error!(event = %event, error = %e, "failed to handle runtime event");
                }
                events_processed.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}

/// 포트 동기화 서비스 빌더
pub struct PortSyncBuilder<D: DockerClient, R: CommandRunner> {
    config: SyncConfig,
    docker: Option<Arc<D>>,
    runner: Option<Arc<R>>,
}

impl<D: DockerClient, R: CommandRunner> PortSyncBuilder<D, R> {
    /// 새 빌더를 생성합니다.
    pub fn new() -> Self {
        Self {
            config: SyncConfig::default(),
            docker: None,
            runner: None,
        }
    }

    /// 서비스 설정을 지정합니다.
    pub fn config(mut self, config: SyncConfig) -> Self {
        self.config = config;
        self
    }

    /// Docker 클라이언트를 설정합니다.
    pub fn docker_client(mut self, docker: Arc<D>) -> Self {
        self.docker = Some(docker);
        self
    }

    /// 명령 실행기를 설정합니다.
    pub fn command_runner(mut self, runner: Arc<R>) -> Self {
        self.runner = Some(runner);
        self
    }

    /// 서비스를 빌드합니다.
    pub fn build(self) -> Result<PortSync<D, R>, SyncError> {
        self.config.validate()?;

        let docker = self.docker.ok_or_else(|| SyncError::Config {
            field: "docker_client".to_owned(),
            reason: "docker client must be provided".to_owned(),
        })?;
        let runner = self.runner.ok_or_else(|| SyncError::Config {
            field: "command_runner".to_owned(),
            reason: "command runner must be provided".to_owned(),
        })?;

        let firewall = FirewallSynchronizer::new(runner, &self.config);
        let registry = Arc::new(ContainerRegistry::new(Arc::clone(&docker), firewall));

        Ok(PortSync {
            config: self.config,
            state: SyncState::Initialized,
            docker,
            registry,
            cancel: CancellationToken::new(),
            tasks: Vec::new(),
            events_processed: Arc::new(AtomicU64::new(0)),
            reconnects: Arc::new(AtomicU64::new(0)),
        })
    }
}

impl<D: DockerClient, R: CommandRunner> Default for PortSyncBuilder<D, R> {
    fn default() -> Self {
        Self::new()
    }
}
