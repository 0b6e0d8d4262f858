//! Docker API abstraction for testability.
//!
//! The [`DockerClient`] trait covers the three runtime interactions the
//! synchronizer needs: listing running containers, inspecting one container
//! for its name/address/port bindings, and subscribing to lifecycle events.
//! Production code uses [`BollardDockerClient`]; tests use `MockDockerClient`.
//!
//! # Container ID Validation
//!
//! IDs passed to [`DockerClient::inspect`] are validated before reaching
//! the daemon:
//! - Must be 1-64 characters
//! - Must contain only ASCII hex digits ([0-9a-fA-F])

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use bollard::models::{ContainerInspectResponse, EventMessage};
use futures::StreamExt;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use portkeeper_core::types::{Container, PortBinding, container_name_from_runtime};

use crate::error::SyncError;
use crate::event::{EventStatus, RuntimeEvent};

/// Timeout in seconds for requests to the Docker daemon.
const DOCKER_TIMEOUT_SECS: u64 = 120;

/// Validates a container ID to prevent injection attacks.
fn validate_container_id(id: &str) -> Result<(), SyncError> {
    if id.is_empty() || id.len() > 64 {
        return Err(SyncError::DockerApi(format!(
            "invalid container ID: length {} (must be 1-64)",
            id.len()
        )));
    }
    if !id.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(SyncError::DockerApi(
            "invalid container ID: contains non-hex characters".to_owned(),
        ));
    }
    Ok(())
}

/// Trait abstracting the container runtime.
///
/// The trait is `Send + Sync + 'static`, allowing it to be shared between
/// the event listener task and direct callers through an `Arc`.
pub trait DockerClient: Send + Sync + 'static {
    /// Lists the IDs of all running containers.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::DockerApi` if the Docker API call fails.
    fn list_running(&self) -> impl Future<Output = Result<Vec<String>, SyncError>> + Send;

    /// Inspects a container and returns its name, internal address and
    /// published port bindings.
    ///
    /// # Errors
    ///
    /// - `SyncError::ContainerNotFound`: Container does not exist (404)
    /// - `SyncError::DockerApi`: Invalid ID or other API errors
    fn inspect(&self, id: &str) -> impl Future<Output = Result<Container, SyncError>> + Send;

    /// Streams container lifecycle events into `tx` until the stream ends.
    ///
    /// Returns `Ok(())` when the daemon closes the stream and an error when
    /// the stream fails or the receiving side has gone away.
    fn stream_events(
        &self,
        tx: mpsc::Sender<RuntimeEvent>,
    ) -> impl Future<Output = Result<(), SyncError>> + Send;

    /// Checks Docker daemon connectivity.
    fn ping(&self) -> impl Future<Output = Result<(), SyncError>> + Send;
}

/// Production Docker client implementation using `bollard`.
pub struct BollardDockerClient {
    docker: Arc<bollard::Docker>,
}

impl BollardDockerClient {
    /// Connects to Docker using the default local socket.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::DockerConnection` if the connection fails.
    pub fn connect_local() -> Result<Self, SyncError> {
        let docker = bollard::Docker::connect_with_local_defaults().map_err(|e| {
            SyncError::DockerConnection(format!("failed to connect to docker: {e}"))
        })?;
        Ok(Self {
            docker: Arc::new(docker),
        })
    }

    /// Connects to Docker using a socket URL.
    ///
    /// Accepts `unix:///path/to/docker.sock`, a bare socket path,
    /// or `tcp://host:port` / `http://host:port`.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::DockerConnection` if the connection fails.
    pub fn connect(url: &str) -> Result<Self, SyncError> {
        let result = if let Some(addr) = url
            .strip_prefix("tcp://")
            .or_else(|| url.strip_prefix("http://"))
        {
            bollard::Docker::connect_with_http(addr, DOCKER_TIMEOUT_SECS, bollard::API_DEFAULT_VERSION)
        } else {
            let path = url.strip_prefix("unix://").unwrap_or(url);
            bollard::Docker::connect_with_socket(path, DOCKER_TIMEOUT_SECS, bollard::API_DEFAULT_VERSION)
        };

        let docker = result.map_err(|e| {
            SyncError::DockerConnection(format!("failed to connect to docker at {url}: {e}"))
        })?;
        Ok(Self {
            docker: Arc::new(docker),
        })
    }
}

impl DockerClient for BollardDockerClient {
    async fn list_running(&self) -> Result<Vec<String>, SyncError> {
        use bollard::container::ListContainersOptions;

        let options = ListContainersOptions::<String> {
            all: false,
            ..Default::default()
        };

        let containers = self
            .docker
            .list_containers(Some(options))
            .await
            .map_err(|e| SyncError::DockerApi(format!("list containers failed: {e}")))?;

        Ok(containers.into_iter().filter_map(|c| c.id).collect())
    }

    async fn inspect(&self, id: &str) -> Result<Container, SyncError> {
        validate_container_id(id)?;

        let details = self
            .docker
            .inspect_container(id, None)
            .await
            .map_err(|e| match e {
                bollard::errors::Error::DockerResponseServerError {
                    status_code: 404, ..
                } => SyncError::ContainerNotFound(id.to_owned()),
                other => SyncError::DockerApi(format!("inspect container failed: {other}")),
            })?;

        Ok(container_from_inspect(details))
    }

    async fn stream_events(&self, tx: mpsc::Sender<RuntimeEvent>) -> Result<(), SyncError> {
        use bollard::system::EventsOptions;

        let mut filters = HashMap::new();
        filters.insert("type".to_owned(), vec!["container".to_owned()]);
        filters.insert(
            "event".to_owned(),
            vec!["start".to_owned(), "die".to_owned(), "stop".to_owned()],
        );

        let mut stream = self.docker.events(Some(EventsOptions::<String> {
            since: None,
            until: None,
            filters,
        }));

        while let Some(message) = stream.next().await {
            let message =
                message.map_err(|e| SyncError::DockerApi(format!("event stream failed: {e}")))?;
            debug!(?message, "received docker event");

            let Some(event) = runtime_event_from_message(message) else {
                continue;
            };
            tx.send(event)
                .await
                .map_err(|_| SyncError::Channel("event receiver dropped".to_owned()))?;
        }

        Ok(())
    }

    async fn ping(&self) -> Result<(), SyncError> {
        self.docker
            .ping()
            .await
            .map_err(|e| SyncError::DockerConnection(format!("ping failed: {e}")))?;
        Ok(())
    }
}

/// Builds a [`Container`] from an inspect response.
///
/// The address is taken from the default bridge settings, falling back to
/// the first attached network (by name) that has one. Host ports that are
/// missing or not numeric are skipped.
pub fn container_from_inspect(details: ContainerInspectResponse) -> Container {
    let id = details.id.unwrap_or_default();
    let name = details
        .name
        .as_deref()
        .map(container_name_from_runtime)
        .unwrap_or_default();

    let mut address = String::new();
    let mut ports: HashMap<String, Vec<PortBinding>> = HashMap::new();

    if let Some(settings) = details.network_settings {
        address = settings.ip_address.unwrap_or_default();
        if address.is_empty() {
            let mut networks: Vec<_> = settings.networks.unwrap_or_default().into_iter().collect();
            networks.sort_by(|a, b| a.0.cmp(&b.0));
            address = networks
                .into_iter()
                .filter_map(|(_, endpoint)| endpoint.ip_address)
                .find(|ip| !ip.is_empty())
                .unwrap_or_default();
        }

        for (port_key, bindings) in settings.ports.unwrap_or_default() {
            let Some(bindings) = bindings else {
                continue;
            };
            for binding in bindings {
                let raw_port = binding.host_port.unwrap_or_default();
                match raw_port.parse::<u16>() {
                    Ok(host_port) => ports
                        .entry(port_key.clone())
                        .or_default()
                        .push(PortBinding::new(binding.host_ip.unwrap_or_default(), host_port)),
                    Err(_) => warn!(
                        container_id = %id,
                        port = %port_key,
                        host_port = %raw_port,
                        "ignoring binding with invalid host port"
                    ),
                }
            }
        }
    }

    Container {
        id,
        name,
        address,
        ports,
    }
}

/// Converts a Docker event message into a [`RuntimeEvent`].
///
/// Messages without an actor ID or action carry nothing to correlate and
/// are dropped.
pub fn runtime_event_from_message(message: EventMessage) -> Option<RuntimeEvent> {
    let id = message.actor.and_then(|actor| actor.id)?;
    let action = message.action?;
    Some(RuntimeEvent::new(id, EventStatus::parse(&action)))
}

/// 테스트용 Mock Docker 클라이언트
///
/// 런타임 상태를 테스트 도중 변경할 수 있도록 내부 상태를 `Mutex`로 감쌉니다.
#[cfg(test)]
#[derive(Default)]
pub struct MockDockerClient {
    state: std::sync::Mutex<MockState>,
}

#[cfg(test)]
#[derive(Default)]
struct MockState {
    containers: Vec<Container>,
    failing_inspect: Vec<String>,
    fail_list: bool,
    fail_ping: bool,
    events: Vec<RuntimeEvent>,
    live_stream: Option<mpsc::Sender<RuntimeEvent>>,
    stream_failures: usize,
    stream_calls: usize,
    list_calls: usize,
    inspect_calls: usize,
}

#[cfg(test)]
impl MockDockerClient {
    /// 빈 런타임으로 mock 클라이언트를 생성합니다.
    pub fn new() -> Self {
        Self::default()
    }

    /// 실행 중인 컨테이너 목록을 지정합니다.
    pub fn with_containers(self, containers: Vec<Container>) -> Self {
        self.lock().containers = containers;
        self
    }

    /// 이벤트 스트림이 내보낼 이벤트를 지정합니다.
    pub fn with_events(self, events: Vec<RuntimeEvent>) -> Self {
        self.lock().events = events;
        self
    }

    /// 현재 구독 중인 스트림으로 이벤트를 보냅니다.
    ///
    /// 구독 전이거나 채널이 가득 찼으면 `false`를 반환합니다.
    pub fn emit(&self, event: RuntimeEvent) -> bool {
        self.lock()
            .live_stream
            .as_ref()
            .is_some_and(|tx| tx.try_send(event).is_ok())
    }

    /// 처음 `count`번의 이벤트 구독이 실패하도록 설정합니다.
    pub fn with_stream_failures(self, count: usize) -> Self {
        self.lock().stream_failures = count;
        self
    }

    /// 컨테이너를 추가합니다 (런타임에서 시작됨).
    pub fn add_container(&self, container: Container) {
        self.lock().containers.push(container);
    }

    /// 컨테이너를 제거합니다 (런타임에서 종료됨).
    pub fn remove_container(&self, id: &str) {
        self.lock().containers.retain(|c| c.id != id);
    }

    /// 특정 ID의 inspect가 실패하도록 설정합니다.
    pub fn fail_inspect_for(&self, id: &str) {
        self.lock().failing_inspect.push(id.to_owned());
    }

    /// list 호출이 실패하도록 설정합니다.
    pub fn set_fail_list(&self, fail: bool) {
        self.lock().fail_list = fail;
    }

    /// ping이 실패하도록 설정합니다.
    pub fn set_fail_ping(&self, fail: bool) {
        self.lock().fail_ping = fail;
    }

    /// list 호출 횟수
    pub fn list_calls(&self) -> usize {
        self.lock().list_calls
    }

    /// 이벤트 구독 횟수
    pub fn stream_calls(&self) -> usize {
        self.lock().stream_calls
    }

    /// inspect 호출 횟수
    pub fn inspect_calls(&self) -> usize {
        self.lock().inspect_calls
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MockState> {
        self.state.lock().expect("mock state poisoned")
    }
}

#[cfg(test)]
impl DockerClient for MockDockerClient {
    async fn list_running(&self) -> Result<Vec<String>, SyncError> {
        let mut state = self.lock();
        state.list_calls += 1;
        if state.fail_list {
            return Err(SyncError::DockerApi("mock list failure".to_owned()));
        }
        Ok(state.containers.iter().map(|c| c.id.clone()).collect())
    }

    async fn inspect(&self, id: &str) -> Result<Container, SyncError> {
        let mut state = self.lock();
        state.inspect_calls += 1;
        if state.failing_inspect.iter().any(|f| f == id) {
            return Err(SyncError::DockerApi("mock inspect failure".to_owned()));
        }
        state
            .containers
            .iter()
            .find(|c| c.id == id)
            .cloned()
            .ok_or_else(|| SyncError::ContainerNotFound(id.to_owned()))
    }

    async fn stream_events(&self, tx: mpsc::Sender<RuntimeEvent>) -> Result<(), SyncError> {
        let events = {
            let mut state = self.lock();
            state.stream_calls += 1;
            if state.stream_failures > 0 {
                state.stream_failures -= 1;
                return Err(SyncError::DockerConnection("mock stream failure".to_owned()));
            }
            state.live_stream = Some(tx.clone());
            std::mem::take(&mut state.events)
        };
        for event in events {
            tx.send(event)
                .await
                .map_err(|_| SyncError::Channel("event receiver dropped".to_owned()))?;
        }
        // 실제 스트림처럼 종료되지 않고 대기
        std::future::pending::<()>().await;
        Ok(())
    }

    async fn ping(&self) -> Result<(), SyncError> {
        if self.lock().fail_ping {
            return Err(SyncError::DockerConnection("mock ping failure".to_owned()));
        }
        Ok(())
    }
}
