//! 외부 명령 실행 추상화
//!
//! [`CommandRunner`] 트레이트는 방화벽 바이너리 호출을 추상화합니다.
//! 프로덕션에서는 [`ProcessRunner`]가 `tokio::process`로 실제 프로세스를 실행하고,
//! 테스트에서는 `MockCommandRunner`가 호출을 기록하고 응답을 스크립트합니다.

use std::future::Future;

use crate::error::SyncError;

/// 완료된 명령의 결과
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// 종료 코드 0으로 끝났는지 여부
    pub success: bool,
    /// 종료 코드 (시그널로 종료된 경우 `None`)
    pub code: Option<i32>,
    /// 표준 출력
    pub stdout: String,
    /// 표준 에러
    pub stderr: String,
}

impl CommandOutput {
    /// 성공한 명령 결과를 생성합니다.
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            success: true,
            code: Some(0),
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    /// 실패한 명령 결과를 생성합니다.
    pub fn failed(code: i32, stderr: impl Into<String>) -> Self {
        Self {
            success: false,
            code: Some(code),
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    /// stdout과 stderr를 합친 출력
    pub fn combined(&self) -> String {
        match (self.stdout.trim(), self.stderr.trim()) {
            ("", err) => err.to_owned(),
            (out, "") => out.to_owned(),
            (out, err) => format!("{out}\n{err}"),
        }
    }
}

/// Runs external commands.
///
/// A runner reports how the process exited; deciding whether a non-zero
/// exit is an error is left to the caller. `Err` is reserved for commands
/// that could not be started at all.
pub trait CommandRunner: Send + Sync + 'static {
    /// Runs `program` with `args` to completion.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::CommandSpawn` if the process cannot be started.
    fn run(
        &self,
        program: &str,
        args: &[String],
    ) -> impl Future<Output = Result<CommandOutput, SyncError>> + Send;
}

/// `tokio::process` 기반 명령 실행기
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessRunner;

impl ProcessRunner {
    /// 새 실행기를 생성합니다.
    pub fn new() -> Self {
        Self
    }
}

impl CommandRunner for ProcessRunner {
    async fn run(&self, program: &str, args: &[String]) -> Result<CommandOutput, SyncError> {
        let output = tokio::process::Command::new(program)
            .args(args)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| SyncError::CommandSpawn {
                program: program.to_owned(),
                reason: e.to_string(),
            })?;

        Ok(CommandOutput {
            success: output.status.success(),
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

/// 명령줄을 로그/에러 메시지용 문자열로 만듭니다.
pub fn command_line(program: &str, args: &[String]) -> String {
    let mut line = program.to_owned();
    for arg in args {
        line.push(' ');
        if arg.contains(char::is_whitespace) {
            line.push('\'');
            line.push_str(arg);
            line.push('\'');
        } else {
            line.push_str(arg);
        }
    }
    line
}

/// 테스트용 Mock 명령 실행기
///
/// 모든 호출을 기록하고, 명령줄에 특정 조각이 포함되면 미리 지정한 결과를 반환합니다.
/// 일치하는 응답이 없으면 빈 출력의 성공으로 처리합니다.
#[cfg(test)]
#[derive(Default)]
pub struct MockCommandRunner {
    state: std::sync::Mutex<MockRunnerState>,
}

#[cfg(test)]
#[derive(Default)]
struct MockRunnerState {
    calls: Vec<String>,
    responses: Vec<(String, CommandOutput)>,
    spawn_failure: bool,
    delay: Option<std::time::Duration>,
}

#[cfg(test)]
impl MockCommandRunner {
    /// 모든 명령이 성공하는 실행기를 생성합니다.
    pub fn new() -> Self {
        Self::default()
    }

    /// 명령줄에 `fragment`가 포함되면 `output`을 반환합니다.
    ///
    /// 먼저 등록된 응답이 우선합니다.
    pub fn respond_when(self, fragment: &str, output: CommandOutput) -> Self {
        self.set_response(fragment, output);
        self
    }

    /// 명령줄에 `fragment`가 포함되면 종료 코드 1로 실패합니다.
    pub fn fail_when(self, fragment: &str) -> Self {
        self.respond_when(fragment, CommandOutput::failed(1, "mock failure"))
    }

    /// 실행 도중 응답을 추가합니다.
    pub fn set_response(&self, fragment: &str, output: CommandOutput) {
        self.lock().responses.push((fragment.to_owned(), output));
    }

    /// 모든 명령이 시작 단계에서 실패하도록 설정합니다.
    pub fn with_spawn_failure(self) -> Self {
        self.lock().spawn_failure = true;
        self
    }

    /// 이후 각 명령이 결과를 반환하기 전 `delay`만큼 대기합니다.
    pub fn set_delay(&self, delay: std::time::Duration) {
        self.lock().delay = Some(delay);
    }

    /// 기록된 명령줄 목록 (프로그램 포함)
    pub fn calls(&self) -> Vec<String> {
        self.lock().calls.clone()
    }

    /// `fragment`를 포함하는 호출만 반환합니다.
    pub fn calls_matching(&self, fragment: &str) -> Vec<String> {
        self.lock()
            .calls
            .iter()
            .filter(|c| c.contains(fragment))
            .cloned()
            .collect()
    }

    /// 기록된 호출을 비웁니다.
    pub fn clear_calls(&self) {
        self.lock().calls.clear();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MockRunnerState> {
        self.state.lock().expect("mock runner state poisoned")
    }
}

#[cfg(test)]
impl CommandRunner for MockCommandRunner {
    async fn run(&self, program: &str, args: &[String]) -> Result<CommandOutput, SyncError> {
        let line = command_line(program, args);
        let (result, delay) = {
            let mut state = self.lock();
            state.calls.push(line.clone());

            let result = if state.spawn_failure {
                Err(SyncError::CommandSpawn {
                    program: program.to_owned(),
                    reason: "mock spawn failure".to_owned(),
                })
            } else {
                Ok(state
                    .responses
                    .iter()
                    .find(|(fragment, _)| line.contains(fragment.as_str()))
                    .map(|(_, output)| output.clone())
                    .unwrap_or_else(|| CommandOutput::ok("")))
            };
            (result, state.delay)
        };

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        result
    }
}
