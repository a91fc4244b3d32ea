//! Backend process - spawning with stdio capture and termination.
//!
//! The supervisor only sees the [`BackendLauncher`] / [`BackendProcess`] pair and
//! the [`ProcessEvents`] channels, so its logic runs against a fake in tests.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command as TokioCommand};
use tokio::sync::{mpsc, oneshot};

use super::output::{OutputChunk, StreamSource};
use crate::config::ProcessEnvironment;
use crate::error::LauncherError;

/// Backend script shipped next to the launcher executable.
pub const BACKEND_SCRIPT: &str = "server.py";

/// Exit code reported when the real status could not be observed.
pub const UNKNOWN_EXIT_CODE: i32 = 1;

const READ_BUFFER_SIZE: usize = 8 * 1024;
const CHUNK_CHANNEL_CAPACITY: usize = 256;

// ─── Interface ───────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminateMode {
    /// SIGTERM on Unix; the child gets a chance to clean up
    Graceful,
    /// SIGKILL / TerminateProcess
    Force,
}

/// One inbound channel per event source of a running backend.
pub struct ProcessEvents {
    pub stdout: mpsc::Receiver<OutputChunk>,
    pub stderr: mpsc::Receiver<OutputChunk>,
    /// Fires once, after the process has actually terminated.
    pub exit: oneshot::Receiver<i32>,
}

/// Control side of a spawned backend.
pub trait BackendProcess: Send {
    fn pid(&self) -> Option<u32>;

    /// Request termination. Does not wait; the exit arrives on [`ProcessEvents::exit`].
    fn terminate(&mut self, mode: TerminateMode) -> Result<(), LauncherError>;
}

/// Starts backends.
pub trait BackendLauncher {
    type Process: BackendProcess;

    fn launch(&self, env: &ProcessEnvironment) -> Result<(Self::Process, ProcessEvents), LauncherError>;
}

// ─── Backend Command ─────────────────────────────────────────

/// Program and arguments used to start the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendCommand {
    pub program: OsString,
    /// Script passed as the first argument; must exist at launch time
    pub script: Option<PathBuf>,
    pub args: Vec<OsString>,
}

impl BackendCommand {
    pub fn new(program: impl Into<OsString>, args: impl IntoIterator<Item = impl Into<OsString>>) -> Self {
        Self {
            program: program.into(),
            script: None,
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    /// `<python> <install_dir>/server.py`
    pub fn locate(install_dir: &Path, python: &str) -> Self {
        Self {
            program: OsString::from(python),
            script: Some(install_dir.join(BACKEND_SCRIPT)),
            args: Vec::new(),
        }
    }

    fn check_script(&self) -> Result<(), LauncherError> {
        match &self.script {
            Some(script) if !script.is_file() => Err(LauncherError::Spawn {
                program: script.display().to_string(),
                source: std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    "backend script not found",
                ),
            }),
            _ => Ok(()),
        }
    }

    fn display_name(&self) -> String {
        let mut name = self.program.to_string_lossy().into_owned();
        if let Some(script) = &self.script {
            name.push(' ');
            name.push_str(&script.to_string_lossy());
        }
        for arg in &self.args {
            name.push(' ');
            name.push_str(&arg.to_string_lossy());
        }
        name
    }
}

// ─── Real Child Process ──────────────────────────────────────

/// Launches [`BackendCommand`] as an OS process.
pub struct CommandLauncher {
    command: BackendCommand,
}

impl CommandLauncher {
    pub fn new(command: BackendCommand) -> Self {
        Self { command }
    }
}

impl BackendLauncher for CommandLauncher {
    type Process = ChildProcess;

    fn launch(&self, env: &ProcessEnvironment) -> Result<(ChildProcess, ProcessEvents), LauncherError> {
        self.command.check_script()?;

        tracing::debug!(
            "Launching {} with {} environment variables",
            self.command.display_name(),
            env.len()
        );
        let mut cmd = TokioCommand::new(&self.command.program);
        if let Some(script) = &self.command.script {
            cmd.arg(script);
        }
        cmd.args(&self.command.args)
            .env_clear()
            .envs(env.iter())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        // 터미널의 Ctrl+C 는 런처만 받고, 백엔드 종료는 슈퍼바이저가 결정
        #[cfg(unix)]
        cmd.process_group(0);
        apply_creation_flags(&mut cmd);

        let mut child = cmd.spawn().map_err(|e| LauncherError::Spawn {
            program: self.command.display_name(),
            source: e,
        })?;
        let pid = child.id();
        tracing::info!("Backend started with PID {}", pid.unwrap_or(0));

        let (stdout_tx, stdout_rx) = mpsc::channel(CHUNK_CHANNEL_CAPACITY);
        let (stderr_tx, stderr_rx) = mpsc::channel(CHUNK_CHANNEL_CAPACITY);
        let (exit_tx, exit_rx) = oneshot::channel();
        let (control_tx, control_rx) = mpsc::unbounded_channel();

        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(pump(stdout, StreamSource::Stdout, stdout_tx));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(pump(stderr, StreamSource::Stderr, stderr_tx));
        }
        tokio::spawn(wait_for_exit(child, control_rx, exit_tx));

        Ok((
            ChildProcess { pid, control: control_tx },
            ProcessEvents {
                stdout: stdout_rx,
                stderr: stderr_rx,
                exit: exit_rx,
            },
        ))
    }
}

/// Handle to a backend started by [`CommandLauncher`].
///
/// The `Child` itself lives in the waiter task; dropping this handle while the
/// backend still runs kills it.
pub struct ChildProcess {
    pid: Option<u32>,
    control: mpsc::UnboundedSender<TerminateMode>,
}

impl BackendProcess for ChildProcess {
    fn pid(&self) -> Option<u32> {
        self.pid
    }

    fn terminate(&mut self, mode: TerminateMode) -> Result<(), LauncherError> {
        tracing::info!("Sending {:?} termination request to backend (pid: {:?})", mode, self.pid);
        // 대기 태스크가 이미 끝났다면 프로세스도 이미 종료된 상태
        if self.control.send(mode).is_err() {
            tracing::debug!("Backend already exited, termination request dropped");
        }
        Ok(())
    }
}

/// Forward raw chunks from one pipe until EOF.
async fn pump<R>(mut reader: R, source: StreamSource, tx: mpsc::Sender<OutputChunk>)
where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; READ_BUFFER_SIZE];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                if tx.send(OutputChunk::decode(source, &buf[..n])).await.is_err() {
                    break;
                }
            }
            Err(e) => {
                tracing::debug!("Backend {} read error: {}", source.label(), e);
                break;
            }
        }
    }
}

/// Owns the child: applies termination requests and reports the exit code once.
async fn wait_for_exit(
    mut child: Child,
    mut control: mpsc::UnboundedReceiver<TerminateMode>,
    exit_tx: oneshot::Sender<i32>,
) {
    let mut control_open = true;
    let code = loop {
        tokio::select! {
            status = child.wait() => break exit_code_of(status),
            request = control.recv(), if control_open => match request {
                Some(mode) => deliver(&mut child, mode),
                None => {
                    // 핸들이 사라짐 → 관리 주체가 없는 프로세스를 남기지 않음
                    control_open = false;
                    tracing::warn!("Backend handle dropped while running, killing it");
                    deliver(&mut child, TerminateMode::Force);
                }
            },
        }
    };
    tracing::info!("Backend exited with code {}", code);
    let _ = exit_tx.send(code);
}

fn deliver(child: &mut Child, mode: TerminateMode) {
    if mode == TerminateMode::Graceful && send_sigterm(child) {
        return;
    }
    if let Err(e) = child.start_kill() {
        tracing::warn!("Failed to kill backend: {}", e);
    }
}

#[cfg(unix)]
fn send_sigterm(child: &Child) -> bool {
    use nix::sys::signal::{self, Signal};
    use nix::unistd::Pid;

    let Some(pid) = child.id() else {
        return false;
    };
    match signal::kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
        Ok(()) => true,
        Err(e) => {
            tracing::warn!("Failed to send SIGTERM to backend: {}", e);
            false
        }
    }
}

/// No graceful signal on this platform; callers fall back to a hard kill.
#[cfg(not(unix))]
fn send_sigterm(_child: &Child) -> bool {
    false
}

fn exit_code_of(status: std::io::Result<ExitStatus>) -> i32 {
    match status {
        Ok(status) => status.code().unwrap_or_else(|| signal_exit_code(&status)),
        Err(e) => {
            tracing::error!("Failed to wait for backend: {}", e);
            UNKNOWN_EXIT_CODE
        }
    }
}

#[cfg(unix)]
fn signal_exit_code(status: &ExitStatus) -> i32 {
    use std::os::unix::process::ExitStatusExt;
    status.signal().map(|sig| 128 + sig).unwrap_or(UNKNOWN_EXIT_CODE)
}

#[cfg(not(unix))]
fn signal_exit_code(_status: &ExitStatus) -> i32 {
    UNKNOWN_EXIT_CODE
}

/// Windows: hide the backend's console window.
#[cfg(target_os = "windows")]
fn apply_creation_flags(cmd: &mut TokioCommand) -> &mut TokioCommand {
    const CREATE_NO_WINDOW: u32 = 0x08000000;
    cmd.creation_flags(CREATE_NO_WINDOW)
}

#[cfg(not(target_os = "windows"))]
fn apply_creation_flags(cmd: &mut TokioCommand) -> &mut TokioCommand {
    cmd
}

// ─── Tests ───────────────────────────────────────────────────
