pub mod output;
pub mod process;
pub mod state_machine;

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::config::{LauncherSettings, ProcessEnvironment};
use crate::error::LauncherError;
use output::OutputChunk;
use process::{BackendLauncher, BackendProcess, ProcessEvents, TerminateMode, UNKNOWN_EXIT_CODE};
use state_machine::{State, StateMachine};

/// External request to stop the launcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownSignal {
    /// Ctrl+C
    Interrupt,
    /// SIGTERM
    Terminate,
    /// SIGHUP (controlling terminal closed)
    Hangup,
    /// SIGQUIT
    Quit,
    /// A sibling component (the status listener) stopped on its own
    ComponentFailed,
}

/// How supervision ended without an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorExit {
    /// Backend exited on its own with code 0
    BackendExited,
    /// Shutdown signal received, backend terminated
    Interrupted,
}

impl SupervisorExit {
    pub fn exit_code(&self) -> i32 {
        0
    }
}

/// Timing bounds for shutdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShutdownPolicy {
    /// Wait after each termination request before escalating
    pub grace: Duration,
    /// Keep forwarding buffered output this long after the exit
    pub drain: Duration,
}

impl From<&LauncherSettings> for ShutdownPolicy {
    fn from(settings: &LauncherSettings) -> Self {
        Self {
            grace: settings.shutdown_grace(),
            drain: settings.drain_timeout(),
        }
    }
}

/// Owns the backend process for its whole lifetime.
///
/// All process events and shutdown signals are consumed by one `select!` loop
/// in [`Supervisor::run`], so the exit is handled exactly once.
pub struct Supervisor<L: BackendLauncher> {
    launcher: L,
    machine: StateMachine,
    child: Option<L::Process>,
    events: Option<ProcessEvents>,
    policy: ShutdownPolicy,
    last_exit_code: Option<i32>,
}

impl<L: BackendLauncher> Supervisor<L> {
    pub fn new(launcher: L, policy: ShutdownPolicy) -> Self {
        Self {
            launcher,
            machine: StateMachine::new(),
            child: None,
            events: None,
            policy,
            last_exit_code: None,
        }
    }

    pub fn state(&self) -> &State {
        &self.machine.state
    }

    pub fn pid(&self) -> Option<u32> {
        self.child.as_ref().and_then(|c| c.pid())
    }

    /// Exit code observed from the backend, `None` while it runs.
    pub fn last_exit_code(&self) -> Option<i32> {
        self.last_exit_code
    }

    /// Start the backend. A failure here is fatal: there is nothing to supervise.
    pub fn spawn(&mut self, env: &ProcessEnvironment) -> Result<(), LauncherError> {
        self.machine.transition(State::Spawning)?;
        match self.launcher.launch(env) {
            Ok((child, events)) => {
                self.child = Some(child);
                self.events = Some(events);
                self.machine.transition(State::Running)?;
                Ok(())
            }
            Err(e) => {
                tracing::error!("Failed to start backend: {}", e);
                self.machine.transition(State::Terminated)?;
                Err(e)
            }
        }
    }

    /// Supervise the running backend until it exits or a shutdown signal arrives.
    ///
    /// `on_output` sees every output chunk; order is kept per stream only.
    /// A non-zero backend exit is returned as [`LauncherError::BackendCrashed`].
    pub async fn run<F>(
        &mut self,
        signals: &mut mpsc::Receiver<ShutdownSignal>,
        mut on_output: F,
    ) -> Result<SupervisorExit, LauncherError>
    where
        F: FnMut(&OutputChunk),
    {
        let mut events = self.events.take().ok_or(LauncherError::NotRunning)?;

        enum Next {
            Exit(i32),
            Signal(ShutdownSignal),
        }

        let mut stdout_open = true;
        let mut stderr_open = true;
        let mut signals_open = true;
        let next = loop {
            tokio::select! {
                chunk = events.stdout.recv(), if stdout_open => match chunk {
                    Some(chunk) => on_output(&chunk),
                    None => stdout_open = false,
                },
                chunk = events.stderr.recv(), if stderr_open => match chunk {
                    Some(chunk) => on_output(&chunk),
                    None => stderr_open = false,
                },
                code = &mut events.exit => break Next::Exit(code.unwrap_or(UNKNOWN_EXIT_CODE)),
                signal = signals.recv(), if signals_open => match signal {
                    Some(signal) => break Next::Signal(signal),
                    None => {
                        tracing::debug!("Signal source closed");
                        signals_open = false;
                    }
                },
            }
        };

        match next {
            Next::Exit(code) => self.on_exit(code, events, &mut on_output).await,
            Next::Signal(signal) => {
                tracing::info!("Received {:?}", signal);
                self.drive_shutdown(events, signals, &mut on_output).await
            }
        }
    }

    /// Terminate the backend outside of [`Supervisor::run`], e.g. when a
    /// sibling component failed during startup.
    pub async fn shutdown<F>(&mut self, mut on_output: F) -> Result<SupervisorExit, LauncherError>
    where
        F: FnMut(&OutputChunk),
    {
        let events = self.events.take().ok_or(LauncherError::NotRunning)?;
        // 신호 소스 없음: 송신자를 살려 두어 recv 가 끝나지 않게 함
        let (_quiet_tx, mut quiet_rx) = mpsc::channel(1);
        self.drive_shutdown(events, &mut quiet_rx, &mut on_output).await
    }

    async fn on_exit<F>(
        &mut self,
        code: i32,
        mut events: ProcessEvents,
        on_output: &mut F,
    ) -> Result<SupervisorExit, LauncherError>
    where
        F: FnMut(&OutputChunk),
    {
        self.machine.transition(State::Exited(code))?;
        self.last_exit_code = Some(code);
        self.child = None;
        drain(&mut events, self.policy.drain, on_output).await;

        if code == 0 {
            tracing::info!("Backend exited normally");
            Ok(SupervisorExit::BackendExited)
        } else {
            tracing::error!("Python server exited with code {}", code);
            Err(LauncherError::BackendCrashed { code })
        }
    }

    async fn drive_shutdown<F>(
        &mut self,
        mut events: ProcessEvents,
        signals: &mut mpsc::Receiver<ShutdownSignal>,
        on_output: &mut F,
    ) -> Result<SupervisorExit, LauncherError>
    where
        F: FnMut(&OutputChunk),
    {
        self.machine.transition(State::ShuttingDown)?;
        tracing::info!("Shutting down Venice AI MCP Server...");
        self.request_termination(TerminateMode::Graceful);

        let grace = self.policy.grace;
        let deadline = tokio::time::sleep(grace);
        tokio::pin!(deadline);

        let mut forced = false;
        let mut stdout_open = true;
        let mut stderr_open = true;
        let mut signals_open = true;
        let code = loop {
            tokio::select! {
                chunk = events.stdout.recv(), if stdout_open => match chunk {
                    Some(chunk) => on_output(&chunk),
                    None => stdout_open = false,
                },
                chunk = events.stderr.recv(), if stderr_open => match chunk {
                    Some(chunk) => on_output(&chunk),
                    None => stderr_open = false,
                },
                code = &mut events.exit => break Some(code.unwrap_or(UNKNOWN_EXIT_CODE)),
                signal = signals.recv(), if signals_open => match signal {
                    Some(signal) => tracing::warn!("Received {:?} while shutting down, ignoring", signal),
                    None => signals_open = false,
                },
                _ = &mut deadline => {
                    if forced {
                        tracing::error!("Backend did not exit within {:?} after being killed", grace);
                        break None;
                    }
                    tracing::warn!("Backend did not exit within {:?}, killing it", grace);
                    self.request_termination(TerminateMode::Force);
                    forced = true;
                    deadline.as_mut().reset(Instant::now() + grace);
                }
            }
        };

        if let Some(code) = code {
            tracing::debug!("Backend stopped with code {}", code);
            self.last_exit_code = Some(code);
            drain(&mut events, self.policy.drain, on_output).await;
        }
        self.child = None;
        self.machine.transition(State::Terminated)?;
        Ok(SupervisorExit::Interrupted)
    }

    fn request_termination(&mut self, mode: TerminateMode) {
        if let Some(child) = self.child.as_mut() {
            if let Err(e) = child.terminate(mode) {
                tracing::warn!("{}", e);
            }
        }
    }
}

/// Forward output still buffered after the exit, bounded by `timeout`.
async fn drain<F>(events: &mut ProcessEvents, timeout: Duration, on_output: &mut F)
where
    F: FnMut(&OutputChunk),
{
    let deadline = tokio::time::sleep(timeout);
    tokio::pin!(deadline);

    let mut stdout_open = true;
    let mut stderr_open = true;
    while stdout_open || stderr_open {
        tokio::select! {
            chunk = events.stdout.recv(), if stdout_open => match chunk {
                Some(chunk) => on_output(&chunk),
                None => stdout_open = false,
            },
            chunk = events.stderr.recv(), if stderr_open => match chunk {
                Some(chunk) => on_output(&chunk),
                None => stderr_open = false,
            },
            _ = &mut deadline => {
                tracing::debug!("Stopped draining backend output after {:?}", timeout);
                break;
            }
        }
    }
}

// ─── Tests ───────────────────────────────────────────────────
