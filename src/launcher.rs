//! Startup wiring: resolve configuration, start the backend, bind the status
//! listener, and run both until shutdown.
//!
//! Ordering: the backend is spawned first. If it cannot be started the
//! listener is never bound. If the listener cannot be bound (or stops later),
//! the already running backend is shut down and the listener error is returned.
//! The first fatal error wins.

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::config::settings::install_dir;
use crate::config::{ambient_env, Cli, LaunchConfig, LauncherSettings, ProcessEnvironment};
use crate::error::LauncherError;
use crate::status::{banner, StatusListener};
use crate::supervisor::output::OutputForwarder;
use crate::supervisor::process::{BackendCommand, BackendLauncher, CommandLauncher};
use crate::supervisor::{ShutdownPolicy, ShutdownSignal, Supervisor, SupervisorExit};

const SIGNAL_CHANNEL_CAPACITY: usize = 8;

/// Inbound shutdown requests. Cloned senders feed OS signals and internal failures.
pub struct SignalChannel {
    tx: mpsc::Sender<ShutdownSignal>,
    rx: mpsc::Receiver<ShutdownSignal>,
}

impl SignalChannel {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::channel(SIGNAL_CHANNEL_CAPACITY);
        Self { tx, rx }
    }

    pub fn sender(&self) -> mpsc::Sender<ShutdownSignal> {
        self.tx.clone()
    }
}

impl Default for SignalChannel {
    fn default() -> Self {
        Self::new()
    }
}

/// Entry point used by the binary. Returns the process exit code.
pub async fn run(cli: Cli) -> i32 {
    let ambient = ambient_env();
    let config = LaunchConfig::resolve(&cli, &ambient);
    let settings = LauncherSettings::load().unwrap_or_else(|e| {
        tracing::warn!("Failed to load launcher settings: {}, using defaults", e);
        LauncherSettings::default()
    });
    let env = ProcessEnvironment::build(&ambient, &config);

    tracing::info!("Starting Venice AI MCP Server...");
    let dir = match install_dir() {
        Ok(dir) => dir,
        Err(e) => return report(LauncherError::Internal(e)),
    };
    let command = BackendCommand::locate(&dir, settings.python());

    // 백엔드를 띄우기 전에 핸들러를 등록해야 기본 동작(즉시 종료)으로 고아가 생기지 않음
    let os_signals = match OsSignals::install() {
        Ok(os) => os,
        Err(e) => {
            return report(LauncherError::Internal(
                anyhow::Error::new(e).context("Failed to install signal handlers"),
            ))
        }
    };
    let signals = SignalChannel::new();
    forward_os_signals(os_signals, signals.sender());

    match launch(CommandLauncher::new(command), &config, &env, &settings, signals).await {
        Ok(exit) => {
            tracing::info!("Launcher stopped ({:?})", exit);
            exit.exit_code()
        }
        Err(e) => report(e),
    }
}

fn report(e: LauncherError) -> i32 {
    tracing::error!(error_code = e.error_code(), "{}", e);
    e.exit_code()
}

/// Spawn the backend, bind the status listener and supervise until shutdown.
pub async fn launch<L: BackendLauncher>(
    launcher: L,
    config: &LaunchConfig,
    env: &ProcessEnvironment,
    settings: &LauncherSettings,
    signals: SignalChannel,
) -> Result<SupervisorExit, LauncherError> {
    let SignalChannel { tx, mut rx } = signals;
    let forwarder = OutputForwarder::new(Some(settings.log_pattern()));
    let mut supervisor = Supervisor::new(launcher, ShutdownPolicy::from(settings));

    supervisor.spawn(env)?;

    let listener = match StatusListener::bind(settings.listen_host(), config).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!("{}", e);
            if let Err(shutdown_err) = supervisor.shutdown(|chunk| forwarder.forward(chunk)).await {
                tracing::warn!("Backend shutdown after bind failure: {}", shutdown_err);
            }
            return Err(e);
        }
    };
    tracing::info!("{}", banner(config));
    tracing::info!("Press Ctrl+C to stop the server");

    let token = CancellationToken::new();
    let server = {
        let token = token.clone();
        tokio::spawn(async move {
            let result = listener.serve(token.clone()).await;
            if !token.is_cancelled() {
                // 리스너가 스스로 멈춤 → 슈퍼바이저에게 종료 요청
                let _ = tx.send(ShutdownSignal::ComponentFailed).await;
            }
            result
        })
    };

    let outcome = supervisor
        .run(&mut rx, |chunk| forwarder.forward(chunk))
        .await;

    let listener_failed = server.is_finished();
    token.cancel();
    let served = match server.await {
        Ok(result) => result,
        Err(e) => Err(LauncherError::Internal(anyhow::anyhow!("status listener task failed: {}", e))),
    };

    match (outcome, served) {
        (Err(e), _) => Err(e),
        (Ok(_), Err(e)) => Err(e),
        (Ok(_), Ok(())) if listener_failed => Err(LauncherError::Serve(std::io::Error::new(
            std::io::ErrorKind::Other,
            "status listener stopped",
        ))),
        (Ok(exit), Ok(())) => Ok(exit),
    }
}

// ─── OS Signals ──────────────────────────────────────────────

/// Forward OS shutdown signals into `tx` until the receiver is gone.
pub fn forward_os_signals(mut os: OsSignals, tx: mpsc::Sender<ShutdownSignal>) {
    tokio::spawn(async move {
        while let Some(signal) = os.next().await {
            if tx.send(signal).await.is_err() {
                break;
            }
        }
        tracing::debug!("Signal forwarding stopped");
    });
}

/// Registered signal streams. Registration happens in [`OsSignals::install`],
/// so the default disposition is replaced before the backend is started.
pub struct OsSignals {
    #[cfg(unix)]
    interrupt: tokio::signal::unix::Signal,
    #[cfg(unix)]
    terminate: tokio::signal::unix::Signal,
    #[cfg(unix)]
    hangup: tokio::signal::unix::Signal,
    #[cfg(unix)]
    quit: tokio::signal::unix::Signal,
    #[cfg(windows)]
    ctrl_c: tokio::signal::windows::CtrlC,
}

impl OsSignals {
    /// Ctrl+C, SIGTERM, SIGHUP and SIGQUIT.
    #[cfg(unix)]
    pub fn install() -> std::io::Result<Self> {
        use tokio::signal::unix::{signal, SignalKind};
        Ok(Self {
            interrupt: signal(SignalKind::interrupt())?,
            terminate: signal(SignalKind::terminate())?,
            hangup: signal(SignalKind::hangup())?,
            quit: signal(SignalKind::quit())?,
        })
    }

    #[cfg(windows)]
    pub fn install() -> std::io::Result<Self> {
        Ok(Self {
            ctrl_c: tokio::signal::windows::ctrl_c()?,
        })
    }

    /// Next signal, `None` once the streams are closed.
    #[cfg(unix)]
    pub async fn next(&mut self) -> Option<ShutdownSignal> {
        tokio::select! {
            r = self.interrupt.recv() => r.map(|_| ShutdownSignal::Interrupt),
            r = self.terminate.recv() => r.map(|_| ShutdownSignal::Terminate),
            r = self.hangup.recv() => r.map(|_| ShutdownSignal::Hangup),
            r = self.quit.recv() => r.map(|_| ShutdownSignal::Quit),
        }
    }

    #[cfg(windows)]
    pub async fn next(&mut self) -> Option<ShutdownSignal> {
        self.ctrl_c.recv().await.map(|_| ShutdownSignal::Interrupt)
    }
}
