//! 전체 실행 흐름 통합 테스트 (Unix: /bin/sh 백엔드 사용)
#![cfg(unix)]

use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

use tokio::net::TcpListener;
use venice_launcher::config::{AmbientEnv, LaunchConfig, LauncherSettings, ProcessEnvironment};
use venice_launcher::error::LauncherError;
use venice_launcher::launcher::{launch, SignalChannel};
use venice_launcher::supervisor::process::{BackendCommand, CommandLauncher};
use venice_launcher::supervisor::{ShutdownSignal, SupervisorExit};

fn settings() -> LauncherSettings {
    LauncherSettings {
        listen_host: Some(IpAddr::V4(Ipv4Addr::LOCALHOST)),
        shutdown_grace_ms: Some(2_000),
        drain_ms: Some(100),
        ..Default::default()
    }
}

/// Port `p` whose status port `p + 1` is currently free.
async fn free_backend_port() -> u16 {
    let probe = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
    let port = probe.local_addr().unwrap().port();
    drop(probe);
    port - 1
}

fn config(port: u16) -> LaunchConfig {
    let ambient = AmbientEnv::new();
    LaunchConfig::from_args(
        ["venice-launcher", "--port", port.to_string().as_str(), "--api-key", "abc"],
        &ambient,
    )
    .unwrap()
}

fn sh(script: &str) -> CommandLauncher {
    CommandLauncher::new(BackendCommand::new("/bin/sh", ["-c", script]))
}

async fn wait_for_listener(port: u16) -> reqwest::Response {
    let url = format!("http://127.0.0.1:{}/anything", port + 1);
    for _ in 0..100 {
        if let Ok(resp) = reqwest::get(&url).await {
            return resp;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("status listener never came up on {}", port + 1);
}

#[tokio::test]
async fn test_backend_clean_exit() {
    let port = free_backend_port().await;
    let cfg = config(port);
    let env = ProcessEnvironment::build(&std::env::vars_os().collect(), &cfg);

    let result = launch(
        sh("echo starting; sleep 0.2; exit 0"),
        &cfg,
        &env,
        &settings(),
        SignalChannel::new(),
    )
    .await
    .unwrap();

    assert_eq!(result, SupervisorExit::BackendExited);
    assert_eq!(result.exit_code(), 0);
}

#[tokio::test]
async fn test_backend_crash_code_propagates() {
    let port = free_backend_port().await;
    let cfg = config(port);
    let env = ProcessEnvironment::build(&std::env::vars_os().collect(), &cfg);

    let err = launch(
        sh("echo boom 1>&2; exit 5"),
        &cfg,
        &env,
        &settings(),
        SignalChannel::new(),
    )
    .await
    .unwrap_err();

    assert!(matches!(err, LauncherError::BackendCrashed { code: 5 }));
    assert_eq!(err.exit_code(), 5);
}

#[tokio::test]
async fn test_interrupt_while_serving() {
    let port = free_backend_port().await;
    let cfg = config(port);
    let env = ProcessEnvironment::build(&std::env::vars_os().collect(), &cfg);
    let settings = settings();
    let signals = SignalChannel::new();
    let tx = signals.sender();

    let (result, body) = tokio::join!(
        launch(sh("exec sleep 30"), &cfg, &env, &settings, signals),
        async {
            let resp = wait_for_listener(port).await;
            assert_eq!(resp.status().as_u16(), 404);
            let body = resp.text().await.unwrap();

            // 두 번째 Ctrl+C 는 아무 효과 없음
            tx.send(ShutdownSignal::Interrupt).await.unwrap();
            tx.send(ShutdownSignal::Interrupt).await.unwrap();
            body
        }
    );

    assert!(body.contains(&port.to_string()), "body was {:?}", body);
    assert_eq!(result.unwrap(), SupervisorExit::Interrupted);

    // 리스너 소켓도 닫혀야 함
    assert!(TcpListener::bind((Ipv4Addr::LOCALHOST, port + 1)).await.is_ok());
}

#[tokio::test]
async fn test_bind_failure_stops_backend() {
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    let port = free_backend_port().await;
    let _taken = TcpListener::bind((Ipv4Addr::LOCALHOST, port + 1)).await.unwrap();

    let dir = tempfile::tempdir().unwrap();
    let pid_file = dir.path().join("backend.pid");
    let script = format!("echo $$ > {}; exec sleep 30", pid_file.display());

    let cfg = config(port);
    let env = ProcessEnvironment::build(&std::env::vars_os().collect(), &cfg);
    let err = launch(sh(&script), &cfg, &env, &settings(), SignalChannel::new())
        .await
        .unwrap_err();

    assert!(matches!(err, LauncherError::Bind { .. }));
    assert_ne!(err.exit_code(), 0);

    // 백엔드는 pid 파일을 쓰기 전에 종료됐을 수도 있음
    if let Ok(pid) = std::fs::read_to_string(&pid_file) {
        let pid: i32 = pid.trim().parse().unwrap();
        assert!(kill(Pid::from_raw(pid), None).is_err(), "backend {} still alive", pid);
    }
}

#[tokio::test]
async fn test_spawn_failure_never_binds() {
    let port = free_backend_port().await;
    let cfg = config(port);
    let env = ProcessEnvironment::build(&AmbientEnv::new(), &cfg);

    let dir = tempfile::tempdir().unwrap();
    let launcher = CommandLauncher::new(BackendCommand::locate(dir.path(), "python"));
    let err = launch(launcher, &cfg, &env, &settings(), SignalChannel::new())
        .await
        .unwrap_err();

    assert!(matches!(err, LauncherError::Spawn { .. }));
    assert_ne!(err.exit_code(), 0);
    assert!(TcpListener::bind((Ipv4Addr::LOCALHOST, port + 1)).await.is_ok());
}
