//! 런처 전용 에러 타입. 에러 종류별로 프로세스 종료 코드를 결정합니다.

use crate::supervisor::state_machine::TransitionError;

/// Exit code used for every fatal condition that has no code of its own.
pub const FAILURE_EXIT_CODE: i32 = 1;

/// Launcher 작업 중 발생할 수 있는 에러 유형
#[derive(thiserror::Error, Debug)]
pub enum LauncherError {
    #[error("Failed to start backend '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Backend exited with code {code}")]
    BackendCrashed { code: i32 },

    #[error("Failed to bind status listener on {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Status listener port would be {port} + 1, which is out of range")]
    StatusPortOutOfRange { port: u16 },

    #[error("Status listener stopped unexpectedly: {0}")]
    Serve(#[source] std::io::Error),

    #[error("Backend is not running")]
    NotRunning,

    #[error(transparent)]
    Transition(#[from] TransitionError),

    #[error("{0}")]
    Internal(#[from] anyhow::Error),
}

impl LauncherError {
    /// 런처 프로세스 종료 코드 매핑
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::BackendCrashed { code } if *code != 0 => *code,
            _ => FAILURE_EXIT_CODE,
        }
    }

    /// 머신 리더블 에러 코드
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Spawn { .. } => "SPAWN_ERROR",
            Self::BackendCrashed { .. } => "BACKEND_CRASHED",
            Self::Bind { .. } | Self::StatusPortOutOfRange { .. } => "BIND_ERROR",
            Self::Serve(_) => "SERVE_ERROR",
            Self::NotRunning => "NOT_RUNNING",
            Self::Transition(_) => "INVALID_TRANSITION",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }
}
