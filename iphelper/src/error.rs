use crate::api::ChangeKind;
use std::fmt;

/// Win32 error code as returned by the call or by `GetLastError`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OsError(pub u32);

impl OsError {
    pub fn last() -> Self {
        let code = std::io::Error::last_os_error().raw_os_error().unwrap_or(0);
        Self(code as u32)
    }

    pub fn code(self) -> u32 {
        self.0
    }
}

impl fmt::Display for OsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", std::io::Error::from_raw_os_error(self.0 as i32))
    }
}

impl std::error::Error for OsError {}

/// Why a blocking wait on a change event did not end with a normal wake.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WaitFailure {
    #[error("wait abandoned")]
    Abandoned,
    #[error("wait failed: {0}")]
    Failed(OsError),
    #[error("unexpected wait result {0:#x}")]
    Unexpected(u32),
    #[error("event already closed")]
    Closed,
    #[error("wait interrupted: {0}")]
    Interrupted(String),
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("failed to create event: {0}")]
    EventCreation(OsError),

    #[error("{kind} change registration failed: {source}")]
    Registration { kind: ChangeKind, source: OsError },

    #[error("{kind} change wait failed: {reason}")]
    Wait { kind: ChangeKind, reason: WaitFailure },

    #[error("{0}")]
    Runtime(#[from] tokio::runtime::TryCurrentError),

    #[error("failed to load {name}: {source}")]
    Load { name: &'static str, source: OsError },

    #[error("{0}")]
    Os(#[from] OsError),

    #[error("{0}")]
    Decode(String),
}

pub type Result<T> = std::result::Result<T, Error>;
