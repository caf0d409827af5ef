use std::time::Duration;
use thiserror::Error;

/// Failures at the OS media-session boundary.
///
/// None of these reach the UI: the session mirror turns every one of them into
/// an empty snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    #[error("media session capability unavailable: {0}")]
    Unavailable(String),
    #[error("media session query timed out after {0:?}")]
    Timeout(Duration),
    #[error("media session worker disconnected")]
    Disconnected,
    #[error("media session call failed: {0}")]
    Os(String),
}

#[cfg(target_os = "windows")]
impl From<windows::core::Error> for BackendError {
    fn from(err: windows::core::Error) -> Self {
        BackendError::Os(format!("{err:?}"))
    }
}
