//! The OS media-session capability, seen as a black box.
//!
//! Everything the overlay knows about the current media session comes through
//! [`MediaBackend`]. The Windows implementation talks to the System Media
//! Transport Controls on a worker thread; other platforms get a backend that
//! always reports the capability as unavailable.

use crate::{config::Config, error::BackendError};
use std::sync::Arc;

#[cfg(target_os = "windows")]
mod smtc;

#[cfg(target_os = "windows")]
pub use smtc::SmtcBackend;

/// Status exactly as the OS reports it, before normalisation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum RawPlaybackStatus {
    Closed,
    Opened,
    Changing,
    Stopped,
    Playing,
    Paused,
    #[default]
    Unknown,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RawControls {
    pub play: bool,
    pub pause: bool,
    pub next: bool,
    pub previous: bool,
}

/// One read of the active session. Strings may be empty.
#[derive(Clone, Debug, Default)]
pub struct RawSession {
    pub title: String,
    pub artist: String,
    pub album_artist: String,
    pub source_app: String,
    pub artwork: Option<Arc<[u8]>>,
    pub status: RawPlaybackStatus,
    pub controls: RawControls,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TransportCommand {
    Play,
    Pause,
    Next,
    Previous,
}

impl TransportCommand {
    pub fn name(self) -> &'static str {
        match self {
            TransportCommand::Play => "Play",
            TransportCommand::Pause => "Pause",
            TransportCommand::Next => "Next",
            TransportCommand::Previous => "Previous",
        }
    }
}

pub trait MediaBackend {
    /// Reads the active session. `Ok(None)` means nothing is playing anywhere.
    ///
    /// Implementations must return within a bounded time.
    fn query(&mut self) -> Result<Option<RawSession>, BackendError>;

    /// Enqueues a transport command without waiting for the session's answer.
    fn send(&mut self, command: TransportCommand) -> Result<(), BackendError>;

    /// Returns `true` once per batch of change notifications received since the
    /// previous call.
    fn take_invalidation(&mut self) -> bool {
        false
    }
}

impl<B: MediaBackend + ?Sized> MediaBackend for Box<B> {
    fn query(&mut self) -> Result<Option<RawSession>, BackendError> {
        (**self).query()
    }

    fn send(&mut self, command: TransportCommand) -> Result<(), BackendError> {
        (**self).send(command)
    }

    fn take_invalidation(&mut self) -> bool {
        (**self).take_invalidation()
    }
}

/// Stand-in used where SMTC does not exist or could not be started.
#[derive(Debug, Clone)]
pub struct UnavailableBackend {
    reason: String,
}

impl UnavailableBackend {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

impl MediaBackend for UnavailableBackend {
    fn query(&mut self) -> Result<Option<RawSession>, BackendError> {
        Err(BackendError::Unavailable(self.reason.clone()))
    }

    fn send(&mut self, _command: TransportCommand) -> Result<(), BackendError> {
        Err(BackendError::Unavailable(self.reason.clone()))
    }
}

#[cfg(target_os = "windows")]
pub fn default_backend(config: &Config) -> Box<dyn MediaBackend> {
    match SmtcBackend::spawn(config.session.command_timeout) {
        Ok(backend) => Box::new(backend),
        Err(err) => {
            tracing::warn!(error = %err, "SMTC worker failed to start");
            Box::new(UnavailableBackend::new(err.to_string()))
        }
    }
}

#[cfg(not(target_os = "windows"))]
pub fn default_backend(_config: &Config) -> Box<dyn MediaBackend> {
    tracing::warn!("System Media Transport Controls require Windows 10 or later");
    Box::new(UnavailableBackend::new(
        "System Media Transport Controls require Windows",
    ))
}
