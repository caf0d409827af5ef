//! Core of the Better Windows Media Controller overlay: a mirror of the
//! Windows media session and the Minecraft mode auto-pause timer.

pub mod backend;
pub mod config;
pub mod console;
pub mod error;
pub mod logging;
pub mod minecraft;
pub mod session;

pub use backend::{MediaBackend, RawControls, RawPlaybackStatus, RawSession, TransportCommand};
pub use config::Config;
pub use console::{ConsoleBuffer, ConsoleLine};
pub use error::BackendError;
pub use minecraft::{MinecraftTimer, TimerState, Transport};
pub use session::{
    Capabilities, Capability, PlaybackStatus, SessionMirror, SessionSnapshot, TrackIdentity,
};
