use crate::{
    backend::{MediaBackend, RawPlaybackStatus, RawSession, TransportCommand},
    minecraft::Transport,
};
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum PlaybackStatus {
    Playing,
    Paused,
    Stopped,
    #[default]
    Unknown,
}

impl PlaybackStatus {
    pub fn label(self) -> &'static str {
        match self {
            PlaybackStatus::Playing => "Playing",
            PlaybackStatus::Paused => "Paused",
            PlaybackStatus::Stopped => "Stopped",
            PlaybackStatus::Unknown => "Unknown",
        }
    }
}

impl From<RawPlaybackStatus> for PlaybackStatus {
    fn from(raw: RawPlaybackStatus) -> Self {
        match raw {
            RawPlaybackStatus::Playing => PlaybackStatus::Playing,
            RawPlaybackStatus::Paused => PlaybackStatus::Paused,
            RawPlaybackStatus::Stopped => PlaybackStatus::Stopped,
            RawPlaybackStatus::Closed
            | RawPlaybackStatus::Opened
            | RawPlaybackStatus::Changing
            | RawPlaybackStatus::Unknown => PlaybackStatus::Unknown,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Capability {
    CanPlay,
    CanPause,
    CanNext,
    CanPrevious,
}

impl Capability {
    const fn bit(self) -> u8 {
        match self {
            Capability::CanPlay => 1 << 0,
            Capability::CanPause => 1 << 1,
            Capability::CanNext => 1 << 2,
            Capability::CanPrevious => 1 << 3,
        }
    }
}

/// Set of [`Capability`] flags.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Capabilities(u8);

impl Capabilities {
    pub const fn empty() -> Self {
        Self(0)
    }

    pub fn insert(&mut self, capability: Capability) {
        self.0 |= capability.bit();
    }

    pub fn with(mut self, capability: Capability) -> Self {
        self.insert(capability);
        self
    }

    pub fn contains(self, capability: Capability) -> bool {
        self.0 & capability.bit() != 0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl FromIterator<Capability> for Capabilities {
    fn from_iter<I: IntoIterator<Item = Capability>>(iter: I) -> Self {
        iter.into_iter()
            .fold(Capabilities::empty(), Capabilities::with)
    }
}

/// Key used only to notice that the track changed.
///
/// SMTC exposes no stable track id, so two plays of the same song by the same
/// artist look identical.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct TrackIdentity {
    pub title: Option<String>,
    pub artist: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct SessionSnapshot {
    pub title: Option<String>,
    pub artist: Option<String>,
    pub source_app: Option<String>,
    pub artwork: Option<Arc<[u8]>>,
    pub status: PlaybackStatus,
    pub capabilities: Capabilities,
}

impl SessionSnapshot {
    /// What the UI shows when nothing can be read.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn from_raw(raw: RawSession) -> Self {
        let mut capabilities = Capabilities::empty();
        if raw.controls.play {
            capabilities.insert(Capability::CanPlay);
        }
        if raw.controls.pause {
            capabilities.insert(Capability::CanPause);
        }
        if raw.controls.next {
            capabilities.insert(Capability::CanNext);
        }
        if raw.controls.previous {
            capabilities.insert(Capability::CanPrevious);
        }

        Self {
            title: non_empty(raw.title),
            artist: non_empty(raw.artist).or_else(|| non_empty(raw.album_artist)),
            source_app: non_empty(raw.source_app),
            artwork: raw.artwork.filter(|bytes| !bytes.is_empty()),
            status: raw.status.into(),
            capabilities,
        }
    }

    pub fn identity(&self) -> Option<TrackIdentity> {
        if self.title.is_none() && self.artist.is_none() {
            return None;
        }
        Some(TrackIdentity {
            title: self.title.clone(),
            artist: self.artist.clone(),
        })
    }

    pub fn is_playing(&self) -> bool {
        self.status == PlaybackStatus::Playing
    }

    pub fn can(&self, capability: Capability) -> bool {
        self.capabilities.contains(capability)
    }
}

fn non_empty(value: String) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else if trimmed.len() == value.len() {
        Some(value)
    } else {
        Some(trimmed.to_string())
    }
}

/// Detects track-change edges across refreshes.
///
/// Reads without an identity (no session, failed or timed-out queries) are
/// skipped entirely, so a dropped poll between two reads of the same track is
/// not a change. The first identity seen is a baseline, not an edge.
#[derive(Debug, Default)]
pub struct TrackWatcher {
    last_seen: Option<TrackIdentity>,
}

impl TrackWatcher {
    pub fn observe(&mut self, identity: Option<TrackIdentity>) -> bool {
        let Some(identity) = identity else {
            return false;
        };
        match self.last_seen.replace(identity) {
            Some(previous) => self.last_seen.as_ref() != Some(&previous),
            None => false,
        }
    }
}

/// Latest view of the OS media session plus gated transport commands.
///
/// Every backend failure is absorbed here; callers always get a renderable
/// snapshot and commands never fail.
pub struct SessionMirror<B> {
    backend: B,
    snapshot: SessionSnapshot,
    watcher: TrackWatcher,
    track_changed: bool,
    last_error: Option<String>,
}

impl<B: MediaBackend> SessionMirror<B> {
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            snapshot: SessionSnapshot::empty(),
            watcher: TrackWatcher::default(),
            track_changed: false,
            last_error: None,
        }
    }

    pub fn refresh(&mut self) -> SessionSnapshot {
        self.backend.take_invalidation();

        let snapshot = match self.backend.query() {
            Ok(Some(raw)) => {
                self.clear_error();
                SessionSnapshot::from_raw(raw)
            }
            Ok(None) => {
                self.clear_error();
                debug!("no active media session");
                SessionSnapshot::empty()
            }
            Err(err) => {
                let message = err.to_string();
                if self.last_error.as_deref() != Some(message.as_str()) {
                    warn!(error = %err, "media session unavailable; showing empty snapshot");
                } else {
                    debug!(error = %err, "media session still unavailable");
                }
                self.last_error = Some(message);
                SessionSnapshot::empty()
            }
        };

        self.track_changed = self.watcher.observe(snapshot.identity());
        if self.track_changed {
            info!(
                title = snapshot.title.as_deref().unwrap_or(""),
                artist = snapshot.artist.as_deref().unwrap_or(""),
                "track changed"
            );
        }

        self.snapshot = snapshot.clone();
        snapshot
    }

    fn clear_error(&mut self) {
        if self.last_error.take().is_some() {
            info!("media session reachable again");
        }
    }

    /// Last snapshot read; empty before the first refresh.
    pub fn snapshot(&self) -> &SessionSnapshot {
        &self.snapshot
    }

    /// Whether the last refresh crossed a track-change edge.
    pub fn track_changed(&self) -> bool {
        self.track_changed
    }

    /// Change notifications arrived since the last refresh.
    pub fn needs_refresh(&mut self) -> bool {
        self.backend.take_invalidation()
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn play(&mut self) {
        self.dispatch(TransportCommand::Play, Capability::CanPlay);
    }

    pub fn pause(&mut self) {
        self.dispatch(TransportCommand::Pause, Capability::CanPause);
    }

    pub fn next(&mut self) {
        self.dispatch(TransportCommand::Next, Capability::CanNext);
    }

    pub fn previous(&mut self) {
        self.dispatch(TransportCommand::Previous, Capability::CanPrevious);
    }

    pub fn toggle_play_pause(&mut self) {
        if self.snapshot.is_playing() {
            self.pause();
        } else {
            self.play();
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    fn dispatch(&mut self, command: TransportCommand, required: Capability) {
        if !self.snapshot.can(required) {
            debug!(
                command = command.name(),
                "control not offered by the session; ignoring"
            );
            return;
        }
        match self.backend.send(command) {
            Ok(()) => info!(command = command.name(), "transport command sent"),
            Err(err) => warn!(command = command.name(), error = %err, "transport command dropped"),
        }
    }
}

impl<B: MediaBackend> Transport for SessionMirror<B> {
    fn play(&mut self) {
        SessionMirror::play(self);
    }

    fn pause(&mut self) {
        SessionMirror::pause(self);
    }

    fn can_resume(&self) -> bool {
        self.snapshot.can(Capability::CanPlay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{backend::RawControls, error::BackendError};
    use std::time::Duration;

    struct ScriptedBackend {
        next: Result<Option<RawSession>, BackendError>,
        sent: Vec<TransportCommand>,
        reject_sends: bool,
        invalidated: bool,
    }

    impl ScriptedBackend {
        fn new() -> Self {
            Self {
                next: Ok(None),
                sent: Vec::new(),
                reject_sends: false,
                invalidated: false,
            }
        }
    }

    impl MediaBackend for ScriptedBackend {
        fn query(&mut self) -> Result<Option<RawSession>, BackendError> {
            self.next.clone()
        }

        fn send(&mut self, command: TransportCommand) -> Result<(), BackendError> {
            if self.reject_sends {
                return Err(BackendError::Disconnected);
            }
            self.sent.push(command);
            Ok(())
        }

        fn take_invalidation(&mut self) -> bool {
            std::mem::take(&mut self.invalidated)
        }
    }

    fn all_controls() -> RawControls {
        RawControls {
            play: true,
            pause: true,
            next: true,
            previous: true,
        }
    }

    fn track(title: &str, artist: &str) -> RawSession {
        RawSession {
            title: title.into(),
            artist: artist.into(),
            source_app: "Spotify.exe".into(),
            status: RawPlaybackStatus::Playing,
            controls: all_controls(),
            ..Default::default()
        }
    }

    fn mirror_with(session: Option<RawSession>) -> SessionMirror<ScriptedBackend> {
        let mut backend = ScriptedBackend::new();
        backend.next = Ok(session);
        SessionMirror::new(backend)
    }

    #[test]
    fn no_session_yields_unknown_and_commands_are_noops() {
        let mut mirror = mirror_with(None);
        let snapshot = mirror.refresh();
        assert_eq!(snapshot.status, PlaybackStatus::Unknown);
        assert!(snapshot.capabilities.is_empty());
        assert_eq!(snapshot.identity(), None);

        mirror.play();
        mirror.pause();
        mirror.next();
        mirror.previous();
        assert!(mirror.backend().sent.is_empty());
        assert!(!mirror.track_changed());
    }

    #[test]
    fn backend_failure_degrades_to_empty_snapshot() {
        let mut mirror = mirror_with(Some(track("A", "X")));
        mirror.refresh();
        mirror.backend_mut().next = Err(BackendError::Timeout(Duration::from_millis(900)));

        let snapshot = mirror.refresh();
        assert_eq!(snapshot, SessionSnapshot::empty());
        assert!(mirror.last_error().is_some());

        mirror.next();
        assert!(mirror.backend().sent.is_empty());
    }

    #[test]
    fn metadata_is_normalised() {
        let raw = RawSession {
            title: "  ".into(),
            artist: String::new(),
            album_artist: " Various ".into(),
            source_app: String::new(),
            artwork: Some(Arc::from(Vec::<u8>::new())),
            status: RawPlaybackStatus::Changing,
            controls: RawControls {
                next: true,
                ..Default::default()
            },
        };
        let snapshot = SessionSnapshot::from_raw(raw);
        assert_eq!(snapshot.title, None);
        assert_eq!(snapshot.artist.as_deref(), Some("Various"));
        assert_eq!(snapshot.source_app, None);
        assert_eq!(snapshot.artwork, None);
        assert_eq!(snapshot.status, PlaybackStatus::Unknown);
        assert_eq!(
            snapshot.capabilities,
            Capabilities::empty().with(Capability::CanNext)
        );
    }

    #[test]
    fn commands_respect_last_observed_flags() {
        let mut raw = track("A", "X");
        raw.controls = RawControls {
            play: false,
            pause: true,
            next: false,
            previous: true,
        };
        let mut mirror = mirror_with(Some(raw));

        mirror.pause();
        assert!(mirror.backend().sent.is_empty(), "nothing observed yet");

        mirror.refresh();
        mirror.play();
        mirror.pause();
        mirror.next();
        mirror.previous();
        assert_eq!(
            mirror.backend().sent,
            vec![TransportCommand::Pause, TransportCommand::Previous]
        );
    }

    #[test]
    fn resume_is_reachable_only_when_play_is_offered() {
        let mut mirror = mirror_with(Some(track("A", "X")));
        assert!(!Transport::can_resume(&mirror), "nothing observed yet");

        mirror.refresh();
        assert!(Transport::can_resume(&mirror));

        mirror.backend_mut().next = Err(BackendError::Timeout(Duration::from_millis(900)));
        mirror.refresh();
        assert!(!Transport::can_resume(&mirror));
    }

    #[test]
    fn toggle_follows_playback_status() {
        let mut mirror = mirror_with(Some(track("A", "X")));
        mirror.refresh();
        mirror.toggle_play_pause();

        let mut paused = track("A", "X");
        paused.status = RawPlaybackStatus::Paused;
        mirror.backend_mut().next = Ok(Some(paused));
        mirror.refresh();
        mirror.toggle_play_pause();

        assert_eq!(
            mirror.backend().sent,
            vec![TransportCommand::Pause, TransportCommand::Play]
        );
    }

    #[test]
    fn send_failures_are_swallowed() {
        let mut mirror = mirror_with(Some(track("A", "X")));
        mirror.refresh();
        mirror.backend_mut().reject_sends = true;
        mirror.next();
        assert!(mirror.backend().sent.is_empty());
    }

    #[test]
    fn track_edges_follow_identity() {
        let mut mirror = mirror_with(Some(track("A", "X")));
        mirror.refresh();
        assert!(!mirror.track_changed(), "first track is a baseline");

        mirror.refresh();
        assert!(!mirror.track_changed());

        mirror.backend_mut().next = Ok(Some(track("B", "X")));
        mirror.refresh();
        assert!(mirror.track_changed());

        mirror.refresh();
        assert!(!mirror.track_changed());
    }

    #[test]
    fn gaps_do_not_create_edges() {
        let mut mirror = mirror_with(Some(track("A", "X")));
        mirror.refresh();

        mirror.backend_mut().next = Err(BackendError::Disconnected);
        mirror.refresh();
        assert!(!mirror.track_changed());

        mirror.backend_mut().next = Ok(None);
        mirror.refresh();
        assert!(!mirror.track_changed());

        mirror.backend_mut().next = Ok(Some(track("A", "X")));
        mirror.refresh();
        assert!(!mirror.track_changed());

        mirror.backend_mut().next = Ok(None);
        mirror.refresh();
        mirror.backend_mut().next = Ok(Some(track("C", "X")));
        mirror.refresh();
        assert!(mirror.track_changed());
    }

    #[test]
    fn same_title_and_artist_is_not_a_change() {
        let mut watcher = TrackWatcher::default();
        let a = SessionSnapshot::from_raw(track("Song", "Band")).identity();
        assert!(!watcher.observe(a.clone()));
        assert!(!watcher.observe(a));
    }

    #[test]
    fn invalidation_is_consumed_by_refresh() {
        let mut mirror = mirror_with(None);
        mirror.backend_mut().invalidated = true;
        mirror.refresh();
        assert!(!mirror.needs_refresh());

        mirror.backend_mut().invalidated = true;
        assert!(mirror.needs_refresh());
        assert!(!mirror.needs_refresh());
    }
}
