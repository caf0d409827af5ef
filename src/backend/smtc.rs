use super::{MediaBackend, RawControls, RawPlaybackStatus, RawSession, TransportCommand};
use crate::error::BackendError;
use futures::executor::block_on;
use std::{
    future::IntoFuture,
    sync::{
        atomic::{AtomicBool, Ordering},
        mpsc::{self, RecvTimeoutError},
        Arc,
    },
    thread,
    time::{Duration, Instant},
};
use tracing::{debug, info, warn};
use windows::{
    core::{Result as WinResult, RuntimeType},
    Foundation::TypedEventHandler,
    Media::Control::{
        CurrentSessionChangedEventArgs, GlobalSystemMediaTransportControlsSession,
        GlobalSystemMediaTransportControlsSessionManager,
        GlobalSystemMediaTransportControlsSessionMediaProperties,
        GlobalSystemMediaTransportControlsSessionPlaybackStatus, MediaPropertiesChangedEventArgs,
        PlaybackInfoChangedEventArgs, SessionsChangedEventArgs,
    },
    Storage::Streams::DataReader,
    Win32::{
        Foundation::RPC_E_CHANGED_MODE,
        System::Com::{CoInitializeEx, CoUninitialize, COINIT_MULTITHREADED},
    },
};

type Manager = GlobalSystemMediaTransportControlsSessionManager;
type Session = GlobalSystemMediaTransportControlsSession;

const ARTWORK_CHUNK: usize = 64 * 1024;
const MAX_ARTWORK_BYTES: u64 = 8 * 1024 * 1024;

enum WorkerRequest {
    Query { id: u64 },
    Command(TransportCommand),
    Shutdown,
}

struct QueryReply {
    id: u64,
    result: Result<Option<RawSession>, BackendError>,
}

/// SMTC access through a dedicated COM worker thread.
///
/// WinRT calls can stall when a media app hangs, so the UI thread only ever
/// waits on a channel with a deadline.
pub struct SmtcBackend {
    request_tx: mpsc::Sender<WorkerRequest>,
    reply_rx: mpsc::Receiver<QueryReply>,
    next_request_id: u64,
    inflight: Option<u64>,
    timeout: Duration,
    invalidated: Arc<AtomicBool>,
}

impl SmtcBackend {
    pub fn spawn(timeout: Duration) -> Result<Self, BackendError> {
        let (request_tx, request_rx) = mpsc::channel();
        let (reply_tx, reply_rx) = mpsc::channel();
        let (ready_tx, ready_rx) = mpsc::channel();
        let invalidated = Arc::new(AtomicBool::new(false));
        let worker_flag = Arc::clone(&invalidated);

        thread::Builder::new()
            .name("smtc-worker".into())
            .spawn(move || {
                let apartment = match ComApartment::enter() {
                    Ok(apartment) => apartment,
                    Err(err) => {
                        let _ = ready_tx.send(Err(err));
                        return;
                    }
                };
                let _ = ready_tx.send(Ok(()));

                let mut worker = Worker::new(worker_flag);
                while let Ok(request) = request_rx.recv() {
                    match request {
                        WorkerRequest::Query { id } => {
                            let result = worker.query();
                            if reply_tx.send(QueryReply { id, result }).is_err() {
                                break;
                            }
                        }
                        WorkerRequest::Command(command) => worker.execute(command),
                        WorkerRequest::Shutdown => break,
                    }
                }

                // Event handlers must be unregistered inside the apartment.
                drop(worker);
                drop(apartment);
            })
            .map_err(|e| BackendError::Unavailable(format!("failed to spawn SMTC worker: {e}")))?;

        match ready_rx.recv() {
            Ok(Ok(())) => {}
            Ok(Err(err)) => return Err(err),
            Err(_) => return Err(BackendError::Disconnected),
        }

        info!(timeout_ms = timeout.as_millis() as u64, "SMTC worker started");

        Ok(Self {
            request_tx,
            reply_rx,
            next_request_id: 1,
            inflight: None,
            timeout,
            invalidated,
        })
    }
}

impl MediaBackend for SmtcBackend {
    fn query(&mut self) -> Result<Option<RawSession>, BackendError> {
        // A query that timed out earlier is still being served; wait for it
        // instead of queueing another one behind it.
        let id = match self.inflight {
            Some(id) => id,
            None => {
                let id = self.next_request_id;
                self.next_request_id += 1;
                self.request_tx
                    .send(WorkerRequest::Query { id })
                    .map_err(|_| BackendError::Disconnected)?;
                self.inflight = Some(id);
                id
            }
        };

        let deadline = Instant::now() + self.timeout;
        loop {
            let wait = deadline.saturating_duration_since(Instant::now());
            match self.reply_rx.recv_timeout(wait) {
                Ok(reply) if reply.id == id => {
                    self.inflight = None;
                    return reply.result;
                }
                Ok(reply) => debug!(id = reply.id, "discarding stale SMTC reply"),
                Err(RecvTimeoutError::Timeout) => return Err(BackendError::Timeout(self.timeout)),
                Err(RecvTimeoutError::Disconnected) => {
                    self.inflight = None;
                    return Err(BackendError::Disconnected);
                }
            }
        }
    }

    fn send(&mut self, command: TransportCommand) -> Result<(), BackendError> {
        self.request_tx
            .send(WorkerRequest::Command(command))
            .map_err(|_| BackendError::Disconnected)
    }

    fn take_invalidation(&mut self) -> bool {
        self.invalidated.swap(false, Ordering::AcqRel)
    }
}

impl Drop for SmtcBackend {
    fn drop(&mut self) {
        let _ = self.request_tx.send(WorkerRequest::Shutdown);
    }
}

/// Registered change handlers; dropping the value unregisters them.
struct ManagerSubscription {
    manager: Manager,
    current_token: i64,
    sessions_token: i64,
}

impl ManagerSubscription {
    fn attach(manager: &Manager, flag: &Arc<AtomicBool>) -> WinResult<Self> {
        let current_token = manager.CurrentSessionChanged(&invalidation_handler::<
            Manager,
            CurrentSessionChangedEventArgs,
        >(flag))?;
        let sessions_token = match manager
            .SessionsChanged(&invalidation_handler::<Manager, SessionsChangedEventArgs>(flag))
        {
            Ok(token) => token,
            Err(err) => {
                let _ = manager.RemoveCurrentSessionChanged(current_token);
                return Err(err);
            }
        };

        Ok(Self {
            manager: manager.clone(),
            current_token,
            sessions_token,
        })
    }
}

impl Drop for ManagerSubscription {
    fn drop(&mut self) {
        let _ = self.manager.RemoveCurrentSessionChanged(self.current_token);
        let _ = self.manager.RemoveSessionsChanged(self.sessions_token);
    }
}

struct SessionSubscription {
    session: Session,
    source_app: String,
    properties_token: i64,
    playback_token: i64,
}

impl SessionSubscription {
    fn attach(session: &Session, source_app: &str, flag: &Arc<AtomicBool>) -> WinResult<Self> {
        let properties_token = session.MediaPropertiesChanged(&invalidation_handler::<
            Session,
            MediaPropertiesChangedEventArgs,
        >(flag))?;
        let playback_token = match session
            .PlaybackInfoChanged(&invalidation_handler::<Session, PlaybackInfoChangedEventArgs>(flag))
        {
            Ok(token) => token,
            Err(err) => {
                let _ = session.RemoveMediaPropertiesChanged(properties_token);
                return Err(err);
            }
        };

        Ok(Self {
            session: session.clone(),
            source_app: source_app.to_string(),
            properties_token,
            playback_token,
        })
    }
}

impl Drop for SessionSubscription {
    fn drop(&mut self) {
        let _ = self
            .session
            .RemoveMediaPropertiesChanged(self.properties_token);
        let _ = self.session.RemovePlaybackInfoChanged(self.playback_token);
    }
}

/// Handlers never carry data across; they only ask for a re-poll.
fn invalidation_handler<S, A>(flag: &Arc<AtomicBool>) -> TypedEventHandler<S, A>
where
    S: RuntimeType + 'static,
    A: RuntimeType + 'static,
{
    let flag = Arc::clone(flag);
    TypedEventHandler::new(move |_, _| {
        flag.store(true, Ordering::Release);
        Ok(())
    })
}

#[derive(Clone, PartialEq, Eq)]
struct ArtworkKey {
    source_app: String,
    title: String,
    artist: String,
}

struct Worker {
    manager: Option<Manager>,
    manager_subscription: Option<ManagerSubscription>,
    session_subscription: Option<SessionSubscription>,
    artwork: Option<(ArtworkKey, Option<Arc<[u8]>>)>,
    invalidated: Arc<AtomicBool>,
}

impl Worker {
    fn new(invalidated: Arc<AtomicBool>) -> Self {
        Self {
            manager: None,
            manager_subscription: None,
            session_subscription: None,
            artwork: None,
            invalidated,
        }
    }

    fn manager(&mut self) -> WinResult<Manager> {
        if let Some(manager) = &self.manager {
            return Ok(manager.clone());
        }

        let manager = resolve(Manager::RequestAsync()?)?;
        match ManagerSubscription::attach(&manager, &self.invalidated) {
            Ok(subscription) => self.manager_subscription = Some(subscription),
            Err(err) => debug!(error = ?err, "session manager notifications unavailable"),
        }
        self.manager = Some(manager.clone());
        Ok(manager)
    }

    fn reset_manager(&mut self) {
        self.session_subscription = None;
        self.manager_subscription = None;
        self.manager = None;
    }

    fn session(&mut self) -> WinResult<Option<Session>> {
        let manager = self.manager()?;
        match pick_session(&manager) {
            Ok(session) => Ok(session),
            Err(err) => {
                debug!(error = ?err, "session lookup failed; requesting a fresh manager");
                self.reset_manager();
                let manager = self.manager()?;
                pick_session(&manager)
            }
        }
    }

    fn query(&mut self) -> Result<Option<RawSession>, BackendError> {
        let Some(session) = self.session()? else {
            self.session_subscription = None;
            return Ok(None);
        };
        Ok(Some(self.read_session(&session)?))
    }

    fn read_session(&mut self, session: &Session) -> WinResult<RawSession> {
        let source_app = session
            .SourceAppUserModelId()
            .map(|id| id.to_string_lossy())
            .unwrap_or_default();
        self.watch_session(session, &source_app);

        let props = resolve(session.TryGetMediaPropertiesAsync()?)?;
        let title = props.Title()?.to_string_lossy();
        let artist = props.Artist()?.to_string_lossy();
        let album_artist = props
            .AlbumArtist()
            .map(|a| a.to_string_lossy())
            .unwrap_or_default();

        let info = session.GetPlaybackInfo()?;
        let status = match info.PlaybackStatus()? {
            GlobalSystemMediaTransportControlsSessionPlaybackStatus::Closed => {
                RawPlaybackStatus::Closed
            }
            GlobalSystemMediaTransportControlsSessionPlaybackStatus::Opened => {
                RawPlaybackStatus::Opened
            }
            GlobalSystemMediaTransportControlsSessionPlaybackStatus::Changing => {
                RawPlaybackStatus::Changing
            }
            GlobalSystemMediaTransportControlsSessionPlaybackStatus::Stopped => {
                RawPlaybackStatus::Stopped
            }
            GlobalSystemMediaTransportControlsSessionPlaybackStatus::Playing => {
                RawPlaybackStatus::Playing
            }
            GlobalSystemMediaTransportControlsSessionPlaybackStatus::Paused => {
                RawPlaybackStatus::Paused
            }
            _ => RawPlaybackStatus::Unknown,
        };

        let controls = match info.Controls() {
            Ok(c) => RawControls {
                play: c.IsPlayEnabled().unwrap_or(false),
                pause: c.IsPauseEnabled().unwrap_or(false),
                next: c.IsNextEnabled().unwrap_or(false),
                previous: c.IsPreviousEnabled().unwrap_or(false),
            },
            Err(err) => {
                debug!(error = ?err, "playback controls unavailable");
                RawControls::default()
            }
        };

        let key = ArtworkKey {
            source_app: source_app.clone(),
            title: title.clone(),
            artist: artist.clone(),
        };
        let artwork = self.artwork_for(key, &props);

        Ok(RawSession {
            title,
            artist,
            album_artist,
            source_app,
            artwork,
            status,
            controls,
        })
    }

    fn watch_session(&mut self, session: &Session, source_app: &str) {
        let current = self
            .session_subscription
            .as_ref()
            .map(|sub| sub.source_app.as_str());
        if current == Some(source_app) {
            return;
        }

        self.session_subscription = None;
        match SessionSubscription::attach(session, source_app, &self.invalidated) {
            Ok(subscription) => {
                debug!(source_app, "watching media session");
                self.session_subscription = Some(subscription);
            }
            Err(err) => debug!(error = ?err, source_app, "session notifications unavailable"),
        }
    }

    fn artwork_for(
        &mut self,
        key: ArtworkKey,
        props: &GlobalSystemMediaTransportControlsSessionMediaProperties,
    ) -> Option<Arc<[u8]>> {
        if let Some((cached_key, bytes)) = &self.artwork {
            if *cached_key == key {
                return bytes.clone();
            }
        }

        let bytes: Option<Arc<[u8]>> = match read_artwork(props) {
            Ok(Some(bytes)) if !bytes.is_empty() => Some(Arc::from(bytes)),
            Ok(_) => None,
            Err(err) => {
                debug!(error = ?err, "thumbnail read failed");
                None
            }
        };
        self.artwork = Some((key, bytes.clone()));
        bytes
    }

    fn execute(&mut self, command: TransportCommand) {
        let result = self.session().and_then(|session| {
            let Some(session) = session else {
                return Ok(None);
            };
            let accepted = match command {
                TransportCommand::Play => resolve(session.TryPlayAsync()?)?,
                TransportCommand::Pause => resolve(session.TryPauseAsync()?)?,
                TransportCommand::Next => resolve(session.TrySkipNextAsync()?)?,
                TransportCommand::Previous => {
                    resolve(session.TrySkipPreviousAsync()?)?
                }
            };
            Ok(Some(accepted))
        });

        match result {
            Ok(Some(true)) => debug!(command = command.name(), "transport command accepted"),
            Ok(Some(false)) => warn!(
                command = command.name(),
                "command was rejected by the media session"
            ),
            Ok(None) => debug!(command = command.name(), "no media session for command"),
            Err(err) => warn!(command = command.name(), error = ?err, "transport command failed"),
        }

        self.invalidated.store(true, Ordering::Release);
    }
}

fn pick_session(manager: &Manager) -> WinResult<Option<Session>> {
    if let Ok(current) = manager.GetCurrentSession() {
        return Ok(Some(current));
    }

    let mut first = None;
    for session in manager.GetSessions()? {
        let playing = session
            .GetPlaybackInfo()
            .and_then(|info| info.PlaybackStatus())
            .map(|status| status == GlobalSystemMediaTransportControlsSessionPlaybackStatus::Playing)
            .unwrap_or(false);
        if playing {
            return Ok(Some(session));
        }
        if first.is_none() {
            first = Some(session);
        }
    }
    Ok(first)
}

/// Reads the whole cover art stream, or nothing when it is missing, empty or
/// larger than `MAX_ARTWORK_BYTES`.
fn read_artwork(
    props: &GlobalSystemMediaTransportControlsSessionMediaProperties,
) -> WinResult<Option<Vec<u8>>> {
    let Ok(reference) = props.Thumbnail() else {
        return Ok(None);
    };
    let stream = resolve(reference.OpenReadAsync()?)?;
    let size = stream.Size()?;
    if size == 0 {
        return Ok(None);
    }
    if size > MAX_ARTWORK_BYTES {
        debug!(size, "cover art too large; skipped");
        return Ok(None);
    }

    let reader = DataReader::CreateDataReader(&stream.GetInputStreamAt(0)?)?;
    let mut bytes = vec![0u8; size as usize];
    let mut filled = 0;
    while filled < bytes.len() {
        let wanted = (bytes.len() - filled).min(ARTWORK_CHUNK);
        let loaded = (resolve(reader.LoadAsync(wanted as u32)?)? as usize).min(wanted);
        if loaded == 0 {
            break;
        }
        reader.ReadBytes(&mut bytes[filled..filled + loaded])?;
        filled += loaded;
    }
    bytes.truncate(filled);
    Ok(Some(bytes))
}

/// Drives a WinRT async operation to completion on the worker thread.
fn resolve<T>(operation: impl IntoFuture<Output = WinResult<T>>) -> WinResult<T> {
    block_on(operation.into_future())
}

/// COM apartment held by the worker thread for its whole life.
///
/// A thread already in an STA keeps it and is not uninitialised on drop.
struct ComApartment {
    owned: bool,
}

impl ComApartment {
    fn enter() -> Result<Self, BackendError> {
        let hr = unsafe { CoInitializeEx(None, COINIT_MULTITHREADED) };
        if hr.is_ok() {
            Ok(Self { owned: true })
        } else if hr == RPC_E_CHANGED_MODE {
            Ok(Self { owned: false })
        } else {
            Err(BackendError::Unavailable(format!("COM init failed: {hr:?}")))
        }
    }
}

impl Drop for ComApartment {
    fn drop(&mut self) {
        if self.owned {
            unsafe { CoUninitialize() };
        }
    }
}
