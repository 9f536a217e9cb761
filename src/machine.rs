//! Per-streamer state machine.
//!
//! Every streamer runs on its own task: it polls its site adapter on its own
//! cadence, takes a recording slot when the streamer goes live, owns the
//! recording session, and publishes an immutable snapshot after every change.
//! Nothing else mutates a streamer; the monitor talks to it through a
//! `StreamerHandle`, whose commands are applied one at a time in the order
//! they were sent.
//!
//! ```text
//!   Disabled <--pause/resume--> Idle --probe:live--> LivePending --open:ok--> Recording
//!                                ^  ^                     |                       |
//!                                |  +----open:fail--------+                       |
//!                                |  +----------------session ends-----------------+
//!                                +--backoff elapsed-- ErrorBackoff <--session fails--+
//! ```

use std::{
    io,
    path::{Path, PathBuf},
    sync::Arc,
};

use chrono::Utc;
use futures::future::BoxFuture;
use tokio::{
    sync::{broadcast, mpsc, oneshot, watch, OwnedSemaphorePermit, Semaphore},
    task::JoinHandle,
    time::{sleep, sleep_until, timeout, Instant},
};
use tokio_util::sync::CancellationToken;

use crate::{
    adapter::{LiveInfo, Probe, SiteAdapter},
    backoff::Backoff,
    config::Config,
    error::{AdapterError, CommandError, SessionError},
    events::{RecordingEnd, StreamerEvent},
    index::FileIndex,
    notice::Notices,
    session::{next_output_path, Outcome, SessionHandle},
    source::MediaSource,
    streamer::{ActiveRecording, State, Status, StreamerId, StreamerSnapshot},
};

pub const MAILBOX_CAPACITY: usize = 32;

/// Requested change of the desired run state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Desired {
    Enable,
    Disable,
    Toggle,
}

enum Command {
    Tick,
    SetDesired {
        desired: Desired,
        reply: oneshot::Sender<Result<StreamerSnapshot, CommandError>>,
    },
    Refresh {
        reply: oneshot::Sender<StreamerSnapshot>,
    },
}

/// Shared resources every machine needs from the monitor.
#[derive(Clone)]
pub struct Shared {
    pub config: Arc<Config>,
    pub admission: Arc<Semaphore>,
    pub notices: Notices,
    pub events: broadcast::Sender<StreamerEvent>,
}

/// Cheap, cloneable access to a running machine.
#[derive(Clone)]
pub struct StreamerHandle {
    id: StreamerId,
    mailbox: mpsc::Sender<Command>,
    snapshot: watch::Receiver<StreamerSnapshot>,
}

impl StreamerHandle {
    pub fn id(&self) -> &StreamerId {
        &self.id
    }

    /// Requests an out-of-cycle step. Never blocks; a tick that cannot be
    /// queued is dropped because one is already pending.
    pub fn tick(&self) {
        let _ = self.mailbox.try_send(Command::Tick);
    }

    pub async fn set_desired_state(&self, desired: Desired) -> Result<StreamerSnapshot, CommandError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::SetDesired { desired, reply }).await?;
        rx.await.map_err(|_| CommandError::NotFound(self.id.clone()))?
    }

    /// Rescans the recordings and, if the streamer is idle, probes right away.
    pub async fn refresh(&self) -> Result<StreamerSnapshot, CommandError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Refresh { reply }).await?;
        rx.await.map_err(|_| CommandError::NotFound(self.id.clone()))
    }

    pub fn current_status(&self) -> Status {
        self.snapshot.borrow().status
    }

    pub fn snapshot(&self) -> StreamerSnapshot {
        self.snapshot.borrow().clone()
    }

    /// Subscribes to snapshot updates.
    pub fn watch(&self) -> watch::Receiver<StreamerSnapshot> {
        self.snapshot.clone()
    }

    async fn send(&self, cmd: Command) -> Result<(), CommandError> {
        self.mailbox
            .send(cmd)
            .await
            .map_err(|_| CommandError::NotFound(self.id.clone()))
    }
}

/// Ownership of a running machine's task. Dropping it leaves the task running;
/// use `cancel_and_remove` to stop it.
pub struct StreamerTask {
    pub handle: StreamerHandle,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl StreamerTask {
    /// Stops the machine from whatever state it is in. An active recording is
    /// cancelled and its file closed before this returns; the file is kept.
    pub async fn cancel_and_remove(self) {
        self.cancel.cancel();
        if let Err(e) = self.task.await {
            error!("Machine for {} did not shut down cleanly: {}", self.handle.id, e);
        }
    }
}

/// Starts a machine for `id` on its own task.
pub fn spawn(
    id: StreamerId,
    adapter: Arc<dyn SiteAdapter>,
    shared: Shared,
    enabled: bool,
) -> StreamerTask {
    let (tx, rx) = mpsc::channel(MAILBOX_CAPACITY);
    let cancel = CancellationToken::new();
    let machine = StreamerMachine::new(id.clone(), adapter, shared, enabled, rx, cancel.clone());
    let snapshot = machine.snapshot_tx.subscribe();

    let task = tokio::spawn(machine.run());

    StreamerTask {
        handle: StreamerHandle {
            id,
            mailbox: tx,
            snapshot,
        },
        cancel,
        task,
    }
}

enum Step {
    Probed(Result<Probe, AdapterError>),
    Opened(Result<Opened, StartFailure>),
}

struct Opened {
    permit: OwnedSemaphorePermit,
    source: MediaSource,
    path: PathBuf,
}

enum StartFailure {
    Adapter(AdapterError),
    Output(io::Error),
}

struct ActiveSession {
    handle: SessionHandle,
    // Held for the whole session; dropping it frees the recording slot.
    _permit: OwnedSemaphorePermit,
}

struct StreamerMachine {
    id: StreamerId,
    adapter: Arc<dyn SiteAdapter>,
    shared: Shared,
    mailbox: mpsc::Receiver<Command>,
    cancel: CancellationToken,
    snapshot_tx: watch::Sender<StreamerSnapshot>,

    state: State,
    enabled: bool,
    probed: bool,
    private: bool,
    offline_since: Option<Instant>,
    next_check: Instant,
    /// Earliest retry after the last failure; survives a pause.
    retry_at: Option<Instant>,
    backoff: Backoff,
    last_error: Option<String>,
    last_published: (State, Status),

    /// The probe or admission/open currently in flight, if any.
    pending: Option<BoxFuture<'static, Step>>,
    session: Option<ActiveSession>,
    index: FileIndex,
}

impl StreamerMachine {
    fn new(
        id: StreamerId,
        adapter: Arc<dyn SiteAdapter>,
        shared: Shared,
        enabled: bool,
        mailbox: mpsc::Receiver<Command>,
        cancel: CancellationToken,
    ) -> Self {
        let config = &shared.config;
        let index = FileIndex::new(
            config.downloads_dir.join(id.folder_name()),
            &config.video_extensions,
        );
        let backoff = Backoff::new(config.backoff.min, config.backoff.max);
        let state = if enabled { State::Idle } else { State::Disabled };
        let status = if enabled { Status::Unknown } else { Status::Paused };

        let snapshot = StreamerSnapshot {
            id: id.clone(),
            display_name: id.username.clone(),
            url: adapter.website_url(&id.username),
            status,
            state,
            running: enabled,
            recording: None,
            files: Vec::new(),
            total_size: 0,
            consecutive_failures: 0,
            last_error: None,
        };
        let (snapshot_tx, _) = watch::channel(snapshot);

        Self {
            id,
            adapter,
            shared,
            mailbox,
            cancel,
            snapshot_tx,
            state,
            enabled,
            probed: false,
            private: false,
            offline_since: None,
            next_check: Instant::now(),
            retry_at: None,
            backoff,
            last_error: None,
            last_published: (state, status),
            pending: None,
            session: None,
            index,
        }
    }

    async fn run(mut self) {
        info!("{} monitoring started ({})", self.id, self.state);
        self.refresh_index().await;
        self.publish();

        loop {
            let check_due = self.enabled
                && self.pending.is_none()
                && matches!(self.state, State::Idle | State::ErrorBackoff);
            let progress_interval = self.shared.config.progress_interval;

            tokio::select! {
                biased;

                _ = self.cancel.cancelled() => break,

                cmd = self.mailbox.recv() => match cmd {
                    Some(cmd) => self.handle_command(cmd).await,
                    None => break,
                },

                outcome = wait_session(&mut self.session), if self.session.is_some() => {
                    self.on_session_end(outcome).await;
                }

                step = wait_pending(&mut self.pending), if self.pending.is_some() => {
                    self.pending = None;
                    match step {
                        Step::Probed(result) => self.on_probed(result),
                        Step::Opened(result) => self.on_opened(result),
                    }
                }

                _ = sleep_until(self.next_check), if check_due => self.begin_probe(),

                _ = sleep(progress_interval), if self.session.is_some() => self.publish(),
            }
        }

        self.teardown().await;
    }

    async fn handle_command(&mut self, cmd: Command) {
        match cmd {
            Command::Tick => {
                if self.enabled && self.state == State::Idle && self.pending.is_none() {
                    self.next_check = Instant::now();
                }
            }
            Command::SetDesired { desired, reply } => {
                let result = self.set_desired(desired);
                let _ = reply.send(result);
            }
            Command::Refresh { reply } => {
                self.refresh_index().await;
                if self.enabled && self.state == State::Idle && self.pending.is_none() {
                    self.begin_probe();
                }
                self.publish();
                let _ = reply.send(self.snapshot_tx.borrow().clone());
            }
        }
    }

    fn set_desired(&mut self, desired: Desired) -> Result<StreamerSnapshot, CommandError> {
        let enable = match desired {
            Desired::Toggle => !self.enabled,
            Desired::Enable if self.enabled => return Err(self.invalid("start")),
            Desired::Disable if !self.enabled => return Err(self.invalid("stop")),
            Desired::Enable => true,
            Desired::Disable => false,
        };

        if enable {
            self.resume();
        } else {
            self.pause();
        }
        self.publish();
        Ok(self.snapshot_tx.borrow().clone())
    }

    fn invalid(&self, command: &'static str) -> CommandError {
        CommandError::InvalidTransition {
            id: self.id.clone(),
            status: self.status(),
            command,
        }
    }

    fn resume(&mut self) {
        self.enabled = true;
        if self.state == State::Disabled {
            info!("{} resumed", self.id);
            self.probed = false;
            self.private = false;
            self.offline_since = None;
            let now = Instant::now();
            self.next_check = self.retry_at.map_or(now, |at| at.max(now));
            self.state = State::Idle;
        }
    }

    /// Stops future polling. A recording in progress runs to completion and
    /// the machine halts afterwards.
    fn pause(&mut self) {
        self.enabled = false;
        // Drops an in-flight probe, or gives up the place in the admission
        // queue along with any slot already taken.
        self.pending = None;
        if self.session.is_some() {
            info!("{} paused, current recording continues", self.id);
        } else {
            info!("{} paused", self.id);
            self.state = State::Disabled;
        }
    }

    fn begin_probe(&mut self) {
        self.retry_at = None;
        if self.state == State::ErrorBackoff {
            self.state = State::Idle;
            self.publish();
        }

        let adapter = self.adapter.clone();
        let id = self.id.clone();
        let limit = self.shared.config.probe_timeout;

        self.pending = Some(Box::pin(async move {
            let result = match timeout(limit, adapter.probe(&id)).await {
                Ok(result) => result,
                Err(_) => Err(AdapterError::Timeout),
            };
            Step::Probed(result)
        }));
    }

    fn on_probed(&mut self, result: Result<Probe, AdapterError>) {
        let config = self.shared.config.clone();
        let poll = &config.poll;
        let now = Instant::now();

        match result {
            Ok(Probe::Live(info)) => {
                debug!("{} is live at {}", self.id, info.url);
                self.probed = true;
                self.private = false;
                self.offline_since = None;
                self.state = State::LivePending;
                self.begin_start(info);
            }
            Ok(Probe::Offline) => {
                debug!("{} is offline", self.id);
                self.probed = true;
                self.private = false;
                let since = *self.offline_since.get_or_insert(now);
                let wait = if now.duration_since(since) > poll.long_offline_after {
                    poll.long_offline
                } else {
                    poll.offline
                };
                self.next_check = now + wait;
            }
            Ok(Probe::Private) => {
                debug!("{} is in a private show", self.id);
                self.probed = true;
                self.private = true;
                self.offline_since = None;
                self.next_check = now + poll.private;
            }
            Err(e) => {
                let rate_limited = matches!(e, AdapterError::RateLimited);
                self.fail(format!("status check failed: {}", e));
                if rate_limited {
                    self.next_check = self.next_check.max(now + poll.rate_limited);
                    self.retry_at = Some(self.next_check);
                }
            }
        }
        self.publish();
    }

    /// Waits for a recording slot, then opens the source and picks the output
    /// file. Slots are handed out in the order streamers started waiting.
    fn begin_start(&mut self, info: LiveInfo) {
        let admission = self.shared.admission.clone();
        let adapter = self.adapter.clone();
        let limit = self.shared.config.probe_timeout;
        let dir = self.index.dir().to_path_buf();

        if admission.available_permits() == 0 {
            info!("{} is live, waiting for a recording slot", self.id);
        }

        self.pending = Some(Box::pin(async move {
            let permit = match admission.acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => return Step::Opened(Err(StartFailure::Adapter(AdapterError::Unavailable))),
            };
            let source = match timeout(limit, adapter.open_source(&info)).await {
                Ok(Ok(source)) => source,
                Ok(Err(e)) => return Step::Opened(Err(StartFailure::Adapter(e))),
                Err(_) => return Step::Opened(Err(StartFailure::Adapter(AdapterError::Timeout))),
            };
            match next_output_path(&dir, &source.extension).await {
                Ok(path) => Step::Opened(Ok(Opened {
                    permit,
                    source,
                    path,
                })),
                Err(e) => Step::Opened(Err(StartFailure::Output(e))),
            }
        }));
    }

    fn on_opened(&mut self, result: Result<Opened, StartFailure>) {
        match result {
            Ok(opened) => {
                info!("{} recording to {}", self.id, opened.path.display());
                self.backoff.reset();
                self.session = Some(ActiveSession {
                    handle: SessionHandle::start(opened.source, opened.path),
                    _permit: opened.permit,
                });
                self.state = State::Recording;
            }
            Err(StartFailure::Adapter(e)) => {
                // The stream vanished between probe and open; not an error.
                info!("{} could not open stream: {}", self.id, e);
                self.state = State::Idle;
                self.next_check = Instant::now() + self.shared.config.poll.offline;
            }
            Err(StartFailure::Output(e)) => {
                let e = SessionError::WriteFailure(e);
                self.fail(format!("could not create recording: {}", e));
            }
        }
        self.publish();
    }

    async fn on_session_end(&mut self, outcome: Outcome) {
        let Some(active) = self.session.take() else {
            return;
        };
        let path = active.handle.path().to_path_buf();
        drop(active);

        let (size, end) = match outcome {
            Outcome::Success { size, duration } => {
                info!(
                    "{} recording ended: {} ({} bytes in {:?})",
                    self.id,
                    path.display(),
                    size,
                    duration
                );
                (size, RecordingEnd::Completed)
            }
            Outcome::Cancelled { size } => (size, RecordingEnd::Cancelled),
            Outcome::Failure(e) => {
                let message = format!("recording failed: {}", e);
                let size = recorded_size(&path).await;
                self.fail(message.clone());
                (size, RecordingEnd::Failed(message))
            }
        };

        self.refresh_index().await;
        let _ = self.shared.events.send(StreamerEvent::RecordingFinished {
            id: self.id.clone(),
            path,
            size,
            end: end.clone(),
            timestamp: Utc::now(),
        });

        // A failure has already moved the machine on.
        if !matches!(end, RecordingEnd::Failed(_)) {
            if self.enabled {
                self.state = State::Idle;
                self.next_check = Instant::now() + self.shared.config.poll.offline;
            } else {
                info!("{} halted after recording", self.id);
                self.state = State::Disabled;
            }
        }
        self.publish();
    }

    /// Contains a failure: records it, raises the notice, and backs off.
    fn fail(&mut self, message: String) {
        let delay = self.backoff.next_delay();
        warn!(
            "{} {} (failure #{}, retrying in {:?})",
            self.id,
            message,
            self.backoff.failures(),
            delay
        );
        self.shared.notices.raise(&self.id, format!("{}: {}", self.id, message));
        self.last_error = Some(message);
        self.next_check = Instant::now() + delay;
        self.retry_at = Some(self.next_check);
        self.state = if self.enabled {
            State::ErrorBackoff
        } else {
            State::Disabled
        };
    }

    async fn refresh_index(&mut self) {
        let skip = self.session.as_ref().map(|s| s.handle.path().to_path_buf());
        if let Err(e) = self.index.refresh(skip.as_deref()).await {
            warn!("{} could not scan {}: {}", self.id, self.index.dir().display(), e);
        }
    }

    fn status(&self) -> Status {
        match self.state {
            State::Disabled => Status::Paused,
            State::Idle if self.private => Status::OnlineNotRecording,
            State::Idle if self.probed => Status::Offline,
            State::Idle => Status::Unknown,
            State::LivePending => Status::OnlineNotRecording,
            State::Recording => Status::Recording,
            State::ErrorBackoff => Status::Error,
        }
    }

    fn publish(&mut self) {
        let status = self.status();
        let snapshot = StreamerSnapshot {
            id: self.id.clone(),
            display_name: self.id.username.clone(),
            url: self.adapter.website_url(&self.id.username),
            status,
            state: self.state,
            running: self.enabled,
            recording: self.session.as_ref().map(|s| ActiveRecording {
                path: s.handle.path().to_path_buf(),
                started_at: s.handle.started_at(),
                bytes: s.handle.bytes_written(),
            }),
            files: self.index.files().to_vec(),
            total_size: self.index.total_size(),
            consecutive_failures: self.backoff.failures(),
            last_error: self.last_error.clone(),
        };
        self.snapshot_tx.send_replace(snapshot);

        if self.last_published != (self.state, status) {
            debug!("{} is now {} ({})", self.id, self.state, status);
            self.last_published = (self.state, status);
            let _ = self.shared.events.send(StreamerEvent::StatusChanged {
                id: self.id.clone(),
                state: self.state,
                status,
                timestamp: Utc::now(),
            });
        }
    }

    async fn teardown(&mut self) {
        self.pending = None;
        if let Some(mut active) = self.session.take() {
            info!("{} removed while recording, closing {}", self.id, active.handle.path().display());
            active.handle.cancel();
            let outcome = active.handle.await_completion().await;
            let path = active.handle.path().to_path_buf();
            drop(active);

            let (size, end) = match outcome {
                Outcome::Success { size, .. } => (size, RecordingEnd::Completed),
                Outcome::Cancelled { size } => (size, RecordingEnd::Cancelled),
                Outcome::Failure(e) => {
                    warn!("{} recording failed while closing: {}", self.id, e);
                    (recorded_size(&path).await, RecordingEnd::Failed(e.to_string()))
                }
            };
            let _ = self.shared.events.send(StreamerEvent::RecordingFinished {
                id: self.id.clone(),
                path,
                size,
                end,
                timestamp: Utc::now(),
            });
        }
        info!("{} monitoring stopped", self.id);
    }
}

async fn wait_session(session: &mut Option<ActiveSession>) -> Outcome {
    match session {
        Some(active) => active.handle.await_completion().await,
        None => std::future::pending().await,
    }
}

async fn wait_pending(pending: &mut Option<BoxFuture<'static, Step>>) -> Step {
    match pending {
        Some(fut) => fut.await,
        None => std::future::pending().await,
    }
}

/// Size of what reached the disk. A failed session may not know it.
async fn recorded_size(path: &Path) -> u64 {
    tokio::fs::metadata(path).await.map(|m| m.len()).unwrap_or(0)
}
