//! Async runtime for application orchestration.
//!
//! The Runtime owns the [`App`] reducer and is the only place that touches a
//! [`Driver`]. Everything that happens, including user intents, transport
//! traffic, media completions, history results and clock ticks, arrives on a
//! single queue and is handed to the reducer one event at a time. Resulting
//! actions are executed in order:
//!
//! - transport writes go to the current transport task
//! - media operations go to a per-call worker that runs them sequentially
//! - history requests run as tasks whose results come back as events
//! - renders publish a snapshot, notifications are broadcast

use std::{collections::HashMap, time::Duration};

use tandem_core::{
    CallAction, CallEvent, CallId, Environment, MediaBackend, PeerEventSink, TransportId,
};
use tandem_proto::UserId;
use tokio::{
    sync::{broadcast, mpsc, watch},
    task::JoinHandle,
};

use crate::{
    App, AppAction, AppConfig, AppEvent, AppHandle, Connector, Driver, HistoryService, Notification,
    Snapshot, TransportHandle, WireCommand, WireEvent,
};

/// Capacity of the notification channel. Slow subscribers lag, they never
/// block the runtime.
const NOTIFICATION_CAPACITY: usize = 256;

/// Entry on the runtime queue.
#[derive(Debug)]
pub(crate) enum Inbox {
    /// Event for the reducer
    Event(AppEvent),
    /// A transport finished opening; its command channel is ready
    Attached {
        transport: TransportId,
        commands: mpsc::UnboundedSender<WireCommand>,
    },
}

/// Runtime that drives an [`App`] with a [`Driver`].
///
/// Create with [`Runtime::new`], spawn [`Runtime::run`], and talk to it
/// through the returned [`AppHandle`].
pub struct Runtime<D: Driver> {
    driver: D,
    app: App<D::Env>,
    tick_interval: Duration,
    inbox: mpsc::UnboundedSender<Inbox>,
    inbox_rx: mpsc::UnboundedReceiver<Inbox>,
    snapshots: watch::Sender<Snapshot>,
    notifications: broadcast::Sender<Notification>,
    /// Transport we are waiting on, if an open is in flight
    pending: Option<TransportId>,
    transport: Option<(TransportId, mpsc::UnboundedSender<WireCommand>)>,
    media: HashMap<CallId, mpsc::UnboundedSender<CallAction>>,
}

impl<D: Driver> Runtime<D> {
    /// Create a runtime and the handle to control it.
    pub fn new(driver: D, config: AppConfig) -> (Self, AppHandle) {
        let tick_interval = config.tick_interval;
        let app = App::new(driver.env().clone(), config);
        let (inbox, inbox_rx) = mpsc::unbounded_channel();
        let (snapshots, snapshot_rx) = watch::channel(app.snapshot());
        let (notifications, _) = broadcast::channel(NOTIFICATION_CAPACITY);

        let handle = AppHandle::new(inbox.clone(), snapshot_rx, notifications.clone());
        let runtime = Self {
            driver,
            app,
            tick_interval,
            inbox,
            inbox_rx,
            snapshots,
            notifications,
            pending: None,
            transport: None,
            media: HashMap::new(),
        };
        (runtime, handle)
    }

    /// The reducer.
    pub fn app(&self) -> &App<D::Env> {
        &self.app
    }

    /// Run the event loop until [`crate::Intent::Quit`].
    ///
    /// Must be called inside a tokio runtime; helper tasks are spawned on it.
    pub async fn run(mut self) {
        let ticker = self.spawn_ticker();
        self.render();

        while let Some(item) = self.inbox_rx.recv().await {
            let event = match item {
                Inbox::Event(event) => event,
                Inbox::Attached { transport, commands } => {
                    if self.pending != Some(transport) {
                        tracing::debug!(%transport, "discarding stale transport");
                        let _ = commands.send(WireCommand::Close);
                        continue;
                    }
                    self.pending = None;
                    self.transport = Some((transport, commands));
                    AppEvent::TransportOpened { transport }
                },
            };

            let actions = self.app.handle(event);
            if self.execute(actions) {
                break;
            }
        }

        ticker.abort();
        self.close_transport();
        self.render();
        tracing::info!("runtime stopped");
    }

    /// Execute reducer actions. Returns `true` on quit.
    fn execute(&mut self, actions: Vec<AppAction>) -> bool {
        let mut quit = false;
        for action in actions {
            match action {
                AppAction::Render => self.render(),
                AppAction::Quit => quit = true,
                AppAction::OpenTransport { transport, url, user } => {
                    self.open_transport(transport, url, user);
                },
                AppAction::SendFrame(frame) => self.write(WireCommand::Frame(frame)),
                AppAction::SendHeartbeat => self.write(WireCommand::Heartbeat),
                AppAction::CloseTransport => self.close_transport(),
                AppAction::Media(action) => self.dispatch_media(action),
                AppAction::LoadConversations { user } => {
                    let history = self.driver.history().clone();
                    self.spawn_reply(async move {
                        let result = history.conversations(user).await.map_err(|e| e.to_string());
                        Some(AppEvent::ConversationsLoaded { user, result })
                    });
                },
                AppAction::LoadMessages { user, with } => {
                    let history = self.driver.history().clone();
                    self.spawn_reply(async move {
                        let result = history.messages(user, with).await.map_err(|e| e.to_string());
                        Some(AppEvent::MessagesLoaded { user, with, result })
                    });
                },
                AppAction::MarkReadRemote(receipt) => {
                    let history = self.driver.history().clone();
                    self.spawn_reply(async move {
                        if let Err(error) = history.mark_read(receipt).await {
                            tracing::warn!(%error, reader = %receipt.receiver_id, "mark read failed");
                        }
                        None
                    });
                },
                AppAction::ResolveContact { id } => {
                    let history = self.driver.history().clone();
                    self.spawn_reply(async move {
                        match history.user(id).await {
                            Ok(profile) => Some(AppEvent::ContactResolved { profile }),
                            Err(error) => {
                                tracing::debug!(%error, %id, "contact lookup failed");
                                None
                            },
                        }
                    });
                },
                AppAction::Notify(notification) => {
                    // No subscribers is fine.
                    let _ = self.notifications.send(notification);
                },
            }
        }
        quit
    }

    fn render(&self) {
        let snapshot = self.app.snapshot();
        self.snapshots.send_if_modified(|current| {
            if *current == snapshot {
                false
            } else {
                *current = snapshot;
                true
            }
        });
    }

    fn write(&self, command: WireCommand) {
        match &self.transport {
            Some((transport, commands)) => {
                if commands.send(command).is_err() {
                    tracing::debug!(%transport, "write to closed transport");
                }
            },
            None => tracing::debug!("write without transport"),
        }
    }

    fn close_transport(&mut self) {
        self.pending = None;
        if let Some((transport, commands)) = self.transport.take() {
            tracing::debug!(%transport, "closing transport");
            let _ = commands.send(WireCommand::Close);
        }
    }

    fn open_transport(&mut self, transport: TransportId, url: String, user: UserId) {
        self.close_transport();
        self.pending = Some(transport);

        let connector = self.driver.connector().clone();
        let inbox = self.inbox.clone();
        tokio::spawn(async move {
            let TransportHandle { commands, mut events } = match connector.open(&url, user).await {
                Ok(handle) => handle,
                Err(error) => {
                    tracing::warn!(%transport, %error, %url, "transport open failed");
                    let reason = error.to_string();
                    let _ = inbox.send(Inbox::Event(AppEvent::TransportClosed { transport, reason }));
                    return;
                },
            };

            if inbox.send(Inbox::Attached { transport, commands }).is_err() {
                return;
            }

            while let Some(event) = events.recv().await {
                let event = match event {
                    WireEvent::Frame(frame) => AppEvent::FrameReceived { transport, frame },
                    WireEvent::Heartbeat => AppEvent::HeartbeatReceived { transport },
                    WireEvent::Closed(reason) => {
                        let _ = inbox.send(Inbox::Event(AppEvent::TransportClosed { transport, reason }));
                        return;
                    },
                };
                if inbox.send(Inbox::Event(event)).is_err() {
                    return;
                }
            }

            let reason = "transport task ended".to_string();
            let _ = inbox.send(Inbox::Event(AppEvent::TransportClosed { transport, reason }));
        });
    }

    fn dispatch_media(&mut self, action: CallAction) {
        let Some(call) = media_call(&action) else {
            tracing::warn!(?action, "not a media operation");
            return;
        };
        let releases = matches!(action, CallAction::ReleaseMedia { .. });

        let queue = self
            .media
            .entry(call)
            .or_insert_with(|| spawn_media_worker(call, self.driver.media().clone(), self.inbox.clone()));
        if queue.send(action).is_err() {
            tracing::warn!(%call, "media worker gone");
        }

        // The worker drains what is queued and exits once the sender drops.
        if releases {
            self.media.remove(&call);
        }
    }

    fn spawn_ticker(&self) -> JoinHandle<()> {
        let env = self.driver.env().clone();
        let inbox = self.inbox.clone();
        let interval = self.tick_interval;
        tokio::spawn(async move {
            loop {
                env.sleep(interval).await;
                if inbox.send(Inbox::Event(AppEvent::Tick)).is_err() {
                    break;
                }
            }
        })
    }

    fn spawn_reply<F>(&self, task: F)
    where
        F: std::future::Future<Output = Option<AppEvent>> + Send + 'static,
    {
        let inbox = self.inbox.clone();
        tokio::spawn(async move {
            if let Some(event) = task.await {
                let _ = inbox.send(Inbox::Event(event));
            }
        });
    }
}

/// Call a media operation belongs to. `None` for actions that are not
/// executed by the backend.
fn media_call(action: &CallAction) -> Option<CallId> {
    match action {
        CallAction::AcquireMedia { call, .. }
        | CallAction::OpenPeer { call, .. }
        | CallAction::CreateOffer { call }
        | CallAction::CreateAnswer { call, .. }
        | CallAction::SetRemoteAnswer { call, .. }
        | CallAction::AddRemoteCandidate { call, .. }
        | CallAction::SetTrackEnabled { call, .. }
        | CallAction::StartScreenShare { call }
        | CallAction::StopScreenShare { call }
        | CallAction::ProbeRemoteVideo { call }
        | CallAction::ClosePeer { call }
        | CallAction::ReleaseMedia { call } => Some(*call),
        CallAction::Signal(_) | CallAction::Failed { .. } => None,
    }
}

fn spawn_media_worker<M: MediaBackend>(
    call: CallId,
    media: M,
    inbox: mpsc::UnboundedSender<Inbox>,
) -> mpsc::UnboundedSender<CallAction> {
    let (queue, mut actions) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        while let Some(action) = actions.recv().await {
            if let Some(event) = run_media(&media, action, &inbox).await {
                if inbox.send(Inbox::Event(AppEvent::Media(event))).is_err() {
                    break;
                }
            }
        }
        tracing::trace!(%call, "media worker finished");
    });
    queue
}

/// Execute one media operation and report its completion, if it has one.
async fn run_media<M: MediaBackend>(
    media: &M,
    action: CallAction,
    inbox: &mpsc::UnboundedSender<Inbox>,
) -> Option<CallEvent> {
    match action {
        CallAction::AcquireMedia { call, options } => Some(match media.acquire(call, options).await {
            Ok(media) => CallEvent::MediaAcquired { call, media },
            Err(error) => CallEvent::Failed { call, error },
        }),
        CallAction::OpenPeer { call, ice_servers } => {
            let events = inbox.clone();
            let sink: PeerEventSink = std::sync::Arc::new(move |call, event| {
                let _ = events.send(Inbox::Event(AppEvent::Media(CallEvent::Peer { call, event })));
            });
            Some(match media.open_peer(call, ice_servers, sink).await {
                Ok(()) => CallEvent::PeerOpened { call },
                Err(error) => CallEvent::Failed { call, error },
            })
        },
        CallAction::CreateOffer { call } => Some(match media.create_offer(call).await {
            Ok(sdp) => CallEvent::OfferCreated { call, sdp },
            Err(error) => CallEvent::Failed { call, error },
        }),
        CallAction::CreateAnswer { call, offer } => Some(match media.create_answer(call, offer).await {
            Ok(sdp) => CallEvent::AnswerCreated { call, sdp },
            Err(error) => CallEvent::Failed { call, error },
        }),
        CallAction::SetRemoteAnswer { call, answer } => {
            media.set_remote_answer(call, answer).await.err().map(|error| CallEvent::Failed { call, error })
        },
        CallAction::AddRemoteCandidate { call, candidate } => {
            if let Err(error) = media.add_remote_candidate(call, candidate).await {
                tracing::warn!(%call, %error, "remote candidate rejected");
            }
            None
        },
        CallAction::SetTrackEnabled { call, kind, enabled } => {
            if let Err(error) = media.set_track_enabled(call, kind, enabled).await {
                tracing::warn!(%call, %error, ?kind, enabled, "track toggle failed");
            }
            None
        },
        CallAction::StartScreenShare { call } => {
            if let Err(error) = media.start_screen_share(call).await {
                tracing::warn!(%call, %error, "screen share failed");
            }
            None
        },
        CallAction::StopScreenShare { call } => {
            if let Err(error) = media.stop_screen_share(call).await {
                tracing::warn!(%call, %error, "restoring camera failed");
            }
            None
        },
        CallAction::ProbeRemoteVideo { call } => match media.probe_remote_video(call).await {
            Ok(active) => Some(CallEvent::ProbeResult { call, active }),
            Err(error) => {
                tracing::debug!(%call, %error, "video probe failed");
                None
            },
        },
        CallAction::ClosePeer { call } => {
            media.close_peer(call).await;
            None
        },
        CallAction::ReleaseMedia { call } => {
            media.release_media(call).await;
            None
        },
        CallAction::Signal(_) | CallAction::Failed { .. } => None,
    }
}
