/// SessionCore: single-owner event loop for all session state.
///
/// Every input (provider pushes, HTTP actions, observer registration) arrives
/// as a `CoreEvent` on one mpsc channel.  SessionCore owns the `SessionStore`
/// and the `BroadcastHub` exclusively; a mutation and its fanout happen in the
/// same step, so observers see per-user changes in acceptance order.
///
/// Provider calls never run on the loop.  They are spawned, and their outcome
/// comes back as `CoreEvent::ActionCompleted`, which goes through the same
/// mutation path as a provider push.
use std::future::Future;
use std::sync::Arc;

use stream_proto::destination::{numbered_destinations, resolve_rtmp_url, restream_destination};
use stream_proto::protocol::{
    ExistingStreamCheck, RestreamDestination, StartRequest, StatusSnapshot, StreamKind,
};
use stream_proto::state::{
    Mutation, SessionStore, StatusReport, StreamRequest, UserId,
};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use crate::error::ControlError;
use crate::hub::{BroadcastHub, ObserverId};
use crate::provider::{DeviceProvider, ManagedStreamOptions, ProviderEvent};

// ── CoreEvent ─────────────────────────────────────────────────────────────────

/// A user action routed through the core.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Start on whichever path the merged saved config selects.
    Start(StartRequest),
    StartManaged(StartRequest),
    /// Managed start relayed to an explicit list of RTMP URLs.
    StartRestream(Vec<String>),
    StartUnmanaged(StartRequest),
    Stop(StreamKind),
    /// Stop whatever kind is currently authoritative.
    StopActive,
    Check,
}

impl Action {
    /// Log label; request bodies can carry stream keys.
    pub fn name(&self) -> &'static str {
        match self {
            Action::Start(_) => "start",
            Action::StartManaged(_) => "managed start",
            Action::StartRestream(_) => "restream start",
            Action::StartUnmanaged(_) => "unmanaged start",
            Action::Stop(StreamKind::Managed) => "managed stop",
            Action::Stop(StreamKind::Unmanaged) => "unmanaged stop",
            Action::StopActive => "stop",
            Action::Check => "check",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionReply {
    Done { message: Option<String> },
    Checked(ExistingStreamCheck),
}

impl ActionReply {
    fn done() -> Self {
        ActionReply::Done { message: None }
    }

    fn done_with(message: &str) -> Self {
        ActionReply::Done {
            message: Some(message.to_string()),
        }
    }
}

pub type ActionResult = Result<ActionReply, ControlError>;

/// Outcome of a spawned provider call.
#[derive(Debug)]
pub enum Completion {
    Started(StreamRequest),
    StartFailed(String),
    Stopped { stopped: bool, error: Option<String> },
    Checked(Result<ExistingStreamCheck, String>),
}

pub struct Subscription {
    pub id: ObserverId,
    pub rx: mpsc::Receiver<StatusSnapshot>,
    pub initial: StatusSnapshot,
}

/// All inputs into the SessionCore loop.
pub enum CoreEvent {
    Provider(ProviderEvent),
    Action {
        user: UserId,
        action: Action,
        reply: oneshot::Sender<ActionResult>,
    },
    ActionCompleted {
        user: UserId,
        completion: Completion,
        /// `None` for calls the core issued on its own.
        reply: Option<oneshot::Sender<ActionResult>>,
    },
    Subscribe {
        user: UserId,
        reply: oneshot::Sender<Subscription>,
    },
    Unsubscribe(ObserverId),
    Snapshot {
        user: UserId,
        reply: oneshot::Sender<StatusSnapshot>,
    },
    Shutdown,
}

// ── CoreHandle ────────────────────────────────────────────────────────────────

/// Cloneable sender side used by the HTTP layer.
#[derive(Clone)]
pub struct CoreHandle {
    tx: mpsc::Sender<CoreEvent>,
}

impl CoreHandle {
    pub fn new(tx: mpsc::Sender<CoreEvent>) -> Self {
        Self { tx }
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> CoreEvent,
    ) -> Result<T, ControlError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(build(reply))
            .await
            .map_err(|_| ControlError::CoreUnavailable)?;
        rx.await.map_err(|_| ControlError::CoreUnavailable)
    }

    pub async fn action(&self, user: UserId, action: Action) -> ActionResult {
        self.request(|reply| CoreEvent::Action {
            user,
            action,
            reply,
        })
        .await?
    }

    pub async fn subscribe(&self, user: UserId) -> Result<Subscription, ControlError> {
        self.request(|reply| CoreEvent::Subscribe { user, reply })
            .await
    }

    pub async fn snapshot(&self, user: UserId) -> Result<StatusSnapshot, ControlError> {
        self.request(|reply| CoreEvent::Snapshot { user, reply })
            .await
    }

    /// Fire-and-forget; safe to call from `Drop`.
    pub fn unsubscribe(&self, id: ObserverId) {
        match self.tx.try_send(CoreEvent::Unsubscribe(id)) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(evt)) => {
                let tx = self.tx.clone();
                if let Ok(rt) = tokio::runtime::Handle::try_current() {
                    rt.spawn(async move {
                        let _ = tx.send(evt).await;
                    });
                }
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {}
        }
    }

    pub async fn shutdown(&self) {
        let _ = self.tx.send(CoreEvent::Shutdown).await;
    }
}

/// Funnel provider pushes into the core channel.
pub fn forward_provider_events(
    mut provider_rx: mpsc::Receiver<ProviderEvent>,
    core_tx: mpsc::Sender<CoreEvent>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(evt) = provider_rx.recv().await {
            if core_tx.send(CoreEvent::Provider(evt)).await.is_err() {
                break;
            }
        }
        debug!("provider event stream ended");
    })
}

// ── SessionCore ───────────────────────────────────────────────────────────────

pub struct SessionCore {
    store: SessionStore,
    hub: BroadcastHub,
    provider: Arc<dyn DeviceProvider>,
    /// Completions of spawned provider calls come back on this sender.
    event_tx: mpsc::Sender<CoreEvent>,
}

impl SessionCore {
    pub fn new(
        provider: Arc<dyn DeviceProvider>,
        observer_queue: usize,
        event_tx: mpsc::Sender<CoreEvent>,
    ) -> Self {
        Self {
            store: SessionStore::new(),
            hub: BroadcastHub::new(observer_queue),
            provider,
            event_tx,
        }
    }

    /// Run the core event loop until `Shutdown` or channel close.
    pub async fn run(mut self, mut event_rx: mpsc::Receiver<CoreEvent>) -> anyhow::Result<()> {
        info!("SessionCore: starting event loop");

        while let Some(evt) = event_rx.recv().await {
            match evt {
                CoreEvent::Shutdown => {
                    info!("SessionCore: shutdown requested");
                    break;
                }
                CoreEvent::Provider(push) => self.handle_provider_event(push),
                CoreEvent::Action {
                    user,
                    action,
                    reply,
                } => {
                    info!("SessionCore: {} requested {}", user, action.name());
                    self.handle_action(user, action, reply);
                }
                CoreEvent::ActionCompleted {
                    user,
                    completion,
                    reply,
                } => self.handle_completion(user, completion, reply),
                CoreEvent::Subscribe { user, reply } => {
                    let (id, rx) = self.hub.subscribe(&user);
                    let initial = self.store.snapshot(&user);
                    if reply.send(Subscription { id, rx, initial }).is_err() {
                        self.hub.unsubscribe(id);
                    }
                }
                CoreEvent::Unsubscribe(id) => {
                    self.hub.unsubscribe(id);
                }
                CoreEvent::Snapshot { user, reply } => {
                    let _ = reply.send(self.store.snapshot(&user));
                }
            }
        }

        info!(
            "SessionCore: stopped ({} sessions, {} observers)",
            self.store.len(),
            self.hub.total_observers()
        );
        Ok(())
    }

    /// Apply a mutation and fan the resulting snapshot out.
    fn commit(&mut self, user: &UserId, mutation: Mutation) -> Option<StatusSnapshot> {
        match self.store.apply(user, mutation) {
            Ok(Some(snapshot)) => {
                let delivered = self.hub.publish(user, &snapshot);
                debug!(
                    "SessionCore: {} rev {} phase {:?} -> {}/{} observers",
                    user,
                    snapshot.rev,
                    snapshot.phase,
                    delivered,
                    self.hub.observer_count(user)
                );
                Some(snapshot)
            }
            Ok(None) => None,
            Err(e) => {
                warn!("SessionCore: mutation rejected: {}", e);
                None
            }
        }
    }

    fn spawn_call<F, Fut>(
        &self,
        user: UserId,
        reply: Option<oneshot::Sender<ActionResult>>,
        call: F,
    ) where
        F: FnOnce(Arc<dyn DeviceProvider>, UserId) -> Fut + Send + 'static,
        Fut: Future<Output = Completion> + Send + 'static,
    {
        let provider = Arc::clone(&self.provider);
        let tx = self.event_tx.clone();
        tokio::spawn(async move {
            let completion = call(provider, user.clone()).await;
            let evt = CoreEvent::ActionCompleted {
                user,
                completion,
                reply,
            };
            if tx.send(evt).await.is_err() {
                warn!("SessionCore: loop gone before provider call completed");
            }
        });
    }

    // ── provider pushes ───────────────────────────────────────────────────────

    fn handle_provider_event(&mut self, push: ProviderEvent) {
        if !self.store.is_connected(push.user()) {
            debug!("SessionCore: push for unbound user {}", push.user());
        }
        match push {
            ProviderEvent::SessionStarted { user } => {
                info!("SessionCore: device session started for {}", user);
                self.commit(&user, Mutation::SessionStarted);
                // Pick up a stream that was already running before we bound.
                self.spawn_check(user, None);
            }
            ProviderEvent::ManagedStatus { user, report } => {
                debug!("SessionCore: managed status {:?} for {}", report.status, user);
                self.commit(&user, Mutation::ProviderStatus(StatusReport::Managed(report)));
            }
            ProviderEvent::UnmanagedStatus { user, report } => {
                debug!("SessionCore: unmanaged status {:?} for {}", report.status, user);
                self.commit(
                    &user,
                    Mutation::ProviderStatus(StatusReport::Unmanaged(report)),
                );
            }
            ProviderEvent::Battery { user, percent } => {
                self.commit(&user, Mutation::BatteryUpdate { percent });
            }
            ProviderEvent::Disconnected { user, permanent } => {
                if permanent {
                    info!("SessionCore: {} disconnected permanently", user);
                    self.commit(&user, Mutation::SessionLost);
                } else {
                    info!("SessionCore: {} disconnected, awaiting reconnect", user);
                }
            }
            ProviderEvent::SessionEnded { user, reason } => {
                info!("SessionCore: session for {} ended: {}", user, reason);
                if let Some(kind) = self.store.get(&user).and_then(|s| s.kind()) {
                    let provider = Arc::clone(&self.provider);
                    let target = user.clone();
                    tokio::spawn(async move {
                        let result = match kind {
                            StreamKind::Managed => provider.stop_managed(&target).await,
                            StreamKind::Unmanaged => provider.stop(&target).await,
                        };
                        if let Err(e) = result {
                            warn!("SessionCore: stop on session end failed for {}: {}", target, e);
                        }
                    });
                }
                self.commit(&user, Mutation::SessionLost);
            }
        }
    }

    // ── actions ───────────────────────────────────────────────────────────────

    fn handle_action(
        &mut self,
        user: UserId,
        action: Action,
        reply: oneshot::Sender<ActionResult>,
    ) {
        if !self.store.is_connected(&user) {
            let _ = reply.send(Err(ControlError::Unauthorized));
            return;
        }

        match action {
            Action::Start(req) => {
                let uses_managed = self.saved_config(&user).merged(&req).uses_managed_path();
                if uses_managed {
                    self.start_managed(user, req, reply);
                } else {
                    self.start_unmanaged(user, req, reply);
                }
            }
            Action::StartManaged(req) => self.start_managed(user, req, reply),
            Action::StartRestream(urls) => {
                let urls: Vec<String> = urls
                    .into_iter()
                    .map(|u| u.trim().to_string())
                    .filter(|u| !u.is_empty())
                    .collect();
                if urls.is_empty() {
                    let _ = reply.send(Err(ControlError::BadRequest(
                        "Provide restreamUrls: string[]".to_string(),
                    )));
                    return;
                }
                self.spawn_managed_start(user, numbered_destinations(&urls), reply);
            }
            Action::StartUnmanaged(req) => self.start_unmanaged(user, req, reply),
            Action::Stop(kind) => self.spawn_stop(user, kind, reply),
            Action::StopActive => match self.store.get(&user).and_then(|s| s.kind()) {
                Some(kind) => self.spawn_stop(user, kind, reply),
                None => {
                    let _ = reply.send(Ok(ActionReply::done_with("No active stream to stop")));
                }
            },
            Action::Check => self.spawn_check(user, Some(reply)),
        }
    }

    fn saved_config(&self, user: &UserId) -> stream_proto::protocol::SavedConfig {
        self.store
            .get(user)
            .map(|s| s.saved_config.clone())
            .unwrap_or_default()
    }

    fn start_managed(
        &mut self,
        user: UserId,
        req: StartRequest,
        reply: oneshot::Sender<ActionResult>,
    ) {
        let config = self.saved_config(&user).merged(&req);
        let destinations: Vec<RestreamDestination> =
            restream_destination(&config).into_iter().collect();
        self.commit(&user, Mutation::ConfigSaved(config));
        self.spawn_managed_start(user, destinations, reply);
    }

    fn spawn_managed_start(
        &self,
        user: UserId,
        destinations: Vec<RestreamDestination>,
        reply: oneshot::Sender<ActionResult>,
    ) {
        self.spawn_call(user, Some(reply), move |provider, user| async move {
            let options = ManagedStreamOptions::with_destinations(destinations.clone());
            match provider.start_managed(&user, options).await {
                Ok(()) => Completion::Started(StreamRequest::Managed {
                    restream_destinations: destinations,
                }),
                Err(e) => Completion::StartFailed(e.to_string()),
            }
        });
    }

    fn start_unmanaged(
        &mut self,
        user: UserId,
        req: StartRequest,
        reply: oneshot::Sender<ActionResult>,
    ) {
        let config = self.saved_config(&user).merged(&req);
        let rtmp_url = req
            .rtmp_url
            .as_deref()
            .map(str::trim)
            .filter(|u| !u.is_empty())
            .map(str::to_string)
            .or_else(|| resolve_rtmp_url(&config));
        let Some(rtmp_url) = rtmp_url else {
            let _ = reply.send(Err(ControlError::BadRequest("Missing rtmpUrl".to_string())));
            return;
        };

        self.commit(&user, Mutation::ConfigSaved(config));
        self.spawn_call(user, Some(reply), move |provider, user| async move {
            match provider.start(&user, &rtmp_url).await {
                Ok(()) => Completion::Started(StreamRequest::Unmanaged { rtmp_url }),
                Err(e) => Completion::StartFailed(e.to_string()),
            }
        });
    }

    /// Stop only if the provider reports a stream of that kind; the session is
    /// reset to idle either way.
    fn spawn_stop(&self, user: UserId, kind: StreamKind, reply: oneshot::Sender<ActionResult>) {
        self.spawn_call(user, Some(reply), move |provider, user| async move {
            let check = match provider.check_existing(&user).await {
                Ok(check) => check,
                Err(e) => {
                    return Completion::Stopped {
                        stopped: false,
                        error: Some(e.to_string()),
                    }
                }
            };
            let running = check.active().map_or(false, |s| s.kind == kind);
            if !running {
                return Completion::Stopped {
                    stopped: false,
                    error: None,
                };
            }
            let result = match kind {
                StreamKind::Managed => provider.stop_managed(&user).await,
                StreamKind::Unmanaged => provider.stop(&user).await,
            };
            Completion::Stopped {
                stopped: result.is_ok(),
                error: result.err().map(|e| e.to_string()),
            }
        });
    }

    fn spawn_check(&self, user: UserId, reply: Option<oneshot::Sender<ActionResult>>) {
        self.spawn_call(user, reply, |provider, user| async move {
            Completion::Checked(
                provider
                    .check_existing(&user)
                    .await
                    .map_err(|e| e.to_string()),
            )
        });
    }

    // ── completions ───────────────────────────────────────────────────────────

    fn handle_completion(
        &mut self,
        user: UserId,
        completion: Completion,
        reply: Option<oneshot::Sender<ActionResult>>,
    ) {
        let result = match completion {
            Completion::Started(request) => {
                info!("SessionCore: provider accepted start for {}", user);
                self.commit(&user, Mutation::StreamRequested(request));
                Ok(ActionReply::done())
            }
            Completion::StartFailed(message) => {
                error!("SessionCore: start failed for {}: {}", user, message);
                self.commit(
                    &user,
                    Mutation::ProviderFailed {
                        message: message.clone(),
                    },
                );
                Err(ControlError::ProviderFailure(message))
            }
            Completion::Stopped { stopped, error } => {
                self.commit(&user, Mutation::ManualReset);
                match error {
                    Some(message) => {
                        warn!("SessionCore: stop failed for {}: {}", user, message);
                        Err(ControlError::ProviderFailure(message))
                    }
                    None if stopped => Ok(ActionReply::done()),
                    None => Ok(ActionReply::done_with("No stream to stop")),
                }
            }
            Completion::Checked(Ok(check)) => {
                if let Some(existing) = check.active() {
                    info!(
                        "SessionCore: {} has a running {} stream",
                        user,
                        existing.kind.as_str()
                    );
                    let report = StatusReport::from_existing(existing);
                    self.commit(&user, Mutation::ProviderStatus(report));
                }
                Ok(ActionReply::Checked(check))
            }
            Completion::Checked(Err(message)) => {
                warn!("SessionCore: existing-stream check failed for {}: {}", user, message);
                Err(ControlError::ProviderFailure(message))
            }
        };

        if let Some(reply) = reply {
            let _ = reply.send(result);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake::{spawn_core, Call, FakeProvider};
    use stream_proto::destination::Platform;
    use stream_proto::phase::PhaseTag;
    use stream_proto::state::ManagedReport;

    struct Harness {
        core: CoreHandle,
        provider: Arc<FakeProvider>,
        tx: mpsc::Sender<CoreEvent>,
    }

    impl Harness {
        async fn connected(user: &UserId) -> Self {
            let provider = Arc::new(FakeProvider::new());
            let (core, tx) = spawn_core(provider.clone(), &[user.as_str()]).await;
            Self { core, provider, tx }
        }

        /// Deliver a provider push and wait until the core has handled it.
        async fn push(&self, evt: ProviderEvent) {
            let user = evt.user().clone();
            self.tx.send(CoreEvent::Provider(evt)).await.unwrap();
            self.core.snapshot(user).await.unwrap();
        }

        async fn go_live(&self, user: &UserId) {
            self.push(ProviderEvent::ManagedStatus {
                user: user.clone(),
                report: ManagedReport {
                    status: "active".into(),
                    preview_url: Some("https://preview/live".into()),
                    ..ManagedReport::default()
                },
            })
            .await;
        }
    }

    fn here() -> StartRequest {
        StartRequest {
            platform: Some(Platform::Here),
            ..StartRequest::default()
        }
    }

    #[tokio::test]
    async fn managed_start_is_reflected_as_connecting() {
        let user = UserId::from("u");
        let h = Harness::connected(&user).await;
        let mut sub = h.core.subscribe(user.clone()).await.unwrap();
        assert!(sub.initial.has_active_session);

        let reply = h
            .core
            .action(user.clone(), Action::StartManaged(here()))
            .await;
        assert_eq!(reply, Ok(ActionReply::done()));

        let snap = sub.rx.try_recv().unwrap();
        assert_eq!(snap.stream_type, Some(StreamKind::Managed));
        assert_eq!(snap.phase, PhaseTag::Connecting);
        assert!(h.provider.calls().contains(&Call::StartManaged(
            ManagedStreamOptions::with_destinations(Vec::new())
        )));
    }

    #[tokio::test]
    async fn managed_start_relays_to_the_saved_platform() {
        let user = UserId::from("u");
        let h = Harness::connected(&user).await;
        let req = StartRequest {
            platform: Some(Platform::Youtube),
            stream_key: Some("yt-key".into()),
            use_managed_relay: Some(true),
            ..StartRequest::default()
        };
        h.core
            .action(user.clone(), Action::StartManaged(req))
            .await
            .unwrap();

        let snap = h.core.snapshot(user.clone()).await.unwrap();
        assert_eq!(snap.saved_config.platform, Platform::Youtube);
        assert_eq!(snap.restream_destinations.len(), 1);
        assert_eq!(
            snap.restream_destinations[0].url,
            "rtmps://a.rtmps.youtube.com/live2/yt-key"
        );
        assert_eq!(snap.restream_destinations[0].name, "youtube");
    }

    #[tokio::test]
    async fn unmanaged_start_without_url_makes_no_provider_call() {
        let user = UserId::from("u");
        let h = Harness::connected(&user).await;
        let mut sub = h.core.subscribe(user.clone()).await.unwrap();
        let req = StartRequest {
            platform: Some(Platform::Other),
            ..StartRequest::default()
        };

        let reply = h.core.action(user.clone(), Action::StartUnmanaged(req)).await;
        assert_eq!(
            reply,
            Err(ControlError::BadRequest("Missing rtmpUrl".to_string()))
        );
        assert!(sub.rx.try_recv().is_err());
        assert!(!h
            .provider
            .calls()
            .iter()
            .any(|c| matches!(c, Call::Start(_) | Call::StartManaged(_))));
        let snap = h.core.snapshot(user).await.unwrap();
        assert_eq!(snap.stream_type, None);
    }

    #[tokio::test]
    async fn unmanaged_start_resolves_platform_url() {
        let user = UserId::from("u");
        let h = Harness::connected(&user).await;
        let req = StartRequest {
            platform: Some(Platform::Twitch),
            stream_key: Some("tw".into()),
            ..StartRequest::default()
        };
        h.core
            .action(user.clone(), Action::Start(req))
            .await
            .unwrap();
        assert!(h
            .provider
            .calls()
            .contains(&Call::Start("rtmps://live.twitch.tv/app/tw".into())));
        let snap = h.core.snapshot(user).await.unwrap();
        assert_eq!(snap.stream_type, Some(StreamKind::Unmanaged));
        assert_eq!(
            snap.direct_rtmp_url.as_deref(),
            Some("rtmps://live.twitch.tv/app/tw")
        );
    }

    #[tokio::test]
    async fn start_failure_surfaces_as_error_phase() {
        let user = UserId::from("u");
        let h = Harness::connected(&user).await;
        h.provider.fail_start("camera busy");

        let reply = h.core.action(user.clone(), Action::StartManaged(here())).await;
        assert_eq!(
            reply,
            Err(ControlError::ProviderFailure("camera busy".to_string()))
        );
        let snap = h.core.snapshot(user).await.unwrap();
        assert_eq!(snap.phase, PhaseTag::Error);
        assert_eq!(snap.error.as_deref(), Some("camera busy"));
    }

    #[tokio::test]
    async fn stop_resets_to_idle_even_when_provider_fails() {
        let user = UserId::from("u");
        let h = Harness::connected(&user).await;
        h.go_live(&user).await;
        h.provider.set_existing(StreamKind::Managed, Some("active"));
        h.provider.fail_stop("device unreachable");

        let reply = h
            .core
            .action(user.clone(), Action::Stop(StreamKind::Managed))
            .await;
        assert_eq!(
            reply,
            Err(ControlError::ProviderFailure("device unreachable".to_string()))
        );
        let snap = h.core.snapshot(user).await.unwrap();
        assert_eq!(snap.phase, PhaseTag::Idle);
        assert_eq!(snap.stream_type, None);
        assert_eq!(snap.preview_url, None);
    }

    #[tokio::test]
    async fn stop_skips_provider_when_kind_does_not_match() {
        let user = UserId::from("u");
        let h = Harness::connected(&user).await;
        h.go_live(&user).await;
        h.provider.set_existing(StreamKind::Managed, None);

        let reply = h
            .core
            .action(user.clone(), Action::Stop(StreamKind::Unmanaged))
            .await;
        assert_eq!(reply, Ok(ActionReply::done_with("No stream to stop")));
        assert!(!h.provider.calls().contains(&Call::Stop));
        assert_eq!(
            h.core.snapshot(user).await.unwrap().phase,
            PhaseTag::Idle
        );
    }

    #[tokio::test]
    async fn check_folds_running_stream_into_state() {
        let user = UserId::from("u");
        let h = Harness::connected(&user).await;
        h.provider.set_existing(StreamKind::Unmanaged, Some("streaming"));

        let reply = h.core.action(user.clone(), Action::Check).await.unwrap();
        match reply {
            ActionReply::Checked(check) => assert!(check.has_active_stream),
            other => panic!("unexpected reply {:?}", other),
        }
        let snap = h.core.snapshot(user).await.unwrap();
        assert_eq!(snap.stream_type, Some(StreamKind::Unmanaged));
        assert_eq!(snap.phase, PhaseTag::Active);
        assert_eq!(snap.direct_rtmp_url.as_deref(), Some("rtmp://ingest/app/secret"));
    }

    #[tokio::test]
    async fn permanent_disconnect_reaches_every_observer() {
        let user = UserId::from("u");
        let h = Harness::connected(&user).await;
        h.go_live(&user).await;
        let mut tab1 = h.core.subscribe(user.clone()).await.unwrap();
        let mut tab2 = h.core.subscribe(user.clone()).await.unwrap();
        assert!(tab1.initial.same_content(&tab2.initial));

        h.push(ProviderEvent::Disconnected {
            user: user.clone(),
            permanent: false,
        })
        .await;
        assert!(tab1.rx.try_recv().is_err());

        h.push(ProviderEvent::Disconnected {
            user: user.clone(),
            permanent: true,
        })
        .await;
        for tab in [&mut tab1, &mut tab2] {
            let snap = tab.rx.try_recv().unwrap();
            assert!(!snap.has_active_session);
            assert_eq!(snap.phase, PhaseTag::Idle);
        }
    }

    #[tokio::test]
    async fn actions_require_a_bound_session() {
        let user = UserId::from("u");
        let h = Harness::connected(&user).await;
        let stranger = UserId::from("stranger");
        assert_eq!(
            h.core.action(stranger, Action::Check).await,
            Err(ControlError::Unauthorized)
        );
    }

    #[tokio::test]
    async fn session_end_stops_the_running_stream() {
        let user = UserId::from("u");
        let h = Harness::connected(&user).await;
        h.go_live(&user).await;
        h.push(ProviderEvent::SessionEnded {
            user: user.clone(),
            reason: "app stopped".into(),
        })
        .await;

        assert!(
            h.provider
                .wait_for_call(|calls| calls.contains(&Call::StopManaged))
                .await
        );
        assert!(!h.core.snapshot(user).await.unwrap().has_active_session);
    }

    #[tokio::test]
    async fn stop_active_without_stream_replies_with_message() {
        let user = UserId::from("u");
        let h = Harness::connected(&user).await;
        assert_eq!(
            h.core.action(user, Action::StopActive).await,
            Ok(ActionReply::done_with("No active stream to stop"))
        );
    }
}
