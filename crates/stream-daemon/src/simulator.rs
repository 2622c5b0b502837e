//! In-process stand-in for the device provider.
//!
//! Configured users connect at boot.  Starts succeed after a short delay and
//! then walk through a believable status sequence; battery drains slowly.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use stream_proto::config::ProviderConfig;
use stream_proto::protocol::{ExistingStream, ExistingStreamCheck, StreamKind};
use stream_proto::state::{ManagedReport, UnmanagedReport, UserId};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info};

use crate::provider::{DeviceProvider, ManagedStreamOptions, ProviderError, ProviderEvent};

const MEDIA_BASE: &str = "https://media.streamd.test/live";

#[derive(Debug, Clone)]
struct SimStream {
    kind: StreamKind,
    status: String,
    stream_id: String,
    rtmp_url: Option<String>,
    /// Bumped on every start/stop so stale status sequences stop emitting.
    generation: u64,
}

#[derive(Default)]
struct SimState {
    users: HashMap<UserId, Option<SimStream>>,
    generation: u64,
}

pub struct SimulatedProvider {
    config: ProviderConfig,
    events: mpsc::Sender<ProviderEvent>,
    state: Arc<Mutex<SimState>>,
}

fn managed_report(stream_id: &str, status: &str) -> ManagedReport {
    let live = status == "active";
    ManagedReport {
        status: status.to_string(),
        stream_id: Some(stream_id.to_string()),
        hls_url: live.then(|| format!("{}/{}/index.m3u8", MEDIA_BASE, stream_id)),
        dash_url: live.then(|| format!("{}/{}/manifest.mpd", MEDIA_BASE, stream_id)),
        preview_url: live.then(|| format!("{}/{}/preview", MEDIA_BASE, stream_id)),
        thumbnail_url: live.then(|| format!("{}/{}/thumbnail.jpg", MEDIA_BASE, stream_id)),
        restream_destinations: None,
        error: None,
    }
}

impl SimulatedProvider {
    pub fn new(config: ProviderConfig, events: mpsc::Sender<ProviderEvent>) -> Self {
        let state = SimState {
            users: config
                .simulated_users
                .iter()
                .map(|u| (UserId::new(u.as_str()), None))
                .collect(),
            generation: 0,
        };
        Self {
            config,
            events,
            state: Arc::new(Mutex::new(state)),
        }
    }

    /// Connect the configured users and start the battery drain.
    pub fn spawn_background(&self) -> tokio::task::JoinHandle<()> {
        let events = self.events.clone();
        let users: Vec<UserId> = self
            .config
            .simulated_users
            .iter()
            .map(|u| UserId::new(u.as_str()))
            .collect();
        let drain_secs = self.config.battery_drain_secs;

        tokio::spawn(async move {
            for user in &users {
                info!("simulator: device session connected for {}", user);
                if events
                    .send(ProviderEvent::SessionStarted { user: user.clone() })
                    .await
                    .is_err()
                {
                    return;
                }
                let _ = events
                    .send(ProviderEvent::Battery {
                        user: user.clone(),
                        percent: Some(100),
                    })
                    .await;
            }
            if drain_secs == 0 {
                return;
            }

            let mut level: u8 = 100;
            let mut tick = tokio::time::interval(Duration::from_secs(drain_secs));
            tick.tick().await;
            loop {
                tick.tick().await;
                level = if level <= 5 { 100 } else { level - 1 };
                for user in &users {
                    if events
                        .send(ProviderEvent::Battery {
                            user: user.clone(),
                            percent: Some(level),
                        })
                        .await
                        .is_err()
                    {
                        return;
                    }
                }
            }
        })
    }

    fn delay(&self) -> Duration {
        Duration::from_millis(self.config.start_delay_ms)
    }

    /// Install a new stream for `user` and return its generation.
    async fn install(
        &self,
        user: &UserId,
        kind: StreamKind,
        rtmp_url: Option<String>,
    ) -> Result<(u64, String), ProviderError> {
        let mut state = self.state.lock().await;
        state.generation += 1;
        let generation = state.generation;
        let slot = state
            .users
            .get_mut(user)
            .ok_or_else(|| ProviderError::NoSession(user.clone()))?;
        let stream_id = format!("sim-{:08x}", rand::thread_rng().gen::<u32>());
        *slot = Some(SimStream {
            kind,
            status: "initializing".to_string(),
            stream_id: stream_id.clone(),
            rtmp_url,
            generation,
        });
        Ok((generation, stream_id))
    }

    /// Walk a stream through `statuses`, one step per delay, as long as it is
    /// still the current stream.
    fn spawn_sequence(
        &self,
        user: UserId,
        generation: u64,
        stream_id: String,
        kind: StreamKind,
        statuses: &'static [&'static str],
    ) {
        let state = Arc::clone(&self.state);
        let events = self.events.clone();
        let step = self.delay();
        tokio::spawn(async move {
            for status in statuses {
                tokio::time::sleep(step).await;
                {
                    let mut state = state.lock().await;
                    match state.users.get_mut(&user).and_then(Option::as_mut) {
                        Some(stream) if stream.generation == generation => {
                            stream.status = status.to_string();
                        }
                        _ => {
                            debug!("simulator: sequence {} for {} superseded", generation, user);
                            return;
                        }
                    }
                }
                let evt = match kind {
                    StreamKind::Managed => ProviderEvent::ManagedStatus {
                        user: user.clone(),
                        report: managed_report(&stream_id, status),
                    },
                    StreamKind::Unmanaged => ProviderEvent::UnmanagedStatus {
                        user: user.clone(),
                        report: UnmanagedReport {
                            status: status.to_string(),
                            stream_id: Some(stream_id.clone()),
                            direct_rtmp_url: None,
                            error: None,
                        },
                    },
                };
                if events.send(evt).await.is_err() {
                    return;
                }
            }
        });
    }

    async fn clear(&self, user: &UserId, kind: StreamKind) -> Result<(), ProviderError> {
        let mut state = self.state.lock().await;
        let slot = state
            .users
            .get_mut(user)
            .ok_or_else(|| ProviderError::NoSession(user.clone()))?;
        if slot.as_ref().map_or(false, |s| s.kind == kind) {
            *slot = None;
        }
        Ok(())
    }
}

#[async_trait]
impl DeviceProvider for SimulatedProvider {
    async fn start_managed(
        &self,
        user: &UserId,
        options: ManagedStreamOptions,
    ) -> Result<(), ProviderError> {
        tokio::time::sleep(self.delay()).await;
        if self.config.fail_start {
            return Err(ProviderError::Rejected(
                "camera is busy with another request".to_string(),
            ));
        }
        let (generation, stream_id) = self.install(user, StreamKind::Managed, None).await?;
        info!(
            "simulator: managed stream {} for {} ({}, {} relay targets)",
            stream_id,
            user,
            options.quality,
            options.restream_destinations.len()
        );
        self.spawn_sequence(
            user.clone(),
            generation,
            stream_id,
            StreamKind::Managed,
            &["initializing", "connecting", "active"],
        );
        Ok(())
    }

    async fn stop_managed(&self, user: &UserId) -> Result<(), ProviderError> {
        self.clear(user, StreamKind::Managed).await
    }

    async fn start(&self, user: &UserId, rtmp_url: &str) -> Result<(), ProviderError> {
        tokio::time::sleep(self.delay()).await;
        if self.config.fail_start {
            return Err(ProviderError::Rejected(
                "RTMP handshake failed".to_string(),
            ));
        }
        let (generation, stream_id) = self
            .install(user, StreamKind::Unmanaged, Some(rtmp_url.to_string()))
            .await?;
        info!("simulator: unmanaged stream {} for {}", stream_id, user);
        self.spawn_sequence(
            user.clone(),
            generation,
            stream_id,
            StreamKind::Unmanaged,
            &["connecting", "streaming"],
        );
        Ok(())
    }

    async fn stop(&self, user: &UserId) -> Result<(), ProviderError> {
        self.clear(user, StreamKind::Unmanaged).await
    }

    async fn check_existing(&self, user: &UserId) -> Result<ExistingStreamCheck, ProviderError> {
        let state = self.state.lock().await;
        let slot = state
            .users
            .get(user)
            .ok_or_else(|| ProviderError::NoSession(user.clone()))?;
        let Some(stream) = slot else {
            return Ok(ExistingStreamCheck::none());
        };
        let managed = stream.kind == StreamKind::Managed;
        let live = stream.status == "active";
        let url = |suffix: &str| {
            (managed && live).then(|| format!("{}/{}/{}", MEDIA_BASE, stream.stream_id, suffix))
        };
        Ok(ExistingStreamCheck {
            has_active_stream: true,
            stream_info: Some(ExistingStream {
                kind: stream.kind,
                status: Some(stream.status.clone()),
                stream_id: Some(stream.stream_id.clone()),
                hls_url: url("index.m3u8"),
                dash_url: url("manifest.mpd"),
                preview_url: url("preview"),
                webrtc_url: None,
                rtmp_url: stream.rtmp_url.clone(),
                requesting_app_id: None,
                active_viewers: Some(0),
            }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider(fail_start: bool) -> (SimulatedProvider, mpsc::Receiver<ProviderEvent>) {
        let (tx, rx) = mpsc::channel(32);
        let config = ProviderConfig {
            simulated_users: vec!["sim".into()],
            start_delay_ms: 10,
            fail_start,
            battery_drain_secs: 0,
        };
        (SimulatedProvider::new(config, tx), rx)
    }

    #[tokio::test]
    async fn managed_start_walks_to_active() {
        let (sim, mut rx) = provider(false);
        let user = UserId::from("sim");
        sim.start_managed(&user, ManagedStreamOptions::with_destinations(Vec::new()))
            .await
            .unwrap();

        let mut statuses = Vec::new();
        while statuses.last().map(String::as_str) != Some("active") {
            match rx.recv().await {
                Some(ProviderEvent::ManagedStatus { report, .. }) => {
                    if report.status == "active" {
                        assert!(report.preview_url.is_some());
                        assert!(report.hls_url.is_some());
                    }
                    statuses.push(report.status);
                }
                other => panic!("unexpected event {:?}", other),
            }
        }
        assert_eq!(statuses, vec!["initializing", "connecting", "active"]);

        let check = sim.check_existing(&user).await.unwrap();
        assert_eq!(check.active().unwrap().kind, StreamKind::Managed);
        sim.stop_managed(&user).await.unwrap();
        assert!(!sim.check_existing(&user).await.unwrap().has_active_stream);
    }

    #[tokio::test]
    async fn unknown_user_has_no_session() {
        let (sim, _rx) = provider(false);
        let err = sim.start(&UserId::from("nobody"), "rtmp://x/y").await;
        assert_eq!(err, Err(ProviderError::NoSession(UserId::from("nobody"))));
    }

    #[tokio::test]
    async fn fail_start_rejects() {
        let (sim, _rx) = provider(true);
        let err = sim.start(&UserId::from("sim"), "rtmp://x/y").await;
        assert!(matches!(err, Err(ProviderError::Rejected(_))));
        assert!(!sim
            .check_existing(&UserId::from("sim"))
            .await
            .unwrap()
            .has_active_stream);
    }

    #[tokio::test]
    async fn background_connects_configured_users() {
        let (sim, mut rx) = provider(false);
        sim.spawn_background();
        assert_eq!(
            rx.recv().await,
            Some(ProviderEvent::SessionStarted {
                user: UserId::from("sim")
            })
        );
        assert_eq!(
            rx.recv().await,
            Some(ProviderEvent::Battery {
                user: UserId::from("sim"),
                percent: Some(100)
            })
        );
    }
}
