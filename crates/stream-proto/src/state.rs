//! Per-user session state store.
//!
//! One [`StreamSession`] per user, mutated only through [`SessionStore::apply`].
//! The store is owned by a single task (the daemon core); every call is a
//! complete transition, so a snapshot never observes a half-applied mutation.
//!
//! `apply` returns the snapshot to broadcast when the mutation changed
//! anything, `None` for a no-op, and an error when the mutation cannot apply.
//! Callers broadcast exactly what `apply` hands back.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::phase::{classify, CanonicalPhase, PhaseTag};
use crate::protocol::{
    ExistingStream, RestreamDestination, SavedConfig, StatusSnapshot, StreamKind,
};

/// Authenticated user identity; one session per user.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for UserId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

// ── Session model ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ManagedStream {
    pub stream_id: Option<String>,
    pub hls_url: Option<String>,
    pub dash_url: Option<String>,
    pub preview_url: Option<String>,
    pub thumbnail_url: Option<String>,
    pub restream_destinations: Vec<RestreamDestination>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UnmanagedStream {
    pub stream_id: Option<String>,
    pub direct_rtmp_url: Option<String>,
}

/// Kind-specific stream fields.  Only the active kind's fields exist.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum StreamDetails {
    #[default]
    None,
    Managed(ManagedStream),
    Unmanaged(UnmanagedStream),
}

impl StreamDetails {
    pub fn kind(&self) -> Option<StreamKind> {
        match self {
            StreamDetails::None => None,
            StreamDetails::Managed(_) => Some(StreamKind::Managed),
            StreamDetails::Unmanaged(_) => Some(StreamKind::Unmanaged),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamSession {
    pub details: StreamDetails,
    pub raw_status: String,
    pub phase: CanonicalPhase,
    pub last_error: Option<String>,
    pub battery_percent: Option<u8>,
    pub saved_config: SavedConfig,
    /// A device session is currently bound to this user.
    pub connected: bool,
    pub rev: u64,
}

impl Default for StreamSession {
    fn default() -> Self {
        Self {
            details: StreamDetails::None,
            raw_status: String::new(),
            phase: CanonicalPhase::Unknown(String::new()),
            last_error: None,
            battery_percent: None,
            saved_config: SavedConfig::default(),
            connected: false,
            rev: 0,
        }
    }
}

impl StreamSession {
    pub fn kind(&self) -> Option<StreamKind> {
        self.details.kind()
    }

    pub fn snapshot(&self) -> StatusSnapshot {
        let mut snap = StatusSnapshot {
            stream_type: self.kind(),
            stream_status: self.connected.then(|| self.raw_status.clone()),
            phase: if self.connected {
                self.phase.tag()
            } else {
                PhaseTag::Idle
            },
            error: self.last_error.clone(),
            glasses_battery_percent: self.battery_percent,
            has_active_session: self.connected,
            saved_config: self.saved_config.clone(),
            rev: self.rev,
            ..StatusSnapshot::no_session()
        };
        match &self.details {
            StreamDetails::None => {}
            StreamDetails::Managed(m) => {
                snap.stream_id = m.stream_id.clone();
                snap.hls_url = m.hls_url.clone();
                snap.dash_url = m.dash_url.clone();
                snap.preview_url = m.preview_url.clone();
                snap.thumbnail_url = m.thumbnail_url.clone();
                snap.restream_destinations = m.restream_destinations.clone();
            }
            StreamDetails::Unmanaged(u) => {
                snap.stream_id = u.stream_id.clone();
                snap.direct_rtmp_url = u.direct_rtmp_url.clone();
            }
        }
        snap
    }

    fn set_status(&mut self, raw: &str) {
        self.raw_status = raw.to_string();
        self.phase = classify(raw);
    }

    /// Synthetic phase set by local transition logic, with a raw status
    /// that classifies to the same phase.
    fn set_synthetic(&mut self, raw: &str, phase: CanonicalPhase) {
        self.raw_status = raw.to_string();
        self.phase = phase;
    }

    fn clear_stream(&mut self) {
        self.details = StreamDetails::None;
        self.last_error = None;
    }

    /// Equality ignoring the revision counter.
    fn same_state(&self, other: &StreamSession) -> bool {
        self.details == other.details
            && self.raw_status == other.raw_status
            && self.phase == other.phase
            && self.last_error == other.last_error
            && self.battery_percent == other.battery_percent
            && self.saved_config == other.saved_config
            && self.connected == other.connected
    }
}

// ── Mutations ────────────────────────────────────────────────────────────────

/// Managed-stream status as pushed by the provider.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ManagedReport {
    pub status: String,
    pub stream_id: Option<String>,
    pub hls_url: Option<String>,
    pub dash_url: Option<String>,
    pub preview_url: Option<String>,
    pub thumbnail_url: Option<String>,
    /// `None` keeps the destinations configured when the stream was started.
    pub restream_destinations: Option<Vec<RestreamDestination>>,
    pub error: Option<String>,
}

/// Unmanaged (direct RTMP) status as pushed by the provider.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UnmanagedReport {
    pub status: String,
    pub stream_id: Option<String>,
    /// `None` keeps the URL the stream was started with.
    pub direct_rtmp_url: Option<String>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusReport {
    Managed(ManagedReport),
    Unmanaged(UnmanagedReport),
}

impl StatusReport {
    /// Fold a "check existing" result into a status report.  A running stream
    /// without a status reads as active.
    pub fn from_existing(existing: &ExistingStream) -> Self {
        let status = existing
            .status
            .clone()
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| "active".to_string());
        match existing.kind {
            StreamKind::Managed => StatusReport::Managed(ManagedReport {
                status,
                stream_id: existing.stream_id.clone(),
                hls_url: existing.hls_url.clone(),
                dash_url: existing.dash_url.clone(),
                preview_url: existing
                    .preview_url
                    .clone()
                    .or_else(|| existing.webrtc_url.clone()),
                thumbnail_url: None,
                restream_destinations: None,
                error: None,
            }),
            StreamKind::Unmanaged => StatusReport::Unmanaged(UnmanagedReport {
                status,
                stream_id: existing.stream_id.clone(),
                direct_rtmp_url: existing.rtmp_url.clone(),
                error: None,
            }),
        }
    }
}

/// What the provider accepted to start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamRequest {
    Managed {
        restream_destinations: Vec<RestreamDestination>,
    },
    Unmanaged {
        rtmp_url: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mutation {
    /// A device session bound to the user (created on first connect).
    SessionStarted,
    ProviderStatus(StatusReport),
    /// The provider accepted a start call.
    StreamRequested(StreamRequest),
    /// A provider start call failed.
    ProviderFailed { message: String },
    BatteryUpdate { percent: Option<u8> },
    /// Permanent disconnect.  Clears stream state, keeps the saved config.
    SessionLost,
    ConfigSaved(SavedConfig),
    /// Explicit stop confirmation: back to idle regardless of the provider.
    ManualReset,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("no session for user {0}")]
    UnknownUser(UserId),
    #[error("device session for user {0} is not connected")]
    NotConnected(UserId),
}

// ── Store ────────────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct SessionStore {
    sessions: HashMap<UserId, StreamSession>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, user: &UserId) -> Option<&StreamSession> {
        self.sessions.get(user)
    }

    pub fn is_connected(&self, user: &UserId) -> bool {
        self.sessions.get(user).map_or(false, |s| s.connected)
    }

    /// Current snapshot; users never seen get the no-session snapshot.
    pub fn snapshot(&self, user: &UserId) -> StatusSnapshot {
        self.sessions
            .get(user)
            .map(StreamSession::snapshot)
            .unwrap_or_else(StatusSnapshot::no_session)
    }

    pub fn users(&self) -> impl Iterator<Item = &UserId> {
        self.sessions.keys()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Apply one mutation.  Returns the snapshot to broadcast, or `None` if
    /// nothing changed.
    pub fn apply(
        &mut self,
        user: &UserId,
        mutation: Mutation,
    ) -> Result<Option<StatusSnapshot>, StoreError> {
        if mutation == Mutation::SessionStarted {
            self.sessions.entry(user.clone()).or_default();
        }
        let session = self
            .sessions
            .get_mut(user)
            .ok_or_else(|| StoreError::UnknownUser(user.clone()))?;

        let requires_connection = matches!(
            mutation,
            Mutation::ProviderStatus(_)
                | Mutation::StreamRequested(_)
                | Mutation::ProviderFailed { .. }
                | Mutation::ManualReset
        );
        if requires_connection && !session.connected {
            return Err(StoreError::NotConnected(user.clone()));
        }

        let before = session.clone();
        transition(session, mutation);

        if session.same_state(&before) {
            return Ok(None);
        }
        session.rev += 1;
        Ok(Some(session.snapshot()))
    }
}

fn transition(session: &mut StreamSession, mutation: Mutation) {
    match mutation {
        Mutation::SessionStarted => {
            session.connected = true;
        }
        Mutation::ProviderStatus(StatusReport::Managed(report)) => {
            let restream = report.restream_destinations.unwrap_or_else(|| {
                match &session.details {
                    StreamDetails::Managed(m) => m.restream_destinations.clone(),
                    _ => Vec::new(),
                }
            });
            session.details = StreamDetails::Managed(ManagedStream {
                stream_id: report.stream_id,
                hls_url: report.hls_url,
                dash_url: report.dash_url,
                preview_url: report.preview_url,
                thumbnail_url: report.thumbnail_url,
                restream_destinations: restream,
            });
            session.set_status(&report.status);
            session.last_error = report.error;
        }
        Mutation::ProviderStatus(StatusReport::Unmanaged(report)) => {
            let direct = report.direct_rtmp_url.or_else(|| match &session.details {
                StreamDetails::Unmanaged(u) => u.direct_rtmp_url.clone(),
                _ => None,
            });
            session.details = StreamDetails::Unmanaged(UnmanagedStream {
                stream_id: report.stream_id,
                direct_rtmp_url: direct,
            });
            session.set_status(&report.status);
            session.last_error = report.error;
        }
        Mutation::StreamRequested(StreamRequest::Managed {
            restream_destinations,
        }) => match &mut session.details {
            StreamDetails::Managed(m) => {
                m.restream_destinations = restream_destinations;
            }
            _ => {
                session.details = StreamDetails::Managed(ManagedStream {
                    restream_destinations,
                    ..ManagedStream::default()
                });
                session.set_status("starting");
                session.last_error = None;
            }
        },
        Mutation::StreamRequested(StreamRequest::Unmanaged { rtmp_url }) => {
            match &mut session.details {
                StreamDetails::Unmanaged(u) => {
                    u.direct_rtmp_url = Some(rtmp_url);
                }
                _ => {
                    session.details = StreamDetails::Unmanaged(UnmanagedStream {
                        stream_id: None,
                        direct_rtmp_url: Some(rtmp_url),
                    });
                    session.set_status("starting");
                    session.last_error = None;
                }
            }
        }
        Mutation::ProviderFailed { message } => {
            session.details = StreamDetails::None;
            session.set_synthetic("error", CanonicalPhase::Error);
            session.last_error = Some(message);
        }
        Mutation::BatteryUpdate { percent } => {
            session.battery_percent = percent.map(|p| p.min(100));
        }
        Mutation::SessionLost => {
            session.clear_stream();
            session.set_synthetic("", CanonicalPhase::Idle);
            session.connected = false;
        }
        Mutation::ConfigSaved(config) => {
            session.saved_config = config;
        }
        Mutation::ManualReset => {
            session.clear_stream();
            session.set_synthetic("idle", CanonicalPhase::Idle);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::destination::Platform;

    fn connected_store(user: &UserId) -> SessionStore {
        let mut store = SessionStore::new();
        store.apply(user, Mutation::SessionStarted).unwrap();
        store
    }

    fn managed_active() -> Mutation {
        Mutation::ProviderStatus(StatusReport::Managed(ManagedReport {
            status: "active".into(),
            stream_id: Some("m-1".into()),
            hls_url: Some("https://cdn/hls.m3u8".into()),
            dash_url: Some("https://cdn/dash.mpd".into()),
            preview_url: Some("https://cdn/preview".into()),
            ..ManagedReport::default()
        }))
    }

    #[test]
    fn unknown_user_mutation_fails_without_snapshot() {
        let mut store = SessionStore::new();
        let user = UserId::from("ghost");
        assert_eq!(
            store.apply(&user, Mutation::BatteryUpdate { percent: Some(50) }),
            Err(StoreError::UnknownUser(user.clone()))
        );
        assert!(!store.snapshot(&user).has_active_session);
    }

    #[test]
    fn provider_status_classifies_and_bumps_revision() {
        let user = UserId::from("u");
        let mut store = connected_store(&user);
        let rev0 = store.snapshot(&user).rev;
        let snap = store.apply(&user, managed_active()).unwrap().unwrap();
        assert_eq!(snap.stream_type, Some(StreamKind::Managed));
        assert_eq!(snap.phase, PhaseTag::Active);
        assert_eq!(snap.preview_url.as_deref(), Some("https://cdn/preview"));
        assert_eq!(snap.rev, rev0 + 1);
    }

    #[test]
    fn identical_mutation_is_a_no_op() {
        let user = UserId::from("u");
        let mut store = connected_store(&user);
        assert!(store.apply(&user, managed_active()).unwrap().is_some());
        assert_eq!(store.apply(&user, managed_active()).unwrap(), None);
        assert_eq!(
            store.apply(&user, Mutation::SessionStarted).unwrap(),
            None,
            "reconnecting an already-bound session changes nothing"
        );
    }

    #[test]
    fn switching_kind_drops_the_other_kinds_fields() {
        let user = UserId::from("u");
        let mut store = connected_store(&user);
        store.apply(&user, managed_active()).unwrap();

        let snap = store
            .apply(
                &user,
                Mutation::ProviderStatus(StatusReport::Unmanaged(UnmanagedReport {
                    status: "streaming".into(),
                    stream_id: Some("u-1".into()),
                    direct_rtmp_url: Some("rtmp://x/app/key".into()),
                    error: None,
                })),
            )
            .unwrap()
            .unwrap();
        assert_eq!(snap.stream_type, Some(StreamKind::Unmanaged));
        assert_eq!(snap.hls_url, None);
        assert_eq!(snap.dash_url, None);
        assert_eq!(snap.preview_url, None);
        assert!(snap.restream_destinations.is_empty());
        assert_eq!(snap.direct_rtmp_url.as_deref(), Some("rtmp://x/app/key"));

        let snap = store.apply(&user, managed_active()).unwrap().unwrap();
        assert_eq!(snap.direct_rtmp_url, None);
        assert_eq!(snap.stream_id.as_deref(), Some("m-1"));
    }

    #[test]
    fn restream_destinations_survive_managed_status_pushes() {
        let user = UserId::from("u");
        let mut store = connected_store(&user);
        let dest = RestreamDestination {
            url: "rtmps://live.twitch.tv/app/k".into(),
            name: "twitch".into(),
        };
        let snap = store
            .apply(
                &user,
                Mutation::StreamRequested(StreamRequest::Managed {
                    restream_destinations: vec![dest.clone()],
                }),
            )
            .unwrap()
            .unwrap();
        assert_eq!(snap.stream_status.as_deref(), Some("starting"));
        assert_eq!(snap.phase, PhaseTag::Connecting);

        let snap = store.apply(&user, managed_active()).unwrap().unwrap();
        assert_eq!(snap.restream_destinations, vec![dest]);
    }

    #[test]
    fn start_acceptance_does_not_regress_a_live_stream() {
        let user = UserId::from("u");
        let mut store = connected_store(&user);
        store.apply(&user, managed_active()).unwrap();
        let snap = store
            .apply(
                &user,
                Mutation::StreamRequested(StreamRequest::Managed {
                    restream_destinations: Vec::new(),
                }),
            )
            .unwrap();
        assert_eq!(snap, None);
        assert_eq!(store.get(&user).unwrap().phase, CanonicalPhase::Active);
    }

    #[test]
    fn error_is_cleared_by_a_non_error_status() {
        let user = UserId::from("u");
        let mut store = connected_store(&user);
        let snap = store
            .apply(
                &user,
                Mutation::ProviderStatus(StatusReport::Unmanaged(UnmanagedReport {
                    status: "error".into(),
                    error: Some("RTMP handshake failed".into()),
                    ..UnmanagedReport::default()
                })),
            )
            .unwrap()
            .unwrap();
        assert_eq!(snap.error.as_deref(), Some("RTMP handshake failed"));
        assert_eq!(snap.phase, PhaseTag::Error);

        let snap = store
            .apply(
                &user,
                Mutation::ProviderStatus(StatusReport::Unmanaged(UnmanagedReport {
                    status: "connecting".into(),
                    ..UnmanagedReport::default()
                })),
            )
            .unwrap()
            .unwrap();
        assert_eq!(snap.error, None);
    }

    #[test]
    fn session_lost_keeps_saved_config() {
        let user = UserId::from("u");
        let mut store = connected_store(&user);
        let config = SavedConfig {
            platform: Platform::Youtube,
            stream_key: "key".into(),
            custom_rtmp_url: String::new(),
            use_managed_relay: true,
        };
        store
            .apply(&user, Mutation::ConfigSaved(config.clone()))
            .unwrap();
        store.apply(&user, managed_active()).unwrap();
        store
            .apply(&user, Mutation::BatteryUpdate { percent: Some(64) })
            .unwrap();

        let snap = store.apply(&user, Mutation::SessionLost).unwrap().unwrap();
        assert!(!snap.has_active_session);
        assert_eq!(snap.stream_type, None);
        assert_eq!(snap.stream_status, None);
        assert_eq!(snap.phase, PhaseTag::Idle);
        assert_eq!(snap.preview_url, None);
        assert_eq!(snap.saved_config, config);
        assert_eq!(snap.glasses_battery_percent, Some(64));

        assert_eq!(
            store.apply(&user, managed_active()),
            Err(StoreError::NotConnected(user.clone()))
        );
    }

    #[test]
    fn synthetic_phases_agree_with_raw_status() {
        let user = UserId::from("u");
        let mut store = connected_store(&user);
        store.apply(&user, managed_active()).unwrap();

        let snap = store.apply(&user, Mutation::ManualReset).unwrap().unwrap();
        assert_eq!(snap.phase, PhaseTag::Idle);
        assert_eq!(snap.canonical_phase(), CanonicalPhase::Idle);

        let snap = store
            .apply(
                &user,
                Mutation::ProviderFailed {
                    message: "camera busy".into(),
                },
            )
            .unwrap()
            .unwrap();
        assert_eq!(snap.canonical_phase(), CanonicalPhase::Error);
        assert_eq!(snap.error.as_deref(), Some("camera busy"));
        assert_eq!(snap.stream_type, None);
    }

    #[test]
    fn battery_is_clamped() {
        let user = UserId::from("u");
        let mut store = connected_store(&user);
        let snap = store
            .apply(&user, Mutation::BatteryUpdate { percent: Some(140) })
            .unwrap()
            .unwrap();
        assert_eq!(snap.glasses_battery_percent, Some(100));
    }

    #[test]
    fn existing_stream_defaults_to_active() {
        let existing = ExistingStream {
            kind: StreamKind::Managed,
            status: None,
            stream_id: Some("s".into()),
            hls_url: None,
            dash_url: None,
            preview_url: None,
            webrtc_url: Some("https://webrtc/s".into()),
            rtmp_url: None,
            requesting_app_id: None,
            active_viewers: None,
        };
        match StatusReport::from_existing(&existing) {
            StatusReport::Managed(r) => {
                assert_eq!(r.status, "active");
                assert_eq!(r.preview_url.as_deref(), Some("https://webrtc/s"));
            }
            other => panic!("unexpected report {:?}", other),
        }
    }
}
