//! Seam to the external device/session provider.
//!
//! Calls go out through [`DeviceProvider`]; pushes come back as
//! [`ProviderEvent`]s on the channel the provider was built with.

use async_trait::async_trait;
use stream_proto::protocol::{ExistingStreamCheck, RestreamDestination};
use stream_proto::state::{ManagedReport, UnmanagedReport, UserId};
use thiserror::Error;

/// Options for a managed (relayed) stream start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagedStreamOptions {
    pub quality: String,
    pub enable_webrtc: bool,
    pub restream_destinations: Vec<RestreamDestination>,
}

impl ManagedStreamOptions {
    pub fn with_destinations(restream_destinations: Vec<RestreamDestination>) -> Self {
        Self {
            quality: "720p".to_string(),
            enable_webrtc: true,
            restream_destinations,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProviderError {
    #[error("no device session for user {0}")]
    NoSession(UserId),
    #[error("{0}")]
    Rejected(String),
}

#[async_trait]
pub trait DeviceProvider: Send + Sync + 'static {
    async fn start_managed(
        &self,
        user: &UserId,
        options: ManagedStreamOptions,
    ) -> Result<(), ProviderError>;

    async fn stop_managed(&self, user: &UserId) -> Result<(), ProviderError>;

    /// Start an unmanaged stream pushing straight to `rtmp_url`.
    async fn start(&self, user: &UserId, rtmp_url: &str) -> Result<(), ProviderError>;

    async fn stop(&self, user: &UserId) -> Result<(), ProviderError>;

    async fn check_existing(&self, user: &UserId) -> Result<ExistingStreamCheck, ProviderError>;
}

/// Asynchronous notifications from the provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderEvent {
    SessionStarted {
        user: UserId,
    },
    ManagedStatus {
        user: UserId,
        report: ManagedReport,
    },
    UnmanagedStatus {
        user: UserId,
        report: UnmanagedReport,
    },
    Battery {
        user: UserId,
        percent: Option<u8>,
    },
    /// Transport drop.  Only a permanent one ends the session.
    Disconnected {
        user: UserId,
        permanent: bool,
    },
    /// The app was stopped on the device.
    SessionEnded {
        user: UserId,
        reason: String,
    },
}

impl ProviderEvent {
    pub fn user(&self) -> &UserId {
        match self {
            ProviderEvent::SessionStarted { user }
            | ProviderEvent::ManagedStatus { user, .. }
            | ProviderEvent::UnmanagedStatus { user, .. }
            | ProviderEvent::Battery { user, .. }
            | ProviderEvent::Disconnected { user, .. }
            | ProviderEvent::SessionEnded { user, .. } => user,
        }
    }
}
