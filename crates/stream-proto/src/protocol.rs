use serde::{Deserialize, Serialize};

use crate::destination::Platform;
use crate::phase::{classify, CanonicalPhase, PhaseTag};

/// Name of the SSE event carrying a [`StatusSnapshot`].
pub const STATUS_EVENT: &str = "status";

/// Which pipeline carries the stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamKind {
    /// Relayed through the platform's own media pipeline.
    Managed,
    /// Pushed by the device straight to an external RTMP endpoint.
    Unmanaged,
}

impl StreamKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StreamKind::Managed => "managed",
            StreamKind::Unmanaged => "unmanaged",
        }
    }
}

/// Secondary RTMP target a managed stream is relayed to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestreamDestination {
    pub url: String,
    pub name: String,
}

/// The user's last-chosen destination; survives start/stop cycles so the
/// panel can be pre-filled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SavedConfig {
    #[serde(default)]
    pub platform: Platform,
    #[serde(default)]
    pub stream_key: String,
    #[serde(default)]
    pub custom_rtmp_url: String,
    #[serde(default)]
    pub use_managed_relay: bool,
}

impl Default for SavedConfig {
    fn default() -> Self {
        Self {
            platform: Platform::Here,
            stream_key: String::new(),
            custom_rtmp_url: String::new(),
            use_managed_relay: false,
        }
    }
}

impl SavedConfig {
    /// Overlay the fields present in a start request.  Absent fields keep
    /// their saved value.
    pub fn merged(&self, req: &StartRequest) -> SavedConfig {
        let mut next = self.clone();
        if let Some(platform) = req.platform {
            next.platform = platform;
        }
        if let Some(key) = &req.stream_key {
            next.stream_key = key.clone();
        }
        if let Some(url) = &req.custom_rtmp_url {
            next.custom_rtmp_url = url.clone();
        }
        if let Some(relay) = req.use_managed_relay {
            next.use_managed_relay = relay;
        }
        next
    }

    /// "here" always streams through the managed pipeline.
    pub fn uses_managed_path(&self) -> bool {
        self.platform == Platform::Here || self.use_managed_relay
    }
}

/// Full status snapshot pushed to observers.  Flat on the wire; built from the
/// kind-discriminated session so fields of the inactive kind are always null.
///
/// Equality is content equality; observers use it to skip redundant renders.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusSnapshot {
    pub stream_type: Option<StreamKind>,
    /// Raw provider status; absent when no device session is bound.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream_status: Option<String>,
    pub phase: PhaseTag,
    pub hls_url: Option<String>,
    pub dash_url: Option<String>,
    pub stream_id: Option<String>,
    pub direct_rtmp_url: Option<String>,
    pub preview_url: Option<String>,
    pub thumbnail_url: Option<String>,
    #[serde(default)]
    pub restream_destinations: Vec<RestreamDestination>,
    pub error: Option<String>,
    pub glasses_battery_percent: Option<u8>,
    pub has_active_session: bool,
    #[serde(default)]
    pub saved_config: SavedConfig,
    /// Per-user revision; bumps on every applied change, not on resnapshots.
    #[serde(default)]
    pub rev: u64,
}

impl Default for StatusSnapshot {
    fn default() -> Self {
        Self::no_session()
    }
}

impl StatusSnapshot {
    /// Snapshot for a user with no bound device session.
    pub fn no_session() -> Self {
        Self {
            stream_type: None,
            stream_status: None,
            phase: PhaseTag::Idle,
            hls_url: None,
            dash_url: None,
            stream_id: None,
            direct_rtmp_url: None,
            preview_url: None,
            thumbnail_url: None,
            restream_destinations: Vec::new(),
            error: None,
            glasses_battery_percent: None,
            has_active_session: false,
            saved_config: SavedConfig::default(),
            rev: 0,
        }
    }

    /// Phase recomputed from the raw status, as an observer would.
    pub fn canonical_phase(&self) -> CanonicalPhase {
        match &self.stream_status {
            Some(raw) => classify(raw),
            None => CanonicalPhase::Unknown(String::new()),
        }
    }

    /// Same content ignoring the revision counter.
    pub fn same_content(&self, other: &StatusSnapshot) -> bool {
        let mut a = self.clone();
        a.rev = other.rev;
        a == *other
    }
}

// ── Action requests / replies ────────────────────────────────────────────────

/// Body of a start request.  Every field is optional: absent fields fall back
/// to the user's saved configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<Platform>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_rtmp_url: Option<String>,
    #[serde(
        default,
        alias = "useCloudflareManaged",
        skip_serializing_if = "Option::is_none"
    )]
    pub use_managed_relay: Option<bool>,
    /// Fully resolved RTMP URL (unmanaged start).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rtmp_url: Option<String>,
}

/// Body of an explicit restream start.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RestreamRequest {
    #[serde(default)]
    pub restream_urls: Vec<String>,
}

/// Generic `{ok, error?, message?}` reply of the action endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiReply {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ApiReply {
    pub fn ok() -> Self {
        Self {
            ok: true,
            error: None,
            message: None,
        }
    }

    pub fn ok_with_message(message: impl Into<String>) -> Self {
        Self {
            ok: true,
            error: None,
            message: Some(message.into()),
        }
    }

    pub fn error(error: impl Into<String>) -> Self {
        Self {
            ok: false,
            error: Some(error.into()),
            message: None,
        }
    }
}

/// A stream the provider reports as already running (possibly started by
/// another app or another device session).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExistingStream {
    #[serde(rename = "type")]
    pub kind: StreamKind,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub stream_id: Option<String>,
    #[serde(default)]
    pub hls_url: Option<String>,
    #[serde(default)]
    pub dash_url: Option<String>,
    #[serde(default)]
    pub preview_url: Option<String>,
    #[serde(default)]
    pub webrtc_url: Option<String>,
    #[serde(default)]
    pub rtmp_url: Option<String>,
    #[serde(default)]
    pub requesting_app_id: Option<String>,
    #[serde(default)]
    pub active_viewers: Option<u32>,
}

/// Result of a "check existing stream" query.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExistingStreamCheck {
    pub has_active_stream: bool,
    #[serde(default)]
    pub stream_info: Option<ExistingStream>,
}

impl ExistingStreamCheck {
    pub fn none() -> Self {
        Self::default()
    }

    /// The running stream, if there is one.
    pub fn active(&self) -> Option<&ExistingStream> {
        if self.has_active_stream {
            self.stream_info.as_ref()
        } else {
            None
        }
    }
}

/// Reply of `GET /api/stream/check`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckReply {
    pub ok: bool,
    pub has_active_stream: bool,
    #[serde(default)]
    pub stream_info: Option<ExistingStream>,
}

/// Tool-call webhook payload sent by the device platform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCall {
    pub tool_id: String,
    pub user_id: String,
    #[serde(default)]
    pub tool_parameters: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    pub timestamp: Option<String>,
}

impl ToolCall {
    fn param_str(&self, name: &str) -> Option<String> {
        self.tool_parameters
            .get(name)
            .and_then(|v| v.as_str())
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    }

    /// Interpret the tool parameters as a start request.
    pub fn start_request(&self) -> StartRequest {
        StartRequest {
            platform: self.param_str("platform").and_then(|p| p.parse().ok()),
            stream_key: self.param_str("streamKey"),
            custom_rtmp_url: self.param_str("customRtmpUrl"),
            use_managed_relay: self
                .tool_parameters
                .get("useManagedRelay")
                .or_else(|| self.tool_parameters.get("useCloudflareManaged"))
                .and_then(|v| v.as_bool()),
            rtmp_url: None,
        }
    }
}
