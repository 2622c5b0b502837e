//! Status classification: maps the provider's free-text stream status onto
//! the small canonical vocabulary every other layer works with.
//!
//! Matching is case-insensitive and exact (after trimming).  Anything outside
//! the table is kept verbatim as `Unknown(raw)` so the UI can show the
//! provider's own wording instead of a generic label.

use serde::{Deserialize, Serialize};

/// Canonical lifecycle phase of a stream.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum CanonicalPhase {
    #[default]
    Idle,
    Connecting,
    Active,
    Stopping,
    Error,
    /// Unrecognised (or empty) provider status, preserved verbatim.
    Unknown(String),
}

/// Fieldless wire tag for a phase (the raw text travels separately as
/// `streamStatus`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PhaseTag {
    Idle,
    Connecting,
    Active,
    Stopping,
    Error,
    Unknown,
}

const ACTIVE: &[&str] = &["active", "streaming", "connected"];
const CONNECTING: &[&str] = &["connecting", "starting", "pending"];
const STOPPING: &[&str] = &["stopping", "disconnecting"];
const ERROR: &[&str] = &["error", "failed"];
const IDLE: &[&str] = &["idle", "ready"];

/// Statuses meaning "still progressing"; these keep controls busy even when
/// they are not in the main table (e.g. `initializing`).
const PROGRESSING: &[&str] = &[
    "connecting",
    "starting",
    "pending",
    "stopping",
    "disconnecting",
    "initializing",
];

/// Classify a raw provider status.
pub fn classify(raw: &str) -> CanonicalPhase {
    let lower = raw.trim().to_ascii_lowercase();
    let s = lower.as_str();
    if ACTIVE.contains(&s) {
        CanonicalPhase::Active
    } else if CONNECTING.contains(&s) {
        CanonicalPhase::Connecting
    } else if STOPPING.contains(&s) {
        CanonicalPhase::Stopping
    } else if ERROR.contains(&s) {
        CanonicalPhase::Error
    } else if IDLE.contains(&s) {
        CanonicalPhase::Idle
    } else {
        CanonicalPhase::Unknown(raw.to_string())
    }
}

/// True when the stream is live or still moving between states.  This, not
/// raw equality, decides whether controls are considered busy.
pub fn is_live_like(phase: &CanonicalPhase) -> bool {
    match phase {
        CanonicalPhase::Active | CanonicalPhase::Connecting | CanonicalPhase::Stopping => true,
        CanonicalPhase::Idle | CanonicalPhase::Error => false,
        CanonicalPhase::Unknown(raw) => {
            let lower = raw.trim().to_ascii_lowercase();
            PROGRESSING.contains(&lower.as_str())
        }
    }
}

impl CanonicalPhase {
    pub fn tag(&self) -> PhaseTag {
        match self {
            CanonicalPhase::Idle => PhaseTag::Idle,
            CanonicalPhase::Connecting => PhaseTag::Connecting,
            CanonicalPhase::Active => PhaseTag::Active,
            CanonicalPhase::Stopping => PhaseTag::Stopping,
            CanonicalPhase::Error => PhaseTag::Error,
            CanonicalPhase::Unknown(_) => PhaseTag::Unknown,
        }
    }

    /// Text for the status indicator.  Unknown statuses show the raw string;
    /// an empty one reads as "Offline".
    pub fn label(&self) -> &str {
        match self {
            CanonicalPhase::Idle => "Ready",
            CanonicalPhase::Connecting => "Connecting",
            CanonicalPhase::Active => "Live",
            CanonicalPhase::Stopping => "Stopping",
            CanonicalPhase::Error => "Error",
            CanonicalPhase::Unknown(raw) if raw.trim().is_empty() => "Offline",
            CanonicalPhase::Unknown(raw) => raw.as_str(),
        }
    }

    pub fn is_live_like(&self) -> bool {
        is_live_like(self)
    }

    /// How a transition into this phase is logged.
    pub fn severity(&self) -> Severity {
        match self {
            CanonicalPhase::Active => Severity::Success,
            CanonicalPhase::Error => Severity::Error,
            CanonicalPhase::Stopping => Severity::Warning,
            _ => Severity::Info,
        }
    }
}

/// Severity of a client log line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Success,
    Warning,
    Error,
}
