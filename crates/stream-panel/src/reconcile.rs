//! Client-side reconciliation of the panel's local view with the server's
//! pushed snapshots.
//!
//! The panel keeps two things apart: the last authoritative snapshot and the
//! user's optimistic intent.  What is shown is always derived from both by
//! [`merge_phase`], never stored.  Snapshots are filtered by revision and by
//! content so repeated pushes do not re-log or reload the preview.

use stream_proto::destination::{mask_stream_key, resolve_rtmp_url, Platform};
use stream_proto::phase::{CanonicalPhase, Severity};
use stream_proto::protocol::{
    ApiReply, CheckReply, SavedConfig, StartRequest, StatusSnapshot, StreamKind,
};
use tracing::debug;

use crate::error::PanelError;
use crate::intent::{IntentState, RenderHint, StreamIntent};
use crate::log::LogBuffer;

/// What the main area of the panel shows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisplayMode {
    Idle,
    /// Managed stream preview at this URL.
    Preview(String),
    Log,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tone {
    Idle,
    Busy,
    Live,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusIndicator {
    pub label: String,
    pub tone: Tone,
    pub hint: RenderHint,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatteryLevel {
    Unknown,
    Low,
    Medium,
    Normal,
}

impl BatteryLevel {
    pub fn from_percent(percent: Option<u8>) -> Self {
        match percent {
            None => BatteryLevel::Unknown,
            Some(p) if p <= 20 => BatteryLevel::Low,
            Some(p) if p <= 50 => BatteryLevel::Medium,
            Some(_) => BatteryLevel::Normal,
        }
    }
}

/// Request currently in flight; controls stay disabled until it answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Start,
    Stop,
}

/// A start the panel is about to send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartPlan {
    pub kind: StreamKind,
    pub request: StartRequest,
}

/// Phase to display: the server's, unless an unconfirmed intent says
/// otherwise.
pub fn merge_phase(server: &CanonicalPhase, intent: &IntentState<StreamIntent>) -> CanonicalPhase {
    if let IntentState::Pending { intended, .. } = intent {
        match intended {
            StreamIntent::Streaming if !server.is_live_like() => return CanonicalPhase::Connecting,
            StreamIntent::Idle if server.is_live_like() => return CanonicalPhase::Stopping,
            _ => {}
        }
    }
    server.clone()
}

fn looks_like_failure(text: &str) -> bool {
    let lower = text.to_ascii_lowercase();
    lower.contains("failed") || lower.contains("error")
}

pub struct ControlPanel {
    server: StatusSnapshot,
    seen_snapshot: bool,
    last_rev: Option<u64>,
    channel_open: bool,
    intent: IntentState<StreamIntent>,
    starting_kind: Option<StreamKind>,
    in_flight: Option<Operation>,
    pending_start: Option<StartPlan>,
    form: SavedConfig,
    form_dirty: bool,
    log: LogBuffer,
    keep_log: bool,
    display: DisplayMode,
    preview_loads: u64,
    announced_hls: Option<String>,
    announced_rtmp: Option<String>,
    alert: Option<String>,
    /// Last start was rejected; cleared by the next snapshot or start.
    start_error: bool,
}

impl Default for ControlPanel {
    fn default() -> Self {
        Self::new()
    }
}

impl ControlPanel {
    pub fn new() -> Self {
        Self {
            server: StatusSnapshot::no_session(),
            seen_snapshot: false,
            last_rev: None,
            channel_open: false,
            intent: IntentState::new(StreamIntent::Idle),
            starting_kind: None,
            in_flight: None,
            pending_start: None,
            form: SavedConfig::default(),
            form_dirty: false,
            log: LogBuffer::default(),
            keep_log: false,
            display: DisplayMode::Idle,
            preview_loads: 0,
            announced_hls: None,
            announced_rtmp: None,
            alert: None,
            start_error: false,
        }
    }

    // ── Accessors ────────────────────────────────────────────────────────────

    pub fn snapshot(&self) -> &StatusSnapshot {
        &self.server
    }

    pub fn log(&self) -> &LogBuffer {
        &self.log
    }

    pub fn display(&self) -> &DisplayMode {
        &self.display
    }

    /// How many times the preview player was (re)loaded.
    pub fn preview_loads(&self) -> u64 {
        self.preview_loads
    }

    pub fn form(&self) -> &SavedConfig {
        &self.form
    }

    pub fn alert(&self) -> Option<&str> {
        self.alert.as_deref()
    }

    pub fn dismiss_alert(&mut self) {
        self.alert = None;
    }

    pub fn is_busy(&self) -> bool {
        self.in_flight.is_some()
    }

    pub fn in_flight(&self) -> Option<Operation> {
        self.in_flight
    }

    pub fn channel_open(&self) -> bool {
        self.channel_open
    }

    fn server_phase(&self) -> CanonicalPhase {
        self.server.canonical_phase()
    }

    pub fn phase(&self) -> CanonicalPhase {
        merge_phase(&self.server_phase(), &self.intent)
    }

    pub fn can_start(&self) -> bool {
        !self.is_busy() && !self.phase().is_live_like()
    }

    pub fn can_stop(&self) -> bool {
        !self.is_busy() && self.phase().is_live_like()
    }

    /// Destination controls are editable only while nothing is running.
    pub fn controls_enabled(&self) -> bool {
        self.can_start()
    }

    pub fn status(&self) -> StatusIndicator {
        let phase = self.phase();
        let hint = self.intent.render_hint();
        if !phase.is_live_like() {
            if self.start_error || self.server.error.as_deref().is_some_and(looks_like_failure) {
                return StatusIndicator {
                    label: "Error".to_string(),
                    tone: Tone::Error,
                    hint,
                };
            }
        }
        let tone = match &phase {
            CanonicalPhase::Active => Tone::Live,
            CanonicalPhase::Error => Tone::Error,
            CanonicalPhase::Idle => Tone::Idle,
            p if p.is_live_like() => Tone::Busy,
            _ => Tone::Idle,
        };
        StatusIndicator {
            label: phase.label().to_string(),
            tone,
            hint,
        }
    }

    pub fn battery_level(&self) -> BatteryLevel {
        BatteryLevel::from_percent(self.server.glasses_battery_percent)
    }

    pub fn battery_text(&self) -> String {
        match self.server.glasses_battery_percent {
            Some(p) => format!("{}%", p),
            None => "--".to_string(),
        }
    }

    /// Free-form log line from the UI (refused keys and the like).
    pub fn note(&mut self, severity: Severity, message: impl Into<String>) {
        self.log.push(severity, message);
    }

    // ── Push channel ─────────────────────────────────────────────────────────

    /// The status stream (re)connected.  Revisions restart with the server,
    /// so the stale-snapshot guard is reset.
    pub fn on_channel_open(&mut self) {
        self.last_rev = None;
        if !self.channel_open {
            self.channel_open = true;
            self.log.push(Severity::Info, "Status channel connected");
        }
    }

    pub fn on_channel_closed(&mut self, reason: &str) {
        if self.channel_open {
            self.channel_open = false;
            self.log.push(
                Severity::Warning,
                format!("Status channel lost ({}), reconnecting", reason),
            );
        }
    }

    /// Apply an authoritative snapshot.  Returns `false` when it was stale or
    /// carried nothing new.
    pub fn on_snapshot(&mut self, snap: StatusSnapshot) -> bool {
        if let Some(rev) = self.last_rev {
            if snap.rev < rev {
                debug!("discarding stale snapshot rev {} < {}", snap.rev, rev);
                return false;
            }
        }
        self.last_rev = Some(snap.rev);

        let first = !self.seen_snapshot;
        self.seen_snapshot = true;
        if !first && snap.same_content(&self.server) {
            return false;
        }

        let prev = std::mem::replace(&mut self.server, snap);
        if !self.form_dirty {
            self.form = self.server.saved_config.clone();
        }

        self.start_error = false;
        let phase = self.server_phase();
        let live = phase.is_live_like();
        let server_intent = StreamIntent::from_live(live);
        // Only snapshots racing an unanswered request may leave the intent
        // pending.
        let settled = self.in_flight.is_none()
            || phase == CanonicalPhase::Error
            || !self.server.has_active_session;
        if settled {
            self.intent.settle(server_intent);
        } else {
            self.intent.on_confirmed(server_intent);
        }
        if !self.intent.is_pending() {
            self.starting_kind = None;
        }
        if live && self.server.stream_type == Some(StreamKind::Unmanaged) {
            self.keep_log = true;
        }

        self.log_changes(&prev, first);
        self.refresh_display();
        true
    }

    fn log_changes(&mut self, prev: &StatusSnapshot, first: bool) {
        let phase = self.server_phase();
        if first {
            self.log.push(
                phase.severity(),
                format!("Current status: {}", phase.label()),
            );
        } else {
            if prev.has_active_session != self.server.has_active_session {
                if self.server.has_active_session {
                    self.log.push(Severity::Success, "Device session connected");
                } else {
                    self.log.push(Severity::Warning, "Device session ended");
                }
            }
            if prev.canonical_phase() != phase {
                self.log
                    .push(phase.severity(), format!("Stream status: {}", phase.label()));
            }
        }

        if let Some(err) = &self.server.error {
            if prev.error.as_ref() != Some(err) || first {
                let severity = if looks_like_failure(err) {
                    Severity::Error
                } else {
                    Severity::Warning
                };
                self.log.push(severity, err.clone());
            }
        }

        if let Some(hls) = &self.server.hls_url {
            if self.announced_hls.as_ref() != Some(hls) {
                self.log
                    .push(Severity::Info, format!("HLS URL available: {}", hls));
                self.announced_hls = Some(hls.clone());
            }
        }
        if let Some(rtmp) = &self.server.direct_rtmp_url {
            if self.announced_rtmp.as_ref() != Some(rtmp) {
                self.log.push(
                    Severity::Info,
                    format!("RTMP ingest URL ready: {}", mask_stream_key(rtmp)),
                );
                self.announced_rtmp = Some(rtmp.clone());
            }
        }
    }

    fn refresh_display(&mut self) {
        let live = self.phase().is_live_like();
        let kind = self.server.stream_type.or(self.starting_kind);
        let next = match (kind, live) {
            (Some(StreamKind::Managed), true) => match &self.server.preview_url {
                Some(url) if self.server.stream_type == Some(StreamKind::Managed) => {
                    DisplayMode::Preview(url.clone())
                }
                _ => DisplayMode::Idle,
            },
            (Some(StreamKind::Unmanaged), true) => DisplayMode::Log,
            _ if self.keep_log && !self.log.is_empty() => DisplayMode::Log,
            _ => DisplayMode::Idle,
        };

        if let DisplayMode::Preview(url) = &next {
            if self.display != next {
                debug!("loading preview {}", url);
                self.preview_loads += 1;
            }
        }
        self.display = next;
    }

    // ── Destination form ─────────────────────────────────────────────────────

    fn edit_form(&mut self, f: impl FnOnce(&mut SavedConfig)) -> Result<(), PanelError> {
        if !self.controls_enabled() {
            return Err(PanelError::Refused("Controls are locked while streaming"));
        }
        f(&mut self.form);
        self.form_dirty = true;
        Ok(())
    }

    pub fn set_platform(&mut self, platform: Platform) -> Result<(), PanelError> {
        self.edit_form(|form| form.platform = platform)
    }

    pub fn toggle_relay(&mut self) -> Result<(), PanelError> {
        self.edit_form(|form| form.use_managed_relay = !form.use_managed_relay)
    }

    pub fn set_stream_key(&mut self, key: &str) -> Result<(), PanelError> {
        self.edit_form(|form| form.stream_key = key.trim().to_string())
    }

    pub fn set_custom_rtmp_url(&mut self, url: &str) -> Result<(), PanelError> {
        self.edit_form(|form| form.custom_rtmp_url = url.trim().to_string())
    }

    // ── Start / stop ─────────────────────────────────────────────────────────

    /// Optimistically enter "connecting" and prepare the start.  The caller
    /// checks for an existing stream next and feeds the result to
    /// [`ControlPanel::on_start_check`].
    pub fn begin_start(&mut self) -> Result<(), PanelError> {
        if self.is_busy() {
            return Err(PanelError::Refused("Another request is in progress"));
        }
        if self.phase().is_live_like() {
            return Err(PanelError::Refused("A stream is already running"));
        }

        let kind = if self.form.uses_managed_path() {
            StreamKind::Managed
        } else {
            StreamKind::Unmanaged
        };
        let rtmp_url = match kind {
            StreamKind::Unmanaged => match resolve_rtmp_url(&self.form) {
                Some(url) => Some(url),
                None => {
                    self.log.push(Severity::Error, "No RTMP URL provided");
                    self.alert = Some("Please enter an RTMP URL or stream key".to_string());
                    return Err(PanelError::Refused("No RTMP URL provided"));
                }
            },
            StreamKind::Managed => None,
        };
        let request = StartRequest {
            platform: Some(self.form.platform),
            stream_key: Some(self.form.stream_key.clone()),
            custom_rtmp_url: Some(self.form.custom_rtmp_url.clone()),
            use_managed_relay: Some(self.form.use_managed_relay),
            rtmp_url,
        };

        self.alert = None;
        self.start_error = false;
        self.in_flight = Some(Operation::Start);
        self.pending_start = Some(StartPlan { kind, request });
        self.starting_kind = Some(kind);
        self.intent.set_intent(StreamIntent::Streaming);
        self.keep_log = false;
        if kind == StreamKind::Unmanaged {
            self.log.clear();
            self.keep_log = true;
        }
        self.log
            .push(Severity::Info, "Checking for an existing stream...");
        self.refresh_display();
        Ok(())
    }

    /// Existing-stream check before a start.  Returns the start to send, or
    /// `None` when an existing stream will be adopted instead.
    pub fn on_start_check(&mut self, result: Result<CheckReply, PanelError>) -> Option<StartPlan> {
        let plan = self.pending_start.take()?;
        match result {
            Ok(reply) if reply.has_active_stream && reply.stream_info.is_some() => {
                self.in_flight = None;
                self.log
                    .push(Severity::Info, "Reconnecting to existing stream...");
                self.refresh_display();
                None
            }
            Ok(_) => {
                self.log_start(&plan);
                Some(plan)
            }
            Err(e) => {
                self.log.push(
                    Severity::Warning,
                    format!("Could not check for an existing stream: {}", e),
                );
                self.log_start(&plan);
                Some(plan)
            }
        }
    }

    fn log_start(&mut self, plan: &StartPlan) {
        let message = match (&plan.kind, &plan.request.rtmp_url) {
            (StreamKind::Unmanaged, Some(url)) => {
                format!("Starting stream to {}", mask_stream_key(url))
            }
            (kind, _) => format!("Starting {} stream", kind.as_str()),
        };
        self.log.push(Severity::Info, message);
    }

    pub fn on_start_result(&mut self, result: Result<ApiReply, PanelError>) {
        self.in_flight = None;
        match result {
            Ok(reply) if reply.ok => {
                let message = reply
                    .message
                    .unwrap_or_else(|| "Start request accepted".to_string());
                self.log.push(Severity::Success, message);
                self.refresh_display();
            }
            Ok(reply) => {
                let message = reply.error.unwrap_or_else(|| "Unknown error".to_string());
                self.start_failed(&message);
            }
            Err(e) => self.start_failed(&e.to_string()),
        }
    }

    /// Revert the optimistic start and raise a blocking alert.
    pub fn start_failed(&mut self, message: &str) {
        self.in_flight = None;
        self.pending_start = None;
        self.starting_kind = None;
        self.intent.revert();
        self.start_error = true;
        self.log
            .push(Severity::Error, format!("Failed to start stream: {}", message));
        self.alert = Some(format!("Failed to start stream: {}", message));
        self.refresh_display();
    }

    /// Optimistically enter "stopping".  Returns which kind to stop.
    pub fn begin_stop(&mut self) -> Result<StreamKind, PanelError> {
        if self.is_busy() {
            return Err(PanelError::Refused("Another request is in progress"));
        }
        if !self.phase().is_live_like() {
            return Err(PanelError::Refused("No stream is running"));
        }
        let kind = self
            .server
            .stream_type
            .or(self.starting_kind)
            .unwrap_or(if self.form.uses_managed_path() {
                StreamKind::Managed
            } else {
                StreamKind::Unmanaged
            });

        self.in_flight = Some(Operation::Stop);
        self.starting_kind = None;
        self.intent.set_intent(StreamIntent::Idle);
        self.log.push(Severity::Info, "Stopping stream...");
        self.refresh_display();
        Ok(kind)
    }

    pub fn on_stop_result(&mut self, result: Result<ApiReply, PanelError>) {
        self.in_flight = None;
        match result {
            Ok(reply) if reply.ok => {
                let message = reply.message.unwrap_or_else(|| "Stream stopped".to_string());
                self.log.push(Severity::Success, message);
            }
            Ok(reply) => {
                let message = reply.error.unwrap_or_else(|| "Unknown error".to_string());
                self.log
                    .push(Severity::Warning, format!("Stop failed: {}", message));
                self.intent.revert();
            }
            Err(e) => {
                self.log.push(Severity::Warning, format!("Stop failed: {}", e));
                self.intent.revert();
            }
        }
        self.refresh_display();
    }

    /// Result of the existing-stream check issued after the panel loads.
    /// The server folds what it finds into the pushed state, so this only
    /// reports.
    pub fn on_check_result(&mut self, result: Result<CheckReply, PanelError>) {
        match result {
            Ok(reply) => match reply.stream_info.filter(|_| reply.has_active_stream) {
                Some(info) => self.log.push(
                    Severity::Info,
                    format!(
                        "Found existing {} stream ({})",
                        info.kind.as_str(),
                        info.status.as_deref().unwrap_or("active")
                    ),
                ),
                None => self.log.push(Severity::Info, "No existing stream"),
            },
            Err(e) => self.log.push(
                Severity::Warning,
                format!("Existing stream check failed: {}", e),
            ),
        }
        self.refresh_display();
    }

    /// Expire unconfirmed intents.  Returns `true` when the view changed.
    pub fn tick(&mut self) -> bool {
        if !self.intent.tick() {
            return false;
        }
        let what = match self.intent.intended() {
            StreamIntent::Streaming => "start",
            StreamIntent::Idle => "stop",
        };
        self.log.push(
            Severity::Warning,
            format!("Server has not confirmed the {} yet", what),
        );
        self.starting_kind = None;
        self.refresh_display();
        true
    }
}
