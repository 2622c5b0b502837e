//! App: owns the reconciliation engine, the terminal and the event loop.
//!
//! - Keyboard input arrives from a blocking reader task.
//! - The status channel and every HTTP request run on their own tasks and
//!   report back through one `mpsc` of [`AppMessage`].
//! - The loop redraws only when something changed.

use std::io;
use std::time::Duration;

use ratatui::crossterm::{
    event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    backend::CrosstermBackend,
    layout::{Constraint, Layout},
    Frame, Terminal,
};
use stream_panel::client::{StreamClient, StreamUpdate};
use stream_panel::error::PanelError;
use stream_panel::intent::RenderHint;
use stream_panel::log::Severity;
use stream_panel::reconcile::ControlPanel;
use stream_proto::destination::Platform;
use stream_proto::protocol::{ApiReply, CheckReply, StatusSnapshot};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::widgets::field_input::{FieldAction, FieldInput};
use crate::widgets::{form, status_bar, surface};

enum AppMessage {
    Event(Event),
    Stream(StreamUpdate),
    Bootstrap(Result<StatusSnapshot, PanelError>),
    StartChecked(Result<CheckReply, PanelError>),
    StartDone(Result<ApiReply, PanelError>),
    StopDone(Result<ApiReply, PanelError>),
    CheckDone(Result<CheckReply, PanelError>),
}

#[derive(Debug, Clone, Copy)]
enum EditTarget {
    StreamKey,
    CustomUrl,
}

pub struct App {
    panel: ControlPanel,
    client: StreamClient,
    user_id: String,
    check_delay: Duration,
    tx: mpsc::Sender<AppMessage>,
    rx: Option<mpsc::Receiver<AppMessage>>,
    editor: FieldInput,
    editing: Option<EditTarget>,
    load_check_sent: bool,
    should_quit: bool,
}

impl App {
    pub fn new(client: StreamClient, user_id: String, check_delay: Duration) -> Self {
        let (tx, rx) = mpsc::channel::<AppMessage>(256);
        Self {
            panel: ControlPanel::new(),
            client,
            user_id,
            check_delay,
            tx,
            rx: Some(rx),
            editor: FieldInput::new(),
            editing: None,
            load_check_sent: false,
            should_quit: false,
        }
    }

    pub async fn run(mut self) -> anyhow::Result<()> {
        let Some(mut rx) = self.rx.take() else {
            anyhow::bail!("app already running");
        };

        enable_raw_mode()?;
        let mut stdout = io::stdout();
        execute!(stdout, EnterAlternateScreen)?;
        let backend = CrosstermBackend::new(stdout);
        let mut terminal = Terminal::new(backend)?;
        debug!("run(): terminal created, size={:?}", terminal.size());

        // ── Background task: keyboard events ──────────────────────────────────
        let event_tx = self.tx.clone();
        tokio::task::spawn_blocking(move || loop {
            match event::read() {
                Ok(ev) => {
                    if event_tx.blocking_send(AppMessage::Event(ev)).is_err() {
                        break;
                    }
                }
                Err(_) => break,
            }
        });

        // ── Background task: status channel ───────────────────────────────────
        let (stream_tx, mut stream_rx) = mpsc::channel::<StreamUpdate>(64);
        let stream_client = self.client.clone();
        tokio::spawn(async move { stream_client.follow_status(stream_tx).await });
        let fwd_tx = self.tx.clone();
        tokio::spawn(async move {
            while let Some(update) = stream_rx.recv().await {
                if fwd_tx.send(AppMessage::Stream(update)).await.is_err() {
                    break;
                }
            }
        });

        // Bootstrap render from the JSON session endpoint; the push channel's
        // initial snapshot may race it, the revision guard sorts that out.
        let client = self.client.clone();
        self.spawn(async move { AppMessage::Bootstrap(client.session().await) });

        let mut ui_tick = tokio::time::interval(Duration::from_millis(100));
        ui_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        // ── Main loop ─────────────────────────────────────────────────────────
        let mut needs_redraw = true;
        loop {
            if needs_redraw {
                terminal.draw(|f| self.draw(f))?;
            }
            needs_redraw = false;

            if self.should_quit {
                break;
            }

            tokio::select! {
                Some(msg) = rx.recv() => {
                    self.handle_message(msg);
                    needs_redraw = true;
                }
                _ = ui_tick.tick() => {
                    // Pending intents pulse and may expire.
                    needs_redraw = self.panel.tick() || self.panel.status().hint != RenderHint::Normal;
                }
            }
        }

        // ── Teardown ──────────────────────────────────────────────────────────
        disable_raw_mode()?;
        execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
        terminal.show_cursor()?;
        info!("panel closed");
        Ok(())
    }

    /// Run a request off the loop and feed its result back in.
    fn spawn<F>(&self, fut: F)
    where
        F: std::future::Future<Output = AppMessage> + Send + 'static,
    {
        let tx = self.tx.clone();
        tokio::spawn(async move {
            let msg = fut.await;
            let _ = tx.send(msg).await;
        });
    }

    fn handle_message(&mut self, msg: AppMessage) {
        match msg {
            AppMessage::Event(Event::Key(key)) => {
                if key.kind != KeyEventKind::Release {
                    self.handle_key(key);
                }
            }
            AppMessage::Event(_) => {}
            AppMessage::Stream(StreamUpdate::Connected) => self.panel.on_channel_open(),
            AppMessage::Stream(StreamUpdate::Snapshot(snap)) => {
                self.panel.on_snapshot(snap);
                self.schedule_load_check();
            }
            AppMessage::Stream(StreamUpdate::Disconnected(reason)) => {
                self.panel.on_channel_closed(&reason);
            }
            AppMessage::Bootstrap(Ok(snap)) => {
                self.panel.on_snapshot(snap);
                self.schedule_load_check();
            }
            AppMessage::Bootstrap(Err(e)) => warn!("session bootstrap failed: {}", e),
            AppMessage::StartChecked(result) => {
                if let Some(plan) = self.panel.on_start_check(result) {
                    let client = self.client.clone();
                    self.spawn(async move { AppMessage::StartDone(client.start(&plan).await) });
                }
            }
            AppMessage::StartDone(result) => self.panel.on_start_result(result),
            AppMessage::StopDone(result) => self.panel.on_stop_result(result),
            AppMessage::CheckDone(result) => self.panel.on_check_result(result),
        }
    }

    /// Check for an existing stream once, shortly after the first render.
    fn schedule_load_check(&mut self) {
        if self.load_check_sent {
            return;
        }
        self.load_check_sent = true;
        let client = self.client.clone();
        let delay = self.check_delay;
        self.spawn(async move {
            tokio::time::sleep(delay).await;
            AppMessage::CheckDone(client.check().await)
        });
    }

    fn handle_key(&mut self, key: KeyEvent) {
        if key.modifiers.contains(KeyModifiers::CONTROL) && key.code == KeyCode::Char('c') {
            self.should_quit = true;
            return;
        }

        if let Some(target) = self.editing {
            match self.editor.handle_key(key) {
                FieldAction::Confirmed(value) => {
                    self.editing = None;
                    let result = match target {
                        EditTarget::StreamKey => self.panel.set_stream_key(&value),
                        EditTarget::CustomUrl => self.panel.set_custom_rtmp_url(&value),
                    };
                    self.refused(result);
                }
                FieldAction::Cancelled => self.editing = None,
                FieldAction::Editing => {}
            }
            return;
        }

        if self.panel.alert().is_some() {
            if matches!(key.code, KeyCode::Enter | KeyCode::Esc) {
                self.panel.dismiss_alert();
            }
            return;
        }

        match key.code {
            KeyCode::Char('q') => self.should_quit = true,
            KeyCode::Char(' ') | KeyCode::Char('s') => self.toggle_stream(),
            KeyCode::Char(c @ '1'..='5') => {
                let idx = (c as u8 - b'1') as usize;
                let result = self.panel.set_platform(Platform::ALL[idx]);
                self.refused(result);
            }
            KeyCode::Char('m') => {
                let result = self.panel.toggle_relay();
                self.refused(result);
            }
            KeyCode::Char('k') => self.open_editor(EditTarget::StreamKey),
            KeyCode::Char('u') => self.open_editor(EditTarget::CustomUrl),
            KeyCode::Char('c') => {
                let client = self.client.clone();
                self.spawn(async move { AppMessage::CheckDone(client.check().await) });
            }
            _ => {}
        }
    }

    fn toggle_stream(&mut self) {
        if self.panel.can_start() {
            // Refusals are logged and alerted by the panel itself.
            if self.panel.begin_start().is_err() {
                return;
            }
            let client = self.client.clone();
            self.spawn(async move { AppMessage::StartChecked(client.check().await) });
        } else if self.panel.can_stop() {
            match self.panel.begin_stop() {
                Ok(kind) => {
                    let client = self.client.clone();
                    self.spawn(async move { AppMessage::StopDone(client.stop(kind).await) });
                }
                Err(e) => self.refused(Err(e)),
            }
        }
    }

    fn open_editor(&mut self, target: EditTarget) {
        if !self.panel.controls_enabled() {
            self.panel
                .note(Severity::Warning, "Controls are locked while streaming");
            return;
        }
        let form = self.panel.form();
        let (label, value) = match target {
            EditTarget::StreamKey => ("stream key", form.stream_key.clone()),
            EditTarget::CustomUrl => ("custom RTMP URL", form.custom_rtmp_url.clone()),
        };
        self.editor.open(label, &value);
        self.editing = Some(target);
    }

    fn refused(&mut self, result: Result<(), PanelError>) {
        if let Err(e) = result {
            self.panel.note(Severity::Warning, e.to_string());
        }
    }

    fn draw(&self, frame: &mut Frame) {
        let area = frame.area();
        let [header, sep, form_area, body, editor, keys] = Layout::vertical([
            Constraint::Length(1),
            Constraint::Length(1),
            Constraint::Length(form::FORM_HEIGHT),
            Constraint::Min(3),
            Constraint::Length(if self.editing.is_some() { 1 } else { 0 }),
            Constraint::Length(1),
        ])
        .areas(area);

        status_bar::draw_header(frame, header, &self.panel, &self.user_id);
        status_bar::draw_separator(frame, sep);
        form::draw_form(frame, form_area, &self.panel);
        surface::draw_surface(frame, body, &self.panel);
        if self.editing.is_some() {
            self.editor.draw(frame, editor);
        }
        status_bar::draw_keys_bar(frame, keys, &self.panel, self.editing.is_some());

        if let Some(alert) = self.panel.alert() {
            surface::draw_alert(frame, area, alert);
        }
    }
}
