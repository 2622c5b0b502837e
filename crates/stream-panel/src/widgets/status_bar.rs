//! Header (status indicator, battery, channel state) and keys footer.

use ratatui::{
    layout::{Alignment, Rect},
    style::{Modifier, Style},
    text::{Line, Span},
    widgets::Paragraph,
    Frame,
};
use stream_panel::intent::RenderHint;
use stream_panel::reconcile::ControlPanel;

use crate::theme::{
    battery_color, tone_color, C_ACCENT, C_BUSY, C_LIVE, C_MUTED, C_PRIMARY, C_SECONDARY,
    C_SEPARATOR,
};

pub fn draw_header(frame: &mut Frame, area: Rect, panel: &ControlPanel, user_id: &str) {
    let status = panel.status();
    let dot = match status.hint {
        RenderHint::PendingHidden => " ",
        RenderHint::TimedOut => "?",
        _ => "●",
    };
    let color = tone_color(status.tone);

    let conn = if panel.channel_open() {
        Span::styled("●", Style::default().fg(C_LIVE))
    } else {
        Span::styled("○", Style::default().fg(C_ACCENT))
    };

    let kind = panel
        .snapshot()
        .stream_type
        .map(|k| k.as_str())
        .unwrap_or("no stream");

    let left = Line::from(vec![
        conn,
        Span::raw(" "),
        Span::styled(user_id.to_string(), Style::default().fg(C_SECONDARY)),
        Span::styled("  │  ", Style::default().fg(C_SEPARATOR)),
        Span::styled(dot, Style::default().fg(color)),
        Span::raw(" "),
        Span::styled(
            status.label,
            Style::default().fg(color).add_modifier(Modifier::BOLD),
        ),
        Span::styled(format!("  {}", kind), Style::default().fg(C_MUTED)),
    ]);
    frame.render_widget(Paragraph::new(left), area);

    let battery = Line::from(vec![
        Span::styled("battery ", Style::default().fg(C_MUTED)),
        Span::styled(
            panel.battery_text(),
            Style::default().fg(battery_color(panel.battery_level())),
        ),
        Span::raw(" "),
    ]);
    frame.render_widget(Paragraph::new(battery).alignment(Alignment::Right), area);
}

pub fn draw_keys_bar(frame: &mut Frame, area: Rect, panel: &ControlPanel, editing: bool) {
    let hints: Vec<(&str, &str, bool)> = if editing {
        vec![("enter", "save", true), ("esc", "cancel", true)]
    } else {
        let controls = panel.controls_enabled();
        vec![
            ("space", "start", panel.can_start()),
            ("space", "stop", panel.can_stop()),
            ("1-5", "platform", controls),
            ("m", "relay", controls),
            ("k", "key", controls),
            ("u", "url", controls),
            ("c", "check", true),
            ("q", "quit", true),
        ]
    };

    let mut spans = Vec::new();
    for (key, label, enabled) in hints {
        // A disabled start or stop is simply not offered.
        if !enabled && (label == "start" || label == "stop") {
            continue;
        }
        let (key_color, label_color) = if enabled {
            (C_BUSY, C_SECONDARY)
        } else {
            (C_MUTED, C_MUTED)
        };
        spans.push(Span::styled(key, Style::default().fg(key_color)));
        spans.push(Span::raw(" "));
        spans.push(Span::styled(label, Style::default().fg(label_color)));
        spans.push(Span::raw("  "));
    }
    if panel.is_busy() {
        spans.push(Span::styled("working…", Style::default().fg(C_PRIMARY)));
    }
    frame.render_widget(Paragraph::new(Line::from(spans)), area);
}

pub fn draw_separator(frame: &mut Frame, area: Rect) {
    let line = Line::from(Span::styled(
        "─".repeat(area.width as usize),
        Style::default().fg(C_SEPARATOR),
    ));
    frame.render_widget(Paragraph::new(line), area);
}
