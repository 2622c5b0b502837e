//! Main area: idle overlay, managed preview, or the activity log.  Also the
//! blocking alert popup.

use ratatui::{
    layout::{Alignment, Constraint, Flex, Layout, Rect},
    style::{Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Clear, Paragraph, Wrap},
    Frame,
};
use stream_panel::reconcile::{ControlPanel, DisplayMode};

use crate::theme::{
    severity_color, style_border, style_default, style_muted, style_secondary, C_ACCENT, C_LIVE,
    C_PRIMARY,
};

pub fn draw_surface(frame: &mut Frame, area: Rect, panel: &ControlPanel) {
    match panel.display() {
        DisplayMode::Idle => draw_idle(frame, area, panel),
        DisplayMode::Preview(url) => draw_preview(frame, area, panel, url),
        DisplayMode::Log => draw_log(frame, area, panel),
    }
}

fn draw_idle(frame: &mut Frame, area: Rect, panel: &ControlPanel) {
    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(style_border(false));
    let inner = block.inner(area);
    frame.render_widget(block, area);

    let phase = panel.phase();
    let headline = if phase.is_live_like() {
        format!("{}…", phase.label())
    } else if panel.snapshot().has_active_session {
        "Ready to stream".to_string()
    } else {
        "Waiting for the device to connect".to_string()
    };
    let hint = if panel.can_start() {
        "press space to go live"
    } else {
        ""
    };

    let [row] = Layout::vertical([Constraint::Length(2)])
        .flex(Flex::Center)
        .areas(inner);
    let lines = vec![
        Line::from(Span::styled(
            headline,
            style_default().add_modifier(Modifier::BOLD),
        )),
        Line::from(Span::styled(hint, style_muted())),
    ];
    frame.render_widget(Paragraph::new(lines).alignment(Alignment::Center), row);
}

fn draw_preview(frame: &mut Frame, area: Rect, panel: &ControlPanel, url: &str) {
    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(C_LIVE))
        .title(Span::styled(" preview ", Style::default().fg(C_LIVE)));
    let inner = block.inner(area);
    frame.render_widget(block, area);

    let snap = panel.snapshot();
    let mut lines = vec![
        Line::from(vec![
            Span::styled("player   ", style_muted()),
            Span::styled(url.to_string(), Style::default().fg(C_PRIMARY)),
        ]),
        Line::from(vec![
            Span::styled("loads    ", style_muted()),
            Span::styled(panel.preview_loads().to_string(), style_secondary()),
        ]),
    ];
    let extras = [
        ("hls      ", snap.hls_url.as_deref()),
        ("dash     ", snap.dash_url.as_deref()),
        ("thumb    ", snap.thumbnail_url.as_deref()),
        ("stream   ", snap.stream_id.as_deref()),
    ];
    for (label, value) in extras {
        if let Some(value) = value {
            lines.push(Line::from(vec![
                Span::styled(label, style_muted()),
                Span::styled(value.to_string(), style_secondary()),
            ]));
        }
    }
    for dest in &snap.restream_destinations {
        lines.push(Line::from(vec![
            Span::styled("relay    ", style_muted()),
            Span::styled(
                format!(
                    "{} → {}",
                    dest.name,
                    stream_proto::destination::mask_stream_key(&dest.url)
                ),
                style_secondary(),
            ),
        ]));
    }
    frame.render_widget(Paragraph::new(lines).wrap(Wrap { trim: true }), inner);
}

fn draw_log(frame: &mut Frame, area: Rect, panel: &ControlPanel) {
    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(style_border(false))
        .title(Span::styled(" log ", style_secondary()));
    let inner = block.inner(area);
    frame.render_widget(block, area);

    // Newest at the bottom; show the tail that fits.
    let height = inner.height as usize;
    let log = panel.log();
    let lines: Vec<Line> = log
        .iter()
        .skip(log.len().saturating_sub(height))
        .map(|entry| {
            Line::from(vec![
                Span::styled(format!("{} ", entry.time_label()), style_muted()),
                Span::styled(
                    entry.message.clone(),
                    Style::default().fg(severity_color(entry.severity)),
                ),
            ])
        })
        .collect();
    frame.render_widget(Paragraph::new(lines), inner);
}

pub fn draw_alert(frame: &mut Frame, area: Rect, message: &str) {
    let [popup] = Layout::horizontal([Constraint::Percentage(60)])
        .flex(Flex::Center)
        .areas(area);
    let [popup] = Layout::vertical([Constraint::Length(5)])
        .flex(Flex::Center)
        .areas(popup);

    frame.render_widget(Clear, popup);
    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(C_ACCENT))
        .title(Span::styled(" error ", Style::default().fg(C_ACCENT)));
    let lines = vec![
        Line::from(Span::styled(message.to_string(), style_default())),
        Line::from(Span::styled("enter to dismiss", style_muted())),
    ];
    frame.render_widget(
        Paragraph::new(lines)
            .block(block)
            .alignment(Alignment::Center)
            .wrap(Wrap { trim: true }),
        popup,
    );
}
