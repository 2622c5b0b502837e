//! Destination form: platform picker, relay toggle, key and custom URL.

use ratatui::{
    layout::Rect,
    style::Style,
    text::{Line, Span},
    widgets::{Block, Borders, Paragraph},
    Frame,
};
use stream_panel::reconcile::ControlPanel;
use stream_proto::destination::{mask_stream_key, resolve_rtmp_url, Platform};

use crate::theme::{
    style_border, style_muted, style_secondary, style_selected, C_LIVE, C_MUTED, C_PRIMARY,
};

/// Number of rows the form needs, borders included.
pub const FORM_HEIGHT: u16 = 6;

pub fn draw_form(frame: &mut Frame, area: Rect, panel: &ControlPanel) {
    let enabled = panel.controls_enabled();
    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(style_border(enabled))
        .title(Span::styled(" destination ", style_secondary()));
    let inner = block.inner(area);
    frame.render_widget(block, area);

    let form = panel.form();
    let text_style = if enabled {
        Style::default().fg(C_PRIMARY)
    } else {
        Style::default().fg(C_MUTED)
    };

    let mut platforms = vec![Span::styled("platform ", style_muted())];
    for (i, platform) in Platform::ALL.iter().enumerate() {
        let label = format!(" {} {} ", i + 1, platform.as_str());
        let style = if *platform == form.platform {
            style_selected()
        } else {
            text_style
        };
        platforms.push(Span::styled(label, style));
    }

    let relay = if form.platform == Platform::Here {
        Span::styled("always managed", style_muted())
    } else if form.use_managed_relay {
        Span::styled("on", Style::default().fg(C_LIVE))
    } else {
        Span::styled("off", text_style)
    };

    let key = if form.stream_key.is_empty() {
        Span::styled("(none)", style_muted())
    } else {
        Span::styled("•".repeat(form.stream_key.chars().count().min(16)), text_style)
    };

    let target = match (form.platform, resolve_rtmp_url(form)) {
        (Platform::Here, _) => Span::styled("watch in panel", style_muted()),
        (_, Some(url)) => Span::styled(mask_stream_key(&url), text_style),
        (Platform::Other, None) => Span::styled("custom URL required", style_muted()),
        (_, None) => Span::styled("stream key required", style_muted()),
    };

    let lines = vec![
        Line::from(platforms),
        Line::from(vec![Span::styled("relay    ", style_muted()), relay]),
        Line::from(vec![Span::styled("key      ", style_muted()), key]),
        Line::from(vec![Span::styled("target   ", style_muted()), target]),
    ];
    frame.render_widget(Paragraph::new(lines), inner);
}
