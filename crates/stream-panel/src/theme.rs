//! Color palette and style helpers for the control panel.

use ratatui::style::{Color, Modifier, Style};
use stream_panel::log::Severity;
use stream_panel::reconcile::{BatteryLevel, Tone};

pub const C_ACCENT: Color = Color::Rgb(255, 95, 95);
pub const C_LIVE: Color = Color::Rgb(80, 200, 120);
pub const C_BUSY: Color = Color::Rgb(255, 184, 80);
pub const C_ERROR: Color = Color::Rgb(255, 80, 80);
pub const C_MUTED: Color = Color::Rgb(72, 72, 88);
pub const C_SEPARATOR: Color = Color::Rgb(40, 40, 52);
pub const C_SECONDARY: Color = Color::Rgb(115, 115, 138);
pub const C_PRIMARY: Color = Color::Rgb(210, 210, 225);
pub const C_PANEL_BORDER: Color = Color::Rgb(40, 40, 52);
pub const C_PANEL_BORDER_FOCUSED: Color = Color::Rgb(120, 100, 200);
pub const C_INPUT_BG: Color = Color::Rgb(20, 20, 32);
pub const C_INPUT_FG: Color = Color::Rgb(255, 200, 80);
pub const C_INFO: Color = Color::Rgb(80, 160, 220);
pub const C_SELECTION_BG: Color = Color::Rgb(28, 28, 40);

pub fn style_default() -> Style {
    Style::default().fg(C_PRIMARY)
}

pub fn style_secondary() -> Style {
    Style::default().fg(C_SECONDARY)
}

pub fn style_muted() -> Style {
    Style::default().fg(C_MUTED)
}

pub fn style_selected() -> Style {
    Style::default()
        .bg(C_SELECTION_BG)
        .fg(C_PRIMARY)
        .add_modifier(Modifier::BOLD)
}

pub fn style_border(focused: bool) -> Style {
    if focused {
        Style::default().fg(C_PANEL_BORDER_FOCUSED)
    } else {
        Style::default().fg(C_PANEL_BORDER)
    }
}

pub fn tone_color(tone: Tone) -> Color {
    match tone {
        Tone::Idle => C_SECONDARY,
        Tone::Busy => C_BUSY,
        Tone::Live => C_LIVE,
        Tone::Error => C_ERROR,
    }
}

pub fn severity_color(severity: Severity) -> Color {
    match severity {
        Severity::Info => C_INFO,
        Severity::Success => C_LIVE,
        Severity::Warning => C_BUSY,
        Severity::Error => C_ACCENT,
    }
}

pub fn battery_color(level: BatteryLevel) -> Color {
    match level {
        BatteryLevel::Unknown => C_MUTED,
        BatteryLevel::Low => C_ERROR,
        BatteryLevel::Medium => C_BUSY,
        BatteryLevel::Normal => C_LIVE,
    }
}
