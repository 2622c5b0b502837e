//! FieldInput: a one-line text editor for the destination form.

use ratatui::crossterm::event::{Event, KeyCode, KeyEvent};
use ratatui::{
    layout::Rect,
    style::Style,
    text::{Line, Span},
    widgets::Paragraph,
    Frame,
};
use tui_input::{backend::crossterm::EventHandler, Input};

use crate::theme::{C_INPUT_BG, C_INPUT_FG, C_MUTED};

pub enum FieldAction {
    Confirmed(String),
    Cancelled,
    Editing,
}

pub struct FieldInput {
    input: Input,
    label: &'static str,
    active: bool,
}

impl FieldInput {
    pub fn new() -> Self {
        Self {
            input: Input::default(),
            label: "",
            active: false,
        }
    }

    /// Start editing `value` under `label`.
    pub fn open(&mut self, label: &'static str, value: &str) {
        self.input = Input::new(value.to_string());
        self.label = label;
        self.active = true;
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Enter confirms, Esc abandons the edit.
    pub fn handle_key(&mut self, key: KeyEvent) -> FieldAction {
        match key.code {
            KeyCode::Esc => {
                self.active = false;
                FieldAction::Cancelled
            }
            KeyCode::Enter => {
                self.active = false;
                FieldAction::Confirmed(self.input.value().to_string())
            }
            _ => {
                self.input.handle_event(&Event::Key(key));
                FieldAction::Editing
            }
        }
    }

    pub fn draw(&self, frame: &mut Frame, area: Rect) {
        let prefix = format!("{}: ", self.label);
        let width = area.width.saturating_sub(prefix.len() as u16 + 1) as usize;
        let scroll = self.input.visual_scroll(width);
        let value = self.input.value();
        let visible: String = value.chars().skip(scroll).collect();

        let line = Line::from(vec![
            Span::styled(prefix.clone(), Style::default().fg(C_MUTED)),
            Span::styled(visible, Style::default().fg(C_INPUT_FG)),
        ]);
        frame.render_widget(
            Paragraph::new(line).style(Style::default().bg(C_INPUT_BG)),
            area,
        );

        if self.active {
            let cursor_x =
                area.x + prefix.len() as u16 + self.input.visual_cursor().saturating_sub(scroll) as u16;
            frame.set_cursor_position((cursor_x.min(area.x + area.width - 1), area.y));
        }
    }
}

impl Default for FieldInput {
    fn default() -> Self {
        Self::new()
    }
}
