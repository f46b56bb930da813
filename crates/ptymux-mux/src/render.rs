use ratatui::{
    buffer::Buffer,
    layout::{Constraint, Direction, Layout, Position, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Clear, Paragraph, Widget},
    Frame,
};

use crate::app::{Mux, Pane};
use crate::keys::describe_key;

const FOCUSED: Color = Color::Cyan;
const UNFOCUSED: Color = Color::Gray;
const EXITED: Color = Color::DarkGray;

/// Draw every pane, then the help popup if it is open.
pub fn draw(frame: &mut Frame, mux: &Mux) {
    let focused = mux.focused();

    for (index, (pane, rect)) in mux.panes().iter().zip(mux.rects()).enumerate() {
        let is_focused = focused == Some(index);
        frame.render_widget(PaneView::new(pane, is_focused), *rect);

        if is_focused {
            if let Some(position) = cursor_position(pane, *rect) {
                frame.set_cursor_position(position);
            }
        }
    }

    if mux.show_help() {
        render_help(frame, &describe_key(mux.prefix()));
    }
}

/// Area left for the terminal once the border is drawn
pub fn pane_inner(rect: Rect) -> Rect {
    Block::bordered().inner(rect)
}

pub fn pane_title(title: &str, exit_code: Option<i32>) -> String {
    match exit_code {
        Some(code) => format!(" {} [exited {}] ", title, code),
        None => format!(" {} ", title),
    }
}

fn pane_block(title: &str, exit_code: Option<i32>, focused: bool) -> Block<'static> {
    let style = match (exit_code, focused) {
        (Some(_), _) => Style::default().fg(EXITED).add_modifier(Modifier::DIM),
        (None, true) => Style::default().fg(FOCUSED).add_modifier(Modifier::BOLD),
        (None, false) => Style::default().fg(UNFOCUSED),
    };
    Block::bordered()
        .title(pane_title(title, exit_code))
        .border_style(style)
        .title_style(style)
}

/// One pane: border, title and the live terminal screen inside.
pub struct PaneView<'a> {
    pane: &'a Pane,
    focused: bool,
}

impl<'a> PaneView<'a> {
    pub fn new(pane: &'a Pane, focused: bool) -> Self {
        Self { pane, focused }
    }
}

impl Widget for PaneView<'_> {
    fn render(self, area: Rect, buf: &mut Buffer) {
        let block = pane_block(&self.pane.title(), self.pane.exit_code(), self.focused);
        let inner = block.inner(area);
        block.render(area, buf);

        self.pane
            .session()
            .hub()
            .with_buffer(|screen| draw_screen(screen.screen(), inner, buf));
    }
}

fn cursor_position(pane: &Pane, rect: Rect) -> Option<Position> {
    if pane.is_exited() {
        return None;
    }
    let inner = pane_inner(rect);
    let (row, col) = pane.session().hub().with_buffer(|screen| {
        let screen = screen.screen();
        (!screen.hide_cursor()).then(|| screen.cursor_position())
    })?;
    (row < inner.height && col < inner.width).then(|| Position::new(inner.x + col, inner.y + row))
}

/// Copy the visible part of a terminal screen into `area`. Anything that
/// does not fit is clipped.
pub fn draw_screen(screen: &vt100::Screen, area: Rect, buf: &mut Buffer) {
    let (rows, cols) = screen.size();

    for row in 0..area.height.min(rows) {
        for col in 0..area.width.min(cols) {
            let Some(cell) = screen.cell(row, col) else {
                continue;
            };
            if cell.is_wide_continuation() {
                continue;
            }
            let Some(target) = buf.cell_mut((area.x + col, area.y + row)) else {
                continue;
            };

            let contents = cell.contents();
            target
                .set_symbol(if contents.is_empty() { " " } else { contents })
                .set_style(cell_style(cell));
        }
    }
}

fn cell_style(cell: &vt100::Cell) -> Style {
    let mut modifier = Modifier::empty();
    if cell.bold() {
        modifier |= Modifier::BOLD;
    }
    if cell.dim() {
        modifier |= Modifier::DIM;
    }
    if cell.italic() {
        modifier |= Modifier::ITALIC;
    }
    if cell.underline() {
        modifier |= Modifier::UNDERLINED;
    }
    if cell.inverse() {
        modifier |= Modifier::REVERSED;
    }

    Style::default()
        .fg(convert_color(cell.fgcolor()))
        .bg(convert_color(cell.bgcolor()))
        .add_modifier(modifier)
}

fn convert_color(color: vt100::Color) -> Color {
    match color {
        vt100::Color::Default => Color::Reset,
        vt100::Color::Idx(index) => Color::Indexed(index),
        vt100::Color::Rgb(r, g, b) => Color::Rgb(r, g, b),
    }
}

/// Helper function to create a centered rect
fn centered_rect(percent_x: u16, percent_y: u16, r: Rect) -> Rect {
    let popup_layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage((100 - percent_y) / 2),
            Constraint::Percentage(percent_y),
            Constraint::Percentage((100 - percent_y) / 2),
        ])
        .split(r);

    Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage((100 - percent_x) / 2),
            Constraint::Percentage(percent_x),
            Constraint::Percentage((100 - percent_x) / 2),
        ])
        .split(popup_layout[1])[1]
}

fn help_lines(prefix: &str) -> Vec<Line<'static>> {
    let binding = |keys: String, what: &'static str| {
        Line::from(vec![
            Span::styled(format!("  {:<14}", keys), Style::default().fg(Color::Yellow)),
            Span::raw(what),
        ])
    };

    vec![
        Line::from(Span::styled(
            "Keyboard Shortcuts",
            Style::default().fg(FOCUSED).add_modifier(Modifier::BOLD),
        )),
        Line::from(""),
        binding(format!("{} n/→/Tab", prefix), "Next pane"),
        binding(format!("{} p/←", prefix), "Previous pane"),
        binding(format!("{} ?", prefix), "Toggle this help"),
        binding(format!("{} q", prefix), "Quit"),
        binding(format!("{} {}", prefix, prefix), "Send the prefix key"),
        binding("C-c C-c".to_string(), "Quit (pressed within a second)"),
    ]
}

fn render_help(frame: &mut Frame, prefix: &str) {
    let area = centered_rect(60, 50, frame.area());
    let popup = Paragraph::new(help_lines(prefix)).block(
        Block::bordered()
            .title(Span::styled(" Help ", Style::default().fg(FOCUSED)))
            .border_style(Style::default().fg(FOCUSED)),
    );

    frame.render_widget(Clear, area);
    frame.render_widget(popup, area);
}
