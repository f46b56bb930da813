use std::fmt::Write as _;

use vt100::{Callbacks, Cell, Color, Parser, Screen};

use super::DEFAULT_SCROLLBACK_LINES;

/// Narrowest grid the emulator can lay a wide character into
const MIN_COLS: u16 = 2;

/// Rendered terminal content (scrollback followed by the visible grid).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    /// ANSI formatted. Replaying it into a fresh buffer of the same size
    /// reproduces the same text and cursor.
    pub ansi: String,
    /// Same content without escape sequences; soft-wrapped rows are joined.
    pub text: String,
    pub cols: u16,
    pub rows: u16,
    /// (row, col) of the cursor within the visible grid
    pub cursor: (u16, u16),
}

/// Text attributes of a cell, or of the pen the terminal writes with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Pen {
    fg: Color,
    bg: Color,
    bold: bool,
    dim: bool,
    italic: bool,
    underline: bool,
    inverse: bool,
}

impl Default for Pen {
    fn default() -> Self {
        Self {
            fg: Color::Default,
            bg: Color::Default,
            bold: false,
            dim: false,
            italic: false,
            underline: false,
            inverse: false,
        }
    }
}

impl Pen {
    fn of_cell(cell: &Cell) -> Self {
        Self {
            fg: cell.fgcolor(),
            bg: cell.bgcolor(),
            bold: cell.bold(),
            dim: cell.dim(),
            italic: cell.italic(),
            underline: cell.underline(),
            inverse: cell.inverse(),
        }
    }

    fn of_screen(screen: &Screen) -> Self {
        Self {
            fg: screen.fgcolor(),
            bg: screen.bgcolor(),
            bold: screen.bold(),
            dim: screen.dim(),
            italic: screen.italic(),
            underline: screen.underline(),
            inverse: screen.inverse(),
        }
    }

    /// Full SGR sequence for this pen, starting from a reset.
    fn write_sgr(&self, out: &mut String) {
        out.push_str("\x1b[0");
        if self.bold {
            out.push_str(";1");
        }
        if self.dim {
            out.push_str(";2");
        }
        if self.italic {
            out.push_str(";3");
        }
        if self.underline {
            out.push_str(";4");
        }
        if self.inverse {
            out.push_str(";7");
        }
        write_color(out, self.fg, 30, 90, 38);
        write_color(out, self.bg, 40, 100, 48);
        out.push('m');
    }
}

fn write_color(out: &mut String, color: Color, base: u8, bright: u8, extended: u8) {
    // Writing into a String cannot fail
    let _ = match color {
        Color::Default => Ok(()),
        Color::Idx(n) if n < 8 => write!(out, ";{}", base + n),
        Color::Idx(n) if n < 16 => write!(out, ";{}", bright + n - 8),
        Color::Idx(n) => write!(out, ";{};5;{}", extended, n),
        Color::Rgb(r, g, b) => write!(out, ";{};2;{};{};{}", extended, r, g, b),
    };
}

/// One row of the rendered history.
struct RenderedRow {
    ansi: String,
    text: String,
    wrapped: bool,
}

impl RenderedRow {
    fn is_blank(&self) -> bool {
        self.text.is_empty()
    }
}

/// Render one row of the current viewport. Non-wrapped rows are trimmed
/// after their last cell that has content or a non-default style.
fn render_row(screen: &Screen, row: u16, cols: u16) -> RenderedRow {
    let wrapped = screen.row_wrapped(row);
    let default_pen = Pen::default();

    let end = if wrapped {
        cols
    } else {
        (0..cols)
            .rev()
            .find(|&col| {
                screen
                    .cell(row, col)
                    .is_some_and(|cell| cell.has_contents() || Pen::of_cell(cell) != default_pen)
            })
            .map_or(0, |col| col + 1)
    };

    let mut ansi = String::new();
    let mut text = String::new();
    let mut pen = default_pen;

    for col in 0..end {
        let Some(cell) = screen.cell(row, col) else {
            break;
        };
        if cell.is_wide_continuation() {
            continue;
        }

        let cell_pen = Pen::of_cell(cell);
        if cell_pen != pen {
            cell_pen.write_sgr(&mut ansi);
            pen = cell_pen;
        }

        if cell.has_contents() {
            ansi.push_str(cell.contents());
            text.push_str(cell.contents());
        } else {
            ansi.push(' ');
            text.push(' ');
        }
    }

    if pen != default_pen {
        ansi.push_str("\x1b[0m");
    }

    RenderedRow {
        ansi,
        text,
        wrapped,
    }
}

/// Keeps the window title, which the parser reports through callbacks.
#[derive(Debug, Default)]
struct TitleTracker {
    title: String,
}

impl Callbacks for TitleTracker {
    fn set_window_title(&mut self, _: &mut Screen, title: &[u8]) {
        self.title = String::from_utf8_lossy(title).into_owned();
    }
}

fn new_parser(cols: u16, rows: u16, scrollback_lines: usize, title: String) -> Parser<TitleTracker> {
    Parser::new_with_callbacks(rows, cols, scrollback_lines, TitleTracker { title })
}

/// Emulator state taken out of a [`ScreenBuffer`], rendered later.
#[derive(Clone)]
pub struct ScreenCapture {
    screen: Screen,
    title: String,
    cols: u16,
    rows: u16,
}

impl ScreenCapture {
    /// Render scrollback plus the visible grid.
    pub fn render(mut self) -> Snapshot {
        let cols = self.cols;
        let rows = usize::from(self.rows);
        let mut lines: Vec<RenderedRow> = Vec::new();

        self.screen.set_scrollback(usize::MAX);
        let mut offset = self.screen.scrollback();
        while offset > 0 {
            self.screen.set_scrollback(offset);
            let take = offset.min(rows);
            let screen = &self.screen;
            for row in 0..take {
                lines.push(render_row(screen, row as u16, cols));
            }
            offset -= take;
        }
        self.screen.set_scrollback(0);

        let screen = &self.screen;
        let (cursor_row, cursor_col) = screen.cursor_position();
        let mut visible: Vec<RenderedRow> = (0..self.rows)
            .map(|row| render_row(screen, row, cols))
            .collect();
        let last_used = visible.iter().rposition(|row| !row.is_blank()).unwrap_or(0);
        visible.truncate(last_used.max(usize::from(cursor_row)) + 1);

        let cursor_line = lines.len() + usize::from(cursor_row);
        lines.extend(visible);

        let mut ansi = String::new();
        let mut text = String::new();

        let title = &self.title;
        if !title.is_empty() {
            let _ = write!(ansi, "\x1b]2;{}\x07", title);
        }

        for (i, line) in lines.iter().enumerate() {
            ansi.push_str(&line.ansi);
            text.push_str(&line.text);
            if i + 1 < lines.len() && !line.wrapped {
                ansi.push_str("\r\n");
                text.push('\n');
            }
        }

        let up = lines.len().saturating_sub(1).saturating_sub(cursor_line);
        if up > 0 {
            let _ = write!(ansi, "\x1b[{}A", up);
        }
        ansi.push('\r');
        if cursor_col > 0 {
            let _ = write!(ansi, "\x1b[{}C", cursor_col);
        }

        let pen = Pen::of_screen(screen);
        if pen != Pen::default() {
            pen.write_sgr(&mut ansi);
        }

        Snapshot {
            ansi,
            text,
            cols: self.cols,
            rows: self.rows,
            cursor: (cursor_row, cursor_col),
        }
    }
}

/// Terminal screen state buffer: visible grid, bounded scrollback, cursor
/// and pen, fed with raw pty output.
pub struct ScreenBuffer {
    parser: Parser<TitleTracker>,
    scrollback_lines: usize,
    cols: u16,
    rows: u16,
}

impl ScreenBuffer {
    /// Create a new screen buffer
    pub fn new(cols: u16, rows: u16) -> Self {
        Self::with_scrollback(cols, rows, DEFAULT_SCROLLBACK_LINES)
    }

    pub fn with_scrollback(cols: u16, rows: u16, scrollback_lines: usize) -> Self {
        let cols = cols.max(MIN_COLS);
        let rows = rows.max(1);

        Self {
            parser: new_parser(cols, rows, scrollback_lines, String::new()),
            scrollback_lines,
            cols,
            rows,
        }
    }

    /// Interpret a chunk of raw output. Escape sequences and UTF-8 characters
    /// may be split across calls; unknown sequences are dropped.
    pub fn feed(&mut self, data: &[u8]) {
        self.parser.process(data);
    }

    /// Copy the emulator state so it can be rendered without holding on
    /// to the buffer.
    pub fn capture(&self) -> ScreenCapture {
        ScreenCapture {
            screen: self.parser.screen().clone(),
            title: self.parser.callbacks().title.clone(),
            cols: self.cols,
            rows: self.rows,
        }
    }

    /// Render scrollback plus the visible grid.
    pub fn snapshot(&self) -> Snapshot {
        self.capture().render()
    }

    /// Plain-text rendering of the same content as `snapshot`
    pub fn snapshot_text(&self) -> String {
        self.snapshot().text
    }

    /// Resize the grid. The primary screen is rebuilt by replaying its own
    /// snapshot at the new size, so rows pushed off the top land in
    /// scrollback and soft-wrapped lines reflow. The alternate screen is
    /// resized in place; its owner redraws on SIGWINCH.
    pub fn resize(&mut self, cols: u16, rows: u16) {
        let cols = cols.max(MIN_COLS);
        let rows = rows.max(1);
        if (cols, rows) == (self.cols, self.rows) {
            return;
        }

        if self.parser.screen().alternate_screen() {
            self.parser.screen_mut().set_size(rows, cols);
        } else {
            self.rebuild(cols, rows, self.scrollback_lines);
        }

        self.cols = cols;
        self.rows = rows;
    }

    /// Set scrollback buffer size. Existing history beyond the new bound is
    /// dropped oldest first.
    pub fn set_scrollback_lines(&mut self, lines: usize) {
        if lines == self.scrollback_lines {
            return;
        }
        self.rebuild(self.cols, self.rows, lines);
        self.scrollback_lines = lines;
    }

    fn rebuild(&mut self, cols: u16, rows: u16, scrollback_lines: usize) {
        let replay = self.snapshot().ansi;
        let title = self.parser.callbacks().title.clone();
        let mut parser = new_parser(cols, rows, scrollback_lines, title);
        parser.process(replay.as_bytes());
        self.parser = parser;
    }

    /// Number of rows currently held in scrollback.
    pub fn scrollback_len(&mut self) -> usize {
        self.parser.screen_mut().set_scrollback(usize::MAX);
        let len = self.parser.screen().scrollback();
        self.parser.screen_mut().set_scrollback(0);
        len
    }

    /// Get cursor position (row, col)
    pub fn cursor_position(&self) -> (u16, u16) {
        self.parser.screen().cursor_position()
    }

    /// Get terminal size (cols, rows)
    pub fn size(&self) -> (u16, u16) {
        (self.cols, self.rows)
    }

    /// Last title set through OSC 0/2, if any
    pub fn title(&self) -> Option<&str> {
        let title = self.parser.callbacks().title.as_str();
        (!title.is_empty()).then_some(title)
    }

    /// Get the underlying parser screen for rendering
    pub fn screen(&self) -> &Screen {
        self.parser.screen()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    fn lines(n: usize) -> Vec<u8> {
        (0..n)
            .map(|i| format!("line {}\r\n", i))
            .collect::<String>()
            .into_bytes()
    }

    #[test]
    fn plain_output_lands_in_text() {
        let mut buffer = ScreenBuffer::new(80, 24);
        buffer.feed(b"hello\r\nworld");

        let snapshot = buffer.snapshot();
        assert_eq!(snapshot.text, "hello\nworld");
        assert_eq!(snapshot.cursor, (1, 5));
    }

    #[test]
    fn carriage_return_overwrites() {
        let mut buffer = ScreenBuffer::new(80, 24);
        buffer.feed(b"abc\rX");
        assert_eq!(buffer.snapshot().text, "Xbc");
    }

    #[test]
    fn cursor_movement_places_text() {
        let mut buffer = ScreenBuffer::new(20, 5);
        buffer.feed(b"\x1b[3;5HZ");

        let snapshot = buffer.snapshot();
        assert_eq!(snapshot.text, "\n\n    Z");
        assert_eq!(snapshot.cursor, (2, 5));
    }

    #[test]
    fn sgr_styles_are_rendered_and_reset() {
        let mut buffer = ScreenBuffer::new(40, 5);
        buffer.feed(b"\x1b[1;31mred\x1b[0m plain");

        let snapshot = buffer.snapshot();
        assert_eq!(snapshot.text, "red plain");
        assert!(snapshot.ansi.contains("\x1b[0;1;31mred\x1b[0m plain"));
    }

    #[test]
    fn extended_colors_round_trip_through_ansi() {
        let mut buffer = ScreenBuffer::new(40, 5);
        buffer.feed(b"\x1b[38;5;200mA\x1b[48;2;1;2;3mB\x1b[m");

        let snapshot = buffer.snapshot();
        assert!(snapshot.ansi.contains("\x1b[0;38;5;200mA"));
        assert!(snapshot.ansi.contains("\x1b[0;38;5;200;48;2;1;2;3mB"));
    }

    #[test]
    fn clear_screen_empties_visible_grid() {
        let mut buffer = ScreenBuffer::new(20, 5);
        buffer.feed(b"one\r\ntwo\x1b[2J\x1b[H");

        let snapshot = buffer.snapshot();
        assert_eq!(snapshot.text, "");
        assert_eq!(snapshot.cursor, (0, 0));
    }

    #[test]
    fn rows_scrolled_off_move_into_scrollback() {
        let mut buffer = ScreenBuffer::with_scrollback(20, 3, 100);
        buffer.feed(&lines(10));

        assert_eq!(buffer.scrollback_len(), 8);
        let text = buffer.snapshot().text;
        for i in 0..10 {
            assert!(text.contains(&format!("line {}", i)), "missing line {}", i);
        }
    }

    #[test]
    fn scrollback_evicts_oldest_first() {
        let mut buffer = ScreenBuffer::with_scrollback(20, 3, 5);
        buffer.feed(&lines(20));

        assert_eq!(buffer.scrollback_len(), 5);
        let text = buffer.snapshot().text;
        assert!(!text.contains("line 12"));
        assert!(text.contains("line 13"));
        assert!(text.contains("line 19"));
    }

    #[test]
    fn scroll_region_keeps_rows_outside_it() {
        let mut buffer = ScreenBuffer::with_scrollback(20, 4, 100);
        // Header on row 0, scroll region rows 2..4
        buffer.feed(b"header\x1b[2;4r\x1b[2;1Ha\r\nb\r\nc\r\nd");

        let text = buffer.snapshot().text;
        assert!(text.starts_with("header\n"));
        assert!(text.ends_with("b\nc\nd"));
        assert!(!text.lines().any(|line| line == "a"));
    }

    #[test]
    fn malformed_sequences_do_not_corrupt_later_output() {
        let mut buffer = ScreenBuffer::new(40, 5);
        buffer.feed(b"\x1b[?999;;;;;999999999999h\x1b[\x1b]not-terminated\x07");
        buffer.feed(b"\x1b#9\x1bPignored\x1b\\visible");

        assert!(buffer.snapshot().text.ends_with("visible"));
    }

    #[test]
    fn utf8_split_across_chunks_is_reassembled() {
        let mut buffer = ScreenBuffer::new(40, 5);
        let bytes = "héllo ✓".as_bytes();
        buffer.feed(&bytes[..2]);
        buffer.feed(&bytes[2..9]);
        buffer.feed(&bytes[9..]);

        assert_eq!(buffer.snapshot().text, "héllo ✓");
    }

    #[test]
    fn soft_wrapped_rows_join_into_one_line() {
        let mut buffer = ScreenBuffer::new(10, 5);
        buffer.feed(b"abcdefghijklmnopqrstuvwxy");

        let snapshot = buffer.snapshot();
        assert_eq!(snapshot.text, "abcdefghijklmnopqrstuvwxy");
        assert_eq!(snapshot.cursor, (2, 5));
    }

    #[test]
    fn snapshot_replays_into_identical_buffer() {
        let mut original = ScreenBuffer::with_scrollback(30, 6, 100);
        original.feed(&lines(12));
        original.feed(b"\x1b[32mgreen\x1b[0m and \x1b[7minverse\x1b[0m\r\n$ ");
        let first = original.snapshot();

        let mut replayed = ScreenBuffer::with_scrollback(30, 6, 100);
        replayed.feed(first.ansi.as_bytes());
        let second = replayed.snapshot();

        assert_eq!(second.text, first.text);
        assert_eq!(second.ansi, first.ansi);
        assert_eq!(second.cursor, first.cursor);
    }

    #[test]
    fn snapshot_is_read_idempotent() {
        let mut buffer = ScreenBuffer::with_scrollback(20, 3, 50);
        buffer.feed(&lines(9));
        assert_eq!(buffer.snapshot(), buffer.snapshot());
        assert_eq!(buffer.cursor_position(), (2, 0));
    }

    #[test]
    fn resize_larger_preserves_all_lines() {
        let mut buffer = ScreenBuffer::with_scrollback(40, 5, 1000);
        buffer.feed(&lines(30));
        buffer.resize(120, 40);

        assert_eq!(buffer.size(), (120, 40));
        let text = buffer.snapshot().text;
        for i in 0..30 {
            assert!(text.contains(&format!("line {}", i)), "missing line {}", i);
        }
    }

    #[test]
    fn resize_smaller_pushes_rows_into_scrollback() {
        let mut buffer = ScreenBuffer::with_scrollback(40, 10, 1000);
        buffer.feed(b"a\r\nb\r\nc\r\nd\r\ne\r\nf\r\n$ ");
        buffer.resize(40, 3);

        let snapshot = buffer.snapshot();
        assert_eq!(snapshot.text, "a\nb\nc\nd\ne\nf\n$ ");
        assert_eq!(snapshot.cursor, (2, 2));
        assert_eq!(buffer.scrollback_len(), 4);
    }

    #[test]
    fn resize_narrower_reflows_wrapped_lines() {
        let mut buffer = ScreenBuffer::with_scrollback(20, 5, 100);
        buffer.feed(b"0123456789abcdefghij-tail");
        buffer.resize(10, 5);

        assert_eq!(buffer.snapshot().text, "0123456789abcdefghij-tail");
    }

    #[test]
    fn title_is_tracked() {
        let mut buffer = ScreenBuffer::new(20, 5);
        assert_eq!(buffer.title(), None);
        buffer.feed(b"\x1b]2;build\x07");
        assert_eq!(buffer.title(), Some("build"));
        assert!(buffer.snapshot().ansi.starts_with("\x1b]2;build\x07"));
    }

    #[test]
    fn capture_renders_state_at_capture_time() {
        let mut buffer = ScreenBuffer::with_scrollback(10, 2, 100);
        buffer.feed(b"\x1b]2;old\x07one\r\ntwo\r\nthree");
        let capture = buffer.capture();

        buffer.feed(b"\x1b]2;new\x07\r\nfour");
        let earlier = capture.render();
        assert_eq!(earlier.text, "one\ntwo\nthree");
        assert!(earlier.ansi.starts_with("\x1b]2;old\x07"));
        assert_eq!(buffer.scrollback_len(), 2);
        assert_eq!(buffer.snapshot().text, "one\ntwo\nthree\nfour");
    }

    #[test]
    fn zero_size_is_clamped() {
        let mut buffer = ScreenBuffer::new(0, 0);
        assert_eq!(buffer.size(), (2, 1));
        buffer.resize(0, 0);
        assert_eq!(buffer.size(), (2, 1));
        buffer.feed("宽字".as_bytes());
    }

    proptest! {
        #[test]
        fn same_bytes_give_same_snapshot(bytes in proptest::collection::vec(any::<u8>(), 0..2048)) {
            let mut a = ScreenBuffer::with_scrollback(24, 6, 50);
            let mut b = ScreenBuffer::with_scrollback(24, 6, 50);
            a.feed(&bytes);
            b.feed(&bytes);
            prop_assert_eq!(a.snapshot(), b.snapshot());
        }

        #[test]
        fn chunk_boundaries_do_not_matter(
            bytes in proptest::collection::vec(any::<u8>(), 0..1024),
            split in any::<proptest::sample::Index>(),
        ) {
            let at = split.index(bytes.len() + 1);
            let mut whole = ScreenBuffer::with_scrollback(24, 6, 50);
            let mut chunked = ScreenBuffer::with_scrollback(24, 6, 50);
            whole.feed(&bytes);
            chunked.feed(&bytes[..at]);
            chunked.feed(&bytes[at..]);
            prop_assert_eq!(whole.snapshot(), chunked.snapshot());
        }
    }
}
