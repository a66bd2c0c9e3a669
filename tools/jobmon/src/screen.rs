use crate::banner::fit_banner;
use crate::task::StatusUpdate;
use ratatui::buffer::Buffer;
use ratatui::layout::Rect;
use ratatui::style::{Modifier, Style};
use ratatui::widgets::Widget;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatusLine {
    pub text: String,
    pub emphasized: bool,
}

/// What the render actor believes is on the terminal. Row 0 is the banner;
/// line index `i` is drawn on row `height - 1 - i`, so line 0 sits at the
/// bottom and higher indices stack upward until they run off the top.
#[derive(Debug, Clone)]
pub struct VirtualScreen {
    width: u16,
    height: u16,
    title: String,
    help: String,
    lines: Vec<StatusLine>,
}

impl VirtualScreen {
    pub fn new(title: impl Into<String>, help: impl Into<String>) -> Self {
        Self {
            width: 0,
            height: 0,
            title: title.into(),
            help: help.into(),
            lines: Vec::new(),
        }
    }

    pub fn resize(&mut self, width: u16, height: u16) {
        self.width = width;
        self.height = height;
    }

    pub fn help(&self) -> &str {
        &self.help
    }

    pub fn set_help(&mut self, help: impl Into<String>) {
        self.help = help.into();
    }

    pub fn banner(&self) -> String {
        fit_banner(usize::from(self.width), &self.title, &self.help)
    }

    pub fn line(&self, idx: usize) -> Option<&StatusLine> {
        self.lines.get(idx)
    }

    pub fn line_count(&self) -> usize {
        self.lines.len()
    }

    /// Applies a status update and returns the screen row it lands on, if
    /// that row is visible.
    pub fn apply(&mut self, idx: usize, update: StatusUpdate) -> Option<u16> {
        if idx >= self.lines.len() {
            self.lines.resize_with(idx + 1, StatusLine::default);
        }
        let line = &mut self.lines[idx];
        match update {
            StatusUpdate::Text(text) => line.text = text,
            StatusUpdate::Settle => line.emphasized = false,
        }
        self.row_for(idx)
    }

    pub fn emphasize_all(&mut self) {
        for line in &mut self.lines {
            line.emphasized = true;
        }
    }

    pub fn row_for(&self, idx: usize) -> Option<u16> {
        let bottom = usize::from(self.height).checked_sub(1)?;
        let row = bottom.checked_sub(idx)?;
        if row < 1 {
            return None;
        }
        u16::try_from(row).ok()
    }

    fn line_for_row(&self, row: u16) -> Option<&StatusLine> {
        let idx = usize::from(self.height).checked_sub(1)?.checked_sub(usize::from(row))?;
        self.lines.get(idx)
    }
}

impl Widget for &VirtualScreen {
    fn render(self, area: Rect, buf: &mut Buffer) {
        if area.height == 0 || area.width == 0 {
            return;
        }
        buf.set_stringn(
            area.x,
            area.y,
            self.banner(),
            usize::from(area.width),
            Style::default().add_modifier(Modifier::REVERSED),
        );

        // Keep the last column free so a full line never wraps the cursor.
        let max = usize::from(area.width.saturating_sub(1));
        for row in 1..area.height {
            let Some(line) = self.line_for_row(row) else {
                continue;
            };
            let style = if line.emphasized {
                Style::default().add_modifier(Modifier::BOLD)
            } else {
                Style::default()
            };
            buf.set_stringn(area.x, area.y + row, &line.text, max, style);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::VirtualScreen;
    use crate::task::StatusUpdate;
    use ratatui::buffer::Buffer;
    use ratatui::layout::Rect;
    use ratatui::style::Modifier;
    use ratatui::widgets::Widget;

    fn row_text(buf: &Buffer, row: u16) -> String {
        (0..buf.area.width)
            .map(|x| buf[(x, row)].symbol().to_string())
            .collect::<String>()
            .trim_end()
            .to_string()
    }

    #[test]
    fn last_report_wins_for_a_line() {
        let mut screen = VirtualScreen::new("", "Press ESC to stop.");
        screen.resize(40, 6);
        for text in ["fetching a", "fetching b", "fetching c"] {
            screen.apply(2, StatusUpdate::Text(text.to_string()));
        }
        assert_eq!(screen.line(2).map(|l| l.text.as_str()), Some("fetching c"));
        assert_eq!(screen.line_count(), 3);
    }

    #[test]
    fn rows_count_up_from_the_bottom_and_skip_banner() {
        let mut screen = VirtualScreen::new("", "help");
        screen.resize(20, 4);
        assert_eq!(screen.apply(0, StatusUpdate::Text("a".into())), Some(3));
        assert_eq!(screen.apply(2, StatusUpdate::Text("c".into())), Some(1));
        assert_eq!(screen.apply(3, StatusUpdate::Text("d".into())), None);
        assert_eq!(screen.apply(9, StatusUpdate::Text("z".into())), None);
    }

    #[test]
    fn settle_clears_emphasis_but_keeps_text() {
        let mut screen = VirtualScreen::new("", "help");
        screen.resize(20, 4);
        screen.apply(0, StatusUpdate::Text("working".into()));
        screen.emphasize_all();
        assert!(screen.line(0).map(|l| l.emphasized).unwrap_or(false));
        screen.apply(0, StatusUpdate::Settle);
        let line = screen.line(0).expect("line");
        assert!(!line.emphasized);
        assert_eq!(line.text, "working");
    }

    #[test]
    fn render_draws_reversed_banner_and_truncated_rows() {
        let mut screen = VirtualScreen::new("Batch", "Press ESC to stop.");
        screen.resize(30, 3);
        screen.apply(0, StatusUpdate::Text("x".repeat(50)));
        screen.apply(1, StatusUpdate::Text("second".into()));
        screen.emphasize_all();

        let area = Rect::new(0, 0, 30, 3);
        let mut buf = Buffer::empty(area);
        (&screen).render(area, &mut buf);

        assert_eq!(row_text(&buf, 0), "  Batch. Press ESC to stop.");
        assert!(buf[(0, 0)].modifier.contains(Modifier::REVERSED));
        assert_eq!(row_text(&buf, 1), "second");
        assert_eq!(row_text(&buf, 2), "x".repeat(29));
        assert!(buf[(0, 2)].modifier.contains(Modifier::BOLD));
    }
}
