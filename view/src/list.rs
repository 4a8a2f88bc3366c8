use ratatui::buffer::Buffer;
use ratatui::layout::Rect;
use ratatui::style::{Color, Modifier, Style};
use ratatui::widgets::Widget;

/// An indented, collapsible tree rendered as a flat list of rows.
///
/// The caller flattens its tree into [`TreeRow`]s (only the rows that are
/// currently visible) and keeps a [`ListState`] for selection and scroll.
/// Each row may carry a right-aligned note, used for channel annotations.
pub struct TreeList<'a> {
    rows: &'a [TreeRow<'a>],
    selected: usize,
    offset: usize,
    indent: u16,
    style: Style,
    selected_style: Style,
    note_style: Style,
    scrollbar: bool,
    scrollbar_style: Style,
    scrollbar_track_style: Style,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expander {
    Leaf,
    Collapsed,
    Expanded,
}

impl Expander {
    fn glyph(self) -> char {
        match self {
            Expander::Leaf => ' ',
            Expander::Collapsed => '▸',
            Expander::Expanded => '▾',
        }
    }
}

pub struct TreeRow<'a> {
    pub depth: usize,
    pub expander: Expander,
    pub label: &'a str,
    pub note: &'a str,
    pub style: Style,
}

impl<'a> TreeRow<'a> {
    pub fn new(depth: usize, expander: Expander, label: &'a str) -> Self {
        Self {
            depth,
            expander,
            label,
            note: "",
            style: Style::default(),
        }
    }

    pub fn note(mut self, note: &'a str) -> Self {
        self.note = note;
        self
    }

    pub fn style(mut self, style: Style) -> Self {
        self.style = style;
        self
    }
}

/// Manages selection and scroll offset for a list.
#[derive(Debug, Default, Clone)]
pub struct ListState {
    pub selected: usize,
    pub offset: usize,
    pub len: usize,
}

impl ListState {
    pub fn new(len: usize) -> Self {
        Self {
            selected: 0,
            offset: 0,
            len,
        }
    }

    /// Move selection down without wrapping. Returns true if moved.
    pub fn down(&mut self) -> bool {
        if self.len > 0 && self.selected < self.len - 1 {
            self.selected += 1;
            true
        } else {
            false
        }
    }

    /// Move selection up without wrapping. Returns true if moved.
    pub fn up(&mut self) -> bool {
        if self.selected > 0 {
            self.selected -= 1;
            true
        } else {
            false
        }
    }

    pub fn page_down(&mut self, n: usize) {
        if self.len > 0 {
            self.selected = (self.selected + n).min(self.len - 1);
        }
    }

    pub fn page_up(&mut self, n: usize) {
        self.selected = self.selected.saturating_sub(n);
    }

    /// Set the total number of items (clamps the selection).
    pub fn set_len(&mut self, len: usize) {
        self.len = len;
        if self.selected >= len {
            self.selected = len.saturating_sub(1);
        }
    }

    pub fn select(&mut self, index: usize) {
        self.selected = index.min(self.len.saturating_sub(1));
    }

    /// Ensure the selected item is visible given a viewport height.
    pub fn ensure_visible(&mut self, visible_height: usize) {
        if visible_height == 0 {
            return;
        }
        if self.selected < self.offset {
            self.offset = self.selected;
        } else if self.selected >= self.offset + visible_height {
            self.offset = self.selected - visible_height + 1;
        }
    }
}

impl<'a> TreeList<'a> {
    pub fn new(rows: &'a [TreeRow<'a>], state: &ListState) -> Self {
        Self {
            rows,
            selected: state.selected,
            offset: state.offset,
            indent: 2,
            style: Style::default(),
            selected_style: Style::default()
                .fg(Color::Black)
                .bg(Color::White)
                .add_modifier(Modifier::BOLD),
            note_style: Style::default().fg(Color::Cyan),
            scrollbar: true,
            scrollbar_style: Style::default().fg(Color::White),
            scrollbar_track_style: Style::default().fg(Color::DarkGray),
        }
    }

    pub fn indent(mut self, width: u16) -> Self {
        self.indent = width;
        self
    }

    pub fn selected_style(mut self, style: Style) -> Self {
        self.selected_style = style;
        self
    }

    pub fn note_style(mut self, style: Style) -> Self {
        self.note_style = style;
        self
    }

    pub fn scrollbar(mut self, show: bool) -> Self {
        self.scrollbar = show;
        self
    }
}

fn put(buf: &mut Buffer, x: u16, y: u16, ch: char, style: Style) {
    if let Some(cell) = buf.cell_mut((x, y)) {
        cell.set_char(ch);
        cell.set_style(style);
    }
}

impl Widget for TreeList<'_> {
    fn render(self, area: Rect, buf: &mut Buffer) {
        if area.height == 0 || area.width == 0 {
            return;
        }

        let visible = area.height as usize;
        let has_scrollbar = self.scrollbar && self.rows.len() > visible;
        let content_right = if has_scrollbar {
            area.right().saturating_sub(1)
        } else {
            area.right()
        };

        for (row_idx, row) in self.rows.iter().enumerate().skip(self.offset).take(visible) {
            let y = area.y + (row_idx - self.offset) as u16;
            let is_selected = row_idx == self.selected;
            let base = self.style.patch(row.style);
            let style = if is_selected {
                base.patch(self.selected_style)
            } else {
                base
            };

            if is_selected {
                for x in area.x..content_right {
                    put(buf, x, y, ' ', style);
                }
            }

            // Note first so a long label is the one that gets cut.
            let note_len = row.note.chars().count() as u16;
            let note_x = content_right.saturating_sub(note_len);
            let label_right = if note_len > 0 && note_x > area.x {
                for (i, ch) in row.note.chars().enumerate() {
                    let ns = if is_selected { style } else { self.note_style };
                    put(buf, note_x + i as u16, y, ch, ns);
                }
                note_x.saturating_sub(1)
            } else {
                content_right
            };

            let mut x = area.x.saturating_add(self.indent.saturating_mul(row.depth as u16));
            let glyph = row.expander.glyph();
            for ch in [glyph, ' '].into_iter().chain(row.label.chars()) {
                if x >= label_right {
                    break;
                }
                put(buf, x, y, ch, style);
                x += 1;
            }
        }

        if has_scrollbar {
            let sb_x = area.right() - 1;
            let total = self.rows.len();
            let thumb_size = ((visible * visible) / total).max(1);
            let max_offset = total - visible;
            let thumb_start = if max_offset > 0 {
                (self.offset.min(max_offset) * (visible - thumb_size)) / max_offset
            } else {
                0
            };

            for row in 0..visible {
                let y = area.y + row as u16;
                let in_thumb = row >= thumb_start && row < thumb_start + thumb_size;
                let (ch, style) = if in_thumb {
                    ('┃', self.scrollbar_style)
                } else {
                    ('│', self.scrollbar_track_style)
                };
                put(buf, sb_x, y, ch, style);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(buf: &Buffer, y: u16) -> String {
        (0..buf.area.width)
            .map(|x| buf[(x, y)].symbol().to_string())
            .collect()
    }

    #[test]
    fn renders_indent_expander_and_note() {
        let rows = [
            TreeRow::new(0, Expander::Expanded, "FluidSynth").note("0-2,9"),
            TreeRow::new(1, Expander::Collapsed, "GeneralUser"),
            TreeRow::new(2, Expander::Leaf, "000-000 Piano").note("0"),
        ];
        let state = ListState::new(rows.len());
        let area = Rect::new(0, 0, 24, 3);
        let mut buf = Buffer::empty(area);
        TreeList::new(&rows, &state).render(area, &mut buf);

        assert_eq!(line(&buf, 0), "▾ FluidSynth       0-2,9");
        assert_eq!(line(&buf, 1), "  ▸ GeneralUser         ");
        assert_eq!(line(&buf, 2), "      000-000 Piano    0");
    }

    #[test]
    fn long_labels_are_cut_before_the_note() {
        let rows = [TreeRow::new(0, Expander::Leaf, "a very long instrument name").note("15")];
        let state = ListState::new(1);
        let area = Rect::new(0, 0, 12, 1);
        let mut buf = Buffer::empty(area);
        TreeList::new(&rows, &state).render(area, &mut buf);
        assert_eq!(line(&buf, 0), "  a very  15");
    }

    #[test]
    fn state_clamps_and_scrolls() {
        let mut s = ListState::new(5);
        assert!(!s.up());
        s.page_down(10);
        assert_eq!(s.selected, 4);
        assert!(!s.down());
        s.ensure_visible(2);
        assert_eq!(s.offset, 3);
        s.set_len(2);
        assert_eq!(s.selected, 1);
        s.select(7);
        assert_eq!(s.selected, 1);
    }
}
