use ratatui::buffer::Buffer;
use ratatui::layout::Rect;
use ratatui::style::{Color, Style};
use ratatui::widgets::Widget;

/// A single-row bar: a message on the left, segments packed from the right.
///
/// Right-hand segments win when space runs out; the message is truncated.
pub struct StatusBar<'a> {
    message: &'a str,
    message_style: Style,
    segments: Vec<(&'a str, Style)>,
    separator: &'a str,
    style: Style,
}

impl<'a> StatusBar<'a> {
    pub fn new(message: &'a str) -> Self {
        Self {
            message,
            message_style: Style::default().fg(Color::White),
            segments: Vec::new(),
            separator: " │ ",
            style: Style::default().fg(Color::DarkGray),
        }
    }

    pub fn message_style(mut self, style: Style) -> Self {
        self.message_style = style;
        self
    }

    /// Append a right-aligned segment; segments render in insertion order.
    pub fn segment(mut self, text: &'a str, style: Style) -> Self {
        self.segments.push((text, style));
        self
    }

    pub fn separator(mut self, sep: &'a str) -> Self {
        self.separator = sep;
        self
    }

    fn right_width(&self) -> u16 {
        let sep = self.separator.chars().count();
        let text: usize = self.segments.iter().map(|(t, _)| t.chars().count()).sum();
        let seps = sep * self.segments.len().saturating_sub(1);
        (text + seps).min(u16::MAX as usize) as u16
    }
}

impl Widget for StatusBar<'_> {
    fn render(self, area: Rect, buf: &mut Buffer) {
        if area.height == 0 || area.width == 0 {
            return;
        }
        let y = area.y;
        let mut put = |x: u16, ch: char, style: Style| {
            if let Some(cell) = buf.cell_mut((x, y)) {
                cell.set_char(ch);
                cell.set_style(style);
            }
        };

        let right_w = self.right_width().min(area.width);
        let right_x = area.right() - right_w;

        let mut x = right_x;
        for (i, &(text, style)) in self.segments.iter().enumerate() {
            if i > 0 {
                for ch in self.separator.chars() {
                    if x >= area.right() {
                        break;
                    }
                    put(x, ch, self.style);
                    x += 1;
                }
            }
            for ch in text.chars() {
                if x >= area.right() {
                    break;
                }
                put(x, ch, style);
                x += 1;
            }
        }

        let message_right = if right_w > 0 { right_x.saturating_sub(1) } else { area.right() };
        let mut x = area.x;
        for ch in self.message.chars() {
            if x >= message_right {
                break;
            }
            put(x, ch, self.message_style);
            x += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn render(bar: StatusBar<'_>, width: u16) -> String {
        let area = Rect::new(0, 0, width, 1);
        let mut buf = Buffer::empty(area);
        bar.render(area, &mut buf);
        (0..width).map(|x| buf[(x, 0)].symbol().to_string()).collect()
    }

    #[test]
    fn packs_segments_right() {
        let bar = StatusBar::new("reloaded")
            .segment("ch 9", Style::default())
            .segment("120 bpm", Style::default());
        assert_eq!(render(bar, 30), "reloaded        ch 9 │ 120 bpm");
    }

    #[test]
    fn message_gives_way() {
        let bar = StatusBar::new("a long message here").segment("ch 0", Style::default());
        assert_eq!(render(bar, 12), "a long  ch 0");
    }
}
