use tower_lsp_server::ls_types::Position;
use tower_lsp_server::ls_types::Range;

use crate::Span;

/// Maps between byte offsets and editor positions, which count columns in
/// UTF-16 code units.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LineIndex {
    line_starts: Vec<u32>,
    length: u32,
}

impl LineIndex {
    #[must_use]
    pub fn new(text: &str) -> Self {
        let mut line_starts = vec![0];
        let mut pos = 0;

        for c in text.chars() {
            pos += u32::try_from(c.len_utf8()).unwrap_or(0);
            if c == '\n' {
                line_starts.push(pos);
            }
        }

        Self {
            line_starts,
            length: pos,
        }
    }

    #[must_use]
    pub fn len(&self) -> u32 {
        self.length
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    #[must_use]
    pub fn line_count(&self) -> usize {
        self.line_starts.len()
    }

    /// Convert a UTF-16 position to a UTF-8 byte offset. Columns past the end
    /// of a line clamp to the line end.
    #[must_use]
    pub fn offset(&self, position: Position, text: &str) -> Option<u32> {
        let line_start = *self.line_starts.get(position.line as usize)?;
        if position.character == 0 {
            return Some(line_start);
        }

        let next_line_start = self
            .line_starts
            .get(position.line as usize + 1)
            .copied()
            .unwrap_or(self.length);
        let line_text = text.get(line_start as usize..next_line_start as usize)?;

        let mut utf16_pos = 0;
        let mut utf8_pos = 0;
        for c in line_text.chars() {
            if utf16_pos >= position.character || c == '\n' {
                break;
            }
            utf16_pos += u32::try_from(c.len_utf16()).unwrap_or(0);
            utf8_pos += u32::try_from(c.len_utf8()).unwrap_or(0);
        }

        Some(line_start + utf8_pos)
    }

    /// Convert a byte offset to a UTF-16 position. Offsets past the end of the
    /// text clamp to the end.
    #[must_use]
    pub fn position(&self, offset: u32, text: &str) -> Position {
        let offset = offset.min(self.length);
        let line = match self.line_starts.binary_search(&offset) {
            Ok(line) => line,
            Err(line) => line.saturating_sub(1),
        };
        let line_start = self.line_starts[line];

        let character = text
            .get(line_start as usize..offset as usize)
            .map_or(offset - line_start, |prefix| {
                prefix
                    .chars()
                    .map(|c| u32::try_from(c.len_utf16()).unwrap_or(0))
                    .sum()
            });

        Position::new(u32::try_from(line).unwrap_or(u32::MAX), character)
    }

    #[must_use]
    pub fn range(&self, span: Span, text: &str) -> Range {
        Range::new(
            self.position(span.start(), text),
            self.position(span.end(), text),
        )
    }
}
