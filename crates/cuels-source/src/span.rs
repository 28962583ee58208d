/// A half-open byte range within a source text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub struct Span {
    start: u32,
    length: u32,
}

impl Span {
    #[must_use]
    pub fn new(start: u32, length: u32) -> Self {
        Self { start, length }
    }

    /// Construct a span from integer bounds expressed as byte offsets.
    #[must_use]
    pub fn from_bounds(start: usize, end: usize) -> Self {
        let start_u32 = u32::try_from(start).unwrap_or(u32::MAX);
        let end_u32 = u32::try_from(end).unwrap_or(u32::MAX);
        Self::new(start_u32, end_u32.saturating_sub(start_u32))
    }

    /// The smallest span covering both `self` and `other`.
    #[must_use]
    pub fn cover(self, other: Span) -> Self {
        let start = self.start.min(other.start);
        let end = self.end().max(other.end());
        Self::new(start, end - start)
    }

    #[must_use]
    pub fn start(self) -> u32 {
        self.start
    }

    #[must_use]
    pub fn end(self) -> u32 {
        self.start.saturating_add(self.length)
    }

    #[must_use]
    pub fn length(self) -> u32 {
        self.length
    }

    #[must_use]
    pub fn is_empty(self) -> bool {
        self.length == 0
    }

    #[must_use]
    pub fn contains(self, offset: u32) -> bool {
        self.start <= offset && offset < self.end()
    }

    /// Like [`Span::contains`] but also accepts the offset one past the end,
    /// which is where an editor cursor sits after typing an identifier.
    #[must_use]
    pub fn touches(self, offset: u32) -> bool {
        self.start <= offset && offset <= self.end()
    }

    #[must_use]
    pub fn as_range(self) -> std::ops::Range<usize> {
        self.start as usize..self.end() as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_bounds() {
        let span = Span::from_bounds(4, 10);
        assert_eq!(span.start(), 4);
        assert_eq!(span.length(), 6);
        assert_eq!(span.end(), 10);
    }

    #[test]
    fn test_contains_is_half_open() {
        let span = Span::new(2, 3);
        assert!(!span.contains(1));
        assert!(span.contains(2));
        assert!(span.contains(4));
        assert!(!span.contains(5));
        assert!(span.touches(5));
    }

    #[test]
    fn test_cover() {
        let a = Span::new(2, 3);
        let b = Span::new(10, 1);
        assert_eq!(a.cover(b), Span::from_bounds(2, 11));
    }
}
