//! Quote tracking for character-level SQL scanning.

/// The kind of quoted region a scanner is currently inside.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QuoteMode {
    /// Not quoted.
    #[default]
    None,
    /// Inside a `'string literal'`.
    Single,
    /// Inside a `"quoted identifier"`.
    Double,
    /// Inside a `[bracketed identifier]`.
    Bracket,
    /// Inside a `` `backtick identifier` ``.
    Backtick,
}

impl QuoteMode {
    /// Advance the mode over one byte.
    ///
    /// A doubled quote (`''`) closes and immediately reopens the region, which
    /// leaves the mode unchanged across the pair.
    #[inline]
    pub fn on_char(self, c: u8) -> Self {
        match (self, c) {
            (Self::None, b'\'') => Self::Single,
            (Self::None, b'"') => Self::Double,
            (Self::None, b'[') => Self::Bracket,
            (Self::None, b'`') => Self::Backtick,
            (Self::Single, b'\'') | (Self::Double, b'"') => Self::None,
            (Self::Bracket, b']') | (Self::Backtick, b'`') => Self::None,
            (mode, _) => mode,
        }
    }

    /// Whether the scanner is outside any quoted region.
    #[inline]
    pub fn is_unquoted(self) -> bool {
        self == Self::None
    }
}
