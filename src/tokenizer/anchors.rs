use std::borrow::Cow;
use std::fmt;

/// Which of `\A` and `\G` can match at the current position.
/// `\A` only makes sense on the first line of the document and `\G` only right where
/// the last region began.
#[derive(Copy, Clone, PartialEq, Hash, Eq)]
pub enum AnchorActive {
    /// Only \A is active
    A,
    /// Only \G is active
    G,
    /// Both \A and \G are active
    AG,
    /// Neither \A nor \G are active
    None,
}

impl AnchorActive {
    pub fn new(is_first_line: bool, anchor_position: Option<usize>, current_pos: usize) -> Self {
        let g_active = anchor_position == Some(current_pos);

        match (is_first_line, g_active) {
            (true, true) => AnchorActive::AG,
            (true, false) => AnchorActive::A,
            (false, true) => AnchorActive::G,
            (false, false) => AnchorActive::None,
        }
    }

    /// Inactive anchors are replaced with a char that can't appear in valid text
    pub fn replace_anchors<'a>(&self, pat: &'a str) -> Cow<'a, str> {
        let (replace_a, replace_g) = match self {
            AnchorActive::AG => (false, false),
            AnchorActive::A => (false, true),
            AnchorActive::G => (true, false),
            AnchorActive::None => (true, true),
        };
        let replace_a = replace_a && pat.contains("\\A");
        let replace_g = replace_g && pat.contains("\\G");
        if !replace_a && !replace_g {
            return Cow::Borrowed(pat);
        }

        let mut out = String::with_capacity(pat.len());
        let mut chars = pat.chars();
        while let Some(c) = chars.next() {
            if c != '\\' {
                out.push(c);
                continue;
            }
            match chars.next() {
                Some('A') if replace_a => out.push('\u{FFFF}'),
                Some('G') if replace_g => out.push('\u{FFFF}'),
                Some(other) => {
                    out.push('\\');
                    out.push(other);
                }
                None => out.push('\\'),
            }
        }
        Cow::Owned(out)
    }
}

impl fmt::Debug for AnchorActive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AnchorActive::A => "allow_A=true, allow_G=false",
            AnchorActive::G => "allow_A=false, allow_G=true",
            AnchorActive::AG => "allow_A=true, allow_G=true",
            AnchorActive::None => "allow_A=false, allow_G=false",
        };
        f.write_str(s)
    }
}
