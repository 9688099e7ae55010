//! ANSI terminal styling (§4.C11), grounded on `formatter.hpp`.
//!
//! Every escape code is gated on [`crate::config::Config::print_formatted`]:
//! with it off, colour/weight codes collapse to the empty string and the
//! two bar glyphs fall back to plain ASCII, matching `formatter::get`'s
//! non-formatted branch.

/// One requested style; `style(...)` composes several into a wrapped string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Style {
    Green,
    Red,
    Magenta,
    Italic,
    Underlined,
    Greyed,
    Bold,
    BarFilled,
    BarEmpty,
}

impl Style {
    fn code(self, formatted: bool) -> &'static str {
        if !formatted {
            return match self {
                Style::BarEmpty => ".",
                Style::BarFilled => "=",
                _ => "",
            };
        }
        match self {
            Style::BarEmpty => " ",
            Style::BarFilled => "*",
            Style::Bold => "\x1b[1m",
            Style::Green => "\x1b[32m",
            Style::Greyed => "\x1b[2m",
            Style::Italic => "\x1b[3m",
            Style::Magenta => "\x1b[95m",
            Style::Red => "\x1b[31m",
            Style::Underlined => "\x1b[4m",
        }
    }

    fn clear_code(self, formatted: bool) -> &'static str {
        if !formatted {
            return "";
        }
        match self {
            Style::Red | Style::Green | Style::Magenta => "\x1b[39m",
            Style::Bold | Style::Greyed => "\x1b[22m",
            Style::Italic => "\x1b[23m",
            Style::Underlined => "\x1b[24m",
            Style::BarFilled | Style::BarEmpty => "",
        }
    }
}

/// The escape code that resets every active style at once.
pub fn clear_all() -> &'static str {
    "\x1b[0m"
}

/// Wraps `text` in the format and clear codes for `styles`, honoring
/// [`crate::config::Config::print_formatted`].
pub fn format(styles: &[Style], text: &str) -> String {
    let formatted = crate::config::global().print_formatted;
    let mut out = String::new();
    for s in styles {
        out.push_str(s.code(formatted));
    }
    out.push_str(text);
    for s in styles {
        out.push_str(s.clear_code(formatted));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bar_glyphs_fall_back_to_ascii_when_unformatted() {
        assert_eq!(Style::BarFilled.code(false), "=");
        assert_eq!(Style::BarEmpty.code(false), ".");
    }

    #[test]
    fn colour_codes_empty_when_unformatted() {
        assert_eq!(Style::Red.code(false), "");
        assert_eq!(Style::Red.clear_code(false), "");
    }

    #[test]
    fn colour_codes_present_when_formatted() {
        assert_eq!(Style::Red.code(true), "\x1b[31m");
        assert_eq!(Style::Red.clear_code(true), "\x1b[39m");
    }
}
