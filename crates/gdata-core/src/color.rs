//! RGB colours as used by calendar and contact group feeds.

use std::fmt;
use std::str::FromStr;

use crate::error::Error;

/// An RGB colour written as `#rrggbb`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Color {
    /// Red component.
    pub red: u8,
    /// Green component.
    pub green: u8,
    /// Blue component.
    pub blue: u8,
}

impl Color {
    /// Creates a colour from its components.
    pub const fn new(red: u8, green: u8, blue: u8) -> Self {
        Self { red, green, blue }
    }

    /// Parses `#RRGGBB` or `RRGGBB` (hex digits in either case).
    pub fn from_hexadecimal(value: &str) -> Option<Self> {
        let hex = value.strip_prefix('#').unwrap_or(value);
        if hex.len() != 6 || !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
            return None;
        }
        let component = |range: std::ops::Range<usize>| u8::from_str_radix(&hex[range], 16).ok();
        Some(Self {
            red: component(0..2)?,
            green: component(2..4)?,
            blue: component(4..6)?,
        })
    }

    /// Formats the colour as lower-case `#rrggbb`.
    pub fn to_hexadecimal(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{:02x}{:02x}{:02x}", self.red, self.green, self.blue)
    }
}

impl FromStr for Color {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hexadecimal(s)
            .ok_or_else(|| Error::invalid_argument(format!("invalid colour \"{s}\"")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_with_and_without_hash() {
        let expected = Color::new(249, 159, 240);
        assert_eq!(Color::from_hexadecimal("#F99Ff0"), Some(expected));
        assert_eq!(Color::from_hexadecimal("F99Ff0"), Some(expected));
    }

    #[test]
    fn rejects_invalid_values() {
        assert_eq!(Color::from_hexadecimal("foobar"), None);
        assert_eq!(Color::from_hexadecimal("this is not a real colour!"), None);
        assert_eq!(Color::from_hexadecimal("#fff"), None);
        assert!("nope".parse::<Color>().is_err());
    }

    #[test]
    fn formats_lower_case() {
        assert_eq!(Color::new(249, 159, 240).to_hexadecimal(), "#f99ff0");
        assert_eq!(Color::new(255, 255, 255).to_string(), "#ffffff");
        assert_eq!(Color::new(0, 0, 0).to_string(), "#000000");
    }
}
