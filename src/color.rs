//! Status colors and their OK / ALERT / UNDECIDED classification
//!
//! Every status report carries one of six colors. A pair of configurable
//! bitmasks decides which colors are OK and which are ALERT; everything else
//! is UNDECIDED.
//!
//! ```text
//! green ──┐
//! blue  ──┼── ok_colors    (default)  → Classification::Ok
//! clear ──┘
//! red    ─┐
//! yellow ─┼── alert_colors (default)  → Classification::Alert
//! purple ─┘
//! ```

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer};

/// A status color
///
/// The discriminants are bit positions used by [`ColorSet`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Color {
    Green = 0,
    Clear = 1,
    Blue = 2,
    Purple = 3,
    Yellow = 4,
    Red = 5,
    /// Sentinel for "never had a color"
    None = 6,
}

impl Color {
    /// All colors a report can carry, in severity order
    pub const REPORTABLE: [Color; 6] = [
        Color::Green,
        Color::Clear,
        Color::Blue,
        Color::Purple,
        Color::Yellow,
        Color::Red,
    ];

    /// Color forced onto disabled tests
    pub const DISABLED: Color = Color::Blue;

    /// Color given to records whose validity lapsed
    pub const STALE: Color = Color::Purple;

    /// Color given to stale records on unreachable hosts
    pub const UNREACHABLE: Color = Color::Clear;

    pub fn name(&self) -> &'static str {
        match self {
            Color::Green => "green",
            Color::Clear => "clear",
            Color::Blue => "blue",
            Color::Purple => "purple",
            Color::Yellow => "yellow",
            Color::Red => "red",
            Color::None => "none",
        }
    }

    /// Parse the color word at the start of `text`
    ///
    /// Matching is case-insensitive and only looks at the prefix, so
    /// `"red,"` and `"RED"` both yield [`Color::Red`]. The `none` sentinel is
    /// never parsed from a report.
    pub fn parse_prefix(text: &str) -> Option<Color> {
        Color::REPORTABLE.into_iter().find(|color| {
            let name = color.name();
            text.len() >= name.len()
                && text.is_char_boundary(name.len())
                && text[..name.len()].eq_ignore_ascii_case(name)
        })
    }

    fn bit(&self) -> u32 {
        1 << (*self as u32)
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Color {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("none") {
            return Ok(Color::None);
        }
        match Color::parse_prefix(s) {
            Some(color) if color.name().len() == s.len() => Ok(color),
            _ => Err(format!("unknown color '{s}'")),
        }
    }
}

/// A set of colors stored as a bitmask
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ColorSet(u32);

impl ColorSet {
    pub fn empty() -> Self {
        ColorSet(0)
    }

    pub fn of(colors: &[Color]) -> Self {
        colors
            .iter()
            .fold(ColorSet::empty(), |set, color| set.with(*color))
    }

    pub fn with(self, color: Color) -> Self {
        ColorSet(self.0 | color.bit())
    }

    pub fn contains(&self, color: Color) -> bool {
        self.0 & color.bit() != 0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    /// Parse a comma separated color list such as `red,yellow`
    ///
    /// Unknown names are skipped.
    pub fn parse_list(list: &str) -> Self {
        list.split(',')
            .filter_map(|name| name.trim().parse::<Color>().ok())
            .fold(ColorSet::empty(), |set, color| set.with(color))
    }
}

impl<'de> Deserialize<'de> for ColorSet {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let list = String::deserialize(deserializer)?;
        Ok(ColorSet::parse_list(&list))
    }
}

/// Result of classifying a color
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    Ok,
    Alert,
    Undecided,
}

/// The two-bitmask classification scheme
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColorPolicy {
    pub ok: ColorSet,
    pub alert: ColorSet,
}

impl Default for ColorPolicy {
    fn default() -> Self {
        Self {
            ok: ColorSet::of(&[Color::Green, Color::Blue, Color::Clear]),
            alert: ColorSet::of(&[Color::Red, Color::Yellow, Color::Purple]),
        }
    }
}

impl ColorPolicy {
    pub fn classify(&self, color: Color) -> Classification {
        if self.ok.contains(color) {
            Classification::Ok
        } else if self.alert.contains(color) {
            Classification::Alert
        } else {
            Classification::Undecided
        }
    }
}
