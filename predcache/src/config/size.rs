//! Human-readable byte sizes ("512MB", "2GB").

use std::fmt;

use thiserror::Error;

const KB: usize = 1024;
const MB: usize = 1024 * KB;
const GB: usize = 1024 * MB;

/// Suffixes, longest first so "MB" wins over "B".
const SUFFIXES: [(&str, usize); 7] = [
    ("GB", GB),
    ("MB", MB),
    ("KB", KB),
    ("G", GB),
    ("M", MB),
    ("K", KB),
    ("B", 1),
];

/// Error parsing a size string.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("Invalid size '{input}' - expected format like '2GB', '512MB', or '1024KB'")]
pub struct SizeParseError {
    input: String,
}

/// Parse a size into bytes.
///
/// Accepts a whole number with an optional, case-insensitive `K`/`KB`,
/// `M`/`MB`, `G`/`GB` or `B` suffix (powers of 1024). Whitespace between
/// number and suffix is allowed.
///
/// ```
/// use predcache::config::parse_size;
///
/// assert_eq!(parse_size("512").unwrap(), 512);
/// assert_eq!(parse_size("4 kb").unwrap(), 4096);
/// assert_eq!(parse_size("2GB").unwrap(), 2 * 1024 * 1024 * 1024);
/// ```
pub fn parse_size(input: &str) -> Result<usize, SizeParseError> {
    let error = || SizeParseError {
        input: input.to_string(),
    };

    let upper = input.trim().to_uppercase();
    let (number, multiplier) = SUFFIXES
        .iter()
        .find_map(|(suffix, multiplier)| {
            upper
                .strip_suffix(suffix)
                .map(|number| (number.trim_end(), *multiplier))
        })
        .unwrap_or((upper.as_str(), 1));

    if number.is_empty() || !number.bytes().all(|b| b.is_ascii_digit()) {
        return Err(error());
    }
    number
        .parse::<usize>()
        .ok()
        .and_then(|n| n.checked_mul(multiplier))
        .ok_or_else(error)
}

/// Format bytes using the largest unit that divides them exactly.
pub fn format_size(bytes: usize) -> String {
    match bytes {
        0 => "0".to_string(),
        b if b % GB == 0 => format!("{}GB", b / GB),
        b if b % MB == 0 => format!("{}MB", b / MB),
        b if b % KB == 0 => format!("{}KB", b / KB),
        b => b.to_string(),
    }
}

/// A byte count that displays in human-readable form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Size(pub usize);

impl Size {
    pub fn bytes(self) -> usize {
        self.0
    }
}

impl fmt::Display for Size {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&format_size(self.0))
    }
}

impl std::str::FromStr for Size {
    type Err = SizeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_size(s).map(Size)
    }
}
