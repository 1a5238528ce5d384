//! Calendar quarter labels as they appear in the Energy Trends workbooks
//!
//! Column headers in the "Quarter" sheet read like `2024 1st quarter`, sometimes
//! followed by an annotation such as `[note 3]`. This module parses those labels
//! into an ordered [`QuarterLabel`] and renames columns into the `YYYYQQ` token
//! used by the long table.

use regex::Regex;
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;
use thiserror::Error;

static LABEL_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\d{4}) (\d{1,2})(st|nd|rd|th) quarter$").expect("valid quarter label regex")
});

/// Prefix match used to pick quarter columns out of a header row
static QUARTER_COLUMN_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\d{4} \d{1,2}(st|nd|rd|th) quarter").expect("valid quarter column regex")
});

static BRACKETED_ANNOTATION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s*\[.*\]").expect("valid annotation regex"));

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QuarterParseError {
    #[error("Invalid quarter format: {0}")]
    InvalidFormat(String),

    #[error("Quarter number out of range (1-4): {0}")]
    OutOfRange(String),
}

/// A calendar quarter, ordered by (year, quarter)
///
/// Field order matters: the derived `Ord` compares year first, then quarter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct QuarterLabel {
    year: u16,
    quarter: u8,
}

impl QuarterLabel {
    pub fn new(year: u16, quarter: u8) -> Result<Self, QuarterParseError> {
        if !(1..=4).contains(&quarter) {
            return Err(QuarterParseError::OutOfRange(format!("{year} quarter {quarter}")));
        }
        Ok(Self { year, quarter })
    }

    pub fn year(&self) -> u16 {
        self.year
    }

    pub fn quarter(&self) -> u8 {
        self.quarter
    }

    /// Parse a header cell, ignoring a trailing bracketed annotation
    ///
    /// `"2024 1st quarter [note 3]"` parses the same as `"2024 1st quarter"`.
    pub fn from_header(header: &str) -> Result<Self, QuarterParseError> {
        BRACKETED_ANNOTATION.replace_all(header, "").parse()
    }

    /// Canonical `YYYYQQ` token, e.g. `202401`
    pub fn token(&self) -> String {
        format!("{:04}{:02}", self.year, self.quarter)
    }
}

impl FromStr for QuarterLabel {
    type Err = QuarterParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let caps = LABEL_PATTERN
            .captures(trimmed)
            .ok_or_else(|| QuarterParseError::InvalidFormat(s.to_string()))?;

        let year = caps[1]
            .parse::<u16>()
            .map_err(|_| QuarterParseError::InvalidFormat(s.to_string()))?;
        let quarter = caps[2]
            .parse::<u8>()
            .map_err(|_| QuarterParseError::InvalidFormat(s.to_string()))?;

        if !(1..=4).contains(&quarter) {
            return Err(QuarterParseError::OutOfRange(s.to_string()));
        }

        Ok(Self { year, quarter })
    }
}

impl fmt::Display for QuarterLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let suffix = match self.quarter {
            1 => "st",
            2 => "nd",
            3 => "rd",
            _ => "th",
        };
        write!(f, "{} {}{} quarter", self.year, self.quarter, suffix)
    }
}

/// True when a normalised header names a quarter column
pub fn is_quarter_column(header: &str) -> bool {
    QUARTER_COLUMN_PATTERN.is_match(header)
}

/// Rename a (possibly underscore-separated) quarter column to its `YYYYQQ` token
///
/// Accepts the shapes found in published workbooks: `2024 1st quarter`,
/// `2024_1st_quarter`, `2024\n1st quarter [note 2]`. The `3nd` misspelling seen
/// in some releases is read as the third quarter. Returns `None` when the name
/// is not quarter-shaped.
pub fn quarter_token(column: &str) -> Option<String> {
    let cleaned = column
        .replace("_\n", " ")
        .replace('\n', " ")
        .replace('_', " ");
    let mut parts = cleaned.split_whitespace();

    let year = parts.next()?;
    let ordinal = parts.next()?.to_lowercase();

    if year.len() != 4 || !year.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }

    let quarter = if ordinal.contains("1st") {
        "01"
    } else if ordinal.contains("2nd") {
        "02"
    } else if ordinal.contains("3rd") || ordinal.contains("3nd") {
        "03"
    } else if ordinal.contains("4th") {
        "04"
    } else {
        return None;
    };

    Some(format!("{year}{quarter}"))
}
