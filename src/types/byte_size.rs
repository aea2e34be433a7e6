//! Human-readable byte sizes
//!
//! Formats sizes like `1.5Mb` or `1,023b` and parses them back. Binary units
//! (1Kb = 1024b); at most one fractional digit is printed.

use crate::{JiraLinkError, Result};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::num::IntErrorKind;
use std::str::FromStr;

/// Shown when a size can't be formatted
pub const NOT_AVAILABLE: &str = "n/a";

const SIZE_B: i64 = 1;
const SIZE_KB: i64 = 1024 * SIZE_B;
const SIZE_MB: i64 = 1024 * SIZE_KB;
const SIZE_GB: i64 = 1024 * SIZE_MB;
const SIZE_TB: i64 = 1024 * SIZE_GB;

const SIZE_UNITS: [i64; 5] = [SIZE_TB, SIZE_GB, SIZE_MB, SIZE_KB, SIZE_B];
const SIZE_SUFFIXES: [&str; 5] = ["Tb", "Gb", "Mb", "Kb", "b"];

/// A size in bytes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ByteSize(pub i64);

impl ByteSize {
    pub const fn bytes(n: i64) -> Self {
        Self(n)
    }

    pub const fn kib(n: i64) -> Self {
        Self(n * SIZE_KB)
    }

    pub const fn mib(n: i64) -> Self {
        Self(n * SIZE_MB)
    }

    /// Negative sizes clamp to zero
    pub fn to_u64(self) -> u64 {
        if self.0 < 0 {
            0
        } else {
            self.0 as u64
        }
    }

    pub fn as_i64(self) -> i64 {
        self.0
    }
}

fn with_commas(digits: &str) -> String {
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    let offset = digits.len() % 3;
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (i + 3 - offset) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    out
}

impl fmt::Display for ByteSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let size = self.0;
        if size == 0 {
            return f.write_str("0");
        }

        for (unit, suffix) in SIZE_UNITS.iter().zip(SIZE_SUFFIXES) {
            let unit = *unit;
            if size < unit {
                continue;
            }
            if unit == SIZE_B {
                return write!(f, "{}{}", with_commas(&size.to_string()), suffix);
            }
            // Tenths of a unit, rounded half up
            let tenths = match size.checked_mul(10).and_then(|t| t.checked_add(unit / 2)) {
                Some(scaled) => scaled / unit,
                None => return f.write_str(NOT_AVAILABLE),
            };
            let s = tenths.to_string();
            let (whole, fraction) = s.split_at(s.len() - 1);
            if whole.is_empty() {
                return f.write_str(NOT_AVAILABLE);
            }
            return if fraction == "0" {
                write!(f, "{}{}", with_commas(whole), suffix)
            } else {
                write!(f, "{}.{}{}", with_commas(whole), fraction, suffix)
            };
        }
        f.write_str(NOT_AVAILABLE)
    }
}

/// Parse a size such as `10Mb`, `1.5kb`, `1,024` or `512b` (suffixes are
/// case-insensitive; no suffix means bytes).
pub fn parse_byte_size(input: &str) -> Result<ByteSize> {
    let lower = input.trim().to_lowercase();
    let mut number = lower.as_str();
    let mut unit = SIZE_B;
    for (i, suffix) in SIZE_SUFFIXES.iter().enumerate() {
        let suffix = suffix.to_lowercase();
        if let Some(stripped) = number.strip_suffix(suffix.as_str()) {
            number = stripped;
            unit = SIZE_UNITS[i];
            break;
        }
    }

    let number = number.replace(',', "");
    let invalid = || JiraLinkError::InvalidInput(format!("invalid byte size: {:?}", input));

    match number.parse::<i64>() {
        Ok(n) => n
            .checked_mul(unit)
            .map(ByteSize)
            .ok_or_else(invalid),
        Err(e) if matches!(e.kind(), IntErrorKind::PosOverflow | IntErrorKind::NegOverflow) => {
            Err(invalid())
        }
        Err(_) => {
            let fl: f64 = number.parse().map_err(|_| invalid())?;
            if !fl.is_finite() {
                return Err(invalid());
            }
            Ok(ByteSize((fl * unit as f64) as i64))
        }
    }
}

impl FromStr for ByteSize {
    type Err = JiraLinkError;

    fn from_str(s: &str) -> Result<Self> {
        parse_byte_size(s)
    }
}

impl Serialize for ByteSize {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ByteSize {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Int(i64),
            Str(String),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Int(n) => Ok(ByteSize(n)),
            Raw::Str(s) => parse_byte_size(&s).map_err(serde::de::Error::custom),
        }
    }
}
