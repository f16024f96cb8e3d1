//! Environment configuration.
//!
//! Two variables are honored:
//! - `H5RT_DISABLE_VERSION_CHECK`: integer override of the version guard.
//!   `0` (or unset / non-numeric) aborts on mismatch, `1` warns and continues,
//!   `2` and above are silent. Read once, cached for the process lifetime.
//! - `H5RT_DEBUG`: debug mask applied on every library open after the
//!   baseline `-all` reset.

use std::sync::atomic::{AtomicU8, Ordering};

/// Version-check override variable.
pub const VERSION_CHECK_ENV: &str = "H5RT_DISABLE_VERSION_CHECK";
/// Debug mask variable.
pub const DEBUG_ENV: &str = "H5RT_DEBUG";

/// How loudly a version mismatch is reported.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VersionCheckLevel {
    /// Print the full warning and abort the process.
    #[default]
    Abort,
    /// Print the warning and continue at the caller's own risk.
    Warn,
    /// Say nothing.
    Silent,
}

impl VersionCheckLevel {
    /// Map a numeric override onto a level.
    #[must_use]
    pub const fn from_numeric(value: u64) -> Self {
        match value {
            0 => Self::Abort,
            1 => Self::Warn,
            _ => Self::Silent,
        }
    }

    /// Numeric form, as echoed in the warning text.
    #[must_use]
    pub const fn as_numeric(self) -> u32 {
        match self {
            Self::Abort => 0,
            Self::Warn => 1,
            Self::Silent => 2,
        }
    }

    /// Parse a raw override value. Only values starting with an ASCII digit
    /// are considered; everything else keeps the default.
    #[must_use]
    pub fn parse_override(raw: &str) -> Self {
        let bytes = raw.as_bytes();
        if !bytes.first().is_some_and(u8::is_ascii_digit) {
            return Self::Abort;
        }
        let (value, _) = parse_c_integer(bytes);
        Self::from_numeric(value)
    }
}

/// Parse an unsigned integer prefix with C `strtol(.., 0)` radix rules:
/// `0x`/`0X` is hexadecimal, a leading `0` is octal, otherwise decimal.
///
/// Returns the value (saturating) and the number of bytes consumed. Zero
/// bytes consumed means no number was found.
#[must_use]
pub fn parse_c_integer(input: &[u8]) -> (u64, usize) {
    let (radix, start) = match input {
        [b'0', b'x' | b'X', next, ..] if next.is_ascii_hexdigit() => (16, 2),
        [b'0', ..] => (8, 0),
        _ => (10, 0),
    };
    let mut value: u64 = 0;
    let mut consumed = start;
    for &byte in &input[start..] {
        let digit = match (byte as char).to_digit(radix) {
            Some(d) => u64::from(d),
            None => break,
        };
        value = value.saturating_mul(u64::from(radix)).saturating_add(digit);
        consumed += 1;
    }
    if consumed == start {
        (0, 0)
    } else {
        (value, consumed)
    }
}

// Atomic cache: 0=unresolved, 1=Abort, 2=Warn, 3=Silent, 255=resolving.
static CACHED_VERSION_LEVEL: AtomicU8 = AtomicU8::new(0);

const LEVEL_UNRESOLVED: u8 = 0;
const LEVEL_ABORT: u8 = 1;
const LEVEL_WARN: u8 = 2;
const LEVEL_SILENT: u8 = 3;
const LEVEL_RESOLVING: u8 = 255;

fn level_to_u8(level: VersionCheckLevel) -> u8 {
    match level {
        VersionCheckLevel::Abort => LEVEL_ABORT,
        VersionCheckLevel::Warn => LEVEL_WARN,
        VersionCheckLevel::Silent => LEVEL_SILENT,
    }
}

fn u8_to_level(v: u8) -> VersionCheckLevel {
    match v {
        LEVEL_WARN => VersionCheckLevel::Warn,
        LEVEL_SILENT => VersionCheckLevel::Silent,
        _ => VersionCheckLevel::Abort,
    }
}

/// Version-check level from the environment, resolved on first call.
///
/// A concurrent caller that arrives while another thread is resolving sees
/// the default `Abort`, which is the strictest answer.
#[must_use]
pub fn version_check_level() -> VersionCheckLevel {
    let cached = CACHED_VERSION_LEVEL.load(Ordering::Acquire);
    if cached != LEVEL_UNRESOLVED && cached != LEVEL_RESOLVING {
        return u8_to_level(cached);
    }
    if cached == LEVEL_RESOLVING {
        return VersionCheckLevel::Abort;
    }
    if CACHED_VERSION_LEVEL
        .compare_exchange(
            LEVEL_UNRESOLVED,
            LEVEL_RESOLVING,
            Ordering::SeqCst,
            Ordering::Relaxed,
        )
        .is_err()
    {
        let v = CACHED_VERSION_LEVEL.load(Ordering::Acquire);
        return if v != LEVEL_UNRESOLVED && v != LEVEL_RESOLVING {
            u8_to_level(v)
        } else {
            VersionCheckLevel::Abort
        };
    }
    let level = std::env::var(VERSION_CHECK_ENV)
        .map(|v| VersionCheckLevel::parse_override(&v))
        .unwrap_or_default();
    CACHED_VERSION_LEVEL.store(level_to_u8(level), Ordering::Release);
    level
}

/// Current `H5RT_DEBUG` value, if set. Not cached.
#[must_use]
pub fn debug_flags_from_env() -> Option<String> {
    std::env::var(DEBUG_ENV).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn c_integer_radix_rules() {
        assert_eq!(parse_c_integer(b"42"), (42, 2));
        assert_eq!(parse_c_integer(b"0x1f,rest"), (31, 4));
        assert_eq!(parse_c_integer(b"017"), (15, 3));
        assert_eq!(parse_c_integer(b"0"), (0, 1));
        // "0x" with no hex digit parses the zero and stops before the x.
        assert_eq!(parse_c_integer(b"0xg"), (0, 1));
        assert_eq!(parse_c_integer(b"09"), (0, 1));
        assert_eq!(parse_c_integer(b"abc"), (0, 0));
        assert_eq!(parse_c_integer(b"99999999999999999999999").0, u64::MAX);
    }

    #[test]
    fn override_requires_leading_digit() {
        assert_eq!(VersionCheckLevel::parse_override("0"), VersionCheckLevel::Abort);
        assert_eq!(VersionCheckLevel::parse_override("1"), VersionCheckLevel::Warn);
        assert_eq!(VersionCheckLevel::parse_override("2"), VersionCheckLevel::Silent);
        assert_eq!(VersionCheckLevel::parse_override("17"), VersionCheckLevel::Silent);
        assert_eq!(VersionCheckLevel::parse_override("0x1"), VersionCheckLevel::Warn);
        assert_eq!(VersionCheckLevel::parse_override("-1"), VersionCheckLevel::Abort);
        assert_eq!(VersionCheckLevel::parse_override(" 1"), VersionCheckLevel::Abort);
        assert_eq!(VersionCheckLevel::parse_override("yes"), VersionCheckLevel::Abort);
        assert_eq!(VersionCheckLevel::parse_override(""), VersionCheckLevel::Abort);
    }

    #[test]
    fn numeric_round_trip() {
        assert_eq!(VersionCheckLevel::from_numeric(0).as_numeric(), 0);
        assert_eq!(VersionCheckLevel::from_numeric(1).as_numeric(), 1);
        assert_eq!(VersionCheckLevel::from_numeric(9).as_numeric(), 2);
    }

    #[test]
    fn cached_level_is_sticky_until_cache_reset() {
        let previous = CACHED_VERSION_LEVEL.swap(LEVEL_WARN, Ordering::SeqCst);
        assert_eq!(version_check_level(), VersionCheckLevel::Warn);
        CACHED_VERSION_LEVEL.store(LEVEL_SILENT, Ordering::SeqCst);
        assert_eq!(version_check_level(), VersionCheckLevel::Silent);
        CACHED_VERSION_LEVEL.store(LEVEL_RESOLVING, Ordering::SeqCst);
        assert_eq!(version_check_level(), VersionCheckLevel::Abort);
        CACHED_VERSION_LEVEL.store(previous, Ordering::SeqCst);
    }
}
