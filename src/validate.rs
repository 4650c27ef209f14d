//! Statsd line validation and classification.
//!
//! A line looks like `key:value|type` with an optional `|@rate` suffix.
//! The key is everything before the *last* colon, so tag values that
//! themselves contain colons stay part of the key:
//!
//! ```text
//! keyname.__tagname=tag:value:42.0|ms
//!                             ^^^^ value
//! ```

use core::fmt;
use memchr::{memchr, memrchr};

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum MetricType {
    Counter,
    Timer,
    KeyValue,
    Gauge,
    Histogram,
    Set,
}

impl MetricType {
    pub fn from_token(token: &[u8]) -> Option<Self> {
        Some(match token {
            b"c" => MetricType::Counter,
            b"ms" => MetricType::Timer,
            b"kv" => MetricType::KeyValue,
            b"g" => MetricType::Gauge,
            b"h" => MetricType::Histogram,
            b"s" => MetricType::Set,
            _ => return None,
        })
    }

    /// Wire token for this type.
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricType::Counter => "c",
            MetricType::Timer => "ms",
            MetricType::KeyValue => "kv",
            MetricType::Gauge => "g",
            MetricType::Histogram => "h",
            MetricType::Set => "s",
        }
    }
}

impl fmt::Display for MetricType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A line that passed validation. Borrows the key from the input.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct ParsedLine<'a> {
    pub key: &'a [u8],
    pub value: f64,
    pub ty: MetricType,
    /// Rate from the `|@rate` clause; 1.0 when absent.
    pub presampling_rate: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidateError {
    #[error("missing ':'")]
    MissingColon,
    #[error("zero length key")]
    EmptyKey,
    #[error("unable to parse value as double")]
    InvalidValue,
    #[error("missing '|'")]
    MissingPipe,
    #[error("unknown stat type {0:?}")]
    UnknownType(String),
    #[error("@ sample with no rate")]
    EmptySampleRate,
    #[error("invalid sample rate")]
    InvalidSampleRate,
    #[error("no @ sample rate specifier")]
    MissingSampleRate,
}

/// Validates one statsd line (without the trailing newline).
///
/// The type token must be one of `c`, `ms`, `kv`, `g`, `h` or `s` exactly;
/// abbreviations such as `m` or `k` are rejected as unknown types.
///
/// Rejections are logged at `warn` with the offending line.
pub fn validate_statsd(line: &[u8]) -> Result<ParsedLine<'_>, ValidateError> {
    let parsed = parse_line(line);
    if let Err(e) = &parsed {
        log::warn!(
            "validate: invalid line {:?}: {e}",
            String::from_utf8_lossy(line)
        );
    }
    parsed
}

fn parse_line(line: &[u8]) -> Result<ParsedLine<'_>, ValidateError> {
    let colon = memrchr(b':', line).ok_or(ValidateError::MissingColon)?;
    if colon == 0 {
        return Err(ValidateError::EmptyKey);
    }
    let key = &line[..colon];
    let rest = &line[colon + 1..];

    let value = parse_f64_prefix(rest).ok_or(ValidateError::InvalidValue)?;

    let pipe = memchr(b'|', rest).ok_or(ValidateError::MissingPipe)?;
    let rest = &rest[pipe + 1..];

    let (token, sampling) = match memchr(b'|', rest) {
        Some(i) => (&rest[..i], Some(&rest[i + 1..])),
        None => (rest, None),
    };
    let ty = MetricType::from_token(token)
        .ok_or_else(|| ValidateError::UnknownType(String::from_utf8_lossy(token).into_owned()))?;

    let presampling_rate = match sampling {
        None => 1.0,
        Some(clause) => {
            let rate = clause
                .strip_prefix(b"@")
                .ok_or(ValidateError::MissingSampleRate)?;
            if rate.is_empty() {
                return Err(ValidateError::EmptySampleRate);
            }
            parse_f64_prefix(rate).ok_or(ValidateError::InvalidSampleRate)?
        }
    };

    Ok(ParsedLine {
        key,
        value,
        ty,
        presampling_rate,
    })
}

fn count_digits(s: &[u8]) -> usize {
    s.iter().take_while(|b| b.is_ascii_digit()).count()
}

/// Parses the longest decimal floating point prefix of `s`, skipping leading
/// whitespace. Trailing bytes are ignored. `None` when nothing converts.
pub(crate) fn parse_f64_prefix(s: &[u8]) -> Option<f64> {
    let skip = s
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(s.len());
    let s = &s[skip..];

    let mut end = usize::from(matches!(s.first(), Some(b'+' | b'-')));

    let word = &s[end..];
    let literals: [&[u8]; 3] = [b"infinity", b"inf", b"nan"];
    for lit in literals {
        if word.len() >= lit.len() && word[..lit.len()].eq_ignore_ascii_case(lit) {
            return core::str::from_utf8(&s[..end + lit.len()]).ok()?.parse().ok();
        }
    }

    let int_digits = count_digits(&s[end..]);
    end += int_digits;
    let mut frac_digits = 0;
    if s.get(end) == Some(&b'.') {
        frac_digits = count_digits(&s[end + 1..]);
        if int_digits + frac_digits > 0 {
            end += 1 + frac_digits;
        }
    }
    if int_digits + frac_digits == 0 {
        return None;
    }

    if matches!(s.get(end), Some(b'e' | b'E')) {
        let mut exp = end + 1;
        if matches!(s.get(exp), Some(b'+' | b'-')) {
            exp += 1;
        }
        let exp_digits = count_digits(&s[exp.min(s.len())..]);
        if exp_digits > 0 {
            end = exp + exp_digits;
        }
    }

    core::str::from_utf8(&s[..end]).ok()?.parse().ok()
}
