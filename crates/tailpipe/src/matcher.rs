// SPDX-License-Identifier: MIT
// Copyright (c) 2025-2026 tailpipe.dev

//! Regex match engine with per-interval value accumulation.
//!
//! A [`Matcher`] pairs a regular expression (plus an optional exclude
//! expression) with an action: either a custom callback receiving the
//! capture groups, or a [`MatchValue`] accumulator that folds the first
//! capture group into a typed metric. Accumulators implement the
//! aggregation modes a scrape interval needs: averages, extrema, sums
//! and plain occurrence counts.

use std::fmt;

use regex::Regex;

use crate::value::Value;

/// Capture groups beyond this many are ignored.
pub const MAX_SUBMATCHES: usize = 32;

#[derive(Debug)]
pub enum MatchError {
    /// The match or exclude pattern failed to compile.
    BadPattern(regex::Error),
    /// The accumulator needs a capture group the pattern lacks.
    MissingCapture,
    /// A captured string did not parse as the expected number type.
    InvalidNumber(String),
    /// A custom callback reported failure.
    Callback(String),
}

impl fmt::Display for MatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MatchError::BadPattern(e) => write!(f, "bad match pattern: {}", e),
            MatchError::MissingCapture => {
                write!(f, "pattern has no capture group for the value")
            }
            MatchError::InvalidNumber(s) => write!(f, "not a number: {:?}", s),
            MatchError::Callback(s) => write!(f, "match callback failed: {}", s),
        }
    }
}

impl std::error::Error for MatchError {}

impl From<regex::Error> for MatchError {
    fn from(e: regex::Error) -> Self {
        MatchError::BadPattern(e)
    }
}

/// How a gauge accumulator folds in each captured value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GaugeOp {
    /// Running mean of all values this interval.
    Average,
    Min,
    Max,
    /// Most recent value wins.
    Last,
    /// Count matches; no capture group required.
    Inc,
    /// Sum of all values this interval.
    Add,
}

/// How a counter or derive accumulator reacts to each match.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CounterOp {
    /// Replace with the captured value.
    Set,
    /// Add the captured value.
    Add,
    /// Add one; no capture group required.
    Inc,
}

/// A typed accumulator updated on every match. Gauges start out as NaN
/// and report how many values they have folded in, so a consumer can
/// tell "no observation" from a real reading.
#[derive(Debug, Clone, Copy)]
pub enum MatchValue {
    Gauge { op: GaugeOp, value: f64, seen: u32 },
    Counter { op: CounterOp, value: u64 },
    Derive { op: CounterOp, value: i64 },
    Absolute { value: u64 },
}

impl MatchValue {
    pub fn gauge(op: GaugeOp) -> Self {
        MatchValue::Gauge {
            op,
            value: f64::NAN,
            seen: 0,
        }
    }

    pub fn counter(op: CounterOp) -> Self {
        MatchValue::Counter { op, value: 0 }
    }

    pub fn derive(op: CounterOp) -> Self {
        MatchValue::Derive { op, value: 0 }
    }

    pub fn absolute() -> Self {
        MatchValue::Absolute { value: 0 }
    }

    /// The current accumulated reading.
    pub fn value(&self) -> Value {
        match *self {
            MatchValue::Gauge { value, .. } => Value::Gauge(value),
            MatchValue::Counter { value, .. } => Value::Counter(value),
            MatchValue::Derive { value, .. } => Value::Derive(value),
            MatchValue::Absolute { value } => Value::Absolute(value),
        }
    }

    /// Number of values folded in since the last reset. Only gauges
    /// track this; the others report zero.
    pub fn seen(&self) -> u32 {
        match *self {
            MatchValue::Gauge { seen, .. } => seen,
            _ => 0,
        }
    }

    /// Start a new interval. Gauges forget their accumulated value;
    /// counters, derives and absolutes carry theirs forward.
    pub fn reset_interval(&mut self) {
        if let MatchValue::Gauge { value, seen, .. } = self {
            *value = f64::NAN;
            *seen = 0;
        }
    }

    fn update(&mut self, captures: &[&str]) -> Result<(), MatchError> {
        match self {
            MatchValue::Gauge { op, value, seen } => {
                if *op == GaugeOp::Inc {
                    *value = if value.is_nan() { 1.0 } else { *value + 1.0 };
                    *seen += 1;
                    return Ok(());
                }
                let new = parse_f64(first_capture(captures)?)?;
                *value = if value.is_nan() {
                    new
                } else {
                    match op {
                        GaugeOp::Average => {
                            (*value * f64::from(*seen) + new) / f64::from(*seen + 1)
                        }
                        GaugeOp::Min => value.min(new),
                        GaugeOp::Max => value.max(new),
                        GaugeOp::Last => new,
                        GaugeOp::Add => *value + new,
                        GaugeOp::Inc => unreachable!(),
                    }
                };
                *seen += 1;
                Ok(())
            }
            MatchValue::Counter { op, value } => {
                match op {
                    CounterOp::Inc => *value = value.wrapping_add(1),
                    CounterOp::Set => *value = parse_u64(first_capture(captures)?)?,
                    CounterOp::Add => {
                        *value = value.wrapping_add(parse_u64(first_capture(captures)?)?);
                    }
                }
                Ok(())
            }
            MatchValue::Derive { op, value } => {
                match op {
                    CounterOp::Inc => *value = value.wrapping_add(1),
                    CounterOp::Set => *value = parse_i64(first_capture(captures)?)?,
                    CounterOp::Add => {
                        *value = value.wrapping_add(parse_i64(first_capture(captures)?)?);
                    }
                }
                Ok(())
            }
            MatchValue::Absolute { value } => {
                *value = parse_u64(first_capture(captures)?)?;
                Ok(())
            }
        }
    }
}

fn first_capture<'a>(captures: &[&'a str]) -> Result<&'a str, MatchError> {
    captures.get(1).copied().ok_or(MatchError::MissingCapture)
}

/// Split off an optional sign and pick the base from the classic
/// prefixes: `0x`/`0X` hexadecimal, a leading `0` octal, decimal
/// otherwise. A lone `0` before a non-hex-digit falls back to octal so
/// the zero itself still counts as consumed input.
fn split_number(s: &str) -> (bool, &str, u32) {
    let t = s.trim_start();
    let (neg, t) = match t.as_bytes().first() {
        Some(b'-') => (true, &t[1..]),
        Some(b'+') => (false, &t[1..]),
        _ => (false, t),
    };
    if let Some(hex) = t.strip_prefix("0x").or_else(|| t.strip_prefix("0X")) {
        if hex.as_bytes().first().is_some_and(|b| b.is_ascii_hexdigit()) {
            return (neg, hex, 16);
        }
        return (neg, t, 8);
    }
    if t.len() > 1 && t.starts_with('0') {
        return (neg, t, 8);
    }
    (neg, t, 10)
}

/// Parse the longest numeric prefix of `s`, with the classic base
/// prefixes: `0x`/`0X` hexadecimal, a leading `0` octal, decimal
/// otherwise. Trailing non-numeric text is ignored; it is an error
/// only when no digits are consumed at all, so a capture like
/// `"175bytes"` yields 175. Out-of-range values saturate.
pub fn parse_u64(s: &str) -> Result<u64, MatchError> {
    let (neg, digits, radix) = split_number(s);
    let mut acc: u64 = 0;
    let mut consumed = 0usize;
    for c in digits.chars() {
        let Some(d) = c.to_digit(radix) else { break };
        acc = acc
            .saturating_mul(u64::from(radix))
            .saturating_add(u64::from(d));
        consumed += 1;
    }
    if consumed == 0 {
        return Err(MatchError::InvalidNumber(s.to_string()));
    }
    Ok(if neg { acc.wrapping_neg() } else { acc })
}

/// Signed variant of [`parse_u64`]; clamps to the `i64` range.
pub fn parse_i64(s: &str) -> Result<i64, MatchError> {
    let (neg, digits, radix) = split_number(s);
    let mut acc: u64 = 0;
    let mut consumed = 0usize;
    for c in digits.chars() {
        let Some(d) = c.to_digit(radix) else { break };
        acc = acc
            .saturating_mul(u64::from(radix))
            .saturating_add(u64::from(d));
        consumed += 1;
    }
    if consumed == 0 {
        return Err(MatchError::InvalidNumber(s.to_string()));
    }
    if neg {
        if acc > i64::MAX as u64 + 1 {
            return Ok(i64::MIN);
        }
        Ok((acc as i64).wrapping_neg())
    } else {
        Ok(i64::try_from(acc).unwrap_or(i64::MAX))
    }
}

/// Parse the longest prefix of `s` that reads as a float; an error only
/// when no such prefix exists.
fn parse_f64(s: &str) -> Result<f64, MatchError> {
    let t = s.trim_start();
    for end in (1..=t.len()).rev() {
        if !t.is_char_boundary(end) {
            continue;
        }
        if let Ok(v) = t[..end].parse::<f64>() {
            return Ok(v);
        }
    }
    Err(MatchError::InvalidNumber(s.to_string()))
}

/// What happens when a line matches.
pub enum MatchAction {
    /// Fold the first capture group into an accumulator.
    Accumulate(MatchValue),
    /// Hand the line and its capture groups to a callback. Group 0 is
    /// the whole match.
    Custom(Box<dyn FnMut(&str, &[&str]) -> Result<(), MatchError> + Send>),
}

/// One compiled match rule.
pub struct Matcher {
    regex: Regex,
    exclude: Option<Regex>,
    action: MatchAction,
}

impl Matcher {
    pub fn new(
        pattern: &str,
        exclude: Option<&str>,
        action: MatchAction,
    ) -> Result<Self, MatchError> {
        Ok(Self {
            regex: Regex::new(pattern)?,
            exclude: match exclude {
                Some(p) => Some(Regex::new(p)?),
                None => None,
            },
            action,
        })
    }

    /// Apply this rule to one line. `Ok(true)` means the line matched
    /// and was processed; `Ok(false)` means it did not match or was
    /// excluded. A failing parse or callback is an error and counts as
    /// no match for the caller.
    pub fn apply(&mut self, line: &str) -> Result<bool, MatchError> {
        if let Some(excl) = &self.exclude {
            if excl.is_match(line) {
                return Ok(false);
            }
        }
        let Some(caps) = self.regex.captures(line) else {
            return Ok(false);
        };

        let mut groups: [&str; MAX_SUBMATCHES] = [""; MAX_SUBMATCHES];
        let n = caps.len().min(MAX_SUBMATCHES);
        for (i, slot) in groups.iter_mut().enumerate().take(n) {
            *slot = caps.get(i).map(|m| m.as_str()).unwrap_or("");
        }

        match &mut self.action {
            MatchAction::Accumulate(mv) => mv.update(&groups[..n])?,
            MatchAction::Custom(cb) => cb(line, &groups[..n])?,
        }
        Ok(true)
    }

    /// The accumulator's current reading, or `None` for custom actions.
    pub fn value(&self) -> Option<&MatchValue> {
        match &self.action {
            MatchAction::Accumulate(mv) => Some(mv),
            MatchAction::Custom(_) => None,
        }
    }

    /// Start a new interval on the accumulator, if any.
    pub fn reset_interval(&mut self) {
        if let MatchAction::Accumulate(mv) = &mut self.action {
            mv.reset_interval();
        }
    }
}
