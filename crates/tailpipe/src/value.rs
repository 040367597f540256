// SPDX-License-Identifier: MIT
// Copyright (c) 2025-2026 tailpipe.dev

//! The value-list contract shared by the match engine and the writers.
//!
//! A *value list* is one timestamped sample: identity labels
//! (host, plugin, plugin instance, type, type instance) plus one typed
//! number per data source. Collectors produce value lists; sinks
//! consume them. The [`ValueSink`] trait is the seam between the two.

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::hashtable::{hash_update_str, HashTable, HASH_INIT};

/// A single typed metric reading.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Value {
    /// Instantaneous reading. NaN means "no observation".
    Gauge(f64),
    /// Monotonic, wrapping counter.
    Counter(u64),
    /// Signed running total; consumers differentiate it.
    Derive(i64),
    /// Unsigned value that resets on every read.
    Absolute(u64),
}

impl Value {
    /// True for a gauge holding NaN.
    pub fn is_nan(&self) -> bool {
        matches!(self, Value::Gauge(g) if g.is_nan())
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Gauge(g) => write!(f, "{}", g),
            Value::Counter(c) => write!(f, "{}", c),
            Value::Derive(d) => write!(f, "{}", d),
            Value::Absolute(a) => write!(f, "{}", a),
        }
    }
}

/// One timestamped sample with its identity labels.
#[derive(Debug, Clone)]
pub struct ValueList {
    pub host: String,
    pub plugin: String,
    pub plugin_instance: String,
    pub type_: String,
    pub type_instance: String,
    /// Nanoseconds since the Unix epoch.
    pub time_ns: u64,
    /// One `(data source name, value)` pair per data source.
    pub values: Vec<(String, Value)>,
}

impl ValueList {
    /// The canonical `host/plugin-instance/type-instance` identifier.
    /// Instance parts are omitted together with their dash when empty.
    pub fn identifier(&self) -> String {
        let mut id = String::with_capacity(64);
        id.push_str(&self.host);
        id.push('/');
        id.push_str(&self.plugin);
        if !self.plugin_instance.is_empty() {
            id.push('-');
            id.push_str(&self.plugin_instance);
        }
        id.push('/');
        id.push_str(&self.type_);
        if !self.type_instance.is_empty() {
            id.push('-');
            id.push_str(&self.type_instance);
        }
        id
    }
}

/// Anything that accepts dispatched samples.
pub trait ValueSink: Send + Sync {
    fn dispatch(&self, vl: &ValueList);
}

/// Current wall-clock time in nanoseconds since the Unix epoch.
pub fn now_ns() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0)
}

/// This host's name, for the `host` label of locally collected
/// samples.
pub fn hostname() -> String {
    let mut buf = [0u8; 256];
    let rc = unsafe { libc::gethostname(buf.as_mut_ptr().cast(), buf.len()) };
    if rc != 0 {
        return "localhost".to_string();
    }
    let end = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
    String::from_utf8_lossy(&buf[..end]).into_owned()
}

/// Difference between two counter readings, assuming at most one wrap.
/// A counter that never exceeded 32 bits is taken to be a 32-bit
/// counter and wraps at 2^32; anything larger wraps at 2^64.
pub fn counter_diff(old: u64, new: u64) -> u64 {
    if old > new {
        if old <= u64::from(u32::MAX) {
            (u64::from(u32::MAX) - old) + new + 1
        } else {
            (u64::MAX - old) + new + 1
        }
    } else {
        new - old
    }
}

struct RateEntry {
    key: String,
    time_ns: u64,
    last: Value,
}

/// Converts cumulative readings (counter, derive, absolute) into
/// per-second rates by remembering the previous observation per
/// `identifier/ds-name`. Gauges pass through unchanged. The first
/// observation of a key yields no rate.
pub struct RateCache {
    entries: HashTable<RateEntry>,
}

impl RateCache {
    pub fn new() -> Self {
        Self {
            entries: HashTable::new(4),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Per-second rate for one data source of `vl`, or `None` when no
    /// rate can be computed yet (first sight, or time went backwards).
    pub fn rate(&mut self, vl: &ValueList, ds_name: &str, value: Value) -> Option<f64> {
        if let Value::Gauge(g) = value {
            return Some(g);
        }

        let mut key = vl.identifier();
        key.push('/');
        key.push_str(ds_name);
        let hash = hash_update_str(HASH_INIT, &key);

        let seen = match self.entries.lookup_mut(hash, |e| e.key == key) {
            None => None,
            Some(entry) if vl.time_ns <= entry.time_ns => Some(None),
            Some(entry) => {
                let dt = (vl.time_ns - entry.time_ns) as f64 / 1e9;
                let rate = match (entry.last, value) {
                    (Value::Counter(old), Value::Counter(new)) => {
                        Some(counter_diff(old, new) as f64 / dt)
                    }
                    (Value::Derive(old), Value::Derive(new)) => {
                        // The difference can exceed the i64 range.
                        Some((new as i128 - old as i128) as f64 / dt)
                    }
                    (Value::Absolute(_), Value::Absolute(new)) => Some(new as f64 / dt),
                    // Type changed under the same name; start over.
                    _ => None,
                };
                entry.time_ns = vl.time_ns;
                entry.last = value;
                Some(rate)
            }
        };

        match seen {
            Some(rate) => rate,
            None => {
                self.entries.insert(
                    hash,
                    RateEntry {
                        key,
                        time_ns: vl.time_ns,
                        last: value,
                    },
                );
                None
            }
        }
    }

    /// Forget entries not updated since `cutoff_ns`. Runs as one bulk
    /// sweep over the underlying table.
    pub fn prune_older_than(&mut self, cutoff_ns: u64) {
        self.entries.retain(|e| e.time_ns >= cutoff_ns);
    }
}

impl Default for RateCache {
    fn default() -> Self {
        Self::new()
    }
}
