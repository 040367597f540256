// SPDX-License-Identifier: MIT
// Copyright (c) 2025-2026 tailpipe.dev

//! Daemon configuration: which files to tail, which patterns to apply,
//! and where the values go.

use serde::Deserialize;
use tailpipe::matcher::{CounterOp, GaugeOp, MatchValue};
use tailpipe_influx_sink::config::WriterConfig;

/// Top-level daemon configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DaemonConfig {
    /// Seconds between read-and-submit rounds. None = default (10).
    pub interval_secs: Option<u64>,
    /// Host label override. None = the system hostname.
    pub hostname: Option<String>,
    /// Files to follow.
    pub tails: Vec<TailConfig>,
    /// Where the values go.
    pub writer: WriterConfig,
}

/// One file to follow with its match rules.
#[derive(Debug, Clone, Deserialize)]
pub struct TailConfig {
    pub file: String,
    /// The `plugin` label for every rule of this file.
    pub plugin: String,
    /// The `plugin_instance` label. None = empty.
    pub instance: Option<String>,
    pub matches: Vec<MatchConfig>,
}

/// One match rule.
#[derive(Debug, Clone, Deserialize)]
pub struct MatchConfig {
    pub regex: String,
    pub exclude: Option<String>,
    /// Value kind and aggregation, e.g. `counter` + `add`.
    #[serde(rename = "type")]
    pub kind: ValueKind,
    pub op: AggregateOp,
    /// The `type` label of submitted values.
    pub type_name: String,
    /// The `type_instance` label. None = empty.
    pub type_instance: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueKind {
    Gauge,
    Counter,
    Derive,
    Absolute,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AggregateOp {
    Average,
    Min,
    Max,
    Last,
    Set,
    Add,
    Inc,
}

impl MatchConfig {
    /// The accumulator this rule feeds, or an error message for a
    /// kind/op combination that does not exist.
    pub fn match_value(&self) -> Result<MatchValue, String> {
        match (self.kind, self.op) {
            (ValueKind::Gauge, AggregateOp::Average) => Ok(MatchValue::gauge(GaugeOp::Average)),
            (ValueKind::Gauge, AggregateOp::Min) => Ok(MatchValue::gauge(GaugeOp::Min)),
            (ValueKind::Gauge, AggregateOp::Max) => Ok(MatchValue::gauge(GaugeOp::Max)),
            (ValueKind::Gauge, AggregateOp::Last) => Ok(MatchValue::gauge(GaugeOp::Last)),
            (ValueKind::Gauge, AggregateOp::Inc) => Ok(MatchValue::gauge(GaugeOp::Inc)),
            (ValueKind::Gauge, AggregateOp::Add) => Ok(MatchValue::gauge(GaugeOp::Add)),
            (ValueKind::Counter, AggregateOp::Set) => Ok(MatchValue::counter(CounterOp::Set)),
            (ValueKind::Counter, AggregateOp::Add) => Ok(MatchValue::counter(CounterOp::Add)),
            (ValueKind::Counter, AggregateOp::Inc) => Ok(MatchValue::counter(CounterOp::Inc)),
            (ValueKind::Derive, AggregateOp::Set) => Ok(MatchValue::derive(CounterOp::Set)),
            (ValueKind::Derive, AggregateOp::Add) => Ok(MatchValue::derive(CounterOp::Add)),
            (ValueKind::Derive, AggregateOp::Inc) => Ok(MatchValue::derive(CounterOp::Inc)),
            (ValueKind::Absolute, AggregateOp::Set) => Ok(MatchValue::absolute()),
            (kind, op) => Err(format!("{:?} values do not support op {:?}", kind, op)),
        }
    }
}

impl DaemonConfig {
    pub fn load(path: &std::path::Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: DaemonConfig = serde_yaml::from_str(&content)?;
        for dest in &config.writer.destinations {
            dest.validate()?;
        }
        Ok(config)
    }

    pub fn interval_secs(&self) -> u64 {
        self.interval_secs.unwrap_or(10)
    }
}
