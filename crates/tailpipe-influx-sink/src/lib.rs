// SPDX-License-Identifier: MIT
// Copyright (c) 2025-2026 tailpipe.dev

//! Tailpipe InfluxDB Sink
//!
//! Turns dispatched value lists into InfluxDB v1 Line Protocol and
//! POSTs them in batches.
//!
//! This crate provides:
//! - YAML-based configuration for one or more write endpoints
//! - Measurement and tag templating (`%h`, `%p`, `%i`, `%t`, `%j`, `%f`)
//! - Line protocol rendering with proper quoting
//! - Fixed-size batching with overflow handoff and timed flushing
//! - Optional conversion of cumulative values to per-second rates
//!
//! # Overview
//!
//! ```text
//! ValueList --> AttrTemplate --> Buffer (batch) --> HttpReactor --> InfluxDB
//! ```
//!
//! A [`writer::Destination`] implements `tailpipe::ValueSink`, so it
//! plugs directly under a `TailMatch` or any other producer.

pub mod config;
pub mod template;
pub mod writer;

pub use config::{ConfigError, DestinationConfig, WriterConfig};
pub use template::{AttrTemplate, FormatFields, TemplateError};
pub use writer::Destination;
