// SPDX-License-Identifier: MIT
// Copyright (c) 2025-2026 tailpipe.dev

//! Tailpipe - log-to-metrics collection core
//!
//! Building blocks for a small metrics pipeline that follows log
//! files, extracts typed values with regular expressions, and ships
//! them to downstream writers.
//!
//! # Overview
//!
//! ```text
//! log file --> Tail --> TailMatch/Matcher --> ValueList --> ValueSink
//!                                                             |
//!                                             writer crates (HTTP via
//!                                             HttpReactor, batched in
//!                                             Buffer)
//! ```
//!
//! The crate provides:
//! - [`tail`]: `tail -F` style file following with rotation handling
//! - [`matcher`]: regex match rules with per-interval accumulators
//! - [`value`]: the value-list model, sink trait and rate conversion
//! - [`buffer`]: bounded append buffer with atomic batch handoff
//! - [`reactor`]: shared blocking HTTP transfer reactor
//! - [`fdpoll`]: callback-driven file descriptor poller
//! - [`hashtable`], [`avl`]: the lookup structures the above build on

pub mod avl;
pub mod buffer;
pub mod fdpoll;
pub mod hashtable;
pub mod matcher;
pub mod reactor;
pub mod tail;
pub mod value;

pub use buffer::{Buffer, BufferError};
pub use matcher::{CounterOp, GaugeOp, MatchAction, MatchError, MatchValue, Matcher};
pub use tail::{SimpleLabels, Tail, TailMatch};
pub use value::{Value, ValueList, ValueSink};
