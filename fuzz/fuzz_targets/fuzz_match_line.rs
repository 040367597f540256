// SPDX-License-Identifier: MIT
// Copyright (c) 2025-2026 tailpipe.dev

#![no_main]

use libfuzzer_sys::fuzz_target;
use tailpipe::matcher::{CounterOp, GaugeOp, MatchAction, MatchValue, Matcher};

fuzz_target!(|data: &[u8]| {
    let Ok(line) = std::str::from_utf8(data) else {
        return;
    };

    let mut gauge = Matcher::new(
        r"v=([^\s]+)",
        Some("skip"),
        MatchAction::Accumulate(MatchValue::gauge(GaugeOp::Average)),
    )
    .unwrap();
    let mut counter = Matcher::new(
        r"n=([^\s]+)",
        None,
        MatchAction::Accumulate(MatchValue::counter(CounterOp::Add)),
    )
    .unwrap();

    // Arbitrary input may fail to parse, but must never panic.
    let _ = gauge.apply(line);
    let _ = counter.apply(line);
});
