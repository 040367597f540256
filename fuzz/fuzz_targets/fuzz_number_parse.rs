// SPDX-License-Identifier: MIT
// Copyright (c) 2025-2026 tailpipe.dev

#![no_main]

use libfuzzer_sys::fuzz_target;
use tailpipe::matcher::{parse_i64, parse_u64};

fuzz_target!(|data: &[u8]| {
    let Ok(s) = std::str::from_utf8(data) else {
        return;
    };

    let _ = parse_u64(s);
    let _ = parse_i64(s);
});
