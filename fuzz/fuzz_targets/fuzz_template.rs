// SPDX-License-Identifier: MIT
// Copyright (c) 2025-2026 tailpipe.dev

#![no_main]

use libfuzzer_sys::fuzz_target;
use tailpipe::buffer::Buffer;
use tailpipe::value::{Value, ValueList};
use tailpipe_influx_sink::template::{check_format, render};

fuzz_target!(|data: &[u8]| {
    let Ok(fmt) = std::str::from_utf8(data) else {
        return;
    };

    // Only validated templates are ever rendered.
    if check_format(fmt).is_err() {
        return;
    }

    let vl = ValueList {
        host: "host name".to_string(),
        plugin: "plug,in".to_string(),
        plugin_instance: String::new(),
        type_: "type".to_string(),
        type_instance: "t i".to_string(),
        time_ns: 1,
        values: vec![("value".to_string(), Value::Gauge(1.0))],
    };

    let mut buf = Buffer::fixed(4096);
    let _ = render(&mut buf, fmt, &vl, "field");
});
