// SPDX-License-Identifier: MIT
// Copyright (c) 2025-2026 tailpipe.dev

//! End-to-end tail scenarios: several rules on one file, across
//! several read intervals.

use std::fs;
use std::io::Write;
use std::path::Path;
use std::sync::{Arc, Mutex};

use tailpipe::matcher::{CounterOp, GaugeOp, MatchValue};
use tailpipe::tail::{SimpleLabels, TailMatch};
use tailpipe::value::{Value, ValueList, ValueSink};

struct Collector {
    seen: Mutex<Vec<ValueList>>,
}

impl Collector {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            seen: Mutex::new(Vec::new()),
        })
    }

    fn take(&self) -> Vec<ValueList> {
        std::mem::take(&mut self.seen.lock().unwrap())
    }
}

impl ValueSink for Collector {
    fn dispatch(&self, vl: &ValueList) {
        self.seen.lock().unwrap().push(vl.clone());
    }
}

fn append(path: &Path, text: &str) {
    let mut f = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .unwrap();
    f.write_all(text.as_bytes()).unwrap();
    f.sync_all().unwrap();
}

fn mail_log_watcher(path: &Path, sink: Arc<Collector>) -> TailMatch {
    let mut tm = TailMatch::new(path, "h1".to_string(), sink);
    tm.add_match_simple(
        r"bytes sent=(\d+)",
        None,
        MatchValue::counter(CounterOp::Add),
        SimpleLabels {
            plugin: "mail".to_string(),
            type_: "ipt_bytes".to_string(),
            type_instance: "sent".to_string(),
            ..Default::default()
        },
    )
    .unwrap();
    tm.add_match_simple(
        r"queue depth=(\d+)",
        Some("selftest"),
        MatchValue::gauge(GaugeOp::Last),
        SimpleLabels {
            plugin: "mail".to_string(),
            type_: "gauge".to_string(),
            type_instance: "depth".to_string(),
            ..Default::default()
        },
    )
    .unwrap();
    tm
}

#[test]
fn test_two_rules_three_intervals() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("mail.log");
    append(&path, "history that must not count: bytes sent=9999\n");

    let sink = Collector::new();
    let mut tm = mail_log_watcher(&path, sink.clone());

    // Interval 1: seeks to the end, sees nothing.
    tm.read().unwrap();
    let got = sink.take();
    assert_eq!(got.len(), 2);
    assert_eq!(got[0].values[0].1, Value::Counter(0));
    assert!(got[1].values[0].1.is_nan());

    // Interval 2: traffic plus an excluded line.
    append(
        &path,
        "bytes sent=100\n\
         queue depth=4\n\
         bytes sent=50\n\
         selftest queue depth=99\n\
         unrelated noise\n\
         bytes sent=25\n\
         queue depth=10\n",
    );
    tm.read().unwrap();
    let got = sink.take();
    assert_eq!(got.len(), 2);

    let counter = &got[0];
    assert_eq!(counter.plugin, "mail");
    assert_eq!(counter.type_, "ipt_bytes");
    assert_eq!(counter.type_instance, "sent");
    assert_eq!(counter.values[0].1, Value::Counter(175));

    let gauge = &got[1];
    assert_eq!(gauge.type_instance, "depth");
    assert_eq!(gauge.values[0].1, Value::Gauge(10.0));

    // Interval 3: counters carry forward, gauges start over.
    append(&path, "bytes sent=5\n");
    tm.read().unwrap();
    let got = sink.take();
    assert_eq!(got[0].values[0].1, Value::Counter(180));
    assert!(got[1].values[0].1.is_nan());
}

#[test]
fn test_survives_rotation_mid_watch() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("mail.log");
    append(&path, "");

    let sink = Collector::new();
    let mut tm = mail_log_watcher(&path, sink.clone());
    tm.read().unwrap();
    sink.take();

    append(&path, "bytes sent=10\n");
    fs::rename(&path, dir.path().join("mail.log.1")).unwrap();
    append(&path, "bytes sent=20\n");

    tm.read().unwrap();
    let got = sink.take();
    // The line written before the rename and the one after both count.
    assert_eq!(got[0].values[0].1, Value::Counter(30));
}

#[test]
fn test_identifier_of_submitted_values() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("mail.log");
    append(&path, "");

    let sink = Collector::new();
    let mut tm = mail_log_watcher(&path, sink.clone());
    tm.read().unwrap();

    let got = sink.take();
    assert_eq!(got[0].identifier(), "h1/mail/ipt_bytes-sent");
    assert_eq!(got[1].identifier(), "h1/mail/gauge-depth");
}
