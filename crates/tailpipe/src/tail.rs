// SPDX-License-Identifier: MIT
// Copyright (c) 2025-2026 tailpipe.dev

//! Log file following with rotation handling, and the glue that runs a
//! set of match rules against every new line.
//!
//! [`Tail`] follows a single file the way `tail -F` does: the first
//! open seeks to the end (history is not replayed), a changed inode
//! means the file was rotated and the replacement is read from the
//! start, and a shrinking file means truncation and rereads from the
//! start. A missing file is not an error; reads simply return nothing
//! until it appears.

use std::fs::File;
use std::io::{self, BufRead, BufReader, Seek, SeekFrom};
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::warn;

use crate::matcher::{MatchAction, MatchError, MatchValue, Matcher};
use crate::value::{now_ns, Value, ValueList, ValueSink};

pub struct Tail {
    path: PathBuf,
    reader: Option<BufReader<File>>,
    inode: u64,
    offset: u64,
    /// Carries an incomplete trailing line between reads.
    partial: String,
    opened_before: bool,
}

impl Tail {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self {
            path: path.into(),
            reader: None,
            inode: 0,
            offset: 0,
            partial: String::new(),
            opened_before: false,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Open (or reopen) the file. `Ok(false)` means the file does not
    /// currently exist.
    fn reopen(&mut self) -> io::Result<bool> {
        let meta = match std::fs::metadata(&self.path) {
            Ok(m) => m,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(e),
        };

        let mut file = File::open(&self.path)?;
        if !self.opened_before {
            // First open: skip history, follow from here on.
            self.offset = file.seek(SeekFrom::End(0))?;
        } else {
            self.offset = 0;
        }
        self.opened_before = true;
        self.inode = meta.ino();
        self.partial.clear();
        self.reader = Some(BufReader::new(file));
        Ok(true)
    }

    /// Read the next complete line, without its newline. `Ok(None)`
    /// means no complete line is available right now; an unterminated
    /// trailing fragment is kept for the next call.
    ///
    /// The current handle is drained before a rotation is acted on, so
    /// lines written just before the rename are not lost.
    pub fn read_line(&mut self) -> io::Result<Option<String>> {
        // Two passes at most: one against the current handle, one after
        // a rotation or truncation was detected at EOF.
        for _ in 0..2 {
            if self.reader.is_none() && !self.reopen()? {
                return Ok(None);
            }
            let reader = match self.reader.as_mut() {
                Some(r) => r,
                None => return Ok(None),
            };

            let mut chunk = String::new();
            let n = reader.read_line(&mut chunk)?;
            if n > 0 {
                self.offset += n as u64;
                if chunk.ends_with('\n') {
                    chunk.pop();
                    if chunk.ends_with('\r') {
                        chunk.pop();
                    }
                    if self.partial.is_empty() {
                        return Ok(Some(chunk));
                    }
                    let mut line = std::mem::take(&mut self.partial);
                    line.push_str(&chunk);
                    return Ok(Some(line));
                }
                self.partial.push_str(&chunk);
                return Ok(None);
            }

            // EOF. Recheck the path; a rotated or truncated file makes
            // the second pass pick up the replacement.
            let meta = match std::fs::metadata(&self.path) {
                Ok(m) => m,
                Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
                Err(e) => return Err(e),
            };
            if meta.ino() == self.inode && meta.size() >= self.offset {
                return Ok(None);
            }
            self.reader = None;
            self.offset = 0;
        }
        Ok(None)
    }
}

/// Identity labels for samples submitted by a simple match rule.
#[derive(Debug, Clone, Default)]
pub struct SimpleLabels {
    pub plugin: String,
    pub plugin_instance: String,
    pub type_: String,
    pub type_instance: String,
}

/// Post-read hook for a rule added with [`TailMatch::add_match`];
/// receives the rule to inspect and reset.
pub type SubmitCallback = Box<dyn FnMut(&mut Matcher) + Send>;

enum SubmitAction {
    /// Dispatch the accumulated value under these labels.
    Simple(SimpleLabels),
    /// Hand the rule to a callback.
    Custom(SubmitCallback),
}

struct MatchEntry {
    matcher: Matcher,
    submit: SubmitAction,
}

/// Follows one file and applies a list of match rules to every new
/// line. Each [`read`](TailMatch::read) drains the file, then submits
/// every simple rule's accumulator exactly once and starts its next
/// interval.
pub struct TailMatch {
    tail: Tail,
    matches: Vec<MatchEntry>,
    host: String,
    sink: Arc<dyn ValueSink>,
}

impl TailMatch {
    pub fn new<P: Into<PathBuf>>(path: P, host: String, sink: Arc<dyn ValueSink>) -> Self {
        Self {
            tail: Tail::new(path),
            matches: Vec::new(),
            host,
            sink,
        }
    }

    pub fn path(&self) -> &Path {
        self.tail.path()
    }

    /// Add a rule with its own submit hook, called exactly once after
    /// every read. The hook owns interval handling: query the rule's
    /// accumulator and reset it as it sees fit.
    pub fn add_match<F>(&mut self, matcher: Matcher, submit: F)
    where
        F: FnMut(&mut Matcher) + Send + 'static,
    {
        self.matches.push(MatchEntry {
            matcher,
            submit: SubmitAction::Custom(Box::new(submit)),
        });
    }

    /// Add an accumulating rule that is dispatched under `labels` after
    /// every read.
    pub fn add_match_simple(
        &mut self,
        pattern: &str,
        exclude: Option<&str>,
        value: MatchValue,
        labels: SimpleLabels,
    ) -> Result<(), MatchError> {
        let matcher = Matcher::new(pattern, exclude, MatchAction::Accumulate(value))?;
        self.matches.push(MatchEntry {
            matcher,
            submit: SubmitAction::Simple(labels),
        });
        Ok(())
    }

    /// Drain new lines, apply every rule to each line in the order the
    /// rules were added, then submit the accumulators. Rule failures on
    /// individual lines are logged and do not stop the read.
    pub fn read(&mut self) -> io::Result<()> {
        while let Some(line) = self.tail.read_line()? {
            for entry in &mut self.matches {
                if let Err(e) = entry.matcher.apply(&line) {
                    warn!(
                        "tail {}: match failed on line {:?}: {}",
                        self.tail.path.display(),
                        line,
                        e
                    );
                }
            }
        }

        let time_ns = now_ns();
        for entry in &mut self.matches {
            let labels = match &mut entry.submit {
                SubmitAction::Custom(submit) => {
                    submit(&mut entry.matcher);
                    continue;
                }
                SubmitAction::Simple(labels) => labels,
            };
            let Some(mv) = entry.matcher.value() else {
                continue;
            };

            // A gauge nobody fed this interval reports NaN, and sinks
            // decide what to drop.
            let value = if mv.seen() == 0 && matches!(mv.value(), Value::Gauge(_)) {
                Value::Gauge(f64::NAN)
            } else {
                mv.value()
            };

            let vl = ValueList {
                host: self.host.clone(),
                plugin: labels.plugin.clone(),
                plugin_instance: labels.plugin_instance.clone(),
                type_: labels.type_.clone(),
                type_instance: labels.type_instance.clone(),
                time_ns,
                values: vec![("value".to_string(), value)],
            };
            self.sink.dispatch(&vl);
            entry.matcher.reset_interval();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::io::Write;
    use std::sync::Mutex;

    use crate::matcher::{CounterOp, GaugeOp};

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

    #[test]
    fn test_first_open_skips_existing_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.log");
        append(&path, "old line\n");

        let mut tail = Tail::new(&path);
        assert_eq!(tail.read_line().unwrap(), None);

        append(&path, "new line\n");
        assert_eq!(tail.read_line().unwrap().as_deref(), Some("new line"));
    }

    #[test]
    fn test_missing_file_is_tolerated() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("not-yet.log");

        let mut tail = Tail::new(&path);
        assert_eq!(tail.read_line().unwrap(), None);

        // The first successful open still lands at the end of the file,
        // even when the file appeared late.
        append(&path, "first\n");
        assert_eq!(tail.read_line().unwrap(), None);
        append(&path, "second\n");
        assert_eq!(tail.read_line().unwrap().as_deref(), Some("second"));
    }

    #[test]
    fn test_partial_line_is_held_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.log");
        append(&path, "");

        let mut tail = Tail::new(&path);
        tail.read_line().unwrap();

        append(&path, "incompl");
        assert_eq!(tail.read_line().unwrap(), None);
        append(&path, "ete\n");
        assert_eq!(tail.read_line().unwrap().as_deref(), Some("incomplete"));
    }

    #[test]
    fn test_rotation_reads_replacement_from_start() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.log");
        append(&path, "");

        let mut tail = Tail::new(&path);
        tail.read_line().unwrap();
        append(&path, "before rotate\n");
        assert_eq!(
            tail.read_line().unwrap().as_deref(),
            Some("before rotate")
        );

        let rotated = dir.path().join("app.log.1");
        fs::rename(&path, &rotated).unwrap();
        append(&path, "after rotate\n");
        assert_eq!(tail.read_line().unwrap().as_deref(), Some("after rotate"));
    }

    #[test]
    fn test_truncation_restarts_from_start() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.log");
        append(&path, "");

        let mut tail = Tail::new(&path);
        tail.read_line().unwrap();
        append(&path, "line one is fairly long\n");
        assert!(tail.read_line().unwrap().is_some());

        fs::write(&path, "short\n").unwrap();
        assert_eq!(tail.read_line().unwrap().as_deref(), Some("short"));
    }

    #[test]
    fn test_counter_add_scenario() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.log");
        append(&path, "");

        let sink = Collector::new();
        let mut tm = TailMatch::new(&path, "h1".to_string(), sink.clone());
        tm.add_match_simple(
            r"bytes sent=(\d+)",
            None,
            MatchValue::counter(CounterOp::Add),
            SimpleLabels {
                plugin: "mail".to_string(),
                type_: "ipt_bytes".to_string(),
                ..Default::default()
            },
        )
        .unwrap();
        tm.read().unwrap();
        sink.take();

        append(
            &path,
            "bytes sent=100\nbytes sent=50\nunrelated noise\nbytes sent=25\n",
        );
        tm.read().unwrap();

        let got = sink.take();
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].plugin, "mail");
        assert_eq!(got[0].values[0].1, Value::Counter(175));
    }

    #[test]
    fn test_exclude_and_gauge_last_scenario() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.log");
        append(&path, "");

        let sink = Collector::new();
        let mut tm = TailMatch::new(&path, "h1".to_string(), sink.clone());
        tm.add_match_simple(
            r"depth=(\d+)",
            Some("test"),
            MatchValue::gauge(GaugeOp::Last),
            SimpleLabels {
                plugin: "queue".to_string(),
                type_: "gauge".to_string(),
                ..Default::default()
            },
        )
        .unwrap();
        tm.read().unwrap();
        sink.take();

        append(&path, "depth=4\ndepth=10\ntest depth=99\n");
        tm.read().unwrap();

        let got = sink.take();
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].values[0].1, Value::Gauge(10.0));

        // Nothing new: the next interval reports an unobserved gauge.
        tm.read().unwrap();
        let got = sink.take();
        assert_eq!(got.len(), 1);
        assert!(got[0].values[0].1.is_nan());
    }

    #[test]
    fn test_matches_apply_in_insertion_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.log");
        append(&path, "");

        let order = Arc::new(Mutex::new(Vec::new()));
        let sink = Collector::new();
        let mut tm = TailMatch::new(&path, "h1".to_string(), sink);
        for tag in ["first", "second"] {
            let order = order.clone();
            tm.add_match(
                Matcher::new(
                    "hit",
                    None,
                    MatchAction::Custom(Box::new(move |_, _| {
                        order.lock().unwrap().push(tag);
                        Ok(())
                    })),
                )
                .unwrap(),
                |_| (),
            );
        }
        tm.read().unwrap();
        append(&path, "hit\n");
        tm.read().unwrap();
        assert_eq!(*order.lock().unwrap(), ["first", "second"]);
    }

    #[test]
    fn test_submit_hook_runs_once_per_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.log");
        append(&path, "");

        let sink = Collector::new();
        let mut tm = TailMatch::new(&path, "h1".to_string(), sink);
        let readings = Arc::new(Mutex::new(Vec::new()));
        let readings2 = readings.clone();
        tm.add_match(
            Matcher::new(
                r"depth=(\d+)",
                None,
                MatchAction::Accumulate(MatchValue::gauge(GaugeOp::Last)),
            )
            .unwrap(),
            move |m: &mut Matcher| {
                readings2.lock().unwrap().push(m.value().unwrap().value());
                m.reset_interval();
            },
        );

        tm.read().unwrap();
        append(&path, "depth=4\ndepth=7\n");
        tm.read().unwrap();
        tm.read().unwrap();

        let got = readings.lock().unwrap();
        assert_eq!(got.len(), 3);
        assert!(got[0].is_nan());
        assert_eq!(got[1], Value::Gauge(7.0));
        // The hook's reset starts a fresh interval.
        assert!(got[2].is_nan());
    }
}
