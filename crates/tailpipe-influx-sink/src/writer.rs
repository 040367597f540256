// SPDX-License-Identifier: MIT
// Copyright (c) 2025-2026 tailpipe.dev

//! Batched line protocol writer.
//!
//! A [`Destination`] accumulates rendered lines in a fixed-size
//! [`Buffer`] and sends the whole batch in one POST when the batch
//! buffer fills up or a flush is requested. Sending goes through the
//! shared [`HttpReactor`]; a full buffer is handed off and replaced in
//! one step, so formatting never waits on the network.

use std::sync::Arc;
use std::time::Duration;

use log::error;
use parking_lot::Mutex;

use tailpipe::buffer::{Buffer, BufferError};
use tailpipe::reactor::{HttpReactor, Transfer};
use tailpipe::value::{now_ns, RateCache, Value, ValueList, ValueSink};

use crate::config::{ConfigError, DestinationConfig};
use crate::template::{AttrTemplate, FormatFields};

/// Render a gauge the line protocol way: 15 fractional digits and a
/// signed two-digit exponent, `4.200000000000000e+01`.
pub fn format_gauge(g: f64) -> String {
    let s = format!("{:.15e}", g);
    match s.split_once('e') {
        Some((mantissa, exp)) => {
            let (sign, digits) = match exp.strip_prefix('-') {
                Some(d) => ("-", d),
                None => ("+", exp),
            };
            format!("{}e{}{:0>2}", mantissa, sign, digits)
        }
        // Non-finite values render without an exponent.
        None => s,
    }
}

fn put_value(buf: &mut Buffer, value: Value, int_as_float: bool) -> Result<usize, BufferError> {
    let suffix = if int_as_float { ".0" } else { "i" };
    match value {
        Value::Gauge(g) => buf.putstr(&format_gauge(g)),
        Value::Counter(c) => buf.printf(format_args!("{}{}", c, suffix)),
        Value::Derive(d) => buf.printf(format_args!("{}{}", d, suffix)),
        Value::Absolute(a) => buf.printf(format_args!("{}{}", a, suffix)),
    }
}

fn put_field(
    buf: &mut Buffer,
    name: &str,
    value: Value,
    int_as_float: bool,
) -> Result<usize, BufferError> {
    let orig = buf.getpos();
    let result = buf
        .putstr(name)
        .and_then(|_| buf.putc(b'='))
        .and_then(|_| put_value(buf, value, int_as_float));
    match result {
        Ok(_) => Ok(buf.getpos() - orig),
        Err(e) => {
            buf.setpos(orig)?;
            Err(e)
        }
    }
}

/// Append one full line for `vl`. With `field = Some(i)` only that
/// value is written, under the field name `value`; otherwise all
/// non-NaN values go into a single line. Rolls back on overflow.
fn format_line(
    attrs: &AttrTemplate,
    buf: &mut Buffer,
    vl: &ValueList,
    values: &[(String, Value)],
    field: Option<usize>,
    int_as_float: bool,
) -> Result<usize, BufferError> {
    let orig = buf.getpos();
    let field_name = field.map(|i| values[i].0.as_str()).unwrap_or("");
    let result = (|| {
        attrs.format(buf, vl, field_name)?;
        buf.putc(b' ')?;
        match field {
            Some(i) => {
                put_field(buf, "value", values[i].1, int_as_float)?;
            }
            None => {
                let mut initial = true;
                for (name, value) in values {
                    if value.is_nan() {
                        continue;
                    }
                    if !initial {
                        buf.putc(b',')?;
                    }
                    initial = false;
                    put_field(buf, name, *value, int_as_float)?;
                }
            }
        }
        buf.printf(format_args!(" {}\n", vl.time_ns))?;
        Ok(())
    })();
    match result {
        Ok(()) => Ok(buf.getpos() - orig),
        Err(e) => {
            buf.setpos(orig)?;
            Err(e)
        }
    }
}

fn has_values(values: &[(String, Value)], field: Option<usize>) -> bool {
    match field {
        Some(i) => !values[i].1.is_nan(),
        None => values.iter().any(|(_, v)| !v.is_nan()),
    }
}

struct Inner {
    buf: Buffer,
    /// Timestamp of the oldest line in `buf`, 0 when empty.
    oldest_ns: u64,
    rates: RateCache,
}

/// One InfluxDB endpoint with its batch buffer.
pub struct Destination {
    name: String,
    url: String,
    auth: Option<(String, String)>,
    attrs: AttrTemplate,
    store_rates: bool,
    int_as_float: bool,
    timeout: Duration,
    reactor: Arc<HttpReactor>,
    inner: Mutex<Inner>,
}

impl Destination {
    pub fn from_config(
        config: &DestinationConfig,
        reactor: Arc<HttpReactor>,
    ) -> Result<Arc<Self>, ConfigError> {
        config.validate()?;

        let attrs = match &config.format {
            Some(fmt) => {
                let mut attrs = AttrTemplate::new(fmt).map_err(|e| {
                    ConfigError::Invalid(format!("{}: format: {}", config.name, e))
                })?;
                for tag in &config.tags {
                    attrs.add_tag(&tag.name, &tag.template).map_err(|e| {
                        ConfigError::Invalid(format!("{}: tag {}: {}", config.name, tag.name, e))
                    })?;
                }
                attrs
            }
            None => AttrTemplate::default_attrs(),
        };

        let size = config.effective_buffer_size();
        let buf = Buffer::new(size, size)
            .map_err(|_| ConfigError::Invalid(format!("{}: bad buffer size", config.name)))?;

        let auth = match (&config.username, &config.password) {
            (Some(user), Some(password)) => Some((user.clone(), password.clone())),
            _ => None,
        };

        Ok(Arc::new(Self {
            name: config.name.clone(),
            url: config.effective_url(),
            auth,
            attrs,
            store_rates: config.store_rates,
            int_as_float: config.int_as_float,
            timeout: Duration::from_millis(config.effective_request_timeout_ms()),
            reactor,
            inner: Mutex::new(Inner {
                buf,
                oldest_ns: 0,
                rates: RateCache::new(),
            }),
        }))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Send the current batch if it is old enough. A zero timeout
    /// flushes unconditionally; otherwise only a batch whose oldest
    /// line predates `now - timeout` is sent.
    pub fn flush(&self, timeout: Duration) {
        let cutoff = if timeout.is_zero() {
            0
        } else {
            now_ns().saturating_sub(timeout.as_nanos() as u64)
        };

        let body = {
            let mut inner = self.inner.lock();
            if inner.oldest_ns != 0 && (cutoff == 0 || inner.oldest_ns < cutoff) {
                inner.oldest_ns = 0;
                Some(inner.buf.cycle())
            } else {
                None
            }
        };

        if let Some(body) = body {
            if !body.is_empty() && self.send(body) {
                self.reactor.run();
            }
        }
    }

    fn effective_values(&self, rates: &mut RateCache, vl: &ValueList) -> Vec<(String, Value)> {
        if !self.store_rates {
            return vl.values.clone();
        }
        vl.values
            .iter()
            .map(|(name, value)| {
                let rate = rates.rate(vl, name, *value).unwrap_or(f64::NAN);
                (name.clone(), Value::Gauge(rate))
            })
            .collect()
    }

    /// Append one line to the batch. When the batch is full it is
    /// handed to `out` for sending and the line retried against the
    /// fresh buffer; a line too big for an empty buffer is dropped.
    fn submit_line(
        &self,
        inner: &mut Inner,
        vl: &ValueList,
        values: &[(String, Value)],
        field: Option<usize>,
        out: &mut Vec<Vec<u8>>,
    ) {
        if !has_values(values, field) {
            return;
        }

        if inner.oldest_ns == 0 || inner.oldest_ns > vl.time_ns {
            inner.oldest_ns = vl.time_ns;
        }

        if format_line(&self.attrs, &mut inner.buf, vl, values, field, self.int_as_float).is_ok() {
            return;
        }

        let full = inner.buf.cycle();
        if !full.is_empty() {
            out.push(full);
        }

        if format_line(&self.attrs, &mut inner.buf, vl, values, field, self.int_as_float).is_ok() {
            inner.oldest_ns = vl.time_ns;
        } else {
            error!("influx {}: line does not fit the buffer, dropping", self.name);
            inner.oldest_ns = 0;
        }
    }

    fn send(&self, body: Vec<u8>) -> bool {
        let name = self.name.clone();
        self.reactor.add(Transfer {
            url: self.url.clone(),
            body,
            auth: self.auth.clone(),
            timeout: self.timeout,
            callback: Box::new(move |result| match result {
                Err(e) => error!("influx {}: {}", name, e),
                Ok(resp) if !resp.is_success() => {
                    let body = String::from_utf8_lossy(&resp.body);
                    error!(
                        "influx {}: HTTP error {}{}{}",
                        name,
                        resp.status,
                        if body.is_empty() { "" } else { ": " },
                        body
                    );
                }
                Ok(_) => {}
            }),
        })
    }
}

impl ValueSink for Destination {
    fn dispatch(&self, vl: &ValueList) {
        let mut to_send = Vec::new();
        {
            let mut inner = self.inner.lock();
            let values = self.effective_values(&mut inner.rates, vl);

            if self.attrs.fields().contains(FormatFields::FIELD) {
                // One line per field; each carries the field's name in
                // the measurement.
                for i in 0..values.len() {
                    self.submit_line(&mut inner, vl, &values, Some(i), &mut to_send);
                }
            } else {
                self.submit_line(&mut inner, vl, &values, None, &mut to_send);
            }
        }

        let mut must_run = false;
        for body in to_send {
            must_run |= self.send(body);
        }
        if must_run {
            self.reactor.run();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> ValueList {
        ValueList {
            host: "h1".to_string(),
            plugin: "cpu".to_string(),
            plugin_instance: "0".to_string(),
            type_: "cpu".to_string(),
            type_instance: "idle".to_string(),
            time_ns: 1_700_000_000_000_000_000,
            values: vec![("value".to_string(), Value::Gauge(42.0))],
        }
    }

    fn line_for(vl: &ValueList, field: Option<usize>, int_as_float: bool) -> String {
        let attrs = AttrTemplate::default_attrs();
        let mut buf = Buffer::fixed(1024);
        format_line(&attrs, &mut buf, vl, &vl.values, field, int_as_float).unwrap();
        buf.getstr().into_owned()
    }

    #[test]
    fn test_format_gauge_matches_wire_format() {
        assert_eq!(format_gauge(42.0), "4.200000000000000e+01");
        assert_eq!(format_gauge(0.0), "0.000000000000000e+00");
        assert_eq!(format_gauge(-0.0015), "-1.500000000000000e-03");
        assert_eq!(format_gauge(1.0e100), "1.000000000000000e+100");
    }

    #[test]
    fn test_single_gauge_line() {
        assert_eq!(
            line_for(&sample(), Some(0), false),
            "cpu_value,host=h1,instance=0,type=cpu,type_instance=idle \
             value=4.200000000000000e+01 1700000000000000000\n"
        );
    }

    #[test]
    fn test_integer_suffix() {
        let mut vl = sample();
        vl.values = vec![("value".to_string(), Value::Counter(175))];
        assert!(line_for(&vl, Some(0), false).contains(" value=175i "));
        assert!(line_for(&vl, Some(0), true).contains(" value=175.0 "));

        vl.values = vec![("value".to_string(), Value::Derive(-3))];
        assert!(line_for(&vl, Some(0), false).contains(" value=-3i "));
    }

    #[test]
    fn test_multi_field_line_skips_nan() {
        let mut vl = sample();
        vl.values = vec![
            ("rx".to_string(), Value::Counter(10)),
            ("dropped".to_string(), Value::Gauge(f64::NAN)),
            ("tx".to_string(), Value::Counter(20)),
        ];
        let attrs = AttrTemplate::new("%p").unwrap();
        let mut buf = Buffer::fixed(1024);
        format_line(&attrs, &mut buf, &vl, &vl.values, None, false).unwrap();
        assert_eq!(buf.getstr(), "cpu rx=10i,tx=20i 1700000000000000000\n");
    }

    #[test]
    fn test_all_nan_has_no_values() {
        let values = vec![
            ("a".to_string(), Value::Gauge(f64::NAN)),
            ("b".to_string(), Value::Gauge(f64::NAN)),
        ];
        assert!(!has_values(&values, None));
        assert!(!has_values(&values, Some(1)));
        let values = vec![("a".to_string(), Value::Counter(0))];
        assert!(has_values(&values, None));
    }

    #[test]
    fn test_format_line_rolls_back_when_full() {
        let vl = sample();
        let attrs = AttrTemplate::default_attrs();
        let mut buf = Buffer::fixed(32);
        buf.putstr("existing").unwrap();
        assert!(format_line(&attrs, &mut buf, &vl, &vl.values, Some(0), false).is_err());
        assert_eq!(buf.getstr(), "existing");
    }
}
