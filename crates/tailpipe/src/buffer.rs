// SPDX-License-Identifier: MIT
// Copyright (c) 2025-2026 tailpipe.dev

//! Append-oriented byte buffer with bounded growth and atomic handoff.
//!
//! A `Buffer` is the unit of batching throughout the crate: formatters
//! append line-protocol records to it, and when it fills up (or ages
//! out) the owner calls [`Buffer::cycle`] to take the accumulated bytes
//! while writing continues into a fresh region of the same size.
//!
//! The buffer tracks three quantities:
//!
//! - the *position* (`getpos`): number of bytes written so far
//! - the *allocation* (`alloc`): bytes currently reserved
//! - the *maximum* (`max`): the ceiling the allocation may grow to
//!
//! `pos <= alloc <= max` holds at all times. A buffer created with
//! `alloc == max` is static and never grows. Failed appends leave the
//! position untouched, so a sequence of records separated by rollbacks
//! never exposes a half-written record.

use std::borrow::Cow;
use std::fmt;

/// Errors reported by buffer operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferError {
    /// The write does not fit below the buffer's maximum size.
    NoSpace,
    /// The caller asked for something nonsensical (e.g. a forward
    /// `setpos`, or `len > max` at construction).
    InvalidArgument,
}

impl fmt::Display for BufferError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BufferError::NoSpace => write!(f, "no space left in buffer"),
            BufferError::InvalidArgument => write!(f, "invalid argument"),
        }
    }
}

impl std::error::Error for BufferError {}

/// Growable byte buffer with a hard growth ceiling.
pub struct Buffer {
    data: Vec<u8>,
    /// Bytes currently reserved. `data.capacity()` is at least this,
    /// but `alloc` is what the growth policy reasons about.
    alloc: usize,
    /// Growth ceiling. `alloc == max` means the buffer is static.
    max: usize,
}

impl Buffer {
    /// Create a buffer with `len` bytes reserved up front, allowed to
    /// grow up to `max` bytes.
    ///
    /// Fails with `InvalidArgument` if `len > max`.
    pub fn new(len: usize, max: usize) -> Result<Self, BufferError> {
        if len > max {
            return Err(BufferError::InvalidArgument);
        }
        Ok(Self {
            data: Vec::with_capacity(len),
            alloc: len,
            max,
        })
    }

    /// Create a static buffer: exactly `cap` bytes, never grows.
    pub fn fixed(cap: usize) -> Self {
        Self {
            data: Vec::with_capacity(cap),
            alloc: cap,
            max: cap,
        }
    }

    /// Drop the data region. The buffer stays usable; the next append
    /// re-allocates within the same `max`.
    pub fn clear(&mut self) {
        self.data = Vec::new();
        self.alloc = 0;
    }

    /// Current write position (bytes appended so far).
    #[inline]
    pub fn getpos(&self) -> usize {
        self.data.len()
    }

    /// Rewind the position. Only rewinding is allowed; moving the
    /// position forward would expose bytes that were never written.
    pub fn setpos(&mut self, pos: usize) -> Result<(), BufferError> {
        if pos > self.data.len() {
            return Err(BufferError::InvalidArgument);
        }
        self.data.truncate(pos);
        Ok(())
    }

    /// Bytes that can still be written before `max` is reached,
    /// assuming growth succeeds.
    #[inline]
    pub fn space_left(&self) -> usize {
        self.max - self.data.len()
    }

    /// Bytes that can be written without growing the allocation.
    #[inline]
    pub fn alloc_left(&self) -> usize {
        self.alloc - self.data.len()
    }

    /// Current allocation size.
    #[inline]
    pub fn alloc_size(&self) -> usize {
        self.alloc
    }

    /// Maximum size the buffer may grow to.
    #[inline]
    pub fn max_size(&self) -> usize {
        self.max
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Grow so that at least `needed` more bytes fit in the current
    /// allocation. Growth doubles the allocation (or jumps straight to
    /// the required size if doubling is not enough), capped at `max`.
    pub fn ensure_alloc(&mut self, needed: usize) -> Result<(), BufferError> {
        let required = self
            .data
            .len()
            .checked_add(needed)
            .ok_or(BufferError::NoSpace)?;
        if required <= self.alloc {
            return Ok(());
        }
        if required > self.max {
            return Err(BufferError::NoSpace);
        }
        let new_alloc = required.max(self.alloc.saturating_mul(2)).min(self.max);
        self.data.reserve_exact(new_alloc - self.data.len());
        self.alloc = new_alloc;
        Ok(())
    }

    /// Append a single byte.
    pub fn putc(&mut self, c: u8) -> Result<usize, BufferError> {
        self.ensure_alloc(1)?;
        self.data.push(c);
        Ok(1)
    }

    /// Append raw bytes. All-or-nothing: on `NoSpace` the position is
    /// unchanged.
    pub fn putmem(&mut self, bytes: &[u8]) -> Result<usize, BufferError> {
        self.ensure_alloc(bytes.len())?;
        self.data.extend_from_slice(bytes);
        Ok(bytes.len())
    }

    /// Append a string slice.
    pub fn putstr(&mut self, s: &str) -> Result<usize, BufferError> {
        self.putmem(s.as_bytes())
    }

    /// Append formatted text, `format_args!` style:
    ///
    /// ```
    /// # use tailpipe::buffer::Buffer;
    /// let mut buf = Buffer::new(16, 64).unwrap();
    /// buf.printf(format_args!("x={}", 42)).unwrap();
    /// assert_eq!(&*buf.getstr(), "x=42");
    /// ```
    ///
    /// Returns the number of bytes written. On error the position is
    /// rolled back to where it was before the call.
    pub fn printf(&mut self, args: fmt::Arguments<'_>) -> Result<usize, BufferError> {
        let orig = self.data.len();

        struct Sink<'a> {
            buf: &'a mut Buffer,
            err: Option<BufferError>,
        }

        impl fmt::Write for Sink<'_> {
            fn write_str(&mut self, s: &str) -> fmt::Result {
                match self.buf.putmem(s.as_bytes()) {
                    Ok(_) => Ok(()),
                    Err(e) => {
                        self.err = Some(e);
                        Err(fmt::Error)
                    }
                }
            }
        }

        let err = {
            let mut sink = Sink { buf: self, err: None };
            match fmt::write(&mut sink, args) {
                Ok(()) => None,
                // A formatter that fails without going through our sink
                // would be a Display impl error; report it as NoSpace
                // rather than panicking.
                Err(_) => Some(sink.err.unwrap_or(BufferError::NoSpace)),
            }
        };

        match err {
            None => Ok(self.data.len() - orig),
            Some(e) => {
                self.data.truncate(orig);
                Err(e)
            }
        }
    }

    /// The accumulated bytes.
    #[inline]
    pub fn bytes(&self) -> &[u8] {
        &self.data
    }

    /// The accumulated bytes as text. Invalid UTF-8 (possible when the
    /// buffer held raw `putmem` data) is replaced, not rejected; this
    /// accessor exists for diagnostics and formatting, not round-trips.
    pub fn getstr(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.data)
    }

    /// Atomic handoff: take the accumulated bytes, leaving the buffer
    /// empty with a fresh region of the same allocation size. The
    /// returned vector's length is the number of bytes that were used.
    pub fn cycle(&mut self) -> Vec<u8> {
        let fresh = Vec::with_capacity(self.alloc);
        std::mem::replace(&mut self.data, fresh)
    }
}

impl fmt::Debug for Buffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Buffer")
            .field("pos", &self.data.len())
            .field("alloc", &self.alloc)
            .field("max", &self.max)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_append_and_read_back() {
        let mut buf = Buffer::new(8, 64).unwrap();
        assert_eq!(buf.putstr("hello").unwrap(), 5);
        assert_eq!(buf.putc(b' ').unwrap(), 1);
        assert_eq!(buf.putmem(b"world").unwrap(), 5);
        assert_eq!(buf.getpos(), 11);
        assert_eq!(&*buf.getstr(), "hello world");
    }

    #[test]
    fn test_new_rejects_len_above_max() {
        assert_eq!(Buffer::new(10, 4).unwrap_err(), BufferError::InvalidArgument);
    }

    #[test]
    fn test_growth_is_doubling_capped_at_max() {
        let mut buf = Buffer::new(4, 64).unwrap();
        buf.putstr("abcd").unwrap();
        assert_eq!(buf.alloc_size(), 4);
        buf.putc(b'e').unwrap();
        assert_eq!(buf.alloc_size(), 8);
        buf.putstr("fghij").unwrap(); // 10 bytes total, fits in 16
        assert_eq!(buf.alloc_size(), 16);
    }

    #[test]
    fn test_growth_bound_property() {
        // Writing n bytes one at a time: final allocation <= max(initial, 2n).
        let initial = 4;
        let n = 1000;
        let mut buf = Buffer::new(initial, 8192).unwrap();
        for _ in 0..n {
            buf.putc(b'x').unwrap();
        }
        assert_eq!(buf.getpos(), n);
        assert!(buf.alloc_size() <= initial.max(2 * n));
    }

    #[test]
    fn test_no_space_leaves_position_unchanged() {
        let mut buf = Buffer::fixed(8);
        buf.putstr("abcdef").unwrap();
        assert_eq!(buf.putstr("ghi").unwrap_err(), BufferError::NoSpace);
        assert_eq!(buf.getpos(), 6);
        assert_eq!(&*buf.getstr(), "abcdef");
        // Two more still fit.
        buf.putstr("gh").unwrap();
        assert_eq!(buf.space_left(), 0);
    }

    #[test]
    fn test_printf_rolls_back_on_no_space() {
        let mut buf = Buffer::fixed(8);
        buf.putstr("abc").unwrap();
        let err = buf.printf(format_args!("{}", "defghijkl")).unwrap_err();
        assert_eq!(err, BufferError::NoSpace);
        assert_eq!(buf.getpos(), 3);
        assert_eq!(&*buf.getstr(), "abc");
    }

    #[test]
    fn test_setpos_rewind_only() {
        let mut buf = Buffer::new(16, 16).unwrap();
        buf.putstr("0123456789").unwrap();
        buf.setpos(4).unwrap();
        assert_eq!(&*buf.getstr(), "0123");
        assert_eq!(buf.setpos(9).unwrap_err(), BufferError::InvalidArgument);
        assert_eq!(buf.getpos(), 4);
    }

    #[test]
    fn test_cycle_hands_off_contents() {
        let mut buf = Buffer::new(16, 1024).unwrap();
        buf.putstr("aaaaaaaaaa").unwrap();
        let old = buf.cycle();
        assert_eq!(old.len(), 10);
        assert_eq!(old, b"aaaaaaaaaa");
        assert!(buf.is_empty());
        assert_eq!(buf.alloc_size(), 16);
        // The fresh region is independent of the old one.
        buf.putstr("bb").unwrap();
        assert_eq!(&*buf.getstr(), "bb");
        assert_eq!(old, b"aaaaaaaaaa");
    }

    #[test]
    fn test_cycle_keeps_grown_allocation() {
        let mut buf = Buffer::new(4, 1024).unwrap();
        buf.putstr("0123456789abcdef").unwrap();
        let grown = buf.alloc_size();
        assert!(grown >= 16);
        let old = buf.cycle();
        assert_eq!(old.len(), 16);
        assert_eq!(buf.alloc_size(), grown);
    }

    #[test]
    fn test_clear_then_reuse() {
        let mut buf = Buffer::new(8, 32).unwrap();
        buf.putstr("junk").unwrap();
        buf.clear();
        assert_eq!(buf.getpos(), 0);
        assert_eq!(buf.alloc_size(), 0);
        buf.putstr("fresh").unwrap();
        assert_eq!(&*buf.getstr(), "fresh");
    }

    #[test]
    fn test_interleaved_rollback_preserves_prefix() {
        let mut buf = Buffer::new(4, 12).unwrap();
        buf.putstr("one,").unwrap();
        let pos = buf.getpos();
        // Try to append a record that cannot fit, rolling back manually
        // the way the line formatters do.
        if buf.putstr("waytoolongrecord").is_err() {
            buf.setpos(pos).unwrap();
        }
        buf.putstr("two").unwrap();
        assert_eq!(&*buf.getstr(), "one,two");
    }
}
