// SPDX-License-Identifier: MIT
// Copyright (c) 2025-2026 tailpipe.dev

//! Uniform file-descriptor readiness interface.
//!
//! `FdPoll` presents a single register-and-run surface over the
//! platform's readiness facility; `mio::Poll` supplies the epoll /
//! kqueue backend so the per-OS differences stay out of this module.
//! The fd registry itself lives in this crate's [`HashTable`], keyed
//! by raw fd.
//!
//! Only `IN` and `OUT` are honored for registration. Callbacks may
//! additionally be handed `ERR` and `HUP` when the kernel reports
//! error or peer-close conditions.
//!
//! `FdPoll` is not internally synchronized; callers that share one
//! across threads serialize access themselves (the HTTP reactor wraps
//! its instance in a mutex held only by the active runner).

use std::io;
use std::os::unix::io::RawFd;
use std::time::Duration;

use bitflags::bitflags;
use mio::unix::SourceFd;
use mio::{Events, Interest, Poll, Token};

use crate::hashtable::{hash_update_mem, HashTable, HASH_INIT};

bitflags! {
    /// Readiness bits, poll(2)-flavored.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct EventSet: u8 {
        const IN  = 0x01;
        const OUT = 0x04;
        const ERR = 0x08;
        const HUP = 0x10;
    }
}

/// Callback invoked with the fd and the readiness bits observed.
pub type FdCallback = Box<dyn FnMut(RawFd, EventSet) + Send>;

struct FdEntry {
    fd: RawFd,
    events: EventSet,
    callback: FdCallback,
}

fn fd_hash(fd: RawFd) -> u64 {
    hash_update_mem(HASH_INIT, &fd.to_ne_bytes())
}

fn interest_for(events: EventSet) -> Option<Interest> {
    match (events.contains(EventSet::IN), events.contains(EventSet::OUT)) {
        (true, true) => Some(Interest::READABLE | Interest::WRITABLE),
        (true, false) => Some(Interest::READABLE),
        (false, true) => Some(Interest::WRITABLE),
        (false, false) => None,
    }
}

/// Readiness multiplexer dispatching to per-fd closures.
pub struct FdPoll {
    poll: Poll,
    events: Events,
    fds: HashTable<FdEntry>,
}

impl FdPoll {
    pub fn new() -> io::Result<Self> {
        Ok(Self {
            poll: Poll::new()?,
            events: Events::with_capacity(64),
            fds: HashTable::new(2),
        })
    }

    /// Number of fds currently watched.
    pub fn watched(&self) -> usize {
        self.fds.len()
    }

    /// Register or update an fd. An empty event set removes the fd
    /// (the callback argument is dropped); removing an fd that was
    /// never registered is a no-op.
    pub fn setfd(&mut self, fd: RawFd, events: EventSet, callback: FdCallback) -> io::Result<()> {
        let wanted = events & (EventSet::IN | EventSet::OUT);
        let Some(interest) = interest_for(wanted) else {
            self.removefd(fd);
            return Ok(());
        };

        let hash = fd_hash(fd);
        if let Some(entry) = self.fds.lookup_mut(hash, |e| e.fd == fd) {
            entry.callback = callback;
            if entry.events != wanted {
                self.poll
                    .registry()
                    .reregister(&mut SourceFd(&fd), Token(fd as usize), interest)?;
                entry.events = wanted;
            }
            return Ok(());
        }

        self.poll
            .registry()
            .register(&mut SourceFd(&fd), Token(fd as usize), interest)?;
        self.fds.insert(
            hash,
            FdEntry {
                fd,
                events: wanted,
                callback,
            },
        );
        Ok(())
    }

    /// Remove an fd from the watch set. Deregistration failures are
    /// ignored; the fd may already have been closed.
    pub fn removefd(&mut self, fd: RawFd) {
        if self.fds.remove(fd_hash(fd), |e| e.fd == fd).is_some() {
            let _ = self.poll.registry().deregister(&mut SourceFd(&fd));
        }
    }

    /// Wait up to `timeout` for readiness and dispatch callbacks.
    /// `None` waits indefinitely. Returns the number of callbacks
    /// fired; zero means the wait timed out (or was interrupted).
    pub fn run(&mut self, timeout: Option<Duration>) -> io::Result<usize> {
        match self.poll.poll(&mut self.events, timeout) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::Interrupted => return Ok(0),
            Err(e) => return Err(e),
        }

        let mut fired = 0;
        for event in self.events.iter() {
            let fd = event.token().0 as RawFd;
            let mut revents = EventSet::empty();
            if event.is_readable() {
                revents |= EventSet::IN;
            }
            if event.is_writable() {
                revents |= EventSet::OUT;
            }
            if event.is_error() {
                revents |= EventSet::ERR;
            }
            if event.is_read_closed() || event.is_write_closed() {
                revents |= EventSet::HUP;
            }
            if revents.is_empty() {
                continue;
            }
            if let Some(entry) = self.fds.lookup_mut(fd_hash(fd), |e| e.fd == fd) {
                (entry.callback)(fd, revents);
                fired += 1;
            }
        }
        Ok(fired)
    }
}
