// SPDX-License-Identifier: MIT
// Copyright (c) 2025-2026 tailpipe.dev

//! Shared HTTP transfer reactor.
//!
//! Several writers can hand transfers to one reactor; exactly one of
//! them drives it at a time. [`HttpReactor::add`] queues a transfer and
//! tells the caller whether it just became the driver: when `add`
//! returns `true` the caller must follow up with [`HttpReactor::run`],
//! which delivers completion callbacks on the calling thread and
//! returns once the reactor is idle again.
//!
//! Transfers are performed by short-lived worker threads, at most
//! `max_connections` at a time. Workers signal completions over a
//! self-pipe so the driving thread can sleep in the poller between
//! events instead of spinning.

use std::collections::VecDeque;
use std::fmt;
use std::io::{self, Read};
use std::os::fd::RawFd;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use log::{debug, warn};
use parking_lot::Mutex;

use crate::buffer::Buffer;
use crate::fdpoll::{EventSet, FdPoll};

/// Response bodies are retained up to this many bytes; the rest is
/// discarded.
pub const RESPONSE_BODY_LIMIT: usize = 1024;

/// The driver never sleeps longer than this between checks.
const MAX_WAIT: Duration = Duration::from_secs(10);

#[derive(Debug)]
pub enum HttpError {
    Request(reqwest::Error),
    Io(io::Error),
}

impl fmt::Display for HttpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HttpError::Request(e) => write!(f, "http request failed: {}", e),
            HttpError::Io(e) => write!(f, "i/o error: {}", e),
        }
    }
}

impl std::error::Error for HttpError {}

impl From<io::Error> for HttpError {
    fn from(e: io::Error) -> Self {
        HttpError::Io(e)
    }
}

/// Status line and (truncated) body of a completed transfer.
#[derive(Debug)]
pub struct HttpResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        self.status < 300
    }
}

pub type TransferCallback = Box<dyn FnOnce(Result<HttpResponse, HttpError>) + Send>;

/// One POST to perform. The callback runs on the driving thread once
/// the transfer finished, succeeded or not.
pub struct Transfer {
    pub url: String,
    pub body: Vec<u8>,
    pub auth: Option<(String, String)>,
    pub timeout: Duration,
    pub callback: TransferCallback,
}

struct Shared {
    queue: VecDeque<Transfer>,
    done: Vec<(TransferCallback, Result<HttpResponse, HttpError>)>,
    /// Queued plus currently-performing transfers.
    in_flight: usize,
    workers: usize,
    running: bool,
}

pub struct HttpReactor {
    client: reqwest::blocking::Client,
    state: Mutex<Shared>,
    poll: Mutex<FdPoll>,
    wake_rx: RawFd,
    wake_tx: RawFd,
    max_connections: usize,
}

impl HttpReactor {
    /// `max_connections` bounds the worker pool; `max_host_connections`
    /// caps the pooled connections kept per endpoint host, 0 meaning
    /// unlimited.
    pub fn new(max_connections: usize, max_host_connections: usize) -> Result<Arc<Self>, HttpError> {
        let mut builder =
            reqwest::blocking::Client::builder().connect_timeout(Duration::from_secs(10));
        if max_host_connections > 0 {
            builder = builder.pool_max_idle_per_host(max_host_connections);
        }
        let client = builder.build().map_err(HttpError::Request)?;

        let mut fds = [0 as libc::c_int; 2];
        let rc = unsafe { libc::pipe2(fds.as_mut_ptr(), libc::O_NONBLOCK | libc::O_CLOEXEC) };
        if rc != 0 {
            return Err(HttpError::Io(io::Error::last_os_error()));
        }
        let (wake_rx, wake_tx) = (fds[0], fds[1]);

        let mut poll = FdPoll::new()?;
        poll.setfd(
            wake_rx,
            EventSet::IN,
            Box::new(|fd, _revents| {
                let mut sink = [0u8; 64];
                loop {
                    let n = unsafe { libc::read(fd, sink.as_mut_ptr().cast(), sink.len()) };
                    if n <= 0 {
                        break;
                    }
                }
            }),
        )?;

        Ok(Arc::new(Self {
            client,
            state: Mutex::new(Shared {
                queue: VecDeque::new(),
                done: Vec::new(),
                in_flight: 0,
                workers: 0,
                running: false,
            }),
            poll: Mutex::new(poll),
            wake_rx,
            wake_tx,
            max_connections: max_connections.max(1),
        }))
    }

    /// Queue a transfer. Returns `true` when the caller became the
    /// driver and must call [`run`](Self::run); a `false` return means
    /// another thread is already driving and will pick this up.
    pub fn add(self: &Arc<Self>, transfer: Transfer) -> bool {
        let must_run;
        {
            let mut st = self.state.lock();
            st.queue.push_back(transfer);
            st.in_flight += 1;
            if st.workers < self.max_connections {
                st.workers += 1;
                let reactor = Arc::clone(self);
                let spawned = thread::Builder::new()
                    .name("tailpipe-http".to_string())
                    .spawn(move || reactor.worker_loop());
                if let Err(e) = spawned {
                    st.workers -= 1;
                    warn!("http reactor: spawning a worker failed: {}", e);
                }
            }
            must_run = !st.running;
            if must_run {
                st.running = true;
            }
        }
        self.wake();
        must_run
    }

    /// Number of transfers not yet completed.
    pub fn pending(&self) -> usize {
        self.state.lock().in_flight
    }

    /// Drive the reactor until all queued transfers have completed and
    /// their callbacks ran. Callbacks execute on this thread with no
    /// internal lock held.
    pub fn run(&self) {
        loop {
            let (completions, finished) = {
                let mut st = self.state.lock();
                let completions: Vec<_> = st.done.drain(..).collect();
                let finished = st.in_flight == 0 && st.queue.is_empty();
                if finished {
                    st.running = false;
                }
                (completions, finished)
            };

            for (callback, result) in completions {
                callback(result);
            }
            if finished {
                return;
            }

            let mut poll = self.poll.lock();
            if let Err(e) = poll.run(Some(MAX_WAIT)) {
                warn!("http reactor: poll failed: {}", e);
            }
        }
    }

    fn wake(&self) {
        let byte = 0u8;
        unsafe {
            libc::write(self.wake_tx, (&byte as *const u8).cast(), 1);
        }
    }

    fn worker_loop(self: Arc<Self>) {
        loop {
            let transfer = {
                let mut st = self.state.lock();
                match st.queue.pop_front() {
                    Some(t) => t,
                    None => {
                        st.workers -= 1;
                        return;
                    }
                }
            };

            let Transfer {
                url,
                body,
                auth,
                timeout,
                callback,
            } = transfer;
            let result = self.perform(&url, body, auth.as_ref(), timeout);
            if let Err(e) = &result {
                debug!("http reactor: transfer to {} failed: {}", url, e);
            }

            {
                let mut st = self.state.lock();
                st.done.push((callback, result));
                st.in_flight -= 1;
            }
            self.wake();
        }
    }

    fn perform(
        &self,
        url: &str,
        body: Vec<u8>,
        auth: Option<&(String, String)>,
        timeout: Duration,
    ) -> Result<HttpResponse, HttpError> {
        let mut request = self.client.post(url).timeout(timeout).body(body);
        if let Some((user, password)) = auth {
            request = request.basic_auth(user, Some(password));
        }
        let mut response = request.send().map_err(HttpError::Request)?;

        let status = response.status().as_u16();
        let mut kept = Buffer::fixed(RESPONSE_BODY_LIMIT);
        let mut chunk = [0u8; 512];
        loop {
            match response.read(&mut chunk) {
                Ok(0) => break,
                Ok(n) => {
                    if kept.putmem(&chunk[..n]).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    debug!("http reactor: reading response from {} failed: {}", url, e);
                    break;
                }
            }
        }
        Ok(HttpResponse {
            status,
            body: kept.cycle(),
        })
    }
}

impl Drop for HttpReactor {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.wake_tx);
            libc::close(self.wake_rx);
        }
    }
}
