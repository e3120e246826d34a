// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Worker lifecycle bookkeeping.
//!
//! Four long-lived workers (event poll, conntrack UDP, conntrack TCP,
//! neighbour netlink) are tracked in a registry keyed by kind. Starting is
//! idempotent; a worker clears its `created` bit on exit so the next
//! `init_offload` can relaunch it. Workers block in `poll` on their
//! subscription fd plus a cancel pipe, so `shutdown` can tear them down
//! without waiting for kernel traffic.

use crate::config::DEV_POLL_TIMEOUT_MS;
use parking_lot::Mutex;
use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

/// Worker identity inside the registry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WorkerKind {
    Event = 0,
    ConntrackUdp = 1,
    ConntrackTcp = 2,
    Netlink = 3,
}

pub const WORKER_KINDS: usize = 4;

/// Cooperative cancellation: a flag plus a self-pipe so a blocked `poll`
/// wakes immediately.
pub struct CancelToken {
    cancelled: AtomicBool,
    pipe_rd: OwnedFd,
    pipe_wr: OwnedFd,
}

impl CancelToken {
    pub fn new() -> io::Result<Self> {
        let mut fds = [0 as libc::c_int; 2];
        // SAFETY: fds points at a writable 2-element array.
        let rc = unsafe { libc::pipe2(fds.as_mut_ptr(), libc::O_CLOEXEC | libc::O_NONBLOCK) };
        if rc != 0 {
            return Err(io::Error::last_os_error());
        }
        // SAFETY: pipe2 handed us ownership of both descriptors.
        let (pipe_rd, pipe_wr) =
            unsafe { (OwnedFd::from_raw_fd(fds[0]), OwnedFd::from_raw_fd(fds[1])) };
        Ok(Self {
            cancelled: AtomicBool::new(false),
            pipe_rd,
            pipe_wr,
        })
    }

    /// Request cancellation and wake the worker's poll.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
        let token = [1u8];
        // SAFETY: writes one byte from a live stack buffer into our own pipe;
        // a full pipe is fine, the wakeup byte is already in flight.
        unsafe { libc::write(self.pipe_wr.as_raw_fd(), token.as_ptr().cast(), 1) };
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    fn read_fd(&self) -> RawFd {
        self.pipe_rd.as_raw_fd()
    }
}

/// Outcome of one poll round on a worker fd.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PollVerdict {
    /// The subscription fd has data.
    Readable,
    /// The cancel token fired.
    Cancelled,
    /// The fd reported HUP/ERR with nothing left to read, or poll failed.
    Closed,
    /// Spurious wakeup or EINTR; poll again.
    Retry,
}

/// Block until `fd` is readable, the token cancels, or the fd dies.
pub fn poll_readable(fd: RawFd, cancel: &CancelToken) -> PollVerdict {
    let mut pfds = [
        libc::pollfd {
            fd,
            events: libc::POLLIN,
            revents: 0,
        },
        libc::pollfd {
            fd: cancel.read_fd(),
            events: libc::POLLIN,
            revents: 0,
        },
    ];

    // SAFETY: pfds is a live array of two initialized pollfd entries.
    let rc = unsafe { libc::poll(pfds.as_mut_ptr(), 2, DEV_POLL_TIMEOUT_MS) };
    if rc < 0 {
        let err = io::Error::last_os_error();
        if err.raw_os_error() == Some(libc::EINTR) {
            return PollVerdict::Retry;
        }
        log::error!("[WORK] poll failed ({})", err);
        return PollVerdict::Closed;
    }

    if cancel.is_cancelled() || pfds[1].revents & libc::POLLIN != 0 {
        return PollVerdict::Cancelled;
    }
    if pfds[0].revents & libc::POLLIN != 0 {
        return PollVerdict::Readable;
    }
    if pfds[0].revents & (libc::POLLHUP | libc::POLLERR | libc::POLLNVAL) != 0 {
        return PollVerdict::Closed;
    }
    PollVerdict::Retry
}

#[derive(Default)]
struct WorkerRecord {
    created: bool,
    cancel: Option<Arc<CancelToken>>,
}

/// Registry of the four worker slots.
pub struct WorkerRegistry {
    records: Mutex<[WorkerRecord; WORKER_KINDS]>,
}

impl WorkerRegistry {
    pub fn new() -> Self {
        Self {
            records: Mutex::new(Default::default()),
        }
    }

    /// Spawn a worker if its slot is free. Returns true when the worker is
    /// running afterwards (freshly spawned or already alive).
    pub fn start<F>(self: &Arc<Self>, kind: WorkerKind, body: F) -> bool
    where
        F: FnOnce(&CancelToken) + Send + 'static,
    {
        let mut records = self.records.lock();
        if records[kind as usize].created {
            return true;
        }

        let cancel = match CancelToken::new() {
            Ok(token) => Arc::new(token),
            Err(err) => {
                log::error!("[WORK] failed to create cancel pipe ({})", err);
                return false;
            }
        };

        let registry = Arc::clone(self);
        let token = Arc::clone(&cancel);
        let spawned = thread::Builder::new()
            .name(thread_name(kind).to_string())
            .spawn(move || {
                body(&token);
                registry.reset_noti(kind);
            });

        match spawned {
            Ok(_) => {
                records[kind as usize].created = true;
                records[kind as usize].cancel = Some(cancel);
                true
            }
            Err(err) => {
                log::error!("[WORK] failed to create thread {:?} ({})", kind, err);
                false
            }
        }
    }

    /// Called by a worker on exit: frees the slot for the next launch.
    pub fn reset_noti(&self, kind: WorkerKind) {
        let mut records = self.records.lock();
        records[kind as usize].created = false;
        records[kind as usize].cancel = None;
    }

    pub fn is_created(&self, kind: WorkerKind) -> bool {
        self.records.lock()[kind as usize].created
    }

    /// Cancel every live worker. Used on process teardown, never by
    /// `stop_offload`.
    pub fn cancel_all(&self) {
        let records = self.records.lock();
        for record in records.iter() {
            if let Some(cancel) = &record.cancel {
                cancel.cancel();
            }
        }
    }
}

impl Default for WorkerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn thread_name(kind: WorkerKind) -> &'static str {
    match kind {
        WorkerKind::Event => "dit-event",
        WorkerKind::ConntrackUdp => "dit-ct-udp",
        WorkerKind::ConntrackTcp => "dit-ct-tcp",
        WorkerKind::Netlink => "dit-neigh",
    }
}
