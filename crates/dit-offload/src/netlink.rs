// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Neighbour table watcher.
//!
//! Subscribes an `AF_NETLINK`/`NETLINK_ROUTE` socket to `RTMGRP_NEIGH` and
//! publishes IPv4 neighbour (address, MAC) pairs into the conntrack manager
//! so flow events can program address slots.

use crate::config::NL_RECV_BUFSIZE;
use crate::conntrack::ConntrackManager;
use crate::control::workers::{poll_readable, CancelToken, PollVerdict};
use crate::wire::neigh::{parse_neigh_message, NeighEvent};
use crate::wire::NlMsgIter;
use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};
use std::sync::Arc;

const NETLINK_ROUTE: libc::c_int = 0;

/// rtnetlink multicast group for neighbour table changes.
const RTMGRP_NEIGH: u32 = 4;

/// Singleton-equivalent shared context. Construct once, share by `Arc`.
pub struct NetlinkManager {
    conntrack: Arc<ConntrackManager>,
}

impl NetlinkManager {
    pub fn new(conntrack: Arc<ConntrackManager>) -> Self {
        Self { conntrack }
    }

    /// Session reset. The neighbour watcher holds no session state.
    pub fn reset_values(&self) {}

    /// Forward one neighbour change into the conntrack manager.
    ///
    /// IPv4 only; a new entry without a link-layer address is dropped, a
    /// delete clears MAC validity regardless.
    pub fn dispatch(&self, event: &NeighEvent) {
        if event.family != libc::AF_INET as u8 {
            return;
        }
        if event.addr == 0 {
            return;
        }

        if event.new {
            let Some(mac) = event.lladdr.as_ref() else {
                return;
            };
            log::debug!(
                "[NL] neigh: valid: 1, ip: {:#010x}, dev: {:02X}{:02X}{:02X}{:02X}{:02X}{:02X}",
                event.addr,
                mac[0],
                mac[1],
                mac[2],
                mac[3],
                mac[4],
                mac[5]
            );
            self.conntrack.set_local_dev_addr(true, event.addr, Some(mac));
        } else {
            log::debug!("[NL] neigh: valid: 0, ip: {:#010x}", event.addr);
            self.conntrack.set_local_dev_addr(false, event.addr, None);
        }
    }

    /// Open the NEIGH subscription and drain it until the socket dies or
    /// the token cancels. Runs on a registry worker thread.
    pub(crate) fn monitor(&self, cancel: &CancelToken) {
        log::info!("[NL] +++");

        let socket = match open_neigh_socket() {
            Ok(socket) => socket,
            Err(err) => {
                log::error!("[NL] failed to open neigh socket ({})", err);
                return;
            }
        };
        let fd = socket.as_raw_fd();
        let mut buf = vec![0u8; NL_RECV_BUFSIZE];

        loop {
            match poll_readable(fd, cancel) {
                PollVerdict::Readable => {}
                PollVerdict::Retry => continue,
                PollVerdict::Cancelled | PollVerdict::Closed => break,
            }

            // SAFETY: buf outlives the call and the length matches its size.
            let received = unsafe { libc::recv(fd, buf.as_mut_ptr().cast(), buf.len(), 0) };
            if received < 0 {
                let err = io::Error::last_os_error();
                match err.raw_os_error() {
                    Some(libc::EINTR) | Some(libc::EAGAIN) => continue,
                    _ => {
                        log::error!("[NL] recv done ({})", err);
                        break;
                    }
                }
            }
            if received == 0 {
                break;
            }

            for msg in NlMsgIter::new(&buf[..received as usize]) {
                if let Some(event) = parse_neigh_message(&msg) {
                    self.dispatch(&event);
                }
            }
        }

        log::info!("[NL] ---");
    }
}

fn open_neigh_socket() -> io::Result<OwnedFd> {
    // SAFETY: socket(2) with constant arguments; the result is checked.
    let fd = unsafe {
        libc::socket(
            libc::AF_NETLINK,
            libc::SOCK_RAW | libc::SOCK_CLOEXEC,
            NETLINK_ROUTE,
        )
    };
    if fd < 0 {
        return Err(io::Error::last_os_error());
    }
    // SAFETY: socket returned a fresh descriptor we now own.
    let socket = unsafe { OwnedFd::from_raw_fd(fd) };

    #[repr(C)]
    struct SockaddrNl {
        nl_family: u16,
        nl_pad: u16,
        nl_pid: u32,
        nl_groups: u32,
    }

    let addr = SockaddrNl {
        nl_family: libc::AF_NETLINK as u16,
        nl_pad: 0,
        nl_pid: 0, // kernel assigns
        nl_groups: RTMGRP_NEIGH,
    };

    // SAFETY: addr is a properly initialized sockaddr_nl-shaped struct and
    // the length matches its size.
    let rc = unsafe {
        libc::bind(
            socket.as_raw_fd(),
            std::ptr::addr_of!(addr).cast::<libc::sockaddr>(),
            std::mem::size_of::<SockaddrNl>() as libc::socklen_t,
        )
    };
    if rc < 0 {
        return Err(io::Error::last_os_error());
    }

    Ok(socket)
}
