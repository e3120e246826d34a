// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Conntrack manager: flow events in, NAT rules out.
//!
//! Owns the two netfilter conntrack subscriptions (UDP NEW/DESTROY,
//! TCP UPDATE/DESTROY), their event filters, the upstream matcher and the
//! hardware NAT tables. One worker thread per family drains its socket and
//! feeds [`ConntrackManager::handle_event`].
//!
//! The manager is created once and survives `stop_offload`; a session only
//! resets its state in place.

pub mod filter;
mod nat;

use crate::config::NL_RECV_BUFSIZE;
use crate::control::workers::{poll_readable, CancelToken, PollVerdict};
use crate::error::{OffloadError, OffloadResult};
use crate::ioctl::OffloadDevice;
use crate::wire::conntrack::{
    parse_ct_message, CtEvent, CtMsgType, NFNLGRP_CONNTRACK_DESTROY, NFNLGRP_CONNTRACK_NEW,
    NFNLGRP_CONNTRACK_UPDATE, TCP_CONNTRACK_ESTABLISHED, TCP_CONNTRACK_FIN_WAIT,
};
use crate::wire::NlMsgIter;
use filter::CtFilter;
use nat::CtState;
use parking_lot::Mutex;
use std::io;
use std::net::Ipv4Addr;
use std::os::fd::RawFd;
use std::sync::Arc;

/// Conntrack subscription family.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CtFamily {
    Udp = 0,
    Tcp = 1,
}

pub const CT_FAMILIES: usize = 2;

// netlink socket options for event group membership
const SOL_NETLINK: libc::c_int = 270;
const NETLINK_ADD_MEMBERSHIP: libc::c_int = 1;

/// Capabilities the offload control grants the manager for the lifetime of
/// a session. Cleared when the control resets.
pub trait ControlPlane: Send + Sync {
    /// Downstream ring for a host-order client address, if any downstream
    /// subnet covers it.
    fn downstream_dst_ring(&self, addr_h: u32) -> Option<u16>;

    /// Whether the hardware advertises every bit in `mask`.
    fn hw_capa(&self, mask: u32) -> bool;
}

/// One netfilter conntrack subscription slot.
struct CtInstance {
    fd: Option<RawFd>,
    filter: Option<CtFilter>,
    attached: bool,
}

impl CtInstance {
    const fn new() -> Self {
        Self {
            fd: None,
            filter: None,
            attached: false,
        }
    }
}

/// Singleton-equivalent shared context. Construct once, share by `Arc`.
pub struct ConntrackManager {
    pub(crate) device: Arc<dyn OffloadDevice>,
    instances: [Mutex<CtInstance>; CT_FAMILIES],
    pub(crate) state: Mutex<CtState>,
    pub(crate) control: Mutex<Option<Arc<dyn ControlPlane>>>,
}

impl ConntrackManager {
    pub fn new(device: Arc<dyn OffloadDevice>) -> Self {
        Self {
            device,
            instances: [Mutex::new(CtInstance::new()), Mutex::new(CtInstance::new())],
            state: Mutex::new(CtState::new()),
            control: Mutex::new(None),
        }
    }

    /// Grant the control capability handle for this session.
    pub fn set_control(&self, control: Arc<dyn ControlPlane>) {
        *self.control.lock() = Some(control);
    }

    /// Revoke the control handle. Subsequent events are dropped at the
    /// dst-ring lookup.
    pub fn clear_control(&self) {
        *self.control.lock() = None;
    }

    // ===== Session bind =====

    /// Record the caller-supplied conntrack socket for `family` and
    /// subscribe it to that family's event groups.
    pub fn bind_fd(&self, family: CtFamily, fd: RawFd) -> OffloadResult<()> {
        let groups: &[libc::c_int] = match family {
            CtFamily::Udp => &[NFNLGRP_CONNTRACK_NEW, NFNLGRP_CONNTRACK_DESTROY],
            CtFamily::Tcp => &[NFNLGRP_CONNTRACK_UPDATE, NFNLGRP_CONNTRACK_DESTROY],
        };

        for &group in groups {
            // SAFETY: fd is a caller-owned socket and the option value is a
            // live c_int for the duration of the call.
            let rc = unsafe {
                libc::setsockopt(
                    fd,
                    SOL_NETLINK,
                    NETLINK_ADD_MEMBERSHIP,
                    std::ptr::addr_of!(group).cast(),
                    std::mem::size_of::<libc::c_int>() as libc::socklen_t,
                )
            };
            if rc != 0 {
                log::error!(
                    "[CT] failed to subscribe group {} ({})",
                    group,
                    io::Error::last_os_error()
                );
                return Err(OffloadError::NoResource("conntrack"));
            }
        }

        self.instances[family as usize].lock().fd = Some(fd);
        Ok(())
    }

    // ===== Filter composition =====

    /// Detach and destroy both family filters; optionally recreate empty
    /// builders for a rebuild.
    pub fn detach_filters(&self, recreate: bool) {
        for instance in &self.instances {
            let mut instance = instance.lock();
            instance.attached = false;
            instance.filter = if recreate { Some(CtFilter::new()) } else { None };
        }
    }

    /// Append negative source and destination clauses for one local IPv4
    /// prefix to both family filters.
    pub fn add_local_prefix_filter(&self, addr: Ipv4Addr, netmask_bits: u8) {
        for instance in &self.instances {
            if let Some(filter) = instance.lock().filter.as_mut() {
                filter.add_local_prefix(u32::from(addr), netmask_bits);
            }
        }
    }

    /// Finalize and publish both filters: the UDP filter gets the broadcast
    /// ignore clause and a positive UDP protocol clause, the TCP filter a
    /// positive TCP clause plus ESTABLISHED/FIN_WAIT state clauses.
    pub fn attach_filters(&self) -> bool {
        {
            let mut udp = self.instances[CtFamily::Udp as usize].lock();
            let Some(filter) = udp.filter.as_mut() else {
                log::error!("[CT] failed to attach UDP filter");
                return false;
            };
            filter.add_ignored_dst(u32::MAX, u32::MAX);
            filter.set_l4proto(libc::IPPROTO_UDP as u8);
            udp.attached = true;
        }

        {
            let mut tcp = self.instances[CtFamily::Tcp as usize].lock();
            let Some(filter) = tcp.filter.as_mut() else {
                log::error!("[CT] failed to attach TCP filter");
                return false;
            };
            filter.set_l4proto(libc::IPPROTO_TCP as u8);
            filter.add_tcp_state(TCP_CONNTRACK_ESTABLISHED);
            filter.add_tcp_state(TCP_CONNTRACK_FIN_WAIT);
            tcp.attached = true;
        }

        true
    }

    /// Snapshot of one family's filter state (attached flag and clauses).
    #[cfg(test)]
    pub(crate) fn filter_state(&self, family: CtFamily) -> (bool, Option<CtFilter>) {
        let instance = self.instances[family as usize].lock();
        (instance.attached, instance.filter.clone())
    }

    // ===== Upstream matcher =====

    /// Rebuild or destroy the upstream matcher. Events whose reply
    /// destination differs from the matcher are ignored.
    pub fn set_upstream_ipv4(&self, addr: Option<Ipv4Addr>) {
        self.state.lock().upstream = addr;
    }

    // ===== Neighbour injection =====

    /// Record MAC knowledge for a client address. Does not program hardware;
    /// it arms the next flow event for that address.
    pub fn set_local_dev_addr(&self, valid: bool, addr_h: u32, dev_addr: Option<&[u8; 6]>) {
        if addr_h == 0 {
            return;
        }

        let mut state = self.state.lock();
        let info = state.addrs.entry(addr_h).or_default();
        info.valid_dev_addr = valid;
        if valid {
            if let Some(mac) = dev_addr {
                info.dev_addr = *mac;
            }
        }
    }

    // ===== Teardown =====

    /// Remove every client address covered by a downstream subnet, with all
    /// dependent port rules.
    pub fn remove_downstream_local_addr(&self, subnet_h: u32, netmask_bits: u8) {
        let mask = match netmask_bits {
            0 => 0,
            1..=31 => u32::MAX << (32 - u32::from(netmask_bits)),
            _ => u32::MAX,
        };

        let mut state = self.state.lock();
        let matching: Vec<u32> = state
            .addrs
            .keys()
            .copied()
            .filter(|addr| (addr & mask) == (subnet_h & mask))
            .collect();
        for addr in matching {
            self.remove_local_addr(&mut state, addr);
        }
    }

    /// Session reset: filters detached (not recreated), matcher destroyed,
    /// tables cleared. The round-robin cursor deliberately survives.
    pub fn reset_values(&self) {
        self.detach_filters(false);

        let mut state = self.state.lock();
        state.upstream = None;
        state.addrs.clear();
        state.occupied.fill(false);
        state.ports.clear();
    }

    // ===== Event dispatch =====

    /// Gate and act on one parsed conntrack event.
    pub fn handle_event(&self, family: CtFamily, event: &CtEvent) {
        {
            let instance = self.instances[family as usize].lock();
            if !instance.attached {
                return;
            }
            match instance.filter.as_ref() {
                Some(filter) if filter.matches(event) => {}
                _ => return,
            }
        }

        // upstream matcher: only flows NATed onto the current uplink
        {
            let state = self.state.lock();
            match state.upstream {
                Some(upstream) if upstream == event.repl_dst => {}
                _ => return,
            }
        }

        match family {
            CtFamily::Udp => {
                let enable = event.msg_type == CtMsgType::New;
                self.set_local_addr_port(family, event, enable);
            }
            CtFamily::Tcp => match event.tcp_state {
                Some(TCP_CONNTRACK_ESTABLISHED) => {
                    self.set_local_addr_port(family, event, true);
                }
                Some(TCP_CONNTRACK_FIN_WAIT) => {
                    self.set_local_addr_port(family, event, false);
                }
                _ if event.msg_type == CtMsgType::Destroy => {
                    self.set_local_addr_port(family, event, false);
                }
                _ => {}
            },
        }
    }

    // ===== Worker =====

    /// Drain the family's conntrack socket until it dies or the token
    /// cancels. Runs on a registry worker thread.
    pub(crate) fn monitor(&self, family: CtFamily, cancel: &CancelToken) {
        let Some(fd) = self.instances[family as usize].lock().fd else {
            log::error!("[CT] no socket bound for family {:?}", family);
            return;
        };

        log::info!("[CT] +++ family: {:?}", family);
        let mut buf = vec![0u8; NL_RECV_BUFSIZE];

        loop {
            match poll_readable(fd, cancel) {
                PollVerdict::Readable => {}
                PollVerdict::Retry => continue,
                PollVerdict::Cancelled | PollVerdict::Closed => break,
            }

            // SAFETY: buf outlives the call and the length matches its size.
            let received =
                unsafe { libc::recv(fd, buf.as_mut_ptr().cast(), buf.len(), 0) };
            if received < 0 {
                let err = io::Error::last_os_error();
                match err.raw_os_error() {
                    Some(libc::EINTR) | Some(libc::EAGAIN) => continue,
                    _ => {
                        log::error!("[CT] recv done family {:?} ({})", family, err);
                        break;
                    }
                }
            }
            if received == 0 {
                break;
            }

            for msg in NlMsgIter::new(&buf[..received as usize]) {
                if let Some(event) = parse_ct_message(&msg) {
                    self.handle_event(family, &event);
                }
            }
        }

        log::info!("[CT] --- family: {:?}", family);
        // state is reset by stop_offload, not by worker exit
    }
}
