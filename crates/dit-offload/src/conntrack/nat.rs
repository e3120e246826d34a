// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Hardware NAT tables: local address slots and the port rule table.
//!
//! Both tables live under the manager's callback lock. For any
//! `(slot, port key)` pair the address install precedes the first port rule
//! referencing it, and eviction clears every dependent port rule before the
//! slot is reused.

use super::{ConntrackManager, CtFamily};
use crate::config::NAT_LOCAL_ADDR_SLOTS;
use crate::ioctl::abi::{
    self, NatLocalAddr, NatLocalPort, DIT_CAP_MASK_PORT_BIG_ENDIAN, ETH_ALEN, HW_VAL_BODY_MASK,
};
use crate::ioctl::{IoctlArg, IoctlCmd};
use crate::wire::conntrack::CtEvent;
use std::collections::BTreeMap;
use std::net::Ipv4Addr;

/// Per-client-address slot bookkeeping, keyed by host-order IPv4.
#[derive(Clone, Copy, Debug, Default)]
pub(crate) struct LocalAddrInfo {
    pub valid_index: bool,
    pub index: u16,
    pub valid_dev_addr: bool,
    pub dev_addr: [u8; ETH_ALEN],
}

/// One live port rule plus the address it depends on.
#[derive(Clone, Copy, Debug)]
pub(crate) struct PortEntry {
    pub local_addr: u32,
    pub rule: NatLocalPort,
}

/// State guarded by the callback lock.
pub(crate) struct CtState {
    /// Upstream matcher: flows must be NATed to this address.
    pub upstream: Option<Ipv4Addr>,
    pub addrs: BTreeMap<u32, LocalAddrInfo>,
    pub occupied: [bool; NAT_LOCAL_ADDR_SLOTS],
    pub ports: BTreeMap<u16, PortEntry>,
    /// Round-robin slot cursor. Survives `reset_values` across sessions.
    pub cursor: usize,
}

impl CtState {
    pub fn new() -> Self {
        Self {
            upstream: None,
            addrs: BTreeMap::new(),
            occupied: [false; NAT_LOCAL_ADDR_SLOTS],
            ports: BTreeMap::new(),
            cursor: NAT_LOCAL_ADDR_SLOTS - 1,
        }
    }
}

impl ConntrackManager {
    /// Install or remove the NAT rules for one flow event.
    ///
    /// Internal failures downgrade to a skip; the calling worker continues.
    pub(crate) fn set_local_addr_port(&self, family: CtFamily, event: &CtEvent, enable: bool) {
        let Some(control) = self.control.lock().clone() else {
            return;
        };

        let addr_h = u32::from(event.orig_src);
        let dst_ring = match control.downstream_dst_ring(addr_h) {
            Some(ring) if addr_h != 0 => ring,
            _ => return,
        };

        // ports are host order unless the hardware asks for network order
        let mut reply_port_dst = event.repl_dst_port;
        let mut origin_port_src = event.orig_src_port;
        if control.hw_capa(DIT_CAP_MASK_PORT_BIG_ENDIAN) {
            reply_port_dst = reply_port_dst.swap_bytes();
            origin_port_src = origin_port_src.swap_bytes();
        }
        if reply_port_dst == 0 || origin_port_src == 0 {
            return;
        }

        let mut rule = NatLocalPort::default();

        {
            let mut state = self.state.lock();

            let assigned = state
                .addrs
                .get(&addr_h)
                .and_then(|info| info.valid_index.then_some(info.index));
            let index = match assigned {
                Some(index) => index,
                None => {
                    // nothing to disable for an unknown address
                    if !enable {
                        return;
                    }
                    let index = self.next_local_index(&mut state);
                    let info = state.addrs.entry(addr_h).or_default();
                    info.index = index;
                    info.valid_index = true;
                    log::info!(
                        "[CT] add local addr {:#010x} to index: {}, dst: {}",
                        addr_h,
                        index,
                        dst_ring
                    );
                    index
                }
            };

            rule.reply_port_dst_l = abi::port_table_port_l(reply_port_dst);
            rule.hw_val = abi::pack_hw_val(
                enable,
                abi::port_table_port_h(reply_port_dst),
                origin_port_src,
                index,
                dst_ring as u8,
                family == CtFamily::Udp,
            );

            if !state.occupied[index as usize] {
                let (valid_dev_addr, dev_addr) = {
                    let info = state.addrs.entry(addr_h).or_default();
                    (info.valid_dev_addr, info.dev_addr)
                };
                // the slot cannot be programmed before the MAC is learned
                if !valid_dev_addr {
                    return;
                }

                let mut addr_param = NatLocalAddr {
                    index,
                    dst_ring: dst_ring as u8,
                    addr: addr_h.to_be(),
                    dev_addr,
                };
                if self
                    .device
                    .invoke(IoctlCmd::SetNatLocalAddr, IoctlArg::NatAddr(&mut addr_param))
                    .is_err()
                {
                    log::info!(
                        "[CT] failed to set local addr: {:#010x} at index: {}",
                        addr_h,
                        index
                    );
                    return;
                }
                state.occupied[index as usize] = true;
            }

            let key = rule.reply_port_dst_l;
            if enable {
                if state.ports.contains_key(&key) {
                    log::debug!("[CT] port table [{:04}] overwritten", key);
                } else {
                    log::debug!("[CT] port table [{:04}] added", key);
                }
                state.ports.insert(
                    key,
                    PortEntry {
                        local_addr: addr_h,
                        rule,
                    },
                );
            } else {
                // the enable bit is not part of the comparison
                let matched = state.ports.get(&key).map_or(false, |entry| {
                    entry.rule.hw_val & HW_VAL_BODY_MASK == rule.hw_val & HW_VAL_BODY_MASK
                });
                if !matched {
                    return;
                }
                state.ports.remove(&key);
                log::debug!("[CT] port table [{:04}] removed", key);
            }
        }

        // the port write happens outside the lock to bound contention
        let origin = (rule.hw_val >> 9) & 0xFFFF;
        if self
            .device
            .invoke(IoctlCmd::SetNatLocalPort, IoctlArg::NatPort(&mut rule))
            .is_err()
        {
            log::info!(
                "[CT] failed to set port rule for origin {:#010x}:{}",
                addr_h,
                origin
            );
        }
    }

    /// Advance the round-robin cursor, evicting the displaced address when
    /// the chosen slot is occupied.
    fn next_local_index(&self, state: &mut CtState) -> u16 {
        state.cursor = (state.cursor + 1) % NAT_LOCAL_ADDR_SLOTS;
        let index = state.cursor as u16;

        if state.occupied[state.cursor] {
            log::info!("[CT] overwrite local addr index: {}", index);
            self.remove_local_addr_by_index(state, index);
        }

        index
    }

    fn remove_local_addr_by_index(&self, state: &mut CtState, index: u16) {
        let resident = state
            .addrs
            .iter()
            .find(|(_, info)| info.valid_index && info.index == index)
            .map(|(&addr, _)| addr);
        if let Some(addr) = resident {
            self.remove_local_addr(state, addr);
        }
    }

    /// Remove one client address: every dependent port rule first, then the
    /// slot itself. Per-entry ioctl failures are logged, not fatal.
    pub(crate) fn remove_local_addr(&self, state: &mut CtState, addr: u32) {
        if addr == 0 {
            return;
        }
        let Some(info) = state.addrs.get(&addr) else {
            return;
        };
        let index = info.index;
        log::info!("[CT] remove local addr {:#010x} at index: {}", addr, index);

        let keys: Vec<u16> = state
            .ports
            .iter()
            .filter(|(_, entry)| entry.local_addr == addr)
            .map(|(&key, _)| key)
            .collect();
        for key in keys {
            state.ports.remove(&key);
            let mut rule = NatLocalPort {
                reply_port_dst_l: key,
                hw_val: 0,
            };
            if self
                .device
                .invoke(IoctlCmd::SetNatLocalPort, IoctlArg::NatPort(&mut rule))
                .is_err()
            {
                log::info!("[CT] failed to remove port index: {}", key);
            }
        }

        state.addrs.remove(&addr);
        state.occupied[index as usize] = false;

        let mut addr_param = NatLocalAddr {
            index,
            ..NatLocalAddr::default()
        };
        if self
            .device
            .invoke(IoctlCmd::SetNatLocalAddr, IoctlArg::NatAddr(&mut addr_param))
            .is_err()
        {
            log::info!(
                "[CT] failed to remove local addr {:#010x} at index: {}",
                addr,
                index
            );
        }
    }
}
