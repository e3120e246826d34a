// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Conntrack event filter composition.
//!
//! A filter is a set of clauses evaluated against each parsed event before
//! it reaches the offload decision: negative IPv4 prefix clauses reject
//! matching original-tuple addresses, one positive L4 protocol clause admits
//! a single protocol, and positive TCP state clauses restrict non-destroy
//! TCP events to the tracked states. Destroy events bypass the state
//! clauses so rule teardown still observes them.

use crate::wire::conntrack::{CtEvent, CtMsgType};

/// One masked IPv4 match, host order.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct PrefixClause {
    addr: u32,
    mask: u32,
}

impl PrefixClause {
    #[inline]
    fn matches(&self, addr: u32) -> bool {
        (addr & self.mask) == (self.addr & self.mask)
    }
}

/// Composable event filter for one conntrack family.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CtFilter {
    neg_src: Vec<PrefixClause>,
    neg_dst: Vec<PrefixClause>,
    l4proto: Option<u8>,
    tcp_states: Vec<u8>,
}

impl CtFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append negative source and destination clauses for one local prefix.
    ///
    /// `addr` is host order; the mask is derived from the prefix length.
    pub fn add_local_prefix(&mut self, addr: u32, netmask_bits: u8) {
        let clause = PrefixClause {
            addr,
            mask: prefix_mask(netmask_bits),
        };
        self.neg_src.push(clause);
        self.neg_dst.push(clause);
    }

    /// Append a negative destination clause with an explicit mask.
    pub fn add_ignored_dst(&mut self, addr: u32, mask: u32) {
        self.neg_dst.push(PrefixClause { addr, mask });
    }

    /// Set the positive L4 protocol clause.
    pub fn set_l4proto(&mut self, proto: u8) {
        self.l4proto = Some(proto);
    }

    /// Append a positive TCP state clause.
    pub fn add_tcp_state(&mut self, state: u8) {
        self.tcp_states.push(state);
    }

    /// Number of accumulated IPv4 prefix attributes (source side).
    pub fn prefix_attr_count(&self) -> usize {
        self.neg_src.len()
    }

    /// Evaluate the filter against a parsed event.
    pub fn matches(&self, event: &CtEvent) -> bool {
        if let Some(proto) = self.l4proto {
            if event.proto != proto {
                return false;
            }
        }

        let src = u32::from(event.orig_src);
        let dst = u32::from(event.orig_dst);
        if self.neg_src.iter().any(|c| c.matches(src)) {
            return false;
        }
        if self.neg_dst.iter().any(|c| c.matches(dst)) {
            return false;
        }

        if !self.tcp_states.is_empty() && event.msg_type != CtMsgType::Destroy {
            match event.tcp_state {
                Some(state) if self.tcp_states.contains(&state) => {}
                _ => return false,
            }
        }

        true
    }
}

fn prefix_mask(bits: u8) -> u32 {
    match bits {
        0 => 0,
        1..=31 => u32::MAX << (32 - u32::from(bits)),
        _ => u32::MAX,
    }
}
