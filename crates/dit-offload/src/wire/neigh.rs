// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! rtnetlink neighbour event parser.
//!
//! The payload begins with `struct ndmsg`; the attribute run follows its
//! aligned size. Only `NDA_DST` and `NDA_LLADDR` are of interest here.

use super::{nlmsg_align, AttrIter, NlMsg};

/// `sizeof(struct ndmsg)`.
const NDMSG_LEN: usize = 12;

// rtnetlink message types for the neighbour table
pub const RTM_NEWNEIGH: u16 = 28;
pub const RTM_DELNEIGH: u16 = 29;

const NDA_DST: u16 = 1;
const NDA_LLADDR: u16 = 2;

/// A neighbour table change relevant to MAC learning.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct NeighEvent {
    /// True for `RTM_NEWNEIGH`, false for `RTM_DELNEIGH`.
    pub new: bool,
    /// Address family from `ndm_family`.
    pub family: u8,
    /// Neighbour IPv4 address in host order; 0 when absent or not 4 bytes.
    pub addr: u32,
    /// Link-layer address when present with the expected length.
    pub lladdr: Option<[u8; 6]>,
}

/// Parse one rtnetlink message as a neighbour event.
///
/// Returns `None` for message types other than NEWNEIGH/DELNEIGH.
pub fn parse_neigh_message(msg: &NlMsg<'_>) -> Option<NeighEvent> {
    let new = match msg.msg_type {
        RTM_NEWNEIGH => true,
        RTM_DELNEIGH => false,
        _ => return None,
    };

    let family = *msg.payload.first()?;
    let attrs = msg.payload.get(nlmsg_align(NDMSG_LEN)..)?;

    let mut addr = 0u32;
    let mut lladdr = None;
    for (attr_type, payload) in AttrIter::new(attrs) {
        match attr_type {
            NDA_DST => {
                if let Ok(bytes) = <[u8; 4]>::try_from(payload) {
                    addr = u32::from_be_bytes(bytes);
                }
            }
            NDA_LLADDR => {
                if let Ok(bytes) = <[u8; 6]>::try_from(payload) {
                    lladdr = Some(bytes);
                }
            }
            _ => {}
        }
    }

    Some(NeighEvent {
        new,
        family,
        addr,
        lladdr,
    })
}
