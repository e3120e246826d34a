// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! ctnetlink event parser.
//!
//! Reduces a raw netfilter conntrack message to the handful of tuple fields
//! the offload decision needs: original source address/port, reply
//! destination address/port, L4 protocol and TCP state.

use super::{find_attr, AttrIter, NlMsg};
use std::net::Ipv4Addr;

/// Netfilter subsystem id carried in the high byte of `nlmsg_type`.
pub const NFNL_SUBSYS_CTNETLINK: u16 = 1;

const IPCTNL_MSG_CT_NEW: u16 = 0;
const IPCTNL_MSG_CT_DELETE: u16 = 2;

// netlink header flags marking a freshly created entry
const NLM_F_EXCL: u16 = 0x200;
const NLM_F_CREATE: u16 = 0x400;

/// Multicast groups for conntrack event subscriptions.
pub const NFNLGRP_CONNTRACK_NEW: libc::c_int = 1;
pub const NFNLGRP_CONNTRACK_UPDATE: libc::c_int = 2;
pub const NFNLGRP_CONNTRACK_DESTROY: libc::c_int = 3;

// conntrack attribute numbering, linux/netfilter/nfnetlink_conntrack.h
const CTA_TUPLE_ORIG: u16 = 1;
const CTA_TUPLE_REPLY: u16 = 2;
const CTA_PROTOINFO: u16 = 4;

const CTA_TUPLE_IP: u16 = 1;
const CTA_TUPLE_PROTO: u16 = 2;

const CTA_IP_V4_SRC: u16 = 1;
const CTA_IP_V4_DST: u16 = 2;

const CTA_PROTO_NUM: u16 = 1;
const CTA_PROTO_SRC_PORT: u16 = 2;
const CTA_PROTO_DST_PORT: u16 = 3;

const CTA_PROTOINFO_TCP: u16 = 1;
const CTA_PROTOINFO_TCP_STATE: u16 = 1;

// TCP conntrack states, linux/netfilter/nf_conntrack_tcp.h
pub const TCP_CONNTRACK_SYN_SENT: u8 = 1;
pub const TCP_CONNTRACK_ESTABLISHED: u8 = 3;
pub const TCP_CONNTRACK_FIN_WAIT: u8 = 4;
pub const TCP_CONNTRACK_TIME_WAIT: u8 = 7;

/// Conntrack event kind, derived from the message type and flags.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CtMsgType {
    New,
    Update,
    Destroy,
}

/// Parsed conntrack event. Absent tuple fields keep their zero values, the
/// same reading an unset attribute yields in the kernel library.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CtEvent {
    pub msg_type: CtMsgType,
    /// L4 protocol of the original tuple (`IPPROTO_UDP` / `IPPROTO_TCP`).
    pub proto: u8,
    pub orig_src: Ipv4Addr,
    pub orig_dst: Ipv4Addr,
    /// Host order.
    pub orig_src_port: u16,
    pub orig_dst_port: u16,
    pub repl_src: Ipv4Addr,
    pub repl_dst: Ipv4Addr,
    pub repl_src_port: u16,
    pub repl_dst_port: u16,
    pub tcp_state: Option<u8>,
}

impl Default for CtEvent {
    fn default() -> Self {
        Self {
            msg_type: CtMsgType::Update,
            proto: 0,
            orig_src: Ipv4Addr::UNSPECIFIED,
            orig_dst: Ipv4Addr::UNSPECIFIED,
            orig_src_port: 0,
            orig_dst_port: 0,
            repl_src: Ipv4Addr::UNSPECIFIED,
            repl_dst: Ipv4Addr::UNSPECIFIED,
            repl_src_port: 0,
            repl_dst_port: 0,
            tcp_state: None,
        }
    }
}

/// Parse one netlink message as a conntrack event.
///
/// Returns `None` for non-ctnetlink messages (including control messages in
/// the same receive buffer) and for non-IPv4 flows.
pub fn parse_ct_message(msg: &NlMsg<'_>) -> Option<CtEvent> {
    if msg.msg_type >> 8 != NFNL_SUBSYS_CTNETLINK {
        return None;
    }

    let msg_type = match msg.msg_type & 0xFF {
        IPCTNL_MSG_CT_NEW => {
            let create = NLM_F_CREATE | NLM_F_EXCL;
            if msg.flags & create == create {
                CtMsgType::New
            } else {
                CtMsgType::Update
            }
        }
        IPCTNL_MSG_CT_DELETE => CtMsgType::Destroy,
        _ => return None,
    };

    // payload starts with nfgenmsg: family, version, res_id
    let family = *msg.payload.first()?;
    if family != libc::AF_INET as u8 {
        return None;
    }

    let mut event = CtEvent {
        msg_type,
        ..CtEvent::default()
    };

    for (attr_type, payload) in AttrIter::new(msg.payload.get(4..)?) {
        match attr_type {
            CTA_TUPLE_ORIG => {
                let (src, dst, proto, sport, dport) = parse_tuple(payload);
                event.orig_src = src;
                event.orig_dst = dst;
                event.proto = proto;
                event.orig_src_port = sport;
                event.orig_dst_port = dport;
            }
            CTA_TUPLE_REPLY => {
                let (src, dst, _, sport, dport) = parse_tuple(payload);
                event.repl_src = src;
                event.repl_dst = dst;
                event.repl_src_port = sport;
                event.repl_dst_port = dport;
            }
            CTA_PROTOINFO => {
                if let Some(tcp) = find_attr(payload, CTA_PROTOINFO_TCP) {
                    if let Some(state) = find_attr(tcp, CTA_PROTOINFO_TCP_STATE) {
                        event.tcp_state = state.first().copied();
                    }
                }
            }
            _ => {}
        }
    }

    Some(event)
}

fn parse_tuple(buf: &[u8]) -> (Ipv4Addr, Ipv4Addr, u8, u16, u16) {
    let mut src = Ipv4Addr::UNSPECIFIED;
    let mut dst = Ipv4Addr::UNSPECIFIED;
    let mut proto = 0u8;
    let mut sport = 0u16;
    let mut dport = 0u16;

    if let Some(ip) = find_attr(buf, CTA_TUPLE_IP) {
        if let Some(v) = find_attr(ip, CTA_IP_V4_SRC) {
            src = read_addr(v).unwrap_or(Ipv4Addr::UNSPECIFIED);
        }
        if let Some(v) = find_attr(ip, CTA_IP_V4_DST) {
            dst = read_addr(v).unwrap_or(Ipv4Addr::UNSPECIFIED);
        }
    }

    if let Some(l4) = find_attr(buf, CTA_TUPLE_PROTO) {
        if let Some(v) = find_attr(l4, CTA_PROTO_NUM) {
            proto = v.first().copied().unwrap_or(0);
        }
        if let Some(v) = find_attr(l4, CTA_PROTO_SRC_PORT) {
            sport = read_port(v);
        }
        if let Some(v) = find_attr(l4, CTA_PROTO_DST_PORT) {
            dport = read_port(v);
        }
    }

    (src, dst, proto, sport, dport)
}

fn read_addr(payload: &[u8]) -> Option<Ipv4Addr> {
    let bytes: [u8; 4] = payload.get(..4)?.try_into().ok()?;
    Some(Ipv4Addr::from(bytes))
}

fn read_port(payload: &[u8]) -> u16 {
    match payload.get(..2) {
        Some(bytes) => u16::from_be_bytes([bytes[0], bytes[1]]),
        None => 0,
    }
}
