// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Custody of the caller-supplied conntrack sockets.
//!
//! The caller opens the two netfilter conntrack sockets (UDP family first,
//! TCP family second) and hands them over as single-descriptor bundles.
//! They must be held for the life of the session or the subscriptions are
//! lost.

use crate::error::{OffloadError, OffloadResult};
use parking_lot::Mutex;
use std::os::fd::{AsRawFd, OwnedFd, RawFd};

const CT_UDP: usize = 0;
const CT_TCP: usize = 1;

/// Conntrack socket store.
pub struct OffloadConfig {
    handles: Mutex<[Option<OwnedFd>; 2]>,
}

impl OffloadConfig {
    pub fn new() -> Self {
        Self {
            handles: Mutex::new([None, None]),
        }
    }

    /// Accept the socket pair. Each bundle must carry exactly one
    /// descriptor.
    pub fn set_handles(&self, udp: Vec<OwnedFd>, tcp: Vec<OwnedFd>) -> OffloadResult<()> {
        if udp.len() != 1 || tcp.len() != 1 {
            return Err(OffloadError::InvalidArgument("invalid handles"));
        }

        let mut handles = self.handles.lock();
        handles[CT_UDP] = udp.into_iter().next();
        handles[CT_TCP] = tcp.into_iter().next();
        Ok(())
    }

    pub fn udp_conntrack_fd(&self) -> Option<RawFd> {
        self.handles.lock()[CT_UDP].as_ref().map(AsRawFd::as_raw_fd)
    }

    pub fn tcp_conntrack_fd(&self) -> Option<RawFd> {
        self.handles.lock()[CT_TCP].as_ref().map(AsRawFd::as_raw_fd)
    }

    /// Session reset keeps the handles; they are replaced only by the next
    /// `set_handles`.
    pub fn reset_values(&self) {}
}

impl Default for OffloadConfig {
    fn default() -> Self {
        Self::new()
    }
}
