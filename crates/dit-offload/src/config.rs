// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Compile-time configuration for the offload control plane.

use std::ffi::CStr;

/// Accelerator character device candidates, highest priority first.
///
/// The first candidate that opens is remembered by the gateway and used for
/// every subsequent call.
pub const DEVICE_CANDIDATES: &[&CStr] = &[c"/dev/dit2"];

/// Number of NAT local address registers in hardware.
pub const NAT_LOCAL_ADDR_SLOTS: usize = 16;

/// Port rule table capacity (11-bit index).
pub const PORT_TABLE_SIZE: usize = 2048;

/// Upstream interface names accepted by compliance test runs.
pub const UPSTREAM_IFACE_VTS_PATTERN: &str = r"^((rmnet_data\d)|(dummy\d))$";

/// Upstream interface names accepted in normal operation.
pub const UPSTREAM_IFACE_PATTERN: &str = r"^((rmnet[0-7])|(rmnet_data\d)|(dummy\d))$";

/// Driver-internal event consumed by the event-poll worker without
/// forwarding to the caller.
pub const INTERNAL_OFFLOAD_STOPPED: i32 = 5000;

/// Event-poll timeout; negative blocks until the device or the cancel pipe
/// becomes readable.
pub const DEV_POLL_TIMEOUT_MS: libc::c_int = -1;

/// Receive buffer size for the conntrack and neighbour netlink workers.
pub const NL_RECV_BUFSIZE: usize = 8192;
