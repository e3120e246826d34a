// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Offload control: the front-facing state machine.
//!
//! Validates caller requests, drives the ioctl gateway, wires the conntrack
//! and netlink managers and owns the worker lifecycle. The control holds the
//! session callback; it is *initialized* exactly while a callback is held.
//!
//! `stop_offload` resets state in place. The managers and worker slots
//! survive so the next `init_offload` reuses them without reacquiring
//! kernel sockets.

pub mod prefix;
pub mod workers;

use crate::config::{
    INTERNAL_OFFLOAD_STOPPED, UPSTREAM_IFACE_PATTERN, UPSTREAM_IFACE_VTS_PATTERN,
};
use crate::config_store::OffloadConfig;
use crate::conntrack::{ConntrackManager, ControlPlane, CtFamily};
use crate::error::{OffloadError, OffloadResult};
use crate::ioctl::abi::{self, ForwardLimit, ForwardStats, HwInfo, IfaceInfo};
use crate::ioctl::{IoctlArg, IoctlCmd, OffloadDevice};
use crate::netlink::NetlinkManager;
use parking_lot::Mutex;
use prefix::{parse_prefix, Prefix};
use regex::Regex;
use std::collections::BTreeMap;
use std::ffi::CString;
use std::io;
use std::net::{Ipv4Addr, Ipv6Addr};
use std::os::fd::{AsRawFd, OwnedFd};
use std::sync::{Arc, OnceLock};
use workers::{poll_readable, CancelToken, PollVerdict, WorkerKind, WorkerRegistry};

/// Event forwarded to the caller's callback.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CallbackEvent {
    OffloadStarted,
    OffloadStoppedError,
    OffloadStoppedUnsupported,
    OffloadSupportAvailable,
    OffloadStoppedLimitReached,
    OffloadWarningReached,
    /// Any driver event number without a named mapping.
    Other(i32),
}

impl CallbackEvent {
    pub fn from_raw(event: i32) -> Self {
        match event {
            1 => Self::OffloadStarted,
            2 => Self::OffloadStoppedError,
            3 => Self::OffloadStoppedUnsupported,
            4 => Self::OffloadSupportAvailable,
            5 => Self::OffloadStoppedLimitReached,
            6 => Self::OffloadWarningReached,
            other => Self::Other(other),
        }
    }
}

/// Caller-provided event sink registered by `init_offload`.
pub trait OffloadCallback: Send + Sync {
    fn on_event(&self, event: CallbackEvent);
}

/// Forwarded byte counter deltas since the previous query.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StatsDelta {
    pub rx_diff: u64,
    pub tx_diff: u64,
}

/// Current upstream configuration.
#[derive(Clone, Debug, Default)]
pub struct UpstreamInfo {
    pub iface: String,
    pub v4_addr: Option<Ipv4Addr>,
    pub v4_gw: Option<Ipv4Addr>,
    /// Accepted and stored; IPv6 forwarding is not programmed.
    pub v6_gws: Vec<Ipv6Addr>,
}

/// One configured downstream.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DownstreamEntry {
    pub iface: String,
    /// Subnet base, host order.
    pub v4_addr: u32,
    pub v4_mask: u8,
    /// Egress ring assigned by the driver.
    pub dst_ring: u16,
}

/// State shared between the request path, the event worker and (through
/// [`ControlPlane`]) the conntrack manager.
pub(crate) struct ControlShared {
    callback: Mutex<Option<Arc<dyn OffloadCallback>>>,
    upstream: Mutex<UpstreamInfo>,
    downstreams: Mutex<BTreeMap<String, DownstreamEntry>>,
    hw_info: Mutex<HwInfo>,
}

impl ControlShared {
    fn new() -> Self {
        Self {
            callback: Mutex::new(None),
            upstream: Mutex::new(UpstreamInfo::default()),
            downstreams: Mutex::new(BTreeMap::new()),
            hw_info: Mutex::new(HwInfo::default()),
        }
    }

    fn is_initialized(&self) -> bool {
        self.callback.lock().is_some()
    }

    fn reset_values(&self) {
        *self.callback.lock() = None;
        *self.upstream.lock() = UpstreamInfo::default();
        self.downstreams.lock().clear();
        *self.hw_info.lock() = HwInfo::default();
    }

    /// Route one device event number to the caller.
    fn dispatch_event(&self, event: i32) {
        log::info!("[EVT] received event {}", event);

        if event == INTERNAL_OFFLOAD_STOPPED {
            log::info!("[EVT] hw sent stop event");
            return;
        }

        let callback = self.callback.lock().clone();
        if let Some(callback) = callback {
            callback.on_event(CallbackEvent::from_raw(event));
        }
    }
}

impl ControlPlane for ControlShared {
    fn downstream_dst_ring(&self, addr_h: u32) -> Option<u16> {
        let downstreams = self.downstreams.lock();
        for entry in downstreams.values() {
            let mask = match entry.v4_mask {
                0 => 0,
                1..=31 => u32::MAX << (32 - u32::from(entry.v4_mask)),
                _ => u32::MAX,
            };
            if (entry.v4_addr & mask) == (addr_h & mask) {
                return Some(entry.dst_ring);
            }
        }
        None
    }

    fn hw_capa(&self, mask: u32) -> bool {
        let hw = self.hw_info.lock();
        let version = hw.version;
        if version == 0 {
            log::info!("[CTRL] empty hw version");
            return false;
        }
        hw.capabilities & mask == mask
    }
}

/// The tether offload control plane.
pub struct OffloadControl {
    device: Arc<dyn OffloadDevice>,
    config: Arc<OffloadConfig>,
    conntrack: Arc<ConntrackManager>,
    netlink: Arc<NetlinkManager>,
    registry: Arc<WorkerRegistry>,
    shared: Arc<ControlShared>,
}

impl OffloadControl {
    /// Build the control plane and its shared managers. The managers live
    /// for the lifetime of the control, across offload sessions.
    pub fn new(device: Arc<dyn OffloadDevice>, config: Arc<OffloadConfig>) -> Self {
        let conntrack = Arc::new(ConntrackManager::new(Arc::clone(&device)));
        let netlink = Arc::new(NetlinkManager::new(Arc::clone(&conntrack)));
        Self {
            device,
            config,
            conntrack,
            netlink,
            registry: Arc::new(WorkerRegistry::new()),
            shared: Arc::new(ControlShared::new()),
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.shared.is_initialized()
    }

    /// Shared conntrack manager handle.
    pub fn conntrack(&self) -> Arc<ConntrackManager> {
        Arc::clone(&self.conntrack)
    }

    /// Shared neighbour manager handle.
    pub fn netlink(&self) -> Arc<NetlinkManager> {
        Arc::clone(&self.netlink)
    }

    /// Whether a worker slot is currently live.
    pub fn worker_created(&self, kind: WorkerKind) -> bool {
        self.registry.is_created(kind)
    }

    /// Current upstream configuration snapshot.
    pub fn upstream(&self) -> UpstreamInfo {
        self.shared.upstream.lock().clone()
    }

    /// Current downstream entries.
    pub fn downstreams(&self) -> Vec<DownstreamEntry> {
        self.shared.downstreams.lock().values().cloned().collect()
    }

    // ===== Lifecycle =====

    /// Bring the session up: fetch hardware info, enable forwarding, store
    /// the callback and launch the four workers.
    pub fn init_offload(&self, callback: Arc<dyn OffloadCallback>) -> OffloadResult<()> {
        if self.is_initialized() {
            return Err(OffloadError::AlreadyInitialized);
        }

        let mut hw = HwInfo::default();
        self.device
            .invoke(IoctlCmd::GetHwInfo, IoctlArg::HwInfo(&mut hw))
            .map_err(|e| ioctl_reason(e, "can't get hw version"))?;

        self.device
            .invoke(IoctlCmd::InitOffload, IoctlArg::None)
            .map_err(|e| ioctl_reason(e, "can't init offload hw"))?;

        *self.shared.hw_info.lock() = hw;
        *self.shared.callback.lock() = Some(callback);
        self.conntrack
            .set_control(Arc::clone(&self.shared) as Arc<dyn ControlPlane>);

        self.start_event_worker();
        self.start_conntrack_worker(CtFamily::Udp);
        self.start_conntrack_worker(CtFamily::Tcp);
        self.start_netlink_worker();

        let (version, capabilities) = (hw.version, hw.capabilities);
        log::info!(
            "[CTRL] init offload done. hw version: {:#010x}, capabilities: {:#010x}",
            version,
            capabilities
        );
        Ok(())
    }

    /// Disable forwarding and reset session state. Workers and managers are
    /// kept alive for the next session; state resets even when the stop
    /// ioctl fails.
    pub fn stop_offload(&self) -> OffloadResult<()> {
        if !self.is_initialized() {
            return Err(OffloadError::NotInitialized);
        }

        let result = self
            .device
            .invoke(IoctlCmd::StopOffload, IoctlArg::None)
            .map_err(|e| ioctl_reason(e, "offload hw stop failed"));

        self.shared.reset_values();
        self.conntrack.clear_control();
        self.conntrack.reset_values();
        self.netlink.reset_values();

        log::info!("[CTRL] stop offload");
        result
    }

    /// Process-teardown helper: cancel every worker. Never called by
    /// `stop_offload`.
    pub fn shutdown(&self) {
        self.registry.cancel_all();
    }

    // ===== Configuration =====

    /// Rebuild both conntrack filters from the given prefixes. IPv6
    /// prefixes are counted as skipped and change nothing.
    pub fn set_local_prefixes(&self, prefixes: &[String]) -> OffloadResult<()> {
        if !self.is_initialized() {
            return Err(OffloadError::NotInitialized);
        }
        if prefixes.is_empty() {
            return Err(OffloadError::InvalidArgument("no prefix"));
        }

        self.conntrack.detach_filters(true);

        let mut added = Vec::new();
        let mut skipped = Vec::new();
        for input in prefixes {
            let parsed = parse_prefix(input)
                .map_err(|_| OffloadError::InvalidArgument("prefix parsing error"))?;
            match parsed {
                Prefix::V4 { addr, len } => {
                    self.conntrack.add_local_prefix_filter(addr, len);
                    added.push(input.as_str());
                }
                Prefix::V6 { .. } => skipped.push(input.as_str()),
            }
        }

        self.conntrack.attach_filters();
        log::info!(
            "[CTRL] local prefixes added: [{}], skipped: [{}]",
            added.join(" "),
            skipped.join(" ")
        );
        Ok(())
    }

    /// Forwarded byte deltas for the upstream interface. Failures flatten
    /// to zeros.
    pub fn forwarded_stats(&self, upstream: &str) -> StatsDelta {
        if !self.is_initialized() {
            log::info!("[CTRL] not initialized");
            return StatsDelta::default();
        }

        let mut stats = ForwardStats::default();
        abi::copy_iface(&mut stats.iface, upstream);
        if self
            .device
            .invoke(IoctlCmd::GetForwardStats, IoctlArg::Stats(&mut stats))
            .is_err()
        {
            return StatsDelta::default();
        }

        let (rx_diff, tx_diff) = (stats.rx_diff, stats.tx_diff);
        if rx_diff > 0 || tx_diff > 0 {
            let (rx_bytes, tx_bytes) = (stats.rx_bytes, stats.tx_bytes);
            log::info!(
                "[CTRL] {} Current Rx={}, Tx={} / Total Rx={}, Tx={}",
                upstream,
                rx_diff,
                tx_diff,
                rx_bytes,
                tx_bytes
            );
        }

        StatsDelta { rx_diff, tx_diff }
    }

    /// Apply a byte quota to the upstream interface.
    pub fn set_data_limit(&self, upstream: &str, limit: u64) -> OffloadResult<()> {
        if !self.is_initialized() {
            return Err(OffloadError::NotInitialized);
        }
        if upstream.is_empty() {
            return Err(OffloadError::InvalidArgument("upstream is not set"));
        }
        if !check_interface_stat(upstream) {
            return Err(OffloadError::StatLookupFailed("upstream stat failed"));
        }

        let mut stats = ForwardStats {
            data_limit: limit,
            ..ForwardStats::default()
        };
        abi::copy_iface(&mut stats.iface, upstream);
        self.device
            .invoke(IoctlCmd::SetDataLimit, IoctlArg::Stats(&mut stats))
            .map_err(|e| ioctl_reason(e, "can't set data limit"))?;

        log::info!("[CTRL] {} bytes limit applied to {}", limit, upstream);
        Ok(())
    }

    /// Apply a warning threshold plus a byte quota to the upstream
    /// interface.
    pub fn set_data_warning_and_limit(
        &self,
        upstream: &str,
        warning: u64,
        limit: u64,
    ) -> OffloadResult<()> {
        if !self.is_initialized() {
            return Err(OffloadError::NotInitialized);
        }
        if upstream.is_empty() {
            return Err(OffloadError::InvalidArgument("upstream is not set"));
        }
        if !check_interface_stat(upstream) {
            return Err(OffloadError::StatLookupFailed("upstream stat failed"));
        }

        let mut param = ForwardLimit {
            data_warning: warning,
            data_limit: limit,
            ..ForwardLimit::default()
        };
        abi::copy_iface(&mut param.iface, upstream);
        self.device
            .invoke(IoctlCmd::SetDataWarningLimit, IoctlArg::Limit(&mut param))
            .map_err(|e| ioctl_reason(e, "can't set data warning/limit"))?;

        log::info!(
            "[CTRL] {}/{} bytes warning/limit applied to {}",
            warning,
            limit,
            upstream
        );
        Ok(())
    }

    /// Bind or clear the upstream.
    ///
    /// An empty interface or an empty IPv4 address stops offload: the
    /// upstream binding is cleared in hardware, the matcher destroyed and
    /// both filters detached without recreation. The IPv6-only case reports
    /// success with a reason; the null case reports
    /// [`OffloadError::UpstreamStopped`].
    pub fn set_upstream_parameters(
        &self,
        iface: &str,
        v4_addr: &str,
        v4_gw: &str,
        v6_gws: &[String],
    ) -> OffloadResult<Option<&'static str>> {
        if !self.is_initialized() {
            return Err(OffloadError::NotInitialized);
        }

        self.shared.upstream.lock().iface.clear();

        if iface.is_empty() || v4_addr.is_empty() {
            let mut param = IfaceInfo::default();
            self.device
                .invoke(IoctlCmd::SetUpstreamParam, IoctlArg::Iface(&mut param))
                .map_err(|e| ioctl_reason(e, "can't set upstream (stop)"))?;

            self.conntrack.set_upstream_ipv4(None);
            self.conntrack.detach_filters(false);

            if !iface.is_empty() && !v6_gws.is_empty() {
                return Ok(Some("stop offload due to ipv6 only"));
            }
            return Err(OffloadError::UpstreamStopped);
        }

        if !check_interface_stat(iface) {
            log::info!("[CTRL] failed to get upstream stat {}", iface);
            return Err(OffloadError::StatLookupFailed("upstream stat failed"));
        }
        if !upstream_regex().is_match(iface) {
            log::info!("[CTRL] not supported upstream {}", iface);
            return Err(OffloadError::InvalidArgument("not supported upstream"));
        }

        self.shared.upstream.lock().iface = iface.to_string();

        let mut param = IfaceInfo::default();
        abi::copy_iface(&mut param.iface, iface);
        self.device
            .invoke(IoctlCmd::SetUpstreamParam, IoctlArg::Iface(&mut param))
            .map_err(|e| ioctl_reason(e, "can't set upstream"))?;

        match parse_prefix(v4_addr) {
            Ok(Prefix::V4 { addr, .. }) => {
                self.shared.upstream.lock().v4_addr = Some(addr);
                self.conntrack.set_upstream_ipv4(Some(addr));
            }
            _ => return Err(OffloadError::InvalidArgument("v4Addr parsing error")),
        }

        if !v4_gw.is_empty() {
            match parse_prefix(v4_gw) {
                Ok(Prefix::V4 { addr, .. }) => {
                    self.shared.upstream.lock().v4_gw = Some(addr);
                }
                _ => return Err(OffloadError::InvalidArgument("v4Gw parsing error")),
            }
        }

        {
            let mut upstream = self.shared.upstream.lock();
            upstream.v6_gws.clear();
        }
        for gw in v6_gws {
            match parse_prefix(gw) {
                Ok(Prefix::V6 { addr, .. }) => {
                    self.shared.upstream.lock().v6_gws.push(addr);
                }
                _ => return Err(OffloadError::InvalidArgument("v6Gws parsing error")),
            }
        }

        log::info!("[CTRL] set upstream iface: {}", iface);
        Ok(None)
    }

    /// Register a downstream. IPv4 prefixes are programmed and assigned a
    /// ring by the driver; IPv6 prefixes are recorded as skipped.
    pub fn add_downstream(&self, iface: &str, prefix: &str) -> OffloadResult<()> {
        if !self.is_initialized() {
            return Err(OffloadError::NotInitialized);
        }
        if iface.is_empty() {
            return Err(OffloadError::InvalidArgument("iface empty"));
        }
        if !check_interface_stat(iface) {
            log::info!("[CTRL] failed to get downstream stat {}", iface);
            return Err(OffloadError::StatLookupFailed("downstream stat failed"));
        }

        let parsed = parse_prefix(prefix)
            .map_err(|_| OffloadError::InvalidArgument("prefix parsing error"))?;

        match parsed {
            Prefix::V4 { addr, len } => {
                self.shared.downstreams.lock().remove(iface);

                let mut param = IfaceInfo::default();
                abi::copy_iface(&mut param.iface, iface);
                self.device
                    .invoke(IoctlCmd::AddDownstream, IoctlArg::Iface(&mut param))
                    .map_err(|e| ioctl_reason(e, "can't add a downstream"))?;

                let dst_ring = param.dst_ring;
                self.shared.downstreams.lock().insert(
                    iface.to_string(),
                    DownstreamEntry {
                        iface: iface.to_string(),
                        v4_addr: u32::from(addr),
                        v4_mask: len,
                        dst_ring,
                    },
                );

                log::info!(
                    "[CTRL] add downstream {}({}) at dst: {}",
                    iface,
                    prefix,
                    dst_ring
                );
            }
            Prefix::V6 { .. } => {
                log::info!("[CTRL] skip adding downstream {}, family: inet6", iface);
            }
        }

        Ok(())
    }

    /// Drop a downstream: tear down every NAT rule in its subnet, then
    /// release the ring in hardware. IPv6 prefixes are skipped.
    pub fn remove_downstream(&self, iface: &str, prefix: &str) -> OffloadResult<()> {
        if !self.is_initialized() {
            return Err(OffloadError::NotInitialized);
        }
        if iface.is_empty() {
            return Err(OffloadError::InvalidArgument("iface empty"));
        }

        // a dead interface still gets its ioctl chance
        let stat_ok = check_interface_stat(iface);
        if !stat_ok {
            log::info!("[CTRL] failed to get downstream stat {}", iface);
        }

        let parsed = parse_prefix(prefix)
            .map_err(|_| OffloadError::InvalidArgument("prefix parsing error"))?;

        match parsed {
            Prefix::V4 { .. } => {
                let entry = self.shared.downstreams.lock().remove(iface);
                let Some(entry) = entry else {
                    return Err(OffloadError::InvalidArgument("remove downstream not added"));
                };

                self.conntrack
                    .remove_downstream_local_addr(entry.v4_addr, entry.v4_mask);

                let mut param = IfaceInfo::default();
                abi::copy_iface(&mut param.iface, iface);
                self.device
                    .invoke(IoctlCmd::RemoveDownstream, IoctlArg::Iface(&mut param))
                    .map_err(|e| ioctl_reason(e, "can't remove a downstream"))?;

                log::info!("[CTRL] remove downstream {}({})", iface, prefix);
            }
            Prefix::V6 { .. } => {
                log::info!("[CTRL] skip removing downstream {}, family: inet6", iface);
            }
        }

        if stat_ok {
            Ok(())
        } else {
            Err(OffloadError::StatLookupFailed("failed to remove downstream"))
        }
    }

    // ===== Worker launch =====

    fn start_event_worker(&self) {
        let device = Arc::clone(&self.device);
        let shared = Arc::clone(&self.shared);
        self.registry.start(WorkerKind::Event, move |cancel| {
            match device.open_event_fd() {
                Ok(fd) => event_loop(&shared, &fd, cancel),
                Err(err) => log::error!("[EVT] failed to open device ({})", err),
            }
        });
    }

    fn start_conntrack_worker(&self, family: CtFamily) {
        let kind = match family {
            CtFamily::Udp => WorkerKind::ConntrackUdp,
            CtFamily::Tcp => WorkerKind::ConntrackTcp,
        };
        if self.registry.is_created(kind) {
            return;
        }

        let fd = match family {
            CtFamily::Udp => self.config.udp_conntrack_fd(),
            CtFamily::Tcp => self.config.tcp_conntrack_fd(),
        };
        let Some(fd) = fd else {
            log::error!("[CTRL] no conntrack socket for {:?}", family);
            return;
        };
        if self.conntrack.bind_fd(family, fd).is_err() {
            log::error!("[CTRL] failed to create thread {:?}", kind);
            return;
        }

        let manager = Arc::clone(&self.conntrack);
        self.registry
            .start(kind, move |cancel| manager.monitor(family, cancel));
    }

    fn start_netlink_worker(&self) {
        let manager = Arc::clone(&self.netlink);
        self.registry
            .start(WorkerKind::Netlink, move |cancel| manager.monitor(cancel));
    }
}

impl Drop for OffloadControl {
    fn drop(&mut self) {
        self.registry.cancel_all();
    }
}

/// Event-poll loop: one 4-byte little-endian record per readable round.
fn event_loop(shared: &ControlShared, fd: &OwnedFd, cancel: &CancelToken) {
    log::info!("[EVT] +++");
    let raw = fd.as_raw_fd();

    loop {
        match poll_readable(raw, cancel) {
            PollVerdict::Readable => {}
            PollVerdict::Retry => continue,
            PollVerdict::Cancelled | PollVerdict::Closed => break,
        }

        let mut record = [0u8; 4];
        // SAFETY: record is a live 4-byte buffer for the duration of the call.
        let read = unsafe { libc::read(raw, record.as_mut_ptr().cast(), record.len()) };
        if read < 0 {
            let err = io::Error::last_os_error();
            match err.raw_os_error() {
                Some(libc::EINTR) | Some(libc::EAGAIN) => continue,
                _ => {
                    log::error!("[EVT] read failed ({})", err);
                    break;
                }
            }
        }
        if read as usize != record.len() {
            continue;
        }

        shared.dispatch_event(i32::from_le_bytes(record));
    }

    log::info!("[EVT] ---");
}

fn ioctl_reason(err: OffloadError, reason: &'static str) -> OffloadError {
    match err {
        OffloadError::DeviceUnavailable => err,
        _ => OffloadError::IoctlFailed(reason),
    }
}

fn vts_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(UPSTREAM_IFACE_VTS_PATTERN).expect("valid VTS pattern"))
}

fn upstream_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(UPSTREAM_IFACE_PATTERN).expect("valid upstream pattern"))
}

/// An interface is usable when it resolves to a real index or matches the
/// compliance-test name pattern.
fn check_interface_stat(name: &str) -> bool {
    if vts_regex().is_match(name) {
        return true;
    }
    if interface_exists(name) {
        return true;
    }
    log::error!("[CTRL] failed to get ifindex. iface: {}", name);
    false
}

fn interface_exists(name: &str) -> bool {
    let Ok(cname) = CString::new(name) else {
        return false;
    };
    // SAFETY: cname is a valid NUL-terminated string for the call.
    unsafe { libc::if_nametoindex(cname.as_ptr()) != 0 }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_callback_event_mapping() {
        assert_eq!(CallbackEvent::from_raw(1), CallbackEvent::OffloadStarted);
        assert_eq!(
            CallbackEvent::from_raw(5),
            CallbackEvent::OffloadStoppedLimitReached
        );
        assert_eq!(
            CallbackEvent::from_raw(6),
            CallbackEvent::OffloadWarningReached
        );
        assert_eq!(CallbackEvent::from_raw(77), CallbackEvent::Other(77));
    }

    #[test]
    fn test_interface_patterns() {
        for name in ["rmnet0", "rmnet7", "rmnet_data3", "dummy0"] {
            assert!(upstream_regex().is_match(name), "{name}");
        }
        for name in ["rmnet8", "eth0", "rmnet_data", "dummy", "xrmnet0", "rmnet0x"] {
            assert!(!upstream_regex().is_match(name), "{name}");
        }

        // the VTS subset excludes the production rmnet[0-7] names
        assert!(vts_regex().is_match("rmnet_data0"));
        assert!(vts_regex().is_match("dummy9"));
        assert!(!vts_regex().is_match("rmnet0"));
    }

    #[test]
    fn test_check_interface_stat() {
        // VTS names pass without an ifindex
        assert!(check_interface_stat("dummy0"));
        // loopback exists on every Linux test host
        assert!(check_interface_stat("lo"));
        assert!(!check_interface_stat("definitely-not-an-iface"));
        assert!(!check_interface_stat("bad\0name"));
    }

    #[test]
    fn test_downstream_dst_ring_longest_match_is_first_hit() {
        let shared = ControlShared::new();
        shared.downstreams.lock().insert(
            "dummy1".to_string(),
            DownstreamEntry {
                iface: "dummy1".to_string(),
                v4_addr: u32::from(Ipv4Addr::new(192, 168, 42, 0)),
                v4_mask: 24,
                dst_ring: 2,
            },
        );

        assert_eq!(
            shared.downstream_dst_ring(u32::from(Ipv4Addr::new(192, 168, 42, 50))),
            Some(2)
        );
        assert_eq!(
            shared.downstream_dst_ring(u32::from(Ipv4Addr::new(192, 168, 43, 50))),
            None
        );
    }

    #[test]
    fn test_hw_capa_requires_version() {
        let shared = ControlShared::new();
        assert!(!shared.hw_capa(abi::DIT_CAP_MASK_PORT_BIG_ENDIAN));

        *shared.hw_info.lock() = HwInfo {
            version: 0x1,
            capabilities: abi::DIT_CAP_MASK_PORT_BIG_ENDIAN,
        };
        assert!(shared.hw_capa(abi::DIT_CAP_MASK_PORT_BIG_ENDIAN));
        assert!(!shared.hw_capa(0x2));
    }
}
