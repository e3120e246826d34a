// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Shared fixtures: a recording accelerator and a recording callback.

#![allow(dead_code)]

use dit_offload::ioctl::abi::{self, HwInfo};
use dit_offload::{CallbackEvent, IoctlArg, IoctlCmd, OffloadCallback, OffloadDevice, OffloadError};
use parking_lot::Mutex;
use std::io;
use std::os::fd::OwnedFd;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Everything the mock accelerator observed, as plain values.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum IoctlRecord {
    InitOffload,
    StopOffload,
    GetHwInfo,
    GetForwardStats { iface: String },
    SetDataLimit { iface: String, limit: u64 },
    SetDataWarningLimit { iface: String, warning: u64, limit: u64 },
    SetUpstreamParam { iface: String },
    AddDownstream { iface: String, dst_ring: u16 },
    RemoveDownstream { iface: String },
    SetNatLocalAddr { index: u16, dst_ring: u8, addr: u32, dev_addr: [u8; 6] },
    SetNatLocalPort { key: u16, hw_val: u32 },
}

/// Recording in-memory accelerator.
pub struct MockDevice {
    records: Mutex<Vec<IoctlRecord>>,
    hw_info: Mutex<(u32, u32)>,
    dst_ring: Mutex<u16>,
    stats: Mutex<(u64, u64, u64, u64)>,
    fail_cmds: Mutex<Vec<IoctlCmd>>,
    event_pipe: Mutex<Option<OwnedFd>>,
}

impl MockDevice {
    pub fn new() -> Self {
        Self {
            records: Mutex::new(Vec::new()),
            hw_info: Mutex::new((0x1, 0)),
            dst_ring: Mutex::new(1),
            stats: Mutex::new((0, 0, 0, 0)),
            fail_cmds: Mutex::new(Vec::new()),
            event_pipe: Mutex::new(None),
        }
    }

    pub fn set_hw_info(&self, version: u32, capabilities: u32) {
        *self.hw_info.lock() = (version, capabilities);
    }

    pub fn set_dst_ring(&self, ring: u16) {
        *self.dst_ring.lock() = ring;
    }

    pub fn set_stats(&self, rx_bytes: u64, tx_bytes: u64, rx_diff: u64, tx_diff: u64) {
        *self.stats.lock() = (rx_bytes, tx_bytes, rx_diff, tx_diff);
    }

    pub fn fail_on(&self, cmd: IoctlCmd) {
        self.fail_cmds.lock().push(cmd);
    }

    pub fn clear_failures(&self) {
        self.fail_cmds.lock().clear();
    }

    pub fn set_event_pipe(&self, fd: OwnedFd) {
        *self.event_pipe.lock() = Some(fd);
    }

    pub fn records(&self) -> Vec<IoctlRecord> {
        self.records.lock().clone()
    }

    pub fn clear_records(&self) {
        self.records.lock().clear();
    }
}

impl OffloadDevice for MockDevice {
    fn invoke(&self, cmd: IoctlCmd, arg: IoctlArg<'_>) -> Result<(), OffloadError> {
        if self.fail_cmds.lock().contains(&cmd) {
            return Err(OffloadError::IoctlFailed(cmd.name()));
        }

        let record = match (cmd, arg) {
            (IoctlCmd::InitOffload, IoctlArg::None) => IoctlRecord::InitOffload,
            (IoctlCmd::StopOffload, IoctlArg::None) => IoctlRecord::StopOffload,
            (IoctlCmd::GetHwInfo, IoctlArg::HwInfo(hw)) => {
                let (version, capabilities) = *self.hw_info.lock();
                *hw = HwInfo {
                    version,
                    capabilities,
                };
                IoctlRecord::GetHwInfo
            }
            (IoctlCmd::GetForwardStats, IoctlArg::Stats(stats)) => {
                let (rx_bytes, tx_bytes, rx_diff, tx_diff) = *self.stats.lock();
                stats.rx_bytes = rx_bytes;
                stats.tx_bytes = tx_bytes;
                stats.rx_diff = rx_diff;
                stats.tx_diff = tx_diff;
                IoctlRecord::GetForwardStats {
                    iface: abi::iface_to_str(&stats.iface),
                }
            }
            (IoctlCmd::SetDataLimit, IoctlArg::Stats(stats)) => IoctlRecord::SetDataLimit {
                iface: abi::iface_to_str(&stats.iface),
                limit: stats.data_limit,
            },
            (IoctlCmd::SetDataWarningLimit, IoctlArg::Limit(limit)) => {
                IoctlRecord::SetDataWarningLimit {
                    iface: abi::iface_to_str(&limit.iface),
                    warning: limit.data_warning,
                    limit: limit.data_limit,
                }
            }
            (IoctlCmd::SetUpstreamParam, IoctlArg::Iface(info)) => IoctlRecord::SetUpstreamParam {
                iface: abi::iface_to_str(&info.iface),
            },
            (IoctlCmd::AddDownstream, IoctlArg::Iface(info)) => {
                info.dst_ring = *self.dst_ring.lock();
                IoctlRecord::AddDownstream {
                    iface: abi::iface_to_str(&info.iface),
                    dst_ring: info.dst_ring,
                }
            }
            (IoctlCmd::RemoveDownstream, IoctlArg::Iface(info)) => IoctlRecord::RemoveDownstream {
                iface: abi::iface_to_str(&info.iface),
            },
            (IoctlCmd::SetNatLocalAddr, IoctlArg::NatAddr(param)) => IoctlRecord::SetNatLocalAddr {
                index: param.index,
                dst_ring: param.dst_ring,
                addr: param.addr,
                dev_addr: param.dev_addr,
            },
            (IoctlCmd::SetNatLocalPort, IoctlArg::NatPort(param)) => IoctlRecord::SetNatLocalPort {
                key: param.reply_port_dst_l,
                hw_val: param.hw_val,
            },
            _ => return Err(OffloadError::IoctlFailed("unexpected argument")),
        };

        self.records.lock().push(record);
        Ok(())
    }

    fn open_event_fd(&self) -> io::Result<OwnedFd> {
        self.event_pipe
            .lock()
            .take()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no offload device"))
    }
}

/// Callback sink collecting forwarded events.
pub struct RecordingCallback {
    pub events: Mutex<Vec<CallbackEvent>>,
}

impl RecordingCallback {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            events: Mutex::new(Vec::new()),
        })
    }
}

impl OffloadCallback for RecordingCallback {
    fn on_event(&self, event: CallbackEvent) {
        self.events.lock().push(event);
    }
}

/// Spin until `pred` holds or the deadline expires.
pub fn wait_until(deadline: Duration, mut pred: impl FnMut() -> bool) -> bool {
    let start = Instant::now();
    while start.elapsed() < deadline {
        if pred() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    false
}

/// Open a pipe pair: (read end, write end).
pub fn pipe_pair() -> (OwnedFd, OwnedFd) {
    use std::os::fd::FromRawFd;

    let mut fds = [0 as libc::c_int; 2];
    // SAFETY: fds points at a writable 2-element array.
    let rc = unsafe { libc::pipe2(fds.as_mut_ptr(), libc::O_CLOEXEC) };
    assert_eq!(rc, 0);
    // SAFETY: pipe2 handed us ownership of both descriptors.
    unsafe { (OwnedFd::from_raw_fd(fds[0]), OwnedFd::from_raw_fd(fds[1])) }
}
