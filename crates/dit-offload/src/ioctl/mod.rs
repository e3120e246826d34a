// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Accelerator device gateway.
//!
//! [`OffloadDevice`] is the seam between the control plane and the kernel
//! driver: one `invoke` per ioctl, plus an event stream handle for the poll
//! worker. [`IoctlGateway`] is the production implementation; tests install
//! a recording fake behind the same trait.

pub mod abi;

use crate::config::DEVICE_CANDIDATES;
use crate::error::{OffloadError, OffloadResult};
use abi::{ForwardLimit, ForwardStats, HwInfo, IfaceInfo, NatLocalAddr, NatLocalPort};
use parking_lot::Mutex;
use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};

/// Accelerator command set. Each variant maps to one driver ioctl.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IoctlCmd {
    InitOffload,
    StopOffload,
    GetForwardStats,
    SetDataLimit,
    SetUpstreamParam,
    AddDownstream,
    RemoveDownstream,
    SetDataWarningLimit,
    SetNatLocalAddr,
    SetNatLocalPort,
    GetHwInfo,
}

impl IoctlCmd {
    /// Kernel request code for this command.
    pub fn code(self) -> libc::c_ulong {
        match self {
            Self::InitOffload => abi::OFFLOAD_IOCTL_INIT_OFFLOAD,
            Self::StopOffload => abi::OFFLOAD_IOCTL_STOP_OFFLOAD,
            Self::GetForwardStats => abi::OFFLOAD_IOCTL_GET_FORWD_STATS,
            Self::SetDataLimit => abi::OFFLOAD_IOCTL_SET_DATA_LIMIT,
            Self::SetUpstreamParam => abi::OFFLOAD_IOCTL_SET_UPSTRM_PARAM,
            Self::AddDownstream => abi::OFFLOAD_IOCTL_ADD_DOWNSTREAM,
            Self::RemoveDownstream => abi::OFFLOAD_IOCTL_REMOVE_DOWNSTRM,
            Self::SetDataWarningLimit => abi::OFFLOAD_IOCTL_SET_DATA_WARNING_LIMIT,
            Self::SetNatLocalAddr => abi::OFFLOAD_IOCTL_SET_NAT_LOCAL_ADDR,
            Self::SetNatLocalPort => abi::OFFLOAD_IOCTL_SET_NAT_LOCAL_PORT,
            Self::GetHwInfo => abi::OFFLOAD_IOCTL_GET_HW_INFO,
        }
    }

    /// Short name for log lines.
    pub fn name(self) -> &'static str {
        match self {
            Self::InitOffload => "INIT_OFFLOAD",
            Self::StopOffload => "STOP_OFFLOAD",
            Self::GetForwardStats => "GET_FORWD_STATS",
            Self::SetDataLimit => "SET_DATA_LIMIT",
            Self::SetUpstreamParam => "SET_UPSTRM_PARAM",
            Self::AddDownstream => "ADD_DOWNSTREAM",
            Self::RemoveDownstream => "REMOVE_DOWNSTRM",
            Self::SetDataWarningLimit => "SET_DATA_WARNING_LIMIT",
            Self::SetNatLocalAddr => "SET_NAT_LOCAL_ADDR",
            Self::SetNatLocalPort => "SET_NAT_LOCAL_PORT",
            Self::GetHwInfo => "GET_HW_INFO",
        }
    }
}

/// Typed ioctl argument buffer. Read-write commands fill the referenced
/// struct in place.
pub enum IoctlArg<'a> {
    None,
    HwInfo(&'a mut HwInfo),
    Stats(&'a mut ForwardStats),
    Limit(&'a mut ForwardLimit),
    Iface(&'a mut IfaceInfo),
    NatAddr(&'a mut NatLocalAddr),
    NatPort(&'a mut NatLocalPort),
}

impl IoctlArg<'_> {
    fn into_mut_ptr(self) -> *mut libc::c_void {
        match self {
            Self::None => std::ptr::null_mut(),
            Self::HwInfo(v) => (v as *mut HwInfo).cast(),
            Self::Stats(v) => (v as *mut ForwardStats).cast(),
            Self::Limit(v) => (v as *mut ForwardLimit).cast(),
            Self::Iface(v) => (v as *mut IfaceInfo).cast(),
            Self::NatAddr(v) => (v as *mut NatLocalAddr).cast(),
            Self::NatPort(v) => (v as *mut NatLocalPort).cast(),
        }
    }
}

/// Handle to the offload accelerator.
pub trait OffloadDevice: Send + Sync {
    /// Issue one command. Stateless per call; no retries.
    fn invoke(&self, cmd: IoctlCmd, arg: IoctlArg<'_>) -> OffloadResult<()>;

    /// Open a descriptor for the device event stream.
    fn open_event_fd(&self) -> io::Result<OwnedFd>;
}

/// Production gateway over the character device candidate list.
///
/// Each `invoke` opens the device, issues the command and closes the
/// descriptor. The first candidate that opens is remembered so later calls
/// skip the probe walk.
pub struct IoctlGateway {
    selected: Mutex<Option<usize>>,
}

impl IoctlGateway {
    pub fn new() -> Self {
        Self {
            selected: Mutex::new(None),
        }
    }

    fn open_device(&self) -> OffloadResult<OwnedFd> {
        let mut selected = self.selected.lock();
        let range = match *selected {
            Some(i) => i..i + 1,
            None => 0..DEVICE_CANDIDATES.len(),
        };

        for i in range {
            // SAFETY: the candidate path is a valid NUL-terminated string and
            // the flags request no out parameters.
            let fd = unsafe {
                libc::open(
                    DEVICE_CANDIDATES[i].as_ptr(),
                    libc::O_RDWR | libc::O_CLOEXEC,
                )
            };
            if fd >= 0 {
                *selected = Some(i);
                // SAFETY: open returned a fresh descriptor we now own.
                return Ok(unsafe { OwnedFd::from_raw_fd(fd) });
            }
        }

        log::error!(
            "[IOCTL] failed to open device ({})",
            io::Error::last_os_error()
        );
        Err(OffloadError::DeviceUnavailable)
    }
}

impl Default for IoctlGateway {
    fn default() -> Self {
        Self::new()
    }
}

impl OffloadDevice for IoctlGateway {
    fn invoke(&self, cmd: IoctlCmd, arg: IoctlArg<'_>) -> OffloadResult<()> {
        let fd = self.open_device()?;

        // SAFETY: fd is open for the duration of the call and the argument
        // pointer references a live packed struct of the size encoded in the
        // request code (or null for no-argument commands).
        let rc = unsafe { libc::ioctl(fd.as_raw_fd(), cmd.code(), arg.into_mut_ptr()) };
        if rc < 0 {
            log::error!(
                "[IOCTL] {} failed ({})",
                cmd.name(),
                io::Error::last_os_error()
            );
            return Err(OffloadError::IoctlFailed(cmd.name()));
        }

        Ok(())
    }

    fn open_event_fd(&self) -> io::Result<OwnedFd> {
        self.open_device()
            .map_err(|_| io::Error::new(io::ErrorKind::NotFound, "no offload device"))
    }
}
