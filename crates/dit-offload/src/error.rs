// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Error types for offload control operations.
//!
//! Every failure that crosses the caller boundary is reduced to a textual
//! reason via [`fmt::Display`]; kernel errno values are logged at the failure
//! site and never exposed.

use std::fmt;

/// Result type for offload control operations.
pub type OffloadResult<T> = Result<T, OffloadError>;

/// Errors that can occur while driving the offload hardware.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OffloadError {
    /// Operation requires a prior successful `init_offload`
    NotInitialized,

    /// `init_offload` called twice without an intervening stop
    AlreadyInitialized,

    /// Malformed request argument (empty interface, bad prefix, ...)
    InvalidArgument(&'static str),

    /// A required manager instance could not be resolved
    NoResource(&'static str),

    /// No accelerator device candidate could be opened
    DeviceUnavailable,

    /// The kernel driver rejected an ioctl
    IoctlFailed(&'static str),

    /// Interface name does not resolve and is not a test pattern
    StatLookupFailed(&'static str),

    /// Upstream parameters requested an offload stop
    UpstreamStopped,
}

impl fmt::Display for OffloadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotInitialized => write!(f, "not initialized"),
            Self::AlreadyInitialized => write!(f, "already initialized"),
            Self::InvalidArgument(reason) => write!(f, "{}", reason),
            Self::NoResource(what) => write!(f, "can't get {} instance", what),
            Self::DeviceUnavailable => write!(f, "failed to open device"),
            Self::IoctlFailed(reason) => write!(f, "{}", reason),
            Self::StatLookupFailed(reason) => write!(f, "{}", reason),
            Self::UpstreamStopped => write!(f, "stop offload due to upstream null param"),
        }
    }
}

impl std::error::Error for OffloadError {}
