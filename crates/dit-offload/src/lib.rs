// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! # dit-offload - Tether offload control plane
//!
//! Userspace control plane for the DIT hardware NAT accelerator used by
//! mobile tethering. The crate observes live IPv4 connection tracking and
//! neighbour events, decides which flows are eligible for the hardware
//! fast path, and programs per-address and per-port rules through a fixed
//! ioctl surface, while reporting forwarded-traffic statistics and
//! enforcing data quotas for its caller.
//!
//! ## Architecture
//!
//! ```text
//! +--------------------------------------------------------------+
//! |                      Caller (RPC binding)                    |
//! |     requests + completion results | event callback           |
//! +--------------------------------------------------------------+
//! |  OffloadControl   lifecycle, upstream/downstream config,     |
//! |                   quotas, event-poll worker, worker registry |
//! +----------------------+---------------------------------------+
//! |  ConntrackManager    |  NetlinkManager                       |
//! |  flow events ->      |  NEIGH events -> (IP, MAC) map        |
//! |  NAT tables          |                                       |
//! +----------------------+---------------------------------------+
//! |  IoctlGateway        /dev/dit2 command surface               |
//! +--------------------------------------------------------------+
//! ```
//!
//! Four worker threads feed the state machine: the device event poll, one
//! conntrack stream per family (UDP, TCP) and the neighbour netlink
//! stream. Hardware capacity is sixteen local address slots and a
//! 2048-entry port rule table with round-robin eviction.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use dit_offload::{IoctlGateway, OffloadCallback, OffloadConfig, OffloadControl};
//! use std::sync::Arc;
//!
//! struct Events;
//! impl OffloadCallback for Events {
//!     fn on_event(&self, event: dit_offload::CallbackEvent) {
//!         println!("offload event: {:?}", event);
//!     }
//! }
//!
//! fn main() -> Result<(), dit_offload::OffloadError> {
//!     let control = OffloadControl::new(
//!         Arc::new(IoctlGateway::new()),
//!         Arc::new(OffloadConfig::new()),
//!     );
//!     control.init_offload(Arc::new(Events))?;
//!     control.set_local_prefixes(&["127.0.0.0/8".to_string()])?;
//!     control.add_downstream("rndis0", "192.168.42.0/24")?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod config_store;
pub mod conntrack;
pub mod control;
pub mod error;
pub mod ioctl;
pub mod netlink;
pub mod wire;

pub use config_store::OffloadConfig;
pub use conntrack::{ConntrackManager, ControlPlane, CtFamily};
pub use control::workers::WorkerKind;
pub use control::{
    CallbackEvent, DownstreamEntry, OffloadCallback, OffloadControl, StatsDelta, UpstreamInfo,
};
pub use error::{OffloadError, OffloadResult};
pub use ioctl::{IoctlArg, IoctlCmd, IoctlGateway, OffloadDevice};
pub use netlink::NetlinkManager;
pub use wire::conntrack::{CtEvent, CtMsgType};
pub use wire::neigh::NeighEvent;
