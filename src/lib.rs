//! # vdev_id
//!
//! Resolves a block device's physical enclosure location into a stable,
//! human-meaningful alias (a channel + slot name such as `A3`), so that
//! failed disks can be identified by bay position instead of by
//! kernel-assigned device name.
//!
//! ## Overview
//!
//! The resolver is invoked once per block device event (normally from a udev
//! rule) and is a pure function of the device, the udev-provided attributes,
//! and the mapping file (`/etc/zfs/vdev_id.conf` by default). Resolution
//! proceeds in two stages:
//!
//! 1. **Literal aliases**: if any device link udev produced for the device
//!    has an `alias` record in the configuration, that name wins.
//! 2. **Topology walk**: otherwise the device's canonical sysfs path is
//!    walked to recover its HBA PCI function, port, phy, and enclosure slot,
//!    which the `channel` and `slot` tables turn into the final name. A
//!    multipath map is first substituted with one of its running component
//!    disks.
//!
//! Most devices legitimately have no mapping (virtual disks, NVMe, channels
//! not listed in the file); those resolve to `None` rather than an error.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use vdev_id::{ConfigTable, DeviceContext, Resolver};
//!
//! let table = ConfigTable::load("/etc/zfs/vdev_id.conf")?
//!     .expect("alias resolution not configured");
//! let ctx = DeviceContext {
//!     device: "sda".to_string(),
//!     ..Default::default()
//! };
//! match Resolver::new(&table).resolve(&ctx)? {
//!     Some(alias) => println!("ID_VDEV={}", alias),
//!     None => {} // no physical location mapping for this device
//! }
//! # Ok::<(), vdev_id::VdevIdError>(())
//! ```

use std::io;

use thiserror::Error;

mod alias;
mod config;
mod multipath;
mod resolver;
mod topology;

pub use config::{
    ConfigTable, SlotSelector, Topology, DEFAULT_CONFIG_PATH, DEFAULT_PHYS_PER_PORT,
    DEFAULT_TOPOLOGY,
};
pub use multipath::{MultipathCommand, MultipathStatus};
pub use resolver::{map_channel, map_slot, DeviceContext, Resolver};
pub use topology::{device_sys_path, walk, ResolvedLocation};

/// Errors that can occur during alias resolution.
///
/// Only genuine configuration errors surface here; a device that simply has
/// no mapping is reported as `Ok(None)` by the resolver, not as an error.
#[derive(Error, Debug)]
pub enum VdevIdError {
    /// An I/O error occurred reading the configuration file.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The `phys_per_port` directive is not a positive integer.
    #[error("invalid phys_per_port value: {0}")]
    InvalidPhysPerPort(String),

    /// The effective topology is neither `sas_direct` nor `sas_switch`.
    #[error("unknown topology: {0}")]
    UnknownTopology(String),
}
