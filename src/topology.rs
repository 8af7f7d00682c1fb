//! Sysfs topology traversal for SAS-attached devices.
//!
//! The kernel exposes a device's physical attachment as a variable-depth
//! directory path under `/sys/devices`, e.g.
//!
//! ```text
//! /sys/devices/pci0000:00/0000:85:00.0/host1/port-1:0/end_device-1:0/
//!     target1:0:0/1:0:0:0/block/sdb
//! ```
//!
//! The walk scans that path for marker segments (`hostN`, `phy*`,
//! `end_device*`) to recover the PCI function, port, phy, and enclosure slot
//! of the device. Devices without SAS topology (virtual disks, loop devices,
//! NVMe) simply have no such markers; every missing element makes the walk
//! return `None` rather than an error.

use std::fs;
use std::path::{Path, PathBuf};

use crate::config::{SlotSelector, Topology};

/// Physical location recovered from a sysfs walk, consumed immediately by
/// channel and slot mapping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedLocation {
    /// PCI function of the controlling HBA, without the domain (`85:00.0`).
    pub pci_id: String,
    /// HBA or switch port number, derived from the phy number.
    pub port: u64,
    /// SAS phy number of the attachment point.
    pub phy: u64,
    /// Raw slot number per the configured slot selector.
    pub slot: u64,
}

/// Resolves the canonical sysfs device path for a block device name.
///
/// Returns `None` when the device does not exist under `<sysfs_root>/block`,
/// which covers devices that disappeared between the udev event and now.
pub fn device_sys_path(sysfs_root: &Path, dev: &str) -> Option<PathBuf> {
    fs::canonicalize(sysfs_root.join("block").join(dev)).ok()
}

/// Walks a canonical sysfs device path and recovers the physical location.
///
/// See the module docs for the path structure. `phys_per_port` groups phy
/// numbers into ports; `sas_direct` expects the phy directory one segment
/// below `hostN`, `sas_switch` four segments below (past the expander).
pub fn walk(
    sys_path: &Path,
    topology: Topology,
    selector: SlotSelector,
    phys_per_port: u64,
) -> Option<ResolvedLocation> {
    if phys_per_port == 0 {
        return None;
    }
    let segments: Vec<&str> = sys_path.iter().filter_map(|s| s.to_str()).collect();

    let host_idx = segments.iter().position(|s| is_host_segment(s))?;
    if host_idx == 0 {
        return None;
    }

    // The PCI address segment is of the form 0000:85:00.0; drop the domain.
    let pci_fields: Vec<&str> = segments[host_idx - 1].split(':').collect();
    if pci_fields.len() < 3 {
        return None;
    }
    let pci_id = format!("{}:{}", pci_fields[1], pci_fields[2]);

    let phy_dir_idx = host_idx
        + match topology {
            Topology::SasDirect => 1,
            Topology::SasSwitch => 4,
        };
    if phy_dir_idx >= segments.len() {
        return None;
    }
    let phy_dir: PathBuf = segments[..=phy_dir_idx].iter().collect();

    let phy = first_phy_number(&phy_dir)?;
    let port = phy / phys_per_port;

    // The end device can sit at any depth past the phy directory.
    let end_idx = (phy_dir_idx..segments.len())
        .find(|&i| segments[i].starts_with("end_device"))?;
    let slot = raw_slot(&segments, end_idx, selector)?;

    Some(ResolvedLocation {
        pci_id,
        port,
        phy,
        slot,
    })
}

/// `hostN` with a non-empty numeric tail.
fn is_host_segment(segment: &str) -> bool {
    match segment.strip_prefix("host") {
        Some(tail) => !tail.is_empty() && tail.bytes().all(|b| b.is_ascii_digit()),
        None => false,
    }
}

/// Finds the lowest-named `phy*` entry in a directory and extracts its phy
/// number from the trailing colon-delimited field (`phy-1:5` -> 5).
fn first_phy_number(dir: &Path) -> Option<u64> {
    let mut names: Vec<String> = fs::read_dir(dir)
        .ok()?
        .filter_map(|e| e.ok())
        .filter_map(|e| e.file_name().into_string().ok())
        .filter(|name| name.starts_with("phy"))
        .collect();
    names.sort();
    let name = names.first()?;
    name.rsplit(':').next()?.parse().ok()
}

/// Extracts the raw slot number for the end device at `segments[end_idx]`.
fn raw_slot(segments: &[&str], end_idx: usize, selector: SlotSelector) -> Option<u64> {
    match selector {
        SlotSelector::Bay => read_sas_attribute(segments, end_idx, "bay_identifier"),
        SlotSelector::Phy => read_sas_attribute(segments, end_idx, "phy_identifier"),
        SlotSelector::Id => segment_slot(segments, end_idx + 1),
        SlotSelector::Lun => segment_slot(segments, end_idx + 2),
    }
}

/// Reads a numeric attribute from `<end device dir>/sas_device/<end device>/`.
fn read_sas_attribute(segments: &[&str], end_idx: usize, attribute: &str) -> Option<u64> {
    let mut path: PathBuf = segments[..=end_idx].iter().collect();
    path.push("sas_device");
    path.push(segments[end_idx]);
    path.push(attribute);
    let contents = fs::read_to_string(path).ok()?;
    contents.trim().parse().ok()
}

/// Takes a path segment like `1:0:0:5` and keeps the field after the last
/// colon.
fn segment_slot(segments: &[&str], idx: usize) -> Option<u64> {
    segments.get(idx)?.rsplit(':').next()?.parse().ok()
}
