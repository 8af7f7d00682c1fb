//! Substitution of multipath maps with a running component disk.
//!
//! A device-mapper multipath map has no SAS topology of its own; its
//! physical location is that of any of its component paths. When multipath
//! mode is active the resolver swaps the map for its first running component
//! before walking sysfs.

use std::fs;
use std::io;
use std::path::Path;
use std::process::Command;

use crate::alias::{dm_partition_suffix, split_dm_partition};
use crate::resolver::DeviceContext;

/// Data source for multipath path-status listings.
///
/// The production implementation shells out to `multipath -ll`; tests supply
/// canned output instead.
pub trait MultipathStatus {
    /// Returns the raw path-status listing for a multipath map.
    fn status(&self, map_name: &str) -> io::Result<String>;
}

/// Queries path status by invoking the `multipath` tool.
#[derive(Debug, Default)]
pub struct MultipathCommand;

impl MultipathStatus for MultipathCommand {
    fn status(&self, map_name: &str) -> io::Result<String> {
        let output = Command::new("multipath").arg("-ll").arg(map_name).output()?;
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// Resolves a multipath map to `(component_device, partition_suffix)`.
///
/// The map name comes from the caller-supplied attribute or, failing that, a
/// reverse lookup of the device-mapper symlink directory. The partition tail
/// is stripped before querying path status so the top-level map is queried,
/// and carried forward as a `-part<N>` suffix. Any missing piece means no
/// alias can be derived and yields `None`.
pub(crate) fn resolve_component(
    ctx: &DeviceContext,
    devmapper_root: &Path,
    source: &dyn MultipathStatus,
) -> Option<(String, String)> {
    let dm_name = match &ctx.dm_name {
        Some(name) => name.clone(),
        None => lookup_dm_name(devmapper_root, &ctx.device)?,
    };

    let suffix = dm_partition_suffix(&dm_name, ctx.devtype.as_deref()).unwrap_or_default();
    let map_name = match split_dm_partition(&dm_name) {
        Some((stem, _)) => stem,
        None => dm_name.as_str(),
    };
    if map_name.is_empty() {
        return None;
    }

    let listing = match source.status(map_name) {
        Ok(listing) => listing,
        Err(e) => {
            log::warn!("multipath status query for {} failed: {}", map_name, e);
            return None;
        }
    };
    let component = first_running_component(&listing)?;
    log::debug!("multipath map {} resolved to component {}", map_name, component);
    Some((component, suffix))
}

/// Reverse lookup: finds the map whose symlink in the device-mapper
/// directory points at the given `dm-N` device.
fn lookup_dm_name(devmapper_root: &Path, device: &str) -> Option<String> {
    let mut entries: Vec<_> = fs::read_dir(devmapper_root)
        .ok()?
        .filter_map(|e| e.ok())
        .collect();
    entries.sort_by_key(|e| e.file_name());
    for entry in entries {
        if let Ok(target) = fs::read_link(entry.path()) {
            if target.file_name().map(|n| n == device).unwrap_or(false) {
                return entry.file_name().into_string().ok();
            }
        }
    }
    None
}

/// Picks the device name of the first path reported as running.
///
/// Listing lines look like ``| `- 1:0:0:0 sda 8:0 active ready running``;
/// the tree-drawing prefix is stripped and the second remaining field is the
/// kernel device name.
fn first_running_component(listing: &str) -> Option<String> {
    for line in listing.lines() {
        if !line.contains("running") {
            continue;
        }
        let stripped =
            line.trim_start_matches(|c: char| c.is_whitespace() || "|`-+".contains(c));
        let mut fields = stripped.split_whitespace();
        let _address = fields.next()?;
        return fields.next().map(String::from);
    }
    None
}
