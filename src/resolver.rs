//! The resolution pipeline: alias lookup first, then topology walking with
//! channel and slot mapping.

use std::path::PathBuf;

use crate::alias::resolve_alias;
use crate::config::{
    ConfigTable, Topology, DEFAULT_PHYS_PER_PORT, DEFAULT_TOPOLOGY,
};
use crate::multipath::{resolve_component, MultipathCommand, MultipathStatus};
use crate::topology::{device_sys_path, walk};
use crate::VdevIdError;

const DEFAULT_SYSFS_ROOT: &str = "/sys";
const DEFAULT_DEVMAPPER_ROOT: &str = "/dev/mapper";

/// Everything known about the device being resolved.
///
/// One immutable bundle per invocation: the device name from the command
/// line, the attributes udev already computed for the event, and any
/// command-line overrides. Overrides take precedence over config-file values.
#[derive(Debug, Clone, Default)]
pub struct DeviceContext {
    /// Kernel device base name, e.g. `sda` or `dm-3`.
    pub device: String,
    /// Device-mapper map name, when udev supplies `DM_NAME`.
    pub dm_name: Option<String>,
    /// udev `DEVTYPE`, normally `disk` or `partition`.
    pub devtype: Option<String>,
    /// Device links udev has already produced for this device.
    pub devlinks: Vec<String>,
    /// Topology override; validated when used.
    pub topology: Option<String>,
    /// Phys-per-port override.
    pub phys_per_port: Option<u64>,
    /// Multipath-mode override.
    pub multipath: Option<bool>,
}

/// Maps a physical port to its configured channel name.
pub fn map_channel<'a>(
    table: &'a ConfigTable,
    topology: Topology,
    pci_id: &str,
    port: u64,
) -> Option<&'a str> {
    table.lookup_channel(topology, pci_id, port)
}

/// Maps a kernel-reported slot number to its physical bay number.
///
/// Remapping is strictly optional: without a matching rule the linux slot is
/// passed through unchanged, formatted base-10 with no leading zeros.
pub fn map_slot(table: &ConfigTable, linux_slot: u64, channel: &str) -> String {
    table
        .lookup_slot_remap(linux_slot, channel)
        .unwrap_or(linux_slot)
        .to_string()
}

/// Resolves devices to aliases against one configuration table.
///
/// The sysfs and device-mapper roots and the multipath status source are
/// injectable so the pipeline can run against synthetic trees in tests; the
/// defaults query the live system.
pub struct Resolver<'a> {
    table: &'a ConfigTable,
    sysfs_root: PathBuf,
    devmapper_root: PathBuf,
    multipath_status: Box<dyn MultipathStatus + 'a>,
}

impl<'a> Resolver<'a> {
    pub fn new(table: &'a ConfigTable) -> Self {
        Resolver {
            table,
            sysfs_root: PathBuf::from(DEFAULT_SYSFS_ROOT),
            devmapper_root: PathBuf::from(DEFAULT_DEVMAPPER_ROOT),
            multipath_status: Box::new(MultipathCommand),
        }
    }

    pub fn with_sysfs_root<P: Into<PathBuf>>(mut self, root: P) -> Self {
        self.sysfs_root = root.into();
        self
    }

    pub fn with_devmapper_root<P: Into<PathBuf>>(mut self, root: P) -> Self {
        self.devmapper_root = root.into();
        self
    }

    pub fn with_multipath_status<S: MultipathStatus + 'a>(mut self, source: S) -> Self {
        self.multipath_status = Box::new(source);
        self
    }

    /// Resolves a device to its alias.
    ///
    /// `Ok(None)` means the device has no mapping, which is the normal
    /// outcome for devices without SAS enclosure topology. The only `Err` is
    /// an unrecognized effective topology, a configuration error that must
    /// be reported rather than swallowed.
    pub fn resolve(&self, ctx: &DeviceContext) -> Result<Option<String>, VdevIdError> {
        if let Some(alias) = resolve_alias(ctx, self.table) {
            return Ok(Some(alias));
        }

        let topology_name = ctx
            .topology
            .as_deref()
            .or_else(|| self.table.topology())
            .unwrap_or(DEFAULT_TOPOLOGY);
        let topology = Topology::parse(topology_name)?;
        let phys_per_port = ctx
            .phys_per_port
            .or_else(|| self.table.phys_per_port())
            .unwrap_or(DEFAULT_PHYS_PER_PORT);
        let multipath_mode = ctx.multipath.unwrap_or_else(|| self.table.multipath_enabled());

        let (device, suffix) = if multipath_mode {
            match resolve_component(ctx, &self.devmapper_root, self.multipath_status.as_ref()) {
                Some(resolved) => resolved,
                None => return Ok(None),
            }
        } else {
            (ctx.device.clone(), String::new())
        };

        let sys_path = match device_sys_path(&self.sysfs_root, &device) {
            Some(path) => path,
            None => {
                log::debug!("no sysfs path for {}", device);
                return Ok(None);
            }
        };
        let location = match walk(&sys_path, topology, self.table.slot_selector(), phys_per_port) {
            Some(location) => location,
            None => {
                log::debug!("{} has no SAS enclosure topology", device);
                return Ok(None);
            }
        };

        // A slot without a resolvable channel name is useless.
        let channel = match map_channel(self.table, topology, &location.pci_id, location.port) {
            Some(channel) => channel,
            None => {
                log::debug!(
                    "no channel configured for pci {} port {}",
                    location.pci_id,
                    location.port
                );
                return Ok(None);
            }
        };
        let slot = map_slot(self.table, location.slot, channel);

        Ok(Some(format!("{}{}{}", channel, slot, suffix)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_map_slot_default_passthrough() {
        let table = ConfigTable::parse("").unwrap();
        assert_eq!(map_slot(&table, 7, "A"), "7");
        assert_eq!(map_slot(&table, 0, "A"), "0");
    }

    #[test]
    fn test_map_slot_remap() {
        let table = ConfigTable::parse("slot 1 4\nslot 1 7 A\n").unwrap();
        assert_eq!(map_slot(&table, 1, "A"), "7");
        assert_eq!(map_slot(&table, 1, "B"), "4");
        assert_eq!(map_slot(&table, 3, "A"), "3");
    }

    #[test]
    fn test_unknown_topology_is_fatal() {
        let table = ConfigTable::parse("").unwrap();
        let resolver = Resolver::new(&table);
        let ctx = DeviceContext {
            device: "sda".to_string(),
            topology: Some("foo".to_string()),
            ..Default::default()
        };
        assert!(matches!(
            resolver.resolve(&ctx),
            Err(VdevIdError::UnknownTopology(v)) if v == "foo"
        ));
    }

    #[test]
    fn test_unknown_config_topology_is_fatal() {
        let table = ConfigTable::parse("topology sas_banana\n").unwrap();
        let resolver = Resolver::new(&table);
        let ctx = DeviceContext {
            device: "sda".to_string(),
            ..Default::default()
        };
        assert!(resolver.resolve(&ctx).is_err());
    }

    #[test]
    fn test_override_beats_config_topology() {
        // The config names a bad topology, but the override is valid and a
        // missing sysfs tree is a silent miss, not an error.
        let table = ConfigTable::parse("topology sas_banana\n").unwrap();
        let resolver = Resolver::new(&table).with_sysfs_root("/nonexistent");
        let ctx = DeviceContext {
            device: "sda".to_string(),
            topology: Some("sas_direct".to_string()),
            ..Default::default()
        };
        assert_eq!(resolver.resolve(&ctx).unwrap(), None);
    }

    #[test]
    fn test_alias_short_circuits_topology_validation() {
        // A matching alias must win before the (bad) topology is examined.
        let table = ConfigTable::parse(
            "topology sas_banana\n\
             alias d1 wwn-0x5000\n",
        )
        .unwrap();
        let resolver = Resolver::new(&table);
        let ctx = DeviceContext {
            device: "sda".to_string(),
            devlinks: vec!["/dev/disk/by-id/wwn-0x5000".to_string()],
            ..Default::default()
        };
        assert_eq!(resolver.resolve(&ctx).unwrap(), Some("d1".to_string()));
    }

    #[test]
    fn test_unmapped_device_is_a_silent_miss() {
        let table = ConfigTable::parse("channel 85:00.0 1 A\n").unwrap();
        let resolver = Resolver::new(&table).with_sysfs_root("/nonexistent");
        let ctx = DeviceContext {
            device: "sda".to_string(),
            ..Default::default()
        };
        assert_eq!(resolver.resolve(&ctx).unwrap(), None);
    }
}
