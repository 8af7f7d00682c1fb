//! Parsing and lookup of the vdev mapping configuration file.
//!
//! The file is a flat, whitespace-delimited table, one record per line. The
//! first token of each line selects the record kind (`topology`, `multipath`,
//! `phys_per_port`, `slot`, `channel`, `alias`); lines starting with `#` and
//! blank lines are comments. Unrecognized record kinds are ignored so that
//! old binaries tolerate newer configuration files.
//!
//! All lookups are pure functions over the parsed table and honor file order:
//! within each category the first matching record wins.

use std::fs;
use std::io;
use std::path::Path;

use crate::VdevIdError;

/// Default location of the mapping file.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/zfs/vdev_id.conf";

/// Default number of phys per HBA port when the file does not say otherwise.
pub const DEFAULT_PHYS_PER_PORT: u64 = 4;

/// Default topology when neither the caller nor the file specifies one.
pub const DEFAULT_TOPOLOGY: &str = "sas_direct";

/// How channel and port numbers are derived from the sysfs topology.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Topology {
    /// Disks attached directly to an HBA port.
    SasDirect,
    /// Disks attached through a SAS expander/switch.
    SasSwitch,
}

impl Topology {
    /// Parses a topology keyword.
    ///
    /// An unrecognized keyword is a fatal configuration error, never a silent
    /// miss: a deployment with a bad topology can never produce an alias.
    pub fn parse(name: &str) -> Result<Topology, VdevIdError> {
        match name {
            "sas_direct" => Ok(Topology::SasDirect),
            "sas_switch" => Ok(Topology::SasSwitch),
            other => Err(VdevIdError::UnknownTopology(other.to_string())),
        }
    }
}

/// Which sysfs attribute (or path segment) yields the raw slot number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SlotSelector {
    /// The `bay_identifier` attribute of the SAS end device.
    #[default]
    Bay,
    /// The `phy_identifier` attribute of the SAS end device.
    Phy,
    /// The SCSI target id, taken from the path segment after the end device.
    Id,
    /// The SCSI LUN, taken two path segments after the end device.
    Lun,
}

impl SlotSelector {
    fn parse(name: &str) -> Option<SlotSelector> {
        match name {
            "bay" => Some(SlotSelector::Bay),
            "phy" => Some(SlotSelector::Phy),
            "id" => Some(SlotSelector::Id),
            "lun" => Some(SlotSelector::Lun),
            _ => None,
        }
    }
}

/// A `channel` record, kept as raw tokens because its shape depends on the
/// topology in effect at lookup time: 3 tokens are the direct-attached form
/// `(pci_id, hba_port, name)`, 2 tokens the switched form `(switch_port, name)`.
#[derive(Debug)]
struct ChannelRule {
    tokens: Vec<String>,
}

/// A `slot` remap record: `(linux_slot, mapped_slot, optional channel)`.
/// A missing channel makes the rule a wildcard for any channel.
#[derive(Debug)]
struct SlotRule {
    linux_slot: u64,
    mapped_slot: u64,
    channel: Option<String>,
}

/// An `alias` record: a literal device-link to name mapping.
#[derive(Debug)]
struct AliasRule {
    name: String,
    link: String,
}

/// The parsed configuration table.
///
/// Built once per invocation by [`ConfigTable::load`]; all queries are
/// read-only lookups preserving the original file order.
#[derive(Debug, Default)]
pub struct ConfigTable {
    topology: Option<String>,
    multipath: Option<bool>,
    phys_per_port: Option<u64>,
    slot_selector: Option<SlotSelector>,
    channels: Vec<ChannelRule>,
    slots: Vec<SlotRule>,
    aliases: Vec<AliasRule>,
}

impl ConfigTable {
    /// Loads the configuration table from `path`.
    ///
    /// A missing file returns `Ok(None)`: alias resolution is simply not
    /// configured on this host, which is not an error. Any other I/O failure
    /// or a malformed `phys_per_port` value is fatal.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Option<ConfigTable>, VdevIdError> {
        let contents = match fs::read_to_string(path.as_ref()) {
            Ok(contents) => contents,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                log::debug!("no config file at {}", path.as_ref().display());
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };
        Self::parse(&contents).map(Some)
    }

    /// Parses configuration file contents.
    pub fn parse(contents: &str) -> Result<ConfigTable, VdevIdError> {
        let mut table = ConfigTable::default();

        for line in contents.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let tokens: Vec<&str> = line.split_whitespace().collect();
            match tokens.as_slice() {
                ["topology", value] => {
                    table.topology.get_or_insert_with(|| value.to_string());
                }
                ["multipath", value] => {
                    table.multipath.get_or_insert(*value == "yes");
                }
                ["phys_per_port", value] => {
                    let count: u64 = value
                        .parse()
                        .map_err(|_| VdevIdError::InvalidPhysPerPort(value.to_string()))?;
                    if count == 0 {
                        return Err(VdevIdError::InvalidPhysPerPort(value.to_string()));
                    }
                    table.phys_per_port.get_or_insert(count);
                }
                ["slot", selector] => match SlotSelector::parse(selector) {
                    Some(selector) => {
                        table.slot_selector.get_or_insert(selector);
                    }
                    None => log::warn!("ignoring unknown slot selector {:?}", selector),
                },
                ["slot", linux_slot, mapped_slot, rest @ ..] if rest.len() <= 1 => {
                    match (linux_slot.parse(), mapped_slot.parse()) {
                        (Ok(linux_slot), Ok(mapped_slot)) => table.slots.push(SlotRule {
                            linux_slot,
                            mapped_slot,
                            channel: rest.first().map(|s| s.to_string()),
                        }),
                        _ => log::warn!("ignoring non-numeric slot record: {}", line),
                    }
                }
                ["channel", rest @ ..] if rest.len() == 2 || rest.len() == 3 => {
                    table.channels.push(ChannelRule {
                        tokens: rest.iter().map(|s| s.to_string()).collect(),
                    });
                }
                ["alias", name, link] => {
                    table.aliases.push(AliasRule {
                        name: name.to_string(),
                        link: link.to_string(),
                    });
                }
                _ => log::debug!("ignoring unrecognized config record: {}", line),
            }
        }

        Ok(table)
    }

    /// The raw `topology` keyword from the file, if present. Validation is
    /// deferred until a topology is actually needed.
    pub fn topology(&self) -> Option<&str> {
        self.topology.as_deref()
    }

    /// Whether `multipath yes` is set.
    pub fn multipath_enabled(&self) -> bool {
        self.multipath.unwrap_or(false)
    }

    /// The configured phys-per-port count, if present.
    pub fn phys_per_port(&self) -> Option<u64> {
        self.phys_per_port
    }

    /// The configured slot selector, defaulting to [`SlotSelector::Bay`].
    pub fn slot_selector(&self) -> SlotSelector {
        self.slot_selector.unwrap_or_default()
    }

    /// Looks up the channel name for a physical port.
    ///
    /// Direct-attached topologies match 3-token rules on `(pci_id, port)`;
    /// switched topologies match 2-token rules on the switch port alone.
    /// The first rule in file order wins.
    pub fn lookup_channel(&self, topology: Topology, pci_id: &str, port: u64) -> Option<&str> {
        for rule in &self.channels {
            match (topology, rule.tokens.as_slice()) {
                (Topology::SasDirect, [rule_pci, rule_port, name])
                    if rule_pci == pci_id && rule_port.parse() == Ok(port) =>
                {
                    return Some(name.as_str());
                }
                (Topology::SasSwitch, [rule_port, name]) if rule_port.parse() == Ok(port) => {
                    return Some(name.as_str());
                }
                _ => {}
            }
        }
        None
    }

    /// Looks up a slot remap for `(linux_slot, channel)`.
    ///
    /// Channel-specific rules take precedence over wildcard rules; within
    /// each group the first rule in file order wins.
    pub fn lookup_slot_remap(&self, linux_slot: u64, channel: &str) -> Option<u64> {
        self.slots
            .iter()
            .find(|r| r.linux_slot == linux_slot && r.channel.as_deref() == Some(channel))
            .or_else(|| {
                self.slots
                    .iter()
                    .find(|r| r.linux_slot == linux_slot && r.channel.is_none())
            })
            .map(|r| r.mapped_slot)
    }

    /// Looks up a literal alias for a device-link name.
    pub fn lookup_alias(&self, link: &str) -> Option<&str> {
        self.aliases
            .iter()
            .find(|r| r.link == link)
            .map(|r| r.name.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_parse_basic_directives() {
        let table = ConfigTable::parse(
            "# comment\n\
             topology sas_switch\n\
             multipath yes\n\
             phys_per_port 8\n\
             slot phy\n",
        )
        .unwrap();
        assert_eq!(table.topology(), Some("sas_switch"));
        assert!(table.multipath_enabled());
        assert_eq!(table.phys_per_port(), Some(8));
        assert_eq!(table.slot_selector(), SlotSelector::Phy);
    }

    #[test]
    fn test_defaults_when_directives_absent() {
        let table = ConfigTable::parse("channel 85:00.0 1 A\n").unwrap();
        assert_eq!(table.topology(), None);
        assert!(!table.multipath_enabled());
        assert_eq!(table.phys_per_port(), None);
        assert_eq!(table.slot_selector(), SlotSelector::Bay);
    }

    #[test]
    fn test_first_singleton_occurrence_wins() {
        let table = ConfigTable::parse(
            "topology sas_direct\n\
             topology sas_switch\n\
             phys_per_port 2\n\
             phys_per_port 16\n",
        )
        .unwrap();
        assert_eq!(table.topology(), Some("sas_direct"));
        assert_eq!(table.phys_per_port(), Some(2));
    }

    #[test]
    fn test_non_numeric_phys_per_port_is_fatal() {
        let result = ConfigTable::parse("phys_per_port four\n");
        assert!(matches!(result, Err(VdevIdError::InvalidPhysPerPort(v)) if v == "four"));
    }

    #[test]
    fn test_zero_phys_per_port_is_fatal() {
        assert!(ConfigTable::parse("phys_per_port 0\n").is_err());
    }

    #[test]
    fn test_unknown_record_kinds_are_ignored() {
        let table = ConfigTable::parse(
            "enclosure_symlinks yes\n\
             channel 85:00.0 1 A\n",
        )
        .unwrap();
        assert_eq!(
            table.lookup_channel(Topology::SasDirect, "85:00.0", 1),
            Some("A")
        );
    }

    #[test]
    fn test_channel_first_match_wins_direct() {
        // Deliberately conflicting duplicates: file order must decide.
        let table = ConfigTable::parse(
            "channel 85:00.0 1 A\n\
             channel 85:00.0 1 Z\n",
        )
        .unwrap();
        assert_eq!(
            table.lookup_channel(Topology::SasDirect, "85:00.0", 1),
            Some("A")
        );
    }

    #[test]
    fn test_channel_first_match_wins_switch() {
        let table = ConfigTable::parse(
            "channel 2 B\n\
             channel 2 Y\n",
        )
        .unwrap();
        assert_eq!(table.lookup_channel(Topology::SasSwitch, "", 2), Some("B"));
    }

    #[test]
    fn test_channel_dispatch_by_topology() {
        // A switched lookup must match on port alone and ignore direct-form
        // rules; a direct lookup must require the (pci_id, port) pair.
        let table = ConfigTable::parse(
            "channel 85:00.0 1 A\n\
             channel 1 B\n",
        )
        .unwrap();
        assert_eq!(
            table.lookup_channel(Topology::SasDirect, "85:00.0", 1),
            Some("A")
        );
        assert_eq!(
            table.lookup_channel(Topology::SasSwitch, "85:00.0", 1),
            Some("B")
        );
        assert_eq!(table.lookup_channel(Topology::SasDirect, "86:00.0", 1), None);
    }

    #[test]
    fn test_slot_remap_exact_channel_beats_wildcard() {
        let table = ConfigTable::parse(
            "slot 1 4\n\
             slot 1 7 A\n",
        )
        .unwrap();
        assert_eq!(table.lookup_slot_remap(1, "A"), Some(7));
        assert_eq!(table.lookup_slot_remap(1, "B"), Some(4));
    }

    #[test]
    fn test_slot_remap_first_match_wins() {
        let table = ConfigTable::parse(
            "slot 2 10\n\
             slot 2 20\n",
        )
        .unwrap();
        assert_eq!(table.lookup_slot_remap(2, "A"), Some(10));
    }

    #[test]
    fn test_slot_remap_miss() {
        let table = ConfigTable::parse("slot 1 4\n").unwrap();
        assert_eq!(table.lookup_slot_remap(9, "A"), None);
    }

    #[test]
    fn test_slot_selector_and_remap_records_coexist() {
        let table = ConfigTable::parse(
            "slot bay\n\
             slot 0 1\n",
        )
        .unwrap();
        assert_eq!(table.slot_selector(), SlotSelector::Bay);
        assert_eq!(table.lookup_slot_remap(0, "A"), Some(1));
    }

    #[test]
    fn test_alias_lookup() {
        let table = ConfigTable::parse(
            "alias d1 /dev/disk/by-id/wwn-0x5000c5002de3b9ca\n\
             alias d2 wwn-0x5000c5002def789e\n",
        )
        .unwrap();
        assert_eq!(
            table.lookup_alias("/dev/disk/by-id/wwn-0x5000c5002de3b9ca"),
            Some("d1")
        );
        assert_eq!(table.lookup_alias("wwn-0x5000c5002def789e"), Some("d2"));
        assert_eq!(table.lookup_alias("wwn-0xdeadbeef"), None);
    }

    #[test]
    fn test_load_missing_file_is_not_an_error() {
        let result = ConfigTable::load("/nonexistent/vdev_id.conf").unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn test_load_existing_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "channel 85:00.0 1 A").unwrap();
        let table = ConfigTable::load(file.path()).unwrap().unwrap();
        assert_eq!(
            table.lookup_channel(Topology::SasDirect, "85:00.0", 1),
            Some("A")
        );
    }

    #[test]
    fn test_topology_parse() {
        assert_eq!(Topology::parse("sas_direct").unwrap(), Topology::SasDirect);
        assert_eq!(Topology::parse("sas_switch").unwrap(), Topology::SasSwitch);
        assert!(matches!(
            Topology::parse("foo"),
            Err(VdevIdError::UnknownTopology(v)) if v == "foo"
        ));
    }
}
