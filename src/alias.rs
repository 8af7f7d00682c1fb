//! Literal alias resolution from configured device-link mappings.

use std::path::Path;

use crate::config::ConfigTable;
use crate::resolver::DeviceContext;

/// Splits a device-mapper name carrying a partition suffix (`p` followed by
/// digits) into its stem and partition number.
///
/// The pattern is intentionally loose: a whole-disk map whose name happens to
/// end in `p<digits>` is indistinguishable from a partition, and that
/// ambiguity is inherited from the configuration format rather than resolved
/// here.
pub(crate) fn split_dm_partition(name: &str) -> Option<(&str, &str)> {
    let stem = name.trim_end_matches(|c: char| c.is_ascii_digit());
    if stem.len() == name.len() {
        return None;
    }
    let part = &name[stem.len()..];
    let stem = stem.strip_suffix('p')?;
    Some((stem, part))
}

/// Synthesizes the `-part<N>` suffix for a device-mapper device.
///
/// Device-mapper partitions report `DEVTYPE=disk`, so the suffix must be
/// recovered from the map name itself; a device whose type already is
/// `partition` gets correct suffixing from udev's own link generation and
/// needs nothing from us.
pub(crate) fn dm_partition_suffix(dm_name: &str, devtype: Option<&str>) -> Option<String> {
    if devtype == Some("partition") {
        return None;
    }
    split_dm_partition(dm_name).map(|(_, part)| format!("-part{}", part))
}

/// Checks whether the device has a literal alias configured.
///
/// Each device link udev has already produced for the device is tried in
/// order, first in its fully qualified form and then by base name; the first
/// alias record that matches wins. For a device-mapper partition the
/// partition tail is stripped from each link before matching so that the
/// top-level map's alias applies, and the synthesized `-part<N>` suffix is
/// appended to the result.
pub(crate) fn resolve_alias(ctx: &DeviceContext, table: &ConfigTable) -> Option<String> {
    let dm_part = ctx
        .dm_name
        .as_deref()
        .and_then(|name| dm_partition_suffix(name, ctx.devtype.as_deref()));

    for link in &ctx.devlinks {
        let link = match &dm_part {
            Some(_) => strip_partition_tail(link),
            None => link.as_str(),
        };
        let base = Path::new(link).file_name().and_then(|n| n.to_str());
        for candidate in std::iter::once(link).chain(base) {
            if let Some(alias) = table.lookup_alias(candidate) {
                log::debug!("device link {} matched alias {}", candidate, alias);
                let mut result = alias.to_string();
                if let Some(part) = &dm_part {
                    result.push_str(part);
                }
                return Some(result);
            }
        }
    }
    None
}

/// Removes a trailing `p<digits>` partition tail from a device link so the
/// top-level map name is matched against the alias table.
fn strip_partition_tail(link: &str) -> &str {
    match split_dm_partition(link) {
        Some((stem, _)) => stem,
        None => link,
    }
}
