//! Partition catalog built from `getvar:all` output.

use std::collections::BTreeMap;

use crate::protocol::{VAR_PARTITION_SIZE, VAR_PARTITION_TYPE};

/// What the device reported about one partition.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PartitionRecord {
    pub name: String,
    pub size: Option<u64>,
    pub partition_type: Option<String>,
}

impl PartitionRecord {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Size in MiB, 0 when unknown.
    pub fn size_mib(&self) -> f64 {
        self.size.unwrap_or(0) as f64 / (1024.0 * 1024.0)
    }
}

/// Partition name -> record, iterated in name order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PartitionCatalog {
    partitions: BTreeMap<String, PartitionRecord>,
}

impl PartitionCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one INFO payload. Returns whether it described a partition.
    ///
    /// Recognizes `partition-size:<name>:<hex>` and
    /// `partition-type:<name>:<type>`; anything else, or a size that does
    /// not parse, is ignored.
    pub fn absorb_info(&mut self, info: &str) -> bool {
        if let Some((name, value)) = split_variable(info, VAR_PARTITION_SIZE) {
            let Some(size) = parse_hex(value) else {
                return false;
            };
            self.entry(name).size = Some(size);
            true
        } else if let Some((name, value)) = split_variable(info, VAR_PARTITION_TYPE) {
            self.entry(name).partition_type = Some(value.to_string());
            true
        } else {
            false
        }
    }

    fn entry(&mut self, name: &str) -> &mut PartitionRecord {
        self.partitions
            .entry(name.to_string())
            .or_insert_with(|| PartitionRecord::new(name))
    }

    pub fn get(&self, name: &str) -> Option<&PartitionRecord> {
        self.partitions.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &PartitionRecord> {
        self.partitions.values()
    }

    pub fn len(&self) -> usize {
        self.partitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.partitions.is_empty()
    }
}

impl IntoIterator for PartitionCatalog {
    type Item = PartitionRecord;
    type IntoIter = std::collections::btree_map::IntoValues<String, PartitionRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.partitions.into_values()
    }
}

/// Split `<prefix><name>:<value>` at the first colon after the prefix.
fn split_variable<'a>(info: &'a str, prefix: &str) -> Option<(&'a str, &'a str)> {
    let rest = info.strip_prefix(prefix)?;
    let (name, value) = rest.split_once(':')?;
    Some((name, value.trim()))
}

/// Parse a device-reported hex number (`200`, `0x200`, ` 0x00000200`).
pub fn parse_hex(text: &str) -> Option<u64> {
    let text = text.trim();
    let digits = text
        .strip_prefix("0x")
        .or_else(|| text.strip_prefix("0X"))
        .unwrap_or(text);
    u64::from_str_radix(digits, 16).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_size_and_type_merge() {
        let mut catalog = PartitionCatalog::new();
        assert!(catalog.absorb_info("partition-size:boot:200"));
        assert!(catalog.absorb_info("partition-type:boot:ext4"));

        let boot = catalog.get("boot").unwrap();
        assert_eq!(boot.size, Some(0x200));
        assert_eq!(boot.partition_type.as_deref(), Some("ext4"));
        assert_eq!(catalog.len(), 1);
    }

    #[test]
    fn test_spaced_values() {
        let mut catalog = PartitionCatalog::new();
        catalog.absorb_info("partition-size:userdata: 0x00000000DA000000");
        catalog.absorb_info("partition-type:userdata: f2fs");

        let userdata = catalog.get("userdata").unwrap();
        assert_eq!(userdata.size, Some(0xDA00_0000));
        assert_eq!(userdata.partition_type.as_deref(), Some("f2fs"));
    }

    #[test]
    fn test_unrecognized_and_bad_numbers_skipped() {
        let mut catalog = PartitionCatalog::new();
        assert!(!catalog.absorb_info("version-bootloader:1.0"));
        assert!(!catalog.absorb_info("partition-size:cache:zz"));
        assert!(!catalog.absorb_info("partition-size:nocolon"));
        assert!(catalog.is_empty());
    }

    #[test]
    fn test_iteration_sorted_by_name() {
        let mut catalog = PartitionCatalog::new();
        catalog.absorb_info("partition-size:system:1000");
        catalog.absorb_info("partition-size:boot:10");
        catalog.absorb_info("partition-type:recovery:raw");

        let names: Vec<_> = catalog.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, ["boot", "recovery", "system"]);
        assert_eq!(catalog.get("recovery").unwrap().size, None);
    }

    #[test]
    fn test_parse_hex() {
        assert_eq!(parse_hex("200"), Some(0x200));
        assert_eq!(parse_hex(" 0x1000 "), Some(0x1000));
        assert_eq!(parse_hex("0XfF"), Some(0xFF));
        assert_eq!(parse_hex(""), None);
        assert_eq!(parse_hex("size"), None);
    }

    #[test]
    fn test_size_mib() {
        let mut record = PartitionRecord::new("boot");
        assert_eq!(record.size_mib(), 0.0);
        record.size = Some(0x0300_0000);
        assert_eq!(record.size_mib(), 48.0);
    }
}
