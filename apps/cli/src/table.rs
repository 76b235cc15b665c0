//! Partition table rendering for `--list`.

use std::fmt::Write;

use partdump_core::PartitionCatalog;

const TYPE_WIDTH: usize = 15;

pub fn format_partition_table(catalog: &PartitionCatalog) -> String {
    if catalog.is_empty() {
        return "No partitions found\n".to_string();
    }

    let mut out = String::new();
    // Writing to a String cannot fail.
    let _ = writeln!(out, "Available partitions:");
    let _ = writeln!(out, "{:<20} {:<15} {:<12} SIZE (MB)", "NAME", "TYPE", "SIZE");
    let _ = writeln!(out, "{}", "-".repeat(60));

    for partition in catalog.iter() {
        let partition_type: String = partition
            .partition_type
            .as_deref()
            .unwrap_or("unknown")
            .chars()
            .take(TYPE_WIDTH)
            .collect();
        let _ = writeln!(
            out,
            "{:<20} {:<15} {:<12} {:.2}",
            partition.name,
            partition_type,
            partition.size.unwrap_or(0),
            partition.size_mib()
        );
    }
    out
}
