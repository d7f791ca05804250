//! CLI command implementations.

pub mod check;
pub mod checksum;
pub mod config;
pub mod status;
pub mod update;

use console::style;
use dlcsync::Package;

/// Format a byte count for display.
pub fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} {}", bytes, UNITS[0])
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}

/// Print one line per package.
pub fn print_packages(packages: &[Package]) {
    for package in packages {
        println!(
            "  {} {} ({}, {} files)",
            style("+").green(),
            package.id,
            format_size(u64::from(package.size_bytes)),
            package.files.len()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(0), "0 B");
        assert_eq!(format_size(1023), "1023 B");
        assert_eq!(format_size(1536), "1.5 KB");
        assert_eq!(format_size(5 * 1024 * 1024), "5.0 MB");
    }
}
