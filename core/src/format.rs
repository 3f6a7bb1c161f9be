//! Formatting helpers shared by `Display` implementations and logs.

/// Formats the octets as upper-case hex pairs separated by colons, e.g. `04:A1:FF`.
pub fn format_bytes(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(":")
}

/// Formats a size in bytes as B, KB, MB or GB.
pub fn humanize_bytes(bytes: u64) -> String {
    const KB: u64 = 1 << 10;
    const MB: u64 = 1 << 20;
    const GB: u64 = 1 << 30;

    match bytes {
        b if b < KB => format!("{} B", b),
        b if b < MB => format!("{:.2} KB", b as f64 / KB as f64),
        b if b < GB => format!("{:.2} MB", b as f64 / MB as f64),
        b => format!("{:.2} GB", b as f64 / GB as f64),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_bytes() {
        assert_eq!("", format_bytes(&[]));
        assert_eq!("48:65:6C:6C:6F", format_bytes(b"Hello"));
    }

    #[test]
    fn test_humanize_bytes() {
        assert_eq!("144 B", humanize_bytes(144));
        assert_eq!("1.00 KB", humanize_bytes(1024));
        assert_eq!("1.50 MB", humanize_bytes(3 << 19));
    }
}
