pub const KB: u64 = 1024;
pub const MB: u64 = 1024 * KB;
pub const GB: u64 = 1024 * MB;

/// Parse a human-friendly byte size such as `512`, `64KB`, `512MiB` or `1.5G`.
///
/// Decimal and binary suffixes are both interpreted as powers of 1024.
pub fn parse_byte_size(input: &str) -> Result<u64, String> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err("empty byte size".to_owned());
    }

    let split = trimmed
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(trimmed.len());
    let (number, suffix) = trimmed.split_at(split);
    if number.is_empty() {
        return Err(format!("byte size `{trimmed}` has no numeric part"));
    }

    let multiplier = match suffix.trim().to_ascii_lowercase().as_str() {
        "" | "b" => 1,
        "k" | "kb" | "kib" => KB,
        "m" | "mb" | "mib" => MB,
        "g" | "gb" | "gib" => GB,
        "t" | "tb" | "tib" => GB * 1024,
        other => return Err(format!("unknown byte size suffix `{other}`")),
    };

    if let Ok(whole) = number.parse::<u64>() {
        return whole
            .checked_mul(multiplier)
            .ok_or_else(|| format!("byte size `{trimmed}` overflows u64"));
    }

    let value: f64 = number
        .parse()
        .map_err(|_| format!("invalid byte size `{trimmed}`"))?;
    let bytes = value * multiplier as f64;
    if !bytes.is_finite() || bytes < 0.0 || bytes > u64::MAX as f64 {
        return Err(format!("byte size `{trimmed}` is out of range"));
    }
    Ok(bytes.round() as u64)
}

/// Render a byte count with a binary unit, e.g. `1.50 GiB`.
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.2} {}", UNITS[unit])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_and_suffixed_sizes() {
        assert_eq!(parse_byte_size("512").unwrap(), 512);
        assert_eq!(parse_byte_size("64KB").unwrap(), 64 * KB);
        assert_eq!(parse_byte_size("512 MiB").unwrap(), 512 * MB);
        assert_eq!(parse_byte_size("2g").unwrap(), 2 * GB);
        assert_eq!(parse_byte_size("1.5GiB").unwrap(), GB + GB / 2);
    }

    #[test]
    fn rejects_garbage() {
        assert!(parse_byte_size("").is_err());
        assert!(parse_byte_size("MB").is_err());
        assert!(parse_byte_size("12 parsecs").is_err());
    }

    #[test]
    fn formats_with_binary_units() {
        assert_eq!(format_bytes(12), "12 B");
        assert_eq!(format_bytes(3 * MB / 2), "1.50 MiB");
    }
}
