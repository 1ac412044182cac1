//! Resource quantity parsing (`"500m"` CPU, `"2Gi"` memory)

/// Parse a CPU quantity into millicores
pub fn parse_cpu_millis(value: &str) -> Result<u64, String> {
    let value = value.trim();
    if let Some(millis) = value.strip_suffix('m') {
        return millis
            .parse::<u64>()
            .map_err(|_| format!("invalid cpu quantity '{}'", value));
    }
    let cores: f64 = value
        .parse()
        .map_err(|_| format!("invalid cpu quantity '{}'", value))?;
    if !cores.is_finite() || cores < 0.0 {
        return Err(format!("invalid cpu quantity '{}'", value));
    }
    Ok((cores * 1000.0).round() as u64)
}

/// Parse a memory or storage quantity into bytes
pub fn parse_bytes(value: &str) -> Result<u64, String> {
    const SUFFIXES: [(&str, u64); 8] = [
        ("Ki", 1 << 10),
        ("Mi", 1 << 20),
        ("Gi", 1 << 30),
        ("Ti", 1 << 40),
        ("k", 1_000),
        ("M", 1_000_000),
        ("G", 1_000_000_000),
        ("T", 1_000_000_000_000),
    ];

    let value = value.trim();
    let (digits, multiplier) = SUFFIXES
        .iter()
        .find_map(|(suffix, mult)| value.strip_suffix(suffix).map(|d| (d, *mult)))
        .unwrap_or((value, 1));

    let amount: u64 = digits
        .parse()
        .map_err(|_| format!("invalid quantity '{}'", value))?;
    amount
        .checked_mul(multiplier)
        .ok_or_else(|| format!("quantity '{}' is out of range", value))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cpu() {
        assert_eq!(parse_cpu_millis("500m").unwrap(), 500);
        assert_eq!(parse_cpu_millis("2").unwrap(), 2000);
        assert_eq!(parse_cpu_millis("0.25").unwrap(), 250);
        assert!(parse_cpu_millis("two").is_err());
        assert!(parse_cpu_millis("-1").is_err());
    }

    #[test]
    fn test_bytes() {
        assert_eq!(parse_bytes("512Mi").unwrap(), 512 * 1024 * 1024);
        assert_eq!(parse_bytes("2Gi").unwrap(), 2 * 1024 * 1024 * 1024);
        assert_eq!(parse_bytes("1G").unwrap(), 1_000_000_000);
        assert_eq!(parse_bytes("4096").unwrap(), 4096);
        assert!(parse_bytes("lots").is_err());
        assert!(parse_bytes("99999999999Ti").is_err());
    }
}
