//! Kubernetes resource quantity parsing
//!
//! Quantities are normalised to nano-units first so decimal suffixes,
//! binary suffixes, fractions and exponents share one code path. Results
//! round up, matching how the API server treats sub-unit remainders.

use super::ClusterError;

const NANOS_PER_MILLI: u128 = 1_000_000;
const NANOS_PER_UNIT: u128 = 1_000_000_000;

/// Parse a cpu quantity (`"2"`, `"500m"`, `"0.25"`) into millicores
pub fn parse_cpu_millis(quantity: &str) -> Result<u64, ClusterError> {
    let nanos = parse_nanos(quantity)?;
    to_u64(ceil_div(nanos, NANOS_PER_MILLI), quantity)
}

/// Parse a memory quantity (`"512Mi"`, `"1G"`, `"129e6"`) into bytes
pub fn parse_bytes(quantity: &str) -> Result<u64, ClusterError> {
    let nanos = parse_nanos(quantity)?;
    to_u64(ceil_div(nanos, NANOS_PER_UNIT), quantity)
}

fn invalid(quantity: &str) -> ClusterError {
    ClusterError::InvalidQuantity(quantity.to_string())
}

fn to_u64(value: u128, quantity: &str) -> Result<u64, ClusterError> {
    u64::try_from(value).map_err(|_| invalid(quantity))
}

fn ceil_div(value: u128, divisor: u128) -> u128 {
    value / divisor + u128::from(value % divisor != 0)
}

/// Multiplier of a suffix as `factor * 10^exponent` nano-units
fn suffix_multiplier(suffix: &str) -> Option<(u128, i32)> {
    let binary = |power: u32| Some((1024u128.pow(power), 9));

    match suffix {
        "" => Some((1, 9)),
        "n" => Some((1, 0)),
        "u" => Some((1, 3)),
        "m" => Some((1, 6)),
        "k" => Some((1, 12)),
        "M" => Some((1, 15)),
        "G" => Some((1, 18)),
        "T" => Some((1, 21)),
        "P" => Some((1, 24)),
        "E" => Some((1, 27)),
        "Ki" => binary(1),
        "Mi" => binary(2),
        "Gi" => binary(3),
        "Ti" => binary(4),
        "Pi" => binary(5),
        "Ei" => binary(6),
        _ => {
            // Decimal exponent, e.g. "e6" or "E-3"
            let exponent = suffix
                .strip_prefix('e')
                .or_else(|| suffix.strip_prefix('E'))?
                .parse::<i32>()
                .ok()?;
            Some((1, 9 + exponent))
        }
    }
}

fn parse_nanos(quantity: &str) -> Result<u128, ClusterError> {
    let trimmed = quantity.trim();
    let unsigned = trimmed.strip_prefix('+').unwrap_or(trimmed);

    let number_end = unsigned
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(unsigned.len());
    let (number, suffix) = unsigned.split_at(number_end);

    let (whole, fraction) = number.split_once('.').unwrap_or((number, ""));
    if whole.is_empty() && fraction.is_empty() {
        return Err(invalid(quantity));
    }
    if fraction.contains('.') {
        return Err(invalid(quantity));
    }

    let digits = format!("{}{}", whole, fraction);
    let mantissa: u128 = digits.parse().map_err(|_| invalid(quantity))?;
    let (factor, exponent) = suffix_multiplier(suffix).ok_or_else(|| invalid(quantity))?;

    let scaled = mantissa.checked_mul(factor).ok_or_else(|| invalid(quantity))?;
    let power = exponent - fraction.len() as i32;

    if power >= 0 {
        let multiplier = 10u128
            .checked_pow(power as u32)
            .ok_or_else(|| invalid(quantity))?;
        scaled.checked_mul(multiplier).ok_or_else(|| invalid(quantity))
    } else {
        let divisor = 10u128
            .checked_pow(power.unsigned_abs())
            .ok_or_else(|| invalid(quantity))?;
        Ok(ceil_div(scaled, divisor))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cpu_quantities() {
        assert_eq!(parse_cpu_millis("8").unwrap(), 8000);
        assert_eq!(parse_cpu_millis("3600m").unwrap(), 3600);
        assert_eq!(parse_cpu_millis("0.5").unwrap(), 500);
        assert_eq!(parse_cpu_millis("1.25").unwrap(), 1250);
        assert_eq!(parse_cpu_millis("250000u").unwrap(), 250);
    }

    #[test]
    fn test_cpu_rounds_up() {
        assert_eq!(parse_cpu_millis("100n").unwrap(), 1);
        assert_eq!(parse_cpu_millis("0.0001").unwrap(), 1);
    }

    #[test]
    fn test_memory_binary_suffixes() {
        assert_eq!(parse_bytes("16Gi").unwrap(), 16 * 1024 * 1024 * 1024);
        assert_eq!(parse_bytes("13172Mi").unwrap(), 13172 * 1024 * 1024);
        assert_eq!(parse_bytes("512Ki").unwrap(), 512 * 1024);
        assert_eq!(parse_bytes("1.5Gi").unwrap(), 1536 * 1024 * 1024);
    }

    #[test]
    fn test_memory_decimal_suffixes_and_exponents() {
        assert_eq!(parse_bytes("1G").unwrap(), 1_000_000_000);
        assert_eq!(parse_bytes("500M").unwrap(), 500_000_000);
        assert_eq!(parse_bytes("128974848").unwrap(), 128_974_848);
        assert_eq!(parse_bytes("129e6").unwrap(), 129_000_000);
        assert_eq!(parse_bytes("129E6").unwrap(), 129_000_000);
    }

    #[test]
    fn test_invalid_quantities() {
        for bad in ["", "abc", "12Xi", "1.2.3", "-5", ".", "5 Mi"] {
            assert!(parse_bytes(bad).is_err(), "{:?} should not parse", bad);
        }
    }
}
