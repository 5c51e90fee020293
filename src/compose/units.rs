//! Parsers for the duration, byte-size and CPU strings compose files use.
//!
//! All arithmetic is fixed-point on integers so `1.5g` or `0.25` CPUs come
//! out exact.

const NANOS_PER_SECOND: u128 = 1_000_000_000;
const KIB: u128 = 1024;

/// Parse a Go-style duration (`1m30s`, `500ms`, `1.5h`) into nanoseconds.
///
/// A bare `0` is accepted; any other value needs a unit.
pub(crate) fn parse_duration_nanos(raw: &str) -> Result<i64, String> {
    let input = raw.trim();
    if input == "0" {
        return Ok(0);
    }
    if input.is_empty() {
        return Err(String::from("empty duration"));
    }

    let mut total: u128 = 0;
    let mut rest = input;
    while !rest.is_empty() {
        let number_len = rest
            .find(|c: char| !is_number_char(c))
            .ok_or_else(|| format!("missing unit in duration '{raw}'"))?;
        if number_len == 0 {
            return Err(format!("invalid duration '{raw}'"));
        }
        let (number, tail) = rest.split_at(number_len);
        let unit_len = tail.find(is_number_char).unwrap_or(tail.len());
        let (unit, remainder) = tail.split_at(unit_len);
        let scale = match unit {
            "ns" => 1,
            "us" | "µs" => 1_000,
            "ms" => 1_000_000,
            "s" => NANOS_PER_SECOND,
            "m" => 60 * NANOS_PER_SECOND,
            "h" => 3_600 * NANOS_PER_SECOND,
            _ => return Err(format!("unknown unit '{unit}' in duration '{raw}'")),
        };
        let part = scale_decimal(number, scale)
            .ok_or_else(|| format!("invalid number '{number}' in duration '{raw}'"))?;
        total = total
            .checked_add(part)
            .ok_or_else(|| format!("duration '{raw}' is out of range"))?;
        rest = remainder;
    }

    i64::try_from(total).map_err(|_| format!("duration '{raw}' is out of range"))
}

/// Parse a byte size (`512m`, `1g`, `1.5gb`, `1024`) into bytes, using
/// binary multiples as the engine does.
pub(crate) fn parse_bytes(raw: &str) -> Result<i64, String> {
    let input = raw.trim().to_ascii_lowercase();
    let split = input
        .find(|c: char| !is_number_char(c))
        .unwrap_or(input.len());
    let (number, unit) = input.split_at(split);
    let scale = match unit.trim() {
        "" | "b" => 1,
        "k" | "kb" | "kib" => KIB,
        "m" | "mb" | "mib" => KIB.pow(2),
        "g" | "gb" | "gib" => KIB.pow(3),
        "t" | "tb" | "tib" => KIB.pow(4),
        other => return Err(format!("unknown unit '{other}' in byte size '{raw}'")),
    };
    scale_decimal(number, scale)
        .and_then(|bytes| i64::try_from(bytes).ok())
        .ok_or_else(|| format!("invalid byte size '{raw}'"))
}

/// Parse a fractional CPU count (`0.5`, `2`) into nano-CPUs.
pub(crate) fn parse_nano_cpus(raw: &str) -> Result<i64, String> {
    scale_decimal(raw.trim(), NANOS_PER_SECOND)
        .and_then(|nanos| i64::try_from(nanos).ok())
        .ok_or_else(|| format!("invalid cpu count '{raw}'"))
}

fn is_number_char(c: char) -> bool {
    c.is_ascii_digit() || c == '.'
}

/// Multiply a non-negative decimal string by `scale`, truncating any
/// fraction below one unit.
fn scale_decimal(number: &str, scale: u128) -> Option<u128> {
    let (whole, fraction) = number.split_once('.').unwrap_or((number, ""));
    if whole.is_empty() && fraction.is_empty() {
        return None;
    }
    if !whole.chars().chain(fraction.chars()).all(|c| c.is_ascii_digit()) {
        return None;
    }

    let whole_value: u128 = if whole.is_empty() { 0 } else { whole.parse().ok()? };
    let scaled_whole = whole_value.checked_mul(scale)?;
    if fraction.is_empty() {
        return Some(scaled_whole);
    }

    let fraction_value: u128 = fraction.parse().ok()?;
    let denominator = 10_u128.checked_pow(u32::try_from(fraction.len()).ok()?)?;
    let scaled_fraction = fraction_value.checked_mul(scale)?.checked_div(denominator)?;
    scaled_whole.checked_add(scaled_fraction)
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case("30s", 30_000_000_000)]
    #[case("1m30s", 90_000_000_000)]
    #[case("500ms", 500_000_000)]
    #[case("1.5h", 5_400_000_000_000)]
    #[case("0", 0)]
    fn parses_durations(#[case] raw: &str, #[case] expected: i64) {
        assert_eq!(parse_duration_nanos(raw), Ok(expected));
    }

    #[rstest]
    #[case("")]
    #[case("10")]
    #[case("5d")]
    #[case("s")]
    #[case("1..5s")]
    fn rejects_bad_durations(#[case] raw: &str) {
        assert!(parse_duration_nanos(raw).is_err());
    }

    #[rstest]
    #[case("1024", 1024)]
    #[case("512m", 536_870_912)]
    #[case("1g", 1_073_741_824)]
    #[case("1.5GB", 1_610_612_736)]
    #[case("64k", 65_536)]
    fn parses_byte_sizes(#[case] raw: &str, #[case] expected: i64) {
        assert_eq!(parse_bytes(raw), Ok(expected));
    }

    #[rstest]
    #[case("0.5", 500_000_000)]
    #[case("2", 2_000_000_000)]
    #[case(".25", 250_000_000)]
    fn parses_cpus(#[case] raw: &str, #[case] expected: i64) {
        assert_eq!(parse_nano_cpus(raw), Ok(expected));
    }

    #[rstest]
    #[case("lots")]
    #[case("-1")]
    #[case(".")]
    fn rejects_garbage_cpus(#[case] raw: &str) {
        assert!(parse_nano_cpus(raw).is_err());
    }

    #[rstest]
    fn rejects_garbage_sizes() {
        assert!(parse_bytes("lots").is_err());
    }
}
