//! EAN-13 / GTIN handling.

/// Validate an EAN-13 check digit.
///
/// For digits `d0..d12`, weights alternate 1, 3 starting at `d0`; `d12` must
/// equal `(10 - sum mod 10) mod 10`.
pub fn is_valid_ean13(code: &str) -> bool {
    let bytes = code.as_bytes();
    if bytes.len() != 13 || !bytes.iter().all(u8::is_ascii_digit) {
        return false;
    }

    let sum: u32 = bytes[..12]
        .iter()
        .enumerate()
        .map(|(i, b)| {
            let digit = u32::from(b - b'0');
            if i % 2 == 0 { digit } else { digit * 3 }
        })
        .sum();

    let check = (10 - sum % 10) % 10;
    u32::from(bytes[12] - b'0') == check
}

/// Normalize a raw barcode to a validated GTIN-13.
///
/// Spaces and hyphens are stripped and 12-digit UPC-A codes are left-padded
/// with `0`. Anything that does not pass the checksum is `None`: the row is
/// treated as carrying no EAN rather than rejected.
pub fn normalize_ean(raw: &str) -> Option<String> {
    let digits: String = raw
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '-')
        .collect();

    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }

    let candidate = match digits.len() {
        12 => format!("0{}", digits),
        13 => digits,
        _ => return None,
    };

    is_valid_ean13(&candidate).then_some(candidate)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checksum_scenario() {
        assert!(is_valid_ean13("4006381333931"));
        assert!(!is_valid_ean13("4006381333930"));
    }

    #[test]
    fn rejects_wrong_length_and_non_digits() {
        assert!(!is_valid_ean13("400638133393"));
        assert!(!is_valid_ean13("40063813339310"));
        assert!(!is_valid_ean13("40063813339a1"));
    }

    #[test]
    fn normalizes_formatting_and_upc() {
        assert_eq!(
            normalize_ean(" 4006381-333931 ").as_deref(),
            Some("4006381333931")
        );
        // UPC-A 036000291452 -> GTIN-13 0036000291452
        assert_eq!(
            normalize_ean("036000291452").as_deref(),
            Some("0036000291452")
        );
        assert_eq!(normalize_ean("4006381333930"), None);
        assert_eq!(normalize_ean("4.00638E+12"), None);
        assert_eq!(normalize_ean(""), None);
    }
}
