//! # Address and Display Utilities
//!
//! Address validation and EIP-55 checksum canonicalization, plus small
//! helpers used when rendering cached rows.

use chrono::DateTime;
use sha3::{Digest, Keccak256};

use crate::error::{IamError, IamResult};

/// Keccak-256 digest
pub fn keccak256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Keccak256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Check whether a string is a 20-byte hex address
///
/// All-lowercase and all-uppercase forms are accepted as-is. Mixed case must
/// carry a correct EIP-55 checksum.
pub fn validate_address(address: &str) -> bool {
    to_checksum_address(address).is_ok()
}

/// Canonicalize an address to its EIP-55 checksummed form
pub fn to_checksum_address(address: &str) -> IamResult<String> {
    let hex_part = address
        .strip_prefix("0x")
        .or_else(|| address.strip_prefix("0X"))
        .ok_or_else(|| IamError::InvalidAddress(format!("'{address}' is missing the 0x prefix")))?;

    if hex_part.len() != 40 || !hex_part.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(IamError::InvalidAddress(format!(
            "'{address}' is not 20 hex-encoded bytes"
        )));
    }

    let lower = hex_part.to_ascii_lowercase();
    let hash = keccak256(lower.as_bytes());

    let checksummed: String = lower
        .chars()
        .enumerate()
        .map(|(i, c)| {
            let nibble = (hash[i / 2] >> (if i % 2 == 0 { 4 } else { 0 })) & 0x0f;
            if c.is_ascii_alphabetic() && nibble >= 8 {
                c.to_ascii_uppercase()
            } else {
                c
            }
        })
        .collect();

    let is_mixed_case = hex_part.bytes().any(|b| b.is_ascii_lowercase())
        && hex_part.bytes().any(|b| b.is_ascii_uppercase());
    if is_mixed_case && hex_part != checksummed {
        return Err(IamError::InvalidAddress(format!(
            "'{address}' has an invalid checksum"
        )));
    }

    Ok(format!("0x{checksummed}"))
}

/// Render a unix timestamp as `YYYY-MM-DD HH:MM:SS` (UTC)
pub fn format_timestamp(timestamp: i64) -> String {
    DateTime::from_timestamp(timestamp, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| timestamp.to_string())
}

/// Shorten an address or hash for table output, e.g. `0x123456...abcdef12`
pub fn truncate_address(address: &str, chars: usize) -> String {
    if address.len() <= chars * 2 || !address.is_ascii() {
        return address.to_string();
    }
    format!("{}...{}", &address[..chars], &address[address.len() - chars..])
}

/// Shorten free text to `max` characters, appending `...` when cut
pub fn truncate_text(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let cut: String = text.chars().take(max).collect();
    format!("{cut}...")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checksum_known_vectors() {
        for expected in [
            "0x5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed",
            "0xfB6916095ca1df60bB79Ce92cE3Ea74c37c5d359",
            "0xdbF03B407c01E7cD3CBea99509d93f8DDDC8C6FB",
            "0xD1220A0cf47c7B9Be7A2E6BA89F429762e7b9aDb",
        ] {
            let lower = expected.to_lowercase();
            assert_eq!(to_checksum_address(&lower).unwrap(), expected);
            assert_eq!(to_checksum_address(expected).unwrap(), expected);
        }
    }

    #[test]
    fn test_invalid_addresses() {
        assert!(!validate_address(""));
        assert!(!validate_address("0x123"));
        assert!(!validate_address("5aaeb6053f3e94c9b9a09f33669435e7ef1beaed"));
        assert!(!validate_address("0xZZaeb6053f3e94c9b9a09f33669435e7ef1beaed"));
        // Wrong checksum: first letter case flipped
        assert!(!validate_address("0x5AAeb6053F3E94C9b9A09f33669435E7Ef1BeAed"));
    }

    #[test]
    fn test_uppercase_address_accepted() {
        let upper = "0x5AAEB6053F3E94C9B9A09F33669435E7EF1BEAED";
        assert_eq!(
            to_checksum_address(upper).unwrap(),
            "0x5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed"
        );
    }

    #[test]
    fn test_format_timestamp() {
        assert_eq!(format_timestamp(0), "1970-01-01 00:00:00");
        assert_eq!(format_timestamp(1_700_000_000), "2023-11-14 22:13:20");
    }

    #[test]
    fn test_truncate_address() {
        let addr = "0x5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed";
        assert_eq!(truncate_address(addr, 8), "0x5aAeb6...Ef1BeAed");
        assert_eq!(truncate_address("0xA", 8), "0xA");
    }

    #[test]
    fn test_truncate_text() {
        assert_eq!(truncate_text("short", 30), "short");
        assert_eq!(truncate_text("abcdefghij", 4), "abcd...");
    }
}
