//! Address Normalizer: canonicalize IPv4/IPv6 addresses so every other
//! component can compare IPs as plain strings.
//!
//! Without this, `::1` and `0000:0000:0000:0000:0000:0000:0000:0001` compare
//! unequal even though they name the same address, silently breaking every
//! string-keyed lookup downstream.

use std::net::Ipv6Addr;

/// Normalize an IPv6 address string into 8 colon-separated, zero-padded,
/// lowercase hex groups. IPv4 strings (containing `.`) pass through unchanged.
///
/// Strips a zone id (`%eth0`) before parsing, since zone ids are not part of
/// the address identity used for matching.
pub fn normalize_ipv6(s: &str) -> String {
    if s.contains('.') {
        return s.to_string();
    }

    let without_zone = match s.split_once('%') {
        Some((addr, _zone)) => addr,
        None => s,
    };

    match without_zone.parse::<Ipv6Addr>() {
        Ok(addr) => canonical_colon_hex(&addr),
        Err(_) => without_zone.to_string(),
    }
}

/// Render an `Ipv6Addr` as 8 lowercase, zero-padded hex groups (no `::`
/// compression), matching the canonical form every component compares by.
fn canonical_colon_hex(addr: &Ipv6Addr) -> String {
    let segments = addr.segments();
    segments
        .iter()
        .map(|seg| format!("{seg:04x}"))
        .collect::<Vec<_>>()
        .join(":")
}

/// Accept a captured 16-element byte-array form (`"192:168:0:1:0:0:0:0..."` —
/// decimal bytes separated by `:`, as some capture libraries emit raw IPv6
/// payload bytes) and emit the canonical colon-hex form. Falls back to
/// `normalize_ipv6` when the input is already colon-hex (the common case for
/// captured packets, since the decoder builds the string from parsed octets).
pub fn format_ipv6_from_captured(raw: &str) -> String {
    let parts: Vec<&str> = raw.split(':').collect();
    if parts.len() == 16 && parts.iter().all(|p| p.parse::<u8>().is_ok()) {
        let mut bytes = [0u8; 16];
        for (i, p) in parts.iter().enumerate() {
            bytes[i] = p.parse::<u8>().unwrap();
        }
        return canonical_colon_hex(&Ipv6Addr::from(bytes));
    }
    normalize_ipv6(raw)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ipv4_passes_through_unchanged() {
        assert_eq!(normalize_ipv6("192.168.1.10"), "192.168.1.10");
    }

    #[test]
    fn test_loopback_expands_to_full_groups() {
        assert_eq!(
            normalize_ipv6("::1"),
            "0000:0000:0000:0000:0000:0000:0000:0001"
        );
    }

    #[test]
    fn test_strips_zone_id() {
        assert_eq!(
            normalize_ipv6("fe80::1%eth0"),
            "fe80:0000:0000:0000:0000:0000:0000:0001"
        );
    }

    #[test]
    fn test_already_expanded_form_is_idempotent() {
        let expanded = "2001:0db8:0000:0000:0000:0000:0000:0001";
        assert_eq!(normalize_ipv6(expanded), normalize_ipv6(&normalize_ipv6(expanded)));
    }

    #[test]
    fn test_compressed_and_expanded_forms_match() {
        assert_eq!(
            normalize_ipv6("2001:db8::1"),
            normalize_ipv6("2001:0db8:0000:0000:0000:0000:0000:0001")
        );
    }

    #[test]
    fn test_normalize_ipv6_idempotence_law() {
        for input in ["::1", "2001:db8::1", "fe80::1%en0", "::", "ff02::1:ff00:0"] {
            let once = normalize_ipv6(input);
            let twice = normalize_ipv6(&once);
            assert_eq!(once, twice, "not idempotent for {input}");
        }
    }

    #[test]
    fn test_format_ipv6_from_captured_byte_array_form() {
        // ::1 as 16 decimal bytes.
        let raw = "0:0:0:0:0:0:0:0:0:0:0:0:0:0:0:1";
        assert_eq!(
            format_ipv6_from_captured(raw),
            "0000:0000:0000:0000:0000:0000:0000:0001"
        );
    }

    #[test]
    fn test_format_ipv6_from_captured_falls_back_to_colon_hex() {
        assert_eq!(
            format_ipv6_from_captured("2001:db8::1"),
            normalize_ipv6("2001:db8::1")
        );
    }
}
