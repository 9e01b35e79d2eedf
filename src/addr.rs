//! IPv4/IPv6 address helpers
//!
//! Both engines compare addresses as 128-bit integers. IPv4 addresses
//! occupy the `::ffff:0:0/96` range of that space; converting between
//! the two families is always explicit.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

/// Base of the IPv4-mapped IPv6 range, `::ffff:0:0`.
pub const V4_MAPPED_BASE: u128 = 0xffff_0000_0000;

/// Last address of the IPv4-mapped IPv6 range, `::ffff:255.255.255.255`.
pub const V4_MAPPED_LAST: u128 = V4_MAPPED_BASE | 0xffff_ffff;

/// Position of an address in the unified 128-bit space.
pub fn to_u128(ip: IpAddr) -> u128 {
    match ip {
        IpAddr::V4(v4) => V4_MAPPED_BASE | u128::from(u32::from(v4)),
        IpAddr::V6(v6) => u128::from(v6),
    }
}

/// Whether a position in the unified space is an IPv4-mapped address.
pub fn is_v4_mapped(value: u128) -> bool {
    (V4_MAPPED_BASE..=V4_MAPPED_LAST).contains(&value)
}

/// Convert a position back to an address. When `as_v6` is false the
/// position must lie in the mapped range.
pub fn from_u128(value: u128, as_v6: bool) -> Option<IpAddr> {
    if as_v6 {
        Some(IpAddr::V6(Ipv6Addr::from(value)))
    } else if is_v4_mapped(value) {
        Some(IpAddr::V4(Ipv4Addr::from(value as u32)))
    } else {
        None
    }
}

/// Return the address as IPv4 when it is IPv4 or IPv4-mapped IPv6.
pub fn as_v4(ip: IpAddr) -> Option<Ipv4Addr> {
    match ip {
        IpAddr::V4(v4) => Some(v4),
        IpAddr::V6(v6) => {
            let value = u128::from(v6);
            is_v4_mapped(value).then(|| Ipv4Addr::from(value as u32))
        }
    }
}

/// Return the address in IPv6 form, mapping IPv4 into `::ffff:0:0/96`.
pub fn as_v6(ip: IpAddr) -> Ipv6Addr {
    Ipv6Addr::from(to_u128(ip))
}

/// Numeric comparison of two addresses after widening to 128 bits.
pub fn compare(a: IpAddr, b: IpAddr) -> std::cmp::Ordering {
    to_u128(a).cmp(&to_u128(b))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_v4_maps_into_ffff_range() {
        let ip: IpAddr = "10.1.2.3".parse().unwrap();
        let mapped: IpAddr = "::ffff:10.1.2.3".parse().unwrap();
        assert_eq!(to_u128(ip), to_u128(mapped));
        assert!(is_v4_mapped(to_u128(ip)));
        assert_eq!(from_u128(to_u128(ip), false), Some(ip));
    }

    #[test]
    fn test_as_v4_rejects_native_v6() {
        let ip: IpAddr = "2001:db8::1".parse().unwrap();
        assert_eq!(as_v4(ip), None);
        assert_eq!(from_u128(to_u128(ip), false), None);
    }

    #[test]
    fn test_compare_is_numeric() {
        let a: IpAddr = "10.0.0.1".parse().unwrap();
        let b: IpAddr = "10.0.0.2".parse().unwrap();
        let c: IpAddr = "2001:db8::1".parse().unwrap();
        assert!(compare(a, b).is_lt());
        assert!(compare(b, c).is_lt());
    }
}
