//! Union, intersection and differences of two sets
//!
//! Operands of different families are compared in the unified space.
//! When the result holds no native IPv6 address it is returned as IPv4.

use std::collections::BTreeMap;

use crate::ipset::IpSet;

impl IpSet {
    /// Add every address of `other`.
    pub fn union(&mut self, other: &IpSet) {
        let mixed = self.is_v6() != other.is_v6();
        for (lo, hi) in other.spans() {
            self.merge_span(lo, hi);
        }
        self.settle_family(mixed, other);
    }

    /// Keep only addresses also present in `other`.
    pub fn intersect(&mut self, other: &IpSet) {
        let mixed = self.is_v6() != other.is_v6();
        let mut kept = BTreeMap::new();
        let mut theirs = other.spans().peekable();
        for (lo, hi) in self.spans() {
            while let Some(&(their_lo, their_hi)) = theirs.peek() {
                if their_hi < lo {
                    theirs.next();
                    continue;
                }
                if their_lo > hi {
                    break;
                }
                kept.insert(lo.max(their_lo), hi.min(their_hi));
                if their_hi > hi {
                    break;
                }
                theirs.next();
            }
        }
        self.replace_ranges(kept);
        self.settle_family(mixed, other);
    }

    /// Remove every address of `other`.
    pub fn difference(&mut self, other: &IpSet) {
        let mixed = self.is_v6() != other.is_v6();
        for (lo, hi) in other.spans() {
            self.remove_span(lo, hi);
        }
        self.settle_family(mixed, other);
    }

    /// Keep addresses present in exactly one of the two sets.
    pub fn symmetric_difference(&mut self, other: &IpSet) {
        let mut both = self.clone();
        both.intersect(other);
        let mut either = self.clone();
        either.union(other);
        either.difference(&both);
        either.clean();
        *self = either;
    }

    fn settle_family(&mut self, mixed: bool, other: &IpSet) {
        if mixed {
            self.v6 = self.contains_v6();
        } else {
            self.v6 = self.v6 || other.is_v6();
        }
    }
}

/// Union of two sets as a new set.
pub fn union(a: &IpSet, b: &IpSet) -> IpSet {
    let mut out = a.clone();
    out.union(b);
    out
}

/// Intersection of two sets as a new set.
pub fn intersect(a: &IpSet, b: &IpSet) -> IpSet {
    let mut out = a.clone();
    out.intersect(b);
    out
}

/// `a` without the addresses of `b`, as a new set.
pub fn difference(a: &IpSet, b: &IpSet) -> IpSet {
    let mut out = a.clone();
    out.difference(b);
    out
}

/// Addresses in exactly one of `a` and `b`, as a new set.
pub fn symmetric_difference(a: &IpSet, b: &IpSet) -> IpSet {
    let mut out = a.clone();
    out.symmetric_difference(b);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::IpAddr;

    fn set(items: &[&str]) -> IpSet {
        let mut s = IpSet::new_v4();
        for item in items {
            let net: ipnet::IpNet = item.parse().unwrap();
            s.insert_net(net).unwrap();
        }
        s
    }

    #[test]
    fn test_union_is_commutative() {
        let a = set(&["10.0.0.0/24", "10.0.2.0/24"]);
        let b = set(&["10.0.1.0/24", "192.168.0.1/32"]);
        assert_eq!(union(&a, &b), union(&b, &a));
        assert_eq!(union(&a, &b).count(), 256 * 3 + 1);
    }

    #[test]
    fn test_intersect_keeps_overlaps_only() {
        let a = set(&["10.0.0.0/23", "10.0.4.0/24"]);
        let b = set(&["10.0.1.128/25", "10.0.3.0/24", "10.0.4.10/32"]);
        let both = intersect(&a, &b);
        assert_eq!(both, set(&["10.0.1.128/25", "10.0.4.10/32"]));
    }

    #[test]
    fn test_intersect_with_one_large_range() {
        let a = set(&["10.0.0.1/32", "10.0.0.5/32", "10.0.0.9/32"]);
        let b = set(&["10.0.0.0/29"]);
        assert_eq!(intersect(&a, &b), set(&["10.0.0.1/32", "10.0.0.5/32"]));
        assert_eq!(intersect(&b, &a), set(&["10.0.0.1/32", "10.0.0.5/32"]));
    }

    #[test]
    fn test_difference_and_self_difference() {
        let a = set(&["10.0.0.0/24"]);
        let b = set(&["10.0.0.0/25"]);
        assert_eq!(difference(&a, &b), set(&["10.0.0.128/25"]));
        assert!(difference(&a, &a).is_empty());
    }

    #[test]
    fn test_symmetric_difference_identity() {
        let a = set(&["10.0.0.0/24", "172.16.0.0/30"]);
        let b = set(&["10.0.0.128/25", "192.168.0.0/24"]);
        let expected = difference(&union(&a, &b), &intersect(&a, &b));
        let got = symmetric_difference(&a, &b);
        assert_eq!(got, expected);
        assert!(got.is_clean());
        assert_eq!(got.count(), 128 + 4 + 256);
    }

    #[test]
    fn test_mixed_family_results_demote() {
        let v4 = set(&["10.0.0.0/24"]);
        let mut v6 = IpSet::new_v6();
        v6.insert_address("10.0.0.7".parse::<IpAddr>().unwrap()).unwrap();
        v6.insert_address("2001:db8::1".parse::<IpAddr>().unwrap()).unwrap();

        let both = intersect(&v4, &v6);
        assert!(!both.is_v6());
        assert_eq!(both.count(), 1);

        let all = union(&v4, &v6);
        assert!(all.is_v6());
        assert_eq!(all.count(), 257);

        let rest = difference(&v6, &v4);
        assert!(rest.is_v6());
        assert_eq!(rest.count(), 1);

        let mut native = IpSet::new_v6();
        native.insert_address("2001:db8::1".parse::<IpAddr>().unwrap()).unwrap();
        let mapped_only = difference(&v6, &native);
        assert!(mapped_only.is_v6());
        assert!(!mapped_only.contains_v6());
    }
}
