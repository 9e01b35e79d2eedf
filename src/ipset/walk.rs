//! Ordered iteration over a set as addresses or CIDR blocks

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use ipnet::{IpNet, Ipv4Net, Ipv6Net};
use serde::{Deserialize, Serialize};

use crate::addr::{V4_MAPPED_BASE, V4_MAPPED_LAST};
use crate::ipset::{IpSet, Spans};

/// How addresses are presented when walking a set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum V6Policy {
    /// Visit an IPv4 set as IPv4; an IPv6 set yields nothing.
    Ignore,
    /// Visit IPv4 and IPv4-mapped addresses as IPv4, skipping the rest.
    AsV4,
    /// Visit each set in its own family.
    #[default]
    Mix,
    /// Visit every address as IPv6, mapping IPv4 into `::ffff:0:0/96`.
    Force,
    /// Visit an IPv6 set as IPv6; an IPv4 set yields nothing.
    Only,
}

/// Maximal CIDR blocks (or single addresses) of a run of spans, as
/// `(base, prefix)` pairs in the unified 128-bit space.
pub struct Blocks<'a> {
    spans: Spans<'a>,
    current: Option<(u128, u128)>,
    clip: (u128, u128),
    cidr: bool,
}

impl<'a> Blocks<'a> {
    pub(crate) fn new(set: &'a IpSet, cidr: bool, clip: (u128, u128)) -> Self {
        Self {
            spans: set.spans(),
            current: None,
            clip,
            cidr,
        }
    }

    fn next_span(&mut self) -> Option<(u128, u128)> {
        let (lo, hi) = self.clip;
        for (start, end) in self.spans.by_ref() {
            if end < lo {
                continue;
            }
            if start > hi {
                return None;
            }
            return Some((start.max(lo), end.min(hi)));
        }
        None
    }
}

impl Iterator for Blocks<'_> {
    type Item = (u128, u8);

    fn next(&mut self) -> Option<Self::Item> {
        let (start, end) = match self.current {
            Some(span) => span,
            None => self.next_span()?,
        };

        let bits = if self.cidr { largest_block(start, end) } else { 0 };
        let block_end = if bits == 128 {
            u128::MAX
        } else {
            start + ((1u128 << bits) - 1)
        };
        self.current = if block_end >= end {
            None
        } else {
            Some((block_end + 1, end))
        };
        Some((start, (128 - bits) as u8))
    }
}

/// Host-bit count of the largest aligned block starting at `start` that
/// fits within `end`.
fn largest_block(start: u128, end: u128) -> u32 {
    let span = end - start;
    let fits = if span == u128::MAX {
        128
    } else {
        127 - (span + 1).leading_zeros()
    };
    fits.min(start.trailing_zeros())
}

/// Iterator over a set as [`IpNet`] values.
pub struct Walk<'a> {
    blocks: Option<Blocks<'a>>,
    as_v6: bool,
}

impl Iterator for Walk<'_> {
    type Item = IpNet;

    fn next(&mut self) -> Option<Self::Item> {
        let (base, prefix) = self.blocks.as_mut()?.next()?;
        let net = if self.as_v6 {
            Ipv6Net::new(Ipv6Addr::from(base), prefix).map(IpNet::V6)
        } else {
            Ipv4Net::new(Ipv4Addr::from(base as u32), prefix.saturating_sub(96)).map(IpNet::V4)
        };
        net.ok()
    }
}

impl IpSet {
    /// Iterate the set in ascending order, as single addresses or as
    /// maximal CIDR blocks when `cidr` is true.
    pub fn walk_iter(&self, cidr: bool, policy: V6Policy) -> Walk<'_> {
        let mapped = (V4_MAPPED_BASE, V4_MAPPED_LAST);
        let everything = (0, u128::MAX);
        let plan = match (policy, self.is_v6()) {
            (V6Policy::Ignore, true) | (V6Policy::Only, false) => None,
            (V6Policy::Ignore, false) | (V6Policy::AsV4, _) => Some((mapped, false)),
            (V6Policy::Mix, v6) => Some((if v6 { everything } else { mapped }, v6)),
            (V6Policy::Force, _) | (V6Policy::Only, true) => Some((everything, true)),
        };
        match plan {
            Some((clip, as_v6)) => Walk {
                blocks: Some(Blocks::new(self, cidr, clip)),
                as_v6,
            },
            None => Walk {
                blocks: None,
                as_v6: false,
            },
        }
    }

    /// Visit the set in ascending order, stopping at the first error the
    /// callback returns.
    pub fn walk<E>(
        &self,
        cidr: bool,
        policy: V6Policy,
        mut visit: impl FnMut(IpNet) -> Result<(), E>,
    ) -> Result<(), E> {
        for net in self.walk_iter(cidr, policy) {
            visit(net)?;
        }
        Ok(())
    }

    /// Maximal CIDR blocks covering the whole set.
    pub fn blocks(&self) -> Blocks<'_> {
        Blocks::new(self, true, (0, u128::MAX))
    }

    /// Every address of the set, in the set's own family.
    pub fn addresses(&self) -> impl Iterator<Item = IpAddr> + '_ {
        self.walk_iter(false, V6Policy::Mix).map(|net| net.addr())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ip(text: &str) -> IpAddr {
        text.parse().unwrap()
    }

    fn nets(set: &IpSet, cidr: bool, policy: V6Policy) -> Vec<String> {
        set.walk_iter(cidr, policy).map(|n| n.to_string()).collect()
    }

    #[test]
    fn test_cidr_walk_is_maximal() {
        let mut set = IpSet::new_v4();
        set.insert_range(ip("10.0.0.1"), ip("10.0.0.8")).unwrap();
        assert_eq!(
            nets(&set, true, V6Policy::Mix),
            vec!["10.0.0.1/32", "10.0.0.2/31", "10.0.0.4/30", "10.0.0.8/32"]
        );
    }

    #[test]
    fn test_cidr_walk_coalesces_adjacent_ranges() {
        let mut set = IpSet::new_v4();
        set.insert_block(ip("10.0.1.0"), 24).unwrap();
        set.insert_block(ip("10.0.0.0"), 24).unwrap();
        assert!(!set.is_clean());
        assert_eq!(nets(&set, true, V6Policy::Mix), vec!["10.0.0.0/23"]);
    }

    #[test]
    fn test_address_walk() {
        let mut set = IpSet::new_v4();
        set.insert_block(ip("192.168.1.4"), 30).unwrap();
        let addrs: Vec<IpAddr> = set.addresses().collect();
        assert_eq!(
            addrs,
            vec![
                ip("192.168.1.4"),
                ip("192.168.1.5"),
                ip("192.168.1.6"),
                ip("192.168.1.7")
            ]
        );
    }

    #[test]
    fn test_policies() {
        let mut v4 = IpSet::new_v4();
        v4.insert_block(ip("10.0.0.0"), 8).unwrap();
        assert_eq!(nets(&v4, true, V6Policy::Force), vec!["::ffff:10.0.0.0/104"]);
        assert!(nets(&v4, true, V6Policy::Only).is_empty());
        assert_eq!(nets(&v4, true, V6Policy::Ignore), vec!["10.0.0.0/8"]);

        let mut v6 = IpSet::new_v6();
        v6.insert_address(ip("10.0.0.1")).unwrap();
        v6.insert_address(ip("2001:db8::1")).unwrap();
        assert_eq!(nets(&v6, true, V6Policy::AsV4), vec!["10.0.0.1/32"]);
        assert!(nets(&v6, true, V6Policy::Ignore).is_empty());
        assert_eq!(
            nets(&v6, true, V6Policy::Mix),
            vec!["::ffff:10.0.0.1/128", "2001:db8::1/128"]
        );
    }

    #[test]
    fn test_walk_callback_stops_on_error() {
        let mut set = IpSet::new_v4();
        set.insert_range(ip("10.0.0.0"), ip("10.0.0.9")).unwrap();
        let mut seen = 0;
        let result: Result<(), &str> = set.walk(false, V6Policy::Mix, |_| {
            seen += 1;
            if seen == 3 {
                Err("stop")
            } else {
                Ok(())
            }
        });
        assert_eq!(result, Err("stop"));
        assert_eq!(seen, 3);
    }

    #[test]
    fn test_whole_space_is_one_block() {
        let mut set = IpSet::new_v6();
        set.insert_block(ip("::"), 0).unwrap();
        let blocks: Vec<_> = set.blocks().collect();
        assert_eq!(blocks, vec![(0, 0)]);
    }

    #[test]
    fn test_largest_block() {
        assert_eq!(largest_block(0, 255), 8);
        assert_eq!(largest_block(1, 255), 0);
        assert_eq!(largest_block(4, 11), 2);
        assert_eq!(largest_block(0, u128::MAX), 128);
    }
}
