//! IP prefix set engine
//!
//! A set is held as disjoint inclusive ranges over the unified 128-bit
//! address space, where IPv4 occupies `::ffff:0:0/96`. Ranges are kept
//! sorted by a `BTreeMap` from start to end. Inserts merge overlapping
//! ranges immediately; ranges that merely touch are merged by
//! [`IpSet::clean`]. CIDR views are derived from ranges on demand.

pub mod algebra;
pub mod codec;
pub mod mask;
pub mod sample;
pub mod walk;

use std::collections::BTreeMap;
use std::net::IpAddr;

use ipnet::IpNet;
use serde::{Deserialize, Serialize};

use crate::addr::{self, V4_MAPPED_BASE, V4_MAPPED_LAST};
use crate::error::{EngineError, EngineResult};

pub use walk::{Blocks, V6Policy, Walk};

/// Address family of a set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IpVersion {
    V4,
    V6,
}

impl IpVersion {
    /// Largest prefix length of the family.
    pub fn max_prefix(self) -> u8 {
        match self {
            IpVersion::V4 => 32,
            IpVersion::V6 => 128,
        }
    }
}

#[derive(Debug, Clone)]
pub struct IpSet {
    ranges: BTreeMap<u128, u128>,
    v6: bool,
    auto_convert: bool,
    clean: bool,
}

impl Default for IpSet {
    fn default() -> Self {
        Self::new_v4()
    }
}

/// Two sets are equal when they hold the same addresses.
impl PartialEq for IpSet {
    fn eq(&self, other: &Self) -> bool {
        self.spans().eq(other.spans())
    }
}

impl Eq for IpSet {}

impl IpSet {
    pub fn new(version: IpVersion) -> Self {
        Self {
            ranges: BTreeMap::new(),
            v6: version == IpVersion::V6,
            auto_convert: true,
            clean: true,
        }
    }

    pub fn new_v4() -> Self {
        Self::new(IpVersion::V4)
    }

    pub fn new_v6() -> Self {
        Self::new(IpVersion::V6)
    }

    /// An empty set with the same family and conversion setting.
    pub fn empty_like(&self) -> Self {
        Self {
            ranges: BTreeMap::new(),
            v6: self.v6,
            auto_convert: self.auto_convert,
            clean: true,
        }
    }

    pub fn version(&self) -> IpVersion {
        if self.v6 {
            IpVersion::V6
        } else {
            IpVersion::V4
        }
    }

    pub fn is_v6(&self) -> bool {
        self.v6
    }

    pub fn auto_convert(&self) -> bool {
        self.auto_convert
    }

    /// Whether inserting a native IPv6 address into an IPv4 set promotes
    /// the set instead of failing.
    pub fn set_auto_convert(&mut self, enabled: bool) {
        self.auto_convert = enabled;
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    pub fn is_clean(&self) -> bool {
        self.clean || self.ranges.is_empty()
    }

    /// Merge adjacent ranges into canonical form. Idempotent.
    pub fn clean(&mut self) {
        if self.is_clean() {
            self.clean = true;
            return;
        }
        let merged: BTreeMap<u128, u128> = self.spans().collect();
        self.ranges = merged;
        self.clean = true;
    }

    /// Number of addresses in the set.
    pub fn count(&self) -> u128 {
        // A full IPv6 space has 2^128 addresses; report u128::MAX.
        self.ranges
            .iter()
            .fold(0u128, |acc, (s, e)| acc.saturating_add((e - s).saturating_add(1)))
    }

    pub fn contains(&self, ip: IpAddr) -> bool {
        self.contains_value(addr::to_u128(ip))
    }

    pub(crate) fn contains_value(&self, value: u128) -> bool {
        self.ranges
            .range(..=value)
            .next_back()
            .is_some_and(|(_, end)| *end >= value)
    }

    /// Whether the set holds any address outside the IPv4-mapped range.
    pub fn contains_v6(&self) -> bool {
        match (self.ranges.first_key_value(), self.ranges.last_key_value()) {
            (Some((first, _)), Some((_, last))) => *first < V4_MAPPED_BASE || *last > V4_MAPPED_LAST,
            _ => false,
        }
    }

    /// Change the family of the set. Demotion fails when the set holds
    /// native IPv6 addresses.
    pub fn convert(&mut self, version: IpVersion) -> EngineResult<()> {
        match version {
            IpVersion::V6 => self.v6 = true,
            IpVersion::V4 => {
                if self.contains_v6() {
                    return Err(EngineError::Ipv6NotAllowed(
                        "set holds addresses outside ::ffff:0:0/96".to_string(),
                    ));
                }
                self.v6 = false;
            }
        }
        Ok(())
    }

    pub fn insert_address(&mut self, ip: IpAddr) -> EngineResult<()> {
        let value = addr::to_u128(ip);
        self.insert_span(value, value)
    }

    /// Insert every address from `lo` through `hi` inclusive.
    pub fn insert_range(&mut self, lo: IpAddr, hi: IpAddr) -> EngineResult<()> {
        let (lo, hi) = ordered(lo, hi)?;
        self.insert_span(lo, hi)
    }

    /// Insert the block `base/prefix`. Host bits of `base` are ignored.
    pub fn insert_block(&mut self, base: IpAddr, prefix: u8) -> EngineResult<()> {
        let (lo, hi) = block_span(base, prefix)?;
        self.insert_span(lo, hi)
    }

    pub fn insert_net(&mut self, net: IpNet) -> EngineResult<()> {
        self.insert_block(net.addr(), net.prefix_len())
    }

    pub fn remove_address(&mut self, ip: IpAddr) {
        let value = addr::to_u128(ip);
        self.remove_span(value, value);
    }

    pub fn remove_range(&mut self, lo: IpAddr, hi: IpAddr) -> EngineResult<()> {
        let (lo, hi) = ordered(lo, hi)?;
        self.remove_span(lo, hi);
        Ok(())
    }

    pub fn remove_block(&mut self, base: IpAddr, prefix: u8) -> EngineResult<()> {
        let (lo, hi) = block_span(base, prefix)?;
        self.remove_span(lo, hi);
        Ok(())
    }

    pub fn remove_all(&mut self) {
        self.ranges.clear();
        self.clean = true;
    }

    /// Insert a span in the unified space, promoting an IPv4 set when
    /// the span leaves the mapped range.
    pub(crate) fn insert_span(&mut self, lo: u128, hi: u128) -> EngineResult<()> {
        if !self.v6 && (lo < V4_MAPPED_BASE || hi > V4_MAPPED_LAST) {
            if !self.auto_convert {
                return Err(EngineError::Ipv6NotAllowed(
                    addr::from_u128(lo, true).map_or_else(String::new, |ip| ip.to_string()),
                ));
            }
            self.v6 = true;
        }
        self.merge_span(lo, hi);
        Ok(())
    }

    /// Insert without any family check.
    pub(crate) fn merge_span(&mut self, lo: u128, hi: u128) {
        let mut start = lo;
        let mut end = hi;

        if let Some((&s, &e)) = self.ranges.range(..lo).next_back() {
            if e >= lo {
                start = s;
                end = end.max(e);
            }
        }
        let swallowed: Vec<(u128, u128)> = self
            .ranges
            .range(lo..=hi)
            .map(|(s, e)| (*s, *e))
            .collect();
        for (s, e) in swallowed {
            self.ranges.remove(&s);
            end = end.max(e);
        }

        self.ranges.insert(start, end);
        self.clean = false;
    }

    pub(crate) fn remove_span(&mut self, lo: u128, hi: u128) {
        if let Some((&s, &e)) = self.ranges.range(..lo).next_back() {
            if e >= lo {
                self.ranges.insert(s, lo - 1);
                if e > hi {
                    self.ranges.insert(hi + 1, e);
                }
            }
        }
        let inside: Vec<(u128, u128)> = self
            .ranges
            .range(lo..=hi)
            .map(|(s, e)| (*s, *e))
            .collect();
        for (s, e) in inside {
            self.ranges.remove(&s);
            if e > hi {
                self.ranges.insert(hi + 1, e);
            }
        }
        self.clean = false;
    }

    /// Disjoint ranges with adjacent ones coalesced, ascending.
    pub(crate) fn spans(&self) -> Spans<'_> {
        Spans {
            inner: self.ranges.iter().peekable(),
        }
    }

    pub(crate) fn from_parts(ranges: BTreeMap<u128, u128>, v6: bool, auto_convert: bool) -> Self {
        Self {
            ranges,
            v6,
            auto_convert,
            clean: false,
        }
    }

    pub(crate) fn replace_ranges(&mut self, ranges: BTreeMap<u128, u128>) {
        self.ranges = ranges;
        self.clean = false;
    }
}

fn ordered(lo: IpAddr, hi: IpAddr) -> EngineResult<(u128, u128)> {
    let (lo_value, hi_value) = (addr::to_u128(lo), addr::to_u128(hi));
    if lo_value > hi_value {
        return Err(EngineError::InvalidRange(format!("{lo} is greater than {hi}")));
    }
    Ok((lo_value, hi_value))
}

/// Inclusive span of `base/prefix` in the unified space.
pub(crate) fn block_span(base: IpAddr, prefix: u8) -> EngineResult<(u128, u128)> {
    let (max, offset) = match base {
        IpAddr::V4(_) => (32u8, 96u32),
        IpAddr::V6(_) => (128u8, 0u32),
    };
    if prefix > max {
        return Err(EngineError::InvalidPrefix { prefix, max });
    }
    let host = host_mask(u32::from(prefix) + offset);
    let start = addr::to_u128(base) & !host;
    Ok((start, start | host))
}

/// Mask of the host bits below a 128-bit prefix length.
pub(crate) fn host_mask(prefix128: u32) -> u128 {
    match prefix128 {
        0 => u128::MAX,
        1..=127 => u128::MAX >> prefix128,
        _ => 0,
    }
}

/// Coalescing iterator over a set's ranges.
pub(crate) struct Spans<'a> {
    inner: std::iter::Peekable<std::collections::btree_map::Iter<'a, u128, u128>>,
}

impl Iterator for Spans<'_> {
    type Item = (u128, u128);

    fn next(&mut self) -> Option<Self::Item> {
        let (&start, &first_end) = self.inner.next()?;
        let mut end = first_end;
        while let Some((&next_start, &next_end)) = self.inner.peek() {
            if end != u128::MAX && next_start == end + 1 {
                end = next_end;
                self.inner.next();
            } else {
                break;
            }
        }
        Some((start, end))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ip(text: &str) -> IpAddr {
        text.parse().unwrap()
    }

    #[test]
    fn test_insert_and_contains() {
        let mut set = IpSet::new_v4();
        set.insert_address(ip("10.0.0.1")).unwrap();
        set.insert_block(ip("192.168.0.0"), 24).unwrap();
        assert!(set.contains(ip("10.0.0.1")));
        assert!(set.contains(ip("192.168.0.255")));
        assert!(!set.contains(ip("192.168.1.0")));
        assert!(set.contains(ip("::ffff:192.168.0.7")));
        assert_eq!(set.count(), 257);
    }

    #[test]
    fn test_overlapping_inserts_merge() {
        let mut set = IpSet::new_v4();
        set.insert_range(ip("10.0.0.10"), ip("10.0.0.20")).unwrap();
        set.insert_range(ip("10.0.0.15"), ip("10.0.0.30")).unwrap();
        set.insert_range(ip("10.0.0.0"), ip("10.0.0.12")).unwrap();
        assert_eq!(set.ranges.len(), 1);
        assert_eq!(set.count(), 31);
    }

    #[test]
    fn test_clean_merges_adjacent() {
        let mut set = IpSet::new_v4();
        set.insert_block(ip("10.0.0.0"), 25).unwrap();
        set.insert_block(ip("10.0.0.128"), 25).unwrap();
        assert!(!set.is_clean());
        assert_eq!(set.ranges.len(), 2);
        set.clean();
        assert!(set.is_clean());
        assert_eq!(set.ranges.len(), 1);
        set.clean();
        assert_eq!(set.ranges.len(), 1);
    }

    #[test]
    fn test_remove_splits_blocks() {
        let mut set = IpSet::new_v4();
        set.insert_block(ip("10.0.0.0"), 24).unwrap();
        set.remove_address(ip("10.0.0.100"));
        assert_eq!(set.count(), 255);
        assert!(!set.contains(ip("10.0.0.100")));
        assert!(set.contains(ip("10.0.0.99")));
        assert!(set.contains(ip("10.0.0.101")));
        set.remove_block(ip("10.0.0.0"), 25).unwrap();
        assert_eq!(set.count(), 128);
        set.remove_range(ip("10.0.0.200"), ip("10.0.1.5")).unwrap();
        assert_eq!(set.count(), 72);
    }

    #[test]
    fn test_invalid_range_and_prefix() {
        let mut set = IpSet::new_v4();
        assert!(matches!(
            set.insert_range(ip("10.0.0.2"), ip("10.0.0.1")),
            Err(EngineError::InvalidRange(_))
        ));
        assert!(matches!(
            set.insert_block(ip("10.0.0.0"), 33),
            Err(EngineError::InvalidPrefix { prefix: 33, max: 32 })
        ));
        assert!(set.is_empty());
    }

    #[test]
    fn test_auto_convert_promotes() {
        let mut set = IpSet::new_v4();
        set.insert_address(ip("10.0.0.1")).unwrap();
        set.insert_address(ip("2001:db8::1")).unwrap();
        assert!(set.is_v6());
        assert!(set.contains_v6());
        assert!(set.convert(IpVersion::V4).is_err());

        let mut strict = IpSet::new_v4();
        strict.set_auto_convert(false);
        assert!(matches!(
            strict.insert_address(ip("2001:db8::1")),
            Err(EngineError::Ipv6NotAllowed(_))
        ));
        strict.insert_address(ip("::ffff:10.0.0.1")).unwrap();
        assert!(!strict.is_v6());
        strict.remove_address(ip("2001:db8::1"));
        assert_eq!(strict.count(), 1);
    }

    #[test]
    fn test_convert_round_trip() {
        let mut set = IpSet::new_v4();
        set.insert_address(ip("10.0.0.1")).unwrap();
        set.convert(IpVersion::V6).unwrap();
        assert!(set.is_v6());
        assert!(!set.contains_v6());
        set.convert(IpVersion::V4).unwrap();
        assert!(!set.is_v6());
    }

    #[test]
    fn test_equality_is_address_set_equality() {
        let mut a = IpSet::new_v4();
        a.insert_block(ip("10.0.0.0"), 25).unwrap();
        a.insert_block(ip("10.0.0.128"), 25).unwrap();
        let mut b = IpSet::new_v4();
        b.insert_block(ip("10.0.0.0"), 24).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_full_v6_space_count() {
        let mut set = IpSet::new_v6();
        set.insert_block(ip("::"), 0).unwrap();
        assert_eq!(set.count(), u128::MAX);
        assert!(set.contains(ip("10.0.0.1")));
    }
}
