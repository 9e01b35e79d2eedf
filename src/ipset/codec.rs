//! IPset file body
//!
//! ```text
//! u8   family (4 or 6)
//! u64  block count
//! per block, ascending:
//!   u8     prefix length in the family's own terms
//!   [u8]   network octets, truncated to ceil(prefix / 8)
//! ```

use std::collections::BTreeMap;
use std::io::{Read, Write};

use tracing::debug;

use crate::addr::V4_MAPPED_BASE;
use crate::codec::{self, FormatId, Persist};
use crate::error::{EngineError, EngineResult};
use crate::ipset::{host_mask, IpSet, IpVersion};

impl Persist for IpSet {
    const FORMAT: FormatId = FormatId::IpSet;

    fn write_body(&self, w: &mut dyn Write) -> EngineResult<()> {
        let version = self.version();
        let (family, width, offset) = family_layout(version);
        let blocks: Vec<(u128, u8)> = self.blocks().collect();

        w.write_all(&[family])?;
        w.write_all(&(blocks.len() as u64).to_be_bytes())?;
        for (base, prefix128) in &blocks {
            let prefix = prefix128.saturating_sub(offset);
            let octets = base.to_be_bytes();
            let used = usize::from(prefix).div_ceil(8);
            w.write_all(&[prefix])?;
            w.write_all(&octets[16 - width..16 - width + used])?;
        }
        debug!(blocks = blocks.len(), ?version, "wrote ipset");
        Ok(())
    }

    fn read_body(r: &mut dyn Read) -> EngineResult<Self> {
        let version = match codec::read_u8(r, "ipset family")? {
            4 => IpVersion::V4,
            6 => IpVersion::V6,
            other => {
                return Err(EngineError::Format(format!("unknown ipset family {other}")));
            }
        };
        let (_, width, offset) = family_layout(version);
        let max = version.max_prefix();
        let count = codec::read_u64(r, "ipset block count")?;

        let mut ranges = BTreeMap::new();
        let mut previous_end: Option<u128> = None;
        for index in 0..count {
            let prefix = codec::read_u8(r, "block prefix")?;
            if prefix > max {
                return Err(EngineError::Format(format!(
                    "block {index}: prefix {prefix} exceeds {max}"
                )));
            }
            let used = usize::from(prefix).div_ceil(8);
            let mut octets = [0u8; 16];
            codec::read_exact(r, &mut octets[16 - width..16 - width + used], "block address")?;

            let mut base = u128::from_be_bytes(octets);
            if version == IpVersion::V4 {
                base |= V4_MAPPED_BASE;
            }
            let host = host_mask(u32::from(prefix + offset));
            if base & host != 0 {
                return Err(EngineError::Format(format!(
                    "block {index}: host bits set below /{prefix}"
                )));
            }
            let end = base | host;
            if previous_end.is_some_and(|prev| base <= prev) {
                return Err(EngineError::Format(format!(
                    "block {index}: blocks out of order or overlapping"
                )));
            }
            previous_end = Some(end);
            ranges.insert(base, end);
        }

        let mut trailing = [0u8; 1];
        if r.read(&mut trailing)? != 0 {
            return Err(EngineError::Format("trailing data after ipset blocks".to_string()));
        }

        let mut set = IpSet::from_parts(ranges, version == IpVersion::V6, true);
        set.clean();
        debug!(blocks = count, ?version, "read ipset");
        Ok(set)
    }
}

/// Family byte, octet width and prefix offset into the unified space.
fn family_layout(version: IpVersion) -> (u8, usize, u8) {
    match version {
        IpVersion::V4 => (4, 4, 96),
        IpVersion::V6 => (6, 16, 0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use std::net::IpAddr;

    fn ip(text: &str) -> IpAddr {
        text.parse().unwrap()
    }

    fn round_trip(set: &IpSet) -> IpSet {
        let mut buf = Vec::new();
        set.write_to(&mut buf).unwrap();
        IpSet::read_from(&mut Cursor::new(buf)).unwrap()
    }

    #[test]
    fn test_v4_round_trip_truncates_octets() {
        let mut set = IpSet::new_v4();
        set.insert_block(ip("10.0.0.0"), 8).unwrap();
        set.insert_address(ip("192.168.1.1")).unwrap();

        let mut buf = Vec::new();
        set.write_to(&mut buf).unwrap();
        // header, family, count, then 1+1 and 1+4 octets
        assert_eq!(buf.len(), 6 + 1 + 8 + 2 + 5);

        let back = round_trip(&set);
        assert_eq!(back, set);
        assert!(!back.is_v6());
        assert!(back.is_clean());
    }

    #[test]
    fn test_v6_round_trip() {
        let mut set = IpSet::new_v6();
        set.insert_block(ip("2001:db8::"), 32).unwrap();
        set.insert_address(ip("10.1.2.3")).unwrap();
        let back = round_trip(&set);
        assert_eq!(back, set);
        assert!(back.is_v6());
    }

    #[test]
    fn test_empty_round_trip() {
        let back = round_trip(&IpSet::new_v4());
        assert!(back.is_empty());
    }

    fn body(family: u8, blocks: &[(u8, Vec<u8>)]) -> Vec<u8> {
        let mut buf = Vec::new();
        codec::write_header(&mut buf, FormatId::IpSet).unwrap();
        buf.push(family);
        buf.extend_from_slice(&(blocks.len() as u64).to_be_bytes());
        for (prefix, octets) in blocks {
            buf.push(*prefix);
            buf.extend_from_slice(octets);
        }
        buf
    }

    #[test]
    fn test_rejects_corrupt_blocks() {
        let valid = body(4, &[(16, vec![10, 1]), (24, vec![10, 2, 1])]);
        assert_eq!(IpSet::read_from(&mut Cursor::new(valid)).unwrap().count(), 65536 + 256);

        let host_bits = body(4, &[(15, vec![10, 1])]);
        assert!(matches!(
            IpSet::read_from(&mut Cursor::new(host_bits)),
            Err(EngineError::Format(_))
        ));

        let too_long = body(4, &[(33, vec![10, 0, 0, 0, 0])]);
        assert!(IpSet::read_from(&mut Cursor::new(too_long)).is_err());

        let unordered = body(4, &[(8, vec![11]), (8, vec![10])]);
        assert!(IpSet::read_from(&mut Cursor::new(unordered)).is_err());

        let overlapping = body(4, &[(8, vec![10]), (16, vec![10, 5])]);
        assert!(IpSet::read_from(&mut Cursor::new(overlapping)).is_err());

        let mut truncated = body(4, &[(32, vec![10, 0, 0, 1])]);
        truncated.pop();
        assert!(IpSet::read_from(&mut Cursor::new(truncated)).is_err());

        let mut trailing = body(4, &[(32, vec![10, 0, 0, 1])]);
        trailing.push(0);
        assert!(IpSet::read_from(&mut Cursor::new(trailing)).is_err());

        let family = body(5, &[]);
        assert!(IpSet::read_from(&mut Cursor::new(family)).is_err());
    }
}
