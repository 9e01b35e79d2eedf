use std::io::BufRead;
use std::net::{IpAddr, Ipv4Addr};

use ipnet::IpNet;
use tracing::debug;

use crate::error::{EngineError, EngineResult};
use crate::ipset::IpSet;
use crate::text::bad_lines::BadLines;
use crate::text::reader::LineReader;

/// One textual set member.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetEntry {
    Address(IpAddr),
    Block(IpNet),
    Range(IpAddr, IpAddr),
}

impl SetEntry {
    /// Parse an address, a CIDR block or an inclusive `lo-hi` range. A
    /// bare integer is read as an IPv4 address.
    pub fn parse(text: &str) -> EngineResult<Self> {
        let token = text.trim();
        if token.contains('/') {
            return token
                .parse::<IpNet>()
                .map(SetEntry::Block)
                .map_err(|e| EngineError::parse("CIDR block", token, e));
        }
        if let Some((lo, hi)) = token.split_once('-') {
            return Ok(SetEntry::Range(parse_address(lo)?, parse_address(hi)?));
        }
        parse_address(token).map(SetEntry::Address)
    }

    pub fn insert_into(self, set: &mut IpSet) -> EngineResult<()> {
        match self {
            SetEntry::Address(ip) => set.insert_address(ip),
            SetEntry::Block(net) => set.insert_net(net),
            SetEntry::Range(lo, hi) => set.insert_range(lo, hi),
        }
    }
}

fn parse_address(text: &str) -> EngineResult<IpAddr> {
    let token = text.trim();
    if !token.is_empty() && token.bytes().all(|b| b.is_ascii_digit()) {
        return token
            .parse::<u32>()
            .map(|n| IpAddr::V4(Ipv4Addr::from(n)))
            .map_err(|e| EngineError::parse("IP address", token, e));
    }
    token
        .parse::<IpAddr>()
        .map_err(|e| EngineError::parse("IP address", token, e))
}

/// Insert every entry read from `lines` into `set`, routing failures
/// through `bad`. Returns the number of entries inserted. Entries are
/// collected apart from `set`, which is only changed once the whole
/// input has been read.
pub fn read_ipset_lines<R: BufRead>(
    set: &mut IpSet,
    lines: LineReader<R>,
    bad: &mut BadLines,
) -> EngineResult<u64> {
    let mut scratch = set.empty_like();
    let mut added = 0u64;
    for line in lines {
        let line = match line {
            Ok(line) => line,
            Err(EngineError::LineTooLong { line, max }) => {
                bad.reject(line, "", EngineError::LineTooLong { line, max })?;
                continue;
            }
            Err(e) => return Err(e),
        };
        match SetEntry::parse(&line.text).and_then(|entry| entry.insert_into(&mut scratch)) {
            Ok(()) => added += 1,
            Err(e) => bad.reject(line.number, &line.text, e)?,
        }
    }
    set.union(&scratch);
    set.clean();
    debug!(added, rejected = bad.count(), addresses = %set.count(), "built ipset from text");
    Ok(added)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BadLinePolicy;
    use std::io::Cursor;

    #[test]
    fn test_parse_entries() {
        assert_eq!(
            SetEntry::parse("10.0.0.1").unwrap(),
            SetEntry::Address("10.0.0.1".parse().unwrap())
        );
        assert_eq!(
            SetEntry::parse("167772161").unwrap(),
            SetEntry::Address("10.0.0.1".parse().unwrap())
        );
        assert!(matches!(
            SetEntry::parse("10.0.0.0/8").unwrap(),
            SetEntry::Block(_)
        ));
        assert!(matches!(
            SetEntry::parse("10.0.0.1-10.0.0.9").unwrap(),
            SetEntry::Range(_, _)
        ));
        assert!(SetEntry::parse("10.0.0.256").is_err());
        assert!(SetEntry::parse("10.0.0.0/33").is_err());
    }

    #[test]
    fn test_read_lines() {
        let input = "# comment\n10.0.0.0/30\n10.0.0.4\n10.0.1.0-10.0.1.3\nbogus\n10.0.2.9-10.0.2.1\n2001:db8::1\n";
        let mut set = IpSet::new_v4();
        let mut bad = BadLines::new(BadLinePolicy::Skip);
        let added = read_ipset_lines(
            &mut set,
            LineReader::new(Cursor::new(input), "#", 2048),
            &mut bad,
        )
        .unwrap();
        assert_eq!(added, 4);
        assert_eq!(bad.count(), 2);
        assert_eq!(set.count(), 10);
        assert!(set.is_v6());
        assert!(set.is_clean());
    }

    #[test]
    fn test_strict_set_rejects_v6() {
        let mut set = IpSet::new_v4();
        set.set_auto_convert(false);
        let mut bad = BadLines::new(BadLinePolicy::Abort);
        let result = read_ipset_lines(
            &mut set,
            LineReader::new(Cursor::new("10.0.0.1\n::2\n"), "#", 2048),
            &mut bad,
        );
        assert!(matches!(result, Err(EngineError::Ipv6NotAllowed(_))));
        assert!(set.is_empty());
    }

    #[test]
    fn test_abort_leaves_existing_set_unchanged() {
        let mut set = IpSet::new_v4();
        set.insert_block("192.168.0.0".parse().unwrap(), 24).unwrap();
        set.clean();
        let before = set.clone();

        let mut bad = BadLines::new(BadLinePolicy::Abort);
        let result = read_ipset_lines(
            &mut set,
            LineReader::new(Cursor::new("10.0.0.1
10.0.0.0/30
bogus
10.0.0.9
"), "#", 2048),
            &mut bad,
        );
        assert!(matches!(result, Err(EngineError::Parse { .. })));
        assert_eq!(set, before);
        assert!(!set.contains("10.0.0.1".parse().unwrap()));

        let added = read_ipset_lines(
            &mut set,
            LineReader::new(Cursor::new("10.0.0.1
"), "#", 2048),
            &mut BadLines::new(BadLinePolicy::Abort),
        )
        .unwrap();
        assert_eq!(added, 1);
        assert_eq!(set.count(), 257);
    }
}
