//! CIDR levels reported by a network-structure listing
//!
//! A structure names the levels that get one row per occupied block and,
//! after an optional `/`, further levels that are only counted in each
//! row's summary. Levels are numeric prefixes or the letters `T` (total,
//! /0), `A` (/8), `B` (/16), `C` (/24), `X` (/27) and `H` (hosts). `S`
//! turns on summaries without naming their levels. A leading `v6:` reads
//! the set as IPv6; the letters `A`, `B`, `C` and `X` are IPv4 only.

use std::collections::BTreeSet;
use std::str::FromStr;

use crate::error::{EngineError, EngineResult};

const SUMMARY_V4: &str = "ABCXH";
const SUMMARY_V6: &str = "48,64";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetStructure {
    v6: bool,
    /// Levels with a row per block, ascending; never empty.
    rows: Vec<u8>,
    /// Every row or summary level, ascending.
    levels: Vec<u8>,
    summarize: bool,
}

impl NetStructure {
    /// The structure used when none is given: a summarized total row,
    /// `TS/ABCXH` for IPv4 and `v6:TS/48,64` for IPv6.
    pub fn default_for(v6: bool) -> Self {
        let levels = if v6 {
            vec![0, 48, 64]
        } else {
            vec![0, 8, 16, 24, 27, 32]
        };
        Self {
            v6,
            rows: vec![0],
            levels,
            summarize: true,
        }
    }

    pub fn parse(input: &str) -> EngineResult<Self> {
        let (v6, body) = match input.strip_prefix("v6:") {
            Some(rest) => (true, rest),
            None => (false, input),
        };
        let (head, tail) = match body.split_once('/') {
            Some((head, tail)) => (head, Some(tail)),
            None => (body, None),
        };
        if tail.is_some_and(|t| t.contains('/')) {
            return Err(invalid(input, "only one '/' is allowed"));
        }

        let mut summarize = tail.is_some();
        let mut rows = BTreeSet::new();
        parse_levels(input, head, v6, &mut rows, &mut summarize)?;
        if rows.is_empty() {
            return Err(invalid(
                input,
                "a prefix or one of T,A,B,C,X,H must come before any '/'",
            ));
        }

        let mut counted = BTreeSet::new();
        match tail {
            Some(tail) => parse_levels(input, tail, v6, &mut counted, &mut summarize)?,
            None if summarize => {
                let defaults = if v6 { SUMMARY_V6 } else { SUMMARY_V4 };
                parse_levels(input, defaults, v6, &mut counted, &mut summarize)?;
            }
            None => {}
        }

        Ok(Self {
            v6,
            levels: rows.union(&counted).copied().collect(),
            rows: rows.into_iter().collect(),
            summarize,
        })
    }

    pub fn is_v6(&self) -> bool {
        self.v6
    }

    pub fn max_prefix(&self) -> u8 {
        if self.v6 {
            128
        } else {
            32
        }
    }

    pub fn rows(&self) -> &[u8] {
        &self.rows
    }

    /// Whether rows carry a host count and per-level block counts.
    pub fn summarize(&self) -> bool {
        self.summarize
    }

    /// Levels counted in the summary of a row at `prefix`: every level
    /// finer than it, excluding single hosts.
    pub fn summary_levels(&self, prefix: u8) -> impl Iterator<Item = u8> + '_ {
        let max = self.max_prefix();
        self.levels
            .iter()
            .copied()
            .filter(move |level| *level > prefix && *level < max)
    }
}

impl FromStr for NetStructure {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

fn parse_levels(
    input: &str,
    text: &str,
    v6: bool,
    levels: &mut BTreeSet<u8>,
    summarize: &mut bool,
) -> EngineResult<()> {
    let max: u8 = if v6 { 128 } else { 32 };
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        let level = match c {
            ',' => continue,
            c if c.is_whitespace() => continue,
            'S' => {
                *summarize = true;
                continue;
            }
            'T' => 0,
            'H' => max,
            'A' if !v6 => 8,
            'B' if !v6 => 16,
            'C' if !v6 => 24,
            'X' if !v6 => 27,
            '0'..='9' => {
                let mut digits = String::from(c);
                while let Some(d) = chars.next_if(char::is_ascii_digit) {
                    digits.push(d);
                }
                match digits.parse::<u8>() {
                    Ok(prefix) if prefix <= max => prefix,
                    _ => {
                        return Err(invalid(
                            input,
                            &format!("prefix {digits} is larger than {max}"),
                        ))
                    }
                }
            }
            other => {
                return Err(invalid(input, &format!("unexpected character '{other}'")));
            }
        };
        levels.insert(level);
    }
    Ok(())
}

fn invalid(input: &str, reason: &str) -> EngineError {
    EngineError::InvalidArgument(format!("invalid network structure '{input}': {reason}"))
}
