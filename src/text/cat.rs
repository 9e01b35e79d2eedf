//! Text output for stores, bags and sets

use std::io::Write;

use crate::addr::{self, V4_MAPPED_BASE, V4_MAPPED_LAST};
use crate::aggbag::AggBag;
use crate::bag::Bag;
use crate::error::EngineResult;
use crate::field::{format_value, max_for_width, Domain, FieldType, Semantic, SiteNames};
use crate::ipset::{host_mask, IpSet, V6Policy};
use crate::text::netstruct::NetStructure;

/// Bits above an IPv4 prefix in the unified address space.
const V4_OFFSET: u32 = 96;

/// Levels counted by the IPv4 statistics block.
const V4_STAT_LEVELS: [u32; 4] = [8, 16, 24, 27];

/// Layout of delimited text output.
#[derive(Debug, Clone, Copy)]
pub struct TextLayout {
    pub delimiter: char,
    pub titles: bool,
    /// Pad columns to a fixed width per field.
    pub aligned: bool,
    pub final_delimiter: bool,
}

impl Default for TextLayout {
    fn default() -> Self {
        Self {
            delimiter: '|',
            titles: true,
            aligned: true,
            final_delimiter: true,
        }
    }
}

impl TextLayout {
    fn write_row<'s>(
        &self,
        out: &mut dyn Write,
        cells: impl Iterator<Item = (usize, &'s str)>,
    ) -> EngineResult<()> {
        let mut line = String::new();
        let mut first = true;
        for (width, cell) in cells {
            if !first {
                line.push(self.delimiter);
            }
            first = false;
            if self.aligned {
                line.push_str(&format!("{cell:>width$}"));
            } else {
                line.push_str(cell);
            }
        }
        if self.final_delimiter {
            line.push(self.delimiter);
        }
        writeln!(out, "{line}")?;
        Ok(())
    }
}

/// Column width wide enough for any formatted value of `field`.
fn column_width(field: FieldType) -> usize {
    let info = field.info();
    match (info.domain, info.semantic) {
        (Domain::Ipv4, _) => 15,
        (Domain::Ipv6, _) => 39,
        (_, Semantic::Time) => 19,
        (_, Semantic::TcpFlags) => 8,
        (_, Semantic::Attributes) => 4,
        (_, Semantic::Country) => 3,
        (_, Semantic::Sensor | Semantic::Class | Semantic::FlowType) => 8,
        _ => max_for_width(info.width).to_string().len(),
    }
}

/// One row per entry, key columns first, in ascending key order.
pub fn write_aggbag(
    out: &mut dyn Write,
    store: &AggBag,
    names: &dyn SiteNames,
    layout: &TextLayout,
) -> EngineResult<()> {
    let fields: Vec<FieldType> = store
        .key_fields()
        .fields()
        .chain(store.counter_fields().fields())
        .collect();
    let widths: Vec<usize> = fields.iter().map(|f| column_width(*f)).collect();

    if layout.titles {
        let titles: Vec<&str> = fields.iter().map(|f| f.name()).collect();
        layout.write_row(out, widths.iter().copied().zip(titles.iter().copied()))?;
    }
    for (key, counter) in store.iter() {
        let cells: Vec<String> = key
            .values()
            .chain(counter.values())
            .map(|(field, value)| format_value(field, value, names))
            .collect();
        layout.write_row(
            out,
            widths.iter().copied().zip(cells.iter().map(String::as_str)),
        )?;
    }
    Ok(())
}

/// One `key|counter` row per entry.
pub fn write_bag(
    out: &mut dyn Write,
    bag: &Bag,
    names: &dyn SiteNames,
    layout: &TextLayout,
) -> EngineResult<()> {
    let widths = [column_width(bag.key_field()), column_width(bag.counter_field())];
    if layout.titles {
        let titles = [bag.key_field().name(), bag.counter_field().name()];
        layout.write_row(out, widths.into_iter().zip(titles))?;
    }
    for (key, count) in bag.iter() {
        let cells = [
            format_value(bag.key_field(), key, names),
            count.to_string(),
        ];
        layout.write_row(out, widths.into_iter().zip(cells.iter().map(String::as_str)))?;
    }
    Ok(())
}

/// One address or CIDR block per line.
pub fn write_ipset(
    out: &mut dyn Write,
    set: &IpSet,
    cidr: bool,
    policy: V6Policy,
) -> EngineResult<()> {
    for net in set.walk_iter(cidr, policy) {
        if cidr {
            writeln!(out, "{net}")?;
        } else {
            writeln!(out, "{}", net.addr())?;
        }
    }
    Ok(())
}

/// One `count|low|high` row per run of contiguous addresses.
pub fn write_ipset_ranges(
    out: &mut dyn Write,
    set: &IpSet,
    layout: &TextLayout,
) -> EngineResult<()> {
    let v6 = set.is_v6();
    let count_width = if v6 { 39 } else { 10 };
    let widths = [count_width, address_width(v6), address_width(v6)];
    for (lo, hi) in set.spans() {
        let cells = [
            span_size(lo, hi).to_string(),
            show_address(lo, v6),
            show_address(hi, v6),
        ];
        layout.write_row(out, widths.into_iter().zip(cells.iter().map(String::as_str)))?;
    }
    Ok(())
}

/// The `Network Summary` block: lowest and highest address, the host
/// count, and the number of occupied blocks at /8, /16, /24 and /27 for
/// an IPv4 set or at every multiple of 8 up to /120 for an IPv6 set.
pub fn write_ipset_statistics(out: &mut dyn Write, set: &IpSet) -> EngineResult<()> {
    let spans: Vec<(u128, u128)> = set.spans().collect();
    let v6 = set.is_v6();
    let width = address_width(v6);
    let (min, max) = match (spans.first(), spans.last()) {
        (Some((lo, _)), Some((_, hi))) => (show_address(*lo, v6), show_address(*hi, v6)),
        _ => ("-".to_string(), "-".to_string()),
    };
    writeln!(out, "Network Summary")?;
    writeln!(out, "\tminimumIP = {min:>width$}")?;
    writeln!(out, "\tmaximumIP = {max:>width$}")?;

    let hosts = set.count();
    if v6 {
        for prefix in (8..=120u32).step_by(8) {
            let n = occupied_blocks(spans.iter().copied(), prefix);
            writeln!(out, "\t{n:>39} occupied /{prefix}{}", plural(n))?;
        }
        let label = if hosts == 1 { " (/128)" } else { "s (/128s)" };
        writeln!(out, "\t{hosts:>39} host{label}")?;
        return Ok(());
    }

    let label = if hosts == 1 { " (/32),  " } else { "s (/32s)," };
    writeln!(out, "\t{hosts:>10} host{label}  {:>10.6}% of 2^32", percent_of(hosts, 32))?;
    for prefix in V4_STAT_LEVELS {
        let n = occupied_blocks(spans.iter().copied(), prefix + V4_OFFSET);
        let suffix = match (n == 1, prefix < 10) {
            (true, true) => ",  ",
            (true, false) => ", ",
            (false, true) => "s, ",
            (false, false) => "s,",
        };
        writeln!(
            out,
            "\t{n:>10} occupied /{prefix}{suffix} {:>10.6}% of 2^{prefix}",
            percent_of(n, prefix)
        )?;
    }
    Ok(())
}

/// One row per occupied block at each row level of `structure`, finer
/// blocks before the block that holds them and the total row last. An
/// IPv4 structure covers only the IPv4 addresses of the set.
pub fn write_network_structure(
    out: &mut dyn Write,
    set: &IpSet,
    structure: &NetStructure,
    layout: &TextLayout,
) -> EngineResult<()> {
    let (offset, lo, hi) = if structure.is_v6() {
        (0, 0, u128::MAX)
    } else {
        (V4_OFFSET, V4_MAPPED_BASE, V4_MAPPED_LAST)
    };
    let spans: Vec<(u128, u128)> = set
        .spans()
        .filter_map(|(s, e)| {
            let (s, e) = (s.max(lo), e.min(hi));
            (s <= e).then_some((s, e))
        })
        .collect();
    let mut printer = StructurePrinter {
        out,
        spans: &spans,
        structure,
        layout,
        offset,
    };
    printer.level(0, lo, hi)
}

struct StructurePrinter<'a> {
    out: &'a mut dyn Write,
    spans: &'a [(u128, u128)],
    structure: &'a NetStructure,
    layout: &'a TextLayout,
    offset: u32,
}

impl StructurePrinter<'_> {
    fn level(&mut self, depth: usize, lo: u128, hi: u128) -> EngineResult<()> {
        let Some(&prefix) = self.structure.rows().get(depth) else {
            return Ok(());
        };
        let host = host_mask(u32::from(prefix) + self.offset);
        // The total row is printed even for an empty set.
        let starts = if prefix == 0 {
            vec![lo & !host]
        } else {
            block_starts(clip(self.spans, lo, hi), host)
        };
        for start in starts {
            let end = start | host;
            self.level(depth + 1, start, end)?;
            self.row(depth, prefix, start, end)?;
        }
        Ok(())
    }

    fn row(&mut self, depth: usize, prefix: u8, start: u128, end: u128) -> EngineResult<()> {
        let v6 = self.structure.is_v6();
        let label = if prefix == 0 {
            "TOTAL".to_string()
        } else {
            format!("{}/{prefix}", show_address(start, v6))
        };
        let mut line = if self.layout.aligned {
            let indent = depth * 2;
            let width = if v6 { 43 } else { 18 };
            format!("{:indent$}{label:<width$}", "")
        } else {
            label
        };
        line.push(self.layout.delimiter);

        let hosts = clip(self.spans, start, end).fold(0u128, |acc, (s, e)| {
            acc.saturating_add(span_size(s, e))
        });
        line.push_str(&format!(" {hosts}"));
        if self.structure.summarize() {
            line.push_str(" host");
            line.push_str(plural(hosts));
            let levels: Vec<u8> = self.structure.summary_levels(prefix).collect();
            for (i, level) in levels.iter().enumerate() {
                let joiner = match (i, levels.len()) {
                    (0, _) => " in",
                    (i, n) if i + 1 < n => ",",
                    (_, 2) => " and",
                    _ => ", and",
                };
                let n = occupied_blocks(clip(self.spans, start, end), u32::from(*level) + self.offset);
                line.push_str(&format!("{joiner} {n} /{level}{}", plural(n)));
            }
        }
        writeln!(self.out, "{line}")?;
        Ok(())
    }
}

/// Spans of `spans` that fall inside `[lo, hi]`, trimmed to it.
fn clip(spans: &[(u128, u128)], lo: u128, hi: u128) -> impl Iterator<Item = (u128, u128)> + '_ {
    let first = spans.partition_point(|(_, e)| *e < lo);
    spans[first..]
        .iter()
        .take_while(move |(s, _)| *s <= hi)
        .map(move |(s, e)| ((*s).max(lo), (*e).min(hi)))
}

/// First address of every block touched by ascending disjoint spans.
fn block_starts(spans: impl Iterator<Item = (u128, u128)>, host: u128) -> Vec<u128> {
    let mut starts: Vec<u128> = Vec::new();
    for (lo, hi) in spans {
        let mut start = lo & !host;
        loop {
            if starts.last() != Some(&start) {
                starts.push(start);
            }
            let end = start | host;
            if end >= hi {
                break;
            }
            start = end + 1;
        }
    }
    starts
}

/// Number of distinct blocks of 128-bit prefix length `prefix128`
/// touched by ascending disjoint spans.
fn occupied_blocks(spans: impl Iterator<Item = (u128, u128)>, prefix128: u32) -> u128 {
    let shift = 128 - prefix128.min(128);
    let block = |value: u128| value.checked_shr(shift).unwrap_or(0);
    let mut total = 0u128;
    let mut last = None;
    for (lo, hi) in spans {
        let (first, end) = (block(lo), block(hi));
        let fresh = if last == Some(first) {
            end - first
        } else {
            (end - first).saturating_add(1)
        };
        total = total.saturating_add(fresh);
        last = Some(end);
    }
    total
}

fn span_size(lo: u128, hi: u128) -> u128 {
    (hi - lo).saturating_add(1)
}

fn show_address(value: u128, v6: bool) -> String {
    addr::from_u128(value, v6).map_or_else(|| value.to_string(), |ip| ip.to_string())
}

fn address_width(v6: bool) -> usize {
    if v6 {
        39
    } else {
        15
    }
}

fn plural(n: u128) -> &'static str {
    if n == 1 {
        ""
    } else {
        "s"
    }
}

fn percent_of(n: u128, bits: u32) -> f64 {
    100.0 * n as f64 / 2f64.powi(bits as i32)
}
