//! Random sampling of set members
//!
//! Both samplers draw only from the caller's generator, so a seeded
//! generator reproduces the same sample.

use std::collections::BTreeSet;

use rand::Rng;
use tracing::debug;

use crate::error::{EngineError, EngineResult};
use crate::ipset::IpSet;

/// Sets at or below this size are sampled address by address.
const SEQUENTIAL_LIMIT: u128 = 1 << 20;

impl IpSet {
    /// Keep each address independently with probability `ratio`.
    ///
    /// Gaps between kept addresses are drawn from the geometric
    /// distribution, so the cost is proportional to the number of
    /// addresses kept (or dropped, when `ratio` exceeds one half) rather
    /// than to the size of the set.
    pub fn sample_ratio<R: Rng>(&self, ratio: f64, rng: &mut R) -> EngineResult<IpSet> {
        if !(0.0..=1.0).contains(&ratio) {
            return Err(EngineError::InvalidArgument(format!(
                "sample ratio {ratio} is not within 0.0..=1.0"
            )));
        }
        if ratio == 0.0 {
            return Ok(self.empty_like());
        }
        if ratio == 1.0 {
            return Ok(self.clone());
        }

        // Draw the rarer outcome: kept addresses, or dropped ones.
        let invert = ratio > 0.5;
        let p = if invert { 1.0 - ratio } else { ratio };
        let log_q = (-p).ln_1p();
        let gap = |rng: &mut R| -> u128 {
            let u: f64 = 1.0 - rng.random::<f64>();
            let skip = (u.ln() / log_q).floor();
            if skip >= u128::MAX as f64 {
                u128::MAX
            } else {
                skip as u128
            }
        };

        let mut out = self.empty_like();
        let mut skip = gap(rng);
        for (lo, hi) in self.spans() {
            let mut pos = lo;
            let mut keep_from = Some(lo);
            loop {
                let remaining = hi - pos;
                if skip > remaining {
                    skip -= remaining + 1;
                    break;
                }
                let chosen = pos + skip;
                if invert {
                    if let Some(from) = keep_from {
                        if chosen > from {
                            out.merge_span(from, chosen - 1);
                        }
                    }
                    keep_from = chosen.checked_add(1);
                } else {
                    out.merge_span(chosen, chosen);
                }
                skip = gap(rng);
                match chosen.checked_add(1) {
                    Some(next) if chosen < hi => pos = next,
                    _ => break,
                }
            }
            if invert {
                if let Some(from) = keep_from {
                    if from <= hi {
                        out.merge_span(from, hi);
                    }
                }
            }
        }
        out.clean();
        debug!(ratio, input = %self.count(), output = %out.count(), "sampled ipset by ratio");
        Ok(out)
    }

    /// Choose exactly `min(size, count)` addresses uniformly without
    /// replacement.
    pub fn sample_size<R: Rng>(&self, size: u128, rng: &mut R) -> EngineResult<IpSet> {
        let available = self.count();
        if size >= available {
            return Ok(self.clone());
        }
        if size == 0 {
            return Ok(self.empty_like());
        }

        let mut out = if available <= SEQUENTIAL_LIMIT {
            self.sample_sequential(size, available, rng)
        } else {
            self.sample_offsets(size, available, rng)
        };
        out.clean();
        debug!(input = %available, output = %out.count(), "sampled ipset by size");
        Ok(out)
    }

    /// Selection sampling: each address is taken with probability
    /// wanted / available at the time it is visited.
    fn sample_sequential<R: Rng>(
        &self,
        size: u128,
        total: u128,
        rng: &mut R,
    ) -> IpSet {
        let mut out = self.empty_like();
        let mut wanted = size;
        let mut available = total;
        'spans: for (lo, hi) in self.spans() {
            let mut pos = lo;
            loop {
                if wanted == 0 {
                    break 'spans;
                }
                if wanted == available {
                    out.merge_span(pos, hi);
                    available -= hi - pos + 1;
                    wanted -= hi - pos + 1;
                    break;
                }
                if rng.random_range(0..available) < wanted {
                    out.merge_span(pos, pos);
                    wanted -= 1;
                }
                available -= 1;
                if pos == hi {
                    break;
                }
                pos += 1;
            }
        }
        out
    }

    /// Floyd's selection of distinct offsets into the set. When more than
    /// half the set is wanted, the offsets name the addresses to drop.
    fn sample_offsets<R: Rng>(&self, size: u128, total: u128, rng: &mut R) -> IpSet {
        let invert = size > total / 2;
        let draw = if invert { total - size } else { size };

        let mut offsets = BTreeSet::new();
        for j in (total - draw)..total {
            let t = rng.random_range(0..=j);
            if !offsets.insert(t) {
                offsets.insert(j);
            }
        }

        let mut out = self.empty_like();
        let mut chosen = offsets.into_iter().peekable();
        let mut base = 0u128;
        for (lo, hi) in self.spans() {
            let len = (hi - lo).saturating_add(1);
            let mut keep_from = Some(lo);
            while let Some(&offset) = chosen.peek() {
                if offset >= base + len {
                    break;
                }
                chosen.next();
                let addr = lo + (offset - base);
                if invert {
                    if let Some(from) = keep_from.filter(|from| addr > *from) {
                        out.merge_span(from, addr - 1);
                    }
                    keep_from = addr.checked_add(1);
                } else {
                    out.merge_span(addr, addr);
                }
            }
            if let Some(from) = keep_from.filter(|from| invert && *from <= hi) {
                out.merge_span(from, hi);
            }
            base = base.saturating_add(len);
        }
        out
    }
}
