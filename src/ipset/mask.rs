use std::collections::BTreeMap;

use tracing::debug;

use crate::error::{EngineError, EngineResult};
use crate::ipset::{host_mask, IpSet};

impl IpSet {
    /// Replace each address by the base of its enclosing `/prefix` block,
    /// keeping one address per occupied block.
    pub fn mask(&mut self, prefix: u8) -> EngineResult<()> {
        let host = self.prefix_host_mask(prefix)?;
        if host == 0 {
            self.clean();
            return Ok(());
        }
        let step = host + 1;
        let mut bases = BTreeMap::new();
        for (lo, hi) in self.spans() {
            let first = lo & !host;
            let last = hi & !host;
            let mut base = first;
            loop {
                bases.insert(base, base);
                if base >= last {
                    break;
                }
                base += step;
            }
        }
        debug!(prefix, blocks = bases.len(), "masked ipset");
        self.replace_ranges(bases);
        self.clean();
        Ok(())
    }

    /// Replace each occupied `/prefix` block by the whole block. Blocks
    /// already larger than the prefix are unchanged.
    pub fn mask_and_fill(&mut self, prefix: u8) -> EngineResult<()> {
        let host = self.prefix_host_mask(prefix)?;
        let mut filled = self.empty_like();
        for (lo, hi) in self.spans() {
            filled.merge_span(lo & !host, hi | host);
        }
        self.replace_ranges(std::mem::take(&mut filled.ranges));
        self.clean();
        Ok(())
    }

    fn prefix_host_mask(&self, prefix: u8) -> EngineResult<u128> {
        let max = self.version().max_prefix();
        if prefix == 0 || prefix > max {
            return Err(EngineError::InvalidPrefix { prefix, max });
        }
        let offset = 128 - u32::from(max);
        Ok(host_mask(u32::from(prefix) + offset))
    }
}
