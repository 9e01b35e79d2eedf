use std::collections::btree_map;
use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::debug;

use crate::aggbag::layout::FieldList;
use crate::aggbag::record::{read_unsigned, write_unsigned, Aggregate, AggregateRef};
use crate::error::{EngineError, EngineResult};
use crate::field::{max_for_width, FieldType, Role};

/// Associative store of encoded keys to encoded counters.
///
/// Entries are kept in a `BTreeMap` keyed by the key bytes, so iteration
/// is in ascending key order and stable for an unmodified store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AggBag {
    key_layout: Arc<FieldList>,
    counter_layout: Arc<FieldList>,
    entries: BTreeMap<Vec<u8>, Vec<u8>>,
}

#[derive(Clone, Copy)]
enum Combine {
    Add,
    Subtract,
}

impl AggBag {
    pub fn new(key: FieldList, counter: FieldList) -> EngineResult<Self> {
        if let Some(spec) = key.iter().find(|s| s.field.role() != Role::Key) {
            return Err(EngineError::FieldRole(spec.field));
        }
        if let Some(spec) = counter.iter().find(|s| s.field.role() != Role::Counter) {
            return Err(EngineError::FieldRole(spec.field));
        }
        Ok(Self {
            key_layout: Arc::new(key),
            counter_layout: Arc::new(counter),
            entries: BTreeMap::new(),
        })
    }

    /// Store with default field widths.
    pub fn from_fields(keys: &[FieldType], counters: &[FieldType]) -> EngineResult<Self> {
        Self::new(
            FieldList::new(Role::Key, keys)?,
            FieldList::new(Role::Counter, counters)?,
        )
    }

    pub fn key_fields(&self) -> &FieldList {
        &self.key_layout
    }

    pub fn counter_fields(&self) -> &FieldList {
        &self.counter_layout
    }

    /// A zeroed key bound to this store's key layout.
    pub fn new_key(&self) -> Aggregate {
        Aggregate::new(Arc::clone(&self.key_layout))
    }

    /// A zeroed counter bound to this store's counter layout.
    pub fn new_counter(&self) -> Aggregate {
        Aggregate::new(Arc::clone(&self.counter_layout))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Accumulate `counter` into the entry for `key`, creating it when
    /// absent. Each counter field saturates at its maximum.
    pub fn add(&mut self, key: &Aggregate, counter: &Aggregate) -> EngineResult<()> {
        self.check_key(key)?;
        self.check_counter(counter)?;
        self.combine_bytes(key.as_bytes(), counter.as_bytes(), Combine::Add);
        Ok(())
    }

    /// Subtract `counter` from the entry for `key`; each field floors at
    /// zero. An absent key is left absent.
    pub fn subtract(&mut self, key: &Aggregate, counter: &Aggregate) -> EngineResult<()> {
        self.check_key(key)?;
        self.check_counter(counter)?;
        self.combine_bytes(key.as_bytes(), counter.as_bytes(), Combine::Subtract);
        Ok(())
    }

    /// Overwrite the entry for `key`.
    pub fn set(&mut self, key: &Aggregate, counter: &Aggregate) -> EngineResult<()> {
        self.check_key(key)?;
        self.check_counter(counter)?;
        self.entries
            .insert(key.as_bytes().to_vec(), counter.as_bytes().to_vec());
        Ok(())
    }

    /// Remove the entry for `key`, returning whether it existed.
    pub fn remove(&mut self, key: &Aggregate) -> EngineResult<bool> {
        self.check_key(key)?;
        Ok(self.entries.remove(key.as_bytes()).is_some())
    }

    /// Counter for `key`; all zero when the key is absent.
    pub fn get(&self, key: &Aggregate) -> EngineResult<Aggregate> {
        self.check_key(key)?;
        let layout = Arc::clone(&self.counter_layout);
        Ok(match self.entries.get(key.as_bytes()) {
            Some(data) => Aggregate::from_bytes(layout, data.clone()),
            None => Aggregate::new(layout),
        })
    }

    pub fn iter(&self) -> Iter<'_> {
        Iter {
            key_layout: &self.key_layout,
            counter_layout: &self.counter_layout,
            inner: self.entries.iter(),
        }
    }

    /// Add every entry of `other`. Key fields must match exactly; the
    /// counter fields must be the same set, possibly in another order.
    pub fn add_bag(&mut self, other: &AggBag) -> EngineResult<()> {
        self.merge_bag(other, Combine::Add)
    }

    /// Subtract every entry of `other`, flooring each counter at zero.
    pub fn subtract_bag(&mut self, other: &AggBag) -> EngineResult<()> {
        self.merge_bag(other, Combine::Subtract)
    }

    fn merge_bag(&mut self, other: &AggBag, op: Combine) -> EngineResult<()> {
        if *self.key_layout != *other.key_layout {
            return Err(EngineError::FieldListMismatch("key"));
        }
        if !self.counter_layout.same_fields(&other.counter_layout) {
            return Err(EngineError::FieldListMismatch("counter"));
        }

        let same_counter_layout = *self.counter_layout == *other.counter_layout;
        let mut scratch = vec![0u8; self.counter_layout.width()];
        for (key, counter) in &other.entries {
            let counter = if same_counter_layout {
                counter.as_slice()
            } else {
                self.reencode_counter(&other.counter_layout, counter, &mut scratch);
                scratch.as_slice()
            };
            self.combine_bytes(key, counter, op);
        }
        debug!(entries = self.entries.len(), merged = other.entries.len(), "merged aggbag");
        Ok(())
    }

    /// Re-lay `data` from `source` into this store's counter layout,
    /// clamping values wider than the target field.
    fn reencode_counter(&self, source: &FieldList, data: &[u8], out: &mut [u8]) {
        for spec in self.counter_layout.iter() {
            let value = source
                .spec(spec.field)
                .map_or(0, |s| read_unsigned(&data[s.range()]));
            write_unsigned(&mut out[spec.range()], value.min(max_for_width(spec.width)));
        }
    }

    fn combine_bytes(&mut self, key: &[u8], counter: &[u8], op: Combine) {
        match self.entries.get_mut(key) {
            Some(existing) => {
                for spec in self.counter_layout.iter() {
                    let range = spec.range();
                    let current = read_unsigned(&existing[range.clone()]);
                    let delta = read_unsigned(&counter[range.clone()]);
                    let updated = match op {
                        Combine::Add => current
                            .saturating_add(delta)
                            .min(max_for_width(spec.width)),
                        Combine::Subtract => current.saturating_sub(delta),
                    };
                    write_unsigned(&mut existing[range], updated);
                }
            }
            None => {
                if let Combine::Add = op {
                    self.entries.insert(key.to_vec(), counter.to_vec());
                }
            }
        }
    }

    fn check_key(&self, key: &Aggregate) -> EngineResult<()> {
        if Arc::ptr_eq(key.shared_layout(), &self.key_layout) || *key.layout() == *self.key_layout
        {
            Ok(())
        } else {
            Err(EngineError::FieldListMismatch("key"))
        }
    }

    fn check_counter(&self, counter: &Aggregate) -> EngineResult<()> {
        if Arc::ptr_eq(counter.shared_layout(), &self.counter_layout)
            || *counter.layout() == *self.counter_layout
        {
            Ok(())
        } else {
            Err(EngineError::FieldListMismatch("counter"))
        }
    }

    pub(crate) fn shared_key_layout(&self) -> &Arc<FieldList> {
        &self.key_layout
    }

    pub(crate) fn shared_counter_layout(&self) -> &Arc<FieldList> {
        &self.counter_layout
    }

    /// Insert raw encoded bytes, accumulating duplicates.
    pub(crate) fn add_raw(&mut self, key: &[u8], counter: &[u8]) {
        self.combine_bytes(key, counter, Combine::Add);
    }

    pub(crate) fn counters_mut(&mut self) -> impl Iterator<Item = (&[u8], &mut Vec<u8>)> {
        self.entries.iter_mut().map(|(k, v)| (k.as_slice(), v))
    }
}

/// Iterator over `(key, counter)` views in ascending key order.
pub struct Iter<'a> {
    key_layout: &'a FieldList,
    counter_layout: &'a FieldList,
    inner: btree_map::Iter<'a, Vec<u8>, Vec<u8>>,
}

impl<'a> Iterator for Iter<'a> {
    type Item = (AggregateRef<'a>, AggregateRef<'a>);

    fn next(&mut self) -> Option<Self::Item> {
        let (key, counter) = self.inner.next()?;
        Some((
            AggregateRef::new(self.key_layout, key),
            AggregateRef::new(self.counter_layout, counter),
        ))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl<'a> IntoIterator for &'a AggBag {
    type Item = (AggregateRef<'a>, AggregateRef<'a>);
    type IntoIter = Iter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
