//! Projection and row filtering

use std::sync::Arc;

use tracing::debug;

use crate::aggbag::layout::FieldList;
use crate::aggbag::record::{read_unsigned, read_value};
use crate::aggbag::store::AggBag;
use crate::error::{EngineError, EngineResult};
use crate::field::{Domain, FieldType, Role, Value};
use crate::ipset::IpSet;

/// Which source fields a projection keeps.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum FieldSelection {
    #[default]
    All,
    /// Keep only these fields. Names absent from the source are ignored.
    Select(Vec<FieldType>),
    /// Keep every field except these.
    Remove(Vec<FieldType>),
}

impl FieldSelection {
    fn keeps(&self, field: FieldType) -> bool {
        match self {
            FieldSelection::All => true,
            FieldSelection::Select(fields) => fields.contains(&field),
            FieldSelection::Remove(fields) => !fields.contains(&field),
        }
    }
}

/// A constraint on one field. Rows that violate it have their counters
/// zeroed.
#[derive(Debug, Clone)]
pub struct RowFilter {
    pub field: FieldType,
    pub kind: FilterKind,
}

#[derive(Debug, Clone)]
pub enum FilterKind {
    /// Reject rows whose value is below the bound.
    Min(u64),
    /// Reject rows whose value is above the bound.
    Max(u64),
    /// Reject rows whose address is outside the set, or inside it when
    /// `complement` is true.
    InSet { set: Arc<IpSet>, complement: bool },
}

impl RowFilter {
    pub fn min(field: FieldType, bound: u64) -> Self {
        Self {
            field,
            kind: FilterKind::Min(bound),
        }
    }

    pub fn max(field: FieldType, bound: u64) -> Self {
        Self {
            field,
            kind: FilterKind::Max(bound),
        }
    }

    pub fn in_set(field: FieldType, set: Arc<IpSet>, complement: bool) -> Self {
        Self {
            field,
            kind: FilterKind::InSet { set, complement },
        }
    }

    fn accepts(&self, value: Value) -> bool {
        match (&self.kind, value) {
            (FilterKind::Min(bound), Value::Unsigned(v)) => v >= *bound,
            (FilterKind::Max(bound), Value::Unsigned(v)) => v <= *bound,
            (FilterKind::InSet { set, complement }, Value::Ip(ip)) => set.contains(ip) != *complement,
            _ => true,
        }
    }
}

/// Field placement resolved against a store: key or counter, and where.
#[derive(Clone, Copy)]
enum Placement {
    Key(usize),
    Counter(usize),
}

impl AggBag {
    /// Re-encode every record into a new store holding the selected
    /// fields plus `inserts`.
    ///
    /// Kept fields stay in source order; inserted fields follow. An
    /// inserted field that the selection already keeps retains its
    /// source value. The source store is never modified.
    pub fn project(
        &self,
        selection: &FieldSelection,
        inserts: &[(FieldType, Value)],
    ) -> EngineResult<AggBag> {
        let key_layout = project_layout(self.key_fields(), Role::Key, selection, inserts)?;
        let counter_layout =
            project_layout(self.counter_fields(), Role::Counter, selection, inserts)?;

        let mut output = AggBag::new(key_layout, counter_layout)?;
        let mut key_template = output.new_key();
        let mut counter_template = output.new_counter();
        for (field, value) in inserts {
            let template = match field.role() {
                Role::Key => &mut key_template,
                Role::Counter => &mut counter_template,
            };
            let from_source = match field.role() {
                Role::Key => self.key_fields().contains(*field),
                Role::Counter => self.counter_fields().contains(*field),
            } && selection.keeps(*field);
            if !from_source {
                template.set(*field, *value)?;
            }
        }

        let key_moves = copy_plan(self.key_fields(), output.key_fields());
        let counter_moves = copy_plan(self.counter_fields(), output.counter_fields());

        let mut key = key_template.as_bytes().to_vec();
        let mut counter = counter_template.as_bytes().to_vec();
        for (src_key, src_counter) in self.iter() {
            key.copy_from_slice(key_template.as_bytes());
            counter.copy_from_slice(counter_template.as_bytes());
            apply_plan(&key_moves, src_key.as_bytes(), &mut key);
            apply_plan(&counter_moves, src_counter.as_bytes(), &mut counter);
            output.add_raw(&key, &counter);
        }

        debug!(
            source = self.len(),
            projected = output.len(),
            "projected aggbag"
        );
        Ok(output)
    }

    /// Zero the counters of every row rejected by any filter, returning
    /// how many rows were zeroed. Keys are never changed. Filters on
    /// fields the store does not have are ignored.
    pub fn apply_filters(&mut self, filters: &[RowFilter]) -> EngineResult<usize> {
        let mut resolved = Vec::with_capacity(filters.len());
        for filter in filters {
            let placement = if let Some(i) = position(self.key_fields(), filter.field) {
                Placement::Key(i)
            } else if let Some(i) = position(self.counter_fields(), filter.field) {
                Placement::Counter(i)
            } else {
                debug!(field = %filter.field, "ignoring filter on field not in aggbag");
                continue;
            };
            let wants_ip = matches!(filter.kind, FilterKind::InSet { .. });
            let is_ip = matches!(filter.field.domain(), Domain::Ipv4 | Domain::Ipv6);
            if wants_ip != is_ip {
                return Err(EngineError::TypeMismatch(filter.field));
            }
            resolved.push((placement, filter));
        }
        if resolved.is_empty() {
            return Ok(0);
        }

        let key_layout = Arc::clone(self.shared_key_layout());
        let counter_layout = Arc::clone(self.shared_counter_layout());
        let mut zeroed = 0usize;
        for (key, counter) in self.counters_mut() {
            let rejected = resolved.iter().any(|(placement, filter)| {
                let value = match *placement {
                    Placement::Key(i) => key_layout.get(i).map(|spec| read_value(spec, key)),
                    Placement::Counter(i) => {
                        counter_layout.get(i).map(|spec| read_value(spec, counter.as_slice()))
                    }
                };
                value.is_some_and(|v| !filter.accepts(v))
            });
            if rejected {
                counter.iter_mut().for_each(|b| *b = 0);
                zeroed += 1;
            }
        }

        debug!(filters = filters.len(), zeroed, "applied row filters");
        Ok(zeroed)
    }

    /// Sum of a counter field over every row, saturating.
    pub fn counter_total(&self, field: FieldType) -> EngineResult<u64> {
        let spec = *self
            .counter_fields()
            .spec(field)
            .ok_or(EngineError::MissingField(field))?;
        Ok(self.iter().fold(0u64, |acc, (_, counter)| {
            acc.saturating_add(read_unsigned(&counter.as_bytes()[spec.range()]))
        }))
    }
}

fn position(list: &FieldList, field: FieldType) -> Option<usize> {
    list.iter().position(|s| s.field == field)
}

fn project_layout(
    source: &FieldList,
    role: Role,
    selection: &FieldSelection,
    inserts: &[(FieldType, Value)],
) -> EngineResult<FieldList> {
    let mut fields: Vec<(FieldType, Option<u8>)> = source
        .iter()
        .filter(|spec| selection.keeps(spec.field))
        .map(|spec| (spec.field, Some(spec.width)))
        .collect();
    for (field, _) in inserts.iter().filter(|(f, _)| f.role() == role) {
        if !fields.iter().any(|(f, _)| f == field) {
            fields.push((*field, None));
        }
    }
    if fields.is_empty() {
        return Err(EngineError::EmptyFieldList(role.as_str()));
    }
    FieldList::with_widths(role, &fields)
}

/// Byte ranges to copy from a source record into a projected one.
fn copy_plan(source: &FieldList, target: &FieldList) -> Vec<(std::ops::Range<usize>, usize)> {
    target
        .iter()
        .filter_map(|t| source.spec(t.field).map(|s| (s.range(), t.offset)))
        .collect()
}

fn apply_plan(plan: &[(std::ops::Range<usize>, usize)], source: &[u8], target: &mut [u8]) {
    for (range, offset) in plan {
        let len = range.len();
        target[*offset..*offset + len].copy_from_slice(&source[range.clone()]);
    }
}
