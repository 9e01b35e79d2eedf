//! Build an aggregate store from delimited text
//!
//! Each input column maps to a field or is ignored. Fields may also be
//! given a constant that applies to every line. When no counter field is
//! named, a `records` counter is added. A `records` value that no column
//! or constant supplies is 1 per line; any other missing value is zero.

use std::io::BufRead;

use tracing::debug;

use crate::aggbag::{AggBag, FieldList};
use crate::error::{EngineError, EngineResult};
use crate::field::{lookup, parse_value, FieldType, Role, SiteNames, Value};
use crate::text::bad_lines::BadLines;
use crate::text::reader::LineReader;

/// Column name that discards its column.
pub const IGNORE_COLUMN: &str = "ignore";

/// Parse a comma-separated column list. [`IGNORE_COLUMN`] skips a column.
pub fn parse_columns(spec: &str) -> EngineResult<Vec<Option<FieldType>>> {
    spec.split(',')
        .map(str::trim)
        .map(|name| {
            if name.eq_ignore_ascii_case(IGNORE_COLUMN) {
                Ok(None)
            } else {
                lookup(name).map(Some)
            }
        })
        .collect()
}

/// Values resolved for one line, indexed by slot. Slots are the store's
/// key fields followed by its counter fields.
#[derive(Debug, Clone)]
struct ParsedValues {
    values: Vec<Option<Value>>,
}

impl ParsedValues {
    fn with_slots(slots: usize) -> Self {
        Self {
            values: vec![None; slots],
        }
    }
}

pub struct AggBagBuilder<'a> {
    store: AggBag,
    slots: Vec<FieldType>,
    /// Slot of each input column, or `None` for an ignored column.
    columns: Vec<Option<usize>>,
    constants: ParsedValues,
    delimiter: char,
    names: &'a dyn SiteNames,
}

impl<'a> AggBagBuilder<'a> {
    /// `constants` are textual values parsed once, up front.
    pub fn new(
        columns: &[Option<FieldType>],
        constants: &[(FieldType, &str)],
        names: &'a dyn SiteNames,
    ) -> EngineResult<Self> {
        let mut named: Vec<FieldType> = Vec::new();
        for field in columns.iter().flatten() {
            if named.contains(field) {
                return Err(EngineError::InvalidArgument(format!(
                    "field {field} is mapped to more than one column"
                )));
            }
            named.push(*field);
        }
        for (field, _) in constants {
            if named.contains(field) {
                return Err(EngineError::InvalidArgument(format!(
                    "field {field} has both a column and a constant"
                )));
            }
            named.push(*field);
        }

        let keys: Vec<FieldType> = named
            .iter()
            .copied()
            .filter(|f| f.role() == Role::Key)
            .collect();
        let mut counters: Vec<FieldType> = named
            .iter()
            .copied()
            .filter(|f| f.role() == Role::Counter)
            .collect();
        if counters.is_empty() {
            counters.push(FieldType::Records);
        }
        let store = AggBag::new(
            FieldList::new(Role::Key, &keys)?,
            FieldList::new(Role::Counter, &counters)?,
        )?;

        let slots: Vec<FieldType> = store
            .key_fields()
            .fields()
            .chain(store.counter_fields().fields())
            .collect();
        let slot_of = |field: FieldType| slots.iter().position(|f| *f == field);

        let columns = columns
            .iter()
            .map(|column| column.and_then(slot_of))
            .collect();
        let mut fixed = ParsedValues::with_slots(slots.len());
        for (field, text) in constants {
            if let Some(slot) = slot_of(*field) {
                fixed.values[slot] = Some(parse_value(*field, text, names)?);
            }
        }

        Ok(Self {
            store,
            slots,
            columns,
            constants: fixed,
            delimiter: '|',
            names,
        })
    }

    pub fn with_delimiter(mut self, delimiter: char) -> Self {
        self.delimiter = delimiter;
        self
    }

    pub fn store(&self) -> &AggBag {
        &self.store
    }

    pub fn into_store(self) -> AggBag {
        self.store
    }

    /// Parse and add one line. The store is untouched when any column
    /// fails to parse or encode.
    pub fn add_line(&mut self, text: &str) -> EngineResult<()> {
        let parsed = self.parse_line(text)?;
        let mut key = self.store.new_key();
        let mut counter = self.store.new_counter();
        let key_count = self.store.key_fields().len();
        for (slot, field) in self.slots.iter().enumerate() {
            let value = parsed.values[slot].unwrap_or_else(|| default_value(*field));
            if slot < key_count {
                key.set(*field, value)?;
            } else {
                counter.set(*field, value)?;
            }
        }
        self.store.add(&key, &counter)
    }

    fn parse_line(&self, text: &str) -> EngineResult<ParsedValues> {
        let mut tokens: Vec<&str> = text.split(self.delimiter).collect();
        // A trailing delimiter is allowed.
        if tokens.len() == self.columns.len() + 1 && tokens.last().is_some_and(|t| t.trim().is_empty()) {
            tokens.pop();
        }
        if tokens.len() != self.columns.len() {
            return Err(EngineError::parse(
                "line",
                text,
                format!(
                    "expected {} columns, found {}",
                    self.columns.len(),
                    tokens.len()
                ),
            ));
        }

        let mut parsed = self.constants.clone();
        for (token, column) in tokens.iter().zip(&self.columns) {
            let Some(slot) = *column else { continue };
            let token = token.trim();
            if token.is_empty() {
                continue;
            }
            parsed.values[slot] = Some(parse_value(self.slots[slot], token, self.names)?);
        }
        Ok(parsed)
    }

    /// Add every line from `lines`, routing failures through `bad`.
    /// Returns the number of lines added.
    pub fn read_lines<R: BufRead>(
        &mut self,
        lines: LineReader<R>,
        bad: &mut BadLines,
    ) -> EngineResult<u64> {
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
            match self.add_line(&line.text) {
                Ok(()) => added += 1,
                Err(e) => bad.reject(line.number, &line.text, e)?,
            }
        }
        debug!(added, rejected = bad.count(), rows = self.store.len(), "built aggbag from text");
        Ok(added)
    }
}

fn default_value(field: FieldType) -> Value {
    match field {
        FieldType::Records => Value::Unsigned(1),
        other => Value::zero_for(other),
    }
}
