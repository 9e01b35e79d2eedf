//! Derived views of an aggregate store

use tracing::debug;

use crate::aggbag::record::{read_unsigned, read_value};
use crate::aggbag::store::AggBag;
use crate::bag::{Bag, NUMERIC_KEY_MAX};
use crate::error::{EngineError, EngineResult};
use crate::field::{Domain, FieldType, Role, Value};
use crate::ipset::{IpSet, IpVersion};

impl AggBag {
    /// Collapse the store onto one key field and one counter field.
    ///
    /// Numeric keys above `u32::MAX` are clamped to it. Rows that share
    /// the chosen key are summed, saturating.
    pub fn to_bag(&self, key_field: FieldType, counter_field: FieldType) -> EngineResult<Bag> {
        if key_field.role() != Role::Key {
            return Err(EngineError::FieldRole(key_field));
        }
        if counter_field.role() != Role::Counter {
            return Err(EngineError::FieldRole(counter_field));
        }
        let key_spec = self
            .key_fields()
            .spec(key_field)
            .ok_or(EngineError::MissingField(key_field))?;
        let counter_spec = self
            .counter_fields()
            .spec(counter_field)
            .ok_or(EngineError::MissingField(counter_field))?;

        let mut bag = Bag::new(key_field, counter_field)?;
        for (key, counter) in self.iter() {
            let value = match read_value(key_spec, key.as_bytes()) {
                Value::Unsigned(v) => Value::Unsigned(v.min(NUMERIC_KEY_MAX)),
                ip => ip,
            };
            let count = read_unsigned(&counter.as_bytes()[counter_spec.range()]);
            bag.add(value, count)?;
        }
        debug!(rows = self.len(), entries = bag.len(), key = %key_field, "converted aggbag to bag");
        Ok(bag)
    }

    /// Addresses of the first key field for every row with a non-zero
    /// counter. The set's family follows the field's.
    pub fn to_ipset(&self) -> EngineResult<IpSet> {
        let first = self
            .key_fields()
            .get(0)
            .ok_or(EngineError::EmptyFieldList("key"))?;
        let version = match first.field.domain() {
            Domain::Ipv4 => IpVersion::V4,
            Domain::Ipv6 => IpVersion::V6,
            Domain::Unsigned => return Err(EngineError::TypeMismatch(first.field)),
        };

        let mut set = IpSet::new(version);
        for (key, counter) in self.iter() {
            if counter.is_zero() {
                continue;
            }
            if let Value::Ip(ip) = read_value(first, key.as_bytes()) {
                set.insert_address(ip)?;
            }
        }
        set.clean();
        debug!(rows = self.len(), addresses = %set.count(), "converted aggbag to ipset");
        Ok(set)
    }
}
