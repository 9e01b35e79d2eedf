//! Single-key, single-counter map
//!
//! A bag pairs one key field with one 64-bit counter. Keys live in the
//! unified 128-bit space so IPv4, IPv6 and numeric keys share one
//! ordered map.
//!
//! File body after the common header:
//!
//! ```text
//! u16  key field id
//! u16  counter field id
//! records until end of stream:
//!   key      16 octets for address keys, 4 for numeric keys
//!   counter  u64
//! ```

use std::collections::BTreeMap;
use std::io::{Read, Write};
use std::net::{IpAddr, Ipv6Addr};

use tracing::debug;

use crate::addr;
use crate::codec::{self, FormatId, Persist};
use crate::error::{EngineError, EngineResult};
use crate::field::{Domain, FieldType, Role, Value};

/// Largest numeric key; numeric keys are stored in 4 octets.
pub(crate) const NUMERIC_KEY_MAX: u64 = u32::MAX as u64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bag {
    key_field: FieldType,
    counter_field: FieldType,
    entries: BTreeMap<u128, u64>,
}

impl Bag {
    pub fn new(key_field: FieldType, counter_field: FieldType) -> EngineResult<Self> {
        if key_field.role() != Role::Key {
            return Err(EngineError::FieldRole(key_field));
        }
        if counter_field.role() != Role::Counter {
            return Err(EngineError::FieldRole(counter_field));
        }
        Ok(Self {
            key_field,
            counter_field,
            entries: BTreeMap::new(),
        })
    }

    pub fn key_field(&self) -> FieldType {
        self.key_field
    }

    pub fn counter_field(&self) -> FieldType {
        self.counter_field
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Add `count` to the counter for `key`, saturating at `u64::MAX`.
    /// Adding zero does not create an entry.
    pub fn add(&mut self, key: Value, count: u64) -> EngineResult<()> {
        let key = self.encode_key(key)?;
        if count == 0 {
            return Ok(());
        }
        let slot = self.entries.entry(key).or_insert(0);
        *slot = slot.saturating_add(count);
        Ok(())
    }

    /// Counter for `key`; zero when absent.
    pub fn get(&self, key: Value) -> EngineResult<u64> {
        let key = self.encode_key(key)?;
        Ok(self.entries.get(&key).copied().unwrap_or(0))
    }

    /// Entries in ascending key order.
    pub fn iter(&self) -> impl Iterator<Item = (Value, u64)> + '_ {
        self.entries
            .iter()
            .map(|(key, count)| (self.decode_key(*key), *count))
    }

    fn key_width(&self) -> usize {
        if self.key_field.is_ip() {
            16
        } else {
            4
        }
    }

    fn encode_key(&self, key: Value) -> EngineResult<u128> {
        match (self.key_field.domain(), key) {
            (Domain::Unsigned, Value::Unsigned(v)) => {
                if v > NUMERIC_KEY_MAX {
                    return Err(EngineError::ValueTooLarge {
                        field: self.key_field,
                        value: v,
                        width: 4,
                    });
                }
                Ok(u128::from(v))
            }
            (Domain::Ipv4, Value::Ip(ip)) => addr::as_v4(ip)
                .map(|v4| addr::to_u128(v4.into()))
                .ok_or(EngineError::TypeMismatch(self.key_field)),
            (Domain::Ipv6, Value::Ip(ip)) => Ok(addr::to_u128(ip)),
            _ => Err(EngineError::TypeMismatch(self.key_field)),
        }
    }

    fn decode_key(&self, key: u128) -> Value {
        match self.key_field.domain() {
            Domain::Unsigned => Value::Unsigned(u32::try_from(key).map_or(NUMERIC_KEY_MAX, u64::from)),
            Domain::Ipv4 => {
                Value::Ip(addr::from_u128(key, false).unwrap_or(IpAddr::V6(Ipv6Addr::from(key))))
            }
            Domain::Ipv6 => Value::Ip(IpAddr::V6(Ipv6Addr::from(key))),
        }
    }
}

impl Persist for Bag {
    const FORMAT: FormatId = FormatId::Bag;

    fn write_body(&self, w: &mut dyn Write) -> EngineResult<()> {
        w.write_all(&self.key_field.id().to_be_bytes())?;
        w.write_all(&self.counter_field.id().to_be_bytes())?;
        let width = self.key_width();
        for (key, count) in &self.entries {
            w.write_all(&key.to_be_bytes()[16 - width..])?;
            w.write_all(&count.to_be_bytes())?;
        }
        debug!(entries = self.entries.len(), key = %self.key_field, "wrote bag");
        Ok(())
    }

    fn read_body(r: &mut dyn Read) -> EngineResult<Self> {
        let key_field = read_field(r, Role::Key)?;
        let counter_field = read_field(r, Role::Counter)?;
        let mut bag = Bag::new(key_field, counter_field)?;

        let width = bag.key_width();
        let mut record = vec![0u8; width + 8];
        while codec::read_record(r, &mut record)? {
            let mut octets = [0u8; 16];
            octets[16 - width..].copy_from_slice(&record[..width]);
            let key = u128::from_be_bytes(octets);
            if key_field.domain() == Domain::Ipv4 && !addr::is_v4_mapped(key) {
                return Err(EngineError::Format(format!(
                    "{key_field} key is not an IPv4 address"
                )));
            }
            let mut count = [0u8; 8];
            count.copy_from_slice(&record[width..]);
            let count = u64::from_be_bytes(count);
            if count > 0 {
                let slot = bag.entries.entry(key).or_insert(0);
                *slot = slot.saturating_add(count);
            }
        }
        debug!(entries = bag.entries.len(), key = %key_field, "read bag");
        Ok(bag)
    }
}

fn read_field(r: &mut dyn Read, role: Role) -> EngineResult<FieldType> {
    let id = codec::read_u16(r, "bag field id")?;
    let field = FieldType::from_id(id)
        .ok_or_else(|| EngineError::Format(format!("unknown field id {id}")))?;
    if field.role() != role {
        return Err(EngineError::Format(format!(
            "{field} cannot be a bag {}",
            role.as_str()
        )));
    }
    Ok(field)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn ip(text: &str) -> Value {
        Value::Ip(text.parse::<IpAddr>().unwrap())
    }

    #[test]
    fn test_add_saturates_and_orders() {
        let mut bag = Bag::new(FieldType::DPort, FieldType::Records).unwrap();
        bag.add(Value::Unsigned(443), 5).unwrap();
        bag.add(Value::Unsigned(80), u64::MAX - 1).unwrap();
        bag.add(Value::Unsigned(80), 10).unwrap();
        bag.add(Value::Unsigned(22), 0).unwrap();

        assert_eq!(bag.len(), 2);
        assert_eq!(bag.get(Value::Unsigned(80)).unwrap(), u64::MAX);
        assert_eq!(bag.get(Value::Unsigned(22)).unwrap(), 0);
        let keys: Vec<Value> = bag.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec![Value::Unsigned(80), Value::Unsigned(443)]);
    }

    #[test]
    fn test_numeric_keys_stay_within_four_octets() {
        let mut bag = Bag::new(FieldType::CustomKey, FieldType::Records).unwrap();
        bag.add(Value::Unsigned(NUMERIC_KEY_MAX), 1).unwrap();
        assert!(matches!(
            bag.add(Value::Unsigned(NUMERIC_KEY_MAX + 1), 1),
            Err(EngineError::ValueTooLarge { width: 4, .. })
        ));
        assert_eq!(bag.decode_key(1u128 << 40), Value::Unsigned(NUMERIC_KEY_MAX));
        assert_eq!(
            bag.iter().collect::<Vec<_>>(),
            vec![(Value::Unsigned(NUMERIC_KEY_MAX), 1)]
        );
    }

    #[test]
    fn test_key_checks() {
        assert!(matches!(
            Bag::new(FieldType::Records, FieldType::SumBytes),
            Err(EngineError::FieldRole(FieldType::Records))
        ));
        let mut bag = Bag::new(FieldType::SIpv4, FieldType::SumBytes).unwrap();
        assert!(matches!(
            bag.add(ip("2001:db8::1"), 1),
            Err(EngineError::TypeMismatch(FieldType::SIpv4))
        ));
        assert!(bag.add(Value::Unsigned(1), 1).is_err());
        bag.add(ip("::ffff:10.0.0.1"), 1).unwrap();
        assert_eq!(bag.get(ip("10.0.0.1")).unwrap(), 1);

        let mut ports = Bag::new(FieldType::SPort, FieldType::Records).unwrap();
        assert!(matches!(
            ports.add(Value::Unsigned(1 << 32), 1),
            Err(EngineError::ValueTooLarge { .. })
        ));
    }

    #[test]
    fn test_round_trip() {
        let mut bag = Bag::new(FieldType::SIpv4, FieldType::SumPackets).unwrap();
        bag.add(ip("10.0.0.1"), 7).unwrap();
        bag.add(ip("192.168.1.1"), 9).unwrap();

        let mut buf = Vec::new();
        bag.write_to(&mut buf).unwrap();
        assert_eq!(buf.len(), 6 + 4 + 2 * 24);
        let back = Bag::read_from(&mut Cursor::new(buf)).unwrap();
        assert_eq!(back, bag);
        assert_eq!(back.iter().next(), Some((ip("10.0.0.1"), 7)));

        let mut ports = Bag::new(FieldType::DPort, FieldType::Records).unwrap();
        ports.add(Value::Unsigned(53), 2).unwrap();
        let mut buf = Vec::new();
        ports.write_to(&mut buf).unwrap();
        assert_eq!(buf.len(), 6 + 4 + 12);
        assert_eq!(Bag::read_from(&mut Cursor::new(buf)).unwrap(), ports);
    }

    #[test]
    fn test_rejects_bad_bodies() {
        let mut bag = Bag::new(FieldType::DPort, FieldType::Records).unwrap();
        bag.add(Value::Unsigned(53), 2).unwrap();
        let mut buf = Vec::new();
        bag.write_to(&mut buf).unwrap();

        let mut truncated = buf.clone();
        truncated.pop();
        assert!(matches!(
            Bag::read_from(&mut Cursor::new(truncated)),
            Err(EngineError::Format(_))
        ));

        let mut swapped = buf.clone();
        swapped[6..8].copy_from_slice(&FieldType::Records.id().to_be_bytes());
        assert!(Bag::read_from(&mut Cursor::new(swapped)).is_err());

        let mut unknown = buf;
        unknown[6..8].copy_from_slice(&999u16.to_be_bytes());
        assert!(Bag::read_from(&mut Cursor::new(unknown)).is_err());
    }
}
