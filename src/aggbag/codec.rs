//! AggBag file body
//!
//! ```text
//! u16  key field count
//! u16  counter field count
//! per field, keys first:
//!   u16  field id
//!   u8   width in octets
//! records until end of stream, each key width + counter width octets
//! ```
//!
//! The record layout is derived entirely from the field table.

use std::io::{Read, Write};

use tracing::debug;

use crate::aggbag::layout::FieldList;
use crate::aggbag::store::AggBag;
use crate::codec::{self, FormatId, Persist};
use crate::error::{EngineError, EngineResult};
use crate::field::{FieldType, Role};

impl Persist for AggBag {
    const FORMAT: FormatId = FormatId::AggBag;

    fn write_body(&self, w: &mut dyn Write) -> EngineResult<()> {
        let keys = self.key_fields();
        let counters = self.counter_fields();
        w.write_all(&(keys.len() as u16).to_be_bytes())?;
        w.write_all(&(counters.len() as u16).to_be_bytes())?;
        for spec in keys.iter().chain(counters.iter()) {
            w.write_all(&spec.field.id().to_be_bytes())?;
            w.write_all(&[spec.width])?;
        }
        for (key, counter) in self.iter() {
            w.write_all(key.as_bytes())?;
            w.write_all(counter.as_bytes())?;
        }
        debug!(rows = self.len(), keys = keys.len(), counters = counters.len(), "wrote aggbag");
        Ok(())
    }

    fn read_body(r: &mut dyn Read) -> EngineResult<Self> {
        let key_count = codec::read_u16(r, "key field count")?;
        let counter_count = codec::read_u16(r, "counter field count")?;
        let keys = read_field_list(r, Role::Key, key_count)?;
        let counters = read_field_list(r, Role::Counter, counter_count)?;

        let key_width = keys.width();
        let mut store = AggBag::new(keys, counters)?;
        let mut record = vec![0u8; key_width + store.counter_fields().width()];
        while codec::read_record(r, &mut record)? {
            let (key, counter) = record.split_at(key_width);
            store.add_raw(key, counter);
        }
        debug!(rows = store.len(), "read aggbag");
        Ok(store)
    }
}

fn read_field_list(r: &mut dyn Read, role: Role, count: u16) -> EngineResult<FieldList> {
    if count == 0 {
        return Err(EngineError::Format(format!(
            "file has no {} fields",
            role.as_str()
        )));
    }
    let mut fields = Vec::with_capacity(usize::from(count));
    for _ in 0..count {
        let id = codec::read_u16(r, "field id")?;
        let width = codec::read_u8(r, "field width")?;
        let field = FieldType::from_id(id)
            .ok_or_else(|| EngineError::Format(format!("unknown field id {id}")))?;
        if field.role() != role {
            return Err(EngineError::Format(format!(
                "{field} listed among the {} fields",
                role.as_str()
            )));
        }
        if fields.iter().any(|(f, _)| *f == field) {
            return Err(EngineError::Format(format!("{field} listed twice")));
        }
        fields.push((field, Some(width)));
    }
    FieldList::with_widths(role, &fields).map_err(|e| EngineError::Format(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use std::net::IpAddr;

    fn sample() -> AggBag {
        let mut store = AggBag::from_fields(
            &[FieldType::SIpv6, FieldType::Protocol],
            &[FieldType::Records, FieldType::SumBytes],
        )
        .unwrap();
        for (addr, proto, bytes) in [("2001:db8::1", 6, 100), ("10.0.0.1", 17, 50)] {
            let mut key = store.new_key();
            key.set_ip(FieldType::SIpv6, addr.parse::<IpAddr>().unwrap())
                .unwrap();
            key.set_unsigned(FieldType::Protocol, proto).unwrap();
            let mut counter = store.new_counter();
            counter.set_unsigned(FieldType::Records, 1).unwrap();
            counter.set_unsigned(FieldType::SumBytes, bytes).unwrap();
            store.add(&key, &counter).unwrap();
        }
        store
    }

    #[test]
    fn test_round_trip() {
        let store = sample();
        let mut buf = Vec::new();
        store.write_to(&mut buf).unwrap();
        // header, counts, four field entries, two 17+16 octet records
        assert_eq!(buf.len(), 6 + 4 + 4 * 3 + 2 * 33);
        let back = AggBag::read_from(&mut Cursor::new(buf)).unwrap();
        assert_eq!(back, store);
    }

    #[test]
    fn test_truncated_record_is_rejected() {
        let mut buf = Vec::new();
        sample().write_to(&mut buf).unwrap();
        buf.truncate(buf.len() - 3);
        assert!(matches!(
            AggBag::read_from(&mut Cursor::new(buf)),
            Err(EngineError::Format(_))
        ));
    }

    fn header(fields: &[(u16, u8)], keys: u16) -> Vec<u8> {
        let mut buf = Vec::new();
        codec::write_header(&mut buf, FormatId::AggBag).unwrap();
        buf.extend_from_slice(&keys.to_be_bytes());
        buf.extend_from_slice(&(fields.len() as u16 - keys).to_be_bytes());
        for (id, width) in fields {
            buf.extend_from_slice(&id.to_be_bytes());
            buf.push(*width);
        }
        buf
    }

    #[test]
    fn test_bad_field_tables_are_rejected() {
        let records = FieldType::Records.id();
        let proto = FieldType::Protocol.id();

        let ok = header(&[(proto, 1), (records, 8)], 1);
        assert!(AggBag::read_from(&mut Cursor::new(ok)).unwrap().is_empty());

        for bad in [
            header(&[(proto, 2), (records, 8)], 1),
            header(&[(999, 1), (records, 8)], 1),
            header(&[(records, 8), (proto, 1)], 1),
            header(&[(proto, 1), (proto, 1), (records, 8)], 2),
            header(&[(records, 8)], 0),
        ] {
            assert!(matches!(
                AggBag::read_from(&mut Cursor::new(bad)),
                Err(EngineError::Format(_))
            ));
        }
    }

    #[test]
    fn test_duplicate_records_accumulate() {
        let records = FieldType::Records.id();
        let proto = FieldType::Protocol.id();
        let mut buf = header(&[(proto, 1), (records, 8)], 1);
        for _ in 0..2 {
            buf.push(6);
            buf.extend_from_slice(&5u64.to_be_bytes());
        }
        let store = AggBag::read_from(&mut Cursor::new(buf)).unwrap();
        assert_eq!(store.len(), 1);
        let (_, counter) = store.iter().next().unwrap();
        assert_eq!(counter.get_unsigned(FieldType::Records).unwrap(), 10);
    }
}
