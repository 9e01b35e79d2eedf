//! Encoded keys and counters
//!
//! A key or counter is the concatenation of its fields' big-endian
//! encodings, laid out by a [`FieldList`]. Byte-wise comparison of two
//! keys therefore orders them field by field, numerically.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::sync::Arc;

use crate::addr;
use crate::aggbag::layout::{FieldList, FieldSpec};
use crate::error::{EngineError, EngineResult};
use crate::field::{max_for_width, Domain, FieldType, Value};

pub(crate) fn read_unsigned(bytes: &[u8]) -> u64 {
    bytes
        .iter()
        .fold(0u64, |acc, b| (acc << 8) | u64::from(*b))
}

pub(crate) fn write_unsigned(bytes: &mut [u8], value: u64) {
    let encoded = value.to_be_bytes();
    let width = bytes.len().min(8);
    bytes.copy_from_slice(&encoded[8 - width..]);
}

/// Decode the value of `spec` from an encoded key or counter.
pub(crate) fn read_value(spec: &FieldSpec, data: &[u8]) -> Value {
    let bytes = &data[spec.range()];
    match spec.field.domain() {
        Domain::Ipv4 => Value::Ip(IpAddr::V4(Ipv4Addr::from(read_unsigned(bytes) as u32))),
        Domain::Ipv6 => {
            let mut octets = [0u8; 16];
            octets.copy_from_slice(bytes);
            Value::Ip(IpAddr::V6(Ipv6Addr::from(octets)))
        }
        Domain::Unsigned => Value::Unsigned(read_unsigned(bytes)),
    }
}

/// Encode `value` for `spec`, checking domain and range.
pub(crate) fn write_value(spec: &FieldSpec, data: &mut [u8], value: Value) -> EngineResult<()> {
    let field = spec.field;
    let bytes = &mut data[spec.range()];
    match (field.domain(), value) {
        (Domain::Unsigned, Value::Unsigned(v)) => {
            if v > max_for_width(spec.width) {
                return Err(EngineError::ValueTooLarge {
                    field,
                    value: v,
                    width: spec.width,
                });
            }
            write_unsigned(bytes, v);
        }
        (Domain::Ipv4, Value::Ip(ip)) => {
            let v4 = addr::as_v4(ip).ok_or(EngineError::TypeMismatch(field))?;
            bytes.copy_from_slice(&v4.octets());
        }
        (Domain::Ipv6, Value::Ip(ip)) => bytes.copy_from_slice(&addr::as_v6(ip).octets()),
        _ => return Err(EngineError::TypeMismatch(field)),
    }
    Ok(())
}

/// Borrowed view of an encoded key or counter.
#[derive(Debug, Clone, Copy)]
pub struct AggregateRef<'a> {
    layout: &'a FieldList,
    data: &'a [u8],
}

impl<'a> AggregateRef<'a> {
    pub(crate) fn new(layout: &'a FieldList, data: &'a [u8]) -> Self {
        Self { layout, data }
    }

    pub fn layout(&self) -> &'a FieldList {
        self.layout
    }

    pub fn as_bytes(&self) -> &'a [u8] {
        self.data
    }

    pub fn get(&self, field: FieldType) -> EngineResult<Value> {
        let spec = self
            .layout
            .spec(field)
            .ok_or(EngineError::MissingField(field))?;
        Ok(read_value(spec, self.data))
    }

    pub fn get_unsigned(&self, field: FieldType) -> EngineResult<u64> {
        self.get(field)?
            .as_unsigned()
            .ok_or(EngineError::TypeMismatch(field))
    }

    pub fn get_ip(&self, field: FieldType) -> EngineResult<IpAddr> {
        self.get(field)?
            .as_ip()
            .ok_or(EngineError::TypeMismatch(field))
    }

    /// Every field with its value, in layout order.
    pub fn values(&self) -> impl Iterator<Item = (FieldType, Value)> + 'a {
        let data = self.data;
        self.layout
            .iter()
            .map(move |spec| (spec.field, read_value(spec, data)))
    }

    pub fn is_zero(&self) -> bool {
        self.data.iter().all(|b| *b == 0)
    }

    pub fn to_aggregate(&self) -> Aggregate {
        Aggregate {
            layout: Arc::new(self.layout.clone()),
            data: self.data.to_vec(),
        }
    }
}

/// An owned key or counter bound to a field layout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Aggregate {
    layout: Arc<FieldList>,
    data: Vec<u8>,
}

impl Aggregate {
    /// All-zero value for `layout`.
    pub fn new(layout: Arc<FieldList>) -> Self {
        let data = vec![0u8; layout.width()];
        Self { layout, data }
    }

    pub(crate) fn from_bytes(layout: Arc<FieldList>, data: Vec<u8>) -> Self {
        debug_assert_eq!(layout.width(), data.len());
        Self { layout, data }
    }

    pub fn layout(&self) -> &FieldList {
        &self.layout
    }

    pub(crate) fn shared_layout(&self) -> &Arc<FieldList> {
        &self.layout
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn view(&self) -> AggregateRef<'_> {
        AggregateRef::new(&self.layout, &self.data)
    }

    pub fn get(&self, field: FieldType) -> EngineResult<Value> {
        self.view().get(field)
    }

    pub fn get_unsigned(&self, field: FieldType) -> EngineResult<u64> {
        self.view().get_unsigned(field)
    }

    pub fn get_ip(&self, field: FieldType) -> EngineResult<IpAddr> {
        self.view().get_ip(field)
    }

    pub fn set(&mut self, field: FieldType, value: Value) -> EngineResult<()> {
        let spec = *self
            .layout
            .spec(field)
            .ok_or(EngineError::MissingField(field))?;
        write_value(&spec, &mut self.data, value)
    }

    pub fn set_unsigned(&mut self, field: FieldType, value: u64) -> EngineResult<()> {
        self.set(field, Value::Unsigned(value))
    }

    pub fn set_ip(&mut self, field: FieldType, ip: IpAddr) -> EngineResult<()> {
        self.set(field, Value::Ip(ip))
    }

    /// Walk the fields in layout order, setting each in turn.
    pub fn cursor(&mut self) -> FieldCursor<'_> {
        FieldCursor {
            target: self,
            position: 0,
        }
    }
}

/// Positional writer over the fields of an [`Aggregate`].
pub struct FieldCursor<'a> {
    target: &'a mut Aggregate,
    position: usize,
}

impl FieldCursor<'_> {
    /// Field at the current position, or `None` once every field is set.
    pub fn field(&self) -> Option<FieldType> {
        self.target.layout.get(self.position).map(|s| s.field)
    }

    pub fn is_complete(&self) -> bool {
        self.position >= self.target.layout.len()
    }

    /// Move to the next field. Returns false when the cursor has moved
    /// past the last field.
    pub fn advance(&mut self) -> bool {
        if !self.is_complete() {
            self.position += 1;
        }
        !self.is_complete()
    }

    pub fn set_unsigned(&mut self, value: u64) -> EngineResult<()> {
        self.set(Value::Unsigned(value))
    }

    pub fn set_ip(&mut self, ip: IpAddr) -> EngineResult<()> {
        self.set(Value::Ip(ip))
    }

    fn set(&mut self, value: Value) -> EngineResult<()> {
        let spec = *self.target.layout.get(self.position).ok_or_else(|| {
            EngineError::InvalidArgument("field cursor is past the last field".to_string())
        })?;
        write_value(&spec, &mut self.target.data, value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::Role;

    fn key_layout() -> Arc<FieldList> {
        Arc::new(
            FieldList::new(
                Role::Key,
                &[FieldType::SIpv4, FieldType::SPort, FieldType::SIpv6],
            )
            .unwrap(),
        )
    }

    #[test]
    fn test_cursor_sets_fields_in_order() {
        let mut key = Aggregate::new(key_layout());
        let mut cursor = key.cursor();
        assert_eq!(cursor.field(), Some(FieldType::SIpv4));
        cursor.set_ip("10.1.2.3".parse().unwrap()).unwrap();
        assert!(cursor.advance());
        cursor.set_unsigned(443).unwrap();
        assert!(cursor.advance());
        cursor.set_ip("2001:db8::1".parse().unwrap()).unwrap();
        assert!(!cursor.advance());
        assert!(cursor.is_complete());
        assert!(cursor.set_unsigned(1).is_err());

        assert_eq!(key.get_ip(FieldType::SIpv4).unwrap(), "10.1.2.3".parse::<IpAddr>().unwrap());
        assert_eq!(key.get_unsigned(FieldType::SPort).unwrap(), 443);
        assert_eq!(&key.as_bytes()[..6], &[10, 1, 2, 3, 0x01, 0xbb]);
    }

    #[test]
    fn test_wrong_setter_is_type_mismatch() {
        let mut key = Aggregate::new(key_layout());
        let mut cursor = key.cursor();
        assert!(matches!(
            cursor.set_unsigned(5),
            Err(EngineError::TypeMismatch(FieldType::SIpv4))
        ));
        assert!(matches!(
            key.set_ip(FieldType::SPort, "10.0.0.1".parse().unwrap()),
            Err(EngineError::TypeMismatch(FieldType::SPort))
        ));
        assert!(matches!(
            key.set_ip(FieldType::SIpv4, "2001:db8::1".parse().unwrap()),
            Err(EngineError::TypeMismatch(FieldType::SIpv4))
        ));
    }

    #[test]
    fn test_value_too_large() {
        let mut key = Aggregate::new(key_layout());
        assert!(matches!(
            key.set_unsigned(FieldType::SPort, 70_000),
            Err(EngineError::ValueTooLarge { width: 2, .. })
        ));
        assert!(matches!(
            key.get(FieldType::DPort),
            Err(EngineError::MissingField(FieldType::DPort))
        ));
    }

    #[test]
    fn test_v4_address_in_v6_field_is_mapped() {
        let mut key = Aggregate::new(key_layout());
        key.set_ip(FieldType::SIpv6, "10.0.0.1".parse().unwrap()).unwrap();
        assert_eq!(
            key.get_ip(FieldType::SIpv6).unwrap(),
            "::ffff:10.0.0.1".parse::<IpAddr>().unwrap()
        );
    }

    #[test]
    fn test_unsigned_codec_widths() {
        let mut buf = [0u8; 2];
        write_unsigned(&mut buf, 0x1234);
        assert_eq!(buf, [0x12, 0x34]);
        assert_eq!(read_unsigned(&buf), 0x1234);
        let mut wide = [0u8; 8];
        write_unsigned(&mut wide, u64::MAX);
        assert_eq!(read_unsigned(&wide), u64::MAX);
    }
}
