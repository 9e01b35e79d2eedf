//! Descriptor table for every supported key and counter field
//!
//! All engine code consults this table for widths, value domains and
//! text conversion instead of switching on individual field types.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};

/// Identifier of a key or counter field. The discriminants are the
/// identifiers written to disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(u16)]
pub enum FieldType {
    SIpv4 = 0,
    DIpv4 = 1,
    SPort = 2,
    DPort = 3,
    Protocol = 4,
    Packets = 5,
    Bytes = 6,
    Flags = 7,
    STime = 8,
    Duration = 9,
    ETime = 10,
    Sensor = 11,
    Input = 12,
    Output = 13,
    NhIpv4 = 14,
    InitialFlags = 15,
    SessionFlags = 16,
    Attributes = 17,
    Application = 18,
    Class = 19,
    Type = 20,
    IcmpType = 24,
    IcmpCode = 25,
    SIpv6 = 26,
    DIpv6 = 27,
    NhIpv6 = 28,
    AnyIpv4 = 29,
    AnyIpv6 = 30,
    AnyPort = 31,
    AnySnmp = 32,
    AnyTime = 33,
    CustomKey = 34,
    SipCountry = 35,
    DipCountry = 36,
    AnyCountry = 37,
    SipPmap = 38,
    DipPmap = 39,
    AnyIpPmap = 40,
    SportPmap = 41,
    DportPmap = 42,
    AnyPortPmap = 43,
    Records = 0xc000,
    SumPackets = 0xc001,
    SumBytes = 0xc002,
    SumDuration = 0xc003,
    CustomCounter = 0xc004,
}

/// Whether a field belongs to the key or to the counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Key,
    Counter,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Key => "key",
            Role::Counter => "counter",
        }
    }
}

/// The kind of value a field holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Domain {
    Ipv4,
    Ipv6,
    Unsigned,
}

/// How a field's value is read from and written as text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Semantic {
    Number,
    Address,
    Time,
    TcpFlags,
    Attributes,
    Sensor,
    Class,
    FlowType,
    Country,
    Custom,
}

#[derive(Debug, Clone, Copy)]
pub struct FieldInfo {
    pub field: FieldType,
    pub name: &'static str,
    pub role: Role,
    pub domain: Domain,
    /// Default encoded width in octets.
    pub width: u8,
    pub semantic: Semantic,
}

const fn key(
    field: FieldType,
    name: &'static str,
    domain: Domain,
    width: u8,
    semantic: Semantic,
) -> FieldInfo {
    FieldInfo {
        field,
        name,
        role: Role::Key,
        domain,
        width,
        semantic,
    }
}

const fn counter(field: FieldType, name: &'static str, semantic: Semantic) -> FieldInfo {
    FieldInfo {
        field,
        name,
        role: Role::Counter,
        domain: Domain::Unsigned,
        width: 8,
        semantic,
    }
}

use Domain::{Ipv4, Ipv6, Unsigned};
use Semantic::*;

/// Canonical registry order: keys by id, then counters by id. Entry `i`
/// describes the field whose [`FieldType::slot`] is `i`.
const TABLE: [FieldInfo; 46] = [
    key(FieldType::SIpv4, "sIPv4", Ipv4, 4, Address),
    key(FieldType::DIpv4, "dIPv4", Ipv4, 4, Address),
    key(FieldType::SPort, "sPort", Unsigned, 2, Number),
    key(FieldType::DPort, "dPort", Unsigned, 2, Number),
    key(FieldType::Protocol, "protocol", Unsigned, 1, Number),
    key(FieldType::Packets, "packets", Unsigned, 4, Number),
    key(FieldType::Bytes, "bytes", Unsigned, 4, Number),
    key(FieldType::Flags, "flags", Unsigned, 1, TcpFlags),
    key(FieldType::STime, "sTime", Unsigned, 4, Time),
    key(FieldType::Duration, "duration", Unsigned, 4, Number),
    key(FieldType::ETime, "eTime", Unsigned, 4, Time),
    key(FieldType::Sensor, "sensor", Unsigned, 2, Semantic::Sensor),
    key(FieldType::Input, "input", Unsigned, 2, Number),
    key(FieldType::Output, "output", Unsigned, 2, Number),
    key(FieldType::NhIpv4, "nhIPv4", Ipv4, 4, Address),
    key(FieldType::InitialFlags, "initialFlags", Unsigned, 1, TcpFlags),
    key(FieldType::SessionFlags, "sessionFlags", Unsigned, 1, TcpFlags),
    key(FieldType::Attributes, "attributes", Unsigned, 1, Semantic::Attributes),
    key(FieldType::Application, "application", Unsigned, 2, Number),
    key(FieldType::Class, "class", Unsigned, 1, Semantic::Class),
    key(FieldType::Type, "type", Unsigned, 1, FlowType),
    key(FieldType::IcmpType, "icmpType", Unsigned, 1, Number),
    key(FieldType::IcmpCode, "icmpCode", Unsigned, 1, Number),
    key(FieldType::SIpv6, "sIPv6", Ipv6, 16, Address),
    key(FieldType::DIpv6, "dIPv6", Ipv6, 16, Address),
    key(FieldType::NhIpv6, "nhIPv6", Ipv6, 16, Address),
    key(FieldType::AnyIpv4, "any-IPv4", Ipv4, 4, Address),
    key(FieldType::AnyIpv6, "any-IPv6", Ipv6, 16, Address),
    key(FieldType::AnyPort, "any-port", Unsigned, 2, Number),
    key(FieldType::AnySnmp, "any-snmp", Unsigned, 2, Number),
    key(FieldType::AnyTime, "any-time", Unsigned, 4, Time),
    key(FieldType::CustomKey, "custom-key", Unsigned, 4, Custom),
    key(FieldType::SipCountry, "scc", Unsigned, 2, Country),
    key(FieldType::DipCountry, "dcc", Unsigned, 2, Country),
    key(FieldType::AnyCountry, "any-cc", Unsigned, 2, Country),
    key(FieldType::SipPmap, "sip-pmap", Unsigned, 4, Number),
    key(FieldType::DipPmap, "dip-pmap", Unsigned, 4, Number),
    key(FieldType::AnyIpPmap, "any-ip-pmap", Unsigned, 4, Number),
    key(FieldType::SportPmap, "sport-pmap", Unsigned, 4, Number),
    key(FieldType::DportPmap, "dport-pmap", Unsigned, 4, Number),
    key(FieldType::AnyPortPmap, "any-port-pmap", Unsigned, 4, Number),
    counter(FieldType::Records, "records", Number),
    counter(FieldType::SumPackets, "sum-packets", Number),
    counter(FieldType::SumBytes, "sum-bytes", Number),
    counter(FieldType::SumDuration, "sum-duration", Number),
    counter(FieldType::CustomCounter, "custom-counter", Custom),
];

const _: () = {
    let mut i = 0;
    while i < TABLE.len() {
        assert!(TABLE[i].field.slot() == i, "registry entry out of slot order");
        i += 1;
    }
};

static FIELDS: [FieldInfo; 46] = TABLE;

impl FieldType {
    pub fn info(self) -> &'static FieldInfo {
        &FIELDS[self.slot()]
    }

    /// Position of the field in the registry table. Key ids 21..=23 are
    /// unassigned; counter ids start at 0xc000.
    const fn slot(self) -> usize {
        let id = self as usize;
        match self.role_of_id() {
            Role::Key if id <= FieldType::Type as usize => id,
            Role::Key => id - 3,
            Role::Counter => id - FieldType::Records as usize + FieldType::AnyPortPmap as usize - 2,
        }
    }

    const fn role_of_id(self) -> Role {
        if (self as u16) < FieldType::Records as u16 {
            Role::Key
        } else {
            Role::Counter
        }
    }

    pub fn id(self) -> u16 {
        self as u16
    }

    pub fn from_id(id: u16) -> Option<Self> {
        FIELDS.iter().find(|info| info.field as u16 == id).map(|info| info.field)
    }

    pub fn name(self) -> &'static str {
        self.info().name
    }

    pub fn role(self) -> Role {
        self.info().role
    }

    pub fn domain(self) -> Domain {
        self.info().domain
    }

    pub fn is_ip(self) -> bool {
        matches!(self.domain(), Domain::Ipv4 | Domain::Ipv6)
    }

    pub fn is_custom(self) -> bool {
        self.info().semantic == Semantic::Custom
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Find a field by name. Matching is case-insensitive and accepts any
/// unambiguous prefix; an exact match always wins.
pub fn lookup(name: &str) -> EngineResult<FieldType> {
    lookup_among(name, FIELDS.iter())
}

/// Like [`lookup`], restricted to fields of one role.
pub fn lookup_in(name: &str, role: Role) -> EngineResult<FieldType> {
    lookup_among(name, FIELDS.iter().filter(|info| info.role == role))
}

fn lookup_among<'a>(
    name: &str,
    candidates: impl Iterator<Item = &'a FieldInfo>,
) -> EngineResult<FieldType> {
    let wanted = name.trim();
    if wanted.is_empty() {
        return Err(EngineError::NoSuchField(name.to_string()));
    }
    let lowered = wanted.to_ascii_lowercase();

    let mut matches = Vec::new();
    for info in candidates {
        if info.name.eq_ignore_ascii_case(wanted) {
            return Ok(info.field);
        }
        if info.name.to_ascii_lowercase().starts_with(&lowered) {
            matches.push(info);
        }
    }

    match matches.as_slice() {
        [] => Err(EngineError::NoSuchField(wanted.to_string())),
        [only] => Ok(only.field),
        many => Err(EngineError::AmbiguousName {
            name: wanted.to_string(),
            candidates: many.iter().map(|i| i.name).collect::<Vec<_>>().join(", "),
        }),
    }
}

/// All fields of `role` in canonical registry order. The iterator is
/// cheap to clone, so callers can restart it freely.
pub fn iterate(role: Role) -> impl Iterator<Item = FieldType> + Clone {
    FIELDS
        .iter()
        .filter(move |info| info.role == role)
        .map(|info| info.field)
}

/// Encoded width of `field`. Only custom fields accept a caller-chosen
/// width, which must be 1, 2, 4 or 8 octets.
pub fn width_of(field: FieldType, custom_width: Option<u8>) -> EngineResult<u8> {
    let info = field.info();
    match custom_width {
        None => Ok(info.width),
        Some(width) if field.is_custom() => {
            if matches!(width, 1 | 2 | 4 | 8) {
                Ok(width)
            } else {
                Err(EngineError::InvalidArgument(format!(
                    "width {width} is not valid for {field}; use 1, 2, 4 or 8"
                )))
            }
        }
        Some(width) if width == info.width => Ok(width),
        Some(width) => Err(EngineError::InvalidArgument(format!(
            "{field} has a fixed width of {}, not {width}",
            info.width
        ))),
    }
}

/// Largest unsigned value representable in `width` octets.
pub fn max_for_width(width: u8) -> u64 {
    if width >= 8 {
        u64::MAX
    } else {
        (1u64 << (u32::from(width) * 8)) - 1
    }
}
