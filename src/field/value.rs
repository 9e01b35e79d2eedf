//! Text conversion for field values
//!
//! Parsing and formatting dispatch on the field's [`Semantic`], so the
//! same rules apply wherever a value crosses the text boundary.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime};

use crate::addr;
use crate::error::{EngineError, EngineResult};
use crate::field::names::SiteNames;
use crate::field::registry::{max_for_width, Domain, FieldType, Semantic};

/// A decoded field value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Value {
    Unsigned(u64),
    Ip(IpAddr),
}

impl Value {
    pub fn as_unsigned(&self) -> Option<u64> {
        match self {
            Value::Unsigned(v) => Some(*v),
            Value::Ip(_) => None,
        }
    }

    pub fn as_ip(&self) -> Option<IpAddr> {
        match self {
            Value::Ip(ip) => Some(*ip),
            Value::Unsigned(_) => None,
        }
    }

    /// Zero value in the field's domain.
    pub fn zero_for(field: FieldType) -> Self {
        match field.domain() {
            Domain::Ipv4 => Value::Ip(IpAddr::V4(Ipv4Addr::UNSPECIFIED)),
            Domain::Ipv6 => Value::Ip(IpAddr::V6(Ipv6Addr::UNSPECIFIED)),
            Domain::Unsigned => Value::Unsigned(0),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Unsigned(v) => write!(f, "{v}"),
            Value::Ip(ip) => write!(f, "{ip}"),
        }
    }
}

const TCP_FLAG_LETTERS: [(char, u8); 8] = [
    ('F', 0x01),
    ('S', 0x02),
    ('R', 0x04),
    ('P', 0x08),
    ('A', 0x10),
    ('U', 0x20),
    ('E', 0x40),
    ('C', 0x80),
];

const ATTRIBUTE_LETTERS: [(char, u8); 4] = [('T', 0x20), ('C', 0x40), ('F', 0x08), ('S', 0x10)];

const TIME_FORMAT: &str = "%Y/%m/%dT%H:%M:%S";

/// Country code meaning "unknown".
pub const UNKNOWN_COUNTRY: u16 = ((b'-' as u16) << 8) | b'-' as u16;

/// Parse a textual token for `field`.
pub fn parse_value(field: FieldType, text: &str, names: &dyn SiteNames) -> EngineResult<Value> {
    let token = text.trim();
    if token.is_empty() {
        return Err(EngineError::parse(field, text, "empty value"));
    }
    let info = field.info();

    let value = match info.semantic {
        Semantic::Address => {
            let ip: IpAddr = token
                .parse()
                .map_err(|_| EngineError::parse(field, token, "not an IP address"))?;
            match info.domain {
                Domain::Ipv4 => match addr::as_v4(ip) {
                    Some(v4) => Value::Ip(IpAddr::V4(v4)),
                    None => {
                        return Err(EngineError::parse(
                            field,
                            token,
                            "IPv6 address cannot be stored in an IPv4 field",
                        ))
                    }
                },
                _ => Value::Ip(ip),
            }
        }
        Semantic::Number => Value::Unsigned(parse_number(field, token, max_for_width(info.width))?),
        Semantic::Custom => Value::Unsigned(parse_number(field, token, u64::MAX)?),
        Semantic::Time => Value::Unsigned(parse_time(field, token)?),
        Semantic::TcpFlags => Value::Unsigned(parse_letters(field, token, &TCP_FLAG_LETTERS)?),
        Semantic::Attributes => Value::Unsigned(parse_letters(field, token, &ATTRIBUTE_LETTERS)?),
        Semantic::Sensor => match names.sensor_id(token) {
            Some(id) => Value::Unsigned(u64::from(id)),
            None => Value::Unsigned(parse_number(field, token, u64::from(u16::MAX))?),
        },
        Semantic::Class => match names.class_id(token) {
            Some(id) => Value::Unsigned(u64::from(id)),
            None => Value::Unsigned(parse_number(field, token, u64::from(u8::MAX))?),
        },
        Semantic::FlowType => match names.flowtype_id(token) {
            Some(id) => Value::Unsigned(u64::from(id)),
            None => Value::Unsigned(parse_number(field, token, u64::from(u8::MAX))?),
        },
        Semantic::Country => Value::Unsigned(u64::from(parse_country(field, token)?)),
    };
    Ok(value)
}

/// Format `value` for `field`; the inverse of [`parse_value`].
pub fn format_value(field: FieldType, value: Value, names: &dyn SiteNames) -> String {
    let number = match value {
        Value::Ip(ip) => return ip.to_string(),
        Value::Unsigned(n) => n,
    };

    match field.info().semantic {
        Semantic::Time => u32::try_from(number)
            .ok()
            .and_then(|secs| DateTime::from_timestamp(i64::from(secs), 0))
            .map(|dt| dt.format(TIME_FORMAT).to_string())
            .unwrap_or_else(|| number.to_string()),
        Semantic::TcpFlags => format_letters(number, &TCP_FLAG_LETTERS),
        Semantic::Attributes => format_letters(number, &ATTRIBUTE_LETTERS),
        Semantic::Sensor => u16::try_from(number)
            .ok()
            .and_then(|id| names.sensor_name(id))
            .unwrap_or_else(|| number.to_string()),
        Semantic::Class => u8::try_from(number)
            .ok()
            .and_then(|id| names.class_name(id))
            .unwrap_or_else(|| number.to_string()),
        Semantic::FlowType => u8::try_from(number)
            .ok()
            .and_then(|id| names.flowtype_name(id))
            .unwrap_or_else(|| number.to_string()),
        Semantic::Country => format_country(number),
        Semantic::Number | Semantic::Custom | Semantic::Address => number.to_string(),
    }
}

fn parse_number(field: FieldType, token: &str, max: u64) -> EngineResult<u64> {
    let value = token
        .parse::<u64>()
        .map_err(|e| EngineError::parse(field, token, e))?;
    if value > max {
        return Err(EngineError::parse(
            field,
            token,
            format!("value exceeds maximum of {max}"),
        ));
    }
    Ok(value)
}

fn parse_letters(field: FieldType, token: &str, letters: &[(char, u8)]) -> EngineResult<u64> {
    if token.bytes().all(|b| b.is_ascii_digit()) {
        return parse_number(field, token, u64::from(u8::MAX));
    }
    let mut bits = 0u8;
    for c in token.chars().filter(|c| !c.is_whitespace()) {
        let upper = c.to_ascii_uppercase();
        let (_, bit) = letters
            .iter()
            .find(|(letter, _)| *letter == upper)
            .ok_or_else(|| EngineError::parse(field, token, format!("unknown flag '{c}'")))?;
        bits |= bit;
    }
    Ok(u64::from(bits))
}

fn format_letters(value: u64, letters: &[(char, u8)]) -> String {
    letters
        .iter()
        .filter(|(_, bit)| value & u64::from(*bit) != 0)
        .map(|(letter, _)| *letter)
        .collect()
}

fn parse_country(field: FieldType, token: &str) -> EngineResult<u16> {
    match token.as_bytes() {
        [b'-', b'-'] => Ok(UNKNOWN_COUNTRY),
        [a, b] if a.is_ascii_alphabetic() && b.is_ascii_alphabetic() => {
            Ok((u16::from(a.to_ascii_lowercase()) << 8) | u16::from(b.to_ascii_lowercase()))
        }
        _ => Err(EngineError::parse(
            field,
            token,
            "expected a two-letter country code",
        )),
    }
}

fn format_country(value: u64) -> String {
    let hi = ((value >> 8) & 0xff) as u8;
    let lo = (value & 0xff) as u8;
    let valid = |b: u8| b.is_ascii_lowercase() || b == b'-';
    if value <= u64::from(u16::MAX) && valid(hi) && valid(lo) {
        format!("{}{}", hi as char, lo as char)
    } else {
        "??".to_string()
    }
}

/// Seconds since the epoch from `YYYY/MM/DD[:T]HH[:MM[:SS[.fff]]]` or a
/// plain integer. Fractional seconds are dropped.
fn parse_time(field: FieldType, token: &str) -> EngineResult<u64> {
    if token.bytes().all(|b| b.is_ascii_digit()) {
        return parse_number(field, token, u64::from(u32::MAX));
    }

    let bad = |reason: &str| EngineError::parse(field, token, reason);

    let (date_part, time_part) = match token.get(10..11) {
        Some(":" | "T" | "t") => (&token[..10], Some(&token[11..])),
        _ => (token, None),
    };
    let date =
        NaiveDate::parse_from_str(date_part, "%Y/%m/%d").map_err(|_| bad("invalid date"))?;

    let mut hms = [0u32; 3];
    if let Some(time) = time_part {
        let pieces: Vec<&str> = time.split(':').collect();
        if pieces.is_empty() || pieces.len() > 3 {
            return Err(bad("invalid time of day"));
        }
        for (slot, piece) in hms.iter_mut().zip(&pieces) {
            let whole = piece.split('.').next().unwrap_or(piece);
            *slot = whole.parse().map_err(|_| bad("invalid time of day"))?;
        }
    }
    let time = NaiveTime::from_hms_opt(hms[0], hms[1], hms[2])
        .ok_or_else(|| bad("invalid time of day"))?;

    let secs = NaiveDateTime::new(date, time).and_utc().timestamp();
    u32::try_from(secs)
        .map(u64::from)
        .map_err(|_| bad("time is outside the representable range"))
}
