//! Binary container shared by every on-disk format
//!
//! Each file starts with a four-octet magic, a format id and a format
//! version. All integers are big-endian.

use std::fs::File;
use std::io::{BufReader, BufWriter, ErrorKind, Read, Write};
use std::path::Path;

use tracing::debug;

use crate::error::{EngineError, EngineResult};

pub const MAGIC: [u8; 4] = *b"FLAG";
pub const FORMAT_VERSION: u8 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FormatId {
    AggBag = 1,
    IpSet = 2,
    Bag = 3,
}

impl FormatId {
    fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(FormatId::AggBag),
            2 => Some(FormatId::IpSet),
            3 => Some(FormatId::Bag),
            _ => None,
        }
    }
}

pub fn write_header<W: Write + ?Sized>(w: &mut W, format: FormatId) -> EngineResult<()> {
    w.write_all(&MAGIC)?;
    w.write_all(&[format as u8, FORMAT_VERSION])?;
    Ok(())
}

pub fn read_header<R: Read + ?Sized>(r: &mut R, expected: FormatId) -> EngineResult<()> {
    let mut header = [0u8; 6];
    read_exact(r, &mut header, "file header")?;
    if header[..4] != MAGIC {
        return Err(EngineError::Format("not a flowagg file (bad magic)".to_string()));
    }
    match FormatId::from_u8(header[4]) {
        Some(found) if found == expected => {}
        Some(found) => {
            return Err(EngineError::Format(format!(
                "expected {expected:?} data, found {found:?}"
            )))
        }
        None => {
            return Err(EngineError::Format(format!(
                "unknown format id {}",
                header[4]
            )))
        }
    }
    if header[5] != FORMAT_VERSION {
        return Err(EngineError::Format(format!(
            "unsupported format version {}",
            header[5]
        )));
    }
    Ok(())
}

/// Fill `buf` completely; a short read is a format error naming `what`.
pub(crate) fn read_exact<R: Read + ?Sized>(r: &mut R, buf: &mut [u8], what: &str) -> EngineResult<()> {
    r.read_exact(buf).map_err(|e| match e.kind() {
        ErrorKind::UnexpectedEof => EngineError::Format(format!("truncated {what}")),
        _ => EngineError::Stream(e),
    })
}

/// Fill `buf` with the next record. Returns false at a clean end of
/// stream; a partial record is a format error.
pub(crate) fn read_record<R: Read + ?Sized>(r: &mut R, buf: &mut [u8]) -> EngineResult<bool> {
    let mut filled = 0;
    while filled < buf.len() {
        match r.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(EngineError::Stream(e)),
        }
    }
    match filled {
        0 => Ok(false),
        n if n == buf.len() => Ok(true),
        n => Err(EngineError::Format(format!(
            "truncated record: {n} of {} octets",
            buf.len()
        ))),
    }
}

pub(crate) fn read_u8<R: Read + ?Sized>(r: &mut R, what: &str) -> EngineResult<u8> {
    let mut buf = [0u8; 1];
    read_exact(r, &mut buf, what)?;
    Ok(buf[0])
}

pub(crate) fn read_u16<R: Read + ?Sized>(r: &mut R, what: &str) -> EngineResult<u16> {
    let mut buf = [0u8; 2];
    read_exact(r, &mut buf, what)?;
    Ok(u16::from_be_bytes(buf))
}

pub(crate) fn read_u64<R: Read + ?Sized>(r: &mut R, what: &str) -> EngineResult<u64> {
    let mut buf = [0u8; 8];
    read_exact(r, &mut buf, what)?;
    Ok(u64::from_be_bytes(buf))
}

/// A value with an on-disk representation.
pub trait Persist: Sized {
    const FORMAT: FormatId;

    /// Write everything after the common header.
    fn write_body(&self, w: &mut dyn Write) -> EngineResult<()>;

    /// Read everything after the common header. Implementations decode
    /// into a fresh value and only return it once the stream is fully
    /// validated.
    fn read_body(r: &mut dyn Read) -> EngineResult<Self>;

    fn write_to(&self, w: &mut dyn Write) -> EngineResult<()> {
        write_header(w, Self::FORMAT)?;
        self.write_body(w)
    }

    fn read_from(r: &mut dyn Read) -> EngineResult<Self> {
        read_header(r, Self::FORMAT)?;
        Self::read_body(r)
    }

    fn save(&self, path: impl AsRef<Path>) -> EngineResult<()> {
        let path = path.as_ref();
        let write = || -> EngineResult<()> {
            let mut w = BufWriter::new(File::create(path)?);
            self.write_to(&mut w)?;
            w.flush()?;
            Ok(())
        };
        write().map_err(|e| e.with_path(path))?;
        debug!(path = %path.display(), format = ?Self::FORMAT, "saved");
        Ok(())
    }

    fn load(path: impl AsRef<Path>) -> EngineResult<Self> {
        let path = path.as_ref();
        let read = || -> EngineResult<Self> {
            let mut r = BufReader::new(File::open(path)?);
            Self::read_from(&mut r)
        };
        let value = read().map_err(|e| match e {
            EngineError::Format(msg) => EngineError::Format(format!("{}: {msg}", path.display())),
            other => other.with_path(path),
        })?;
        debug!(path = %path.display(), format = ?Self::FORMAT, "loaded");
        Ok(value)
    }
}
