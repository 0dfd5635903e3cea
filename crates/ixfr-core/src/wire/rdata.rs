//! Record data
//!
//! Types the watcher needs to look inside (SOA) or that show up in nearly
//! every zone are decoded into typed variants. Everything else is carried
//! as opaque bytes so diffs over unknown types still survive intact.

use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr};

use bytes::{BufMut, Bytes, BytesMut};
use serde::{Serialize, Serializer};

use super::{Cursor, Name, Rtype};
use crate::error::{Error, Result};
use crate::serial::Serial;

/// Start of authority data
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Soa {
    /// Primary name server
    pub mname: Name,
    /// Responsible party mailbox
    pub rname: Name,
    pub serial: Serial,
    pub refresh: u32,
    pub retry: u32,
    pub expire: u32,
    pub minimum: u32,
}

impl Soa {
    /// SOA with the given serial and placeholder names/timers, as used in
    /// the authority section of an IXFR query
    pub fn with_serial(serial: Serial) -> Self {
        Self {
            mname: Name::root(),
            rname: Name::root(),
            serial,
            refresh: 0,
            retry: 0,
            expire: 0,
            minimum: 0,
        }
    }
}

/// Decoded record data, tagged by type
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordData {
    A(Ipv4Addr),
    Aaaa(Ipv6Addr),
    Ns(Name),
    Cname(Name),
    Ptr(Name),
    Mx { preference: u16, exchange: Name },
    Txt(Vec<Vec<u8>>),
    Soa(Soa),
    /// Any type not interpreted above
    Other { rtype: Rtype, data: Bytes },
}

impl RecordData {
    /// Record type of this data
    pub fn rtype(&self) -> Rtype {
        match self {
            RecordData::A(_) => Rtype::A,
            RecordData::Aaaa(_) => Rtype::AAAA,
            RecordData::Ns(_) => Rtype::NS,
            RecordData::Cname(_) => Rtype::CNAME,
            RecordData::Ptr(_) => Rtype::PTR,
            RecordData::Mx { .. } => Rtype::MX,
            RecordData::Txt(_) => Rtype::TXT,
            RecordData::Soa(_) => Rtype::SOA,
            RecordData::Other { rtype, .. } => *rtype,
        }
    }

    pub fn as_soa(&self) -> Option<&Soa> {
        match self {
            RecordData::Soa(soa) => Some(soa),
            _ => None,
        }
    }

    /// Parse `rdlen` bytes of data for `rtype` at the cursor position
    ///
    /// Typed variants must consume the data exactly.
    pub(crate) fn parse(cursor: &mut Cursor<'_>, rtype: Rtype, rdlen: usize) -> Result<Self> {
        let start = cursor.pos();
        if rdlen > cursor.remaining() {
            return Err(Error::malformed(format!(
                "{} record data of {} bytes at offset {} runs past end",
                rtype, rdlen, start
            )));
        }
        let end = start + rdlen;

        let data = match rtype {
            Rtype::A => {
                let b = cursor.bytes(rdlen.min(4))?;
                if rdlen != 4 {
                    return Err(Error::malformed(format!("A record with {} bytes", rdlen)));
                }
                RecordData::A(Ipv4Addr::new(b[0], b[1], b[2], b[3]))
            }
            Rtype::AAAA => {
                if rdlen != 16 {
                    return Err(Error::malformed(format!("AAAA record with {} bytes", rdlen)));
                }
                let mut octets = [0u8; 16];
                octets.copy_from_slice(cursor.bytes(16)?);
                RecordData::Aaaa(Ipv6Addr::from(octets))
            }
            Rtype::NS => RecordData::Ns(cursor.name()?),
            Rtype::CNAME => RecordData::Cname(cursor.name()?),
            Rtype::PTR => RecordData::Ptr(cursor.name()?),
            Rtype::MX => RecordData::Mx {
                preference: cursor.u16()?,
                exchange: cursor.name()?,
            },
            Rtype::TXT => {
                let mut strings = Vec::new();
                while cursor.pos() < end {
                    let len = cursor.u8()? as usize;
                    strings.push(cursor.bytes(len)?.to_vec());
                }
                RecordData::Txt(strings)
            }
            Rtype::SOA => RecordData::Soa(Soa {
                mname: cursor.name()?,
                rname: cursor.name()?,
                serial: Serial::from(cursor.u32()?),
                refresh: cursor.u32()?,
                retry: cursor.u32()?,
                expire: cursor.u32()?,
                minimum: cursor.u32()?,
            }),
            other => RecordData::Other {
                rtype: other,
                data: Bytes::copy_from_slice(cursor.bytes(rdlen)?),
            },
        };

        if cursor.pos() != end {
            return Err(Error::malformed(format!(
                "{} record data at offset {} declared {} bytes, decoded {}",
                rtype,
                start,
                rdlen,
                cursor.pos() as isize - start as isize
            )));
        }
        Ok(data)
    }

    /// Write the uncompressed wire form, without the length prefix
    pub(crate) fn compose(&self, buf: &mut BytesMut) {
        match self {
            RecordData::A(addr) => buf.put_slice(&addr.octets()),
            RecordData::Aaaa(addr) => buf.put_slice(&addr.octets()),
            RecordData::Ns(name) | RecordData::Cname(name) | RecordData::Ptr(name) => {
                name.compose(buf)
            }
            RecordData::Mx {
                preference,
                exchange,
            } => {
                buf.put_u16(*preference);
                exchange.compose(buf);
            }
            RecordData::Txt(strings) => {
                for s in strings {
                    let len = s.len().min(255);
                    buf.put_u8(len as u8);
                    buf.put_slice(&s[..len]);
                }
            }
            RecordData::Soa(soa) => {
                soa.mname.compose(buf);
                soa.rname.compose(buf);
                buf.put_u32(soa.serial.get());
                buf.put_u32(soa.refresh);
                buf.put_u32(soa.retry);
                buf.put_u32(soa.expire);
                buf.put_u32(soa.minimum);
            }
            RecordData::Other { data, .. } => buf.put_slice(data),
        }
    }
}

fn write_character_string(f: &mut fmt::Formatter<'_>, s: &[u8]) -> fmt::Result {
    f.write_str("\"")?;
    for &b in s {
        match b {
            b'"' | b'\\' => write!(f, "\\{}", b as char)?,
            0x20..=0x7E => write!(f, "{}", b as char)?,
            _ => write!(f, "\\{:03}", b)?,
        }
    }
    f.write_str("\"")
}

/// Zone file presentation format
impl fmt::Display for RecordData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordData::A(addr) => write!(f, "{}", addr),
            RecordData::Aaaa(addr) => write!(f, "{}", addr),
            RecordData::Ns(name) | RecordData::Cname(name) | RecordData::Ptr(name) => {
                write!(f, "{}", name)
            }
            RecordData::Mx {
                preference,
                exchange,
            } => write!(f, "{} {}", preference, exchange),
            RecordData::Txt(strings) => {
                for (i, s) in strings.iter().enumerate() {
                    if i > 0 {
                        f.write_str(" ")?;
                    }
                    write_character_string(f, s)?;
                }
                Ok(())
            }
            RecordData::Soa(soa) => write!(
                f,
                "{} {} {} {} {} {} {}",
                soa.mname, soa.rname, soa.serial, soa.refresh, soa.retry, soa.expire, soa.minimum
            ),
            // RFC 3597 generic form
            RecordData::Other { data, .. } => {
                write!(f, "\\# {}", data.len())?;
                if !data.is_empty() {
                    f.write_str(" ")?;
                    for b in data.iter() {
                        write!(f, "{:02x}", b)?;
                    }
                }
                Ok(())
            }
        }
    }
}

impl Serialize for RecordData {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}
