// # Wire Codec
//
// Encoding of the queries the watcher sends (SOA, IXFR, AXFR) and decoding
// of the responses it receives, in the standard DNS message format.
//
// ## Layout
//
// - `name`: domain names, including label compression on decode
// - `rdata`: typed record data (SOA and the common types), opaque otherwise
// - `message`: header, question and resource record framing
// - `query`: builders for the three queries the watcher sends
//
// Decoding never hands back a partially interpreted message: any framing
// problem fails the whole decode with `Error::MalformedMessage`.

pub mod message;
pub mod name;
pub mod query;
pub mod rdata;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{Error, Result};

pub use message::{Header, Message, Question, Record};
pub use name::Name;
pub use query::{
    axfr_query, decode_message, encode_ixfr_query, encode_soa_query, ixfr_query, soa_query,
};
pub use rdata::{RecordData, Soa};

/// Size of the fixed message header
pub const HEADER_LEN: usize = 12;

//------------ Rtype -----------------------------------------------------------

/// Resource record type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Rtype(pub u16);

impl Rtype {
    pub const A: Rtype = Rtype(1);
    pub const NS: Rtype = Rtype(2);
    pub const CNAME: Rtype = Rtype(5);
    pub const SOA: Rtype = Rtype(6);
    pub const PTR: Rtype = Rtype(12);
    pub const MX: Rtype = Rtype(15);
    pub const TXT: Rtype = Rtype(16);
    pub const AAAA: Rtype = Rtype(28);
    pub const SRV: Rtype = Rtype(33);
    pub const OPT: Rtype = Rtype(41);
    pub const DS: Rtype = Rtype(43);
    pub const RRSIG: Rtype = Rtype(46);
    pub const NSEC: Rtype = Rtype(47);
    pub const DNSKEY: Rtype = Rtype(48);
    pub const NSEC3: Rtype = Rtype(50);
    pub const NSEC3PARAM: Rtype = Rtype(51);
    pub const CAA: Rtype = Rtype(257);
    pub const IXFR: Rtype = Rtype(251);
    pub const AXFR: Rtype = Rtype(252);
    pub const ANY: Rtype = Rtype(255);

    const MNEMONICS: &'static [(Rtype, &'static str)] = &[
        (Rtype::A, "A"),
        (Rtype::NS, "NS"),
        (Rtype::CNAME, "CNAME"),
        (Rtype::SOA, "SOA"),
        (Rtype::PTR, "PTR"),
        (Rtype::MX, "MX"),
        (Rtype::TXT, "TXT"),
        (Rtype::AAAA, "AAAA"),
        (Rtype::SRV, "SRV"),
        (Rtype::OPT, "OPT"),
        (Rtype::DS, "DS"),
        (Rtype::RRSIG, "RRSIG"),
        (Rtype::NSEC, "NSEC"),
        (Rtype::DNSKEY, "DNSKEY"),
        (Rtype::NSEC3, "NSEC3"),
        (Rtype::NSEC3PARAM, "NSEC3PARAM"),
        (Rtype::CAA, "CAA"),
        (Rtype::IXFR, "IXFR"),
        (Rtype::AXFR, "AXFR"),
        (Rtype::ANY, "ANY"),
    ];
}

impl fmt::Display for Rtype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match Self::MNEMONICS.iter().find(|(rtype, _)| rtype == self) {
            Some((_, mnemonic)) => f.write_str(mnemonic),
            None => write!(f, "TYPE{}", self.0),
        }
    }
}

impl FromStr for Rtype {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let upper = s.trim().to_ascii_uppercase();
        if let Some((rtype, _)) = Self::MNEMONICS.iter().find(|(_, m)| *m == upper) {
            return Ok(*rtype);
        }
        upper
            .strip_prefix("TYPE")
            .and_then(|n| n.parse::<u16>().ok())
            .map(Rtype)
            .ok_or_else(|| Error::invalid_input(format!("unknown record type '{}'", s)))
    }
}

//------------ Class -----------------------------------------------------------

/// Resource record class
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Class(pub u16);

impl Class {
    pub const IN: Class = Class(1);
    pub const CH: Class = Class(3);
    pub const HS: Class = Class(4);
    pub const NONE: Class = Class(254);
    pub const ANY: Class = Class(255);
}

impl fmt::Display for Class {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Class::IN => f.write_str("IN"),
            Class::CH => f.write_str("CH"),
            Class::HS => f.write_str("HS"),
            Class::NONE => f.write_str("NONE"),
            Class::ANY => f.write_str("ANY"),
            Class(other) => write!(f, "CLASS{}", other),
        }
    }
}

impl FromStr for Class {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "IN" => Ok(Class::IN),
            "CH" => Ok(Class::CH),
            "HS" => Ok(Class::HS),
            "NONE" => Ok(Class::NONE),
            "ANY" => Ok(Class::ANY),
            other => other
                .strip_prefix("CLASS")
                .and_then(|n| n.parse::<u16>().ok())
                .map(Class)
                .ok_or_else(|| Error::invalid_input(format!("unknown class '{}'", s))),
        }
    }
}

//------------ Rcode -----------------------------------------------------------

/// Response code from the message header
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Rcode(pub u8);

impl Rcode {
    pub const NOERROR: Rcode = Rcode(0);
    pub const FORMERR: Rcode = Rcode(1);
    pub const SERVFAIL: Rcode = Rcode(2);
    pub const NXDOMAIN: Rcode = Rcode(3);
    pub const NOTIMP: Rcode = Rcode(4);
    pub const REFUSED: Rcode = Rcode(5);
    pub const NOTAUTH: Rcode = Rcode(9);
}

impl Default for Rcode {
    fn default() -> Self {
        Rcode::NOERROR
    }
}

impl fmt::Display for Rcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Rcode::NOERROR => f.write_str("NOERROR"),
            Rcode::FORMERR => f.write_str("FORMERR"),
            Rcode::SERVFAIL => f.write_str("SERVFAIL"),
            Rcode::NXDOMAIN => f.write_str("NXDOMAIN"),
            Rcode::NOTIMP => f.write_str("NOTIMP"),
            Rcode::REFUSED => f.write_str("REFUSED"),
            Rcode::NOTAUTH => f.write_str("NOTAUTH"),
            Rcode(other) => write!(f, "RCODE{}", other),
        }
    }
}

//--- Serde as presentation strings

macro_rules! serde_via_str {
    ($ty:ty) => {
        impl Serialize for $ty {
            fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
                serializer.collect_str(self)
            }
        }

        impl<'de> Deserialize<'de> for $ty {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
                let s = String::deserialize(deserializer)?;
                s.parse().map_err(serde::de::Error::custom)
            }
        }
    };
}

serde_via_str!(Rtype);
serde_via_str!(Class);
serde_via_str!(Name);

//------------ Cursor ----------------------------------------------------------

/// Bounds-checked reader over a complete message
///
/// Keeps the whole message around so compressed names can follow pointers
/// back into earlier parts of it.
pub(crate) struct Cursor<'a> {
    msg: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    pub(crate) fn new(msg: &'a [u8]) -> Self {
        Self { msg, pos: 0 }
    }

    pub(crate) fn pos(&self) -> usize {
        self.pos
    }

    pub(crate) fn remaining(&self) -> usize {
        self.msg.len() - self.pos
    }

    pub(crate) fn u8(&mut self) -> Result<u8> {
        Ok(self.bytes(1)?[0])
    }

    pub(crate) fn u16(&mut self) -> Result<u16> {
        let b = self.bytes(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    pub(crate) fn u32(&mut self) -> Result<u32> {
        let b = self.bytes(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub(crate) fn bytes(&mut self, len: usize) -> Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.msg.len())
            .ok_or_else(|| {
                Error::malformed(format!(
                    "need {} bytes at offset {}, message is {} bytes",
                    len,
                    self.pos,
                    self.msg.len()
                ))
            })?;
        let slice = &self.msg[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    pub(crate) fn name(&mut self) -> Result<Name> {
        let (name, next) = Name::parse(self.msg, self.pos)?;
        self.pos = next;
        Ok(name)
    }
}
