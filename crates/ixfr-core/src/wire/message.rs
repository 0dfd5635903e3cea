//! Message framing: header, questions and resource records

use bytes::{BufMut, BytesMut};

use super::{Class, Cursor, HEADER_LEN, Name, Rcode, RecordData, Rtype};
use crate::error::{Error, Result};

/// Fixed message header, minus the section counts
///
/// Counts are derived from the section vectors when encoding and checked
/// against the actual content when decoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Header {
    pub id: u16,
    /// Set on responses
    pub qr: bool,
    pub opcode: u8,
    /// Authoritative answer
    pub aa: bool,
    /// Truncated
    pub tc: bool,
    /// Recursion desired
    pub rd: bool,
    /// Recursion available
    pub ra: bool,
    pub rcode: Rcode,
}

impl Header {
    fn flags(&self) -> u16 {
        let mut flags = ((self.opcode as u16) & 0x0F) << 11 | (self.rcode.0 as u16 & 0x0F);
        if self.qr {
            flags |= 1 << 15;
        }
        if self.aa {
            flags |= 1 << 10;
        }
        if self.tc {
            flags |= 1 << 9;
        }
        if self.rd {
            flags |= 1 << 8;
        }
        if self.ra {
            flags |= 1 << 7;
        }
        flags
    }

    fn from_flags(id: u16, flags: u16) -> Self {
        Self {
            id,
            qr: flags & (1 << 15) != 0,
            opcode: ((flags >> 11) & 0x0F) as u8,
            aa: flags & (1 << 10) != 0,
            tc: flags & (1 << 9) != 0,
            rd: flags & (1 << 8) != 0,
            ra: flags & (1 << 7) != 0,
            rcode: Rcode((flags & 0x0F) as u8),
        }
    }
}

/// Question section entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Question {
    pub name: Name,
    pub qtype: Rtype,
    pub qclass: Class,
}

impl Question {
    pub fn new(name: Name, qtype: Rtype) -> Self {
        Self {
            name,
            qtype,
            qclass: Class::IN,
        }
    }
}

/// A resource record from any section
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub name: Name,
    pub class: Class,
    pub ttl: u32,
    pub data: RecordData,
}

impl Record {
    pub fn new(name: Name, class: Class, ttl: u32, data: RecordData) -> Self {
        Self {
            name,
            class,
            ttl,
            data,
        }
    }

    pub fn rtype(&self) -> Rtype {
        self.data.rtype()
    }

    fn parse(cursor: &mut Cursor<'_>) -> Result<Self> {
        let name = cursor.name()?;
        let rtype = Rtype(cursor.u16()?);
        let class = Class(cursor.u16()?);
        let ttl = cursor.u32()?;
        let rdlen = cursor.u16()? as usize;
        let data = RecordData::parse(cursor, rtype, rdlen)?;
        Ok(Self {
            name,
            class,
            ttl,
            data,
        })
    }

    fn compose(&self, buf: &mut BytesMut) {
        self.name.compose(buf);
        buf.put_u16(self.rtype().0);
        buf.put_u16(self.class.0);
        buf.put_u32(self.ttl);
        let len_at = buf.len();
        buf.put_u16(0);
        self.data.compose(buf);
        let rdlen = (buf.len() - len_at - 2) as u16;
        buf[len_at..len_at + 2].copy_from_slice(&rdlen.to_be_bytes());
    }
}

/// A complete DNS message
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Message {
    pub header: Header,
    pub questions: Vec<Question>,
    pub answers: Vec<Record>,
    pub authority: Vec<Record>,
    pub additional: Vec<Record>,
}

impl Message {
    /// A query with a single question
    pub fn query(id: u16, question: Question) -> Self {
        Self {
            header: Header {
                id,
                ..Header::default()
            },
            questions: vec![question],
            ..Self::default()
        }
    }

    /// An empty response echoing the id and question of `query`
    pub fn response_to(query: &Message) -> Self {
        Self {
            header: Header {
                id: query.header.id,
                qr: true,
                opcode: query.header.opcode,
                aa: true,
                rd: query.header.rd,
                ..Header::default()
            },
            questions: query.questions.clone(),
            ..Self::default()
        }
    }

    /// Advertise an EDNS receive buffer size via an OPT pseudo-record
    pub fn with_edns(mut self, udp_payload_size: u16) -> Self {
        self.additional.push(Record::new(
            Name::root(),
            Class(udp_payload_size),
            0,
            RecordData::Other {
                rtype: Rtype::OPT,
                data: bytes::Bytes::new(),
            },
        ));
        self
    }

    pub fn id(&self) -> u16 {
        self.header.id
    }

    pub fn rcode(&self) -> Rcode {
        self.header.rcode
    }

    pub fn is_truncated(&self) -> bool {
        self.header.tc
    }

    /// Type of the first question, if any
    pub fn qtype(&self) -> Option<Rtype> {
        self.questions.first().map(|q| q.qtype)
    }

    /// Decode a complete message
    ///
    /// Fails if the header counts do not match the content exactly, in
    /// either direction.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_LEN {
            return Err(Error::malformed(format!(
                "message of {} bytes is shorter than the header",
                bytes.len()
            )));
        }
        let mut cursor = Cursor::new(bytes);
        let id = cursor.u16()?;
        let flags = cursor.u16()?;
        let qdcount = cursor.u16()?;
        let ancount = cursor.u16()?;
        let nscount = cursor.u16()?;
        let arcount = cursor.u16()?;

        let mut questions = Vec::new();
        for _ in 0..qdcount {
            questions.push(Question {
                name: cursor.name()?,
                qtype: Rtype(cursor.u16()?),
                qclass: Class(cursor.u16()?),
            });
        }

        let mut sections: [Vec<Record>; 3] = Default::default();
        for (section, count) in sections.iter_mut().zip([ancount, nscount, arcount]) {
            for _ in 0..count {
                section.push(Record::parse(&mut cursor)?);
            }
        }

        if cursor.remaining() != 0 {
            return Err(Error::malformed(format!(
                "{} trailing bytes after the counted records",
                cursor.remaining()
            )));
        }

        let [answers, authority, additional] = sections;
        Ok(Self {
            header: Header::from_flags(id, flags),
            questions,
            answers,
            authority,
            additional,
        })
    }

    /// Encode without name compression
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = BytesMut::with_capacity(512);
        buf.put_u16(self.header.id);
        buf.put_u16(self.header.flags());
        buf.put_u16(self.questions.len() as u16);
        buf.put_u16(self.answers.len() as u16);
        buf.put_u16(self.authority.len() as u16);
        buf.put_u16(self.additional.len() as u16);
        for q in &self.questions {
            q.name.compose(&mut buf);
            buf.put_u16(q.qtype.0);
            buf.put_u16(q.qclass.0);
        }
        for record in self
            .answers
            .iter()
            .chain(&self.authority)
            .chain(&self.additional)
        {
            record.compose(&mut buf);
        }
        buf.to_vec()
    }
}
