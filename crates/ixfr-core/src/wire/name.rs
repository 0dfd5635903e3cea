//! Domain names
//!
//! Names are kept as a list of raw labels. Comparison and hashing ignore
//! ASCII case, as DNS does.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use bytes::{BufMut, BytesMut};

use crate::error::{Error, Result};

/// Longest allowed name in wire format, including the root label
pub const MAX_NAME_LEN: usize = 255;

/// Longest allowed single label
pub const MAX_LABEL_LEN: usize = 63;

/// Compression pointers followed before a name is considered looping
const MAX_POINTER_HOPS: usize = 64;

/// An absolute domain name
#[derive(Debug, Clone, Default)]
pub struct Name {
    labels: Vec<Vec<u8>>,
}

impl Name {
    /// The root name `.`
    pub fn root() -> Self {
        Self::default()
    }

    /// Build a name from raw labels, most specific first
    pub fn from_labels<I, L>(labels: I) -> Result<Self>
    where
        I: IntoIterator<Item = L>,
        L: AsRef<[u8]>,
    {
        let mut out = Vec::new();
        let mut wire_len = 1;
        for label in labels {
            let label = label.as_ref();
            if label.is_empty() {
                return Err(Error::invalid_input("empty label in domain name"));
            }
            if label.len() > MAX_LABEL_LEN {
                return Err(Error::invalid_input(format!(
                    "label of {} bytes exceeds {}",
                    label.len(),
                    MAX_LABEL_LEN
                )));
            }
            wire_len += label.len() + 1;
            out.push(label.to_vec());
        }
        if wire_len > MAX_NAME_LEN {
            return Err(Error::invalid_input(format!(
                "name of {} bytes exceeds {}",
                wire_len, MAX_NAME_LEN
            )));
        }
        Ok(Self { labels: out })
    }

    /// Labels, most specific first, without the root label
    pub fn labels(&self) -> impl Iterator<Item = &[u8]> {
        self.labels.iter().map(Vec::as_slice)
    }

    pub fn is_root(&self) -> bool {
        self.labels.is_empty()
    }

    /// Length of the uncompressed wire form
    pub fn wire_len(&self) -> usize {
        self.labels.iter().map(|l| l.len() + 1).sum::<usize>() + 1
    }

    /// Write the uncompressed wire form
    pub(crate) fn compose(&self, buf: &mut BytesMut) {
        for label in &self.labels {
            buf.put_u8(label.len() as u8);
            buf.put_slice(label);
        }
        buf.put_u8(0);
    }

    /// Parse a possibly compressed name starting at `start`
    ///
    /// Returns the name and the offset just past its encoding at `start`
    /// (i.e. after the first compression pointer, if any). Pointers must
    /// point strictly backwards.
    pub(crate) fn parse(msg: &[u8], start: usize) -> Result<(Name, usize)> {
        let mut labels = Vec::new();
        let mut pos = start;
        let mut resume_at: Option<usize> = None;
        let mut wire_len = 1;
        let mut hops = 0;

        loop {
            let len = *msg
                .get(pos)
                .ok_or_else(|| Error::malformed(format!("name at offset {} runs past end", start)))?;

            match len & 0xC0 {
                0x00 if len == 0 => {
                    pos += 1;
                    break;
                }
                0x00 => {
                    let len = len as usize;
                    let label = msg.get(pos + 1..pos + 1 + len).ok_or_else(|| {
                        Error::malformed(format!("label at offset {} runs past end", pos))
                    })?;
                    wire_len += len + 1;
                    if wire_len > MAX_NAME_LEN {
                        return Err(Error::malformed(format!(
                            "name at offset {} exceeds {} bytes",
                            start, MAX_NAME_LEN
                        )));
                    }
                    labels.push(label.to_vec());
                    pos += 1 + len;
                }
                0xC0 => {
                    let low = *msg.get(pos + 1).ok_or_else(|| {
                        Error::malformed(format!("compression pointer at offset {} truncated", pos))
                    })?;
                    let target = (((len & 0x3F) as usize) << 8) | low as usize;
                    if target >= pos {
                        return Err(Error::malformed(format!(
                            "compression pointer at offset {} points forward to {}",
                            pos, target
                        )));
                    }
                    hops += 1;
                    if hops > MAX_POINTER_HOPS {
                        return Err(Error::malformed(format!(
                            "compression loop in name at offset {}",
                            start
                        )));
                    }
                    resume_at.get_or_insert(pos + 2);
                    pos = target;
                }
                _ => {
                    return Err(Error::malformed(format!(
                        "unsupported label type {:#04x} at offset {}",
                        len, pos
                    )));
                }
            }
        }

        Ok((Name { labels }, resume_at.unwrap_or(pos)))
    }
}

impl PartialEq for Name {
    fn eq(&self, other: &Self) -> bool {
        self.labels.len() == other.labels.len()
            && self
                .labels
                .iter()
                .zip(&other.labels)
                .all(|(a, b)| a.eq_ignore_ascii_case(b))
    }
}

impl Eq for Name {}

impl Hash for Name {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_usize(self.labels.len());
        for label in &self.labels {
            state.write_usize(label.len());
            for b in label {
                state.write_u8(b.to_ascii_lowercase());
            }
        }
    }
}

impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.labels.is_empty() {
            return f.write_str(".");
        }
        for label in &self.labels {
            for &b in label {
                match b {
                    b'.' | b'\\' => write!(f, "\\{}", b as char)?,
                    0x21..=0x7E => write!(f, "{}", b as char)?,
                    _ => write!(f, "\\{:03}", b)?,
                }
            }
            f.write_str(".")?;
        }
        Ok(())
    }
}

impl FromStr for Name {
    type Err = Error;

    /// Parse a dotted name; a trailing dot is optional. Escapes are not
    /// interpreted.
    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.is_empty() {
            return Err(Error::invalid_input("empty domain name"));
        }
        if s == "." {
            return Ok(Name::root());
        }
        Name::from_labels(s.strip_suffix('.').unwrap_or(s).split('.'))
    }
}
