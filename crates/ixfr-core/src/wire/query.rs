//! Builders for the queries the watcher sends
//!
//! Each query gets a fresh random message id; callers match responses
//! against it.

use super::{Class, Message, Name, Question, Record, RecordData, Rtype, Soa};
use crate::error::Result;
use crate::serial::Serial;

fn random_id() -> u16 {
    rand::random()
}

/// SOA query for `zone`
pub fn soa_query(zone: &Name) -> Message {
    Message::query(random_id(), Question::new(zone.clone(), Rtype::SOA))
}

/// IXFR query for `zone` asking for changes since `since`
///
/// The known serial travels as an SOA record in the authority section.
pub fn ixfr_query(zone: &Name, since: Serial) -> Message {
    let mut msg = Message::query(random_id(), Question::new(zone.clone(), Rtype::IXFR));
    msg.authority.push(Record::new(
        zone.clone(),
        Class::IN,
        0,
        RecordData::Soa(Soa::with_serial(since)),
    ));
    msg
}

/// AXFR query for `zone`
pub fn axfr_query(zone: &Name) -> Message {
    Message::query(random_id(), Question::new(zone.clone(), Rtype::AXFR))
}

pub fn encode_soa_query(zone: &Name) -> Vec<u8> {
    soa_query(zone).encode()
}

pub fn encode_ixfr_query(zone: &Name, since: Serial) -> Vec<u8> {
    ixfr_query(zone, since).encode()
}

/// Decode a response, failing with `MalformedMessage` on any framing error
pub fn decode_message(bytes: &[u8]) -> Result<Message> {
    Message::decode(bytes)
}
