//! Zone transfer response interpretation
//!
//! Turns the answer records of an IXFR or AXFR response, fed one message at
//! a time, into an ordered list of record changes. The shape of the response
//! decides how it is read, not the type that was asked for:
//!
//! ```text
//! single SOA (== known)            server has nothing newer
//! SOA(new) SOA(old) ... SOA(new)   incremental: alternating delete/add batches
//! SOA(new) <non-SOA> ... SOA(new)  full zone, even if IXFR was requested
//! ```

use std::collections::HashSet;

use crate::error::{Error, Result};
use crate::model::{ChangeOp, ResourceRecordChange, TransferKind};
use crate::serial::Serial;
use crate::wire::{Message, Name, Rcode, Record, Rtype};

/// What an interpreted transfer amounts to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XfrOutcome {
    pub kind: TransferKind,
    pub old_serial: Option<Serial>,
    pub new_serial: Serial,
    pub changes: Vec<ResourceRecordChange>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Batch {
    Deleting,
    Adding,
}

#[derive(Debug)]
enum State {
    /// Nothing seen yet
    Start,
    /// Saw the opening SOA
    Opened { serial: Serial },
    /// Inside IXFR diff sequences
    Incremental {
        end: Serial,
        batch: Batch,
        current: Serial,
        /// Index of the first change of the current delete batch
        batch_start: usize,
    },
    /// Inside an AXFR-shaped body
    Full { end: Serial },
    /// Closing SOA seen
    Done { kind: TransferKind, end: Serial },
}

/// Incremental reader for one transfer response
#[derive(Debug)]
pub struct XfrInterpreter {
    zone: Name,
    requested: Rtype,
    known: Option<Serial>,
    ignored: HashSet<Rtype>,
    state: State,
    messages: usize,
    changes: Vec<ResourceRecordChange>,
}

impl XfrInterpreter {
    /// Interpreter for a response to a `requested` (IXFR or AXFR) query
    ///
    /// `known` is the serial the IXFR was asked relative to. Records of
    /// `ignored` types are dropped from the changes; SOA records never
    /// appear in them.
    pub fn new(zone: Name, requested: Rtype, known: Option<Serial>, ignored: HashSet<Rtype>) -> Self {
        Self {
            zone,
            requested,
            known,
            ignored,
            state: State::Start,
            messages: 0,
            changes: Vec::new(),
        }
    }

    pub fn is_finished(&self) -> bool {
        matches!(self.state, State::Done { .. })
    }

    /// Feed the next response message; returns true once the transfer is
    /// complete and no further messages should be read
    pub fn feed(&mut self, msg: &Message) -> Result<bool> {
        if msg.rcode() != Rcode::NOERROR {
            return Err(Error::ServerRefused {
                zone: self.zone.to_string(),
                rcode: msg.rcode(),
            });
        }
        if self.is_finished() {
            return Err(Error::malformed("message received after end of transfer"));
        }
        self.messages += 1;
        if self.messages == 1 {
            self.check_first(msg)?;
        }

        for record in &msg.answers {
            self.record(record)?;
        }

        // A lone SOA in the first message is the whole answer to an IXFR,
        // unless it is newer than the known serial: then the diff follows in
        // later messages
        if let State::Opened { serial } = self.state {
            if self.messages == 1
                && msg.answers.len() == 1
                && self.requested == Rtype::IXFR
                && !self.known.is_some_and(|known| serial.is_newer_than(known))
            {
                self.state = State::Done {
                    kind: TransferKind::Unchanged,
                    end: serial,
                };
            }
        }

        Ok(self.is_finished())
    }

    /// Result of a complete transfer
    pub fn finish(self) -> Result<XfrOutcome> {
        let (kind, end) = match self.state {
            State::Done { kind, end } => (kind, end),
            State::Start => return Err(Error::malformed("empty transfer response")),
            _ => {
                return Err(Error::malformed(format!(
                    "transfer of {} ended before its closing SOA",
                    self.zone
                )));
            }
        };

        match kind {
            TransferKind::Unchanged => match self.known {
                Some(known) if known == end => Ok(XfrOutcome {
                    kind,
                    old_serial: Some(known),
                    new_serial: known,
                    changes: Vec::new(),
                }),
                _ => Err(Error::malformed(format!(
                    "single SOA with serial {} does not match known serial {}",
                    end,
                    self.known.map_or_else(|| "none".to_string(), |s| s.to_string())
                ))),
            },
            TransferKind::Incremental => Ok(XfrOutcome {
                kind,
                old_serial: self.known,
                new_serial: end,
                changes: self.changes,
            }),
            TransferKind::Full => Ok(XfrOutcome {
                kind,
                old_serial: None,
                new_serial: end,
                changes: self.changes,
            }),
        }
    }

    fn check_first(&self, msg: &Message) -> Result<()> {
        if let Some(question) = msg.questions.first() {
            if question.name != self.zone {
                return Err(Error::malformed(format!(
                    "response is for {}, expected {}",
                    question.name, self.zone
                )));
            }
        }
        if msg.answers.is_empty() {
            return Err(Error::malformed("transfer response has no answer records"));
        }
        Ok(())
    }

    fn record(&mut self, record: &Record) -> Result<()> {
        let soa_serial = record.data.as_soa().map(|soa| soa.serial);

        self.state = match std::mem::replace(&mut self.state, State::Start) {
            State::Start => match soa_serial {
                Some(serial) if record.name == self.zone => State::Opened { serial },
                _ => {
                    return Err(Error::malformed(format!(
                        "transfer of {} does not start with its SOA",
                        self.zone
                    )));
                }
            },

            State::Opened { serial: end } => match soa_serial {
                // Diff framing: the second record is the old SOA
                Some(from) if self.requested == Rtype::IXFR && Some(from) == self.known => {
                    State::Incremental {
                        end,
                        batch: Batch::Deleting,
                        current: from,
                        batch_start: self.changes.len(),
                    }
                }
                // AXFR-shaped, empty zone
                Some(serial) if serial == end => State::Done {
                    kind: TransferKind::Full,
                    end,
                },
                Some(serial) => {
                    return Err(Error::malformed(format!(
                        "diff starts at serial {}, expected {}",
                        serial,
                        self.known.map_or_else(|| "none".to_string(), |s| s.to_string())
                    )));
                }
                None => {
                    self.push(record, ChangeOp::Add, end);
                    State::Full { end }
                }
            },

            State::Full { end } => match soa_serial {
                Some(serial) if serial == end => State::Done {
                    kind: TransferKind::Full,
                    end,
                },
                Some(serial) => {
                    return Err(Error::malformed(format!(
                        "full transfer closed with serial {}, opened with {}",
                        serial, end
                    )));
                }
                None => {
                    self.push(record, ChangeOp::Add, end);
                    State::Full { end }
                }
            },

            State::Incremental {
                end,
                batch,
                current,
                batch_start,
            } => match (soa_serial, batch) {
                (None, Batch::Deleting) => {
                    // Attributed to the diff's target serial once it is known
                    self.push(record, ChangeOp::Remove, current);
                    State::Incremental {
                        end,
                        batch,
                        current,
                        batch_start,
                    }
                }
                (None, Batch::Adding) => {
                    self.push(record, ChangeOp::Add, current);
                    State::Incremental {
                        end,
                        batch,
                        current,
                        batch_start,
                    }
                }
                (Some(to), Batch::Deleting) => {
                    if !to.is_newer_than(current) {
                        return Err(Error::malformed(format!(
                            "diff from serial {} leads to {}, which is not newer",
                            current, to
                        )));
                    }
                    for change in &mut self.changes[batch_start..] {
                        change.serial = to;
                    }
                    State::Incremental {
                        end,
                        batch: Batch::Adding,
                        current: to,
                        batch_start,
                    }
                }
                (Some(serial), Batch::Adding) if serial == current && current == end => {
                    State::Done {
                        kind: TransferKind::Incremental,
                        end,
                    }
                }
                (Some(from), Batch::Adding) if from == current => State::Incremental {
                    end,
                    batch: Batch::Deleting,
                    current: from,
                    batch_start: self.changes.len(),
                },
                (Some(serial), Batch::Adding) => {
                    return Err(Error::malformed(format!(
                        "diff chain broken: expected serial {}, got {}",
                        current, serial
                    )));
                }
            },

            State::Done { .. } => {
                return Err(Error::malformed("records after the closing SOA"));
            }
        };
        Ok(())
    }

    fn push(&mut self, record: &Record, op: ChangeOp, serial: Serial) {
        let rtype = record.rtype();
        if rtype == Rtype::SOA || self.ignored.contains(&rtype) {
            return;
        }
        self.changes.push(ResourceRecordChange {
            owner: record.name.clone(),
            rtype,
            class: record.class,
            ttl: record.ttl,
            rdata: record.data.clone(),
            op,
            serial,
        });
    }
}
