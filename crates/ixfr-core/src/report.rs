//! Per-recipient report of changes to watched owner names
//!
//! A watchlist maps owner names to the people interested in them. Changes
//! are folded into net add/delete sets per name: adding a record cancels an
//! earlier deletion of the same record line and vice versa.
//!
//! ```text
//! Report for hostmaster@example.com:
//!   Deleted: www.example.com. 300 IN A 192.0.2.1
//!   Added:   www.example.com. 300 IN A 192.0.2.2
//! ```

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt::Write;

use crate::error::{Error, Result};
use crate::model::ZoneDelta;
use crate::sink::{ChangeLine, LogLine};
use crate::wire::Name;

#[derive(Debug, Default)]
struct NameChanges {
    deleted: BTreeSet<String>,
    added: BTreeSet<String>,
}

/// Net changes to watched names, grouped by recipient
#[derive(Debug)]
pub struct WatchReport {
    /// recipient -> names, both sorted
    recipients: BTreeMap<String, BTreeMap<String, Name>>,
    changes: HashMap<Name, NameChanges>,
}

impl WatchReport {
    /// Build from a map of owner name to recipients
    pub fn new(watchlist: HashMap<String, Vec<String>>) -> Result<Self> {
        let mut recipients: BTreeMap<String, BTreeMap<String, Name>> = BTreeMap::new();
        let mut changes = HashMap::new();
        for (name, people) in watchlist {
            let owner: Name = name
                .parse()
                .map_err(|e| Error::config(format!("Invalid watched name '{}': {}", name, e)))?;
            for person in people {
                recipients
                    .entry(person)
                    .or_default()
                    .insert(owner.to_string().to_ascii_lowercase(), owner.clone());
            }
            changes.insert(owner, NameChanges::default());
        }
        Ok(Self { recipients, changes })
    }

    /// Build from the JSON watchlist format: `{"name": ["recipient", ...]}`
    pub fn from_json(json: &str) -> Result<Self> {
        Self::new(serde_json::from_str(json)?)
    }

    /// Fold one change in; changes to names nobody watches are ignored
    pub fn record(&mut self, owner: &Name, text: &str, deleted: bool) {
        let Some(entry) = self.changes.get_mut(owner) else {
            return;
        };
        if deleted {
            entry.added.remove(text);
            entry.deleted.insert(text.to_string());
        } else {
            entry.deleted.remove(text);
            entry.added.insert(text.to_string());
        }
    }

    pub fn add_delta(&mut self, delta: &ZoneDelta) {
        for change in &delta.changes {
            self.record(&change.owner, &change.text(), change.is_remove());
        }
    }

    pub fn add_change_line(&mut self, line: &ChangeLine) -> Result<()> {
        let owner: Name = line.name.parse()?;
        self.record(&owner, &line.text, line.deleted);
        Ok(())
    }

    /// Fold in a JSON-lines log, returning the number of change lines read
    ///
    /// Summary and failure lines are skipped, as are blank lines.
    pub fn add_log(&mut self, content: &str) -> Result<usize> {
        let mut count = 0;
        for (lineno, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let parsed: LogLine = serde_json::from_str(line).map_err(|e| {
                Error::invalid_input(format!("log line {}: {}", lineno + 1, e))
            })?;
            if let LogLine::Change(change) = parsed {
                self.add_change_line(&change)?;
                count += 1;
            }
        }
        Ok(count)
    }

    /// One block per recipient, deletions before additions
    pub fn render(&self) -> String {
        let mut out = String::new();
        for (recipient, names) in &self.recipients {
            let _ = writeln!(out, "Report for {}:", recipient);
            for owner in names.values() {
                let Some(entry) = self.changes.get(owner) else {
                    continue;
                };
                for rr in &entry.deleted {
                    let _ = writeln!(out, "  Deleted: {}", rr);
                }
                for rr in &entry.added {
                    let _ = writeln!(out, "  Added:   {}", rr);
                }
            }
        }
        out
    }
}
