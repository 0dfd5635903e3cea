// # JSON Lines Sink
//
// Appends one JSON object per line to a log file:
//
// - a `summary` line per delta (zone, serials, transfer kind, change count)
// - a `change` line per added or removed record
// - a `failure` line per failed check
//
// Change lines carry `serial`, `deleted`, `name`, `ttl`, `rdclass`,
// `rdtype`, `rdata` and `text`; the report tool folds them back into
// per-name add/delete sets.
//
// All lines for one delta are written and flushed before `emit` returns.

use std::net::IpAddr;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs::{self, File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use crate::error::{Error, Result};
use crate::model::{TransferKind, ZoneDelta, ZoneFailure};
use crate::traits::DeltaSink;

/// One line of the log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "record", rename_all = "snake_case")]
pub enum LogLine {
    Summary(SummaryLine),
    Change(ChangeLine),
    Failure(FailureLine),
}

/// Per-delta summary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryLine {
    pub zone: String,
    pub server: IpAddr,
    pub old_serial: Option<u32>,
    pub new_serial: u32,
    pub kind: TransferKind,
    pub changes: usize,
    pub at: DateTime<Utc>,
}

/// A single added or removed record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeLine {
    pub zone: String,
    pub serial: u32,
    pub deleted: bool,
    pub name: String,
    pub ttl: u32,
    pub rdclass: String,
    pub rdtype: String,
    pub rdata: String,
    pub text: String,
}

/// A failed check
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureLine {
    pub zone: String,
    pub server: IpAddr,
    pub kind: String,
    pub error: String,
    pub consecutive_failures: u32,
    pub at: DateTime<Utc>,
}

impl LogLine {
    /// Lines for one delta: the summary first, then changes in order
    pub fn from_delta(delta: &ZoneDelta) -> Vec<LogLine> {
        let zone = delta.zone.to_string();
        let mut lines = Vec::with_capacity(delta.changes.len() + 1);
        lines.push(LogLine::Summary(SummaryLine {
            zone: zone.clone(),
            server: delta.server,
            old_serial: delta.old_serial.map(u32::from),
            new_serial: delta.new_serial.get(),
            kind: delta.kind,
            changes: delta.changes.len(),
            at: delta.observed_at,
        }));
        lines.extend(delta.changes.iter().map(|change| {
            LogLine::Change(ChangeLine {
                zone: zone.clone(),
                serial: change.serial.get(),
                deleted: change.is_remove(),
                name: change.owner.to_string(),
                ttl: change.ttl,
                rdclass: change.class.to_string(),
                rdtype: change.rtype.to_string(),
                rdata: change.rdata.to_string(),
                text: change.text(),
            })
        }));
        lines
    }

    pub fn from_failure(failure: &ZoneFailure) -> LogLine {
        LogLine::Failure(FailureLine {
            zone: failure.key.zone.to_string(),
            server: failure.key.server,
            kind: failure.kind.to_string(),
            error: failure.error.clone(),
            consecutive_failures: failure.consecutive_failures,
            at: failure.at,
        })
    }
}

/// Sink appending JSON lines to a file
#[derive(Debug)]
pub struct JsonLinesSink {
    path: PathBuf,
    file: Mutex<File>,
}

impl JsonLinesSink {
    /// Open `path` for appending, creating it and its parent directory
    pub async fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent).await.map_err(|e| {
                    Error::config(format!(
                        "Failed to create log directory {}: {}",
                        parent.display(),
                        e
                    ))
                })?;
            }
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(|e| Error::sink(format!("Failed to open {}: {}", path.display(), e)))?;
        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn append(&self, lines: &[LogLine]) -> Result<()> {
        let mut buf = String::new();
        for line in lines {
            buf.push_str(&serde_json::to_string(line)?);
            buf.push('\n');
        }
        let mut file = self.file.lock().await;
        file.write_all(buf.as_bytes())
            .await
            .map_err(|e| Error::sink(format!("Failed to write {}: {}", self.path.display(), e)))?;
        file.flush()
            .await
            .map_err(|e| Error::sink(format!("Failed to flush {}: {}", self.path.display(), e)))
    }
}

#[async_trait]
impl DeltaSink for JsonLinesSink {
    async fn emit(&self, delta: &ZoneDelta) -> Result<()> {
        self.append(&LogLine::from_delta(delta)).await
    }

    async fn emit_failure(&self, failure: &ZoneFailure) -> Result<()> {
        self.append(&[LogLine::from_failure(failure)]).await
    }

    async fn flush(&self) -> Result<()> {
        let file = self.file.lock().await;
        file.sync_data()
            .await
            .map_err(|e| Error::sink(format!("Failed to sync {}: {}", self.path.display(), e)))
    }

    fn name(&self) -> &'static str {
        "json_lines"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ChangeOp, ResourceRecordChange, ZoneKey};
    use crate::serial::Serial;
    use crate::wire::{Class, RecordData, Rtype};
    use std::net::Ipv4Addr;
    use tempfile::tempdir;

    fn delta() -> ZoneDelta {
        let change = |op, last| ResourceRecordChange {
            owner: "www.example.com".parse().unwrap(),
            rtype: Rtype::A,
            class: Class::IN,
            ttl: 300,
            rdata: RecordData::A(Ipv4Addr::new(192, 0, 2, last)),
            op,
            serial: Serial::from(11),
        };
        ZoneDelta {
            zone: "example.com".parse().unwrap(),
            server: "192.0.2.53".parse().unwrap(),
            old_serial: Some(Serial::from(10)),
            new_serial: Serial::from(11),
            changes: vec![change(ChangeOp::Remove, 1), change(ChangeOp::Add, 2)],
            kind: TransferKind::Incremental,
            observed_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn writes_summary_then_changes() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ixfr.log");
        let sink = JsonLinesSink::open(&path).await.unwrap();

        sink.emit(&delta()).await.unwrap();

        let content = fs::read_to_string(&path).await.unwrap();
        let lines: Vec<LogLine> = content
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 3);
        assert!(matches!(&lines[0], LogLine::Summary(s) if s.changes == 2 && s.old_serial == Some(10)));
        match &lines[1] {
            LogLine::Change(c) => {
                assert!(c.deleted);
                assert_eq!(c.name, "www.example.com.");
                assert_eq!(c.rdtype, "A");
                assert_eq!(c.text, "www.example.com. 300 IN A 192.0.2.1");
            }
            other => panic!("expected change line, got {:?}", other),
        }
        assert!(matches!(&lines[2], LogLine::Change(c) if !c.deleted && c.serial == 11));
    }

    #[tokio::test]
    async fn change_lines_use_flat_field_names() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ixfr.log");
        let sink = JsonLinesSink::open(&path).await.unwrap();
        sink.emit(&delta()).await.unwrap();

        let content = fs::read_to_string(&path).await.unwrap();
        let second: serde_json::Value =
            serde_json::from_str(content.lines().nth(1).unwrap()).unwrap();
        assert_eq!(second["record"], "change");
        for field in ["serial", "deleted", "name", "ttl", "rdclass", "rdtype", "rdata", "text"] {
            assert!(second.get(field).is_some(), "missing {}", field);
        }
    }

    #[tokio::test]
    async fn appends_failures_and_survives_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("ixfr.log");
        let key: ZoneKey = "example.com@192.0.2.53".parse().unwrap();

        let sink = JsonLinesSink::open(&path).await.unwrap();
        let err = Error::timeout("no answer");
        sink.emit_failure(&ZoneFailure::new(key.clone(), &err, 3)).await.unwrap();
        sink.flush().await.unwrap();
        drop(sink);

        let sink = JsonLinesSink::open(&path).await.unwrap();
        sink.emit_failure(&ZoneFailure::new(key, &err, 4)).await.unwrap();

        let content = fs::read_to_string(&path).await.unwrap();
        let failures: Vec<FailureLine> = content
            .lines()
            .filter_map(|l| match serde_json::from_str(l).unwrap() {
                LogLine::Failure(f) => Some(f),
                _ => None,
            })
            .collect();
        assert_eq!(failures.len(), 2);
        assert_eq!(failures[0].kind, "timeout");
        assert_eq!(failures[1].consecutive_failures, 4);
    }
}
