//! Error types for the zone watcher
//!
//! Every failure the core can hit while checking a zone is a variant here.
//! All of them are per-cycle, per-zone failures: the scheduler records them,
//! backs off and tries again. None of them is fatal to the process.

use thiserror::Error;

use crate::serial::Serial;
use crate::wire::Rcode;

/// Result type alias for zone watcher operations
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for the zone watcher
#[derive(Error, Debug)]
pub enum Error {
    /// A query or transfer did not complete in time
    #[error("Timed out: {0}")]
    Timeout(String),

    /// The server actively refused the connection
    #[error("Connection refused: {0}")]
    ConnectionRefused(String),

    /// Any other network failure
    #[error("Network error: {0}")]
    Network(std::io::Error),

    /// A DNS message could not be decoded, or a transfer was structurally invalid
    #[error("Malformed message: {0}")]
    MalformedMessage(String),

    /// The server reported a serial that is neither equal to nor newer than
    /// the last known one
    #[error("Serial anomaly for {zone}: known {known}, server reported {reported}")]
    SerialAnomaly {
        /// Zone the anomaly was observed on
        zone: String,
        /// Last known serial
        known: Serial,
        /// Serial the server reported
        reported: Serial,
    },

    /// The server answered with a non-NOERROR response code
    #[error("Server answered {rcode} for {zone}")]
    ServerRefused {
        /// Zone the query was about
        zone: String,
        /// Response code returned by the server
        rcode: Rcode,
    },

    /// State store-related errors
    #[error("State store error: {0}")]
    StateStore(String),

    /// Delta sink errors
    #[error("Sink error: {0}")]
    Sink(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic error with context
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create a timeout error
    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::Timeout(msg.into())
    }

    /// Create a malformed message error
    pub fn malformed(msg: impl Into<String>) -> Self {
        Self::MalformedMessage(msg.into())
    }

    /// Create a state store error
    pub fn state_store(msg: impl Into<String>) -> Self {
        Self::StateStore(msg.into())
    }

    /// Create a sink error
    pub fn sink(msg: impl Into<String>) -> Self {
        Self::Sink(msg.into())
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create an invalid input error
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    /// Create a serial anomaly error
    pub fn serial_anomaly(zone: impl Into<String>, known: Serial, reported: Serial) -> Self {
        Self::SerialAnomaly {
            zone: zone.into(),
            known,
            reported,
        }
    }

    /// Stable short label for this error, used in failure records
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Timeout(_) => "timeout",
            Error::ConnectionRefused(_) => "connection_refused",
            Error::Network(_) => "network_error",
            Error::MalformedMessage(_) => "malformed_message",
            Error::SerialAnomaly { .. } => "serial_anomaly",
            Error::ServerRefused { .. } => "server_refused",
            Error::StateStore(_) => "state_store",
            Error::Sink(_) => "sink",
            Error::Config(_) => "config",
            Error::InvalidInput(_) => "invalid_input",
            Error::Json(_) => "json",
            Error::Other(_) => "other",
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::ConnectionRefused => Self::ConnectionRefused(err.to_string()),
            std::io::ErrorKind::TimedOut => Self::Timeout(err.to_string()),
            _ => Self::Network(err),
        }
    }
}

/// Helper for converting anyhow::Error to our Error type
impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Self::Other(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_errors_map_to_transport_taxonomy() {
        let refused = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "nope");
        assert!(matches!(Error::from(refused), Error::ConnectionRefused(_)));

        let timed_out = std::io::Error::new(std::io::ErrorKind::TimedOut, "slow");
        assert!(matches!(Error::from(timed_out), Error::Timeout(_)));

        let reset = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset");
        let err = Error::from(reset);
        assert!(matches!(err, Error::Network(_)));
        assert_eq!(err.kind(), "network_error");
    }

    #[test]
    fn serial_anomaly_message_names_both_serials() {
        let err = Error::serial_anomaly("example.com.", Serial::from(6), Serial::from(5));
        assert_eq!(
            err.to_string(),
            "Serial anomaly for example.com.: known 6, server reported 5"
        );
        assert_eq!(err.kind(), "serial_anomaly");
    }
}
