use core::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::event::LogFields;

/// Position of an entry in the durable log.
///
/// Mirrors a stream entry id `<millis>-<seq>`: totally ordered, and strictly
/// increasing along the log. `LogPosition::ZERO` sorts before every entry.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct LogPosition {
    millis: u64,
    seq: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid log position: {0:?}")]
pub struct PositionParseError(pub String);

impl LogPosition {
    pub const ZERO: LogPosition = LogPosition { millis: 0, seq: 0 };

    pub const fn new(millis: u64, seq: u64) -> Self {
        Self { millis, seq }
    }

    pub const fn millis(&self) -> u64 {
        self.millis
    }

    pub const fn seq(&self) -> u64 {
        self.seq
    }
}

impl core::fmt::Display for LogPosition {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}-{}", self.millis, self.seq)
    }
}

impl FromStr for LogPosition {
    type Err = PositionParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || PositionParseError(s.to_string());
        let (millis, seq) = match s.split_once('-') {
            Some((m, q)) => (m, q),
            None => (s, "0"),
        };
        Ok(Self {
            millis: millis.parse().map_err(|_| err())?,
            seq: seq.parse().map_err(|_| err())?,
        })
    }
}

/// One raw entry read from the log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub position: LogPosition,
    pub fields: LogFields,
}

impl LogEntry {
    pub fn new(position: LogPosition, fields: LogFields) -> Self {
        Self { position, fields }
    }
}
