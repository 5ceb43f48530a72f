use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Label for one enrolled person, taken from their reference directory name.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Identity(String);

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IdentityError {
    #[error("identity label must not be empty")]
    Empty,
}

impl Identity {
    /// Surrounding whitespace is dropped, so a label reads back from the
    /// log as the same identity it was written as.
    pub fn new(label: impl Into<String>) -> Result<Self, IdentityError> {
        let label = label.into();
        let trimmed = label.trim();
        if trimmed.is_empty() {
            return Err(IdentityError::Empty);
        }
        if trimmed.len() == label.len() {
            return Ok(Self(label));
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for Identity {
    type Error = IdentityError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Identity> for String {
    fn from(identity: Identity) -> Self {
        identity.0
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One candidate produced by the face matcher for a frame.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchCandidate {
    pub identity: Identity,
    /// Dissimilarity to the closest reference face. Lower = more similar.
    pub distance: f32,
}

impl MatchCandidate {
    pub fn new(identity: Identity, distance: f32) -> Self {
        Self { identity, distance }
    }
}

/// Failure of the face-matching capability, distinct from "no match".
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MatcherError {
    #[error("matcher invocation failed: {0}")]
    Invocation(String),
    #[error("matcher returned malformed output: {0}")]
    Malformed(String),
    #[error("matcher reported an identity not in the reference database: {0}")]
    UnknownIdentity(String),
    #[error("reference database unavailable: {0}")]
    Reference(String),
}

/// Outcome of one recognition decision.
#[derive(Debug, Clone, PartialEq)]
pub enum RecognitionResult {
    NoFace,
    Unknown,
    Recognized(Identity),
    MatcherError(MatcherError),
}

/// A single row of the attendance log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttendanceRecord {
    #[serde(rename = "Name")]
    pub name: Identity,
    #[serde(rename = "Date")]
    pub date: NaiveDate,
    #[serde(rename = "Time", with = "hms")]
    pub time: NaiveTime,
}

impl AttendanceRecord {
    pub fn new(name: Identity, date: NaiveDate, time: NaiveTime) -> Self {
        Self { name, date, time }
    }

    pub fn key(&self) -> DedupKey {
        (self.name.clone(), self.date)
    }
}

/// Ledger key: one attendance entry per person per calendar day.
pub type DedupKey = (Identity, NaiveDate);

/// `HH:MM:SS` time columns, independent of locale and sub-second precision.
mod hms {
    use chrono::NaiveTime;
    use serde::{Deserialize, Deserializer, Serializer};

    const FORMAT: &str = "%H:%M:%S";

    pub fn serialize<S: Serializer>(time: &NaiveTime, s: S) -> Result<S::Ok, S::Error> {
        s.collect_str(&time.format(FORMAT))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<NaiveTime, D::Error> {
        let raw = String::deserialize(d)?;
        NaiveTime::parse_from_str(raw.trim(), FORMAT).map_err(serde::de::Error::custom)
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("distance threshold must be a finite non-negative number, got {0}")]
    InvalidThreshold(f32),
}

/// Static configuration of the attendance engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AttendanceConfig {
    /// Distance below which the best candidate counts as recognized.
    pub distance_threshold: f32,
    /// Reference face database: one subdirectory per identity.
    pub reference_db: PathBuf,
    /// Attendance CSV log.
    pub log_path: PathBuf,
}

impl Default for AttendanceConfig {
    fn default() -> Self {
        Self {
            distance_threshold: 0.40,
            reference_db: PathBuf::from("dataset"),
            log_path: PathBuf::from("attendance.csv"),
        }
    }
}

impl AttendanceConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let t = self.distance_threshold;
        if !t.is_finite() || t < 0.0 {
            return Err(ConfigError::InvalidThreshold(t));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_rejects_blank() {
        assert_eq!(Identity::new(""), Err(IdentityError::Empty));
        assert_eq!(Identity::new("   "), Err(IdentityError::Empty));
        assert_eq!(Identity::new("alice").unwrap().as_str(), "alice");
    }

    #[test]
    fn test_identity_trims_label() {
        assert_eq!(Identity::new("  alice\t").unwrap(), Identity::new("alice").unwrap());
    }

    #[test]
    fn test_config_validate() {
        assert!(AttendanceConfig::default().validate().is_ok());

        let mut config = AttendanceConfig::default();
        config.distance_threshold = f32::NAN;
        assert!(config.validate().is_err());
        config.distance_threshold = -0.1;
        assert!(config.validate().is_err());
    }
}
