//! Data-model versions carried by every document.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Schema version of the data model that wrote a document.
///
/// Only the major component is significant for change classification: a
/// remote document with a higher major version means another client runs a
/// newer data model than the one this replica was last opened with.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ModelVersion {
    pub major: u64,
    pub minor: u64,
    pub patch: u64,
}

impl ModelVersion {
    /// Version written by this build.
    pub const CURRENT: ModelVersion = ModelVersion::new(1, 0, 0);

    pub const fn new(major: u64, minor: u64, patch: u64) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }
}

impl Default for ModelVersion {
    fn default() -> Self {
        Self::CURRENT
    }
}

impl fmt::Display for ModelVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// A version string that is not `major[.minor[.patch]]`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParseVersionError(pub String);

impl fmt::Display for ParseVersionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid model version: {:?}", self.0)
    }
}

impl std::error::Error for ParseVersionError {}

impl FromStr for ModelVersion {
    type Err = ParseVersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ParseVersionError(s.to_string());
        let mut parts = s.trim().split('.');
        let major = parts
            .next()
            .filter(|p| !p.is_empty())
            .ok_or_else(invalid)?
            .parse()
            .map_err(|_| invalid())?;
        let mut next = || -> Result<u64, ParseVersionError> {
            match parts.next() {
                Some(p) => p.parse().map_err(|_| invalid()),
                None => Ok(0),
            }
        };
        let minor = next()?;
        let patch = next()?;
        if parts.next().is_some() {
            return Err(invalid());
        }
        Ok(ModelVersion::new(major, minor, patch))
    }
}
