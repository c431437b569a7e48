//! Release versions and the one-time upgrade notice derived from them.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// A `major.minor.patch` release number.
///
/// Missing trailing components count as zero (`"1.2"` is `1.2.0`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ReleaseVersion {
    pub major: u64,
    pub minor: u64,
    pub patch: u64,
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid release version: {0:?}")]
pub struct InvalidVersionError(String);

impl FromStr for ReleaseVersion {
    type Err = InvalidVersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || InvalidVersionError(s.to_string());
        let mut parts = s.trim().split('.');
        let mut next = || -> Result<u64, InvalidVersionError> {
            match parts.next() {
                Some(part) => part.parse().map_err(|_| invalid()),
                None => Ok(0),
            }
        };
        let version = Self {
            major: next()?,
            minor: next()?,
            patch: next()?,
        };
        if parts.next().is_some() {
            return Err(invalid());
        }
        Ok(version)
    }
}

impl fmt::Display for ReleaseVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// Message shown once after install or upgrade.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpgradeNotice {
    /// No version was recorded before.
    FirstRun,
    /// The running version is newer than the recorded one.
    Updated(String),
}

impl UpgradeNotice {
    /// Compare the recorded version against the running one.
    ///
    /// Returns `None` when nothing should be shown: same version, a downgrade,
    /// or either side failing to parse.
    #[must_use]
    pub fn evaluate(previous: Option<&str>, current: &str) -> Option<Self> {
        let previous = match previous {
            Some(p) if !p.is_empty() => p,
            _ => return Some(Self::FirstRun),
        };
        if previous == current {
            return None;
        }
        let (Ok(prev), Ok(cur)) = (
            previous.parse::<ReleaseVersion>(),
            current.parse::<ReleaseVersion>(),
        ) else {
            return None;
        };
        match cur.cmp(&prev) {
            Ordering::Greater => Some(Self::Updated(current.to_string())),
            Ordering::Equal | Ordering::Less => None,
        }
    }

    #[must_use]
    pub fn message(&self) -> String {
        match self {
            Self::FirstRun => "Thanks for using JimpleLSP!".to_string(),
            Self::Updated(version) => format!("JimpleLSP Plugin updated to {version}."),
        }
    }
}
