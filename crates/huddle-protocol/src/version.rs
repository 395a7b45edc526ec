//! Protocol versioning for Huddle.
//!
//! A client may announce the version it speaks as `?v=<major>[.<minor>]` on
//! the upgrade request. Minor bumps only add optional fields or events, so the
//! server accepts any minor of its own major.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Version spoken by this build.
pub const PROTOCOL_VERSION: Version = Version::new(1, 0);

/// A `major.minor` protocol version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Version {
    pub major: u8,
    pub minor: u8,
}

/// Rejected version announcement.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VersionError {
    #[error("Malformed protocol version: {0:?}")]
    Malformed(String),

    #[error("Unsupported protocol version {requested}, server speaks {supported}")]
    Unsupported { requested: Version, supported: Version },
}

impl Version {
    #[must_use]
    pub const fn new(major: u8, minor: u8) -> Self {
        Self { major, minor }
    }

    /// Same major version.
    #[must_use]
    pub fn is_compatible_with(&self, other: &Version) -> bool {
        self.major == other.major
    }

    /// Parse a client announcement and check it against [`PROTOCOL_VERSION`].
    ///
    /// # Errors
    ///
    /// Returns [`VersionError`] if the text is not a version or names another
    /// major version.
    pub fn negotiate(requested: &str) -> Result<Version, VersionError> {
        let requested: Version = requested.parse()?;
        if requested.is_compatible_with(&PROTOCOL_VERSION) {
            Ok(requested)
        } else {
            Err(VersionError::Unsupported {
                requested,
                supported: PROTOCOL_VERSION,
            })
        }
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

impl FromStr for Version {
    type Err = VersionError;

    /// Accepts `"1"` or `"1.2"`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let malformed = || VersionError::Malformed(s.to_string());
        let (major, minor) = match s.trim().split_once('.') {
            Some((major, minor)) => (major, Some(minor)),
            None => (s.trim(), None),
        };
        let major = major.parse().map_err(|_| malformed())?;
        let minor = match minor {
            Some(minor) => minor.parse().map_err(|_| malformed())?,
            None => 0,
        };
        Ok(Self { major, minor })
    }
}

impl Default for Version {
    fn default() -> Self {
        PROTOCOL_VERSION
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse() {
        assert_eq!("1.2".parse::<Version>(), Ok(Version::new(1, 2)));
        assert_eq!(" 2 ".parse::<Version>(), Ok(Version::new(2, 0)));
        assert!(matches!("x.1".parse::<Version>(), Err(VersionError::Malformed(_))));
        assert!("1.y".parse::<Version>().is_err());
        assert!("1.2.3".parse::<Version>().is_err());
        assert_eq!(PROTOCOL_VERSION.to_string().parse::<Version>(), Ok(PROTOCOL_VERSION));
    }

    #[test]
    fn test_negotiate() {
        assert_eq!(Version::negotiate("1"), Ok(Version::new(1, 0)));
        assert_eq!(Version::negotiate("1.7"), Ok(Version::new(1, 7)));
        assert_eq!(
            Version::negotiate("2.0"),
            Err(VersionError::Unsupported {
                requested: Version::new(2, 0),
                supported: PROTOCOL_VERSION,
            })
        );
        assert!(Version::negotiate("").is_err());
    }
}
