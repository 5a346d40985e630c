use serde::Serialize;
use std::fmt;
use std::str::FromStr;

use super::MatchError;

/// Three-component match file version.
///
/// Legacy files (before 1.0.0) write their version as two components, e.g.
/// `info(matchFileVersion,5.0).`, which denotes `0.5.0`. Display follows the
/// same convention so a parsed version is written back the way it was read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct Version {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl Version {
    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self { major, minor, patch }
    }

    /// Most recent format version understood by the parser.
    pub const LATEST: Version = Version::new(1, 0, 0);

    /// First legacy version whose performed-note lines carry an adjusted offset.
    pub const ADJUSTED_OFFSET: Version = Version::new(0, 3, 0);

    pub fn is_legacy(&self) -> bool {
        self.major == 0
    }
}

impl Default for Version {
    fn default() -> Self {
        Self::LATEST
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_legacy() {
            write!(f, "{}.{}", self.minor, self.patch)
        } else {
            write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
        }
    }
}

impl FromStr for Version {
    type Err = MatchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.trim().split('.').collect();
        let nums: Vec<u32> = parts
            .iter()
            .map(|p| p.parse::<u32>())
            .collect::<Result<_, _>>()
            .map_err(|_| MatchError::InvalidVersion(s.to_string()))?;

        match nums.as_slice() {
            [major, minor, patch] => Ok(Version::new(*major, *minor, *patch)),
            // Legacy: "5.0" is version 0.5.0
            [minor, patch] => Ok(Version::new(0, *minor, *patch)),
            [minor] => Ok(Version::new(0, *minor, 0)),
            _ => Err(MatchError::InvalidVersion(s.to_string())),
        }
    }
}
