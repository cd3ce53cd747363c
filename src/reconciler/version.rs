//! Publication version tokens.

use std::fmt;

use serde::Serialize;

/// Identifies one published resource graph for a node. Strictly increasing
/// across successful publications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct Version(u64);

impl Version {
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Hands out wall-clock derived versions that never repeat or go backwards,
/// even if the clock does.
#[derive(Debug, Default)]
pub struct VersionClock {
    last: Option<Version>,
}

impl VersionClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resume after a version already handed out elsewhere.
    pub fn starting_after(last: Version) -> Self {
        Self { last: Some(last) }
    }

    pub fn last(&self) -> Option<Version> {
        self.last
    }

    pub fn next(&mut self) -> Version {
        let now = chrono::Utc::now().timestamp_nanos_opt().map_or(0, |nanos| nanos.max(0) as u64);
        let floor = self.last.map_or(0, |v| v.0.saturating_add(1));
        let version = Version(now.max(floor));
        self.last = Some(version);
        version
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_versions_strictly_increase() {
        let mut clock = VersionClock::new();
        let versions: Vec<_> = (0..1000).map(|_| clock.next()).collect();
        assert!(versions.windows(2).all(|pair| pair[0] < pair[1]));
        assert_eq!(clock.last(), versions.last().copied());
    }

    #[test]
    fn test_clock_behind_last_version_still_advances() {
        let ahead = Version::new(u64::MAX - 1);
        let mut clock = VersionClock::starting_after(ahead);
        assert_eq!(clock.next(), Version::new(u64::MAX));
    }

    #[test]
    fn test_display_is_decimal() {
        assert_eq!(Version::new(42).to_string(), "42");
    }
}
