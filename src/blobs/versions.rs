//! Product version-string ordering
//!
//! Versions are dotted numeric components with an optional pre-release
//! suffix on the last component (`a` alpha or `b` beta plus a number).
//! A pre-release orders before its corresponding final release, so
//! `4.0b2 < 4.0` and `4.0b1 < 4.0b2`.

use std::cmp::Ordering;

/// Pre-release stage. Alpha sorts before beta; both sort before final.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum PreRelease {
    /// `aN` suffix
    Alpha(u32),
    /// `bN` suffix
    Beta(u32),
}

/// A parsed, comparable product version.
#[derive(Debug, Clone)]
pub struct ProductVersion {
    components: Vec<u32>,
    prerelease: Option<PreRelease>,
}

impl PartialEq for ProductVersion {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for ProductVersion {}

impl ProductVersion {
    /// Parses a version string, or `None` when the string has no
    /// comparable version form.
    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim();
        if s.is_empty() {
            return None;
        }

        // Optional pre-release suffix on the end: a<digits> or b<digits>
        let (numeric_part, prerelease) = match s.find(|c| c == 'a' || c == 'b') {
            Some(idx) => {
                let (head, tail) = s.split_at(idx);
                let number: u32 = tail[1..].parse().ok()?;
                let stage = if tail.starts_with('a') {
                    PreRelease::Alpha(number)
                } else {
                    PreRelease::Beta(number)
                };
                (head, Some(stage))
            }
            None => (s, None),
        };

        let mut components = Vec::new();
        for part in numeric_part.split('.') {
            components.push(part.parse().ok()?);
        }
        Some(Self {
            components,
            prerelease,
        })
    }

    fn component(&self, idx: usize) -> u32 {
        self.components.get(idx).copied().unwrap_or(0)
    }
}

impl Ord for ProductVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        let len = self.components.len().max(other.components.len());
        for idx in 0..len {
            match self.component(idx).cmp(&other.component(idx)) {
                Ordering::Equal => continue,
                unequal => return unequal,
            }
        }
        // Equal numeric components: a final release outranks any
        // pre-release of itself.
        match (&self.prerelease, &other.prerelease) {
            (None, None) => Ordering::Equal,
            (None, Some(_)) => Ordering::Greater,
            (Some(_), None) => Ordering::Less,
            (Some(a), Some(b)) => a.cmp(b),
        }
    }
}

impl PartialOrd for ProductVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
