//! Reports for hostnames the registry does not know

use std::collections::BTreeMap;

/// How long a ghost stays in the self-status report
pub const GHOST_WINDOW: i64 = 600;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GhostEntry {
    pub sender: String,
    pub seen: i64,
}

#[derive(Debug, Default)]
pub struct GhostTable {
    ghosts: BTreeMap<String, GhostEntry>,
}

impl GhostTable {
    pub fn record(&mut self, name: &str, sender: &str, now: i64) {
        self.ghosts.insert(
            name.to_string(),
            GhostEntry {
                sender: sender.to_string(),
                seen: now,
            },
        );
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &GhostEntry)> {
        self.ghosts.iter().map(|(name, entry)| (name.as_str(), entry))
    }

    /// Ghosts seen within the last [`GHOST_WINDOW`] seconds
    pub fn recent(&self, now: i64) -> impl Iterator<Item = (&str, &GhostEntry)> {
        self.iter()
            .filter(move |(_, entry)| entry.seen + GHOST_WINDOW >= now)
    }

    pub fn len(&self) -> usize {
        self.ghosts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ghosts.is_empty()
    }
}
