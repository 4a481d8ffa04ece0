//! Conflict arbiter.
//!
//! Invoked whenever the server (or a local reconciliation pass) flags a
//! path as `CONFLICTING`. Decides which side's bytes survive. Two grace
//! windows exist to stop the arbiter from re-litigating a conflict it (or
//! the upload that caused it) just finished dealing with:
//!
//! - a path resolved within the last 15s is treated as already settled —
//!   this absorbs the duplicate `CONFLICT` push notifications that arrive
//!   when two devices both handled the same version-vector fork.
//! - a path this client itself uploaded within the last 10s is treated the
//!   same way — the upload that created the conflict is not itself a new
//!   conflict to resolve.
//!
//! A per-path single-flight guard stops two reconciliation passes (e.g. a
//! periodic tick overlapping a push-triggered one) from resolving the same
//! path concurrently and racing each other's writes.

use std::time::{Duration, Instant};

use dashmap::DashMap;
use dashmap::DashSet;

const RECENTLY_RESOLVED_GRACE: Duration = Duration::from_secs(15);
const RECENTLY_UPLOADED_GRACE: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    UseLocal,
    UseServer,
    UseMerged,
    /// Skipped — already settled, or another resolution for this path is
    /// in flight.
    Cancelled,
}

/// The default (and currently only) arbitration policy: local wins.
/// Losing side's bytes are preserved by the sync engine renaming the local
/// file aside before overwriting, rather than anything in this module —
/// the arbiter only decides, it doesn't touch the filesystem.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Policy {
    PreferLocal,
    PreferServer,
    Merge,
}

impl Default for Policy {
    fn default() -> Self {
        Policy::PreferLocal
    }
}

pub struct ConflictArbiter {
    policy: Policy,
    recently_resolved: DashMap<String, Instant>,
    recently_uploaded: DashMap<String, Instant>,
    in_flight: DashSet<String>,
}

impl ConflictArbiter {
    pub fn new(policy: Policy) -> Self {
        Self {
            policy,
            recently_resolved: DashMap::new(),
            recently_uploaded: DashMap::new(),
            in_flight: DashSet::new(),
        }
    }

    /// Called by the transfer layer right after a successful upload, so a
    /// conflict notification that bounces back for that same write is
    /// recognized as self-caused.
    pub fn note_uploaded(&self, path: &str) {
        self.recently_uploaded.insert(path.to_string(), Instant::now());
    }

    pub fn resolve(&self, path: &str) -> Resolution {
        if !self.in_flight.insert(path.to_string()) {
            return Resolution::Cancelled;
        }
        let resolution = self.resolve_locked(path);
        self.in_flight.remove(path);
        resolution
    }

    fn resolve_locked(&self, path: &str) -> Resolution {
        if let Some(at) = self.recently_resolved.get(path) {
            if at.elapsed() < RECENTLY_RESOLVED_GRACE {
                return Resolution::Cancelled;
            }
        }
        if let Some(at) = self.recently_uploaded.get(path) {
            if at.elapsed() < RECENTLY_UPLOADED_GRACE {
                return Resolution::Cancelled;
            }
        }

        let resolution = match self.policy {
            Policy::PreferLocal => Resolution::UseLocal,
            Policy::PreferServer => Resolution::UseServer,
            Policy::Merge => Resolution::UseMerged,
        };
        self.recently_resolved.insert(path.to_string(), Instant::now());
        resolution
    }
}

impl Default for ConflictArbiter {
    fn default() -> Self {
        Self::new(Policy::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_policy_prefers_local() {
        let arbiter = ConflictArbiter::default();
        assert_eq!(arbiter.resolve("notes.md"), Resolution::UseLocal);
    }

    #[test]
    fn resolving_the_same_path_twice_in_a_row_is_cancelled_the_second_time() {
        let arbiter = ConflictArbiter::default();
        assert_eq!(arbiter.resolve("notes.md"), Resolution::UseLocal);
        assert_eq!(arbiter.resolve("notes.md"), Resolution::Cancelled);
    }

    #[test]
    fn a_recent_upload_of_the_same_path_is_treated_as_already_resolved() {
        let arbiter = ConflictArbiter::default();
        arbiter.note_uploaded("notes.md");
        assert_eq!(arbiter.resolve("notes.md"), Resolution::Cancelled);
    }

    #[test]
    fn unrelated_paths_do_not_share_grace_windows() {
        let arbiter = ConflictArbiter::default();
        assert_eq!(arbiter.resolve("a.txt"), Resolution::UseLocal);
        assert_eq!(arbiter.resolve("b.txt"), Resolution::UseLocal);
    }
}
