use std::fmt;

use log::warn;

use super::bus::CacheRef;
use super::cache::LineState;
use super::common::CacheId;

/// Two caches holding the same memory line in states MSI forbids together.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Inconsistency {
    pub slot: usize,
    pub tag: Option<u64>,
    pub first: (CacheId, LineState),
    pub second: (CacheId, LineState),
}

impl fmt::Display for Inconsistency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "inconsistent states for slot {}, tag {:?}: cache {}: {}, cache {}: {}",
            self.slot, self.tag, self.first.0, self.first.1, self.second.0, self.second.1
        )
    }
}

fn illegal(a: LineState, b: LineState) -> bool {
    matches!(
        (a, b),
        (LineState::Modified, LineState::Modified)
            | (LineState::Modified, LineState::Shared)
            | (LineState::Shared, LineState::Modified)
    )
}

/// Pairwise scan of every slot of every cache. Expensive; meant for debug runs
/// only. Violations are logged and returned, never acted upon.
pub fn check_consistency(caches: &[CacheRef]) -> Vec<Inconsistency> {
    let mut found = Vec::new();
    for (i, a) in caches.iter().enumerate() {
        let a = a.borrow();
        for b in &caches[i + 1..] {
            let b = b.borrow();
            for (slot, (la, lb)) in a.lines().iter().zip(b.lines()).enumerate() {
                if la.tag != lb.tag || !illegal(la.state, lb.state) {
                    continue;
                }
                let v = Inconsistency {
                    slot,
                    tag: la.tag,
                    first: (a.id, la.state),
                    second: (b.id, lb.state),
                };
                warn!("{}", v);
                found.push(v);
            }
        }
    }
    found
}
