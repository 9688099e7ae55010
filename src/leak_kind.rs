//! The leak classification outcome and its priority order (§4.C9).

use std::fmt;

/// The classification outcome assigned to an [`crate::record::AllocationRecord`].
///
/// Declaration order is *not* the priority order — see [`LeakKind::priority`]
/// for that; the ordinal values here are instead the `"type"` values used in
/// the suppression file format (§6.3), which is why `Unclassified` sits at
/// the end rather than the front as it does conceptually.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LeakKind {
    RuntimeDirect,
    RuntimeIndirect,
    ReachableDirect,
    ReachableIndirect,
    GlobalDirect,
    GlobalIndirect,
    TlsDirect,
    TlsIndirect,
    UnreachableIndirect,
    UnreachableDirect,
    Unclassified,
}

impl LeakKind {
    /// Classification priority: higher wins. Used by the scanner (§4.C8) to
    /// decide whether a newly-discovered root claim should overwrite an
    /// existing classification, and by [`LeakKind::strongest`] to resolve
    /// ties between direct and indirect claims of the same root class.
    ///
    /// Mirrors the six-tier table in §4.C9: unclassified is weakest,
    /// unreachable beats nothing, tls beats unreachable, global beats tls,
    /// reachable (stack) beats global, runtime (Objective-C) beats all.
    pub const fn priority(self) -> u8 {
        match self {
            LeakKind::Unclassified => 0,
            LeakKind::UnreachableIndirect => 1,
            LeakKind::UnreachableDirect => 1,
            LeakKind::TlsIndirect => 2,
            LeakKind::TlsDirect => 2,
            LeakKind::GlobalIndirect => 3,
            LeakKind::GlobalDirect => 3,
            LeakKind::ReachableIndirect => 4,
            LeakKind::ReachableDirect => 4,
            LeakKind::RuntimeIndirect => 5,
            LeakKind::RuntimeDirect => 5,
        }
    }

    /// Whether this kind is the "direct" half of a direct/indirect pair —
    /// direct wins a tie against indirect of the same root class.
    pub const fn is_direct(self) -> bool {
        !self.is_indirect()
    }

    pub const fn is_indirect(self) -> bool {
        matches!(
            self,
            LeakKind::RuntimeIndirect
                | LeakKind::ReachableIndirect
                | LeakKind::GlobalIndirect
                | LeakKind::TlsIndirect
                | LeakKind::UnreachableIndirect
        )
    }

    /// The indirect counterpart of a direct kind (or self, if already indirect).
    pub const fn to_indirect(self) -> LeakKind {
        match self {
            LeakKind::RuntimeDirect => LeakKind::RuntimeIndirect,
            LeakKind::ReachableDirect => LeakKind::ReachableIndirect,
            LeakKind::GlobalDirect => LeakKind::GlobalIndirect,
            LeakKind::TlsDirect => LeakKind::TlsIndirect,
            LeakKind::UnreachableDirect => LeakKind::UnreachableIndirect,
            other => other,
        }
    }

    /// Returns whether `new` should replace `current` under the "only moves
    /// up the priority list, equal-priority and first-observed wins" rule
    /// (§3 invariant), with direct beating indirect at equal priority.
    pub fn should_replace(current: LeakKind, new: LeakKind, reclassify: bool) -> bool {
        if reclassify {
            return true;
        }
        match new.priority().cmp(&current.priority()) {
            std::cmp::Ordering::Greater => true,
            std::cmp::Ordering::Equal => new.is_direct() && current.is_indirect(),
            std::cmp::Ordering::Less => false,
        }
    }

    /// The ordinal used in the suppression file's `"type"` field (§6.3: `int 0..10`).
    pub const fn from_ordinal(ordinal: u64) -> Option<LeakKind> {
        Some(match ordinal {
            0 => LeakKind::RuntimeDirect,
            1 => LeakKind::RuntimeIndirect,
            2 => LeakKind::ReachableDirect,
            3 => LeakKind::ReachableIndirect,
            4 => LeakKind::GlobalDirect,
            5 => LeakKind::GlobalIndirect,
            6 => LeakKind::TlsDirect,
            7 => LeakKind::TlsIndirect,
            8 => LeakKind::UnreachableIndirect,
            9 => LeakKind::UnreachableDirect,
            10 => LeakKind::Unclassified,
            _ => return None,
        })
    }
}

impl fmt::Display for LeakKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LeakKind::Unclassified => "unclassified",
            LeakKind::ReachableDirect => "stack",
            LeakKind::ReachableIndirect => "via stack",
            LeakKind::UnreachableDirect => "lost",
            LeakKind::UnreachableIndirect => "via lost",
            LeakKind::GlobalDirect => "global",
            LeakKind::GlobalIndirect => "via global",
            LeakKind::TlsDirect => "thread-local value",
            LeakKind::TlsIndirect => "via thread-local value",
            LeakKind::RuntimeDirect => "Objective-C runtime",
            LeakKind::RuntimeIndirect => "via Objective-C runtime",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priority_only_moves_up_by_default() {
        assert!(LeakKind::should_replace(
            LeakKind::Unclassified,
            LeakKind::UnreachableDirect,
            false
        ));
        assert!(!LeakKind::should_replace(
            LeakKind::ReachableDirect,
            LeakKind::UnreachableDirect,
            false
        ));
    }

    #[test]
    fn direct_wins_tie_against_indirect_same_class() {
        assert!(LeakKind::should_replace(
            LeakKind::GlobalIndirect,
            LeakKind::GlobalDirect,
            false
        ));
        assert!(!LeakKind::should_replace(
            LeakKind::GlobalDirect,
            LeakKind::GlobalIndirect,
            false
        ));
    }

    #[test]
    fn reclassify_always_replaces() {
        assert!(LeakKind::should_replace(
            LeakKind::RuntimeDirect,
            LeakKind::TlsDirect,
            true
        ));
    }

    #[test]
    fn ordinal_roundtrip() {
        for ord in 0..=10u64 {
            assert!(LeakKind::from_ordinal(ord).is_some());
        }
        assert!(LeakKind::from_ordinal(11).is_none());
    }
}
