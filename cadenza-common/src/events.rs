//! Idle-event flags
//!
//! Subsystem-change notifications delivered to the daemon's listener.
//! Modeled as a small flag set so one callback can coalesce several
//! changes.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{BitOr, BitOrAssign};

/// A set of subsystems whose state changed.
#[derive(Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdleFlags(u32);

impl IdleFlags {
    pub const NONE: IdleFlags = IdleFlags(0);
    /// Transport state, current song, or elapsed time changed.
    pub const PLAYER: IdleFlags = IdleFlags(1 << 0);
    /// An output's volume changed.
    pub const MIXER: IdleFlags = IdleFlags(1 << 1);
    /// A playback option (replay gain, cross-fade) changed.
    pub const OPTIONS: IdleFlags = IdleFlags(1 << 2);
    /// The song database changed.
    pub const DATABASE: IdleFlags = IdleFlags(1 << 3);
    /// A database update job started or finished.
    pub const UPDATE: IdleFlags = IdleFlags(1 << 4);
    /// An output was enabled, disabled, or failed.
    pub const OUTPUT: IdleFlags = IdleFlags(1 << 5);

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn contains(self, other: IdleFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn bits(self) -> u32 {
        self.0
    }
}

impl BitOr for IdleFlags {
    type Output = IdleFlags;

    fn bitor(self, rhs: IdleFlags) -> IdleFlags {
        IdleFlags(self.0 | rhs.0)
    }
}

impl BitOrAssign for IdleFlags {
    fn bitor_assign(&mut self, rhs: IdleFlags) {
        self.0 |= rhs.0;
    }
}

impl fmt::Debug for IdleFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const NAMES: [(IdleFlags, &str); 6] = [
            (IdleFlags::PLAYER, "player"),
            (IdleFlags::MIXER, "mixer"),
            (IdleFlags::OPTIONS, "options"),
            (IdleFlags::DATABASE, "database"),
            (IdleFlags::UPDATE, "update"),
            (IdleFlags::OUTPUT, "output"),
        ];
        let mut list = f.debug_set();
        for (flag, name) in NAMES {
            if self.contains(flag) {
                list.entry(&name);
            }
        }
        list.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flag_union() {
        let mut flags = IdleFlags::NONE;
        assert!(flags.is_empty());

        flags |= IdleFlags::PLAYER;
        flags |= IdleFlags::MIXER;
        assert!(flags.contains(IdleFlags::PLAYER));
        assert!(flags.contains(IdleFlags::MIXER));
        assert!(!flags.contains(IdleFlags::DATABASE));
        assert!(flags.contains(IdleFlags::PLAYER | IdleFlags::MIXER));
    }
}
