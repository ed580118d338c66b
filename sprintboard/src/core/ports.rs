//! Deterministic port-slot allocation.
//!
//! Slot `s` owns ports `[base + s*step, base + s*step + step - 1]`. Slot 0 is
//! reserved for always-on shared services; sessions take slots `1..=max`.

use std::collections::BTreeSet;
use std::fmt;
use std::ops::RangeInclusive;

use crate::core::types::Board;
use crate::error::BoardError;

/// Highest valid TCP port.
pub const MAX_PORT: u64 = 65_535;
/// Ports below this need elevated privileges on most systems.
pub const PRIVILEGED_BELOW: u32 = 1024;

/// Port layout parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortPlan {
    pub base: u32,
    pub step: u32,
    pub max_worktrees: u16,
}

/// Non-fatal setup warnings about a port plan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PortAdvisory {
    PrivilegedBase { base: u32 },
    RangeOverflow { end: u64 },
}

impl fmt::Display for PortAdvisory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PortAdvisory::PrivilegedBase { base } => write!(
                f,
                "port base {} is in the privileged range (< {})",
                base, PRIVILEGED_BELOW
            ),
            PortAdvisory::RangeOverflow { end } => write!(
                f,
                "computed port range ends at {} which exceeds {}",
                end, MAX_PORT
            ),
        }
    }
}

impl PortPlan {
    /// Ports owned by slot `slot`.
    ///
    /// Computed in `u64` so any configured values fit; ends past
    /// [`MAX_PORT`] are reported by [`PortPlan::advisories`].
    pub fn slot_range(&self, slot: u16) -> RangeInclusive<u64> {
        let start = u64::from(self.base) + u64::from(slot) * u64::from(self.step);
        start..=start + u64::from(self.step).saturating_sub(1)
    }

    /// End of the planned range, `base + max_worktrees * step - 1`.
    pub fn range_end(&self) -> u64 {
        (u64::from(self.base) + u64::from(self.max_worktrees) * u64::from(self.step))
            .saturating_sub(1)
    }

    /// Surface questionable settings without correcting them.
    pub fn advisories(&self) -> Vec<PortAdvisory> {
        let mut advisories = Vec::new();
        if self.base < PRIVILEGED_BELOW {
            advisories.push(PortAdvisory::PrivilegedBase { base: self.base });
        }
        let end = self.range_end();
        if end > MAX_PORT {
            advisories.push(PortAdvisory::RangeOverflow { end });
        }
        advisories
    }
}

/// Slots currently held by sessions on the board.
pub fn slots_in_use(board: &Board) -> BTreeSet<u16> {
    board
        .sessions
        .values()
        .filter_map(|session| session.port_slot)
        .collect()
}

/// Pick the lowest unused session slot in `1..=max_worktrees`.
pub fn allocate(board: &Board, plan: &PortPlan) -> Result<u16, BoardError> {
    let used = slots_in_use(board);
    (1..=plan.max_worktrees)
        .find(|slot| !used.contains(slot))
        .ok_or_else(|| {
            BoardError::ResourceExhausted(format!(
                "all {} port slots are in use",
                plan.max_worktrees
            ))
        })
}

/// Free the slot held by `session_id`, returning it.
pub fn release(board: &mut Board, session_id: &str) -> Option<u16> {
    board
        .sessions
        .get_mut(session_id)
        .and_then(|session| session.port_slot.take())
}
