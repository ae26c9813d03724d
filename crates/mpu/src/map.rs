//! Foreground map model, effective-attribute lookup, validation and
//! capacity accounting.
//!
//! The foreground map is a fixed-capacity ordered array of descriptors.
//! Invalid entries are not holes: they are explicit defer-to-background
//! markers that occupy a slot and participate in ordering. Index 0
//! implicitly begins at address 0.

use crate::MpuError;
use crate::entry::{self, MpuEntry};
use crate::MPU_MAX_ENTRIES;

/// In-memory snapshot of the live foreground table.
///
/// `len` is the hardware's descriptor count; slots beyond it are unused
/// filler. The snapshot is kept in sync with the live table by the editor:
/// every mutation is one single-entry write mirrored into both.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ForegroundMap {
    entries: [MpuEntry; MPU_MAX_ENTRIES],
    len: usize,
}

impl ForegroundMap {
    #[must_use]
    pub fn new(len: usize) -> Self {
        ForegroundMap {
            entries: [MpuEntry::INVALID; MPU_MAX_ENTRIES],
            len: len.min(MPU_MAX_ENTRIES),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[must_use]
    pub fn get(&self, index: usize) -> MpuEntry {
        debug_assert!(index < self.len);
        self.entries[index]
    }

    pub fn set(&mut self, index: usize, entry: MpuEntry) {
        debug_assert!(index < self.len);
        self.entries[index] = entry;
    }

    #[must_use]
    pub fn as_slice(&self) -> &[MpuEntry] {
        &self.entries[..self.len]
    }

    pub fn iter(&self) -> impl Iterator<Item = &MpuEntry> {
        self.entries[..self.len].iter()
    }
}

/// Resolves the descriptor that governs `addr`: the closest foreground
/// entry at or below it when that entry is valid, otherwise the closest
/// background entry. Returns the entry and whether it came from the
/// foreground map.
///
/// This is the semantic oracle for the whole engine: every single-entry
/// write the editor performs must leave this function's result unchanged
/// for every address outside the range being retargeted.
#[must_use]
pub fn entry_for(fg: &ForegroundMap, bg: &[MpuEntry], addr: u32) -> (MpuEntry, bool) {
    for i in (0..fg.len()).rev() {
        let e = fg.get(i);
        if e.start() <= addr {
            if e.is_valid() {
                return (e, true);
            }
            break;
        }
    }
    for e in bg.iter().rev() {
        if e.start() <= addr {
            return (*e, false);
        }
    }
    // The background map starts at 0, so this is unreachable for a
    // well-formed platform; fall back to its first entry regardless.
    (bg[0], false)
}

/// True if `addr` is exactly one of the background start addresses.
#[must_use]
pub fn in_background(bg: &[MpuEntry], addr: u32) -> bool {
    bg.iter().any(|e| e.start() == addr)
}

/// Index of the background entry whose partition precedes `addr`: the
/// highest index whose start is strictly below `addr`, else 0. Exact hits
/// resolve to the preceding partition; callers rely on that tie-break.
#[must_use]
pub fn background_index(bg: &[MpuEntry], addr: u32) -> usize {
    for i in (0..bg.len()).rev() {
        if addr > bg[i].start() {
            return i;
        }
    }
    0
}

/// The largest index `ip` such that every entry below `ip` starts at or
/// below `first`. New boundaries for `first` are inserted at `ip`.
#[must_use]
pub fn find_insertion_point(fg: &ForegroundMap, first: u32) -> usize {
    for i in (0..fg.len()).rev() {
        if fg.get(i).start() <= first {
            return i + 1;
        }
    }
    0
}

/// Start address of the lowest entry at or above `x`, or 0 when no entry
/// qualifies. Callers distinguish the two cases by comparing against the
/// address they asked about.
#[must_use]
pub fn smallest_entry_ge(fg: &ForegroundMap, x: u32) -> u32 {
    for i in 0..fg.len() {
        if fg.get(i).start() >= x {
            return fg.get(i).start();
        }
    }
    0
}

/// Counts slots that a region edit may consume without changing any
/// effective attribute: leading invalid entries before the first valid
/// one, plus zero-width duplicates (same start as their predecessor) after
/// it.
#[must_use]
pub fn count_available(fg: &ForegroundMap) -> usize {
    let mut available = 0;
    let mut valid_seen = false;
    for i in 0..fg.len() {
        if !valid_seen {
            if fg.get(i).is_valid() {
                valid_seen = true;
            } else {
                available += 1;
            }
        } else if i > 0 && fg.get(i).start() == fg.get(i - 1).start() {
            available += 1;
        }
    }
    available
}

/// True when descriptors already sit at exactly `first` and `last` (or
/// `last` is the end of the address space) with every entry between them
/// valid. In that case the structural phase has nothing to do and the
/// commit phase can re-attribute the existing run directly.
#[must_use]
pub fn needed_entries_exist(fg: &ForegroundMap, first: u32, last: u32) -> bool {
    for i in 0..fg.len() {
        if fg.get(i).start() == first {
            if last == crate::END_OF_SPACE {
                return (i..fg.len()).all(|k| fg.get(k).is_valid());
            }
            for j in i..fg.len() {
                if fg.get(j).start() == last {
                    return (i..=j).all(|k| fg.get(k).is_valid());
                }
            }
            return false;
        }
    }
    false
}

/// Validates the foreground map: legal access rights on every valid entry,
/// non-decreasing granularity-aligned start addresses, and — when the
/// platform requires background alignment — the entry-0 and
/// invalid-to-valid transition rules.
pub fn check_map(
    fg: &ForegroundMap,
    bg: &[MpuEntry],
    align_bits: u32,
    alignment_required: bool,
) -> Result<(), MpuError> {
    let n = fg.len();
    if n == 0 {
        return Ok(());
    }
    let mut current = 0u32;
    for i in 0..n {
        let e = fg.get(i);
        if e.is_valid() && !e.access().is_legal() {
            return Err(MpuError::BadAccessRights);
        }
        if e.start() < current {
            return Err(MpuError::OutOfOrderMap);
        }
        if !entry::is_aligned(e.start(), align_bits) {
            return Err(MpuError::MapNotAligned);
        }
        current = e.start();
    }
    if alignment_required {
        let e0 = fg.get(0);
        if e0.is_valid() && e0.start() != 0 && !in_background(bg, e0.start()) {
            return Err(MpuError::MapNotAligned);
        }
        for i in 0..n - 1 {
            if !fg.get(i).is_valid()
                && fg.get(i + 1).is_valid()
                && !in_background(bg, fg.get(i + 1).start())
            {
                return Err(MpuError::MapNotAligned);
            }
        }
    }
    Ok(())
}
