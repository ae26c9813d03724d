//! Structural editing of the live foreground map.
//!
//! Every mutation here is a single-entry write that is immediately visible
//! to the hardware, so each one must leave the effective attribute of every
//! address outside the target range untouched. The only writes allowed are
//! therefore duplications of adjacent entries (zero-width shuffles),
//! promotions of invalid markers to their current background attributes,
//! and insertions whose attributes equal what the address already resolves
//! to. Attributes only actually change in the commit phase.

use log::{debug, trace};

use crate::MpuError;
use crate::entry::MpuEntry;
use crate::map::{
    self, ForegroundMap, background_index, count_available, entry_for, find_insertion_point,
    in_background, needed_entries_exist, smallest_entry_ge,
};
use crate::port::MpuPort;
use crate::{END_OF_SPACE, MPU_MAX_BACKGROUND, MPU_MAX_ENTRIES};

/// Entries a single region edit can consume in the worst case.
pub(crate) fn worst_case_entries(alignment_required: bool) -> usize {
    if alignment_required { 3 } else { 2 }
}

/// One region-attribute edit in flight: the port plus an in-memory snapshot
/// of both tables. The snapshot is authoritative for decisions; the live
/// table is updated through [`MapSession::write_entry`] only, which keeps
/// the two in lockstep.
pub(crate) struct MapSession<'p, P: MpuPort> {
    pub(crate) port: &'p mut P,
    pub(crate) fg: ForegroundMap,
    bg: [MpuEntry; MPU_MAX_BACKGROUND],
    bg_len: usize,
    pub(crate) align_bits: u32,
    pub(crate) align_req: bool,
}

impl<'p, P: MpuPort> MapSession<'p, P> {
    pub(crate) fn new(port: &'p mut P) -> Self {
        let n = port.foreground_len().min(MPU_MAX_ENTRIES);
        let mut fg = ForegroundMap::new(n);
        let mut buf = [MpuEntry::INVALID; MPU_MAX_ENTRIES];
        port.read_foreground(&mut buf[..n]);
        for (i, e) in buf[..n].iter().enumerate() {
            fg.set(i, *e);
        }
        let src = port.background();
        let bg_len = src.len().min(MPU_MAX_BACKGROUND);
        let mut bg = [MpuEntry::INVALID; MPU_MAX_BACKGROUND];
        bg[..bg_len].copy_from_slice(&src[..bg_len]);
        MapSession {
            align_bits: port.align_bits(),
            align_req: port.alignment_required(),
            port,
            fg,
            bg,
            bg_len,
        }
    }

    pub(crate) fn bg(&self) -> &[MpuEntry] {
        &self.bg[..self.bg_len]
    }

    /// Commits one entry to the live table and mirrors it in the snapshot.
    /// In debug builds the whole map is re-validated afterwards: the table
    /// must be hardware-consumable after every single write.
    pub(crate) fn write_entry(&mut self, index: usize, entry: MpuEntry) {
        trace!(
            "mpu: entry[{}] <- {:#010x} valid={} ar={:#x} mt={:#05x}",
            index,
            entry.start(),
            entry.is_valid(),
            entry.access().raw(),
            entry.mem_type().raw()
        );
        self.port.write_foreground_entry(index, entry);
        self.fg.set(index, entry);
        debug_assert_eq!(
            map::check_map(&self.fg, &self.bg[..self.bg_len], self.align_bits, self.align_req),
            Ok(())
        );
    }

    /// Shifts `fg[dup+1..idx]` one slot down onto the duplicate at `dup`,
    /// freeing the slot at `idx - 1`. Each write copies an adjacent entry,
    /// so no lookup result changes at any point.
    fn slide_up(&mut self, dup: usize, idx: usize) {
        let mut i = dup;
        while i + 1 < idx {
            let e = self.fg.get(i + 1);
            self.write_entry(i, e);
            i += 1;
        }
    }

    /// Shifts `fg[idx..dup]` one slot up onto the duplicate at `dup`,
    /// freeing the slot at `idx`.
    fn slide_down(&mut self, dup: usize, idx: usize) {
        let mut i = dup;
        while i > idx {
            let e = self.fg.get(i - 1);
            self.write_entry(i, e);
            i -= 1;
        }
    }

    /// Shuffles reclaimable slots (duplicate starts, leading invalid
    /// entries) to the insertion point `ip` until `needed` of them sit
    /// there, preferring the closest candidates to keep the number of
    /// shuffles down. Returns the shifted insertion point.
    ///
    /// On `OutOfEntries` every write already performed was a duplication,
    /// so the map's observable semantics are unchanged.
    pub(crate) fn bubble_free_to(&mut self, ip: usize, needed: usize) -> Result<usize, MpuError> {
        if needed == 0 {
            return Ok(ip);
        }
        let mut needed = needed;
        let mut rv = ip;
        // Duplicates below the insertion point, nearest first.
        let mut i = ip as isize - 2;
        while i >= 0 && needed > 0 {
            let iu = i as usize;
            if self.fg.get(iu).start() == self.fg.get(iu + 1).start() {
                self.slide_up(iu, ip);
                rv -= 1;
                needed -= 1;
            }
            i -= 1;
        }
        // Leading invalid entries squeeze out the same way.
        while needed > 0 && rv > 0 && !self.fg.get(0).is_valid() {
            self.slide_up(0, ip);
            rv -= 1;
            needed -= 1;
        }
        // Duplicates above the insertion point, nearest first.
        let mut i = ip + 1;
        while i < self.fg.len() && needed > 0 {
            if self.fg.get(i).start() == self.fg.get(i - 1).start() {
                self.slide_down(i, ip);
                needed -= 1;
            } else {
                i += 1;
            }
        }
        if needed > 0 {
            return Err(MpuError::OutOfEntries);
        }
        Ok(rv)
    }

    /// Compaction: collapses runs of entries that resolve identically to
    /// their predecessor into duplicates, so `bubble_free_to` can reclaim
    /// them. Entries sitting on background boundaries are kept; under the
    /// alignment requirement they anchor invalid-to-valid transitions.
    pub(crate) fn remove_inaccessible_entries(&mut self) {
        for i in 1..self.fg.len() {
            let prev = self.fg.get(i - 1);
            let cur = self.fg.get(i);
            let on_boundary = in_background(&self.bg[..self.bg_len], cur.start());
            let shadowed = cur.is_valid() == prev.is_valid()
                && cur.start() > prev.start()
                && cur.mem_type() == prev.mem_type()
                && cur.access() == prev.access();
            let both_invalid = !cur.is_valid() && !prev.is_valid();
            if (shadowed || both_invalid) && !on_boundary {
                self.write_entry(i, prev);
            }
        }
    }

    /// When a valid boundary is about to land at `ip` right after an
    /// invalid marker, and both addresses fall in the same background
    /// partition (and `first` itself is not a background boundary), the
    /// marker is promoted to a valid entry carrying its current background
    /// attributes. Leaving it invalid would break the alignment rule the
    /// moment the new valid entry appears after it.
    fn handle_invalid_predecessor(&mut self, first: u32, ip: usize) {
        if ip == 0 || self.fg.get(ip - 1).is_valid() {
            return;
        }
        let pred_addr = self.fg.get(ip - 1).start();
        let mut first_in_bg = false;
        let mut first_bg_index: Option<usize> = None;
        let mut pred_bg_index: Option<usize> = None;
        for i in (0..self.bg_len).rev() {
            let addr = self.bg[i].start();
            if addr == first {
                first_in_bg = true;
            }
            if addr < pred_addr && pred_bg_index.is_none() {
                pred_bg_index = Some(i);
            }
            if addr < first && first_bg_index.is_none() {
                first_bg_index = Some(i);
            }
        }
        if !first_in_bg && first_bg_index == pred_bg_index {
            let (mut promoted, _) = entry_for(&self.fg, &self.bg[..self.bg_len], pred_addr);
            promoted.set_start(pred_addr);
            self.write_entry(ip - 1, promoted);
        }
    }

    /// Ensures an entry exists at `first` carrying whatever attributes
    /// `first` currently resolves to. Needs at most one free slot. With
    /// `as_invalid`, and when `first` currently resolves to the background,
    /// the entry is written invalid instead (a plain defer-to-background
    /// marker, which cannot disturb any following entry's attributes).
    pub(crate) fn insert_boundary(&mut self, first: u32, as_invalid: bool) -> Result<(), MpuError> {
        let mut ip = 0;
        let mut found = false;
        for i in (0..self.fg.len()).rev() {
            if self.fg.get(i).start() == first {
                if self.fg.get(i).is_valid() || as_invalid {
                    return Ok(());
                }
                found = true;
                ip = i;
                break;
            }
        }
        if !found {
            if count_available(&self.fg) == 0 {
                return Err(MpuError::OutOfEntries);
            }
            ip = find_insertion_point(&self.fg, first);
            ip = self.bubble_free_to(ip, 1)?;
        }
        if !as_invalid {
            self.handle_invalid_predecessor(first, ip);
        }
        let (mut entry, in_fg) = entry_for(&self.fg, &self.bg[..self.bg_len], first);
        if as_invalid && !in_fg {
            // Resolving through the foreground means a later entry depends
            // on this one staying valid; only background-resolved addresses
            // may get an invalid marker.
            entry.set_valid(false);
        }
        entry.set_start(first);
        self.write_entry(ip, entry);
        Ok(())
    }

    /// Creates the background-aligning entries required before a valid
    /// boundary can exist at `x` with no valid entry below it. May first
    /// cap the scope of the duplicates with a limiting entry at a higher
    /// address.
    pub(crate) fn create_aligning_entries(&mut self, x: u32) -> Result<(), MpuError> {
        if !self.align_req {
            return Ok(());
        }
        let preceding_bg_addr = self.bg[background_index(&self.bg[..self.bg_len], x)].start();
        let mut next_entry_address = 0u32;
        let mut next_entry_valid = false;
        for i in (0..self.fg.len()).rev() {
            let e = self.fg.get(i);
            if e.start() < x {
                if e.is_valid() {
                    // A valid entry immediately below the new boundary
                    // already satisfies the alignment rule.
                    return Ok(());
                }
                break;
            }
            next_entry_address = e.start();
            next_entry_valid = e.is_valid();
        }

        if next_entry_address == 0
            || !next_entry_valid
            || in_background(&self.bg[..self.bg_len], next_entry_address)
        {
            // An invalid marker at the start of the new region is enough:
            // whatever follows is either invalid too or sits on a
            // background boundary, so no alignment rule can break.
            self.insert_boundary(x, true)?;
        } else {
            let next_bg_start = self.bg[..self.bg_len]
                .iter()
                .find(|e| e.start() > x)
                .map(MpuEntry::start);
            match next_bg_start {
                Some(nbs) if next_entry_address != nbs => {
                    // A background split lies between x and the next
                    // existing entry: pin the current attributes at the
                    // enclosing entry's start, then cap with an invalid
                    // marker at the entry mapping that split.
                    let anchor = entry_for(&self.fg, &self.bg[..self.bg_len], x).0.start();
                    self.insert_boundary(anchor, false)?;
                    let cap = entry_for(&self.fg, &self.bg[..self.bg_len], nbs).0.start();
                    self.insert_boundary(cap, true)?;
                }
                _ => {
                    // The next existing entry already sits on the next
                    // background boundary (or there is none above x); it
                    // limits the aligning entry's scope by itself.
                }
            }
        }

        if x != preceding_bg_addr {
            self.insert_boundary(preceding_bg_addr, false)?;
        }
        Ok(())
    }

    /// The address the region's first inserted boundary should use: the
    /// highest background start strictly inside `(first, end)` if any,
    /// else `first` itself.
    fn start_initial_region(&self, first: u32, end: u32) -> u32 {
        for i in (0..self.bg_len).rev() {
            let addr = self.bg[i].start();
            if addr <= first {
                break;
            }
            if addr < end {
                return addr;
            }
        }
        first
    }

    /// The structural phase followed by the commit phase for
    /// `[first, last)`. On any error the map's observable semantics are
    /// exactly what they were before the call.
    pub(crate) fn add_region(
        &mut self,
        first: u32,
        last: u32,
        access: crate::entry::AccessRights,
        mem_type: crate::entry::MemoryType,
        writeback: bool,
        invalidate: bool,
    ) -> Result<(), MpuError> {
        if !needed_entries_exist(&self.fg, first, last) {
            // Compact before any reshaping: once boundary creation starts,
            // freshly made duplicates must survive until bubbled.
            if count_available(&self.fg) < worst_case_entries(self.align_req) {
                debug!("mpu: map tight, compacting shadowed entries");
                self.remove_inaccessible_entries();
            }

            self.create_aligning_entries(first)?;

            // Terminating boundary. End-of-space needs none; an existing
            // entry at `last` needs none; otherwise an invalid marker at
            // `last`, preceded by an aligning duplicate when a background
            // split separates `last` from the next existing entry.
            if last != END_OF_SPACE {
                let x = smallest_entry_ge(&self.fg, last);
                if last == x {
                    // Boundary already present.
                } else if last > x {
                    self.insert_boundary(last, true)?;
                } else {
                    let pbg =
                        self.bg[background_index(&self.bg[..self.bg_len], x)].start();
                    if pbg != x && pbg > last {
                        if self.align_req {
                            self.insert_boundary(pbg, false)?;
                        }
                        self.insert_boundary(last, true)?;
                    } else {
                        self.insert_boundary(last, true)?;
                    }
                }
            }

            let initial = self.start_initial_region(first, last);
            self.insert_boundary(initial, false)?;
        }

        self.commit_region(first, last, mem_type, access, writeback, invalidate);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::{AccessRights, MemoryType};
    use crate::testing::FakePort;

    fn bg_split() -> Vec<MpuEntry> {
        vec![
            MpuEntry::new(0, true, AccessRights::RWX, MemoryType::WRITEBACK),
            MpuEntry::new(0x2000_0000, true, AccessRights::RW, MemoryType::BYPASS),
        ]
    }

    #[test]
    fn bubble_pulls_duplicates_from_below() {
        let mut port = FakePort::all_background(6, bg_split(), 16, false);
        port.entries[0] = MpuEntry::new(0, true, AccessRights::RWX, MemoryType::WRITEBACK);
        port.entries[1] = MpuEntry::new(0x1000_0000, true, AccessRights::RW, MemoryType::BYPASS);
        port.entries[2] = MpuEntry::new(0x1000_0000, true, AccessRights::RW, MemoryType::BYPASS);
        port.entries[3] = MpuEntry::new(0x3000_0000, true, AccessRights::RW, MemoryType::BYPASS);
        port.entries[4] = MpuEntry::new(0x4000_0000, true, AccessRights::R, MemoryType::BYPASS);
        port.entries[5] = MpuEntry::new(0x4000_0000, true, AccessRights::R, MemoryType::BYPASS);

        let before = port.attribute_snapshot();
        let mut session = MapSession::new(&mut port);
        let ip = session.bubble_free_to(4, 1).expect("one duplicate below");
        assert_eq!(ip, 3);
        // The freed slot duplicates a neighbor, everything still resolves
        // identically.
        assert_eq!(port.attribute_snapshot(), before);
    }

    #[test]
    fn bubble_reports_exhaustion_without_damage() {
        let mut port = FakePort::all_background(4, bg_split(), 16, false);
        port.entries[0] = MpuEntry::new(0, true, AccessRights::RWX, MemoryType::WRITEBACK);
        port.entries[1] = MpuEntry::new(0x1000_0000, true, AccessRights::RW, MemoryType::BYPASS);
        port.entries[2] = MpuEntry::new(0x3000_0000, true, AccessRights::R, MemoryType::BYPASS);
        port.entries[3] = MpuEntry::new(0x4000_0000, true, AccessRights::R, MemoryType::WRITETHRU);

        let before = port.attribute_snapshot();
        let mut session = MapSession::new(&mut port);
        assert_eq!(session.bubble_free_to(2, 1), Err(MpuError::OutOfEntries));
        assert_eq!(port.attribute_snapshot(), before);
    }

    #[test]
    fn insert_boundary_duplicates_current_attributes() {
        let mut port = FakePort::all_background(8, bg_split(), 16, false);
        let before = port.attribute_snapshot();

        let mut session = MapSession::new(&mut port);
        // Cap the scope first, the way add_region orders its insertions: a
        // lone valid entry would otherwise claim everything above it.
        session.insert_boundary(0x2000_0000, true).expect("slot available");
        session.insert_boundary(0x1000_0000, false).expect("slot available");

        let (e, in_fg) = port.effective(0x1000_0000);
        assert!(in_fg);
        // Same attributes the background gave the address before.
        assert_eq!(e.access(), AccessRights::RWX);
        assert_eq!(e.mem_type(), MemoryType::WRITEBACK);
        assert_eq!(port.attribute_snapshot(), before);
    }

    #[test]
    fn insert_boundary_prefers_invalid_marker_over_duplication() {
        let mut port = FakePort::all_background(8, bg_split(), 16, false);
        let before = port.attribute_snapshot();

        let mut session = MapSession::new(&mut port);
        session.insert_boundary(0x3000_0000, true).expect("slot available");

        // Background-resolved address: the marker stays invalid.
        let (_, in_fg) = port.effective(0x3000_0000);
        assert!(!in_fg);
        assert_eq!(port.attribute_snapshot(), before);
    }

    #[test]
    fn compaction_collapses_shadowed_entries() {
        let mut port = FakePort::all_background(6, bg_split(), 16, false);
        port.entries[0] = MpuEntry::new(0, true, AccessRights::RWX, MemoryType::WRITEBACK);
        // Same attributes as entry 0: shadowed, reclaimable.
        port.entries[1] = MpuEntry::new(0x0800_0000, true, AccessRights::RWX, MemoryType::WRITEBACK);
        port.entries[2] = MpuEntry::new(0x1000_0000, true, AccessRights::RW, MemoryType::BYPASS);
        port.entries[3] = MpuEntry::new(0x3000_0000, true, AccessRights::RW, MemoryType::BYPASS);
        port.entries[4] = MpuEntry::new(0x4000_0000, true, AccessRights::RW, MemoryType::BYPASS);
        port.entries[5] = MpuEntry::new(0x5000_0000, true, AccessRights::RW, MemoryType::BYPASS);

        let before = port.attribute_snapshot();
        let mut session = MapSession::new(&mut port);
        assert_eq!(count_available(&session.fg), 0);
        session.remove_inaccessible_entries();
        // Entries 1, 3, 4 and 5 all repeat their predecessor's attributes.
        assert!(count_available(&session.fg) >= 3);
        assert_eq!(port.attribute_snapshot(), before);
    }

    #[test]
    fn compaction_keeps_background_boundaries() {
        let mut port = FakePort::all_background(3, bg_split(), 16, true);
        port.entries[0] = MpuEntry::new(0, true, AccessRights::RW, MemoryType::BYPASS);
        // Sits exactly on the 0x2000_0000 background boundary with the same
        // attributes as its predecessor; still must not be collapsed.
        port.entries[1] = MpuEntry::new(0x2000_0000, true, AccessRights::RW, MemoryType::BYPASS);
        port.entries[2] = MpuEntry::new(0x3000_0000, true, AccessRights::R, MemoryType::BYPASS);

        let mut session = MapSession::new(&mut port);
        session.remove_inaccessible_entries();
        assert_eq!(session.fg.get(1).start(), 0x2000_0000);
        assert_eq!(count_available(&session.fg), 0);
    }
}
