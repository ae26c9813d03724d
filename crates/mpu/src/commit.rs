//! Cache-safe commit of new attributes over a structurally prepared range.
//!
//! By the time this phase runs, boundaries exist at the target range's
//! edges and everything outside the range is settled. What remains is
//! ordering-sensitive: a write-back line belonging to a region that is
//! about to become non-cacheable must be written back before the mapping
//! stops being cacheable, and stale lines must be invalidated before the
//! bypass mapping is relied on. The walk goes from the highest address
//! down so committed high entries are never disturbed again.

use log::debug;

use crate::entry::{AccessRights, MemoryType};
use crate::map::background_index;
use crate::port::MpuPort;

use crate::cachedis::calc_cache_disable_mask;
use crate::editor::MapSession;

/// Whole-cache fallback threshold, in data-cache lines: past this many
/// lines per segment, one whole-cache operation beats line-at-a-time
/// maintenance.
const WHOLE_CACHE_LINES: u32 = 32;

impl<P: MpuPort> MapSession<'_, P> {
    /// The next sub-segment start while walking the range downward: the
    /// region start, the previous entry's start, or the background
    /// boundary preceding the current entry, whichever is highest. Index 0
    /// implicitly starts at address 0.
    fn next_address_to_commit(&self, first: u32, index: usize) -> u32 {
        let current = self.fg.get(index).start();
        let prev = if index > 0 { self.fg.get(index - 1).start() } else { 0 };
        let bg = self.bg();
        let preceding_bg = bg[background_index(bg, current)].start();
        first.max(prev).max(preceding_bg)
    }

    /// Makes the segment owned by `fg[index]` (up to `end_of_segment`)
    /// safe against the memory-type change, issuing the minimum cache
    /// maintenance the transition needs.
    fn safe_region(
        &mut self,
        index: usize,
        end_of_segment: u32,
        new_type: MemoryType,
        writeback: bool,
        invalidate: bool,
        pending_invalidate_all: &mut bool,
    ) {
        let entry = self.fg.get(index);
        let length = end_of_segment.wrapping_sub(entry.start());
        if length == 0 {
            return;
        }
        let current_type = entry.mem_type();
        if new_type == current_type {
            return;
        }
        let new_is_wb = new_type.is_writeback();
        let new_is_cacheable = new_type.is_cacheable();
        // Moving to a write-back type never orphans data; and with both
        // automatic maintenance switches off (or only writeback off while
        // the target stays cacheable) there is nothing we are allowed to do.
        if new_is_wb || (!writeback && (!invalidate || new_is_cacheable)) {
            return;
        }
        let need_flush = writeback && current_type.is_writeback() && !new_is_wb;
        let need_invalidate = invalidate && current_type.is_cacheable() && !new_is_cacheable;

        let addr = entry.start();
        let threshold = WHOLE_CACHE_LINES.saturating_mul(self.port.dcache_line_size());
        let by_region = length < threshold;

        if need_flush {
            let mut demoted = self.fg.get(index);
            demoted.set_mem_type(current_type.to_writethrough());
            // Draining the cache through a no-access mapping would fault;
            // open the window for the duration of the writeback.
            if demoted.access() == AccessRights::NONE {
                demoted.set_access(AccessRights::RWX_RWX);
            }
            self.write_entry(index, demoted);
            if by_region {
                self.port.cache_writeback_region(addr, length);
            } else {
                debug!("mpu: segment past threshold, whole-cache writeback");
                self.port.cache_writeback_all();
            }
        }

        if need_invalidate {
            let mut bypassed = self.fg.get(index);
            bypassed.set_mem_type(MemoryType::BYPASS);
            self.write_entry(index, bypassed);
            if !*pending_invalidate_all {
                if by_region {
                    self.port.cache_invalidate_region(addr, length);
                } else {
                    // One whole-cache invalidate at the end of the walk
                    // covers every remaining segment.
                    *pending_invalidate_all = true;
                }
            }
        }
    }

    /// Safes and re-attributes every entry covering `[first, last)`,
    /// highest address first, then refreshes the cache-disable mask.
    ///
    /// A single foreground entry is reused to safe across each background
    /// partition it overlaps: its start is walked downward segment by
    /// segment, which is why the loop can decrement its index mid-flight.
    pub(crate) fn commit_region(
        &mut self,
        first: u32,
        last: u32,
        new_type: MemoryType,
        new_access: AccessRights,
        writeback: bool,
        invalidate: bool,
    ) {
        self.port.write_cache_disable_mask(0);
        let n = self.fg.len();
        let mut pending_invalidate_all = false;
        for start_index in (0..n).rev() {
            if self.fg.get(start_index).start() >= last {
                continue;
            }
            let mut index = start_index;
            self.safe_region(index, last, new_type, writeback, invalidate, &mut pending_invalidate_all);
            loop {
                let next = self.next_address_to_commit(first, index);
                if index > 0 && next == self.fg.get(index - 1).start() {
                    index -= 1;
                }
                let mut moved = self.fg.get(index);
                moved.set_start(next);
                // Snapshot only: the live entry is rewritten either by the
                // safing below or by the final attribute pass.
                self.fg.set(index, moved);
                self.safe_region(index, last, new_type, writeback, invalidate, &mut pending_invalidate_all);
                if next <= first {
                    break;
                }
            }
            if pending_invalidate_all {
                debug!("mpu: whole-cache invalidate for committed range");
                self.port.cache_invalidate_all();
            }
            let mut k = index;
            while k < n && self.fg.get(k).start() < last {
                let mut committed = self.fg.get(k);
                committed.set_mem_type(new_type);
                committed.set_access(new_access);
                committed.set_valid(true);
                self.write_entry(k, committed);
                k += 1;
            }
            break;
        }
        let mask = calc_cache_disable_mask(&self.fg, self.bg());
        self.port.write_cache_disable_mask(mask);
    }
}
