//! Per-512MB cache-disable hint mask.
//!
//! The power-control register can switch cache lookup off for each 512MB
//! slice of the address space. A slice may only be switched off when no
//! cacheable mapping exists anywhere inside it, so both maps have to be
//! consulted: a foreground entry shadows the background below it, and an
//! invalid foreground entry exposes whatever background partitions it
//! spans.

use crate::entry::MpuEntry;
use crate::map::ForegroundMap;

/// Clears the disable bits for regions `first..=last`.
fn clear_span(current: u16, first_region: i32, last_region: i32) -> u16 {
    let span = ((1u16 << (last_region - first_region + 1)) - 1) << first_region;
    current & !span
}

/// Computes the cache-disable mask for the given maps: bit n (0 =
/// lowest 512MB) is set only when no cacheable sub-range exists in that
/// slice. Pure function; the caller writes the result to the register.
///
/// Both maps are scanned from the top of the address space downward, and a
/// slice is settled as soon as one cacheable mapping is found in it.
#[must_use]
pub fn calc_cache_disable_mask(fg: &ForegroundMap, bg: &[MpuEntry]) -> u8 {
    let mut disabled: u16 = 0xFF;
    let mut fg_index: isize = fg.len() as isize - 1;
    let mut bg_index: isize = bg.len() as isize - 1;
    let mut working_region: i32 = 7;
    let mut vaddr: u32 = 0xFFFF_FFFF;

    while bg_index >= 0 || fg_index >= 0 {
        if fg_index >= 0 && fg.get(fg_index as usize).is_valid() {
            let entry = fg.get(fg_index as usize);
            vaddr = entry.start();
            let ending_region = (vaddr >> 29) as i32;
            if ending_region <= working_region {
                if entry.mem_type().is_cacheable() {
                    disabled = clear_span(disabled, ending_region, working_region);
                    if ending_region == 0 {
                        return disabled as u8;
                    }
                    working_region = ending_region - 1;
                } else if vaddr & 0x1FFF_FFFF != 0 {
                    working_region = ending_region;
                } else {
                    // The entry starts exactly on a slice boundary; the
                    // slice is fully accounted for.
                    working_region = ending_region - 1;
                }
            }
        } else if bg_index >= 0
            && (fg_index <= 0 || fg.get(fg_index as usize - 1).is_valid())
            && vaddr != 0
        {
            // The gap below the last valid foreground entry (or the whole
            // space when none is left) falls through to the background.
            let low_addr = if fg_index >= 0 { fg.get(fg_index as usize).start() } else { 0 };
            while bg_index > 0 && bg[bg_index as usize].start() >= vaddr {
                bg_index -= 1;
            }
            let mut covered;
            loop {
                let bg_entry = &bg[bg_index as usize];
                covered = bg_entry.start().max(low_addr);
                let ending_region = (covered >> 29) as i32;
                if ending_region <= working_region {
                    if bg_entry.mem_type().is_cacheable() {
                        disabled = clear_span(disabled, ending_region, working_region);
                        if ending_region == 0 {
                            return disabled as u8;
                        }
                        working_region = ending_region - 1;
                    } else if covered & 0x1FFF_FFFF != 0 {
                        working_region = ending_region;
                    } else {
                        working_region = ending_region - 1;
                    }
                }
                bg_index -= 1;
                if covered <= low_addr || bg_index < 0 {
                    break;
                }
            }
            vaddr = covered;
        }
        fg_index -= 1;
        if vaddr == 0 {
            break;
        }
    }
    disabled as u8
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::{AccessRights, MemoryType};

    fn entry(start: u32, valid: bool, mt: MemoryType) -> MpuEntry {
        MpuEntry::new(start, valid, AccessRights::RWX, mt)
    }

    fn map_of(entries: &[MpuEntry]) -> ForegroundMap {
        let mut fg = ForegroundMap::new(entries.len());
        for (i, e) in entries.iter().enumerate() {
            fg.set(i, *e);
        }
        fg
    }

    #[test]
    fn cacheable_background_everywhere_clears_all_bits() {
        let bg = [entry(0, true, MemoryType::WRITEBACK)];
        let fg = map_of(&[entry(0, false, MemoryType::DEVICE)]);
        assert_eq!(calc_cache_disable_mask(&fg, &bg), 0x00);
    }

    #[test]
    fn uncacheable_space_disables_every_slice() {
        let bg = [entry(0, true, MemoryType::BYPASS)];
        let fg = map_of(&[entry(0, false, MemoryType::DEVICE)]);
        assert_eq!(calc_cache_disable_mask(&fg, &bg), 0xFF);
    }

    #[test]
    fn foreground_island_enables_only_its_slice() {
        let bg = [entry(0, true, MemoryType::BYPASS)];
        // One cacheable window in the third 512MB slice; the foreground
        // entries cover it exactly, slice-aligned on both sides.
        let fg = map_of(&[
            entry(0x4000_0000, true, MemoryType::WRITEBACK),
            entry(0x6000_0000, true, MemoryType::BYPASS),
        ]);
        assert_eq!(calc_cache_disable_mask(&fg, &bg), !(1u16 << 2) as u8);
    }

    #[test]
    fn high_cacheable_background_partition_counts() {
        let bg = [
            entry(0, true, MemoryType::BYPASS),
            entry(0xE000_0000, true, MemoryType::WRITEBACK),
        ];
        let fg = map_of(&[entry(0, false, MemoryType::DEVICE)]);
        // Only the top slice holds cacheable memory.
        assert_eq!(calc_cache_disable_mask(&fg, &bg), 0x7F);
    }

    #[test]
    fn invalid_window_exposes_cacheable_background() {
        let bg = [entry(0, true, MemoryType::WRITEBACK)];
        // Foreground forces bypass everywhere except an invalid window in
        // [0x2000_0000, 0x4000_0000), which falls through to write-back
        // background memory in slice 1.
        let fg = map_of(&[
            entry(0, true, MemoryType::BYPASS),
            entry(0x2000_0000, false, MemoryType::DEVICE),
            entry(0x4000_0000, true, MemoryType::BYPASS),
        ]);
        assert_eq!(calc_cache_disable_mask(&fg, &bg), !(1u16 << 1) as u8);
    }
}
