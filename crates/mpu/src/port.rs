//! Hardware capability trait.
//!
//! The engine never touches registers directly; the platform hands it this
//! port and every descriptor write, cache maintenance operation and
//! power-control update goes through it. Tests substitute an in-memory fake
//! that re-validates the map after every single-entry write.

use crate::entry::MpuEntry;

/// Platform capabilities consumed by the region-attribute engine.
///
/// Single-entry descriptor writes must take effect immediately: the hardware
/// evaluates the table while it is being edited, and the engine's whole
/// correctness argument is built on one-write-at-a-time visibility.
pub trait MpuPort {
    /// Number of foreground descriptors this MPU implements
    /// (at most [`crate::MPU_MAX_ENTRIES`]).
    fn foreground_len(&self) -> usize;

    /// Copies the live foreground descriptors into `buf`
    /// (`buf.len() >= foreground_len()`).
    fn read_foreground(&self, buf: &mut [MpuEntry]);

    /// Writes one live foreground descriptor. Immediately effective.
    fn write_foreground_entry(&mut self, index: usize, entry: MpuEntry);

    /// The boot-time background map: fully valid, ordered, first entry at
    /// address 0, covering the whole address space. Never mutated.
    fn background(&self) -> &[MpuEntry];

    /// log2 of the descriptor granularity.
    fn align_bits(&self) -> u32;

    /// True when foreground entries must align to background boundaries at
    /// the entry-0 and invalid-to-valid transition points.
    fn alignment_required(&self) -> bool;

    /// Data-cache line size in bytes; 0 when there is no data cache.
    fn dcache_line_size(&self) -> u32;

    /// Writes back dirty data-cache lines covering `[addr, addr + len)`.
    fn cache_writeback_region(&mut self, addr: u32, len: u32);

    /// Invalidates instruction- and data-cache lines covering
    /// `[addr, addr + len)`, writing back dirty data lines first.
    fn cache_invalidate_region(&mut self, addr: u32, len: u32);

    /// Writes back the entire data cache.
    fn cache_writeback_all(&mut self);

    /// Invalidates both caches entirely, writing back dirty data lines
    /// first.
    fn cache_invalidate_all(&mut self);

    /// Writes the per-512MB cache-disable hint register.
    fn write_cache_disable_mask(&mut self, mask: u8);
}
