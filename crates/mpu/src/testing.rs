//! In-memory hardware double for host tests.
//!
//! [`FakePort`] stands in for the live MPU: it keeps the descriptor table
//! in a plain vector, re-validates the whole map after every single-entry
//! write (the hardware consumes the table between any two writes, so every
//! intermediate state must be well-formed), and records every cache
//! maintenance operation and mask write for the tests to inspect.

use crate::entry::MpuEntry;
use crate::map::{self, ForegroundMap};
use crate::port::MpuPort;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CacheOp {
    WritebackRegion(u32, u32),
    InvalidateRegion(u32, u32),
    WritebackAll,
    InvalidateAll,
    DisableMask(u8),
}

pub(crate) struct FakePort {
    pub entries: Vec<MpuEntry>,
    pub bg: Vec<MpuEntry>,
    pub align_bits: u32,
    pub align_req: bool,
    pub line_size: u32,
    pub ops: Vec<CacheOp>,
    pub writes: Vec<(usize, MpuEntry)>,
}

impl FakePort {
    /// A reset-state table: every slot an invalid defer-to-background
    /// marker at address 0.
    pub fn all_background(n: usize, bg: Vec<MpuEntry>, align_bits: u32, align_req: bool) -> Self {
        FakePort {
            entries: vec![MpuEntry::INVALID; n],
            bg,
            align_bits,
            align_req,
            line_size: 64,
            ops: Vec::new(),
            writes: Vec::new(),
        }
    }

    pub fn as_map(&self) -> ForegroundMap {
        let mut fg = ForegroundMap::new(self.entries.len());
        for (i, e) in self.entries.iter().enumerate() {
            fg.set(i, *e);
        }
        fg
    }

    /// The effective-attribute oracle over the fake's current state.
    pub fn effective(&self, addr: u32) -> (MpuEntry, bool) {
        map::entry_for(&self.as_map(), &self.bg, addr)
    }

    /// Sample address for snapshot index `i`: one probe per 64KB granule.
    pub fn sample_addr(i: usize) -> u32 {
        (i as u32) << 16
    }

    /// Effective (rights, type) at every 64KB granule. Two snapshots taken
    /// around an operation prove which addresses it touched.
    pub fn attribute_snapshot(&self) -> Vec<(u8, u16)> {
        let fg = self.as_map();
        (0..=u32::MAX >> 16)
            .map(|i| {
                let (e, _) = map::entry_for(&fg, &self.bg, i << 16);
                (e.access().raw(), e.mem_type().raw())
            })
            .collect()
    }

    /// Cache maintenance operations issued so far, mask writes excluded.
    pub fn cache_ops(&self) -> Vec<CacheOp> {
        self.ops
            .iter()
            .filter(|op| !matches!(op, CacheOp::DisableMask(_)))
            .copied()
            .collect()
    }

    /// Every value written to the cache-disable register, in order.
    pub fn disable_mask_writes(&self) -> Vec<u8> {
        self.ops
            .iter()
            .filter_map(|op| match op {
                CacheOp::DisableMask(m) => Some(*m),
                _ => None,
            })
            .collect()
    }

    pub fn count_reclaimable(&self) -> usize {
        map::count_available(&self.as_map())
    }
}

impl MpuPort for FakePort {
    fn foreground_len(&self) -> usize {
        self.entries.len()
    }

    fn read_foreground(&self, buf: &mut [MpuEntry]) {
        buf[..self.entries.len()].copy_from_slice(&self.entries);
    }

    fn write_foreground_entry(&mut self, index: usize, entry: MpuEntry) {
        assert!(index < self.entries.len(), "descriptor index out of range");
        self.entries[index] = entry;
        self.writes.push((index, entry));
        // The hardware evaluates the table after every single write; a
        // transiently malformed map is a real bug, not a test artifact.
        assert_eq!(
            map::check_map(&self.as_map(), &self.bg, self.align_bits, self.align_req),
            Ok(()),
            "live table malformed after writing entry {index}"
        );
    }

    fn background(&self) -> &[MpuEntry] {
        &self.bg
    }

    fn align_bits(&self) -> u32 {
        self.align_bits
    }

    fn alignment_required(&self) -> bool {
        self.align_req
    }

    fn dcache_line_size(&self) -> u32 {
        self.line_size
    }

    fn cache_writeback_region(&mut self, addr: u32, len: u32) {
        self.ops.push(CacheOp::WritebackRegion(addr, len));
    }

    fn cache_invalidate_region(&mut self, addr: u32, len: u32) {
        self.ops.push(CacheOp::InvalidateRegion(addr, len));
    }

    fn cache_writeback_all(&mut self) {
        self.ops.push(CacheOp::WritebackAll);
    }

    fn cache_invalidate_all(&mut self) {
        self.ops.push(CacheOp::InvalidateAll);
    }

    fn write_cache_disable_mask(&mut self, mask: u8) {
        self.ops.push(CacheOp::DisableMask(mask));
    }
}
