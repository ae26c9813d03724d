//! Public region-attribute surface.
//!
//! [`Mpu`] owns the platform port and exposes the one mutating operation,
//! [`Mpu::set_region_attributes`], plus read-only inspection of both maps.
//! Callers must serialize mutating calls themselves: the engine is
//! single-mutator by contract and takes no locks. Concurrent data accesses
//! from other contexts are safe throughout, which is the whole point of
//! the one-entry-at-a-time editing discipline.

use bitflags::bitflags;
use log::debug;

use crate::MpuError;
use crate::cachedis::calc_cache_disable_mask;
use crate::editor::MapSession;
use crate::entry::{self, AccessRights, MemoryType, MpuEntry};
use crate::map::{self, ForegroundMap};
use crate::port::MpuPort;
use crate::{END_OF_SPACE, MPU_MAX_ENTRIES};

bitflags! {
    /// Behavior switches for [`Mpu::set_region_attributes`].
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct RegionFlags: u32 {
        /// Fail with `Inexact` instead of rounding a misaligned range.
        const EXACT = 1 << 0;
        /// Round inward so the affected range never exceeds the request.
        const NO_PARTIAL = 1 << 1;
        /// Suppress the automatic cache writeback; the caller owns it.
        const NO_AUTO_WRITEBACK = 1 << 2;
        /// Suppress the automatic cache invalidate; the caller owns it.
        const NO_AUTO_INVALIDATE = 1 << 3;
    }
}

/// Requested access rights: a concrete encoding, or whatever the region's
/// first address currently has.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessRequest {
    UseExisting,
    Rights(AccessRights),
}

/// Requested memory type: a concrete encoding, or whatever the region's
/// first address currently has.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemTypeRequest {
    UseExisting,
    Of(MemoryType),
}

/// The region-attribute engine, bound to one platform port.
pub struct Mpu<P: MpuPort> {
    port: P,
}

impl<P: MpuPort> Mpu<P> {
    pub fn new(port: P) -> Self {
        Mpu { port }
    }

    pub fn port(&self) -> &P {
        &self.port
    }

    pub fn into_port(self) -> P {
        self.port
    }

    /// The boot-time background map.
    pub fn background(&self) -> &[MpuEntry] {
        self.port.background()
    }

    /// Snapshot of the live foreground table.
    pub fn read_map(&self) -> ForegroundMap {
        let n = self.port.foreground_len().min(MPU_MAX_ENTRIES);
        let mut buf = [MpuEntry::INVALID; MPU_MAX_ENTRIES];
        self.port.read_foreground(&mut buf[..n]);
        let mut fg = ForegroundMap::new(n);
        for (i, e) in buf[..n].iter().enumerate() {
            fg.set(i, *e);
        }
        fg
    }

    /// The entry governing `addr` right now, and whether it came from the
    /// foreground map.
    pub fn entry_for_address(&self, addr: u32) -> (MpuEntry, bool) {
        map::entry_for(&self.read_map(), self.port.background(), addr)
    }

    /// Validates the live foreground table against the map invariants.
    pub fn check_map(&self) -> Result<(), MpuError> {
        map::check_map(
            &self.read_map(),
            self.port.background(),
            self.port.align_bits(),
            self.port.alignment_required(),
        )
    }

    /// The cache-disable mask the current maps call for.
    pub fn cache_disable_mask(&self) -> u8 {
        calc_cache_disable_mask(&self.read_map(), self.port.background())
    }

    /// Applies `access` and `mem_type` to `[vaddr, vaddr + size)`.
    ///
    /// The table stays hardware-consumable through every intermediate
    /// write, and no address outside the (granularity-adjusted) range
    /// changes its effective attributes at any point — including when the
    /// call fails. On success the whole range carries the requested
    /// attributes.
    pub fn set_region_attributes(
        &mut self,
        vaddr: u32,
        size: u32,
        access: AccessRequest,
        mem_type: MemTypeRequest,
        flags: RegionFlags,
    ) -> Result<(), MpuError> {
        if size == 0 {
            return Err(MpuError::ZeroSizedRegion);
        }
        let first = vaddr;
        let mut last = first.wrapping_add(size);
        // A region ending exactly at the top of the address space becomes
        // the end-of-space sentinel instead of an inclusive end address.
        if last != END_OF_SPACE {
            last = last.wrapping_sub(1);
        }
        if first >= last {
            return Err(MpuError::InvalidAddressRange);
        }

        let access = match access {
            AccessRequest::UseExisting => self.entry_for_address(vaddr).0.access(),
            AccessRequest::Rights(requested) => {
                if !requested.is_legal() {
                    return Err(MpuError::BadAccessRights);
                }
                requested
            }
        };
        let mem_type = match mem_type {
            MemTypeRequest::UseExisting => self.entry_for_address(vaddr).0.mem_type(),
            MemTypeRequest::Of(requested) => {
                if !requested.is_legal() {
                    return Err(MpuError::BadMemoryType);
                }
                requested
            }
        };

        let align_bits = self.port.align_bits();
        if flags.contains(RegionFlags::EXACT)
            && (!entry::is_aligned(first, align_bits)
                || !entry::is_aligned(last.wrapping_add(1), align_bits))
        {
            return Err(MpuError::Inexact);
        }

        let round_first_up = flags.contains(RegionFlags::NO_PARTIAL);
        let first = if round_first_up {
            entry::align_up(first, align_bits)
        } else {
            entry::align_down(first, align_bits)
        };
        if last != END_OF_SPACE {
            last = if round_first_up {
                entry::align_down(last.wrapping_add(1), align_bits)
            } else {
                entry::align_up(last.wrapping_add(1), align_bits)
            };
            if first >= last {
                // Rounding inward can consume the whole request; outward
                // rounding cannot, so without NO_PARTIAL this is a no-op.
                return if round_first_up { Err(MpuError::ZeroSizedRegion) } else { Ok(()) };
            }
        }

        debug!(
            "mpu: set_region_attributes [{first:#010x}, {last:#010x}) ar={:#x} mt={:#05x} flags={flags:?}",
            access.raw(),
            mem_type.raw()
        );

        let mut session = MapSession::new(&mut self.port);
        session.add_region(
            first,
            last,
            access,
            mem_type,
            !flags.contains(RegionFlags::NO_AUTO_WRITEBACK),
            !flags.contains(RegionFlags::NO_AUTO_INVALIDATE),
        )
    }
}
