//! Runtime MPU region-attribute engine.
//!
//! The MPU is a small fixed-capacity table of descriptors the hardware
//! consults on every access: each entry maps everything from its start
//! address up to the next entry to one access-rights code and one memory
//! type, with invalid entries deferring to a boot-time background map.
//! This crate rewrites that table at runtime so an arbitrary address range
//! takes on new attributes while — at every intermediate single-entry
//! write — every other address keeps exactly the attributes it had. The
//! table is live throughout: other contexts keep loading and storing
//! while it is edited, so there is no disable-and-rebuild shortcut.
//!
//! The platform provides the raw capabilities ([`MpuPort`]); the engine
//! provides the algorithm. Mutating calls are not reentrant and must be
//! serialized by the caller; concurrent plain data accesses are safe by
//! construction.
//!
//! Unit tests run on the host against an in-memory port double that
//! re-validates the table after every single-entry write.

#![cfg_attr(not(any(feature = "std", test)), no_std)]

use afw_error::define_firmware_error;

pub mod cachedis;
mod commit;
mod editor;
pub mod entry;
pub mod map;
pub mod port;
mod region;
#[cfg(test)]
pub(crate) mod testing;

pub use cachedis::calc_cache_disable_mask;
pub use entry::{AccessRights, MemoryType, MpuEntry};
pub use map::{ForegroundMap, check_map, entry_for};
pub use port::MpuPort;
pub use region::{AccessRequest, MemTypeRequest, Mpu, RegionFlags};

/// Hardware ceiling on foreground descriptors.
pub const MPU_MAX_ENTRIES: usize = 32;

/// Hardware ceiling on background descriptors.
pub const MPU_MAX_BACKGROUND: usize = 8;

/// Sentinel for a region that runs to the top of the address space; such
/// a region needs no terminating descriptor.
pub const END_OF_SPACE: u32 = 0xFFFF_FFFF;

define_firmware_error! {
    /// Errors surfaced by the region-attribute engine.
    ///
    /// Input-validation errors are reported before any table mutation.
    /// `OutOfEntries` can surface mid-edit, but only after writes that did
    /// not change any effective attribute. `MapNotAligned` and
    /// `OutOfOrderMap` come from the validator, which production code only
    /// runs in debug builds.
    pub enum MpuError(0x02) {
        /// No reclaimable descriptor slots left for a new boundary
        OutOfEntries = 0x01 => "Out of MPU entries",
        /// Entry start violates a background alignment rule
        MapNotAligned = 0x02 => "Map entry not aligned",
        /// Reserved access-rights encoding
        BadAccessRights = 0x03 => "Bad access rights",
        /// Entry start addresses decrease across the map
        OutOfOrderMap = 0x04 => "Map entries out of order",
        /// Memory-type encoding wider than the 9-bit field
        BadMemoryType = 0x05 => "Bad memory type",
        /// Requested region has zero size
        ZeroSizedRegion = 0x06 => "Zero-sized region",
        /// Requested region wraps the address space
        InvalidAddressRange = 0x07 => "Invalid address range",
        /// Region not on granularity boundaries and exact fit requested
        Inexact = 0x08 => "Region boundaries inexact",
        /// Operation not available on this configuration
        Unsupported = 0x09 => "Unsupported operation",
    }
}
