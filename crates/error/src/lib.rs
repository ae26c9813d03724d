//! Firmware error handling infrastructure.
//!
//! Provides the `define_firmware_error!` macro for consistent error type
//! definitions across subsystem crates. Every error type carries a one-byte
//! subsystem identifier so a bare `u16` code seen in a log line can be traced
//! back to the crate that produced it.
//!
//! ## Usage
//!
//! ### Simple errors (no inner data)
//! ```ignore
//! define_firmware_error! {
//!     pub enum DmaError(0x04) {
//!         ChannelBusy = 0x01 => "DMA channel busy",
//!         BadBurstSize = 0x02 => "Unsupported burst size",
//!     }
//! }
//! ```
//!
//! ### Nested errors (with inner error type)
//! ```ignore
//! define_firmware_error! {
//!     pub enum LoadError(0x06) {
//!         Image(ImageError) = 0x01 => "Image parsing failed",
//!         Map(MpuError) = 0x02 => "Memory map update failed",
//!     }
//! }
//! ```

#![no_std]

/// Defines a firmware error type with consistent code/name/Display handling.
///
/// Supports both simple variants and nested variants containing inner errors.
#[macro_export]
macro_rules! define_firmware_error {
    (
        $(#[$meta:meta])*
        $vis:vis enum $name:ident($subsystem:literal) {
            $(
                $(#[$variant_meta:meta])*
                $variant:ident $(($inner:ty))? = $code:literal => $desc:literal
            ),* $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        $vis enum $name {
            $(
                $(#[$variant_meta])*
                $variant $(($inner))?,
            )*
        }

        impl $name {
            /// Subsystem identifier for this error type.
            pub const SUBSYSTEM: u8 = $subsystem;

            /// Numeric error code: subsystem byte in the high half,
            /// variant code in the low half.
            pub const fn code(&self) -> u16 {
                match self {
                    $(
                        $crate::define_firmware_error!(@pattern $variant $(($inner))? _unused) => {
                            (($subsystem as u16) << 8) | $code
                        }
                    )*
                }
            }

            /// Short description for logging.
            pub const fn name(&self) -> &'static str {
                match self {
                    $(
                        $crate::define_firmware_error!(@pattern $variant $(($inner))? _unused) => {
                            $desc
                        }
                    )*
                }
            }
        }

        impl core::fmt::Display for $name {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                match self {
                    $(
                        $crate::define_firmware_error!(@pattern $variant $(($inner))? inner) => {
                            $crate::define_firmware_error!(@display_body self f $desc $(($inner))? inner)
                        }
                    )*
                }
            }
        }

        impl core::error::Error for $name {}
    };

    // Helper to generate patterns
    (@pattern $variant:ident ($inner:ty) $bind:ident) => { Self::$variant($bind) };
    (@pattern $variant:ident $bind:ident) => { Self::$variant };

    // Helper to generate display bodies
    (@display_body $self:ident $f:ident $desc:literal ($inner:ty) $bind:ident) => {
        write!($f, "E{:04X}: {} ({})", $self.code(), $desc, $bind)
    };
    (@display_body $self:ident $f:ident $desc:literal $bind:ident) => {
        write!($f, "E{:04X}: {}", $self.code(), $desc)
    };
}
