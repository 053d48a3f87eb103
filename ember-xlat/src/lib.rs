//! ember-xlat - Translation-table construction for boot firmware
//!
//! Builds MMU translation tables for the secure world at boot, before
//! translation is on: callers register the platform's memory regions, one
//! recursive builder turns the region set into a table tree inside a
//! fixed pool, and a scripted register sequence switches translation on.
//! Three table formats are supported behind one pair of traits.
//!
//! # Architecture
//!
//! - `address`: Typed physical and virtual addresses (`PA`, `VA`)
//! - `attrs`: Region attribute sets and the fixed MAIR layout
//! - `region`: The checked region registry ([`MemoryMap`])
//! - `descriptor`: Logical descriptors and the translation regime
//! - `traits`: The [`Geometry`] and [`DescriptorCodec`] format seams
//! - `pool`: Fixed-capacity table storage ([`TablePool`])
//! - `builder`: The one recursion that fills every format's tree
//! - `walk`: Software walker mirroring the hardware lookup
//! - `enable`: The MMU enable sequence against [`MmuControl`]
//! - `arch`: The AArch64, LPAE and short-descriptor format providers
//!
//! # Flow
//!
//! ```ignore
//! let mut map = MemoryMap::<32>::new(AddressSpace::new(32, 32));
//! map.add_region(MapRegion::identity(dram_base, dram_size, MemAttrs::RW_DATA))?;
//! map.add_region(MapRegion::identity(uart_base, GRANULE_SIZE, MemAttrs::DEVICE))?;
//!
//! let built = build(Arm64, &mut map, &mut pool, TranslationRegime::El3)?;
//! enable_mmu(&mut el3, &arch::arm64::enable_params(&built, flags, pa_range));
//! ```
//!
//! Everything here runs with the MMU off, so table frames are addressed
//! by their physical location and all entry accesses are volatile.

#![no_std]
#![deny(unsafe_op_in_unsafe_fn)]

pub mod address;
pub mod attrs;
pub mod builder;
pub mod descriptor;
pub mod enable;
pub mod pool;
pub mod region;
pub mod traits;
pub mod walk;

pub mod arch;

// Re-export commonly used types
pub use address::{Address, MemKind, Physical, Virtual, PA, VA};
pub use arch::{Arm32Lpae, Arm32Short, Arm64};
pub use attrs::{MemAttrs, MemoryType, Shareability};
pub use builder::{build, BuiltTables};
pub use descriptor::{Descriptor, TranslationRegime};
pub use enable::{enable_mmu, EnableFlags, EnableParams, MmuControl};
pub use pool::{TableFrame, TableId, TablePool};
pub use region::{MapRegion, MemoryMap, MmapError};
pub use traits::{BuildError, DescriptorCodec, Geometry};
pub use walk::translate;

/// Translation granule (4 KiB), the one table and page size in use
pub const GRANULE_SIZE: u64 = 4096;

/// Width of the configured address spaces, in bits.
///
/// Picked per platform and validated twice: the region registry refuses
/// addresses outside these widths, and each format refuses widths outside
/// its own range.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AddressSpace {
    /// Input (virtual) address width
    pub va_bits: u32,
    /// Output (physical) address width
    pub pa_bits: u32,
}

impl AddressSpace {
    /// Describe an address space.
    ///
    /// # Panics
    ///
    /// Panics unless both widths are in `1..64`. The registry range-checks
    /// regions by shifting addresses right by these widths, so they are
    /// validated here once, in every build profile.
    #[inline]
    #[must_use]
    pub const fn new(va_bits: u32, pa_bits: u32) -> Self {
        assert!(va_bits > 0 && va_bits < 64);
        assert!(pa_bits > 0 && pa_bits < 64);
        Self { va_bits, pa_bits }
    }
}

// Compile-time verification of the granule-derived constants
const _: () = assert!(GRANULE_SIZE.is_power_of_two());
const _: () = assert!(GRANULE_SIZE == 4096, "4 KiB granule is assumed throughout");
