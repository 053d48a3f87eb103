//! Traits implemented by each translation-table format
//!
//! The builder recursion is written once, generic over a [`Geometry`]
//! (level layout, entry width, root sizing) and a [`DescriptorCodec`]
//! (logical descriptor to raw bits and back). The three formats in
//! [`crate::arch`] supply constants and pure functions only; none of them
//! contains any walking or allocation logic of its own.

use core::fmt;

use crate::descriptor::{Descriptor, TranslationRegime};

/// Errors surfaced while building the table tree.
///
/// All of these are fatal configuration errors: the single boot-time caller
/// logs and halts. They are typed (rather than asserted) so the caller can
/// say *which* contract was violated before it stops.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use = "build errors are fatal and must reach the boot caller"]
pub enum BuildError {
    /// The table pool ran out of frames; raise the platform's pool size.
    PoolExhausted,
    /// The format cannot express the requested attribute set.
    UnsupportedAttributes,
    /// The configured VA/PA widths are outside the format's range.
    UnsupportedAddressSpace,
    /// A mapped address exceeded the configured address-space widths.
    AddressSpaceExceeded,
    /// The region set was already built into tables.
    AlreadyBuilt,
}

impl fmt::Display for BuildError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            BuildError::PoolExhausted => "translation table pool exhausted",
            BuildError::UnsupportedAttributes => "attribute set not expressible in this format",
            BuildError::UnsupportedAddressSpace => "address-space width outside format range",
            BuildError::AddressSpaceExceeded => "mapped address exceeds configured address space",
            BuildError::AlreadyBuilt => "translation tables already built",
        };
        write!(f, "{}", msg)
    }
}

/// Level layout of one translation-table format.
///
/// Levels are numbered as the architecture numbers them; `base_level` for a
/// given VA width is where the walk starts, [`Self::LAST_LEVEL`] is the
/// 4 KiB-granule leaf level. All address maths lives in the default
/// methods; implementations provide the shift table and the constants.
pub trait Geometry {
    /// Format name for diagnostics.
    const NAME: &'static str;

    /// Bytes per descriptor in table storage (8, or 4 for the
    /// short-descriptor format).
    const ENTRY_BYTES: usize;

    /// Leaf level mapping single granules.
    const LAST_LEVEL: usize;

    /// Shallowest level at which a terminal descriptor is legal.
    const MIN_BLOCK_LEVEL: usize;

    /// Supported VA width range, inclusive, in bits.
    const VA_BITS_MIN: u32;
    const VA_BITS_MAX: u32;

    /// Largest PA width the format can emit, in bits.
    const PA_BITS_MAX: u32;

    /// log2 of the address range one entry covers at `level`.
    fn level_shift(level: usize) -> u32;

    /// Level the root table sits at for the configured VA width.
    fn base_level(va_bits: u32) -> usize;

    /// Address range one entry covers at `level`.
    #[inline]
    fn level_size(level: usize) -> u64 {
        1u64 << Self::level_shift(level)
    }

    /// Entry count of the root table, derived from the VA width.
    #[inline]
    fn base_entries(va_bits: u32) -> usize {
        1usize << (va_bits - Self::level_shift(Self::base_level(va_bits)))
    }

    /// Entry count of a table covering one parent slot at `level`.
    #[inline]
    fn sub_entries(level: usize) -> usize {
        debug_assert!(level > 0);
        1usize << (Self::level_shift(level - 1) - Self::level_shift(level))
    }

    /// Whether a terminal (block/page) descriptor is legal at `level`.
    #[inline]
    fn block_allowed(level: usize) -> bool {
        level >= Self::MIN_BLOCK_LEVEL
    }

    /// Root-table size in bytes.
    #[inline]
    fn root_bytes(va_bits: u32) -> usize {
        Self::base_entries(va_bits) * Self::ENTRY_BYTES
    }

    /// Table-base-register alignment requirement for the root, in bytes.
    ///
    /// The architecture requires the root aligned to its own size, with a
    /// 64-byte floor for the small VA-width cases.
    #[inline]
    fn root_align(va_bits: u32) -> u64 {
        let bytes = Self::root_bytes(va_bits) as u64;
        if bytes < 64 {
            64
        } else {
            bytes
        }
    }

    /// Whether the configured widths are usable with this format.
    #[inline]
    fn supports(va_bits: u32, pa_bits: u32) -> bool {
        va_bits >= Self::VA_BITS_MIN && va_bits <= Self::VA_BITS_MAX && pa_bits <= Self::PA_BITS_MAX
    }
}

/// Encode/decode boundary between logical descriptors and table storage.
///
/// `encode` is the only place attribute bits are produced and `decode` the
/// only place they are parsed; both are pure. `decode(encode(d)) == d` for
/// every descriptor the format accepts, which is what the software walker
/// and the round-trip tests rely on.
pub trait DescriptorCodec {
    /// Produce the raw bits of `desc` for an entry at `level`.
    ///
    /// The raw value occupies the low [`Geometry::ENTRY_BYTES`] bytes.
    /// Fails only for attribute sets the format cannot express (the
    /// short-descriptor format has no non-cacheable memory type).
    fn encode(
        desc: &Descriptor,
        level: usize,
        regime: TranslationRegime,
    ) -> Result<u64, BuildError>;

    /// Parse raw bits back into a logical descriptor.
    ///
    /// Attribute sets come back normalized (effective execute-never state),
    /// and the regime-invariant fields only; used by the software walker
    /// and tests, never by the builder itself.
    fn decode(raw: u64, level: usize) -> Descriptor;
}
