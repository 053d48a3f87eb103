//! Memory-region attributes
//!
//! A region carries one memory type (device, normal write-back
//! write-allocate, or normal non-cacheable) plus access, security and
//! execution flags. The attribute set is the input to every descriptor
//! encoder; the encoders never look at anything else.
//!
//! Execution policy is decided here, once, for all formats:
//!
//! - device memory is always execute-never, whatever the caller asked for
//!   (speculative instruction fetch from MMIO is never acceptable);
//! - writable normal memory is always execute-never; code becomes
//!   executable only by being mapped read-only (W^X);
//! - the caller's executable flag therefore only matters for read-only
//!   normal memory.

use core::fmt;

/// Memory type of a region.
///
/// The discriminants match the 2-bit type field inside [`MemAttrs`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum MemoryType {
    /// Device-nGnRE memory (MMIO)
    Device = 0,
    /// Normal memory, inner/outer non-cacheable
    NormalNonCacheable = 1,
    /// Normal memory, inner/outer write-back write-allocate
    Normal = 2,
}

/// Shareability domain of a mapping.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Shareability {
    /// Outer-shareable (device and non-cacheable mappings)
    Outer,
    /// Inner-shareable (cacheable normal memory, coherent across cores)
    Inner,
}

// MAIR attribute encodings, one per fixed slot. Shared by the AArch64 and
// LPAE enable paths; the short-descriptor format has no attribute table.

/// MAIR encoding: normal, inner/outer write-back non-transient write-allocate
pub const MAIR_ATTR_NORMAL_WBWA: u8 = 0xFF;
/// MAIR encoding: Device-nGnRE
pub const MAIR_ATTR_DEVICE_NGNRE: u8 = 0x04;
/// MAIR encoding: normal, inner/outer non-cacheable
pub const MAIR_ATTR_NORMAL_NC: u8 = 0x44;

/// MAIR slot of normal write-back write-allocate memory
pub const MAIR_IDX_NORMAL: u64 = 0;
/// MAIR slot of device memory
pub const MAIR_IDX_DEVICE: u64 = 1;
/// MAIR slot of normal non-cacheable memory
pub const MAIR_IDX_NORMAL_NC: u64 = 2;

/// The packed MAIR value programming the three fixed slots.
#[inline]
#[must_use]
pub const fn mair_value() -> u64 {
    (MAIR_ATTR_NORMAL_WBWA as u64) << (MAIR_IDX_NORMAL * 8)
        | (MAIR_ATTR_DEVICE_NGNRE as u64) << (MAIR_IDX_DEVICE * 8)
        | (MAIR_ATTR_NORMAL_NC as u64) << (MAIR_IDX_NORMAL_NC * 8)
}

/// Attribute set of one memory region.
///
/// # Layout
///
/// Packed into a single byte so a region stays small and trivially
/// copyable:
/// - Bits 0-1: memory type ([`MemoryType`] discriminant)
/// - Bit 2: writable
/// - Bit 3: non-secure
/// - Bit 4: executable (caller's request; see module docs for the policy
///   that decides what actually reaches the descriptor)
/// - Bits 5-7: reserved (must be zero)
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct MemAttrs(u8);

const TYPE_MASK: u8 = 0b11;
const WRITE_BIT: u8 = 1 << 2;
const NON_SECURE_BIT: u8 = 1 << 3;
const EXEC_BIT: u8 = 1 << 4;

impl MemAttrs {
    /// Secure read-only executable normal memory.
    pub const CODE: Self = Self::normal().read_only().executable();

    /// Secure read-only normal data.
    pub const RO_DATA: Self = Self::normal().read_only();

    /// Secure read-write normal data.
    pub const RW_DATA: Self = Self::normal();

    /// Secure read-write device memory.
    pub const DEVICE: Self = Self::device();

    /// Secure read-write non-cacheable normal memory.
    pub const NON_CACHEABLE: Self = Self::normal_non_cacheable();

    /// Start from read-write secure execute-never normal memory.
    #[inline]
    #[must_use]
    pub const fn normal() -> Self {
        Self(MemoryType::Normal as u8 | WRITE_BIT)
    }

    /// Start from read-write secure execute-never device memory.
    #[inline]
    #[must_use]
    pub const fn device() -> Self {
        Self(MemoryType::Device as u8 | WRITE_BIT)
    }

    /// Start from read-write secure execute-never non-cacheable memory.
    #[inline]
    #[must_use]
    pub const fn normal_non_cacheable() -> Self {
        Self(MemoryType::NormalNonCacheable as u8 | WRITE_BIT)
    }

    /// Make the mapping read-only.
    #[inline]
    #[must_use]
    pub const fn read_only(self) -> Self {
        Self(self.0 & !WRITE_BIT)
    }

    /// Make the mapping read-write.
    #[inline]
    #[must_use]
    pub const fn read_write(self) -> Self {
        Self(self.0 | WRITE_BIT)
    }

    /// Tag the mapping non-secure.
    #[inline]
    #[must_use]
    pub const fn non_secure(self) -> Self {
        Self(self.0 | NON_SECURE_BIT)
    }

    /// Request an executable mapping.
    ///
    /// Honoured only for read-only normal memory; see the module docs.
    #[inline]
    #[must_use]
    pub const fn executable(self) -> Self {
        Self(self.0 | EXEC_BIT)
    }

    /// Reconstruct an attribute set from its raw bits.
    ///
    /// Reserved bits are masked off. Used by the decoders; callers build
    /// attribute sets through the constructors instead.
    #[inline]
    #[must_use]
    pub const fn from_bits(bits: u8) -> Self {
        Self(bits & (TYPE_MASK | WRITE_BIT | NON_SECURE_BIT | EXEC_BIT))
    }

    /// Get the raw bits.
    #[inline]
    #[must_use]
    pub const fn bits(self) -> u8 {
        self.0
    }

    /// The region's memory type.
    #[inline]
    #[must_use]
    pub const fn memory_type(self) -> MemoryType {
        match self.0 & TYPE_MASK {
            0 => MemoryType::Device,
            1 => MemoryType::NormalNonCacheable,
            _ => MemoryType::Normal,
        }
    }

    #[inline]
    #[must_use]
    pub const fn is_device(self) -> bool {
        self.0 & TYPE_MASK == MemoryType::Device as u8
    }

    #[inline]
    #[must_use]
    pub const fn is_writable(self) -> bool {
        self.0 & WRITE_BIT != 0
    }

    #[inline]
    #[must_use]
    pub const fn is_non_secure(self) -> bool {
        self.0 & NON_SECURE_BIT != 0
    }

    /// Whether the resulting mapping must be execute-never.
    ///
    /// This is the policy decision, not the caller's flag: device and
    /// writable mappings are always execute-never.
    #[inline]
    #[must_use]
    pub const fn execute_never(self) -> bool {
        if self.is_device() || self.is_writable() {
            return true;
        }
        self.0 & EXEC_BIT == 0
    }

    /// Shareability of the mapping.
    ///
    /// Cacheable normal memory must be inner-shareable so that the mapping
    /// stays coherent across cores; device and non-cacheable memory are
    /// outer-shareable.
    #[inline]
    #[must_use]
    pub const fn shareability(self) -> Shareability {
        match self.memory_type() {
            MemoryType::Normal => Shareability::Inner,
            _ => Shareability::Outer,
        }
    }

    /// MAIR slot index for the long-descriptor formats.
    #[inline]
    #[must_use]
    pub const fn attr_index(self) -> u64 {
        match self.memory_type() {
            MemoryType::Normal => MAIR_IDX_NORMAL,
            MemoryType::Device => MAIR_IDX_DEVICE,
            MemoryType::NormalNonCacheable => MAIR_IDX_NORMAL_NC,
        }
    }

    /// The attribute set with the execution policy applied.
    ///
    /// Decoding a built descriptor yields this form, since the descriptor
    /// only stores the effective execute-never state.
    #[inline]
    #[must_use]
    pub const fn normalized(self) -> Self {
        if self.execute_never() {
            Self(self.0 & !EXEC_BIT)
        } else {
            Self(self.0 | EXEC_BIT)
        }
    }
}

impl fmt::Debug for MemAttrs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut list = f.debug_set();
        list.entry(&self.memory_type());
        list.entry(&if self.is_writable() { "Rw" } else { "Ro" });
        if self.is_non_secure() {
            list.entry(&"NonSecure");
        }
        if self.execute_never() {
            list.entry(&"ExecuteNever");
        }
        list.finish()
    }
}

impl fmt::Display for MemAttrs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ty = match self.memory_type() {
            MemoryType::Device => "DEV",
            MemoryType::NormalNonCacheable => "NC",
            MemoryType::Normal => "MEM",
        };
        write!(
            f,
            "{}-{}-{}-{}",
            ty,
            if self.is_writable() { "RW" } else { "RO" },
            if self.execute_never() { "XN" } else { "X" },
            if self.is_non_secure() { "NS" } else { "S" },
        )
    }
}
