//! Typed physical and virtual addresses
//!
//! Provides compile-time distinction between the physical addresses that end
//! up inside descriptors and the virtual addresses the tables translate.
//! Both are 64-bit even for the AArch32 formats; the 32-bit formats simply
//! never produce values above 4 GiB.

use core::fmt;
use core::marker::PhantomData;
use core::ops::{Add, Sub};

use crate::GRANULE_SIZE;

/// Marker trait for address kinds (physical or virtual)
pub trait MemKind: private::Sealed + Copy + Clone {}

/// Physical address space marker
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct Physical;

/// Virtual address space marker
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct Virtual;

impl MemKind for Physical {}
impl MemKind for Virtual {}

mod private {
    pub trait Sealed {}
    impl Sealed for super::Physical {}
    impl Sealed for super::Virtual {}
}

/// A typed address in either physical or virtual address space
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Address<K: MemKind> {
    value: u64,
    _kind: PhantomData<K>,
}

/// Physical address
pub type PA = Address<Physical>;

/// Virtual address
pub type VA = Address<Virtual>;

impl<K: MemKind> Address<K> {
    #[inline]
    pub const fn new(value: u64) -> Self {
        Self {
            value,
            _kind: PhantomData,
        }
    }

    /// Create a null (zero) address
    #[inline]
    pub const fn null() -> Self {
        Self::new(0)
    }

    /// Get the raw address value
    #[inline]
    pub const fn value(self) -> u64 {
        self.value
    }

    /// Check if address is null (zero)
    #[inline]
    pub const fn is_null(self) -> bool {
        self.value == 0
    }

    /// Check if address is granule-aligned (4 KiB)
    #[inline]
    pub const fn is_page_aligned(self) -> bool {
        self.value & (GRANULE_SIZE - 1) == 0
    }

    /// Check alignment against an arbitrary power-of-two size
    #[inline]
    pub const fn is_aligned(self, align: u64) -> bool {
        debug_assert!(align.is_power_of_two());
        self.value & (align - 1) == 0
    }

    /// Align address down to an arbitrary power-of-two boundary
    #[inline]
    #[must_use]
    pub const fn align_down(self, align: u64) -> Self {
        debug_assert!(align.is_power_of_two());
        Self::new(self.value & !(align - 1))
    }

    /// Add an offset to this address
    #[inline]
    #[must_use]
    pub const fn offset(self, offset: u64) -> Self {
        Self::new(self.value + offset)
    }

    /// Add an offset, failing on address-space wrap-around
    #[inline]
    #[must_use]
    pub const fn checked_offset(self, offset: u64) -> Option<Self> {
        match self.value.checked_add(offset) {
            Some(value) => Some(Self::new(value)),
            None => None,
        }
    }
}

// Arithmetic operations

impl<K: MemKind> Add<u64> for Address<K> {
    type Output = Self;

    #[inline]
    fn add(self, rhs: u64) -> Self::Output {
        Self::new(self.value + rhs)
    }
}

impl<K: MemKind> Sub<u64> for Address<K> {
    type Output = Self;

    #[inline]
    fn sub(self, rhs: u64) -> Self::Output {
        Self::new(self.value - rhs)
    }
}

impl<K: MemKind> Sub for Address<K> {
    type Output = u64;

    #[inline]
    fn sub(self, rhs: Self) -> Self::Output {
        self.value - rhs.value
    }
}

// Formatting

impl<K: MemKind> fmt::Debug for Address<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.value)
    }
}

impl<K: MemKind> fmt::Display for Address<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.value)
    }
}

impl<K: MemKind> fmt::LowerHex for Address<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::LowerHex::fmt(&self.value, f)
    }
}

// Default

impl<K: MemKind> Default for Address<K> {
    fn default() -> Self {
        Self::null()
    }
}
