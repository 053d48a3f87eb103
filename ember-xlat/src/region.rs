//! Memory-map regions and the sorted region registry
//!
//! Platform code declares its memory map as a list of [`MapRegion`] values
//! and registers them one by one. The registry keeps them sorted by
//! ascending virtual base, ties broken by descending size, so an outer
//! region always precedes the inner regions it contains; the builder relies
//! on that order to let later, narrower regions override attributes.
//!
//! Registration is fully checked: misalignment, zero size, address-space
//! overflow, capacity, and the overlap rule are all reported as typed
//! errors. Two regions may only coexist if their virtual ranges are
//! disjoint or nested; a nested (or duplicate) pair carrying the same
//! attributes must also agree on the VA-to-PA offset, since two different
//! translations for one virtual range with no distinguishing attribute is a
//! contradiction, not an override.

use core::fmt;

use crate::address::{PA, VA};
use crate::attrs::MemAttrs;
use crate::{AddressSpace, GRANULE_SIZE};

/// Errors rejected at region-registration time.
///
/// All registration failures are boot-time configuration errors; the caller
/// logs and halts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use = "registration errors are fatal and must reach the boot caller"]
pub enum MmapError {
    /// Base or size not granule-aligned.
    Misaligned,
    /// Zero-sized region.
    EmptyRegion,
    /// Region end exceeds the configured VA/PA width (or wraps).
    OutOfRange,
    /// Overlaps an existing region without nesting inside it.
    PartialOverlap,
    /// Nests inside an existing region with equal attributes but a
    /// different VA-to-PA offset.
    AliasMismatch,
    /// Registry capacity exhausted; raise the platform's region limit.
    Full,
    /// The region set was already built into tables.
    AlreadyBuilt,
}

impl fmt::Display for MmapError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            MmapError::Misaligned => "region base or size not granule-aligned",
            MmapError::EmptyRegion => "region has zero size",
            MmapError::OutOfRange => "region exceeds configured address space",
            MmapError::PartialOverlap => "region partially overlaps an existing region",
            MmapError::AliasMismatch => "nested region aliases a different physical range",
            MmapError::Full => "region registry full",
            MmapError::AlreadyBuilt => "translation tables already built",
        };
        write!(f, "{}", msg)
    }
}

/// One declarative mapping request: a virtual range, the physical range it
/// translates to, and the attributes of the mapping.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MapRegion {
    virt: VA,
    phys: PA,
    size: u64,
    attrs: MemAttrs,
}

impl MapRegion {
    /// Placeholder for unused registry slots.
    pub(crate) const EMPTY: Self = Self {
        virt: VA::null(),
        phys: PA::null(),
        size: 0,
        attrs: MemAttrs::RW_DATA,
    };

    #[inline]
    pub const fn new(virt: VA, phys: PA, size: u64, attrs: MemAttrs) -> Self {
        Self {
            virt,
            phys,
            size,
            attrs,
        }
    }

    /// Identity mapping: the virtual range equals the physical range.
    ///
    /// The common case for boot firmware, which runs out of the mapping it
    /// is about to create.
    #[inline]
    pub const fn identity(phys: PA, size: u64, attrs: MemAttrs) -> Self {
        Self::new(VA::new(phys.value()), phys, size, attrs)
    }

    #[inline]
    pub const fn virt(&self) -> VA {
        self.virt
    }

    #[inline]
    pub const fn phys(&self) -> PA {
        self.phys
    }

    #[inline]
    pub const fn size(&self) -> u64 {
        self.size
    }

    #[inline]
    pub const fn attrs(&self) -> MemAttrs {
        self.attrs
    }

    /// Last virtual address covered (inclusive).
    #[inline]
    pub const fn end_va(&self) -> VA {
        debug_assert!(self.size != 0);
        VA::new(self.virt.value() + self.size - 1)
    }

    /// Last physical address covered (inclusive).
    #[inline]
    pub const fn end_pa(&self) -> PA {
        debug_assert!(self.size != 0);
        PA::new(self.phys.value() + self.size - 1)
    }

    /// VA-to-PA offset, as a wrapping difference for equality comparison.
    #[inline]
    pub(crate) const fn mapping_offset(&self) -> u64 {
        self.virt.value().wrapping_sub(self.phys.value())
    }

    /// Whether this region covers all of `[base, base + len)`.
    #[inline]
    pub(crate) fn covers(&self, base: VA, len: u64) -> bool {
        self.virt <= base && base.value() + len - 1 <= self.end_va().value()
    }

    /// Whether this region intersects `[base, base + len)`.
    #[inline]
    pub(crate) fn intersects(&self, base: VA, len: u64) -> bool {
        self.virt.value() <= base.value() + len - 1 && base <= self.end_va()
    }

    /// Translate a virtual address inside this region.
    #[inline]
    pub(crate) fn translate(&self, va: VA) -> PA {
        debug_assert!(self.covers(va, 1));
        self.phys + (va - self.virt)
    }
}

impl fmt::Display for MapRegion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "VA {:#012x}  PA {:#012x}  size {:#010x}  {}",
            self.virt, self.phys, self.size, self.attrs
        )
    }
}

/// Sorted, fixed-capacity region registry.
///
/// `CAP` is the platform's region limit. The registry seals itself when the
/// tables are built; registration afterwards is a hard error, because the
/// built tables would silently stop describing the registry contents.
pub struct MemoryMap<const CAP: usize> {
    regions: [MapRegion; CAP],
    len: usize,
    space: AddressSpace,
    max_va_seen: u64,
    max_pa_seen: u64,
    sealed: bool,
}

impl<const CAP: usize> MemoryMap<CAP> {
    /// Create an empty registry for the configured address-space widths.
    pub const fn new(space: AddressSpace) -> Self {
        Self {
            regions: [MapRegion::EMPTY; CAP],
            len: 0,
            space,
            max_va_seen: 0,
            max_pa_seen: 0,
            sealed: false,
        }
    }

    /// Register one region.
    ///
    /// Performs the full validation described in the module docs and
    /// inserts the region at its sorted position.
    ///
    /// # Arguments
    ///
    /// - `region`: the mapping request, copied into the registry
    ///
    /// # Returns
    ///
    /// An [`MmapError`] naming the violated contract, or `Ok(())`.
    pub fn add_region(&mut self, region: MapRegion) -> Result<(), MmapError> {
        if self.sealed {
            return Err(MmapError::AlreadyBuilt);
        }
        if region.size == 0 {
            return Err(MmapError::EmptyRegion);
        }
        if !region.virt.is_page_aligned()
            || !region.phys.is_page_aligned()
            || region.size % GRANULE_SIZE != 0
        {
            return Err(MmapError::Misaligned);
        }

        let end_va = match region.virt.checked_offset(region.size - 1) {
            Some(end) => end,
            None => return Err(MmapError::OutOfRange),
        };
        let end_pa = match region.phys.checked_offset(region.size - 1) {
            Some(end) => end,
            None => return Err(MmapError::OutOfRange),
        };
        if end_va.value() >> self.space.va_bits != 0 || end_pa.value() >> self.space.pa_bits != 0 {
            return Err(MmapError::OutOfRange);
        }

        if self.len == CAP {
            return Err(MmapError::Full);
        }

        for existing in self.regions() {
            self.check_overlap(&region, existing)?;
        }

        // Sorted insert: ascending base, descending size on ties, with
        // equal-size duplicates keeping registration order.
        let mut idx = 0;
        while idx < self.len {
            let e = &self.regions[idx];
            if e.virt > region.virt || (e.virt == region.virt && e.size < region.size) {
                break;
            }
            idx += 1;
        }
        self.regions.copy_within(idx..self.len, idx + 1);
        self.regions[idx] = region;
        self.len += 1;

        if end_va.value() > self.max_va_seen {
            self.max_va_seen = end_va.value();
        }
        if end_pa.value() > self.max_pa_seen {
            self.max_pa_seen = end_pa.value();
        }

        log::debug!("mmap add: {}", region);
        Ok(())
    }

    /// Overlap rule for one candidate/existing pair.
    fn check_overlap(&self, new: &MapRegion, existing: &MapRegion) -> Result<(), MmapError> {
        let disjoint =
            new.end_va() < existing.virt() || existing.end_va() < new.virt();
        if disjoint {
            return Ok(());
        }

        let new_inside = new.virt() >= existing.virt() && new.end_va() <= existing.end_va();
        let existing_inside = existing.virt() >= new.virt() && existing.end_va() <= new.end_va();
        if !new_inside && !existing_inside {
            return Err(MmapError::PartialOverlap);
        }

        // Nested or duplicate. Differing attributes make this an override;
        // identical attributes must describe the same translation.
        if new.attrs() == existing.attrs() && new.mapping_offset() != existing.mapping_offset() {
            return Err(MmapError::AliasMismatch);
        }
        Ok(())
    }

    /// Registered regions in sorted order.
    #[inline]
    pub fn regions(&self) -> &[MapRegion] {
        &self.regions[..self.len]
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub const fn capacity(&self) -> usize {
        CAP
    }

    #[inline]
    pub const fn address_space(&self) -> AddressSpace {
        self.space
    }

    /// Highest virtual address any region covers (inclusive).
    #[inline]
    pub const fn max_va_seen(&self) -> VA {
        VA::new(self.max_va_seen)
    }

    /// Highest physical address any region covers (inclusive).
    #[inline]
    pub const fn max_pa_seen(&self) -> PA {
        PA::new(self.max_pa_seen)
    }

    #[inline]
    pub const fn is_sealed(&self) -> bool {
        self.sealed
    }

    /// Mark the registry immutable. Called by the builder on success.
    pub(crate) fn seal(&mut self) {
        self.sealed = true;
    }

    /// Dump every registered region to the boot log.
    pub fn log_regions(&self) {
        log::info!("memory map ({} regions):", self.len);
        for region in self.regions() {
            log::info!("  {}", region);
        }
    }
}
