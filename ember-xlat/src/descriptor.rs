//! Logical page-table descriptors
//!
//! The builder works entirely in terms of [`Descriptor`] values; the
//! architecture-specific bit patterns exist only at the moment an entry is
//! written into (or read back from) table storage. Everything between the
//! region list and that boundary is ordinary enum matching, which is the
//! whole point: the recursion never does bit arithmetic.

use crate::address::PA;
use crate::attrs::MemAttrs;

/// Translation regime the tables will be installed in.
///
/// The regime decides which execute-never bits exist (EL1&0 has separate
/// privileged/unprivileged bits, EL3 a single one) and the fixed value of
/// AP[1], which is RES1 for EL3. The AArch32 PL1&0 regime shares the `El1`
/// behaviour; `El3` is meaningful on AArch64 only.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TranslationRegime {
    /// EL1&0 (AArch64) or PL1&0 (AArch32)
    El1,
    /// EL3
    El3,
}

/// One page-table entry, in logical form.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Descriptor {
    /// Unmapped; translation faults.
    Invalid,
    /// Terminal mapping at a block-capable level (1 GiB/2 MiB blocks, or a
    /// 1 MiB short-descriptor section).
    Block { phys: PA, attrs: MemAttrs },
    /// Terminal mapping at the last level (4 KiB granule).
    Page { phys: PA, attrs: MemAttrs },
    /// Pointer to the next-level table.
    Table { next: PA },
}

impl Descriptor {
    /// Whether this descriptor terminates a walk with an output address.
    #[inline]
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Descriptor::Block { .. } | Descriptor::Page { .. })
    }

    /// Output address and attributes of a terminal descriptor.
    #[inline]
    #[must_use]
    pub const fn mapping(&self) -> Option<(PA, MemAttrs)> {
        match *self {
            Descriptor::Block { phys, attrs } | Descriptor::Page { phys, attrs } => {
                Some((phys, attrs))
            }
            _ => None,
        }
    }
}
