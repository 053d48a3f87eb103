//! Software table walk
//!
//! Replays the hardware walk through a built tree: index one entry per
//! level, follow table descriptors, stop at the first terminal or invalid
//! entry. Used by the round-trip tests and as a boot-log diagnostic; the
//! hardware never calls this.

use crate::address::{PA, VA};
use crate::attrs::MemAttrs;
use crate::builder::BuiltTables;
use crate::descriptor::Descriptor;
use crate::pool::TablePool;
use crate::traits::{DescriptorCodec, Geometry};

/// Translate `va` through a built table tree.
///
/// Returns the output address and the effective attribute set of the
/// mapping, or `None` if the walk reaches an invalid entry or `va` lies
/// outside the configured address space.
pub fn translate<F>(
    _format: F,
    pool: &TablePool<'_>,
    tables: &BuiltTables,
    va: VA,
) -> Option<(PA, MemAttrs)>
where
    F: Geometry + DescriptorCodec,
{
    debug_assert_eq!(tables.format(), F::NAME);
    if va.value() >> tables.va_bits() != 0 {
        return None;
    }

    let mut table = tables.root();
    let mut level = tables.base_level();
    loop {
        let entries = if level == tables.base_level() {
            F::base_entries(tables.va_bits())
        } else {
            F::sub_entries(level)
        };
        let idx = ((va.value() >> F::level_shift(level)) & (entries as u64 - 1)) as usize;

        match F::decode(pool.read_entry::<F>(table, idx), level) {
            Descriptor::Invalid => return None,
            Descriptor::Block { phys, attrs } | Descriptor::Page { phys, attrs } => {
                let within = va.value() & (F::level_size(level) - 1);
                return Some((phys + within, attrs));
            }
            Descriptor::Table { next } => {
                debug_assert!(level < F::LAST_LEVEL);
                table = pool.frame_id::<F>(next)?;
                level += 1;
            }
        }
    }
}
