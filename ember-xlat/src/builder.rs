//! Recursive translation-table builder
//!
//! One recursion serves all three formats. Starting from the root level it
//! visits every slot of every table exactly once: a slot nobody maps stays
//! invalid, a slot one region covers whole becomes a block or page, and
//! anything else gets a freshly allocated sub-table filled the same way one
//! level down. The region list is sorted outer-before-inner, so scanning a
//! slot's intersectors in order and keeping the last full cover resolves
//! nested overrides without any backtracking.
//!
//! Building is one-shot: on success the registry is sealed and the tables
//! are immutable for the rest of the boot stage.

use crate::address::{PA, VA};
use crate::descriptor::{Descriptor, TranslationRegime};
use crate::pool::{TableId, TablePool};
use crate::region::{MapRegion, MemoryMap};
use crate::traits::{BuildError, DescriptorCodec, Geometry};

/// Handle to a finished table tree.
///
/// Carries everything the enable step and the software walker need: the
/// root frame, where the walk starts, and the highest addresses any
/// terminal descriptor actually maps.
#[derive(Clone, Copy, Debug)]
pub struct BuiltTables {
    root: TableId,
    root_pa: PA,
    base_level: usize,
    va_bits: u32,
    regime: TranslationRegime,
    format: &'static str,
    max_va: VA,
    max_pa: PA,
}

impl BuiltTables {
    #[inline]
    pub const fn root(&self) -> TableId {
        self.root
    }

    /// Physical address of the root table, for the table-base register.
    #[inline]
    pub const fn root_pa(&self) -> PA {
        self.root_pa
    }

    #[inline]
    pub const fn base_level(&self) -> usize {
        self.base_level
    }

    #[inline]
    pub const fn va_bits(&self) -> u32 {
        self.va_bits
    }

    #[inline]
    pub const fn regime(&self) -> TranslationRegime {
        self.regime
    }

    /// Name of the format the tree was built for.
    #[inline]
    pub const fn format(&self) -> &'static str {
        self.format
    }

    /// Highest virtual address mapped by any terminal descriptor
    /// (inclusive).
    #[inline]
    pub const fn max_va(&self) -> VA {
        self.max_va
    }

    /// Highest physical address mapped by any terminal descriptor
    /// (inclusive).
    #[inline]
    pub const fn max_pa(&self) -> PA {
        self.max_pa
    }
}

/// Build the table tree for a registered memory map.
///
/// Allocates the root from `pool`, fills the tree, seals `map`, and hands
/// back the [`BuiltTables`] handle. The registry stays unsealed if the
/// build fails, but the pool frames consumed so far are not returned; the
/// caller treats any error as fatal.
///
/// # Arguments
/// * `_format` - Format selector, one of the [`crate::arch`] markers
/// * `map` - The finished region registry
/// * `pool` - Table storage to build into
/// * `regime` - Translation regime the tables will be installed in
///
/// # Returns
/// * `Ok(BuiltTables)` on success
/// * `Err(BuildError)` naming the violated contract otherwise
pub fn build<F, const CAP: usize>(
    _format: F,
    map: &mut MemoryMap<CAP>,
    pool: &mut TablePool<'_>,
    regime: TranslationRegime,
) -> Result<BuiltTables, BuildError>
where
    F: Geometry + DescriptorCodec,
{
    if map.is_sealed() {
        return Err(BuildError::AlreadyBuilt);
    }
    let space = map.address_space();
    if !F::supports(space.va_bits, space.pa_bits) {
        return Err(BuildError::UnsupportedAddressSpace);
    }

    let base_level = F::base_level(space.va_bits);
    let entries = F::base_entries(space.va_bits);
    let root = pool.alloc_root(F::root_bytes(space.va_bits), F::root_align(space.va_bits))?;
    log::debug!(
        "{}: root table at {:#x}, level {} ({} entries)",
        F::NAME,
        pool.table_pa(root),
        base_level,
        entries
    );

    let mut fill = Fill {
        pool: &mut *pool,
        regime,
        max_va: 0,
        max_pa: 0,
    };
    fill.fill_table::<F>(map.regions(), 0, root, entries, VA::null(), base_level)?;
    let (max_va, max_pa) = (fill.max_va, fill.max_pa);

    // Registration already bounds-checked every region; re-checking what
    // the descriptors actually cover catches a geometry that mapped more
    // than it was asked to.
    if max_va >> space.va_bits != 0 || max_pa >> space.pa_bits != 0 {
        return Err(BuildError::AddressSpaceExceeded);
    }

    map.seal();
    log::info!(
        "{}: built {} tables, max VA {:#x}, max PA {:#x}",
        F::NAME,
        pool.allocated(),
        max_va,
        max_pa
    );

    Ok(BuiltTables {
        root,
        root_pa: pool.table_pa(root),
        base_level,
        va_bits: space.va_bits,
        regime,
        format: F::NAME,
        max_va: VA::new(max_va),
        max_pa: PA::new(max_pa),
    })
}

/// Mutable state threaded through the recursion.
struct Fill<'p, 'f> {
    pool: &'p mut TablePool<'f>,
    regime: TranslationRegime,
    max_va: u64,
    max_pa: u64,
}

impl Fill<'_, '_> {
    /// Fill `entries` slots of `table`, covering the range starting at
    /// `base_va` at `level`.
    ///
    /// `cursor` indexes the first region that may still intersect
    /// `base_va`; the advanced cursor is returned so the parent level
    /// resumes the scan where the child left off.
    fn fill_table<F>(
        &mut self,
        regions: &[MapRegion],
        mut cursor: usize,
        table: TableId,
        entries: usize,
        mut base_va: VA,
        level: usize,
    ) -> Result<usize, BuildError>
    where
        F: Geometry + DescriptorCodec,
    {
        let size = F::level_size(level);

        for idx in 0..entries {
            let slot_end = base_va.offset(size - 1);

            // Regions are sorted by base; ones ending below this slot are
            // finished for every slot that follows as well.
            while cursor < regions.len() && regions[cursor].end_va() < base_va {
                cursor += 1;
            }

            let mut chosen: Option<&MapRegion> = None;
            let mut partial = false;
            for region in &regions[cursor..] {
                if region.virt() > slot_end {
                    break;
                }
                if !region.intersects(base_va, size) {
                    continue;
                }
                if region.covers(base_va, size) {
                    // Later entries are narrower; the innermost wins.
                    chosen = Some(region);
                } else {
                    partial = true;
                }
            }

            let raw = match (chosen, partial) {
                (None, false) => F::encode(&Descriptor::Invalid, level, self.regime)?,
                (Some(region), false)
                    if F::block_allowed(level) && region.translate(base_va).is_aligned(size) =>
                {
                    let phys = region.translate(base_va);
                    let attrs = region.attrs();
                    self.note_mapping(base_va, phys, size);
                    let desc = if level == F::LAST_LEVEL {
                        Descriptor::Page { phys, attrs }
                    } else {
                        Descriptor::Block { phys, attrs }
                    };
                    F::encode(&desc, level, self.regime)?
                }
                _ => {
                    // Partially covered, overridden from inside, or not a
                    // block-capable level: subdivide. Granule alignment of
                    // regions guarantees the last level always terminates.
                    debug_assert!(level < F::LAST_LEVEL);
                    let sub = self.pool.alloc_table()?;
                    cursor = self.fill_table::<F>(
                        regions,
                        cursor,
                        sub,
                        F::sub_entries(level + 1),
                        base_va,
                        level + 1,
                    )?;
                    let next = self.pool.table_pa(sub);
                    F::encode(&Descriptor::Table { next }, level, self.regime)?
                }
            };

            self.pool.write_entry::<F>(table, idx, raw);
            base_va = base_va + size;
        }

        Ok(cursor)
    }

    fn note_mapping(&mut self, virt: VA, phys: PA, size: u64) {
        let end_va = virt.value() + size - 1;
        let end_pa = phys.value() + size - 1;
        if end_va > self.max_va {
            self.max_va = end_va;
        }
        if end_pa > self.max_pa {
            self.max_pa = end_pa;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arch::{Arm32Short, Arm64};
    use crate::attrs::MemAttrs;
    use crate::pool::TableFrame;
    use crate::region::MmapError;
    use crate::{AddressSpace, GRANULE_SIZE};

    fn space32() -> AddressSpace {
        AddressSpace::new(32, 32)
    }

    fn follow(pool: &TablePool<'_>, raw: u64, level: usize) -> TableId {
        match Arm64::decode(raw, level) {
            Descriptor::Table { next } => pool.frame_id::<Arm64>(next).unwrap(),
            other => panic!("expected table descriptor, got {:?}", other),
        }
    }

    #[test]
    fn test_empty_map_builds_invalid_root() {
        let mut frames: [TableFrame; 2] = core::array::from_fn(|_| TableFrame::new());
        let mut pool = TablePool::new(&mut frames);
        let mut map = MemoryMap::<4>::new(space32());

        let built = build(Arm64, &mut map, &mut pool, TranslationRegime::El3).unwrap();
        assert_eq!(built.base_level(), 1);
        assert_eq!(built.va_bits(), 32);
        assert_eq!(built.max_va().value(), 0);
        assert_eq!(pool.allocated(), 1);
        for idx in 0..4 {
            let raw = pool.read_entry::<Arm64>(built.root(), idx);
            assert_eq!(Arm64::decode(raw, 1), Descriptor::Invalid);
        }
    }

    #[test]
    fn test_unsupported_va_width_rejected() {
        let mut frames: [TableFrame; 2] = core::array::from_fn(|_| TableFrame::new());
        let mut pool = TablePool::new(&mut frames);
        let mut map = MemoryMap::<4>::new(AddressSpace::new(16, 32));

        let err = build(Arm64, &mut map, &mut pool, TranslationRegime::El3);
        assert_eq!(err.unwrap_err(), BuildError::UnsupportedAddressSpace);
        assert!(!map.is_sealed());
    }

    #[test]
    fn test_device_page_at_block_midpoint() {
        let mut frames: [TableFrame; 4] = core::array::from_fn(|_| TableFrame::new());
        let mut pool = TablePool::new(&mut frames);
        let mut map = MemoryMap::<4>::new(space32());

        // One device page at the exact midpoint of the first 2 MiB block.
        map.add_region(MapRegion::identity(
            PA::new(0x10_0000),
            GRANULE_SIZE,
            MemAttrs::DEVICE,
        ))
        .unwrap();

        let built = build(Arm64, &mut map, &mut pool, TranslationRegime::El3).unwrap();
        assert_eq!(pool.allocated(), 3);
        assert_eq!(built.max_va().value(), 0x10_0FFF);
        assert_eq!(built.max_pa().value(), 0x10_0FFF);

        let l2 = follow(&pool, pool.read_entry::<Arm64>(built.root(), 0), 1);
        let l3 = follow(&pool, pool.read_entry::<Arm64>(l2, 0), 2);

        match Arm64::decode(pool.read_entry::<Arm64>(l3, 256), 3) {
            Descriptor::Page { phys, attrs } => {
                assert_eq!(phys, PA::new(0x10_0000));
                assert!(attrs.is_device());
                assert!(attrs.execute_never());
            }
            other => panic!("expected device page, got {:?}", other),
        }

        // Every sibling of the device page stays unmapped.
        for idx in (0..512).filter(|idx| *idx != 256) {
            let raw = pool.read_entry::<Arm64>(l3, idx);
            assert_eq!(Arm64::decode(raw, 3), Descriptor::Invalid);
        }
        for idx in 1..512 {
            let raw = pool.read_entry::<Arm64>(l2, idx);
            assert_eq!(Arm64::decode(raw, 2), Descriptor::Invalid);
        }
        assert_eq!(
            Arm64::decode(pool.read_entry::<Arm64>(built.root(), 1), 1),
            Descriptor::Invalid
        );
    }

    #[test]
    fn test_misaligned_translation_descends_to_pages() {
        let mut frames: [TableFrame; 4] = core::array::from_fn(|_| TableFrame::new());
        let mut pool = TablePool::new(&mut frames);
        let mut map = MemoryMap::<4>::new(space32());

        // A 2 MiB slot-sized range whose PA is only 1 MiB aligned cannot
        // use a block descriptor.
        map.add_region(MapRegion::new(
            VA::new(0x4000_0000),
            PA::new(0x4010_0000),
            0x20_0000,
            MemAttrs::RW_DATA,
        ))
        .unwrap();

        let built = build(Arm64, &mut map, &mut pool, TranslationRegime::El3).unwrap();
        assert_eq!(pool.allocated(), 3);

        let l2 = follow(&pool, pool.read_entry::<Arm64>(built.root(), 1), 1);
        let l3 = follow(&pool, pool.read_entry::<Arm64>(l2, 0), 2);
        match Arm64::decode(pool.read_entry::<Arm64>(l3, 0), 3) {
            Descriptor::Page { phys, .. } => assert_eq!(phys, PA::new(0x4010_0000)),
            other => panic!("expected page, got {:?}", other),
        }
        match Arm64::decode(pool.read_entry::<Arm64>(l3, 511), 3) {
            Descriptor::Page { phys, .. } => assert_eq!(phys, PA::new(0x402F_F000)),
            other => panic!("expected page, got {:?}", other),
        }
        assert_eq!(built.max_pa().value(), 0x402F_FFFF);
    }

    #[test]
    fn test_aligned_slot_uses_block() {
        let mut frames: [TableFrame; 4] = core::array::from_fn(|_| TableFrame::new());
        let mut pool = TablePool::new(&mut frames);
        let mut map = MemoryMap::<4>::new(space32());

        map.add_region(MapRegion::identity(
            PA::new(0x4000_0000),
            0x20_0000,
            MemAttrs::RW_DATA,
        ))
        .unwrap();

        let built = build(Arm64, &mut map, &mut pool, TranslationRegime::El3).unwrap();
        // Root and one L2 table; the mapping terminates in a 2 MiB block.
        assert_eq!(pool.allocated(), 2);

        let l2 = follow(&pool, pool.read_entry::<Arm64>(built.root(), 1), 1);
        match Arm64::decode(pool.read_entry::<Arm64>(l2, 0), 2) {
            Descriptor::Block { phys, .. } => assert_eq!(phys, PA::new(0x4000_0000)),
            other => panic!("expected block, got {:?}", other),
        }
    }

    #[test]
    fn test_pool_exhaustion_is_reported() {
        let mut frames: [TableFrame; 2] = core::array::from_fn(|_| TableFrame::new());
        let mut pool = TablePool::new(&mut frames);
        let mut map = MemoryMap::<4>::new(space32());

        // Needs root + L2 + L3; the pool only holds two frames.
        map.add_region(MapRegion::identity(
            PA::new(0x10_0000),
            GRANULE_SIZE,
            MemAttrs::RW_DATA,
        ))
        .unwrap();

        let err = build(Arm64, &mut map, &mut pool, TranslationRegime::El3);
        assert_eq!(err.unwrap_err(), BuildError::PoolExhausted);
        assert!(!map.is_sealed());
    }

    #[test]
    fn test_build_is_one_shot() {
        let mut frames: [TableFrame; 2] = core::array::from_fn(|_| TableFrame::new());
        let mut map = MemoryMap::<4>::new(space32());
        map.add_region(MapRegion::identity(
            PA::new(0x4000_0000),
            0x20_0000,
            MemAttrs::RW_DATA,
        ))
        .unwrap();

        let mut pool = TablePool::new(&mut frames);
        build(Arm64, &mut map, &mut pool, TranslationRegime::El3).unwrap();
        assert!(map.is_sealed());

        assert_eq!(
            map.add_region(MapRegion::identity(
                PA::new(0x5000_0000),
                GRANULE_SIZE,
                MemAttrs::RW_DATA,
            )),
            Err(MmapError::AlreadyBuilt)
        );
        let again = build(Arm64, &mut map, &mut pool, TranslationRegime::El3);
        assert_eq!(again.unwrap_err(), BuildError::AlreadyBuilt);
    }

    #[test]
    fn test_registration_order_is_immaterial() {
        let regions = [
            MapRegion::identity(PA::new(0x4000_0000), 0x20_0000, MemAttrs::RW_DATA),
            MapRegion::identity(PA::new(0x0900_0000), GRANULE_SIZE, MemAttrs::DEVICE),
            MapRegion::identity(PA::new(0x4020_0000), 0x2000, MemAttrs::RO_DATA),
        ];

        let mut frames: [TableFrame; 6] = core::array::from_fn(|_| TableFrame::new());
        let mut first = [[0u8; GRANULE_SIZE as usize]; 6];
        let used;
        {
            let mut map = MemoryMap::<4>::new(space32());
            for region in regions {
                map.add_region(region).unwrap();
            }
            let mut pool = TablePool::new(&mut frames);
            build(Arm64, &mut map, &mut pool, TranslationRegime::El3).unwrap();
            used = pool.allocated();
            for (i, id) in pool.ids().enumerate() {
                first[i] = *pool.frame_bytes(id);
            }
        }

        // Same regions in reverse order, rebuilt over the same storage so
        // the table addresses inside descriptors line up.
        let mut map = MemoryMap::<4>::new(space32());
        for region in regions.iter().rev() {
            map.add_region(*region).unwrap();
        }
        let mut pool = TablePool::new(&mut frames);
        build(Arm64, &mut map, &mut pool, TranslationRegime::El3).unwrap();
        assert_eq!(pool.allocated(), used);
        for (i, id) in pool.ids().enumerate() {
            assert!(first[i][..] == pool.frame_bytes(id)[..], "frame {} differs", i);
        }
    }

    #[test]
    fn test_section_subtable_is_shared() {
        #[repr(align(16384))]
        struct Aligned([TableFrame; 8]);

        let mut storage = Aligned(core::array::from_fn(|_| TableFrame::new()));
        let mut pool = TablePool::new(&mut storage.0);
        let mut map = MemoryMap::<4>::new(space32());

        // Two pages in the same 1 MiB section.
        map.add_region(MapRegion::identity(
            PA::new(0x10_0000),
            GRANULE_SIZE,
            MemAttrs::RW_DATA,
        ))
        .unwrap();
        map.add_region(MapRegion::identity(
            PA::new(0x18_0000),
            GRANULE_SIZE,
            MemAttrs::RO_DATA,
        ))
        .unwrap();

        let built = build(Arm32Short, &mut map, &mut pool, TranslationRegime::El1).unwrap();
        // 16 KiB root (4 frames) plus exactly one shared page table.
        assert_eq!(pool.allocated(), 5);

        let l2 = match Arm32Short::decode(pool.read_entry::<Arm32Short>(built.root(), 1), 1) {
            Descriptor::Table { next } => pool.frame_id::<Arm32Short>(next).unwrap(),
            other => panic!("expected table descriptor, got {:?}", other),
        };
        assert!(matches!(
            Arm32Short::decode(pool.read_entry::<Arm32Short>(l2, 0), 2),
            Descriptor::Page { .. }
        ));
        assert!(matches!(
            Arm32Short::decode(pool.read_entry::<Arm32Short>(l2, 128), 2),
            Descriptor::Page { .. }
        ));
        assert_eq!(
            Arm32Short::decode(pool.read_entry::<Arm32Short>(l2, 64), 2),
            Descriptor::Invalid
        );
    }
}
