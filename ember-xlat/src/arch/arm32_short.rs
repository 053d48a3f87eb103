//! AArch32 short-descriptor format
//!
//! The legacy two-level format with 32-bit entries: a 16 KiB level-1 table
//! of 4096 one-MiB sections, each optionally pointing at a 256-entry
//! level-2 page table. No attribute-index table exists; memory types are
//! spelled out per entry in the TEX/C/B bits (TEX remap disabled), with
//! the domain register parked at "domain 0, client" so the descriptor
//! permission bits are what actually applies.
//!
//! Two attribute limitations are inherent to the format and surface as
//! [`BuildError::UnsupportedAttributes`]:
//!
//! - there is no non-cacheable normal encoding among the two TEX/C/B
//!   patterns this encoder speaks (device `000/0/1`, write-back `001/1/1`);
//! - small pages have no NS bit (in this format NS exists only in level-1
//!   descriptors), so a non-secure region must be mapped with sections.

use tock_registers::{
    interfaces::{Readable, ReadWriteable},
    register_bitfields,
    registers::InMemoryRegister,
};

use crate::address::PA;
use crate::attrs::{MemAttrs, MemoryType};
use crate::builder::BuiltTables;
use crate::descriptor::{Descriptor, TranslationRegime};
use crate::enable::{base_params, EnableFlags, EnableParams};
use crate::traits::{BuildError, DescriptorCodec, Geometry};

register_bitfields![u32,
    /// Level-1 section descriptor fields.
    pub Section [
        TYPE OFFSET(0) NUMBITS(2) [
            Invalid = 0b00,
            Table = 0b01,
            Section = 0b10
        ],
        B OFFSET(2) NUMBITS(1) [],
        C OFFSET(3) NUMBITS(1) [],
        XN OFFSET(4) NUMBITS(1) [],
        DOMAIN OFFSET(5) NUMBITS(4) [],
        AP0 OFFSET(10) NUMBITS(1) [],
        AP1 OFFSET(11) NUMBITS(1) [],
        TEX OFFSET(12) NUMBITS(3) [],
        AP2 OFFSET(15) NUMBITS(1) [],
        S OFFSET(16) NUMBITS(1) [],
        NG OFFSET(17) NUMBITS(1) [],
        NS OFFSET(19) NUMBITS(1) []
    ],
    /// Level-2 small-page descriptor fields.
    pub SmallPage [
        XN OFFSET(0) NUMBITS(1) [],
        TYPE OFFSET(1) NUMBITS(1) [],
        B OFFSET(2) NUMBITS(1) [],
        C OFFSET(3) NUMBITS(1) [],
        AP0 OFFSET(4) NUMBITS(1) [],
        AP1 OFFSET(5) NUMBITS(1) [],
        TEX OFFSET(6) NUMBITS(3) [],
        AP2 OFFSET(9) NUMBITS(1) [],
        S OFFSET(10) NUMBITS(1) [],
        NG OFFSET(11) NUMBITS(1) []
    ]
];

const SECTION_BASE_MASK: u32 = 0xFFF0_0000;
const TABLE_BASE_MASK: u32 = 0xFFFF_FC00;
const PAGE_BASE_MASK: u32 = 0xFFFF_F000;
const TABLE_TYPE_BITS: u32 = 0b01;

/// The AArch32 short-descriptor translation-table format.
#[derive(Clone, Copy, Debug)]
pub struct Arm32Short;

impl Geometry for Arm32Short {
    const NAME: &'static str = "AArch32 short-descriptor";
    const ENTRY_BYTES: usize = 4;
    const LAST_LEVEL: usize = 2;
    const MIN_BLOCK_LEVEL: usize = 1;
    const VA_BITS_MIN: u32 = 32;
    const VA_BITS_MAX: u32 = 32;
    const PA_BITS_MAX: u32 = 32;

    #[inline]
    fn level_shift(level: usize) -> u32 {
        debug_assert!((1..=Self::LAST_LEVEL).contains(&level));
        match level {
            1 => 20,
            _ => 12,
        }
    }

    #[inline]
    fn base_level(_va_bits: u32) -> usize {
        1
    }
}

fn encode_section(phys: PA, attrs: MemAttrs) -> Result<u64, BuildError> {
    let reg: InMemoryRegister<u32, Section::Register> = InMemoryRegister::new(0);

    reg.modify(Section::TYPE::Section + Section::AP0::SET);
    match attrs.memory_type() {
        MemoryType::Normal => {
            // TEX/C/B = 001/1/1: write-back write-allocate, shareable.
            reg.modify(Section::TEX.val(0b001) + Section::C::SET + Section::B::SET + Section::S::SET);
        }
        MemoryType::Device => {
            // TEX/C/B = 000/0/1: shareable device.
            reg.modify(Section::B::SET);
        }
        MemoryType::NormalNonCacheable => return Err(BuildError::UnsupportedAttributes),
    }
    if !attrs.is_writable() {
        reg.modify(Section::AP2::SET);
    }
    if attrs.is_non_secure() {
        reg.modify(Section::NS::SET);
    }
    if attrs.execute_never() {
        reg.modify(Section::XN::SET);
    }
    Ok(u64::from(reg.get() | (phys.value() as u32 & SECTION_BASE_MASK)))
}

fn encode_page(phys: PA, attrs: MemAttrs) -> Result<u64, BuildError> {
    // Small pages cannot express the NS attribute at all.
    if attrs.is_non_secure() {
        return Err(BuildError::UnsupportedAttributes);
    }

    let reg: InMemoryRegister<u32, SmallPage::Register> = InMemoryRegister::new(0);

    reg.modify(SmallPage::TYPE::SET + SmallPage::AP0::SET);
    match attrs.memory_type() {
        MemoryType::Normal => {
            reg.modify(
                SmallPage::TEX.val(0b001) + SmallPage::C::SET + SmallPage::B::SET + SmallPage::S::SET,
            );
        }
        MemoryType::Device => {
            reg.modify(SmallPage::B::SET);
        }
        MemoryType::NormalNonCacheable => return Err(BuildError::UnsupportedAttributes),
    }
    if !attrs.is_writable() {
        reg.modify(SmallPage::AP2::SET);
    }
    if attrs.execute_never() {
        reg.modify(SmallPage::XN::SET);
    }
    Ok(u64::from(reg.get() | (phys.value() as u32 & PAGE_BASE_MASK)))
}

fn decode_section_attrs(raw: u32) -> MemAttrs {
    let reg: InMemoryRegister<u32, Section::Register> = InMemoryRegister::new(raw);

    // Only the two patterns the encoder emits can appear in our tables.
    let mut attrs = if reg.read(Section::C) != 0 {
        MemAttrs::normal()
    } else {
        MemAttrs::device()
    };
    if reg.read(Section::AP2) != 0 {
        attrs = attrs.read_only();
    }
    if reg.read(Section::NS) != 0 {
        attrs = attrs.non_secure();
    }
    if reg.read(Section::XN) == 0 {
        attrs = attrs.executable();
    }
    attrs
}

fn decode_page_attrs(raw: u32) -> MemAttrs {
    let reg: InMemoryRegister<u32, SmallPage::Register> = InMemoryRegister::new(raw);

    let mut attrs = if reg.read(SmallPage::C) != 0 {
        MemAttrs::normal()
    } else {
        MemAttrs::device()
    };
    if reg.read(SmallPage::AP2) != 0 {
        attrs = attrs.read_only();
    }
    if reg.read(SmallPage::XN) == 0 {
        attrs = attrs.executable();
    }
    attrs
}

impl DescriptorCodec for Arm32Short {
    fn encode(
        desc: &Descriptor,
        level: usize,
        regime: TranslationRegime,
    ) -> Result<u64, BuildError> {
        debug_assert_eq!(regime, TranslationRegime::El1);
        match *desc {
            Descriptor::Invalid => Ok(0),
            Descriptor::Table { next } => {
                debug_assert!(level == 1 && next.is_aligned(1 << 10));
                Ok(u64::from((next.value() as u32 & TABLE_BASE_MASK) | TABLE_TYPE_BITS))
            }
            Descriptor::Block { phys, attrs } => {
                debug_assert!(level == 1 && phys.is_aligned(1 << 20));
                encode_section(phys, attrs)
            }
            Descriptor::Page { phys, attrs } => {
                debug_assert!(level == Self::LAST_LEVEL && phys.is_page_aligned());
                encode_page(phys, attrs)
            }
        }
    }

    fn decode(raw: u64, level: usize) -> Descriptor {
        debug_assert!(raw >> 32 == 0);
        let raw = raw as u32;
        if level == 1 {
            match raw & 0b11 {
                0b01 => Descriptor::Table {
                    next: PA::new(u64::from(raw & TABLE_BASE_MASK)),
                },
                0b10 => Descriptor::Block {
                    phys: PA::new(u64::from(raw & SECTION_BASE_MASK)),
                    attrs: decode_section_attrs(raw),
                },
                // Fault entries, and encodings nothing here emits.
                _ => Descriptor::Invalid,
            }
        } else if raw & 0b10 != 0 {
            Descriptor::Page {
                phys: PA::new(u64::from(raw & PAGE_BASE_MASK)),
                attrs: decode_page_attrs(raw),
            }
        } else {
            // Unmapped, or the large-page encoding nothing here emits.
            Descriptor::Invalid
        }
    }
}

/// TTBR0 walk-attribute bits (multiprocessing-extensions encoding).
///
/// The IRGN field is split: bit 6 carries IRGN\[0\] and bit 0 carries
/// IRGN\[1\].
mod ttbr {
    /// IRGN = 0b01 (inner write-back write-allocate): IRGN\[0\] set,
    /// IRGN\[1\] clear
    pub const IRGN0_WBWA: u64 = 1 << 6;
    /// S: shareable walks
    pub const S: u64 = 1 << 1;
    /// RGN: outer write-back write-allocate
    pub const RGN_WBWA: u64 = 0b01 << 3;
    /// NOS: inner-shareable rather than outer
    pub const NOS: u64 = 1 << 5;
}

/// Domain 0 as client; all descriptors use domain 0, so the permission
/// bits in the descriptors are what actually applies.
const DACR_D0_CLIENT: u32 = 0b01;

/// Compute the enable-step register values for a built short-descriptor
/// tree.
///
/// TTBCR stays zero (N=0, EAE=0), the walk attributes ride in the low
/// bits of TTBR0, and the control-register WXN bit is left alone on this
/// path; the descriptors already carry W^X.
pub fn enable_params(tables: &BuiltTables, flags: EnableFlags) -> EnableParams {
    debug_assert_eq!(tables.format(), Arm32Short::NAME);
    debug_assert_eq!(tables.regime(), TranslationRegime::El1);

    let walk = if flags.non_cacheable_walk {
        0
    } else {
        ttbr::IRGN0_WBWA | ttbr::S | ttbr::RGN_WBWA | ttbr::NOS
    };

    EnableParams {
        dacr: DACR_D0_CLIENT,
        ttbr: tables.root_pa().value() | walk,
        wxn: false,
        ..base_params(tables, flags)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::build;
    use crate::pool::{TableFrame, TablePool};
    use crate::region::{MapRegion, MemoryMap};
    use crate::{AddressSpace, GRANULE_SIZE};

    // Storage aligned for the 16 KiB root.
    #[repr(align(16384))]
    struct Aligned([TableFrame; 8]);

    fn aligned_frames() -> Aligned {
        Aligned(core::array::from_fn(|_| TableFrame::new()))
    }

    #[test]
    fn test_section_encoding() {
        let rw = Descriptor::Block {
            phys: PA::new(0x4010_0000),
            attrs: MemAttrs::RW_DATA,
        };
        // Section | B | C | XN | AP0 | TEX=001 | S.
        let raw = Arm32Short::encode(&rw, 1, TranslationRegime::El1).unwrap();
        assert_eq!(raw, 0x4011_141E);

        let code = Descriptor::Block {
            phys: PA::new(0x4010_0000),
            attrs: MemAttrs::CODE,
        };
        // XN clear, AP2 set for read-only.
        let raw = Arm32Short::encode(&code, 1, TranslationRegime::El1).unwrap();
        assert_eq!(raw, 0x4011_940E);

        let device = Descriptor::Block {
            phys: PA::new(0x0900_0000),
            attrs: MemAttrs::DEVICE,
        };
        // TEX/C/B = 000/0/1, XN, not S.
        let raw = Arm32Short::encode(&device, 1, TranslationRegime::El1).unwrap();
        assert_eq!(raw, 0x0900_0416);

        let shared = Descriptor::Block {
            phys: PA::new(0x8000_0000),
            attrs: MemAttrs::RW_DATA.non_secure(),
        };
        let raw = Arm32Short::encode(&shared, 1, TranslationRegime::El1).unwrap();
        assert_eq!(raw, 0x8009_141E);
    }

    #[test]
    fn test_small_page_encoding() {
        let device = Descriptor::Page {
            phys: PA::new(0x0900_0000),
            attrs: MemAttrs::DEVICE,
        };
        let raw = Arm32Short::encode(&device, 2, TranslationRegime::El1).unwrap();
        assert_eq!(raw, 0x0900_0017);

        let rw = Descriptor::Page {
            phys: PA::new(0x4200_3000),
            attrs: MemAttrs::RW_DATA,
        };
        let raw = Arm32Short::encode(&rw, 2, TranslationRegime::El1).unwrap();
        assert_eq!(raw, 0x4200_345F);
    }

    #[test]
    fn test_table_descriptor_round_trip() {
        let desc = Descriptor::Table {
            next: PA::new(0x8000_1000),
        };
        let raw = Arm32Short::encode(&desc, 1, TranslationRegime::El1).unwrap();
        assert_eq!(raw, 0x8000_1001);
        assert_eq!(Arm32Short::decode(raw, 1), desc);
    }

    #[test]
    fn test_decode_inverts_encode() {
        let cases = [
            (
                Descriptor::Block {
                    phys: PA::new(0x4000_0000),
                    attrs: MemAttrs::CODE,
                },
                1,
            ),
            (
                Descriptor::Block {
                    phys: PA::new(0xC000_0000),
                    attrs: MemAttrs::DEVICE.non_secure(),
                },
                1,
            ),
            (
                Descriptor::Page {
                    phys: PA::new(0x4400_A000),
                    attrs: MemAttrs::RO_DATA,
                },
                2,
            ),
        ];
        for (desc, level) in cases {
            let raw = Arm32Short::encode(&desc, level, TranslationRegime::El1).unwrap();
            assert_eq!(Arm32Short::decode(raw, level), desc, "{:?} at L{}", desc, level);
        }
        assert_eq!(Arm32Short::decode(0, 1), Descriptor::Invalid);
        assert_eq!(Arm32Short::decode(0, 2), Descriptor::Invalid);
    }

    #[test]
    fn test_non_cacheable_memory_rejected() {
        let desc = Descriptor::Page {
            phys: PA::new(0x4000_0000),
            attrs: MemAttrs::NON_CACHEABLE,
        };
        let err = Arm32Short::encode(&desc, 2, TranslationRegime::El1);
        assert_eq!(err.unwrap_err(), BuildError::UnsupportedAttributes);

        // The rejection surfaces through a whole build as well.
        let mut map = MemoryMap::<2>::new(AddressSpace::new(32, 32));
        map.add_region(MapRegion::identity(
            PA::new(0x4000_0000),
            1 << 20,
            MemAttrs::NON_CACHEABLE,
        ))
        .unwrap();
        let mut storage = aligned_frames();
        let mut pool = TablePool::new(&mut storage.0);
        let err = build(Arm32Short, &mut map, &mut pool, TranslationRegime::El1);
        assert_eq!(err.unwrap_err(), BuildError::UnsupportedAttributes);
        assert!(!map.is_sealed());
    }

    #[test]
    fn test_non_secure_page_rejected() {
        let page = Descriptor::Page {
            phys: PA::new(0x4000_0000),
            attrs: MemAttrs::RW_DATA.non_secure(),
        };
        let err = Arm32Short::encode(&page, 2, TranslationRegime::El1);
        assert_eq!(err.unwrap_err(), BuildError::UnsupportedAttributes);

        // Sections carry NS fine.
        let section = Descriptor::Block {
            phys: PA::new(0x4000_0000),
            attrs: MemAttrs::RW_DATA.non_secure(),
        };
        assert!(Arm32Short::encode(&section, 1, TranslationRegime::El1).is_ok());
    }

    #[test]
    fn test_tree_shape() {
        assert_eq!(Arm32Short::base_entries(32), 4096);
        assert_eq!(Arm32Short::root_bytes(32), 16384);
        assert_eq!(Arm32Short::root_align(32), 16384);
        assert_eq!(Arm32Short::sub_entries(2), 256);
        assert!(!Arm32Short::supports(31, 32));
        assert!(!Arm32Short::supports(32, 33));
    }

    #[test]
    fn test_enable_values() {
        let mut map = MemoryMap::<2>::new(AddressSpace::new(32, 32));
        map.add_region(MapRegion::identity(
            PA::new(0x4000_0000),
            GRANULE_SIZE,
            MemAttrs::RW_DATA,
        ))
        .unwrap();
        // 16 KiB root plus one L2 table.
        let mut storage = aligned_frames();
        let mut pool = TablePool::new(&mut storage.0);
        let tables = build(Arm32Short, &mut map, &mut pool, TranslationRegime::El1).unwrap();

        let params = enable_params(&tables, EnableFlags::default());
        assert_eq!(params.dacr, 0b01);
        assert_eq!(params.tcr, 0);
        assert_eq!(params.mair, 0);
        assert!(!params.wxn);
        assert_eq!(params.ttbr, tables.root_pa().value() | 0x6A);
        // Reassemble the split IRGN field (bit 6 is IRGN[0], bit 0 is
        // IRGN[1]): cached walks must read 0b01, write-back write-allocate.
        let irgn = ((params.ttbr & 0b1) << 1) | ((params.ttbr >> 6) & 0b1);
        assert_eq!(irgn, 0b01);

        let flags = EnableFlags {
            disable_dcache: true,
            non_cacheable_walk: true,
        };
        let params = enable_params(&tables, flags);
        assert_eq!(params.ttbr, tables.root_pa().value());
        assert!(!params.enable_dcache);
    }
}
