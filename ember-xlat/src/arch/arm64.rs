//! AArch64 long-descriptor format, 4 KiB granule
//!
//! Four levels (0-3) of 512-entry tables with 64-bit descriptors. Blocks
//! are legal at levels 1 and 2; level 3 maps pages. Field layout of a
//! terminal descriptor:
//!
//! ```text
//! | Bit(s)  | Field      | Use here                                |
//! |---------|------------|-----------------------------------------|
//! | 0       | VALID      | always set                              |
//! | 1       | TYPE       | 0 = block, 1 = table (or page at L3)    |
//! | 4:2     | ATTR_INDEX | MAIR slot from the attribute set        |
//! | 5       | NS         | non-secure output address space         |
//! | 6       | AP[1]      | RES1 at EL3, 0 at EL1 (no EL0 access)   |
//! | 7       | AP[2]      | 1 = read-only                           |
//! | 9:8     | SH         | 11 inner-shareable, 10 outer-shareable  |
//! | 10      | AF         | always set (no access-flag faulting)    |
//! | 47:12   | OA         | output address (less at coarser levels) |
//! | 53      | PXN        | privileged execute-never (EL1 regime)   |
//! | 54      | XN/UXN     | execute-never                           |
//! ```

use tock_registers::{
    interfaces::{Readable, ReadWriteable},
    register_bitfields,
    registers::InMemoryRegister,
};

use crate::address::PA;
use crate::attrs::{mair_value, MemAttrs, Shareability, MAIR_IDX_DEVICE, MAIR_IDX_NORMAL_NC};
use crate::builder::BuiltTables;
use crate::descriptor::{Descriptor, TranslationRegime};
use crate::enable::{base_params, EnableFlags, EnableParams};
use crate::traits::{BuildError, DescriptorCodec, Geometry};

register_bitfields![u64,
    /// Stage-1 long-descriptor fields shared by blocks and pages.
    pub LongDescriptor [
        VALID OFFSET(0) NUMBITS(1) [],
        TYPE OFFSET(1) NUMBITS(1) [
            Block = 0,
            TableOrPage = 1
        ],
        ATTR_INDEX OFFSET(2) NUMBITS(3) [],
        NS OFFSET(5) NUMBITS(1) [],
        AP1 OFFSET(6) NUMBITS(1) [],
        AP2 OFFSET(7) NUMBITS(1) [],
        SH OFFSET(8) NUMBITS(2) [
            NonShareable = 0b00,
            OuterShareable = 0b10,
            InnerShareable = 0b11
        ],
        AF OFFSET(10) NUMBITS(1) [],
        NG OFFSET(11) NUMBITS(1) [],
        PXN OFFSET(53) NUMBITS(1) [],
        XN OFFSET(54) NUMBITS(1) []
    ]
];

const VALID_BIT: u64 = 1 << 0;
const TYPE_BIT: u64 = 1 << 1;
const BLOCK_BITS: u64 = VALID_BIT;
const TABLE_BITS: u64 = VALID_BIT | TYPE_BIT;
const PAGE_BITS: u64 = VALID_BIT | TYPE_BIT;

/// Widest output address the format carries.
const OA_MAX_BITS: u32 = 48;

/// Output-address mask for an entry covering `1 << shift` bytes.
const fn oa_mask(shift: u32) -> u64 {
    ((1u64 << OA_MAX_BITS) - 1) & !((1u64 << shift) - 1)
}

/// The AArch64 translation-table format.
#[derive(Clone, Copy, Debug)]
pub struct Arm64;

impl Geometry for Arm64 {
    const NAME: &'static str = "AArch64";
    const ENTRY_BYTES: usize = 8;
    const LAST_LEVEL: usize = 3;
    const MIN_BLOCK_LEVEL: usize = 1;
    const VA_BITS_MIN: u32 = 25;
    const VA_BITS_MAX: u32 = 48;
    const PA_BITS_MAX: u32 = 48;

    #[inline]
    fn level_shift(level: usize) -> u32 {
        debug_assert!(level <= Self::LAST_LEVEL);
        match level {
            0 => 39,
            1 => 30,
            2 => 21,
            _ => 12,
        }
    }

    #[inline]
    fn base_level(va_bits: u32) -> usize {
        if va_bits > 39 {
            0
        } else if va_bits > 30 {
            1
        } else if va_bits > 21 {
            2
        } else {
            3
        }
    }
}

/// Attribute bits of a terminal descriptor, without type or address.
fn encode_attrs(attrs: MemAttrs, regime: TranslationRegime) -> u64 {
    let reg: InMemoryRegister<u64, LongDescriptor::Register> = InMemoryRegister::new(0);

    reg.modify(LongDescriptor::AF::SET + LongDescriptor::ATTR_INDEX.val(attrs.attr_index()));
    match attrs.shareability() {
        Shareability::Inner => reg.modify(LongDescriptor::SH::InnerShareable),
        Shareability::Outer => reg.modify(LongDescriptor::SH::OuterShareable),
    }
    if !attrs.is_writable() {
        reg.modify(LongDescriptor::AP2::SET);
    }
    if attrs.is_non_secure() {
        reg.modify(LongDescriptor::NS::SET);
    }
    match regime {
        TranslationRegime::El3 => {
            // AP[1] is RES1 at EL3; one XN bit covers everything.
            reg.modify(LongDescriptor::AP1::SET);
            if attrs.execute_never() {
                reg.modify(LongDescriptor::XN::SET);
            }
        }
        TranslationRegime::El1 => {
            // No EL0 software exists at boot, so execute-never sets both
            // bits and executable clears both.
            if attrs.execute_never() {
                reg.modify(LongDescriptor::XN::SET + LongDescriptor::PXN::SET);
            }
        }
    }
    reg.get()
}

/// Rebuild the attribute set of a terminal descriptor.
///
/// Regime-invariant on purpose: bit 54 is set for execute-never mappings
/// in both regimes, so the decoder never needs to know which one built
/// the tree.
fn decode_attrs(raw: u64) -> MemAttrs {
    let reg: InMemoryRegister<u64, LongDescriptor::Register> = InMemoryRegister::new(raw);

    let mut attrs = match reg.read(LongDescriptor::ATTR_INDEX) {
        MAIR_IDX_DEVICE => MemAttrs::device(),
        MAIR_IDX_NORMAL_NC => MemAttrs::normal_non_cacheable(),
        _ => MemAttrs::normal(),
    };
    if reg.read(LongDescriptor::AP2) != 0 {
        attrs = attrs.read_only();
    }
    if reg.read(LongDescriptor::NS) != 0 {
        attrs = attrs.non_secure();
    }
    if reg.read(LongDescriptor::XN) == 0 {
        attrs = attrs.executable();
    }
    attrs
}

impl DescriptorCodec for Arm64 {
    fn encode(
        desc: &Descriptor,
        level: usize,
        regime: TranslationRegime,
    ) -> Result<u64, BuildError> {
        let raw = match *desc {
            Descriptor::Invalid => 0,
            Descriptor::Table { next } => {
                debug_assert!(next.is_page_aligned());
                (next.value() & oa_mask(12)) | TABLE_BITS
            }
            Descriptor::Block { phys, attrs } => {
                debug_assert!(Self::block_allowed(level) && level < Self::LAST_LEVEL);
                let shift = Self::level_shift(level);
                debug_assert!(phys.is_aligned(1u64 << shift));
                (phys.value() & oa_mask(shift)) | encode_attrs(attrs, regime) | BLOCK_BITS
            }
            Descriptor::Page { phys, attrs } => {
                debug_assert!(level == Self::LAST_LEVEL && phys.is_page_aligned());
                (phys.value() & oa_mask(12)) | encode_attrs(attrs, regime) | PAGE_BITS
            }
        };
        Ok(raw)
    }

    fn decode(raw: u64, level: usize) -> Descriptor {
        if raw & VALID_BIT == 0 {
            return Descriptor::Invalid;
        }
        let table_or_page = raw & TYPE_BIT != 0;
        if level < Self::LAST_LEVEL && table_or_page {
            return Descriptor::Table {
                next: PA::new(raw & oa_mask(12)),
            };
        }
        if level == Self::LAST_LEVEL && !table_or_page {
            // Reserved encoding at the last level.
            return Descriptor::Invalid;
        }
        let phys = PA::new(raw & oa_mask(Self::level_shift(level)));
        let attrs = decode_attrs(raw);
        if level == Self::LAST_LEVEL {
            Descriptor::Page { phys, attrs }
        } else {
            Descriptor::Block { phys, attrs }
        }
    }
}

/// TCR fields shared by the EL1 and EL3 variants.
///
/// The low halves line up; the differences are the PA-size field position
/// (PS at \[18:16\] for EL3, IPS at \[34:32\] for EL1) and the EL3 RES1
/// bits.
mod tcr {
    /// IRGN0: inner write-back read-allocate write-allocate walks
    pub const IRGN0_WBWA: u64 = 0b01 << 8;
    /// ORGN0: outer write-back read-allocate write-allocate walks
    pub const ORGN0_WBWA: u64 = 0b01 << 10;
    /// SH0: inner-shareable walks
    pub const SH0_INNER: u64 = 0b11 << 12;
    /// TG0: 4 KiB granule
    pub const TG0_4K: u64 = 0b00 << 14;
    /// PS field shift (EL3)
    pub const PS_SHIFT: u32 = 16;
    /// IPS field shift (EL1)
    pub const IPS_SHIFT: u32 = 32;
    /// EPD1: no walks through TTBR1_EL1
    pub const EPD1: u64 = 1 << 23;
    /// Bits 23 and 31 of TCR_EL3 read as one
    pub const EL3_RES1: u64 = (1 << 23) | (1 << 31);
}

/// PA widths the PS/IPS field can express, smallest first.
const PA_SIZE_STEPS: [u32; 6] = [32, 36, 40, 42, 44, 48];

/// Smallest expressible PA width covering `max_pa`, in bits.
fn pa_size_bits(max_pa: PA) -> u32 {
    let needed = 64 - max_pa.value().leading_zeros();
    for bits in PA_SIZE_STEPS {
        if needed <= bits {
            return bits;
        }
    }
    // The registry already refused anything wider than PA_BITS_MAX.
    OA_MAX_BITS
}

/// PS/IPS encoding of a supported PA width.
fn pa_size_encoding(bits: u32) -> u64 {
    match bits {
        32 => 0b000,
        36 => 0b001,
        40 => 0b010,
        42 => 0b011,
        44 => 0b100,
        _ => 0b101,
    }
}

/// Compute the enable-step register values for a built AArch64 tree.
///
/// `hardware_pa_bits` is the PA range the core reports in
/// `ID_AA64MMFR0_EL1`; the caller reads it because this crate never
/// touches hardware. The TCR variant follows the regime the tree was
/// built for.
///
/// # Panics
///
/// Panics if the tree maps physical addresses the core cannot output.
pub fn enable_params(
    tables: &BuiltTables,
    flags: EnableFlags,
    hardware_pa_bits: u32,
) -> EnableParams {
    debug_assert_eq!(tables.format(), Arm64::NAME);
    let pa_bits = pa_size_bits(tables.max_pa());
    assert!(
        pa_bits <= hardware_pa_bits,
        "mapped PA range exceeds hardware support"
    );

    let t0sz = u64::from(64 - tables.va_bits());
    let walk = if flags.non_cacheable_walk {
        // Non-cacheable, non-shareable walks.
        0
    } else {
        tcr::IRGN0_WBWA | tcr::ORGN0_WBWA | tcr::SH0_INNER
    };
    let tcr = match tables.regime() {
        TranslationRegime::El3 => {
            t0sz | walk | tcr::TG0_4K | (pa_size_encoding(pa_bits) << tcr::PS_SHIFT) | tcr::EL3_RES1
        }
        TranslationRegime::El1 => {
            t0sz | walk | tcr::TG0_4K | (pa_size_encoding(pa_bits) << tcr::IPS_SHIFT) | tcr::EPD1
        }
    };

    EnableParams {
        mair: mair_value(),
        tcr,
        wxn: true,
        ..base_params(tables, flags)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::VA;
    use crate::builder::build;
    use crate::pool::{TableFrame, TablePool};
    use crate::region::{MapRegion, MemoryMap};
    use crate::{AddressSpace, GRANULE_SIZE};

    #[test]
    fn test_block_encoding_el3() {
        let desc = Descriptor::Block {
            phys: PA::new(0x4000_0000),
            attrs: MemAttrs::RW_DATA,
        };
        // VALID | AP1 | SH inner | AF | XN, normal slot 0, 2 MiB OA.
        let raw = Arm64::encode(&desc, 2, TranslationRegime::El3).unwrap();
        assert_eq!(raw, 0x0040_0000_4000_0741);

        let device = Descriptor::Block {
            phys: PA::new(0x4000_0000),
            attrs: MemAttrs::DEVICE.non_secure(),
        };
        // Device slot, outer-shareable, NS, XN.
        let raw = Arm64::encode(&device, 1, TranslationRegime::El3).unwrap();
        assert_eq!(raw, 0x0040_0000_4000_0665);
    }

    #[test]
    fn test_page_encoding_per_regime() {
        let code = Descriptor::Page {
            phys: PA::new(0x0020_0000),
            attrs: MemAttrs::CODE,
        };
        // EL3: AP1 is RES1, XN clear for read-only code.
        let raw = Arm64::encode(&code, 3, TranslationRegime::El3).unwrap();
        assert_eq!(raw, 0x0000_0000_0020_07C3);
        // EL1: AP1 stays clear, and so do XN/PXN.
        let raw = Arm64::encode(&code, 3, TranslationRegime::El1).unwrap();
        assert_eq!(raw, 0x0000_0000_0020_0783);

        let data = Descriptor::Page {
            phys: PA::new(0x0020_0000),
            attrs: MemAttrs::RW_DATA,
        };
        // EL1 execute-never sets both XN and PXN.
        let raw = Arm64::encode(&data, 3, TranslationRegime::El1).unwrap();
        assert_eq!(raw, 0x0060_0000_0020_0703);
    }

    #[test]
    fn test_table_descriptor_round_trip() {
        let desc = Descriptor::Table {
            next: PA::new(0x8_2000),
        };
        let raw = Arm64::encode(&desc, 1, TranslationRegime::El3).unwrap();
        assert_eq!(raw, 0x8_2003);
        assert_eq!(Arm64::decode(raw, 1), desc);
    }

    #[test]
    fn test_decode_inverts_encode() {
        let cases = [
            (
                Descriptor::Block {
                    phys: PA::new(0x8000_0000),
                    attrs: MemAttrs::RW_DATA,
                },
                1,
            ),
            (
                Descriptor::Block {
                    phys: PA::new(0x0940_0000),
                    attrs: MemAttrs::DEVICE,
                },
                2,
            ),
            (
                Descriptor::Page {
                    phys: PA::new(0x0400_1000),
                    attrs: MemAttrs::CODE,
                },
                3,
            ),
            (
                Descriptor::Page {
                    phys: PA::new(0x0400_2000),
                    attrs: MemAttrs::NON_CACHEABLE.non_secure(),
                },
                3,
            ),
        ];
        for regime in [TranslationRegime::El1, TranslationRegime::El3] {
            for (desc, level) in cases {
                let raw = Arm64::encode(&desc, level, regime).unwrap();
                assert_eq!(Arm64::decode(raw, level), desc, "{:?} at L{}", desc, level);
            }
        }
        assert_eq!(Arm64::decode(0, 2), Descriptor::Invalid);
    }

    #[test]
    fn test_reserved_last_level_encoding_is_invalid() {
        // Bits 0b01 at level 3 are a reserved encoding, not a block.
        assert_eq!(Arm64::decode(0x4000_0741, 3), Descriptor::Invalid);
    }

    #[test]
    fn test_pa_size_steps() {
        assert_eq!(pa_size_bits(PA::new(0xFFFF_FFFF)), 32);
        assert_eq!(pa_size_bits(PA::new(0x1_0000_0000)), 36);
        assert_eq!(pa_size_bits(PA::new(0xFF_FFFF_FFFF)), 40);
        assert_eq!(pa_size_bits(PA::new(0x100_0000_0000)), 42);
        assert_eq!(pa_size_bits(PA::new(0xFFF_FFFF_FFFF)), 44);
        assert_eq!(pa_size_bits(PA::new(0x1000_0000_0000)), 48);
        assert_eq!(pa_size_encoding(32), 0b000);
        assert_eq!(pa_size_encoding(48), 0b101);
    }

    fn built(regime: TranslationRegime) -> EnableParams {
        let mut map = MemoryMap::<4>::new(AddressSpace::new(32, 32));
        map.add_region(MapRegion::identity(
            PA::new(0x4000_0000),
            GRANULE_SIZE,
            MemAttrs::RW_DATA,
        ))
        .unwrap();
        let mut frames: [TableFrame; 4] = core::array::from_fn(|_| TableFrame::new());
        let mut pool = TablePool::new(&mut frames);
        let tables = build(Arm64, &mut map, &mut pool, regime).unwrap();
        enable_params(&tables, EnableFlags::default(), 40)
    }

    #[test]
    fn test_tcr_el3() {
        let params = built(TranslationRegime::El3);
        // T0SZ=32, WBWA inner-shareable walks, 4K granule, PS=32-bit,
        // RES1 bits 23 and 31.
        assert_eq!(params.tcr, 0x8080_3520);
        assert_eq!(params.mair, 0x0044_04FF);
        assert!(params.wxn);
        assert!(params.enable_dcache);
    }

    #[test]
    fn test_tcr_el1() {
        let params = built(TranslationRegime::El1);
        // Same low half as EL3, but EPD1 instead of RES1 and IPS at 32.
        assert_eq!(params.tcr, 0x0080_3520);
        assert_eq!(params.dacr, 0);
    }

    #[test]
    fn test_non_cacheable_walk_flag() {
        let mut map = MemoryMap::<4>::new(AddressSpace::new(32, 32));
        map.add_region(MapRegion::identity(
            PA::new(0x4000_0000),
            GRANULE_SIZE,
            MemAttrs::RW_DATA,
        ))
        .unwrap();
        let mut frames: [TableFrame; 4] = core::array::from_fn(|_| TableFrame::new());
        let mut pool = TablePool::new(&mut frames);
        let tables = build(Arm64, &mut map, &mut pool, TranslationRegime::El3).unwrap();

        let flags = EnableFlags {
            disable_dcache: true,
            non_cacheable_walk: true,
        };
        let params = enable_params(&tables, flags, 48);
        assert_eq!(params.tcr, 0x8080_0020);
        assert!(!params.enable_dcache);
    }

    #[test]
    #[should_panic(expected = "exceeds hardware support")]
    fn test_hardware_pa_range_checked() {
        let mut map = MemoryMap::<4>::new(AddressSpace::new(32, 40));
        map.add_region(MapRegion::new(
            VA::new(0x4000_0000),
            PA::new(0x18_0000_0000),
            GRANULE_SIZE,
            MemAttrs::RW_DATA,
        ))
        .unwrap();
        let mut frames: [TableFrame; 6] = core::array::from_fn(|_| TableFrame::new());
        let mut pool = TablePool::new(&mut frames);
        let tables = build(Arm64, &mut map, &mut pool, TranslationRegime::El3).unwrap();
        let _ = enable_params(&tables, EnableFlags::default(), 32);
    }
}
