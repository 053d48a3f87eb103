//! AArch32 LPAE long-descriptor format, 4 KiB granule
//!
//! The 64-bit descriptor layout is the AArch64 one with a 40-bit output
//! address; what changes is the shape of the tree. The walk starts at
//! level 1, whose table holds `2^(va_bits - 30)` entries (four for a full
//! 32-bit space), and the translation-control register is TTBCR with the
//! EAE bit selecting the format. Only the PL1&0 regime exists, so the
//! encoder takes the `El1` execute-never behaviour: both XN and PXN set
//! for execute-never, both clear for code.

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
    /// Stage-1 LPAE descriptor fields shared by blocks and pages.
    pub LpaeDescriptor [
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

/// LPAE caps the output address at 40 bits.
const OA_MAX_BITS: u32 = 40;

/// Output-address mask for an entry covering `1 << shift` bytes.
const fn oa_mask(shift: u32) -> u64 {
    ((1u64 << OA_MAX_BITS) - 1) & !((1u64 << shift) - 1)
}

/// The AArch32 LPAE translation-table format.
#[derive(Clone, Copy, Debug)]
pub struct Arm32Lpae;

impl Geometry for Arm32Lpae {
    const NAME: &'static str = "AArch32 LPAE";
    const ENTRY_BYTES: usize = 8;
    const LAST_LEVEL: usize = 3;
    const MIN_BLOCK_LEVEL: usize = 1;
    const VA_BITS_MIN: u32 = 25;
    const VA_BITS_MAX: u32 = 32;
    const PA_BITS_MAX: u32 = 40;

    #[inline]
    fn level_shift(level: usize) -> u32 {
        debug_assert!((1..=Self::LAST_LEVEL).contains(&level));
        match level {
            1 => 30,
            2 => 21,
            _ => 12,
        }
    }

    #[inline]
    fn base_level(va_bits: u32) -> usize {
        if va_bits > 30 {
            1
        } else {
            2
        }
    }
}

/// Attribute bits of a terminal descriptor, without type or address.
fn encode_attrs(attrs: MemAttrs) -> u64 {
    let reg: InMemoryRegister<u64, LpaeDescriptor::Register> = InMemoryRegister::new(0);

    reg.modify(LpaeDescriptor::AF::SET + LpaeDescriptor::ATTR_INDEX.val(attrs.attr_index()));
    match attrs.shareability() {
        Shareability::Inner => reg.modify(LpaeDescriptor::SH::InnerShareable),
        Shareability::Outer => reg.modify(LpaeDescriptor::SH::OuterShareable),
    }
    if !attrs.is_writable() {
        reg.modify(LpaeDescriptor::AP2::SET);
    }
    if attrs.is_non_secure() {
        reg.modify(LpaeDescriptor::NS::SET);
    }
    // PL1&0 with no PL0 software: execute-never means nothing executes.
    if attrs.execute_never() {
        reg.modify(LpaeDescriptor::XN::SET + LpaeDescriptor::PXN::SET);
    }
    reg.get()
}

fn decode_attrs(raw: u64) -> MemAttrs {
    let reg: InMemoryRegister<u64, LpaeDescriptor::Register> = InMemoryRegister::new(raw);

    let mut attrs = match reg.read(LpaeDescriptor::ATTR_INDEX) {
        MAIR_IDX_DEVICE => MemAttrs::device(),
        MAIR_IDX_NORMAL_NC => MemAttrs::normal_non_cacheable(),
        _ => MemAttrs::normal(),
    };
    if reg.read(LpaeDescriptor::AP2) != 0 {
        attrs = attrs.read_only();
    }
    if reg.read(LpaeDescriptor::NS) != 0 {
        attrs = attrs.non_secure();
    }
    if reg.read(LpaeDescriptor::XN) == 0 {
        attrs = attrs.executable();
    }
    attrs
}

impl DescriptorCodec for Arm32Lpae {
    fn encode(
        desc: &Descriptor,
        level: usize,
        regime: TranslationRegime,
    ) -> Result<u64, BuildError> {
        debug_assert_eq!(regime, TranslationRegime::El1);
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
                (phys.value() & oa_mask(shift)) | encode_attrs(attrs) | BLOCK_BITS
            }
            Descriptor::Page { phys, attrs } => {
                debug_assert!(level == Self::LAST_LEVEL && phys.is_page_aligned());
                (phys.value() & oa_mask(12)) | encode_attrs(attrs) | PAGE_BITS
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

/// TTBCR fields for the long-descriptor format.
mod ttbcr {
    /// EAE: translation uses the long-descriptor format
    pub const EAE: u64 = 1 << 31;
    /// IRGN0: inner write-back read-allocate write-allocate walks
    pub const IRGN0_WBWA: u64 = 0b01 << 8;
    /// ORGN0: outer write-back read-allocate write-allocate walks
    pub const ORGN0_WBWA: u64 = 0b01 << 10;
    /// SH0: inner-shareable walks
    pub const SH0_INNER: u64 = 0b11 << 12;
    /// EPD1: no walks through TTBR1
    pub const EPD1: u64 = 1 << 23;
}

/// Compute the enable-step register values for a built LPAE tree.
///
/// The `mair` value packs MAIR0 in the low word and MAIR1 in the high
/// word; all three slots used here live in MAIR0.
pub fn enable_params(tables: &BuiltTables, flags: EnableFlags) -> EnableParams {
    debug_assert_eq!(tables.format(), Arm32Lpae::NAME);
    debug_assert_eq!(tables.regime(), TranslationRegime::El1);

    let t0sz = u64::from(32 - tables.va_bits());
    let walk = if flags.non_cacheable_walk {
        0
    } else {
        ttbcr::IRGN0_WBWA | ttbcr::ORGN0_WBWA | ttbcr::SH0_INNER
    };

    EnableParams {
        mair: mair_value(),
        tcr: ttbcr::EAE | ttbcr::EPD1 | walk | t0sz,
        wxn: true,
        ..base_params(tables, flags)
    }
}
