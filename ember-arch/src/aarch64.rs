//! AArch64 MMU register back ends
//!
//! One [`MmuControl`] implementation per translation regime. The EL1
//! registers go through `aarch64-cpu`; the EL3 translation registers are
//! not covered by that crate, so they get thin `mrs`/`msr` wrappers here.
//!
//! The implementations only touch registers. All sequencing (barriers,
//! TLB-before-base ordering) is the caller's, which in practice means
//! [`ember_xlat::enable::enable_mmu`].

use aarch64_cpu::registers::*;
use core::arch::asm;

use ember_xlat::enable::{EnableParams, MmuControl};

use crate::cpu::{dsb_sy, isb};

/// SCTLR bits shared by the EL1 and EL3 variants.
mod sctlr {
    /// M: MMU enable
    pub const M: u64 = 1 << 0;
    /// C: data cache enable
    pub const C: u64 = 1 << 2;
    /// WXN: writable implies execute-never
    pub const WXN: u64 = 1 << 19;
}

/// Merge the enable bits into a control-register value.
fn enable_bits(mut value: u64, params: &EnableParams) -> u64 {
    value |= sctlr::M;
    if params.wxn {
        value |= sctlr::WXN;
    }
    if params.enable_dcache {
        value |= sctlr::C;
    }
    value
}

/// PA width this core can output, decoded from `ID_AA64MMFR0_EL1.PARange`.
#[must_use]
pub fn pa_range_bits() -> u32 {
    match ID_AA64MMFR0_EL1.get() & 0xF {
        0b0000 => 32,
        0b0001 => 36,
        0b0010 => 40,
        0b0011 => 42,
        0b0100 => 44,
        0b0101 => 48,
        _ => 52,
    }
}

/// EL1&0 register back end.
pub struct El1Mmu;

impl El1Mmu {
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl Default for El1Mmu {
    fn default() -> Self {
        Self::new()
    }
}

impl MmuControl for El1Mmu {
    fn mmu_enabled(&self) -> bool {
        SCTLR_EL1.get() & sctlr::M != 0
    }

    fn program_attributes(&mut self, params: &EnableParams) {
        MAIR_EL1.set(params.mair);
    }

    fn invalidate_tlbs(&mut self) {
        // SAFETY: TLB invalidation is safe
        unsafe {
            asm!("tlbi vmalle1", "dsb sy", "isb", options(nostack));
        }
    }

    fn program_translation_control(&mut self, tcr: u64) {
        TCR_EL1.set(tcr);
    }

    fn program_table_base(&mut self, ttbr: u64) {
        TTBR0_EL1.set(ttbr);
    }

    fn dsb(&mut self) {
        dsb_sy();
    }

    fn isb(&mut self) {
        isb();
    }

    fn set_enable(&mut self, params: &EnableParams) {
        SCTLR_EL1.set(enable_bits(SCTLR_EL1.get(), params));
    }
}

/// `mrs`/`msr` wrappers for the EL3 translation registers.
mod el3_regs {
    use core::arch::asm;

    #[inline]
    pub fn sctlr() -> u64 {
        let value: u64;
        // SAFETY: reading SCTLR_EL3 has no side effects
        unsafe {
            asm!("mrs {}, sctlr_el3", out(reg) value, options(nomem, nostack));
        }
        value
    }

    #[inline]
    pub fn set_sctlr(value: u64) {
        // SAFETY: the caller sequences control-register changes with ISB
        unsafe {
            asm!("msr sctlr_el3, {}", in(reg) value, options(nomem, nostack));
        }
    }

    #[inline]
    pub fn set_mair(value: u64) {
        // SAFETY: programming memory attributes while translation is off
        unsafe {
            asm!("msr mair_el3, {}", in(reg) value, options(nomem, nostack));
        }
    }

    #[inline]
    pub fn set_tcr(value: u64) {
        // SAFETY: programming translation control while translation is off
        unsafe {
            asm!("msr tcr_el3, {}", in(reg) value, options(nomem, nostack));
        }
    }

    #[inline]
    pub fn set_ttbr0(value: u64) {
        // SAFETY: programming the table base while translation is off
        unsafe {
            asm!("msr ttbr0_el3, {}", in(reg) value, options(nomem, nostack));
        }
    }
}

/// EL3 register back end.
pub struct El3Mmu;

impl El3Mmu {
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl Default for El3Mmu {
    fn default() -> Self {
        Self::new()
    }
}

impl MmuControl for El3Mmu {
    fn mmu_enabled(&self) -> bool {
        el3_regs::sctlr() & sctlr::M != 0
    }

    fn program_attributes(&mut self, params: &EnableParams) {
        el3_regs::set_mair(params.mair);
    }

    fn invalidate_tlbs(&mut self) {
        // SAFETY: TLB invalidation is safe
        unsafe {
            asm!("tlbi alle3", "dsb sy", "isb", options(nostack));
        }
    }

    fn program_translation_control(&mut self, tcr: u64) {
        el3_regs::set_tcr(tcr);
    }

    fn program_table_base(&mut self, ttbr: u64) {
        el3_regs::set_ttbr0(ttbr);
    }

    fn dsb(&mut self) {
        dsb_sy();
    }

    fn isb(&mut self) {
        isb();
    }

    fn set_enable(&mut self, params: &EnableParams) {
        el3_regs::set_sctlr(enable_bits(el3_regs::sctlr(), params));
    }
}
