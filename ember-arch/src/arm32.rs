//! AArch32 PL1 MMU register back ends
//!
//! [`MmuControl`] implementations for the two AArch32 table formats, over
//! the cp15 system-register interface: [`LpaeMmu`] programs the
//! long-descriptor registers (64-bit TTBR0, MAIR0/MAIR1, TTBCR with EAE)
//! and [`ShortMmu`] the legacy ones (32-bit TTBR0, DACR, TTBCR zero).
//!
//! The short-descriptor encoder spells attributes directly in TEX/C/B and
//! uses the AP\[2:0\] permission model, which is the reset state: SCTLR.TRE
//! and SCTLR.AFE are assumed clear and are not touched here.

use core::arch::asm;

use ember_xlat::enable::{EnableParams, MmuControl};

use crate::cpu::{dsb_sy, isb};

/// SCTLR bits used by the enable step.
mod sctlr {
    /// M: MMU enable
    pub const M: u32 = 1 << 0;
    /// C: data cache enable
    pub const C: u32 = 1 << 2;
    /// WXN: writable implies execute-never
    pub const WXN: u32 = 1 << 19;
}

/// cp15 accessors for the PL1 translation registers.
mod cp15 {
    use core::arch::asm;

    #[inline]
    pub fn sctlr() -> u32 {
        let value: u32;
        // SAFETY: reading SCTLR has no side effects
        unsafe {
            asm!("mrc p15, 0, {}, c1, c0, 0", out(reg) value, options(nomem, nostack));
        }
        value
    }

    #[inline]
    pub fn set_sctlr(value: u32) {
        // SAFETY: the caller sequences control-register changes with ISB
        unsafe {
            asm!("mcr p15, 0, {}, c1, c0, 0", in(reg) value, options(nomem, nostack));
        }
    }

    #[inline]
    pub fn set_ttbcr(value: u32) {
        // SAFETY: programming translation control while translation is off
        unsafe {
            asm!("mcr p15, 0, {}, c2, c0, 2", in(reg) value, options(nomem, nostack));
        }
    }

    /// 32-bit TTBR0 write, short-descriptor format.
    #[inline]
    pub fn set_ttbr0_32(value: u32) {
        // SAFETY: programming the table base while translation is off
        unsafe {
            asm!("mcr p15, 0, {}, c2, c0, 0", in(reg) value, options(nomem, nostack));
        }
    }

    /// 64-bit TTBR0 write, long-descriptor format.
    #[inline]
    pub fn set_ttbr0_64(value: u64) {
        let low = value as u32;
        let high = (value >> 32) as u32;
        // SAFETY: programming the table base while translation is off
        unsafe {
            asm!(
                "mcrr p15, 0, {low}, {high}, c2",
                low = in(reg) low,
                high = in(reg) high,
                options(nomem, nostack)
            );
        }
    }

    #[inline]
    pub fn set_dacr(value: u32) {
        // SAFETY: programming domain access control while translation is off
        unsafe {
            asm!("mcr p15, 0, {}, c3, c0, 0", in(reg) value, options(nomem, nostack));
        }
    }

    #[inline]
    pub fn set_mair0(value: u32) {
        // SAFETY: programming memory attributes while translation is off
        unsafe {
            asm!("mcr p15, 0, {}, c10, c2, 0", in(reg) value, options(nomem, nostack));
        }
    }

    #[inline]
    pub fn set_mair1(value: u32) {
        // SAFETY: programming memory attributes while translation is off
        unsafe {
            asm!("mcr p15, 0, {}, c10, c2, 1", in(reg) value, options(nomem, nostack));
        }
    }

    /// TLBIALL plus the barriers that make it visible.
    #[inline]
    pub fn tlbiall() {
        // SAFETY: TLB invalidation is safe
        unsafe {
            asm!(
                "mcr p15, 0, {}, c8, c7, 0",
                "dsb sy",
                "isb",
                in(reg) 0u32,
                options(nostack)
            );
        }
    }
}

/// Merge the enable bits into a control-register value.
fn enable_bits(mut value: u32, params: &EnableParams) -> u32 {
    value |= sctlr::M;
    if params.wxn {
        value |= sctlr::WXN;
    }
    if params.enable_dcache {
        value |= sctlr::C;
    }
    value
}

/// PL1&0 long-descriptor (LPAE) register back end.
pub struct LpaeMmu;

impl LpaeMmu {
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl Default for LpaeMmu {
    fn default() -> Self {
        Self::new()
    }
}

impl MmuControl for LpaeMmu {
    fn mmu_enabled(&self) -> bool {
        cp15::sctlr() & sctlr::M != 0
    }

    fn program_attributes(&mut self, params: &EnableParams) {
        cp15::set_mair0(params.mair as u32);
        cp15::set_mair1((params.mair >> 32) as u32);
    }

    fn invalidate_tlbs(&mut self) {
        cp15::tlbiall();
    }

    fn program_translation_control(&mut self, tcr: u64) {
        cp15::set_ttbcr(tcr as u32);
    }

    fn program_table_base(&mut self, ttbr: u64) {
        cp15::set_ttbr0_64(ttbr);
    }

    fn dsb(&mut self) {
        dsb_sy();
    }

    fn isb(&mut self) {
        isb();
    }

    fn set_enable(&mut self, params: &EnableParams) {
        cp15::set_sctlr(enable_bits(cp15::sctlr(), params));
    }
}

/// PL1&0 short-descriptor register back end.
pub struct ShortMmu;

impl ShortMmu {
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl Default for ShortMmu {
    fn default() -> Self {
        Self::new()
    }
}

impl MmuControl for ShortMmu {
    fn mmu_enabled(&self) -> bool {
        cp15::sctlr() & sctlr::M != 0
    }

    fn program_attributes(&mut self, params: &EnableParams) {
        cp15::set_dacr(params.dacr);
    }

    fn invalidate_tlbs(&mut self) {
        cp15::tlbiall();
    }

    fn program_translation_control(&mut self, tcr: u64) {
        cp15::set_ttbcr(tcr as u32);
    }

    fn program_table_base(&mut self, ttbr: u64) {
        cp15::set_ttbr0_32(ttbr as u32);
    }

    fn dsb(&mut self) {
        dsb_sy();
    }

    fn isb(&mut self) {
        isb();
    }

    fn set_enable(&mut self, params: &EnableParams) {
        cp15::set_sctlr(enable_bits(cp15::sctlr(), params));
    }
}
