//! Barrier instructions
//!
//! The enable sequence orders its register writes with explicit barriers;
//! the same spellings assemble for both A64 and A32.

use core::arch::asm;

/// Data synchronization barrier, full system
#[inline]
pub fn dsb_sy() {
    // SAFETY: Memory barrier is always safe
    unsafe {
        asm!("dsb sy", options(nostack));
    }
}

/// Instruction synchronization barrier
#[inline]
pub fn isb() {
    // SAFETY: ISB is always safe
    unsafe {
        asm!("isb", options(nostack));
    }
}
