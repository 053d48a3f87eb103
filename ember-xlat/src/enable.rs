//! MMU enablement sequence
//!
//! Turning translation on is a fixed register ritual whose order is the
//! whole point: attributes and TLB state must be settled before the table
//! base is live, and every prior write must be globally visible before the
//! enable bit flips. The sequence itself lives here, once, against the
//! [`MmuControl`] trait; the `ember-arch` crate implements the trait per
//! regime with the real system registers, and the tests implement it with
//! a recorder.
//!
//! Nothing in the sequence returns an error. A violated precondition is a
//! programming bug in boot code, not a runtime condition, so it asserts.

use crate::builder::BuiltTables;

/// Caller-selected behaviour of the enable step.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct EnableFlags {
    /// Leave the data cache off (the enable normally turns it on).
    pub disable_dcache: bool,
    /// Perform table walks non-cacheable instead of write-back.
    pub non_cacheable_walk: bool,
}

/// Register values for one enable call, computed per format by
/// [`crate::arch`] from a [`BuiltTables`] handle and [`EnableFlags`].
///
/// Each regime's [`MmuControl`] uses the subset that exists for it: the
/// short-descriptor format has a domain register instead of an attribute
/// table, and only the long formats honour `wxn`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EnableParams {
    /// Packed memory-attribute slots (MAIR), zero for the short format.
    pub mair: u64,
    /// Domain access control, short format only.
    pub dacr: u32,
    /// Translation control (TCR/TTBCR).
    pub tcr: u64,
    /// Physical address of the root table.
    pub ttbr: u64,
    /// Enforce write-implies-execute-never in the control register.
    pub wxn: bool,
    /// Turn the data cache on along with the MMU.
    pub enable_dcache: bool,
}

/// Register operations the enable sequence is written against.
///
/// One implementation per translation regime. Implementations only touch
/// registers; any ordering they need is provided by the caller.
pub trait MmuControl {
    /// Whether translation is already on for this regime.
    fn mmu_enabled(&self) -> bool;

    /// Program the attribute-encoding register(s): MAIR for the long
    /// formats, the domain register for the short format.
    fn program_attributes(&mut self, params: &EnableParams);

    /// Invalidate all TLB entries for this regime.
    fn invalidate_tlbs(&mut self);

    /// Program the translation-control register.
    fn program_translation_control(&mut self, tcr: u64);

    /// Program the table-base register.
    fn program_table_base(&mut self, ttbr: u64);

    /// Data synchronization barrier.
    fn dsb(&mut self);

    /// Instruction synchronization barrier.
    fn isb(&mut self);

    /// Flip the enable bit (with `wxn`/`enable_dcache` as requested).
    fn set_enable(&mut self, params: &EnableParams);
}

/// Turn on address translation for one regime.
///
/// # Panics
///
/// Panics if translation is already enabled for the regime. There is no
/// legal reason to reach this twice in one boot stage, and re-running the
/// sequence under live translation would pull the tables out from under
/// the executing code.
pub fn enable_mmu<C: MmuControl>(ctrl: &mut C, params: &EnableParams) {
    assert!(
        !ctrl.mmu_enabled(),
        "MMU already enabled for this translation regime"
    );

    ctrl.program_attributes(params);
    ctrl.invalidate_tlbs();
    ctrl.program_translation_control(params.tcr);
    ctrl.program_table_base(params.ttbr);

    // All table writes and register programming must be globally visible
    // before any address is translated.
    ctrl.dsb();
    ctrl.isb();

    ctrl.set_enable(params);

    // The enable must take effect before the next instruction fetch.
    ctrl.isb();
}

/// Shared part of the per-format parameter computation.
///
/// The table-base value is the root's physical address in every format;
/// the data-cache choice is the flag inverted.
pub(crate) fn base_params(tables: &BuiltTables, flags: EnableFlags) -> EnableParams {
    EnableParams {
        mair: 0,
        dacr: 0,
        tcr: 0,
        ttbr: tables.root_pa().value(),
        wxn: false,
        enable_dcache: !flags.disable_dcache,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    enum Op {
        Attributes,
        TlbInvalidate,
        TranslationControl,
        TableBase,
        Dsb,
        Isb,
        Enable,
    }

    struct Recorder {
        ops: [Option<Op>; 12],
        len: usize,
        enabled: bool,
    }

    impl Recorder {
        fn new() -> Self {
            Self {
                ops: [None; 12],
                len: 0,
                enabled: false,
            }
        }

        fn push(&mut self, op: Op) {
            self.ops[self.len] = Some(op);
            self.len += 1;
        }
    }

    impl MmuControl for Recorder {
        fn mmu_enabled(&self) -> bool {
            self.enabled
        }
        fn program_attributes(&mut self, _params: &EnableParams) {
            self.push(Op::Attributes);
        }
        fn invalidate_tlbs(&mut self) {
            self.push(Op::TlbInvalidate);
        }
        fn program_translation_control(&mut self, _tcr: u64) {
            self.push(Op::TranslationControl);
        }
        fn program_table_base(&mut self, _ttbr: u64) {
            self.push(Op::TableBase);
        }
        fn dsb(&mut self) {
            self.push(Op::Dsb);
        }
        fn isb(&mut self) {
            self.push(Op::Isb);
        }
        fn set_enable(&mut self, _params: &EnableParams) {
            self.push(Op::Enable);
            self.enabled = true;
        }
    }

    fn params() -> EnableParams {
        EnableParams {
            mair: 0x44_04FF,
            dacr: 0,
            tcr: 0x1_0000_0020,
            ttbr: 0x8000_0000,
            wxn: true,
            enable_dcache: true,
        }
    }

    #[test]
    fn test_enable_sequence_order() {
        let mut rec = Recorder::new();
        enable_mmu(&mut rec, &params());

        let expected = [
            Op::Attributes,
            Op::TlbInvalidate,
            Op::TranslationControl,
            Op::TableBase,
            Op::Dsb,
            Op::Isb,
            Op::Enable,
            Op::Isb,
        ];
        assert_eq!(rec.len, expected.len());
        for (i, op) in expected.iter().enumerate() {
            assert_eq!(rec.ops[i], Some(*op), "step {} out of order", i);
        }
        assert!(rec.mmu_enabled());
    }

    #[test]
    #[should_panic(expected = "already enabled")]
    fn test_enable_twice_panics() {
        let mut rec = Recorder::new();
        enable_mmu(&mut rec, &params());
        enable_mmu(&mut rec, &params());
    }
}
