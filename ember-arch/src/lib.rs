//! # ember-arch
//!
//! Hardware back end for the `ember-xlat` translation-table builder.
//!
//! Provides the register implementations the portable crate is written
//! against:
//! - [`aarch64`]: `MmuControl` for the EL1 and EL3 regimes, plus the
//!   ID-register PA-range probe
//! - [`arm32`]: `MmuControl` for the PL1 LPAE and short-descriptor paths
//! - [`cpu`]: barrier instruction wrappers
//! - [`handoff`]: one-shot publication of enable parameters from the
//!   primary core to secondaries
//!
//! # Safety
//!
//! This crate contains `unsafe` code for system-register access. All
//! unsafe operations are documented with `// SAFETY:` comments explaining
//! the invariants that must be maintained; the ordering between them is
//! owned by `ember_xlat::enable::enable_mmu`.
//!
//! # Example
//!
//! ```ignore
//! use ember_arch::{aarch64, handoff};
//! use ember_xlat::{arch, enable_mmu, EnableFlags};
//!
//! // Primary core, after building the tables:
//! let params = arch::arm64::enable_params(&built, EnableFlags::default(),
//!                                         aarch64::pa_range_bits());
//! enable_mmu(&mut aarch64::El3Mmu::new(), handoff::publish(params));
//!
//! // Each secondary core:
//! if let Some(params) = handoff::get() {
//!     enable_mmu(&mut aarch64::El3Mmu::new(), params);
//! }
//! ```

#![no_std]
#![deny(unsafe_op_in_unsafe_fn)]

#[cfg(target_arch = "aarch64")]
pub mod aarch64;
#[cfg(target_arch = "arm")]
pub mod arm32;
#[cfg(any(target_arch = "aarch64", target_arch = "arm"))]
pub mod cpu;
pub mod handoff;

#[cfg(target_arch = "aarch64")]
pub use aarch64::{El1Mmu, El3Mmu};
#[cfg(target_arch = "arm")]
pub use arm32::{LpaeMmu, ShortMmu};
