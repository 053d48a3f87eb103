//! Enable-parameter handoff to secondary cores
//!
//! The primary core builds the tables and computes the enable parameters
//! once; every secondary core then runs the same enable sequence against
//! the same values, entering translation with an identical view of
//! memory. `spin::Once` makes the publication one-shot, so a second
//! "primary" racing through boot cannot swap the parameters under cores
//! that already used them.

use ember_xlat::enable::EnableParams;
use spin::Once;

static ENABLE_PARAMS: Once<EnableParams> = Once::new();

/// Publish the enable parameters computed on the primary core.
///
/// Only the first call stores anything; later calls return the already
/// published value. The returned reference is what secondaries read.
pub fn publish(params: EnableParams) -> &'static EnableParams {
    ENABLE_PARAMS.call_once(|| {
        log::debug!(
            "MMU enable parameters published: ttbr={:#x} tcr={:#x}",
            params.ttbr,
            params.tcr
        );
        params
    })
}

/// Parameters for a secondary core's enable call, if published.
#[inline]
#[must_use]
pub fn get() -> Option<&'static EnableParams> {
    ENABLE_PARAMS.get()
}
