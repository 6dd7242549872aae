//! Post-resolution lowering passes.
//!
//! Ordering is load-bearing: parallel lowering runs on the resolved tree and
//! introduces new functions; wide-reference insertion runs after the
//! parallel pass has pruned its intermediates (widening earlier would widen
//! dead types).

pub mod parallel;
pub mod widen;
