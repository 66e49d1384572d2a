//! The six dispatch sweeps (`spec.md` §4.4-§4.8): double-precision, symbolic, forward-AD,
//! reverse-AD, and forward/reverse bit-pattern sparsity propagation, all walking the same
//! compiled [`crate::compile::SxFunction`] instruction stream.

pub mod double;
pub mod forward_ad;
pub mod reverse_ad;
pub mod sparsity;
pub mod symbolic;
pub mod tape;

use std::sync::Arc;

use sx_core::{EvalError, FreeSymbol, SxElem};

/// Builds the `EvalError::FreeVariables` payload from a compile result's `free_vars`. Names are
/// not recovered here (the compiled function no longer holds a reference to the arena that
/// named them); callers that want named diagnostics should resolve `free_vars` against their
/// arena before reporting.
pub(crate) fn free_symbol_list(free_vars: &[SxElem]) -> Arc<[FreeSymbol]> {
    free_vars.iter().map(|&handle| FreeSymbol { handle, name: None }).collect()
}

/// Reads one scalar out of a possibly-absent, possibly-too-short packed buffer. Missing inputs
/// are treated as zero (`spec.md` §4.4 "Failure surface").
pub(crate) fn read_input(arg: &[Option<&[f64]>], input_index: usize, nz_index: usize) -> f64 {
    arg.get(input_index).and_then(|o| *o).and_then(|s| s.get(nz_index)).copied().unwrap_or(0.0)
}

/// Sparsity correction for an AD seed or sensitivity buffer (`spec.md` §4.6/§4.7 "Sparsity
/// correction"): a buffer longer than the declared nonzero count projects down cleanly (the
/// excess is simply never indexed); a buffer narrower than declared has no valid projection and
/// is a fatal mismatch on the spot, since this crate's nonzero counts are the whole declared
/// pattern rather than a richer coordinate set to retry a projection against. `direction` is
/// always 0 for a single [`forward_ad::forward_sweep`]/[`reverse_ad::reverse_sweep`] call; the
/// multi-direction entry points ([`forward_ad::eval_forward_ad`]/[`reverse_ad::eval_reverse_ad`])
/// don't thread the loop index through, since a mismatch is fatal regardless of which direction
/// it occurred on.
pub(crate) fn check_nnz(
    actual_len: Option<usize>,
    expected_nnz: usize,
    direction: usize,
    index: usize,
) -> Result<(), EvalError> {
    match actual_len {
        Some(n) if n < expected_nnz => Err(EvalError::SparsityMismatch { direction, index }),
        _ => Ok(()),
    }
}
