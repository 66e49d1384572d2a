//! The `Function` collaborator: an opaque external sub-function a `CALL` instruction re-enters
//! (`spec.md` §1 "Out of scope", §6 "External collaborators"). Map/MX/NLP-solver wrappers and
//! every other `Function` flavor live outside this crate; the compiler only ever sees this
//! trait object.

use std::fmt;

use crate::SxElem;

/// A direction-indexed seed/sensitivity vector, one entry per scalar nonzero of one input or
/// output. Mirrors the `nz[...]` indexing used throughout `spec.md` §4.6-4.8.
pub type NzVec = Vec<f64>;

/// An opaque external function invoked by a `CALL` instruction.
///
/// Implementors are expected to be cheap to clone as an `Arc` (the compiler stores at most one
/// shared handle per call-table entry) and reentrant: `eval`/`forward`/`reverse`/`rev` must not
/// mutate any state but the buffers passed to them (`spec.md` §5).
pub trait Function: fmt::Debug + Send + Sync {
    /// Human-readable name, used in call-table debug dumps and in the `FunctionRegistry`
    /// lookup key during deserialization.
    fn name(&self) -> &str;

    fn n_in(&self) -> usize;
    fn n_out(&self) -> usize;

    /// Nonzero count of input `i`.
    fn nnz_in(&self, i: usize) -> usize;
    /// Nonzero count of output `i`.
    fn nnz_out(&self, i: usize) -> usize;

    /// Scratch-buffer sizing queries the caller uses to allocate `arg`/`res`/`iw`/`w`
    /// (`spec.md` §5 "Scratch sizing").
    fn sz_arg(&self) -> usize {
        self.n_in()
    }
    fn sz_res(&self) -> usize {
        self.n_out()
    }
    fn sz_iw(&self) -> usize {
        0
    }
    fn sz_w(&self) -> usize {
        0
    }

    /// Double-precision evaluation. `arg[i]` is `None` when the corresponding input has no
    /// provided value (treated as all-zero, `spec.md` §4.4 "Failure surface"). Returns
    /// nonzero on sub-call failure, propagated verbatim by the enclosing evaluation.
    fn eval(&self, arg: &[Option<&[f64]>], res: &mut [Option<&mut [f64]>]) -> i32;

    /// Symbolic evaluation, used by `eval_sx` (`spec.md` §4.5) when the original call node's
    /// dependencies don't structurally match the re-evaluated ones.
    fn eval_sx(&self, arg: &[SxElem]) -> Vec<SxElem>;

    /// Builds a new `Function` computing this function's forward-mode directional derivative
    /// with `n_fwd` forward directions (`spec.md` §4.6). The returned function's packed input
    /// is `[nominal inputs] ++ [n_fwd seed vectors]`; its output is the seeded sensitivities.
    fn forward(&self, n_fwd: usize) -> Box<dyn Function>;

    /// Builds a new `Function` computing this function's reverse-mode adjoint with `n_rev`
    /// reverse directions (`spec.md` §4.7). The returned function's packed input is `[nominal
    /// inputs] ++ [n_rev output-adjoint vectors]`; its output is the input adjoints.
    fn reverse(&self, n_rev: usize) -> Box<dyn Function>;

    /// Bit-pattern (sparsity) reverse evaluation (`spec.md` §4.8 `sp_reverse`): given OR-merged
    /// output adjoint bit-patterns, returns OR-merged input adjoint bit-patterns.
    fn rev(&self, arg: &mut [u64], res: &mut [u64]);

    /// Bit-pattern forward evaluation (`spec.md` §4.8 `sp_forward`).
    fn sp_forward(&self, arg: &[u64], res: &mut [u64]);
}
