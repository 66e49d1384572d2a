//! The compiled instruction record and the call-table entry it may reference.

use std::sync::Arc;

use crate::OpCode;
use crate::function::Function;
use crate::node::SxElem;

// ALGEL
// ================================================================================================

/// One compiled instruction. Slot fields are node indices while the stream is being emitted
/// (`spec.md` §4.2) and are rewritten in place to dense work-vector slots by the register
/// allocator (`spec.md` §4.3).
///
/// Field interpretation by opcode follows the table in `spec.md` §3:
///
/// | op | i0 | i1 | i2 | d |
/// |---|---|---|---|---|
/// | `Input` | dst slot | input index | nonzero index | — |
/// | `Output` | output index | src slot | nonzero index | — |
/// | `Const` | dst slot | — | — | value |
/// | `Parameter` | dst slot | — | — | — |
/// | `Call` | dst slot (unused at runtime) | call-table index | — | — |
/// | unary op | dst slot | arg slot | arg slot (== i1) | — |
/// | binary op | dst slot | lhs slot | rhs slot | — |
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct AlgEl {
    pub op: OpCode,
    pub i0: u32,
    pub i1: u32,
    pub i2: u32,
    pub d: f64,
}

impl AlgEl {
    pub const fn unary(op: OpCode, dst: u32, arg: u32) -> Self {
        AlgEl { op, i0: dst, i1: arg, i2: arg, d: 0.0 }
    }

    pub const fn binary(op: OpCode, dst: u32, lhs: u32, rhs: u32) -> Self {
        AlgEl { op, i0: dst, i1: lhs, i2: rhs, d: 0.0 }
    }

    pub const fn constant(dst: u32, value: f64) -> Self {
        AlgEl { op: OpCode::Const, i0: dst, i1: 0, i2: 0, d: value }
    }

    pub const fn parameter(dst: u32) -> Self {
        AlgEl { op: OpCode::Parameter, i0: dst, i1: 0, i2: 0, d: 0.0 }
    }

    pub const fn input(dst: u32, input_index: u32, nz_index: u32) -> Self {
        AlgEl { op: OpCode::Input, i0: dst, i1: input_index, i2: nz_index, d: 0.0 }
    }

    pub const fn output(output_index: u32, src_slot: u32, nz_index: u32) -> Self {
        AlgEl { op: OpCode::Output, i0: output_index, i1: src_slot, i2: nz_index, d: 0.0 }
    }

    pub const fn call(dst: u32, call_index: u32) -> Self {
        AlgEl { op: OpCode::Call, i0: dst, i1: call_index, i2: 0, d: 0.0 }
    }

    /// Invariant 1 from `spec.md` §3: for unary ops `i2 == i1`.
    pub fn respects_unary_invariant(&self) -> bool {
        self.op.arity() != 1 || self.i2 == self.i1
    }
}

// CALL ENTRY
// ================================================================================================

/// One external sub-function invocation (`spec.md` §3 "Call-table entry"). Kept as an opaque
/// `Arc<dyn Function>` trait object rather than a generic parameter so a single [`AlgEl`]
/// stream can reference heterogeneous sub-functions (`spec.md` §9 "Sub-call entry").
#[derive(Clone)]
pub struct CallEntry {
    pub f: Arc<dyn Function>,
    /// Work-vector slots feeding `f`'s packed input, one per scalar dependency.
    pub dep: Vec<u32>,
    /// Destination slots for `f`'s scalar outputs. `-1` (stored as `None`) marks an unused
    /// output (`spec.md` invariant 3).
    pub out: Vec<Option<u32>>,
    /// Per-input nonzero counts of `f`, cardinality `f.n_in()`.
    pub f_nnz_in: Vec<usize>,
    /// Per-output nonzero counts of `f`, cardinality `f.n_out()`.
    pub f_nnz_out: Vec<usize>,
    /// The original symbolic dependency handles, in the same order as `dep` (`spec.md` §4.5
    /// "for CALL" depth-2 comparison). Compared against freshly rebuilt dependency handles
    /// during symbolic replay to decide whether the original output symbols can be reused.
    pub orig_args: Vec<SxElem>,
    /// The original per-output symbolic handle (the `OutputExtract` node itself), indexed the
    /// same way as `out`; `None` for an output never extracted. Reused by symbolic replay when
    /// `orig_args` compares equal to the replay's rebuilt dependencies.
    pub orig_out: Vec<Option<SxElem>>,
}

impl CallEntry {
    pub fn n_dep(&self) -> usize {
        self.dep.len()
    }

    pub fn n_out(&self) -> usize {
        self.out.len()
    }
}

impl core::fmt::Debug for CallEntry {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("CallEntry")
            .field("f", &self.f.name())
            .field("dep", &self.dep)
            .field("out", &self.out)
            .field("orig_args", &self.orig_args)
            .field("orig_out", &self.orig_out)
            .finish()
    }
}
