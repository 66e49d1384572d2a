//! Error types shared across compilation and evaluation.
//!
//! Follows the two-tier pattern from the teacher's own `errors.rs`: a context-free inner error
//! describing *what* went wrong, wrapped by an outer error that adds *where* it happened once
//! that context is available at a boundary. `spec.md` §7 enumerates the error kinds this module
//! covers.

use std::sync::Arc;

use crate::node::SxElem;

// CONFIGURATION ERROR
// ================================================================================================

/// Fatal at function construction (`spec.md` §7 "Configuration").
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfigError {
    #[error("unknown option '{0}'")]
    UnknownOption(String),
    #[error("default_in has length {actual}, expected {expected} (one entry per function input)")]
    BadDefaultInLength { expected: usize, actual: usize },
    #[error("OpenCL just-in-time compilation was requested but is not supported")]
    OpenClRequested,
    #[error("sparsity just-in-time compilation was requested but is not supported")]
    SparsityJitRequested,
}

// COMPILE ERROR
// ================================================================================================

/// Fatal during compilation (`spec.md` §7 "Integer-overflow" and configuration validation).
#[derive(Debug, Clone, thiserror::Error)]
pub enum CompileError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(
        "expression arena exceeded {limit} nodes during compilation (integer overflow of the \
         topological-sort scratch field)",
        limit = i32::MAX
    )]
    IntegerOverflow,
    /// Symbolic (pre-compile) Jacobian construction walks the raw expression DAG rather than a
    /// compiled call table, so it has no symbolic analogue of a sub-call's `forward`/`reverse`
    /// entry points. Raised when a `CALL` node appears in the Jacobian's dependency closure.
    #[error("jacobian construction does not support sub-call nodes (call site at arena index {node_index})")]
    JacobianCallUnsupported { node_index: usize },
}

// EVAL ERROR
// ================================================================================================

/// Raised by the numeric and symbolic dispatch sweeps (`spec.md` §7).
#[derive(Debug, Clone, thiserror::Error)]
pub enum EvalError {
    /// Evaluation was attempted while free (unbound, non-constant) symbols remain
    /// (`spec.md` §7 "Free-parameter"). Lists the offending symbol names.
    #[error("evaluation attempted with free symbols present: {}", format_free_symbols(.0))]
    FreeVariables(Arc<[FreeSymbol]>),
    /// A forward/reverse AD seed or adjoint's sparsity did not match the declared input's
    /// sparsity, and a second mismatch occurred after the one-shot projection retry
    /// (`spec.md` §7 "Sparsity-mismatch", §4.6).
    #[error("sparsity mismatch on direction {direction} of input/output {index} persisted after projection retry")]
    SparsityMismatch { direction: usize, index: usize },
    /// An `AlgEl` in the compiled stream carries an opcode the dispatch loop does not
    /// recognize; indicates a serialization or build bug (`spec.md` §7 "Unknown opcode").
    #[error("algorithm element {instr_index} has unsupported opcode {opcode:?}")]
    UnknownOpcode { instr_index: usize, opcode: crate::OpCode },
    /// A sub-call (`CALL` instruction) returned nonzero; propagated verbatim
    /// (`spec.md` §7 "Sub-call failure").
    #[error("sub-call '{name}' at call-table index {call_index} failed with code {code}")]
    SubCallFailed { name: String, call_index: usize, code: i32 },
    /// Code emission requires `free_vars` to be empty (`spec.md` §4.9).
    #[error("cannot export body: free symbols present: {}", format_free_symbols(.0))]
    FreeVariablesInExport(Arc<[FreeSymbol]>),
}

/// A free symbolic leaf reported back to the caller in an error message
/// (`spec.md` §7 "message lists the free symbols").
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FreeSymbol {
    pub handle: SxElem,
    pub name: Option<String>,
}

fn format_free_symbols(syms: &[FreeSymbol]) -> String {
    syms.iter()
        .map(|s| s.name.clone().unwrap_or_else(|| format!("@{}", s.handle.index())))
        .collect::<Vec<_>>()
        .join(", ")
}
