//! Data model for the SX scalar-expression compiler.
//!
//! This crate holds the pieces `spec.md` calls out as shared vocabulary between the compiler
//! and the virtual machine in `sx-processor`: the closed [`OpCode`] tag set (§3 "Opcodes"), the
//! [`AlgEl`] instruction record and [`CallEntry`] call-table entry (§3), the expression [`node`]
//! arena that stands in for the "built elsewhere" node store (§9 design note), and the external
//! collaborator traits [`Function`] and [`Sparsity`] (§1 "Out of scope", §6).

mod alg_el;
pub mod errors;
mod function;
mod node;
mod op;
mod sparsity;

pub use alg_el::{AlgEl, CallEntry};
pub use errors::{CompileError, ConfigError, EvalError, FreeSymbol};
pub use function::{Function, NzVec};
pub use node::{Arena, CallSite, Sx, SxElem};
pub use op::OpCode;
pub use sparsity::{DenseSparsity, NzCoord, Sparsity};
