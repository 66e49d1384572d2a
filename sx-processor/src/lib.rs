//! Compiler and virtual machine for the SX scalar-expression algorithm.
//!
//! [`compile::SxFunction::new`] runs the four-stage pipeline described in `spec.md` §4:
//! [`toposort`] → [`emit`] → [`regalloc`], producing a flat instruction stream plus call table.
//! [`eval`] then dispatches that stream across six sweeps (double precision, symbolic,
//! forward/reverse AD, forward/reverse sparsity). [`codegen`] renders the same stream as target
//! source; [`serialize`] persists and restores it.

pub mod codegen;
pub mod compile;
pub mod emit;
pub mod eval;
pub mod jacobian;
pub mod regalloc;
#[cfg(feature = "serde")]
pub mod serialize;
pub mod toposort;

pub use codegen::{export_body, Target};
pub use compile::{OptionValue, Options, SxFunction};
pub use eval::double::eval_double;
pub use eval::forward_ad::{eval_forward_ad, forward_sweep};
pub use eval::reverse_ad::{eval_reverse_ad, reverse_sweep};
pub use eval::sparsity::{sp_forward, sp_reverse};
pub use eval::symbolic::eval_sx;
pub use eval::tape::{build_tape, Tape};
pub use jacobian::jacobian_sx;
