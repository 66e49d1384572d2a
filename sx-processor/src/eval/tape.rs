//! Shared tape build for forward- and reverse-mode AD (`spec.md` §4.6-4.7: "Tape is built
//! identically"). One nominal double-precision pass records the value flowing through every
//! slot plus, for each arithmetic instruction, the local partial derivatives evaluated at the
//! nominal operands.

use sx_core::{EvalError, OpCode};

use super::double::call_double;
use super::read_input;
use crate::compile::SxFunction;

/// `local[k]` holds `(d/di1, d/di2)` for `algorithm[k]` when it is a unary/binary op, and
/// `(0.0, 0.0)` otherwise (`spec.md` §9 "Tape for AD": `TapeEl` is `[f64; 2]`).
pub struct Tape {
    pub w_nominal: Vec<f64>,
    pub local: Vec<(f64, f64)>,
}

pub fn build_tape(func: &SxFunction, arg: &[Option<&[f64]>]) -> Result<Tape, EvalError> {
    if !func.free_vars.is_empty() {
        return Err(EvalError::FreeVariables(super::free_symbol_list(&func.free_vars)));
    }

    let mut w = vec![0.0f64; func.worksize as usize];
    let mut local = vec![(0.0, 0.0); func.algorithm.len()];

    for (idx, instr) in func.algorithm.iter().enumerate() {
        match instr.op {
            OpCode::Const => w[instr.i0 as usize] = instr.d,
            OpCode::Parameter => w[instr.i0 as usize] = 0.0,
            OpCode::Input => {
                w[instr.i0 as usize] = read_input(arg, instr.i1 as usize, instr.i2 as usize);
            },
            OpCode::Output => {},
            OpCode::Call => {
                let call_index = instr.i1 as usize;
                call_double(&func.call_table[call_index], call_index, &mut w)?;
            },
            OpCode::OutputExtract => {
                return Err(EvalError::UnknownOpcode { instr_index: idx, opcode: instr.op });
            },
            op if op.arity() == 1 => {
                let x = w[instr.i1 as usize];
                local[idx] = (op.derivative(x, 0.0).0, 0.0);
                w[instr.i0 as usize] = op.eval_f64(x, 0.0);
            },
            op => {
                let x = w[instr.i1 as usize];
                let y = w[instr.i2 as usize];
                local[idx] = op.derivative(x, y);
                w[instr.i0 as usize] = op.eval_f64(x, y);
            },
        }
    }

    Ok(Tape { w_nominal: w, local })
}
