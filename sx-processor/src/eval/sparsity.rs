//! Forward and reverse bit-pattern (sparsity) propagation (`spec.md` §4.8).

use sx_core::{CallEntry, EvalError, OpCode};

use crate::compile::SxFunction;

/// `sp_forward`: structurally identical to [`super::double::eval_double`], but every unary and
/// binary op degenerates to a single bitwise OR.
pub fn sp_forward(func: &SxFunction, arg: &[Option<&[u64]>], res: &mut [Option<&mut [u64]>]) -> Result<(), EvalError> {
    let mut w = vec![0u64; func.worksize as usize];

    for (idx, instr) in func.algorithm.iter().enumerate() {
        match instr.op {
            OpCode::Const | OpCode::Parameter => w[instr.i0 as usize] = 0,
            OpCode::Input => {
                w[instr.i0 as usize] = arg
                    .get(instr.i1 as usize)
                    .and_then(|o| *o)
                    .and_then(|s| s.get(instr.i2 as usize))
                    .copied()
                    .unwrap_or(0);
            },
            OpCode::Output => {
                let oi = instr.i0 as usize;
                if let Some(Some(buf)) = res.get_mut(oi) {
                    buf[instr.i2 as usize] = w[instr.i1 as usize];
                }
            },
            OpCode::Call => {
                let call_index = instr.i1 as usize;
                call_sp_forward(&func.call_table[call_index], &mut w);
            },
            OpCode::OutputExtract => {
                return Err(EvalError::UnknownOpcode { instr_index: idx, opcode: instr.op });
            },
            op if op.arity() == 1 => {
                w[instr.i0 as usize] = w[instr.i1 as usize];
            },
            _ => {
                w[instr.i0 as usize] = w[instr.i1 as usize] | w[instr.i2 as usize];
            },
        }
    }

    Ok(())
}

fn call_sp_forward(entry: &CallEntry, w: &mut [u64]) {
    let packed_in: Vec<u64> = entry.dep.iter().map(|&d| w[d as usize]).collect();
    let mut packed_out = vec![0u64; entry.out.len()];
    entry.f.sp_forward(&packed_in, &mut packed_out);
    for (slot, &v) in entry.out.iter().zip(packed_out.iter()) {
        if let Some(slot) = slot {
            w[*slot as usize] |= v;
        }
    }
}

/// `sp_reverse`: reverse sweep. Non-call instructions OR the output adjoint into both operand
/// slots and clear the destination.
pub fn sp_reverse(func: &SxFunction, seed: &[Option<&[u64]>], sens: &mut [Option<&mut [u64]>]) -> Result<(), EvalError> {
    let mut w = vec![0u64; func.worksize as usize];

    for (idx, instr) in func.algorithm.iter().enumerate().rev() {
        match instr.op {
            OpCode::Const | OpCode::Parameter => {},
            OpCode::Input => {
                let ii = instr.i1 as usize;
                if let Some(Some(buf)) = sens.get_mut(ii) {
                    buf[instr.i2 as usize] |= w[instr.i0 as usize];
                }
                w[instr.i0 as usize] = 0;
            },
            OpCode::Output => {
                let bits = seed
                    .get(instr.i0 as usize)
                    .and_then(|o| *o)
                    .and_then(|s| s.get(instr.i2 as usize))
                    .copied()
                    .unwrap_or(0);
                w[instr.i1 as usize] |= bits;
            },
            OpCode::Call => {
                let call_index = instr.i1 as usize;
                call_sp_reverse(&func.call_table[call_index], &mut w);
            },
            OpCode::OutputExtract => {
                return Err(EvalError::UnknownOpcode { instr_index: idx, opcode: instr.op });
            },
            op if op.arity() == 1 => {
                let seed = w[instr.i0 as usize];
                w[instr.i0 as usize] = 0;
                w[instr.i1 as usize] |= seed;
            },
            _ => {
                let seed = w[instr.i0 as usize];
                w[instr.i0 as usize] = 0;
                w[instr.i1 as usize] |= seed;
                w[instr.i2 as usize] |= seed;
            },
        }
    }

    Ok(())
}

fn call_sp_reverse(entry: &CallEntry, w: &mut [u64]) {
    let mut packed_out: Vec<u64> = entry.out.iter().map(|o| o.map(|slot| w[slot as usize]).unwrap_or(0)).collect();
    let mut packed_in = vec![0u64; entry.dep.len()];
    entry.f.rev(&mut packed_in, &mut packed_out);
    for (&d, &v) in entry.dep.iter().zip(packed_in.iter()) {
        w[d as usize] |= v;
    }
    for slot in entry.out.iter().flatten() {
        w[*slot as usize] = 0;
    }
}

#[cfg(test)]
mod tests {
    use sx_core::{Arena, OpCode as Op, Sx};

    use super::*;
    use crate::compile::{Options, SxFunction};

    #[test]
    fn forward_sparsity_flags_both_inputs() {
        let mut a = Arena::new();
        let x = a.sym("x");
        let y = a.sym("y");
        let xy = a.binary(Op::Mul, x, y);
        let sinx = a.unary(Op::Sin, x);
        let out = a.binary(Op::Add, xy, sinx);
        let func = SxFunction::new(
            &a,
            "f",
            &[Sx::scalar(x), Sx::scalar(y)],
            &[Sx::scalar(out)],
            vec!["x".into(), "y".into()],
            vec!["out".into()],
            Options::default(),
        )
        .unwrap();

        let x_bits = [1u64];
        let y_bits = [2u64];
        let arg: Vec<Option<&[u64]>> = vec![Some(&x_bits), Some(&y_bits)];
        let mut out_bits = [0u64];
        {
            let mut res: Vec<Option<&mut [u64]>> = vec![Some(&mut out_bits)];
            sp_forward(&func, &arg, &mut res).unwrap();
        }
        assert_eq!(out_bits[0], 3);
    }

    #[test]
    fn reverse_sparsity_round_trips_forward() {
        let mut a = Arena::new();
        let x = a.sym("x");
        let out = a.unary(Op::Sin, x);
        let func = SxFunction::new(
            &a,
            "f",
            &[Sx::scalar(x)],
            &[Sx::scalar(out)],
            vec!["x".into()],
            vec!["out".into()],
            Options::default(),
        )
        .unwrap();

        let seed_val = [1u64];
        let seed: Vec<Option<&[u64]>> = vec![Some(&seed_val)];
        let mut sens_val = [0u64];
        {
            let mut sens: Vec<Option<&mut [u64]>> = vec![Some(&mut sens_val)];
            sp_reverse(&func, &seed, &mut sens).unwrap();
        }
        assert_eq!(sens_val[0], 1);
    }
}
