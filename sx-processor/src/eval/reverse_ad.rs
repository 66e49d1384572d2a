//! Reverse-mode algorithmic differentiation (`spec.md` §4.7).

use sx_core::{CallEntry, EvalError, OpCode};

use super::forward_ad::chunk;
use super::tape::{build_tape, Tape};
use super::{check_nnz, free_symbol_list, read_input};
use crate::compile::SxFunction;

/// Runs `n_dir = seeds.len()` independent reverse sweeps over one tape built at `nominal_in`.
pub fn eval_reverse_ad(
    func: &SxFunction,
    nominal_in: &[Option<&[f64]>],
    seeds: &[Vec<Option<&[f64]>>],
    sens: &mut [Vec<Option<&mut [f64]>>],
) -> Result<(), EvalError> {
    let tape = build_tape(func, nominal_in)?;
    for (seed, out) in seeds.iter().zip(sens.iter_mut()) {
        reverse_sweep(func, &tape, seed, out)?;
    }
    Ok(())
}

/// One reverse direction (`spec.md` §4.7 "Sweep"). `seed_out` carries one adjoint seed per
/// output nonzero; `sens_in` receives one adjoint per input nonzero.
pub fn reverse_sweep(
    func: &SxFunction,
    tape: &Tape,
    seed_out: &[Option<&[f64]>],
    sens_in: &mut [Option<&mut [f64]>],
) -> Result<(), EvalError> {
    if !func.free_vars.is_empty() {
        return Err(EvalError::FreeVariables(free_symbol_list(&func.free_vars)));
    }
    for (i, &nnz) in func.nnz_out.iter().enumerate() {
        check_nnz(seed_out.get(i).and_then(|o| o.map(<[f64]>::len)), nnz, 0, i)?;
    }
    for (i, &nnz) in func.nnz_in.iter().enumerate() {
        check_nnz(sens_in.get(i).and_then(|o| o.as_deref().map(<[f64]>::len)), nnz, 0, i)?;
    }

    let mut w_bar = vec![0.0f64; func.worksize as usize];

    for (idx, instr) in func.algorithm.iter().enumerate().rev() {
        match instr.op {
            OpCode::Const | OpCode::Parameter => {},
            OpCode::Input => {
                let ii = instr.i1 as usize;
                if let Some(Some(buf)) = sens_in.get_mut(ii) {
                    buf[instr.i2 as usize] = w_bar[instr.i0 as usize];
                }
                w_bar[instr.i0 as usize] = 0.0;
            },
            OpCode::Output => {
                w_bar[instr.i1 as usize] += read_input(seed_out, instr.i0 as usize, instr.i2 as usize);
            },
            OpCode::Call => {
                let call_index = instr.i1 as usize;
                call_reverse(&func.call_table[call_index], call_index, tape, &mut w_bar)?;
            },
            OpCode::OutputExtract => {
                return Err(EvalError::UnknownOpcode { instr_index: idx, opcode: instr.op });
            },
            op if op.arity() == 1 => {
                let seed = w_bar[instr.i0 as usize];
                w_bar[instr.i0 as usize] = 0.0;
                let (d0, _) = tape.local[idx];
                w_bar[instr.i1 as usize] += d0 * seed;
            },
            _ => {
                let seed = w_bar[instr.i0 as usize];
                w_bar[instr.i0 as usize] = 0.0;
                let (d0, d1) = tape.local[idx];
                w_bar[instr.i1 as usize] += d0 * seed;
                w_bar[instr.i2 as usize] += d1 * seed;
            },
        }
    }

    Ok(())
}

fn call_reverse(entry: &CallEntry, call_index: usize, tape: &Tape, w_bar: &mut [f64]) -> Result<(), EvalError> {
    let nominal = chunk(&entry.dep, &entry.f_nnz_in, &tape.w_nominal);

    let mut out_idx = 0usize;
    let packed_adj_out: Vec<Vec<f64>> = entry
        .f_nnz_out
        .iter()
        .map(|&n| {
            (0..n)
                .map(|_| {
                    let v = match entry.out[out_idx] {
                        Some(slot) => w_bar[slot as usize],
                        None => 0.0,
                    };
                    out_idx += 1;
                    v
                })
                .collect()
        })
        .collect();

    let mut packed_in: Vec<&[f64]> = Vec::with_capacity(nominal.len() + packed_adj_out.len());
    packed_in.extend(nominal.iter().map(Vec::as_slice));
    packed_in.extend(packed_adj_out.iter().map(Vec::as_slice));
    let arg: Vec<Option<&[f64]>> = packed_in.into_iter().map(Some).collect();

    let mut packed_adj_in: Vec<Vec<f64>> = entry.f_nnz_in.iter().map(|&n| vec![0.0; n]).collect();
    let reverse_fn = entry.f.reverse(1);
    let code = {
        let mut res: Vec<Option<&mut [f64]>> = packed_adj_in.iter_mut().map(|b| Some(b.as_mut_slice())).collect();
        reverse_fn.eval(&arg, &mut res)
    };
    if code != 0 {
        return Err(EvalError::SubCallFailed { name: entry.f.name().to_string(), call_index, code });
    }

    let mut dep_idx = 0usize;
    for packed in &packed_adj_in {
        for &v in packed {
            w_bar[entry.dep[dep_idx] as usize] += v;
            dep_idx += 1;
        }
    }
    for slot in entry.out.iter().flatten() {
        w_bar[*slot as usize] = 0.0;
    }

    Ok(())
}
