//! Forward-mode algorithmic differentiation (`spec.md` §4.6).

use sx_core::{CallEntry, EvalError, OpCode};

use super::tape::{build_tape, Tape};
use super::{check_nnz, free_symbol_list, read_input};
use crate::compile::SxFunction;

/// Runs `n_dir = seeds.len()` independent forward sweeps over one tape built at `nominal_in`.
/// `seeds[d]` and `sens[d]` are shaped like the function's inputs/outputs, one packed slice per
/// input/output.
pub fn eval_forward_ad(
    func: &SxFunction,
    nominal_in: &[Option<&[f64]>],
    seeds: &[Vec<Option<&[f64]>>],
    sens: &mut [Vec<Option<&mut [f64]>>],
) -> Result<(), EvalError> {
    let tape = build_tape(func, nominal_in)?;
    for (seed, out) in seeds.iter().zip(sens.iter_mut()) {
        forward_sweep(func, &tape, seed, out)?;
    }
    Ok(())
}

/// One forward direction (`spec.md` §4.6 "Sweep"). `seed_in`/`sens_out` use the same packed
/// per-input/per-output slice shape as [`super::double::eval_double`]'s `arg`/`res`.
pub fn forward_sweep(
    func: &SxFunction,
    tape: &Tape,
    seed_in: &[Option<&[f64]>],
    sens_out: &mut [Option<&mut [f64]>],
) -> Result<(), EvalError> {
    if !func.free_vars.is_empty() {
        return Err(EvalError::FreeVariables(free_symbol_list(&func.free_vars)));
    }
    for (i, &nnz) in func.nnz_in.iter().enumerate() {
        check_nnz(seed_in.get(i).and_then(|o| o.map(<[f64]>::len)), nnz, 0, i)?;
    }
    for (i, &nnz) in func.nnz_out.iter().enumerate() {
        check_nnz(sens_out.get(i).and_then(|o| o.as_deref().map(<[f64]>::len)), nnz, 0, i)?;
    }

    let mut w_dot = vec![0.0f64; func.worksize as usize];

    for (idx, instr) in func.algorithm.iter().enumerate() {
        match instr.op {
            OpCode::Const | OpCode::Parameter => w_dot[instr.i0 as usize] = 0.0,
            OpCode::Input => {
                w_dot[instr.i0 as usize] = read_input(seed_in, instr.i1 as usize, instr.i2 as usize);
            },
            OpCode::Output => {
                let oi = instr.i0 as usize;
                if let Some(Some(buf)) = sens_out.get_mut(oi) {
                    buf[instr.i2 as usize] = w_dot[instr.i1 as usize];
                }
            },
            OpCode::Call => {
                let call_index = instr.i1 as usize;
                call_forward(&func.call_table[call_index], call_index, tape, &mut w_dot)?;
            },
            OpCode::OutputExtract => {
                return Err(EvalError::UnknownOpcode { instr_index: idx, opcode: instr.op });
            },
            op if op.arity() == 1 => {
                let (d0, _) = tape.local[idx];
                w_dot[instr.i0 as usize] = d0 * w_dot[instr.i1 as usize];
            },
            _ => {
                let (d0, d1) = tape.local[idx];
                w_dot[instr.i0 as usize] = d0 * w_dot[instr.i1 as usize] + d1 * w_dot[instr.i2 as usize];
            },
        }
    }

    Ok(())
}

/// `f.forward(1)`'s packed input is `[nominal inputs] ++ [one seed vector]`
/// (`Function::forward` doc); its packed output is the seeded output sensitivities alone.
fn call_forward(entry: &CallEntry, call_index: usize, tape: &Tape, w_dot: &mut [f64]) -> Result<(), EvalError> {
    let nominal: Vec<Vec<f64>> = chunk(&entry.dep, &entry.f_nnz_in, &tape.w_nominal);
    let dot: Vec<Vec<f64>> = chunk(&entry.dep, &entry.f_nnz_in, w_dot);

    let mut packed_in: Vec<&[f64]> = Vec::with_capacity(nominal.len() + dot.len());
    packed_in.extend(nominal.iter().map(Vec::as_slice));
    packed_in.extend(dot.iter().map(Vec::as_slice));
    let arg: Vec<Option<&[f64]>> = packed_in.into_iter().map(Some).collect();

    let mut packed_out: Vec<Vec<f64>> = entry.f_nnz_out.iter().map(|&n| vec![0.0; n]).collect();
    let forward_fn = entry.f.forward(1);
    let code = {
        let mut res: Vec<Option<&mut [f64]>> = packed_out.iter_mut().map(|b| Some(b.as_mut_slice())).collect();
        forward_fn.eval(&arg, &mut res)
    };
    if code != 0 {
        return Err(EvalError::SubCallFailed { name: entry.f.name().to_string(), call_index, code });
    }

    let mut out_idx = 0usize;
    for packed in &packed_out {
        for &v in packed {
            if let Some(slot) = entry.out[out_idx] {
                w_dot[slot as usize] = v;
            }
            out_idx += 1;
        }
    }
    Ok(())
}

/// Splits `dep` (flattened across inputs) into per-input packed buffers, reading values out of
/// `source` (either nominal values or seed/adjoint values).
pub(crate) fn chunk(dep: &[u32], counts: &[usize], source: &[f64]) -> Vec<Vec<f64>> {
    let mut dep_iter = dep.iter();
    counts
        .iter()
        .map(|&n| (0..n).map(|_| source[*dep_iter.next().expect("dep matches counts") as usize]).collect())
        .collect()
}

#[cfg(test)]
mod tests {
    use sx_core::{Arena, OpCode as Op, Sx};

    use super::*;
    use crate::compile::{Options, SxFunction};

    #[test]
    fn scenario_2_matches_reference_value() {
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

        let x_val = [2.0];
        let y_val = [3.0];
        let nominal: Vec<Option<&[f64]>> = vec![Some(&x_val), Some(&y_val)];
        let tape = build_tape(&func, &nominal).unwrap();

        let vx = [1.0];
        let vy = [0.0];
        let seed: Vec<Option<&[f64]>> = vec![Some(&vx), Some(&vy)];
        let mut sens_buf = [0.0];
        {
            let mut sens: Vec<Option<&mut [f64]>> = vec![Some(&mut sens_buf)];
            forward_sweep(&func, &tape, &seed, &mut sens).unwrap();
        }

        let expected = 3.0 + 2f64.cos();
        assert!((sens_buf[0] - expected).abs() < 1e-9);
    }

    #[test]
    fn undersized_seed_is_a_sparsity_mismatch() {
        let mut a = Arena::new();
        let x = a.sym("x");
        let y = a.sym("y");
        let sum = a.binary(Op::Add, x, y);
        let func = SxFunction::new(
            &a,
            "f",
            &[Sx::scalar(x), Sx::scalar(y)],
            &[Sx::scalar(sum)],
            vec!["x".into(), "y".into()],
            vec!["out".into()],
            Options::default(),
        )
        .unwrap();

        let x_val = [1.0];
        let y_val = [1.0];
        let nominal: Vec<Option<&[f64]>> = vec![Some(&x_val), Some(&y_val)];
        let tape = build_tape(&func, &nominal).unwrap();

        let empty: [f64; 0] = [];
        let vy = [0.0];
        let seed: Vec<Option<&[f64]>> = vec![Some(&empty), Some(&vy)];
        let mut sens_buf = [0.0];
        let mut sens: Vec<Option<&mut [f64]>> = vec![Some(&mut sens_buf)];
        let err = forward_sweep(&func, &tape, &seed, &mut sens).unwrap_err();
        assert!(matches!(err, EvalError::SparsityMismatch { direction: 0, index: 0 }));
    }
}
