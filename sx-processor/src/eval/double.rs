//! Double-precision dispatch (`spec.md` §4.4).

use sx_core::{CallEntry, EvalError, OpCode};

use super::{free_symbol_list, read_input};
use crate::compile::SxFunction;

/// Evaluates `func` at `arg`, writing results into `res`. A `None` entry in `arg` is treated as
/// an all-zero input; a `None` entry in `res` skips that output's writes entirely.
pub fn eval_double(
    func: &SxFunction,
    arg: &[Option<&[f64]>],
    res: &mut [Option<&mut [f64]>],
) -> Result<(), EvalError> {
    if !func.free_vars.is_empty() {
        return Err(EvalError::FreeVariables(free_symbol_list(&func.free_vars)));
    }

    let mut w = vec![0.0f64; func.worksize as usize];

    for (idx, instr) in func.algorithm.iter().enumerate() {
        match instr.op {
            OpCode::Const => w[instr.i0 as usize] = instr.d,
            OpCode::Parameter => w[instr.i0 as usize] = 0.0,
            OpCode::Input => {
                w[instr.i0 as usize] = read_input(arg, instr.i1 as usize, instr.i2 as usize);
            },
            OpCode::Output => {
                let oi = instr.i0 as usize;
                if let Some(Some(buf)) = res.get_mut(oi) {
                    buf[instr.i2 as usize] = w[instr.i1 as usize];
                }
            },
            OpCode::Call => {
                let call_index = instr.i1 as usize;
                call_double(&func.call_table[call_index], call_index, &mut w)?;
            },
            OpCode::OutputExtract => {
                return Err(EvalError::UnknownOpcode { instr_index: idx, opcode: instr.op });
            },
            op if op.arity() == 1 => {
                w[instr.i0 as usize] = op.eval_f64(w[instr.i1 as usize], 0.0);
            },
            op => {
                w[instr.i0 as usize] = op.eval_f64(w[instr.i1 as usize], w[instr.i2 as usize]);
            },
        }
    }

    Ok(())
}

/// Gathers `entry.dep` into packed per-input buffers, invokes the sub-call, and scatters the
/// packed result back into `w` (`spec.md` §4.4 "CALL").
pub(crate) fn call_double(entry: &CallEntry, call_index: usize, w: &mut [f64]) -> Result<(), EvalError> {
    let mut dep_iter = entry.dep.iter();
    let packed_in: Vec<Vec<f64>> = entry
        .f_nnz_in
        .iter()
        .map(|&n| (0..n).map(|_| w[*dep_iter.next().expect("dep matches f_nnz_in") as usize]).collect())
        .collect();
    let arg: Vec<Option<&[f64]>> = packed_in.iter().map(|b| Some(b.as_slice())).collect();

    let mut packed_out: Vec<Vec<f64>> = entry.f_nnz_out.iter().map(|&n| vec![0.0; n]).collect();
    let code = {
        let mut res: Vec<Option<&mut [f64]>> = packed_out.iter_mut().map(|b| Some(b.as_mut_slice())).collect();
        entry.f.eval(&arg, &mut res)
    };
    if code != 0 {
        return Err(EvalError::SubCallFailed { name: entry.f.name().to_string(), call_index, code });
    }

    let mut out_idx = 0usize;
    for packed in &packed_out {
        for &v in packed {
            if let Some(slot) = entry.out[out_idx] {
                w[slot as usize] = v;
            }
            out_idx += 1;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use sx_core::{Arena, OpCode as Op, Sx};

    use super::*;
    use crate::compile::{Options, SxFunction};

    fn build_x_y_sin(live_variables: bool) -> (Arena, SxFunction) {
        let mut a = Arena::new();
        let x = a.sym("x");
        let y = a.sym("y");
        let xy = a.binary(Op::Mul, x, y);
        let sinx = a.unary(Op::Sin, x);
        let out = a.binary(Op::Add, xy, sinx);
        let options = Options { live_variables, ..Options::default() };
        let func = SxFunction::new(
            &a,
            "f",
            &[Sx::scalar(x), Sx::scalar(y)],
            &[Sx::scalar(out)],
            vec!["x".into(), "y".into()],
            vec!["out".into()],
            options,
        )
        .unwrap();
        (a, func)
    }

    #[test]
    fn scenario_1_matches_reference_value() {
        let (_a, func) = build_x_y_sin(true);
        assert!(func.worksize <= 3);

        let x = [2.0];
        let y = [3.0];
        let mut out = [0.0];
        {
            let arg: Vec<Option<&[f64]>> = vec![Some(&x), Some(&y)];
            let mut res: Vec<Option<&mut [f64]>> = vec![Some(&mut out)];
            eval_double(&func, &arg, &mut res).unwrap();
        }
        assert!((out[0] - (6.0 + 2f64.sin())).abs() < 1e-12);
    }

    #[test]
    fn missing_input_treated_as_zero() {
        let (_a, func) = build_x_y_sin(true);
        let y = [3.0];
        let mut out = [0.0];
        {
            let arg: Vec<Option<&[f64]>> = vec![None, Some(&y)];
            let mut res: Vec<Option<&mut [f64]>> = vec![Some(&mut out)];
            eval_double(&func, &arg, &mut res).unwrap();
        }
        // x = 0 => x*y + sin(x) = 0
        assert_eq!(out[0], 0.0);
    }

    #[test]
    fn free_variable_is_a_fatal_error() {
        let mut a = Arena::new();
        let x = a.sym("x");
        let z = a.sym("z");
        let out = a.binary(Op::Add, x, z);
        let func = SxFunction::new(
            &a,
            "g",
            &[Sx::scalar(x)],
            &[Sx::scalar(out)],
            vec!["x".into()],
            vec!["out".into()],
            Options::default(),
        )
        .unwrap();
        assert_eq!(func.free_vars, vec![z]);

        let x_val = [1.0];
        let mut out_val = [0.0];
        let arg: Vec<Option<&[f64]>> = vec![Some(&x_val)];
        let mut res: Vec<Option<&mut [f64]>> = vec![Some(&mut out_val)];
        assert!(matches!(eval_double(&func, &arg, &mut res), Err(EvalError::FreeVariables(_))));
    }
}
