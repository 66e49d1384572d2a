//! Symbolic Jacobian construction (`spec.md` §6 "Jacobian").
//!
//! The reference builds `J = jacobian(veccat(out), veccat(in))` by compiling a new function
//! whose inputs are the original inputs plus one symbolic dummy per original output, and whose
//! single output is `J`. Because every node here is already a scalar [`SxElem`] rather than a
//! matrix-valued `MX`, the more direct construction is a per-input symbolic forward-mode sweep
//! over the same topological order the compiler itself uses: seed one input nonzero at a time
//! with the symbolic constant `1`, propagate symbolically through the DAG using the arena's own
//! `unary`/`binary` (which hash-cons and constant-fold exactly as the main compiler does), and
//! read off each output's sensitivity. `J` is returned flattened column-major — one length-`n_out`
//! column per input nonzero, matching the reference's `veccat(in)` column ordering.

use sx_core::{Arena, CompileError, OpCode, Sx, SxElem};

use crate::toposort::topo_sort;

/// Builds the flattened Jacobian of `outputs` with respect to `inputs`, column-major (all output
/// sensitivities for input nonzero 0, then all for input nonzero 1, ...).
///
/// Returns [`CompileError::JacobianCallUnsupported`] if the dependency closure of `outputs`
/// contains a `CALL` node (`spec.md` §6 design note on this module).
pub fn jacobian_sx(arena: &mut Arena, inputs: &[Sx], outputs: &[Sx]) -> Result<Sx, CompileError> {
    let nodes = topo_sort(arena, outputs)?;
    let input_nonzeros: Vec<SxElem> = inputs.iter().flat_map(|sx| sx.0.iter().copied()).collect();

    let mut columns: Vec<Vec<SxElem>> = Vec::with_capacity(input_nonzeros.len());

    for &seed_node in &input_nonzeros {
        let mut deriv: Vec<Option<SxElem>> = vec![None; nodes.len()];
        let zero = arena.constant(0.0);
        let one = arena.constant(1.0);

        for entry in &nodes {
            let Some(node) = *entry else { continue };
            let pos = arena.temp(node) as usize;
            match arena.op(node) {
                OpCode::Const => deriv[pos] = Some(zero),
                OpCode::Parameter => deriv[pos] = Some(if node == seed_node { one } else { zero }),
                OpCode::Call => {
                    return Err(CompileError::JacobianCallUnsupported { node_index: node.index() });
                },
                OpCode::OutputExtract => {
                    // Its dependency is the CALL node, which always precedes it in topological
                    // order and always errors out above before this arm can run.
                    unreachable!("a CALL always precedes and rejects its OutputExtract children")
                },
                OpCode::Input | OpCode::Output => {
                    unreachable!("topo_sort walks raw arena nodes, which never carry these tags")
                },
                op if op.arity() == 1 => {
                    let x = arena.dep(node, 0);
                    let dx = deriv[arena.temp(x) as usize].expect("dep precedes node in topo order");
                    let (d0, _) = symbolic_derivative(arena, op, x, x);
                    deriv[pos] = Some(mul_sx(arena, d0, dx, zero));
                },
                op => {
                    let x = arena.dep(node, 0);
                    let y = arena.dep(node, 1);
                    let dx = deriv[arena.temp(x) as usize].expect("dep precedes node in topo order");
                    let dy = deriv[arena.temp(y) as usize].expect("dep precedes node in topo order");
                    let (d0, d1) = symbolic_derivative(arena, op, x, y);
                    let t0 = mul_sx(arena, d0, dx, zero);
                    let t1 = mul_sx(arena, d1, dy, zero);
                    deriv[pos] = Some(arena.binary(OpCode::Add, t0, t1));
                },
            }
        }

        let mut column = Vec::new();
        for output in outputs {
            for &root in &output.0 {
                let pos = arena.temp(root) as usize;
                column.push(deriv[pos].expect("output root visited by topo_sort"));
            }
        }
        columns.push(column);
    }

    Ok(Sx(columns.into_iter().flatten().collect()))
}

/// Local partials as symbolic subexpressions, evaluated at the nominal operand handles `x`/`y`
/// (which may themselves be non-constant, so the result is generally a new symbolic
/// subexpression, not a literal). Mirrors every formula in `OpCode::derivative` (op.rs), one
/// smooth op at a time, but builds a symbolic expression through `arena.unary`/`arena.binary`
/// instead of evaluating an `f64` pair — so this table must stay in lock-step with that one
/// rather than silently falling back to zero for anything it hasn't special-cased.
fn symbolic_derivative(arena: &mut Arena, op: OpCode, x: SxElem, y: SxElem) -> (SxElem, SxElem) {
    use OpCode::*;
    let one = arena.constant(1.0);
    let zero = arena.constant(0.0);
    let two = arena.constant(2.0);
    match op {
        Neg => (arena.unary(Neg, one), zero),
        Sqrt => {
            let s = arena.unary(Sqrt, x);
            let two_s = arena.binary(Mul, two, s);
            (arena.binary(Div, one, two_s), zero)
        },
        Sq => (arena.binary(Mul, two, x), zero),
        Sin => (arena.unary(Cos, x), zero),
        Cos => (arena.unary(Neg, arena.unary(Sin, x)), zero),
        Tan => {
            let c = arena.unary(Cos, x);
            let c2 = arena.binary(Mul, c, c);
            (arena.binary(Div, one, c2), zero)
        },
        Asin => {
            let x2 = arena.binary(Mul, x, x);
            let rest = arena.binary(Sub, one, x2);
            let s = arena.unary(Sqrt, rest);
            (arena.binary(Div, one, s), zero)
        },
        Acos => {
            let x2 = arena.binary(Mul, x, x);
            let rest = arena.binary(Sub, one, x2);
            let s = arena.unary(Sqrt, rest);
            (arena.unary(Neg, arena.binary(Div, one, s)), zero)
        },
        Atan => {
            let x2 = arena.binary(Mul, x, x);
            let denom = arena.binary(Add, one, x2);
            (arena.binary(Div, one, denom), zero)
        },
        Exp => (arena.unary(Exp, x), zero),
        Log => (arena.binary(Div, one, x), zero),
        Add => (one, one),
        Sub => (one, arena.unary(Neg, one)),
        Mul => (y, x),
        Div => {
            let y2 = arena.binary(Mul, y, y);
            (arena.binary(Div, one, y), arena.binary(Div, arena.unary(Neg, x), y2))
        },
        Pow => {
            let y_minus_1 = arena.binary(Sub, y, one);
            let x_pow_ym1 = arena.binary(Pow, x, y_minus_1);
            let d0 = arena.binary(Mul, y, x_pow_ym1);
            let x_pow_y = arena.binary(Pow, x, y);
            let ln_x = arena.unary(Log, x);
            let d1 = arena.binary(Mul, x_pow_y, ln_x);
            (d0, d1)
        },
        Atan2 => {
            let x2 = arena.binary(Mul, x, x);
            let y2 = arena.binary(Mul, y, y);
            let denom = arena.binary(Add, x2, y2);
            let d0 = arena.binary(Div, y, denom);
            let d1 = arena.unary(Neg, arena.binary(Div, x, denom));
            (d0, d1)
        },
        // Non-smooth ops (`OpCode::is_smooth` returns false for exactly this set): zero local
        // derivative, since their tangent is undefined or zero almost everywhere.
        Fabs | Sign | Floor | Ceil | Not | Fmin | Fmax | Eq | Ne | Lt | Le | And | Or | IfElseZero => {
            (zero, zero)
        },
        Input | Output | Const | Parameter | Call | OutputExtract => {
            unreachable!("symbolic_derivative called on structural opcode {op:?}")
        },
    }
}

/// `d * dep`, skipping the multiplication (and its hash-cons lookup) when either factor is the
/// cached `zero` constant.
fn mul_sx(arena: &mut Arena, d: SxElem, dep: SxElem, zero: SxElem) -> SxElem {
    if d == zero || dep == zero {
        zero
    } else {
        arena.binary(OpCode::Mul, d, dep)
    }
}

#[cfg(test)]
mod tests {
    use sx_core::{Arena, OpCode as Op, Sx};

    use super::*;
    use crate::compile::{Options, SxFunction};
    use crate::eval::double::eval_double;

    #[test]
    fn jacobian_of_linear_combination_is_the_coefficient_vector() {
        let mut a = Arena::new();
        let x = a.sym("x");
        let y = a.sym("y");
        let two = a.constant(2.0);
        let three = a.constant(3.0);
        let two_x = a.binary(Op::Mul, two, x);
        let three_y = a.binary(Op::Mul, three, y);
        let out = a.binary(Op::Add, two_x, three_y);

        let j = jacobian_sx(&mut a, &[Sx::scalar(x), Sx::scalar(y)], &[Sx::scalar(out)]).unwrap();
        assert_eq!(j.len(), 2);
        assert_eq!(a.to_double(j.0[0]), Some(2.0));
        assert_eq!(a.to_double(j.0[1]), Some(3.0));
    }

    #[test]
    fn jacobian_of_product_follows_product_rule() {
        let mut a = Arena::new();
        let x = a.sym("x");
        let y = a.sym("y");
        let out = a.binary(Op::Mul, x, y);

        let j = jacobian_sx(&mut a, &[Sx::scalar(x), Sx::scalar(y)], &[Sx::scalar(out)]).unwrap();
        // dOut/dx = y, dOut/dy = x
        assert_eq!(j.0[0], y);
        assert_eq!(j.0[1], x);
    }

    #[test]
    fn jacobian_of_atan_matches_closed_form_at_a_sample_point() {
        // d/dx atan(x) = 1/(1+x^2). `x` must stay a symbol (not a constant) for the Jacobian
        // build to walk the `Atan` arm of `symbolic_derivative` at all; the result is compiled
        // and evaluated numerically to check the formula.
        let mut a = Arena::new();
        let x = a.sym("x");
        let out = a.unary(Op::Atan, x);
        let j = jacobian_sx(&mut a, &[Sx::scalar(x)], &[Sx::scalar(out)]).unwrap();

        let func = SxFunction::new(
            &a,
            "dj",
            &[Sx::scalar(x)],
            &[j],
            vec!["x".into()],
            vec!["dj".into()],
            Options::default(),
        )
        .unwrap();
        let xv = [2.0];
        let mut result = [0.0];
        let arg: Vec<Option<&[f64]>> = vec![Some(&xv)];
        let mut res: Vec<Option<&mut [f64]>> = vec![Some(&mut result)];
        eval_double(&func, &arg, &mut res).unwrap();
        assert!((result[0] - 1.0 / 5.0).abs() < 1e-12);
    }

    #[test]
    fn jacobian_of_pow_matches_closed_form_at_a_sample_point() {
        // d/dx x^y = y * x^(y-1). `x` must stay a symbol so `arena.binary(Pow, x, y)` emits a
        // real `Pow` node instead of constant-folding away.
        let mut a = Arena::new();
        let x = a.sym("x");
        let y = a.constant(3.0);
        let out = a.binary(Op::Pow, x, y);
        let j = jacobian_sx(&mut a, &[Sx::scalar(x)], &[Sx::scalar(out)]).unwrap();

        let func = SxFunction::new(
            &a,
            "dj",
            &[Sx::scalar(x)],
            &[j],
            vec!["x".into()],
            vec!["dj".into()],
            Options::default(),
        )
        .unwrap();
        let xv = [2.0];
        let mut result = [0.0];
        let arg: Vec<Option<&[f64]>> = vec![Some(&xv)];
        let mut res: Vec<Option<&mut [f64]>> = vec![Some(&mut result)];
        eval_double(&func, &arg, &mut res).unwrap();
        // y*x^(y-1) at x=2, y=3 is 3*4 = 12.
        assert!((result[0] - 12.0).abs() < 1e-12);
    }
}
