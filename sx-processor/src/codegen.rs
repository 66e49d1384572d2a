//! Code emission (`spec.md` §4.9): renders a compiled [`SxFunction`]'s instruction stream as
//! target-language source, mapping work-vector slot `k` to variable `w{k}`.

use std::fmt::Write as _;

use sx_core::{EvalError, OpCode};

use crate::compile::SxFunction;
use crate::eval::free_symbol_list;

/// Target language for [`export_body`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    /// MATLAB/Octave-flavored matrix-language body.
    MatrixLanguage,
    /// C-like body, suitable for further JIT compilation.
    CLike,
}

/// Renders `func`'s algorithm as a target-language function body, one statement per line,
/// indented by `indent_level` spaces (`spec.md` §6 "Export body").
///
/// Requires `func.free_vars` to be empty; otherwise returns
/// [`EvalError::FreeVariablesInExport`] listing the offending symbols.
pub fn export_body(func: &SxFunction, target: Target, indent_level: usize) -> Result<String, EvalError> {
    if !func.free_vars.is_empty() {
        return Err(EvalError::FreeVariablesInExport(free_symbol_list(&func.free_vars)));
    }

    let pad = " ".repeat(indent_level);
    let mut body = String::new();

    for instr in &func.algorithm {
        match instr.op {
            OpCode::Const => {
                let _ = writeln!(body, "{pad}w{} = {};", instr.i0, instr.d);
            },
            OpCode::Parameter => {
                // Bound inputs are rewritten to INPUT by `bind_inputs`; a lingering PARAMETER
                // with no free_vars entry cannot occur, but degenerate to zero defensively.
                let _ = writeln!(body, "{pad}w{} = 0;", instr.i0);
            },
            OpCode::Input => {
                let _ = writeln!(body, "{pad}w{} = arg[{}][{}];", instr.i0, instr.i1, instr.i2);
            },
            OpCode::Output => {
                let _ = writeln!(body, "{pad}res[{}][{}] = w{};", instr.i0, instr.i2, instr.i1);
            },
            OpCode::Call => {
                let call_index = instr.i1 as usize;
                let entry = &func.call_table[call_index];
                // Emitted as two separate indented statements rather than a single line, so the
                // CALL's gather and scatter never collapse onto one unbraced statement
                // (`spec.md` §9 open question on the reference's CALL-output indentation bug).
                let args: Vec<String> = entry.dep.iter().map(|d| format!("w{d}")).collect();
                let _ = writeln!(body, "{pad}{}(&{{{}}}, &res_{});", entry.f.name(), args.join(", "), call_index);
                for (k, slot) in entry.out.iter().enumerate() {
                    if let Some(slot) = slot {
                        let _ = writeln!(body, "{pad}w{slot} = res_{call_index}[{k}];");
                    }
                }
            },
            OpCode::OutputExtract => unreachable!("never part of a compiled algorithm"),
            op if op.arity() == 1 => {
                let a = format!("w{}", instr.i1);
                let rendered = match target {
                    Target::MatrixLanguage => op.render_matlab(&a, ""),
                    Target::CLike => op.render_c(&a, ""),
                };
                let _ = writeln!(body, "{pad}w{} = {};", instr.i0, rendered);
            },
            op => {
                let a = format!("w{}", instr.i1);
                let b = format!("w{}", instr.i2);
                let rendered = match target {
                    Target::MatrixLanguage => op.render_matlab(&a, &b),
                    Target::CLike => op.render_c(&a, &b),
                };
                let _ = writeln!(body, "{pad}w{} = {};", instr.i0, rendered);
            },
        }
    }

    Ok(body)
}

#[cfg(test)]
mod tests {
    use sx_core::{Arena, OpCode as Op, Sx};

    use super::*;
    use crate::compile::{Options, SxFunction};

    #[test]
    fn c_like_body_renders_one_statement_per_instruction() {
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

        let body = export_body(&func, Target::CLike, 2).unwrap();
        assert!(body.contains("w"));
        assert!(body.lines().all(|l| l.starts_with("  ")));
    }

    #[test]
    fn export_fails_with_free_variables() {
        let mut a = Arena::new();
        let x = a.sym("x");
        let z = a.sym("z");
        let out = a.binary(Op::Add, x, z);
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

        assert!(matches!(export_body(&func, Target::CLike, 0), Err(EvalError::FreeVariablesInExport(_))));
    }
}
