//! Ties the topological sort, instruction emitter, and register allocator together into the
//! public `SxFunction::new` construction entry point (`spec.md` §6 "Construct"), and supplies
//! the option map / construction-result types from `spec.md` §3 and §9.

use std::collections::HashMap;

use sx_core::{AlgEl, Arena, CallEntry, CompileError, ConfigError, Sx, SxElem};

use crate::emit::{bind_inputs, emit};
use crate::regalloc::allocate;
use crate::toposort::topo_sort;

// OPTIONS
// ================================================================================================

/// A recognized option value. `spec.md` §6/§9 fix the recognized key set to exactly four
/// entries; anything else is a [`ConfigError::UnknownOption`].
#[derive(Debug, Clone, PartialEq)]
pub enum OptionValue {
    Bool(bool),
    F64Vec(Vec<f64>),
}

/// Construction options (`spec.md` §6 "Construct", §9 "Option propagation").
#[derive(Debug, Clone)]
pub struct Options {
    /// One default value per function input, used when the caller omits an input at
    /// evaluation time. Defaults to all-zero.
    pub default_in: Vec<f64>,
    /// Enables slot reuse in the register allocator (`spec.md` §4.3). Default `true`.
    pub live_variables: bool,
    /// Must be `false`; requesting OpenCL JIT is a fatal configuration error.
    pub just_in_time_opencl: bool,
    /// Must be `false`; requesting sparsity JIT is a fatal configuration error.
    pub just_in_time_sparsity: bool,
}

impl Default for Options {
    fn default() -> Self {
        Options {
            default_in: Vec::new(),
            live_variables: true,
            just_in_time_opencl: false,
            just_in_time_sparsity: false,
        }
    }
}

impl TryFrom<HashMap<String, OptionValue>> for Options {
    type Error = ConfigError;

    fn try_from(mut map: HashMap<String, OptionValue>) -> Result<Self, Self::Error> {
        let mut opts = Options::default();

        if let Some(v) = map.remove("default_in") {
            match v {
                OptionValue::F64Vec(v) => opts.default_in = v,
                OptionValue::Bool(_) => return Err(ConfigError::UnknownOption("default_in".into())),
            }
        }
        if let Some(v) = map.remove("live_variables") {
            match v {
                OptionValue::Bool(b) => opts.live_variables = b,
                OptionValue::F64Vec(_) => {
                    return Err(ConfigError::UnknownOption("live_variables".into()));
                },
            }
        }
        if let Some(v) = map.remove("just_in_time_opencl") {
            match v {
                OptionValue::Bool(b) => opts.just_in_time_opencl = b,
                OptionValue::F64Vec(_) => {
                    return Err(ConfigError::UnknownOption("just_in_time_opencl".into()));
                },
            }
        }
        if let Some(v) = map.remove("just_in_time_sparsity") {
            match v {
                OptionValue::Bool(b) => opts.just_in_time_sparsity = b,
                OptionValue::F64Vec(_) => {
                    return Err(ConfigError::UnknownOption("just_in_time_sparsity".into()));
                },
            }
        }

        if let Some((key, _)) = map.into_iter().next() {
            return Err(ConfigError::UnknownOption(key));
        }
        if opts.just_in_time_opencl {
            return Err(ConfigError::OpenClRequested);
        }
        if opts.just_in_time_sparsity {
            return Err(ConfigError::SparsityJitRequested);
        }

        Ok(opts)
    }
}

// COMPILED FUNCTION
// ================================================================================================

/// The compiled result of `spec.md` §3 "Global compile result": the instruction stream, the
/// call table, the buffer-sizing maxima, and the bookkeeping the dispatch sweeps and code
/// emitter need.
#[derive(Debug)]
pub struct SxFunction {
    pub name: String,
    pub input_names: Vec<String>,
    pub output_names: Vec<String>,

    pub algorithm: Vec<AlgEl>,
    pub call_table: Vec<CallEntry>,
    pub worksize: u32,

    pub operations: Vec<SxElem>,
    pub constants: Vec<SxElem>,
    pub free_vars: Vec<SxElem>,
    pub default_in: Vec<f64>,

    pub nnz_in: Vec<usize>,
    pub nnz_out: Vec<usize>,

    pub sz_arg: usize,
    pub sz_res: usize,
    pub sz_iw: usize,
    pub sz_w: usize,
    pub sz_w_arg: usize,
    pub sz_w_res: usize,
}

impl SxFunction {
    /// Compiles `outputs` (one `Sx` per declared function output) against `inputs` (one `Sx`
    /// per declared function input) over `arena` (`spec.md` §6 "Construct").
    #[tracing::instrument(level = "debug", skip(arena, inputs, outputs), fields(name = %name.as_ref()))]
    pub fn new(
        arena: &Arena,
        name: impl AsRef<str>,
        inputs: &[Sx],
        outputs: &[Sx],
        input_names: Vec<String>,
        output_names: Vec<String>,
        options: Options,
    ) -> Result<Self, CompileError> {
        if !options.default_in.is_empty() && options.default_in.len() != inputs.len() {
            return Err(CompileError::Config(ConfigError::BadDefaultInLength {
                expected: inputs.len(),
                actual: options.default_in.len(),
            }));
        }
        let default_in = if options.default_in.is_empty() {
            vec![0.0; inputs.len()]
        } else {
            options.default_in.clone()
        };

        let output_nnz: Vec<usize> = outputs.iter().map(Sx::len).collect();

        let nodes = {
            let _span = tracing::debug_span!("topo_sort").entered();
            topo_sort(arena, outputs)?
        };

        let mut emitted = {
            let _span = tracing::debug_span!("emit").entered();
            emit(arena, &nodes, &output_nnz)
        };

        let free_vars = bind_inputs(&mut emitted.algorithm, &emitted.symb_loc, inputs);

        let allocated = {
            let _span = tracing::debug_span!("regalloc").entered();
            allocate(
                emitted.algorithm,
                emitted.call_table,
                emitted.refcount,
                emitted.n_positions,
                options.live_variables,
            )
        };

        let sz_arg = allocated.call_table.iter().map(|c| c.f.n_in()).max().unwrap_or(0);
        let sz_res = allocated.call_table.iter().map(|c| c.f.n_out()).max().unwrap_or(0);
        let sz_iw = allocated.call_table.iter().map(|c| c.f.sz_iw()).max().unwrap_or(0);
        let sz_w = allocated.call_table.iter().map(|c| c.f.sz_w()).max().unwrap_or(0);
        let sz_w_arg = allocated.call_table.iter().map(|c| c.n_dep()).max().unwrap_or(0);
        let sz_w_res = allocated.call_table.iter().map(|c| c.n_out()).max().unwrap_or(0);

        Ok(SxFunction {
            name: name.as_ref().to_string(),
            input_names,
            output_names,
            algorithm: allocated.algorithm,
            call_table: allocated.call_table,
            worksize: allocated.worksize,
            operations: emitted.operations,
            constants: emitted.constants,
            free_vars,
            default_in,
            nnz_in: inputs.iter().map(Sx::len).collect(),
            nnz_out: output_nnz,
            sz_arg,
            sz_res,
            sz_iw,
            sz_w,
            sz_w_arg,
            sz_w_res,
        })
    }

    pub fn n_in(&self) -> usize {
        self.nnz_in.len()
    }

    pub fn n_out(&self) -> usize {
        self.nnz_out.len()
    }

    /// True iff no instruction uses a non-smooth op (`spec.md` §6 "is_smooth()").
    pub fn is_smooth(&self) -> bool {
        self.algorithm.iter().all(|el| el.op.is_smooth())
    }

    /// Required caller-allocated buffer sizes (`spec.md` §5 "Scratch sizing").
    pub fn required_w(&self) -> usize {
        self.worksize as usize + self.sz_w + self.sz_w_arg + self.sz_w_res
    }

    pub fn required_iw(&self) -> usize {
        self.sz_iw
    }

    /// Human-readable instruction dump (`spec.md` §6 "disp_more"): one line per instruction,
    /// temporaries as `@k`, outputs as `output[i][j] = @k`.
    pub fn disp_more(&self) -> String {
        use std::fmt::Write as _;
        let mut out = String::new();
        for el in &self.algorithm {
            match el.op {
                sx_core::OpCode::Const => {
                    let _ = writeln!(out, "@{} = {}", el.i0, el.d);
                },
                sx_core::OpCode::Parameter => {
                    let _ = writeln!(out, "@{} = param", el.i0);
                },
                sx_core::OpCode::Input => {
                    let _ = writeln!(out, "@{} = input[{}][{}]", el.i0, el.i1, el.i2);
                },
                sx_core::OpCode::Output => {
                    let _ = writeln!(out, "output[{}][{}] = @{}", el.i0, el.i2, el.i1);
                },
                sx_core::OpCode::Call => {
                    let entry = &self.call_table[el.i1 as usize];
                    let _ = writeln!(out, "@{} = call {}({:?}) -> {:?}", el.i0, entry.f.name(), entry.dep, entry.out);
                },
                op if op.arity() == 1 => {
                    let _ = writeln!(out, "@{} = {}", el.i0, op.render_c(&format!("@{}", el.i1), ""));
                },
                op => {
                    let _ = writeln!(
                        out,
                        "@{} = {}",
                        el.i0,
                        op.render_c(&format!("@{}", el.i1), &format!("@{}", el.i2))
                    );
                },
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use sx_core::{Arena, Function, OpCode as Op, Sx, SxElem};

    use super::*;

    #[test]
    fn disp_more_renders_one_line_per_instruction() {
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

        let dump = func.disp_more();
        assert_eq!(dump.lines().count(), func.algorithm.len());
        assert!(dump.contains("= input[0]["));
        assert!(dump.contains("= input[1]["));
        assert!(dump.contains("output[0][0] = @"));
    }

    #[derive(Debug)]
    struct Double;

    impl Function for Double {
        fn name(&self) -> &str {
            "double"
        }
        fn n_in(&self) -> usize {
            1
        }
        fn n_out(&self) -> usize {
            1
        }
        fn nnz_in(&self, _i: usize) -> usize {
            1
        }
        fn nnz_out(&self, _i: usize) -> usize {
            1
        }
        fn eval(&self, arg: &[Option<&[f64]>], res: &mut [Option<&mut [f64]>]) -> i32 {
            let x = arg[0].map(|s| s[0]).unwrap_or(0.0);
            if let Some(Some(buf)) = res.get_mut(0) {
                buf[0] = 2.0 * x;
            }
            0
        }
        fn eval_sx(&self, _arg: &[SxElem]) -> Vec<SxElem> {
            unimplemented!("not exercised by this test")
        }
        fn forward(&self, _n_fwd: usize) -> Box<dyn Function> {
            unimplemented!("not exercised by this test")
        }
        fn reverse(&self, _n_rev: usize) -> Box<dyn Function> {
            unimplemented!("not exercised by this test")
        }
        fn rev(&self, _arg: &mut [u64], _res: &mut [u64]) {}
        fn sp_forward(&self, _arg: &[u64], _res: &mut [u64]) {}
    }

    #[test]
    fn disp_more_renders_a_call_line() {
        let mut a = Arena::new();
        let x = a.sym("x");
        let f_outs = a.call(Arc::new(Double), vec![x]);
        let func = SxFunction::new(
            &a,
            "g",
            &[Sx::scalar(x)],
            &[Sx::scalar(f_outs[0])],
            vec!["x".into()],
            vec!["out".into()],
            Options::default(),
        )
        .unwrap();

        let dump = func.disp_more();
        assert!(dump.contains("= call double("));
    }
}
