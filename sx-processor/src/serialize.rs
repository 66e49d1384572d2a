//! Persisted state layout (`spec.md` §6 "Serialize/deserialize"): the compiled result broken
//! into a tagged, ordered record. Call-table entries are serialized by the sub-function's
//! `name()` rather than the `Arc<dyn Function>` itself; [`FunctionRegistry`] is the
//! `finalize()`-time collaborator that resolves names back into live handles.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use sx_core::{AlgEl, CallEntry, Function};

use crate::compile::SxFunction;

/// Resolves a sub-function by the name it was registered under at compile time. Implemented by
/// the embedding application; this crate only consumes it.
pub trait FunctionRegistry {
    fn resolve(&self, name: &str) -> Option<Arc<dyn Function>>;
}

#[derive(Debug, thiserror::Error)]
pub enum DeserializeError {
    #[error("call-table entry {index} references unknown function '{name}'")]
    UnknownFunction { index: usize, name: String },
}

/// One persisted call-table entry: the sub-function is named, not embedded (`spec.md` §6
/// "for each call node `(f, dep, out, out_sx)`"). `orig_args`/`orig_out` are `out_sx`'s
/// counterpart here — the original symbolic handles used to reuse CALL outputs on symbolic
/// replay (`eval::symbolic`) — persisted as raw arena indices the same way `operations` and
/// `constants` are, sound only relative to the arena the function was originally compiled
/// against (see [`SerializedFunction::finalize`]).
#[derive(Debug, Clone, Serialize, Deserialize)]
struct SerializedCallEntry {
    f_name: String,
    dep: Vec<u32>,
    out: Vec<Option<u32>>,
    f_nnz_in: Vec<usize>,
    f_nnz_out: Vec<usize>,
    orig_args: Vec<u32>,
    orig_out: Vec<Option<u32>>,
}

/// The tagged, ordered persisted record (`spec.md` §6 "Persisted state layout"): `n_instr`,
/// `worksize`, `free_vars`, `operations`, `constants`, `default_in`, the six call-sizes,
/// `call_nodes_size`, the call nodes, then the algorithm, then input/output metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SerializedFunction {
    name: String,
    input_names: Vec<String>,
    output_names: Vec<String>,
    n_instr: usize,
    worksize: u32,
    free_vars: Vec<u32>,
    operations: Vec<u32>,
    constants: Vec<u32>,
    default_in: Vec<f64>,
    nnz_in: Vec<usize>,
    nnz_out: Vec<usize>,
    sz_arg: usize,
    sz_res: usize,
    sz_iw: usize,
    sz_w: usize,
    sz_w_arg: usize,
    sz_w_res: usize,
    call_nodes_size: usize,
    call_table: Vec<SerializedCallEntry>,
    algorithm: Vec<AlgEl>,
}

impl SerializedFunction {
    pub fn from_compiled(func: &SxFunction) -> Self {
        SerializedFunction {
            name: func.name.clone(),
            input_names: func.input_names.clone(),
            output_names: func.output_names.clone(),
            n_instr: func.algorithm.len(),
            worksize: func.worksize,
            free_vars: func.free_vars.iter().map(|e| e.index() as u32).collect(),
            operations: func.operations.iter().map(|e| e.index() as u32).collect(),
            constants: func.constants.iter().map(|e| e.index() as u32).collect(),
            default_in: func.default_in.clone(),
            nnz_in: func.nnz_in.clone(),
            nnz_out: func.nnz_out.clone(),
            sz_arg: func.sz_arg,
            sz_res: func.sz_res,
            sz_iw: func.sz_iw,
            sz_w: func.sz_w,
            sz_w_arg: func.sz_w_arg,
            sz_w_res: func.sz_w_res,
            call_nodes_size: func.call_table.len(),
            call_table: func
                .call_table
                .iter()
                .map(|c| SerializedCallEntry {
                    f_name: c.f.name().to_string(),
                    dep: c.dep.clone(),
                    out: c.out.clone(),
                    f_nnz_in: c.f_nnz_in.clone(),
                    f_nnz_out: c.f_nnz_out.clone(),
                    orig_args: c.orig_args.iter().map(|e| e.index() as u32).collect(),
                    orig_out: c.orig_out.iter().map(|o| o.map(|e| e.index() as u32)).collect(),
                })
                .collect(),
            algorithm: func.algorithm.clone(),
        }
    }

    /// Re-establishes shared resources: resolves every call-table entry's function name through
    /// `registry` (`spec.md` §6 "a final `finalize()` step re-establishes shared resources").
    /// `free_vars`/`operations`/`constants` are returned as raw arena indices rather than
    /// `SxElem` handles, since a deserialized function has no arena of its own to address.
    pub fn finalize(self, registry: &dyn FunctionRegistry) -> Result<SxFunction, DeserializeError> {
        let mut call_table = Vec::with_capacity(self.call_table.len());
        for (index, entry) in self.call_table.into_iter().enumerate() {
            let f = registry
                .resolve(&entry.f_name)
                .ok_or_else(|| DeserializeError::UnknownFunction { index, name: entry.f_name.clone() })?;
            call_table.push(CallEntry {
                f,
                dep: entry.dep,
                out: entry.out,
                f_nnz_in: entry.f_nnz_in,
                f_nnz_out: entry.f_nnz_out,
                orig_args: entry.orig_args.into_iter().map(raw_handle).collect(),
                orig_out: entry.orig_out.into_iter().map(|o| o.map(raw_handle)).collect(),
            });
        }

        Ok(SxFunction {
            name: self.name,
            input_names: self.input_names,
            output_names: self.output_names,
            algorithm: self.algorithm,
            call_table,
            worksize: self.worksize,
            operations: self.operations.into_iter().map(raw_handle).collect(),
            constants: self.constants.into_iter().map(raw_handle).collect(),
            free_vars: self.free_vars.into_iter().map(raw_handle).collect(),
            default_in: self.default_in,
            nnz_in: self.nnz_in,
            nnz_out: self.nnz_out,
            sz_arg: self.sz_arg,
            sz_res: self.sz_res,
            sz_iw: self.sz_iw,
            sz_w: self.sz_w,
            sz_w_arg: self.sz_w_arg,
            sz_w_res: self.sz_w_res,
        })
    }
}

/// Reconstructs an `SxElem` from its raw arena index. Sound only relative to the same arena the
/// function was originally compiled against; callers that only need the compiled `algorithm` and
/// never re-touch the original arena (the common deserialize-and-evaluate path) can ignore this.
fn raw_handle(index: u32) -> sx_core::SxElem {
    sx_core::SxElem::from_raw(index)
}

#[cfg(test)]
mod tests {
    use sx_core::{Arena, OpCode as Op, Sx};

    use super::*;
    use crate::compile::Options;

    struct EmptyRegistry;
    impl FunctionRegistry for EmptyRegistry {
        fn resolve(&self, _name: &str) -> Option<Arc<dyn Function>> {
            None
        }
    }

    #[test]
    fn round_trip_through_json_preserves_algorithm() {
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

        let serialized = SerializedFunction::from_compiled(&func);
        let json = serde_json::to_string(&serialized).unwrap();
        let back: SerializedFunction = serde_json::from_str(&json).unwrap();
        let restored = back.finalize(&EmptyRegistry).unwrap();

        assert_eq!(restored.algorithm, func.algorithm);
        assert_eq!(restored.worksize, func.worksize);
    }
}
