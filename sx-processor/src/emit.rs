//! Instruction emission (`spec.md` §4.2): walks the topologically sorted node list and
//! classifies each node into an `AlgEl`, plus a post-pass that rewrites tentative `PARAMETER`
//! instructions into `INPUT` instructions for every symbol actually bound to a declared input.

use std::collections::HashMap;

use sx_core::{AlgEl, Arena, CallEntry, OpCode, Sx, SxElem};

use crate::toposort::SortedNodes;

/// Output of instruction emission. Slots in `algorithm` and in every `CallEntry.dep`/`out`
/// still name node positions (the `temp` value assigned by the topological sort), not dense
/// work-vector slots — that rewrite is the register allocator's job (`spec.md` §4.3).
pub struct Emitted {
    pub algorithm: Vec<AlgEl>,
    pub call_table: Vec<CallEntry>,
    /// `node position -> offset in algorithm`, valid for every position that got an
    /// instruction (`Const`/`Parameter`/`Input`/unary/binary/`Call`). Used to locate a `CALL`'s
    /// instruction from an `OutputExtract` child, and reused unchanged by the register
    /// allocator's own bookkeeping.
    pub alg_index: Vec<usize>,
    /// Reference count per node position: how many later instructions (or call-table `dep`
    /// entries) read that position. Consumed destructively by the register allocator.
    pub refcount: Vec<u32>,
    /// Non-leaf, non-constant node handles (arithmetic/call instructions) in algorithm order —
    /// one entry per tape slot the AD sweeps will need (`spec.md` §4.6 "Tape build").
    pub operations: Vec<SxElem>,
    /// Constant node handles in encounter order.
    pub constants: Vec<SxElem>,
    /// `(algorithm offset of the tentative PARAMETER, node)` for every symbolic leaf seen,
    /// consumed by [`bind_inputs`].
    pub symb_loc: Vec<(usize, SxElem)>,
    /// One past the highest node position referenced — the node-index space size handed to
    /// the register allocator.
    pub n_positions: usize,
}

pub fn emit(arena: &Arena, nodes: &SortedNodes, output_nnz: &[usize]) -> Emitted {
    let n_positions = nodes.iter().flatten().count();

    let mut algorithm = Vec::new();
    let mut call_table: Vec<CallEntry> = Vec::new();
    let mut alg_index = vec![usize::MAX; n_positions];
    let mut refcount = vec![0u32; n_positions];
    let mut operations = Vec::new();
    let mut constants = Vec::new();
    let mut symb_loc = Vec::new();

    let mut last_emitted: Option<SxElem> = None;
    let mut oind = 0usize;
    let mut nz = 0usize;
    skip_empty_outputs(output_nnz, &mut oind);

    for entry in nodes {
        match *entry {
            Some(node) => {
                classify(
                    arena,
                    node,
                    &mut algorithm,
                    &mut call_table,
                    &mut alg_index,
                    &mut refcount,
                    &mut operations,
                    &mut constants,
                    &mut symb_loc,
                );
                last_emitted = Some(node);
            },
            None => {
                let src = last_emitted.expect("OUTPUT separator with no preceding node");
                let src_pos = arena.temp(src) as u32;
                algorithm.push(AlgEl::output(oind as u32, src_pos, nz as u32));
                refcount[src_pos as usize] += 1;

                nz += 1;
                if output_nnz.get(oind).copied().unwrap_or(0) == nz {
                    oind += 1;
                    nz = 0;
                    skip_empty_outputs(output_nnz, &mut oind);
                }
            },
        }
    }

    Emitted {
        algorithm,
        call_table,
        alg_index,
        refcount,
        operations,
        constants,
        symb_loc,
        n_positions,
    }
}

fn skip_empty_outputs(output_nnz: &[usize], oind: &mut usize) {
    while output_nnz.get(*oind).copied() == Some(0) {
        *oind += 1;
    }
}

#[allow(clippy::too_many_arguments)]
fn classify(
    arena: &Arena,
    node: SxElem,
    algorithm: &mut Vec<AlgEl>,
    call_table: &mut Vec<CallEntry>,
    alg_index: &mut [usize],
    refcount: &mut [u32],
    operations: &mut Vec<SxElem>,
    constants: &mut Vec<SxElem>,
    symb_loc: &mut Vec<(usize, SxElem)>,
) {
    let pos = arena.temp(node) as usize;
    let mut bump = |slot: u32| refcount[slot as usize] += 1;

    match arena.op(node) {
        OpCode::Const => {
            alg_index[pos] = algorithm.len();
            algorithm.push(AlgEl::constant(pos as u32, arena.to_double(node).unwrap()));
            constants.push(node);
        },
        OpCode::Parameter => {
            alg_index[pos] = algorithm.len();
            symb_loc.push((algorithm.len(), node));
            algorithm.push(AlgEl::parameter(pos as u32));
        },
        OpCode::Call => {
            let site = arena.call_site(node);
            let dep: Vec<u32> = site.args.iter().map(|&a| arena.temp(a) as u32).collect();
            for &d in &dep {
                bump(d);
            }
            let f_n_in = site.function.n_in();
            let f_n_out = site.function.n_out();
            let entry = CallEntry {
                f: site.function.clone(),
                orig_args: site.args.clone(),
                dep,
                out: vec![None; site.n_out],
                orig_out: vec![None; site.n_out],
                f_nnz_in: (0..f_n_in).map(|i| site.function.nnz_in(i)).collect(),
                f_nnz_out: (0..f_n_out).map(|i| site.function.nnz_out(i)).collect(),
            };
            let call_index = call_table.len() as u32;
            call_table.push(entry);
            alg_index[pos] = algorithm.len();
            operations.push(node);
            algorithm.push(AlgEl::call(pos as u32, call_index));
        },
        OpCode::OutputExtract => {
            let (parent, oind) = arena.extract_parent(node);
            let parent_pos = arena.temp(parent) as usize;
            let parent_offset = alg_index[parent_pos];
            let call_index = algorithm[parent_offset].i1 as usize;
            call_table[call_index].out[oind] = Some(pos as u32);
            call_table[call_index].orig_out[oind] = Some(node);
            // Invariant 5: no AlgEl is emitted for OutputExtract.
        },
        op if op.arity() == 1 => {
            let arg = arena.dep(node, 0);
            let arg_pos = arena.temp(arg) as u32;
            bump(arg_pos);
            alg_index[pos] = algorithm.len();
            operations.push(node);
            algorithm.push(AlgEl::unary(op, pos as u32, arg_pos));
        },
        op => {
            debug_assert_eq!(op.arity(), 2);
            let lhs = arena.temp(arena.dep(node, 0)) as u32;
            let rhs = arena.temp(arena.dep(node, 1)) as u32;
            bump(lhs);
            bump(rhs);
            alg_index[pos] = algorithm.len();
            operations.push(node);
            algorithm.push(AlgEl::binary(op, pos as u32, lhs, rhs));
        },
    }
}

/// Post-pass (`spec.md` §4.2 "Post-pass — binding inputs"): rewrites each tentative
/// `PARAMETER` instruction that corresponds to a declared function input's scalar nonzero into
/// an `INPUT` instruction. Returns the symbols that remain unbound, in encounter order — these
/// become `free_vars_`.
pub fn bind_inputs(algorithm: &mut [AlgEl], symb_loc: &[(usize, SxElem)], inputs: &[Sx]) -> Vec<SxElem> {
    let mut loc_of: HashMap<SxElem, usize> =
        symb_loc.iter().map(|&(offset, node)| (node, offset)).collect();

    for (input_index, input) in inputs.iter().enumerate() {
        for (nz_index, &node) in input.0.iter().enumerate() {
            if let Some(offset) = loc_of.remove(&node) {
                let dst = algorithm[offset].i0;
                algorithm[offset] = AlgEl::input(dst, input_index as u32, nz_index as u32);
            }
        }
    }

    symb_loc
        .iter()
        .filter_map(|&(_, node)| loc_of.contains_key(&node).then_some(node))
        .collect()
}

#[cfg(test)]
mod tests {
    use sx_core::OpCode;

    use super::*;
    use crate::toposort::topo_sort;

    #[test]
    fn simple_expression_emits_input_and_binary_ops() {
        let mut a = Arena::new();
        let x = a.sym("x");
        let y = a.sym("y");
        let xy = a.binary(OpCode::Mul, x, y);
        let sinx = a.unary(OpCode::Sin, x);
        let out = a.binary(OpCode::Add, xy, sinx);

        let nodes = topo_sort(&a, &[Sx::scalar(out)]).unwrap();
        let mut emitted = emit(&a, &nodes, &[1]);
        let free = bind_inputs(&mut emitted.algorithm, &emitted.symb_loc, &[Sx::scalar(x), Sx::scalar(y)]);

        assert!(free.is_empty());
        assert!(emitted.algorithm.iter().any(|el| el.op == OpCode::Input));
        assert!(emitted.algorithm.iter().any(|el| el.op == OpCode::Output));
        assert_eq!(emitted.operations.len(), 3); // xy, sinx, out
    }

    #[test]
    fn unbound_symbol_becomes_free_var() {
        let mut a = Arena::new();
        let x = a.sym("x");
        let free_sym = a.sym("z");
        let out = a.binary(OpCode::Add, x, free_sym);

        let nodes = topo_sort(&a, &[Sx::scalar(out)]).unwrap();
        let mut emitted = emit(&a, &nodes, &[1]);
        let free = bind_inputs(&mut emitted.algorithm, &emitted.symb_loc, &[Sx::scalar(x)]);

        assert_eq!(free, vec![free_sym]);
    }
}
