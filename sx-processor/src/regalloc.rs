//! Register allocation (`spec.md` §4.3): a second pass over the emitted stream that renumbers
//! node-index slots into a dense `0..worksize` work-vector space, reusing storage across
//! non-overlapping lifetimes.

use sx_core::{AlgEl, CallEntry, OpCode};

/// Result of live-variable allocation: the rewritten algorithm/call-table (slots now name
/// work-vector positions) plus the work-vector size they require.
pub struct Allocated {
    pub algorithm: Vec<AlgEl>,
    pub call_table: Vec<CallEntry>,
    pub worksize: u32,
}

/// Runs the allocator described in `spec.md` §4.3 over an emitted (but not yet allocated)
/// stream. `refcount` must be the vector produced by [`crate::emit::emit`], indexed by node
/// position; it is consumed (decremented) in place.
///
/// `live_variables = false` disables slot reuse: every node gets a fresh slot, and `worksize`
/// becomes `n_positions` (`spec.md` §4.3 "the option live_variables = false").
pub fn allocate(
    mut algorithm: Vec<AlgEl>,
    mut call_table: Vec<CallEntry>,
    mut refcount: Vec<u32>,
    n_positions: usize,
    live_variables: bool,
) -> Allocated {
    // `place[node_index] -> slot`. `u32::MAX` marks "not yet placed".
    let mut place = vec![u32::MAX; n_positions];
    let mut unused: Vec<u32> = Vec::new();
    let mut worksize: u32 = 0;

    let mut alloc_slot = |unused: &mut Vec<u32>, worksize: &mut u32| -> u32 {
        if live_variables {
            if let Some(slot) = unused.pop() {
                return slot;
            }
        }
        let slot = *worksize;
        *worksize += 1;
        slot
    };

    for instr in algorithm.iter_mut() {
        if instr.op == OpCode::Output {
            // OUTPUT has no outputs, and its only dependency (the source slot) is rewritten in
            // place just like any other read.
            let dep = instr.i1;
            if let Some(rc) = refcount.get_mut(dep as usize) {
                *rc -= 1;
                if *rc == 0 {
                    unused.push(place[dep as usize]);
                }
            }
            instr.i1 = place[dep as usize];
            continue;
        }

        if instr.op == OpCode::Call {
            let call_index = instr.i1 as usize;
            let (dep, out) = {
                let entry = &call_table[call_index];
                (entry.dep.clone(), entry.out.clone())
            };

            // Step 2-3: decrement dependency refcounts in reverse order, freeing slots whose
            // refcount reaches zero (`spec.md` §4.3 step 2: "so when several children share a
            // refcount, the first argument lands on top of `unused`").
            for &d in dep.iter().rev() {
                let rc = &mut refcount[d as usize];
                *rc -= 1;
                if *rc == 0 {
                    unused.push(place[d as usize]);
                }
            }

            // Step 4: allocate fresh/reused slots for each live output.
            let mut new_out = Vec::with_capacity(out.len());
            for o in &out {
                match o {
                    Some(node_index) => {
                        let slot = alloc_slot(&mut unused, &mut worksize);
                        place[*node_index as usize] = slot;
                        new_out.push(Some(slot));
                    },
                    None => new_out.push(None),
                }
            }

            // Step 5: rewrite dep[k] := place[dep[k]].
            let new_dep: Vec<u32> = dep.iter().map(|&d| place[d as usize]).collect();

            let entry = &mut call_table[call_index];
            entry.dep = new_dep;
            entry.out = new_out;
            continue;
        }

        // Regular unary/binary op (or a leaf: Const/Parameter/Input, arity 0 deps).
        let arity = instr.op.arity();

        // Reverse order: decrement i2 before i1 so i1's freed slot (if any) lands on top of
        // `unused` and is picked up first (`spec.md` §4.3 step 2).
        if arity == 2 {
            let d2 = instr.i2;
            let rc = &mut refcount[d2 as usize];
            *rc -= 1;
            if *rc == 0 {
                unused.push(place[d2 as usize]);
            }
        }
        if arity >= 1 {
            let d1 = instr.i1;
            let rc = &mut refcount[d1 as usize];
            *rc -= 1;
            if *rc == 0 {
                unused.push(place[d1 as usize]);
            }
        }

        let dst_node = instr.i0;
        let slot = alloc_slot(&mut unused, &mut worksize);
        place[dst_node as usize] = slot;
        instr.i0 = slot;

        // Leave i1/i2 untouched for arity-0 ops: `Input`'s `(input index, nonzero index)` and
        // `Const`/`Parameter`'s unused fields are not slot references.
        match arity {
            1 => {
                let new_i1 = place[instr.i1 as usize];
                instr.i1 = new_i1;
                instr.i2 = new_i1; // unary invariant: i2 == i1
            },
            2 => {
                instr.i1 = place[instr.i1 as usize];
                instr.i2 = place[instr.i2 as usize];
            },
            _ => {},
        }
    }

    Allocated { algorithm, call_table, worksize }
}

#[cfg(test)]
mod tests {
    use sx_core::{Arena, OpCode, Sx};

    use super::*;
    use crate::emit::{bind_inputs, emit};
    use crate::toposort::topo_sort;

    fn compile_simple(live_variables: bool) -> Allocated {
        let mut a = Arena::new();
        let x = a.sym("x");
        let y = a.sym("y");
        let xy = a.binary(OpCode::Mul, x, y);
        let sinx = a.unary(OpCode::Sin, x);
        let out = a.binary(OpCode::Add, xy, sinx);

        let nodes = topo_sort(&a, &[Sx::scalar(out)]).unwrap();
        let mut emitted = emit(&a, &nodes, &[1]);
        bind_inputs(&mut emitted.algorithm, &emitted.symb_loc, &[Sx::scalar(x), Sx::scalar(y)]);
        allocate(
            emitted.algorithm,
            emitted.call_table,
            emitted.refcount,
            emitted.n_positions,
            live_variables,
        )
    }

    #[test]
    fn live_variable_reuse_keeps_worksize_small() {
        // F(x, y) = x*y + sin(x); scenario 1 in spec.md §8 expects worksize <= 3.
        let allocated = compile_simple(true);
        assert!(allocated.worksize <= 3, "worksize was {}", allocated.worksize);
    }

    #[test]
    fn disabling_live_variables_uses_one_slot_per_node() {
        let allocated = compile_simple(false);
        // 2 inputs + 1 mul + 1 sin + 1 add = 5 non-output nodes.
        assert_eq!(allocated.worksize, 5);
    }

    #[test]
    fn unary_invariant_holds_after_allocation() {
        let allocated = compile_simple(true);
        for instr in &allocated.algorithm {
            assert!(instr.respects_unary_invariant());
        }
    }

    #[test]
    fn all_slots_are_within_worksize() {
        let allocated = compile_simple(true);
        for instr in &allocated.algorithm {
            match instr.op {
                OpCode::Input | OpCode::Output => {},
                OpCode::Call => unreachable!("no calls in this test"),
                _ => {
                    assert!(instr.i0 < allocated.worksize);
                    assert!(instr.i1 < allocated.worksize);
                    assert!(instr.i2 < allocated.worksize);
                },
            }
        }
    }
}
