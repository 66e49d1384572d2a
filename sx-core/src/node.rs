//! The expression node store: an immutable-once-built arena of scalar DAG nodes.
//!
//! `spec.md` treats the node store as "built elsewhere"; this module supplies the concrete
//! implementation called for by the design note in `spec.md` §9: rather than refcounted,
//! potentially-cyclic node handles, nodes live in a flat arena and are addressed by `u32`
//! index. A node may only reference nodes allocated earlier in the same arena, which rules out
//! cycles by construction. The per-node `temp` scratch field used by the topological sorter
//! and emitter (`spec.md` §4.1-4.2) is a parallel vector on the arena, not a field on the node
//! itself, so it can be reset independently of node data.

use std::cell::Cell;
use std::collections::HashMap;
use std::sync::Arc;

use crate::OpCode;
use crate::function::Function;

/// A handle to a single symbolic scalar node, valid only relative to the [`Arena`] that
/// created it. Corresponds to `spec.md`'s `SXElem`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SxElem(pub(crate) u32);

impl SxElem {
    pub fn index(self) -> usize {
        self.0 as usize
    }

    /// Reconstructs a handle from a raw arena index, e.g. after deserializing a compiled
    /// function's `operations`/`constants`/`free_vars` lists. Sound only relative to the arena
    /// that originally allocated `index`.
    pub fn from_raw(index: u32) -> Self {
        SxElem(index)
    }
}

/// A column vector of scalar handles, standing in for the out-of-scope matrix library's "SX"
/// value (`spec.md` GLOSSARY "SX").
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Sx(pub Vec<SxElem>);

impl Sx {
    pub fn scalar(e: SxElem) -> Self {
        Sx(vec![e])
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<SxElem> for Sx {
    fn from_iter<T: IntoIterator<Item = SxElem>>(iter: T) -> Self {
        Sx(iter.into_iter().collect())
    }
}

/// One external sub-function invocation site, referenced by a `Call`-opcode node. Kept
/// separate from [`NodeData`] because a call's arity (number of scalar dependencies and
/// outputs) is not bounded by 2, unlike every other opcode (`spec.md` §3 "Call-table entry").
#[derive(Clone)]
pub struct CallSite {
    pub function: Arc<dyn Function>,
    pub args: Vec<SxElem>,
    pub n_out: usize,
}

#[derive(Debug, Clone)]
struct NodeData {
    op: OpCode,
    /// Dependency 0: unary/binary op operand, or (for `OutputExtract`) the parent `Call` node.
    dep0: SxElem,
    /// Dependency 1: binary op operand. Unused otherwise.
    dep1: SxElem,
    /// Payload for `Const` nodes.
    value: f64,
    /// Symbol name for `Parameter` (free variable / input-leaf) nodes.
    name: Option<Arc<str>>,
    /// Index into `Arena::calls` for `Call` nodes.
    call_site: u32,
    /// Output index within the parent call for `OutputExtract` nodes.
    oind: u32,
}

const NONE: SxElem = SxElem(u32::MAX);

/// The arena of expression nodes. Construction-time hash-consing (keyed on opcode + operand
/// handles + constant bits) gives automatic structural sharing, matching the "DAG... with
/// possible internal sharing" framing in `spec.md` §9.
#[derive(Debug, Default)]
pub struct Arena {
    nodes: Vec<NodeData>,
    /// Per-node compilation scratch field (`spec.md` §4.1 "temp"). Reset to `-1` before each
    /// compile. A `Cell` so the topological sorter can mutate it through a shared `&Arena`.
    temp: Vec<Cell<i32>>,
    cache: HashMap<(OpCode, u32, u32, u64), SxElem>,
    calls: Vec<CallSite>,
}

impl std::fmt::Debug for CallSite {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallSite")
            .field("function", &self.function.name())
            .field("args", &self.args)
            .field("n_out", &self.n_out)
            .finish()
    }
}

impl Arena {
    pub fn new() -> Self {
        Arena::default()
    }

    fn push(&mut self, data: NodeData) -> SxElem {
        let idx = self.nodes.len() as u32;
        assert!(idx < i32::MAX as u32, "expression arena exceeded i32::MAX nodes");
        self.nodes.push(data);
        self.temp.push(Cell::new(-1));
        SxElem(idx)
    }

    /// Declares a new symbolic leaf (a function input, or a free variable if never bound to
    /// one). Each call allocates a fresh node; symbols are identified by handle, not by name.
    pub fn sym(&mut self, name: impl Into<Arc<str>>) -> SxElem {
        self.push(NodeData {
            op: OpCode::Parameter,
            dep0: NONE,
            dep1: NONE,
            value: 0.0,
            name: Some(name.into()),
            call_site: 0,
            oind: 0,
        })
    }

    pub fn constant(&mut self, value: f64) -> SxElem {
        let key = (OpCode::Const, 0, 0, value.to_bits());
        if let Some(&e) = self.cache.get(&key) {
            return e;
        }
        let e = self.push(NodeData {
            op: OpCode::Const,
            dep0: NONE,
            dep1: NONE,
            value,
            name: None,
            call_site: 0,
            oind: 0,
        });
        self.cache.insert(key, e);
        e
    }

    pub fn unary(&mut self, op: OpCode, a: SxElem) -> SxElem {
        debug_assert_eq!(op.arity(), 1);
        if let OpCode::Const = self.op(a) {
            return self.constant(op.eval_f64(self.to_double(a).unwrap(), 0.0));
        }
        let key = (op, a.0, a.0, 0);
        if let Some(&e) = self.cache.get(&key) {
            return e;
        }
        let e = self.push(NodeData {
            op,
            dep0: a,
            dep1: a,
            value: 0.0,
            name: None,
            call_site: 0,
            oind: 0,
        });
        self.cache.insert(key, e);
        e
    }

    pub fn binary(&mut self, op: OpCode, a: SxElem, b: SxElem) -> SxElem {
        debug_assert_eq!(op.arity(), 2);
        if self.is_constant(a) && self.is_constant(b) {
            let va = self.to_double(a).unwrap();
            let vb = self.to_double(b).unwrap();
            return self.constant(op.eval_f64(va, vb));
        }
        let key = (op, a.0, b.0, 0);
        if let Some(&e) = self.cache.get(&key) {
            return e;
        }
        let e = self.push(NodeData {
            op,
            dep0: a,
            dep1: b,
            value: 0.0,
            name: None,
            call_site: 0,
            oind: 0,
        });
        self.cache.insert(key, e);
        e
    }

    /// Invokes an external `Function` on `args`, returning one `OutputExtract` handle per
    /// scalar output. Each returned handle can be used downstream exactly like any other
    /// `SxElem`; the emitter (`spec.md` §4.2) resolves the `Call`/`OutputExtract` pair back
    /// into a single `CALL` instruction plus call-table entry.
    pub fn call(&mut self, function: Arc<dyn Function>, args: Vec<SxElem>) -> Vec<SxElem> {
        let n_out = function.n_out();
        let site_idx = self.calls.len() as u32;
        self.calls.push(CallSite { function, args, n_out });
        let call_node = self.push(NodeData {
            op: OpCode::Call,
            dep0: NONE,
            dep1: NONE,
            value: 0.0,
            name: None,
            call_site: site_idx,
            oind: 0,
        });
        (0..n_out as u32)
            .map(|oind| {
                self.push(NodeData {
                    op: OpCode::OutputExtract,
                    dep0: call_node,
                    dep1: NONE,
                    value: 0.0,
                    name: None,
                    call_site: 0,
                    oind,
                })
            })
            .collect()
    }

    pub fn call_site(&self, e: SxElem) -> &CallSite {
        debug_assert_eq!(self.op(e), OpCode::Call);
        &self.calls[self.nodes[e.index()].call_site as usize]
    }

    /// For an `OutputExtract` node, returns `(parent call node, output index)`.
    pub fn extract_parent(&self, e: SxElem) -> (SxElem, usize) {
        debug_assert_eq!(self.op(e), OpCode::OutputExtract);
        let data = &self.nodes[e.index()];
        (data.dep0, data.oind as usize)
    }

    pub fn op(&self, e: SxElem) -> OpCode {
        self.nodes[e.index()].op
    }

    pub fn dep(&self, e: SxElem, i: usize) -> SxElem {
        match i {
            0 => self.nodes[e.index()].dep0,
            1 => self.nodes[e.index()].dep1,
            _ => panic!("scalar nodes have at most 2 dependencies"),
        }
    }

    pub fn has_dep(&self, e: SxElem, i: usize) -> bool {
        let d = match i {
            0 => self.nodes[e.index()].dep0,
            1 => self.nodes[e.index()].dep1,
            _ => return false,
        };
        d != NONE
    }

    pub fn is_constant(&self, e: SxElem) -> bool {
        matches!(self.op(e), OpCode::Const)
    }

    pub fn is_symbolic(&self, e: SxElem) -> bool {
        matches!(self.op(e), OpCode::Parameter)
    }

    pub fn to_double(&self, e: SxElem) -> Option<f64> {
        match self.op(e) {
            OpCode::Const => Some(self.nodes[e.index()].value),
            _ => None,
        }
    }

    pub fn name(&self, e: SxElem) -> Option<&str> {
        self.nodes[e.index()].name.as_deref()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    // TEMP SCRATCH FIELD
    // --------------------------------------------------------------------------------------

    pub fn temp(&self, e: SxElem) -> i32 {
        self.temp[e.index()].get()
    }

    pub fn set_temp(&self, e: SxElem, v: i32) {
        self.temp[e.index()].set(v);
    }

    /// Resets every node's `temp` scratch to `-1` ("unvisited"). Must be called before
    /// compiling a new function over this arena, and must not run concurrently with another
    /// compile over the same arena (`spec.md` §5 "Shared resources").
    pub fn reset_temp(&self) {
        for t in &self.temp {
            t.set(-1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_consing_dedups_identical_constants() {
        let mut a = Arena::new();
        let c1 = a.constant(3.0);
        let c2 = a.constant(3.0);
        assert_eq!(c1, c2);
    }

    #[test]
    fn hash_consing_dedups_identical_binary_ops() {
        let mut a = Arena::new();
        let x = a.sym("x");
        let y = a.sym("y");
        let p1 = a.binary(OpCode::Mul, x, y);
        let p2 = a.binary(OpCode::Mul, x, y);
        assert_eq!(p1, p2);
    }

    #[test]
    fn constant_folding_on_construction() {
        let mut a = Arena::new();
        let c1 = a.constant(2.0);
        let c2 = a.constant(3.0);
        let sum = a.binary(OpCode::Add, c1, c2);
        assert!(a.is_constant(sum));
        assert_eq!(a.to_double(sum), Some(5.0));
    }

    #[test]
    fn distinct_symbols_are_distinct_nodes() {
        let mut a = Arena::new();
        let x = a.sym("x");
        let y = a.sym("y");
        assert_ne!(x, y);
    }
}
