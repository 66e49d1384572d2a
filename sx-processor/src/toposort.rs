//! Topological sort (`spec.md` §4.1): an iterative, explicit-stack depth-first post-order
//! traversal that produces a flat node list with `null` separators marking the boundary before
//! each upcoming `OUTPUT` instruction.

use sx_core::{Arena, CompileError, OpCode, SxElem};

/// One entry of the sorted node list: either a node in dependency order, or a separator
/// standing for the `OUTPUT` instruction that follows it.
pub type SortedNodes = Vec<Option<SxElem>>;

/// Runs the traversal described in `spec.md` §4.1 over `outputs` (one `Sx` per declared
/// function output, each already holding only its structural nonzeros in column-major order).
///
/// Resets [`Arena::reset_temp`] first; the arena's `temp` field is used both as a visited mark
/// and, once a node is emitted, as its position in the returned list.
pub fn topo_sort(arena: &Arena, outputs: &[sx_core::Sx]) -> Result<SortedNodes, CompileError> {
    arena.reset_temp();
    let mut nodes: SortedNodes = Vec::new();
    let mut next_pos: i64 = 0;

    for output in outputs {
        for &root in &output.0 {
            push_subtree(arena, root, &mut nodes, &mut next_pos)?;
            nodes.push(None);
        }
    }
    Ok(nodes)
}

/// Drains one scalar root's dependency subtree into `nodes`, skipping anything already
/// emitted (by an earlier root, possibly for a different output — this is where cross-output
/// structural sharing gets reused, `spec.md` §4.1 "reuses already-visited nodes by position").
fn push_subtree(
    arena: &Arena,
    root: SxElem,
    nodes: &mut SortedNodes,
    next_pos: &mut i64,
) -> Result<(), CompileError> {
    if arena.temp(root) >= 0 {
        return Ok(());
    }

    // `(node, expanded)`: `expanded == false` means "push children, then revisit"; `true`
    // means "children are already emitted, emit this node now".
    let mut stack: Vec<(SxElem, bool)> = vec![(root, false)];

    while let Some((node, expanded)) = stack.pop() {
        if arena.temp(node) >= 0 {
            continue;
        }

        if expanded {
            if *next_pos >= i32::MAX as i64 {
                return Err(CompileError::IntegerOverflow);
            }
            arena.set_temp(node, *next_pos as i32);
            nodes.push(Some(node));
            *next_pos += 1;
            continue;
        }

        stack.push((node, true));
        push_unvisited_children(arena, node, &mut stack);
    }

    Ok(())
}

/// Pushes `node`'s children onto `stack` in reverse dependency order, so that the
/// left-then-right tie-break from `spec.md` §4.1 falls out of plain LIFO popping: the last
/// child pushed (the leftmost / first dependency) is popped and descended into first.
fn push_unvisited_children(arena: &Arena, node: SxElem, stack: &mut Vec<(SxElem, bool)>) {
    let mut push_if_unvisited = |child: SxElem| {
        if arena.temp(child) < 0 {
            stack.push((child, false));
        }
    };

    match arena.op(node) {
        OpCode::Call => {
            let site = arena.call_site(node);
            for &arg in site.args.iter().rev() {
                push_if_unvisited(arg);
            }
        },
        OpCode::OutputExtract => {
            let (parent, _) = arena.extract_parent(node);
            push_if_unvisited(parent);
        },
        op => {
            let arity = op.arity();
            if arity == 2 {
                push_if_unvisited(arena.dep(node, 1));
            }
            if arity >= 1 {
                push_if_unvisited(arena.dep(node, 0));
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use sx_core::{OpCode, Sx};

    use super::*;

    #[test]
    fn leaves_come_before_their_parent() {
        let mut a = Arena::new();
        let x = a.sym("x");
        let y = a.sym("y");
        let sum = a.binary(OpCode::Add, x, y);
        let sorted = topo_sort(&a, &[Sx::scalar(sum)]).unwrap();

        let positions: Vec<SxElem> = sorted.into_iter().flatten().collect();
        let pos_of = |e: SxElem| positions.iter().position(|&p| p == e).unwrap();
        assert!(pos_of(x) < pos_of(sum));
        assert!(pos_of(y) < pos_of(sum));
    }

    #[test]
    fn shared_subexpression_emitted_once() {
        let mut a = Arena::new();
        let x = a.sym("x");
        let x_sq = a.unary(OpCode::Sq, x);
        let out0 = a.binary(OpCode::Add, x_sq, x_sq);
        let out1 = a.binary(OpCode::Sub, x_sq, x);
        let sorted = topo_sort(&a, &[Sx::scalar(out0), Sx::scalar(out1)]).unwrap();

        let occurrences = sorted.iter().flatten().filter(|&&e| e == x_sq).count();
        assert_eq!(occurrences, 1);
    }

    #[test]
    fn one_output_separator_per_output_scalar() {
        let mut a = Arena::new();
        let x = a.sym("x");
        let y = a.sym("y");
        let sorted = topo_sort(&a, &[Sx(vec![x, y])]).unwrap();
        let separators = sorted.iter().filter(|n| n.is_none()).count();
        assert_eq!(separators, 2);
    }
}
