//! Topological ordering of the operand graph, shared by both node representations.

use crate::error::GradError;
use std::collections::HashMap;

/// A handle to a node that knows its direct operands.
pub(crate) trait GraphNode: Sized {
    /// Identity of the node, stable while the graph is alive.
    fn id(&self) -> usize;
    fn operands(&self) -> Vec<Self>;
    fn name(&self) -> String;
}

#[derive(Clone, Copy, PartialEq)]
enum Mark {
    InProgress,
    Done,
}

/// Returns every node reachable from `root`, each exactly once, with operands
/// placed before the nodes that consume them. `root` comes last.
///
/// The traversal is an iterative post-order DFS, so deep chains do not grow the
/// call stack. Meeting a node that is still in progress means the graph has a
/// cycle, which is reported instead of looping forever.
pub(crate) fn topo_sort<N: GraphNode>(root: N) -> Result<Vec<N>, GradError> {
    let mut marks = HashMap::new();
    let mut order = vec![];
    let mut stack = vec![(root, false)];

    while let Some((node, expanded)) = stack.pop() {
        let id = node.id();
        if expanded {
            marks.insert(id, Mark::Done);
            order.push(node);
            continue;
        }
        match marks.get(&id) {
            Some(Mark::Done) => continue,
            Some(Mark::InProgress) => return Err(GradError::Cycle { name: node.name() }),
            None => (),
        }
        marks.insert(id, Mark::InProgress);
        let operands = node.operands();
        stack.push((node, true));
        // Reversed so that the first operand is visited first.
        for operand in operands.into_iter().rev() {
            match marks.get(&operand.id()) {
                Some(Mark::InProgress) => {
                    return Err(GradError::Cycle {
                        name: operand.name(),
                    })
                }
                Some(Mark::Done) => (),
                None => stack.push((operand, false)),
            }
        }
    }

    Ok(order)
}
