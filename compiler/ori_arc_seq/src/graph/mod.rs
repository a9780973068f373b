//! Shared CFG analysis utilities for the sequence optimizer.
//!
//! Generic graph operations on [`ArcFunction`]: predecessor lists, postorder
//! traversal, and the dominator and post-dominator trees. The loop analysis,
//! the default oracles, and the pairing dataflow all build on these, so they
//! live here rather than inside any one consumer.

use rustc_hash::FxHashSet;

use crate::ir::{ArcBlockId, ArcFunction, ArcTerminator};

/// Compute the predecessor list for each block (deduplicated).
///
/// Returns a vector indexed by block index, where each entry is the
/// list of distinct predecessor block indices.
pub(crate) fn compute_predecessors(func: &ArcFunction) -> Vec<Vec<usize>> {
    let num_blocks = func.blocks.len();
    let mut predecessors: Vec<Vec<usize>> = vec![Vec::new(); num_blocks];

    for (block_idx, block) in func.blocks.iter().enumerate() {
        let mut seen = FxHashSet::default();
        for succ_id in block.terminator.successors() {
            let succ_idx = succ_id.index();
            if succ_idx < num_blocks && seen.insert(succ_idx) {
                predecessors[succ_idx].push(block_idx);
            }
        }
    }

    predecessors
}

/// Compute the successor list for each block (deduplicated, terminator order).
pub(crate) fn compute_successors(func: &ArcFunction) -> Vec<Vec<usize>> {
    let num_blocks = func.blocks.len();
    func.blocks
        .iter()
        .map(|block| {
            let mut out: Vec<usize> = Vec::new();
            for succ_id in block.terminator.successors() {
                let succ_idx = succ_id.index();
                if succ_idx < num_blocks && !out.contains(&succ_idx) {
                    out.push(succ_idx);
                }
            }
            out
        })
        .collect()
}

/// Compute a postorder traversal of the CFG starting from the entry block.
///
/// Only visits reachable blocks.
pub(crate) fn compute_postorder(func: &ArcFunction) -> Vec<usize> {
    postorder_from(func.entry.index(), &compute_successors(func))
}

/// Postorder over an arbitrary graph given as successor lists.
///
/// Uses an iterative DFS with an explicit stack to avoid recursion depth
/// issues on deeply nested CFGs. Successors are visited in list order.
pub(crate) fn postorder_from(entry: usize, succs: &[Vec<usize>]) -> Vec<usize> {
    let num_nodes = succs.len();
    let mut visited = vec![false; num_nodes];
    let mut postorder = Vec::with_capacity(num_nodes);
    if entry >= num_nodes {
        return postorder;
    }

    // Stack entries: (node, index of the next successor to visit).
    let mut stack: Vec<(usize, usize)> = vec![(entry, 0)];
    visited[entry] = true;

    while let Some(&mut (node, ref mut next)) = stack.last_mut() {
        if let Some(&succ) = succs[node].get(*next) {
            *next += 1;
            if succ < num_nodes && !visited[succ] {
                visited[succ] = true;
                stack.push((succ, 0));
            }
        } else {
            postorder.push(node);
            stack.pop();
        }
    }

    postorder
}

/// Immediate dominators over a generic graph (Cooper-Harvey-Kennedy).
///
/// `idom[entry] == Some(entry)`; unreachable nodes stay `None`.
fn compute_idoms(entry: usize, succs: &[Vec<usize>], preds: &[Vec<usize>]) -> Vec<Option<usize>> {
    let n = succs.len();
    let mut idom: Vec<Option<usize>> = vec![None; n];
    if entry >= n {
        return idom;
    }

    let mut rpo = postorder_from(entry, succs);
    rpo.reverse();

    // Map node → RPO position for O(1) lookup
    let mut rpo_pos = vec![usize::MAX; n];
    for (pos, &node) in rpo.iter().enumerate() {
        rpo_pos[node] = pos;
    }

    idom[entry] = Some(entry);

    let mut changed = true;
    while changed {
        changed = false;
        for &node in &rpo[1..] {
            let mut new_idom: Option<usize> = None;
            for &pred in &preds[node] {
                if idom[pred].is_none() {
                    continue;
                }
                new_idom = Some(match new_idom {
                    None => pred,
                    Some(cur) => intersect(pred, cur, &idom, &rpo_pos),
                });
            }

            if new_idom.is_some() && idom[node] != new_idom {
                idom[node] = new_idom;
                changed = true;
            }
        }
    }

    idom
}

/// CHK intersect: walk two fingers upward until they meet.
///
/// Both `a` and `b` must be reachable from the entry, so their idom chain
/// always leads to the entry node.
fn intersect(mut a: usize, mut b: usize, idom: &[Option<usize>], rpo_pos: &[usize]) -> usize {
    while a != b {
        while rpo_pos[a] > rpo_pos[b] {
            let Some(next) = idom[a] else {
                debug_assert!(false, "intersect: broken idom chain at {a}");
                return a;
            };
            a = next;
        }
        while rpo_pos[b] > rpo_pos[a] {
            let Some(next) = idom[b] else {
                debug_assert!(false, "intersect: broken idom chain at {b}");
                return b;
            };
            b = next;
        }
    }
    a
}

/// Walk the idom chain from `b` looking for `a`.
fn chain_contains(idom: &[Option<usize>], a: usize, b: usize) -> bool {
    let Some(mut current) = (b < idom.len()).then_some(b) else {
        return false;
    };
    loop {
        if current == a {
            return true;
        }
        match idom[current] {
            Some(dom) if dom != current => current = dom,
            _ => return false,
        }
    }
}

/// Dominator tree for ARC IR functions.
///
/// Uses the Cooper-Harvey-Kennedy iterative algorithm, which is simpler than
/// Lengauer-Tarjan and fast enough for typical function sizes. The algorithm
/// works on reverse postorder and converges in O(n * d) where d is the loop
/// nesting depth.
///
/// Reference: Cooper, Harvey, Kennedy: "A Simple, Fast Dominance Algorithm" (2001)
pub struct DominatorTree {
    /// Immediate dominator for each block, indexed by block index.
    /// `idom[entry] == Some(entry)`; unreachable blocks are `None`.
    idom: Vec<Option<usize>>,
}

impl DominatorTree {
    /// Build the dominator tree for a function.
    pub fn build(func: &ArcFunction) -> Self {
        let succs = compute_successors(func);
        let preds = compute_predecessors(func);
        Self {
            idom: compute_idoms(func.entry.index(), &succs, &preds),
        }
    }

    /// Does block `a` dominate block `b`?
    ///
    /// A block dominates itself. Unreachable blocks are dominated by nothing
    /// but themselves.
    pub fn dominates(&self, a: ArcBlockId, b: ArcBlockId) -> bool {
        a == b || chain_contains(&self.idom, a.index(), b.index())
    }

    /// Immediate dominator of `b`, or `None` for the entry and unreachable blocks.
    pub fn immediate_dominator(&self, b: ArcBlockId) -> Option<ArcBlockId> {
        match self.idom.get(b.index()).copied().flatten() {
            Some(dom) if dom != b.index() => Some(ArcBlockId::from_index(dom)),
            _ => None,
        }
    }

    /// Returns `true` if `b` is reachable from the entry block.
    pub fn is_reachable(&self, b: ArcBlockId) -> bool {
        self.idom.get(b.index()).is_some_and(Option::is_some)
    }
}

/// Post-dominator tree for ARC IR functions.
///
/// Built with the same CHK iteration on the reversed CFG. A virtual exit
/// node (index `num_blocks`) is the root; every block ending in `Return` or
/// `Unreachable` flows into it. Blocks that cannot reach any exit (infinite
/// loops) are post-dominated by nothing but themselves.
pub struct PostDominatorTree {
    /// Immediate post-dominator per block; the virtual exit is the last slot.
    ipdom: Vec<Option<usize>>,
}

impl PostDominatorTree {
    /// Build the post-dominator tree for a function.
    pub fn build(func: &ArcFunction) -> Self {
        let num_blocks = func.blocks.len();
        let exit = num_blocks;

        // Reverse graph: successors are CFG predecessors.
        let mut rsuccs = compute_predecessors(func);
        let mut rpreds = compute_successors(func);
        let mut exit_succs = Vec::new();
        for (idx, block) in func.blocks.iter().enumerate() {
            if matches!(
                block.terminator,
                ArcTerminator::Return { .. } | ArcTerminator::Unreachable
            ) {
                exit_succs.push(idx);
                rpreds[idx].push(exit);
            }
        }
        rsuccs.push(exit_succs);
        rpreds.push(Vec::new());

        Self {
            ipdom: compute_idoms(exit, &rsuccs, &rpreds),
        }
    }

    /// Does block `a` post-dominate block `b`?
    ///
    /// A block post-dominates itself.
    pub fn post_dominates(&self, a: ArcBlockId, b: ArcBlockId) -> bool {
        a == b || chain_contains(&self.ipdom, a.index(), b.index())
    }

    /// Immediate post-dominator of `b`, or `None` when it is the virtual exit.
    pub fn immediate_post_dominator(&self, b: ArcBlockId) -> Option<ArcBlockId> {
        let exit = self.ipdom.len() - 1;
        match self.ipdom.get(b.index()).copied().flatten() {
            Some(pdom) if pdom != b.index() && pdom != exit => Some(ArcBlockId::from_index(pdom)),
            _ => None,
        }
    }
}
