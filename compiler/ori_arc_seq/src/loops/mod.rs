//! Loop regions and loop canonicalization.
//!
//! The sequence optimizer reasons about loops hierarchically: each natural
//! loop becomes a [`LoopRegion`] in an arena owned by [`LoopRegions`], with
//! region 0 standing for the whole function. Parent/child navigation goes
//! through [`RegionId`] handles so summaries can be recomputed without
//! aliasing the tree.
//!
//! # Algorithm
//!
//! 1. Back edges are CFG edges `t → h` where `h` dominates `t`.
//! 2. The natural loop of header `h` is `h` plus every block that reaches a
//!    latch backward without passing `h`. Loops sharing a header merge.
//! 3. Loops nest by containment; the innermost region of each block is the
//!    smallest loop containing it.
//!
//! [`canonicalize_loops`] then rewrites the CFG so that every loop has a
//! dedicated preheader and dedicated exit blocks, which loop hoisting needs
//! as insertion points.
//!
//! # References
//!
//! - Aho, Lam, Sethi, Ullman: "Compilers" §9.6 (natural loops)
//! - LLVM `LoopSimplify` (preheader and dedicated-exit insertion)

use rustc_hash::FxHashSet;

use crate::graph::{compute_predecessors, compute_successors, DominatorTree};
use crate::ir::{ArcBlock, ArcBlockId, ArcFunction, ArcTerminator};

// ── Region handles ──────────────────────────────────────────────────

/// Index of a region in a [`LoopRegions`] arena.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct RegionId(u32);

impl RegionId {
    /// The region covering the whole function.
    pub const FUNCTION: RegionId = RegionId(0);

    #[inline]
    pub fn raw(self) -> u32 {
        self.0
    }

    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }

    fn from_index(idx: usize) -> Self {
        Self(u32::try_from(idx).unwrap_or_else(|_| panic!("region index exceeds u32::MAX")))
    }
}

/// One node of the loop hierarchy.
#[derive(Clone, Debug)]
pub struct LoopRegion {
    pub id: RegionId,
    /// Enclosing region; `None` only for the function region.
    pub parent: Option<RegionId>,
    /// Directly nested loops, ordered by header index.
    pub children: Vec<RegionId>,
    /// Nesting depth: 0 for the function, 1 for outermost loops.
    pub depth: u32,
    /// Loop header (the function entry for the function region).
    pub header: ArcBlockId,
    /// Every block of the region, nested loops included, sorted.
    pub blocks: Vec<ArcBlockId>,
    /// Sole outside predecessor of the header whose only successor is the header.
    pub preheader: Option<ArcBlockId>,
    /// Sources of back edges to the header.
    pub latches: Vec<ArcBlockId>,
    /// Blocks inside the loop with a successor outside it.
    pub exiting: Vec<ArcBlockId>,
    /// Blocks outside the loop with a predecessor inside it.
    pub exits: Vec<ArcBlockId>,
    block_set: FxHashSet<ArcBlockId>,
}

impl LoopRegion {
    /// Returns `true` if `block` belongs to this region (nested loops included).
    #[inline]
    pub fn contains(&self, block: ArcBlockId) -> bool {
        self.block_set.contains(&block)
    }

    /// Returns `true` for the region standing for the whole function.
    #[inline]
    pub fn is_function(&self) -> bool {
        self.parent.is_none()
    }
}

/// Arena of loop regions for one function.
pub struct LoopRegions {
    regions: Vec<LoopRegion>,
    /// Innermost region of each block, indexed by block index.
    innermost: Vec<RegionId>,
    /// Predecessor lists of the analyzed CFG.
    preds: Vec<Vec<usize>>,
}

impl LoopRegions {
    /// Discover natural loops and build the region tree.
    pub fn build(func: &ArcFunction, dom: &DominatorTree) -> Self {
        let num_blocks = func.blocks.len();
        let preds = compute_predecessors(func);
        let succs = compute_successors(func);

        // Back edges grouped by header, in header order.
        let mut latches_by_header: Vec<Vec<usize>> = vec![Vec::new(); num_blocks];
        for (tail, tail_succs) in succs.iter().enumerate() {
            if !dom.is_reachable(ArcBlockId::from_index(tail)) {
                continue;
            }
            for &head in tail_succs {
                if dom.dominates(ArcBlockId::from_index(head), ArcBlockId::from_index(tail)) {
                    latches_by_header[head].push(tail);
                }
            }
        }

        // Natural loop bodies.
        let mut loops: Vec<(usize, Vec<usize>, FxHashSet<usize>)> = Vec::new();
        for (header, latches) in latches_by_header.iter().enumerate() {
            if latches.is_empty() {
                continue;
            }
            let header_id = ArcBlockId::from_index(header);
            let mut body: FxHashSet<usize> = FxHashSet::default();
            body.insert(header);
            let mut worklist: Vec<usize> = latches.clone();
            while let Some(n) = worklist.pop() {
                if !body.insert(n) {
                    continue;
                }
                for &p in &preds[n] {
                    if !body.contains(&p) && dom.dominates(header_id, ArcBlockId::from_index(p)) {
                        worklist.push(p);
                    }
                }
            }
            loops.push((header, latches.clone(), body));
        }

        // Region 0 is the function; loops follow in header order.
        let all_blocks: Vec<ArcBlockId> = (0..num_blocks).map(ArcBlockId::from_index).collect();
        let mut regions = vec![LoopRegion {
            id: RegionId::FUNCTION,
            parent: None,
            children: Vec::new(),
            depth: 0,
            header: func.entry,
            block_set: all_blocks.iter().copied().collect(),
            blocks: all_blocks,
            preheader: None,
            latches: Vec::new(),
            exiting: Vec::new(),
            exits: Vec::new(),
        }];

        for (header, latches, body) in &loops {
            let id = RegionId::from_index(regions.len());
            let mut blocks: Vec<ArcBlockId> =
                body.iter().map(|&i| ArcBlockId::from_index(i)).collect();
            blocks.sort_unstable();

            let mut exiting = Vec::new();
            let mut exits = Vec::new();
            for &blk in &blocks {
                let mut leaves = false;
                for &s in &succs[blk.index()] {
                    if !body.contains(&s) {
                        leaves = true;
                        let exit = ArcBlockId::from_index(s);
                        if !exits.contains(&exit) {
                            exits.push(exit);
                        }
                    }
                }
                if leaves {
                    exiting.push(blk);
                }
            }
            exits.sort_unstable();

            let outside: Vec<usize> = preds[*header]
                .iter()
                .copied()
                .filter(|p| !body.contains(p))
                .collect();
            let preheader = match outside.as_slice() {
                [p] if succs[*p].as_slice() == [*header] => Some(ArcBlockId::from_index(*p)),
                _ => None,
            };

            regions.push(LoopRegion {
                id,
                parent: None,
                children: Vec::new(),
                depth: 0,
                header: ArcBlockId::from_index(*header),
                block_set: blocks.iter().copied().collect(),
                blocks,
                preheader,
                latches: latches.iter().map(|&l| ArcBlockId::from_index(l)).collect(),
                exiting,
                exits,
            });
        }

        // Nesting: the parent of a loop is the smallest other loop holding its header.
        for idx in 1..regions.len() {
            let header = regions[idx].header;
            let parent = (1..regions.len())
                .filter(|&other| other != idx && regions[other].contains(header))
                .min_by_key(|&other| regions[other].blocks.len())
                .map_or(RegionId::FUNCTION, RegionId::from_index);
            regions[idx].parent = Some(parent);
            regions[parent.index()].children.push(RegionId::from_index(idx));
        }

        // Depths, parents first: a parent always has more blocks than its child.
        let mut by_size: Vec<usize> = (1..regions.len()).collect();
        by_size.sort_by_key(|&idx| std::cmp::Reverse(regions[idx].blocks.len()));
        for idx in by_size {
            let parent_depth = regions[idx]
                .parent
                .map_or(0, |p| regions[p.index()].depth);
            regions[idx].depth = parent_depth + 1;
        }

        let mut innermost = vec![RegionId::FUNCTION; num_blocks];
        for (blk, slot) in innermost.iter_mut().enumerate() {
            let block_id = ArcBlockId::from_index(blk);
            if let Some(best) = regions[1..]
                .iter()
                .filter(|r| r.contains(block_id))
                .min_by_key(|r| r.blocks.len())
            {
                *slot = best.id;
            }
        }

        Self {
            regions,
            innermost,
            preds,
        }
    }

    /// Look up a region.
    #[inline]
    pub fn get(&self, id: RegionId) -> &LoopRegion {
        &self.regions[id.index()]
    }

    /// Number of regions, the function region included.
    pub fn len(&self) -> usize {
        self.regions.len()
    }

    /// Always `false`: the function region is always present.
    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }

    /// Innermost region containing `block`.
    pub fn innermost(&self, block: ArcBlockId) -> RegionId {
        self.innermost
            .get(block.index())
            .copied()
            .unwrap_or(RegionId::FUNCTION)
    }

    /// The child of `region` that contains `block`, if `block` lies in a
    /// nested loop rather than directly in `region`.
    pub fn child_containing(&self, region: RegionId, block: ArcBlockId) -> Option<RegionId> {
        let mut current = self.innermost(block);
        while current != region {
            let parent = self.get(current).parent?;
            if parent == region {
                return Some(current);
            }
            current = parent;
        }
        None
    }

    /// Loop regions ordered so that every child precedes its parent.
    /// The function region is not included.
    pub fn bottom_up(&self) -> Vec<RegionId> {
        let mut order = Vec::with_capacity(self.regions.len());
        let mut stack: Vec<(RegionId, usize)> = vec![(RegionId::FUNCTION, 0)];
        while let Some(&mut (id, ref mut next)) = stack.last_mut() {
            if let Some(&child) = self.get(id).children.get(*next) {
                *next += 1;
                stack.push((child, 0));
            } else {
                stack.pop();
                if id != RegionId::FUNCTION {
                    order.push(id);
                }
            }
        }
        order
    }

    /// Returns `true` if every exit block of `id` has only predecessors
    /// inside the loop.
    pub fn has_dedicated_exits(&self, id: RegionId) -> bool {
        let region = self.get(id);
        region.exits.iter().all(|exit| {
            self.preds[exit.index()]
                .iter()
                .all(|&p| region.contains(ArcBlockId::from_index(p)))
        })
    }

    /// Returns `true` if `id` is a loop with a preheader and dedicated exits.
    pub fn is_canonical(&self, id: RegionId) -> bool {
        let region = self.get(id);
        region.is_function() || (region.preheader.is_some() && self.has_dedicated_exits(id))
    }
}

// ── Canonicalization ────────────────────────────────────────────────

/// Give every loop a dedicated preheader and dedicated exit blocks.
///
/// Inserted blocks are empty trampolines (`Jump` to the original target).
/// Returns `true` if the CFG changed, in which case every CFG-derived
/// analysis of `func` is stale.
pub fn canonicalize_loops(func: &mut ArcFunction) -> bool {
    let limit = 4 * func.blocks.len() + 8;
    let mut changed = false;
    for _ in 0..limit {
        if !canonicalize_one(func) {
            return changed;
        }
        changed = true;
    }
    tracing::debug!(
        function = func.name.as_str(),
        "loop canonicalization did not converge"
    );
    changed
}

/// Fix the first non-canonical loop found. Returns `false` if none remain.
fn canonicalize_one(func: &mut ArcFunction) -> bool {
    let dom = DominatorTree::build(func);
    let regions = LoopRegions::build(func, &dom);

    for idx in 1..regions.len() {
        let region = regions.get(RegionId::from_index(idx));

        if region.preheader.is_none() {
            let outside: Vec<usize> = regions.preds[region.header.index()]
                .iter()
                .copied()
                .filter(|&p| !region.contains(ArcBlockId::from_index(p)))
                .collect();
            let preheader = insert_trampoline(func, region.header, &outside);
            if func.entry == region.header {
                func.entry = preheader;
            }
            tracing::trace!(
                header = region.header.raw(),
                preheader = preheader.raw(),
                "inserted loop preheader"
            );
            return true;
        }

        for &exit in &region.exits {
            let exit_preds = &regions.preds[exit.index()];
            if exit_preds
                .iter()
                .all(|&p| region.contains(ArcBlockId::from_index(p)))
            {
                continue;
            }
            let inside: Vec<usize> = exit_preds
                .iter()
                .copied()
                .filter(|&p| region.contains(ArcBlockId::from_index(p)))
                .collect();
            let dedicated = insert_trampoline(func, exit, &inside);
            tracing::trace!(
                header = region.header.raw(),
                exit = exit.raw(),
                dedicated = dedicated.raw(),
                "inserted dedicated loop exit"
            );
            return true;
        }
    }

    false
}

/// Append an empty block jumping to `target` and route the edges from
/// `sources` to `target` through it.
fn insert_trampoline(func: &mut ArcFunction, target: ArcBlockId, sources: &[usize]) -> ArcBlockId {
    let id = func.next_block_id();
    func.push_block(ArcBlock {
        id,
        body: Vec::new(),
        terminator: ArcTerminator::Jump { target },
    });
    for &src in sources {
        func.blocks[src].terminator.redirect(target, id);
    }
    id
}

#[cfg(test)]
mod tests;
