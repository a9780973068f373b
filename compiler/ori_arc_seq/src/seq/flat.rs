//! Flattened view of one region for the pairing dataflow.
//!
//! A region's direct blocks become nodes; each directly nested loop collapses
//! into a single opaque node whose effect on a root comes from its summary.
//! Edges leaving the region and retreating edges are cut, so the remaining
//! graph is acyclic and one pass in reverse postorder visits every node after
//! all of its predecessors.
//!
//! A cut edge makes its source *escape*: whatever is pending there continues
//! somewhere the region cannot see. A cut retreating edge also marks its
//! target, whose incoming state is therefore unknown.
//!
//! The block-only pipeline builds the whole-function view without collapsing
//! anything: loops stay cyclic in the CFG and every back edge is cut.

use rustc_hash::{FxHashMap, FxHashSet};
use smallvec::SmallVec;

use crate::analysis::{Oracles, RcRoot, RootDef};
use crate::graph::postorder_from;
use crate::ir::{ArcBlockId, ArcFunction, ArcInstr, ArcTerminator, CallEffects, ProgramPoint};
use crate::loops::RegionId;

use super::region::{RegionEvaluator, RegionSummary};

// ── Effects ─────────────────────────────────────────────────────────

/// What one operation does to the reference count of a tracked root.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Effect {
    /// Increment of the root itself.
    Inc,
    /// Decrement of the root itself.
    Dec,
    /// Reads the count (uniqueness test on a possibly overlapping value).
    Observe,
    /// May release an object overlapping the root.
    MayDecrement,
    /// Reads the object without touching its count.
    Use,
    None,
}

impl Effect {
    /// Effects no increment or decrement of the root may be moved across.
    pub(crate) fn interferes(self) -> bool {
        matches!(self, Effect::Observe | Effect::MayDecrement)
    }
}

pub(crate) fn instr_effect(instr: &ArcInstr, root: RcRoot, oracles: &Oracles<'_>) -> Effect {
    let same_root = |var| oracles.identity.root_of(var) == Some(root);
    let aliases = |var| oracles.alias.may_alias(var, root.var());
    let use_if = |hit: bool| if hit { Effect::Use } else { Effect::None };

    match instr {
        ArcInstr::RcInc { var, .. } if same_root(*var) => Effect::Inc,
        ArcInstr::RcDec { var, .. } if same_root(*var) => Effect::Dec,
        ArcInstr::RcInc { var, .. } => use_if(aliases(*var)),
        ArcInstr::RcDec { var, .. } => {
            if aliases(*var) {
                Effect::MayDecrement
            } else {
                Effect::None
            }
        }
        ArcInstr::IsShared { var, .. } => {
            if aliases(*var) {
                Effect::Observe
            } else {
                Effect::None
            }
        }
        ArcInstr::Apply {
            effects: CallEffects::MayRelease,
            ..
        } => Effect::MayDecrement,
        ArcInstr::Apply { args, .. } | ArcInstr::Construct { args, .. } => {
            use_if(args.iter().any(|&a| aliases(a)))
        }
        ArcInstr::Let { .. } | ArcInstr::Cast { .. } | ArcInstr::Project { .. } => Effect::None,
    }
}

pub(crate) fn terminator_effect(term: &ArcTerminator, root: RcRoot, oracles: &Oracles<'_>) -> Effect {
    match term {
        ArcTerminator::Return { value } if oracles.alias.may_alias(*value, root.var()) => {
            Effect::Use
        }
        _ => Effect::None,
    }
}

/// Instructions a decrement may sink past: they neither read counts nor
/// call out.
pub(crate) fn is_silent(instr: &ArcInstr) -> bool {
    matches!(
        instr,
        ArcInstr::Let { .. }
            | ArcInstr::Cast { .. }
            | ArcInstr::Project { .. }
            | ArcInstr::Construct { .. }
    )
}

pub(crate) fn is_silent_terminator(term: &ArcTerminator) -> bool {
    matches!(
        term,
        ArcTerminator::Jump { .. } | ArcTerminator::Branch { .. } | ArcTerminator::Switch { .. }
    )
}

/// An exit after which `root` needs no balancing: every path from it traps,
/// and nothing on the way counts, observes or releases the root.
pub(crate) fn is_quiet_exit(
    func: &ArcFunction,
    oracles: &Oracles<'_>,
    exit: ArcBlockId,
    root: RcRoot,
) -> bool {
    if !oracles.termination.is_terminating(exit) {
        return false;
    }
    let mut seen: FxHashSet<ArcBlockId> = FxHashSet::default();
    let mut stack = vec![exit];
    while let Some(block) = stack.pop() {
        if !seen.insert(block) {
            continue;
        }
        let Some(bl) = func.blocks.get(block.index()) else {
            return false;
        };
        let loud = bl.body.iter().any(|instr| {
            !matches!(
                instr_effect(instr, root, oracles),
                Effect::None | Effect::Use
            )
        });
        if loud {
            return false;
        }
        stack.extend(bl.terminator.successors());
    }
    true
}

/// Is `root`'s defining variable available immediately before `at`?
///
/// Same-block definitions are located in the current body: splices shift
/// instruction indices, so the oracle's recorded index may be stale.
pub(crate) fn root_defined_before(
    func: &ArcFunction,
    oracles: &Oracles<'_>,
    root: RcRoot,
    at: ProgramPoint,
) -> bool {
    match oracles.identity.definition(root) {
        None => false,
        Some(RootDef::Param) => true,
        Some(RootDef::At(def)) if def.block == at.block => func.blocks[at.block.index()].body
            [..at.index]
            .iter()
            .any(|instr| instr.defined_var() == Some(root.var())),
        Some(RootDef::At(def)) => oracles.dominance.dominates(def.block, at.block),
    }
}

// ── Flat graph ──────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum NodeKind {
    Block(ArcBlockId),
    /// A directly nested loop, collapsed.
    Loop(RegionId),
}

#[derive(Clone, Debug)]
pub(crate) struct FlatNode {
    pub kind: NodeKind,
    /// Forward predecessors (cut edges excluded).
    pub preds: SmallVec<[usize; 4]>,
    /// Forward successors (cut edges excluded).
    pub succs: SmallVec<[usize; 4]>,
    /// Blocks outside the region this node branches to.
    pub exits: SmallVec<[ArcBlockId; 2]>,
    /// Ends in `Return`.
    pub returns: bool,
    /// Source of a retreating edge.
    pub latch: bool,
    /// Target of a retreating edge.
    pub retreating_pred: bool,
    pub terminating: bool,
}

impl FlatNode {
    /// Block id of a block node.
    pub(crate) fn block(&self) -> Option<ArcBlockId> {
        match self.kind {
            NodeKind::Block(b) => Some(b),
            NodeKind::Loop(_) => None,
        }
    }
}

/// Acyclic node graph of one region.
pub(crate) struct FlatRegion {
    nodes: Vec<FlatNode>,
    rpo: Vec<usize>,
    rpo_pos: Vec<usize>,
    entry: usize,
    node_of_block: FxHashMap<ArcBlockId, usize>,
    loops: FxHashMap<RegionId, RegionSummary>,
}

impl FlatRegion {
    /// Every block of the function as its own node; loops stay uncollapsed.
    pub(crate) fn whole_function(func: &ArcFunction, oracles: &Oracles<'_>) -> Self {
        Self::build(func, oracles, RegionId::FUNCTION, None)
    }

    /// Direct blocks of `region`, with each child loop collapsed to one node
    /// described by its summary in `evaluator`.
    pub(crate) fn for_region(
        func: &ArcFunction,
        oracles: &Oracles<'_>,
        region: RegionId,
        evaluator: &RegionEvaluator,
    ) -> Self {
        Self::build(func, oracles, region, Some(evaluator))
    }

    fn build(
        func: &ArcFunction,
        oracles: &Oracles<'_>,
        region: RegionId,
        evaluator: Option<&RegionEvaluator>,
    ) -> Self {
        let regions = oracles.regions;
        let info = regions.get(region);

        let mut nodes: Vec<FlatNode> = Vec::new();
        let mut node_of_block: FxHashMap<ArcBlockId, usize> = FxHashMap::default();
        let mut node_of_loop: FxHashMap<RegionId, usize> = FxHashMap::default();
        let new_node = |kind, terminating| FlatNode {
            kind,
            preds: SmallVec::new(),
            succs: SmallVec::new(),
            exits: SmallVec::new(),
            returns: false,
            latch: false,
            retreating_pred: false,
            terminating,
        };

        for &block in &info.blocks {
            let child = evaluator.and_then(|_| regions.child_containing(region, block));
            let idx = match child {
                Some(child) => *node_of_loop.entry(child).or_insert_with(|| {
                    let header = regions.get(child).header;
                    nodes.push(new_node(
                        NodeKind::Loop(child),
                        oracles.termination.is_terminating(header),
                    ));
                    nodes.len() - 1
                }),
                None => {
                    nodes.push(new_node(
                        NodeKind::Block(block),
                        oracles.termination.is_terminating(block),
                    ));
                    nodes.len() - 1
                }
            };
            node_of_block.insert(block, idx);
        }

        let mut loops = FxHashMap::default();
        if let Some(evaluator) = evaluator {
            for &child in node_of_loop.keys() {
                let summary = evaluator
                    .summary(child)
                    .cloned()
                    .unwrap_or_else(RegionSummary::opaque);
                loops.insert(child, summary);
            }
        }

        // Induced edges. Edges inside a collapsed loop disappear.
        let mut succs: Vec<SmallVec<[usize; 4]>> = vec![SmallVec::new(); nodes.len()];
        for &block in &info.blocks {
            let Some(&from) = node_of_block.get(&block) else {
                continue;
            };
            let terminator = &func.blocks[block.index()].terminator;
            if matches!(terminator, ArcTerminator::Return { .. }) {
                nodes[from].returns = true;
            }
            for target in terminator.successors() {
                match node_of_block.get(&target) {
                    None => {
                        if !nodes[from].exits.contains(&target) {
                            nodes[from].exits.push(target);
                        }
                    }
                    Some(&to) => {
                        let internal = to == from && matches!(nodes[from].kind, NodeKind::Loop(_));
                        if !internal && !succs[from].contains(&to) {
                            succs[from].push(to);
                        }
                    }
                }
            }
        }

        let entry = node_of_block.get(&info.header).copied().unwrap_or(0);
        let succ_lists: Vec<Vec<usize>> = succs.iter().map(|s| s.to_vec()).collect();
        let mut rpo = postorder_from(entry, &succ_lists);
        rpo.reverse();
        let mut rpo_pos = vec![usize::MAX; nodes.len()];
        for (pos, &n) in rpo.iter().enumerate() {
            rpo_pos[n] = pos;
        }

        // Cut retreating edges; record forward predecessors.
        for &n in &rpo {
            for &s in &succs[n] {
                if rpo_pos[s] <= rpo_pos[n] {
                    nodes[n].latch = true;
                    nodes[s].retreating_pred = true;
                } else {
                    nodes[n].succs.push(s);
                    nodes[s].preds.push(n);
                }
            }
        }

        Self {
            nodes,
            rpo,
            rpo_pos,
            entry,
            node_of_block,
            loops,
        }
    }

    /// Reached nodes in reverse postorder.
    pub(crate) fn rpo(&self) -> &[usize] {
        &self.rpo
    }

    pub(crate) fn node(&self, idx: usize) -> &FlatNode {
        &self.nodes[idx]
    }

    pub(crate) fn len(&self) -> usize {
        self.nodes.len()
    }

    pub(crate) fn entry(&self) -> usize {
        self.entry
    }

    /// Node holding `block`, if the block belongs to the region.
    pub(crate) fn node_of_block(&self, block: ArcBlockId) -> Option<usize> {
        self.node_of_block.get(&block).copied()
    }

    pub(crate) fn is_reached(&self, idx: usize) -> bool {
        self.rpo_pos.get(idx).is_some_and(|&pos| pos != usize::MAX)
    }

    /// Summary of a collapsed child loop.
    pub(crate) fn loop_summary(&self, child: RegionId) -> Option<&RegionSummary> {
        self.loops.get(&child)
    }

    /// Does control leave node `idx` somewhere `root` still matters?
    ///
    /// Returns and retreating edges always count; exits into quiet
    /// terminating code do not.
    pub(crate) fn live_escape(
        &self,
        func: &ArcFunction,
        idx: usize,
        root: RcRoot,
        oracles: &Oracles<'_>,
    ) -> bool {
        let node = &self.nodes[idx];
        node.returns
            || node.latch
            || node
                .exits
                .iter()
                .any(|&exit| !is_quiet_exit(func, oracles, exit, root))
    }

    /// Non-trivial effects of node `idx` on `root`, in program order.
    ///
    /// The terminator of a block sits at index `body.len()`. A collapsed loop
    /// contributes one effect, located at the top of its header.
    pub(crate) fn effects(
        &self,
        func: &ArcFunction,
        idx: usize,
        root: RcRoot,
        oracles: &Oracles<'_>,
    ) -> SmallVec<[(ProgramPoint, Effect); 8]> {
        let mut out = SmallVec::new();
        match self.nodes[idx].kind {
            NodeKind::Block(block) => {
                let bl = &func.blocks[block.index()];
                for (i, instr) in bl.body.iter().enumerate() {
                    let effect = instr_effect(instr, root, oracles);
                    if effect != Effect::None {
                        out.push((ProgramPoint::new(block, i), effect));
                    }
                }
                let effect = terminator_effect(&bl.terminator, root, oracles);
                if effect != Effect::None {
                    out.push((ProgramPoint::new(block, bl.body.len()), effect));
                }
            }
            NodeKind::Loop(child) => {
                let effect = self
                    .loop_summary(child)
                    .map_or(Effect::MayDecrement, |s| s.effect_on(root, oracles));
                if effect != Effect::None {
                    let header = oracles.regions.get(child).header;
                    out.push((ProgramPoint::new(header, 0), effect));
                }
            }
        }
        out
    }
}
