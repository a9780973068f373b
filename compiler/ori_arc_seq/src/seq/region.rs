//! Loop summaries and loop hoisting.
//!
//! [`RegionEvaluator`] condenses each loop into a [`RegionSummary`]: which
//! roots the loop counts, whether those operations cancel out on every trip,
//! and which values the loop reads, observes or may release. The parent
//! region then treats the loop as one opaque node through
//! [`RegionSummary::effect_on`].
//!
//! When a loop's operations on a root cancel out on every trip and nothing
//! in the loop interferes with the root, the parent hoists the sequence: one
//! increment at the end of the preheader, one decrement at the head of each
//! exit, and no operation on the root left inside the loop.
//!
//! Summaries are cached per region and dropped when a splice touches one of
//! the region's blocks.

use rustc_hash::{FxHashMap, FxHashSet};

use crate::analysis::{Oracles, RcRoot};
use crate::ir::{ArcBlockId, ArcFunction, ArcInstr, ArcTerminator, ArcVarId, CallEffects, ProgramPoint};
use crate::loops::RegionId;

use super::flat::{is_quiet_exit, root_defined_before, Effect, FlatRegion, NodeKind};
use super::matching::MatchingSet;

// ── Summaries ───────────────────────────────────────────────────────

/// Net effect of one trip through a loop on a root's count.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Shape {
    /// Every way around or out of the loop nets to zero.
    SelfCancelling,
    /// Every way nets to the same non-zero amount.
    Unbalanced,
    Unknown,
}

/// Operations of one loop on one root.
#[derive(Clone, Debug)]
pub(crate) struct RootSummary {
    pub root: RcRoot,
    /// Every increment and decrement of the root, nested loops included.
    pub points: Vec<ProgramPoint>,
    pub shape: Shape,
    /// On every path, increments and decrements strictly alternate starting
    /// with an increment.
    pub alternating: bool,
    /// Some operation sits in a nested loop.
    pub nested: bool,
}

/// Condensed view of a loop for its parent region.
#[derive(Clone, Debug, Default)]
pub(crate) struct RegionSummary {
    /// Sorted by root.
    pub roots: Vec<RootSummary>,
    /// Values read, increment targets included.
    pub used: Vec<ArcVarId>,
    /// Values whose count is observed.
    pub observed: Vec<ArcVarId>,
    /// Decrement targets.
    pub released: Vec<ArcVarId>,
    /// Contains a call that may release anything.
    pub may_release: bool,
    /// Contains a `Return`.
    pub returns: bool,
}

impl RegionSummary {
    /// Summary of a loop about which nothing is known.
    pub(crate) fn opaque() -> Self {
        Self {
            may_release: true,
            ..Self::default()
        }
    }

    pub(crate) fn root(&self, root: RcRoot) -> Option<&RootSummary> {
        self.roots
            .binary_search_by_key(&root, |rs| rs.root)
            .ok()
            .map(|idx| &self.roots[idx])
    }

    /// Can the loop observe or release `root` other than through the
    /// root's own operations?
    fn interference(&self, root: RcRoot, oracles: &Oracles<'_>) -> Option<Effect> {
        let aliases = |var: &ArcVarId| oracles.alias.may_alias(*var, root.var());
        if self.may_release {
            return Some(Effect::MayDecrement);
        }
        if self.observed.iter().any(aliases) {
            return Some(Effect::Observe);
        }
        let foreign_release = self
            .released
            .iter()
            .any(|var| oracles.identity.root_of(*var) != Some(root) && aliases(var));
        foreign_release.then_some(Effect::MayDecrement)
    }

    /// Effect of running the whole loop, any number of trips, on `root`.
    pub(crate) fn effect_on(&self, root: RcRoot, oracles: &Oracles<'_>) -> Effect {
        if let Some(effect) = self.interference(root, oracles) {
            return effect;
        }
        match self.root(root) {
            Some(rs) if rs.shape == Shape::SelfCancelling => return Effect::Use,
            Some(_) => return Effect::MayDecrement,
            None => {}
        }
        if self
            .used
            .iter()
            .any(|&var| oracles.alias.may_alias(var, root.var()))
        {
            Effect::Use
        } else {
            Effect::None
        }
    }
}

// ── Evaluator ───────────────────────────────────────────────────────

/// Cache of loop summaries for one function.
#[derive(Default)]
pub(crate) struct RegionEvaluator {
    cache: FxHashMap<RegionId, RegionSummary>,
}

impl RegionEvaluator {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn summary(&self, id: RegionId) -> Option<&RegionSummary> {
        self.cache.get(&id)
    }

    /// Summarize loop `id` and, first, every loop nested in it.
    pub(crate) fn summarize(&mut self, func: &ArcFunction, oracles: &Oracles<'_>, id: RegionId) {
        if id == RegionId::FUNCTION || self.cache.contains_key(&id) {
            return;
        }
        for &child in &oracles.regions.get(id).children {
            self.summarize(func, oracles, child);
        }
        let summary = self.compute(func, oracles, id);
        tracing::trace!(
            region = id.raw(),
            roots = summary.roots.len(),
            may_release = summary.may_release,
            "summarized loop"
        );
        self.cache.insert(id, summary);
    }

    /// Summarize every direct child of `region`.
    pub(crate) fn summarize_children(
        &mut self,
        func: &ArcFunction,
        oracles: &Oracles<'_>,
        region: RegionId,
    ) {
        for &child in &oracles.regions.get(region).children {
            self.summarize(func, oracles, child);
        }
    }

    /// Drop the summary of every loop containing one of `touched`.
    ///
    /// Trapping code is read through exit quietness by any loop that can
    /// reach it, so touching it drops every summary.
    pub(crate) fn invalidate(&mut self, oracles: &Oracles<'_>, touched: &FxHashSet<ArcBlockId>) {
        if touched.iter().any(|&b| oracles.termination.is_terminating(b)) {
            self.cache.clear();
            return;
        }
        for &block in touched {
            let mut current = Some(oracles.regions.innermost(block));
            while let Some(id) = current {
                self.cache.remove(&id);
                current = oracles.regions.get(id).parent;
            }
        }
    }

    fn compute(&self, func: &ArcFunction, oracles: &Oracles<'_>, id: RegionId) -> RegionSummary {
        let region = oracles.regions.get(id);
        let mut used: FxHashSet<ArcVarId> = FxHashSet::default();
        let mut observed: FxHashSet<ArcVarId> = FxHashSet::default();
        let mut released: FxHashSet<ArcVarId> = FxHashSet::default();
        let mut points: FxHashMap<RcRoot, Vec<ProgramPoint>> = FxHashMap::default();
        let mut may_release = false;
        let mut returns = false;

        for &block in &region.blocks {
            let bl = &func.blocks[block.index()];
            for (idx, instr) in bl.body.iter().enumerate() {
                let at = ProgramPoint::new(block, idx);
                match instr {
                    ArcInstr::RcInc { var, .. } => {
                        used.insert(*var);
                        if let Some(root) = oracles.identity.root_of(*var) {
                            points.entry(root).or_default().push(at);
                        }
                    }
                    ArcInstr::RcDec { var, .. } => {
                        released.insert(*var);
                        if let Some(root) = oracles.identity.root_of(*var) {
                            points.entry(root).or_default().push(at);
                        }
                    }
                    ArcInstr::IsShared { var, .. } => {
                        observed.insert(*var);
                    }
                    ArcInstr::Apply {
                        args,
                        effects: CallEffects::MayRelease,
                        ..
                    } => {
                        may_release = true;
                        used.extend(args.iter().copied());
                    }
                    _ => used.extend(instr.used_vars()),
                }
            }
            used.extend(bl.terminator.used_vars());
            returns |= matches!(bl.terminator, ArcTerminator::Return { .. });
        }

        let flat = FlatRegion::for_region(func, oracles, id, self);
        let mut roots: Vec<RootSummary> = points
            .into_iter()
            .map(|(root, mut points)| {
                points.sort_unstable();
                let nested = points
                    .iter()
                    .any(|p| oracles.regions.child_containing(id, p.block).is_some());
                let (shape, alternating) = trip_shape(func, oracles, &flat, root);
                RootSummary {
                    root,
                    points,
                    shape,
                    alternating,
                    nested,
                }
            })
            .collect();
        roots.sort_unstable_by_key(|rs| rs.root);

        let sorted = |set: FxHashSet<ArcVarId>| {
            let mut list: Vec<ArcVarId> = set.into_iter().collect();
            list.sort_unstable();
            list
        };
        RegionSummary {
            roots,
            used: sorted(used),
            observed: sorted(observed),
            released: sorted(released),
            may_release,
            returns,
        }
    }

    /// Hoistable sequences of the direct children of `region`.
    ///
    /// Each result is a matching set that removes every operation of one root
    /// from a child loop and re-inserts them around it. Roots in `touched`
    /// were already rewritten this round and are left alone.
    pub(crate) fn hoist_from_children(
        &mut self,
        func: &ArcFunction,
        oracles: &Oracles<'_>,
        region: RegionId,
        touched: &FxHashSet<RcRoot>,
    ) -> Vec<MatchingSet> {
        self.summarize_children(func, oracles, region);
        let mut sets = Vec::new();
        for &child in &oracles.regions.get(region).children {
            let Some(summary) = self.cache.get(&child) else {
                continue;
            };
            for rs in &summary.roots {
                if touched.contains(&rs.root) {
                    continue;
                }
                if let Some(set) = hoist_root(func, oracles, child, summary, rs) {
                    tracing::trace!(
                        region = child.raw(),
                        root = rs.root.var().raw(),
                        removed = rs.points.len(),
                        "hoisting loop sequence"
                    );
                    sets.push(set);
                }
            }
        }
        sets
    }
}

// ── Trip shape ──────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Delta {
    Known(i8),
    Unknown,
}

impl Delta {
    fn step(self, by: i8) -> Self {
        match self {
            Delta::Known(d) if (d + by).abs() <= 2 => Delta::Known(d + by),
            _ => Delta::Unknown,
        }
    }
}

/// Net count change of `root` on each way out of one trip of the loop
/// behind `flat`, and whether the operations alternate.
fn trip_shape(
    func: &ArcFunction,
    oracles: &Oracles<'_>,
    flat: &FlatRegion,
    root: RcRoot,
) -> (Shape, bool) {
    let mut out: Vec<Option<Delta>> = vec![None; flat.len()];
    let mut ends: Vec<Delta> = Vec::new();
    let mut alternating = true;

    for &n in flat.rpo() {
        let node = flat.node(n);
        let mut delta = if n == flat.entry() {
            Delta::Known(0)
        } else {
            node.preds
                .iter()
                .filter_map(|&p| out[p])
                .reduce(|a, b| if a == b { a } else { Delta::Unknown })
                .unwrap_or(Delta::Unknown)
        };

        match node.kind {
            NodeKind::Loop(child) => {
                let unbalanced = flat
                    .loop_summary(child)
                    .and_then(|s| s.root(root))
                    .is_some_and(|rs| rs.shape != Shape::SelfCancelling);
                if unbalanced {
                    delta = Delta::Unknown;
                }
            }
            NodeKind::Block(_) => {
                for (_, effect) in flat.effects(func, n, root, oracles) {
                    match effect {
                        Effect::Inc => {
                            alternating &= delta == Delta::Known(0);
                            delta = delta.step(1);
                        }
                        Effect::Dec => {
                            alternating &= delta == Delta::Known(1);
                            delta = delta.step(-1);
                        }
                        _ => {}
                    }
                }
            }
        }

        if flat.live_escape(func, n, root, oracles) {
            ends.push(delta);
        }
        out[n] = Some(delta);
    }

    let shape = match ends.first() {
        None => Shape::Unknown,
        Some(_) if ends.contains(&Delta::Unknown) => Shape::Unknown,
        Some(&first) if ends.iter().all(|&d| d == first) => {
            if first == Delta::Known(0) {
                Shape::SelfCancelling
            } else {
                Shape::Unbalanced
            }
        }
        Some(_) => Shape::Unknown,
    };
    (shape, alternating && shape != Shape::Unknown)
}

// ── Hoisting ────────────────────────────────────────────────────────

fn hoist_root(
    func: &ArcFunction,
    oracles: &Oracles<'_>,
    child: RegionId,
    summary: &RegionSummary,
    rs: &RootSummary,
) -> Option<MatchingSet> {
    let regions = oracles.regions;
    let info = regions.get(child);

    if rs.shape != Shape::SelfCancelling || !rs.alternating || rs.nested || rs.points.len() < 2 {
        return None;
    }
    if summary.returns || summary.interference(rs.root, oracles).is_some() {
        return None;
    }
    if !regions.is_canonical(child) {
        return None;
    }
    let preheader = info.preheader?;

    let is_inc = |p: &ProgramPoint| {
        matches!(
            func.blocks[p.block.index()].body.get(p.index),
            Some(ArcInstr::RcInc { .. })
        )
    };
    let (increments, decrements): (Vec<ProgramPoint>, Vec<ProgramPoint>) =
        rs.points.iter().copied().partition(|p| is_inc(p));

    // Some increment runs on every trip that completes or leaves the loop,
    // so the root is live at the preheader.
    let guards_every_trip = increments.iter().any(|inc| {
        info.exiting
            .iter()
            .chain(&info.latches)
            .all(|&b| oracles.dominance.dominates(inc.block, b))
    });
    if !guards_every_trip {
        return None;
    }

    let inc_at = ProgramPoint::new(preheader, func.blocks[preheader.index()].body.len());
    if !root_defined_before(func, oracles, rs.root, inc_at) {
        return None;
    }

    let dec_points: Vec<ProgramPoint> = info
        .exits
        .iter()
        .filter(|&&exit| !is_quiet_exit(func, oracles, exit, rs.root))
        .map(|&exit| ProgramPoint::new(exit, 0))
        .collect();
    if 1 + dec_points.len() > rs.points.len() {
        return None;
    }

    Some(MatchingSet {
        root: rs.root,
        increments,
        decrements,
        inc_insert_points: vec![inc_at],
        dec_insert_points: dec_points,
    })
}
