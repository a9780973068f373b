//! Matching sets: closing pairings into rewritable groups.
//!
//! Starting from one increment, [`MatchingSetBuilder::build`] alternates
//! between the two pairing directions until the set of increments and the
//! set of decrements stop growing. The closed set is only usable if every
//! member pairs consistently in both directions and none of them was dropped
//! partially.
//!
//! A closed set is then rewritten one of three ways:
//!
//! - **Deletion**: nothing reads the root between the members, so every
//!   member is removed.
//! - **Increment merge**: increments in several blocks are replaced by one
//!   increment at their nearest common dominator.
//! - **Decrement merge**: decrements in several blocks are replaced by one
//!   decrement at the top of their nearest common post-dominator.
//!
//! Both merges may apply to the same set. Every rewrite removes strictly
//! more operations than it inserts.

use rustc_hash::FxHashSet;

use crate::analysis::{Oracles, RcRoot};
use crate::ir::{ArcBlockId, ArcFunction, ProgramPoint};

use super::dataflow::PairingMaps;
use super::flat::{
    instr_effect, is_silent, is_silent_terminator, root_defined_before, terminator_effect, Effect,
    FlatRegion, NodeKind,
};

/// A group of operations on one root rewritten together.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct MatchingSet {
    pub root: RcRoot,
    /// Increments to remove.
    pub increments: Vec<ProgramPoint>,
    /// Decrements to remove.
    pub decrements: Vec<ProgramPoint>,
    /// Where new increments go.
    pub inc_insert_points: Vec<ProgramPoint>,
    /// Where new decrements go.
    pub dec_insert_points: Vec<ProgramPoint>,
}

impl MatchingSet {
    /// Removes both increments and decrements.
    pub(crate) fn matched_pair(&self) -> bool {
        !self.increments.is_empty() && !self.decrements.is_empty()
    }
}

/// Fixed point of the pairing relation around one seed.
struct Closure {
    root: RcRoot,
    incs: Vec<ProgramPoint>,
    decs: Vec<ProgramPoint>,
    used: bool,
}

pub(crate) struct MatchingSetBuilder<'a, 'o> {
    func: &'a ArcFunction,
    flat: &'a FlatRegion,
    oracles: &'a Oracles<'o>,
    /// `(block, root)` decrements that may not be merged away.
    frozen: Option<&'a FxHashSet<(ArcBlockId, RcRoot)>>,
}

impl<'a, 'o> MatchingSetBuilder<'a, 'o> {
    pub(crate) fn new(
        func: &'a ArcFunction,
        flat: &'a FlatRegion,
        oracles: &'a Oracles<'o>,
        frozen: Option<&'a FxHashSet<(ArcBlockId, RcRoot)>>,
    ) -> Self {
        Self {
            func,
            flat,
            oracles,
            frozen,
        }
    }

    /// Close the pairing around `seed` and decide how to rewrite it.
    ///
    /// On a successful closure every member is blotted from `maps`, whether
    /// or not a rewrite is found, so no other seed rebuilds the same set.
    pub(crate) fn build(&self, maps: &mut PairingMaps, seed: ProgramPoint) -> Option<MatchingSet> {
        let closure = close(maps, seed)?;
        for p in &closure.incs {
            maps.inc_to_dec.blot(p);
        }
        for p in &closure.decs {
            maps.dec_to_inc.blot(p);
        }

        if !closure.used {
            tracing::trace!(
                root = closure.root.var().raw(),
                incs = closure.incs.len(),
                decs = closure.decs.len(),
                "deleting unused pairing"
            );
            return Some(MatchingSet {
                root: closure.root,
                increments: closure.incs,
                decrements: closure.decs,
                inc_insert_points: Vec::new(),
                dec_insert_points: Vec::new(),
            });
        }

        let inc_at = self.merge_increments(closure.root, &closure.incs);
        let dec_at = self.merge_decrements(closure.root, &closure.decs);
        if inc_at.is_none() && dec_at.is_none() {
            return None;
        }
        tracing::trace!(
            root = closure.root.var().raw(),
            merged_incs = inc_at.is_some(),
            merged_decs = dec_at.is_some(),
            "merging pairing"
        );
        Some(MatchingSet {
            root: closure.root,
            increments: if inc_at.is_some() { closure.incs } else { Vec::new() },
            decrements: if dec_at.is_some() { closure.decs } else { Vec::new() },
            inc_insert_points: inc_at.into_iter().collect(),
            dec_insert_points: dec_at.into_iter().collect(),
        })
    }

    fn effect_at(&self, block: ArcBlockId, idx: usize, root: RcRoot) -> Effect {
        let bl = &self.func.blocks[block.index()];
        match bl.body.get(idx) {
            Some(instr) => instr_effect(instr, root, self.oracles),
            None => terminator_effect(&bl.terminator, root, self.oracles),
        }
    }

    /// Is position `idx` of `block` free of anything a decrement may not
    /// sink past?
    fn silent_at(&self, block: ArcBlockId, idx: usize) -> bool {
        let bl = &self.func.blocks[block.index()];
        match bl.body.get(idx) {
            Some(instr) => is_silent(instr),
            None => is_silent_terminator(&bl.terminator),
        }
    }

    fn block_len(&self, block: ArcBlockId) -> usize {
        self.func.blocks[block.index()].body.len()
    }

    /// A reached block node of the flat region holding `block`.
    fn block_node(&self, block: ArcBlockId) -> Option<usize> {
        let n = self.flat.node_of_block(block)?;
        let is_block = matches!(self.flat.node(n).kind, NodeKind::Block(_));
        (is_block && self.flat.is_reached(n)).then_some(n)
    }

    fn root_defined_at(&self, root: RcRoot, at: ProgramPoint) -> bool {
        root_defined_before(self.func, self.oracles, root, at)
    }

    // ── Increment merge ─────────────────────────────────────────────

    fn merge_increments(&self, root: RcRoot, incs: &[ProgramPoint]) -> Option<ProgramPoint> {
        let blocks = distinct_blocks(incs);
        if blocks.len() < 2 {
            return None;
        }
        let dom = self.oracles.dominance;
        let target = blocks[1..]
            .iter()
            .try_fold(blocks[0], |acc, &b| dom.nearest_common_dominator(acc, b))?;
        if blocks.contains(&target) {
            return None;
        }
        let start = self.block_node(target)?;
        let members: FxHashSet<ProgramPoint> = incs.iter().copied().collect();

        if !self.every_path_hits_member(start, root, &members) {
            return None;
        }
        if incs
            .iter()
            .any(|&inc| self.reaches_member(inc, &members))
        {
            return None;
        }
        let at = ProgramPoint::new(target, self.block_len(target));
        self.root_defined_at(root, at).then_some(at)
    }

    /// Starting after `start`, does every path reach a member increment
    /// before anything that counts, observes or releases the root?
    fn every_path_hits_member(
        &self,
        start: usize,
        root: RcRoot,
        members: &FxHashSet<ProgramPoint>,
    ) -> bool {
        if !self.path_continues(start, root) {
            return false;
        }
        let mut seen: FxHashSet<usize> = FxHashSet::default();
        let mut stack: Vec<usize> = self.flat.node(start).succs.to_vec();
        while let Some(n) = stack.pop() {
            if !seen.insert(n) {
                continue;
            }
            let node = self.flat.node(n);
            let mut hit = false;
            match node.kind {
                NodeKind::Loop(_) => {
                    let effects = self.flat.effects(self.func, n, root, self.oracles);
                    if effects.iter().any(|(_, e)| *e != Effect::Use) {
                        return false;
                    }
                }
                NodeKind::Block(block) => {
                    for idx in 0..=self.block_len(block) {
                        if members.contains(&ProgramPoint::new(block, idx)) {
                            hit = true;
                            break;
                        }
                        let effect = self.effect_at(block, idx, root);
                        if matches!(effect, Effect::Inc | Effect::Dec) || effect.interferes() {
                            return false;
                        }
                    }
                }
            }
            if hit {
                continue;
            }
            if node.succs.is_empty() && node.terminating && !self.escapes(n, root) {
                continue;
            }
            if !self.path_continues(n, root) {
                return false;
            }
            stack.extend(node.succs.iter().copied());
        }
        true
    }

    fn escapes(&self, n: usize, root: RcRoot) -> bool {
        self.flat.live_escape(self.func, n, root, self.oracles)
    }

    /// Control stays inside the region's forward graph after node `n`.
    fn path_continues(&self, n: usize, root: RcRoot) -> bool {
        !self.escapes(n, root) && !self.flat.node(n).succs.is_empty()
    }

    /// Can `from` flow forward into another member?
    fn reaches_member(&self, from: ProgramPoint, members: &FxHashSet<ProgramPoint>) -> bool {
        let later_in_block = (from.index + 1..=self.block_len(from.block))
            .any(|idx| members.contains(&ProgramPoint::new(from.block, idx)));
        if later_in_block {
            return true;
        }
        let Some(start) = self.flat.node_of_block(from.block) else {
            return false;
        };
        let mut seen: FxHashSet<usize> = FxHashSet::default();
        let mut stack: Vec<usize> = self.flat.node(start).succs.to_vec();
        while let Some(n) = stack.pop() {
            if !seen.insert(n) {
                continue;
            }
            let node = self.flat.node(n);
            if node
                .block()
                .is_some_and(|b| members.iter().any(|m| m.block == b))
            {
                return true;
            }
            stack.extend(node.succs.iter().copied());
        }
        false
    }

    // ── Decrement merge ─────────────────────────────────────────────

    fn merge_decrements(&self, root: RcRoot, decs: &[ProgramPoint]) -> Option<ProgramPoint> {
        let blocks = distinct_blocks(decs);
        if blocks.len() < 2 {
            return None;
        }
        if let Some(frozen) = self.frozen {
            if decs.iter().any(|d| frozen.contains(&(d.block, root))) {
                return None;
            }
        }
        let dom = self.oracles.dominance;
        let target = blocks[1..]
            .iter()
            .try_fold(blocks[0], |acc, &b| dom.nearest_common_post_dominator(acc, b))?;
        if blocks.contains(&target) {
            return None;
        }
        let join = self.block_node(target)?;
        let members: FxHashSet<ProgramPoint> = decs.iter().copied().collect();

        if !self.members_reach_join(join, decs, root) {
            return None;
        }
        if !self.join_preceded_by_members(join, &members) {
            return None;
        }
        let at = ProgramPoint::new(target, 0);
        self.root_defined_at(root, at).then_some(at)
    }

    /// From each member decrement, every path reaches `join` through silent
    /// code only.
    fn members_reach_join(&self, join: usize, decs: &[ProgramPoint], root: RcRoot) -> bool {
        let mut seen: FxHashSet<usize> = FxHashSet::default();
        let mut stack: Vec<usize> = Vec::new();
        for dec in decs {
            let tail_silent =
                (dec.index + 1..=self.block_len(dec.block)).all(|idx| self.silent_at(dec.block, idx));
            let Some(n) = self.flat.node_of_block(dec.block) else {
                return false;
            };
            if !tail_silent || !self.path_continues(n, root) {
                return false;
            }
            stack.extend(self.flat.node(n).succs.iter().copied());
        }
        while let Some(n) = stack.pop() {
            if n == join || !seen.insert(n) {
                continue;
            }
            let node = self.flat.node(n);
            let Some(block) = node.block() else {
                return false;
            };
            let silent = (0..=self.block_len(block)).all(|idx| self.silent_at(block, idx));
            if !silent || !self.path_continues(n, root) {
                return false;
            }
            stack.extend(node.succs.iter().copied());
        }
        true
    }

    /// Walking backward from `join`, every path meets a member decrement
    /// after silent code only, without leaving the region.
    fn join_preceded_by_members(&self, join: usize, members: &FxHashSet<ProgramPoint>) -> bool {
        let unknown_entry = |n: usize| n == self.flat.entry() || self.flat.node(n).retreating_pred;
        if unknown_entry(join) || self.flat.node(join).preds.is_empty() {
            return false;
        }
        let mut seen: FxHashSet<usize> = FxHashSet::default();
        let mut stack: Vec<usize> = self.flat.node(join).preds.to_vec();
        while let Some(n) = stack.pop() {
            if !seen.insert(n) {
                continue;
            }
            let node = self.flat.node(n);
            let Some(block) = node.block() else {
                return false;
            };
            let mut hit = false;
            for idx in (0..=self.block_len(block)).rev() {
                if members.contains(&ProgramPoint::new(block, idx)) {
                    hit = true;
                    break;
                }
                if !self.silent_at(block, idx) {
                    return false;
                }
            }
            if hit {
                continue;
            }
            if unknown_entry(n) || node.preds.is_empty() {
                return false;
            }
            stack.extend(node.preds.iter().copied());
        }
        true
    }
}

/// Follow both pairing directions from `seed` to a fixed point.
///
/// Fails if a member is unknown or blotted, dropped partially, or paired
/// with nothing, or if the members disagree on the root.
fn close(maps: &PairingMaps, seed: ProgramPoint) -> Option<Closure> {
    let root = maps.inc_to_dec.get(&seed)?.root;
    let mut incs: Vec<ProgramPoint> = vec![seed];
    let mut decs: Vec<ProgramPoint> = Vec::new();
    let mut used = false;
    let (mut next_inc, mut next_dec) = (0, 0);

    while next_inc < incs.len() || next_dec < decs.len() {
        while next_inc < incs.len() {
            let entry = maps.inc_to_dec.get(&incs[next_inc])?;
            next_inc += 1;
            if entry.partial || entry.root != root || entry.decs.is_empty() {
                return None;
            }
            used |= entry.used;
            for &d in &entry.decs {
                if !decs.contains(&d) {
                    decs.push(d);
                }
            }
        }
        while next_dec < decs.len() {
            let entry = maps.dec_to_inc.get(&decs[next_dec])?;
            next_dec += 1;
            if entry.partial || entry.root != root || entry.incs.is_empty() {
                return None;
            }
            used |= entry.used;
            for &i in &entry.incs {
                if !incs.contains(&i) {
                    incs.push(i);
                }
            }
        }
    }

    incs.sort_unstable();
    decs.sort_unstable();
    Some(Closure {
        root,
        incs,
        decs,
        used,
    })
}

fn distinct_blocks(points: &[ProgramPoint]) -> Vec<ArcBlockId> {
    let mut blocks: Vec<ArcBlockId> = points.iter().map(|p| p.block).collect();
    blocks.sort_unstable();
    blocks.dedup();
    blocks
}

#[cfg(test)]
mod tests;
