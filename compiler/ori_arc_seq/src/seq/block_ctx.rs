//! Block-level pairing context.
//!
//! One [`BlockPairingContext`] round computes the pairing dataflow over a
//! flat region, builds a matching set from every surviving increment, queues
//! the rewrites, and splices them. The loop-aware pipeline drives rounds
//! region by region through [`BlockPairingContext::perform_round`]; the
//! block-only pipeline runs [`BlockPairingContext::run`] over the whole
//! function with loops left uncollapsed.

use rustc_hash::FxHashSet;

use crate::analysis::{Oracles, RcRoot};
use crate::graph::compute_postorder;
use crate::ir::{ArcBlockId, ArcFunction, ArcInstr};

use super::dataflow::compute_pairings;
use super::flat::FlatRegion;
use super::matching::MatchingSetBuilder;
use super::motion::{ArcSeqStats, CodeMotionApplier, PendingEdits};

/// What one round found, for the caller's iteration policy.
#[derive(Debug, Default)]
pub(crate) struct RoundReport {
    /// Some applied set removed both increments and decrements.
    pub matched_pair: bool,
    /// The dataflow saw an operation superseded by another on its root, or
    /// a set was applied. Either may expose a pair one level up.
    pub nesting_detected: bool,
    /// Roots rewritten this round.
    pub touched_roots: FxHashSet<RcRoot>,
}

pub(crate) struct BlockPairingContext<'o> {
    oracles: Oracles<'o>,
    /// Decrements in blocks post-dominating the entry, per root. Frozen
    /// rounds never merge them away.
    post_dom_releases: FxHashSet<(ArcBlockId, RcRoot)>,
    made_change: bool,
    stats: ArcSeqStats,
}

impl<'o> BlockPairingContext<'o> {
    pub(crate) fn new(oracles: Oracles<'o>) -> Self {
        Self {
            oracles,
            post_dom_releases: FxHashSet::default(),
            made_change: false,
            stats: ArcSeqStats::default(),
        }
    }

    pub(crate) fn oracles(&self) -> &Oracles<'o> {
        &self.oracles
    }

    pub(crate) fn made_change(&self) -> bool {
        self.made_change
    }

    pub(crate) fn stats(&self) -> ArcSeqStats {
        self.stats
    }

    pub(crate) fn stats_mut(&mut self) -> &mut ArcSeqStats {
        &mut self.stats
    }

    /// Recompute the frozen release set.
    pub(crate) fn compute_post_dom_releases(&mut self, func: &ArcFunction) {
        self.post_dom_releases.clear();
        let dominance = self.oracles.dominance;
        for idx in compute_postorder(func) {
            let block = ArcBlockId::from_index(idx);
            if !dominance.post_dominates(block, func.entry) {
                continue;
            }
            for instr in &func.blocks[idx].body {
                if let ArcInstr::RcDec { var, .. } = instr {
                    if let Some(root) = self.oracles.identity.root_of(*var) {
                        self.post_dom_releases.insert((block, root));
                    }
                }
            }
        }
    }

    pub(crate) fn has_post_dom_releases(&self) -> bool {
        !self.post_dom_releases.is_empty()
    }

    /// One whole-function round. Returns `true` if the function changed, in
    /// which case another round may find more.
    pub(crate) fn run(&mut self, func: &mut ArcFunction, freeze: bool) -> bool {
        if freeze && !self.has_post_dom_releases() {
            self.compute_post_dom_releases(func);
        }
        let flat = FlatRegion::whole_function(func, &self.oracles);
        let mut edits = PendingEdits::default();
        self.perform_round(func, &flat, freeze, &mut edits);
        let changed = !edits.splice(func).is_empty();
        self.made_change |= changed;
        changed
    }

    /// Pair, build and queue every matching set of `flat`.
    ///
    /// The function itself is left untouched; the caller splices `edits`.
    pub(crate) fn perform_round(
        &mut self,
        func: &ArcFunction,
        flat: &FlatRegion,
        freeze: bool,
        edits: &mut PendingEdits,
    ) -> RoundReport {
        self.stats.rounds += 1;
        let mut report = RoundReport::default();
        let mut maps = compute_pairings(func, flat, &self.oracles);
        let frozen = freeze.then_some(&self.post_dom_releases);
        let builder = MatchingSetBuilder::new(func, flat, &self.oracles, frozen);

        for seed in maps.inc_to_dec.live_keys() {
            if maps.inc_to_dec.is_blotted(&seed) {
                continue;
            }
            let Some(set) = builder.build(&mut maps, seed) else {
                continue;
            };
            CodeMotionApplier::new(func, edits, &mut self.stats).apply(&set);
            report.matched_pair |= set.matched_pair();
            report.touched_roots.insert(set.root);
        }

        report.nesting_detected = maps.nesting_detected || !report.touched_roots.is_empty();
        tracing::trace!(
            rounds = self.stats.rounds,
            sets = report.touched_roots.len(),
            matched_pair = report.matched_pair,
            nesting = report.nesting_detected,
            "pairing round"
        );
        report
    }
}
