//! Loop-aware pairing: regions bottom-up, innermost loops first.
//!
//! Each loop is processed as its own region (its header as entry, back edges
//! and exits cut) before its parent sees it as a single summarized node.
//! After every round in a region, child loops whose sequences cancel out are
//! hoisted into the region, which may expose new pairs one level up.

use crate::analysis::Oracles;
use crate::ir::ArcFunction;
use crate::loops::RegionId;

use super::block_ctx::BlockPairingContext;
use super::flat::FlatRegion;
use super::motion::{ArcSeqStats, CodeMotionApplier, PendingEdits};
use super::region::RegionEvaluator;

pub(crate) struct LoopPairingContext<'o> {
    block: BlockPairingContext<'o>,
    evaluator: RegionEvaluator,
}

impl<'o> LoopPairingContext<'o> {
    pub(crate) fn new(oracles: Oracles<'o>) -> Self {
        Self {
            block: BlockPairingContext::new(oracles),
            evaluator: RegionEvaluator::new(),
        }
    }

    pub(crate) fn stats(&self) -> ArcSeqStats {
        self.block.stats()
    }

    /// One sweep over the region tree. Returns `true` if anything changed.
    pub(crate) fn process(&mut self, func: &mut ArcFunction) -> bool {
        let oracles = *self.block.oracles();
        let mut changed = false;
        for id in oracles.regions.bottom_up() {
            changed |= self.run_on_loop(func, id);
        }
        changed |= self.run_on_function(func);
        changed
    }

    fn run_on_loop(&mut self, func: &mut ArcFunction, id: RegionId) -> bool {
        let changed = self.process_region(func, id, false, false);
        if changed {
            self.process_region(func, id, true, false);
        }
        let oracles = *self.block.oracles();
        self.evaluator.summarize(func, &oracles, id);
        changed
    }

    fn run_on_function(&mut self, func: &mut ArcFunction) -> bool {
        let changed = self.process_region(func, RegionId::FUNCTION, false, false);
        if changed {
            self.process_region(func, RegionId::FUNCTION, true, true);
        }
        changed
    }

    /// Rounds over one region until a round stops exposing new pairs.
    fn process_region(
        &mut self,
        func: &mut ArcFunction,
        id: RegionId,
        freeze: bool,
        recompute: bool,
    ) -> bool {
        let oracles = *self.block.oracles();
        if freeze && id == RegionId::FUNCTION && (recompute || !self.block.has_post_dom_releases())
        {
            self.block.compute_post_dom_releases(func);
        }

        let mut changed = false;
        loop {
            self.evaluator.summarize_children(func, &oracles, id);
            let flat = FlatRegion::for_region(func, &oracles, id, &self.evaluator);
            let mut edits = PendingEdits::default();
            let report = self.block.perform_round(func, &flat, freeze, &mut edits);

            let hoists =
                self.evaluator
                    .hoist_from_children(func, &oracles, id, &report.touched_roots);
            let mut matched_pair = report.matched_pair;
            let nesting = report.nesting_detected || !hoists.is_empty();
            for set in &hoists {
                CodeMotionApplier::new(func, &mut edits, self.block.stats_mut()).apply(set);
                matched_pair |= set.matched_pair();
            }

            let touched = edits.splice(func);
            if touched.is_empty() {
                break;
            }
            changed = true;
            self.evaluator.invalidate(&oracles, &touched);
            tracing::debug!(
                region = id.raw(),
                freeze,
                blocks = touched.len(),
                hoisted = hoists.len(),
                nesting,
                "region round changed the function"
            );
            if !(nesting && matched_pair) {
                break;
            }
        }
        changed
    }
}
