//! ARC sequence optimization.
//!
//! Pairs `RcInc`/`RcDec` operations on the same root across the CFG and
//! either deletes the pair outright or moves it to positions where it does
//! less work: out of loop bodies, or to the join point of a diamond.
//!
//! # Algorithm
//!
//! Each round runs two dataflow walks over a flat region:
//!
//! 1. **Top-down:** every increment records the decrements that may end its
//!    lifetime and whether a use of the root lies in between.
//! 2. **Bottom-up:** every decrement records the increments that may open
//!    its lifetime, mirrored.
//!
//! A matching set is the transitive closure of the two maps starting from
//! one increment. A closed set whose members were never separated by a use
//! is deleted. A set with uses is moved: increments to the nearest common
//! dominator, decrements to the nearest common post-dominator, both only
//! when every path through the set is preserved.
//!
//! The loop-aware pipeline processes loops innermost first and summarizes
//! each one for its parent; self-cancelling loop bodies hoist their pair to
//! the preheader and the loop exits. The block-only pipeline treats the
//! whole function as one region and lets back edges end every lifetime.
//!
//! # Soundness
//!
//! A rewrite never lets an object's count reach zero earlier than before,
//! never changes what a uniqueness test or a releasing call observes, and
//! never adds an operation to a path that did not balance one before.
//!
//! # References
//!
//! - Swift: `lib/SILOptimizer/ARC/ARCSequenceOpts.cpp`, `ARCMatchingSet`
//! - Swift: `RefCountState` top-down/bottom-up lattices
//! - Swift: `GlobalLoopARCSequenceDataflow.cpp`, loop region summaries

mod block_ctx;
mod blot;
mod dataflow;
mod flat;
mod loop_ctx;
mod matching;
mod motion;
mod region;

pub use motion::ArcSeqStats;

use crate::analysis::{AnalysisCache, InvalidationKind, LazyAnalyses};
use crate::config::ArcSeqConfig;
use crate::error::{verify_function, PreconditionError};
use crate::ir::ArcFunction;
use crate::loops::canonicalize_loops;

use block_ctx::BlockPairingContext;
use loop_ctx::LoopPairingContext;

/// Functions with this prefix run before any retain can be balanced.
const GLOBAL_INIT_PREFIX: &str = "globalinit_";

// ── Strategies ──────────────────────────────────────────────────────

/// One way of driving the pairing machinery over a function.
pub trait PairingStrategy {
    /// Short name for logs.
    fn name(&self) -> &'static str;

    /// Rewrite `func` to a fixed point and report what changed.
    ///
    /// Implementations may change the CFG (loop canonicalization) and must
    /// tell `cache` when they do.
    fn optimize(&self, func: &mut ArcFunction, cache: &mut dyn AnalysisCache) -> ArcSeqStats;
}

/// Region-aware pipeline: loops are canonicalized, processed innermost
/// first, and summarized for their parents.
#[derive(Clone, Copy, Debug, Default)]
pub struct LoopAwarePipeline;

impl PairingStrategy for LoopAwarePipeline {
    fn name(&self) -> &'static str {
        "loop-aware"
    }

    fn optimize(&self, func: &mut ArcFunction, cache: &mut dyn AnalysisCache) -> ArcSeqStats {
        if canonicalize_loops(func) {
            cache.invalidate(InvalidationKind::FunctionBody);
        }
        let analyses = cache.analyses(func);
        let mut ctx = LoopPairingContext::new(analyses.oracles());
        while ctx.process(func) {}
        ctx.stats()
    }
}

/// Whole-function pipeline with no loop collapsing.
///
/// Runs unfrozen rounds to a fixed point, then, if anything changed, frozen
/// rounds that keep releases post-dominating the entry in place.
#[derive(Clone, Copy, Debug, Default)]
pub struct BlockOnlyPipeline;

impl PairingStrategy for BlockOnlyPipeline {
    fn name(&self) -> &'static str {
        "block-only"
    }

    fn optimize(&self, func: &mut ArcFunction, cache: &mut dyn AnalysisCache) -> ArcSeqStats {
        let analyses = cache.analyses(func);
        let mut ctx = BlockPairingContext::new(analyses.oracles());
        while ctx.run(func, false) {}
        if ctx.made_change() {
            while ctx.run(func, true) {}
        }
        ctx.stats()
    }
}

// ── Driver ──────────────────────────────────────────────────────────

/// Result of one pass invocation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PassOutcome {
    pub stats: ArcSeqStats,
    /// What the caller's analyses must drop.
    pub invalidation: InvalidationKind,
}

impl PassOutcome {
    fn unchanged() -> Self {
        Self {
            stats: ArcSeqStats::default(),
            invalidation: InvalidationKind::Nothing,
        }
    }
}

/// The ARC sequence optimization pass.
pub struct ArcSequenceOpts {
    config: ArcSeqConfig,
    strategy: Box<dyn PairingStrategy>,
}

impl ArcSequenceOpts {
    /// Pass with the pipeline selected by `config.enable_loop_arc`.
    pub fn new(config: ArcSeqConfig) -> Self {
        let strategy: Box<dyn PairingStrategy> = if config.enable_loop_arc {
            Box::new(LoopAwarePipeline)
        } else {
            Box::new(BlockOnlyPipeline)
        };
        Self { config, strategy }
    }

    /// Replace the pipeline chosen from the configuration.
    #[must_use]
    pub fn with_strategy(mut self, strategy: Box<dyn PairingStrategy>) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn config(&self) -> &ArcSeqConfig {
        &self.config
    }

    /// Optimize one function.
    ///
    /// # Errors
    ///
    /// Returns [`PreconditionError`] if `func` violates the structural input
    /// contract; the function is left untouched.
    pub fn run(
        &self,
        func: &mut ArcFunction,
        cache: &mut dyn AnalysisCache,
    ) -> Result<PassOutcome, PreconditionError> {
        verify_function(func)?;

        if !self.config.enable_arc_optimizations {
            tracing::trace!(function = %func.name, "ARC optimizations disabled");
            return Ok(PassOutcome::unchanged());
        }
        if func.name.starts_with(GLOBAL_INIT_PREFIX) {
            tracing::trace!(function = %func.name, "skipping global initializer");
            return Ok(PassOutcome::unchanged());
        }

        let blocks_before = func.blocks.len();
        let rc_before = func.count_rc_ops();
        let stats = self.strategy.optimize(func, cache);

        let invalidation = if func.blocks.len() != blocks_before {
            InvalidationKind::FunctionBody
        } else if stats.changed() {
            InvalidationKind::CallsAndInstructions
        } else {
            InvalidationKind::Nothing
        };
        cache.invalidate(invalidation);

        tracing::debug!(
            function = %func.name,
            pipeline = self.strategy.name(),
            rc_before,
            rc_after = func.count_rc_ops(),
            moved = stats.moved,
            removed = stats.removed,
            rounds = stats.rounds,
            ?invalidation,
            "ARC sequence opts"
        );

        Ok(PassOutcome {
            stats,
            invalidation,
        })
    }
}

/// Run the pass on `func` with a private analysis cache.
///
/// # Errors
///
/// See [`ArcSequenceOpts::run`].
pub fn run_arc_sequence_opts(
    func: &mut ArcFunction,
    config: &ArcSeqConfig,
) -> Result<PassOutcome, PreconditionError> {
    let mut cache = LazyAnalyses::new();
    ArcSequenceOpts::new(*config).run(func, &mut cache)
}

#[cfg(test)]
mod tests;
