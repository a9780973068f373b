//! Analyses consumed by the sequence optimizer.
//!
//! The optimizer never inspects the CFG for dominance, aliasing, identity or
//! termination on its own: it asks the oracles defined here. Each oracle is a
//! trait so a host compiler can plug in its own analyses; the crate ships a
//! default implementation of each, bundled in [`FunctionAnalyses`].
//!
//! - [`RcIdentity`]: canonical reference-count root of a value
//! - [`AliasOracle`]: may two values refer to overlapping RC objects
//! - [`DominanceOracle`]: dominance and post-dominance between blocks
//! - [`TerminationOracle`]: blocks that provably never return
//!
//! Analyses are cached by an [`AnalysisCache`], which the driver notifies
//! through [`InvalidationKind`] when it changes the CFG or the instruction
//! stream.

mod alias;
mod rc_identity;
mod termination;

pub use alias::BasicAliasAnalysis;
pub use rc_identity::RcIdentityInfo;
pub use termination::ProgramTermination;

use crate::graph::{DominatorTree, PostDominatorTree};
use crate::ir::{ArcBlockId, ArcFunction, ArcVarId, ProgramPoint};
use crate::loops::LoopRegions;

// ── Roots ───────────────────────────────────────────────────────────

/// Canonical identity of a reference-counted value.
///
/// Wraps the variable that originally produced the object (a parameter, a
/// call result, a projection, or a construction). Every copy and cast of
/// that variable shares the root.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RcRoot(ArcVarId);

impl RcRoot {
    #[inline]
    pub fn new(var: ArcVarId) -> Self {
        Self(var)
    }

    /// The defining variable; new RC operations on the root target it.
    #[inline]
    pub fn var(self) -> ArcVarId {
        self.0
    }
}

/// Where a root's defining variable comes into existence.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RootDef {
    /// A function parameter, live from the top of the entry block.
    Param,
    /// Defined by the instruction at this point.
    At(ProgramPoint),
}

// ── Oracle traits ───────────────────────────────────────────────────

/// Reference-identity canonicalization.
pub trait RcIdentity {
    /// The root of `var`, or `None` if it is not reference counted or its
    /// identity cannot be resolved. Unresolved values are never matched.
    fn root_of(&self, var: ArcVarId) -> Option<RcRoot>;

    /// Definition site of a root's variable.
    fn definition(&self, root: RcRoot) -> Option<RootDef>;
}

/// Alias queries between values.
pub trait AliasOracle {
    /// `false` only when `a` and `b` provably refer to disjoint objects,
    /// where an object includes everything it transitively owns.
    fn may_alias(&self, a: ArcVarId, b: ArcVarId) -> bool;
}

/// Dominance and post-dominance between blocks.
pub trait DominanceOracle {
    fn dominates(&self, a: ArcBlockId, b: ArcBlockId) -> bool;

    fn post_dominates(&self, a: ArcBlockId, b: ArcBlockId) -> bool;

    fn immediate_dominator(&self, b: ArcBlockId) -> Option<ArcBlockId>;

    fn immediate_post_dominator(&self, b: ArcBlockId) -> Option<ArcBlockId>;

    /// Deepest block dominating both `a` and `b`.
    fn nearest_common_dominator(&self, a: ArcBlockId, b: ArcBlockId) -> Option<ArcBlockId> {
        let mut candidate = Some(a);
        while let Some(c) = candidate {
            if self.dominates(c, b) {
                return Some(c);
            }
            candidate = self.immediate_dominator(c);
        }
        None
    }

    /// Deepest block post-dominating both `a` and `b`.
    fn nearest_common_post_dominator(&self, a: ArcBlockId, b: ArcBlockId) -> Option<ArcBlockId> {
        let mut candidate = Some(a);
        while let Some(c) = candidate {
            if self.post_dominates(c, b) {
                return Some(c);
            }
            candidate = self.immediate_post_dominator(c);
        }
        None
    }
}

/// Program-termination analysis.
pub trait TerminationOracle {
    /// `true` if every path from `block` ends in a trap: nothing after it
    /// needs balancing, teardown happens outside the function.
    fn is_terminating(&self, block: ArcBlockId) -> bool;
}

/// Borrowed view of every oracle the optimizer consults.
#[derive(Clone, Copy)]
pub struct Oracles<'a> {
    pub identity: &'a dyn RcIdentity,
    pub alias: &'a dyn AliasOracle,
    pub dominance: &'a dyn DominanceOracle,
    pub termination: &'a dyn TerminationOracle,
    pub regions: &'a LoopRegions,
}

// ── Default bundle ──────────────────────────────────────────────────

/// Dominator and post-dominator trees behind one oracle.
pub struct Dominance {
    pub dom: DominatorTree,
    pub post_dom: PostDominatorTree,
}

impl DominanceOracle for Dominance {
    fn dominates(&self, a: ArcBlockId, b: ArcBlockId) -> bool {
        self.dom.dominates(a, b)
    }

    fn post_dominates(&self, a: ArcBlockId, b: ArcBlockId) -> bool {
        self.post_dom.post_dominates(a, b)
    }

    fn immediate_dominator(&self, b: ArcBlockId) -> Option<ArcBlockId> {
        self.dom.immediate_dominator(b)
    }

    fn immediate_post_dominator(&self, b: ArcBlockId) -> Option<ArcBlockId> {
        self.post_dom.immediate_post_dominator(b)
    }
}

/// Every default analysis for one function body.
pub struct FunctionAnalyses {
    pub identity: RcIdentityInfo,
    pub alias: BasicAliasAnalysis,
    pub dominance: Dominance,
    pub termination: ProgramTermination,
    pub regions: LoopRegions,
}

impl FunctionAnalyses {
    /// Compute every analysis from scratch.
    pub fn compute(func: &ArcFunction) -> Self {
        let identity = RcIdentityInfo::compute(func);
        let alias = BasicAliasAnalysis::compute(func, &identity);
        let dom = DominatorTree::build(func);
        let regions = LoopRegions::build(func, &dom);
        let post_dom = PostDominatorTree::build(func);
        let termination = ProgramTermination::compute(func);
        Self {
            identity,
            alias,
            dominance: Dominance { dom, post_dom },
            termination,
            regions,
        }
    }

    /// Borrow the bundle as trait objects.
    pub fn oracles(&self) -> Oracles<'_> {
        Oracles {
            identity: &self.identity,
            alias: &self.alias,
            dominance: &self.dominance,
            termination: &self.termination,
            regions: &self.regions,
        }
    }
}

// ── Invalidation protocol ───────────────────────────────────────────

/// What a transformation invalidated.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum InvalidationKind {
    /// Nothing changed.
    Nothing,
    /// Instructions (and therefore call sites) changed; the CFG did not.
    CallsAndInstructions,
    /// The CFG changed.
    FunctionBody,
}

/// Holder of per-function analyses that honors invalidation.
pub trait AnalysisCache {
    /// Analyses for `func`, computed on first request after an invalidation.
    fn analyses(&mut self, func: &ArcFunction) -> &FunctionAnalyses;

    /// Drop whatever `kind` makes stale.
    fn invalidate(&mut self, kind: InvalidationKind);
}

/// [`AnalysisCache`] that recomputes lazily and records every invalidation.
#[derive(Default)]
pub struct LazyAnalyses {
    cached: Option<FunctionAnalyses>,
    log: Vec<InvalidationKind>,
}

impl LazyAnalyses {
    pub fn new() -> Self {
        Self::default()
    }

    /// Invalidations received so far, oldest first.
    pub fn invalidations(&self) -> &[InvalidationKind] {
        &self.log
    }
}

impl AnalysisCache for LazyAnalyses {
    fn analyses(&mut self, func: &ArcFunction) -> &FunctionAnalyses {
        self.cached
            .get_or_insert_with(|| FunctionAnalyses::compute(func))
    }

    fn invalidate(&mut self, kind: InvalidationKind) {
        if kind == InvalidationKind::Nothing {
            return;
        }
        // Every default analysis reads either the CFG or the instruction
        // stream, so both kinds drop the whole bundle.
        self.cached = None;
        self.log.push(kind);
    }
}

#[cfg(test)]
mod tests;
