use pretty_assertions::assert_eq;

use crate::ir::{ArcInstr, ArcValue, ValueRepr};
use crate::test_helpers::{b, block, branch, dec, jump, make_func, ret, unreachable, use_call, v};

use super::*;

fn construct(dst: u32, args: &[u32]) -> ArcInstr {
    ArcInstr::Construct {
        dst: v(dst),
        args: args.iter().map(|&a| v(a)).collect(),
    }
}

// RC identity

/// Copies and casts share the root of their source; projections do not.
#[test]
fn identity_follows_copies_and_casts() {
    let func = make_func(
        vec![block(
            0,
            vec![
                ArcInstr::Let {
                    dst: v(1),
                    value: ArcValue::Var(v(0)),
                },
                ArcInstr::Cast {
                    dst: v(2),
                    value: v(1),
                },
                ArcInstr::Project {
                    dst: v(3),
                    value: v(2),
                    field: 0,
                },
            ],
            ret(0),
        )],
        vec![ValueRepr::Aggregate; 4],
    );
    let info = RcIdentityInfo::compute(&func);
    let root = RcRoot::new(v(0));
    assert_eq!(info.root_of(v(1)), Some(root));
    assert_eq!(info.root_of(v(2)), Some(root));
    assert_eq!(info.root_of(v(3)), Some(RcRoot::new(v(3))));
    assert_eq!(info.definition(root), Some(RootDef::Param));
    assert_eq!(
        info.definition(RcRoot::new(v(3))),
        Some(RootDef::At(ProgramPoint::new(b(0), 2)))
    );
}

#[test]
fn identity_skips_trivial_and_undefined() {
    let func = make_func(
        vec![block(0, vec![], ret(0))],
        vec![ValueRepr::Reference, ValueRepr::Trivial, ValueRepr::Reference],
    );
    let info = RcIdentityInfo::compute(&func);
    assert_eq!(info.root_of(v(1)), None, "trivial values have no root");
    assert_eq!(info.root_of(v(2)), None, "undefined values have no root");
}

// Alias analysis

#[test]
fn params_may_alias_each_other() {
    let func = make_func_with_two_params();
    let info = RcIdentityInfo::compute(&func);
    let alias = BasicAliasAnalysis::compute(&func, &info);
    assert!(alias.may_alias(v(0), v(1)));
    assert!(alias.may_alias(v(0), v(0)));
    assert!(!alias.may_alias(v(0), v(2)), "trivial values never alias");
}

fn make_func_with_two_params() -> ArcFunction {
    crate::test_helpers::make_func_with_params(
        vec![v(0), v(1)],
        vec![block(0, vec![], ret(0))],
        vec![ValueRepr::Reference, ValueRepr::Reference, ValueRepr::Trivial],
    )
}

/// A constructed leaf that never escapes is disjoint from everything else.
#[test]
fn fresh_leaf_is_disjoint() {
    let func = make_func(
        vec![block(0, vec![construct(1, &[]), dec(1)], ret(0))],
        vec![ValueRepr::Reference, ValueRepr::Reference],
    );
    let info = RcIdentityInfo::compute(&func);
    let alias = BasicAliasAnalysis::compute(&func, &info);
    assert!(alias.is_fresh(RcRoot::new(v(1))));
    assert!(!alias.may_alias(v(0), v(1)));
    assert!(alias.may_alias(v(1), v(1)));
}

/// Passing the object to a call, or owning a counted value, loses freshness.
#[test]
fn escaping_or_owning_objects_are_not_fresh() {
    let func = make_func(
        vec![block(
            0,
            vec![construct(1, &[]), use_call(2, &[1]), construct(3, &[0])],
            ret(0),
        )],
        vec![
            ValueRepr::Reference,
            ValueRepr::Reference,
            ValueRepr::Trivial,
            ValueRepr::Aggregate,
        ],
    );
    let info = RcIdentityInfo::compute(&func);
    let alias = BasicAliasAnalysis::compute(&func, &info);
    assert!(!alias.is_fresh(RcRoot::new(v(1))));
    assert!(!alias.is_fresh(RcRoot::new(v(3))));
    assert!(alias.may_alias(v(0), v(3)));
}

// Termination

#[test]
fn termination_propagates_backward() {
    let func = make_func(
        vec![
            block(0, vec![], branch(1, 1, 2)),
            block(1, vec![], jump(3)),
            block(2, vec![], ret(0)),
            block(3, vec![], unreachable()),
        ],
        vec![ValueRepr::Reference, ValueRepr::Trivial],
    );
    let term = ProgramTermination::compute(&func);
    assert!(term.is_terminating(b(3)));
    assert!(term.is_terminating(b(1)));
    assert!(!term.is_terminating(b(2)));
    assert!(!term.is_terminating(b(0)));
}

#[test]
fn exitless_cycle_is_not_terminating() {
    let func = make_func(
        vec![block(0, vec![], jump(1)), block(1, vec![], jump(1))],
        vec![ValueRepr::Reference],
    );
    let term = ProgramTermination::compute(&func);
    assert!(!term.is_terminating(b(1)));
}

// Dominance defaults

#[test]
fn nearest_common_dominators() {
    let func = make_func(
        vec![
            block(0, vec![], branch(1, 1, 2)),
            block(1, vec![], jump(3)),
            block(2, vec![], jump(3)),
            block(3, vec![], ret(0)),
        ],
        vec![ValueRepr::Reference, ValueRepr::Trivial],
    );
    let analyses = FunctionAnalyses::compute(&func);
    let dom = &analyses.dominance;
    assert_eq!(dom.nearest_common_dominator(b(1), b(2)), Some(b(0)));
    assert_eq!(dom.nearest_common_dominator(b(3), b(1)), Some(b(0)));
    assert_eq!(dom.nearest_common_post_dominator(b(1), b(2)), Some(b(3)));
    assert_eq!(dom.nearest_common_post_dominator(b(0), b(3)), Some(b(3)));
}

// Cache

#[test]
fn lazy_cache_recomputes_after_invalidation() {
    let mut func = make_func(
        vec![block(0, vec![], ret(0))],
        vec![ValueRepr::Reference],
    );
    let mut cache = LazyAnalyses::new();
    assert_eq!(cache.analyses(&func).regions.len(), 1);

    // Turn the body into a self-loop; the stale bundle still sees no loop.
    func.blocks[0].terminator = jump(0);
    assert_eq!(cache.analyses(&func).regions.len(), 1);

    cache.invalidate(InvalidationKind::Nothing);
    assert!(cache.invalidations().is_empty());

    cache.invalidate(InvalidationKind::FunctionBody);
    assert_eq!(cache.analyses(&func).regions.len(), 2);
    assert_eq!(cache.invalidations(), &[InvalidationKind::FunctionBody]);
}
