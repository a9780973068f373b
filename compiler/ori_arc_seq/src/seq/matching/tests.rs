use pretty_assertions::assert_eq;

use crate::analysis::FunctionAnalyses;
use crate::ir::ValueRepr;
use crate::seq::dataflow::compute_pairings;
use crate::test_helpers::{
    b, block, branch, dec, inc, jump, make_func, opaque_call, ret, use_call, v,
};

use super::*;

fn reprs() -> Vec<ValueRepr> {
    vec![ValueRepr::Reference, ValueRepr::Trivial, ValueRepr::Trivial]
}

fn pt(block: u32, index: usize) -> ProgramPoint {
    ProgramPoint::new(b(block), index)
}

fn x() -> RcRoot {
    RcRoot::new(v(0))
}

/// Build the set seeded at `seed` over the whole function.
fn build_at(
    func: &ArcFunction,
    seed: ProgramPoint,
    frozen: Option<&FxHashSet<(ArcBlockId, RcRoot)>>,
) -> Option<MatchingSet> {
    let analyses = FunctionAnalyses::compute(func);
    let oracles = analyses.oracles();
    let flat = FlatRegion::whole_function(func, &oracles);
    let mut maps = compute_pairings(func, &flat, &oracles);
    let builder = MatchingSetBuilder::new(func, &flat, &oracles, frozen);
    let set = builder.build(&mut maps, seed);
    if set.is_some() {
        assert!(maps.inc_to_dec.is_blotted(&seed));
    }
    set
}

/// Increment, read, then a decrement in each arm of a diamond.
fn split_release() -> ArcFunction {
    make_func(
        vec![
            block(0, vec![inc(0), use_call(2, &[0])], branch(1, 1, 2)),
            block(1, vec![dec(0)], jump(3)),
            block(2, vec![dec(0)], jump(3)),
            block(3, vec![], ret(0)),
        ],
        reprs(),
    )
}

#[test]
fn unused_pair_is_deleted() {
    let func = make_func(vec![block(0, vec![inc(0), dec(0)], ret(0))], reprs());
    let set = build_at(&func, pt(0, 0), None);
    assert_eq!(
        set,
        Some(MatchingSet {
            root: x(),
            increments: vec![pt(0, 0)],
            decrements: vec![pt(0, 1)],
            inc_insert_points: vec![],
            dec_insert_points: vec![],
        })
    );
}

/// A pair around a read in one block has nowhere better to go.
#[test]
fn used_pair_in_one_block_stays() {
    let func = make_func(
        vec![block(0, vec![inc(0), use_call(2, &[0]), dec(0)], ret(0))],
        reprs(),
    );
    assert_eq!(build_at(&func, pt(0, 0), None), None);
}

#[test]
fn partial_closure_is_rejected() {
    let func = make_func(
        vec![block(0, vec![inc(0), opaque_call(2), dec(0)], ret(0))],
        reprs(),
    );
    assert_eq!(build_at(&func, pt(0, 0), None), None);
}

/// Increments in both arms merge into the branch block.
#[test]
fn arm_increments_merge_to_dominator() {
    let func = make_func(
        vec![
            block(0, vec![], branch(1, 1, 2)),
            block(1, vec![inc(0)], jump(3)),
            block(2, vec![inc(0)], jump(3)),
            block(3, vec![use_call(2, &[0]), dec(0)], ret(0)),
        ],
        reprs(),
    );
    let Some(set) = build_at(&func, pt(1, 0), None) else {
        panic!("no matching set");
    };
    assert!(!set.matched_pair());
    assert_eq!(set.increments, vec![pt(1, 0), pt(2, 0)]);
    assert_eq!(set.inc_insert_points, vec![pt(0, 0)]);
    assert!(set.decrements.is_empty());
    assert!(set.dec_insert_points.is_empty());
}

/// Decrements in both arms merge into the join.
#[test]
fn arm_decrements_merge_to_join() {
    let func = split_release();
    let Some(set) = build_at(&func, pt(0, 0), None) else {
        panic!("no matching set");
    };
    assert!(set.increments.is_empty());
    assert_eq!(set.decrements, vec![pt(1, 0), pt(2, 0)]);
    assert_eq!(set.dec_insert_points, vec![pt(3, 0)]);
    assert!(!set.matched_pair());
}

/// Frozen releases are never merged away.
#[test]
fn frozen_decrement_blocks_merge() {
    let func = split_release();
    let frozen: FxHashSet<(ArcBlockId, RcRoot)> = [(b(1), x())].into_iter().collect();
    assert_eq!(build_at(&func, pt(0, 0), Some(&frozen)), None);
}

/// A read between the join and the arms keeps the decrements in place.
#[test]
fn loud_join_blocks_decrement_merge() {
    let func = make_func(
        vec![
            block(0, vec![inc(0), use_call(2, &[0])], branch(1, 1, 2)),
            block(1, vec![dec(0), use_call(2, &[0])], jump(3)),
            block(2, vec![dec(0)], jump(3)),
            block(3, vec![], ret(0)),
        ],
        reprs(),
    );
    assert_eq!(build_at(&func, pt(0, 0), None), None);
}

/// The merge lands on the nearest common dominator, not the entry.
#[test]
fn merge_stops_at_nearest_dominator() {
    let func = make_func(
        vec![
            block(0, vec![], branch(1, 1, 4)),
            block(1, vec![], branch(1, 2, 3)),
            block(2, vec![inc(0)], jump(5)),
            block(3, vec![inc(0)], jump(5)),
            block(4, vec![], ret(0)),
            block(5, vec![use_call(2, &[0]), dec(0)], ret(0)),
        ],
        reprs(),
    );
    let Some(set) = build_at(&func, pt(2, 0), None) else {
        panic!("no matching set");
    };
    assert_eq!(set.inc_insert_points, vec![pt(1, 0)]);
}

/// Merging would put an increment on a path that returns without one.
#[test]
fn early_return_blocks_increment_merge() {
    let func = make_func(
        vec![
            block(0, vec![], branch(1, 1, 2)),
            block(1, vec![inc(0)], jump(4)),
            block(2, vec![], branch(1, 3, 5)),
            block(3, vec![inc(0)], jump(4)),
            block(4, vec![use_call(2, &[0]), dec(0)], ret(0)),
            block(5, vec![], ret(0)),
        ],
        reprs(),
    );
    assert_eq!(build_at(&func, pt(1, 0), None), None);
}
