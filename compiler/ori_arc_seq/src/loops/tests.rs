use pretty_assertions::assert_eq;

use crate::ir::ValueRepr;
use crate::test_helpers::{b, block, branch, jump, make_func, ret};

use super::*;

fn reprs() -> Vec<ValueRepr> {
    vec![ValueRepr::Reference, ValueRepr::Trivial]
}

fn regions_of(func: &ArcFunction) -> LoopRegions {
    let dom = DominatorTree::build(func);
    LoopRegions::build(func, &dom)
}

/// B0 → B1 (header) ⇄ B2 (latch), B1 → B3.
fn simple_loop() -> ArcFunction {
    make_func(
        vec![
            block(0, vec![], jump(1)),
            block(1, vec![], branch(1, 2, 3)),
            block(2, vec![], jump(1)),
            block(3, vec![], ret(0)),
        ],
        reprs(),
    )
}

/// Outer loop B1..B4 with inner loop B2 ⇄ B3.
///
/// ```text
/// B0 → B1 → B2 → B3 → B2 (inner back edge)
///            B3 → B4 → B1 (outer back edge)
///      B1 → B5 (exit)
/// ```
fn nested_loops() -> ArcFunction {
    make_func(
        vec![
            block(0, vec![], jump(1)),
            block(1, vec![], branch(1, 2, 5)),
            block(2, vec![], jump(3)),
            block(3, vec![], branch(1, 2, 4)),
            block(4, vec![], jump(1)),
            block(5, vec![], ret(0)),
        ],
        reprs(),
    )
}

#[test]
fn no_loops_only_function_region() {
    let func = make_func(vec![block(0, vec![], ret(0))], reprs());
    let regions = regions_of(&func);
    assert_eq!(regions.len(), 1);
    assert!(regions.get(RegionId::FUNCTION).is_function());
    assert!(regions.bottom_up().is_empty());
}

#[test]
fn simple_loop_shape() {
    let regions = regions_of(&simple_loop());
    assert_eq!(regions.len(), 2);
    let lp = regions.get(RegionId(1));
    assert_eq!(lp.header, b(1));
    assert_eq!(lp.blocks, vec![b(1), b(2)]);
    assert_eq!(lp.latches, vec![b(2)]);
    assert_eq!(lp.exiting, vec![b(1)]);
    assert_eq!(lp.exits, vec![b(3)]);
    assert_eq!(lp.preheader, Some(b(0)));
    assert_eq!(lp.depth, 1);
    assert!(regions.is_canonical(RegionId(1)));
    assert_eq!(regions.innermost(b(2)), RegionId(1));
    assert_eq!(regions.innermost(b(3)), RegionId::FUNCTION);
}

#[test]
fn nested_loop_hierarchy() {
    let regions = regions_of(&nested_loops());
    assert_eq!(regions.len(), 3);

    let outer = regions.get(RegionId(1));
    let inner = regions.get(RegionId(2));
    assert_eq!(outer.header, b(1));
    assert_eq!(inner.header, b(2));
    assert_eq!(inner.parent, Some(RegionId(1)));
    assert_eq!(outer.children, vec![RegionId(2)]);
    assert_eq!(inner.depth, 2);
    assert_eq!(regions.get(regions.innermost(b(3))).depth, 2);
    assert_eq!(regions.get(regions.innermost(b(4))).depth, 1);

    assert_eq!(regions.bottom_up(), vec![RegionId(2), RegionId(1)]);
    assert_eq!(
        regions.child_containing(RegionId::FUNCTION, b(3)),
        Some(RegionId(1))
    );
    assert_eq!(regions.child_containing(RegionId(1), b(3)), Some(RegionId(2)));
    assert_eq!(regions.child_containing(RegionId(1), b(4)), None);
}

/// The inner header is entered from the outer header, which also branches
/// to the exit, so the inner loop starts without a preheader.
#[test]
fn missing_preheader_is_inserted() {
    let mut func = nested_loops();
    assert_eq!(regions_of(&func).get(RegionId(2)).preheader, None);

    let before = func.blocks.len();
    assert!(canonicalize_loops(&mut func));
    assert_eq!(func.blocks.len(), before + 1);

    let regions = regions_of(&func);
    for id in regions.bottom_up() {
        assert!(regions.is_canonical(id), "region {id:?} not canonical");
    }
    assert_eq!(regions.get(RegionId(2)).preheader, Some(b(6)));
    assert!(!canonicalize_loops(&mut func), "canonicalization is idempotent");
}

/// Loop exit shared with a block outside the loop gets a trampoline
/// (after the missing preheader is added).
#[test]
fn shared_exit_gets_dedicated_block() {
    let mut func = make_func(
        vec![
            block(0, vec![], branch(1, 1, 3)),
            block(1, vec![], jump(2)),
            block(2, vec![], branch(1, 1, 3)),
            block(3, vec![], ret(0)),
        ],
        reprs(),
    );
    let regions = regions_of(&func);
    let lp = regions.get(RegionId(1));
    assert_eq!(lp.exits, vec![b(3)]);
    assert!(!regions.has_dedicated_exits(RegionId(1)));

    assert!(canonicalize_loops(&mut func));
    let regions = regions_of(&func);
    assert!(regions.is_canonical(RegionId(1)));
    let lp = regions.get(RegionId(1));
    assert_eq!(lp.exits.len(), 1);
    assert_ne!(lp.exits[0], b(3));
}

/// A loop headed by the entry block gets a new entry block as preheader.
#[test]
fn entry_header_gets_new_entry() {
    let mut func = make_func(
        vec![
            block(0, vec![], branch(1, 0, 1)),
            block(1, vec![], ret(0)),
        ],
        reprs(),
    );
    assert!(canonicalize_loops(&mut func));
    assert_eq!(func.entry, b(2));
    assert_eq!(func.blocks[2].terminator, jump(0));

    let regions = regions_of(&func);
    assert_eq!(regions.get(RegionId(1)).preheader, Some(b(2)));
    assert!(regions.is_canonical(RegionId(1)));
}
