use std::cell::Cell;
use std::rc::Rc;

use pretty_assertions::assert_eq;

use crate::ir::{ArcBlockId, ValueRepr};
use crate::test_helpers::{
    b, block, branch, count_dec, count_inc, dec, inc, jump, make_func, opaque_call, ret,
    unreachable, use_call, v,
};

use super::*;

fn reprs() -> Vec<ValueRepr> {
    vec![ValueRepr::Reference, ValueRepr::Trivial, ValueRepr::Trivial]
}

fn loop_arc() -> ArcSeqConfig {
    ArcSeqConfig::default()
}

fn block_only() -> ArcSeqConfig {
    ArcSeqConfig::default().with_loop_arc(false)
}

fn run(func: &mut ArcFunction, config: &ArcSeqConfig) -> PassOutcome {
    match run_arc_sequence_opts(func, config) {
        Ok(outcome) => outcome,
        Err(err) => panic!("pass rejected function: {err}"),
    }
}

/// `inc x; dec x` with nothing between.
fn adjacent_pair() -> ArcFunction {
    make_func(
        vec![block(0, vec![inc(0), dec(0), use_call(2, &[0])], ret(0))],
        reprs(),
    )
}

/// Self loop whose body retains, reads and releases v0 on every trip.
fn do_while() -> ArcFunction {
    make_func(
        vec![
            block(0, vec![], jump(1)),
            block(1, vec![inc(0), use_call(2, &[0]), dec(0)], branch(1, 1, 2)),
            block(2, vec![], ret(0)),
        ],
        reprs(),
    )
}

/// Both arms retain v0; the join reads and releases it.
fn diamond_retains() -> ArcFunction {
    make_func(
        vec![
            block(0, vec![], branch(1, 1, 2)),
            block(1, vec![inc(0)], jump(3)),
            block(2, vec![inc(0)], jump(3)),
            block(3, vec![use_call(2, &[0]), dec(0)], ret(0)),
        ],
        reprs(),
    )
}

// Scenarios

#[test]
fn adjacent_pair_removed() {
    for config in [loop_arc(), block_only()] {
        let mut func = adjacent_pair();
        let outcome = run(&mut func, &config);

        assert_eq!(func.blocks[0].body, vec![use_call(2, &[0])]);
        assert_eq!(outcome.stats.removed, 2);
        assert_eq!(outcome.stats.moved, 0);
        assert_eq!(outcome.invalidation, InvalidationKind::CallsAndInstructions);
    }
}

#[test]
fn loop_pair_hoisted_to_preheader_and_exit() {
    let mut func = do_while();
    let outcome = run(&mut func, &loop_arc());

    assert_eq!(count_inc(&func, 0, v(0)), 1);
    assert_eq!(count_inc(&func, 1, v(0)), 0);
    assert_eq!(count_dec(&func, 1, v(0)), 0);
    assert_eq!(count_dec(&func, 2, v(0)), 1);
    assert_eq!((outcome.stats.moved, outcome.stats.removed), (2, 2));
    assert_eq!(outcome.invalidation, InvalidationKind::CallsAndInstructions);
}

/// Without loop regions the back edge ends every lifetime.
#[test]
fn block_only_leaves_loop_pair() {
    let mut func = do_while();
    let before = func.clone();
    let outcome = run(&mut func, &block_only());

    assert_eq!(func, before);
    assert_eq!(outcome.invalidation, InvalidationKind::Nothing);
    assert!(outcome.stats.rounds > 0);
}

#[test]
fn releasing_call_blocks_pairing() {
    for config in [loop_arc(), block_only()] {
        let mut func = make_func(
            vec![block(0, vec![inc(0), opaque_call(2), dec(0)], ret(0))],
            reprs(),
        );
        let before = func.clone();
        let outcome = run(&mut func, &config);

        assert_eq!(func, before);
        assert!(!outcome.stats.changed());
    }
}

#[test]
fn diamond_increments_merge() {
    for config in [loop_arc(), block_only()] {
        let mut func = diamond_retains();
        let outcome = run(&mut func, &config);

        assert_eq!(func.blocks[0].body, vec![inc(0)]);
        assert!(func.blocks[1].body.is_empty());
        assert!(func.blocks[2].body.is_empty());
        assert_eq!(count_dec(&func, 3, v(0)), 1);
        assert_eq!((outcome.stats.moved, outcome.stats.removed), (1, 2));
    }
}

#[test]
fn trapping_path_needs_no_balance() {
    for config in [loop_arc(), block_only()] {
        let mut func = make_func(
            vec![
                block(0, vec![inc(0)], branch(1, 1, 2)),
                block(1, vec![], unreachable()),
                block(2, vec![dec(0)], ret(0)),
            ],
            reprs(),
        );
        let outcome = run(&mut func, &config);

        assert_eq!(func.count_rc_ops(), 0);
        assert_eq!(outcome.stats.removed, 2);
    }
}

// Driver

#[test]
fn disabled_category_is_a_no_op() {
    let mut func = adjacent_pair();
    let before = func.clone();
    let outcome = run(&mut func, &loop_arc().with_arc_optimizations(false));

    assert_eq!(func, before);
    assert_eq!(outcome.stats, ArcSeqStats::default());
    assert_eq!(outcome.invalidation, InvalidationKind::Nothing);
}

#[test]
fn global_initializers_are_skipped() {
    let mut func = adjacent_pair();
    func.name = "globalinit_table".to_owned();
    let before = func.clone();
    let outcome = run(&mut func, &loop_arc());

    assert_eq!(func, before);
    assert_eq!(outcome.invalidation, InvalidationKind::Nothing);
}

#[test]
fn malformed_function_rejected_untouched() {
    let mut func = adjacent_pair();
    func.blocks[0].terminator = jump(9);
    let before = func.clone();

    let result = run_arc_sequence_opts(&mut func, &loop_arc());
    assert!(matches!(
        result,
        Err(PreconditionError::DanglingSuccessor { target: 9, .. })
    ));
    assert_eq!(func, before);
}

/// A loop headed by the entry gets a preheader: the CFG changed.
#[test]
fn canonicalization_reports_function_body() {
    let mut func = make_func(
        vec![
            block(0, vec![inc(0), use_call(2, &[0]), dec(0)], branch(1, 0, 1)),
            block(1, vec![], ret(0)),
        ],
        reprs(),
    );
    let mut cache = LazyAnalyses::new();
    let pass = ArcSequenceOpts::new(loop_arc());
    let Ok(outcome) = pass.run(&mut func, &mut cache) else {
        panic!("pass rejected function");
    };

    assert_eq!(outcome.invalidation, InvalidationKind::FunctionBody);
    assert_eq!(func.blocks.len(), 3);
    assert_ne!(func.entry, b(0));
    assert_eq!(count_inc(&func, func.entry.index(), v(0)), 1);
    assert_eq!(count_dec(&func, 1, v(0)), 1);
    assert_eq!(count_inc(&func, 0, v(0)), 0);
    assert_eq!(
        cache.invalidations(),
        &[InvalidationKind::FunctionBody, InvalidationKind::FunctionBody]
    );
}

#[test]
fn second_run_finds_nothing() {
    for config in [loop_arc(), block_only()] {
        let mut func = diamond_retains();
        run(&mut func, &config);
        let after_first = func.clone();
        let outcome = run(&mut func, &config);

        assert_eq!(func, after_first);
        assert_eq!(outcome.invalidation, InvalidationKind::Nothing);
    }
}

#[test]
fn config_selects_pipeline() {
    assert!(ArcSequenceOpts::new(loop_arc()).config().enable_loop_arc);
    assert_eq!(ArcSequenceOpts::new(block_only()).strategy.name(), "block-only");
    assert_eq!(ArcSequenceOpts::new(loop_arc()).strategy.name(), "loop-aware");
}

/// Records how often it ran; changes nothing.
struct Recording {
    runs: Rc<Cell<usize>>,
}

impl PairingStrategy for Recording {
    fn name(&self) -> &'static str {
        "recording"
    }

    fn optimize(&self, _func: &mut ArcFunction, _cache: &mut dyn AnalysisCache) -> ArcSeqStats {
        self.runs.set(self.runs.get() + 1);
        ArcSeqStats::default()
    }
}

#[test]
fn custom_strategy_replaces_pipeline() {
    let runs = Rc::new(Cell::new(0));
    let mut func = adjacent_pair();
    let before = func.clone();
    let pass = ArcSequenceOpts::new(loop_arc()).with_strategy(Box::new(Recording {
        runs: Rc::clone(&runs),
    }));
    let mut cache = LazyAnalyses::new();

    let Ok(outcome) = pass.run(&mut func, &mut cache) else {
        panic!("pass rejected function");
    };
    assert_eq!(runs.get(), 1);
    assert_eq!(func, before);
    assert_eq!(outcome.invalidation, InvalidationKind::Nothing);
    assert!(cache.invalidations().is_empty());
}

#[test]
fn outcome_block_ids_stay_dense() {
    let mut func = do_while();
    run(&mut func, &loop_arc());
    for (idx, bl) in func.blocks.iter().enumerate() {
        assert_eq!(bl.id, ArcBlockId::from_index(idx));
    }
}
