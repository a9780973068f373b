use std::mem;

use pretty_assertions::assert_eq;

use crate::test_helpers::{b, block, jump, make_func, ret, v};

use super::*;

// ID newtypes

#[test]
fn arc_var_id_basics() {
    let v = ArcVarId::new(42);
    assert_eq!(v.raw(), 42);
    assert_eq!(v.index(), 42);
}

#[test]
fn arc_block_id_basics() {
    let b = ArcBlockId::new(7);
    assert_eq!(b.raw(), 7);
    assert_eq!(b.index(), 7);
    assert_eq!(ArcBlockId::from_index(7), b);
}

#[test]
fn id_sizes() {
    assert_eq!(mem::size_of::<ArcVarId>(), 4);
    assert_eq!(mem::size_of::<ArcBlockId>(), 4);
}

// Value representation

#[test]
fn repr_counting() {
    assert!(!ValueRepr::Trivial.is_counted());
    assert!(ValueRepr::Reference.is_counted());
    assert!(ValueRepr::Aggregate.is_counted());
}

#[test]
fn repr_selects_op_kind() {
    assert_eq!(ValueRepr::Reference.rc_op_kind(), RcOpKind::Strong);
    assert_eq!(ValueRepr::Aggregate.rc_op_kind(), RcOpKind::Value);
}

// Instructions

#[test]
fn defined_and_used_vars() {
    let cast = ArcInstr::Cast {
        dst: v(2),
        value: v(1),
    };
    assert_eq!(cast.defined_var(), Some(v(2)));
    assert_eq!(cast.used_vars().as_slice(), &[v(1)]);

    let call = ArcInstr::Apply {
        dst: v(3),
        func: Name::from_raw(9),
        args: vec![v(0), v(1)],
        effects: CallEffects::ReadOnly,
    };
    assert_eq!(call.defined_var(), Some(v(3)));
    assert_eq!(call.used_vars().as_slice(), &[v(0), v(1)]);

    let lit = ArcInstr::Let {
        dst: v(4),
        value: ArcValue::Literal(LitValue::Int(1)),
    };
    assert!(lit.used_vars().is_empty());
}

#[test]
fn rc_ops_define_nothing() {
    let inc = ArcInstr::inc(v(0));
    let dec = ArcInstr::dec(v(0));
    assert!(inc.is_rc_op());
    assert!(dec.is_rc_op());
    assert_eq!(inc.defined_var(), None);
    assert_eq!(dec.used_vars().as_slice(), &[v(0)]);
}

// Terminators

#[test]
fn switch_successors_keep_order() {
    let term = ArcTerminator::Switch {
        scrutinee: v(0),
        cases: vec![(0, b(3)), (1, b(1))],
        default: b(2),
    };
    assert_eq!(term.successors().as_slice(), &[b(3), b(1), b(2)]);
    assert_eq!(term.used_vars().as_slice(), &[v(0)]);
}

#[test]
fn redirect_rewrites_every_matching_edge() {
    let mut term = ArcTerminator::Branch {
        cond: v(0),
        then_block: b(1),
        else_block: b(1),
    };
    term.redirect(b(1), b(5));
    assert_eq!(term.successors().as_slice(), &[b(5), b(5)]);

    let mut ret_term = ArcTerminator::Return { value: v(0) };
    ret_term.redirect(b(1), b(5));
    assert!(ret_term.successors().is_empty());
}

// Functions

#[test]
fn fresh_var_and_push_block() {
    let mut func = make_func(
        vec![block(0, vec![], ret(0))],
        vec![ValueRepr::Reference],
    );
    let fresh = func.fresh_var(ValueRepr::Trivial);
    assert_eq!(fresh, v(1));
    assert_eq!(func.var_repr(fresh), ValueRepr::Trivial);

    assert_eq!(func.next_block_id(), b(1));
    func.push_block(block(1, vec![], jump(0)));
    assert_eq!(func.blocks.len(), 2);
}

#[test]
fn count_rc_ops_spans_blocks() {
    let func = make_func(
        vec![
            block(0, vec![ArcInstr::inc(v(0))], jump(1)),
            block(1, vec![ArcInstr::dec(v(0)), ArcInstr::dec(v(0))], ret(0)),
        ],
        vec![ValueRepr::Reference],
    );
    assert_eq!(func.count_rc_ops(), 3);
}
