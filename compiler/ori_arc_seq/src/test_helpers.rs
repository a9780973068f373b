//! Shared test utilities for the sequence optimizer.
//!
//! Factory functions used across `graph`, `loops`, `analysis`, and `seq`
//! tests. Only compiled in test builds.

use crate::ir::{
    ArcBlock, ArcBlockId, ArcFunction, ArcInstr, ArcTerminator, ArcVarId, CallEffects, Name,
    ValueRepr,
};

/// Shorthand for `ArcVarId::new(n)`.
pub(crate) fn v(n: u32) -> ArcVarId {
    ArcVarId::new(n)
}

/// Shorthand for `ArcBlockId::new(n)`.
pub(crate) fn b(n: u32) -> ArcBlockId {
    ArcBlockId::new(n)
}

/// Build a block with the given id, body, and terminator.
pub(crate) fn block(id: u32, body: Vec<ArcInstr>, terminator: ArcTerminator) -> ArcBlock {
    ArcBlock {
        id: b(id),
        body,
        terminator,
    }
}

pub(crate) fn jump(target: u32) -> ArcTerminator {
    ArcTerminator::Jump { target: b(target) }
}

pub(crate) fn ret(var: u32) -> ArcTerminator {
    ArcTerminator::Return { value: v(var) }
}

pub(crate) fn branch(cond: u32, then_block: u32, else_block: u32) -> ArcTerminator {
    ArcTerminator::Branch {
        cond: v(cond),
        then_block: b(then_block),
        else_block: b(else_block),
    }
}

pub(crate) fn unreachable() -> ArcTerminator {
    ArcTerminator::Unreachable
}

pub(crate) fn inc(var: u32) -> ArcInstr {
    ArcInstr::inc(v(var))
}

pub(crate) fn dec(var: u32) -> ArcInstr {
    ArcInstr::dec(v(var))
}

/// Read-only call `dst = f(args)`: a use that never releases.
pub(crate) fn use_call(dst: u32, args: &[u32]) -> ArcInstr {
    ArcInstr::Apply {
        dst: v(dst),
        func: Name::from_raw(1),
        args: args.iter().map(|&a| v(a)).collect(),
        effects: CallEffects::ReadOnly,
    }
}

/// Opaque call `dst = g()` that may release anything.
pub(crate) fn opaque_call(dst: u32) -> ArcInstr {
    ArcInstr::Apply {
        dst: v(dst),
        func: Name::from_raw(2),
        args: vec![],
        effects: CallEffects::MayRelease,
    }
}

/// Build an `ArcFunction` whose only parameter is `v0`.
pub(crate) fn make_func(blocks: Vec<ArcBlock>, var_reprs: Vec<ValueRepr>) -> ArcFunction {
    make_func_with_params(vec![v(0)], blocks, var_reprs)
}

/// Build an `ArcFunction` with explicit parameters.
pub(crate) fn make_func_with_params(
    params: Vec<ArcVarId>,
    blocks: Vec<ArcBlock>,
    var_reprs: Vec<ValueRepr>,
) -> ArcFunction {
    ArcFunction {
        name: "test_fn".to_owned(),
        params,
        blocks,
        entry: ArcBlockId::new(0),
        var_reprs,
    }
}

/// Count `RcInc` for a specific var in a block.
pub(crate) fn count_inc(func: &ArcFunction, block_idx: usize, var: ArcVarId) -> usize {
    func.blocks[block_idx]
        .body
        .iter()
        .filter(|i| matches!(i, ArcInstr::RcInc { var: x, .. } if *x == var))
        .count()
}

/// Count `RcDec` for a specific var in a block.
pub(crate) fn count_dec(func: &ArcFunction, block_idx: usize, var: ArcVarId) -> usize {
    func.blocks[block_idx]
        .body
        .iter()
        .filter(|i| matches!(i, ArcInstr::RcDec { var: x, .. } if *x == var))
        .count()
}
