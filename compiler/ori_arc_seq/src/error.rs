//! Precondition checks for the pass entry point.
//!
//! The optimizer assumes verified input. [`verify_function`] performs the
//! cheap structural checks whose violation would otherwise surface as an
//! index panic deep inside the pass.

use thiserror::Error;

use crate::ir::{ArcFunction, ArcInstr, ArcVarId};

/// A function that does not satisfy the pass's input contract.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum PreconditionError {
    #[error("function `{function}` has no blocks")]
    EmptyFunction { function: String },

    #[error("function `{function}`: block at index {index} carries id {found}")]
    BlockIdMismatch {
        function: String,
        index: usize,
        found: u32,
    },

    #[error("function `{function}`: entry block {entry} does not exist")]
    BadEntry { function: String, entry: u32 },

    #[error("function `{function}`: block {block} jumps to missing block {target}")]
    DanglingSuccessor {
        function: String,
        block: u32,
        target: u32,
    },

    #[error("function `{function}`: variable v{var} has no representation")]
    UnknownVar { function: String, var: u32 },

    #[error("function `{function}`: block {block} counts trivial variable v{var}")]
    RcOnTrivial {
        function: String,
        block: u32,
        var: u32,
    },
}

/// Check the structural input contract of the pass.
pub fn verify_function(func: &ArcFunction) -> Result<(), PreconditionError> {
    let function = || func.name.clone();

    if func.blocks.is_empty() {
        return Err(PreconditionError::EmptyFunction {
            function: function(),
        });
    }
    if func.entry.index() >= func.blocks.len() {
        return Err(PreconditionError::BadEntry {
            function: function(),
            entry: func.entry.raw(),
        });
    }

    let check_var = |var: ArcVarId| {
        if var.index() < func.var_reprs.len() {
            Ok(())
        } else {
            Err(PreconditionError::UnknownVar {
                function: function(),
                var: var.raw(),
            })
        }
    };

    for &param in &func.params {
        check_var(param)?;
    }

    for (index, block) in func.blocks.iter().enumerate() {
        if block.id.index() != index {
            return Err(PreconditionError::BlockIdMismatch {
                function: function(),
                index,
                found: block.id.raw(),
            });
        }

        for instr in &block.body {
            if let Some(dst) = instr.defined_var() {
                check_var(dst)?;
            }
            for var in instr.used_vars() {
                check_var(var)?;
            }
            if let ArcInstr::RcInc { var, .. } | ArcInstr::RcDec { var, .. } = instr {
                if !func.var_repr(*var).is_counted() {
                    return Err(PreconditionError::RcOnTrivial {
                        function: function(),
                        block: block.id.raw(),
                        var: var.raw(),
                    });
                }
            }
        }

        for var in block.terminator.used_vars() {
            check_var(var)?;
        }
        for target in block.terminator.successors() {
            if target.index() >= func.blocks.len() {
                return Err(PreconditionError::DanglingSuccessor {
                    function: function(),
                    block: block.id.raw(),
                    target: target.raw(),
                });
            }
        }
    }

    Ok(())
}
