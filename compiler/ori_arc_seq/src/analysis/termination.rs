//! Default program-termination analysis.

use crate::graph::compute_successors;
use crate::ir::{ArcBlockId, ArcFunction, ArcTerminator};

use super::TerminationOracle;

/// Blocks from which every path ends in `Unreachable`.
///
/// Least fixed point: a block is terminating if it traps itself, or if it
/// has successors and all of them are terminating. Cycles without an exit
/// therefore stay non-terminating.
pub struct ProgramTermination {
    terminating: Vec<bool>,
}

impl ProgramTermination {
    pub fn compute(func: &ArcFunction) -> Self {
        let succs = compute_successors(func);
        let mut terminating: Vec<bool> = func
            .blocks
            .iter()
            .map(|block| matches!(block.terminator, ArcTerminator::Unreachable))
            .collect();

        let mut changed = true;
        while changed {
            changed = false;
            for (idx, block_succs) in succs.iter().enumerate() {
                if terminating[idx] || block_succs.is_empty() {
                    continue;
                }
                if block_succs.iter().all(|&s| terminating[s]) {
                    terminating[idx] = true;
                    changed = true;
                }
            }
        }

        Self { terminating }
    }
}

impl TerminationOracle for ProgramTermination {
    fn is_terminating(&self, block: ArcBlockId) -> bool {
        self.terminating.get(block.index()).copied().unwrap_or(false)
    }
}
