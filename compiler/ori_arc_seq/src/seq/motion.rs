//! Deferred code motion.
//!
//! Matching sets are computed against a frozen snapshot of the function, so
//! program points must stay valid until the round ends. [`CodeMotionApplier`]
//! therefore only records insertions and deletions in [`PendingEdits`]; the
//! round splices them into the function in one go.

use rustc_hash::{FxHashMap, FxHashSet};

use crate::ir::{ArcBlockId, ArcFunction, ArcInstr, ProgramPoint};

use super::matching::MatchingSet;

/// Counters reported by the pass.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ArcSeqStats {
    /// RC operations inserted at new positions.
    pub moved: usize,
    /// RC operations deleted.
    pub removed: usize,
    /// Matching rounds performed.
    pub rounds: usize,
}

impl ArcSeqStats {
    /// Returns `true` if the function was rewritten.
    pub fn changed(&self) -> bool {
        self.moved > 0 || self.removed > 0
    }
}

/// Insertions and deletions collected during one round.
#[derive(Debug, Default)]
pub(crate) struct PendingEdits {
    inserts: Vec<(ProgramPoint, ArcInstr)>,
    deletes: FxHashSet<ProgramPoint>,
}

impl PendingEdits {
    /// Queue `instr` to go immediately before position `at`.
    ///
    /// Several insertions at one point keep their queueing order.
    pub(crate) fn insert_before(&mut self, at: ProgramPoint, instr: ArcInstr) {
        self.inserts.push((at, instr));
    }

    pub(crate) fn delete(&mut self, at: ProgramPoint) {
        self.deletes.insert(at);
    }

    /// Apply every queued edit. Returns the blocks whose bodies changed.
    pub(crate) fn splice(&mut self, func: &mut ArcFunction) -> FxHashSet<ArcBlockId> {
        let mut by_block: FxHashMap<ArcBlockId, Vec<(usize, ArcInstr)>> = FxHashMap::default();
        for (at, instr) in self.inserts.drain(..) {
            by_block.entry(at.block).or_default().push((at.index, instr));
        }
        let mut touched: FxHashSet<ArcBlockId> = by_block.keys().copied().collect();
        touched.extend(self.deletes.iter().map(|p| p.block));

        for &block in &touched {
            let mut inserts = by_block.remove(&block).unwrap_or_default();
            inserts.sort_by_key(|(idx, _)| *idx);
            let mut inserts = inserts.into_iter().peekable();

            let old = std::mem::take(&mut func.blocks[block.index()].body);
            let mut body = Vec::with_capacity(old.len() + 2);
            for (idx, instr) in old.into_iter().enumerate() {
                while let Some((_, new)) = inserts.next_if(|(at, _)| *at <= idx) {
                    body.push(new);
                }
                if !self.deletes.contains(&ProgramPoint::new(block, idx)) {
                    body.push(instr);
                }
            }
            body.extend(inserts.map(|(_, new)| new));
            func.blocks[block.index()].body = body;
        }
        self.deletes.clear();
        touched
    }
}

/// Turns a matching set into queued edits.
pub(crate) struct CodeMotionApplier<'a> {
    func: &'a ArcFunction,
    edits: &'a mut PendingEdits,
    stats: &'a mut ArcSeqStats,
}

impl<'a> CodeMotionApplier<'a> {
    pub(crate) fn new(
        func: &'a ArcFunction,
        edits: &'a mut PendingEdits,
        stats: &'a mut ArcSeqStats,
    ) -> Self {
        Self { func, edits, stats }
    }

    /// Queue the rewrite described by `set`.
    ///
    /// New operations target the root's defining variable and take their
    /// form from its representation.
    pub(crate) fn apply(&mut self, set: &MatchingSet) {
        let var = set.root.var();
        let kind = self.func.var_repr(var).rc_op_kind();

        for &at in &set.inc_insert_points {
            self.edits.insert_before(at, ArcInstr::RcInc { var, kind });
        }
        for &at in &set.dec_insert_points {
            self.edits.insert_before(at, ArcInstr::RcDec { var, kind });
        }
        for &at in set.increments.iter().chain(&set.decrements) {
            self.edits.delete(at);
        }

        self.stats.moved += set.inc_insert_points.len() + set.dec_insert_points.len();
        self.stats.removed += set.increments.len() + set.decrements.len();
        tracing::trace!(
            root = var.raw(),
            inserted = set.inc_insert_points.len() + set.dec_insert_points.len(),
            removed = set.increments.len() + set.decrements.len(),
            "applied matching set"
        );
    }
}
