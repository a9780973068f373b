//! Default alias analysis.
//!
//! Conservative by construction: two counted values may alias unless one of
//! them is a *fresh leaf*, i.e. the result of a `Construct` that owns no
//! counted values and never escapes the function (never passed to a call or
//! constructor, never projected from, never returned). Nothing can hold a
//! reference to a fresh leaf except its own copies, and releasing it
//! releases nothing else.

use rustc_hash::FxHashSet;

use crate::ir::{ArcFunction, ArcInstr, ArcTerminator, ArcVarId};

use super::{AliasOracle, RcIdentity, RcIdentityInfo, RcRoot};

pub struct BasicAliasAnalysis {
    counted: Vec<bool>,
    roots: Vec<Option<RcRoot>>,
    fresh: FxHashSet<RcRoot>,
}

impl BasicAliasAnalysis {
    pub fn compute(func: &ArcFunction, identity: &RcIdentityInfo) -> Self {
        let counted: Vec<bool> = func.var_reprs.iter().map(|r| r.is_counted()).collect();
        let is_counted = |var: &ArcVarId| counted.get(var.index()).copied().unwrap_or(true);
        let roots: Vec<Option<RcRoot>> = (0..func.var_reprs.len())
            .map(|idx| {
                u32::try_from(idx)
                    .ok()
                    .and_then(|raw| identity.root_of(ArcVarId::new(raw)))
            })
            .collect();
        let root_of = |var: ArcVarId| roots.get(var.index()).copied().flatten();

        let mut leaves: FxHashSet<RcRoot> = FxHashSet::default();
        let mut escaping: FxHashSet<RcRoot> = FxHashSet::default();

        for block in &func.blocks {
            for instr in &block.body {
                match instr {
                    ArcInstr::Construct { dst, args } => {
                        if !args.iter().any(is_counted) {
                            if let Some(root) = root_of(*dst) {
                                leaves.insert(root);
                            }
                        }
                        escaping.extend(args.iter().filter_map(|&a| root_of(a)));
                    }
                    ArcInstr::Apply { args, .. } => {
                        escaping.extend(args.iter().filter_map(|&a| root_of(a)));
                    }
                    ArcInstr::Project { value, .. } => escaping.extend(root_of(*value)),
                    ArcInstr::Let { .. }
                    | ArcInstr::Cast { .. }
                    | ArcInstr::IsShared { .. }
                    | ArcInstr::RcInc { .. }
                    | ArcInstr::RcDec { .. } => {}
                }
            }
            if let ArcTerminator::Return { value } = block.terminator {
                escaping.extend(root_of(value));
            }
        }

        let fresh = leaves.difference(&escaping).copied().collect();
        Self {
            counted,
            roots,
            fresh,
        }
    }

    fn root(&self, var: ArcVarId) -> Option<RcRoot> {
        self.roots.get(var.index()).copied().flatten()
    }

    /// Returns `true` if `root` is a fresh, non-escaping leaf object.
    pub fn is_fresh(&self, root: RcRoot) -> bool {
        self.fresh.contains(&root)
    }
}

impl AliasOracle for BasicAliasAnalysis {
    fn may_alias(&self, a: ArcVarId, b: ArcVarId) -> bool {
        let is_counted = |v: ArcVarId| self.counted.get(v.index()).copied().unwrap_or(true);
        if !is_counted(a) || !is_counted(b) {
            return false;
        }
        match (self.root(a), self.root(b)) {
            (Some(ra), Some(rb)) if ra == rb => true,
            (Some(ra), Some(rb)) => !self.is_fresh(ra) && !self.is_fresh(rb),
            (Some(r), None) | (None, Some(r)) => !self.is_fresh(r),
            (None, None) => true,
        }
    }
}
