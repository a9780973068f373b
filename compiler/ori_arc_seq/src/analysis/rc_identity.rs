//! Default RC-identity analysis.
//!
//! A value's root is found by following identity-preserving copies
//! (`Let { value: Var(_) }` and `Cast`) back to the variable that produced
//! the object. Projections start a new identity: the field is a different
//! object that merely may alias the aggregate's contents.

use crate::ir::{ArcFunction, ArcInstr, ArcValue, ArcVarId, ProgramPoint};

use super::{RcIdentity, RcRoot, RootDef};

/// Precomputed root and definition tables for one function.
pub struct RcIdentityInfo {
    /// Root of each variable, indexed by `ArcVarId::index()`.
    roots: Vec<Option<RcRoot>>,
    /// Definition of each variable.
    defs: Vec<Option<RootDef>>,
}

impl RcIdentityInfo {
    pub fn compute(func: &ArcFunction) -> Self {
        let num_vars = func.var_reprs.len();
        let mut defs: Vec<Option<RootDef>> = vec![None; num_vars];
        // Identity-preserving source of each variable, if it is a copy.
        let mut copy_of: Vec<Option<ArcVarId>> = vec![None; num_vars];

        for &param in &func.params {
            if let Some(slot) = defs.get_mut(param.index()) {
                *slot = Some(RootDef::Param);
            }
        }

        for block in &func.blocks {
            for (idx, instr) in block.body.iter().enumerate() {
                let Some(dst) = instr.defined_var() else {
                    continue;
                };
                let Some(slot) = defs.get_mut(dst.index()) else {
                    continue;
                };
                *slot = Some(RootDef::At(ProgramPoint::new(block.id, idx)));
                match instr {
                    ArcInstr::Let {
                        value: ArcValue::Var(src),
                        ..
                    }
                    | ArcInstr::Cast { value: src, .. } => copy_of[dst.index()] = Some(*src),
                    _ => {}
                }
            }
        }

        let roots = (0..num_vars)
            .map(|idx| {
                let var = ArcVarId::new(u32::try_from(idx).ok()?);
                resolve(func, &defs, &copy_of, var)
            })
            .collect();

        Self { roots, defs }
    }
}

/// Follow copies from `var` to the producing variable.
fn resolve(
    func: &ArcFunction,
    defs: &[Option<RootDef>],
    copy_of: &[Option<ArcVarId>],
    var: ArcVarId,
) -> Option<RcRoot> {
    if !func.var_reprs.get(var.index())?.is_counted() {
        return None;
    }
    let mut current = var;
    // A copy chain longer than the variable count is a cycle.
    for _ in 0..=copy_of.len() {
        if defs.get(current.index()).copied().flatten().is_none() {
            return None;
        }
        match copy_of.get(current.index()).copied().flatten() {
            Some(src) => current = src,
            None => return Some(RcRoot::new(current)),
        }
    }
    None
}

impl RcIdentity for RcIdentityInfo {
    fn root_of(&self, var: ArcVarId) -> Option<RcRoot> {
        self.roots.get(var.index()).copied().flatten()
    }

    fn definition(&self, root: RcRoot) -> Option<RootDef> {
        self.defs.get(root.var().index()).copied().flatten()
    }
}
