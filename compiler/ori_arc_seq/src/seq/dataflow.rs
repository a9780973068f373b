//! Top-down and bottom-up pairing dataflow over a flat region.
//!
//! # Algorithm
//!
//! For each root counted in the region, two single-pass walks run over the
//! acyclic node graph:
//!
//! - **Top-down** (reverse postorder): an increment starts a pending state;
//!   the next decrement on every path pairs with every increment pending
//!   there. States merge at joins only if every predecessor carries one.
//! - **Bottom-up** (postorder): the mirror image, pairing each decrement
//!   with the increments that reach it. A successor without state is
//!   ignored when it provably traps.
//!
//! Anything that may observe or release the root kills the pending state.
//! Whenever a pending state is dropped where it could still matter (an
//! escape, a join with an unpaired side, an interference, a nested
//! restart) the operations it carries become *partial* and will never be
//! rewritten. A pending state that simply runs into a trap is dropped
//! silently: nothing after a trap needs balancing.
//!
//! # References
//!
//! - Swift `ARCSequenceOpts` (`RefCountState`, `ARCSequenceDataflow`)

use rustc_hash::FxHashSet;
use smallvec::{smallvec, SmallVec};

use crate::analysis::{Oracles, RcRoot};
use crate::ir::{ArcFunction, ArcInstr, ProgramPoint};

use super::blot::BlotMap;
use super::flat::{Effect, FlatRegion, NodeKind};

/// Pairing information of one increment.
#[derive(Clone, Debug)]
pub(crate) struct IncEntry {
    pub root: RcRoot,
    /// Decrements the increment pairs with top-down.
    pub decs: SmallVec<[ProgramPoint; 4]>,
    /// Dropped somewhere it could matter; never rewritten.
    pub partial: bool,
    /// The root is read between this increment and a paired decrement.
    pub used: bool,
}

/// Pairing information of one decrement.
#[derive(Clone, Debug)]
pub(crate) struct DecEntry {
    pub root: RcRoot,
    /// Increments the decrement pairs with bottom-up.
    pub incs: SmallVec<[ProgramPoint; 4]>,
    pub partial: bool,
    pub used: bool,
}

/// Result of one dataflow run: both pairing directions.
#[derive(Default)]
pub(crate) struct PairingMaps {
    pub inc_to_dec: BlotMap<ProgramPoint, IncEntry>,
    pub dec_to_inc: BlotMap<ProgramPoint, DecEntry>,
    /// A pending operation was superseded by another of the same root.
    pub nesting_detected: bool,
}

/// Operations pending on one path.
#[derive(Clone, Debug)]
struct Pending {
    points: SmallVec<[ProgramPoint; 4]>,
    used: bool,
}

impl Pending {
    fn new(at: ProgramPoint) -> Self {
        Self {
            points: smallvec![at],
            used: false,
        }
    }

    fn absorb(&mut self, other: &Pending) {
        for &p in &other.points {
            if !self.points.contains(&p) {
                self.points.push(p);
            }
        }
        self.used |= other.used;
    }
}

/// Roots of every RC operation in the reached block nodes, in first-seen order.
pub(crate) fn region_roots(func: &ArcFunction, flat: &FlatRegion, oracles: &Oracles<'_>) -> Vec<RcRoot> {
    let mut seen: FxHashSet<RcRoot> = FxHashSet::default();
    let mut roots = Vec::new();
    for &n in flat.rpo() {
        let NodeKind::Block(block) = flat.node(n).kind else {
            continue;
        };
        for instr in &func.blocks[block.index()].body {
            if let ArcInstr::RcInc { var, .. } | ArcInstr::RcDec { var, .. } = instr {
                if let Some(root) = oracles.identity.root_of(*var) {
                    if seen.insert(root) {
                        roots.push(root);
                    }
                }
            }
        }
    }
    roots
}

/// Run both dataflow directions for every root of the region.
pub(crate) fn compute_pairings(
    func: &ArcFunction,
    flat: &FlatRegion,
    oracles: &Oracles<'_>,
) -> PairingMaps {
    let mut maps = PairingMaps::default();
    for root in region_roots(func, flat, oracles) {
        let mut walk = RootWalk {
            func,
            flat,
            oracles,
            root,
            maps: &mut maps,
        };
        walk.top_down();
        walk.bottom_up();
    }
    maps
}

struct RootWalk<'a, 'o> {
    func: &'a ArcFunction,
    flat: &'a FlatRegion,
    oracles: &'a Oracles<'o>,
    root: RcRoot,
    maps: &'a mut PairingMaps,
}

impl RootWalk<'_, '_> {
    fn live_escape(&self, n: usize) -> bool {
        self.flat.live_escape(self.func, n, self.root, self.oracles)
    }

    fn track_inc(&mut self, at: ProgramPoint) {
        let root = self.root;
        self.maps.inc_to_dec.get_or_insert_with(at, || IncEntry {
            root,
            decs: SmallVec::new(),
            partial: false,
            used: false,
        });
    }

    fn track_dec(&mut self, at: ProgramPoint) {
        let root = self.root;
        self.maps.dec_to_inc.get_or_insert_with(at, || DecEntry {
            root,
            incs: SmallVec::new(),
            partial: false,
            used: false,
        });
    }

    fn incs_partial(&mut self, pending: Option<Pending>) {
        for p in pending.into_iter().flat_map(|p| p.points) {
            if let Some(entry) = self.maps.inc_to_dec.get_mut(&p) {
                entry.partial = true;
            }
        }
    }

    fn decs_partial(&mut self, pending: Option<Pending>) {
        for p in pending.into_iter().flat_map(|p| p.points) {
            if let Some(entry) = self.maps.dec_to_inc.get_mut(&p) {
                entry.partial = true;
            }
        }
    }

    // ── Top-down ────────────────────────────────────────────────────

    fn top_down(&mut self) {
        let flat = self.flat;
        let mut out: Vec<Option<Pending>> = vec![None; flat.len()];
        for &n in flat.rpo() {
            let mut state = self.merge_preds(n, &out);

            for (at, effect) in flat.effects(self.func, n, self.root, self.oracles) {
                match effect {
                    Effect::Inc => {
                        if state.is_some() {
                            self.maps.nesting_detected = true;
                            self.incs_partial(state.take());
                        }
                        self.track_inc(at);
                        state = Some(Pending::new(at));
                    }
                    Effect::Dec => {
                        if let Some(pending) = state.take() {
                            for p in &pending.points {
                                if let Some(entry) = self.maps.inc_to_dec.get_mut(p) {
                                    entry.decs.push(at);
                                    entry.used |= pending.used;
                                }
                            }
                        }
                    }
                    Effect::Observe | Effect::MayDecrement => self.incs_partial(state.take()),
                    Effect::Use => {
                        if let Some(pending) = state.as_mut() {
                            pending.used = true;
                        }
                    }
                    Effect::None => {}
                }
            }

            if self.live_escape(n) {
                self.incs_partial(state.take());
            } else if flat.node(n).succs.is_empty() {
                state = None;
            }
            out[n] = state;
        }
    }

    fn merge_preds(&mut self, n: usize, out: &[Option<Pending>]) -> Option<Pending> {
        let flat = self.flat;
        let node = flat.node(n);
        let unknown_entry = n == flat.entry() || node.retreating_pred;
        let mut merged: Option<Pending> = None;
        let mut missing = unknown_entry || node.preds.is_empty();
        for &p in &node.preds {
            match &out[p] {
                Some(pending) => match merged.as_mut() {
                    Some(acc) => acc.absorb(pending),
                    None => merged = Some(pending.clone()),
                },
                None => missing = true,
            }
        }
        if missing {
            self.incs_partial(merged);
            return None;
        }
        merged
    }

    // ── Bottom-up ───────────────────────────────────────────────────

    fn bottom_up(&mut self) {
        let flat = self.flat;
        let mut incoming: Vec<Option<Pending>> = vec![None; flat.len()];
        for &n in flat.rpo().iter().rev() {
            let mut state = self.merge_succs(n, &incoming);

            let effects = flat.effects(self.func, n, self.root, self.oracles);
            for &(at, effect) in effects.iter().rev() {
                match effect {
                    Effect::Dec => {
                        if state.is_some() {
                            self.maps.nesting_detected = true;
                            self.decs_partial(state.take());
                        }
                        self.track_dec(at);
                        state = Some(Pending::new(at));
                    }
                    Effect::Inc => {
                        if let Some(pending) = state.take() {
                            for p in &pending.points {
                                if let Some(entry) = self.maps.dec_to_inc.get_mut(p) {
                                    entry.incs.push(at);
                                    entry.used |= pending.used;
                                }
                            }
                        }
                    }
                    Effect::Observe | Effect::MayDecrement => self.decs_partial(state.take()),
                    Effect::Use => {
                        if let Some(pending) = state.as_mut() {
                            pending.used = true;
                        }
                    }
                    Effect::None => {}
                }
            }

            if n == flat.entry() || flat.node(n).retreating_pred {
                self.decs_partial(state.take());
            }
            incoming[n] = state;
        }
    }

    fn merge_succs(&mut self, n: usize, incoming: &[Option<Pending>]) -> Option<Pending> {
        let flat = self.flat;
        let node = flat.node(n);
        let mut merged: Option<Pending> = None;
        let mut missing = false;
        for &s in &node.succs {
            match &incoming[s] {
                Some(pending) => match merged.as_mut() {
                    Some(acc) => acc.absorb(pending),
                    None => merged = Some(pending.clone()),
                },
                None if flat.node(s).terminating => {}
                None => missing = true,
            }
        }
        if missing || self.live_escape(n) {
            self.decs_partial(merged);
            return None;
        }
        merged
    }
}
