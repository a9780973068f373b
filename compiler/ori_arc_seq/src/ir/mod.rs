//! ARC IR: the basic-block representation the sequence optimizer rewrites.
//!
//! The IR arrives here already lowered: every reference-count operation
//! inserted by RC insertion is an explicit [`ArcInstr::RcInc`] or
//! [`ArcInstr::RcDec`] at an ordered position inside a basic block.
//!
//! # Architecture
//!
//! - **[`ArcFunction`]**: a function body: parameters, blocks, value reprs
//! - **[`ArcBlock`]**: a basic block: body instructions and a terminator
//! - **[`ArcInstr`]**: a single instruction (binding, call, construct, RC op)
//! - **[`ArcTerminator`]**: block exit (return, jump, branch, switch)
//!
//! Values are named via [`ArcVarId`] (SSA-like). Control flow uses
//! [`ArcBlockId`] references between blocks. Each variable carries a
//! [`ValueRepr`] that decides whether it is reference counted at all, and
//! whether its RC operations are direct (`Strong`) or structural (`Value`).

use smallvec::{smallvec, SmallVec};

// ── ID newtypes ─────────────────────────────────────────────────────

/// Variable ID within an ARC IR function.
///
/// IDs are allocated sequentially starting from 0 and index into
/// [`ArcFunction::var_reprs`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(transparent)]
pub struct ArcVarId(u32);

impl ArcVarId {
    /// Create a new variable ID from a raw index.
    #[inline]
    pub fn new(raw: u32) -> Self {
        Self(raw)
    }

    /// Get the raw `u32` value.
    #[inline]
    pub fn raw(self) -> u32 {
        self.0
    }

    /// Get the index as `usize` (for indexing into `Vec`s).
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Basic block ID within an ARC IR function.
///
/// `blocks[id.index()]` is the block with this ID.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(transparent)]
pub struct ArcBlockId(u32);

impl ArcBlockId {
    /// Create a new block ID from a raw index.
    #[inline]
    pub fn new(raw: u32) -> Self {
        Self(raw)
    }

    /// Get the raw `u32` value.
    #[inline]
    pub fn raw(self) -> u32 {
        self.0
    }

    /// Get the index as `usize` (for indexing into `Vec`s).
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }

    /// Block ID for a `usize` index.
    ///
    /// # Panics
    ///
    /// Panics if the index does not fit in `u32`.
    pub fn from_index(idx: usize) -> Self {
        Self(u32::try_from(idx).unwrap_or_else(|_| panic!("block index exceeds u32::MAX")))
    }
}

/// Interned callee name. Opaque to the optimizer; only used for tracing.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(transparent)]
pub struct Name(u32);

impl Name {
    #[inline]
    pub fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    #[inline]
    pub fn raw(self) -> u32 {
        self.0
    }
}

// ── Value representation ────────────────────────────────────────────

/// How a value participates in reference counting.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ValueRepr {
    /// No reference counting (`int`, `bool`, scalar tuples).
    Trivial,
    /// A pointer to a reference-counted heap object.
    Reference,
    /// A composite value holding one or more reference-counted fields.
    /// Its RC operations retain/release every contained reference.
    Aggregate,
}

impl ValueRepr {
    /// Returns `true` if values of this repr carry reference counts.
    #[inline]
    pub fn is_counted(self) -> bool {
        !matches!(self, ValueRepr::Trivial)
    }

    /// The RC operation form used for values of this repr.
    pub fn rc_op_kind(self) -> RcOpKind {
        match self {
            ValueRepr::Aggregate => RcOpKind::Value,
            ValueRepr::Trivial | ValueRepr::Reference => RcOpKind::Strong,
        }
    }
}

/// Form of an RC operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum RcOpKind {
    /// Direct retain/release of a reference-counted object.
    Strong,
    /// Structural retain/release of every reference inside an aggregate.
    Value,
}

// ── Values ──────────────────────────────────────────────────────────

/// Literal value in the ARC IR.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum LitValue {
    Int(i64),
    Bool(bool),
    Unit,
}

/// Right-hand side of a `Let` instruction. Side-effect-free.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ArcValue {
    /// Copy of an existing variable. Shares the source's RC identity.
    Var(ArcVarId),
    /// A literal constant.
    Literal(LitValue),
}

/// What a call may do to reference counts.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum CallEffects {
    /// Unknown callee: may release any reference-counted value.
    MayRelease,
    /// Reads its arguments; never retains, releases or frees.
    ReadOnly,
}

// ── Instructions ────────────────────────────────────────────────────

/// A single instruction in an ARC IR basic block.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ArcInstr {
    /// Bind a value to a variable: `let dst = value`.
    Let { dst: ArcVarId, value: ArcValue },

    /// RC-identity-preserving reinterpretation: `let dst = value as T`.
    Cast { dst: ArcVarId, value: ArcVarId },

    /// Field projection: `let dst = value.field`.
    Project {
        dst: ArcVarId,
        value: ArcVarId,
        field: u32,
    },

    /// Allocate a fresh object (or aggregate) that takes ownership of `args`.
    Construct { dst: ArcVarId, args: Vec<ArcVarId> },

    /// Function call: `let dst = func(args...)`.
    Apply {
        dst: ArcVarId,
        func: Name,
        args: Vec<ArcVarId>,
        effects: CallEffects,
    },

    /// Uniqueness test: `dst = refcount(var) == 1`. Observes the count.
    IsShared { dst: ArcVarId, var: ArcVarId },

    /// Increment reference count.
    RcInc { var: ArcVarId, kind: RcOpKind },

    /// Decrement reference count and free if zero.
    RcDec { var: ArcVarId, kind: RcOpKind },
}

impl ArcInstr {
    /// Strong increment of `var`.
    pub fn inc(var: ArcVarId) -> Self {
        ArcInstr::RcInc {
            var,
            kind: RcOpKind::Strong,
        }
    }

    /// Strong decrement of `var`.
    pub fn dec(var: ArcVarId) -> Self {
        ArcInstr::RcDec {
            var,
            kind: RcOpKind::Strong,
        }
    }

    /// Returns the variable defined (written) by this instruction, if any.
    pub fn defined_var(&self) -> Option<ArcVarId> {
        match self {
            ArcInstr::Let { dst, .. }
            | ArcInstr::Cast { dst, .. }
            | ArcInstr::Project { dst, .. }
            | ArcInstr::Construct { dst, .. }
            | ArcInstr::Apply { dst, .. }
            | ArcInstr::IsShared { dst, .. } => Some(*dst),

            ArcInstr::RcInc { .. } | ArcInstr::RcDec { .. } => None,
        }
    }

    /// Returns all variables read (used) by this instruction.
    ///
    /// RC targets count as reads; the `dst` of value-producing
    /// instructions does not.
    pub fn used_vars(&self) -> SmallVec<[ArcVarId; 4]> {
        match self {
            ArcInstr::Let { value, .. } => match value {
                ArcValue::Var(v) => smallvec![*v],
                ArcValue::Literal(_) => SmallVec::new(),
            },
            ArcInstr::Cast { value, .. } | ArcInstr::Project { value, .. } => smallvec![*value],
            ArcInstr::Construct { args, .. } | ArcInstr::Apply { args, .. } => {
                args.iter().copied().collect()
            }
            ArcInstr::IsShared { var, .. }
            | ArcInstr::RcInc { var, .. }
            | ArcInstr::RcDec { var, .. } => smallvec![*var],
        }
    }

    /// Returns `true` for `RcInc` and `RcDec`.
    #[inline]
    pub fn is_rc_op(&self) -> bool {
        matches!(self, ArcInstr::RcInc { .. } | ArcInstr::RcDec { .. })
    }
}

// ── Terminators ─────────────────────────────────────────────────────

/// Block terminator: how control leaves a basic block.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ArcTerminator {
    /// Return a value from the function (ownership passes to the caller).
    Return { value: ArcVarId },

    /// Unconditional jump.
    Jump { target: ArcBlockId },

    /// Conditional branch on a boolean.
    Branch {
        cond: ArcVarId,
        then_block: ArcBlockId,
        else_block: ArcBlockId,
    },

    /// Multi-way branch on an integer discriminant.
    Switch {
        scrutinee: ArcVarId,
        cases: Vec<(u64, ArcBlockId)>,
        default: ArcBlockId,
    },

    /// The block traps; control never continues past it.
    Unreachable,
}

impl ArcTerminator {
    /// Returns all variables read by this terminator.
    pub fn used_vars(&self) -> SmallVec<[ArcVarId; 4]> {
        match self {
            ArcTerminator::Return { value } => smallvec![*value],
            ArcTerminator::Branch { cond, .. } => smallvec![*cond],
            ArcTerminator::Switch { scrutinee, .. } => smallvec![*scrutinee],
            ArcTerminator::Jump { .. } | ArcTerminator::Unreachable => SmallVec::new(),
        }
    }

    /// Successor block IDs in terminator order (may contain duplicates).
    pub fn successors(&self) -> SmallVec<[ArcBlockId; 4]> {
        match self {
            ArcTerminator::Return { .. } | ArcTerminator::Unreachable => SmallVec::new(),
            ArcTerminator::Jump { target } => smallvec![*target],
            ArcTerminator::Branch {
                then_block,
                else_block,
                ..
            } => smallvec![*then_block, *else_block],
            ArcTerminator::Switch { cases, default, .. } => {
                let mut targets = SmallVec::with_capacity(cases.len() + 1);
                for &(_, b) in cases {
                    targets.push(b);
                }
                targets.push(*default);
                targets
            }
        }
    }

    /// Redirect every edge to `old` so that it targets `new` instead.
    ///
    /// Used by loop canonicalization to route edges through freshly
    /// created preheader and exit blocks.
    pub fn redirect(&mut self, old: ArcBlockId, new: ArcBlockId) {
        fn sub(b: &mut ArcBlockId, old: ArcBlockId, new: ArcBlockId) {
            if *b == old {
                *b = new;
            }
        }
        match self {
            ArcTerminator::Return { .. } | ArcTerminator::Unreachable => {}
            ArcTerminator::Jump { target } => sub(target, old, new),
            ArcTerminator::Branch {
                then_block,
                else_block,
                ..
            } => {
                sub(then_block, old, new);
                sub(else_block, old, new);
            }
            ArcTerminator::Switch { cases, default, .. } => {
                for (_, b) in cases {
                    sub(b, old, new);
                }
                sub(default, old, new);
            }
        }
    }
}

// ── Blocks ──────────────────────────────────────────────────────────

/// A basic block in the ARC IR.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ArcBlock {
    /// This block's identifier.
    pub id: ArcBlockId,
    /// Sequential instructions executed in order.
    pub body: Vec<ArcInstr>,
    /// How control leaves this block.
    pub terminator: ArcTerminator,
}

// ── Functions ───────────────────────────────────────────────────────

/// A complete function in the ARC IR.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ArcFunction {
    /// The function's mangled name.
    pub name: String,
    /// Parameter variables, defined on entry to `entry`.
    pub params: Vec<ArcVarId>,
    /// Basic blocks in definition order. `blocks[entry.index()]` is the entry.
    pub blocks: Vec<ArcBlock>,
    /// The entry block ID.
    pub entry: ArcBlockId,
    /// Representation of each variable, indexed by `ArcVarId::index()`.
    pub var_reprs: Vec<ValueRepr>,
}

impl ArcFunction {
    /// Look up the representation of a variable.
    ///
    /// # Panics
    ///
    /// Debug-panics if `var` is out of bounds.
    #[inline]
    pub fn var_repr(&self, var: ArcVarId) -> ValueRepr {
        debug_assert!(
            var.index() < self.var_reprs.len(),
            "ArcVarId {} out of bounds (have {} vars)",
            var.raw(),
            self.var_reprs.len(),
        );
        self.var_reprs[var.index()]
    }

    /// Allocate a fresh variable with the given representation.
    pub fn fresh_var(&mut self, repr: ValueRepr) -> ArcVarId {
        let id = u32::try_from(self.var_reprs.len())
            .unwrap_or_else(|_| panic!("variable count exceeds u32::MAX"));
        self.var_reprs.push(repr);
        ArcVarId::new(id)
    }

    /// Append a new basic block to this function.
    ///
    /// # Panics
    ///
    /// Debug-panics if `block.id` does not match the next block index.
    pub fn push_block(&mut self, block: ArcBlock) {
        debug_assert_eq!(
            block.id,
            self.next_block_id(),
            "block ID {} does not match expected index {}",
            block.id.raw(),
            self.blocks.len(),
        );
        self.blocks.push(block);
    }

    /// Return the [`ArcBlockId`] that the next [`push_block`](Self::push_block)
    /// call will use.
    pub fn next_block_id(&self) -> ArcBlockId {
        ArcBlockId::from_index(self.blocks.len())
    }

    /// Total number of `RcInc`/`RcDec` instructions in the function.
    pub fn count_rc_ops(&self) -> usize {
        self.blocks
            .iter()
            .flat_map(|bl| bl.body.iter())
            .filter(|i| i.is_rc_op())
            .count()
    }
}

// ── Program points ──────────────────────────────────────────────────

/// Position of an instruction: `blocks[block].body[index]`.
///
/// `index == body.len()` denotes the terminator. As an insertion point,
/// a `ProgramPoint` means "immediately before the instruction at `index`".
/// Program points are only stable between two splices of the function.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProgramPoint {
    pub block: ArcBlockId,
    pub index: usize,
}

impl ProgramPoint {
    #[inline]
    pub fn new(block: ArcBlockId, index: usize) -> Self {
        Self { block, index }
    }
}

#[cfg(test)]
mod tests;
