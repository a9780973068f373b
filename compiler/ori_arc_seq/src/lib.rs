//! ARC sequence optimization for the Ori compiler.
//!
//! This crate provides:
//!
//! - **ARC IR** ([`ir::ArcFunction`], [`ir::ArcInstr`], [`ir::ArcTerminator`]):
//!   the basic-block representation the pass rewrites, with explicit
//!   `RcInc`/`RcDec` operations.
//!
//! - **Analyses** ([`analysis`]): RC identity, aliasing, dominance and
//!   program termination behind oracle traits, plus the loop region tree
//!   ([`loops::LoopRegions`]).
//!
//! - **The pass** ([`ArcSequenceOpts`]): pairs increments with decrements
//!   across the CFG, deletes pairs that do no work, and moves the rest to
//!   cheaper positions (diamond joins, loop preheaders and exits).
//!
//! # Pipelines
//!
//! [`LoopAwarePipeline`] canonicalizes loops and optimizes them innermost
//! first. [`BlockOnlyPipeline`] optimizes the function as one region.
//! [`ArcSeqConfig::enable_loop_arc`] picks between them.
//!
//! # Tracing
//!
//! The pass logs through `tracing`; call [`init_tracing`] and set
//! `RUST_LOG=ori_arc_seq=debug` (or `trace`) to see per-function and
//! per-round output.

pub mod analysis;
mod config;
mod error;
mod graph;
pub mod ir;
pub mod loops;
pub mod seq;

#[cfg(test)]
mod test_helpers;

use std::sync::Once;

pub use config::ArcSeqConfig;
pub use error::{verify_function, PreconditionError};
pub use graph::{DominatorTree, PostDominatorTree};
pub use seq::{
    run_arc_sequence_opts, ArcSeqStats, ArcSequenceOpts, BlockOnlyPipeline, LoopAwarePipeline,
    PairingStrategy, PassOutcome,
};

static TRACING_INIT: Once = Once::new();

/// Initialize tracing for debug output.
///
/// Safe to call multiple times. Does nothing unless `RUST_LOG` is set.
pub fn init_tracing() {
    TRACING_INIT.call_once(|| {
        use tracing_subscriber::{fmt, prelude::*, EnvFilter};

        if std::env::var("RUST_LOG").is_ok() {
            let filter = EnvFilter::from_default_env();
            tracing_subscriber::registry()
                .with(fmt::layer().with_target(true).with_level(true))
                .with(filter)
                .init();
        }
    });
}
