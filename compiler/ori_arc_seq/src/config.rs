//! Pass configuration.

/// Configuration for the ARC sequence optimizer.
///
/// Defaults enable the pass with the loop-aware pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ArcSeqConfig {
    /// Pipeline-wide switch for the ARC optimization category.
    pub enable_arc_optimizations: bool,
    /// Use the loop-region pipeline; `false` selects block-only matching.
    pub enable_loop_arc: bool,
}

impl Default for ArcSeqConfig {
    fn default() -> Self {
        Self {
            enable_arc_optimizations: true,
            enable_loop_arc: true,
        }
    }
}

impl ArcSeqConfig {
    /// Enable or disable the ARC optimization category.
    #[must_use]
    pub fn with_arc_optimizations(mut self, enabled: bool) -> Self {
        self.enable_arc_optimizations = enabled;
        self
    }

    /// Select the loop-aware (`true`) or block-only (`false`) pipeline.
    #[must_use]
    pub fn with_loop_arc(mut self, enabled: bool) -> Self {
        self.enable_loop_arc = enabled;
        self
    }
}
