//! Recovery configuration.
//!
//! A single immutable struct resolved once by the embedder, read everywhere
//! without per-operation cost. The oracle never mutates it and never reads
//! ambient process state; every toggle the engine honors is here.

use crate::trace::TraceFlags;

// =============================================================================
// Resolver Backend Selection
// =============================================================================

/// Which knowledge source names target exception types for transformation.
///
/// Exactly one backend is active per configuration; the backends are
/// interchangeable behind [`HandlerResolver`].
///
/// [`HandlerResolver`]: crate::resolver::HandlerResolver
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResolverBackend {
    /// Ask the external knowledge store per (type, call-trail) key.
    KnowledgeStore {
        /// Additionally query per-handler-region "induced" keys, resolving
        /// the region's own catch type on a hit.
        induced: bool,
    },
    /// Scan the declared checked exceptions of the pivot method against the
    /// captured stack.
    StackDeclared,
    /// Take the first wildcard-matching handler region with a
    /// string-constructible catch type.
    #[default]
    ForcedGeneric,
}

impl ResolverBackend {
    /// Short mode name for log correlation.
    pub fn mode_name(self) -> &'static str {
        match self {
            ResolverBackend::KnowledgeStore { induced: true } => "store+induced",
            ResolverBackend::KnowledgeStore { induced: false } => "store",
            ResolverBackend::StackDeclared => "stack",
            ResolverBackend::ForcedGeneric => "forced-generic",
        }
    }
}

// =============================================================================
// Recovery Configuration
// =============================================================================

/// Complete oracle configuration.
#[derive(Debug, Clone)]
pub struct RecoveryConfig {
    /// Master switch; when false the eligibility pre-check refuses
    /// everything.
    pub enable_recovery: bool,

    /// Active knowledge-source backend.
    pub backend: ResolverBackend,

    /// Delegate decisions to the external search oracle when available.
    /// Authoritative when enabled: the fast paths are skipped.
    pub use_search_oracle: bool,

    /// Allow error transformation.
    pub use_error_transformation: bool,

    /// Allow early return.
    pub use_early_return: bool,

    /// Treat handlers catching the universal/general base types as "not
    /// really handling" and recover at them.
    pub recover_trivial: bool,

    /// Skip finally regions during handler lookup instead of treating them
    /// as handlers.
    pub ignore_finally: bool,

    /// Only fabricate early returns for void call sites.
    pub void_only_early_return: bool,

    /// Debug override: force early return at this frame offset when its
    /// current instruction is a call.
    pub force_early_return_at: Option<usize>,

    /// Include frames flagged hidden in the captured snapshot.
    pub show_hidden_frames: bool,

    /// Maximum managed frame descriptors per snapshot.
    pub max_stack_depth: usize,

    /// Maximum physical frames walked per snapshot.
    pub max_frame_depth: usize,

    /// Namespace prefix for knowledge-store keys.
    pub store_key_prefix: String,

    /// Diagnostic trace categories.
    pub trace: TraceFlags,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        RecoveryConfig {
            enable_recovery: true,
            backend: ResolverBackend::ForcedGeneric,
            use_search_oracle: false,
            use_error_transformation: true,
            use_early_return: true,
            recover_trivial: true,
            ignore_finally: false,
            void_only_early_return: false,
            force_early_return_at: None,
            show_hidden_frames: false,
            max_stack_depth: 1024,
            max_frame_depth: 1024,
            store_key_prefix: "talos".to_string(),
            trace: TraceFlags::NONE,
        }
    }
}

impl RecoveryConfig {
    /// Check one trace category.
    #[inline]
    pub fn traces(&self, flags: TraceFlags) -> bool {
        self.trace.contains(flags)
    }

    /// The recovery-mode string recorded alongside transformations.
    pub fn mode_name(&self) -> &'static str {
        if self.use_search_oracle {
            "search-oracle"
        } else {
            self.backend.mode_name()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = RecoveryConfig::default();
        assert!(config.enable_recovery);
        assert_eq!(config.backend, ResolverBackend::ForcedGeneric);
        assert!(!config.use_search_oracle);
        assert!(!config.traces(TraceFlags::CHECKING));
    }

    #[test]
    fn test_mode_names() {
        let mut config = RecoveryConfig {
            backend: ResolverBackend::KnowledgeStore { induced: true },
            ..RecoveryConfig::default()
        };
        assert_eq!(config.mode_name(), "store+induced");
        config.use_search_oracle = true;
        assert_eq!(config.mode_name(), "search-oracle");
        config.use_search_oracle = false;
        config.backend = ResolverBackend::StackDeclared;
        assert_eq!(config.mode_name(), "stack");
    }
}
