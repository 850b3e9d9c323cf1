//! Diagnostic trace categories.
//!
//! Recovery diagnostics are emitted through `tracing` but gated by an
//! explicit category bitmask so that individual phases of the oracle can be
//! observed in isolation (stack capture, classification, transformation,
//! early return, store queries, ...). The bitmask is part of
//! [`RecoveryConfig`] and checked before formatting anything.
//!
//! [`RecoveryConfig`]: crate::config::RecoveryConfig

/// Trace category bitmask.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TraceFlags(u32);

impl TraceFlags {
    /// Nothing.
    pub const NONE: TraceFlags = TraceFlags(0);
    /// Early-return selection.
    pub const EARLY_RET: TraceFlags = TraceFlags(1 << 0);
    /// Error-transformation selection.
    pub const TRANSFORMING: TraceFlags = TraceFlags(1 << 1);
    /// Failure classification.
    pub const CHECKING: TraceFlags = TraceFlags(1 << 2);
    /// Stack capture.
    pub const FILL_STACK: TraceFlags = TraceFlags(1 << 3);
    /// Print the exception's stack on entry.
    pub const PRINT_STACK: TraceFlags = TraceFlags(1 << 4);
    /// Stack-declared resolver backend.
    pub const USE_STACK: TraceFlags = TraceFlags(1 << 5);
    /// Knowledge-store resolver backend.
    pub const USE_STORE: TraceFlags = TraceFlags(1 << 6);
    /// Induced-key store queries.
    pub const USE_INDUCED: TraceFlags = TraceFlags(1 << 7);
    /// Escaped-handler analysis.
    pub const CHECK_ESCAPE: TraceFlags = TraceFlags(1 << 8);
    /// Candidate types skipped for lack of a string constructor.
    pub const IGNORE: TraceFlags = TraceFlags(1 << 9);
    /// Slot-image serialization for the search oracle.
    pub const LOAD_STACK: TraceFlags = TraceFlags(1 << 10);
    /// One-line action summary per attempt, with timing.
    pub const PRINT_ACTION: TraceFlags = TraceFlags(1 << 11);
    /// Unsafe-initializer vetoes.
    pub const SKIP_UNSAFE: TraceFlags = TraceFlags(1 << 12);

    /// Check if a category is enabled.
    #[inline]
    pub const fn contains(self, other: TraceFlags) -> bool {
        (self.0 & other.0) == other.0
    }

    /// Combine categories.
    #[inline]
    pub const fn union(self, other: TraceFlags) -> TraceFlags {
        TraceFlags(self.0 | other.0)
    }

    /// Whether any category is enabled.
    #[inline]
    pub const fn any(self) -> bool {
        self.0 != 0
    }

    /// Raw bits.
    #[inline]
    pub const fn bits(self) -> u32 {
        self.0
    }

    /// Rebuild from raw bits (configuration surface).
    #[inline]
    pub const fn from_bits(bits: u32) -> TraceFlags {
        TraceFlags(bits)
    }
}

impl std::ops::BitOr for TraceFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self::Output {
        self.union(rhs)
    }
}

impl std::ops::BitOrAssign for TraceFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trace_flags() {
        let flags = TraceFlags::CHECKING | TraceFlags::EARLY_RET;
        assert!(flags.contains(TraceFlags::CHECKING));
        assert!(flags.contains(TraceFlags::EARLY_RET));
        assert!(!flags.contains(TraceFlags::TRANSFORMING));
        assert!(flags.any());
        assert!(!TraceFlags::NONE.any());
    }

    #[test]
    fn test_round_trip_bits() {
        let flags = TraceFlags::USE_STORE | TraceFlags::PRINT_ACTION;
        assert_eq!(TraceFlags::from_bits(flags.bits()), flags);
    }
}
