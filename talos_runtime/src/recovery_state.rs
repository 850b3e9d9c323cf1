//! Per-thread recovery state.
//!
//! One [`RecoveryState`] lives on each [`VmThread`] for the life of the
//! thread. It tracks three things:
//!
//! - the recovery phase, a small state machine (`Idle` → `InRecovery` →
//!   `InSearch`) whose transitions are enforced by scoped guard objects —
//!   re-entering recovery on the same thread is a programming error and
//!   aborts;
//! - the last-checked exception marker, the sole loop-prevention mechanism:
//!   set before analysis begins, cleared whenever an attempt concludes with
//!   no usable recovery;
//! - the early-return activation record the dispatch loop consumes when a
//!   fabricated return unwinds the stack.
//!
//! The state is owned by its thread and never shared, so interior
//! mutability with `Cell`/`RefCell` suffices; no locking.
//!
//! [`VmThread`]: crate::thread::VmThread

use crate::exception::same_exception;
use crate::value::{ObjRef, Value, ValueKind};
use std::cell::{Cell, RefCell};

// =============================================================================
// Recovery Phase
// =============================================================================

/// Where the thread currently is in a recovery attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryPhase {
    /// Not inside the oracle.
    Idle,
    /// Inside a recovery attempt.
    InRecovery,
    /// Inside the external search-oracle call of an attempt.
    InSearch,
}

// =============================================================================
// Early-Return Activation Record
// =============================================================================

/// Activation state of a fabricated early return.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EarlyReturnState {
    /// No early return in progress.
    #[default]
    Inactive,
    /// The dispatch loop must pop frames until the offset reaches zero,
    /// then materialize the recorded value.
    Pending,
}

/// The record handed to the dispatch loop when an early return activates.
#[derive(Debug, Default)]
pub struct EarlyReturnRecord {
    /// Frames left to unwind before the return materializes (top is 0).
    pub offset: u32,
    /// Declared result kind of the call being short-circuited.
    pub result_kind: Option<ValueKind>,
    /// Parameter-slot count of the callee, needed to pop its arguments.
    pub size_of_parameters: u16,
    /// Pending/inactive state.
    pub state: EarlyReturnState,
    /// The fabricated return value.
    pub value: Value,
}

// =============================================================================
// Recovery State
// =============================================================================

/// Per-thread recovery bookkeeping. See the module docs.
#[derive(Debug, Default)]
pub struct RecoveryState {
    phase: Cell<Option<RecoveryPhase>>,
    last_checked: RefCell<Option<ObjRef>>,
    early_return: RefCell<EarlyReturnRecord>,
}

impl RecoveryState {
    /// Fresh idle state.
    pub fn new() -> Self {
        RecoveryState::default()
    }

    /// Current phase.
    #[inline]
    pub fn phase(&self) -> RecoveryPhase {
        self.phase.get().unwrap_or(RecoveryPhase::Idle)
    }

    /// Whether a recovery attempt is active on this thread.
    #[inline]
    pub fn is_in_recovery(&self) -> bool {
        self.phase() != RecoveryPhase::Idle
    }

    /// Whether the external search oracle is being consulted.
    #[inline]
    pub fn is_in_search(&self) -> bool {
        self.phase() == RecoveryPhase::InSearch
    }

    fn set_phase(&self, phase: RecoveryPhase) {
        self.phase.set(Some(phase));
    }

    // =========================================================================
    // Last-Checked Marker
    // =========================================================================

    /// Whether a last-checked exception is recorded.
    pub fn has_last_checked_exception(&self) -> bool {
        self.last_checked.borrow().is_some()
    }

    /// Record (or clear) the exception under analysis.
    pub fn set_last_checked_exception(&self, exception: Option<ObjRef>) {
        *self.last_checked.borrow_mut() = exception;
    }

    /// The recorded marker, if any.
    pub fn last_checked_exception(&self) -> Option<ObjRef> {
        self.last_checked.borrow().clone()
    }

    /// Whether `exception` is identical to the recorded marker.
    pub fn is_last_checked(&self, exception: &ObjRef) -> bool {
        self.last_checked
            .borrow()
            .as_ref()
            .is_some_and(|m| same_exception(m, exception))
    }

    // =========================================================================
    // Early-Return Record
    // =========================================================================

    /// Arm the early-return record. The dispatch loop takes over from here.
    pub fn arm_early_return(
        &self,
        offset: u32,
        result_kind: ValueKind,
        size_of_parameters: u16,
    ) {
        let mut rec = self.early_return.borrow_mut();
        rec.offset = offset;
        rec.result_kind = Some(result_kind);
        rec.size_of_parameters = size_of_parameters;
        rec.state = EarlyReturnState::Pending;
        rec.value = result_kind.zero_value();
    }

    /// Whether an early return is pending.
    pub fn is_early_return_pending(&self) -> bool {
        self.early_return.borrow().state == EarlyReturnState::Pending
    }

    /// One frame has unwound; step the offset toward zero.
    pub fn decrease_early_return_offset(&self) {
        let mut rec = self.early_return.borrow_mut();
        debug_assert!(rec.state == EarlyReturnState::Pending);
        debug_assert!(rec.offset > 0, "offset already at the target frame");
        rec.offset -= 1;
    }

    /// Whether the unwind has reached the target frame.
    pub fn make_early_return_now(&self) -> bool {
        let rec = self.early_return.borrow();
        rec.state == EarlyReturnState::Pending && rec.offset == 0
    }

    /// Consume the record: returns `(result_kind, size_of_parameters,
    /// value)` and resets to inactive.
    pub fn take_early_return(&self) -> (ValueKind, u16, Value) {
        let mut rec = self.early_return.borrow_mut();
        debug_assert!(rec.state == EarlyReturnState::Pending);
        let kind = rec.result_kind.take().unwrap_or(ValueKind::Void);
        let size = rec.size_of_parameters;
        let value = std::mem::take(&mut rec.value);
        *rec = EarlyReturnRecord::default();
        (kind, size, value)
    }

    /// Reset everything to the idle state.
    pub fn reset(&self) {
        self.phase.set(None);
        *self.last_checked.borrow_mut() = None;
        *self.early_return.borrow_mut() = EarlyReturnRecord::default();
    }
}

// =============================================================================
// Scoped Guards
// =============================================================================

/// Scoped `Idle -> InRecovery` transition.
///
/// Construction aborts if a recovery attempt is already active on the
/// thread: reentrant recovery is a defect in the oracle or its caller, never
/// a runtime condition. The phase is restored on every exit path.
pub struct RecoveryMark<'a> {
    state: &'a RecoveryState,
}

impl<'a> RecoveryMark<'a> {
    /// Enter recovery.
    pub fn new(state: &'a RecoveryState) -> Self {
        assert!(
            !state.is_in_recovery(),
            "reentrant recovery attempt on the same thread"
        );
        state.set_phase(RecoveryPhase::InRecovery);
        RecoveryMark { state }
    }
}

impl Drop for RecoveryMark<'_> {
    fn drop(&mut self) {
        self.state.set_phase(RecoveryPhase::Idle);
    }
}

/// Scoped `InRecovery -> InSearch` transition around the external oracle
/// call. Same abort-on-violation contract as [`RecoveryMark`].
pub struct SearchMark<'a> {
    state: &'a RecoveryState,
}

impl<'a> SearchMark<'a> {
    /// Enter the search-oracle call.
    pub fn new(state: &'a RecoveryState) -> Self {
        assert!(
            state.phase() == RecoveryPhase::InRecovery,
            "search-oracle call outside an active recovery attempt"
        );
        state.set_phase(RecoveryPhase::InSearch);
        SearchMark { state }
    }
}

impl Drop for SearchMark<'_> {
    fn drop(&mut self) {
        self.state.set_phase(RecoveryPhase::InRecovery);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TypeRegistry;

    #[test]
    fn test_phase_transitions() {
        let state = RecoveryState::new();
        assert_eq!(state.phase(), RecoveryPhase::Idle);
        {
            let _mark = RecoveryMark::new(&state);
            assert!(state.is_in_recovery());
            {
                let _search = SearchMark::new(&state);
                assert!(state.is_in_search());
            }
            assert_eq!(state.phase(), RecoveryPhase::InRecovery);
        }
        assert_eq!(state.phase(), RecoveryPhase::Idle);
    }

    #[test]
    #[should_panic(expected = "reentrant recovery")]
    fn test_reentrant_recovery_aborts() {
        let state = RecoveryState::new();
        let _outer = RecoveryMark::new(&state);
        let _inner = RecoveryMark::new(&state);
    }

    #[test]
    #[should_panic(expected = "outside an active recovery")]
    fn test_search_outside_recovery_aborts() {
        let state = RecoveryState::new();
        let _search = SearchMark::new(&state);
    }

    #[test]
    fn test_mark_released_on_panic_path() {
        let state = RecoveryState::new();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _mark = RecoveryMark::new(&state);
            panic!("inner failure");
        }));
        assert!(result.is_err());
        assert_eq!(state.phase(), RecoveryPhase::Idle);
    }

    #[test]
    fn test_last_checked_identity() {
        let types = TypeRegistry::with_builtins();
        let state = RecoveryState::new();
        let a = types.new_exception(TypeRegistry::RUNTIME_FAULT, "a", None);
        let b = types.new_exception(TypeRegistry::RUNTIME_FAULT, "a", None);

        state.set_last_checked_exception(Some(a.clone()));
        assert!(state.is_last_checked(&a));
        assert!(!state.is_last_checked(&b));
        state.set_last_checked_exception(None);
        assert!(!state.has_last_checked_exception());
    }

    #[test]
    fn test_early_return_lifecycle() {
        let state = RecoveryState::new();
        assert!(!state.is_early_return_pending());

        state.arm_early_return(2, ValueKind::Int, 3);
        assert!(state.is_early_return_pending());
        assert!(!state.make_early_return_now());

        state.decrease_early_return_offset();
        state.decrease_early_return_offset();
        assert!(state.make_early_return_now());

        let (kind, size, value) = state.take_early_return();
        assert_eq!(kind, ValueKind::Int);
        assert_eq!(size, 3);
        assert!(matches!(value, Value::Int(0)));
        assert!(!state.is_early_return_pending());
    }
}
