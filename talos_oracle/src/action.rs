//! Failure classification results and the recovery-action accumulator.
//!
//! A [`RecoveryAction`] is created per attempt, filled in incrementally by
//! the classifier and then the strategy selector, and returned to the caller
//! who applies it. It never outlives the attempt and never crosses threads.

use crate::trace::TraceFlags;
use talos_runtime::{ExceptionTypeId, MethodId, ObjRef, RuntimeEnv, ValueKind};
use tracing::debug;

// =============================================================================
// Failure Kinds
// =============================================================================

/// What kind of failure the classifier decided this exception is.
///
/// Only [`Uncaught`] and [`TriviallyHandled`] are recoverable.
///
/// [`Uncaught`]: FailureKind::Uncaught
/// [`TriviallyHandled`]: FailureKind::TriviallyHandled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailureKind {
    /// A real handler (or a live finally) exists; leave the exception alone.
    #[default]
    NotAFailure,
    /// Recovery is switched off.
    RecoveryDisabled,
    /// The oracle itself failed while analyzing; no recovery attempted.
    InternalError,
    /// No handler anywhere in the captured stack.
    Uncaught,
    /// Only a universal catch-all would handle it.
    TriviallyHandled,
}

impl FailureKind {
    /// Whether this classification warrants a recovery attempt.
    #[inline]
    pub fn requires_recovery(self) -> bool {
        matches!(self, FailureKind::Uncaught | FailureKind::TriviallyHandled)
    }

    /// Stable name for log correlation.
    pub fn name(self) -> &'static str {
        match self {
            FailureKind::NotAFailure => "not a failure",
            FailureKind::RecoveryDisabled => "recovery disabled",
            FailureKind::InternalError => "internal error",
            FailureKind::Uncaught => "uncaught exception",
            FailureKind::TriviallyHandled => "trivially handled",
        }
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

// =============================================================================
// Recovery Kinds
// =============================================================================

/// The action the oracle settled on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RecoveryKind {
    /// Nothing applicable; the exception propagates as-is.
    #[default]
    NoRecovery,
    /// Replace the in-flight exception with a new instance of an expected
    /// type before it is thrown.
    ErrorTransformation,
    /// Fabricate a return value at an active call site.
    EarlyReturn,
}

impl RecoveryKind {
    /// Stable name for log correlation.
    pub fn name(self) -> &'static str {
        match self {
            RecoveryKind::NoRecovery => "no recovery",
            RecoveryKind::ErrorTransformation => "error transformation",
            RecoveryKind::EarlyReturn => "early return",
        }
    }
}

impl std::fmt::Display for RecoveryKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

// =============================================================================
// Recovery Action
// =============================================================================

/// Mutable accumulator for one recovery attempt.
#[derive(Debug)]
pub struct RecoveryAction {
    /// Exception under analysis; identity only, never mutated.
    origin_exception: ObjRef,

    failure_kind: FailureKind,
    recovery_kind: RecoveryKind,

    /// Deepest frame index recovery analysis may consider (inclusive).
    context_boundary: Option<usize>,

    /// Early-return selection, when `recovery_kind == EarlyReturn`.
    early_return_offset: Option<usize>,
    early_return_kind: Option<ValueKind>,
    early_return_params: u16,

    /// Transformation target, when `recovery_kind == ErrorTransformation`.
    target_exception_type: Option<ExceptionTypeId>,

    /// Logical top method resolved by the reflection layer when the true
    /// top of stack was the native trampoline. Plain data, set by the
    /// caller.
    recorded_top_method: Option<MethodId>,
}

impl RecoveryAction {
    /// Fresh accumulator for `exception`.
    pub fn new(exception: ObjRef) -> Self {
        RecoveryAction {
            origin_exception: exception,
            failure_kind: FailureKind::NotAFailure,
            recovery_kind: RecoveryKind::NoRecovery,
            context_boundary: None,
            early_return_offset: None,
            early_return_kind: None,
            early_return_params: 0,
            target_exception_type: None,
            recorded_top_method: None,
        }
    }

    /// Accumulator carrying a reflection-layer recorded top method.
    pub fn with_recorded_top(exception: ObjRef, top: MethodId) -> Self {
        let mut action = RecoveryAction::new(exception);
        action.recorded_top_method = Some(top);
        action
    }

    /// The exception under analysis.
    #[inline]
    pub fn origin_exception(&self) -> &ObjRef {
        &self.origin_exception
    }

    /// Current failure classification.
    #[inline]
    pub fn failure_kind(&self) -> FailureKind {
        self.failure_kind
    }

    /// Record the failure classification.
    pub fn set_failure_kind(&mut self, kind: FailureKind) {
        self.failure_kind = kind;
    }

    /// Selected recovery, if any.
    #[inline]
    pub fn recovery_kind(&self) -> RecoveryKind {
        self.recovery_kind
    }

    /// Reset the selection to no-recovery.
    pub fn clear_recovery(&mut self) {
        self.recovery_kind = RecoveryKind::NoRecovery;
        self.early_return_offset = None;
        self.early_return_kind = None;
        self.early_return_params = 0;
        self.target_exception_type = None;
    }

    /// The recovery-context boundary, set by the classifier.
    #[inline]
    pub fn context_boundary(&self) -> Option<usize> {
        self.context_boundary
    }

    /// Record the recovery-context boundary.
    pub fn set_context_boundary(&mut self, index: usize) {
        self.context_boundary = Some(index);
    }

    /// Recorded top method from the reflection layer, if any.
    #[inline]
    pub fn recorded_top_method(&self) -> Option<MethodId> {
        self.recorded_top_method
    }

    /// Commit to an error transformation targeting `ty`.
    pub fn set_error_transformation(&mut self, ty: ExceptionTypeId) {
        self.recovery_kind = RecoveryKind::ErrorTransformation;
        self.target_exception_type = Some(ty);
    }

    /// Commit to an early return at `offset`.
    pub fn set_early_return(&mut self, offset: usize, kind: ValueKind, params: u16) {
        self.recovery_kind = RecoveryKind::EarlyReturn;
        self.early_return_offset = Some(offset);
        self.early_return_kind = Some(kind);
        self.early_return_params = params;
    }

    /// Whether any recovery was selected.
    #[inline]
    pub fn can_recover(&self) -> bool {
        self.recovery_kind != RecoveryKind::NoRecovery
    }

    /// Whether a fully populated early return was selected.
    pub fn can_early_return(&self) -> bool {
        self.recovery_kind == RecoveryKind::EarlyReturn && self.early_return_offset.is_some()
    }

    /// Whether a fully populated transformation was selected.
    pub fn can_error_transformation(&self) -> bool {
        self.recovery_kind == RecoveryKind::ErrorTransformation
            && self.target_exception_type.is_some()
    }

    /// Early-return selection: `(offset, result kind, parameter slots)`.
    pub fn early_return(&self) -> Option<(usize, ValueKind, u16)> {
        match (self.early_return_offset, self.early_return_kind) {
            (Some(offset), Some(kind)) => Some((offset, kind, self.early_return_params)),
            _ => None,
        }
    }

    /// Transformation target type.
    #[inline]
    pub fn target_exception_type(&self) -> Option<ExceptionTypeId> {
        self.target_exception_type
    }

    /// Construct the transformed exception: a new instance of the target
    /// type with a transformation message and the original as cause.
    ///
    /// Returns `None` when no transformation was selected.
    pub fn allocate_target_exception(&self, env: &RuntimeEnv) -> Option<ObjRef> {
        let target = self.target_exception_type?;
        let origin_ty = self
            .origin_exception
            .as_exception()
            .map(|e| e.ty)
            .unwrap_or(talos_runtime::TypeRegistry::BASE_FAULT);
        debug_assert!(
            env.types.has_string_ctor(target),
            "transformation target lacks a string constructor"
        );
        let message = format!(
            "Exception transformation: {} -> {}.",
            env.types.name_of(origin_ty),
            env.types.name_of(target),
        );
        debug!(
            origin = env.types.name_of(origin_ty),
            target = env.types.name_of(target),
            "transforming exception"
        );
        Some(
            env.types
                .new_exception(target, message, Some(self.origin_exception.clone())),
        )
    }

    /// One-line `(exception)(failure)(recovery)` summary for PRINT_ACTION
    /// correlation logs.
    pub fn summary(&self, env: &RuntimeEnv) -> String {
        let origin = self
            .origin_exception
            .as_exception()
            .map(|e| env.types.name_of(e.ty))
            .unwrap_or("<not an exception>");
        format!(
            "({})({})({})",
            origin,
            self.failure_kind.name(),
            self.recovery_kind.name()
        )
    }
}

/// Trace helper shared by the selector paths: emit the standard action line
/// when PRINT_ACTION is enabled.
pub(crate) fn trace_action(
    config: &crate::config::RecoveryConfig,
    env: &RuntimeEnv,
    action: &RecoveryAction,
    detail: &str,
) {
    if config.traces(TraceFlags::PRINT_ACTION) {
        debug!(summary = %action.summary(env), detail, "recovery action");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use talos_runtime::TypeRegistry;

    fn env() -> RuntimeEnv {
        RuntimeEnv::with_builtins()
    }

    #[test]
    fn test_failure_kind_gate() {
        assert!(FailureKind::Uncaught.requires_recovery());
        assert!(FailureKind::TriviallyHandled.requires_recovery());
        assert!(!FailureKind::NotAFailure.requires_recovery());
        assert!(!FailureKind::InternalError.requires_recovery());
        assert!(!FailureKind::RecoveryDisabled.requires_recovery());
    }

    #[test]
    fn test_action_accumulation() {
        let env = env();
        let exc = env
            .types
            .new_exception(TypeRegistry::RUNTIME_FAULT, "boom", None);
        let mut action = RecoveryAction::new(exc);
        assert!(!action.can_recover());

        action.set_failure_kind(FailureKind::Uncaught);
        action.set_context_boundary(3);
        action.set_early_return(1, ValueKind::Int, 2);
        assert!(action.can_early_return());
        assert_eq!(action.early_return(), Some((1, ValueKind::Int, 2)));

        action.clear_recovery();
        assert!(!action.can_recover());
        assert_eq!(action.context_boundary(), Some(3));
    }

    #[test]
    fn test_allocate_target_exception() {
        let env = env();
        let arg = env.types.by_name("ArgumentFault").unwrap();
        let state = env.types.by_name("StateFault").unwrap();
        let exc = env.types.new_exception(arg, "bad argument", None);

        let mut action = RecoveryAction::new(exc.clone());
        action.set_error_transformation(state);
        let transformed = action.allocate_target_exception(&env).unwrap();
        let inner = transformed.as_exception().unwrap();
        assert_eq!(inner.ty, state);
        assert_eq!(
            &*inner.message,
            "Exception transformation: ArgumentFault -> StateFault."
        );
        assert!(talos_runtime::same_exception(
            inner.cause.as_ref().unwrap(),
            &exc
        ));
    }

    #[test]
    fn test_summary_format() {
        let env = env();
        let exc = env
            .types
            .new_exception(TypeRegistry::RUNTIME_FAULT, "boom", None);
        let mut action = RecoveryAction::new(exc);
        action.set_failure_kind(FailureKind::Uncaught);
        assert_eq!(
            action.summary(&env),
            "(RuntimeFault)(uncaught exception)(no recovery)"
        );
    }
}
