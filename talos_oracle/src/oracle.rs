//! The recovery oracle façade.
//!
//! One [`RecoveryOracle`] is constructed per runtime instance from a
//! [`RecoveryConfig`] plus the injected collaborators (knowledge store,
//! search oracle). A recovery attempt is fully synchronous on the failing
//! thread: eligibility pre-check, then capture → classify → guard → select
//! under the scoped `RecoveryMark`.
//!
//! State obligations on every exit path: the thread's pending-exception
//! slot is cleared, the in-recovery phase is released by the mark, and the
//! last-checked marker is cleared whenever the attempt produced no usable
//! recovery — it stays set after a successful attempt precisely so that a
//! second attempt on the identical exception instance short-circuits at the
//! pre-check.

use crate::action::{FailureKind, RecoveryAction};
use crate::bridge::SearchOracle;
use crate::classifier::classify;
use crate::config::RecoveryConfig;
use crate::guard::has_unsafe_initializer;
use crate::resolver::{resolver_for, HandlerResolver};
use crate::selector::select;
use crate::snapshot::capture;
use crate::store::KnowledgeStore;
use crate::trace::TraceFlags;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use talos_runtime::{MethodId, ObjRef, RecoveryMark, RuntimeEnv, TypeRegistry, VmThread};
use tracing::debug;

// =============================================================================
// Oracle
// =============================================================================

/// The decision engine. Constructed once, shared by reference.
pub struct RecoveryOracle {
    config: RecoveryConfig,
    resolver: Box<dyn HandlerResolver + Send + Sync>,
    store: Option<Box<dyn KnowledgeStore + Send + Sync>>,
    search: Option<Box<dyn SearchOracle + Send + Sync>>,
    /// Successful recoveries so far, for log correlation only.
    recovered_count: AtomicU64,
}

impl RecoveryOracle {
    /// Build an oracle with no external collaborators connected.
    pub fn new(config: RecoveryConfig) -> Self {
        let resolver = resolver_for(config.backend);
        RecoveryOracle {
            config,
            resolver,
            store: None,
            search: None,
            recovered_count: AtomicU64::new(0),
        }
    }

    /// Connect the knowledge store.
    pub fn with_store(mut self, store: Box<dyn KnowledgeStore + Send + Sync>) -> Self {
        self.store = Some(store);
        self
    }

    /// Connect the external search oracle.
    pub fn with_search_oracle(mut self, search: Box<dyn SearchOracle + Send + Sync>) -> Self {
        self.search = Some(search);
        self
    }

    /// Active configuration.
    pub fn config(&self) -> &RecoveryConfig {
        &self.config
    }

    /// Number of attempts that produced a recovery action so far.
    pub fn recovered_count(&self) -> u64 {
        self.recovered_count.load(Ordering::Relaxed)
    }

    // =========================================================================
    // Eligibility
    // =========================================================================

    /// Cheap refusal check, run before any stack work. True means the
    /// exception is not worth analyzing: recovery disabled, not an
    /// exception object, already analyzed on this thread, or outside the
    /// recoverable type subtree.
    pub fn quick_cannot_recover_check(
        &self,
        thread: &VmThread,
        env: &RuntimeEnv,
        exception: &ObjRef,
    ) -> bool {
        if !self.config.enable_recovery {
            return true;
        }
        let Some(instance) = exception.as_exception() else {
            return true;
        };
        if thread.recovery.is_last_checked(exception) {
            return true;
        }
        !env.types
            .is_subtype_of(instance.ty, TypeRegistry::RUNTIME_FAULT)
    }

    // =========================================================================
    // Recovery
    // =========================================================================

    /// Run one recovery attempt for `exception` on `thread`.
    ///
    /// `recorded_top` carries the logical top method when the true top of
    /// stack was the native reflective trampoline, resolved by the caller.
    /// The returned action is complete; the caller applies it (or re-raises
    /// the original exception when it reads no-recovery).
    pub fn recover(
        &self,
        thread: &VmThread,
        env: &RuntimeEnv,
        exception: ObjRef,
        recorded_top: Option<MethodId>,
    ) -> RecoveryAction {
        let mut action = match recorded_top {
            Some(top) => RecoveryAction::with_recorded_top(exception.clone(), top),
            None => RecoveryAction::new(exception.clone()),
        };

        if !self.config.enable_recovery {
            action.set_failure_kind(FailureKind::RecoveryDisabled);
            return action;
        }
        if self.quick_cannot_recover_check(thread, env, &exception) {
            return action;
        }

        let _mark = RecoveryMark::new(&thread.recovery);
        thread
            .recovery
            .set_last_checked_exception(Some(exception.clone()));

        let started = self
            .config
            .traces(TraceFlags::PRINT_ACTION)
            .then(Instant::now);

        self.do_recover(thread, env, &mut action);

        if let Some(started) = started {
            debug!(
                elapsed_us = started.elapsed().as_micros() as u64,
                summary = %action.summary(env),
                mode = self.config.mode_name(),
                "recovery attempt finished"
            );
        }

        if action.can_recover() {
            let recovered = self.recovered_count.fetch_add(1, Ordering::Relaxed) + 1;
            debug!(recovered, summary = %action.summary(env), "recovery selected");
            if let Some((offset, kind, params)) = action.early_return() {
                thread.recovery.arm_early_return(offset as u32, kind, params);
            }
        } else {
            // A fruitless attempt must leave the exception free for
            // re-evaluation in a different stack context.
            thread.recovery.set_last_checked_exception(None);
        }

        // Nothing from the analysis itself may stay pending on the thread.
        thread.clear_pending_exception();
        action
    }

    fn do_recover(&self, thread: &VmThread, env: &RuntimeEnv, action: &mut RecoveryAction) {
        let snapshot = capture(thread, env, &self.config);
        if snapshot.is_empty() {
            return;
        }

        let exception_ty = match action.origin_exception().as_exception() {
            Some(instance) => instance.ty,
            None => return,
        };

        let verdict = classify(&snapshot, exception_ty, env, &self.config);
        action.set_failure_kind(verdict.kind);
        if let Some(boundary) = verdict.boundary {
            action.set_context_boundary(boundary);
        }
        if !verdict.kind.requires_recovery() {
            return;
        }

        let boundary = verdict.boundary.unwrap_or_else(|| snapshot.len() - 1);
        if has_unsafe_initializer(&snapshot, boundary, env, &self.config) {
            return;
        }

        select(
            thread,
            &snapshot,
            action,
            env,
            &self.config,
            &*self.resolver,
            self.store.as_deref().map(|s| s as &dyn KnowledgeStore),
            self.search.as_deref().map(|s| s as &dyn SearchOracle),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::RecoveryKind;
    use talos_runtime::{MethodBuilder, Opcode, ValueKind, VmFrame};

    // stack: main (handles IoFault) <- run (at a call to step, throws).
    fn setup() -> (RuntimeEnv, VmThread) {
        let mut env = RuntimeEnv::with_builtins();
        let io = env.types.by_name("IoFault").unwrap();
        let step = MethodBuilder::new("app.Worker", "step")
            .returns(ValueKind::Int)
            .param_slots(2)
            .register(&mut env.methods);
        let run = MethodBuilder::new("app.Worker", "run")
            .code(vec![Opcode::Other, Opcode::Call { target: step }])
            .register(&mut env.methods);
        let main = MethodBuilder::new("app.Main", "main")
            .handler(0, 10, 12, Some(io))
            .register(&mut env.methods);

        let mut thread = VmThread::new();
        thread.push_frame(VmFrame::new(main, 4));
        thread.push_frame(VmFrame::new(run, 1));
        (env, thread)
    }

    fn raise(env: &RuntimeEnv) -> ObjRef {
        env.types
            .new_exception(TypeRegistry::RUNTIME_FAULT, "boom", None)
    }

    #[test]
    fn test_disabled_recovery() {
        let (env, thread) = setup();
        let oracle = RecoveryOracle::new(RecoveryConfig {
            enable_recovery: false,
            ..RecoveryConfig::default()
        });
        let action = oracle.recover(&thread, &env, raise(&env), None);
        assert_eq!(action.failure_kind(), FailureKind::RecoveryDisabled);
        assert!(!action.can_recover());
    }

    #[test]
    fn test_forced_generic_end_to_end() {
        let (env, thread) = setup();
        let io = env.types.by_name("IoFault").unwrap();
        let oracle = RecoveryOracle::new(RecoveryConfig::default());

        let action = oracle.recover(&thread, &env, raise(&env), None);
        assert_eq!(action.failure_kind(), FailureKind::Uncaught);
        assert_eq!(action.recovery_kind(), RecoveryKind::ErrorTransformation);
        assert_eq!(action.target_exception_type(), Some(io));
        assert_eq!(oracle.recovered_count(), 1);
    }

    #[test]
    fn test_loop_prevention_marker() {
        let (env, thread) = setup();
        let oracle = RecoveryOracle::new(RecoveryConfig::default());
        let exc = raise(&env);

        let action = oracle.recover(&thread, &env, exc.clone(), None);
        assert!(action.can_recover());
        // The marker survives a successful attempt; the pre-check now
        // refuses the identical instance.
        assert!(oracle.quick_cannot_recover_check(&thread, &env, &exc));
        let again = oracle.recover(&thread, &env, exc, None);
        assert!(!again.can_recover());
        assert_eq!(oracle.recovered_count(), 1);
    }

    #[test]
    fn test_marker_cleared_after_fruitless_attempt() {
        let (env, thread) = setup();
        let oracle = RecoveryOracle::new(RecoveryConfig {
            use_error_transformation: false,
            use_early_return: false,
            ..RecoveryConfig::default()
        });
        let exc = raise(&env);
        let action = oracle.recover(&thread, &env, exc.clone(), None);
        assert!(!action.can_recover());
        assert!(!thread.recovery.has_last_checked_exception());
        assert!(!oracle.quick_cannot_recover_check(&thread, &env, &exc));
    }

    #[test]
    fn test_ineligible_exception_type() {
        let (env, thread) = setup();
        let io = env.types.by_name("IoFault").unwrap();
        let oracle = RecoveryOracle::new(RecoveryConfig::default());
        let exc = env.types.new_exception(io, "disk gone", None);
        assert!(oracle.quick_cannot_recover_check(&thread, &env, &exc));
        let action = oracle.recover(&thread, &env, exc, None);
        assert_eq!(action.failure_kind(), FailureKind::NotAFailure);
    }

    #[test]
    fn test_early_return_arms_thread_state() {
        let (env, thread) = setup();
        let oracle = RecoveryOracle::new(RecoveryConfig {
            use_error_transformation: false,
            ..RecoveryConfig::default()
        });
        let action = oracle.recover(&thread, &env, raise(&env), None);
        assert_eq!(action.early_return(), Some((0, ValueKind::Int, 2)));
        assert!(thread.recovery.is_early_return_pending());
        assert!(thread.recovery.make_early_return_now());
    }

    #[test]
    fn test_pending_exception_cleared_on_exit() {
        let (env, thread) = setup();
        let exc = raise(&env);
        thread.set_pending_exception(exc.clone());
        let oracle = RecoveryOracle::new(RecoveryConfig::default());
        oracle.recover(&thread, &env, exc, None);
        assert!(!thread.has_pending_exception());
    }
}
