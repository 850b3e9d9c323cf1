//! Recovery strategy selection.
//!
//! Orchestrates the strategies in fixed priority order, stopping at the
//! first one that commits a recovery into the action:
//!
//! 1. the external search oracle, authoritative when enabled;
//! 2. fast error transformation, pivoting first at the reflection layer's
//!    recorded top method, then at the resolved callee of the top frame's
//!    call site, then at every frame in the recovery context in turn;
//! 3. fast early return at the innermost qualifying call site.
//!
//! Collaborator failures degrade to the next strategy; handler-table
//! inspection failures abort selection with nothing committed.

use crate::action::{trace_action, RecoveryAction};
use crate::bridge::{self, SearchOracle};
use crate::config::RecoveryConfig;
use crate::resolver::{HandlerResolver, ResolveError, ResolveRequest};
use crate::snapshot::StackSnapshot;
use crate::store::KnowledgeStore;
use crate::trace::TraceFlags;
use smallvec::SmallVec;
use talos_runtime::{MethodId, RuntimeEnv, ValueKind, VmThread};
use tracing::{debug, warn};

/// Run strategy selection for one attempt. Mutates `action` in place; on
/// return, `action.can_recover()` tells whether anything was selected.
#[allow(clippy::too_many_arguments)]
pub fn select(
    thread: &VmThread,
    snapshot: &StackSnapshot,
    action: &mut RecoveryAction,
    env: &RuntimeEnv,
    config: &RecoveryConfig,
    resolver: &dyn HandlerResolver,
    store: Option<&dyn KnowledgeStore>,
    search: Option<&dyn SearchOracle>,
) {
    let Some(boundary) = action.context_boundary().or_else(|| snapshot.last_index()) else {
        return;
    };

    if config.use_search_oracle {
        // Authoritative: whatever the oracle answers (including nothing) is
        // final, the fast paths are not consulted.
        match search {
            Some(oracle) => {
                bridge::consult(thread, snapshot, action, boundary, oracle, env, config);
                trace_action(config, env, action, "search oracle");
            }
            None => warn!("search oracle enabled but not connected; no recovery"),
        }
        return;
    }

    if config.use_error_transformation
        && !select_transformation(thread, snapshot, action, boundary, env, config, resolver, store)
    {
        // Inspection failed somewhere; nothing may be committed.
        return;
    }

    if !action.can_recover() && config.use_early_return {
        select_early_return(snapshot, action, boundary, env, config);
    }
}

// =============================================================================
// Error Transformation
// =============================================================================

/// Try the transformation pivots in order. Returns `false` only when an
/// internal inspection error aborts the whole selection.
#[allow(clippy::too_many_arguments)]
fn select_transformation(
    thread: &VmThread,
    snapshot: &StackSnapshot,
    action: &mut RecoveryAction,
    boundary: usize,
    env: &RuntimeEnv,
    config: &RecoveryConfig,
    resolver: &dyn HandlerResolver,
    store: Option<&dyn KnowledgeStore>,
) -> bool {
    let last_checked_ty = thread
        .recovery
        .last_checked_exception()
        .and_then(|marker| marker.as_exception().map(|e| e.ty));

    let mut pivots: SmallVec<[MethodId; 8]> = SmallVec::new();
    if let Some(top) = action.recorded_top_method() {
        pivots.push(top);
    }
    if let Some(callee) = snapshot.top_callee() {
        pivots.push(callee);
    }
    for frame in snapshot.frames().iter().take(boundary + 1) {
        pivots.push(frame.method);
    }

    for pivot in pivots {
        let request = ResolveRequest {
            snapshot,
            begin: 0,
            end: boundary,
            pivot,
            last_checked_ty,
            env,
            config,
            store,
        };
        match resolver.resolve(&request) {
            Ok(Some(target)) => {
                if config.traces(TraceFlags::TRANSFORMING) {
                    debug!(
                        pivot = env.methods.signature_of(pivot),
                        frame = target.frame,
                        target = env.types.name_of(target.ty),
                        "transformation target resolved"
                    );
                }
                action.set_error_transformation(target.ty);
                trace_action(config, env, action, "error transformation");
                return true;
            }
            Ok(None) => continue,
            Err(ResolveError::Store(err)) => {
                // Degraded store: transformation is off the table, the
                // early-return path still applies.
                warn!(%err, "knowledge store unavailable; skipping transformation");
                return true;
            }
            Err(ResolveError::Lookup(err)) => {
                warn!(%err, "handler inspection failed; aborting selection");
                action.clear_recovery();
                return false;
            }
        }
    }
    true
}

// =============================================================================
// Early Return
// =============================================================================

fn select_early_return(
    snapshot: &StackSnapshot,
    action: &mut RecoveryAction,
    boundary: usize,
    env: &RuntimeEnv,
    config: &RecoveryConfig,
) {
    // Debug override: fabricate at the named frame, no questions asked
    // beyond it actually being a call site.
    if let Some(forced) = config.force_early_return_at {
        if let Some((kind, params)) = call_site_result(snapshot, forced, env) {
            if config.traces(TraceFlags::EARLY_RET) {
                debug!(frame = forced, result = %kind, "forced early return");
            }
            action.set_early_return(forced, kind, params);
            trace_action(config, env, action, "forced early return");
        }
        return;
    }

    // A reflective invocation already names the logical top method; return
    // from it directly rather than hunting for a call site.
    if let Some(top) = action.recorded_top_method() {
        if let Some(method) = env.methods.get(top) {
            if !(config.void_only_early_return && method.return_kind != ValueKind::Void) {
                if config.traces(TraceFlags::EARLY_RET) {
                    debug!(
                        method = %method.signature,
                        result = %method.return_kind,
                        "early return from the recorded top method"
                    );
                }
                action.set_early_return(0, method.return_kind, method.param_slots);
                trace_action(config, env, action, "early return (recorded top)");
                return;
            }
        }
    }

    for frame in 0..=boundary {
        let Some((kind, params)) = call_site_result(snapshot, frame, env) else {
            continue;
        };
        if config.void_only_early_return && kind != ValueKind::Void {
            if config.traces(TraceFlags::EARLY_RET) {
                debug!(frame, result = %kind, "skipping non-void call site");
            }
            continue;
        }
        if config.traces(TraceFlags::EARLY_RET) {
            debug!(frame, result = %kind, "early return selected");
        }
        action.set_early_return(frame, kind, params);
        trace_action(config, env, action, "early return");
        return;
    }
}

/// The `(declared result kind, callee parameter slots)` of the call in
/// progress at `frame`, if its current instruction is a call.
fn call_site_result(
    snapshot: &StackSnapshot,
    frame: usize,
    env: &RuntimeEnv,
) -> Option<(ValueKind, u16)> {
    let descriptor = snapshot.get(frame)?;
    let method = env.methods.get(descriptor.method)?;
    let callee = env.methods.get(method.call_target_at(descriptor.pc)?)?;
    Some((callee.return_kind, callee.param_slots))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::RecoveryKind;
    use crate::config::ResolverBackend;
    use crate::resolver::resolver_for;
    use crate::snapshot::capture;
    use talos_runtime::{MethodBuilder, Opcode, TypeRegistry, VmFrame};

    // stack: main (handles IoFault) <- run (at a call to step, returns int).
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

    fn action_for(env: &RuntimeEnv) -> RecoveryAction {
        let exc = env
            .types
            .new_exception(TypeRegistry::RUNTIME_FAULT, "boom", None);
        let mut action = RecoveryAction::new(exc);
        action.set_context_boundary(1);
        action
    }

    #[test]
    fn test_transformation_wins_over_early_return() {
        let (env, thread) = setup();
        let io = env.types.by_name("IoFault").unwrap();
        let config = RecoveryConfig::default();
        let snapshot = capture(&thread, &env, &config);
        let resolver = resolver_for(ResolverBackend::ForcedGeneric);
        let mut action = action_for(&env);

        select(
            &thread, &snapshot, &mut action, &env, &config, &*resolver, None, None,
        );
        assert_eq!(action.recovery_kind(), RecoveryKind::ErrorTransformation);
        assert_eq!(action.target_exception_type(), Some(io));
    }

    #[test]
    fn test_early_return_when_transformation_finds_nothing() {
        let (env, thread) = setup();
        let config = RecoveryConfig {
            // Stack-declared backend finds nothing: no pivot declares
            // checked exceptions.
            backend: ResolverBackend::StackDeclared,
            ..RecoveryConfig::default()
        };
        let snapshot = capture(&thread, &env, &config);
        let resolver = resolver_for(config.backend);
        let mut action = action_for(&env);

        select(
            &thread, &snapshot, &mut action, &env, &config, &*resolver, None, None,
        );
        assert_eq!(action.early_return(), Some((0, ValueKind::Int, 2)));
    }

    #[test]
    fn test_void_only_skips_int_call_site() {
        let (env, thread) = setup();
        let config = RecoveryConfig {
            backend: ResolverBackend::StackDeclared,
            void_only_early_return: true,
            ..RecoveryConfig::default()
        };
        let snapshot = capture(&thread, &env, &config);
        let resolver = resolver_for(config.backend);
        let mut action = action_for(&env);

        select(
            &thread, &snapshot, &mut action, &env, &config, &*resolver, None, None,
        );
        assert_eq!(action.recovery_kind(), RecoveryKind::NoRecovery);
    }

    #[test]
    fn test_forced_override() {
        let (env, thread) = setup();
        let config = RecoveryConfig {
            backend: ResolverBackend::StackDeclared,
            force_early_return_at: Some(0),
            ..RecoveryConfig::default()
        };
        let snapshot = capture(&thread, &env, &config);
        let resolver = resolver_for(config.backend);
        let mut action = action_for(&env);

        select(
            &thread, &snapshot, &mut action, &env, &config, &*resolver, None, None,
        );
        assert_eq!(action.early_return(), Some((0, ValueKind::Int, 2)));
    }

    #[test]
    fn test_recorded_top_method_paths() {
        let (mut env, thread) = setup();
        let reflected = MethodBuilder::new("app.Plugin", "activate")
            .returns(ValueKind::Int)
            .param_slots(1)
            .register(&mut env.methods);
        let config = RecoveryConfig {
            backend: ResolverBackend::StackDeclared,
            ..RecoveryConfig::default()
        };
        let snapshot = capture(&thread, &env, &config);
        let resolver = resolver_for(config.backend);

        let exc = env
            .types
            .new_exception(TypeRegistry::RUNTIME_FAULT, "boom", None);
        let mut action = RecoveryAction::with_recorded_top(exc.clone(), reflected);
        action.set_context_boundary(1);
        select(
            &thread, &snapshot, &mut action, &env, &config, &*resolver, None, None,
        );
        assert_eq!(action.early_return(), Some((0, ValueKind::Int, 1)));

        // Void-only mode rejects the recorded int method and falls back to
        // the scan, which also rejects the int call site.
        let strict = RecoveryConfig {
            void_only_early_return: true,
            ..config
        };
        let mut action = RecoveryAction::with_recorded_top(exc, reflected);
        action.set_context_boundary(1);
        select(
            &thread, &snapshot, &mut action, &env, &strict, &*resolver, None, None,
        );
        assert_eq!(action.recovery_kind(), RecoveryKind::NoRecovery);
    }

    #[test]
    fn test_search_oracle_is_authoritative() {
        use crate::bridge::{BridgeError, SearchRequest, SearchVerdict};

        struct SilentOracle;
        impl SearchOracle for SilentOracle {
            fn search(
                &self,
                _request: &SearchRequest,
            ) -> Result<Option<SearchVerdict>, BridgeError> {
                Ok(None)
            }
        }

        let (env, thread) = setup();
        let config = RecoveryConfig {
            use_search_oracle: true,
            ..RecoveryConfig::default()
        };
        let snapshot = capture(&thread, &env, &config);
        let resolver = resolver_for(config.backend);
        let mut action = action_for(&env);

        // Even though forced-generic transformation and an early-return call
        // site are both available, a silent oracle means no recovery.
        let _mark = talos_runtime::RecoveryMark::new(&thread.recovery);
        select(
            &thread,
            &snapshot,
            &mut action,
            &env,
            &config,
            &*resolver,
            None,
            Some(&SilentOracle),
        );
        assert_eq!(action.recovery_kind(), RecoveryKind::NoRecovery);
    }
}
