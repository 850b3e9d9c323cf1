//! Known-exception-handler resolution.
//!
//! Given a pivot method and a frame range, each backend tries to name a
//! plausible target exception type that some frame in range is already
//! prepared to handle. The backends are interchangeable behind
//! [`HandlerResolver`] and selected once from configuration; the strategy
//! selector neither knows nor cares which one produced the answer.
//!
//! | Backend                | Knowledge source                                |
//! |------------------------|-------------------------------------------------|
//! | `KnowledgeStoreResolver` | learned (type, call-trail) facts in the store |
//! | `StackDeclaredResolver`  | the pivot's declared checked exceptions       |
//! | `ForcedGenericResolver`  | any constructible handler region in range     |

use crate::config::{RecoveryConfig, ResolverBackend};
use crate::handler_lookup::{first_constructible_handler, handler_for, HandlerMatch, LookupError};
use crate::snapshot::StackSnapshot;
use crate::store::{KnowledgeStore, StoreError};
use crate::trace::TraceFlags;
use talos_runtime::{ExceptionTypeId, MethodId, MethodInfo, RuntimeEnv};
use thiserror::Error;
use tracing::debug;

// =============================================================================
// Request / Result Shapes
// =============================================================================

/// Everything a backend may consult. Built once per selector step.
pub struct ResolveRequest<'a> {
    /// The captured stack.
    pub snapshot: &'a StackSnapshot,
    /// First frame index to consider.
    pub begin: usize,
    /// Last frame index to consider (inclusive).
    pub end: usize,
    /// Method whose declared checked exceptions seed the scan.
    pub pivot: MethodId,
    /// Type of the exception previously marked last-checked on this thread,
    /// if any. Used for loop avoidance by the stack-declared backend.
    pub last_checked_ty: Option<ExceptionTypeId>,
    /// Runtime registries.
    pub env: &'a RuntimeEnv,
    /// Active configuration.
    pub config: &'a RecoveryConfig,
    /// Knowledge store, when one is connected.
    pub store: Option<&'a dyn KnowledgeStore>,
}

/// A resolved transformation target.
#[derive(Debug, Clone, Copy)]
pub struct ResolvedTarget {
    /// Exception type to transform into.
    pub ty: ExceptionTypeId,
    /// Frame index the target was resolved at.
    pub frame: usize,
    /// The handler region backing the resolution, when one was inspected.
    pub handler: Option<HandlerMatch>,
}

/// Resolution failure; degraded to "no recovery" by the selector.
#[derive(Debug, Error)]
pub enum ResolveError {
    /// Knowledge-store transport failure.
    #[error(transparent)]
    Store(#[from] StoreError),
    /// Handler-table inspection failure.
    #[error(transparent)]
    Lookup(#[from] LookupError),
}

/// One pluggable resolution strategy.
pub trait HandlerResolver {
    /// Try to name a target type reachable from the request's frame range.
    fn resolve(&self, req: &ResolveRequest<'_>) -> Result<Option<ResolvedTarget>, ResolveError>;
}

/// Instantiate the backend the configuration selects.
pub fn resolver_for(backend: ResolverBackend) -> Box<dyn HandlerResolver + Send + Sync> {
    match backend {
        ResolverBackend::KnowledgeStore { induced } => {
            Box::new(KnowledgeStoreResolver { induced })
        }
        ResolverBackend::StackDeclared => Box::new(StackDeclaredResolver),
        ResolverBackend::ForcedGeneric => Box::new(ForcedGenericResolver),
    }
}

// =============================================================================
// Store Keys
// =============================================================================

/// Key recording that transforming into `ty` was observed safe for the call
/// trail `[begin, frame]`: `<prefix>-fuzzing:<Type>:<pc>@<sig>|...`, trail
/// segments innermost first.
pub fn fuzzing_key(
    config: &RecoveryConfig,
    env: &RuntimeEnv,
    snapshot: &StackSnapshot,
    ty: ExceptionTypeId,
    begin: usize,
    frame: usize,
) -> String {
    let mut key = format!("{}-fuzzing:{}:", config.store_key_prefix, env.types.name_of(ty));
    for index in begin..=frame {
        let Some(descriptor) = snapshot.get(index) else {
            break;
        };
        if index > begin {
            key.push('|');
        }
        key.push_str(&format!(
            "{}@{}",
            descriptor.pc,
            env.methods.signature_of(descriptor.method)
        ));
    }
    key
}

/// Key recording a fact about one concrete handler region:
/// `<prefix>-induced:<sig>:<start>:<end>:<handler_pc>`.
pub fn induced_key(
    config: &RecoveryConfig,
    method: &MethodInfo,
    start_pc: u32,
    end_pc: u32,
    handler_pc: u32,
) -> String {
    format!(
        "{}-induced:{}:{}:{}:{}",
        config.store_key_prefix, method.signature, start_pc, end_pc, handler_pc
    )
}

// =============================================================================
// Knowledge-Store Backend
// =============================================================================

/// Resolution from learned facts in the external store.
pub struct KnowledgeStoreResolver {
    /// Additionally query per-handler-region induced keys.
    pub induced: bool,
}

impl HandlerResolver for KnowledgeStoreResolver {
    fn resolve(&self, req: &ResolveRequest<'_>) -> Result<Option<ResolvedTarget>, ResolveError> {
        let Some(store) = req.store else {
            return Ok(None);
        };
        let Some(pivot) = req.env.methods.get(req.pivot) else {
            return Ok(None);
        };
        let end = req.end.min(req.snapshot.len().saturating_sub(1));

        // Candidate types with no fact at all are pruned up front with one
        // prefix query each.
        let mut live_types: Vec<ExceptionTypeId> = Vec::new();
        for &ty in pivot.checked_exceptions.iter() {
            if !req.env.types.has_string_ctor(ty) {
                if req.config.traces(TraceFlags::IGNORE) {
                    debug!(
                        candidate = req.env.types.name_of(ty),
                        "skipping candidate without a string constructor"
                    );
                }
                continue;
            }
            let namespace = format!(
                "{}-fuzzing:{}:",
                req.config.store_key_prefix,
                req.env.types.name_of(ty)
            );
            if store.contains_key_prefix(&namespace)? {
                live_types.push(ty);
            }
        }

        for frame in req.begin..=end {
            for &ty in &live_types {
                let key = fuzzing_key(req.config, req.env, req.snapshot, ty, req.begin, frame);
                if req.config.traces(TraceFlags::USE_STORE) {
                    debug!(%key, "store lookup");
                }
                if store.contains_key_precise(&key)? {
                    return Ok(Some(ResolvedTarget {
                        ty,
                        frame,
                        handler: None,
                    }));
                }
            }

            if self.induced {
                if let Some(target) = self.resolve_induced(req, store, frame)? {
                    return Ok(Some(target));
                }
            }
        }

        Ok(None)
    }
}

impl KnowledgeStoreResolver {
    /// Induced mode: ask per handler region covering the frame's pc whether
    /// the region itself is a recorded fact; a hit resolves the region's own
    /// catch type, bypassing the declared-checked-exceptions list.
    fn resolve_induced(
        &self,
        req: &ResolveRequest<'_>,
        store: &dyn KnowledgeStore,
        frame: usize,
    ) -> Result<Option<ResolvedTarget>, ResolveError> {
        let Some(descriptor) = req.snapshot.get(frame) else {
            return Ok(None);
        };
        let Some(method) = req.env.methods.get(descriptor.method) else {
            return Ok(None);
        };

        for (region_index, region) in method.handlers.iter().enumerate() {
            if descriptor.pc < region.start_pc || descriptor.pc >= region.end_pc {
                continue;
            }
            let Some(declared) = region.catch_type else {
                continue;
            };
            if !req.env.types.has_string_ctor(declared) {
                continue;
            }
            let key = induced_key(
                req.config,
                method,
                region.start_pc,
                region.end_pc,
                region.handler_pc,
            );
            if req.config.traces(TraceFlags::USE_INDUCED) {
                debug!(%key, "induced store lookup");
            }
            if store.contains_key_precise(&key)? {
                return Ok(Some(ResolvedTarget {
                    ty: declared,
                    frame,
                    handler: Some(HandlerMatch {
                        handler_pc: region.handler_pc,
                        caught_type: region.catch_type,
                        region_index,
                    }),
                }));
            }
        }
        Ok(None)
    }
}

// =============================================================================
// Stack-Declared Backend
// =============================================================================

/// Resolution from the pivot method's declared checked exceptions.
pub struct StackDeclaredResolver;

impl HandlerResolver for StackDeclaredResolver {
    fn resolve(&self, req: &ResolveRequest<'_>) -> Result<Option<ResolvedTarget>, ResolveError> {
        let Some(pivot) = req.env.methods.get(req.pivot) else {
            return Ok(None);
        };
        let end = req.end.min(req.snapshot.len().saturating_sub(1));

        for frame in req.begin..=end {
            let Some(descriptor) = req.snapshot.get(frame) else {
                break;
            };
            let Some(method) = req.env.methods.get(descriptor.method) else {
                continue;
            };

            for &ty in pivot.checked_exceptions.iter() {
                if !req.env.types.has_string_ctor(ty) {
                    if req.config.traces(TraceFlags::IGNORE) {
                        debug!(
                            candidate = req.env.types.name_of(ty),
                            "skipping candidate without a string constructor"
                        );
                    }
                    continue;
                }
                // A trivial target would trade one meaningless catch for
                // another; the last-checked type would loop.
                if ty == talos_runtime::TypeRegistry::BASE_FAULT
                    || ty == talos_runtime::TypeRegistry::FAULT
                {
                    continue;
                }
                if req.last_checked_ty == Some(ty) {
                    continue;
                }

                if let Some(hit) =
                    handler_for(method, descriptor.pc, Some(ty), &req.env.types, req.config)?
                {
                    if hit.is_finally() {
                        continue;
                    }
                    if req.config.traces(TraceFlags::USE_STACK) {
                        debug!(
                            frame,
                            method = %method.signature,
                            target = req.env.types.name_of(ty),
                            "declared checked exception has a handler in range"
                        );
                    }
                    return Ok(Some(ResolvedTarget {
                        ty,
                        frame,
                        handler: Some(hit),
                    }));
                }
            }
        }

        Ok(None)
    }
}

// =============================================================================
// Forced-Generic Backend
// =============================================================================

/// Resolution from any constructible handler region in range, regardless of
/// what the pivot declares.
pub struct ForcedGenericResolver;

impl HandlerResolver for ForcedGenericResolver {
    fn resolve(&self, req: &ResolveRequest<'_>) -> Result<Option<ResolvedTarget>, ResolveError> {
        let end = req.end.min(req.snapshot.len().saturating_sub(1));

        for frame in req.begin..=end {
            let Some(descriptor) = req.snapshot.get(frame) else {
                break;
            };
            let Some(method) = req.env.methods.get(descriptor.method) else {
                continue;
            };

            if let Some(hit) =
                first_constructible_handler(method, descriptor.pc, &req.env.types, req.config)?
            {
                let Some(ty) = hit.caught_type else {
                    continue;
                };
                if req.config.traces(TraceFlags::TRANSFORMING) {
                    debug!(
                        frame,
                        method = %method.signature,
                        target = req.env.types.name_of(ty),
                        "forcing the first constructible handler in range"
                    );
                }
                return Ok(Some(ResolvedTarget {
                    ty,
                    frame,
                    handler: Some(hit),
                }));
            }
        }

        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::capture;
    use crate::store::MemoryStore;
    use talos_runtime::{MethodBuilder, TypeRegistry, VmFrame, VmThread};

    struct Fixture {
        env: RuntimeEnv,
        thread: VmThread,
        config: RecoveryConfig,
        pivot: MethodId,
    }

    impl Fixture {
        fn request<'a>(
            &'a self,
            snapshot: &'a StackSnapshot,
            store: Option<&'a dyn KnowledgeStore>,
        ) -> ResolveRequest<'a> {
            ResolveRequest {
                snapshot,
                begin: 0,
                end: snapshot.len().saturating_sub(1),
                pivot: self.pivot,
                last_checked_ty: None,
                env: &self.env,
                config: &self.config,
                store,
            }
        }
    }

    // Two frames: work (throws, declares IoFault) called by main (handles
    // IoFault at pc 4).
    fn fixture() -> Fixture {
        let mut env = RuntimeEnv::with_builtins();
        let io = env.types.by_name("IoFault").unwrap();
        let pivot = MethodBuilder::new("app.Main", "work")
            .throws(io)
            .register(&mut env.methods);
        let main = MethodBuilder::new("app.Main", "main")
            .handler(0, 10, 12, Some(io))
            .register(&mut env.methods);

        let mut thread = VmThread::new();
        thread.push_frame(VmFrame::new(main, 4));
        thread.push_frame(VmFrame::new(pivot, 1));

        Fixture {
            env,
            thread,
            config: RecoveryConfig::default(),
            pivot,
        }
    }

    #[test]
    fn test_store_backend_precise_hit() {
        let f = fixture();
        let io = f.env.types.by_name("IoFault").unwrap();
        let snapshot = capture(&f.thread, &f.env, &f.config);

        let mut store = MemoryStore::new();
        store.insert(fuzzing_key(&f.config, &f.env, &snapshot, io, 0, 1));

        let resolver = KnowledgeStoreResolver { induced: false };
        let target = resolver
            .resolve(&f.request(&snapshot, Some(&store)))
            .unwrap()
            .unwrap();
        assert_eq!(target.ty, io);
        assert_eq!(target.frame, 1);
    }

    #[test]
    fn test_store_backend_miss_and_no_store() {
        let f = fixture();
        let snapshot = capture(&f.thread, &f.env, &f.config);
        let resolver = KnowledgeStoreResolver { induced: false };

        let empty = MemoryStore::new();
        assert!(resolver
            .resolve(&f.request(&snapshot, Some(&empty)))
            .unwrap()
            .is_none());
        assert!(resolver.resolve(&f.request(&snapshot, None)).unwrap().is_none());
    }

    #[test]
    fn test_store_backend_induced_hit() {
        let f = fixture();
        let io = f.env.types.by_name("IoFault").unwrap();
        let snapshot = capture(&f.thread, &f.env, &f.config);

        // Fact recorded against main's handler region directly.
        let main = f.env.methods.get(snapshot.get(1).unwrap().method).unwrap();
        let mut store = MemoryStore::new();
        store.insert(induced_key(&f.config, main, 0, 10, 12));

        let blind = KnowledgeStoreResolver { induced: false };
        assert!(blind
            .resolve(&f.request(&snapshot, Some(&store)))
            .unwrap()
            .is_none());

        let resolver = KnowledgeStoreResolver { induced: true };
        let target = resolver
            .resolve(&f.request(&snapshot, Some(&store)))
            .unwrap()
            .unwrap();
        assert_eq!(target.ty, io);
        assert_eq!(target.frame, 1);
        assert_eq!(target.handler.unwrap().handler_pc, 12);
    }

    #[test]
    fn test_stack_declared_backend() {
        let f = fixture();
        let io = f.env.types.by_name("IoFault").unwrap();
        let snapshot = capture(&f.thread, &f.env, &f.config);

        let target = StackDeclaredResolver
            .resolve(&f.request(&snapshot, None))
            .unwrap()
            .unwrap();
        assert_eq!(target.ty, io);
        assert_eq!(target.frame, 1);

        // The last-checked type is skipped for loop avoidance.
        let mut req = f.request(&snapshot, None);
        req.last_checked_ty = Some(io);
        assert!(StackDeclaredResolver.resolve(&req).unwrap().is_none());
    }

    #[test]
    fn test_stack_declared_skips_trivial_declarations() {
        let mut env = RuntimeEnv::with_builtins();
        let pivot = MethodBuilder::new("app.Main", "work")
            .throws(TypeRegistry::FAULT)
            .register(&mut env.methods);
        let main = MethodBuilder::new("app.Main", "main")
            .handler(0, 10, 12, Some(TypeRegistry::FAULT))
            .register(&mut env.methods);

        let mut thread = VmThread::new();
        thread.push_frame(VmFrame::new(main, 4));
        thread.push_frame(VmFrame::new(pivot, 1));

        let config = RecoveryConfig::default();
        let snapshot = capture(&thread, &env, &config);
        let req = ResolveRequest {
            snapshot: &snapshot,
            begin: 0,
            end: 1,
            pivot,
            last_checked_ty: None,
            env: &env,
            config: &config,
            store: None,
        };
        assert!(StackDeclaredResolver.resolve(&req).unwrap().is_none());
    }

    #[test]
    fn test_forced_generic_backend() {
        let f = fixture();
        let io = f.env.types.by_name("IoFault").unwrap();
        let snapshot = capture(&f.thread, &f.env, &f.config);

        // No store, no declared-exception reasoning: the wildcard scan still
        // finds main's handler region.
        let target = ForcedGenericResolver
            .resolve(&f.request(&snapshot, None))
            .unwrap()
            .unwrap();
        assert_eq!(target.ty, io);
        assert_eq!(target.frame, 1);
    }

    #[test]
    fn test_resolver_for_dispatch() {
        let f = fixture();
        let snapshot = capture(&f.thread, &f.env, &f.config);
        let resolver = resolver_for(ResolverBackend::ForcedGeneric);
        assert!(resolver.resolve(&f.request(&snapshot, None)).unwrap().is_some());
    }
}
