//! Talos: an exception-recovery oracle for a managed bytecode runtime.
//!
//! When an exception is about to propagate uncaught, the embedding runtime
//! hands the failing thread to [`RecoveryOracle::recover`]. The oracle
//! captures the call stack, classifies the failure against the
//! handler-region tables in scope, and, when the failure is recoverable,
//! synthesizes one of two actions: transform the exception into a type some
//! frame already expects, or fabricate a return value at an active call
//! site so the call completes normally. The caller applies the returned
//! [`RecoveryAction`]; the oracle itself never mutates frames.
//!
//! Collaborators (the knowledge store and the external search oracle) are
//! injected; the runtime model the oracle reads lives in `talos_runtime`.

pub mod action;
pub mod bridge;
pub mod classifier;
pub mod config;
pub mod escape;
pub mod guard;
pub mod handler_lookup;
pub mod oracle;
pub mod resolver;
pub mod selector;
pub mod snapshot;
pub mod store;
pub mod trace;

pub use action::{FailureKind, RecoveryAction, RecoveryKind};
pub use bridge::{
    BridgeError, MethodHandle, SearchOracle, SearchRequest, SearchVerdict, SerializedFrame,
    VerdictPayload,
};
pub use classifier::{classify, Classification};
pub use config::{RecoveryConfig, ResolverBackend};
pub use escape::escape_eligible;
pub use guard::has_unsafe_initializer;
pub use handler_lookup::{
    first_constructible_handler, handler_for, HandlerMatch, LookupError,
};
pub use oracle::RecoveryOracle;
pub use resolver::{
    fuzzing_key, induced_key, resolver_for, ForcedGenericResolver, HandlerResolver,
    KnowledgeStoreResolver, ResolveError, ResolveRequest, ResolvedTarget, StackDeclaredResolver,
};
pub use selector::select;
pub use snapshot::{capture, FrameDescriptor, StackSnapshot};
pub use store::{KnowledgeStore, MemoryStore, StoreError, TcpStore};
pub use trace::TraceFlags;
