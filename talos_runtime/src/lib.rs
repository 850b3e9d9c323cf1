//! Runtime collaborator model for the Talos recovery oracle.
//!
//! This crate is the interface boundary described by the oracle's contract:
//! the frame/stack representation, the exception-type system, method
//! metadata with handler-region tables, and the per-thread recovery state
//! the dispatch loop consumes. The oracle itself lives in `talos_oracle`
//! and treats everything here as read-only, except for the recovery state.

pub mod exception;
pub mod method;
pub mod recovery_state;
pub mod thread;
pub mod types;
pub mod value;

pub use exception::{same_exception, ExceptionInstance};
pub use method::{
    HandlerRegion, MethodBuilder, MethodFlags, MethodId, MethodInfo, MethodRegistry, Opcode,
    STR_BUILTIN_HOLDER,
};
pub use recovery_state::{
    EarlyReturnRecord, EarlyReturnState, RecoveryMark, RecoveryPhase, RecoveryState, SearchMark,
};
pub use thread::{VmFrame, VmThread};
pub use types::{ExceptionType, ExceptionTypeId, TypeRegistry};
pub use value::{HeapObj, ObjRef, Value, ValueKind};

/// The registries the oracle needs to resolve methods and types.
///
/// Explicitly constructed by the embedder and passed by reference; never a
/// process-global.
#[derive(Debug, Default)]
pub struct RuntimeEnv {
    /// Exception-type table.
    pub types: TypeRegistry,
    /// Method table.
    pub methods: MethodRegistry,
}

impl RuntimeEnv {
    /// Environment with builtin exception types and no methods.
    pub fn with_builtins() -> Self {
        RuntimeEnv {
            types: TypeRegistry::with_builtins(),
            methods: MethodRegistry::new(),
        }
    }
}
