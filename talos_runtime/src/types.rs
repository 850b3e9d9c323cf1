//! Exception-type registry: the subtype/reflection facility of the runtime.
//!
//! The oracle consumes this surface through three queries only: subtype
//! tests, "can this type be constructed from a message string", and instance
//! construction. Types form a single-parent hierarchy rooted at
//! [`TypeRegistry::BASE_FAULT`].
//!
//! # Builtin hierarchy
//!
//! ```text
//! BaseFault                   ← universal base, catch-all handlers
//! └── Fault                   ← most general catchable ancestor
//!     ├── RuntimeFault        ← recoverable base (eligibility gate)
//!     │   ├── ArgumentFault
//!     │   ├── StateFault
//!     │   └── RangeFault
//!     └── IoFault             ← checked, not recoverable itself
//! ```

use crate::exception::ExceptionInstance;
use crate::value::{HeapObj, ObjRef};
use rustc_hash::FxHashMap;
use std::sync::Arc;

// =============================================================================
// Type Identity
// =============================================================================

/// Index of an exception type in the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ExceptionTypeId(pub u32);

// =============================================================================
// Type Descriptors
// =============================================================================

/// One registered exception type.
#[derive(Debug)]
pub struct ExceptionType {
    /// Fully qualified type name.
    pub name: Arc<str>,
    /// Parent type; `None` only for the universal base.
    pub parent: Option<ExceptionTypeId>,
    /// Whether the type declares a `(message: str)` constructor.
    ///
    /// Recovery can only synthesize instances of types that do.
    pub has_string_ctor: bool,
}

// =============================================================================
// Registry
// =============================================================================

/// The exception-type table for one runtime instance.
///
/// Explicitly constructed and injected into the oracle; immutable after the
/// program's types are registered.
#[derive(Debug, Default)]
pub struct TypeRegistry {
    types: Vec<ExceptionType>,
    by_name: FxHashMap<Arc<str>, ExceptionTypeId>,
}

impl TypeRegistry {
    /// The universal base exception type.
    pub const BASE_FAULT: ExceptionTypeId = ExceptionTypeId(0);
    /// The most general catchable ancestor.
    pub const FAULT: ExceptionTypeId = ExceptionTypeId(1);
    /// The recoverable base: only subtypes of this are eligible for recovery.
    pub const RUNTIME_FAULT: ExceptionTypeId = ExceptionTypeId(2);

    /// Create a registry seeded with the builtin hierarchy.
    pub fn with_builtins() -> Self {
        let mut reg = TypeRegistry::default();
        let base = reg.register("BaseFault", None, true);
        debug_assert_eq!(base, Self::BASE_FAULT);
        let fault = reg.register("Fault", Some(base), true);
        debug_assert_eq!(fault, Self::FAULT);
        let runtime = reg.register("RuntimeFault", Some(fault), true);
        debug_assert_eq!(runtime, Self::RUNTIME_FAULT);
        reg.register("ArgumentFault", Some(runtime), true);
        reg.register("StateFault", Some(runtime), true);
        reg.register("RangeFault", Some(runtime), true);
        reg.register("IoFault", Some(fault), true);
        reg
    }

    /// Register a type. Names must be unique.
    pub fn register(
        &mut self,
        name: impl Into<Arc<str>>,
        parent: Option<ExceptionTypeId>,
        has_string_ctor: bool,
    ) -> ExceptionTypeId {
        let name = name.into();
        debug_assert!(!self.by_name.contains_key(&name), "duplicate type name");
        let id = ExceptionTypeId(self.types.len() as u32);
        self.by_name.insert(name.clone(), id);
        self.types.push(ExceptionType {
            name,
            parent,
            has_string_ctor,
        });
        id
    }

    /// Look up a type descriptor. `None` for a stale or foreign id.
    #[inline]
    pub fn get(&self, id: ExceptionTypeId) -> Option<&ExceptionType> {
        self.types.get(id.0 as usize)
    }

    /// Look up a type by name.
    pub fn by_name(&self, name: &str) -> Option<ExceptionTypeId> {
        self.by_name.get(name).copied()
    }

    /// Type name, or a placeholder for unknown ids (trace output only).
    pub fn name_of(&self, id: ExceptionTypeId) -> &str {
        self.get(id).map_or("<unknown>", |t| &t.name)
    }

    /// Whether `sub` is `sup` or a transitive descendant of it.
    pub fn is_subtype_of(&self, sub: ExceptionTypeId, sup: ExceptionTypeId) -> bool {
        let mut cursor = Some(sub);
        while let Some(id) = cursor {
            if id == sup {
                return true;
            }
            cursor = self.get(id).and_then(|t| t.parent);
        }
        false
    }

    /// Whether the type declares a `(message: str)` constructor.
    pub fn has_string_ctor(&self, id: ExceptionTypeId) -> bool {
        self.get(id).is_some_and(|t| t.has_string_ctor)
    }

    /// Construct a new exception instance of `ty`.
    ///
    /// The caller is responsible for checking [`Self::has_string_ctor`]
    /// first; constructing a type without one is a programming error.
    pub fn new_exception(
        &self,
        ty: ExceptionTypeId,
        message: impl Into<String>,
        cause: Option<ObjRef>,
    ) -> ObjRef {
        debug_assert!(self.get(ty).is_some(), "unknown exception type");
        debug_assert!(self.has_string_ctor(ty), "type has no string constructor");
        Arc::new(HeapObj::Exception(ExceptionInstance::new(
            ty,
            message,
            cause,
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_hierarchy() {
        let reg = TypeRegistry::with_builtins();
        let arg = reg.by_name("ArgumentFault").unwrap();
        assert!(reg.is_subtype_of(arg, TypeRegistry::RUNTIME_FAULT));
        assert!(reg.is_subtype_of(arg, TypeRegistry::FAULT));
        assert!(reg.is_subtype_of(arg, TypeRegistry::BASE_FAULT));
        assert!(!reg.is_subtype_of(TypeRegistry::RUNTIME_FAULT, arg));

        let io = reg.by_name("IoFault").unwrap();
        assert!(!reg.is_subtype_of(io, TypeRegistry::RUNTIME_FAULT));
        assert!(reg.is_subtype_of(io, TypeRegistry::FAULT));
    }

    #[test]
    fn test_subtype_is_reflexive() {
        let reg = TypeRegistry::with_builtins();
        assert!(reg.is_subtype_of(TypeRegistry::FAULT, TypeRegistry::FAULT));
    }

    #[test]
    fn test_unknown_id() {
        let reg = TypeRegistry::with_builtins();
        let bogus = ExceptionTypeId(9999);
        assert!(reg.get(bogus).is_none());
        assert!(!reg.is_subtype_of(bogus, TypeRegistry::FAULT));
        assert_eq!(reg.name_of(bogus), "<unknown>");
    }

    #[test]
    fn test_string_ctor_flag() {
        let mut reg = TypeRegistry::with_builtins();
        let plain = reg.register("NoCtorFault", Some(TypeRegistry::RUNTIME_FAULT), false);
        assert!(!reg.has_string_ctor(plain));
        assert!(reg.has_string_ctor(TypeRegistry::RUNTIME_FAULT));
    }

    #[test]
    fn test_new_exception() {
        let reg = TypeRegistry::with_builtins();
        let exc = reg.new_exception(TypeRegistry::RUNTIME_FAULT, "boom", None);
        let inner = exc.as_exception().unwrap();
        assert_eq!(inner.ty, TypeRegistry::RUNTIME_FAULT);
        assert_eq!(&*inner.message, "boom");
        assert!(inner.cause.is_none());
    }
}
