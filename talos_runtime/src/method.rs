//! Method model: identity, bytecode call sites, and handler-region tables.
//!
//! This is the slice of the runtime's method metadata the oracle consumes.
//! Bytecode is deliberately reduced to the one shape the oracle inspects —
//! "is the current instruction a call, and to which method" — everything
//! else is `Opcode::Other`.
//!
//! Methods are immutable once registered and shared via `Arc`; the registry
//! is injected wherever method resolution is needed.

use crate::types::ExceptionTypeId;
use crate::value::ValueKind;
use std::sync::Arc;

// =============================================================================
// Method Identity
// =============================================================================

/// Index of a method in the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MethodId(pub u32);

// =============================================================================
// Method Flags
// =============================================================================

/// Method attribute flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MethodFlags(u16);

impl MethodFlags {
    /// No flags.
    pub const NONE: MethodFlags = MethodFlags(0);
    /// Foreign/native method; has no bytecode or handler table.
    pub const NATIVE: MethodFlags = MethodFlags(1 << 0);
    /// Hidden from stack walks unless configured otherwise.
    pub const HIDDEN: MethodFlags = MethodFlags(1 << 1);
    /// Object initializer (constructor body).
    pub const INITIALIZER: MethodFlags = MethodFlags(1 << 2);
    /// The runtime's native reflective-invocation trampoline.
    pub const TRAMPOLINE: MethodFlags = MethodFlags(1 << 3);
    /// Managed wrapper frame of the reflective dispatch chain.
    pub const REFLECT_WRAPPER: MethodFlags = MethodFlags(1 << 4);

    /// Check if a flag is set.
    #[inline]
    pub const fn contains(self, other: MethodFlags) -> bool {
        (self.0 & other.0) == other.0
    }

    /// Combine flags.
    #[inline]
    pub const fn union(self, other: MethodFlags) -> MethodFlags {
        MethodFlags(self.0 | other.0)
    }
}

impl std::ops::BitOr for MethodFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self::Output {
        self.union(rhs)
    }
}

// =============================================================================
// Bytecode
// =============================================================================

/// The reduced instruction alphabet visible to the oracle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    /// Statically resolved call to `target`.
    Call {
        /// Callee method.
        target: MethodId,
    },
    /// Raise the exception in the designated register.
    Raise,
    /// Return from the method.
    Return,
    /// Any instruction the oracle does not inspect.
    Other,
}

// =============================================================================
// Handler Regions
// =============================================================================

/// One entry of a method's exception-handler-region table.
///
/// A region covers instructions `[start_pc, end_pc)`; control transfers to
/// `handler_pc` when a matching exception is raised inside the range.
/// `catch_type == None` marks a finally region, which catches anything.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandlerRegion {
    /// First covered instruction (inclusive).
    pub start_pc: u32,
    /// End of the covered range (exclusive).
    pub end_pc: u32,
    /// Target instruction of the handler.
    pub handler_pc: u32,
    /// Declared catch type; `None` for finally.
    pub catch_type: Option<ExceptionTypeId>,
}

// =============================================================================
// Method Info
// =============================================================================

/// Holder type name of the runtime-builtin string type.
///
/// Recovery across an initializer of this type is vetoed: a half-built
/// string is observable as an invalid value by the rest of the program.
pub const STR_BUILTIN_HOLDER: &str = "str";

/// Immutable metadata for one method.
#[derive(Debug)]
pub struct MethodInfo {
    /// Simple method name.
    pub name: Arc<str>,
    /// Holder type name.
    pub holder: Arc<str>,
    /// Precomputed `holder.name(sig)` string used in knowledge-store keys
    /// and trace output. Stable across runs for the same program.
    pub signature: Arc<str>,
    /// Attribute flags.
    pub flags: MethodFlags,
    /// Number of parameter slots (receiver included for instance methods).
    pub param_slots: u16,
    /// Declared result kind.
    pub return_kind: ValueKind,
    /// Number of local-variable slots.
    pub max_locals: u16,
    /// Bytecode; empty for native methods.
    pub code: Box<[Opcode]>,
    /// Handler-region table in declaration order.
    pub handlers: Box<[HandlerRegion]>,
    /// Declared checked-exception types, in declaration order.
    pub checked_exceptions: Box<[ExceptionTypeId]>,
}

impl MethodInfo {
    /// Whether the method is native.
    #[inline]
    pub fn is_native(&self) -> bool {
        self.flags.contains(MethodFlags::NATIVE)
    }

    /// Whether stack walks skip this method by default.
    #[inline]
    pub fn is_hidden(&self) -> bool {
        self.flags.contains(MethodFlags::HIDDEN)
    }

    /// Whether the method is an object initializer.
    #[inline]
    pub fn is_initializer(&self) -> bool {
        self.flags.contains(MethodFlags::INITIALIZER)
    }

    /// Whether this is the native reflective-invocation trampoline.
    #[inline]
    pub fn is_reflective_trampoline(&self) -> bool {
        self.flags.contains(MethodFlags::TRAMPOLINE)
    }

    /// Whether this is a managed wrapper of the reflective dispatch chain.
    #[inline]
    pub fn is_reflect_wrapper(&self) -> bool {
        self.flags.contains(MethodFlags::REFLECT_WRAPPER)
    }

    /// Whether this is an initializer of the builtin string type.
    #[inline]
    pub fn is_string_builtin_init(&self) -> bool {
        self.is_initializer() && &*self.holder == STR_BUILTIN_HOLDER
    }

    /// The instruction at `pc`, if in range.
    #[inline]
    pub fn opcode_at(&self, pc: u32) -> Option<Opcode> {
        self.code.get(pc as usize).copied()
    }

    /// The statically resolved callee if the instruction at `pc` is a call.
    #[inline]
    pub fn call_target_at(&self, pc: u32) -> Option<MethodId> {
        match self.opcode_at(pc) {
            Some(Opcode::Call { target }) => Some(target),
            _ => None,
        }
    }
}

// =============================================================================
// Method Registry
// =============================================================================

/// The method table for one runtime instance.
#[derive(Debug, Default)]
pub struct MethodRegistry {
    methods: Vec<Arc<MethodInfo>>,
}

impl MethodRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        MethodRegistry::default()
    }

    /// Register a method and return its id.
    pub fn register(&mut self, info: MethodInfo) -> MethodId {
        let id = MethodId(self.methods.len() as u32);
        self.methods.push(Arc::new(info));
        id
    }

    /// Look up a method. `None` for a stale or foreign id.
    #[inline]
    pub fn get(&self, id: MethodId) -> Option<&Arc<MethodInfo>> {
        self.methods.get(id.0 as usize)
    }

    /// Signature string, or a placeholder for unknown ids (trace output).
    pub fn signature_of(&self, id: MethodId) -> &str {
        self.get(id).map_or("<unknown>", |m| &m.signature)
    }

    /// Number of registered methods.
    pub fn len(&self) -> usize {
        self.methods.len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }
}

// =============================================================================
// Builder
// =============================================================================

/// Builder for [`MethodInfo`], used by the runtime front end and by tests.
pub struct MethodBuilder {
    name: Arc<str>,
    holder: Arc<str>,
    flags: MethodFlags,
    param_slots: u16,
    return_kind: ValueKind,
    max_locals: u16,
    code: Vec<Opcode>,
    handlers: Vec<HandlerRegion>,
    checked_exceptions: Vec<ExceptionTypeId>,
}

impl MethodBuilder {
    /// Start a builder for `holder.name`.
    pub fn new(holder: impl Into<Arc<str>>, name: impl Into<Arc<str>>) -> Self {
        MethodBuilder {
            name: name.into(),
            holder: holder.into(),
            flags: MethodFlags::NONE,
            param_slots: 0,
            return_kind: ValueKind::Void,
            max_locals: 0,
            code: Vec::new(),
            handlers: Vec::new(),
            checked_exceptions: Vec::new(),
        }
    }

    /// Set attribute flags.
    pub fn flags(mut self, flags: MethodFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Set the parameter-slot count.
    pub fn param_slots(mut self, n: u16) -> Self {
        self.param_slots = n;
        self
    }

    /// Set the declared result kind.
    pub fn returns(mut self, kind: ValueKind) -> Self {
        self.return_kind = kind;
        self
    }

    /// Set the local-slot count.
    pub fn max_locals(mut self, n: u16) -> Self {
        self.max_locals = n;
        self
    }

    /// Append bytecode.
    pub fn code(mut self, code: Vec<Opcode>) -> Self {
        self.code = code;
        self
    }

    /// Append one handler region.
    pub fn handler(
        mut self,
        start_pc: u32,
        end_pc: u32,
        handler_pc: u32,
        catch_type: Option<ExceptionTypeId>,
    ) -> Self {
        self.handlers.push(HandlerRegion {
            start_pc,
            end_pc,
            handler_pc,
            catch_type,
        });
        self
    }

    /// Append one declared checked exception.
    pub fn throws(mut self, ty: ExceptionTypeId) -> Self {
        self.checked_exceptions.push(ty);
        self
    }

    /// Finish and register the method.
    pub fn register(self, registry: &mut MethodRegistry) -> MethodId {
        let signature: Arc<str> = format!(
            "{}.{}({})",
            self.holder, self.name, self.param_slots
        )
        .into();
        registry.register(MethodInfo {
            name: self.name,
            holder: self.holder,
            signature,
            flags: self.flags,
            param_slots: self.param_slots,
            return_kind: self.return_kind,
            max_locals: self.max_locals,
            code: self.code.into_boxed_slice(),
            handlers: self.handlers.into_boxed_slice(),
            checked_exceptions: self.checked_exceptions.into_boxed_slice(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TypeRegistry;

    #[test]
    fn test_flags() {
        let f = MethodFlags::NATIVE | MethodFlags::TRAMPOLINE;
        assert!(f.contains(MethodFlags::NATIVE));
        assert!(f.contains(MethodFlags::TRAMPOLINE));
        assert!(!f.contains(MethodFlags::HIDDEN));
    }

    #[test]
    fn test_builder_and_lookup() {
        let mut reg = MethodRegistry::new();
        let callee = MethodBuilder::new("app.Worker", "step")
            .returns(ValueKind::Int)
            .param_slots(2)
            .register(&mut reg);
        let caller = MethodBuilder::new("app.Worker", "run")
            .code(vec![Opcode::Other, Opcode::Call { target: callee }])
            .handler(0, 2, 5, Some(TypeRegistry::FAULT))
            .register(&mut reg);

        let m = reg.get(caller).unwrap();
        assert_eq!(m.call_target_at(1), Some(callee));
        assert_eq!(m.call_target_at(0), None);
        assert_eq!(m.handlers.len(), 1);
        assert_eq!(reg.get(callee).unwrap().param_slots, 2);
        assert_eq!(reg.signature_of(caller), "app.Worker.run(0)");
    }

    #[test]
    fn test_string_builtin_init() {
        let mut reg = MethodRegistry::new();
        let init = MethodBuilder::new(STR_BUILTIN_HOLDER, "__init__")
            .flags(MethodFlags::INITIALIZER)
            .register(&mut reg);
        let plain = MethodBuilder::new("app.Thing", "__init__")
            .flags(MethodFlags::INITIALIZER)
            .register(&mut reg);
        assert!(reg.get(init).unwrap().is_string_builtin_init());
        assert!(!reg.get(plain).unwrap().is_string_builtin_init());
    }
}
