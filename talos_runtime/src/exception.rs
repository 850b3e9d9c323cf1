//! Exception instances.
//!
//! An instance is immutable once raised. The oracle compares instances by
//! heap identity only (`Arc::ptr_eq` on the enclosing [`ObjRef`]) — two
//! instances of the same type with the same message are still distinct
//! failures.

use crate::types::ExceptionTypeId;
use crate::value::ObjRef;
use std::sync::Arc;

/// One raised exception.
#[derive(Debug)]
pub struct ExceptionInstance {
    /// Declared type of the instance.
    pub ty: ExceptionTypeId,
    /// Constructor message.
    pub message: Arc<str>,
    /// Causal predecessor, set when a transformation wraps an earlier
    /// exception.
    pub cause: Option<ObjRef>,
}

impl ExceptionInstance {
    /// Create an instance. Use [`TypeRegistry::new_exception`] to allocate
    /// one behind an [`ObjRef`].
    ///
    /// [`TypeRegistry::new_exception`]: crate::types::TypeRegistry::new_exception
    pub fn new(
        ty: ExceptionTypeId,
        message: impl Into<String>,
        cause: Option<ObjRef>,
    ) -> Self {
        ExceptionInstance {
            ty,
            message: Arc::from(message.into()),
            cause,
        }
    }

    /// Length of the cause chain below this instance.
    pub fn cause_depth(&self) -> usize {
        let mut depth = 0;
        let mut cursor = self.cause.clone();
        while let Some(obj) = cursor {
            depth += 1;
            cursor = obj.as_exception().and_then(|e| e.cause.clone());
        }
        depth
    }
}

/// Identity comparison for exception references.
#[inline]
pub fn same_exception(a: &ObjRef, b: &ObjRef) -> bool {
    Arc::ptr_eq(a, b)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TypeRegistry;

    #[test]
    fn test_identity_not_equality() {
        let reg = TypeRegistry::with_builtins();
        let a = reg.new_exception(TypeRegistry::RUNTIME_FAULT, "x", None);
        let b = reg.new_exception(TypeRegistry::RUNTIME_FAULT, "x", None);
        assert!(same_exception(&a, &a.clone()));
        assert!(!same_exception(&a, &b));
    }

    #[test]
    fn test_cause_chain() {
        let reg = TypeRegistry::with_builtins();
        let root = reg.new_exception(TypeRegistry::RUNTIME_FAULT, "root", None);
        let wrapped = reg.new_exception(TypeRegistry::FAULT, "wrapped", Some(root));
        assert_eq!(wrapped.as_exception().unwrap().cause_depth(), 1);
    }
}
