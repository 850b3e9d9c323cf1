//! Runtime values and the static value-kind lattice.
//!
//! The oracle never computes with values — it only moves them between frame
//! slots, serializes them for the external search oracle, and fabricates a
//! default of a given kind when an early return is activated. A plain tagged
//! enum is therefore sufficient; slot access stays O(1) and `Copy`-cheap for
//! everything except heap references.

use crate::exception::ExceptionInstance;
use std::sync::Arc;

// =============================================================================
// Static Value Kinds
// =============================================================================

/// Static type of a method result or slot, as declared in method metadata.
///
/// `Void` only appears as a declared return kind; a slot never holds it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueKind {
    /// No value is produced (procedure-style call).
    Void,
    /// Machine boolean.
    Bool,
    /// 64-bit signed integer.
    Int,
    /// 64-bit float.
    Float,
    /// Heap reference.
    Object,
}

impl ValueKind {
    /// Human-readable name, used in trace output.
    pub fn name(self) -> &'static str {
        match self {
            ValueKind::Void => "void",
            ValueKind::Bool => "bool",
            ValueKind::Int => "int",
            ValueKind::Float => "float",
            ValueKind::Object => "object",
        }
    }

    /// The default value fabricated for an early return of this kind.
    ///
    /// Reference kinds yield an empty slot (`Value::Uninit` maps to a null
    /// reference at the dispatch boundary); numeric kinds yield zero.
    pub fn zero_value(self) -> Value {
        match self {
            ValueKind::Void | ValueKind::Object => Value::Uninit,
            ValueKind::Bool => Value::Bool(false),
            ValueKind::Int => Value::Int(0),
            ValueKind::Float => Value::Float(0.0),
        }
    }
}

impl std::fmt::Display for ValueKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

// =============================================================================
// Heap Objects
// =============================================================================

/// A heap-allocated runtime object, referenced from frame slots.
///
/// The oracle only distinguishes exception instances from everything else;
/// other objects are opaque payloads carried through slot serialization.
#[derive(Debug)]
pub enum HeapObj {
    /// An opaque non-exception object, identified by its type name.
    Plain {
        /// Runtime type name, for trace output only.
        type_name: Arc<str>,
    },
    /// An exception instance.
    Exception(ExceptionInstance),
}

/// Shared reference to a heap object. Identity is pointer identity.
pub type ObjRef = Arc<HeapObj>;

impl HeapObj {
    /// Allocate a plain opaque object.
    pub fn plain(type_name: impl Into<Arc<str>>) -> ObjRef {
        Arc::new(HeapObj::Plain {
            type_name: type_name.into(),
        })
    }

    /// View this object as an exception instance, if it is one.
    #[inline]
    pub fn as_exception(&self) -> Option<&ExceptionInstance> {
        match self {
            HeapObj::Exception(e) => Some(e),
            HeapObj::Plain { .. } => None,
        }
    }
}

// =============================================================================
// Values
// =============================================================================

/// A single frame slot.
///
/// `Uninit` covers both never-written locals and the upper half of wide
/// slots; the serializer leaves such slots empty in both slot arrays.
#[derive(Debug, Clone, Default)]
pub enum Value {
    /// Uninitialized slot.
    #[default]
    Uninit,
    /// Machine boolean.
    Bool(bool),
    /// 64-bit signed integer.
    Int(i64),
    /// 64-bit float.
    Float(f64),
    /// Heap reference.
    Obj(ObjRef),
}

impl Value {
    /// Whether this slot holds a heap reference.
    #[inline]
    pub fn is_obj(&self) -> bool {
        matches!(self, Value::Obj(_))
    }

    /// Whether this slot has never been written.
    #[inline]
    pub fn is_uninit(&self) -> bool {
        matches!(self, Value::Uninit)
    }

    /// The heap reference held by this slot, if any.
    #[inline]
    pub fn as_obj(&self) -> Option<&ObjRef> {
        match self {
            Value::Obj(r) => Some(r),
            _ => None,
        }
    }

    /// Raw 64-bit image of a non-reference slot.
    ///
    /// Floats are stored as their bit pattern, booleans as 0/1. Returns
    /// `None` for references and uninitialized slots.
    pub fn raw_bits(&self) -> Option<i64> {
        match self {
            Value::Bool(b) => Some(*b as i64),
            Value::Int(i) => Some(*i),
            Value::Float(f) => Some(f.to_bits() as i64),
            Value::Obj(_) | Value::Uninit => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_values() {
        assert!(matches!(ValueKind::Int.zero_value(), Value::Int(0)));
        assert!(matches!(ValueKind::Bool.zero_value(), Value::Bool(false)));
        assert!(ValueKind::Object.zero_value().is_uninit());
        assert!(ValueKind::Void.zero_value().is_uninit());
    }

    #[test]
    fn test_raw_bits() {
        assert_eq!(Value::Int(42).raw_bits(), Some(42));
        assert_eq!(Value::Bool(true).raw_bits(), Some(1));
        assert_eq!(
            Value::Float(1.5).raw_bits(),
            Some(1.5_f64.to_bits() as i64)
        );
        assert_eq!(Value::Uninit.raw_bits(), None);
        assert_eq!(HeapObj::plain("list").as_exception().map(|_| ()), None);
    }

    #[test]
    fn test_obj_identity() {
        let a = HeapObj::plain("dict");
        let b = Arc::clone(&a);
        let c = HeapObj::plain("dict");
        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &c));
    }
}
