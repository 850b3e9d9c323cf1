//! Execution threads and their physical frames.
//!
//! A [`VmThread`] owns an ordered stack of physical frames (outermost first,
//! innermost last, matching the interpreter's push order) plus the pending
//! exception slot and the per-thread recovery state. The oracle only ever
//! reads frames; the interpreter is the sole writer.
//!
//! An optimized physical frame may represent several logical calls; the
//! `inlined` chain carries the extra (method, pc) pairs the debug-info
//! decoder produced, innermost first. Stack capture expands them in order.

use crate::method::MethodId;
use crate::recovery_state::RecoveryState;
use crate::value::{ObjRef, Value};
use smallvec::SmallVec;
use std::cell::RefCell;

// =============================================================================
// Frames
// =============================================================================

/// One physical activation record.
#[derive(Debug)]
pub struct VmFrame {
    /// Executing method.
    pub method: MethodId,
    /// Current instruction offset.
    pub pc: u32,
    /// Local-variable slots.
    pub locals: Vec<Value>,
    /// Operand stack, bottom first.
    pub stack: Vec<Value>,
    /// Logical frames folded into this physical frame by optimization,
    /// innermost first. Empty for interpreted frames.
    pub inlined: SmallVec<[(MethodId, u32); 2]>,
}

impl VmFrame {
    /// Create a frame with empty slots.
    pub fn new(method: MethodId, pc: u32) -> Self {
        VmFrame {
            method,
            pc,
            locals: Vec::new(),
            stack: Vec::new(),
            inlined: SmallVec::new(),
        }
    }

    /// Logical (method, pc) pairs of this frame, innermost first.
    pub fn logical(&self) -> impl Iterator<Item = (MethodId, u32)> + '_ {
        self.inlined
            .iter()
            .copied()
            .chain(std::iter::once((self.method, self.pc)))
    }
}

// =============================================================================
// Threads
// =============================================================================

/// One managed execution thread.
#[derive(Debug, Default)]
pub struct VmThread {
    /// Frame stack; index 0 is the outermost frame.
    pub frames: Vec<VmFrame>,
    /// The exception currently propagating on this thread, if any.
    pending_exception: RefCell<Option<ObjRef>>,
    /// Per-thread recovery state, consumed by the oracle and the dispatch
    /// loop.
    pub recovery: RecoveryState,
}

impl VmThread {
    /// Create a thread with an empty stack.
    pub fn new() -> Self {
        VmThread::default()
    }

    /// Push a frame (becomes the innermost).
    pub fn push_frame(&mut self, frame: VmFrame) {
        self.frames.push(frame);
    }

    /// The innermost frame, if any.
    #[inline]
    pub fn innermost(&self) -> Option<&VmFrame> {
        self.frames.last()
    }

    /// Physical frames from innermost to outermost.
    pub fn frames_innermost_out(&self) -> impl Iterator<Item = &VmFrame> {
        self.frames.iter().rev()
    }

    /// Whether an exception is propagating.
    pub fn has_pending_exception(&self) -> bool {
        self.pending_exception.borrow().is_some()
    }

    /// The propagating exception, if any.
    pub fn pending_exception(&self) -> Option<ObjRef> {
        self.pending_exception.borrow().clone()
    }

    /// Set the propagating exception.
    pub fn set_pending_exception(&self, exception: ObjRef) {
        *self.pending_exception.borrow_mut() = Some(exception);
    }

    /// Clear the propagating exception.
    pub fn clear_pending_exception(&self) {
        *self.pending_exception.borrow_mut() = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::method::{MethodBuilder, MethodRegistry};
    use crate::types::TypeRegistry;

    #[test]
    fn test_frame_order() {
        let mut methods = MethodRegistry::new();
        let outer = MethodBuilder::new("app.Main", "main").register(&mut methods);
        let inner = MethodBuilder::new("app.Main", "work").register(&mut methods);

        let mut thread = VmThread::new();
        thread.push_frame(VmFrame::new(outer, 4));
        thread.push_frame(VmFrame::new(inner, 7));

        let order: Vec<MethodId> = thread
            .frames_innermost_out()
            .map(|f| f.method)
            .collect();
        assert_eq!(order, vec![inner, outer]);
        assert_eq!(thread.innermost().unwrap().pc, 7);
    }

    #[test]
    fn test_logical_expansion() {
        let mut methods = MethodRegistry::new();
        let host = MethodBuilder::new("app.Main", "hot").register(&mut methods);
        let inlined = MethodBuilder::new("app.Main", "tiny").register(&mut methods);

        let mut frame = VmFrame::new(host, 12);
        frame.inlined.push((inlined, 3));
        let logical: Vec<(MethodId, u32)> = frame.logical().collect();
        assert_eq!(logical, vec![(inlined, 3), (host, 12)]);
    }

    #[test]
    fn test_pending_exception_slot() {
        let types = TypeRegistry::with_builtins();
        let thread = VmThread::new();
        assert!(!thread.has_pending_exception());

        let exc = types.new_exception(TypeRegistry::RUNTIME_FAULT, "boom", None);
        thread.set_pending_exception(exc);
        assert!(thread.has_pending_exception());
        thread.clear_pending_exception();
        assert!(thread.pending_exception().is_none());
    }
}
