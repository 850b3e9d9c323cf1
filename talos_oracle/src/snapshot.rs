//! Stack snapshot capture.
//!
//! A snapshot is the immutable, ordered view of the failing thread's call
//! stack that every later stage works on: index 0 is the frame in which the
//! exception occurred (its nearest managed proxy when the top was native),
//! the last index is the outermost captured frame. Snapshots are created
//! fresh per recovery attempt and discarded with it.
//!
//! Physical frames are expanded into their logical (method, pc) pairs so
//! optimized call chains look identical to interpreted ones. Hidden frames
//! are skipped unless configured otherwise. Two limits bound the walk: a
//! cap on managed descriptors produced and a cap on physical frames
//! visited.

use crate::config::RecoveryConfig;
use crate::trace::TraceFlags;
use talos_runtime::{MethodId, RuntimeEnv, VmThread};
use tracing::debug;

// =============================================================================
// Frame Descriptors
// =============================================================================

/// One captured logical frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameDescriptor {
    /// Method executing in the frame.
    pub method: MethodId,
    /// Current instruction offset.
    pub pc: u32,
}

// =============================================================================
// Stack Snapshot
// =============================================================================

/// Ordered, immutable frame sequence for one recovery attempt.
#[derive(Debug)]
pub struct StackSnapshot {
    frames: Vec<FrameDescriptor>,
    /// Callee the top frame was about to invoke, when its current
    /// instruction is a call site. Context for the pivot strategies; never
    /// a frame of its own.
    resolved_top_callee: Option<MethodId>,
}

impl StackSnapshot {
    /// Number of captured frames.
    #[inline]
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    /// Whether nothing was captured.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Frame at `index` (0 = innermost).
    #[inline]
    pub fn get(&self, index: usize) -> Option<FrameDescriptor> {
        self.frames.get(index).copied()
    }

    /// Index of the outermost captured frame.
    pub fn last_index(&self) -> Option<usize> {
        self.frames.len().checked_sub(1)
    }

    /// All frames, innermost first.
    pub fn frames(&self) -> &[FrameDescriptor] {
        &self.frames
    }

    /// See [`StackSnapshot::resolved_top_callee`].
    #[inline]
    pub fn top_callee(&self) -> Option<MethodId> {
        self.resolved_top_callee
    }
}

// =============================================================================
// Capture
// =============================================================================

/// Capture the thread's stack into a snapshot.
///
/// Read-only with respect to the thread; the only side effect is trace
/// output.
pub fn capture(thread: &VmThread, env: &RuntimeEnv, config: &RecoveryConfig) -> StackSnapshot {
    let mut frames = Vec::with_capacity(thread.frames.len().min(config.max_stack_depth));
    let mut physical_count = 0usize;

    'walk: for physical in thread.frames_innermost_out() {
        physical_count += 1;
        if physical_count > config.max_frame_depth {
            break;
        }

        for (method_id, pc) in physical.logical() {
            if frames.len() >= config.max_stack_depth {
                break 'walk;
            }
            let Some(method) = env.methods.get(method_id) else {
                continue;
            };
            if method.is_hidden() && !config.show_hidden_frames {
                continue;
            }

            if config.traces(TraceFlags::FILL_STACK) {
                debug!(
                    index = frames.len(),
                    method = %method.signature,
                    pc,
                    "fill stack"
                );
            }

            frames.push(FrameDescriptor {
                method: method_id,
                pc,
            });
        }
    }

    let resolved_top_callee = frames.first().and_then(|top| {
        let method = env.methods.get(top.method)?;
        if method.is_native() {
            return None;
        }
        let callee = method.call_target_at(top.pc)?;
        if config.traces(TraceFlags::FILL_STACK) {
            debug!(callee = %env.methods.signature_of(callee), "top frame is at a call site");
        }
        Some(callee)
    });

    StackSnapshot {
        frames,
        resolved_top_callee,
    }
}
