//! External search-oracle bridge.
//!
//! The search oracle is an external exhaustive-search service. The bridge's
//! job is narrow: refuse stacks it cannot represent, serialize a bounded
//! window of live frame state into one request, make the single guarded
//! call, and decode the verdict into the same action shape the fast paths
//! produce.
//!
//! Two hard rules from the state machine: the call happens strictly inside
//! an active recovery attempt (the `SearchMark` transition aborts
//! otherwise), and a malformed verdict is a defect in the collaborator, not
//! a runtime condition, so decoding failures are fatal assertions rather
//! than degraded results.

use crate::action::RecoveryAction;
use crate::config::RecoveryConfig;
use crate::snapshot::StackSnapshot;
use crate::trace::TraceFlags;
use talos_runtime::{
    ExceptionTypeId, MethodId, ObjRef, RuntimeEnv, SearchMark, VmThread,
};
use thiserror::Error;
use tracing::{debug, warn};

// =============================================================================
// Request Shapes
// =============================================================================

/// Reflective handle naming a serialized frame's method.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MethodHandle {
    /// An ordinary method.
    Method(MethodId),
    /// An object initializer; the oracle service models construction
    /// separately from invocation.
    Initializer(MethodId),
}

/// One serialized frame: a reflective handle plus two parallel slot arrays
/// sized `locals + operand stack`. Reference slots land in `ref_slots`, raw
/// numeric/boolean images in `raw_slots`; a slot appears in at most one
/// array and uninitialized slots in neither.
#[derive(Debug)]
pub struct SerializedFrame {
    /// The frame's method or constructor.
    pub handle: MethodHandle,
    /// Boxed reference slots.
    pub ref_slots: Vec<Option<ObjRef>>,
    /// Raw slot images.
    pub raw_slots: Vec<Option<i64>>,
    /// Instruction offset of the frame.
    pub pc: u32,
}

/// The single request the search oracle receives.
#[derive(Debug)]
pub struct SearchRequest {
    /// Serialized frames, innermost first, indices `0..=max_offset`.
    pub frames: Vec<SerializedFrame>,
    /// Per-frame instruction offsets, parallel to `frames`.
    pub offsets: Vec<u32>,
    /// The exception under analysis.
    pub exception: ObjRef,
    /// The deepest serialized frame index; early-return verdicts measure
    /// their offset from here. May be smaller than the window the caller
    /// asked for when serialization stopped early.
    pub max_offset: usize,
}

// =============================================================================
// Verdicts
// =============================================================================

/// Payload half of a verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerdictPayload {
    /// Transformation target type.
    Type(ExceptionTypeId),
    /// Early-return frame, measured from [`SearchRequest::max_offset`]
    /// rather than from the top of stack.
    Offset(i64),
}

/// The two-part verdict the oracle service returns.
#[derive(Debug, Clone)]
pub struct SearchVerdict {
    /// `"ErrorTransformation"` or `"EarlyReturn"`.
    pub discriminator: String,
    /// Accompanying payload; must agree with the discriminator.
    pub payload: VerdictPayload,
}

/// Bridge-level collaborator failure; degraded to "no recovery".
#[derive(Debug, Error)]
pub enum BridgeError {
    /// The oracle service reported an internal failure.
    #[error("search oracle failure: {0}")]
    Oracle(String),
}

/// The external exhaustive-search service.
pub trait SearchOracle {
    /// One request in, at most one verdict out. `Ok(None)` is "no verdict".
    fn search(&self, request: &SearchRequest) -> Result<Option<SearchVerdict>, BridgeError>;
}

// =============================================================================
// Consultation
// =============================================================================

/// Consult the search oracle and decode its verdict into `action`.
///
/// Must be called inside an active recovery attempt; the `SearchMark`
/// transition aborts otherwise. Leaves `action` untouched when the stack is
/// refused, the call fails, or no verdict comes back.
pub fn consult(
    thread: &VmThread,
    snapshot: &StackSnapshot,
    action: &mut RecoveryAction,
    max_offset: usize,
    oracle: &dyn SearchOracle,
    env: &RuntimeEnv,
    config: &RecoveryConfig,
) {
    if !top_frame_representable(thread, env) {
        if config.traces(TraceFlags::LOAD_STACK) {
            debug!("top frame is native and not the reflective trampoline; refusing");
        }
        return;
    }

    let Some(request) = serialize(thread, snapshot, action, max_offset, env, config) else {
        return;
    };

    let verdict = {
        let _search = SearchMark::new(&thread.recovery);
        match oracle.search(&request) {
            Ok(verdict) => verdict,
            Err(err) => {
                warn!(%err, "search oracle call failed; no recovery");
                return;
            }
        }
    };

    let Some(verdict) = verdict else {
        if config.traces(TraceFlags::PRINT_ACTION) {
            debug!("search oracle returned no verdict");
        }
        return;
    };

    // Offsets in the verdict are measured against the window the request
    // actually carried, not the one the caller asked for.
    decode_verdict(&verdict, snapshot, action, request.max_offset, env, config);
}

/// A native top frame cannot be serialized. The one exception is the
/// runtime's reflective-invocation trampoline, recognized by its flag and
/// the managed wrapper frame that must sit directly under it.
fn top_frame_representable(thread: &VmThread, env: &RuntimeEnv) -> bool {
    let mut frames = thread.frames_innermost_out();
    let Some(top) = frames.next() else {
        return false;
    };
    let Some(method) = env.methods.get(top.method) else {
        return false;
    };
    if !method.is_native() {
        return true;
    }
    if !method.is_reflective_trampoline() {
        return false;
    }
    frames
        .next()
        .and_then(|f| env.methods.get(f.method))
        .is_some_and(|m| m.is_reflect_wrapper())
}

/// Serialize the snapshot's frames `0..=max_offset` so that index `i` in
/// the request names the same frame as snapshot index `i`; verdict offsets
/// decode against the snapshot without translation. Slot images come from
/// the physical frame each descriptor was expanded from. The walk stops at
/// the first frame that cannot be represented (a native frame other than
/// the verified reflective trampoline on top), and the returned
/// `max_offset` shrinks to the window actually serialized.
fn serialize(
    thread: &VmThread,
    snapshot: &StackSnapshot,
    action: &RecoveryAction,
    max_offset: usize,
    env: &RuntimeEnv,
    config: &RecoveryConfig,
) -> Option<SearchRequest> {
    let mut frames = Vec::with_capacity(max_offset + 1);
    let mut offsets = Vec::with_capacity(max_offset + 1);
    let mut physical = thread
        .frames_innermost_out()
        .flat_map(|frame| frame.logical().map(move |(method, pc)| (method, pc, frame)));

    for (index, descriptor) in snapshot.frames().iter().enumerate() {
        if index > max_offset {
            break;
        }
        let Some(method) = env.methods.get(descriptor.method) else {
            break;
        };
        if method.is_native() && !(index == 0 && method.is_reflective_trampoline()) {
            break;
        }

        // The descriptor stream is the snapshot's source sequence with
        // hidden frames dropped, so the physical walk can run ahead of it.
        let Some((_, _, owner)) = physical
            .by_ref()
            .find(|(m, pc, _)| *m == descriptor.method && *pc == descriptor.pc)
        else {
            break;
        };

        // Only a frame's own activation carries a slot image; a logical
        // frame folded into its host by optimization has none, and neither
        // does the trampoline.
        let own_activation =
            !method.is_native() && owner.method == descriptor.method && owner.pc == descriptor.pc;
        let slot_count = if own_activation {
            owner.locals.len() + owner.stack.len()
        } else {
            0
        };
        let mut ref_slots: Vec<Option<ObjRef>> = vec![None; slot_count];
        let mut raw_slots: Vec<Option<i64>> = vec![None; slot_count];
        if own_activation {
            for (slot, value) in owner.locals.iter().chain(owner.stack.iter()).enumerate() {
                if let Some(obj) = value.as_obj() {
                    ref_slots[slot] = Some(obj.clone());
                } else if let Some(bits) = value.raw_bits() {
                    raw_slots[slot] = Some(bits);
                }
            }
        }

        if config.traces(TraceFlags::LOAD_STACK) {
            debug!(
                index,
                method = %method.signature,
                slots = slot_count,
                refs = ref_slots.iter().filter(|s| s.is_some()).count(),
                "serialized frame"
            );
        }

        let handle = if method.is_initializer() {
            MethodHandle::Initializer(descriptor.method)
        } else {
            MethodHandle::Method(descriptor.method)
        };
        offsets.push(descriptor.pc);
        frames.push(SerializedFrame {
            handle,
            ref_slots,
            raw_slots,
            pc: descriptor.pc,
        });
    }

    if frames.is_empty() {
        return None;
    }
    let max_offset = frames.len() - 1;
    Some(SearchRequest {
        frames,
        offsets,
        exception: action.origin_exception().clone(),
        max_offset,
    })
}

fn decode_verdict(
    verdict: &SearchVerdict,
    snapshot: &StackSnapshot,
    action: &mut RecoveryAction,
    max_offset: usize,
    env: &RuntimeEnv,
    config: &RecoveryConfig,
) {
    match (verdict.discriminator.as_str(), verdict.payload) {
        ("ErrorTransformation", VerdictPayload::Type(ty)) => {
            assert!(
                env.types.get(ty).is_some(),
                "search verdict names an unknown exception type"
            );
            if config.traces(TraceFlags::TRANSFORMING) {
                debug!(target = env.types.name_of(ty), "search verdict: transformation");
            }
            action.set_error_transformation(ty);
        }
        ("EarlyReturn", VerdictPayload::Offset(measured)) => {
            assert!(
                measured >= 0 && measured as usize <= max_offset,
                "search verdict offset out of range"
            );
            let frame_index = max_offset - measured as usize;
            let callee = snapshot
                .get(frame_index)
                .and_then(|frame| {
                    env.methods
                        .get(frame.method)
                        .and_then(|m| m.call_target_at(frame.pc))
                })
                .and_then(|id| env.methods.get(id));
            let Some(callee) = callee else {
                panic!("search verdict selects a frame that is not at a call site");
            };
            if config.traces(TraceFlags::EARLY_RET) {
                debug!(
                    frame = frame_index,
                    result = %callee.return_kind,
                    "search verdict: early return"
                );
            }
            action.set_early_return(frame_index, callee.return_kind, callee.param_slots);
        }
        _ => panic!(
            "malformed search verdict: {} with {:?}",
            verdict.discriminator, verdict.payload
        ),
    }
}
