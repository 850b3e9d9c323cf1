//! Failure classification.
//!
//! Walks the captured snapshot innermost-out asking, frame by frame, whether
//! the pending exception would be caught there. The walk stops at the first
//! matching region and yields one of three verdicts:
//!
//! | First match                   | Verdict             |
//! |-------------------------------|---------------------|
//! | typed, specific handler       | not a failure       |
//! | finally region                | not a failure       |
//! | universal/general catch only  | trivially handled   |
//! | nothing in the whole stack    | uncaught            |
//!
//! Trivially-handled and uncaught verdicts carry the recovery-context
//! boundary: the deepest frame index later stages may pivot at. For a
//! trivial match that is the matching frame itself; for an uncaught
//! exception it is the outermost captured frame. A lookup failure aborts
//! the walk as an internal error; no recovery is attempted on such a stack.

use crate::action::FailureKind;
use crate::config::RecoveryConfig;
use crate::handler_lookup::{handler_for, HandlerMatch};
use crate::snapshot::StackSnapshot;
use crate::trace::TraceFlags;
use talos_runtime::{ExceptionTypeId, RuntimeEnv};
use tracing::{debug, warn};

// =============================================================================
// Classification
// =============================================================================

/// Outcome of the classification walk.
#[derive(Debug, Clone, Copy)]
pub struct Classification {
    /// The verdict.
    pub kind: FailureKind,
    /// Deepest frame index recovery may consider, when the verdict warrants
    /// recovery.
    pub boundary: Option<usize>,
    /// Frame index of the matching handler, when one matched.
    pub handler_frame: Option<usize>,
    /// The matching region, when one matched.
    pub handler: Option<HandlerMatch>,
}

impl Classification {
    fn not_a_failure(frame: usize, handler: HandlerMatch) -> Self {
        Classification {
            kind: FailureKind::NotAFailure,
            boundary: None,
            handler_frame: Some(frame),
            handler: Some(handler),
        }
    }

    fn internal_error() -> Self {
        Classification {
            kind: FailureKind::InternalError,
            boundary: None,
            handler_frame: None,
            handler: None,
        }
    }
}

/// Classify the pending exception against the captured stack.
///
/// Pure with respect to its inputs: the same snapshot and type always
/// classify the same way.
pub fn classify(
    snapshot: &StackSnapshot,
    exception_ty: ExceptionTypeId,
    env: &RuntimeEnv,
    config: &RecoveryConfig,
) -> Classification {
    for (index, frame) in snapshot.frames().iter().enumerate() {
        let Some(method) = env.methods.get(frame.method) else {
            continue;
        };

        let hit = match handler_for(method, frame.pc, Some(exception_ty), &env.types, config) {
            Ok(Some(hit)) => hit,
            Ok(None) => continue,
            Err(err) => {
                warn!(frame = index, method = %method.signature, %err, "classification aborted");
                return Classification::internal_error();
            }
        };

        if hit.is_finally() {
            if config.traces(TraceFlags::CHECKING) {
                debug!(
                    frame = index,
                    method = %method.signature,
                    "finally region will run; not a failure"
                );
            }
            return Classification::not_a_failure(index, hit);
        }

        if hit.is_trivial() && config.recover_trivial {
            if config.traces(TraceFlags::CHECKING) {
                debug!(
                    frame = index,
                    method = %method.signature,
                    caught = hit.caught_type.map_or("<finally>", |ty| env.types.name_of(ty)),
                    "only a universal handler; trivially handled"
                );
            }
            return Classification {
                kind: FailureKind::TriviallyHandled,
                boundary: Some(index),
                handler_frame: Some(index),
                handler: Some(hit),
            };
        }

        if config.traces(TraceFlags::CHECKING) {
            debug!(
                frame = index,
                method = %method.signature,
                caught = hit.caught_type.map_or("<finally>", |ty| env.types.name_of(ty)),
                "handled; not a failure"
            );
        }
        return Classification::not_a_failure(index, hit);
    }

    if config.traces(TraceFlags::CHECKING) {
        debug!(
            frames = snapshot.len(),
            exception = env.types.name_of(exception_ty),
            "no handler in the captured stack; uncaught"
        );
    }
    Classification {
        kind: FailureKind::Uncaught,
        boundary: snapshot.last_index(),
        handler_frame: None,
        handler: None,
    }
}
