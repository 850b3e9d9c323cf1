//! Safety vetoes applied before any recovery is attempted.
//!
//! Recovery unwinds or short-circuits frames without running them to
//! completion. For most code that is the point, but an interrupted
//! initializer of the builtin string type leaves a partially built value
//! that the rest of the program can observe, so any attempt whose recovery
//! context covers such a frame is refused outright.

use crate::config::RecoveryConfig;
use crate::snapshot::StackSnapshot;
use crate::trace::TraceFlags;
use talos_runtime::RuntimeEnv;
use tracing::debug;

/// Whether any frame in `[0, boundary]` is an initializer of the builtin
/// string type, or sits at a direct call to one.
///
/// `boundary` is clamped to the snapshot; a boundary past the end checks
/// every captured frame.
pub fn has_unsafe_initializer(
    snapshot: &StackSnapshot,
    boundary: usize,
    env: &RuntimeEnv,
    config: &RecoveryConfig,
) -> bool {
    for (index, frame) in snapshot.frames().iter().enumerate() {
        if index > boundary {
            break;
        }
        let Some(method) = env.methods.get(frame.method) else {
            continue;
        };
        let in_init = method.is_string_builtin_init();
        let at_init_call = method
            .call_target_at(frame.pc)
            .and_then(|callee| env.methods.get(callee))
            .is_some_and(|callee| callee.is_string_builtin_init());
        if in_init || at_init_call {
            if config.traces(TraceFlags::SKIP_UNSAFE) {
                debug!(
                    frame = index,
                    method = %method.signature,
                    "string initializer inside the recovery context; refusing"
                );
            }
            return true;
        }
    }
    false
}
