//! Escaped-handler transformation eligibility.
//!
//! Some embedders transform an exception that is about to escape past every
//! handler written for a *different* kind of failure. The analysis here
//! answers only the eligibility question, leaving the actual target choice
//! to the resolver backends: transformation is allowed iff
//!
//! - no captured frame has an in-scope, non-finally handler whose catch
//!   type would already receive the exception, and
//! - at least one captured frame has an in-scope, non-finally handler for
//!   some other exception kind (there is somewhere sensible to steer to).
//!
//! Anything unresolvable in a handler table makes the stack ineligible;
//! escape transformation is opportunistic and never worth guessing over.

use crate::config::RecoveryConfig;
use crate::snapshot::StackSnapshot;
use crate::trace::TraceFlags;
use talos_runtime::{ExceptionTypeId, RuntimeEnv};
use tracing::debug;

/// Whether the stack qualifies for an escaped-handler transformation.
pub fn escape_eligible(
    snapshot: &StackSnapshot,
    exception_ty: ExceptionTypeId,
    env: &RuntimeEnv,
    config: &RecoveryConfig,
) -> bool {
    let mut other_handler_in_scope = false;

    for (index, frame) in snapshot.frames().iter().enumerate() {
        let Some(method) = env.methods.get(frame.method) else {
            continue;
        };
        if method.is_native() {
            continue;
        }

        for region in method.handlers.iter() {
            if frame.pc < region.start_pc || frame.pc >= region.end_pc {
                continue;
            }
            let Some(declared) = region.catch_type else {
                continue;
            };
            if env.types.get(declared).is_none() {
                return false;
            }
            if env.types.is_subtype_of(exception_ty, declared) {
                if config.traces(TraceFlags::CHECK_ESCAPE) {
                    debug!(
                        frame = index,
                        method = %method.signature,
                        caught = env.types.name_of(declared),
                        "exception would be caught in scope; not an escape"
                    );
                }
                return false;
            }
            other_handler_in_scope = true;
        }
    }

    if config.traces(TraceFlags::CHECK_ESCAPE) {
        debug!(
            eligible = other_handler_in_scope,
            exception = env.types.name_of(exception_ty),
            "escape analysis complete"
        );
    }
    other_handler_in_scope
}
