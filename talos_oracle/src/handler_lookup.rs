//! Handler-region lookup.
//!
//! The one primitive every classification and resolution step builds on:
//! given a method, the pc inside it, and an exception type, find the first
//! handler region that would receive control. Regions are scanned in
//! declaration order; a finally region catches anything and reports no
//! caught type; passing no exception type turns the query into a wildcard
//! that matches every typed region.
//!
//! Lookup is idempotent and side-effect-free. A handler table referencing a
//! type the registry does not know is a [`LookupError`]; callers abort the
//! surrounding analysis as an internal error rather than guessing.

use crate::config::RecoveryConfig;
use crate::trace::TraceFlags;
use std::sync::Arc;
use talos_runtime::{ExceptionTypeId, MethodInfo, TypeRegistry};
use thiserror::Error;
use tracing::debug;

// =============================================================================
// Errors
// =============================================================================

/// Handler-table inspection failure.
#[derive(Debug, Error)]
pub enum LookupError {
    /// A region declares a catch type the registry cannot resolve.
    #[error("unresolvable catch type {type_id} in handler table of {method}")]
    UnresolvableCatchType {
        /// Raw id of the unknown type.
        type_id: u32,
        /// Signature of the owning method.
        method: Arc<str>,
    },
}

// =============================================================================
// Match Result
// =============================================================================

/// A handler region that would receive the exception.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandlerMatch {
    /// Instruction the region transfers control to.
    pub handler_pc: u32,
    /// The region's declared catch type; `None` when a finally region
    /// matched.
    pub caught_type: Option<ExceptionTypeId>,
    /// Index of the region in the method's table.
    pub region_index: usize,
}

impl HandlerMatch {
    /// Whether a finally region matched rather than a typed handler.
    #[inline]
    pub fn is_finally(&self) -> bool {
        self.caught_type.is_none()
    }

    /// Whether the matched region only catches at the universal or general
    /// base type. Such a handler observes the failure without understanding
    /// it, and recovery may be allowed to act in its place.
    pub fn is_trivial(&self) -> bool {
        matches!(
            self.caught_type,
            Some(ty) if ty == TypeRegistry::BASE_FAULT || ty == TypeRegistry::FAULT
        )
    }
}

// =============================================================================
// Lookup
// =============================================================================

/// Find the first handler region of `method` covering `pc` that matches
/// `exception_ty`.
///
/// `exception_ty == None` is the wildcard query: it matches every typed
/// region (finally regions still match as themselves). Native methods have
/// no handler table and never match.
pub fn handler_for(
    method: &MethodInfo,
    pc: u32,
    exception_ty: Option<ExceptionTypeId>,
    types: &TypeRegistry,
    config: &RecoveryConfig,
) -> Result<Option<HandlerMatch>, LookupError> {
    if method.is_native() {
        return Ok(None);
    }

    // The table is re-read from the method on every iteration; nothing
    // borrowed survives across a region check.
    for region_index in 0..method.handlers.len() {
        let region = method.handlers[region_index];
        if pc < region.start_pc || pc >= region.end_pc {
            continue;
        }

        if let Some(declared) = region.catch_type {
            if types.get(declared).is_none() {
                return Err(LookupError::UnresolvableCatchType {
                    type_id: declared.0,
                    method: method.signature.clone(),
                });
            }
        }

        let matched = match (region.catch_type, exception_ty) {
            // Finally catches anything, unless configured out.
            (None, _) => {
                if config.ignore_finally {
                    continue;
                }
                true
            }
            // Wildcard query matches every typed region.
            (Some(_), None) => true,
            (Some(declared), Some(thrown)) => types.is_subtype_of(thrown, declared),
        };

        if matched {
            if config.traces(TraceFlags::CHECKING) {
                debug!(
                    method = %method.signature,
                    pc,
                    region_index,
                    handler_pc = region.handler_pc,
                    caught = region
                        .catch_type
                        .map_or("<finally>", |ty| types.name_of(ty)),
                    "handler region matched"
                );
            }
            return Ok(Some(HandlerMatch {
                handler_pc: region.handler_pc,
                caught_type: region.catch_type,
                region_index,
            }));
        }
    }

    Ok(None)
}

/// Find the first typed, string-constructible handler region of `method`
/// covering `pc`, regardless of the thrown type.
///
/// This is the forced-generic resolution primitive: the region's own catch
/// type becomes the transformation target, so it must be constructible.
pub fn first_constructible_handler(
    method: &MethodInfo,
    pc: u32,
    types: &TypeRegistry,
    config: &RecoveryConfig,
) -> Result<Option<HandlerMatch>, LookupError> {
    if method.is_native() {
        return Ok(None);
    }

    for region_index in 0..method.handlers.len() {
        let region = method.handlers[region_index];
        if pc < region.start_pc || pc >= region.end_pc {
            continue;
        }
        let Some(declared) = region.catch_type else {
            continue;
        };
        if types.get(declared).is_none() {
            return Err(LookupError::UnresolvableCatchType {
                type_id: declared.0,
                method: method.signature.clone(),
            });
        }
        if !types.has_string_ctor(declared) {
            if config.traces(TraceFlags::IGNORE) {
                debug!(
                    method = %method.signature,
                    candidate = types.name_of(declared),
                    "skipping candidate without a string constructor"
                );
            }
            continue;
        }
        return Ok(Some(HandlerMatch {
            handler_pc: region.handler_pc,
            caught_type: Some(declared),
            region_index,
        }));
    }

    Ok(None)
}
