//! Context validation and SVID selection.

use super::builder::ResourceLimits;
use super::errors::{LimitKind, X509SourceError};
use super::types::SvidPicker;
use crate::workload_api::X509Context;
use crate::X509Svid;
use std::sync::Arc;

/// Selects an SVID from `ctx` using `picker` when set, else the default
/// (first) SVID.
pub(super) fn select_svid(
    ctx: &X509Context,
    picker: Option<&dyn SvidPicker>,
) -> Option<Arc<X509Svid>> {
    match picker {
        Some(picker) => {
            let idx = picker.pick_svid(ctx.svids())?;
            ctx.svids().get(idx).cloned()
        }
        None => ctx.default_svid().cloned(),
    }
}

/// Validates a context against the configured limits and the selection rule.
///
/// Rejected contexts are never published; the previous snapshot stays in
/// place.
pub(super) fn validate_context(
    ctx: &X509Context,
    picker: Option<&dyn SvidPicker>,
    limits: ResourceLimits,
) -> Result<(), X509SourceError> {
    if let Some(max) = limits.max_svids {
        let actual = ctx.svids().len();
        if actual > max {
            return Err(X509SourceError::ResourceLimitExceeded {
                kind: LimitKind::MaxSvids,
                limit: max,
                actual,
            });
        }
    }

    if let Some(max) = limits.max_bundles {
        let actual = ctx.bundle_set().len();
        if actual > max {
            return Err(X509SourceError::ResourceLimitExceeded {
                kind: LimitKind::MaxBundles,
                limit: max,
                actual,
            });
        }
    }

    if let Some(max) = limits.max_bundle_der_bytes {
        for (_, bundle) in ctx.bundle_set().iter() {
            let actual: usize = bundle
                .authorities()
                .iter()
                .map(|c| c.as_bytes().len())
                .sum();
            if actual > max {
                return Err(X509SourceError::ResourceLimitExceeded {
                    kind: LimitKind::MaxBundleDerBytes,
                    limit: max,
                    actual,
                });
            }
        }
    }

    if select_svid(ctx, picker).is_none() {
        return Err(X509SourceError::NoSuitableSvid);
    }

    Ok(())
}
