//! Source descriptor validation against reference data.

use tracing::debug;

use fits_common::SourceDescriptor;
use storage::ReferenceGateway;

use crate::error::{ReconcileError, Result};
use crate::reconcile::ReconcileState;

/// Check that every identifier in `source` is registered.
///
/// Checks run in order and stop at the first failure: the type is valid for
/// the method, the sample is registered for the system, the site exists.
/// Read-only.
pub async fn validate_source<G>(gateway: &G, source: &SourceDescriptor) -> Result<()>
where
    G: ReferenceGateway + ?Sized,
{
    validate_reference(gateway, source).await?;

    gateway
        .resolve_site_pk(source.site_id())
        .await
        .map_err(|e| ReconcileError::at(ReconcileState::KeyResolution, e))?;

    debug!(source = %source, "Source validated");
    Ok(())
}

/// The checks of [`validate_source`] that do not involve the site.
///
/// A unit read from disk carries its own site, which is saved only after
/// these pass.
pub async fn validate_reference<G>(gateway: &G, source: &SourceDescriptor) -> Result<()>
where
    G: ReferenceGateway + ?Sized,
{
    let stage = ReconcileState::KeyResolution;

    gateway
        .resolve_type_pk(source.type_id(), source.method_id())
        .await
        .map_err(|e| ReconcileError::at(stage, e))?;

    gateway
        .resolve_sample_pk(source.sample_id(), source.system_id())
        .await
        .map_err(|e| ReconcileError::at(stage, e))?;

    Ok(())
}
