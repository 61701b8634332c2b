//! Tenant-scoped permission checks.
//!
//! Admins bypass every check. Everyone else must hold all requested
//! permissions inside the tenant passed by the caller; the guard never infers
//! a tenant.

use anyhow::Context;
use std::{collections::BTreeSet, sync::Arc};
use tracing::debug;
use uuid::Uuid;

use crate::{error::GateError, identity::AuthenticatedIdentity, store::PermissionStore};

pub struct AuthorizationGuard {
    permissions: Arc<dyn PermissionStore>,
}

impl AuthorizationGuard {
    pub fn new(permissions: Arc<dyn PermissionStore>) -> Self {
        Self { permissions }
    }

    /// # Errors
    /// `Forbidden` unless every permission is held in `tenant_id`;
    /// `Unexpected` when the lookup itself fails.
    pub async fn require_permissions(
        &self,
        identity: &AuthenticatedIdentity,
        tenant_id: Uuid,
        permissions: &BTreeSet<String>,
    ) -> Result<(), GateError> {
        if identity.admin {
            return Ok(());
        }
        let allowed = self
            .permissions
            .holds_all(identity.id, tenant_id, permissions)
            .await
            .context("Failed to look up permissions")?;
        if allowed {
            Ok(())
        } else {
            debug!(identity_id = %identity.id, tenant_id = %tenant_id, "permission check failed");
            Err(GateError::Forbidden)
        }
    }

    /// # Errors
    /// `Forbidden` unless the identity is an admin.
    pub fn require_admin(&self, identity: &AuthenticatedIdentity) -> Result<(), GateError> {
        if identity.admin {
            Ok(())
        } else {
            Err(GateError::Forbidden)
        }
    }
}
