//! Tenant orchestration: the multi-actor flows around the tenant actor.
//!
//! Each flow is a sequence of idempotent actor calls, so a flow that fails
//! half way can be retried from the start.

use std::sync::Arc;

use actors::{ActorRuntime, EntityHandle, TenantActor, UserActor};
use tenancy_core::{
    Clock, TenantId, TenantMember, TenantRole, TenantState, UserId, UserState, normalize_email,
};

use crate::error::{ServiceError, ServiceResult};
use crate::notifier::{Notification, Notifier};

#[derive(Clone)]
pub struct TenantService {
    runtime: ActorRuntime,
    notifier: Arc<dyn Notifier>,
}

impl TenantService {
    pub fn new(runtime: ActorRuntime, notifier: Arc<dyn Notifier>) -> Self {
        Self { runtime, notifier }
    }

    /// Create a tenant owned by an existing user.
    pub async fn create_tenant(
        &self,
        name: &str,
        subdomain: &str,
        owner_email: &str,
    ) -> ServiceResult<TenantState> {
        let (owner_ref, owner) = self.existing_user(owner_email).await?;

        let id = TenantId::new();
        let tenant = self.tenant(id).await?;
        let state = TenantState::new(id, name.trim(), subdomain, owner.id, self.runtime.clock().now());
        tenant.update(state).await?;
        tenant.add_user(owner.id, TenantRole::Owner).await?;
        owner_ref.add_tenant(id).await?;

        tracing::info!(tenant_id = %id, owner_id = %owner.id, "tenant created");
        tenant
            .get_state()
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("tenant {id}")))
    }

    pub async fn get_tenant(&self, tenant_id: TenantId) -> ServiceResult<Option<TenantState>> {
        Ok(self.tenant(tenant_id).await?.get_state().await?)
    }

    pub async fn members(&self, tenant_id: TenantId) -> ServiceResult<Vec<TenantMember>> {
        Ok(self.tenant(tenant_id).await?.get_users().await?)
    }

    /// Invite `email` into the tenant and notify them. Only owners and
    /// admins may invite, and nobody can be invited as owner.
    pub async fn invite_user(
        &self,
        tenant_id: TenantId,
        email: &str,
        role: TenantRole,
        invited_by: UserId,
    ) -> ServiceResult<String> {
        if role == TenantRole::Owner {
            return Err(ServiceError::Validation(
                "the owner role cannot be granted by invite".into(),
            ));
        }
        let tenant = self.tenant(tenant_id).await?;
        let state = self.require_tenant(&tenant).await?;
        require_manager(&state, invited_by)?;

        let token = tenant.invite_user(email, role, invited_by).await?;
        let notification = Notification::TenantInvite {
            email: email.trim().to_string(),
            tenant_id,
            tenant_name: state.name.clone(),
            role,
            token: token.clone(),
        };
        // The invite stands even if the mail does not go out; it can be resent.
        if let Err(e) = self.notifier.notify(&notification).await {
            tracing::warn!(%tenant_id, error = %e, "invite notification failed");
        }
        Ok(token)
    }

    /// Accept an invite: consume the token, add the user to the roster and
    /// link the tenant on the user. Returns false for an unknown, expired or
    /// mismatched invite.
    pub async fn accept_invite(&self, tenant_id: TenantId, email: &str, token: &str) -> ServiceResult<bool> {
        let tenant = self.tenant(tenant_id).await?;
        let Some(invite) = tenant.get_invite(token).await? else {
            return Ok(false);
        };
        let (user_ref, user) = self.existing_user(email).await?;

        if !tenant.accept_invite(email, token).await? {
            return Ok(false);
        }
        tenant.add_user(user.id, invite.role).await?;
        user_ref.add_tenant(tenant_id).await?;

        tracing::info!(%tenant_id, user_id = %user.id, role = %invite.role, "invite accepted");
        Ok(true)
    }

    pub async fn revoke_invite(&self, tenant_id: TenantId, token: &str) -> ServiceResult<bool> {
        Ok(self.tenant(tenant_id).await?.revoke_invite(token).await?)
    }

    /// Remove a member. The owner cannot be removed.
    pub async fn remove_member(&self, tenant_id: TenantId, email: &str) -> ServiceResult<bool> {
        let tenant = self.tenant(tenant_id).await?;
        let state = self.require_tenant(&tenant).await?;
        let (user_ref, user) = self.existing_user(email).await?;
        if user.id == state.owner_id {
            return Err(ServiceError::Forbidden("the tenant owner cannot be removed".into()));
        }

        let removed = tenant.remove_user(user.id).await?;
        user_ref.remove_tenant(tenant_id).await?;
        Ok(removed)
    }

    /// Change a member's role. Ownership cannot be granted or taken away here.
    pub async fn change_role(&self, tenant_id: TenantId, user_id: UserId, role: TenantRole) -> ServiceResult<bool> {
        if role == TenantRole::Owner {
            return Err(ServiceError::Validation(
                "the owner role cannot be granted".into(),
            ));
        }
        let tenant = self.tenant(tenant_id).await?;
        let state = self.require_tenant(&tenant).await?;
        if user_id == state.owner_id {
            return Err(ServiceError::Forbidden("the tenant owner's role is fixed".into()));
        }
        Ok(tenant.update_user_role(user_id, role).await?)
    }

    async fn tenant(&self, tenant_id: TenantId) -> ServiceResult<EntityHandle<TenantActor>> {
        Ok(self
            .runtime
            .get_or_activate::<TenantActor>(tenant_id.to_string())
            .await?)
    }

    async fn require_tenant(&self, tenant: &EntityHandle<TenantActor>) -> ServiceResult<TenantState> {
        tenant
            .get_state()
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("tenant {}", tenant.key())))
    }

    async fn existing_user(&self, email: &str) -> ServiceResult<(EntityHandle<UserActor>, UserState)> {
        let user_ref = self
            .runtime
            .get_or_activate::<UserActor>(normalize_email(email))
            .await?;
        let user = user_ref
            .get_state()
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("user {}", email.trim())))?;
        Ok((user_ref, user))
    }
}

fn require_manager(state: &TenantState, user_id: UserId) -> ServiceResult<()> {
    match state.members.get(&user_id).map(|m| m.role) {
        Some(TenantRole::Owner | TenantRole::Admin) => Ok(()),
        _ => Err(ServiceError::Forbidden(format!(
            "user {user_id} cannot manage tenant {}",
            state.id
        ))),
    }
}
