//! Tenant actor: profile, membership roster and invite tokens.
//!
//! Keyed by tenant id. Invite acceptance only consumes the token; adding the
//! user to the roster is a separate `add_user` call by the orchestrator, so
//! either step can be retried on its own.

use ractor::RpcReplyPort;
use tenancy_core::{Membership, TenantInvite, TenantMember, TenantRole, TenantState, UserId};

use crate::config::TenantConfig;
use crate::context::EntityContext;
use crate::credentials::generate_token;
use crate::entity::Entity;
use crate::error::{ActorError, ActorResult};
use crate::host::EntityHandle;

/// Messages for the tenant actor.
pub enum TenantMessage {
    GetState {
        reply: RpcReplyPort<Option<TenantState>>,
    },
    Update {
        state: Box<TenantState>,
        reply: RpcReplyPort<ActorResult<()>>,
    },
    AddUser {
        user_id: UserId,
        role: TenantRole,
        reply: RpcReplyPort<ActorResult<bool>>,
    },
    RemoveUser {
        user_id: UserId,
        reply: RpcReplyPort<ActorResult<bool>>,
    },
    UpdateUserRole {
        user_id: UserId,
        role: TenantRole,
        reply: RpcReplyPort<ActorResult<bool>>,
    },
    GetUsers {
        reply: RpcReplyPort<Vec<TenantMember>>,
    },
    InviteUser {
        email: String,
        role: TenantRole,
        invited_by: UserId,
        reply: RpcReplyPort<ActorResult<String>>,
    },
    AcceptInvite {
        email: String,
        token: String,
        reply: RpcReplyPort<ActorResult<bool>>,
    },
    GetInvite {
        token: String,
        reply: RpcReplyPort<Option<TenantInvite>>,
    },
    GetPendingInvites {
        reply: RpcReplyPort<Vec<(String, TenantInvite)>>,
    },
    RevokeInvite {
        token: String,
        reply: RpcReplyPort<ActorResult<bool>>,
    },
}

#[derive(Debug, Clone, Default)]
pub struct TenantActor {
    config: TenantConfig,
}

impl TenantActor {
    pub fn new(config: TenantConfig) -> Self {
        Self { config }
    }
}

impl Entity for TenantActor {
    const KIND: &'static str = "tenant";
    type State = TenantState;
    type Msg = TenantMessage;

    async fn handle(&self, ctx: &mut EntityContext<Self>, msg: Self::Msg) {
        match msg {
            TenantMessage::GetState { reply } => {
                let _ = reply.send(ctx.state().cloned());
            }
            TenantMessage::Update { state, reply } => {
                let _ = reply.send(update(ctx, *state).await);
            }
            TenantMessage::AddUser {
                user_id,
                role,
                reply,
            } => {
                let _ = reply.send(add_user(ctx, user_id, role).await);
            }
            TenantMessage::RemoveUser { user_id, reply } => {
                let _ = reply.send(remove_user(ctx, user_id).await);
            }
            TenantMessage::UpdateUserRole {
                user_id,
                role,
                reply,
            } => {
                let _ = reply.send(update_user_role(ctx, user_id, role).await);
            }
            TenantMessage::GetUsers { reply } => {
                let members = ctx.state().map(TenantState::member_list).unwrap_or_default();
                let _ = reply.send(members);
            }
            TenantMessage::InviteUser {
                email,
                role,
                invited_by,
                reply,
            } => {
                let result = self.invite_user(ctx, email, role, invited_by).await;
                let _ = reply.send(result);
            }
            TenantMessage::AcceptInvite {
                email,
                token,
                reply,
            } => {
                let _ = reply.send(accept_invite(ctx, &email, &token).await);
            }
            TenantMessage::GetInvite { token, reply } => {
                let now = ctx.now();
                let invite = ctx
                    .state()
                    .and_then(|s| s.pending_invites.get(&token))
                    .filter(|invite| !invite.is_expired(now))
                    .cloned();
                let _ = reply.send(invite);
            }
            TenantMessage::GetPendingInvites { reply } => {
                let invites = ctx
                    .state()
                    .map(|s| {
                        s.pending_invites
                            .iter()
                            .map(|(token, invite)| (token.clone(), invite.clone()))
                            .collect()
                    })
                    .unwrap_or_default();
                let _ = reply.send(invites);
            }
            TenantMessage::RevokeInvite { token, reply } => {
                let _ = reply.send(revoke_invite(ctx, &token).await);
            }
        }
    }
}

impl TenantActor {
    async fn invite_user(
        &self,
        ctx: &mut EntityContext<Self>,
        email: String,
        role: TenantRole,
        invited_by: UserId,
    ) -> ActorResult<String> {
        tenancy_core::validate_email(&email).map_err(ActorError::Validation)?;

        let now = ctx.now();
        let expires_at = now + self.config.invite_ttl;
        let key = ctx.key().to_string();
        let state = existing(ctx)?;

        let pruned = state.prune_expired_invites(now);
        let token = generate_token();
        state.pending_invites.insert(
            token.clone(),
            TenantInvite {
                email: email.trim().to_string(),
                role,
                invited_by,
                created_at: now,
                expires_at,
            },
        );

        ctx.write_state().await?;
        tracing::info!(tenant_id = %key, %role, pruned, "invite created");
        Ok(token)
    }
}

/// Mutable state of a tenant that must already exist.
fn existing(ctx: &mut EntityContext<TenantActor>) -> ActorResult<&mut TenantState> {
    let key = ctx.key().to_string();
    ctx.state_mut()
        .ok_or_else(|| ActorError::NotFound(format!("tenant {key}")))
}

async fn update(ctx: &mut EntityContext<TenantActor>, new: TenantState) -> ActorResult<()> {
    new.validate_profile().map_err(ActorError::Validation)?;
    let now = ctx.now();

    match ctx.state_mut() {
        Some(state) => {
            state.name = new.name;
            state.subdomain = new.subdomain;
            state.logo_url = new.logo_url;
            state.settings = new.settings;
            state.updated_at = Some(now);
        }
        None => {
            if new.id.to_string() != ctx.key() {
                return Err(ActorError::Validation(format!(
                    "tenant id {} does not match actor key {}",
                    new.id,
                    ctx.key()
                )));
            }
            ctx.set_state(new);
        }
    }

    ctx.write_state().await?;
    tracing::info!(tenant_id = %ctx.key(), "tenant updated");
    Ok(())
}

async fn add_user(
    ctx: &mut EntityContext<TenantActor>,
    user_id: UserId,
    role: TenantRole,
) -> ActorResult<bool> {
    let now = ctx.now();
    let Some(state) = ctx.state() else {
        return Err(ActorError::NotFound(format!("tenant {}", ctx.key())));
    };
    if state.members.contains_key(&user_id) {
        return Ok(false);
    }
    if let Some(max) = state.settings.max_members
        && state.members.len() >= max
    {
        return Err(ActorError::Validation(format!(
            "tenant {} is at its member limit of {max}",
            state.id
        )));
    }

    existing(ctx)?.members.insert(
        user_id,
        Membership {
            role,
            joined_at: now,
        },
    );
    ctx.write_state().await?;
    tracing::info!(tenant_id = %ctx.key(), %user_id, %role, "member added");
    Ok(true)
}

async fn remove_user(ctx: &mut EntityContext<TenantActor>, user_id: UserId) -> ActorResult<bool> {
    if !ctx
        .state()
        .is_some_and(|s| s.members.contains_key(&user_id))
    {
        return Ok(false);
    }

    existing(ctx)?.members.remove(&user_id);
    ctx.write_state().await?;
    tracing::info!(tenant_id = %ctx.key(), %user_id, "member removed");
    Ok(true)
}

async fn update_user_role(
    ctx: &mut EntityContext<TenantActor>,
    user_id: UserId,
    role: TenantRole,
) -> ActorResult<bool> {
    if !ctx
        .state()
        .is_some_and(|s| s.members.contains_key(&user_id))
    {
        return Ok(false);
    }

    if let Some(member) = existing(ctx)?.members.get_mut(&user_id) {
        member.role = role;
    }
    ctx.write_state().await?;
    tracing::info!(tenant_id = %ctx.key(), %user_id, %role, "member role changed");
    Ok(true)
}

async fn accept_invite(
    ctx: &mut EntityContext<TenantActor>,
    email: &str,
    token: &str,
) -> ActorResult<bool> {
    let now = ctx.now();
    let Some(invite) = ctx.state().and_then(|s| s.pending_invites.get(token)) else {
        return Ok(false);
    };

    if invite.is_expired(now) {
        existing(ctx)?.pending_invites.remove(token);
        ctx.write_state().await?;
        tracing::info!(tenant_id = %ctx.key(), "expired invite presented, removed");
        return Ok(false);
    }
    // Exact, case-sensitive match against the address the invite was sent to.
    if invite.email != email {
        return Ok(false);
    }

    existing(ctx)?.pending_invites.remove(token);
    ctx.write_state().await?;
    tracing::info!(tenant_id = %ctx.key(), "invite accepted");
    Ok(true)
}

async fn revoke_invite(ctx: &mut EntityContext<TenantActor>, token: &str) -> ActorResult<bool> {
    if !ctx
        .state()
        .is_some_and(|s| s.pending_invites.contains_key(token))
    {
        return Ok(false);
    }
    existing(ctx)?.pending_invites.remove(token);
    ctx.write_state().await?;
    Ok(true)
}

impl EntityHandle<TenantActor> {
    /// `None` until the tenant has been created with [`update`](Self::update).
    pub async fn get_state(&self) -> ActorResult<Option<TenantState>> {
        self.call(|reply| TenantMessage::GetState { reply }).await
    }

    pub async fn update(&self, state: TenantState) -> ActorResult<()> {
        self.call(|reply| TenantMessage::Update {
            state: Box::new(state.clone()),
            reply,
        })
        .await?
    }

    /// Returns false if the user is already a member.
    pub async fn add_user(&self, user_id: UserId, role: TenantRole) -> ActorResult<bool> {
        self.call(|reply| TenantMessage::AddUser {
            user_id,
            role,
            reply,
        })
        .await?
    }

    pub async fn remove_user(&self, user_id: UserId) -> ActorResult<bool> {
        self.call(|reply| TenantMessage::RemoveUser { user_id, reply })
            .await?
    }

    pub async fn update_user_role(&self, user_id: UserId, role: TenantRole) -> ActorResult<bool> {
        self.call(|reply| TenantMessage::UpdateUserRole {
            user_id,
            role,
            reply,
        })
        .await?
    }

    pub async fn get_users(&self) -> ActorResult<Vec<TenantMember>> {
        self.call(|reply| TenantMessage::GetUsers { reply }).await
    }

    /// Create a pending invite and return its token.
    pub async fn invite_user(
        &self,
        email: &str,
        role: TenantRole,
        invited_by: UserId,
    ) -> ActorResult<String> {
        self.call(|reply| TenantMessage::InviteUser {
            email: email.to_string(),
            role,
            invited_by,
            reply,
        })
        .await?
    }

    /// Consume an invite token. Does not touch the roster.
    pub async fn accept_invite(&self, email: &str, token: &str) -> ActorResult<bool> {
        self.call(|reply| TenantMessage::AcceptInvite {
            email: email.to_string(),
            token: token.to_string(),
            reply,
        })
        .await?
    }

    /// A pending, unexpired invite.
    pub async fn get_invite(&self, token: &str) -> ActorResult<Option<TenantInvite>> {
        self.call(|reply| TenantMessage::GetInvite {
            token: token.to_string(),
            reply,
        })
        .await
    }

    pub async fn get_pending_invites(&self) -> ActorResult<Vec<(String, TenantInvite)>> {
        self.call(|reply| TenantMessage::GetPendingInvites { reply })
            .await
    }

    pub async fn revoke_invite(&self, token: &str) -> ActorResult<bool> {
        self.call(|reply| TenantMessage::RevokeInvite {
            token: token.to_string(),
            reply,
        })
        .await?
    }
}
