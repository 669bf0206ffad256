//! User actor: credentials, profile and password-reset tokens.
//!
//! Keyed by the normalized email address. The persisted record carries the
//! credential; callers only ever see the public [`UserState`].

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use ractor::RpcReplyPort;
use serde::{Deserialize, Serialize};
use tenancy_core::{
    TenantId, UserId, UserProfile, UserState, emails_match, normalize_email, validate_email,
};

use crate::config::{PasswordHashConfig, UserConfig};
use crate::context::EntityContext;
use crate::credentials::{generate_token, hash_password, tokens_match, verify_password};
use crate::entity::Entity;
use crate::error::{ActorError, ActorResult};
use crate::host::EntityHandle;

#[derive(Clone, Serialize, Deserialize)]
struct ResetToken {
    token: String,
    expires_at: DateTime<Utc>,
}

/// Durable record of a user.
#[derive(Clone, Serialize, Deserialize)]
pub struct UserRecord {
    id: UserId,
    email: String,
    profile: UserProfile,
    /// `base64(salt).base64(hash)`; salt and hash are always replaced together.
    #[serde(default)]
    credential: Option<String>,
    #[serde(default)]
    reset: Option<ResetToken>,
    is_active: bool,
    #[serde(default)]
    tenant_ids: BTreeSet<TenantId>,
    created_at: DateTime<Utc>,
    #[serde(default)]
    last_login_at: Option<DateTime<Utc>>,
}

impl UserRecord {
    fn public(&self) -> UserState {
        UserState {
            id: self.id,
            email: self.email.clone(),
            profile: self.profile.clone(),
            is_active: self.is_active,
            tenant_ids: self.tenant_ids.clone(),
            created_at: self.created_at,
            last_login_at: self.last_login_at,
        }
    }
}

impl std::fmt::Debug for UserRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UserRecord")
            .field("id", &self.id)
            .field("email", &self.email)
            .field("is_active", &self.is_active)
            .field("credential", &self.credential.as_ref().map(|_| "<redacted>"))
            .field("reset", &self.reset.as_ref().map(|_| "<redacted>"))
            .finish_non_exhaustive()
    }
}

/// Messages for the user actor.
pub enum UserMessage {
    Create {
        email: String,
        password: String,
        profile: UserProfile,
        reply: RpcReplyPort<ActorResult<bool>>,
    },
    ValidateCredentials {
        password: String,
        reply: RpcReplyPort<bool>,
    },
    RecordLogin {
        reply: RpcReplyPort<ActorResult<()>>,
    },
    ChangePassword {
        current: String,
        new: String,
        reply: RpcReplyPort<ActorResult<bool>>,
    },
    RequestPasswordReset {
        email: String,
        reply: RpcReplyPort<ActorResult<String>>,
    },
    ResetPassword {
        token: String,
        new_password: String,
        reply: RpcReplyPort<ActorResult<bool>>,
    },
    GetState {
        reply: RpcReplyPort<Option<UserState>>,
    },
    UpdateProfile {
        profile: UserProfile,
        reply: RpcReplyPort<ActorResult<()>>,
    },
    SetActive {
        active: bool,
        reply: RpcReplyPort<ActorResult<()>>,
    },
    AddTenant {
        tenant_id: TenantId,
        reply: RpcReplyPort<ActorResult<bool>>,
    },
    RemoveTenant {
        tenant_id: TenantId,
        reply: RpcReplyPort<ActorResult<bool>>,
    },
}

#[derive(Debug, Clone, Default)]
pub struct UserActor {
    config: UserConfig,
}

impl UserActor {
    pub fn new(config: UserConfig) -> Self {
        Self { config }
    }
}

impl Entity for UserActor {
    const KIND: &'static str = "user";
    type State = UserRecord;
    type Msg = UserMessage;

    async fn handle(&self, ctx: &mut EntityContext<Self>, msg: Self::Msg) {
        match msg {
            UserMessage::Create {
                email,
                password,
                profile,
                reply,
            } => {
                let _ = reply.send(self.create(ctx, email, password, profile).await);
            }
            UserMessage::ValidateCredentials { password, reply } => {
                let valid = match ctx.state() {
                    Some(record) if record.is_active => {
                        check_password(self.config.password_hash, password, record.credential.clone())
                            .await
                    }
                    _ => false,
                };
                let _ = reply.send(valid);
            }
            UserMessage::RecordLogin { reply } => {
                let now = ctx.now();
                let result = match existing(ctx) {
                    Ok(record) => {
                        record.last_login_at = Some(now);
                        ctx.write_state().await
                    }
                    Err(e) => Err(e),
                };
                let _ = reply.send(result);
            }
            UserMessage::ChangePassword {
                current,
                new,
                reply,
            } => {
                let _ = reply.send(self.change_password(ctx, current, new).await);
            }
            UserMessage::RequestPasswordReset { email, reply } => {
                let _ = reply.send(self.request_reset(ctx, &email).await);
            }
            UserMessage::ResetPassword {
                token,
                new_password,
                reply,
            } => {
                let _ = reply.send(self.reset_password(ctx, &token, new_password).await);
            }
            UserMessage::GetState { reply } => {
                let _ = reply.send(ctx.state().map(UserRecord::public));
            }
            UserMessage::UpdateProfile { profile, reply } => {
                let result = match existing(ctx) {
                    Ok(record) => {
                        record.profile = profile;
                        ctx.write_state().await
                    }
                    Err(e) => Err(e),
                };
                let _ = reply.send(result);
            }
            UserMessage::SetActive { active, reply } => {
                let result = match existing(ctx) {
                    Ok(record) => {
                        record.is_active = active;
                        ctx.write_state().await
                    }
                    Err(e) => Err(e),
                };
                tracing::info!(user = %ctx.key(), active, "user activation changed");
                let _ = reply.send(result);
            }
            UserMessage::AddTenant { tenant_id, reply } => {
                let result = match ctx.state().map(|r| r.tenant_ids.contains(&tenant_id)) {
                    None => Err(ActorError::NotFound(format!("user {}", ctx.key()))),
                    Some(true) => Ok(false),
                    Some(false) => match existing(ctx) {
                        Ok(record) => {
                            record.tenant_ids.insert(tenant_id);
                            ctx.write_state().await.map(|_| true)
                        }
                        Err(e) => Err(e),
                    },
                };
                let _ = reply.send(result);
            }
            UserMessage::RemoveTenant { tenant_id, reply } => {
                let result = match ctx.state().map(|r| r.tenant_ids.contains(&tenant_id)) {
                    None => Err(ActorError::NotFound(format!("user {}", ctx.key()))),
                    Some(false) => Ok(false),
                    Some(true) => match existing(ctx) {
                        Ok(record) => {
                            record.tenant_ids.remove(&tenant_id);
                            ctx.write_state().await.map(|_| true)
                        }
                        Err(e) => Err(e),
                    },
                };
                let _ = reply.send(result);
            }
        }
    }
}

impl UserActor {
    async fn create(
        &self,
        ctx: &mut EntityContext<Self>,
        email: String,
        password: String,
        profile: UserProfile,
    ) -> ActorResult<bool> {
        if ctx.state().is_some() {
            return Ok(false);
        }
        validate_email(&email).map_err(ActorError::Validation)?;
        if normalize_email(&email) != ctx.key() {
            return Err(ActorError::Validation(format!(
                "email does not belong to user key {}",
                ctx.key()
            )));
        }
        validate_password(&password)?;

        let credential = derive_credential(self.config.password_hash, password).await?;
        let now = ctx.now();
        ctx.set_state(UserRecord {
            id: UserId::new(),
            email: email.trim().to_string(),
            profile,
            credential: Some(credential),
            reset: None,
            is_active: true,
            tenant_ids: BTreeSet::new(),
            created_at: now,
            last_login_at: None,
        });
        ctx.write_state().await?;
        tracing::info!(user = %ctx.key(), "user created");
        Ok(true)
    }

    async fn change_password(
        &self,
        ctx: &mut EntityContext<Self>,
        current: String,
        new: String,
    ) -> ActorResult<bool> {
        let Some(record) = ctx.state() else {
            return Ok(false);
        };
        if !check_password(self.config.password_hash, current, record.credential.clone()).await {
            return Ok(false);
        }
        validate_password(&new)?;

        let credential = derive_credential(self.config.password_hash, new).await?;
        existing(ctx)?.credential = Some(credential);
        ctx.write_state().await?;
        tracing::info!(user = %ctx.key(), "password changed");
        Ok(true)
    }

    async fn request_reset(&self, ctx: &mut EntityContext<Self>, email: &str) -> ActorResult<String> {
        let not_found = || ActorError::NotFound(format!("user {email}"));
        let Some(record) = ctx.state() else {
            return Err(not_found());
        };
        if !emails_match(&record.email, email) {
            return Err(not_found());
        }

        let token = generate_token();
        let expires_at = ctx.now() + self.config.reset_token_ttl;
        existing(ctx)?.reset = Some(ResetToken {
            token: token.clone(),
            expires_at,
        });
        ctx.write_state().await?;
        tracing::info!(user = %ctx.key(), %expires_at, "password reset requested");
        Ok(token)
    }

    async fn reset_password(
        &self,
        ctx: &mut EntityContext<Self>,
        token: &str,
        new_password: String,
    ) -> ActorResult<bool> {
        let now = ctx.now();
        let Some(reset) = ctx.state().and_then(|r| r.reset.as_ref()) else {
            return Ok(false);
        };
        if reset.expires_at < now {
            existing(ctx)?.reset = None;
            ctx.write_state().await?;
            return Ok(false);
        }
        if !tokens_match(&reset.token, token) {
            return Ok(false);
        }
        validate_password(&new_password)?;

        let credential = derive_credential(self.config.password_hash, new_password).await?;
        let record = existing(ctx)?;
        record.credential = Some(credential);
        record.reset = None;
        ctx.write_state().await?;
        tracing::info!(user = %ctx.key(), "password reset");
        Ok(true)
    }
}

fn existing(ctx: &mut EntityContext<UserActor>) -> ActorResult<&mut UserRecord> {
    let key = ctx.key().to_string();
    ctx.state_mut()
        .ok_or_else(|| ActorError::NotFound(format!("user {key}")))
}

fn validate_password(password: &str) -> ActorResult<()> {
    if password.is_empty() {
        return Err(ActorError::Validation("password must not be empty".into()));
    }
    Ok(())
}

// Hashing is CPU-bound; run it on the blocking pool.
async fn derive_credential(cfg: PasswordHashConfig, password: String) -> ActorResult<String> {
    tokio::task::spawn_blocking(move || hash_password(&password, &cfg))
        .await
        .map_err(|e| ActorError::Unavailable(format!("password hashing task: {e}")))?
}

async fn check_password(cfg: PasswordHashConfig, password: String, record: Option<String>) -> bool {
    let Some(record) = record else {
        return false;
    };
    tokio::task::spawn_blocking(move || verify_password(&password, &record, &cfg))
        .await
        .unwrap_or(false)
}

impl EntityHandle<UserActor> {
    /// Returns false if the user already exists.
    pub async fn create(&self, email: &str, password: &str, profile: UserProfile) -> ActorResult<bool> {
        self.call(|reply| UserMessage::Create {
            email: email.to_string(),
            password: password.to_string(),
            profile: profile.clone(),
            reply,
        })
        .await?
    }

    pub async fn validate_credentials(&self, password: &str) -> ActorResult<bool> {
        self.call(|reply| UserMessage::ValidateCredentials {
            password: password.to_string(),
            reply,
        })
        .await
    }

    pub async fn record_login(&self) -> ActorResult<()> {
        self.call(|reply| UserMessage::RecordLogin { reply }).await?
    }

    pub async fn change_password(&self, current: &str, new: &str) -> ActorResult<bool> {
        self.call(|reply| UserMessage::ChangePassword {
            current: current.to_string(),
            new: new.to_string(),
            reply,
        })
        .await?
    }

    pub async fn request_password_reset(&self, email: &str) -> ActorResult<String> {
        self.call(|reply| UserMessage::RequestPasswordReset {
            email: email.to_string(),
            reply,
        })
        .await?
    }

    pub async fn reset_password(&self, token: &str, new_password: &str) -> ActorResult<bool> {
        self.call(|reply| UserMessage::ResetPassword {
            token: token.to_string(),
            new_password: new_password.to_string(),
            reply,
        })
        .await?
    }

    pub async fn get_state(&self) -> ActorResult<Option<UserState>> {
        self.call(|reply| UserMessage::GetState { reply }).await
    }

    pub async fn update_profile(&self, profile: UserProfile) -> ActorResult<()> {
        self.call(|reply| UserMessage::UpdateProfile {
            profile: profile.clone(),
            reply,
        })
        .await?
    }

    pub async fn set_active(&self, active: bool) -> ActorResult<()> {
        self.call(|reply| UserMessage::SetActive { active, reply })
            .await?
    }

    pub async fn add_tenant(&self, tenant_id: TenantId) -> ActorResult<bool> {
        self.call(|reply| UserMessage::AddTenant { tenant_id, reply })
            .await?
    }

    pub async fn remove_tenant(&self, tenant_id: TenantId) -> ActorResult<bool> {
        self.call(|reply| UserMessage::RemoveTenant { tenant_id, reply })
            .await?
    }
}
