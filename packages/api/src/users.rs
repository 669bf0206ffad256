//! User-facing account flows on top of the user actor.

use std::sync::Arc;

use actors::{ActorError, ActorRuntime, EntityHandle, UserActor};
use tenancy_core::{UserProfile, UserState, normalize_email};

use crate::error::{ServiceError, ServiceResult};
use crate::notifier::{Notification, Notifier};

#[derive(Clone)]
pub struct UserService {
    runtime: ActorRuntime,
    notifier: Arc<dyn Notifier>,
}

impl UserService {
    pub fn new(runtime: ActorRuntime, notifier: Arc<dyn Notifier>) -> Self {
        Self { runtime, notifier }
    }

    pub async fn register(&self, email: &str, password: &str, profile: UserProfile) -> ServiceResult<UserState> {
        let user = self.user(email).await?;
        if !user.create(email, password, profile).await? {
            return Err(ServiceError::Conflict(format!("user {} already exists", email.trim())));
        }
        self.state(&user).await
    }

    /// Check the password and stamp the login time.
    pub async fn login(&self, email: &str, password: &str) -> ServiceResult<UserState> {
        let user = self.user(email).await?;
        if !user.validate_credentials(password).await? {
            tracing::info!(user = %user.key(), "login rejected");
            return Err(ServiceError::Unauthorized);
        }
        user.record_login().await?;
        self.state(&user).await
    }

    pub async fn change_password(&self, email: &str, current: &str, new: &str) -> ServiceResult<()> {
        let user = self.user(email).await?;
        if !user.change_password(current, new).await? {
            return Err(ServiceError::Unauthorized);
        }
        Ok(())
    }

    /// Start a password reset. Succeeds whether or not the address is known,
    /// so the response never reveals which accounts exist.
    pub async fn forgot_password(&self, email: &str) -> ServiceResult<()> {
        let user = self.user(email).await?;
        let token = match user.request_password_reset(email).await {
            Ok(token) => token,
            Err(ActorError::NotFound(_)) => {
                tracing::debug!("password reset requested for unknown address");
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };

        let notification = Notification::PasswordReset {
            email: email.trim().to_string(),
            token,
        };
        if let Err(e) = self.notifier.notify(&notification).await {
            tracing::warn!(error = %e, "password reset notification failed");
        }
        Ok(())
    }

    /// Finish a password reset. Returns false for a wrong or expired token.
    pub async fn reset_password(&self, email: &str, token: &str, new_password: &str) -> ServiceResult<bool> {
        let user = self.user(email).await?;
        Ok(user.reset_password(token, new_password).await?)
    }

    pub async fn profile(&self, email: &str) -> ServiceResult<Option<UserState>> {
        Ok(self.user(email).await?.get_state().await?)
    }

    pub async fn update_profile(&self, email: &str, profile: UserProfile) -> ServiceResult<UserState> {
        let user = self.user(email).await?;
        user.update_profile(profile).await?;
        self.state(&user).await
    }

    pub async fn set_active(&self, email: &str, active: bool) -> ServiceResult<()> {
        Ok(self.user(email).await?.set_active(active).await?)
    }

    async fn user(&self, email: &str) -> ServiceResult<EntityHandle<UserActor>> {
        let key = normalize_email(email);
        if key.is_empty() {
            return Err(ServiceError::Validation("email must not be empty".into()));
        }
        Ok(self.runtime.get_or_activate::<UserActor>(key).await?)
    }

    async fn state(&self, user: &EntityHandle<UserActor>) -> ServiceResult<UserState> {
        user.get_state()
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("user {}", user.key())))
    }
}
