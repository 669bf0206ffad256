//! Outbound notifications (email) sent around invite and reset flows.

use futures_util::future::BoxFuture;
use tenancy_core::{TenantId, TenantRole};

use crate::error::ServiceError;

/// A message for a person outside the system.
///
/// Carries the token so a real sender can build a link. Implementations must
/// never log it.
#[derive(Clone, PartialEq, Eq)]
pub enum Notification {
    TenantInvite {
        email: String,
        tenant_id: TenantId,
        tenant_name: String,
        role: TenantRole,
        token: String,
    },
    PasswordReset {
        email: String,
        token: String,
    },
}

impl Notification {
    pub fn email(&self) -> &str {
        match self {
            Notification::TenantInvite { email, .. } | Notification::PasswordReset { email, .. } => {
                email
            }
        }
    }

    pub fn token(&self) -> &str {
        match self {
            Notification::TenantInvite { token, .. } | Notification::PasswordReset { token, .. } => {
                token
            }
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Notification::TenantInvite { .. } => "tenant_invite",
            Notification::PasswordReset { .. } => "password_reset",
        }
    }
}

impl std::fmt::Debug for Notification {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Notification")
            .field("kind", &self.kind())
            .field("email", &self.email())
            .finish_non_exhaustive()
    }
}

/// Delivers notifications. Called by the services, never by actors.
pub trait Notifier: Send + Sync + 'static {
    fn notify<'a>(&'a self, notification: &'a Notification) -> BoxFuture<'a, Result<(), ServiceError>>;
}

/// Writes a log line instead of sending anything.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify<'a>(&'a self, notification: &'a Notification) -> BoxFuture<'a, Result<(), ServiceError>> {
        Box::pin(async move {
            match notification {
                Notification::TenantInvite {
                    email,
                    tenant_id,
                    role,
                    ..
                } => tracing::info!(%email, %tenant_id, %role, "invite notification"),
                Notification::PasswordReset { email, .. } => {
                    tracing::info!(%email, "password reset notification")
                }
            }
            Ok(())
        })
    }
}
