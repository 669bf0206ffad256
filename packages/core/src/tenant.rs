//! Tenant domain types: profile, membership roster and pending invites.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::UserId;

/// Unique identifier for a tenant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TenantId(pub Ulid);

impl TenantId {
    /// Create a new unique tenant ID.
    pub fn new() -> Self {
        Self(Ulid::new())
    }

    /// Parse a tenant ID from a string.
    pub fn parse(s: &str) -> Result<Self, ulid::DecodeError> {
        Ok(Self(Ulid::from_string(s)?))
    }
}

impl Default for TenantId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TenantId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Role a user holds inside one tenant.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TenantRole {
    Owner,
    Admin,
    #[default]
    Member,
    Viewer,
}

impl std::fmt::Display for TenantRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TenantRole::Owner => write!(f, "owner"),
            TenantRole::Admin => write!(f, "admin"),
            TenantRole::Member => write!(f, "member"),
            TenantRole::Viewer => write!(f, "viewer"),
        }
    }
}

impl std::str::FromStr for TenantRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "owner" => Ok(TenantRole::Owner),
            "admin" => Ok(TenantRole::Admin),
            "member" => Ok(TenantRole::Member),
            "viewer" => Ok(TenantRole::Viewer),
            other => Err(format!("unknown tenant role: {other}")),
        }
    }
}

/// One roster entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Membership {
    pub role: TenantRole,
    pub joined_at: DateTime<Utc>,
}

/// A roster entry flattened for listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenantMember {
    pub user_id: UserId,
    pub role: TenantRole,
    pub joined_at: DateTime<Utc>,
}

/// A pending invite, keyed by its token in [`TenantState::pending_invites`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenantInvite {
    /// Address the invite was issued to. Matched exactly on acceptance.
    pub email: String,
    pub role: TenantRole,
    pub invited_by: UserId,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl TenantInvite {
    /// An invite is expired once `now` is strictly past its deadline.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }
}

/// Typed tenant settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TenantSettings {
    /// Role used when an invite does not name one explicitly.
    pub default_role: TenantRole,
    /// Upper bound on roster size, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_members: Option<usize>,
    /// IANA time zone name used for tenant-facing timestamps.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_zone: Option<String>,
}

impl Default for TenantSettings {
    fn default() -> Self {
        Self {
            default_role: TenantRole::Member,
            max_members: None,
            time_zone: None,
        }
    }
}

/// Full durable state of one tenant actor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TenantState {
    pub id: TenantId,
    pub name: String,
    pub subdomain: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logo_url: Option<String>,
    pub owner_id: UserId,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub settings: TenantSettings,
    /// Membership roster. A user id appears at most once.
    #[serde(default)]
    pub members: BTreeMap<UserId, Membership>,
    /// Pending invites by token. Accepted and expired invites are removed.
    #[serde(default)]
    pub pending_invites: BTreeMap<String, TenantInvite>,
}

impl TenantState {
    /// Create a tenant profile with an empty roster.
    pub fn new(
        id: TenantId,
        name: impl Into<String>,
        subdomain: impl Into<String>,
        owner_id: UserId,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            subdomain: subdomain.into(),
            logo_url: None,
            owner_id,
            created_at: now,
            updated_at: None,
            settings: TenantSettings::default(),
            members: BTreeMap::new(),
            pending_invites: BTreeMap::new(),
        }
    }

    /// Set the logo URL.
    pub fn with_logo_url(mut self, logo_url: impl Into<String>) -> Self {
        self.logo_url = Some(logo_url.into());
        self
    }

    /// Set the tenant settings.
    pub fn with_settings(mut self, settings: TenantSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Check the caller-supplied profile fields.
    pub fn validate_profile(&self) -> Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("tenant name must not be empty".into());
        }
        validate_subdomain(&self.subdomain)
    }

    /// Roster as a list, ordered by user id.
    pub fn member_list(&self) -> Vec<TenantMember> {
        self.members
            .iter()
            .map(|(user_id, m)| TenantMember {
                user_id: *user_id,
                role: m.role,
                joined_at: m.joined_at,
            })
            .collect()
    }

    /// Drop every invite whose deadline has passed. Returns how many were removed.
    pub fn prune_expired_invites(&mut self, now: DateTime<Utc>) -> usize {
        let before = self.pending_invites.len();
        self.pending_invites.retain(|_, invite| !invite.is_expired(now));
        before - self.pending_invites.len()
    }
}

/// Subdomains are 1-63 chars of `[a-z0-9-]`, not starting or ending with `-`.
pub fn validate_subdomain(subdomain: &str) -> Result<(), String> {
    let valid_chars = subdomain
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-');
    if subdomain.is_empty()
        || subdomain.len() > 63
        || !valid_chars
        || subdomain.starts_with('-')
        || subdomain.ends_with('-')
    {
        return Err(format!("invalid subdomain: {subdomain:?}"));
    }
    Ok(())
}
