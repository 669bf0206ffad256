//! Tenant actor: profile, roster and invites.

mod common;

use actors::{ActorError, EntityHandle, TenantActor};
use chrono::Duration;
use common::{TestResult, entities};
use tenancy_core::{Clock, TenantId, TenantRole, TenantSettings, TenantState, UserId};

async fn create_tenant(
    fixture: &common::Fixture,
    owner: UserId,
) -> Result<(TenantId, EntityHandle<TenantActor>), ActorError> {
    let id = TenantId::new();
    let tenant = fixture
        .runtime
        .get_or_activate::<TenantActor>(id.to_string())
        .await?;
    let state = TenantState::new(id, "Acme", "acme", owner, fixture.clock.now());
    tenant.update(state).await?;
    Ok((id, tenant))
}

#[tokio::test]
async fn update_then_get_state_returns_the_same_tenant() -> TestResult {
    let fixture = entities();
    let id = TenantId::new();
    let tenant = fixture
        .runtime
        .get_or_activate::<TenantActor>(id.to_string())
        .await?;
    assert_eq!(tenant.get_state().await?, None);

    let state = TenantState::new(id, "Acme", "acme", UserId::new(), fixture.clock.now())
        .with_logo_url("https://acme.example/logo.png");
    tenant.update(state.clone()).await?;

    let loaded = tenant.get_state().await?.ok_or("tenant missing")?;
    assert_eq!(loaded, state);
    assert!(loaded.members.is_empty());
    assert!(tenant.get_users().await?.is_empty());

    // Reload from storage.
    assert!(tenant.deactivate().await?);
    assert_eq!(tenant.get_state().await?, Some(state));
    Ok(())
}

#[tokio::test]
async fn update_keeps_roster_and_rejects_bad_profiles() -> TestResult {
    let fixture = entities();
    let owner = UserId::new();
    let (id, tenant) = create_tenant(&fixture, owner).await?;
    tenant.add_user(owner, TenantRole::Owner).await?;

    fixture.clock.advance(Duration::minutes(5));
    let mut renamed = TenantState::new(id, "Acme Corp", "acme-corp", owner, fixture.clock.now());
    renamed.settings = TenantSettings {
        max_members: Some(10),
        ..TenantSettings::default()
    };
    tenant.update(renamed).await?;

    let state = tenant.get_state().await?.ok_or("tenant missing")?;
    assert_eq!(state.name, "Acme Corp");
    assert_eq!(state.settings.max_members, Some(10));
    assert_eq!(state.updated_at, Some(fixture.clock.now()));
    assert_eq!(state.members.len(), 1);

    let bad = TenantState::new(id, "Acme", "Not A Subdomain", owner, fixture.clock.now());
    assert!(matches!(
        tenant.update(bad).await,
        Err(ActorError::Validation(_))
    ));

    let other = fixture
        .runtime
        .get_or_activate::<TenantActor>(TenantId::new().to_string())
        .await?;
    let mismatched = TenantState::new(id, "Acme", "acme", owner, fixture.clock.now());
    assert!(matches!(
        other.update(mismatched).await,
        Err(ActorError::Validation(_))
    ));
    Ok(())
}

#[tokio::test]
async fn roster_changes_are_idempotent() -> TestResult {
    let fixture = entities();
    let owner = UserId::new();
    let member = UserId::new();
    let (_, tenant) = create_tenant(&fixture, owner).await?;

    assert!(tenant.add_user(member, TenantRole::Member).await?);
    assert!(!tenant.add_user(member, TenantRole::Admin).await?);

    let users = tenant.get_users().await?;
    assert_eq!(users.len(), 1);
    assert_eq!(users[0].role, TenantRole::Member);

    assert!(tenant.update_user_role(member, TenantRole::Viewer).await?);
    assert!(!tenant.update_user_role(UserId::new(), TenantRole::Viewer).await?);
    assert_eq!(tenant.get_users().await?[0].role, TenantRole::Viewer);

    assert!(tenant.remove_user(member).await?);
    assert!(!tenant.remove_user(member).await?);
    assert!(tenant.get_users().await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn roster_operations_need_an_existing_tenant() -> TestResult {
    let fixture = entities();
    let tenant = fixture
        .runtime
        .get_or_activate::<TenantActor>(TenantId::new().to_string())
        .await?;

    assert!(matches!(
        tenant.add_user(UserId::new(), TenantRole::Member).await,
        Err(ActorError::NotFound(_))
    ));
    assert!(matches!(
        tenant
            .invite_user("a@x.com", TenantRole::Member, UserId::new())
            .await,
        Err(ActorError::NotFound(_))
    ));
    assert!(!tenant.remove_user(UserId::new()).await?);
    Ok(())
}

#[tokio::test]
async fn member_limit_is_enforced() -> TestResult {
    let fixture = entities();
    let owner = UserId::new();
    let id = TenantId::new();
    let tenant = fixture
        .runtime
        .get_or_activate::<TenantActor>(id.to_string())
        .await?;
    let state = TenantState::new(id, "Small", "small", owner, fixture.clock.now()).with_settings(
        TenantSettings {
            max_members: Some(1),
            ..TenantSettings::default()
        },
    );
    tenant.update(state).await?;

    assert!(tenant.add_user(owner, TenantRole::Owner).await?);
    assert!(matches!(
        tenant.add_user(UserId::new(), TenantRole::Member).await,
        Err(ActorError::Validation(_))
    ));
    Ok(())
}

#[tokio::test]
async fn invite_is_accepted_once() -> TestResult {
    let fixture = entities();
    let owner = UserId::new();
    let (_, tenant) = create_tenant(&fixture, owner).await?;

    let token = tenant
        .invite_user("new@acme.com", TenantRole::Admin, owner)
        .await?;
    let invite = tenant.get_invite(&token).await?.ok_or("invite missing")?;
    assert_eq!(invite.email, "new@acme.com");
    assert_eq!(invite.role, TenantRole::Admin);
    assert_eq!(invite.invited_by, owner);
    assert_eq!(invite.expires_at, fixture.clock.now() + Duration::days(7));

    assert!(tenant.accept_invite("new@acme.com", &token).await?);
    assert!(!tenant.accept_invite("new@acme.com", &token).await?);
    assert_eq!(tenant.get_invite(&token).await?, None);
    // Accepting does not touch the roster.
    assert!(tenant.get_users().await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn invite_email_must_match_exactly() -> TestResult {
    let fixture = entities();
    let owner = UserId::new();
    let (_, tenant) = create_tenant(&fixture, owner).await?;

    let token = tenant
        .invite_user("new@acme.com", TenantRole::Member, owner)
        .await?;
    assert!(!tenant.accept_invite("New@Acme.com", &token).await?);
    assert!(!tenant.accept_invite("other@acme.com", &token).await?);
    // A mismatch leaves the invite usable.
    assert!(tenant.accept_invite("new@acme.com", &token).await?);
    Ok(())
}

#[tokio::test]
async fn expired_invites_are_rejected_and_removed() -> TestResult {
    let fixture = entities();
    let owner = UserId::new();
    let (_, tenant) = create_tenant(&fixture, owner).await?;

    let token = tenant
        .invite_user("late@acme.com", TenantRole::Member, owner)
        .await?;
    fixture.clock.advance(Duration::days(8));

    assert_eq!(tenant.get_invite(&token).await?, None);
    assert!(!tenant.accept_invite("late@acme.com", &token).await?);
    assert!(tenant.get_pending_invites().await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn new_invites_prune_expired_ones() -> TestResult {
    let fixture = entities();
    let owner = UserId::new();
    let (_, tenant) = create_tenant(&fixture, owner).await?;

    tenant
        .invite_user("old@acme.com", TenantRole::Member, owner)
        .await?;
    fixture.clock.advance(Duration::days(8));
    let fresh = tenant
        .invite_user("fresh@acme.com", TenantRole::Member, owner)
        .await?;

    let pending = tenant.get_pending_invites().await?;
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].0, fresh);
    Ok(())
}

#[tokio::test]
async fn duplicate_invites_get_distinct_tokens() -> TestResult {
    let fixture = entities();
    let owner = UserId::new();
    let (_, tenant) = create_tenant(&fixture, owner).await?;

    let first = tenant
        .invite_user("dup@acme.com", TenantRole::Member, owner)
        .await?;
    let second = tenant
        .invite_user("dup@acme.com", TenantRole::Viewer, owner)
        .await?;
    assert_ne!(first, second);
    assert_eq!(tenant.get_pending_invites().await?.len(), 2);

    assert!(tenant.revoke_invite(&first).await?);
    assert!(!tenant.revoke_invite(&first).await?);
    assert!(!tenant.accept_invite("dup@acme.com", &first).await?);
    assert!(tenant.accept_invite("dup@acme.com", &second).await?);
    Ok(())
}

#[tokio::test]
async fn invalid_invite_email_is_rejected() -> TestResult {
    let fixture = entities();
    let owner = UserId::new();
    let (_, tenant) = create_tenant(&fixture, owner).await?;
    assert!(matches!(
        tenant
            .invite_user("not-an-email", TenantRole::Member, owner)
            .await,
        Err(ActorError::Validation(_))
    ));
    Ok(())
}

#[tokio::test]
async fn failed_write_is_reported() -> TestResult {
    let fixture = entities();
    let owner = UserId::new();
    let (_, tenant) = create_tenant(&fixture, owner).await?;

    fixture.store.fail_writes(true);
    let err = tenant
        .add_user(UserId::new(), TenantRole::Member)
        .await
        .err()
        .ok_or("write should fail")?;
    assert!(matches!(err, ActorError::Persistence { .. }), "{err}");
    assert!(err.is_infrastructure());
    Ok(())
}
