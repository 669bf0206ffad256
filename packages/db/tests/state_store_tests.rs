mod common;

use std::error::Error;

use tenancy_core::{StateKey, StateStore, StoreError};

#[tokio::test]
async fn test_missing_state_reads_as_none() -> Result<(), Box<dyn Error>> {
    let (_guard, store) = common::setup_store().await?;
    let key = StateKey::new("tenant", "01J0000000000000000000000", "state");
    assert!(store.read(&key).await?.is_none());
    Ok(())
}

#[tokio::test]
async fn test_conditional_writes() -> Result<(), Box<dyn Error>> {
    let (_guard, store) = common::setup_store().await?;
    let key = StateKey::new("user", "a@x.com", "state");

    let first = store.write(&key, b"{\"v\":1}".to_vec(), None).await?;
    let stored = store.read(&key).await?.ok_or("state missing")?;
    assert_eq!(stored.data, b"{\"v\":1}");
    assert_eq!(stored.etag, first);

    // A second create loses.
    let err = store.write(&key, b"other".to_vec(), None).await.err().ok_or("expected conflict")?;
    assert!(matches!(err, StoreError::Conflict { .. }), "{err}");

    let second = store.write(&key, b"{\"v\":2}".to_vec(), Some(&first)).await?;
    assert_ne!(first, second);

    // A stale etag loses and reports the current one.
    match store.write(&key, b"stale".to_vec(), Some(&first)).await {
        Err(StoreError::Conflict { actual, .. }) => assert_eq!(actual, Some(second.clone())),
        other => panic!("expected conflict, got {other:?}"),
    }

    let stored = store.read(&key).await?.ok_or("state missing")?;
    assert_eq!(stored.data, b"{\"v\":2}");
    assert_eq!(stored.etag, second);
    Ok(())
}

#[tokio::test]
async fn test_update_of_missing_state_conflicts() -> Result<(), Box<dyn Error>> {
    let (_guard, store) = common::setup_store().await?;
    let key = StateKey::new("job", "missing", "state");
    let err = store
        .write(&key, b"x".to_vec(), Some("nope"))
        .await
        .err()
        .ok_or("expected conflict")?;
    assert!(matches!(err, StoreError::Conflict { actual: None, .. }), "{err}");
    assert!(store.read(&key).await?.is_none());
    Ok(())
}

#[tokio::test]
async fn test_binary_state_round_trips() -> Result<(), Box<dyn Error>> {
    let (_guard, store) = common::setup_store().await?;
    let key = StateKey::new("blob", "k", "state");
    let bytes: Vec<u8> = (0..=255).collect();
    store.write(&key, bytes.clone(), None).await?;
    assert_eq!(store.read(&key).await?.ok_or("state missing")?.data, bytes);
    Ok(())
}
