//! The activation table: turns `(kind, key)` into a running, persistent actor.

use std::any::Any;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use futures_util::future::join_all;
use ractor::{Actor, ActorRef, SpawnErr};
use tenancy_core::{Clock, StateStore, SystemClock};
use tokio_util::sync::CancellationToken;

use crate::config::RuntimeConfig;
use crate::entity::{ActorId, DeactivateReason, Entity};
use crate::error::ActorError;
use crate::host::{Activation, EntityHandle, EntityHost, HostArgs, HostMessage};

/// One activation-table entry. The async mutex is held while activating or
/// deactivating, so concurrent first calls to a key activate it once.
type Slot = Arc<tokio::sync::Mutex<Option<Arc<dyn Activation>>>>;

/// Hosts entities. Cheap to clone; all clones share one activation table.
#[derive(Clone)]
pub struct ActorRuntime {
    inner: Arc<RuntimeInner>,
}

struct RuntimeInner {
    store: Arc<dyn StateStore>,
    clock: Arc<dyn Clock>,
    config: RuntimeConfig,
    entities: RwLock<HashMap<&'static str, Arc<dyn Any + Send + Sync>>>,
    slots: Mutex<HashMap<ActorId, Slot>>,
    shutdown: CancellationToken,
}

impl ActorRuntime {
    /// Create a runtime over `store` using the system clock.
    pub fn new(store: Arc<dyn StateStore>, config: RuntimeConfig) -> Self {
        Self::with_clock(store, config, Arc::new(SystemClock))
    }

    pub fn with_clock(
        store: Arc<dyn StateStore>,
        config: RuntimeConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        tracing::info!(store = store.name(), "actor runtime created");
        Self {
            inner: Arc::new(RuntimeInner {
                store,
                clock,
                config,
                entities: RwLock::new(HashMap::new()),
                slots: Mutex::new(HashMap::new()),
                shutdown: CancellationToken::new(),
            }),
        }
    }

    /// Install the shared instance for an entity kind. Registering a kind
    /// again affects activations created afterwards.
    pub fn register<E: Entity>(&self, entity: E) -> &Self {
        let mut entities = self
            .inner
            .entities
            .write()
            .unwrap_or_else(|e| e.into_inner());
        entities.insert(E::KIND, Arc::new(entity));
        tracing::debug!(kind = E::KIND, "entity registered");
        self
    }

    pub fn store(&self) -> Arc<dyn StateStore> {
        self.inner.store.clone()
    }

    pub fn clock(&self) -> &dyn Clock {
        self.inner.clock.as_ref()
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.inner.config
    }

    pub fn is_shutting_down(&self) -> bool {
        self.inner.shutdown.is_cancelled()
    }

    /// Parent of every activation's cancellation token.
    pub(crate) fn shutdown_token(&self) -> &CancellationToken {
        &self.inner.shutdown
    }

    /// Handle to the activation for `key`, activating it first if needed.
    ///
    /// Activation reads the durable state. If that fails the key is left
    /// inactive and the next call tries again.
    pub async fn get_or_activate<E: Entity>(
        &self,
        key: impl Into<String>,
    ) -> Result<EntityHandle<E>, ActorError> {
        let id = ActorId::new(E::KIND, key);
        let entity = self.entity::<E>()?;
        let slot = self.slot(&id);
        let mut guard = slot.lock().await;

        if let Some(activation) = guard.as_ref().filter(|a| a.is_alive()) {
            let actor = activation
                .as_any()
                .downcast_ref::<ActorRef<HostMessage<E::Msg>>>()
                .cloned()
                .ok_or_else(|| ActorError::Unavailable(id.to_string()))?;
            return Ok(EntityHandle::new(self.clone(), id, actor));
        }

        if self.is_shutting_down() {
            return Err(ActorError::Unavailable(id.to_string()));
        }

        let args = HostArgs {
            id: id.clone(),
            runtime: self.clone(),
        };
        let (actor, _join) = match Actor::spawn(None, EntityHost::new(entity), args).await {
            Ok(spawned) => spawned,
            Err(e) => {
                drop(guard);
                self.release_slot(&id, &slot);
                let err = activation_error(&id, e);
                tracing::warn!(actor = %id, error = %err, "activation failed");
                return Err(err);
            }
        };

        let activation: Arc<dyn Activation> = Arc::new(actor.clone());
        *guard = Some(activation);
        Ok(EntityHandle::new(self.clone(), id, actor))
    }

    /// Flush and drop the activation for `key`. Returns false if it was not
    /// active. A failed flush leaves the activation in place.
    pub async fn deactivate<E: Entity>(&self, key: impl Into<String>) -> Result<bool, ActorError> {
        let id = ActorId::new(E::KIND, key);
        self.deactivate_id(&id, DeactivateReason::Explicit).await
    }

    pub(crate) async fn deactivate_id(
        &self,
        id: &ActorId,
        reason: DeactivateReason,
    ) -> Result<bool, ActorError> {
        let Some(slot) = self.existing_slot(id) else {
            return Ok(false);
        };

        let stopped = {
            let mut guard = slot.lock().await;
            let Some(activation) = guard.clone() else {
                return Ok(false);
            };
            let stopped = activation.deactivate(reason).await?;
            if stopped {
                *guard = None;
            }
            stopped
        };

        self.release_slot(id, &slot);
        Ok(stopped)
    }

    /// Deactivate every activation that has been idle for the configured
    /// period. Returns how many were dropped.
    pub async fn deactivate_idle(&self) -> usize {
        let ids = self.active_ids();
        let results = join_all(
            ids.iter()
                .map(|id| self.deactivate_id(id, DeactivateReason::Idle)),
        )
        .await;

        let mut dropped = 0;
        for (id, result) in ids.iter().zip(results) {
            match result {
                Ok(true) => dropped += 1,
                Ok(false) => {}
                Err(e) => tracing::warn!(actor = %id, error = %e, "idle deactivation failed"),
            }
        }
        dropped
    }

    /// Number of live activations.
    pub async fn active_count(&self) -> usize {
        let slots: Vec<Slot> = self.lock_slots().values().cloned().collect();
        let mut count = 0;
        for slot in slots {
            if slot.lock().await.as_ref().is_some_and(|a| a.is_alive()) {
                count += 1;
            }
        }
        count
    }

    /// Signal cancellation, then flush and stop every activation. New
    /// activations are refused from here on.
    pub async fn shutdown(&self) {
        if self.inner.shutdown.is_cancelled() {
            return;
        }
        self.inner.shutdown.cancel();
        let ids = self.active_ids();
        tracing::info!(active = ids.len(), "shutting down actor runtime");

        let results = join_all(
            ids.iter()
                .map(|id| self.deactivate_id(id, DeactivateReason::Shutdown)),
        )
        .await;
        for (id, result) in ids.iter().zip(results) {
            if let Err(e) = result {
                tracing::error!(actor = %id, error = %e, "flush failed during shutdown");
            }
        }
        tracing::info!("actor runtime stopped");
    }

    fn entity<E: Entity>(&self) -> Result<Arc<E>, ActorError> {
        let entities = self
            .inner
            .entities
            .read()
            .unwrap_or_else(|e| e.into_inner());
        entities
            .get(E::KIND)
            .cloned()
            .and_then(|entity| entity.downcast::<E>().ok())
            .ok_or(ActorError::NotRegistered(E::KIND))
    }

    fn lock_slots(&self) -> std::sync::MutexGuard<'_, HashMap<ActorId, Slot>> {
        self.inner.slots.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn slot(&self, id: &ActorId) -> Slot {
        self.lock_slots().entry(id.clone()).or_default().clone()
    }

    fn existing_slot(&self, id: &ActorId) -> Option<Slot> {
        self.lock_slots().get(id).cloned()
    }

    fn active_ids(&self) -> Vec<ActorId> {
        self.lock_slots().keys().cloned().collect()
    }

    /// Drop the table entry once nobody else holds it and it is empty.
    fn release_slot(&self, id: &ActorId, slot: &Slot) {
        let mut slots = self.lock_slots();
        // One reference in the table, one held by the caller.
        let unused = Arc::strong_count(slot) == 2
            && slot.try_lock().is_ok_and(|guard| guard.is_none());
        if unused {
            slots.remove(id);
        }
    }
}

fn activation_error(id: &ActorId, err: SpawnErr) -> ActorError {
    let reason = match &err {
        SpawnErr::StartupFailed(inner) => match inner.downcast_ref::<ActorError>() {
            Some(ActorError::Activation { reason, .. }) => reason.clone(),
            _ => inner.to_string(),
        },
        other => other.to_string(),
    };
    ActorError::Activation {
        id: id.to_string(),
        reason,
    }
}
