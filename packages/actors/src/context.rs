//! Per-activation context handed to every entity hook.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use ractor::ActorRef;
use tenancy_core::{StateKey, StoreError, StoredState};
use tokio::task::AbortHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::entity::{ActorId, Entity};
use crate::error::ActorError;
use crate::host::HostMessage;
use crate::runtime::ActorRuntime;

/// Cancellable handle to a recurring timer.
#[derive(Debug, Clone)]
pub struct TimerHandle {
    name: String,
    abort: Arc<AbortHandle>,
}

impl TimerHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Stop the timer. Ticks already in the mailbox are discarded.
    pub fn cancel(&self) {
        self.abort.abort();
    }

    pub fn is_cancelled(&self) -> bool {
        self.abort.is_finished()
    }
}

/// State and services of one activation.
///
/// Owned by the hosting actor; entity hooks get `&mut` access one message at
/// a time, so nothing here needs locking.
pub struct EntityContext<E: Entity> {
    id: ActorId,
    state_key: StateKey,
    state: Option<E::State>,
    etag: Option<String>,
    dirty: bool,
    /// Bytes of the last write whose outcome is unknown (timed out or failed
    /// after possibly reaching the store).
    unconfirmed: Option<Vec<u8>>,
    runtime: ActorRuntime,
    myself: ActorRef<HostMessage<E::Msg>>,
    timers: HashMap<String, TimerHandle>,
    idle_check: Option<AbortHandle>,
    idle_requested: bool,
    last_activity: Instant,
    deactivated: CancellationToken,
}

impl<E: Entity> EntityContext<E> {
    /// Read durable state for `id`. Any store failure is an activation failure.
    pub(crate) async fn load(
        id: ActorId,
        runtime: ActorRuntime,
        myself: ActorRef<HostMessage<E::Msg>>,
    ) -> Result<Self, ActorError> {
        let state_key = StateKey::new(id.kind, id.key.clone(), E::STATE_NAME);
        let store = runtime.store();
        let timeout = runtime.config().store_timeout;

        let activation_err = |reason: String| ActorError::Activation {
            id: id.to_string(),
            reason,
        };

        let read = tokio::time::timeout(timeout, store.read(&state_key))
            .await
            .map_err(|_| activation_err(format!("state read timed out after {timeout:?}")))?
            .map_err(|e| activation_err(e.to_string()))?;

        let (state, etag) = match read {
            Some(StoredState { data, etag }) => {
                let state: E::State = serde_json::from_slice(&data)
                    .map_err(|e| activation_err(format!("corrupt state: {e}")))?;
                (Some(state), Some(etag))
            }
            None => (None, None),
        };

        tracing::debug!(kind = id.kind, key = %id.key, exists = state.is_some(), "loaded state");

        let deactivated = runtime.shutdown_token().child_token();
        Ok(Self {
            id,
            state_key,
            state,
            etag,
            dirty: false,
            unconfirmed: None,
            runtime,
            myself,
            timers: HashMap::new(),
            idle_check: None,
            idle_requested: false,
            last_activity: Instant::now(),
            deactivated,
        })
    }

    pub fn id(&self) -> &ActorId {
        &self.id
    }

    /// The activation key.
    pub fn key(&self) -> &str {
        &self.id.key
    }

    /// Current state, or `None` if nothing was ever written for this key.
    pub fn state(&self) -> Option<&E::State> {
        self.state.as_ref()
    }

    /// Mutable access to existing state. Marks the state dirty.
    pub fn state_mut(&mut self) -> Option<&mut E::State> {
        if self.state.is_some() {
            self.dirty = true;
        }
        self.state.as_mut()
    }

    /// Mutable state, creating it with `init` if this key has none yet.
    /// Marks the state dirty.
    pub fn state_or_insert_with(&mut self, init: impl FnOnce() -> E::State) -> &mut E::State {
        self.dirty = true;
        self.state.get_or_insert_with(init)
    }

    /// Replace the state wholesale. Marks the state dirty.
    pub fn set_state(&mut self, state: E::State) {
        self.state = Some(state);
        self.dirty = true;
    }

    /// Whether in-memory state differs from the last successful write.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Persist the in-memory state.
    ///
    /// The write is conditional on the etag of the last read or write. On
    /// failure the in-memory state is kept as is and stays dirty, so the
    /// next write or the deactivation flush tries again.
    ///
    /// A conflict is settled by re-reading the slot. If it holds the bytes of
    /// an earlier write whose outcome was never confirmed, that write landed:
    /// its etag is adopted and the write is retried. Anything else means
    /// another writer got there first; the stored value is reloaded and
    /// [`ActorError::Conflict`] is returned.
    pub async fn write_state(&mut self) -> Result<(), ActorError> {
        let Some(state) = self.state.as_ref() else {
            return Ok(());
        };
        let data = serde_json::to_vec(state)?;

        match self.put(data.clone()).await {
            Ok(()) => Ok(()),
            Err(StoreError::Conflict { .. }) => {
                self.reconcile().await?;
                self.put(data).await.map_err(|e| self.write_failed(e))
            }
            Err(e) => Err(self.write_failed(e)),
        }
    }

    async fn put(&mut self, data: Vec<u8>) -> Result<(), StoreError> {
        let store = self.runtime.store();
        let timeout = self.runtime.config().store_timeout;
        let written = tokio::time::timeout(
            timeout,
            store.write(&self.state_key, data.clone(), self.etag.as_deref()),
        )
        .await;

        match written {
            Ok(Ok(etag)) => {
                tracing::debug!(kind = self.id.kind, key = %self.id.key, "state written");
                self.etag = Some(etag);
                self.dirty = false;
                self.unconfirmed = None;
                Ok(())
            }
            Ok(Err(e @ StoreError::Conflict { .. })) => Err(e),
            Ok(Err(e)) => {
                self.unconfirmed = Some(data);
                Err(e)
            }
            Err(_) => {
                self.unconfirmed = Some(data);
                Err(StoreError::Unavailable(format!(
                    "write timed out after {timeout:?}"
                )))
            }
        }
    }

    /// Re-read the slot after a conflict and line the cached etag up with it.
    async fn reconcile(&mut self) -> Result<(), ActorError> {
        let store = self.runtime.store();
        let timeout = self.runtime.config().store_timeout;
        let stored = match tokio::time::timeout(timeout, store.read(&self.state_key)).await {
            Ok(Ok(stored)) => stored,
            Ok(Err(e)) => return Err(self.write_failed(e)),
            Err(_) => {
                return Err(self.write_failed(StoreError::Unavailable(format!(
                    "read timed out after {timeout:?}"
                ))));
            }
        };
        let unconfirmed = self.unconfirmed.take();

        match stored {
            Some(StoredState { data, etag }) if unconfirmed.as_deref() == Some(data.as_slice()) => {
                tracing::debug!(kind = self.id.kind, key = %self.id.key, "unconfirmed write had landed, adopting its etag");
                self.etag = Some(etag);
                Ok(())
            }
            Some(StoredState { data, etag }) => {
                let reloaded: E::State = serde_json::from_slice(&data)?;
                tracing::warn!(kind = self.id.kind, key = %self.id.key, "state changed by another writer, reloaded");
                let reason = format!("expected etag {:?}, found {etag:?}", self.etag);
                self.state = Some(reloaded);
                self.etag = Some(etag);
                self.dirty = false;
                Err(ActorError::Conflict {
                    id: self.id.to_string(),
                    reason,
                })
            }
            None => {
                tracing::warn!(kind = self.id.kind, key = %self.id.key, "stored state disappeared, writing it again");
                self.etag = None;
                Ok(())
            }
        }
    }

    fn write_failed(&mut self, err: StoreError) -> ActorError {
        self.dirty = true;
        tracing::warn!(kind = self.id.kind, key = %self.id.key, error = %err, "state write failed");
        ActorError::persistence(&self.id, err)
    }

    /// Current time from the runtime's clock.
    pub fn now(&self) -> DateTime<Utc> {
        self.runtime.clock().now()
    }

    /// The runtime this activation belongs to, for calls to other actors.
    pub fn runtime(&self) -> &ActorRuntime {
        &self.runtime
    }

    /// Fires on runtime shutdown or when this activation is deactivated.
    pub fn cancellation(&self) -> CancellationToken {
        self.deactivated.clone()
    }

    /// Schedule `Entity::on_timer(name)` every `interval`, first after
    /// `first_due`. Ticks go through the mailbox like any other message.
    /// Registering a name again replaces the previous timer.
    pub fn register_timer(
        &mut self,
        name: impl Into<String>,
        interval: Duration,
        first_due: Duration,
    ) -> TimerHandle {
        let name = name.into();
        self.cancel_timer(&name);

        let tick_name = name.clone();
        let abort = spawn_ticker(self.myself.clone(), interval, first_due, move || {
            HostMessage::Timer(tick_name.clone())
        });
        let handle = TimerHandle {
            name: name.clone(),
            abort: Arc::new(abort),
        };
        tracing::debug!(kind = self.id.kind, key = %self.id.key, timer = %name, ?interval, "timer registered");
        self.timers.insert(name, handle.clone());
        handle
    }

    /// Cancel a timer by name. Returns false if there was none.
    pub fn cancel_timer(&mut self, name: &str) -> bool {
        match self.timers.remove(name) {
            Some(handle) => {
                handle.cancel();
                true
            }
            None => false,
        }
    }

    pub(crate) fn timer_active(&self, name: &str) -> bool {
        self.timers.get(name).is_some_and(|t| !t.is_cancelled())
    }

    pub(crate) fn touch(&mut self) {
        self.last_activity = Instant::now();
        self.idle_requested = false;
    }

    pub(crate) fn is_idle(&self) -> bool {
        !E::KEEP_ALIVE
            && self
                .runtime
                .config()
                .idle_timeout
                .is_some_and(|timeout| self.last_activity.elapsed() >= timeout)
    }

    /// Returns true the first time it is called after the activation went idle.
    pub(crate) fn take_idle_request(&mut self) -> bool {
        if self.is_idle() && !self.idle_requested {
            self.idle_requested = true;
            true
        } else {
            false
        }
    }

    /// An idle deactivation was refused; let the next probe ask again.
    pub(crate) fn clear_idle_request(&mut self) {
        self.idle_requested = false;
    }

    pub(crate) fn start_idle_check(&mut self) {
        if E::KEEP_ALIVE || self.runtime.config().idle_timeout.is_none() {
            return;
        }
        let every = self.runtime.config().idle_check_interval;
        self.idle_check = Some(spawn_ticker(self.myself.clone(), every, every, || {
            HostMessage::IdleCheck
        }));
    }

    /// Stop every timer and the idle check, and fire the cancellation signal.
    pub(crate) fn shut_down(&mut self) {
        for (_, timer) in self.timers.drain() {
            timer.cancel();
        }
        if let Some(idle) = self.idle_check.take() {
            idle.abort();
        }
        self.deactivated.cancel();
    }
}

fn spawn_ticker<M, F>(
    myself: ActorRef<HostMessage<M>>,
    interval: Duration,
    first_due: Duration,
    make: F,
) -> AbortHandle
where
    M: Send + 'static,
    F: Fn() -> HostMessage<M> + Send + 'static,
{
    let interval = interval.max(Duration::from_millis(1));
    tokio::spawn(async move {
        tokio::time::sleep(first_due).await;
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if myself.send_message(make()).is_err() {
                break;
            }
        }
    })
    .abort_handle()
}
